//! End-to-end tests: render synthetic scans and read them back.

use image::{imageops, GrayImage, Luma};

use markscan_core::config::{ReaderConfig, ScoringConfig};
use markscan_core::engine::{collect_scans, grade};
use markscan_core::error::{GeometryError, ScanError};
use markscan_core::model::{ExamBundle, ExamModel, KeyEntry, Layout, SheetSpec, SolutionKey};
use markscan_core::results::{Answer, RawResult, ReadFlag};
use markscan_core::traits::SheetReader;
use markscan_recognizers::TemplateRecognizer;
use markscan_vision::{distort, parse_answer_list, render_sheet, Distortion, OmrReader, SheetMarks};

const PPM: f64 = 4.0;

fn exam(printed: &[&str], included: &[&str], questions: usize) -> ExamBundle {
    let spec = SheetSpec::uniform(questions, 4, printed);
    let mut bundle = ExamBundle::default();
    for &model in included {
        let layout = Layout::standard(model, &spec).unwrap();
        let key = SolutionKey {
            model: model.to_string(),
            questions: (1..=questions as u32)
                .map(|number| KeyEntry {
                    number,
                    original_id: None,
                    correct: 0,
                    weight: 1.0,
                    options: Some(4),
                })
                .collect(),
        };
        bundle
            .models
            .insert(model.to_string(), ExamModel { layout, key });
    }
    bundle
}

fn four_models() -> ExamBundle {
    exam(&["1", "2", "3", "4"], &["1", "2", "3", "4"], 10)
}

fn marks(model: Option<&str>, answers: &str) -> SheetMarks {
    SheetMarks {
        student_id: "12345678".into(),
        model: model.map(str::to_string),
        answers: parse_answer_list(answers).unwrap(),
    }
}

fn scan(exam: &ExamBundle, model: &str, marks: &SheetMarks, distortion: Distortion) -> GrayImage {
    let layout = &exam.model(model).unwrap().layout;
    distort(&render_sheet(layout, marks, PPM), &distortion).unwrap()
}

fn read(exam: &ExamBundle, image: &GrayImage) -> Result<RawResult, ScanError> {
    OmrReader::new(ReaderConfig::default()).read_sheet(
        "scan.png",
        image,
        exam,
        &TemplateRecognizer::builtin(),
    )
}

fn expected(answers: &str) -> Vec<Answer> {
    parse_answer_list(answers)
        .unwrap()
        .values()
        .map(|filled| match filled.as_slice() {
            [] => Answer::Blank,
            [one] => Answer::Option(*one),
            _ => Answer::Ambiguous,
        })
        .collect()
}

fn answers_of(raw: &RawResult) -> Vec<Answer> {
    raw.answers.values().copied().collect()
}

const ANSWERS: &str = "A,B,C,D,-,A,B,C,D,A";

#[test]
fn clean_scan_is_read_exactly() {
    let exam = four_models();
    let image = scan(&exam, "2", &marks(Some("2"), ANSWERS), Distortion::default());
    let raw = read(&exam, &image).unwrap();

    assert!(raw.is_readable());
    assert_eq!(raw.model.as_deref(), Some("2"));
    assert_eq!(answers_of(&raw), expected(ANSWERS));
    assert_eq!(raw.student_id, "12345678");
    assert!(raw.id_confidence > 0.6, "confidence {}", raw.id_confidence);
    assert!(raw.flags.is_empty());
}

#[test]
fn small_rotation_and_scale() {
    let exam = four_models();
    let distortion = Distortion {
        rotation_deg: 2.5,
        scale: 0.96,
        offset: [6.0, -4.0],
        perspective: 0.02,
    };
    let image = scan(&exam, "3", &marks(Some("3"), ANSWERS), distortion);
    let raw = read(&exam, &image).unwrap();

    assert_eq!(raw.model.as_deref(), Some("3"));
    assert_eq!(answers_of(&raw), expected(ANSWERS));
    assert_eq!(raw.student_id, "12345678");
}

#[test]
fn upside_down_scan() {
    let exam = four_models();
    let image = scan(&exam, "4", &marks(Some("4"), ANSWERS), Distortion::rotation(180.0));
    let raw = read(&exam, &image).unwrap();

    assert_eq!(raw.model.as_deref(), Some("4"));
    assert_eq!(answers_of(&raw), expected(ANSWERS));
    assert_eq!(raw.student_id, "12345678");
}

#[test]
fn distant_shot_at_sixty_percent() {
    let exam = four_models();
    let distortion = Distortion {
        scale: 0.6,
        ..Default::default()
    };
    let image = scan(&exam, "2", &marks(Some("2"), ANSWERS), distortion);
    let raw = read(&exam, &image).unwrap();

    assert!(raw.is_readable());
    assert_eq!(raw.model.as_deref(), Some("2"));
    assert_eq!(answers_of(&raw), expected(ANSWERS));
}

#[test]
fn page_pasted_on_a_larger_canvas() {
    let exam = four_models();
    let page = scan(&exam, "3", &marks(Some("3"), ANSWERS), Distortion::default());
    let mut canvas = GrayImage::from_pixel(2000, 1500, Luma([255]));
    imageops::replace(&mut canvas, &page, 600, 150);
    let raw = read(&exam, &canvas).unwrap();

    assert_eq!(raw.model.as_deref(), Some("3"));
    assert_eq!(answers_of(&raw), expected(ANSWERS));
    assert_eq!(raw.student_id, "12345678");
}

#[test]
fn two_page_tiff_yields_two_sheets() {
    use tiff::encoder::{colortype, TiffEncoder};

    let exam = four_models();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("batch.tif");
    let mut encoder = TiffEncoder::new(std::fs::File::create(&path).unwrap()).unwrap();
    for (model, answers) in [("1", ANSWERS), ("4", "D,D,D,D,D,-,-,-,-,-")] {
        let page = scan(&exam, model, &marks(Some(model), answers), Distortion::default());
        encoder
            .write_image::<colortype::Gray8>(page.width(), page.height(), page.as_raw())
            .unwrap();
    }

    let scans = collect_scans(&path).unwrap();
    assert_eq!(scans.len(), 2);
    let raws: Vec<RawResult> = scans
        .iter()
        .map(|s| {
            let image = s.load().unwrap();
            OmrReader::new(ReaderConfig::default())
                .read_sheet(&s.name, &image, &exam, &TemplateRecognizer::builtin())
                .unwrap()
        })
        .collect();
    assert_eq!(raws[0].scan, "batch.tif:p001");
    assert_eq!(raws[0].model.as_deref(), Some("1"));
    assert_eq!(answers_of(&raws[0]), expected(ANSWERS));
    assert_eq!(raws[1].scan, "batch.tif:p002");
    assert_eq!(raws[1].model.as_deref(), Some("4"));
    assert_eq!(answers_of(&raws[1]), expected("D,D,D,D,D,-,-,-,-,-"));
}

#[test]
fn missing_markers_fail_instead_of_guessing() {
    let exam = four_models();
    let mut image = scan(&exam, "1", &marks(Some("1"), ANSWERS), Distortion::default());
    // white out the top-right and bottom-left corner markers
    let layout = &exam.model("1").unwrap().layout;
    for f in [&layout.fiducials[1], &layout.fiducials[3]] {
        let half = f.size / 2.0 + 1.0;
        let x0 = ((f.center[0] - half) * PPM) as u32;
        let y0 = ((f.center[1] - half) * PPM) as u32;
        let side = (2.0 * half * PPM) as u32;
        for y in y0..y0 + side {
            for x in x0..x0 + side {
                image.put_pixel(x, y, Luma([255]));
            }
        }
    }

    // filled bubbles are marker-shaped too, but no page fit explains them
    let err = read(&exam, &image).unwrap_err();
    match err {
        ScanError::Geometry(GeometryError::TooFewMarkers { found, required }) => {
            assert!(found < required);
            assert_eq!(required, 5);
        }
        ScanError::Geometry(_) => {}
        other => panic!("expected a geometry error, got {other:?}"),
    }
    assert!(!ScanError::from(GeometryError::Degenerate).is_fatal());
}

#[test]
fn blank_model_row_on_single_model_exam_is_inferred() {
    let exam = exam(&["1"], &["1"], 5);
    let image = scan(&exam, "1", &marks(None, "A,B,C,D,A"), Distortion::default());
    let raw = read(&exam, &image).unwrap();
    assert_eq!(raw.model.as_deref(), Some("1"));
    assert!(raw.flags.contains(&ReadFlag::ModelInferred));
}

#[test]
fn blank_model_row_on_multi_model_exam_is_unreadable() {
    let exam = four_models();
    let image = scan(&exam, "1", &marks(None, ANSWERS), Distortion::default());
    let err = read(&exam, &image).unwrap_err();
    assert!(matches!(err, ScanError::UnreadableModel));
    assert!(!err.is_fatal());
}

#[test]
fn unknown_model_is_fatal() {
    // sheets printed for models 1 and 2, exam directory only has model 1
    let exam = exam(&["1", "2"], &["1"], 10);
    let image = scan(&exam, "1", &marks(Some("2"), ANSWERS), Distortion::default());
    let err = read(&exam, &image).unwrap_err();
    assert!(matches!(&err, ScanError::MissingLayout { model } if model == "2"));
    assert!(err.is_fatal());
}

#[test]
fn end_to_end_scoring_with_penalty() {
    let exam = four_models();
    let answers = "A,B,-,C,A,AC,A,A,A,A";
    let image = scan(&exam, "1", &marks(Some("1"), answers), Distortion::rotation(1.0));
    let raw = read(&exam, &image).unwrap();
    assert_eq!(raw.answer(3), Answer::Blank);
    assert_eq!(raw.answer(6), Answer::Ambiguous);

    let scoring = ScoringConfig {
        penalty: 0.25,
        ..Default::default()
    };
    let rows = grade(vec![raw], &exam, &scoring).unwrap();
    let mark = rows[0].mark.as_ref().unwrap();
    assert_eq!(mark.correct, 6);
    assert_eq!(mark.wrong, 2);
    assert_eq!(mark.blank, 1);
    assert_eq!(mark.ambiguous, 1);
    assert!((mark.score - 5.5).abs() < 1e-9);
    assert!((mark.max_score - 10.0).abs() < 1e-9);
    assert!((mark.mark - 5.5).abs() < 1e-9);
}
