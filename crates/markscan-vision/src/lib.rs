//! markscan-vision: reading answer sheets from page images.
//!
//! [`OmrReader`] implements the `SheetReader` trait: it normalizes the page
//! geometry from the printed fiducials, locates every field of the layout,
//! classifies the model row and the answer bubbles, and hands the rectified
//! student-ID box to the injected glyph recognizer.

pub mod bubbles;
pub mod geometry;
pub mod homography;
pub mod locate;
pub mod render;

use std::collections::BTreeMap;

use image::GrayImage;
use imageproc::contrast::otsu_level;

use markscan_core::config::ReaderConfig;
use markscan_core::error::ScanError;
use markscan_core::model::ExamBundle;
use markscan_core::results::{Answer, RawResult, ReadFlag, ScanStatus};
use markscan_core::traits::{FieldImage, GlyphRecognizer, SheetReader};

pub use geometry::{normalize, Transform};
pub use locate::{extract_field, locate, FieldRegions, Quad};
pub use render::{distort, parse_answer_list, render_sheet, Distortion, SheetMarks};

/// Resolution of the rectified student-ID image handed to the recognizer.
const FIELD_PX_PER_MM: f64 = 8.0;

/// The optical sheet reader.
#[derive(Debug, Clone, Default)]
pub struct OmrReader {
    config: ReaderConfig,
}

impl OmrReader {
    pub fn new(config: ReaderConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ReaderConfig {
        &self.config
    }

    /// Decide the exam model from the model row.
    fn read_model(
        &self,
        image: &GrayImage,
        regions: &FieldRegions,
        labels: &[String],
        dark_level: u8,
        exam: &ExamBundle,
    ) -> Result<(String, bool), ScanError> {
        let c = bubbles::read_group(image, &regions.model_bubbles, dark_level, &self.config.classifier);
        match c.answer {
            Answer::Option(i) => {
                let label = labels.get(i).cloned().unwrap_or_default();
                if exam.model(&label).is_none() {
                    return Err(ScanError::MissingLayout { model: label });
                }
                Ok((label, false))
            }
            Answer::Blank | Answer::Ambiguous => match exam.single_model() {
                Some(only) => Ok((only.to_string(), true)),
                None => Err(ScanError::UnreadableModel),
            },
        }
    }
}

impl SheetReader for OmrReader {
    fn read_sheet(
        &self,
        scan: &str,
        image: &GrayImage,
        exam: &ExamBundle,
        recognizer: &dyn GlyphRecognizer,
    ) -> Result<RawResult, ScanError> {
        let reference = exam
            .reference_layout()
            .ok_or_else(|| ScanError::MissingLayout {
                model: String::new(),
            })?;
        let transform = geometry::normalize(image, reference, &self.config.geometry)?;
        let dark_level = self
            .config
            .classifier
            .dark_level
            .unwrap_or_else(|| otsu_level(image));

        let reference_regions = locate(&transform, reference);
        let (model, inferred) = self.read_model(
            image,
            &reference_regions,
            &reference.model_field.labels,
            dark_level,
            exam,
        )?;
        let layout = &exam
            .model(&model)
            .ok_or_else(|| ScanError::MissingLayout {
                model: model.clone(),
            })?
            .layout;
        let regions = locate(&transform, layout);

        let mut answers = BTreeMap::new();
        let mut answer_confidence = BTreeMap::new();
        for (number, quads) in &regions.questions {
            let c = bubbles::read_group(image, quads, dark_level, &self.config.classifier);
            answers.insert(*number, c.answer);
            answer_confidence.insert(*number, c.confidence);
        }

        let id = &layout.student_id;
        let field = FieldImage {
            image: extract_field(
                image,
                &regions.student_id,
                (id.rect.w * FIELD_PX_PER_MM).round().max(1.0) as u32,
                (id.rect.h * FIELD_PX_PER_MM).round().max(1.0) as u32,
            ),
            cells: id.cells,
        };
        let recognition = recognizer.recognize(&field)?;

        let mut raw = RawResult {
            scan: scan.to_string(),
            status: ScanStatus::Ok,
            student_id: recognition.text,
            id_confidence: recognition.confidence,
            id_char_confidence: recognition.per_char,
            model: Some(model),
            answers,
            answer_confidence,
            flags: Vec::new(),
        };
        if inferred {
            raw.add_flag(ReadFlag::ModelInferred);
        }
        if raw.id_confidence < self.config.low_id_confidence {
            raw.add_flag(ReadFlag::LowIdConfidence);
        }
        tracing::debug!(
            "{}: model {}, id '{}' ({:.2}), residual {:.2}mm",
            scan,
            raw.model.as_deref().unwrap_or("?"),
            raw.student_id,
            raw.id_confidence,
            transform.residual_mm
        );
        Ok(raw)
    }
}
