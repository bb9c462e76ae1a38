//! The `markscan render` command.

use std::path::PathBuf;

use anyhow::{Context, Result};

use markscan_core::parser::load_exam_directory;
use markscan_vision::{distort, parse_answer_list, render_sheet, Distortion, SheetMarks};

/// What to draw and how to photograph it.
#[derive(Debug, Clone)]
pub struct RenderRequest {
    pub exam_dir: PathBuf,
    pub model: String,
    pub answers: String,
    pub student_id: String,
    pub blank_model: bool,
    pub output: PathBuf,
    pub rotate: f64,
    pub scale: f64,
    pub perspective: f64,
    pub ppm: f64,
}

pub fn execute(request: RenderRequest) -> Result<()> {
    anyhow::ensure!(request.ppm > 0.0, "ppm must be positive");
    anyhow::ensure!(request.scale > 0.0, "scale must be positive");

    let exam = load_exam_directory(&request.exam_dir)?;
    let layout = &exam
        .model(&request.model)
        .with_context(|| {
            format!(
                "unknown model '{}' (known: {})",
                request.model,
                exam.model_ids().join(", ")
            )
        })?
        .layout;

    let answers = parse_answer_list(&request.answers)?;
    if let Some(&last) = answers.keys().last() {
        anyhow::ensure!(
            layout.question(last).is_some(),
            "model {} has no question {last}",
            request.model
        );
    }
    let marks = SheetMarks {
        student_id: request.student_id.clone(),
        model: (!request.blank_model).then(|| request.model.clone()),
        answers,
    };
    let distortion = Distortion {
        rotation_deg: request.rotate,
        scale: request.scale,
        perspective: request.perspective,
        ..Default::default()
    };

    let image = distort(&render_sheet(layout, &marks, request.ppm), &distortion)?;
    if let Some(parent) = request.output.parent() {
        std::fs::create_dir_all(parent)?;
    }
    image
        .save(&request.output)
        .with_context(|| format!("failed to write {}", request.output.display()))?;
    println!(
        "Rendered model {} ({}x{} px) to {}",
        request.model,
        image.width(),
        image.height(),
        request.output.display()
    );
    Ok(())
}
