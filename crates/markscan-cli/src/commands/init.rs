//! The `markscan init` command.

use std::path::Path;

use anyhow::Result;

use markscan_core::model::{ExamModel, KeyEntry, Layout, SheetSpec, SolutionKey};
use markscan_core::parser::{layout_file_name, write_exam_model};
use markscan_recognizers::config::sample_config;

const SAMPLE_MODELS: [&str; 4] = ["1", "2", "3", "4"];
const SAMPLE_QUESTIONS: usize = 10;
const SAMPLE_OPTIONS: usize = 4;

pub fn execute() -> Result<()> {
    // Create markscan.toml
    if Path::new("markscan.toml").exists() {
        println!("markscan.toml already exists, skipping.");
    } else {
        std::fs::write("markscan.toml", sample_config())?;
        println!("Created markscan.toml");
    }

    // Create the sample exam
    let exam_dir = Path::new("exam");
    if exam_dir.join(layout_file_name(SAMPLE_MODELS[0])).exists() {
        println!("exam/ already contains an exam, skipping.");
    } else {
        for model in sample_exam()? {
            write_exam_model(exam_dir, &model)?;
        }
        println!(
            "Created exam/ ({} models, {SAMPLE_QUESTIONS} questions)",
            SAMPLE_MODELS.len()
        );
    }

    println!("\nNext steps:");
    println!("  1. Run: markscan validate --exam-dir exam");
    println!(
        "  2. Run: markscan render --exam-dir exam --model 1 --answers A,B,C,D,A,B,C,D,A,B --student-id 12345678 --output scans/sample.png"
    );
    println!("  3. Run: markscan correct --input scans --exam-dir exam --format all");

    Ok(())
}

/// Four shuffled models drawn from one ten-question pool.
///
/// Model `k` asks pool question `((n - 1 + 3k) mod 10) + 1` as question `n`,
/// with the options rotated by `k`. Model 1 is the pool in order, keyed
/// `A,B,C,D,A,B,C,D,A,B`.
fn sample_exam() -> Result<Vec<ExamModel>> {
    let spec = SheetSpec::uniform(SAMPLE_QUESTIONS, SAMPLE_OPTIONS, &SAMPLE_MODELS);
    SAMPLE_MODELS
        .iter()
        .enumerate()
        .map(|(k, model)| {
            let layout = Layout::standard(model, &spec)?;
            let questions = (1..=SAMPLE_QUESTIONS)
                .map(|n| {
                    let pool = (n - 1 + 3 * k) % SAMPLE_QUESTIONS + 1;
                    KeyEntry {
                        number: n as u32,
                        original_id: Some(pool as u32),
                        correct: (pool - 1 + k) % SAMPLE_OPTIONS,
                        weight: 1.0,
                        options: Some(SAMPLE_OPTIONS),
                    }
                })
                .collect();
            Ok(ExamModel {
                layout,
                key: SolutionKey {
                    model: model.to_string(),
                    questions,
                },
            })
        })
        .collect()
}
