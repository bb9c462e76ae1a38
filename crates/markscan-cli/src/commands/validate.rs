//! The `markscan validate` command.

use std::path::PathBuf;

use anyhow::Result;

use markscan_core::parser::{read_exam_directory, validate_exam, Severity};

pub fn execute(exam_dir: PathBuf) -> Result<()> {
    let exam = read_exam_directory(&exam_dir)?;
    println!(
        "Exam: {} model(s) ({}), {} questions",
        exam.models.len(),
        exam.model_ids().join(", "),
        exam.question_count()
    );

    let issues = validate_exam(&exam);
    let errors = issues
        .iter()
        .filter(|i| i.severity == Severity::Error)
        .count();
    for issue in &issues {
        println!("  {issue}");
    }

    if issues.is_empty() {
        println!("Exam valid.");
    } else {
        println!(
            "\n{} warning(s), {errors} error(s) found.",
            issues.len() - errors
        );
    }
    anyhow::ensure!(errors == 0, "exam in {} is invalid", exam_dir.display());

    Ok(())
}
