//! The `markscan compare` command.

use std::path::PathBuf;

use anyhow::Result;

use markscan_core::report::CorrectionReport;

pub fn execute(
    baseline_path: PathBuf,
    current_path: PathBuf,
    threshold: f64,
    fail_on_change: bool,
    format: String,
) -> Result<()> {
    anyhow::ensure!(threshold >= 0.0, "threshold must not be negative");
    let baseline = CorrectionReport::load_json(&baseline_path)?;
    let current = CorrectionReport::load_json(&current_path)?;

    let comparison = current.compare(&baseline, threshold);

    match format.as_str() {
        "markdown" | "md" => {
            println!("{}", comparison.to_markdown());
        }
        "json" => {
            println!("{}", serde_json::to_string_pretty(&comparison)?);
        }
        _ => {
            println!(
                "Comparison: {} changed, {} unchanged, {} new, {} removed",
                comparison.changes.len(),
                comparison.unchanged,
                comparison.new_students,
                comparison.removed_students
            );
            if let (Some(before), Some(after)) = (comparison.baseline_mean, comparison.current_mean) {
                println!("Mean mark: {before:.2} -> {after:.2} ({:+.2})", after - before);
            }

            if !comparison.changes.is_empty() {
                println!("\nChanged marks:");
                for c in &comparison.changes {
                    println!(
                        "  {} {:.2} -> {:.2} ({:+.2})",
                        c.student, c.baseline_mark, c.current_mark, c.delta
                    );
                }
            }
        }
    }

    if fail_on_change && comparison.has_changes() {
        std::process::exit(1);
    }

    Ok(())
}
