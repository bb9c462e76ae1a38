//! The `markscan rescore` command.

use std::path::PathBuf;
use std::time::Instant;

use anyhow::Result;

use markscan_core::parser::load_exam_directory;
use markscan_core::table::read_results_table;
use markscan_report::parse_formats;

use super::{finish, load_settings, RosterArgs, ScoringArgs};

pub fn execute(
    results: PathBuf,
    exam_dir: PathBuf,
    output: Option<PathBuf>,
    format: String,
    config_path: Option<PathBuf>,
    scoring: ScoringArgs,
    roster: RosterArgs,
) -> Result<()> {
    let formats = parse_formats(&format).map_err(anyhow::Error::msg)?;
    let config = load_settings(config_path.as_deref(), &scoring, &roster)?;
    let exam = load_exam_directory(&exam_dir)?;

    let started = Instant::now();
    let raws = read_results_table(&results)?;
    eprintln!("Rescoring {} row(s) from {}", raws.len(), results.display());

    let output = output.unwrap_or_else(|| {
        results
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."))
    });
    finish(
        raws,
        &exam,
        &config,
        roster.roster.as_deref(),
        &output,
        &formats,
        started,
    )?;
    Ok(())
}
