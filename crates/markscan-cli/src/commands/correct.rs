//! The `markscan correct` command.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;

use markscan_core::engine::{collect_scans, CorrectionEngine, EngineConfig, ProgressReporter};
use markscan_core::parser::load_exam_directory;
use markscan_core::results::RawResult;
use markscan_core::traits::GlyphRecognizer;
use markscan_recognizers::create_recognizer;
use markscan_report::parse_formats;
use markscan_vision::OmrReader;

use super::{finish, load_settings, RosterArgs, ScoringArgs};

/// Console progress reporter.
struct ConsoleReporter;

impl ProgressReporter for ConsoleReporter {
    fn on_scan_start(&self, _scan: &str) {}

    fn on_scan_complete(&self, result: &RawResult) {
        let flags = if result.flags.is_empty() {
            String::new()
        } else {
            let names: Vec<String> = result.flags.iter().map(ToString::to_string).collect();
            format!(" [{}]", names.join(", "))
        };
        eprintln!(
            "  Read: {} model {} id '{}' ({:.2}){}",
            result.scan,
            result.model.as_deref().unwrap_or("?"),
            result.student_id,
            result.id_confidence,
            flags
        );
    }

    fn on_scan_error(&self, scan: &str, error: &str) {
        eprintln!("  UNREADABLE: {scan}: {error}");
    }

    fn on_batch_complete(&self, total: usize, readable: usize, unreadable: usize, elapsed: Duration) {
        eprintln!(
            "\nRead {readable}/{total} scan(s), {unreadable} unreadable ({:.1}s)",
            elapsed.as_secs_f64()
        );
    }
}

#[allow(clippy::too_many_arguments)]
pub async fn execute(
    input: PathBuf,
    exam_dir: PathBuf,
    output: Option<PathBuf>,
    parallelism: Option<usize>,
    format: String,
    config_path: Option<PathBuf>,
    scoring: ScoringArgs,
    roster: RosterArgs,
) -> Result<()> {
    anyhow::ensure!(
        parallelism.map_or(true, |p| p >= 1),
        "parallelism must be at least 1"
    );
    let formats = parse_formats(&format).map_err(anyhow::Error::msg)?;
    let config = load_settings(config_path.as_deref(), &scoring, &roster)?;

    let exam = Arc::new(load_exam_directory(&exam_dir)?);
    let scans = collect_scans(&input)?;
    anyhow::ensure!(!scans.is_empty(), "no scan images found in {}", input.display());

    let recognizer: Arc<dyn GlyphRecognizer> = Arc::from(create_recognizer(&config.recognizer)?);
    let reader = Arc::new(OmrReader::new(config.reader_config()));
    let engine = CorrectionEngine::new(
        reader,
        recognizer,
        EngineConfig {
            parallelism: parallelism.unwrap_or(config.parallelism),
        },
    );

    eprintln!(
        "markscan v{}: correcting {} scan(s) against {} model(s)",
        env!("CARGO_PKG_VERSION"),
        scans.len(),
        exam.models.len()
    );
    eprintln!();

    let started = Instant::now();
    let raws = engine
        .read_scans(Arc::clone(&exam), &scans, &ConsoleReporter)
        .await?;

    let output = output.unwrap_or_else(|| config.output_dir.clone());
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
