pub mod compare;
pub mod correct;
pub mod init;
pub mod render;
pub mod rescore;
pub mod validate;

use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::Result;
use clap::Args;

use markscan_core::config::ScoringConfig;
use markscan_core::engine::grade;
use markscan_core::model::ExamBundle;
use markscan_core::report::CorrectionReport;
use markscan_core::results::{RawResult, ScanStatus};
use markscan_core::roster::{apply_matches, MatchSummary, Roster, RosterConfig};
use markscan_core::statistics::MarkStats;
use markscan_recognizers::config::load_config_from;
use markscan_recognizers::MarkscanConfig;
use markscan_report::Exporter;

/// Scoring overrides shared by `correct` and `rescore`.
#[derive(Args, Debug, Clone, Default)]
pub struct ScoringArgs {
    /// Fraction of a question's weight subtracted per wrong answer (a negative value is made positive)
    #[arg(long, allow_negative_numbers = true)]
    pub penalty: Option<f64>,

    /// Original question ids voided for everybody (comma-separated)
    #[arg(long, value_delimiter = ',')]
    pub void_questions: Vec<u32>,

    /// Original question ids voided only for students who benefit (comma-separated)
    #[arg(long, value_delimiter = ',')]
    pub void_questions_nicely: Vec<u32>,
}

impl ScoringArgs {
    pub fn apply(&self, scoring: &mut ScoringConfig) {
        if let Some(penalty) = self.penalty {
            scoring.penalty = penalty;
        }
        scoring.void.extend(self.void_questions.iter().copied());
        scoring.void_nicely.extend(self.void_questions_nicely.iter().copied());
    }
}

/// Roster options shared by `correct` and `rescore`.
#[derive(Args, Debug, Clone, Default)]
pub struct RosterArgs {
    /// Roster file whose mark column is filled in
    #[arg(long)]
    pub roster: Option<PathBuf>,

    /// Roster column with the student ID
    #[arg(long)]
    pub id_column: Option<String>,

    /// Roster column with the student name
    #[arg(long)]
    pub name_column: Option<String>,

    /// Roster column that receives the mark
    #[arg(long)]
    pub mark_column: Option<String>,

    /// Roster delimiter: comma, semi, tab, pipe or one character
    #[arg(long)]
    pub input_sep: Option<String>,

    /// Roster encoding: utf-8 or latin-1
    #[arg(long)]
    pub input_encoding: Option<String>,

    /// Decimal separator for marks written to CSV files
    #[arg(long)]
    pub output_decimal_sep: Option<String>,

    /// Write only the ID, name and mark columns of the roster
    #[arg(long)]
    pub simplify_csv: bool,

    /// Minimum ID similarity (0-100) for a fuzzy roster match; 100 is exact only
    #[arg(long)]
    pub fuzzy_id_match: Option<f64>,
}

impl RosterArgs {
    pub fn apply(&self, config: &mut MarkscanConfig) -> Result<()> {
        let roster: &mut RosterConfig = &mut config.roster;
        if let Some(v) = &self.id_column {
            roster.id_column = v.clone();
        }
        if let Some(v) = &self.name_column {
            roster.name_column = Some(v.clone());
        }
        if let Some(v) = &self.mark_column {
            roster.mark_column = v.clone();
        }
        if let Some(v) = &self.input_sep {
            roster.delimiter = v.clone();
        }
        if let Some(v) = &self.input_encoding {
            roster.encoding = v.clone();
        }
        if let Some(v) = &self.output_decimal_sep {
            roster.decimal_separator = v.clone();
        }
        if self.simplify_csv {
            roster.simplify = true;
        }
        if let Some(threshold) = self.fuzzy_id_match {
            anyhow::ensure!(
                (0.0..=100.0).contains(&threshold),
                "--fuzzy-id-match must be between 0 and 100"
            );
            config.matching.threshold = threshold;
        }
        Ok(())
    }
}

/// Load the config file and fold the command-line overrides into it.
pub fn load_settings(
    config_path: Option<&Path>,
    scoring: &ScoringArgs,
    roster: &RosterArgs,
) -> Result<MarkscanConfig> {
    let mut config = load_config_from(config_path)?;
    scoring.apply(&mut config.scoring);
    config.scoring = config.scoring.normalized();
    roster.apply(&mut config)?;
    tracing::debug!(
        "scoring: penalty {}, void {:?}, void nicely {:?}, fuzzy threshold {}",
        config.scoring.penalty,
        config.scoring.void,
        config.scoring.void_nicely,
        config.matching.threshold
    );
    Ok(config)
}

/// Score, match against the roster, write every output and print a summary.
pub fn finish(
    raws: Vec<RawResult>,
    exam: &ExamBundle,
    config: &MarkscanConfig,
    roster_path: Option<&Path>,
    output: &Path,
    formats: &[Exporter],
    started: Instant,
) -> Result<CorrectionReport> {
    let mut rows = grade(raws, exam, &config.scoring)?;

    let roster = match roster_path {
        Some(path) => {
            let roster = Roster::load(path, &config.roster)?;
            tracing::info!("roster {}: {} student(s)", path.display(), roster.len());
            Some(roster)
        }
        None => None,
    };
    let summary = roster
        .as_ref()
        .map(|r| apply_matches(&mut rows, r, config.matching.threshold));

    let report = CorrectionReport::new(
        rows,
        exam,
        &config.scoring,
        started.elapsed().as_millis() as u64,
    );

    std::fs::create_dir_all(output)?;
    for exporter in formats {
        let path = exporter.export(&report, output, &config.roster.decimal_separator)?;
        eprintln!("Wrote {}", path.display());
    }
    if let Some(roster) = &roster {
        let path = roster.write_with_marks(&report.rows, &config.roster, output)?;
        eprintln!("Roster with marks: {}", path.display());
    }

    print_summary(&report, summary.as_ref());
    Ok(report)
}

fn print_summary(report: &CorrectionReport, matches: Option<&MatchSummary>) {
    use comfy_table::{Cell, Table};

    let mut table = Table::new();
    table.set_header(vec!["Scans", "Unreadable", "Scored", "Mean", "Median", "Min", "Max", "Passed"]);
    let stats = report.stats.as_ref();
    let stat = |f: fn(&MarkStats) -> f64| {
        stats
            .map(|s| format!("{:.2}", f(s)))
            .unwrap_or_else(|| "-".to_string())
    };
    table.add_row(vec![
        Cell::new(report.rows.len()),
        Cell::new(report.unreadable()),
        Cell::new(stats.map_or(0, |s| s.count)),
        Cell::new(stat(|s| s.mean)),
        Cell::new(stat(|s| s.median)),
        Cell::new(stat(|s| s.min)),
        Cell::new(stat(|s| s.max)),
        Cell::new(stats.map_or(0, |s| s.passed)),
    ]);
    println!("{table}");

    if let Some(m) = matches {
        println!(
            "Roster: {} matched, {} unmatched scan(s), {} student(s) without a scan",
            m.matched, m.unmatched_scans, m.unmatched_roster
        );
    }

    let problems: Vec<_> = report
        .rows
        .iter()
        .filter(|r| {
            !r.raw.is_readable()
                || !r.raw.flags.is_empty()
                || (r.matched.is_some() && !r.is_matched())
        })
        .collect();
    if !problems.is_empty() {
        let mut table = Table::new();
        table.set_header(vec!["Scan", "Student", "Issue"]);
        for r in problems {
            let issue = match &r.raw.status {
                ScanStatus::Unreadable { reason } => reason.clone(),
                ScanStatus::Ok => {
                    let mut issues: Vec<String> =
                        r.raw.flags.iter().map(ToString::to_string).collect();
                    if let Some(m) = r.matched.as_ref().filter(|m| !m.status.is_matched()) {
                        issues.push(format!("roster: {}", m.status));
                    }
                    issues.join(", ")
                }
            };
            table.add_row(vec![
                Cell::new(&r.raw.scan),
                Cell::new(r.student_id()),
                Cell::new(issue),
            ]);
        }
        println!("\nNeeds review:\n{table}");
    }
}
