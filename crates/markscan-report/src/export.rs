//! Output formats of a correction run.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{Context, Result};

use markscan_core::report::CorrectionReport;
use markscan_core::roster::format_decimal;
use markscan_core::table::{write_results_table, RESULTS_FILE};

use crate::html::write_html_report;

pub const FINAL_MARKS_FILE: &str = "final_marks.csv";
pub const JSON_FILE: &str = "report.json";
pub const HTML_FILE: &str = "report.html";

/// One output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Exporter {
    /// `correction_results.csv`, the re-ingestible results table.
    ResultsCsv,
    /// `final_marks.csv`: one line per scored student.
    FinalMarks,
    Json,
    Html,
}

impl Exporter {
    pub const ALL: [Exporter; 4] = [
        Exporter::ResultsCsv,
        Exporter::FinalMarks,
        Exporter::Json,
        Exporter::Html,
    ];

    pub fn file_name(&self) -> &'static str {
        match self {
            Exporter::ResultsCsv => RESULTS_FILE,
            Exporter::FinalMarks => FINAL_MARKS_FILE,
            Exporter::Json => JSON_FILE,
            Exporter::Html => HTML_FILE,
        }
    }

    /// Write `report` into `out_dir`, returning the written path.
    pub fn export(&self, report: &CorrectionReport, out_dir: &Path, decimal: &str) -> Result<PathBuf> {
        let path = out_dir.join(self.file_name());
        match self {
            Exporter::ResultsCsv => {
                write_results_table(&path, &report.rows, report.exam.question_count)?
            }
            Exporter::FinalMarks => write_final_marks(report, &path, decimal)?,
            Exporter::Json => report.save_json(&path)?,
            Exporter::Html => write_html_report(report, &path)?,
        }
        tracing::debug!("wrote {}", path.display());
        Ok(path)
    }
}

impl fmt::Display for Exporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Exporter::ResultsCsv => write!(f, "csv"),
            Exporter::FinalMarks => write!(f, "marks"),
            Exporter::Json => write!(f, "json"),
            Exporter::Html => write!(f, "html"),
        }
    }
}

impl FromStr for Exporter {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "csv" | "results" => Ok(Exporter::ResultsCsv),
            "marks" | "final" => Ok(Exporter::FinalMarks),
            "json" => Ok(Exporter::Json),
            "html" => Ok(Exporter::Html),
            other => Err(format!(
                "unknown format '{other}' (expected csv, marks, json, html or all)"
            )),
        }
    }
}

/// Parse a comma-separated format list (`all` selects everything).
///
/// The results table and final marks are always included.
pub fn parse_formats(list: &str) -> Result<Vec<Exporter>, String> {
    let mut formats = vec![Exporter::ResultsCsv, Exporter::FinalMarks];
    for item in list.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        if item.eq_ignore_ascii_case("all") {
            formats.extend(Exporter::ALL);
        } else {
            formats.push(item.parse()?);
        }
    }
    formats.sort();
    formats.dedup();
    Ok(formats)
}

/// Write `final_marks.csv`: student id, name, score, max score and mark of
/// every scored row.
pub fn write_final_marks(report: &CorrectionReport, path: &Path, decimal: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let file = std::fs::File::create(path)
        .with_context(|| format!("failed to create {}", path.display()))?;
    write_final_marks_to(report, file, decimal)
        .with_context(|| format!("failed to write {}", path.display()))
}

pub fn write_final_marks_to<W: std::io::Write>(
    report: &CorrectionReport,
    writer: W,
    decimal: &str,
) -> Result<()> {
    let mut wtr = csv::Writer::from_writer(writer);
    wtr.write_record(["student_id", "student_name", "score", "max_score", "mark"])?;
    for row in &report.rows {
        let Some(mark) = &row.mark else {
            continue;
        };
        wtr.write_record([
            row.student_id(),
            row.student_name().unwrap_or(""),
            &format_decimal(mark.score, decimal),
            &format_decimal(mark.max_score, decimal),
            &format_decimal(mark.mark, decimal),
        ])?;
    }
    wtr.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::sample_report;

    #[test]
    fn parse_format_lists() {
        assert_eq!(
            parse_formats("").unwrap(),
            vec![Exporter::ResultsCsv, Exporter::FinalMarks]
        );
        assert_eq!(
            parse_formats("html, json").unwrap(),
            vec![Exporter::ResultsCsv, Exporter::FinalMarks, Exporter::Json, Exporter::Html]
        );
        assert_eq!(parse_formats("all").unwrap(), Exporter::ALL.to_vec());
        assert!(parse_formats("pdf").is_err());
    }

    #[test]
    fn final_marks_use_roster_identity_and_decimal() {
        let report = sample_report();
        let mut buf = Vec::new();
        write_final_marks_to(&report, &mut buf, ",").unwrap();
        let text = String::from_utf8(buf).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "student_id,student_name,score,max_score,mark");
        assert_eq!(lines[1], "A100,\"Doe, Jane\",\"5,50\",\"10,00\",\"5,50\"");
        // unreadable scan has no mark line
        assert_eq!(lines.len(), 3);
    }

    #[test]
    fn export_every_format() {
        let report = sample_report();
        let dir = tempfile::tempdir().unwrap();
        for exporter in Exporter::ALL {
            let path = exporter.export(&report, dir.path(), ".").unwrap();
            assert!(path.exists(), "{exporter} not written");
            assert_eq!(path.file_name().unwrap().to_str(), Some(exporter.file_name()));
        }
        let loaded = CorrectionReport::load_json(&dir.path().join(JSON_FILE)).unwrap();
        assert_eq!(loaded.rows.len(), report.rows.len());
    }
}
