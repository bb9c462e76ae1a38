//! Correction report types with JSON persistence and run comparison.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::ScoringConfig;
use crate::matcher::MatchStatus;
use crate::model::ExamBundle;
use crate::results::{Mark, RawResult};
use crate::statistics::{histogram, question_stats, MarkStats, QuestionStats};

/// Roster row a scan was reconciled with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RosterMatch {
    pub status: MatchStatus,
    /// Roster ID, for accepted matches.
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    /// Similarity (0–100) of the recognized ID to the best roster ID.
    pub similarity: f64,
}

/// One line of the results table: what was read, what it scored, who it is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRow {
    pub raw: RawResult,
    #[serde(default)]
    pub mark: Option<Mark>,
    #[serde(default)]
    pub matched: Option<RosterMatch>,
}

impl ResultRow {
    pub fn new(raw: RawResult) -> Self {
        Self {
            raw,
            mark: None,
            matched: None,
        }
    }

    /// Best available student identifier: roster ID, then recognized ID.
    pub fn student_id(&self) -> &str {
        self.matched
            .as_ref()
            .and_then(|m| m.id.as_deref())
            .unwrap_or(&self.raw.student_id)
    }

    pub fn student_name(&self) -> Option<&str> {
        self.matched.as_ref().and_then(|m| m.name.as_deref())
    }

    /// Identity used to line up rows across runs (falls back to the scan name).
    pub fn key(&self) -> String {
        let id = self.student_id().trim();
        if id.is_empty() {
            self.raw.scan.clone()
        } else {
            id.to_uppercase()
        }
    }

    pub fn is_matched(&self) -> bool {
        self.matched.as_ref().is_some_and(|m| m.status.is_matched())
    }
}

/// Summary of the exam (without layouts and keys).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExamSummary {
    pub models: Vec<String>,
    pub question_count: usize,
}

impl ExamSummary {
    pub fn of(exam: &ExamBundle) -> Self {
        Self {
            models: exam.model_ids(),
            question_count: exam.question_count(),
        }
    }
}

/// A complete correction run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrectionReport {
    /// Unique report identifier.
    pub id: Uuid,
    /// When the report was created.
    pub created_at: DateTime<Utc>,
    pub exam: ExamSummary,
    /// Scoring policy the marks were computed with.
    pub scoring: ScoringConfig,
    /// One row per scan, ordered by scan name.
    pub rows: Vec<ResultRow>,
    /// Mark summary over scored rows.
    #[serde(default)]
    pub stats: Option<MarkStats>,
    /// Rounded-mark histogram, one bin per integer `0..=scale`.
    #[serde(default)]
    pub histogram: Vec<usize>,
    #[serde(default)]
    pub questions: Vec<QuestionStats>,
    /// Total wall-clock duration in milliseconds.
    pub duration_ms: u64,
}

impl CorrectionReport {
    /// Assemble a report and compute its statistics.
    pub fn new(
        rows: Vec<ResultRow>,
        exam: &ExamBundle,
        scoring: &ScoringConfig,
        duration_ms: u64,
    ) -> Self {
        let marks: Vec<f64> = rows.iter().filter_map(|r| r.mark.as_ref()).map(|m| m.mark).collect();
        Self {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            exam: ExamSummary::of(exam),
            scoring: scoring.clone(),
            stats: MarkStats::compute(&marks, scoring.scale),
            histogram: histogram(&marks, scoring.scale),
            questions: question_stats(rows.iter().map(|r| &r.raw), exam, scoring),
            rows,
            duration_ms,
        }
    }

    pub fn unreadable(&self) -> usize {
        self.rows.iter().filter(|r| !r.raw.is_readable()).count()
    }

    pub fn unmatched(&self) -> usize {
        self.rows
            .iter()
            .filter(|r| r.matched.is_some() && !r.is_matched())
            .count()
    }

    /// Save the report as JSON to a file.
    pub fn save_json(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self).context("failed to serialize report")?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, json)
            .with_context(|| format!("failed to write report to {}", path.display()))?;
        Ok(())
    }

    /// Load a report from a JSON file.
    pub fn load_json(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read report from {}", path.display()))?;
        let report: CorrectionReport =
            serde_json::from_str(&content).context("failed to parse report JSON")?;
        Ok(report)
    }

    /// Compare marks against a baseline run, student by student.
    pub fn compare(&self, baseline: &CorrectionReport, threshold: f64) -> MarkComparison {
        let mark_map = |report: &CorrectionReport| -> BTreeMap<String, f64> {
            report
                .rows
                .iter()
                .filter_map(|r| r.mark.as_ref().map(|m| (r.key(), m.mark)))
                .collect()
        };

        let baseline_marks = mark_map(baseline);
        let current_marks = mark_map(self);

        let mut changes = Vec::new();
        let mut unchanged = 0usize;
        let mut new_students = 0usize;

        for (student, &current) in &current_marks {
            match baseline_marks.get(student) {
                Some(&before) => {
                    let delta = current - before;
                    if delta.abs() > threshold {
                        changes.push(MarkChange {
                            student: student.clone(),
                            baseline_mark: before,
                            current_mark: current,
                            delta,
                        });
                    } else {
                        unchanged += 1;
                    }
                }
                None => new_students += 1,
            }
        }

        let removed_students = baseline_marks
            .keys()
            .filter(|k| !current_marks.contains_key(*k))
            .count();

        let mean = |report: &CorrectionReport| report.stats.as_ref().map(|s| s.mean);

        MarkComparison {
            changes,
            unchanged,
            new_students,
            removed_students,
            baseline_mean: mean(baseline),
            current_mean: mean(self),
        }
    }
}

/// Result of comparing two correction runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarkComparison {
    /// Students whose mark moved by more than the threshold.
    pub changes: Vec<MarkChange>,
    pub unchanged: usize,
    /// Students only in the current run.
    pub new_students: usize,
    /// Students only in the baseline.
    pub removed_students: usize,
    pub baseline_mean: Option<f64>,
    pub current_mean: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarkChange {
    pub student: String,
    pub baseline_mark: f64,
    pub current_mark: f64,
    pub delta: f64,
}

impl MarkComparison {
    /// Format the comparison as markdown.
    pub fn to_markdown(&self) -> String {
        let mut md = String::new();
        md.push_str(&format!(
            "**Summary:** {} changed, {} unchanged, {} new, {} removed\n\n",
            self.changes.len(),
            self.unchanged,
            self.new_students,
            self.removed_students
        ));
        if let (Some(before), Some(after)) = (self.baseline_mean, self.current_mean) {
            md.push_str(&format!(
                "**Mean mark:** {before:.2} → {after:.2} ({:+.2})\n\n",
                after - before
            ));
        }

        if !self.changes.is_empty() {
            md.push_str("### Changed marks\n\n");
            md.push_str("| Student | Baseline | Current | Delta |\n");
            md.push_str("|---------|----------|---------|-------|\n");
            for c in &self.changes {
                md.push_str(&format!(
                    "| {} | {:.2} | {:.2} | {:+.2} |\n",
                    c.student, c.baseline_mark, c.current_mark, c.delta
                ));
            }
        }

        md
    }

    /// Returns true if any mark moved beyond the threshold.
    pub fn has_changes(&self) -> bool {
        !self.changes.is_empty()
    }
}
