//! Mark statistics and per-question analysis.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::config::ScoringConfig;
use crate::model::ExamBundle;
use crate::results::{Answer, RawResult};

/// Summary of a set of marks (count, mean, spread and quartiles).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarkStats {
    pub count: usize,
    pub mean: f64,
    /// Sample standard deviation (0 for a single mark).
    pub std_dev: f64,
    pub min: f64,
    pub q25: f64,
    pub median: f64,
    pub q75: f64,
    pub max: f64,
    /// Marks at or above half the scale.
    pub passed: usize,
}

impl MarkStats {
    /// Returns `None` when there are no marks.
    pub fn compute(marks: &[f64], scale: f64) -> Option<MarkStats> {
        if marks.is_empty() {
            return None;
        }
        let mut sorted = marks.to_vec();
        sorted.sort_by(f64::total_cmp);
        let n = sorted.len();
        let mean = sorted.iter().sum::<f64>() / n as f64;
        let std_dev = if n > 1 {
            let var = sorted.iter().map(|m| (m - mean).powi(2)).sum::<f64>() / (n - 1) as f64;
            var.sqrt()
        } else {
            0.0
        };
        Some(MarkStats {
            count: n,
            mean,
            std_dev,
            min: sorted[0],
            q25: quantile(&sorted, 0.25),
            median: quantile(&sorted, 0.5),
            q75: quantile(&sorted, 0.75),
            max: sorted[n - 1],
            passed: sorted.iter().filter(|&&m| m >= scale / 2.0).count(),
        })
    }
}

/// Linear-interpolation quantile of sorted data.
pub fn quantile(sorted: &[f64], q: f64) -> f64 {
    match sorted.len() {
        0 => 0.0,
        1 => sorted[0],
        n => {
            let pos = q.clamp(0.0, 1.0) * (n - 1) as f64;
            let lo = pos.floor() as usize;
            let hi = pos.ceil() as usize;
            sorted[lo] + (sorted[hi] - sorted[lo]) * (pos - lo as f64)
        }
    }
}

/// Count of rounded marks per integer bin `0..=scale`.
pub fn histogram(marks: &[f64], scale: f64) -> Vec<usize> {
    let top = scale.max(0.0).round() as usize;
    let mut bins = vec![0usize; top + 1];
    for m in marks {
        let bin = m.round().clamp(0.0, top as f64) as usize;
        bins[bin] += 1;
    }
    bins
}

/// How one question went across all readable sheets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionStats {
    /// Original question id (shared by every model).
    pub question_id: u32,
    pub correct: usize,
    pub wrong: usize,
    pub blank: usize,
    pub ambiguous: usize,
    /// Correct answers over sheets that had this question.
    pub correct_rate: f64,
    /// Plainly voided or nice-voided question.
    #[serde(default)]
    pub voided: bool,
}

/// Per-question answer breakdown, keyed by original id.
///
/// Rows that are unreadable or whose model is not in the exam are ignored.
pub fn question_stats<'a>(
    raws: impl IntoIterator<Item = &'a RawResult>,
    exam: &ExamBundle,
    scoring: &ScoringConfig,
) -> Vec<QuestionStats> {
    let mut stats: BTreeMap<u32, QuestionStats> = BTreeMap::new();
    for raw in raws {
        if !raw.is_readable() {
            continue;
        }
        let Some(model) = raw.model.as_deref().and_then(|m| exam.model(m)) else {
            continue;
        };
        for entry in &model.key.questions {
            let id = entry.question_id();
            let s = stats.entry(id).or_insert_with(|| QuestionStats {
                question_id: id,
                correct: 0,
                wrong: 0,
                blank: 0,
                ambiguous: 0,
                correct_rate: 0.0,
                voided: scoring.void.contains(&id) || scoring.void_nicely.contains(&id),
            });
            match raw.answer(entry.number) {
                Answer::Option(i) if i == entry.correct => s.correct += 1,
                Answer::Option(_) => s.wrong += 1,
                Answer::Blank => s.blank += 1,
                Answer::Ambiguous => s.ambiguous += 1,
            }
        }
    }
    stats
        .into_values()
        .map(|mut s| {
            let total = s.correct + s.wrong + s.blank + s.ambiguous;
            if total > 0 {
                s.correct_rate = s.correct as f64 / total as f64;
            }
            s
        })
        .collect()
}
