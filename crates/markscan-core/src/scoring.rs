//! Mark computation.
//!
//! `score` is a pure function of a [`RawResult`], the model's [`SolutionKey`]
//! and a [`ScoringConfig`], so a persisted results table always rescores to the
//! same marks.

use std::cmp::Ordering;

use crate::config::ScoringConfig;
use crate::model::SolutionKey;
use crate::results::{Answer, Mark, RawResult};

/// Outcome of a single keyed question for one student.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Outcome {
    Correct,
    Wrong,
    Blank,
    Ambiguous,
}

#[derive(Debug, Clone, Copy)]
struct Item {
    id: u32,
    weight: f64,
    points: f64,
    outcome: Outcome,
}

impl Item {
    fn ratio(&self) -> f64 {
        if self.weight > 0.0 {
            self.points / self.weight
        } else {
            0.0
        }
    }
}

#[derive(Debug, Default)]
struct Tally {
    correct: usize,
    wrong: usize,
    blank: usize,
    ambiguous: usize,
    score: f64,
    max_score: f64,
}

impl Tally {
    fn add(&mut self, item: &Item) {
        match item.outcome {
            Outcome::Correct => self.correct += 1,
            Outcome::Wrong => self.wrong += 1,
            Outcome::Blank => self.blank += 1,
            Outcome::Ambiguous => self.ambiguous += 1,
        }
        self.score += item.points;
        self.max_score += item.weight;
    }

    fn ratio(&self) -> Option<f64> {
        (self.max_score > 0.0).then(|| self.score / self.max_score)
    }
}

/// Score one readable result against its key.
///
/// Returns `None` for unreadable rows.
pub fn score(raw: &RawResult, key: &SolutionKey, config: &ScoringConfig) -> Option<Mark> {
    if !raw.is_readable() {
        return None;
    }
    let penalty = config.penalty.abs();

    let mut tally = Tally::default();
    let mut optional = Vec::new();

    for entry in &key.questions {
        let id = entry.question_id();
        if config.void.contains(&id) {
            continue;
        }
        let (outcome, points) = match raw.answer(entry.number) {
            Answer::Option(i) if i == entry.correct => (Outcome::Correct, entry.weight),
            Answer::Option(_) => (Outcome::Wrong, -penalty * entry.weight),
            Answer::Blank => (Outcome::Blank, 0.0),
            Answer::Ambiguous => (Outcome::Ambiguous, 0.0),
        };
        let item = Item {
            id,
            weight: entry.weight,
            points,
            outcome,
        };
        if config.void_nicely.contains(&id) {
            optional.push(item);
        } else {
            tally.add(&item);
        }
    }

    // Keeping items in descending ratio order while each one does not pull the
    // running ratio down gives the best achievable ratio.
    optional.sort_by(|a, b| {
        b.ratio()
            .partial_cmp(&a.ratio())
            .unwrap_or(Ordering::Equal)
            .then(a.id.cmp(&b.id))
    });
    let mut nicely_voided = Vec::new();
    for item in &optional {
        let keep = match tally.ratio() {
            Some(current) => item.ratio() >= current - 1e-12,
            None => item.points >= 0.0,
        };
        if keep {
            tally.add(item);
        } else {
            nicely_voided.push(item.id);
        }
    }
    nicely_voided.sort_unstable();

    Some(Mark {
        correct: tally.correct,
        wrong: tally.wrong,
        blank: tally.blank,
        ambiguous: tally.ambiguous,
        score: tally.score,
        max_score: tally.max_score,
        mark: scale_mark(tally.score, tally.max_score, config),
        nicely_voided,
    })
}

/// `score / max × scale`, clipped when configured; 0 when nothing is scorable.
pub fn scale_mark(score: f64, max_score: f64, config: &ScoringConfig) -> f64 {
    if max_score <= 0.0 {
        return 0.0;
    }
    let mark = score / max_score * config.scale;
    if config.clip {
        mark.clamp(0.0, config.scale)
    } else {
        mark
    }
}
