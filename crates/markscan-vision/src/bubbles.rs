//! Bubble classifier.
//!
//! A bubble's fill score is the dark fraction of an inner ellipse (clear of the
//! printed outline) minus the dark fraction of a ring around it, so shading and
//! uneven lighting cancel out. A group of bubbles resolves to one option, blank,
//! or ambiguous; ambiguity is never guessed away.

use image::GrayImage;

use markscan_core::config::ClassifierConfig;
use markscan_core::results::Answer;

use crate::locate::{sample, Quad};

/// Samples per side of the square sampling grid.
const GRID: usize = 25;

/// Dark fraction of the inner ellipse and of the background ring.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BubbleSample {
    pub inner: f64,
    pub ring: f64,
}

impl BubbleSample {
    pub fn fill(&self) -> f64 {
        (self.inner - self.ring).max(0.0)
    }
}

/// Measure one bubble. `dark_level` is the gray value at or below which a
/// pixel counts as ink.
pub fn measure(image: &GrayImage, quad: &Quad, dark_level: u8, config: &ClassifierConfig) -> BubbleSample {
    let outer = config.ring_outer.max(config.inner_radius);
    let (mut inner_n, mut inner_dark) = (0usize, 0usize);
    let (mut ring_n, mut ring_dark) = (0usize, 0usize);

    for j in 0..GRID {
        for i in 0..GRID {
            // normalized radius: 1.0 is the printed bubble edge
            let du = ((i as f64 + 0.5) / GRID as f64 - 0.5) * outer;
            let dv = ((j as f64 + 0.5) / GRID as f64 - 0.5) * outer;
            let r = 2.0 * (du * du + dv * dv).sqrt();
            let in_inner = r <= config.inner_radius;
            let in_ring = r >= config.ring_inner && r <= config.ring_outer;
            if !in_inner && !in_ring {
                continue;
            }
            let dark = sample(image, quad.point(0.5 + du, 0.5 + dv)) <= dark_level as f64;
            if in_inner {
                inner_n += 1;
                inner_dark += dark as usize;
            } else {
                ring_n += 1;
                ring_dark += dark as usize;
            }
        }
    }

    let ratio = |dark: usize, n: usize| if n == 0 { 0.0 } else { dark as f64 / n as f64 };
    BubbleSample {
        inner: ratio(inner_dark, inner_n),
        ring: ratio(ring_dark, ring_n),
    }
}

/// Fill score of one bubble, in `[0, 1]`.
pub fn fill_score(image: &GrayImage, quad: &Quad, dark_level: u8, config: &ClassifierConfig) -> f64 {
    measure(image, quad, dark_level, config).fill()
}

/// Outcome for one group of bubbles.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Classification {
    pub answer: Answer,
    pub confidence: f64,
}

/// Resolve a group's fill scores.
///
/// - fullest below `fill_threshold` → blank
/// - fullest ahead of the runner-up by `min_margin` → that option
/// - otherwise → ambiguous
pub fn classify_group(scores: &[f64], config: &ClassifierConfig) -> Classification {
    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]).then(a.cmp(&b)));
    let Some(&best) = order.first() else {
        return Classification {
            answer: Answer::Blank,
            confidence: 1.0,
        };
    };
    let top = scores[best];
    let second = order.get(1).map_or(0.0, |&i| scores[i]);

    if top < config.fill_threshold {
        let confidence = if config.fill_threshold > 0.0 {
            1.0 - top / config.fill_threshold
        } else {
            1.0
        };
        return Classification {
            answer: Answer::Blank,
            confidence: confidence.clamp(0.0, 1.0),
        };
    }
    let margin = top - second;
    if margin >= config.min_margin {
        Classification {
            answer: Answer::Option(best),
            confidence: margin.clamp(0.0, 1.0),
        }
    } else {
        Classification {
            answer: Answer::Ambiguous,
            confidence: margin.clamp(0.0, 1.0),
        }
    }
}

/// Measure and classify a group of bubbles.
pub fn read_group(
    image: &GrayImage,
    bubbles: &[Quad],
    dark_level: u8,
    config: &ClassifierConfig,
) -> Classification {
    let scores: Vec<f64> = bubbles
        .iter()
        .map(|q| fill_score(image, q, dark_level, config))
        .collect();
    classify_group(&scores, config)
}
