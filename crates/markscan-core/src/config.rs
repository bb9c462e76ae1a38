//! Tunable parameters for reading, scoring and matching.
//!
//! Every calibration constant of the pipeline lives here so it can be set from
//! `markscan.toml` or the command line. Defaults are the values the standard
//! sheet was tuned with.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Scoring policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoringConfig {
    /// Fraction of a question's weight subtracted for a wrong answer.
    #[serde(default)]
    pub penalty: f64,
    /// Original question ids removed for everybody.
    #[serde(default)]
    pub void: BTreeSet<u32>,
    /// Original question ids removed per student only when that helps them.
    #[serde(default)]
    pub void_nicely: BTreeSet<u32>,
    /// Mark scale (raw / max × scale).
    #[serde(default = "default_scale")]
    pub scale: f64,
    /// Clip the mark to `[0, scale]`.
    #[serde(default = "default_true")]
    pub clip: bool,
}

fn default_scale() -> f64 {
    10.0
}
fn default_true() -> bool {
    true
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            penalty: 0.0,
            void: BTreeSet::new(),
            void_nicely: BTreeSet::new(),
            scale: default_scale(),
            clip: true,
        }
    }
}

impl ScoringConfig {
    /// Make the penalty non-negative, warning when it had to be flipped.
    pub fn normalized(mut self) -> Self {
        if self.penalty < 0.0 {
            tracing::warn!(
                "negative penalty {} given, using {}",
                self.penalty,
                self.penalty.abs()
            );
            self.penalty = self.penalty.abs();
        }
        self
    }
}

/// Bubble classifier calibration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifierConfig {
    /// Minimum fill score for a bubble to count as marked.
    #[serde(default = "default_fill_threshold")]
    pub fill_threshold: f64,
    /// Minimum gap between the two fullest bubbles of a group.
    #[serde(default = "default_min_margin")]
    pub min_margin: f64,
    /// Sampled inner ellipse, as a fraction of the bubble radius.
    #[serde(default = "default_inner_radius")]
    pub inner_radius: f64,
    /// Background ring inner edge, as a fraction of the bubble radius.
    #[serde(default = "default_ring_inner")]
    pub ring_inner: f64,
    /// Background ring outer edge, as a fraction of the bubble radius.
    #[serde(default = "default_ring_outer")]
    pub ring_outer: f64,
    /// Fixed gray level below which a pixel is ink. Otsu of the page if unset.
    #[serde(default)]
    pub dark_level: Option<u8>,
}

fn default_fill_threshold() -> f64 {
    0.35
}
fn default_min_margin() -> f64 {
    0.2
}
fn default_inner_radius() -> f64 {
    0.6
}
fn default_ring_inner() -> f64 {
    1.25
}
fn default_ring_outer() -> f64 {
    1.5
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            fill_threshold: default_fill_threshold(),
            min_margin: default_min_margin(),
            inner_radius: default_inner_radius(),
            ring_inner: default_ring_inner(),
            ring_outer: default_ring_outer(),
            dark_level: None,
        }
    }
}

/// Geometry normalizer calibration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeometryConfig {
    /// Minimum detected markers and inliers (never below 4, and one more
    /// than the four corners when the layout prints a fifth fiducial).
    #[serde(default = "default_min_markers")]
    pub min_markers: usize,
    /// Smallest accepted blob side, relative to the marker side a page
    /// hypothesis predicts at that spot.
    #[serde(default = "default_min_scale")]
    pub min_scale: f64,
    /// Largest accepted blob side, relative to the predicted marker side.
    #[serde(default = "default_max_scale")]
    pub max_scale: f64,
    /// Minimum blob area relative to a solid square of the same second moments.
    #[serde(default = "default_min_solidity")]
    pub min_solidity: f64,
    /// Maximum ratio of the blob's principal axes.
    #[serde(default = "default_max_elongation")]
    pub max_elongation: f64,
    /// Candidates kept for hypothesis search.
    #[serde(default = "default_max_candidates")]
    pub max_candidates: usize,
    /// Inlier radius, as a fraction of the marker side.
    #[serde(default = "default_match_tolerance")]
    pub match_tolerance: f64,
    /// Largest distance (mm) between a cross-check fiducial and where the
    /// four corner markers place it.
    #[serde(default = "default_max_residual_mm")]
    pub max_residual_mm: f64,
}

fn default_min_markers() -> usize {
    4
}
fn default_min_scale() -> f64 {
    0.6
}
fn default_max_scale() -> f64 {
    1.6
}
fn default_min_solidity() -> f64 {
    0.75
}
fn default_max_elongation() -> f64 {
    1.6
}
fn default_max_candidates() -> usize {
    12
}
fn default_match_tolerance() -> f64 {
    0.6
}
fn default_max_residual_mm() -> f64 {
    2.0
}

impl Default for GeometryConfig {
    fn default() -> Self {
        Self {
            min_markers: default_min_markers(),
            min_scale: default_min_scale(),
            max_scale: default_max_scale(),
            min_solidity: default_min_solidity(),
            max_elongation: default_max_elongation(),
            max_candidates: default_max_candidates(),
            match_tolerance: default_match_tolerance(),
            max_residual_mm: default_max_residual_mm(),
        }
    }
}

impl GeometryConfig {
    /// Inliers a page fit needs for a layout printing `fiducials` markers.
    pub fn required_markers(&self, fiducials: usize) -> usize {
        self.min_markers.max(4).max(fiducials.min(5))
    }
}

/// Everything a sheet reader needs besides the exam itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReaderConfig {
    #[serde(default)]
    pub geometry: GeometryConfig,
    #[serde(default)]
    pub classifier: ClassifierConfig,
    /// Student-ID confidence below which a scan is flagged.
    #[serde(default = "default_low_confidence")]
    pub low_id_confidence: f64,
}

pub fn default_low_confidence() -> f64 {
    0.6
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            geometry: GeometryConfig::default(),
            classifier: ClassifierConfig::default(),
            low_id_confidence: default_low_confidence(),
        }
    }
}

/// Student matcher settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchingConfig {
    /// Minimum similarity (0–100) for a fuzzy match; 100 means exact only.
    #[serde(default = "default_threshold")]
    pub threshold: f64,
}

fn default_threshold() -> f64 {
    100.0
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            threshold: default_threshold(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let s = ScoringConfig::default();
        assert_eq!(s.scale, 10.0);
        assert!(s.clip);
        assert_eq!(ClassifierConfig::default().fill_threshold, 0.35);
        assert_eq!(GeometryConfig::default().required_markers(4), 4);
        assert_eq!(GeometryConfig::default().required_markers(5), 5);
        assert_eq!(GeometryConfig::default().required_markers(9), 5);
        assert_eq!(MatchingConfig::default().threshold, 100.0);
    }

    #[test]
    fn min_markers_never_below_four() {
        let g = GeometryConfig {
            min_markers: 2,
            ..Default::default()
        };
        assert_eq!(g.required_markers(4), 4);
    }

    #[test]
    fn negative_penalty_is_flipped() {
        let s = ScoringConfig {
            penalty: -0.25,
            ..Default::default()
        }
        .normalized();
        assert_eq!(s.penalty, 0.25);
    }

    #[test]
    fn partial_toml_uses_defaults() {
        let s: ScoringConfig = toml::from_str("penalty = 0.5\nvoid = [3]").unwrap();
        assert_eq!(s.penalty, 0.5);
        assert!(s.void.contains(&3));
        assert_eq!(s.scale, 10.0);
        let c: ClassifierConfig = toml::from_str("min_margin = 0.1").unwrap();
        assert_eq!(c.min_margin, 0.1);
        assert_eq!(c.fill_threshold, 0.35);
    }
}
