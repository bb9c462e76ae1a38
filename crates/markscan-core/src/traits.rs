//! Core trait definitions for glyph recognizers and sheet readers.
//!
//! These traits are implemented by the `markscan-recognizers` and
//! `markscan-vision` crates respectively. Both are synchronous: every call is
//! CPU-bound work that the engine runs on the blocking pool.

use image::GrayImage;
use serde::{Deserialize, Serialize};

use crate::error::{RecognizerError, ScanError};
use crate::model::ExamBundle;
use crate::results::RawResult;

// ---------------------------------------------------------------------------
// Glyph recognizer trait
// ---------------------------------------------------------------------------

/// A rectified handwritten field, split into `cells` equal-width characters.
#[derive(Debug, Clone)]
pub struct FieldImage {
    /// Upright grayscale crop of the field (dark ink on light paper).
    pub image: GrayImage,
    /// Number of character cells across the field.
    pub cells: usize,
}

/// Text read from a field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recognition {
    /// Recognized characters; blank cells are skipped.
    pub text: String,
    /// Field confidence in `[0, 1]` (the weakest character).
    pub confidence: f64,
    /// Confidence of each character in `text`.
    #[serde(default)]
    pub per_char: Vec<f64>,
}

impl Recognition {
    pub fn empty() -> Self {
        Self {
            text: String::new(),
            confidence: 0.0,
            per_char: Vec::new(),
        }
    }
}

/// Reads handwritten characters. Deterministic for a fixed model.
pub trait GlyphRecognizer: Send + Sync {
    /// Human-readable recognizer name (e.g. "template").
    fn name(&self) -> &str;

    /// Read every non-blank cell of the field.
    fn recognize(&self, field: &FieldImage) -> Result<Recognition, RecognizerError>;
}

// ---------------------------------------------------------------------------
// Sheet reader trait
// ---------------------------------------------------------------------------

/// Turns one decoded page into a [`RawResult`].
pub trait SheetReader: Send + Sync {
    /// Read the header fields and every answer group of a scanned sheet.
    fn read_sheet(
        &self,
        scan: &str,
        image: &GrayImage,
        exam: &ExamBundle,
        recognizer: &dyn GlyphRecognizer,
    ) -> Result<RawResult, ScanError>;
}
