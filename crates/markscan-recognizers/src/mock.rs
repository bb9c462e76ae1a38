//! Mock recognizer for testing.

use std::sync::atomic::{AtomicU32, Ordering};

use markscan_core::error::RecognizerError;
use markscan_core::traits::{FieldImage, GlyphRecognizer, Recognition};

/// A recognizer that ignores the image and returns a fixed reading.
///
/// Lets the engine and the CLI be exercised without depending on what the
/// template matcher makes of a particular image.
pub struct MockRecognizer {
    text: String,
    confidence: f64,
    /// Number of fields read.
    call_count: AtomicU32,
}

impl MockRecognizer {
    pub fn new(text: &str, confidence: f64) -> Self {
        Self {
            text: text.to_string(),
            confidence: confidence.clamp(0.0, 1.0),
            call_count: AtomicU32::new(0),
        }
    }

    /// Get the number of fields read so far.
    pub fn call_count(&self) -> u32 {
        self.call_count.load(Ordering::Relaxed)
    }
}

impl GlyphRecognizer for MockRecognizer {
    fn name(&self) -> &str {
        "mock"
    }

    fn recognize(&self, field: &FieldImage) -> Result<Recognition, RecognizerError> {
        self.call_count.fetch_add(1, Ordering::Relaxed);
        if field.cells == 0 {
            return Err(RecognizerError::EmptyField);
        }
        let text: String = self.text.chars().take(field.cells).collect();
        Ok(Recognition {
            per_char: vec![self.confidence; text.chars().count()],
            text,
            confidence: self.confidence,
        })
    }
}
