//! Scan-processing error types.
//!
//! These are defined in `markscan-core` so the correction engine can classify
//! a failed scan (record it as unreadable, or abort the batch) without string
//! matching on messages produced by the vision or recognizer crates.

use thiserror::Error;

/// Failures of the geometry normalizer.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GeometryError {
    /// Not enough marker-like blobs (or inliers) to fix the page geometry.
    #[error("found {found} fiducial marker(s), need at least {required}")]
    TooFewMarkers { found: usize, required: usize },

    /// The inlier markers are collinear or the homography is singular.
    #[error("degenerate marker configuration")]
    Degenerate,

    /// Best transform reprojects the fiducials too poorly.
    #[error("reprojection residual {residual:.2}mm exceeds {max:.2}mm")]
    ResidualTooHigh { residual: f64, max: f64 },
}

/// Failures of the glyph recognizer.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RecognizerError {
    /// The field image has no usable content (zero-sized or zero cells).
    #[error("empty field image")]
    EmptyField,

    /// The recognition model cannot be used.
    #[error("invalid recognition model: {0}")]
    InvalidModel(String),

    /// The model runtime failed on this field.
    #[error("inference failed: {0}")]
    Inference(String),
}

/// Errors that can occur while reading one scan.
#[derive(Debug, Error)]
pub enum ScanError {
    /// The image file could not be opened or decoded.
    #[error("cannot decode image: {0}")]
    Decode(String),

    #[error("geometry: {0}")]
    Geometry(#[from] GeometryError),

    /// The model-ID row was blank or ambiguous on a multi-model exam.
    #[error("model id is unreadable")]
    UnreadableModel,

    /// The sheet names a model the exam directory does not contain.
    #[error("no layout for exam model '{model}'")]
    MissingLayout { model: String },

    #[error("recognition: {0}")]
    Recognition(#[from] RecognizerError),

    /// The blocking worker panicked or was cancelled.
    #[error("worker failed: {0}")]
    Worker(String),
}

impl ScanError {
    /// Returns `true` if the whole batch must stop.
    ///
    /// Everything else only makes the current scan unreadable.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ScanError::MissingLayout { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_missing_layout_is_fatal() {
        assert!(ScanError::MissingLayout { model: "9".into() }.is_fatal());
        assert!(!ScanError::UnreadableModel.is_fatal());
        assert!(!ScanError::Decode("bad".into()).is_fatal());
        assert!(!ScanError::from(GeometryError::Degenerate).is_fatal());
        assert!(!ScanError::from(RecognizerError::EmptyField).is_fatal());
    }

    #[test]
    fn messages_are_readable() {
        let e = ScanError::from(GeometryError::TooFewMarkers {
            found: 2,
            required: 4,
        });
        assert_eq!(
            e.to_string(),
            "geometry: found 2 fiducial marker(s), need at least 4"
        );
    }
}
