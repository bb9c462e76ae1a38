//! Recognizer model errors.

use std::path::PathBuf;

use thiserror::Error;

use markscan_core::error::RecognizerError;

/// Errors that can occur while loading a recognition model.
#[derive(Debug, Error)]
pub enum ModelError {
    /// The model file could not be read.
    #[error("cannot read model {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The model file is not valid JSON.
    #[error("cannot parse model {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// A glyph bitmap is malformed.
    #[error("invalid glyph '{glyph}': {reason}")]
    InvalidGlyph { glyph: char, reason: String },

    #[error("model has no glyphs")]
    Empty,

    /// The ONNX runtime rejected the model.
    #[error("cannot load ONNX model {path}: {reason}")]
    Runtime { path: PathBuf, reason: String },

    /// Classifier settings that cannot describe any model.
    #[error("invalid classifier settings: {0}")]
    Settings(String),
}

impl From<ModelError> for RecognizerError {
    fn from(e: ModelError) -> Self {
        RecognizerError::InvalidModel(e.to_string())
    }
}
