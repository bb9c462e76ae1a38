//! markscan-recognizers: handwritten glyph recognition.
//!
//! Implements the `GlyphRecognizer` trait with an ONNX character classifier,
//! a template matcher (built-in 5×7 font or a JSON model file) used when no
//! trained model is configured, and a fixed-output mock. Also loads the
//! `markscan.toml` configuration that selects between them.

mod cells;
pub mod config;
pub mod error;
pub mod glyphs;
pub mod mock;
pub mod onnx;
pub mod template;

pub use config::{
    create_recognizer, load_config, load_config_from, MarkscanConfig, RecognizerConfig,
};
pub use error::ModelError;
pub use mock::MockRecognizer;
pub use onnx::OnnxRecognizer;
pub use template::{TemplateModel, TemplateRecognizer};
