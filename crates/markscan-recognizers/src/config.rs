//! Configuration file loading and recognizer factory.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use markscan_core::config::{
    default_low_confidence, ClassifierConfig, GeometryConfig, MatchingConfig, ReaderConfig,
    ScoringConfig,
};
use markscan_core::engine::default_parallelism;
use markscan_core::roster::RosterConfig;
use markscan_core::traits::GlyphRecognizer;

use crate::mock::MockRecognizer;
use crate::onnx::OnnxRecognizer;
use crate::template::TemplateRecognizer;

/// Which glyph recognizer reads the student-ID box.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum RecognizerConfig {
    /// A trained character classifier exported to ONNX.
    Onnx {
        model_path: String,
        /// Class labels in the model's output order.
        #[serde(default = "default_onnx_labels")]
        labels: String,
        /// Side of the square input image, in pixels.
        #[serde(default = "default_input_size")]
        input_size: u32,
        #[serde(default = "default_low_confidence")]
        low_confidence: f64,
    },
    /// Template matching against a glyph font; the fallback without a
    /// trained model.
    Template {
        /// Template model file; the built-in font when unset.
        #[serde(default)]
        model_path: Option<String>,
        #[serde(default = "default_low_confidence")]
        low_confidence: f64,
    },
    Mock {
        text: String,
        #[serde(default = "default_mock_confidence")]
        confidence: f64,
        #[serde(default = "default_low_confidence")]
        low_confidence: f64,
    },
}

fn default_mock_confidence() -> f64 {
    1.0
}

fn default_onnx_labels() -> String {
    "0123456789".to_string()
}

fn default_input_size() -> u32 {
    28
}

impl Default for RecognizerConfig {
    fn default() -> Self {
        RecognizerConfig::Template {
            model_path: None,
            low_confidence: default_low_confidence(),
        }
    }
}

impl RecognizerConfig {
    /// ID confidence below which a scan gets the `low_id_confidence` flag.
    pub fn low_confidence(&self) -> f64 {
        match self {
            RecognizerConfig::Onnx { low_confidence, .. }
            | RecognizerConfig::Template { low_confidence, .. }
            | RecognizerConfig::Mock { low_confidence, .. } => *low_confidence,
        }
    }
}

/// Top-level markscan configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarkscanConfig {
    #[serde(default)]
    pub scoring: ScoringConfig,
    #[serde(default)]
    pub classifier: ClassifierConfig,
    #[serde(default)]
    pub geometry: GeometryConfig,
    #[serde(default)]
    pub matching: MatchingConfig,
    #[serde(default)]
    pub roster: RosterConfig,
    #[serde(default)]
    pub recognizer: RecognizerConfig,
    /// Max scans read concurrently.
    #[serde(default = "default_parallelism")]
    pub parallelism: usize,
    /// Output directory for results.
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("./markscan-results")
}

impl Default for MarkscanConfig {
    fn default() -> Self {
        Self {
            scoring: ScoringConfig::default(),
            classifier: ClassifierConfig::default(),
            geometry: GeometryConfig::default(),
            matching: MatchingConfig::default(),
            roster: RosterConfig::default(),
            recognizer: RecognizerConfig::default(),
            parallelism: default_parallelism(),
            output_dir: default_output_dir(),
        }
    }
}

impl MarkscanConfig {
    /// Settings handed to the sheet reader.
    pub fn reader_config(&self) -> ReaderConfig {
        ReaderConfig {
            geometry: self.geometry.clone(),
            classifier: self.classifier.clone(),
            low_id_confidence: self.recognizer.low_confidence(),
        }
    }
}

/// Resolve environment variable references like `${VAR_NAME}` in a string.
pub fn resolve_env_vars(s: &str) -> String {
    let mut result = s.to_string();
    while let Some(start) = result.find("${") {
        if let Some(end) = result[start..].find('}') {
            let var_name = &result[start + 2..start + end];
            let value = std::env::var(var_name).unwrap_or_default();
            result = format!(
                "{}{}{}",
                &result[..start],
                value,
                &result[start + end + 1..]
            );
        } else {
            break;
        }
    }
    result
}

/// Load configuration from well-known paths.
///
/// Search order:
/// 1. `markscan.toml` in the current directory
/// 2. `~/.config/markscan/config.toml`
pub fn load_config() -> Result<MarkscanConfig> {
    load_config_from(None)
}

/// Load config from an explicit path, or search the default locations.
pub fn load_config_from(path: Option<&Path>) -> Result<MarkscanConfig> {
    let config_path = if let Some(p) = path {
        if p.exists() {
            Some(p.to_path_buf())
        } else {
            anyhow::bail!("config file not found: {}", p.display());
        }
    } else {
        let local = PathBuf::from("markscan.toml");
        if local.exists() {
            Some(local)
        } else {
            dirs_path()
                .map(|home| home.join("config.toml"))
                .filter(|global| global.exists())
        }
    };

    let mut config = match config_path {
        Some(path) => {
            tracing::debug!("loading config from {}", path.display());
            parse_config(&path)?
        }
        None => MarkscanConfig::default(),
    };

    config.output_dir = PathBuf::from(resolve_env_vars(&config.output_dir.to_string_lossy()));
    match &mut config.recognizer {
        RecognizerConfig::Onnx { model_path, .. }
        | RecognizerConfig::Template {
            model_path: Some(model_path),
            ..
        } => *model_path = resolve_env_vars(model_path),
        _ => {}
    }
    config.scoring = config.scoring.normalized();

    Ok(config)
}

fn parse_config(path: &Path) -> Result<MarkscanConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config: {}", path.display()))?;
    toml::from_str::<MarkscanConfig>(&content)
        .with_context(|| format!("failed to parse config: {}", path.display()))
}

fn dirs_path() -> Option<PathBuf> {
    std::env::var("HOME")
        .ok()
        .map(|h| PathBuf::from(h).join(".config").join("markscan"))
}

/// Create a recognizer instance from its configuration.
///
/// Models are loaded here, once; callers share the result across workers.
pub fn create_recognizer(config: &RecognizerConfig) -> Result<Box<dyn GlyphRecognizer>> {
    match config {
        RecognizerConfig::Onnx {
            model_path,
            labels,
            input_size,
            ..
        } => {
            let recognizer = OnnxRecognizer::from_file(Path::new(model_path), labels, *input_size)
                .with_context(|| format!("failed to load recognizer model {model_path}"))?;
            Ok(Box::new(recognizer))
        }
        RecognizerConfig::Template {
            model_path: Some(path),
            ..
        } => {
            let recognizer = TemplateRecognizer::from_file(Path::new(path))
                .with_context(|| format!("failed to load recognizer model {path}"))?;
            Ok(Box::new(recognizer))
        }
        RecognizerConfig::Template {
            model_path: None, ..
        } => Ok(Box::new(TemplateRecognizer::builtin())),
        RecognizerConfig::Mock {
            text, confidence, ..
        } => Ok(Box::new(MockRecognizer::new(text, *confidence))),
    }
}

/// A commented starter configuration (written by `markscan init`).
pub fn sample_config() -> String {
    r#"# markscan configuration

output_dir = "./markscan-results"

[scoring]
# fraction of a question's weight subtracted for each wrong answer
penalty = 0.25
# original question ids voided for everybody
void = []
# voided only for students who benefit
void_nicely = []
scale = 10.0

[matching]
# 100 = exact IDs only
threshold = 100.0

[roster]
id_column = "id"
mark_column = "mark"
delimiter = "comma"
encoding = "utf-8"
decimal_separator = "."

[recognizer]
type = "template"
low_confidence = 0.6

# a trained digit classifier instead of the built-in templates:
# [recognizer]
# type = "onnx"
# model_path = "${HOME}/models/digits.onnx"
# labels = "0123456789"
# input_size = 28
"#
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_env_vars_basic() {
        std::env::set_var("_MARKSCAN_TEST_VAR", "hello");
        assert_eq!(resolve_env_vars("${_MARKSCAN_TEST_VAR}"), "hello");
        assert_eq!(
            resolve_env_vars("prefix_${_MARKSCAN_TEST_VAR}_suffix"),
            "prefix_hello_suffix"
        );
        assert_eq!(resolve_env_vars("no_${unterminated"), "no_${unterminated");
        std::env::remove_var("_MARKSCAN_TEST_VAR");
    }

    #[test]
    fn default_config() {
        let config = MarkscanConfig::default();
        assert_eq!(config.matching.threshold, 100.0);
        assert!(config.parallelism >= 1);
        assert_eq!(config.recognizer.low_confidence(), 0.6);
        assert_eq!(config.output_dir, PathBuf::from("./markscan-results"));
    }

    #[test]
    fn parse_full_config() {
        let toml_str = r#"
parallelism = 2

[scoring]
penalty = 0.33
void = [4]

[geometry]
max_residual_mm = 3.0

[roster]
id_column = "DNI"
delimiter = "semi"

[recognizer]
type = "mock"
text = "12345678"
low_confidence = 0.8
"#;
        let config: MarkscanConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.parallelism, 2);
        assert_eq!(config.scoring.penalty, 0.33);
        assert_eq!(config.geometry.max_residual_mm, 3.0);
        assert_eq!(config.geometry.min_markers, 4);
        assert_eq!(config.roster.id_column, "DNI");
        assert!(matches!(
            config.recognizer,
            RecognizerConfig::Mock { confidence, .. } if confidence == 1.0
        ));
        assert_eq!(config.reader_config().low_id_confidence, 0.8);
    }

    #[test]
    fn sample_config_parses() {
        let config: MarkscanConfig = toml::from_str(&sample_config()).unwrap();
        assert_eq!(config.scoring.penalty, 0.25);
        assert_eq!(config.recognizer, RecognizerConfig::default());
    }

    #[test]
    fn parse_onnx_recognizer() {
        let config: MarkscanConfig = toml::from_str(
            r#"
[recognizer]
type = "onnx"
model_path = "models/digits.onnx"
"#,
        )
        .unwrap();
        assert_eq!(
            config.recognizer,
            RecognizerConfig::Onnx {
                model_path: "models/digits.onnx".into(),
                labels: "0123456789".into(),
                input_size: 28,
                low_confidence: 0.6,
            }
        );
        assert!(toml::from_str::<MarkscanConfig>("[recognizer]\ntype = \"onnx\"\n").is_err());
    }

    #[test]
    fn load_expands_onnx_model_path() {
        std::env::set_var("_MARKSCAN_MODEL_DIR", "/opt/models");
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("markscan.toml");
        std::fs::write(
            &path,
            "[recognizer]\ntype = \"onnx\"\nmodel_path = \"${_MARKSCAN_MODEL_DIR}/ids.onnx\"\nlabels = \"0123456789X\"\n",
        )
        .unwrap();
        let config = load_config_from(Some(&path)).unwrap();
        std::env::remove_var("_MARKSCAN_MODEL_DIR");
        match config.recognizer {
            RecognizerConfig::Onnx {
                model_path, labels, ..
            } => {
                assert_eq!(model_path, "/opt/models/ids.onnx");
                assert_eq!(labels, "0123456789X");
            }
            other => panic!("unexpected recognizer {other:?}"),
        }
    }

    #[test]
    fn explicit_path_must_exist() {
        let err = load_config_from(Some(Path::new("/nonexistent/markscan.toml"))).unwrap_err();
        assert!(err.to_string().contains("config file not found"));
    }

    #[test]
    fn load_normalizes_penalty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("markscan.toml");
        std::fs::write(&path, "[scoring]\npenalty = -0.5\n").unwrap();
        let config = load_config_from(Some(&path)).unwrap();
        assert_eq!(config.scoring.penalty, 0.5);
    }

    #[test]
    fn factory_builds_recognizers() {
        let template = create_recognizer(&RecognizerConfig::default()).unwrap();
        assert_eq!(template.name(), "builtin-5x7");
        let mock = create_recognizer(&RecognizerConfig::Mock {
            text: "1".into(),
            confidence: 1.0,
            low_confidence: 0.6,
        })
        .unwrap();
        assert_eq!(mock.name(), "mock");
        assert!(create_recognizer(&RecognizerConfig::Template {
            model_path: Some("/nonexistent/model.json".into()),
            low_confidence: 0.6,
        })
        .is_err());
        let err = create_recognizer(&RecognizerConfig::Onnx {
            model_path: "/nonexistent/digits.onnx".into(),
            labels: "0123456789".into(),
            input_size: 28,
            low_confidence: 0.6,
        })
        .err()
        .unwrap();
        assert!(err.to_string().contains("/nonexistent/digits.onnx"));
    }
}
