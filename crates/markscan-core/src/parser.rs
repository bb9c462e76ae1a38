//! Exam directory loader.
//!
//! An exam directory holds one `exam_model_<id>_layout.json` and one
//! `exam_model_<id>_questions.json` per model. This module loads them into an
//! [`ExamBundle`] and checks that the bundle can be corrected safely.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::model::{parse_option_label, ExamBundle, ExamModel, KeyEntry, Layout, SolutionKey};

const PREFIX: &str = "exam_model_";
const LAYOUT_SUFFIX: &str = "_layout.json";
const KEY_SUFFIX: &str = "_questions.json";

/// File name of a model's layout.
pub fn layout_file_name(model: &str) -> String {
    format!("{PREFIX}{model}{LAYOUT_SUFFIX}")
}

/// File name of a model's solution key.
pub fn key_file_name(model: &str) -> String {
    format!("{PREFIX}{model}{KEY_SUFFIX}")
}

/// Intermediate JSON structure for solution key files.
#[derive(Debug, Deserialize)]
struct JsonKeyFile {
    #[serde(default)]
    model: Option<String>,
    questions: Vec<JsonKeyEntry>,
}

#[derive(Debug, Deserialize)]
struct JsonKeyEntry {
    #[serde(alias = "id")]
    number: u32,
    #[serde(default)]
    original_id: Option<u32>,
    correct: JsonCorrect,
    #[serde(default)]
    weight: Option<f64>,
    #[serde(default)]
    options: Option<usize>,
}

/// The correct answer as an option index (`0`) or letter (`"A"`).
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum JsonCorrect {
    Index(usize),
    Letter(String),
}

/// Parse a layout file.
pub fn parse_layout(path: &Path) -> Result<Layout> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read layout file: {}", path.display()))?;
    parse_layout_str(&content, path)
}

/// Parse layout JSON (useful for testing).
pub fn parse_layout_str(content: &str, source_path: &Path) -> Result<Layout> {
    serde_json::from_str(content)
        .with_context(|| format!("failed to parse layout: {}", source_path.display()))
}

/// Parse a solution key file.
pub fn parse_key(path: &Path, model: &str) -> Result<SolutionKey> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read key file: {}", path.display()))?;
    parse_key_str(&content, model, path)
}

/// Parse solution key JSON. `model` is used when the file does not name one.
pub fn parse_key_str(content: &str, model: &str, source_path: &Path) -> Result<SolutionKey> {
    let parsed: JsonKeyFile = serde_json::from_str(content)
        .with_context(|| format!("failed to parse key: {}", source_path.display()))?;

    let questions = parsed
        .questions
        .into_iter()
        .map(|q| {
            let correct = match q.correct {
                JsonCorrect::Index(i) => i,
                JsonCorrect::Letter(l) => parse_option_label(&l).with_context(|| {
                    format!(
                        "question {} in {}: invalid correct option '{l}'",
                        q.number,
                        source_path.display()
                    )
                })?,
            };
            Ok(KeyEntry {
                number: q.number,
                original_id: q.original_id,
                correct,
                weight: q.weight.unwrap_or(1.0),
                options: q.options,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(SolutionKey {
        model: parsed.model.unwrap_or_else(|| model.to_string()),
        questions,
    })
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum ExamFile {
    Layout,
    Key,
}

fn classify(file_name: &str) -> Option<(String, ExamFile)> {
    let rest = file_name.strip_prefix(PREFIX)?;
    if let Some(model) = rest.strip_suffix(LAYOUT_SUFFIX) {
        return (!model.is_empty()).then(|| (model.to_string(), ExamFile::Layout));
    }
    let model = rest.strip_suffix(KEY_SUFFIX)?;
    (!model.is_empty()).then(|| (model.to_string(), ExamFile::Key))
}

/// Load every model of an exam directory, without validating it.
pub fn read_exam_directory(dir: &Path) -> Result<ExamBundle> {
    if !dir.is_dir() {
        anyhow::bail!("not a directory: {}", dir.display());
    }

    let mut files: BTreeMap<String, (Option<PathBuf>, Option<PathBuf>)> = BTreeMap::new();
    for entry in std::fs::read_dir(dir)
        .with_context(|| format!("failed to read directory: {}", dir.display()))?
    {
        let path = entry?.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        match classify(name) {
            Some((model, ExamFile::Layout)) => files.entry(model).or_default().0 = Some(path),
            Some((model, ExamFile::Key)) => files.entry(model).or_default().1 = Some(path),
            None => {}
        }
    }

    if files.is_empty() {
        anyhow::bail!("no exam models found in {}", dir.display());
    }

    let mut bundle = ExamBundle::default();
    for (model, (layout_path, key_path)) in files {
        let layout_path = layout_path
            .with_context(|| format!("model '{model}' has a key but no {}", layout_file_name(&model)))?;
        let key_path = key_path
            .with_context(|| format!("model '{model}' has a layout but no {}", key_file_name(&model)))?;
        let layout = parse_layout(&layout_path)?;
        let key = parse_key(&key_path, &model)?;
        tracing::debug!(
            "loaded model {model}: {} questions, {} fiducials",
            key.questions.len(),
            layout.fiducials.len()
        );
        bundle.models.insert(model, ExamModel { layout, key });
    }
    Ok(bundle)
}

/// Load and validate an exam directory.
///
/// Warnings are logged; any error-level issue aborts.
pub fn load_exam_directory(dir: &Path) -> Result<ExamBundle> {
    let bundle = read_exam_directory(dir)?;
    let issues = validate_exam(&bundle);
    let mut errors = Vec::new();
    for issue in &issues {
        match issue.severity {
            Severity::Warning => tracing::warn!("{issue}"),
            Severity::Error => errors.push(issue.to_string()),
        }
    }
    if !errors.is_empty() {
        anyhow::bail!("invalid exam in {}:\n  {}", dir.display(), errors.join("\n  "));
    }
    Ok(bundle)
}

/// Write one model's layout and key into `dir`.
pub fn write_exam_model(dir: &Path, model: &ExamModel) -> Result<()> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("failed to create directory: {}", dir.display()))?;
    let layout_path = dir.join(layout_file_name(&model.layout.model));
    let json = serde_json::to_string_pretty(&model.layout).context("failed to serialize layout")?;
    std::fs::write(&layout_path, json)
        .with_context(|| format!("failed to write {}", layout_path.display()))?;
    let key_path = dir.join(key_file_name(&model.key.model));
    let json = serde_json::to_string_pretty(&model.key).context("failed to serialize key")?;
    std::fs::write(&key_path, json)
        .with_context(|| format!("failed to write {}", key_path.display()))?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Warning,
    Error,
}

/// A problem found in an exam bundle.
#[derive(Debug, Clone)]
pub struct ValidationIssue {
    pub severity: Severity,
    /// The model id (if applicable).
    pub model: Option<String>,
    pub message: String,
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level = match self.severity {
            Severity::Warning => "warning",
            Severity::Error => "error",
        };
        match &self.model {
            Some(m) => write!(f, "{level}: model {m}: {}", self.message),
            None => write!(f, "{level}: {}", self.message),
        }
    }
}

/// Check an exam bundle for problems that would make correction unreliable.
pub fn validate_exam(exam: &ExamBundle) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();
    let mut push = |severity, model: &str, message: String| {
        issues.push(ValidationIssue {
            severity,
            model: Some(model.to_string()),
            message,
        })
    };

    for (id, m) in &exam.models {
        let layout = &m.layout;
        let key = &m.key;

        if layout.model != *id {
            push(
                Severity::Error,
                id,
                format!("layout file names model '{}'", layout.model),
            );
        }
        if key.model != *id {
            push(Severity::Error, id, format!("key file names model '{}'", key.model));
        }
        if layout.fiducials.len() < 4 {
            push(
                Severity::Error,
                id,
                format!("only {} fiducial marker(s), need at least 4", layout.fiducials.len()),
            );
        } else if layout.anchor_indices().is_none() {
            push(
                Severity::Error,
                id,
                "fiducials do not cover the four page corners".into(),
            );
        }
        if !layout.model_field.labels.iter().any(|l| l == id) && exam.models.len() > 1 {
            push(
                Severity::Error,
                id,
                "model is missing from the model-ID row".into(),
            );
        }
        if layout.model_field.labels.len() != layout.model_field.bubbles.len() {
            push(
                Severity::Error,
                id,
                "model-ID row has a different number of labels and bubbles".into(),
            );
        }

        let mut numbers = HashSet::new();
        for q in &layout.questions {
            if !numbers.insert(q.number) {
                push(
                    Severity::Error,
                    id,
                    format!("duplicate question {} in layout", q.number),
                );
            }
        }
        let mut keyed = HashSet::new();
        for entry in &key.questions {
            if !keyed.insert(entry.number) {
                push(
                    Severity::Error,
                    id,
                    format!("duplicate question {} in key", entry.number),
                );
            }
            match layout.question(entry.number) {
                None => push(
                    Severity::Error,
                    id,
                    format!("key question {} is not on the sheet", entry.number),
                ),
                Some(slot) => {
                    if entry.correct >= slot.bubbles.len() {
                        push(
                            Severity::Error,
                            id,
                            format!(
                                "question {}: correct option {} out of range ({} options)",
                                entry.number,
                                entry.correct,
                                slot.bubbles.len()
                            ),
                        );
                    }
                    if let Some(n) = entry.options {
                        if n != slot.bubbles.len() {
                            push(
                                Severity::Warning,
                                id,
                                format!(
                                    "question {}: key has {n} options, sheet has {}",
                                    entry.number,
                                    slot.bubbles.len()
                                ),
                            );
                        }
                    }
                }
            }
            if entry.weight <= 0.0 {
                push(
                    Severity::Warning,
                    id,
                    format!("question {} has non-positive weight {}", entry.number, entry.weight),
                );
            }
        }
        for q in &layout.questions {
            if !keyed.contains(&q.number) {
                push(
                    Severity::Warning,
                    id,
                    format!("sheet question {} has no key entry and is not scored", q.number),
                );
            }
        }

        let bubbles: Vec<_> = layout
            .questions
            .iter()
            .flat_map(|q| q.bubbles.iter().map(move |b| (q.number, b)))
            .collect();
        'outer: for (i, (qa, a)) in bubbles.iter().enumerate() {
            for (qb, b) in &bubbles[i + 1..] {
                if a.intersects(b) {
                    push(
                        Severity::Warning,
                        id,
                        format!("bubbles of questions {qa} and {qb} overlap"),
                    );
                    break 'outer;
                }
            }
        }
    }

    if let Some(first) = exam.models.values().next() {
        for (id, m) in exam.models.iter().skip(1) {
            if m.layout.fiducials != first.layout.fiducials {
                push(
                    Severity::Error,
                    id,
                    format!(
                        "fiducials differ from model {}; all models must share them",
                        first.layout.model
                    ),
                );
            }
        }
    }

    issues
}
