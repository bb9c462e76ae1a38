//! Glyph-template recognizer.
//!
//! Each character cell is normalized (ink bounding box, fixed aspect ratio,
//! fixed sampling grid) and compared against every template with zero-mean
//! cosine similarity. The best similarity is the character confidence.

use std::collections::BTreeMap;
use std::path::Path;

use image::GrayImage;
use serde::{Deserialize, Serialize};

use markscan_core::error::RecognizerError;
use markscan_core::traits::{FieldImage, GlyphRecognizer, Recognition};

use crate::cells::{cell_rects, CellInk, CellRect};
use crate::error::ModelError;
use crate::glyphs::{self, ALPHABET};

/// Sampling grid width.
const GRID_W: usize = 10;
/// Sampling grid height.
const GRID_H: usize = 14;
/// Samples per grid cell side.
const SUB: usize = 4;
/// Pixels per font pixel when rasterizing templates.
const TEMPLATE_SCALE: u32 = 8;

/// On-disk template model: characters mapped to `0`/`1` row bitmaps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateModel {
    #[serde(default = "default_model_name")]
    pub name: String,
    pub glyphs: BTreeMap<char, Vec<String>>,
}

fn default_model_name() -> String {
    "custom".to_string()
}

impl TemplateModel {
    /// The built-in 5×7 alphanumeric model.
    pub fn builtin() -> Self {
        let glyphs = ALPHABET
            .chars()
            .filter_map(|c| glyphs::glyph_rows(c).map(|rows| (c, rows)))
            .collect();
        Self {
            name: "builtin-5x7".to_string(),
            glyphs,
        }
    }

    /// Load a model file (JSON).
    pub fn load(path: &Path) -> Result<Self, ModelError> {
        let content = std::fs::read_to_string(path).map_err(|source| ModelError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&content).map_err(|source| ModelError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    fn bitmap(&self, c: char, rows: &[String]) -> Result<Vec<Vec<bool>>, ModelError> {
        if rows.is_empty() {
            return Err(ModelError::InvalidGlyph {
                glyph: c,
                reason: "no rows".into(),
            });
        }
        let width = rows[0].chars().count();
        rows.iter()
            .map(|row| {
                if row.chars().count() != width {
                    return Err(ModelError::InvalidGlyph {
                        glyph: c,
                        reason: "rows have different widths".into(),
                    });
                }
                row.chars()
                    .map(|ch| match ch {
                        '1' | '#' => Ok(true),
                        '0' | '.' => Ok(false),
                        other => Err(ModelError::InvalidGlyph {
                            glyph: c,
                            reason: format!("unexpected character '{other}'"),
                        }),
                    })
                    .collect()
            })
            .collect()
    }
}

#[derive(Debug, Clone)]
struct Template {
    glyph: char,
    features: Vec<f64>,
}

/// Recognizes characters by template matching.
pub struct TemplateRecognizer {
    name: String,
    templates: Vec<Template>,
}

impl TemplateRecognizer {
    /// Recognizer for the built-in model.
    pub fn builtin() -> Self {
        // The built-in font is well-formed, so this cannot fail.
        Self::from_model(&TemplateModel::builtin()).unwrap_or_else(|_| Self {
            name: "builtin-5x7".into(),
            templates: Vec::new(),
        })
    }

    /// Recognizer for a model file.
    pub fn from_file(path: &Path) -> Result<Self, ModelError> {
        let model = TemplateModel::load(path)?;
        let recognizer = Self::from_model(&model)?;
        tracing::info!(
            "loaded template model '{}' ({} glyphs) from {}",
            recognizer.name,
            recognizer.templates.len(),
            path.display()
        );
        Ok(recognizer)
    }

    pub fn from_model(model: &TemplateModel) -> Result<Self, ModelError> {
        if model.glyphs.is_empty() {
            return Err(ModelError::Empty);
        }
        let mut templates = Vec::with_capacity(model.glyphs.len());
        for (&c, rows) in &model.glyphs {
            let bitmap = model.bitmap(c, rows)?;
            let image = glyphs::rasterize(&bitmap, TEMPLATE_SCALE);
            let (w, h) = image.dimensions();
            let features = cell_features(&image, (0.0, 0.0, w as f64, h as f64)).ok_or_else(|| {
                ModelError::InvalidGlyph {
                    glyph: c,
                    reason: "glyph has no ink".into(),
                }
            })?;
            templates.push(Template { glyph: c, features });
        }
        Ok(Self {
            name: model.name.clone(),
            templates,
        })
    }

    pub fn glyph_count(&self) -> usize {
        self.templates.len()
    }

    fn classify(&self, features: &[f64]) -> (char, f64) {
        self.templates
            .iter()
            .map(|t| (t.glyph, dot(&t.features, features)))
            .fold(('?', f64::NEG_INFINITY), |best, cur| {
                if cur.1 > best.1 {
                    cur
                } else {
                    best
                }
            })
    }
}

impl GlyphRecognizer for TemplateRecognizer {
    fn name(&self) -> &str {
        &self.name
    }

    fn recognize(&self, field: &FieldImage) -> Result<Recognition, RecognizerError> {
        let (w, h) = field.image.dimensions();
        if w == 0 || h == 0 || field.cells == 0 {
            return Err(RecognizerError::EmptyField);
        }
        if self.templates.is_empty() {
            return Err(RecognizerError::InvalidModel("model has no templates".into()));
        }

        let mut text = String::new();
        let mut per_char = Vec::new();
        for rect in cell_rects(field) {
            let Some(features) = cell_features(&field.image, rect) else {
                continue;
            };
            let (glyph, similarity) = self.classify(&features);
            text.push(glyph);
            per_char.push(similarity.clamp(0.0, 1.0));
        }

        let confidence = if per_char.is_empty() {
            0.0
        } else {
            per_char.iter().copied().fold(f64::INFINITY, f64::min)
        };
        Ok(Recognition {
            text,
            confidence,
            per_char,
        })
    }
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Normalized feature vector of the ink inside `rect`, or `None` for a
/// blank cell.
fn cell_features(image: &GrayImage, rect: CellRect) -> Option<Vec<f64>> {
    let ink = CellInk::find(image, rect)?;
    let frame = ink.frame(GRID_W as f64 / GRID_H as f64);
    let mut features = Vec::with_capacity(GRID_W * GRID_H);
    for gy in 0..GRID_H {
        for gx in 0..GRID_W {
            features.push(ink.grid_mean(frame, (GRID_W, GRID_H), (gx, gy), SUB));
        }
    }

    let mean = features.iter().sum::<f64>() / features.len() as f64;
    for f in features.iter_mut() {
        *f -= mean;
    }
    let norm = features.iter().map(|f| f * f).sum::<f64>().sqrt();
    if norm < 1e-9 {
        return None;
    }
    for f in features.iter_mut() {
        *f /= norm;
    }
    Some(features)
}
