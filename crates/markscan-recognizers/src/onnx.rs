//! ONNX character classifier.
//!
//! Runs a per-character image classifier exported to ONNX, the usual
//! MNIST/EMNIST shape: a batch of `N × 1 × S × S` float cells in, `N × K`
//! class scores out. Cells are segmented like the template matcher does; the
//! ink of each cell is fitted into the inner 20/28 of an `S × S` frame, white
//! ink on black, the way those datasets are prepared. Scores may be logits
//! or probabilities.
//!
//! The session is created once and shared by every worker behind a lock.

use std::path::Path;
use std::sync::Mutex;

use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::Value;

use markscan_core::error::RecognizerError;
use markscan_core::traits::{FieldImage, GlyphRecognizer, Recognition};

use crate::cells::{cell_rects, CellInk};
use crate::error::ModelError;

/// Fraction of the input frame the ink box spans.
const INK_SPAN: f64 = 20.0 / 28.0;
/// Samples per input pixel side.
const SUB: usize = 2;
/// Smallest accepted input side.
const MIN_INPUT_SIZE: u32 = 8;

/// Recognizes characters with an ONNX classifier.
pub struct OnnxRecognizer {
    name: String,
    session: Mutex<Session>,
    labels: Vec<char>,
    input_size: u32,
}

impl std::fmt::Debug for OnnxRecognizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OnnxRecognizer")
            .field("name", &self.name)
            .field("labels", &self.labels)
            .field("input_size", &self.input_size)
            .finish_non_exhaustive()
    }
}

impl OnnxRecognizer {
    /// Load `path`; `labels` names the model's classes in output order.
    pub fn from_file(path: &Path, labels: &str, input_size: u32) -> Result<Self, ModelError> {
        let labels = check_settings(labels, input_size)?;
        if !path.is_file() {
            return Err(ModelError::Io {
                path: path.to_path_buf(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "model file not found"),
            });
        }
        let runtime = |e: ort::Error| ModelError::Runtime {
            path: path.to_path_buf(),
            reason: e.to_string(),
        };
        let session = Session::builder()
            .map_err(runtime)?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(runtime)?
            .with_intra_threads(1)
            .map_err(runtime)?
            .commit_from_file(path)
            .map_err(runtime)?;

        let name = path
            .file_stem()
            .map(|s| format!("onnx-{}", s.to_string_lossy()))
            .unwrap_or_else(|| "onnx".to_string());
        tracing::info!(
            "loaded ONNX model '{}' ({} classes, {}px input) from {}",
            name,
            labels.len(),
            input_size,
            path.display()
        );
        Ok(Self {
            name,
            session: Mutex::new(session),
            labels,
            input_size,
        })
    }

    pub fn labels(&self) -> &[char] {
        &self.labels
    }
}

fn check_settings(labels: &str, input_size: u32) -> Result<Vec<char>, ModelError> {
    let labels: Vec<char> = labels.chars().collect();
    if labels.is_empty() {
        return Err(ModelError::Settings("no class labels".into()));
    }
    if input_size < MIN_INPUT_SIZE {
        return Err(ModelError::Settings(format!(
            "input size {input_size} is below {MIN_INPUT_SIZE}"
        )));
    }
    Ok(labels)
}

/// Input tensor data for every inked cell of `field`, cell by cell.
fn prepare_batch(field: &FieldImage, size: u32) -> (usize, Vec<f32>) {
    let size = size as usize;
    let mut data = Vec::new();
    let mut cells = 0;
    for rect in cell_rects(field) {
        let Some(ink) = CellInk::find(&field.image, rect) else {
            continue;
        };
        // widen the ink frame so the ink spans INK_SPAN of the input
        let (ox, oy, bw, bh) = ink.frame(1.0);
        let (fw, fh) = (bw / INK_SPAN, bh / INK_SPAN);
        let frame = (ox - (fw - bw) / 2.0, oy - (fh - bh) / 2.0, fw, fh);
        for y in 0..size {
            for x in 0..size {
                data.push(ink.grid_mean(frame, (size, size), (x, y), SUB) as f32);
            }
        }
        cells += 1;
    }
    (cells, data)
}

/// Best label and its probability for one row of class scores.
fn decode(scores: &[f32], labels: &[char]) -> Option<(char, f64)> {
    let is_distribution = scores.iter().all(|s| (0.0..=1.0).contains(s))
        && (scores.iter().sum::<f32>() - 1.0).abs() < 1e-3;
    let probabilities: Vec<f64> = if is_distribution {
        scores.iter().map(|&s| s as f64).collect()
    } else {
        let max = scores.iter().copied().fold(f32::NEG_INFINITY, f32::max) as f64;
        let exp: Vec<f64> = scores.iter().map(|&s| (s as f64 - max).exp()).collect();
        let total: f64 = exp.iter().sum();
        exp.into_iter().map(|e| e / total).collect()
    };
    let (best, p) = probabilities
        .iter()
        .copied()
        .enumerate()
        .max_by(|a, b| a.1.total_cmp(&b.1))?;
    labels.get(best).map(|&c| (c, p))
}

impl GlyphRecognizer for OnnxRecognizer {
    fn name(&self) -> &str {
        &self.name
    }

    fn recognize(&self, field: &FieldImage) -> Result<Recognition, RecognizerError> {
        let (w, h) = field.image.dimensions();
        if w == 0 || h == 0 || field.cells == 0 {
            return Err(RecognizerError::EmptyField);
        }
        let (cells, data) = prepare_batch(field, self.input_size);
        if cells == 0 {
            return Ok(Recognition::empty());
        }

        let inference = |e: ort::Error| RecognizerError::Inference(e.to_string());
        let size = self.input_size as usize;
        let input = Value::from_array(([cells, 1, size, size], data)).map_err(inference)?;
        let (dims, scores) = {
            let mut session = self
                .session
                .lock()
                .map_err(|_| RecognizerError::Inference("session lock poisoned".into()))?;
            let outputs = session.run(ort::inputs![input]).map_err(inference)?;
            let (shape, scores) = outputs[0].try_extract_tensor::<f32>().map_err(inference)?;
            let dims: Vec<usize> = shape.iter().map(|&d| d as usize).collect();
            (dims, scores.to_vec())
        };

        let classes = dims.last().copied().unwrap_or(0);
        if classes != self.labels.len() || scores.len() != cells * classes {
            return Err(RecognizerError::InvalidModel(format!(
                "model output {dims:?} does not match {cells} cell(s) of {} labels",
                self.labels.len()
            )));
        }

        let mut text = String::new();
        let mut per_char = Vec::with_capacity(cells);
        for row in scores.chunks(classes) {
            let Some((glyph, p)) = decode(row, &self.labels) else {
                continue;
            };
            text.push(glyph);
            per_char.push(p);
        }
        let confidence = per_char.iter().copied().fold(f64::INFINITY, f64::min);
        Ok(Recognition {
            text,
            confidence: if per_char.is_empty() { 0.0 } else { confidence },
            per_char,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma};

    fn field_with_bar(cells: usize, inked: &[usize]) -> FieldImage {
        let mut img = GrayImage::from_pixel(40 * cells as u32, 60, Luma([245]));
        for &cell in inked {
            let left = cell as u32 * 40 + 18;
            for y in 15..45 {
                for x in left..left + 4 {
                    img.put_pixel(x, y, Luma([15]));
                }
            }
        }
        FieldImage { image: img, cells }
    }

    #[test]
    fn batch_holds_one_frame_per_inked_cell() {
        let (cells, data) = prepare_batch(&field_with_bar(4, &[0, 2]), 28);
        assert_eq!(cells, 2);
        assert_eq!(data.len(), 2 * 28 * 28);
        assert!(data.iter().all(|v| (0.0..=1.0).contains(v)));
    }

    #[test]
    fn ink_is_centred_white_on_black() {
        let (_, data) = prepare_batch(&field_with_bar(1, &[0]), 28);
        let at = |x: usize, y: usize| data[y * 28 + x];
        assert!(at(14, 14) > 0.9);
        assert_eq!(at(0, 0), 0.0);
        assert_eq!(at(27, 27), 0.0);
        // the 30px bar spans the inner 20 rows
        assert!(at(14, 5) > 0.5 && at(14, 22) > 0.5);
        assert!(at(14, 2) < 0.1 && at(14, 25) < 0.1);
        // mass sits in the middle columns
        let left: f32 = (0..28).map(|y| at(10, y)).sum();
        let centre: f32 = (0..28).map(|y| at(14, y)).sum();
        assert!(centre > 5.0 * left.max(0.1));
    }

    #[test]
    fn blank_field_has_no_cells() {
        let (cells, data) = prepare_batch(&field_with_bar(3, &[]), 28);
        assert_eq!(cells, 0);
        assert!(data.is_empty());
    }

    #[test]
    fn decodes_logits_and_probabilities() {
        let labels: Vec<char> = "012".chars().collect();
        let (glyph, p) = decode(&[0.1, 4.0, 0.2], &labels).unwrap();
        assert_eq!(glyph, '1');
        assert!(p > 0.9 && p < 1.0);

        let (glyph, p) = decode(&[0.1, 0.2, 0.7], &labels).unwrap();
        assert_eq!(glyph, '2');
        assert!((p - 0.7).abs() < 1e-6);

        // a class without a label reads nothing
        assert!(decode(&[0.0, 0.0, 0.0, 9.0], &labels).is_none());
    }

    #[test]
    fn missing_model_file() {
        let err = OnnxRecognizer::from_file(Path::new("/nonexistent/digits.onnx"), "0123456789", 28)
            .unwrap_err();
        assert!(matches!(err, ModelError::Io { .. }));
        assert!(err.to_string().contains("/nonexistent/digits.onnx"));
    }

    #[test]
    fn settings_are_checked_before_loading() {
        assert!(matches!(
            OnnxRecognizer::from_file(Path::new("/nonexistent/x.onnx"), "", 28),
            Err(ModelError::Settings(_))
        ));
        assert!(matches!(
            OnnxRecognizer::from_file(Path::new("/nonexistent/x.onnx"), "01", 4),
            Err(ModelError::Settings(_))
        ));
    }

    #[test]
    fn garbage_model_is_a_runtime_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.onnx");
        std::fs::write(&path, b"not a protobuf").unwrap();
        let err = OnnxRecognizer::from_file(&path, "0123456789", 28).unwrap_err();
        assert!(matches!(err, ModelError::Runtime { .. }), "{err}");
    }
}
