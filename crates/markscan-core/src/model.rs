//! Core data model types for markscan.
//!
//! A `Layout` describes where everything sits on one exam model's answer sheet,
//! in canonical millimetres (origin top-left, y pointing down). A `SolutionKey`
//! describes what the correct answers are. Both are produced at generation time
//! and are read-only during correction.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// An axis-aligned rectangle in canonical sheet coordinates (mm).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub w: f64,
    pub h: f64,
}

impl Rect {
    pub fn new(x: f64, y: f64, w: f64, h: f64) -> Self {
        Self { x, y, w, h }
    }

    /// A `size` × `size` square centred on `(cx, cy)`.
    pub fn centered(cx: f64, cy: f64, size: f64) -> Self {
        Self::new(cx - size / 2.0, cy - size / 2.0, size, size)
    }

    pub fn center(&self) -> [f64; 2] {
        [self.x + self.w / 2.0, self.y + self.h / 2.0]
    }

    /// Corners in TL, TR, BR, BL order.
    pub fn corners(&self) -> [[f64; 2]; 4] {
        [
            [self.x, self.y],
            [self.x + self.w, self.y],
            [self.x + self.w, self.y + self.h],
            [self.x, self.y + self.h],
        ]
    }

    pub fn intersects(&self, other: &Rect) -> bool {
        self.x < other.x + other.w
            && other.x < self.x + self.w
            && self.y < other.y + other.h
            && other.y < self.y + self.h
    }

    /// Split horizontally into `n` equal cells.
    pub fn split_columns(&self, n: usize) -> Vec<Rect> {
        if n == 0 {
            return Vec::new();
        }
        let cell_w = self.w / n as f64;
        (0..n)
            .map(|i| Rect::new(self.x + i as f64 * cell_w, self.y, cell_w, self.h))
            .collect()
    }

    fn within(&self, page: &PageSize) -> bool {
        self.x >= 0.0
            && self.y >= 0.0
            && self.x + self.w <= page.width
            && self.y + self.h <= page.height
    }
}

/// Physical page size in millimetres.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PageSize {
    pub width: f64,
    pub height: f64,
}

impl PageSize {
    pub const A4: PageSize = PageSize {
        width: 210.0,
        height: 297.0,
    };
}

/// A printed square reference marker.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Fiducial {
    /// Marker centre (mm).
    pub center: [f64; 2],
    /// Side length (mm).
    pub size: f64,
}

/// The handwritten student-ID box: one character per cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdField {
    pub rect: Rect,
    pub cells: usize,
}

impl IdField {
    pub fn cell_rects(&self) -> Vec<Rect> {
        self.rect.split_columns(self.cells)
    }
}

/// The model-ID bubble row: one bubble per exam model label.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelField {
    pub labels: Vec<String>,
    pub bubbles: Vec<Rect>,
}

/// One question row on the sheet: its bubbles in option order (A, B, C, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionSlot {
    /// Question number as printed on this model's sheet (1-based).
    pub number: u32,
    pub bubbles: Vec<Rect>,
}

/// Geometry of one exam model's answer sheet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Layout {
    /// Exam model identifier (e.g. "1").
    pub model: String,
    pub page: PageSize,
    pub fiducials: Vec<Fiducial>,
    pub student_id: IdField,
    pub model_field: ModelField,
    pub questions: Vec<QuestionSlot>,
}

/// Letter printed for an option index (0 → 'A').
pub fn option_label(index: usize) -> char {
    (b'A' + (index.min(25)) as u8) as char
}

/// Parse an option letter back to its index.
pub fn parse_option_label(label: &str) -> Option<usize> {
    let mut chars = label.trim().chars();
    let c = chars.next()?.to_ascii_uppercase();
    if chars.next().is_some() || !c.is_ascii_uppercase() {
        return None;
    }
    Some((c as u8 - b'A') as usize)
}

impl Layout {
    pub fn question(&self, number: u32) -> Option<&QuestionSlot> {
        self.questions.iter().find(|q| q.number == number)
    }

    /// Indices of the fiducials closest to the TL, TR, BR and BL page corners.
    ///
    /// Returns `None` unless four distinct fiducials are found.
    pub fn anchor_indices(&self) -> Option<[usize; 4]> {
        let corners = [
            [0.0, 0.0],
            [self.page.width, 0.0],
            [self.page.width, self.page.height],
            [0.0, self.page.height],
        ];
        let mut anchors = [0usize; 4];
        for (slot, corner) in anchors.iter_mut().zip(corners.iter()) {
            let (idx, _) = self
                .fiducials
                .iter()
                .enumerate()
                .map(|(i, f)| {
                    let dx = f.center[0] - corner[0];
                    let dy = f.center[1] - corner[1];
                    (i, dx * dx + dy * dy)
                })
                .min_by(|a, b| a.1.total_cmp(&b.1))?;
            *slot = idx;
        }
        let mut sorted = anchors;
        sorted.sort_unstable();
        if sorted.windows(2).any(|w| w[0] == w[1]) {
            return None;
        }
        Some(anchors)
    }

    /// True when every printed element lies inside the page.
    pub fn fits_page(&self) -> bool {
        let page = &self.page;
        self.student_id.rect.within(page)
            && self.model_field.bubbles.iter().all(|b| b.within(page))
            && self
                .questions
                .iter()
                .flat_map(|q| q.bubbles.iter())
                .all(|b| b.within(page))
    }
}

// ---------------------------------------------------------------------------
// Standard sheet template
// ---------------------------------------------------------------------------

/// Errors raised while building a standard sheet.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum LayoutError {
    #[error("exam has no questions")]
    NoQuestions,
    #[error("{requested} questions do not fit in {columns} column(s) (capacity {capacity})")]
    TooManyQuestions {
        requested: usize,
        columns: usize,
        capacity: usize,
    },
    #[error("question {question} has {options} options, at most {max} fit in a column")]
    TooManyOptions {
        question: u32,
        options: usize,
        max: usize,
    },
    #[error("question {question} needs at least 2 options")]
    TooFewOptions { question: u32 },
    #[error("{0} models do not fit in the model row (max 10)")]
    TooManyModels(usize),
    #[error("columns must be between 1 and 3, got {0}")]
    InvalidColumns(usize),
    #[error("student-ID box must have between 1 and 12 cells, got {0}")]
    InvalidIdCells(usize),
}

/// Parameters of the fixed-grid A4 sheet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SheetSpec {
    /// Option count per question, in sheet order.
    pub questions: Vec<usize>,
    /// Model labels printed in the model row.
    pub models: Vec<String>,
    /// Student-ID character cells.
    pub id_cells: usize,
    /// Answer columns (1–3).
    pub columns: usize,
}

impl SheetSpec {
    /// `count` questions with `options` options each.
    pub fn uniform(count: usize, options: usize, models: &[&str]) -> Self {
        Self {
            questions: vec![options; count],
            models: models.iter().map(|m| m.to_string()).collect(),
            id_cells: 8,
            columns: if count > 26 { 2 } else { 1 },
        }
    }
}

const MARKER_SIZE: f64 = 8.0;
const BUBBLE_SIZE: f64 = 5.0;
const OPTION_PITCH: f64 = 7.5;
const ROW_PITCH: f64 = 8.0;
const GRID_LEFT: f64 = 20.0;
const GRID_WIDTH: f64 = 170.0;
const GRID_TOP: f64 = 66.0;
const GRID_BOTTOM: f64 = 272.0;
const NUMBER_GUTTER: f64 = 10.0;

impl Layout {
    /// Rows that fit in one answer column.
    pub fn rows_per_column() -> usize {
        ((GRID_BOTTOM - GRID_TOP) / ROW_PITCH).floor() as usize
    }

    /// Build the standard A4 sheet for one model.
    ///
    /// Four corner fiducials plus an orientation marker next to the top-left
    /// one, so a page scanned upside down is still resolved.
    pub fn standard(model: &str, spec: &SheetSpec) -> Result<Layout, LayoutError> {
        if spec.questions.is_empty() {
            return Err(LayoutError::NoQuestions);
        }
        if !(1..=3).contains(&spec.columns) {
            return Err(LayoutError::InvalidColumns(spec.columns));
        }
        if !(1..=12).contains(&spec.id_cells) {
            return Err(LayoutError::InvalidIdCells(spec.id_cells));
        }
        if spec.models.len() > 10 {
            return Err(LayoutError::TooManyModels(spec.models.len()));
        }

        let rows = Self::rows_per_column();
        let capacity = rows * spec.columns;
        if spec.questions.len() > capacity {
            return Err(LayoutError::TooManyQuestions {
                requested: spec.questions.len(),
                columns: spec.columns,
                capacity,
            });
        }

        let page = PageSize::A4;
        let half = MARKER_SIZE / 2.0 + 10.0;
        let fiducials = vec![
            Fiducial {
                center: [half, half],
                size: MARKER_SIZE,
            },
            Fiducial {
                center: [page.width - half, half],
                size: MARKER_SIZE,
            },
            Fiducial {
                center: [page.width - half, page.height - half],
                size: MARKER_SIZE,
            },
            Fiducial {
                center: [half, page.height - half],
                size: MARKER_SIZE,
            },
            Fiducial {
                center: [half + 2.0 * MARKER_SIZE, half],
                size: MARKER_SIZE,
            },
        ];

        let student_id = IdField {
            rect: Rect::new(60.0, 26.0, 9.0 * spec.id_cells as f64, 12.0),
            cells: spec.id_cells,
        };

        let model_field = ModelField {
            labels: spec.models.clone(),
            bubbles: (0..spec.models.len())
                .map(|i| Rect::centered(62.5 + i as f64 * 10.0, 50.0, BUBBLE_SIZE))
                .collect(),
        };

        let column_width = GRID_WIDTH / spec.columns as f64;
        let max_options =
            (((column_width - NUMBER_GUTTER - BUBBLE_SIZE) / OPTION_PITCH).floor() as usize + 1)
                .min(26);

        let mut questions = Vec::with_capacity(spec.questions.len());
        for (i, &options) in spec.questions.iter().enumerate() {
            let number = i as u32 + 1;
            if options < 2 {
                return Err(LayoutError::TooFewOptions { question: number });
            }
            if options > max_options {
                return Err(LayoutError::TooManyOptions {
                    question: number,
                    options,
                    max: max_options,
                });
            }
            let column = i / rows;
            let row = i % rows;
            let x0 = GRID_LEFT + column as f64 * column_width + NUMBER_GUTTER;
            let cy = GRID_TOP + row as f64 * ROW_PITCH + ROW_PITCH / 2.0;
            let bubbles = (0..options)
                .map(|o| Rect::centered(x0 + BUBBLE_SIZE / 2.0 + o as f64 * OPTION_PITCH, cy, BUBBLE_SIZE))
                .collect();
            questions.push(QuestionSlot { number, bubbles });
        }

        Ok(Layout {
            model: model.to_string(),
            page,
            fiducials,
            student_id,
            model_field,
            questions,
        })
    }
}

// ---------------------------------------------------------------------------
// Solution key
// ---------------------------------------------------------------------------

/// The correct answer for one question of one model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyEntry {
    /// Question number on this model's sheet.
    pub number: u32,
    /// Question-pool identifier, stable across shuffled models.
    #[serde(default)]
    pub original_id: Option<u32>,
    /// Index of the correct option (0 → 'A').
    pub correct: usize,
    /// Points for a correct answer.
    #[serde(default = "default_weight")]
    pub weight: f64,
    /// Number of options the question was generated with, when recorded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<usize>,
}

fn default_weight() -> f64 {
    1.0
}

impl KeyEntry {
    /// Identifier used by void lists and per-question statistics.
    pub fn question_id(&self) -> u32 {
        self.original_id.unwrap_or(self.number)
    }
}

/// Per-model solution key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolutionKey {
    pub model: String,
    pub questions: Vec<KeyEntry>,
}

impl SolutionKey {
    pub fn entry(&self, number: u32) -> Option<&KeyEntry> {
        self.questions.iter().find(|q| q.number == number)
    }

    /// Total achievable score before any voiding.
    pub fn max_score(&self) -> f64 {
        self.questions.iter().map(|q| q.weight).sum()
    }
}

/// Layout and key of a single exam model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExamModel {
    pub layout: Layout,
    pub key: SolutionKey,
}

/// Every model of one exam, keyed by model id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExamBundle {
    pub models: BTreeMap<String, ExamModel>,
}

impl ExamBundle {
    pub fn model(&self, id: &str) -> Option<&ExamModel> {
        self.models.get(id)
    }

    pub fn model_ids(&self) -> Vec<String> {
        self.models.keys().cloned().collect()
    }

    /// Layout used for geometry and header fields (shared by all models).
    pub fn reference_layout(&self) -> Option<&Layout> {
        self.models.values().next().map(|m| &m.layout)
    }

    /// Largest question count across models (width of the results table).
    pub fn question_count(&self) -> usize {
        self.models
            .values()
            .map(|m| {
                m.layout
                    .questions
                    .iter()
                    .map(|q| q.number as usize)
                    .max()
                    .unwrap_or(0)
            })
            .max()
            .unwrap_or(0)
    }

    /// The only model id, when the exam has exactly one.
    pub fn single_model(&self) -> Option<&str> {
        if self.models.len() == 1 {
            self.models.keys().next().map(String::as_str)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn option_labels_roundtrip() {
        assert_eq!(option_label(0), 'A');
        assert_eq!(option_label(3), 'D');
        assert_eq!(parse_option_label("c"), Some(2));
        assert_eq!(parse_option_label(" B "), Some(1));
        assert_eq!(parse_option_label("AB"), None);
        assert_eq!(parse_option_label("-"), None);
        assert_eq!(parse_option_label(""), None);
    }

    #[test]
    fn standard_layout_shape() {
        let spec = SheetSpec::uniform(10, 4, &["1", "2", "3", "4"]);
        let layout = Layout::standard("1", &spec).unwrap();
        assert_eq!(layout.questions.len(), 10);
        assert_eq!(layout.fiducials.len(), 5);
        assert_eq!(layout.model_field.bubbles.len(), 4);
        assert_eq!(layout.student_id.cell_rects().len(), 8);
        assert!(layout.fits_page());
        assert_eq!(layout.question(3).unwrap().bubbles.len(), 4);
    }

    #[test]
    fn standard_layout_bubbles_do_not_overlap() {
        let spec = SheetSpec {
            questions: vec![5; 60],
            models: vec!["1".into()],
            id_cells: 8,
            columns: 3,
        };
        let layout = Layout::standard("1", &spec).unwrap();
        let bubbles: Vec<Rect> = layout
            .questions
            .iter()
            .flat_map(|q| q.bubbles.iter().copied())
            .collect();
        for (i, a) in bubbles.iter().enumerate() {
            for b in &bubbles[i + 1..] {
                assert!(!a.intersects(b), "{a:?} overlaps {b:?}");
            }
        }
        assert!(layout.fits_page());
    }

    #[test]
    fn standard_layout_capacity() {
        let rows = Layout::rows_per_column();
        let spec = SheetSpec {
            questions: vec![4; rows + 1],
            models: vec!["1".into()],
            id_cells: 8,
            columns: 1,
        };
        assert!(matches!(
            Layout::standard("1", &spec),
            Err(LayoutError::TooManyQuestions { .. })
        ));
    }

    #[test]
    fn standard_layout_rejects_wide_questions() {
        let spec = SheetSpec {
            questions: vec![9],
            models: vec!["1".into()],
            id_cells: 8,
            columns: 3,
        };
        assert!(matches!(
            Layout::standard("1", &spec),
            Err(LayoutError::TooManyOptions { .. })
        ));
    }

    #[test]
    fn anchors_are_the_corner_markers() {
        let layout = Layout::standard("1", &SheetSpec::uniform(5, 4, &["1"])).unwrap();
        assert_eq!(layout.anchor_indices(), Some([0, 1, 2, 3]));
    }

    #[test]
    fn anchors_require_four_distinct_markers() {
        let mut layout = Layout::standard("1", &SheetSpec::uniform(5, 4, &["1"])).unwrap();
        layout.fiducials.truncate(2);
        assert_eq!(layout.anchor_indices(), None);
    }

    #[test]
    fn key_max_score_and_ids() {
        let key = SolutionKey {
            model: "1".into(),
            questions: vec![
                KeyEntry {
                    number: 1,
                    original_id: Some(7),
                    correct: 0,
                    weight: 1.0,
                    options: Some(4),
                },
                KeyEntry {
                    number: 2,
                    original_id: None,
                    correct: 1,
                    weight: 2.0,
                    options: None,
                },
            ],
        };
        assert_eq!(key.max_score(), 3.0);
        assert_eq!(key.entry(1).unwrap().question_id(), 7);
        assert_eq!(key.entry(2).unwrap().question_id(), 2);
    }
}
