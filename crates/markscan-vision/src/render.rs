//! Synthetic sheet rendering.
//!
//! Draws a filled-in answer sheet for a layout, optionally photographed at an
//! angle. Used to produce reference scans and to test the pipeline end to end.

use std::collections::BTreeMap;

use anyhow::{bail, Result};
use image::{GrayImage, Luma};
use imageproc::drawing::{draw_filled_circle_mut, draw_filled_rect_mut, draw_hollow_circle_mut, draw_hollow_rect_mut};
use imageproc::geometric_transformations::{warp, Interpolation, Projection};
use imageproc::rect::Rect as PixelRect;
use nalgebra::Matrix3;

use markscan_core::model::{parse_option_label, Layout, Rect};
use markscan_recognizers::glyphs::{self, GLYPH_HEIGHT, GLYPH_WIDTH};

const PAPER: Luma<u8> = Luma([255]);
const INK: Luma<u8> = Luma([0]);
const PRINT: Luma<u8> = Luma([70]);

/// Font pixel size of handwritten ID characters (mm).
const ID_FONT_PX: f64 = 1.2;
/// Pen fill radius relative to the bubble radius.
const FILL_RADIUS: f64 = 0.85;

/// What a student wrote on the sheet.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SheetMarks {
    pub student_id: String,
    /// Model bubble to fill; none leaves the row blank.
    pub model: Option<String>,
    /// Sheet question number → filled option indices.
    pub answers: BTreeMap<u32, Vec<usize>>,
}

/// Parse a comma-separated answer list such as `A,B,-,C,AC`.
///
/// `-` (or nothing) leaves a question blank; several letters fill several
/// bubbles. Entry `i` is sheet question `i + 1`.
pub fn parse_answer_list(list: &str) -> Result<BTreeMap<u32, Vec<usize>>> {
    let mut answers = BTreeMap::new();
    if list.trim().is_empty() {
        return Ok(answers);
    }
    for (i, item) in list.split(',').enumerate() {
        let item = item.trim();
        let mut options = Vec::new();
        if item != "-" {
            for c in item.chars() {
                match parse_option_label(&c.to_string()) {
                    Some(o) => options.push(o),
                    None => bail!("invalid answer '{item}' for question {}", i + 1),
                }
            }
        }
        answers.insert(i as u32 + 1, options);
    }
    Ok(answers)
}

/// How the rendered page is photographed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Distortion {
    /// Rotation about the page centre (degrees, clockwise on screen).
    pub rotation_deg: f64,
    pub scale: f64,
    /// Translation in pixels.
    pub offset: [f64; 2],
    /// Keystone strength; a few hundredths is a tilted phone shot.
    pub perspective: f64,
}

impl Default for Distortion {
    fn default() -> Self {
        Self {
            rotation_deg: 0.0,
            scale: 1.0,
            offset: [0.0, 0.0],
            perspective: 0.0,
        }
    }
}

impl Distortion {
    pub fn rotation(degrees: f64) -> Self {
        Self {
            rotation_deg: degrees,
            ..Default::default()
        }
    }

    pub fn is_identity(&self) -> bool {
        *self == Self::default()
    }

    /// Page-pixel → photo-pixel mapping for a `width` × `height` image.
    pub fn matrix(&self, width: u32, height: u32) -> Matrix3<f64> {
        let (cx, cy) = (width as f64 / 2.0, height as f64 / 2.0);
        let (s, c) = self.rotation_deg.to_radians().sin_cos();
        let to_center = Matrix3::new(1.0, 0.0, -cx, 0.0, 1.0, -cy, 0.0, 0.0, 1.0);
        let rotate_scale = Matrix3::new(
            c * self.scale,
            -s * self.scale,
            0.0,
            s * self.scale,
            c * self.scale,
            0.0,
            0.0,
            0.0,
            1.0,
        );
        let keystone = Matrix3::new(
            1.0,
            0.0,
            0.0,
            0.0,
            1.0,
            0.0,
            0.0,
            self.perspective / height as f64,
            1.0,
        );
        let back = Matrix3::new(
            1.0,
            0.0,
            cx + self.offset[0],
            0.0,
            1.0,
            cy + self.offset[1],
            0.0,
            0.0,
            1.0,
        );
        back * keystone * rotate_scale * to_center
    }
}

fn px(mm: f64, ppm: f64) -> i32 {
    (mm * ppm).round() as i32
}

fn pixel_rect(x0: i32, y0: i32, x1: i32, y1: i32) -> PixelRect {
    PixelRect::at(x0, y0).of_size((x1 - x0).max(1) as u32, (y1 - y0).max(1) as u32)
}

fn mm_rect(r: &Rect, ppm: f64) -> PixelRect {
    pixel_rect(px(r.x, ppm), px(r.y, ppm), px(r.x + r.w, ppm), px(r.y + r.h, ppm))
}

fn draw_bubble(img: &mut GrayImage, r: &Rect, ppm: f64, filled: bool) {
    let [cx, cy] = r.center();
    let center = (px(cx, ppm), px(cy, ppm));
    let radius = (r.w.min(r.h) / 2.0 * ppm).round() as i32;
    draw_hollow_circle_mut(img, center, radius, PRINT);
    draw_hollow_circle_mut(img, center, (radius - 1).max(1), PRINT);
    if filled {
        let fill = (r.w.min(r.h) / 2.0 * FILL_RADIUS * ppm).round() as i32;
        draw_filled_circle_mut(img, center, fill.max(1), INK);
    }
}

fn draw_char(img: &mut GrayImage, cell: &Rect, c: char, ppm: f64) {
    let Some(bitmap) = glyphs::bitmap(c) else {
        return;
    };
    let left = cell.x + (cell.w - GLYPH_WIDTH as f64 * ID_FONT_PX) / 2.0;
    let top = cell.y + (cell.h - GLYPH_HEIGHT as f64 * ID_FONT_PX) / 2.0;
    for (row, bits) in bitmap.iter().enumerate() {
        for (col, &on) in bits.iter().enumerate() {
            if !on {
                continue;
            }
            let x0 = left + col as f64 * ID_FONT_PX;
            let y0 = top + row as f64 * ID_FONT_PX;
            draw_filled_rect_mut(
                img,
                pixel_rect(
                    px(x0, ppm),
                    px(y0, ppm),
                    px(x0 + ID_FONT_PX, ppm),
                    px(y0 + ID_FONT_PX, ppm),
                ),
                INK,
            );
        }
    }
}

/// Draw `layout` filled in with `marks` at `ppm` pixels per millimetre.
pub fn render_sheet(layout: &Layout, marks: &SheetMarks, ppm: f64) -> GrayImage {
    let width = (layout.page.width * ppm).round().max(1.0) as u32;
    let height = (layout.page.height * ppm).round().max(1.0) as u32;
    let mut img = GrayImage::from_pixel(width, height, PAPER);

    for f in &layout.fiducials {
        let r = Rect::centered(f.center[0], f.center[1], f.size);
        draw_filled_rect_mut(&mut img, mm_rect(&r, ppm), INK);
    }

    let cells = layout.student_id.cell_rects();
    for cell in &cells {
        draw_hollow_rect_mut(&mut img, mm_rect(cell, ppm), PRINT);
    }
    for (cell, c) in cells.iter().zip(marks.student_id.chars()) {
        draw_char(&mut img, cell, c, ppm);
    }

    for (label, bubble) in layout.model_field.labels.iter().zip(&layout.model_field.bubbles) {
        draw_bubble(&mut img, bubble, ppm, marks.model.as_deref() == Some(label.as_str()));
    }

    for q in &layout.questions {
        let filled = marks.answers.get(&q.number).map(Vec::as_slice).unwrap_or(&[]);
        for (o, bubble) in q.bubbles.iter().enumerate() {
            draw_bubble(&mut img, bubble, ppm, filled.contains(&o));
        }
    }

    img
}

/// Photograph a rendered page: the result keeps the input's dimensions, with
/// paper colour where nothing maps.
pub fn distort(image: &GrayImage, distortion: &Distortion) -> Result<GrayImage> {
    if distortion.is_identity() {
        return Ok(image.clone());
    }
    let (w, h) = image.dimensions();
    let m = distortion.matrix(w, h);
    let mut values = [0f32; 9];
    for r in 0..3 {
        for c in 0..3 {
            values[r * 3 + c] = m[(r, c)] as f32;
        }
    }
    let Some(projection) = Projection::from_matrix(values) else {
        bail!("distortion is not invertible");
    };
    Ok(warp(image, &projection, Interpolation::Bilinear, PAPER))
}
