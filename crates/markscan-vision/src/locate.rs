//! Field locator: canonical rectangles projected into the scan.

use image::{GrayImage, Luma};
use imageproc::geometric_transformations::{warp_into, Interpolation, Projection};

use markscan_core::model::{Layout, Rect};

use crate::geometry::Transform;

const PAPER: Luma<u8> = Luma([255]);

/// A projected rectangle: pixel corners in canonical TL, TR, BR, BL order.
///
/// On an upside-down scan the canonical top-left corner is the bottom-right
/// one on screen; the order always follows the sheet, not the image.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quad {
    pub corners: [[f64; 2]; 4],
}

impl Quad {
    /// Bilinear point at normalized `(u, v)`; values outside `[0, 1]`
    /// extrapolate beyond the edges.
    pub fn point(&self, u: f64, v: f64) -> [f64; 2] {
        let [tl, tr, br, bl] = self.corners;
        let top = [tl[0] + (tr[0] - tl[0]) * u, tl[1] + (tr[1] - tl[1]) * u];
        let bottom = [bl[0] + (br[0] - bl[0]) * u, bl[1] + (br[1] - bl[1]) * u];
        [
            top[0] + (bottom[0] - top[0]) * v,
            top[1] + (bottom[1] - top[1]) * v,
        ]
    }

    pub fn center(&self) -> [f64; 2] {
        self.point(0.5, 0.5)
    }
}

/// Pixel regions of every field of one layout.
#[derive(Debug, Clone)]
pub struct FieldRegions {
    pub student_id: Quad,
    pub model_bubbles: Vec<Quad>,
    /// Sheet question number and its bubbles in option order.
    pub questions: Vec<(u32, Vec<Quad>)>,
}

pub fn project_rect(transform: &Transform, rect: &Rect) -> Quad {
    Quad {
        corners: rect.corners().map(|c| transform.to_image(c)),
    }
}

/// Project every field of `layout` through `transform`.
pub fn locate(transform: &Transform, layout: &Layout) -> FieldRegions {
    let quads = |rects: &[Rect]| -> Vec<Quad> {
        rects.iter().map(|r| project_rect(transform, r)).collect()
    };
    FieldRegions {
        student_id: project_rect(transform, &layout.student_id.rect),
        model_bubbles: quads(&layout.model_field.bubbles),
        questions: layout
            .questions
            .iter()
            .map(|q| (q.number, quads(&q.bubbles)))
            .collect(),
    }
}

/// Bilinear gray value at continuous coordinates (pixel centres at +0.5).
/// Outside the image reads as white paper.
pub fn sample(image: &GrayImage, p: [f64; 2]) -> f64 {
    let (w, h) = image.dimensions();
    let x = p[0] - 0.5;
    let y = p[1] - 0.5;
    if !x.is_finite() || !y.is_finite() {
        return 255.0;
    }
    let x0 = x.floor();
    let y0 = y.floor();
    let (fx, fy) = (x - x0, y - y0);
    let px = |xi: f64, yi: f64| -> f64 {
        if xi < 0.0 || yi < 0.0 || xi >= w as f64 || yi >= h as f64 {
            255.0
        } else {
            image.get_pixel(xi as u32, yi as u32)[0] as f64
        }
    };
    let top = px(x0, y0) * (1.0 - fx) + px(x0 + 1.0, y0) * fx;
    let bottom = px(x0, y0 + 1.0) * (1.0 - fx) + px(x0 + 1.0, y0 + 1.0) * fx;
    top * (1.0 - fy) + bottom * fy
}

/// Rectify the region inside `quad` into an upright `width` × `height` image.
///
/// Parts of the quad outside the scan read as white paper; a degenerate quad
/// yields a blank field.
pub fn extract_field(image: &GrayImage, quad: &Quad, width: u32, height: u32) -> GrayImage {
    let (w, h) = (width as f32, height as f32);
    // warp works on pixel indices, corners are continuous coordinates
    let index = |[x, y]: [f64; 2]| (x as f32 - 0.5, y as f32 - 0.5);
    let from = quad.corners.map(index);
    let to = [[0.0, 0.0], [w, 0.0], [w, h], [0.0, h]].map(|[x, y]| (x - 0.5, y - 0.5));
    let mut field = GrayImage::from_pixel(width, height, PAPER);
    match Projection::from_control_points(from, to) {
        Some(projection) => {
            warp_into(image, &projection, Interpolation::Bilinear, PAPER, &mut field)
        }
        None => tracing::debug!(corners = ?quad.corners, "degenerate field quad"),
    }
    field
}
