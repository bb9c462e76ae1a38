//! Character cell segmentation shared by the recognizers.

use image::GrayImage;

use markscan_core::traits::FieldImage;

/// Fraction of each cell side dropped on every edge (printed outline).
const CELL_INSET: f64 = 0.12;
/// Minimum gray range inside a cell for it to hold a character.
const MIN_CONTRAST: u8 = 40;
/// Minimum fraction of ink pixels inside a cell.
const MIN_INK: f64 = 0.02;

/// Pixel rectangle `(x0, y0, x1, y1)`, continuous coordinates.
pub(crate) type CellRect = (f64, f64, f64, f64);

/// Inner rectangle of every cell, left to right.
pub(crate) fn cell_rects(field: &FieldImage) -> Vec<CellRect> {
    let (w, h) = field.image.dimensions();
    if field.cells == 0 {
        return Vec::new();
    }
    let cell_w = w as f64 / field.cells as f64;
    (0..field.cells)
        .map(|i| {
            let x0 = i as f64 * cell_w;
            (
                x0 + cell_w * CELL_INSET,
                h as f64 * CELL_INSET,
                x0 + cell_w * (1.0 - CELL_INSET),
                h as f64 * (1.0 - CELL_INSET),
            )
        })
        .collect()
}

/// The ink of one cell: its gray range and bounding box.
pub(crate) struct CellInk<'a> {
    image: &'a GrayImage,
    bounds: (u32, u32, u32, u32),
    lo: u8,
    hi: u8,
    ink_box: (u32, u32, u32, u32),
}

impl<'a> CellInk<'a> {
    /// Ink inside `rect`, or `None` for a blank cell.
    pub(crate) fn find(image: &'a GrayImage, rect: CellRect) -> Option<Self> {
        let (iw, ih) = image.dimensions();
        let x0 = rect.0.max(0.0).floor() as u32;
        let y0 = rect.1.max(0.0).floor() as u32;
        let x1 = (rect.2.ceil() as u32).min(iw);
        let y1 = (rect.3.ceil() as u32).min(ih);
        if x1 <= x0 || y1 <= y0 {
            return None;
        }

        let (mut lo, mut hi) = (u8::MAX, u8::MIN);
        for y in y0..y1 {
            for x in x0..x1 {
                let v = image.get_pixel(x, y)[0];
                lo = lo.min(v);
                hi = hi.max(v);
            }
        }
        if hi.saturating_sub(lo) < MIN_CONTRAST {
            return None;
        }
        let mid = (lo as u16 + hi as u16) / 2;

        let (mut bx0, mut by0, mut bx1, mut by1) = (u32::MAX, u32::MAX, 0u32, 0u32);
        let mut ink = 0usize;
        for y in y0..y1 {
            for x in x0..x1 {
                if (image.get_pixel(x, y)[0] as u16) < mid {
                    ink += 1;
                    bx0 = bx0.min(x);
                    by0 = by0.min(y);
                    bx1 = bx1.max(x + 1);
                    by1 = by1.max(y + 1);
                }
            }
        }
        let area = ((x1 - x0) * (y1 - y0)) as f64;
        if (ink as f64) < MIN_INK * area {
            return None;
        }
        Some(Self {
            image,
            bounds: (x0, y0, x1, y1),
            lo,
            hi,
            ink_box: (bx0, by0, bx1, by1),
        })
    }

    /// The ink box grown to `aspect` (width / height) around its centre, as
    /// `(x, y, width, height)`.
    pub(crate) fn frame(&self, aspect: f64) -> (f64, f64, f64, f64) {
        let (bx0, by0, bx1, by1) = self.ink_box;
        let (mut bw, mut bh) = ((bx1 - bx0) as f64, (by1 - by0) as f64);
        if bw / bh < aspect {
            bw = bh * aspect;
        } else {
            bh = bw / aspect;
        }
        let cx = (bx0 + bx1) as f64 / 2.0;
        let cy = (by0 + by1) as f64 / 2.0;
        (cx - bw / 2.0, cy - bh / 2.0, bw, bh)
    }

    /// Ink darkness in `[0, 1]` at a pixel position; 0 outside the cell.
    pub(crate) fn darkness(&self, x: f64, y: f64) -> f64 {
        let (x0, y0, x1, y1) = self.bounds;
        if x < x0 as f64 || y < y0 as f64 || x >= x1 as f64 || y >= y1 as f64 {
            return 0.0;
        }
        let v = self.image.get_pixel(x as u32, y as u32)[0] as f64;
        ((self.hi as f64 - v) / (self.hi - self.lo) as f64).clamp(0.0, 1.0)
    }

    /// Mean darkness of grid cell `(gx, gy)` of a `cols` × `rows` grid laid
    /// over `frame`, supersampled `sub` × `sub`.
    pub(crate) fn grid_mean(
        &self,
        frame: (f64, f64, f64, f64),
        (cols, rows): (usize, usize),
        (gx, gy): (usize, usize),
        sub: usize,
    ) -> f64 {
        let (ox, oy, bw, bh) = frame;
        let mut sum = 0.0;
        for sy in 0..sub {
            for sx in 0..sub {
                let u = (gx as f64 + (sx as f64 + 0.5) / sub as f64) / cols as f64;
                let v = (gy as f64 + (sy as f64 + 0.5) / sub as f64) / rows as f64;
                sum += self.darkness(ox + u * bw, oy + v * bh);
            }
        }
        sum / (sub * sub) as f64
    }
}
