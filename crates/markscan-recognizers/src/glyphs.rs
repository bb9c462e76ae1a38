//! Built-in 5×7 block font for digits and capital letters.
//!
//! The same bitmaps are used to print IDs on synthetic sheets and to build the
//! default template model, so a rendered sheet is always readable by the
//! built-in recognizer. Zero carries a slash to keep it apart from `O`.

use image::{GrayImage, Luma};

/// Glyph width in font pixels.
pub const GLYPH_WIDTH: usize = 5;
/// Glyph height in font pixels.
pub const GLYPH_HEIGHT: usize = 7;

/// Characters the built-in font covers.
pub const ALPHABET: &str = "0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";

const FONT: [(char, [u8; GLYPH_HEIGHT]); 36] = [
    ('0', [0b01110, 0b10001, 0b10011, 0b10101, 0b11001, 0b10001, 0b01110]),
    ('1', [0b00100, 0b01100, 0b00100, 0b00100, 0b00100, 0b00100, 0b01110]),
    ('2', [0b01110, 0b10001, 0b00001, 0b00010, 0b00100, 0b01000, 0b11111]),
    ('3', [0b11111, 0b00010, 0b00100, 0b00010, 0b00001, 0b10001, 0b01110]),
    ('4', [0b00010, 0b00110, 0b01010, 0b10010, 0b11111, 0b00010, 0b00010]),
    ('5', [0b11111, 0b10000, 0b11110, 0b00001, 0b00001, 0b10001, 0b01110]),
    ('6', [0b00110, 0b01000, 0b10000, 0b11110, 0b10001, 0b10001, 0b01110]),
    ('7', [0b11111, 0b00001, 0b00010, 0b00100, 0b01000, 0b01000, 0b01000]),
    ('8', [0b01110, 0b10001, 0b10001, 0b01110, 0b10001, 0b10001, 0b01110]),
    ('9', [0b01110, 0b10001, 0b10001, 0b01111, 0b00001, 0b00010, 0b01100]),
    ('A', [0b01110, 0b10001, 0b10001, 0b11111, 0b10001, 0b10001, 0b10001]),
    ('B', [0b11110, 0b10001, 0b10001, 0b11110, 0b10001, 0b10001, 0b11110]),
    ('C', [0b01110, 0b10001, 0b10000, 0b10000, 0b10000, 0b10001, 0b01110]),
    ('D', [0b11100, 0b10010, 0b10001, 0b10001, 0b10001, 0b10010, 0b11100]),
    ('E', [0b11111, 0b10000, 0b10000, 0b11110, 0b10000, 0b10000, 0b11111]),
    ('F', [0b11111, 0b10000, 0b10000, 0b11110, 0b10000, 0b10000, 0b10000]),
    ('G', [0b01110, 0b10001, 0b10000, 0b10111, 0b10001, 0b10001, 0b01111]),
    ('H', [0b10001, 0b10001, 0b10001, 0b11111, 0b10001, 0b10001, 0b10001]),
    ('I', [0b01110, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100, 0b01110]),
    ('J', [0b00111, 0b00010, 0b00010, 0b00010, 0b00010, 0b10010, 0b01100]),
    ('K', [0b10001, 0b10010, 0b10100, 0b11000, 0b10100, 0b10010, 0b10001]),
    ('L', [0b10000, 0b10000, 0b10000, 0b10000, 0b10000, 0b10000, 0b11111]),
    ('M', [0b10001, 0b11011, 0b10101, 0b10101, 0b10001, 0b10001, 0b10001]),
    ('N', [0b10001, 0b10001, 0b11001, 0b10101, 0b10011, 0b10001, 0b10001]),
    ('O', [0b01110, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01110]),
    ('P', [0b11110, 0b10001, 0b10001, 0b11110, 0b10000, 0b10000, 0b10000]),
    ('Q', [0b01110, 0b10001, 0b10001, 0b10001, 0b10101, 0b10010, 0b01101]),
    ('R', [0b11110, 0b10001, 0b10001, 0b11110, 0b10100, 0b10010, 0b10001]),
    ('S', [0b01111, 0b10000, 0b10000, 0b01110, 0b00001, 0b00001, 0b11110]),
    ('T', [0b11111, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100]),
    ('U', [0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01110]),
    ('V', [0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01010, 0b00100]),
    ('W', [0b10001, 0b10001, 0b10001, 0b10101, 0b10101, 0b10101, 0b01010]),
    ('X', [0b10001, 0b10001, 0b01010, 0b00100, 0b01010, 0b10001, 0b10001]),
    ('Y', [0b10001, 0b10001, 0b01010, 0b00100, 0b00100, 0b00100, 0b00100]),
    ('Z', [0b11111, 0b00001, 0b00010, 0b00100, 0b01000, 0b10000, 0b11111]),
];

/// Row bitmaps of a character (bit 4 is the leftmost column).
pub fn glyph(c: char) -> Option<[u8; GLYPH_HEIGHT]> {
    let c = c.to_ascii_uppercase();
    FONT.iter().find(|(ch, _)| *ch == c).map(|(_, rows)| *rows)
}

/// Whether font pixel `(col, row)` of a glyph is inked.
pub fn is_set(rows: &[u8; GLYPH_HEIGHT], col: usize, row: usize) -> bool {
    col < GLYPH_WIDTH && row < GLYPH_HEIGHT && rows[row] >> (GLYPH_WIDTH - 1 - col) & 1 == 1
}

/// Glyph as text rows of `0`/`1`, the format used by model files.
pub fn glyph_rows(c: char) -> Option<Vec<String>> {
    let rows = glyph(c)?;
    Some(
        (0..GLYPH_HEIGHT)
            .map(|r| {
                (0..GLYPH_WIDTH)
                    .map(|col| if is_set(&rows, col, r) { '1' } else { '0' })
                    .collect()
            })
            .collect(),
    )
}

/// Rasterize a `0`/`1` bitmap at `scale` pixels per font pixel, black on white,
/// with one font pixel of margin on every side.
pub fn rasterize(bitmap: &[Vec<bool>], scale: u32) -> GrayImage {
    let h = bitmap.len() as u32;
    let w = bitmap.iter().map(|r| r.len()).max().unwrap_or(0) as u32;
    let scale = scale.max(1);
    GrayImage::from_fn((w + 2) * scale, (h + 2) * scale, |x, y| {
        let col = (x / scale) as i64 - 1;
        let row = (y / scale) as i64 - 1;
        let inked = row >= 0
            && col >= 0
            && bitmap
                .get(row as usize)
                .and_then(|r| r.get(col as usize))
                .copied()
                .unwrap_or(false);
        if inked {
            Luma([0])
        } else {
            Luma([255])
        }
    })
}

/// Built-in glyph as a boolean bitmap.
pub fn bitmap(c: char) -> Option<Vec<Vec<bool>>> {
    let rows = glyph(c)?;
    Some(
        (0..GLYPH_HEIGHT)
            .map(|r| (0..GLYPH_WIDTH).map(|col| is_set(&rows, col, r)).collect())
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn covers_alphabet() {
        for c in ALPHABET.chars() {
            assert!(glyph(c).is_some(), "missing glyph {c}");
        }
        assert_eq!(glyph('a'), glyph('A'));
        assert!(glyph('#').is_none());
    }

    #[test]
    fn glyphs_are_distinct() {
        let all: Vec<[u8; GLYPH_HEIGHT]> = ALPHABET.chars().filter_map(glyph).collect();
        for (i, a) in all.iter().enumerate() {
            for b in &all[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn rows_format() {
        let rows = glyph_rows('1').unwrap();
        assert_eq!(rows[0], "00100");
        assert_eq!(rows[6], "01110");
    }

    #[test]
    fn rasterized_size_and_ink() {
        let img = rasterize(&bitmap('T').unwrap(), 4);
        assert_eq!(img.dimensions(), (28, 36));
        // top bar of the T
        assert_eq!(img.get_pixel(4, 4)[0], 0);
        // margin
        assert_eq!(img.get_pixel(0, 0)[0], 255);
    }
}
