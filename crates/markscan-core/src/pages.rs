//! Page access for scan files.
//!
//! A scan file is either a single raster image (anything the `image` crate
//! decodes) or a multi-page document: a TIFF with several directories, or a
//! PDF rendered page by page through pdfium. Every page is a separate sheet.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Mutex;

use image::GrayImage;
use pdfium_render::prelude::*;
use tiff::decoder::{Decoder, DecodingResult};
use tiff::ColorType;

use crate::error::ScanError;

/// Resolution PDF pages are rendered at.
pub const PDF_RENDER_DPI: f32 = 200.0;

/// pdfium is not thread-safe; every call goes through this lock.
static PDFIUM: Mutex<()> = Mutex::new(());

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    Image,
    Tiff,
    Pdf,
}

impl DocumentKind {
    pub fn of(path: &Path) -> Self {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_lowercase);
        match ext.as_deref() {
            Some("tif" | "tiff") => Self::Tiff,
            Some("pdf") => Self::Pdf,
            _ => Self::Image,
        }
    }
}

/// Number of pages in the document at `path`.
pub fn page_count(path: &Path) -> Result<usize, ScanError> {
    match DocumentKind::of(path) {
        DocumentKind::Image => Ok(1),
        DocumentKind::Tiff => tiff_page_count(path).map_err(ScanError::Decode),
        DocumentKind::Pdf => with_pdf(path, |doc| Ok(doc.pages().len() as usize)),
    }
}

/// Decode one page as grayscale. `page` is zero-based; `None` reads a plain
/// image file.
pub fn load_page(path: &Path, page: Option<usize>) -> Result<GrayImage, ScanError> {
    match (DocumentKind::of(path), page) {
        (DocumentKind::Tiff, Some(index)) => {
            load_tiff_page(path, index).map_err(ScanError::Decode)
        }
        (DocumentKind::Pdf, index) => load_pdf_page(path, index.unwrap_or(0)),
        _ => image::open(path)
            .map(|img| img.to_luma8())
            .map_err(|e| ScanError::Decode(e.to_string())),
    }
}

fn open_tiff(path: &Path) -> Result<Decoder<BufReader<File>>, String> {
    let file = File::open(path).map_err(|e| format!("{}: {e}", path.display()))?;
    Decoder::new(BufReader::new(file)).map_err(|e| e.to_string())
}

fn tiff_page_count(path: &Path) -> Result<usize, String> {
    let mut decoder = open_tiff(path)?;
    let mut pages = 1;
    while decoder.more_images() {
        decoder.next_image().map_err(|e| e.to_string())?;
        pages += 1;
    }
    Ok(pages)
}

fn load_tiff_page(path: &Path, index: usize) -> Result<GrayImage, String> {
    let mut decoder = open_tiff(path)?;
    for _ in 0..index {
        if !decoder.more_images() {
            return Err(format!("page {} not found", index + 1));
        }
        decoder.next_image().map_err(|e| e.to_string())?;
    }
    let (width, height) = decoder.dimensions().map_err(|e| e.to_string())?;
    let channels = match decoder.colortype().map_err(|e| e.to_string())? {
        ColorType::Gray(8 | 16) => 1,
        ColorType::GrayA(8 | 16) => 2,
        ColorType::RGB(8 | 16) => 3,
        ColorType::RGBA(8 | 16) => 4,
        other => return Err(format!("unsupported TIFF colour type {other:?}")),
    };
    let samples = match decoder.read_image().map_err(|e| e.to_string())? {
        DecodingResult::U8(buf) => buf,
        DecodingResult::U16(buf) => buf.iter().map(|v| (v >> 8) as u8).collect(),
        _ => return Err("unsupported TIFF sample format".into()),
    };
    to_luma(width, height, &samples, channels, false)
}

/// Interleaved samples to 8-bit luma. `bgr` swaps the colour channel order.
fn to_luma(
    width: u32,
    height: u32,
    samples: &[u8],
    channels: usize,
    bgr: bool,
) -> Result<GrayImage, String> {
    let pixels = width as usize * height as usize;
    if samples.len() < pixels * channels {
        return Err(format!(
            "truncated page: {} sample(s) for {width}x{height}x{channels}",
            samples.len()
        ));
    }
    let luma: Vec<u8> = samples
        .chunks_exact(channels)
        .take(pixels)
        .map(|px| match channels {
            1 | 2 => px[0],
            _ => {
                let (r, b) = if bgr { (px[2], px[0]) } else { (px[0], px[2]) };
                ((299 * r as u32 + 587 * px[1] as u32 + 114 * b as u32) / 1000) as u8
            }
        })
        .collect();
    GrayImage::from_raw(width, height, luma).ok_or_else(|| "page buffer size mismatch".to_string())
}

fn with_pdf<T>(
    path: &Path,
    f: impl FnOnce(&PdfDocument<'_>) -> Result<T, ScanError>,
) -> Result<T, ScanError> {
    let _guard = PDFIUM
        .lock()
        .map_err(|_| ScanError::Worker("PDF renderer lock poisoned".into()))?;
    let bindings = Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path("./"))
        .or_else(|_| Pdfium::bind_to_system_library())
        .map_err(|e| ScanError::Decode(format!("PDF input needs the pdfium library: {e:?}")))?;
    let pdfium = Pdfium::new(bindings);
    let document = pdfium
        .load_pdf_from_file(path, None)
        .map_err(|e| ScanError::Decode(format!("{}: {e:?}", path.display())))?;
    f(&document)
}

fn load_pdf_page(path: &Path, index: usize) -> Result<GrayImage, ScanError> {
    with_pdf(path, |doc| {
        let decode = |e: PdfiumError| ScanError::Decode(format!("page {}: {e:?}", index + 1));
        let page = doc.pages().get(index as PdfPageIndex).map_err(decode)?;
        let config = PdfRenderConfig::new().scale_page_by_factor(PDF_RENDER_DPI / 72.0);
        let bitmap = page.render_with_config(&config).map_err(decode)?;
        let (width, height) = (bitmap.width() as u32, bitmap.height() as u32);
        let raw = bitmap.as_raw_bytes();
        let pixels = (width as usize * height as usize).max(1);
        // pdfium hands out BGRA (or BGR / gray) rows
        to_luma(width, height, &raw, raw.len() / pixels, true).map_err(ScanError::Decode)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tiff::encoder::{colortype, TiffEncoder};

    fn write_tiff(path: &Path, pages: &[(u32, u32, u8)]) {
        let mut encoder = TiffEncoder::new(File::create(path).unwrap()).unwrap();
        for &(w, h, value) in pages {
            let data = vec![value; (w * h) as usize];
            encoder.write_image::<colortype::Gray8>(w, h, &data).unwrap();
        }
    }

    #[test]
    fn kinds_follow_extension() {
        assert_eq!(DocumentKind::of(Path::new("a.TIFF")), DocumentKind::Tiff);
        assert_eq!(DocumentKind::of(Path::new("a.pdf")), DocumentKind::Pdf);
        assert_eq!(DocumentKind::of(Path::new("a.png")), DocumentKind::Image);
        assert_eq!(DocumentKind::of(Path::new("scan")), DocumentKind::Image);
    }

    #[test]
    fn reads_each_tiff_page() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("batch.tif");
        write_tiff(&path, &[(6, 4, 10), (3, 5, 200)]);

        assert_eq!(page_count(&path).unwrap(), 2);
        let first = load_page(&path, Some(0)).unwrap();
        let second = load_page(&path, Some(1)).unwrap();
        assert_eq!(first.dimensions(), (6, 4));
        assert_eq!(first.get_pixel(0, 0)[0], 10);
        assert_eq!(second.dimensions(), (3, 5));
        assert_eq!(second.get_pixel(2, 4)[0], 200);
        assert!(matches!(load_page(&path, Some(2)), Err(ScanError::Decode(_))));
    }

    #[test]
    fn rgb_tiff_page_becomes_luma() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("colour.tiff");
        let mut encoder = TiffEncoder::new(File::create(&path).unwrap()).unwrap();
        encoder
            .write_image::<colortype::RGB8>(2, 1, &[255, 0, 0, 255, 255, 255])
            .unwrap();
        let page = load_page(&path, Some(0)).unwrap();
        assert_eq!(page.get_pixel(0, 0)[0], 76);
        assert_eq!(page.get_pixel(1, 0)[0], 255);
    }

    #[test]
    fn bgr_samples_swap_channels() {
        let page = to_luma(1, 1, &[255, 0, 0, 255], 4, true).unwrap();
        // blue weighs least
        assert_eq!(page.get_pixel(0, 0)[0], 29);
        assert!(to_luma(2, 2, &[0, 0, 0], 1, false).is_err());
    }

    #[test]
    fn broken_pdf_is_a_decode_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scans.pdf");
        std::fs::write(&path, b"%PDF-1.4 truncated").unwrap();
        assert!(matches!(load_page(&path, Some(0)), Err(ScanError::Decode(_))));
    }
}
