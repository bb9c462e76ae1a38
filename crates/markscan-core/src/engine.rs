//! Central correction orchestrator.
//!
//! Reads a batch of scans in parallel on the blocking pool, then scores the
//! collected results in a single pass. A scan that cannot be read becomes an
//! unreadable row; only fatal conditions stop the batch.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use futures::stream::{FuturesUnordered, StreamExt};
use image::GrayImage;
use tokio::sync::Semaphore;

use crate::config::ScoringConfig;
use crate::error::ScanError;
use crate::model::ExamBundle;
use crate::pages::{self, DocumentKind};
use crate::report::ResultRow;
use crate::results::RawResult;
use crate::scoring::score;
use crate::traits::{GlyphRecognizer, SheetReader};

/// Extensions picked up from an input directory.
pub const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "tif", "tiff", "bmp", "pdf"];

/// Configuration for the correction engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Maximum scans decoded and read at once.
    pub parallelism: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            parallelism: default_parallelism(),
        }
    }
}

/// Number of available CPUs (at least 1).
pub fn default_parallelism() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// One page image to correct.
#[derive(Debug, Clone)]
pub struct ScanSource {
    /// Name used in the results table: the file name, with `:pNNN` appended
    /// for a page of a multi-page document.
    pub name: String,
    pub path: PathBuf,
    /// Zero-based page inside a multi-page document.
    pub page: Option<usize>,
}

impl ScanSource {
    pub fn from_path(path: &Path) -> Self {
        Self {
            name: file_name(path),
            path: path.to_path_buf(),
            page: None,
        }
    }

    /// Page `index` of a document with `total` pages.
    pub fn page_of(path: &Path, index: usize, total: usize) -> Self {
        let width = total.to_string().len().max(3);
        Self {
            name: format!("{}:p{:0width$}", file_name(path), index + 1),
            path: path.to_path_buf(),
            page: Some(index),
        }
    }

    /// Decode this page as grayscale.
    pub fn load(&self) -> Result<GrayImage, ScanError> {
        pages::load_page(&self.path, self.page)
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// One source per page of `path`.
///
/// A document whose pages cannot be counted stays a single source, so the
/// failure is reported when it is read.
fn expand_pages(path: &Path) -> Vec<ScanSource> {
    let kind = DocumentKind::of(path);
    if kind == DocumentKind::Image {
        return vec![ScanSource::from_path(path)];
    }
    match pages::page_count(path) {
        Ok(1) if kind == DocumentKind::Tiff => vec![ScanSource::from_path(path)],
        Ok(1) => vec![ScanSource {
            page: Some(0),
            ..ScanSource::from_path(path)
        }],
        Ok(n) if n > 1 => (0..n).map(|i| ScanSource::page_of(path, i, n)).collect(),
        Ok(_) => {
            tracing::warn!("{} has no pages", path.display());
            Vec::new()
        }
        Err(e) => {
            tracing::warn!("cannot count pages of {}: {e}", path.display());
            vec![ScanSource {
                page: (kind == DocumentKind::Pdf).then_some(0),
                ..ScanSource::from_path(path)
            }]
        }
    }
}

/// Collect scans from an image, a multi-page document or a directory of
/// either (non-recursive, sorted). Every document page is its own scan.
pub fn collect_scans(input: &Path) -> Result<Vec<ScanSource>> {
    if input.is_file() {
        return Ok(expand_pages(input));
    }
    if !input.is_dir() {
        anyhow::bail!("input not found: {}", input.display());
    }
    let mut scans = Vec::new();
    for entry in std::fs::read_dir(input)
        .map_err(|e| anyhow::anyhow!("failed to read directory {}: {e}", input.display()))?
    {
        let path = entry?.path();
        let is_image = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| IMAGE_EXTENSIONS.contains(&e.to_lowercase().as_str()));
        if path.is_file() && is_image {
            scans.extend(expand_pages(&path));
        } else if path.is_file() {
            tracing::debug!("ignoring {}", path.display());
        }
    }
    scans.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(scans)
}

/// Progress reporting trait.
pub trait ProgressReporter: Send + Sync {
    fn on_scan_start(&self, scan: &str);
    fn on_scan_complete(&self, result: &RawResult);
    fn on_scan_error(&self, scan: &str, error: &str);
    fn on_batch_complete(&self, total: usize, readable: usize, unreadable: usize, elapsed: Duration);
}

/// No-op progress reporter.
pub struct NoopReporter;

impl ProgressReporter for NoopReporter {
    fn on_scan_start(&self, _: &str) {}
    fn on_scan_complete(&self, _: &RawResult) {}
    fn on_scan_error(&self, _: &str, _: &str) {}
    fn on_batch_complete(&self, _: usize, _: usize, _: usize, _: Duration) {}
}

/// The correction engine.
pub struct CorrectionEngine {
    reader: Arc<dyn SheetReader>,
    recognizer: Arc<dyn GlyphRecognizer>,
    config: EngineConfig,
}

impl CorrectionEngine {
    pub fn new(
        reader: Arc<dyn SheetReader>,
        recognizer: Arc<dyn GlyphRecognizer>,
        config: EngineConfig,
    ) -> Self {
        Self {
            reader,
            recognizer,
            config,
        }
    }

    /// Read every scan. Results come back ordered by scan name.
    pub async fn read_scans(
        &self,
        exam: Arc<ExamBundle>,
        scans: &[ScanSource],
        progress: &dyn ProgressReporter,
    ) -> Result<Vec<RawResult>> {
        let start = Instant::now();
        let semaphore = Arc::new(Semaphore::new(self.config.parallelism.max(1)));
        let mut futures = FuturesUnordered::new();

        tracing::info!(
            "reading {} scan(s) with {} worker(s), recognizer '{}'",
            scans.len(),
            self.config.parallelism.max(1),
            self.recognizer.name()
        );

        for scan in scans {
            progress.on_scan_start(&scan.name);
            let reader = Arc::clone(&self.reader);
            let recognizer = Arc::clone(&self.recognizer);
            let exam = Arc::clone(&exam);
            let semaphore = Arc::clone(&semaphore);
            let scan = scan.clone();

            futures.push(async move {
                let name = scan.name.clone();
                let inner = async move {
                    let permit = semaphore
                        .acquire_owned()
                        .await
                        .map_err(|_| ScanError::Worker("semaphore closed".into()))?;
                    tokio::task::spawn_blocking(move || {
                        let _permit = permit;
                        tracing::debug!("reading {}", scan.name);
                        let image = scan.load()?;
                        reader.read_sheet(&scan.name, &image, &exam, recognizer.as_ref())
                    })
                    .await
                    .map_err(|e| ScanError::Worker(e.to_string()))?
                };
                (name, inner.await)
            });
        }

        let mut results = Vec::with_capacity(scans.len());
        let mut unreadable = 0usize;
        let total = futures.len();

        while let Some((name, result)) = futures.next().await {
            match result {
                Ok(raw) => {
                    progress.on_scan_complete(&raw);
                    results.push(raw);
                }
                Err(e) if e.is_fatal() => {
                    tracing::error!("scan {name}: {e}");
                    anyhow::bail!("scan {name}: {e}");
                }
                Err(e) => {
                    tracing::error!("scan {name} unreadable: {e}");
                    progress.on_scan_error(&name, &e.to_string());
                    results.push(RawResult::unreadable(name, e.to_string()));
                    unreadable += 1;
                }
            }
        }

        results.sort_by(|a, b| a.scan.cmp(&b.scan));
        let elapsed = start.elapsed();
        progress.on_batch_complete(total, total - unreadable, unreadable, elapsed);
        tracing::info!(
            "read {total} scan(s) in {:.1}s, {unreadable} unreadable",
            elapsed.as_secs_f64()
        );
        Ok(results)
    }
}

/// Score every readable result against its model's key.
///
/// A result naming a model the exam does not have is fatal.
pub fn grade(raws: Vec<RawResult>, exam: &ExamBundle, scoring: &ScoringConfig) -> Result<Vec<ResultRow>> {
    raws.into_iter()
        .map(|raw| {
            let mut row = ResultRow::new(raw);
            if !row.raw.is_readable() {
                return Ok(row);
            }
            let model = match (&row.raw.model, exam.single_model()) {
                (Some(m), _) => m.clone(),
                (None, Some(only)) => only.to_string(),
                (None, None) => anyhow::bail!(
                    "scan {}: no exam model recorded and the exam has {} models",
                    row.raw.scan,
                    exam.models.len()
                ),
            };
            let Some(exam_model) = exam.model(&model) else {
                anyhow::bail!(
                    "scan {}: unknown exam model '{model}' (known: {})",
                    row.raw.scan,
                    exam.model_ids().join(", ")
                );
            };
            row.mark = score(&row.raw, &exam_model.key, scoring);
            Ok(row)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    use crate::error::{GeometryError, RecognizerError};
    use crate::model::{ExamModel, KeyEntry, Layout, SheetSpec, SolutionKey};
    use crate::results::{Answer, ScanStatus};
    use crate::traits::{FieldImage, Recognition};

    struct FixedRecognizer;

    impl GlyphRecognizer for FixedRecognizer {
        fn name(&self) -> &str {
            "fixed"
        }
        fn recognize(&self, _: &FieldImage) -> Result<Recognition, RecognizerError> {
            Ok(Recognition::empty())
        }
    }

    /// Reads every sheet as all-A, except names containing "bad" or "alien".
    struct StubReader {
        calls: AtomicU32,
    }

    impl SheetReader for StubReader {
        fn read_sheet(
            &self,
            scan: &str,
            _image: &GrayImage,
            _exam: &ExamBundle,
            _recognizer: &dyn GlyphRecognizer,
        ) -> Result<RawResult, ScanError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if scan.contains("bad") {
                return Err(GeometryError::TooFewMarkers { found: 1, required: 4 }.into());
            }
            if scan.contains("alien") {
                return Err(ScanError::MissingLayout { model: "Z".into() });
            }
            let mut raw = RawResult::unreadable(scan, "");
            raw.status = ScanStatus::Ok;
            raw.model = Some("1".into());
            raw.answers = (1..=3).map(|q| (q, Answer::Option(0))).collect();
            Ok(raw)
        }
    }

    fn exam() -> ExamBundle {
        let layout = Layout::standard("1", &SheetSpec::uniform(3, 4, &["1"])).unwrap();
        let key = SolutionKey {
            model: "1".into(),
            questions: (1..=3)
                .map(|n| KeyEntry {
                    number: n,
                    original_id: None,
                    correct: if n == 3 { 1 } else { 0 },
                    weight: 1.0,
                    options: None,
                })
                .collect(),
        };
        let mut b = ExamBundle::default();
        b.models.insert("1".into(), ExamModel { layout, key });
        b
    }

    fn write_scans(dir: &Path, names: &[&str]) -> Vec<ScanSource> {
        names
            .iter()
            .map(|n| {
                let path = dir.join(n);
                GrayImage::from_pixel(4, 4, image::Luma([255])).save(&path).unwrap();
                ScanSource::from_path(&path)
            })
            .collect()
    }

    fn engine(reader: Arc<StubReader>) -> CorrectionEngine {
        CorrectionEngine::new(reader, Arc::new(FixedRecognizer), EngineConfig { parallelism: 2 })
    }

    #[tokio::test]
    async fn failed_scans_do_not_stop_the_batch() {
        let dir = tempfile::tempdir().unwrap();
        let scans = write_scans(dir.path(), &["c.png", "a.png", "bad.png"]);
        let reader = Arc::new(StubReader {
            calls: AtomicU32::new(0),
        });
        let raws = engine(Arc::clone(&reader))
            .read_scans(Arc::new(exam()), &scans, &NoopReporter)
            .await
            .unwrap();
        assert_eq!(reader.calls.load(Ordering::SeqCst), 3);
        let names: Vec<&str> = raws.iter().map(|r| r.scan.as_str()).collect();
        assert_eq!(names, vec!["a.png", "bad.png", "c.png"]);
        assert!(!raws[1].is_readable());
        assert!(raws[0].is_readable() && raws[2].is_readable());
    }

    #[tokio::test]
    async fn undecodable_file_is_unreadable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.png");
        std::fs::write(&path, b"not an image").unwrap();
        let reader = Arc::new(StubReader {
            calls: AtomicU32::new(0),
        });
        let raws = engine(Arc::clone(&reader))
            .read_scans(Arc::new(exam()), &[ScanSource::from_path(&path)], &NoopReporter)
            .await
            .unwrap();
        assert_eq!(reader.calls.load(Ordering::SeqCst), 0);
        assert!(matches!(raws[0].status, ScanStatus::Unreadable { .. }));
    }

    #[tokio::test]
    async fn missing_layout_aborts() {
        let dir = tempfile::tempdir().unwrap();
        let scans = write_scans(dir.path(), &["alien.png"]);
        let reader = Arc::new(StubReader {
            calls: AtomicU32::new(0),
        });
        let err = engine(reader)
            .read_scans(Arc::new(exam()), &scans, &NoopReporter)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no layout for exam model 'Z'"));
    }

    #[test]
    fn grade_scores_readable_rows() {
        let mut ok = RawResult::unreadable("a.png", "");
        ok.status = ScanStatus::Ok;
        ok.answers = (1..=3).map(|q| (q, Answer::Option(0))).collect();
        let rows = grade(
            vec![ok, RawResult::unreadable("b.png", "blur")],
            &exam(),
            &ScoringConfig::default(),
        )
        .unwrap();
        let mark = rows[0].mark.as_ref().unwrap();
        assert_eq!(mark.correct, 2);
        assert_eq!(mark.wrong, 1);
        assert!(rows[1].mark.is_none());
    }

    #[test]
    fn grade_rejects_unknown_model() {
        let mut raw = RawResult::unreadable("a.png", "");
        raw.status = ScanStatus::Ok;
        raw.model = Some("7".into());
        let err = grade(vec![raw], &exam(), &ScoringConfig::default()).unwrap_err();
        assert!(err.to_string().contains("unknown exam model '7'"));
    }

    #[test]
    fn collect_scans_filters_and_sorts() {
        let dir = tempfile::tempdir().unwrap();
        write_scans(dir.path(), &["b.png", "a.jpg"]);
        std::fs::write(dir.path().join("c.TIF"), "x").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "x").unwrap();
        let scans = collect_scans(dir.path()).unwrap();
        let names: Vec<&str> = scans.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["a.jpg", "b.png", "c.TIF"]);
    }

    fn write_two_page_tiff(path: &Path) {
        use tiff::encoder::{colortype, TiffEncoder};
        let mut encoder = TiffEncoder::new(std::fs::File::create(path).unwrap()).unwrap();
        for _ in 0..2 {
            encoder
                .write_image::<colortype::Gray8>(4, 4, &[255u8; 16])
                .unwrap();
        }
    }

    #[test]
    fn multi_page_document_expands_to_one_scan_per_page() {
        let dir = tempfile::tempdir().unwrap();
        write_scans(dir.path(), &["a.png"]);
        write_two_page_tiff(&dir.path().join("batch.tif"));
        let scans = collect_scans(dir.path()).unwrap();
        let names: Vec<&str> = scans.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["a.png", "batch.tif:p001", "batch.tif:p002"]);
        assert_eq!(scans[2].page, Some(1));
        assert_eq!(scans[2].load().unwrap().dimensions(), (4, 4));

        // a single document given directly expands the same way
        let single = collect_scans(&dir.path().join("batch.tif")).unwrap();
        assert_eq!(single.len(), 2);
    }

    #[tokio::test]
    async fn every_document_page_is_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("batch.tiff");
        write_two_page_tiff(&path);
        let scans = collect_scans(&path).unwrap();
        let reader = Arc::new(StubReader {
            calls: AtomicU32::new(0),
        });
        let raws = engine(Arc::clone(&reader))
            .read_scans(Arc::new(exam()), &scans, &NoopReporter)
            .await
            .unwrap();
        assert_eq!(reader.calls.load(Ordering::SeqCst), 2);
        let names: Vec<&str> = raws.iter().map(|r| r.scan.as_str()).collect();
        assert_eq!(names, vec!["batch.tiff:p001", "batch.tiff:p002"]);
        assert!(raws.iter().all(|r| r.is_readable()));
    }

    #[tokio::test]
    async fn unreadable_pdf_is_an_unreadable_row() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scans.pdf");
        std::fs::write(&path, b"%PDF-1.4 truncated").unwrap();
        let scans = collect_scans(dir.path()).unwrap();
        assert_eq!(scans.len(), 1);
        let reader = Arc::new(StubReader {
            calls: AtomicU32::new(0),
        });
        let raws = engine(Arc::clone(&reader))
            .read_scans(Arc::new(exam()), &scans, &NoopReporter)
            .await
            .unwrap();
        assert_eq!(reader.calls.load(Ordering::SeqCst), 0);
        assert!(matches!(raws[0].status, ScanStatus::Unreadable { .. }));
    }
}
