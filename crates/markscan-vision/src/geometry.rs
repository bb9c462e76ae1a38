//! Geometry normalizer: fiducial detection and page homography.
//!
//! The page is binarized with its Otsu level and split into dark connected
//! components. Components shaped like printed markers (solid, not elongated)
//! become candidates whatever their size, so the page may fill the frame or
//! sit small inside it. Every four-candidate subset is matched to the
//! layout's corner anchors under all four cyclic correspondences, since the
//! page may be upside down. A hypothesis only keeps blobs whose size agrees
//! with the marker size it predicts at that spot; the remaining fiducials
//! (the orientation marker) then decide between hypotheses by inlier count
//! and cross-check the winning fit.

use image::{GrayImage, Luma};
use imageproc::contrast::otsu_level;
use imageproc::region_labelling::{connected_components, Connectivity};
use nalgebra::Matrix3;

use markscan_core::config::GeometryConfig;
use markscan_core::error::GeometryError;
use markscan_core::model::{Fiducial, Layout};

use crate::homography::{self, distance, jacobian, project};

/// Blobs smaller than this (pixels) are noise.
const MIN_BLOB_AREA: usize = 4;

/// Blobs covering more of the image than this are never markers.
const MAX_BLOB_FRACTION: f64 = 0.01;

/// Mapping from canonical sheet millimetres to scan pixels.
#[derive(Debug, Clone)]
pub struct Transform {
    /// Canonical mm → pixels.
    pub h: Matrix3<f64>,
    /// Pixels → canonical mm.
    pub inverse: Matrix3<f64>,
    /// Largest distance (mm) between a matched non-corner fiducial and where
    /// the four corner markers alone place it; 0 without such a fiducial.
    pub residual_mm: f64,
    /// Fiducials matched to a detected marker.
    pub inliers: usize,
    /// Local scale at the page centre.
    pub px_per_mm: f64,
}

impl Transform {
    pub fn to_image(&self, p: [f64; 2]) -> [f64; 2] {
        project(&self.h, p)
    }

    pub fn to_page(&self, p: [f64; 2]) -> [f64; 2] {
        project(&self.inverse, p)
    }
}

/// A dark connected component.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Blob {
    /// Centroid in pixel coordinates (pixel centres at +0.5).
    pub centroid: [f64; 2],
    pub area: usize,
    /// Area relative to a solid square with the same second moments: about 1
    /// for a filled square or disc at any rotation, low for strokes and outlines.
    pub solidity: f64,
    /// Square root of the covariance eigenvalue ratio (1 for a square).
    pub elongation: f64,
}

#[derive(Debug, Clone, Default)]
struct Moments {
    n: f64,
    sx: f64,
    sy: f64,
    sxx: f64,
    syy: f64,
    sxy: f64,
}

impl Moments {
    fn add(&mut self, x: u32, y: u32) {
        let (fx, fy) = (x as f64 + 0.5, y as f64 + 0.5);
        self.n += 1.0;
        self.sx += fx;
        self.sy += fy;
        self.sxx += fx * fx;
        self.syy += fy * fy;
        self.sxy += fx * fy;
    }

    fn blob(&self) -> Blob {
        let n = self.n;
        let (mx, my) = (self.sx / n, self.sy / n);
        let vxx = self.sxx / n - mx * mx;
        let vyy = self.syy / n - my * my;
        let vxy = self.sxy / n - mx * my;
        let half_trace = (vxx + vyy) / 2.0;
        let det = vxx * vyy - vxy * vxy;
        let disc = (half_trace * half_trace - det).max(0.0).sqrt();
        let (l_max, l_min) = (half_trace + disc, (half_trace - disc).max(1e-9));
        let spread = 12.0 * det.max(1e-9).sqrt();
        Blob {
            centroid: [mx, my],
            area: n as usize,
            solidity: n / spread,
            elongation: (l_max / l_min).sqrt(),
        }
    }
}

/// Dark connected components of `image` (pixels at or below `level`).
pub fn detect_blobs(image: &GrayImage, level: u8) -> Vec<Blob> {
    let (w, h) = image.dimensions();
    let mask = GrayImage::from_fn(w, h, |x, y| {
        if image.get_pixel(x, y)[0] <= level {
            Luma([255u8])
        } else {
            Luma([0u8])
        }
    });
    let labels = connected_components(&mask, Connectivity::Eight, Luma([0u8]));

    let mut moments: Vec<Moments> = Vec::new();
    for (x, y, label) in labels.enumerate_pixels() {
        let label = label[0] as usize;
        if label == 0 {
            continue;
        }
        if label >= moments.len() {
            moments.resize(label + 1, Moments::default());
        }
        moments[label].add(x, y);
    }

    moments
        .iter()
        .filter(|m| m.n as usize >= MIN_BLOB_AREA)
        .map(Moments::blob)
        .collect()
}

/// Marker-shaped blobs, largest first.
///
/// Size is not judged here: only a page hypothesis knows how large a marker
/// should appear.
pub fn marker_candidates(image: &GrayImage, config: &GeometryConfig) -> Vec<Blob> {
    let (w, h) = image.dimensions();
    let max_area = (w as f64 * h as f64 * MAX_BLOB_FRACTION).max(MIN_BLOB_AREA as f64);
    let level = otsu_level(image);
    let mut candidates: Vec<Blob> = detect_blobs(image, level)
        .into_iter()
        .filter(|b| {
            b.area as f64 <= max_area
                && b.solidity >= config.min_solidity
                && b.elongation <= config.max_elongation
        })
        .collect();
    candidates.sort_by(|a, b| {
        b.area
            .cmp(&a.area)
            .then(b.solidity.total_cmp(&a.solidity))
    });
    candidates
}

/// Pixels per millimetre of `h` around canonical point `p`.
fn local_scale(h: &Matrix3<f64>, p: [f64; 2]) -> f64 {
    jacobian(h, p).determinant().abs().sqrt()
}

/// Whether `blob` could be the marker `fiducial` under `h`.
fn size_fits(
    h: &Matrix3<f64>,
    fiducial: &Fiducial,
    blob: &Blob,
    config: &GeometryConfig,
) -> bool {
    let expected = fiducial.size * local_scale(h, fiducial.center);
    if !expected.is_finite() || expected <= 0.0 {
        return false;
    }
    let ratio = (blob.area as f64).sqrt() / expected;
    ratio >= config.min_scale && ratio <= config.max_scale
}

#[derive(Debug, Clone)]
struct Hypothesis {
    h: Matrix3<f64>,
    /// (fiducial index, candidate index)
    matches: Vec<(usize, usize)>,
    rms_px: f64,
    anisotropy: f64,
    rotation: f64,
}

impl Hypothesis {
    /// Ordering: more inliers, lower RMS, less anisotropy, less rotation.
    fn better_than(&self, other: &Hypothesis) -> bool {
        other
            .matches
            .len()
            .cmp(&self.matches.len())
            .then(self.rms_px.total_cmp(&other.rms_px))
            .then(self.anisotropy.total_cmp(&other.anisotropy))
            .then(self.rotation.total_cmp(&other.rotation))
            .is_lt()
    }
}

/// One-to-one nearest matching of projected fiducials to candidates of a
/// plausible size.
fn match_fiducials(
    h: &Matrix3<f64>,
    fiducials: &[Fiducial],
    candidates: &[Blob],
    config: &GeometryConfig,
) -> Vec<(usize, usize, f64)> {
    let mut pairs = Vec::new();
    for (fi, f) in fiducials.iter().enumerate() {
        let p = project(h, f.center);
        if !p[0].is_finite() || !p[1].is_finite() {
            continue;
        }
        let tolerance_px = config.match_tolerance * f.size * local_scale(h, f.center);
        for (ci, c) in candidates.iter().enumerate() {
            let d = distance(p, c.centroid);
            if d <= tolerance_px && size_fits(h, f, c, config) {
                pairs.push((fi, ci, d));
            }
        }
    }
    pairs.sort_by(|a, b| a.2.total_cmp(&b.2));

    let mut used_f = vec![false; fiducials.len()];
    let mut used_c = vec![false; candidates.len()];
    let mut matches = Vec::new();
    for (fi, ci, d) in pairs {
        if !used_f[fi] && !used_c[ci] {
            used_f[fi] = true;
            used_c[ci] = true;
            matches.push((fi, ci, d));
        }
    }
    matches
}

fn evaluate(
    h: Matrix3<f64>,
    fiducials: &[Fiducial],
    candidates: &[Blob],
    config: &GeometryConfig,
    page_center: [f64; 2],
) -> Option<Hypothesis> {
    let j = jacobian(&h, page_center);
    let det = j.determinant();
    // A mirrored mapping cannot come from paper.
    if !det.is_finite() || det <= 0.0 {
        return None;
    }
    let jtj = j.transpose() * j;
    let half_trace = jtj.trace() / 2.0;
    let disc = (half_trace * half_trace - jtj.determinant()).max(0.0).sqrt();
    let s_max = (half_trace + disc).sqrt();
    let s_min = (half_trace - disc).max(1e-12).sqrt();

    let matched = match_fiducials(&h, fiducials, candidates, config);
    let rms_px = if matched.is_empty() {
        f64::INFINITY
    } else {
        (matched.iter().map(|m| m.2 * m.2).sum::<f64>() / matched.len() as f64).sqrt()
    };
    Some(Hypothesis {
        h,
        matches: matched.iter().map(|m| (m.0, m.1)).collect(),
        rms_px,
        anisotropy: s_max / s_min - 1.0,
        rotation: j[(1, 0)].atan2(j[(0, 0)]).abs(),
    })
}

/// Indices of four points in clockwise order (on screen, y down).
fn angular_order(points: &[[f64; 2]; 4]) -> [usize; 4] {
    let cx = points.iter().map(|p| p[0]).sum::<f64>() / 4.0;
    let cy = points.iter().map(|p| p[1]).sum::<f64>() / 4.0;
    let angle = |p: [f64; 2]| (p[1] - cy).atan2(p[0] - cx);
    let mut order = [0, 1, 2, 3];
    order.sort_by(|&a, &b| angle(points[a]).total_cmp(&angle(points[b])));
    order
}

/// Twice the largest triangle area spanned by the points.
fn spread(points: &[[f64; 2]]) -> f64 {
    let mut best = 0.0f64;
    for i in 0..points.len() {
        for j in i + 1..points.len() {
            for k in j + 1..points.len() {
                let [a, b, c] = [points[i], points[j], points[k]];
                let cross = (b[0] - a[0]) * (c[1] - a[1]) - (b[1] - a[1]) * (c[0] - a[0]);
                best = best.max(cross.abs());
            }
        }
    }
    best
}

/// Compute the canonical-mm → pixel transform of a scanned page.
pub fn normalize(
    image: &GrayImage,
    layout: &Layout,
    config: &GeometryConfig,
) -> Result<Transform, GeometryError> {
    let fiducials = &layout.fiducials;
    let required = config.required_markers(fiducials.len());
    let candidates = marker_candidates(image, config);
    tracing::debug!("{} marker candidate(s)", candidates.len());
    if candidates.len() < required {
        return Err(GeometryError::TooFewMarkers {
            found: candidates.len(),
            required,
        });
    }
    let anchors = layout.anchor_indices().ok_or(GeometryError::Degenerate)?;
    let anchor_pts = anchors.map(|i| fiducials[i].center);
    let page_center = [layout.page.width / 2.0, layout.page.height / 2.0];

    let top = &candidates[..candidates.len().min(config.max_candidates.max(4))];
    let mut best: Option<Hypothesis> = None;
    for a in 0..top.len() {
        for b in a + 1..top.len() {
            for c in b + 1..top.len() {
                for d in c + 1..top.len() {
                    let quad = [a, b, c, d];
                    let order = angular_order(&quad.map(|i| top[i].centroid));
                    for shift in 0..4 {
                        let picked: [usize; 4] =
                            std::array::from_fn(|i| quad[order[(i + shift) % 4]]);
                        let dst = picked.map(|i| top[i].centroid);
                        let Some(hm) = homography::estimate(&anchor_pts, &dst) else {
                            continue;
                        };
                        let anchors_fit = anchors
                            .iter()
                            .zip(&picked)
                            .all(|(&f, &ci)| size_fits(&hm, &fiducials[f], &top[ci], config));
                        if !anchors_fit {
                            continue;
                        }
                        let Some(hyp) = evaluate(hm, fiducials, &candidates, config, page_center)
                        else {
                            continue;
                        };
                        if best.as_ref().map_or(true, |b| hyp.better_than(b)) {
                            best = Some(hyp);
                        }
                    }
                }
            }
        }
    }

    let best = best.ok_or(GeometryError::TooFewMarkers {
        found: 0,
        required,
    })?;
    if best.matches.len() < required {
        return Err(GeometryError::TooFewMarkers {
            found: best.matches.len(),
            required,
        });
    }

    let src: Vec<[f64; 2]> = best.matches.iter().map(|&(f, _)| fiducials[f].center).collect();
    let dst: Vec<[f64; 2]> = best
        .matches
        .iter()
        .map(|&(_, c)| candidates[c].centroid)
        .collect();
    let page_area = layout.page.width * layout.page.height;
    if spread(&src) < 1e-3 * page_area {
        return Err(GeometryError::Degenerate);
    }

    // The corner fit passes exactly through the four anchors; every other
    // matched fiducial must land where it predicts.
    let corner_inverse = best.h.try_inverse().ok_or(GeometryError::Degenerate)?;
    let residual_mm = best
        .matches
        .iter()
        .filter(|(f, _)| !anchors.contains(f))
        .map(|&(f, c)| {
            let seen = project(&corner_inverse, candidates[c].centroid);
            distance(seen, fiducials[f].center)
        })
        .fold(0.0, f64::max);
    if !residual_mm.is_finite() {
        return Err(GeometryError::Degenerate);
    }
    if residual_mm > config.max_residual_mm {
        return Err(GeometryError::ResidualTooHigh {
            residual: residual_mm,
            max: config.max_residual_mm,
        });
    }

    let refined = homography::estimate(&src, &dst).unwrap_or(best.h);
    let inverse = refined.try_inverse().ok_or(GeometryError::Degenerate)?;
    let px_per_mm = local_scale(&refined, page_center);
    tracing::debug!(
        "page transform: {} inlier(s), residual {:.3}mm, {:.2}px/mm",
        src.len(),
        residual_mm,
        px_per_mm
    );
    Ok(Transform {
        h: refined,
        inverse,
        residual_mm,
        inliers: src.len(),
        px_per_mm,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use markscan_core::model::SheetSpec;

    fn page_with_squares(squares: &[(u32, u32, u32)]) -> GrayImage {
        canvas_with_squares(210, 297, squares)
    }

    fn canvas_with_squares(width: u32, height: u32, squares: &[(u32, u32, u32)]) -> GrayImage {
        let mut img = GrayImage::from_pixel(width, height, Luma([255]));
        for &(x0, y0, side) in squares {
            for y in y0..y0 + side {
                for x in x0..x0 + side {
                    img.put_pixel(x, y, Luma([0]));
                }
            }
        }
        img
    }

    #[test]
    fn square_blob_stats() {
        let img = page_with_squares(&[(10, 20, 8)]);
        let blobs = detect_blobs(&img, 128);
        assert_eq!(blobs.len(), 1);
        let b = blobs[0];
        assert_eq!(b.area, 64);
        assert!((b.centroid[0] - 14.0).abs() < 1e-9);
        assert!((b.centroid[1] - 24.0).abs() < 1e-9);
        assert!((b.solidity - 1.0).abs() < 0.05);
        assert!((b.elongation - 1.0).abs() < 1e-6);
    }

    fn layout() -> Layout {
        Layout::standard("1", &SheetSpec::uniform(5, 4, &["1"])).unwrap()
    }

    /// Marker squares of `layout` drawn at `scale` px/mm, offset by `origin`,
    /// with fiducial `moved` displaced by `shift` pixels.
    fn markers(
        layout: &Layout,
        scale: u32,
        origin: (u32, u32),
        moved: Option<(usize, u32)>,
    ) -> Vec<(u32, u32, u32)> {
        layout
            .fiducials
            .iter()
            .enumerate()
            .map(|(i, f)| {
                let shift = match moved {
                    Some((m, dx)) if m == i => dx,
                    _ => 0,
                };
                let x = (f.center[0] - f.size / 2.0) as u32 * scale + origin.0 + shift;
                let y = (f.center[1] - f.size / 2.0) as u32 * scale + origin.1;
                (x, y, f.size as u32 * scale)
            })
            .collect()
    }

    #[test]
    fn elongated_blob_is_not_a_candidate() {
        let mut img = page_with_squares(&[(10, 10, 8)]);
        for y in 100..104 {
            for x in 50..66 {
                img.put_pixel(x, y, Luma([0]));
            }
        }
        let candidates = marker_candidates(&img, &GeometryConfig::default());
        assert_eq!(candidates.len(), 1);
        assert!((candidates[0].centroid[0] - 14.0).abs() < 1e-9);
    }

    #[test]
    fn hollow_outline_is_not_solid() {
        let mut img = GrayImage::from_pixel(60, 60, Luma([255]));
        for i in 10..50 {
            for t in [10, 49] {
                img.put_pixel(i, t, Luma([0]));
                img.put_pixel(t, i, Luma([0]));
            }
        }
        let blobs = detect_blobs(&img, 128);
        assert_eq!(blobs.len(), 1);
        assert!(blobs[0].solidity < 0.3);
    }

    #[test]
    fn candidates_are_ranked_by_size_not_frame() {
        // a marker much larger than the frame would suggest still comes first
        let img = page_with_squares(&[(10, 10, 6), (100, 100, 20), (150, 20, 10)]);
        let candidates = marker_candidates(&img, &GeometryConfig::default());
        let areas: Vec<usize> = candidates.iter().map(|b| b.area).collect();
        assert_eq!(areas, vec![400, 100, 36]);
    }

    #[test]
    fn page_sized_blob_is_not_a_candidate() {
        let img = page_with_squares(&[(20, 20, 150)]);
        assert!(marker_candidates(&img, &GeometryConfig::default()).is_empty());
    }

    #[test]
    fn blank_page_has_too_few_markers() {
        let img = GrayImage::from_pixel(210, 297, Luma([250]));
        let err = normalize(&img, &layout(), &GeometryConfig::default()).unwrap_err();
        // four corners plus the orientation marker
        assert!(matches!(err, GeometryError::TooFewMarkers { found: 0, required: 5 }));
    }

    #[test]
    fn identity_page_at_one_px_per_mm() {
        let layout = layout();
        let img = page_with_squares(&markers(&layout, 1, (0, 0), None));
        let t = normalize(&img, &layout, &GeometryConfig::default()).unwrap();
        assert_eq!(t.inliers, 5);
        assert!(t.residual_mm < 1e-6);
        assert!((t.px_per_mm - 1.0).abs() < 1e-6);
        let p = t.to_image([105.0, 150.0]);
        assert!(distance(p, [105.0, 150.0]) < 1e-6);
    }

    #[test]
    fn small_page_inside_a_large_frame() {
        // 2 px/mm page pasted at (300, 200) of a 1200x1000 frame
        let layout = layout();
        let img = canvas_with_squares(1200, 1000, &markers(&layout, 2, (300, 200), None));
        let t = normalize(&img, &layout, &GeometryConfig::default()).unwrap();
        assert_eq!(t.inliers, 5);
        assert!((t.px_per_mm - 2.0).abs() < 1e-6);
        let p = t.to_image([14.0, 14.0]);
        assert!(distance(p, [328.0, 228.0]) < 1e-6);
    }

    #[test]
    fn misplaced_orientation_marker_is_rejected() {
        // the orientation marker is the fifth fiducial; 3mm off is within the
        // match radius but beyond the residual limit
        let layout = layout();
        let img = page_with_squares(&markers(&layout, 1, (0, 0), Some((4, 3))));
        let err = normalize(&img, &layout, &GeometryConfig::default()).unwrap_err();
        match err {
            GeometryError::ResidualTooHigh { residual, max } => {
                assert!((residual - 3.0).abs() < 1e-6);
                assert_eq!(max, 2.0);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn small_orientation_offset_is_tolerated() {
        let layout = layout();
        let img = page_with_squares(&markers(&layout, 1, (0, 0), Some((4, 1))));
        let t = normalize(&img, &layout, &GeometryConfig::default()).unwrap();
        assert_eq!(t.inliers, 5);
        assert!((t.residual_mm - 1.0).abs() < 1e-6);
    }

    #[test]
    fn angular_order_is_clockwise_from_top() {
        let points = [[0.0, 10.0], [10.0, 0.0], [0.0, 0.0], [10.0, 10.0]];
        let order = angular_order(&points);
        // top-left, top-right, bottom-right, bottom-left (up to a cyclic shift)
        let start = order.iter().position(|&i| points[i] == [0.0, 0.0]).unwrap();
        let cyc: Vec<[f64; 2]> = (0..4).map(|i| points[order[(start + i) % 4]]).collect();
        assert_eq!(cyc, vec![[0.0, 0.0], [10.0, 0.0], [10.0, 10.0], [0.0, 10.0]]);
    }
}
