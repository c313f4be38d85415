// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Skew detection and correction — ordered fallback over several estimation
// strategies, with canvas-growing rotation so no corner is ever clipped.

use std::io::Read;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use image::{DynamicImage, GrayImage, Luma, Rgb, RgbImage};
use imageproc::contours::{BorderType, find_contours};
use imageproc::filter::gaussian_blur_f32;
use imageproc::geometric_transformations::{Interpolation, Projection, warp_into};
use imageproc::geometry::min_area_rect;
use imageproc::point::Point;
use scanwerk_core::error::{Result, ScanwerkError};
use scanwerk_core::types::DeskewMethod;
use tracing::{debug, info, instrument, warn};

use crate::enhance::otsu_threshold;

/// Name of the optional external deskew executable probed on PATH.
const DESKEW_TOOL: &str = "deskew";

/// Wall-clock budget for one external tool invocation. Malformed scans can
/// hang the tool, and a hung probe must degrade to the next strategy rather
/// than stall the whole batch.
const DESKEW_TOOL_TIMEOUT: Duration = Duration::from_secs(10);

/// Result of one deskew attempt.
///
/// Either `|angle| < max_angle` with the strategy that produced it, or
/// `angle == 0.0` with [`DeskewMethod::None`] and the untouched image.
#[derive(Debug)]
pub struct DeskewOutcome {
    pub image: DynamicImage,
    pub angle: f32,
    pub method: DeskewMethod,
}

/// One skew-angle estimation strategy behind a uniform interface.
trait SkewEstimator {
    fn method(&self) -> DeskewMethod;
    /// Estimate the corrective angle in degrees, or `None` when this
    /// strategy has nothing confident to offer.
    fn estimate(&self, gray: &GrayImage) -> Option<f32>;
}

/// Multi-strategy skew detector.
///
/// Strategies are tried in a fixed priority order until one yields an angle
/// within the accepted range; out-of-range estimates fall through to the
/// next strategy. The list is built once by [`SkewDetector::probe`], which
/// checks at runtime whether the optional external tool is installed —
/// absence skips that strategy, it never fails the detector.
pub struct SkewDetector {
    estimators: Vec<Box<dyn SkewEstimator + Send + Sync>>,
    max_angle: f32,
}

impl SkewDetector {
    /// Build the strategy list, probing for the external deskew tool.
    pub fn probe(max_angle: f32) -> Self {
        let mut estimators: Vec<Box<dyn SkewEstimator + Send + Sync>> = Vec::new();

        match ExternalToolEstimator::probe(DESKEW_TOOL_TIMEOUT) {
            Some(tool) => {
                info!(tool = DESKEW_TOOL, "external deskew tool available");
                estimators.push(Box::new(tool));
            }
            None => {
                debug!(
                    tool = DESKEW_TOOL,
                    "external deskew tool not found, strategy skipped"
                );
            }
        }
        estimators.push(Box::new(ContourRectEstimator));
        estimators.push(Box::new(ProjectionVarianceEstimator::default()));

        Self {
            estimators,
            max_angle,
        }
    }

    /// Build a detector from the built-in strategies only, without probing
    /// for the external tool. Deterministic regardless of the host.
    pub fn builtin(max_angle: f32) -> Self {
        Self {
            estimators: vec![
                Box::new(ContourRectEstimator),
                Box::new(ProjectionVarianceEstimator::default()),
            ],
            max_angle,
        }
    }

    /// Detect and correct the skew of `image`.
    ///
    /// Exhausting every strategy is not an error: the outcome is then the
    /// original image with angle 0 and method `none`. Only an empty image
    /// is rejected.
    #[instrument(skip(self, image), fields(width = image.width(), height = image.height()))]
    pub fn detect(&self, image: &DynamicImage) -> Result<DeskewOutcome> {
        if image.width() == 0 || image.height() == 0 {
            return Err(ScanwerkError::Input("cannot deskew an empty image".into()));
        }

        let gray = image.to_luma8();
        for estimator in &self.estimators {
            let method = estimator.method();
            let Some(angle) = estimator.estimate(&gray) else {
                debug!(%method, "strategy produced no estimate");
                continue;
            };
            if angle.abs() >= self.max_angle {
                debug!(%method, angle, max = self.max_angle, "estimate out of range, discarded");
                continue;
            }

            info!(%method, angle, "skew corrected");
            return Ok(DeskewOutcome {
                image: rotate_expanded(image, angle),
                angle,
                method,
            });
        }

        warn!("no deskew strategy produced a confident angle, image left unchanged");
        Ok(DeskewOutcome {
            image: image.clone(),
            angle: 0.0,
            method: DeskewMethod::None,
        })
    }
}

// -- Strategy 1: external projection tool -------------------------------------

/// Wraps the optional `deskew` executable (projection-profile method).
///
/// The grayscale image is written to a scratch PNG and the tool's reported
/// angle parsed from stdout, under a poll-and-kill timeout.
struct ExternalToolEstimator {
    timeout: Duration,
}

impl ExternalToolEstimator {
    /// Capability check: can the executable be spawned at all?
    fn probe(timeout: Duration) -> Option<Self> {
        match Command::new(DESKEW_TOOL)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
        {
            Ok(mut child) => {
                let _ = child.kill();
                let _ = child.wait();
                Some(Self { timeout })
            }
            Err(_) => None,
        }
    }
}

impl SkewEstimator for ExternalToolEstimator {
    fn method(&self) -> DeskewMethod {
        DeskewMethod::DeskewTool
    }

    fn estimate(&self, gray: &GrayImage) -> Option<f32> {
        let scratch = tempfile::Builder::new()
            .prefix("scanwerk-deskew-")
            .suffix(".png")
            .tempfile()
            .ok()?;
        gray.save(scratch.path()).ok()?;

        let mut child = Command::new(DESKEW_TOOL)
            .arg(scratch.path())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .ok()?;

        let deadline = Instant::now() + self.timeout;
        loop {
            match child.try_wait() {
                Ok(Some(status)) if status.success() => break,
                Ok(Some(_)) => return None,
                Ok(None) => {
                    if Instant::now() >= deadline {
                        warn!(tool = DESKEW_TOOL, "external deskew tool timed out, killed");
                        let _ = child.kill();
                        let _ = child.wait();
                        return None;
                    }
                    std::thread::sleep(Duration::from_millis(25));
                }
                Err(_) => return None,
            }
        }

        let mut output = String::new();
        child.stdout.take()?.read_to_string(&mut output).ok()?;
        parse_reported_angle(&output)
    }
}

/// Pull the angle out of the tool's report, e.g. `Skew angle found [deg]: -3.25`.
fn parse_reported_angle(stdout: &str) -> Option<f32> {
    stdout.lines().find_map(|line| {
        if !line.to_ascii_lowercase().contains("angle") {
            return None;
        }
        let (_, value) = line.rsplit_once(':')?;
        value.trim().parse::<f32>().ok()
    })
}

// -- Strategy 2: contour + minimum-area rectangle -----------------------------

/// Estimates skew from the minimum-area rectangle around the largest text
/// region. Effective for cards with well-defined text blocks or borders.
struct ContourRectEstimator;

impl SkewEstimator for ContourRectEstimator {
    fn method(&self) -> DeskewMethod {
        DeskewMethod::ContourRect
    }

    fn estimate(&self, gray: &GrayImage) -> Option<f32> {
        let blurred = gaussian_blur_f32(gray, 2.0);
        let binary = threshold_inverted(&blurred, otsu_threshold(&blurred));

        // Wide horizontal dilation fuses words and lines into solid blocks.
        let fused = dilate_rect(&dilate_rect(&binary, 15, 2), 15, 2);

        let contours = find_contours::<i32>(&fused);
        let largest = contours
            .iter()
            .filter(|c| c.border_type == BorderType::Outer)
            .max_by(|a, b| {
                shoelace_area(&a.points)
                    .partial_cmp(&shoelace_area(&b.points))
                    .unwrap_or(std::cmp::Ordering::Equal)
            })?;
        if largest.points.len() < 3 {
            return None;
        }

        let corners = min_area_rect(&largest.points);
        let tilt = rect_tilt_degrees(&corners);
        // The corrective rotation is the opposite of the measured tilt.
        Some(-tilt)
    }
}

/// Tilt of a minimum-area rectangle: the angle of its longer edge against
/// the horizontal, folded by 90-degree multiples into (-45, 45].
fn rect_tilt_degrees(corners: &[Point<i32>; 4]) -> f32 {
    let edge = |a: Point<i32>, b: Point<i32>| {
        let dx = (b.x - a.x) as f32;
        let dy = (b.y - a.y) as f32;
        (dx, dy, dx * dx + dy * dy)
    };
    let (dx1, dy1, len1) = edge(corners[0], corners[1]);
    let (dx2, dy2, len2) = edge(corners[1], corners[2]);
    let (dx, dy) = if len1 >= len2 { (dx1, dy1) } else { (dx2, dy2) };

    let mut angle = dy.atan2(dx).to_degrees();
    while angle <= -45.0 {
        angle += 90.0;
    }
    while angle > 45.0 {
        angle -= 90.0;
    }
    angle
}

/// Polygon area via the shoelace formula.
fn shoelace_area(points: &[Point<i32>]) -> f64 {
    let n = points.len();
    if n < 3 {
        return 0.0;
    }
    let mut doubled = 0.0f64;
    for i in 0..n {
        let j = (i + 1) % n;
        doubled += points[i].x as f64 * points[j].y as f64;
        doubled -= points[j].x as f64 * points[i].y as f64;
    }
    doubled.abs() / 2.0
}

// -- Strategy 3: horizontal-projection variance -------------------------------

/// Sweeps a discretized angle grid and keeps the angle whose rotation gives
/// the spikiest per-row intensity profile (text lines cleanly separated).
struct ProjectionVarianceEstimator {
    min_angle: f32,
    max_angle: f32,
    step: f32,
}

impl Default for ProjectionVarianceEstimator {
    fn default() -> Self {
        Self {
            min_angle: -10.0,
            max_angle: 10.0,
            step: 0.5,
        }
    }
}

impl SkewEstimator for ProjectionVarianceEstimator {
    fn method(&self) -> DeskewMethod {
        DeskewMethod::Projection
    }

    fn estimate(&self, gray: &GrayImage) -> Option<f32> {
        let binary = threshold_inverted(gray, otsu_threshold(gray));

        let mut best_variance = 0.0f64;
        let mut best_angle = 0.0f32;
        // Inclusive start, exclusive end, like the grid it replaces.
        let mut angle = self.min_angle;
        while angle < self.max_angle {
            let rotated = rotate_expanded_gray(&binary, angle, Luma([0]), Interpolation::Nearest);
            let variance = row_sum_variance(&rotated);
            if variance > best_variance {
                best_variance = variance;
                best_angle = angle;
            }
            angle += self.step;
        }

        if best_variance == 0.0 {
            return None;
        }
        Some(best_angle)
    }
}

/// Variance of the per-row intensity sums.
fn row_sum_variance(image: &GrayImage) -> f64 {
    let (width, height) = image.dimensions();
    if height == 0 {
        return 0.0;
    }

    let mut sums = Vec::with_capacity(height as usize);
    for y in 0..height {
        let mut row = 0u64;
        for x in 0..width {
            row += image.get_pixel(x, y).0[0] as u64;
        }
        sums.push(row as f64);
    }

    let mean = sums.iter().sum::<f64>() / sums.len() as f64;
    sums.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / sums.len() as f64
}

// -- Shared raster helpers ----------------------------------------------------

/// Inverted fixed-threshold binarization: ink (dark) becomes white.
fn threshold_inverted(gray: &GrayImage, threshold: u8) -> GrayImage {
    GrayImage::from_fn(gray.width(), gray.height(), |x, y| {
        Luma([if gray.get_pixel(x, y).0[0] <= threshold { 255 } else { 0 }])
    })
}

/// Binary dilation with a rectangular structuring element, as two separable
/// sliding-maximum passes (half-extents per axis).
fn dilate_rect(binary: &GrayImage, half_width: u32, half_height: u32) -> GrayImage {
    let (width, height) = binary.dimensions();
    let hw = half_width as i64;
    let hh = half_height as i64;

    let horizontal = GrayImage::from_fn(width, height, |x, y| {
        let x = x as i64;
        for dx in -hw..=hw {
            let sx = x + dx;
            if sx >= 0 && sx < width as i64 && binary.get_pixel(sx as u32, y).0[0] > 0 {
                return Luma([255]);
            }
        }
        Luma([0])
    });

    GrayImage::from_fn(width, height, |x, y| {
        let y = y as i64;
        for dy in -hh..=hh {
            let sy = y + dy;
            if sy >= 0 && sy < height as i64 && horizontal.get_pixel(x, sy as u32).0[0] > 0 {
                return Luma([255]);
            }
        }
        Luma([0])
    })
}

// -- Rotation -----------------------------------------------------------------

/// Rotate about the image center, growing the canvas so no corner clips:
/// `new_w = h*|sin t| + w*|cos t|`, `new_h = h*|cos t| + w*|sin t|`.
/// Exposed canvas is filled white; resampling is bicubic.
pub fn rotate_expanded(image: &DynamicImage, angle: f32) -> DynamicImage {
    if angle == 0.0 {
        return image.clone();
    }

    let rgb = image.to_rgb8();
    let theta = angle.to_radians();
    let (new_width, new_height) = expanded_dims(rgb.width(), rgb.height(), theta);
    let projection = centered_rotation(rgb.width(), rgb.height(), new_width, new_height, theta);

    let fill = Rgb([255u8, 255, 255]);
    let mut out = RgbImage::from_pixel(new_width, new_height, fill);
    warp_into(&rgb, &projection, Interpolation::Bicubic, fill, &mut out);
    DynamicImage::ImageRgb8(out)
}

/// Grayscale variant used by the projection sweep, with a caller-chosen
/// fill and interpolation.
fn rotate_expanded_gray(
    gray: &GrayImage,
    angle: f32,
    fill: Luma<u8>,
    interpolation: Interpolation,
) -> GrayImage {
    if angle == 0.0 {
        return gray.clone();
    }

    let theta = angle.to_radians();
    let (new_width, new_height) = expanded_dims(gray.width(), gray.height(), theta);
    let projection = centered_rotation(gray.width(), gray.height(), new_width, new_height, theta);

    let mut out = GrayImage::from_pixel(new_width, new_height, fill);
    warp_into(gray, &projection, interpolation, fill, &mut out);
    out
}

fn expanded_dims(width: u32, height: u32, theta: f32) -> (u32, u32) {
    let (sin, cos) = (theta.sin().abs(), theta.cos().abs());
    let new_width = (height as f32 * sin + width as f32 * cos).round().max(1.0) as u32;
    let new_height = (height as f32 * cos + width as f32 * sin).round().max(1.0) as u32;
    (new_width, new_height)
}

/// Forward mapping: rotate about the source center, then recenter on the
/// grown canvas.
fn centered_rotation(
    width: u32,
    height: u32,
    new_width: u32,
    new_height: u32,
    theta: f32,
) -> Projection {
    Projection::translate(new_width as f32 / 2.0, new_height as f32 / 2.0)
        * Projection::rotate(theta)
        * Projection::translate(-(width as f32) / 2.0, -(height as f32) / 2.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// White card with dark horizontal bars, like lines of handwriting.
    fn lined_card(width: u32, height: u32) -> DynamicImage {
        let mut img = GrayImage::from_pixel(width, height, Luma([235u8]));
        for band in (20..height.saturating_sub(20)).step_by(20) {
            for y in band..(band + 4).min(height) {
                for x in 10..width - 10 {
                    img.put_pixel(x, y, Luma([25u8]));
                }
            }
        }
        DynamicImage::ImageLuma8(img)
    }

    #[test]
    fn rotate_zero_is_identity() {
        let img = lined_card(80, 60);
        let out = rotate_expanded(&img, 0.0);
        assert_eq!((out.width(), out.height()), (80, 60));
        assert_eq!(out.to_luma8().get_pixel(40, 30), img.to_luma8().get_pixel(40, 30));
    }

    #[test]
    fn rotate_grows_canvas_to_fit() {
        let img = lined_card(100, 50);
        let out = rotate_expanded(&img, 90.0);
        assert_eq!((out.width(), out.height()), (50, 100));

        let out = rotate_expanded(&img, 45.0);
        // 50 * 0.7071 + 100 * 0.7071 ≈ 106 on both axes.
        assert_eq!((out.width(), out.height()), (106, 106));
    }

    #[test]
    fn rotate_round_trip_restores_the_image() {
        let img = lined_card(120, 90);
        let there = rotate_expanded(&img, 7.0);
        let back = rotate_expanded(&there, -7.0);

        // Compare a central window; borders carry white fill from the
        // canvas growth.
        let original = img.to_luma8();
        let restored = back.to_luma8();
        let (ox, oy) = (original.width() / 2, original.height() / 2);
        let (rx, ry) = (restored.width() / 2, restored.height() / 2);

        let mut total_diff = 0u64;
        let mut count = 0u64;
        for dy in -20i64..20 {
            for dx in -20i64..20 {
                let a = original.get_pixel((ox as i64 + dx) as u32, (oy as i64 + dy) as u32).0[0];
                let b = restored.get_pixel((rx as i64 + dx) as u32, (ry as i64 + dy) as u32).0[0];
                total_diff += a.abs_diff(b) as u64;
                count += 1;
            }
        }
        let mean_diff = total_diff as f64 / count as f64;
        assert!(mean_diff < 30.0, "mean abs diff {mean_diff}");
    }

    #[test]
    fn projection_estimator_recovers_an_applied_tilt() {
        let tilted = rotate_expanded(&lined_card(200, 140), 3.0);
        let estimator = ProjectionVarianceEstimator::default();

        let angle = estimator.estimate(&tilted.to_luma8()).expect("estimate");
        assert!((angle + 3.0).abs() <= 1.0, "expected ~-3.0, got {angle}");
    }

    #[test]
    fn projection_estimator_gives_up_on_blank_input() {
        let blank = GrayImage::from_pixel(60, 60, Luma([128u8]));
        let estimator = ProjectionVarianceEstimator::default();
        assert!(estimator.estimate(&blank).is_none());
    }

    #[test]
    fn contour_estimator_recovers_an_applied_tilt() {
        // A solid text block reads as one big rectangle to this strategy.
        let mut img = GrayImage::from_pixel(220, 160, Luma([235u8]));
        for y in 60..100 {
            for x in 40..180 {
                img.put_pixel(x, y, Luma([25u8]));
            }
        }
        let tilted = rotate_expanded(&DynamicImage::ImageLuma8(img), 4.0);

        let angle = ContourRectEstimator.estimate(&tilted.to_luma8()).expect("estimate");
        assert!((angle + 4.0).abs() <= 1.5, "expected ~-4.0, got {angle}");
    }

    #[test]
    fn detector_corrects_a_tilted_card() {
        let tilted = rotate_expanded(&lined_card(200, 140), 5.0);
        let detector = SkewDetector::builtin(45.0);

        let outcome = detector.detect(&tilted).expect("detect");
        assert_ne!(outcome.method, DeskewMethod::None);
        assert!(outcome.angle.abs() > 1.0, "angle {}", outcome.angle);
    }

    #[test]
    fn detector_returns_none_method_when_nothing_is_confident() {
        let blank = DynamicImage::ImageLuma8(GrayImage::from_pixel(50, 50, Luma([128u8])));
        let detector = SkewDetector::builtin(45.0);

        let outcome = detector.detect(&blank).expect("detect");
        assert_eq!(outcome.method, DeskewMethod::None);
        assert_eq!(outcome.angle, 0.0);
        assert_eq!((outcome.image.width(), outcome.image.height()), (50, 50));
    }

    #[test]
    fn detector_rejects_empty_input() {
        let empty = DynamicImage::ImageLuma8(GrayImage::new(0, 0));
        let detector = SkewDetector::builtin(45.0);
        assert!(detector.detect(&empty).is_err());
    }

    #[test]
    fn out_of_range_estimates_are_discarded() {
        // With a tiny max angle every estimate is out of range, so the
        // detector must fall through to the none outcome.
        let tilted = rotate_expanded(&lined_card(200, 140), 5.0);
        let detector = SkewDetector::builtin(0.1);

        let outcome = detector.detect(&tilted).expect("detect");
        assert_eq!(outcome.method, DeskewMethod::None);
        assert_eq!(outcome.angle, 0.0);
    }

    #[test]
    fn reported_angle_parsing() {
        assert_eq!(
            parse_reported_angle("Skew angle found [deg]: -3.25\n"),
            Some(-3.25)
        );
        assert_eq!(parse_reported_angle("nothing useful"), None);
        assert_eq!(parse_reported_angle("Angle: not-a-number"), None);
    }

    #[test]
    fn rect_tilt_folds_into_the_quarter_turn_range() {
        // Axis-aligned rectangle: tilt 0 whichever edge is measured.
        let corners = [
            Point::new(0, 0),
            Point::new(100, 0),
            Point::new(100, 40),
            Point::new(0, 40),
        ];
        assert_eq!(rect_tilt_degrees(&corners), 0.0);

        // The same rectangle listed with the short edge first still reads
        // as horizontal after folding.
        let corners = [
            Point::new(0, 40),
            Point::new(0, 0),
            Point::new(100, 0),
            Point::new(100, 40),
        ];
        assert_eq!(rect_tilt_degrees(&corners), 0.0);
    }
}
