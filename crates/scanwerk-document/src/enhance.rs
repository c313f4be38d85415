// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// OCR enhancement pipeline — adaptive contrast, non-local denoising, unsharp
// sharpening, adaptive binarization, and quality scoring for scanned record
// cards.

use image::{DynamicImage, GrayImage, Luma, Rgb, RgbImage};
use imageproc::contours::find_contours;
use imageproc::filter::gaussian_blur_f32;
use scanwerk_core::config::EnhanceOptions;
use scanwerk_core::error::{Result, ScanwerkError};
use scanwerk_core::types::QualityReport;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

/// One enhancement stage. The serialized names are recorded in the metadata
/// document consumed by the fiche import pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EnhanceStage {
    #[serde(rename = "clahe")]
    Contrast,
    #[serde(rename = "denoise")]
    Denoise,
    #[serde(rename = "sharpen")]
    Sharpen,
    #[serde(rename = "binarize")]
    Binarize,
}

impl EnhanceStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Contrast => "clahe",
            Self::Denoise => "denoise",
            Self::Sharpen => "sharpen",
            Self::Binarize => "binarize",
        }
    }
}

impl std::fmt::Display for EnhanceStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An enhanced image together with the stages that actually ran, in order.
#[derive(Debug)]
pub struct EnhancementResult {
    pub image: DynamicImage,
    pub stages: Vec<EnhanceStage>,
}

/// Run the OCR enhancement pipeline on `image`.
///
/// The stage order is fixed (contrast, denoise, sharpen, binarize); each is
/// independently toggleable through [`EnhanceOptions`]. Returns the enhanced
/// image plus the list of stages that ran. Only a zero-sized input is an
/// error.
#[instrument(skip(image, options), fields(width = image.width(), height = image.height()))]
pub fn optimize_for_ocr(
    image: &DynamicImage,
    options: &EnhanceOptions,
) -> Result<EnhancementResult> {
    if image.width() == 0 || image.height() == 0 {
        return Err(ScanwerkError::Input("cannot enhance an empty image".into()));
    }

    let mut stages = Vec::new();
    let mut current = image.clone();

    if options.contrast {
        current = equalize_adaptive(&current);
        stages.push(EnhanceStage::Contrast);
        debug!("adaptive contrast equalization applied");
    }

    if options.denoise {
        current = denoise_nl_means(&current, 10.0);
        stages.push(EnhanceStage::Denoise);
        debug!("non-local denoising applied");
    }

    if options.sharpen {
        current = unsharp_mask(&current, 1.0, 1.5, 0);
        stages.push(EnhanceStage::Sharpen);
        debug!("unsharp mask applied");
    }

    if options.binarize {
        let binary = binarize_adaptive(&current.to_luma8(), 5, 2);
        current = DynamicImage::ImageLuma8(binary);
        stages.push(EnhanceStage::Binarize);
        debug!("adaptive binarization applied");
    }

    Ok(EnhancementResult {
        image: current,
        stages,
    })
}

// -- Contrast (CLAHE) ---------------------------------------------------------

/// Contrast-limited adaptive histogram equalization on the lightness channel.
///
/// The luma plane is equalized tile-by-tile (8x8 grid, clip limit 2.0) with
/// bilinear blending between neighbouring tile mappings; chroma is preserved
/// by scaling each pixel's RGB channels by its luma ratio.
pub fn equalize_adaptive(image: &DynamicImage) -> DynamicImage {
    let rgb = image.to_rgb8();
    let luma = image.to_luma8();
    let equalized = clahe_plane(&luma, 8, 2.0);

    let out = RgbImage::from_fn(rgb.width(), rgb.height(), |x, y| {
        let Rgb([r, g, b]) = *rgb.get_pixel(x, y);
        let old = luma.get_pixel(x, y).0[0];
        let new = equalized.get_pixel(x, y).0[0];
        if old == 0 {
            return Rgb([new, new, new]);
        }
        let scale = new as f32 / old as f32;
        let adjust = |c: u8| (c as f32 * scale).round().clamp(0.0, 255.0) as u8;
        Rgb([adjust(r), adjust(g), adjust(b)])
    });

    DynamicImage::ImageRgb8(out)
}

/// CLAHE over a single grayscale plane.
fn clahe_plane(gray: &GrayImage, grid: u32, clip_limit: f32) -> GrayImage {
    let (width, height) = gray.dimensions();
    if width == 0 || height == 0 {
        return gray.clone();
    }

    let tiles_x = grid.clamp(1, width);
    let tiles_y = grid.clamp(1, height);
    // Floor division; the last tile in each direction absorbs the remainder.
    let tile_w = width / tiles_x;
    let tile_h = height / tiles_y;

    // Per-tile clipped-histogram lookup tables.
    let mut luts = vec![[0u8; 256]; (tiles_x * tiles_y) as usize];
    for ty in 0..tiles_y {
        for tx in 0..tiles_x {
            let x0 = tx * tile_w;
            let y0 = ty * tile_h;
            let x1 = if tx == tiles_x - 1 { width } else { x0 + tile_w };
            let y1 = if ty == tiles_y - 1 { height } else { y0 + tile_h };

            let mut histogram = [0u32; 256];
            for y in y0..y1 {
                for x in x0..x1 {
                    histogram[gray.get_pixel(x, y).0[0] as usize] += 1;
                }
            }
            let count = (x1 - x0) * (y1 - y0);

            // Clip the histogram and redistribute the excess evenly.
            let clip = ((clip_limit * count as f32 / 256.0) as u32).max(1);
            let mut excess = 0u32;
            for bin in histogram.iter_mut() {
                if *bin > clip {
                    excess += *bin - clip;
                    *bin = clip;
                }
            }
            let bonus = excess / 256;
            for bin in histogram.iter_mut() {
                *bin += bonus;
            }
            // Spread the remainder across the value range instead of piling
            // it onto the lowest bins, which would skew the mapping.
            let leftover = (excess % 256) as usize;
            if leftover > 0 {
                let step = (256 / leftover).max(1);
                for i in (0..256).step_by(step).take(leftover) {
                    histogram[i] += 1;
                }
            }

            let lut = &mut luts[(ty * tiles_x + tx) as usize];
            let mut cdf = 0u32;
            for (value, bin) in histogram.iter().enumerate() {
                cdf += *bin;
                lut[value] = ((cdf as f32 * 255.0) / count as f32).round().min(255.0) as u8;
            }
        }
    }

    // Blend the four surrounding tile mappings per pixel.
    GrayImage::from_fn(width, height, |x, y| {
        let value = gray.get_pixel(x, y).0[0] as usize;

        let fx = ((x as f32 + 0.5) / tile_w as f32 - 0.5).clamp(0.0, (tiles_x - 1) as f32);
        let fy = ((y as f32 + 0.5) / tile_h as f32 - 0.5).clamp(0.0, (tiles_y - 1) as f32);
        let tx0 = fx.floor() as u32;
        let ty0 = fy.floor() as u32;
        let tx1 = (tx0 + 1).min(tiles_x - 1);
        let ty1 = (ty0 + 1).min(tiles_y - 1);
        let wx = fx - tx0 as f32;
        let wy = fy - ty0 as f32;

        let at = |tx: u32, ty: u32| luts[(ty * tiles_x + tx) as usize][value] as f32;
        let top = at(tx0, ty0) * (1.0 - wx) + at(tx1, ty0) * wx;
        let bottom = at(tx0, ty1) * (1.0 - wx) + at(tx1, ty1) * wx;
        let blended = top * (1.0 - wy) + bottom * wy;

        Luma([blended.round().clamp(0.0, 255.0) as u8])
    })
}

// -- Denoising ----------------------------------------------------------------

/// Edge-preserving non-local means denoising.
///
/// Each channel is filtered independently: every pixel is replaced by a
/// weighted average of pixels in a bounded search window, weighted by the
/// similarity of their 3x3 neighbourhood patches. `h` controls the filter
/// strength (10 is a good balance for scans).
pub fn denoise_nl_means(image: &DynamicImage, h: f32) -> DynamicImage {
    let rgb = image.to_rgb8();
    let planes: Vec<GrayImage> = (0..3)
        .map(|c| nl_means_plane(&channel_plane(&rgb, c), h, 1, 5))
        .collect();

    let out = RgbImage::from_fn(rgb.width(), rgb.height(), |x, y| {
        Rgb([
            planes[0].get_pixel(x, y).0[0],
            planes[1].get_pixel(x, y).0[0],
            planes[2].get_pixel(x, y).0[0],
        ])
    });
    DynamicImage::ImageRgb8(out)
}

fn nl_means_plane(
    plane: &GrayImage,
    h: f32,
    patch_radius: i64,
    search_radius: i64,
) -> GrayImage {
    let (width, height) = plane.dimensions();
    let h2 = (h * h).max(f32::EPSILON);

    let clamped = |x: i64, y: i64| -> f32 {
        let cx = x.clamp(0, width as i64 - 1) as u32;
        let cy = y.clamp(0, height as i64 - 1) as u32;
        plane.get_pixel(cx, cy).0[0] as f32
    };

    // Mean squared difference between the patches centred on p and q.
    let patch_distance = |px: i64, py: i64, qx: i64, qy: i64| -> f32 {
        let mut sum = 0.0f32;
        let mut n = 0.0f32;
        for dy in -patch_radius..=patch_radius {
            for dx in -patch_radius..=patch_radius {
                let diff = clamped(px + dx, py + dy) - clamped(qx + dx, qy + dy);
                sum += diff * diff;
                n += 1.0;
            }
        }
        sum / n
    };

    GrayImage::from_fn(width, height, |x, y| {
        let (px, py) = (x as i64, y as i64);
        let mut weight_sum = 0.0f32;
        let mut value_sum = 0.0f32;
        for dy in -search_radius..=search_radius {
            for dx in -search_radius..=search_radius {
                let (qx, qy) = (px + dx, py + dy);
                let weight = (-patch_distance(px, py, qx, qy) / h2).exp();
                weight_sum += weight;
                value_sum += weight * clamped(qx, qy);
            }
        }
        Luma([(value_sum / weight_sum).round().clamp(0.0, 255.0) as u8])
    })
}

// -- Sharpening ---------------------------------------------------------------

/// Unsharp mask: `out = image * (1 + amount) - blurred * amount`.
///
/// When `threshold` is non-zero, pixels whose deviation from the blurred
/// copy is below it are reverted to the original, so flat areas are not
/// amplified along with edges.
pub fn unsharp_mask(image: &DynamicImage, sigma: f32, amount: f32, threshold: u8) -> DynamicImage {
    let rgb = image.to_rgb8();
    let planes: Vec<(GrayImage, GrayImage)> = (0..3)
        .map(|c| {
            let plane = channel_plane(&rgb, c);
            let blurred = gaussian_blur_f32(&plane, sigma);
            (plane, blurred)
        })
        .collect();

    let sharpen_channel = |plane: &GrayImage, blurred: &GrayImage, x: u32, y: u32| -> u8 {
        let original = plane.get_pixel(x, y).0[0] as f32;
        let blur = blurred.get_pixel(x, y).0[0] as f32;
        if threshold > 0 && (original - blur).abs() < threshold as f32 {
            return original as u8;
        }
        (original * (1.0 + amount) - blur * amount)
            .round()
            .clamp(0.0, 255.0) as u8
    };

    let out = RgbImage::from_fn(rgb.width(), rgb.height(), |x, y| {
        Rgb([
            sharpen_channel(&planes[0].0, &planes[0].1, x, y),
            sharpen_channel(&planes[1].0, &planes[1].1, x, y),
            sharpen_channel(&planes[2].0, &planes[2].1, x, y),
        ])
    });
    DynamicImage::ImageRgb8(out)
}

fn channel_plane(rgb: &RgbImage, channel: usize) -> GrayImage {
    GrayImage::from_fn(rgb.width(), rgb.height(), |x, y| {
        Luma([rgb.get_pixel(x, y).0[channel]])
    })
}

// -- Binarization -------------------------------------------------------------

/// Adaptive local-mean thresholding for heavily degraded cards.
///
/// Each pixel is compared against the mean of its neighbourhood (side
/// `2 * block_radius + 1`) minus the constant `c`; darker pixels become
/// black, the rest white. Neighbourhood means come from a summed-area table
/// so the cost is independent of the block size.
pub fn binarize_adaptive(gray: &GrayImage, block_radius: u32, c: i32) -> GrayImage {
    let table = SummedAreaTable::new(gray);
    GrayImage::from_fn(gray.width(), gray.height(), |x, y| {
        let local_mean = table.mean_around(x, y, block_radius);
        let threshold = (local_mean as i32 - c).clamp(0, 255) as u8;
        let value = gray.get_pixel(x, y).0[0];
        Luma([if value < threshold { 0 } else { 255 }])
    })
}

/// Summed-area table over a grayscale image, with a zero-padded border so
/// region sums need no boundary special-cases.
struct SummedAreaTable {
    sums: Vec<u64>,
    stride: usize,
    width: u32,
    height: u32,
}

impl SummedAreaTable {
    fn new(gray: &GrayImage) -> Self {
        let (width, height) = gray.dimensions();
        let stride = width as usize + 1;
        let mut sums = vec![0u64; stride * (height as usize + 1)];

        for y in 0..height {
            let mut row_sum = 0u64;
            for x in 0..width {
                row_sum += gray.get_pixel(x, y).0[0] as u64;
                let below = (y as usize + 1) * stride + x as usize + 1;
                let above = y as usize * stride + x as usize + 1;
                sums[below] = row_sum + sums[above];
            }
        }

        Self {
            sums,
            stride,
            width,
            height,
        }
    }

    /// Mean pixel value in the square of the given radius centred on
    /// (cx, cy), clamped to the image bounds.
    fn mean_around(&self, cx: u32, cy: u32, radius: u32) -> f64 {
        let x1 = cx.saturating_sub(radius) as usize;
        let y1 = cy.saturating_sub(radius) as usize;
        let x2 = ((cx + radius + 1) as usize).min(self.width as usize);
        let y2 = ((cy + radius + 1) as usize).min(self.height as usize);

        let area = ((x2 - x1) * (y2 - y1)) as f64;
        if area == 0.0 {
            return 128.0;
        }

        let sum = self.sums[y2 * self.stride + x2] as f64
            - self.sums[y1 * self.stride + x2] as f64
            - self.sums[y2 * self.stride + x1] as f64
            + self.sums[y1 * self.stride + x1] as f64;
        sum / area
    }
}

/// Otsu's threshold: the split that maximizes between-class variance of the
/// dark and bright pixel populations.
pub(crate) fn otsu_threshold(gray: &GrayImage) -> u8 {
    let mut histogram = [0u64; 256];
    for pixel in gray.pixels() {
        histogram[pixel.0[0] as usize] += 1;
    }

    let total = gray.width() as u64 * gray.height() as u64;
    if total == 0 {
        return 128;
    }

    let weighted_total: f64 = histogram
        .iter()
        .enumerate()
        .map(|(value, &count)| value as f64 * count as f64)
        .sum();

    let mut background_weight = 0u64;
    let mut background_sum = 0.0f64;
    let mut best = (0.0f64, 0u8);

    for (candidate, &count) in histogram.iter().enumerate() {
        background_weight += count;
        if background_weight == 0 {
            continue;
        }
        let foreground_weight = total - background_weight;
        if foreground_weight == 0 {
            break;
        }

        background_sum += candidate as f64 * count as f64;
        let background_mean = background_sum / background_weight as f64;
        let foreground_mean = (weighted_total - background_sum) / foreground_weight as f64;
        let between = background_weight as f64
            * foreground_weight as f64
            * (background_mean - foreground_mean).powi(2);

        if between > best.0 {
            best = (between, candidate as u8);
        }
    }

    best.1
}

// -- Quality scoring ----------------------------------------------------------

/// Score an image for OCR readiness. Pure and deterministic.
///
/// Sharpness is the variance of the Laplacian normalized against 500,
/// contrast the grayscale standard deviation normalized against 80, and
/// brightness the plain grayscale mean.
pub fn assess_quality(image: &DynamicImage) -> QualityReport {
    let gray = image.to_luma8();
    let (width, height) = gray.dimensions();
    let pixel_count = (width as u64 * height as u64).max(1) as f64;

    // Intensity mean and standard deviation.
    let mut sum = 0.0f64;
    let mut sum_sq = 0.0f64;
    for pixel in gray.pixels() {
        let v = pixel.0[0] as f64;
        sum += v;
        sum_sq += v * v;
    }
    let mean = sum / pixel_count;
    let stddev = (sum_sq / pixel_count - mean * mean).max(0.0).sqrt();

    // Variance of the 4-neighbour Laplacian over interior pixels.
    let laplacian_variance = if width >= 3 && height >= 3 {
        let mut lap_sum = 0.0f64;
        let mut lap_sum_sq = 0.0f64;
        let n = ((width - 2) as u64 * (height - 2) as u64) as f64;
        for y in 1..height - 1 {
            for x in 1..width - 1 {
                let center = gray.get_pixel(x, y).0[0] as f64;
                let lap = gray.get_pixel(x, y - 1).0[0] as f64
                    + gray.get_pixel(x, y + 1).0[0] as f64
                    + gray.get_pixel(x - 1, y).0[0] as f64
                    + gray.get_pixel(x + 1, y).0[0] as f64
                    - 4.0 * center;
                lap_sum += lap;
                lap_sum_sq += lap * lap;
            }
        }
        let lap_mean = lap_sum / n;
        (lap_sum_sq / n - lap_mean * lap_mean).max(0.0)
    } else {
        0.0
    };

    let sharpness = round_to(laplacian_variance as f32 / 500.0, 100.0).min(1.0);
    let contrast = round_to(stddev as f32 / 80.0, 100.0).min(1.0);
    let brightness = round_to(mean as f32, 10.0);

    let mut warnings = Vec::new();
    if sharpness < 0.3 {
        warnings.push("blurry".to_string());
    }
    if contrast < 0.4 {
        warnings.push("low contrast".to_string());
    }
    if brightness < 50.0 {
        warnings.push("too dark".to_string());
    } else if brightness > 200.0 {
        warnings.push("too bright".to_string());
    }

    QualityReport {
        sharpness,
        contrast,
        brightness,
        warnings,
    }
}

fn round_to(value: f32, scale: f32) -> f32 {
    (value * scale).round() / scale
}

// -- Auxiliary transforms -----------------------------------------------------

/// Resize an image from its current DPI to a target DPI (OCR engines work
/// best around 300). `current_dpi` defaults to 72 when unknown; equal DPIs
/// are a no-op. Upscaling uses Catmull-Rom (cubic), downscaling Lanczos3.
pub fn resize_for_dpi(
    image: &DynamicImage,
    target_dpi: u32,
    current_dpi: Option<u32>,
) -> DynamicImage {
    let current = current_dpi.unwrap_or(72);
    if current == 0 || current == target_dpi {
        return image.clone();
    }

    let scale = target_dpi as f32 / current as f32;
    let new_width = ((image.width() as f32 * scale).round() as u32).max(1);
    let new_height = ((image.height() as f32 * scale).round() as u32).max(1);
    let filter = if scale > 1.0 {
        image::imageops::FilterType::CatmullRom
    } else {
        image::imageops::FilterType::Lanczos3
    };

    debug!(current, target_dpi, new_width, new_height, "resizing for DPI");
    image.resize_exact(new_width, new_height, filter)
}

/// Trim bright scanner borders around the card content.
///
/// Pixels darker than `luma_threshold` count as content; the crop is the
/// union bounding box of the content contours expanded by `margin` pixels.
/// Images with no detectable content are returned unchanged.
pub fn remove_borders(image: &DynamicImage, luma_threshold: u8, margin: u32) -> DynamicImage {
    let gray = image.to_luma8();
    let binary = GrayImage::from_fn(gray.width(), gray.height(), |x, y| {
        Luma([if gray.get_pixel(x, y).0[0] < luma_threshold { 255 } else { 0 }])
    });

    let contours = find_contours::<i32>(&binary);
    if contours.is_empty() {
        return image.clone();
    }

    let mut min_x = i32::MAX;
    let mut min_y = i32::MAX;
    let mut max_x = i32::MIN;
    let mut max_y = i32::MIN;
    for contour in &contours {
        for point in &contour.points {
            min_x = min_x.min(point.x);
            min_y = min_y.min(point.y);
            max_x = max_x.max(point.x);
            max_y = max_y.max(point.y);
        }
    }

    let x = (min_x - margin as i32).max(0) as u32;
    let y = (min_y - margin as i32).max(0) as u32;
    let right = ((max_x + margin as i32 + 1) as u32).min(image.width());
    let bottom = ((max_y + margin as i32 + 1) as u32).min(image.height());

    debug!(x, y, right, bottom, "cropping detected content region");
    image.crop_imm(x, y, right - x, bottom - y)
}
