// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Image fusion — stacks a recto scan and a (width-cropped) verso scan onto
// one vertical canvas.

use image::{DynamicImage, Rgb, RgbImage, imageops};
use scanwerk_core::error::{Result, ScanwerkError};
use tracing::{debug, instrument};

/// Fuse two scans into one vertical image: recto on top, verso beneath.
///
/// The verso is first cropped to `crop_percent` of its width (left-aligned;
/// cards are usually annotated on the left half of the back). The canvas is
/// `max(recto_w, cropped_verso_w)` wide and `recto_h + verso_h` tall, filled
/// white; neither image is scaled, so the narrower one leaves a white margin
/// on its right.
#[instrument(skip(recto, verso), fields(crop_percent))]
pub fn fuse_vertical(
    recto: &DynamicImage,
    verso: &DynamicImage,
    crop_percent: u32,
) -> Result<DynamicImage> {
    let recto = recto.to_rgb8();
    let verso = verso.to_rgb8();

    let crop_width = cropped_width(verso.width(), crop_percent);
    if recto.width() == 0 || recto.height() == 0 || crop_width == 0 || verso.height() == 0 {
        return Err(ScanwerkError::Input(format!(
            "cannot fuse images with empty dimensions ({}x{} + {}x{} at {}%)",
            recto.width(),
            recto.height(),
            verso.width(),
            verso.height(),
            crop_percent
        )));
    }

    let verso_cropped = imageops::crop_imm(&verso, 0, 0, crop_width, verso.height()).to_image();

    let canvas_width = recto.width().max(verso_cropped.width());
    let canvas_height = recto.height() + verso_cropped.height();
    let mut canvas = RgbImage::from_pixel(canvas_width, canvas_height, Rgb([255, 255, 255]));

    imageops::replace(&mut canvas, &recto, 0, 0);
    imageops::replace(&mut canvas, &verso_cropped, 0, recto.height() as i64);

    debug!(
        canvas_width,
        canvas_height,
        crop_width,
        "fused recto/verso onto one canvas"
    );
    Ok(DynamicImage::ImageRgb8(canvas))
}

/// Pixel width kept from the verso for a given crop percentage.
pub fn cropped_width(verso_width: u32, crop_percent: u32) -> u32 {
    (verso_width as u64 * crop_percent as u64 / 100) as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::GenericImageView;

    fn solid(width: u32, height: u32, value: u8) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb([value, value, value])))
    }

    #[test]
    fn full_width_fusion_stacks_both_images() {
        let recto = solid(100, 50, 10);
        let verso = solid(100, 50, 200);

        let fused = fuse_vertical(&recto, &verso, 100).expect("fuse");
        assert_eq!(fused.dimensions(), (100, 100));

        // Rows [0, 50) come from the recto, rows [50, 100) from the verso.
        assert_eq!(fused.get_pixel(50, 25).0[0], 10);
        assert_eq!(fused.get_pixel(50, 75).0[0], 200);
    }

    #[test]
    fn partial_crop_leaves_white_margin_beside_the_verso() {
        let recto = solid(100, 40, 10);
        let verso = solid(100, 40, 200);

        let fused = fuse_vertical(&recto, &verso, 55).expect("fuse");
        // Canvas width = max(100, 55) = 100.
        assert_eq!(fused.dimensions(), (100, 80));

        // Left of the crop boundary: verso pixels; right of it: white fill.
        assert_eq!(fused.get_pixel(54, 60).0[0], 200);
        assert_eq!(fused.get_pixel(55, 60).0, [255, 255, 255, 255]);
    }

    #[test]
    fn narrow_recto_gets_white_margin() {
        let recto = solid(30, 20, 10);
        let verso = solid(100, 20, 200);

        let fused = fuse_vertical(&recto, &verso, 100).expect("fuse");
        assert_eq!(fused.dimensions(), (100, 40));
        assert_eq!(fused.get_pixel(60, 10).0, [255, 255, 255, 255]);
    }

    #[test]
    fn zero_width_crop_is_rejected() {
        let recto = solid(10, 10, 0);
        let verso = solid(1, 10, 0);
        // 1px * 55% floors to zero width.
        assert!(fuse_vertical(&recto, &verso, 55).is_err());
    }

    #[test]
    fn cropped_width_floors() {
        assert_eq!(cropped_width(100, 55), 55);
        assert_eq!(cropped_width(99, 55), 54);
        assert_eq!(cropped_width(100, 100), 100);
    }
}
