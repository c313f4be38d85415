// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Batch configuration.

use serde::{Deserialize, Serialize};

/// Settings for one batch preparation run.
///
/// Built by the CLI from parsed arguments and passed by reference through
/// the pipeline; the orchestrator echoes the relevant fields into the
/// metadata document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Width kept from the verso when fusing, in percent (55 or 100).
    pub crop_percent: u32,
    /// Operator name, recorded in the metadata document only.
    pub operator: String,
    /// Run skew detection and correction on each side.
    pub auto_deskew: bool,
    /// Run the OCR enhancement pipeline on the fused image.
    pub optimize: bool,
    /// Preview mode: no filesystem writes at all.
    pub preview: bool,
    /// Enhancement stage toggles.
    pub enhance: EnhanceOptions,
    /// Maximum acceptable skew angle in degrees; detections at or beyond
    /// this magnitude are discarded.
    pub max_skew_angle: f32,
    /// JPEG quality for prepared output images (1-100).
    pub jpeg_quality: u8,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            crop_percent: 100,
            operator: "Utilisateur".into(),
            auto_deskew: true,
            optimize: true,
            preview: false,
            enhance: EnhanceOptions::default(),
            max_skew_angle: 45.0,
            jpeg_quality: 95,
        }
    }
}

/// Which enhancement stages run, in their fixed pipeline order.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct EnhanceOptions {
    /// Adaptive local contrast equalization on the lightness channel.
    pub contrast: bool,
    /// Edge-preserving non-local denoising.
    pub denoise: bool,
    /// Unsharp-mask sharpening.
    pub sharpen: bool,
    /// Adaptive black-and-white thresholding, for heavily degraded cards.
    pub binarize: bool,
}

impl Default for EnhanceOptions {
    fn default() -> Self {
        Self {
            contrast: true,
            denoise: true,
            sharpen: true,
            binarize: false,
        }
    }
}
