// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Core domain types for the Scanwerk scan-preparation pipeline.

use serde::{Deserialize, Serialize};

/// Which physical side of a record card a scan shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Recto,
    Verso,
}

impl Side {
    /// Lowercase keyword used in normalized filenames and metadata.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Recto => "recto",
            Self::Verso => "verso",
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which strategy produced a deskew angle.
///
/// The serialized strings are part of the metadata document consumed by the
/// fiche import pipeline and must stay stable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeskewMethod {
    /// External projection-based deskew tool (probed at startup).
    #[serde(rename = "deskew_library")]
    DeskewTool,
    /// Largest-contour minimum-area rectangle.
    #[serde(rename = "contours_minarearect")]
    ContourRect,
    /// Horizontal-projection variance maximization.
    #[serde(rename = "horizontal_projection")]
    Projection,
    /// No strategy produced a confident angle; the image was left as-is.
    #[serde(rename = "none")]
    None,
}

impl DeskewMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DeskewTool => "deskew_library",
            Self::ContourRect => "contours_minarearect",
            Self::Projection => "horizontal_projection",
            Self::None => "none",
        }
    }
}

impl std::fmt::Display for DeskewMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// OCR-readiness scores for a prepared image.
///
/// A pure function of pixel content: the same image always yields the same
/// report. Scores are pre-rounded (two decimals, one for brightness) so the
/// serialized form is stable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityReport {
    /// Variance-of-Laplacian sharpness, normalized into [0, 1].
    pub sharpness: f32,
    /// Grayscale standard deviation, normalized into [0, 1].
    pub contrast: f32,
    /// Mean grayscale intensity in [0, 255].
    pub brightness: f32,
    /// Human-readable quality warnings ("blurry", "low contrast", ...).
    pub warnings: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn side_keywords() {
        assert_eq!(Side::Recto.as_str(), "recto");
        assert_eq!(Side::Verso.to_string(), "verso");
    }

    #[test]
    fn deskew_method_serializes_to_stable_strings() {
        let json = serde_json::to_string(&DeskewMethod::ContourRect).expect("serialize");
        assert_eq!(json, "\"contours_minarearect\"");
        let json = serde_json::to_string(&DeskewMethod::None).expect("serialize");
        assert_eq!(json, "\"none\"");
    }

    #[test]
    fn quality_report_round_trips() {
        let report = QualityReport {
            sharpness: 0.42,
            contrast: 0.9,
            brightness: 127.5,
            warnings: vec!["low contrast".into()],
        };
        let json = serde_json::to_string(&report).expect("serialize");
        let back: QualityReport = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, report);
    }
}
