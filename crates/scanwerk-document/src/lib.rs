// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// scanwerk-document — Image algorithms for the Scanwerk scan-preparation
// pipeline.
//
// Provides filename pairing (recto/verso discovery and normalization), skew
// detection and correction, OCR enhancement with quality scoring, vertical
// image fusion, and SHA-256 content hashing.

pub mod deskew;
pub mod enhance;
pub mod fuse;
pub mod integrity;
pub mod pairing;

// Re-export the primary entry points so callers can use
// `scanwerk_document::SkewDetector` etc.
pub use deskew::{DeskewOutcome, SkewDetector, rotate_expanded};
pub use enhance::{EnhanceStage, EnhancementResult, assess_quality, optimize_for_ocr};
pub use fuse::fuse_vertical;
pub use integrity::{hash_bytes, hash_file};
pub use pairing::{ScanNaming, ScanPair};
