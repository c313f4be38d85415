// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// scanwerk-batch — Batch orchestration for the Scanwerk scan-preparation
// pipeline.
//
// Provides the per-pair pipeline driver (pair discovery, deskew, fusion,
// enhancement, quality scoring, output writes) and the metadata document
// consumed by the downstream import pipeline.

pub mod metadata;
pub mod orchestrator;

pub use metadata::{BatchRun, BatchStatistics, FicheMetadata};
pub use orchestrator::BatchOrchestrator;
