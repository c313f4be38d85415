// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Unified error types for Scanwerk.

use thiserror::Error;

/// Top-level error type for all Scanwerk operations.
///
/// Only `Input` is fatal to a whole batch run (raised during pre-flight
/// checks). `Naming` excludes a single file from pairing. `Decode`, `Image`,
/// and `Write` are fatal to one recto/verso pair and are recorded in the
/// batch statistics while the remaining pairs continue.
#[derive(Debug, Error)]
pub enum ScanwerkError {
    // -- Pre-flight --
    #[error("invalid input: {0}")]
    Input(String),

    // -- Pairing --
    #[error("unrecognized scan filename: {0}")]
    Naming(String),

    // -- Per-pair processing --
    #[error("failed to decode {path}: {detail}")]
    Decode { path: String, detail: String },

    #[error("image processing failed: {0}")]
    Image(String),

    #[error("failed to write {path}: {detail}")]
    Write { path: String, detail: String },

    // -- Ambient --
    #[error("file I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, ScanwerkError>;
