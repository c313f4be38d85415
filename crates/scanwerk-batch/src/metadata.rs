// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Metadata document for a batch run.
//
// The serialized field names and nesting are the contract with the fiche
// import pipeline that later ingests prepared images; renames pin the wire
// format so the Rust-side names can stay idiomatic.

use scanwerk_core::config::BatchConfig;
use scanwerk_core::types::{DeskewMethod, QualityReport};
use serde::{Deserialize, Serialize};

/// Format version written into every metadata document.
pub const METADATA_FORMAT_VERSION: &str = "1.0";

/// The whole batch run: configuration echo, per-fiche records, and
/// aggregate statistics. Serialized once, at the end of the run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchRun {
    #[serde(rename = "version")]
    pub format_version: String,
    /// ISO-8601 timestamp of when processing started.
    #[serde(rename = "date_traitement")]
    pub processed_at: String,
    #[serde(rename = "operateur")]
    pub operator: String,
    pub machine: MachineInfo,
    pub configuration: ConfigEcho,
    pub fiches: Vec<FicheMetadata>,
    #[serde(rename = "statistiques")]
    pub statistics: BatchStatistics,
}

/// Host and tool fingerprint, recorded for provenance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MachineInfo {
    pub hostname: String,
    pub tool_version: String,
    pub imaging_backend: String,
}

impl MachineInfo {
    pub fn current() -> Self {
        Self {
            hostname: gethostname::gethostname().to_string_lossy().into_owned(),
            tool_version: env!("CARGO_PKG_VERSION").to_string(),
            imaging_backend: "image-rs 0.25".to_string(),
        }
    }
}

/// Echo of the configuration the run was invoked with.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigEcho {
    #[serde(rename = "crop_verso_default")]
    pub crop_verso: String,
    pub auto_deskew: bool,
    #[serde(rename = "optimisations_ocr")]
    pub ocr_optimizations: bool,
}

impl From<&BatchConfig> for ConfigEcho {
    fn from(config: &BatchConfig) -> Self {
        Self {
            crop_verso: format!("{}%", config.crop_percent),
            auto_deskew: config.auto_deskew,
            ocr_optimizations: config.optimize,
        }
    }
}

/// Everything recorded about one processed recto/verso pair. Built once by
/// the orchestrator and never mutated afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FicheMetadata {
    #[serde(rename = "numero")]
    pub sequence: String,
    #[serde(rename = "fichiers_source")]
    pub sources: SourcePair,
    pub operations: Operations,
    #[serde(rename = "qualite")]
    pub quality: QualityReport,
    /// ISO-8601 timestamp of when this pair was processed.
    pub timestamp: String,
    /// Absent in preview mode, where nothing is written to disk.
    #[serde(rename = "fichier_prepare", skip_serializing_if = "Option::is_none")]
    pub prepared: Option<PreparedFile>,
    #[serde(rename = "duree_traitement_s")]
    pub duration_s: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourcePair {
    pub recto: SourceFile,
    pub verso: SourceFile,
}

/// Provenance record for one input scan, immutable once read.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceFile {
    #[serde(rename = "chemin_absolu")]
    pub absolute_path: String,
    #[serde(rename = "nom_original")]
    pub original_name: String,
    #[serde(rename = "taille_ko")]
    pub size_kib: u64,
    /// `[width, height]` in pixels.
    pub dimensions: [u32; 2],
    #[serde(rename = "hash_sha256")]
    pub sha256: String,
}

/// The operations applied to one pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Operations {
    pub deskew: DeskewOps,
    pub fusion: FusionOps,
    #[serde(rename = "optimisations")]
    pub optimizations: Vec<OptimizationOp>,
}

/// Deskew record: per-side outcomes, or a marker that the stage was off.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DeskewOps {
    Applied { recto: SideDeskew, verso: SideDeskew },
    Disabled {
        #[serde(rename = "actif")]
        active: bool,
    },
}

impl DeskewOps {
    pub fn disabled() -> Self {
        Self::Disabled { active: false }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SideDeskew {
    #[serde(rename = "angle_detecte")]
    pub angle: f32,
    #[serde(rename = "methode")]
    pub method: DeskewMethod,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FusionOps {
    #[serde(rename = "crop_verso_width")]
    pub crop_verso_width: String,
    #[serde(rename = "crop_verso_pixels")]
    pub crop_verso_pixels: u32,
}

/// One enhancement stage that ran, by its stable name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizationOp {
    #[serde(rename = "nom")]
    pub name: String,
}

/// Record for the fused output image written to disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreparedFile {
    #[serde(rename = "chemin_relatif")]
    pub relative_path: String,
    #[serde(rename = "nom")]
    pub name: String,
    #[serde(rename = "taille_ko")]
    pub size_kib: u64,
    pub dimensions: [u32; 2],
    #[serde(rename = "hash_sha256")]
    pub sha256: String,
}

/// Aggregate statistics over the whole run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchStatistics {
    #[serde(rename = "total_fiches")]
    pub total: usize,
    #[serde(rename = "fiches_reussies")]
    pub succeeded: usize,
    #[serde(rename = "fiches_erreurs")]
    pub failed: usize,
    #[serde(rename = "duree_totale_s")]
    pub total_duration_s: f64,
    #[serde(rename = "duree_moyenne_par_fiche_s")]
    pub mean_duration_s: f64,
    #[serde(rename = "erreurs")]
    pub errors: Vec<PairError>,
    pub warnings_total: usize,
}

/// One per-pair failure, isolated from the rest of the run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PairError {
    /// 1-based index of the pair in processing order.
    #[serde(rename = "fiche")]
    pub index: usize,
    #[serde(rename = "erreur")]
    pub message: String,
}
