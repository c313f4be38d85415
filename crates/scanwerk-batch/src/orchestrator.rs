// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Batch orchestrator — drives the per-pair preparation pipeline over a
// directory tree, isolating per-pair failures and aggregating statistics.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Instant;

use chrono::Local;
use image::DynamicImage;
use scanwerk_core::config::BatchConfig;
use scanwerk_core::error::{Result, ScanwerkError};
use tempfile::NamedTempFile;
use tracing::{debug, error, info, instrument, warn};

use scanwerk_document::deskew::SkewDetector;
use scanwerk_document::enhance::{assess_quality, optimize_for_ocr};
use scanwerk_document::fuse::{cropped_width, fuse_vertical};
use scanwerk_document::integrity::{hash_bytes, hash_file};
use scanwerk_document::pairing::{ScanNaming, ScanPair};

use crate::metadata::{
    BatchRun, BatchStatistics, ConfigEcho, DeskewOps, FicheMetadata, FusionOps, MachineInfo,
    METADATA_FORMAT_VERSION, OptimizationOp, Operations, PairError, PreparedFile, SideDeskew,
    SourceFile, SourcePair,
};

/// File extensions considered scan inputs.
const SCAN_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

/// Drives one batch run: pair discovery, per-pair preparation, metadata
/// aggregation, and output writes.
///
/// The naming rules and the skew-strategy list are built once at
/// construction (including the external-tool capability probe) and reused
/// for every pair.
pub struct BatchOrchestrator {
    config: BatchConfig,
    naming: ScanNaming,
    detector: SkewDetector,
}

impl BatchOrchestrator {
    pub fn new(config: BatchConfig) -> Self {
        let detector = SkewDetector::probe(config.max_skew_angle);
        Self {
            config,
            naming: ScanNaming::new(),
            detector,
        }
    }

    /// Run the batch over `input_dir`.
    ///
    /// `output_dir` is required unless the configuration is in preview mode,
    /// in which case nothing at all is written and the metadata document is
    /// only returned in memory. Per-pair failures are recorded in the
    /// statistics and never abort the remaining pairs; only pre-flight
    /// problems (missing input, no pairs) fail the whole run.
    #[instrument(skip(self, input_dir, output_dir), fields(input = %input_dir.display()))]
    pub fn run(&self, input_dir: &Path, output_dir: Option<&Path>) -> Result<BatchRun> {
        if !input_dir.is_dir() {
            return Err(ScanwerkError::Input(format!(
                "input directory not found: {}",
                input_dir.display()
            )));
        }

        let files = collect_scan_files(input_dir)?;
        let pairs = self.naming.discover_pairs(&files);
        if pairs.is_empty() {
            return Err(ScanwerkError::Input(format!(
                "no recto/verso pairs detected in {} \
                 (supported names: xxx-R.jpeg, xxx_recto.jpg, xxx_page1.jpg)",
                input_dir.display()
            )));
        }
        info!(pairs = pairs.len(), "recto/verso pairs detected");

        let images_dir = if self.config.preview {
            None
        } else {
            let output = output_dir.ok_or_else(|| {
                ScanwerkError::Input("an output directory is required outside preview mode".into())
            })?;
            let images = output.join("images");
            fs::create_dir_all(&images)?;
            Some(images)
        };

        let mut run = BatchRun {
            format_version: METADATA_FORMAT_VERSION.into(),
            processed_at: now_iso8601(),
            operator: self.config.operator.clone(),
            machine: MachineInfo::current(),
            configuration: ConfigEcho::from(&self.config),
            fiches: Vec::with_capacity(pairs.len()),
            statistics: BatchStatistics::default(),
        };

        let mut errors = Vec::new();
        let mut total_duration = 0.0f64;
        for (i, pair) in pairs.iter().enumerate() {
            let index = i + 1;
            match self.process_pair(pair, images_dir.as_deref()) {
                Ok(fiche) => {
                    total_duration += fiche.duration_s;
                    run.fiches.push(fiche);
                }
                Err(err) => {
                    error!(fiche = index, error = %err, "pair failed, continuing");
                    errors.push(PairError {
                        index,
                        message: err.to_string(),
                    });
                }
            }
        }

        let warnings_total = run
            .fiches
            .iter()
            .map(|f| f.quality.warnings.len())
            .sum::<usize>();
        if warnings_total > 0 {
            warn!(warnings_total, "quality warnings raised during the run");
        }

        run.statistics = BatchStatistics {
            total: pairs.len(),
            succeeded: run.fiches.len(),
            failed: errors.len(),
            total_duration_s: round2(total_duration),
            mean_duration_s: round2(total_duration / pairs.len() as f64),
            errors,
            warnings_total,
        };

        if let Some(output) = output_dir.filter(|_| !self.config.preview) {
            let path = output.join("metadata.json");
            let json = serde_json::to_vec_pretty(&run)?;
            atomic_write(&path, &json)?;
            info!(path = %path.display(), "metadata document written");
        } else {
            debug!("preview mode, metadata kept in memory only");
        }

        info!(
            succeeded = run.statistics.succeeded,
            failed = run.statistics.failed,
            total_s = run.statistics.total_duration_s,
            "batch complete"
        );
        Ok(run)
    }

    /// Prepare one recto/verso pair and build its metadata record.
    #[instrument(skip(self, pair, images_dir), fields(sequence = %pair.sequence))]
    fn process_pair(&self, pair: &ScanPair, images_dir: Option<&Path>) -> Result<FicheMetadata> {
        let started = Instant::now();

        let recto = decode_scan(&pair.recto)?;
        let verso = decode_scan(&pair.verso)?;

        let sources = SourcePair {
            recto: source_record(&pair.recto, &recto)?,
            verso: source_record(&pair.verso, &verso)?,
        };

        let (recto, verso, deskew) = if self.config.auto_deskew {
            let recto_outcome = self.detector.detect(&recto)?;
            let verso_outcome = self.detector.detect(&verso)?;
            debug!(
                recto_angle = recto_outcome.angle,
                recto_method = %recto_outcome.method,
                verso_angle = verso_outcome.angle,
                verso_method = %verso_outcome.method,
                "deskew outcomes"
            );
            let deskew = DeskewOps::Applied {
                recto: SideDeskew {
                    angle: round2_f32(recto_outcome.angle),
                    method: recto_outcome.method,
                },
                verso: SideDeskew {
                    angle: round2_f32(verso_outcome.angle),
                    method: verso_outcome.method,
                },
            };
            (recto_outcome.image, verso_outcome.image, deskew)
        } else {
            (recto, verso, DeskewOps::disabled())
        };

        let fusion = FusionOps {
            crop_verso_width: format!("{}%", self.config.crop_percent),
            crop_verso_pixels: cropped_width(verso.width(), self.config.crop_percent),
        };
        let fused = fuse_vertical(&recto, &verso, self.config.crop_percent)?;

        let (prepared_image, optimizations) = if self.config.optimize {
            let result = optimize_for_ocr(&fused, &self.config.enhance)?;
            let ops = result
                .stages
                .iter()
                .map(|stage| OptimizationOp {
                    name: stage.as_str().to_string(),
                })
                .collect();
            (result.image, ops)
        } else {
            (fused, Vec::new())
        };

        let quality = assess_quality(&prepared_image);

        let prepared = match images_dir {
            Some(dir) => Some(self.write_prepared(dir, &pair.sequence, &prepared_image)?),
            None => None,
        };

        Ok(FicheMetadata {
            sequence: pair.sequence.clone(),
            sources,
            operations: Operations {
                deskew,
                fusion,
                optimizations,
            },
            quality,
            timestamp: now_iso8601(),
            prepared,
            duration_s: round2(started.elapsed().as_secs_f64()),
        })
    }

    /// Encode and atomically write the prepared image, returning its record.
    fn write_prepared(
        &self,
        images_dir: &Path,
        sequence: &str,
        image: &DynamicImage,
    ) -> Result<PreparedFile> {
        let name = format!("{sequence}_prepared.jpg");
        let path = images_dir.join(&name);

        let mut bytes = Vec::new();
        let encoder =
            image::codecs::jpeg::JpegEncoder::new_with_quality(&mut bytes, self.config.jpeg_quality);
        image
            .to_rgb8()
            .write_with_encoder(encoder)
            .map_err(|err| ScanwerkError::Image(format!("JPEG encoding failed: {err}")))?;

        atomic_write(&path, &bytes)?;
        debug!(path = %path.display(), bytes = bytes.len(), "prepared image written");

        Ok(PreparedFile {
            relative_path: format!("images/{name}"),
            name,
            size_kib: bytes.len() as u64 / 1024,
            dimensions: [image.width(), image.height()],
            sha256: hash_bytes(&bytes),
        })
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn decode_scan(path: &Path) -> Result<DynamicImage> {
    image::open(path).map_err(|err| ScanwerkError::Decode {
        path: path.display().to_string(),
        detail: err.to_string(),
    })
}

/// Build the provenance record for one input scan.
fn source_record(path: &Path, image: &DynamicImage) -> Result<SourceFile> {
    let size = fs::metadata(path)?.len();
    Ok(SourceFile {
        absolute_path: fs::canonicalize(path)
            .unwrap_or_else(|_| path.to_path_buf())
            .display()
            .to_string(),
        original_name: path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default(),
        size_kib: size / 1024,
        dimensions: [image.width(), image.height()],
        sha256: hash_file(path)?,
    })
}

/// Recursively collect scan files under `dir`, sorted for deterministic
/// processing order.
fn collect_scan_files(dir: &Path) -> Result<Vec<PathBuf>> {
    fn walk(dir: &Path, files: &mut Vec<PathBuf>) -> Result<()> {
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if path.is_dir() {
                walk(&path, files)?;
            } else if is_scan_file(&path) {
                files.push(path);
            }
        }
        Ok(())
    }

    let mut files = Vec::new();
    walk(dir, &mut files)?;
    files.sort();
    Ok(files)
}

fn is_scan_file(path: &Path) -> bool {
    path.extension()
        .map(|ext| {
            let ext = ext.to_string_lossy().to_lowercase();
            SCAN_EXTENSIONS.contains(&ext.as_str())
        })
        .unwrap_or(false)
}

/// Write `bytes` to `path` with create-or-replace semantics: the data goes
/// to a temporary file in the same directory first, then replaces the
/// target in one rename, so an interrupted run never leaves a partial file
/// under the final name.
fn atomic_write(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = path.parent().ok_or_else(|| {
        ScanwerkError::Write {
            path: path.display().to_string(),
            detail: "path has no parent directory".into(),
        }
    })?;

    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.persist(path).map_err(|err| ScanwerkError::Write {
        path: path.display().to_string(),
        detail: err.to_string(),
    })?;
    Ok(())
}

fn now_iso8601() -> String {
    Local::now().format("%Y-%m-%dT%H:%M:%S%.3f").to_string()
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn round2_f32(value: f32) -> f32 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};
    use tempfile::TempDir;

    /// Write a small solid JPEG scan under `dir`.
    fn write_scan(dir: &Path, name: &str, value: u8) {
        let img = RgbImage::from_pixel(60, 40, Rgb([value, value, value]));
        img.save(dir.join(name)).expect("write scan");
    }

    /// Write a file that carries a scan extension but is not an image.
    fn write_corrupt(dir: &Path, name: &str) {
        fs::write(dir.join(name), b"not a jpeg at all").expect("write corrupt");
    }

    fn orchestrator(config: BatchConfig) -> BatchOrchestrator {
        // Built-in strategies only, so tests do not depend on whatever
        // happens to be installed on the host.
        BatchOrchestrator {
            config,
            naming: ScanNaming::new(),
            detector: SkewDetector::builtin(45.0),
        }
    }

    fn fast_config() -> BatchConfig {
        // Keep the heavy stages out of the hot path of filesystem tests;
        // their algorithms are covered in scanwerk-document.
        BatchConfig {
            auto_deskew: false,
            optimize: false,
            ..BatchConfig::default()
        }
    }

    #[test]
    fn missing_input_directory_is_fatal() {
        let result = orchestrator(fast_config()).run(Path::new("/nonexistent/scans"), None);
        assert!(matches!(result, Err(ScanwerkError::Input(_))));
    }

    #[test]
    fn directory_without_pairs_is_fatal() {
        let input = TempDir::new().expect("tempdir");
        write_scan(input.path(), "lonely_recto.jpg", 100);

        let result = orchestrator(fast_config()).run(input.path(), None);
        assert!(matches!(result, Err(ScanwerkError::Input(_))));
    }

    #[test]
    fn failed_pair_is_isolated_from_the_rest() {
        let input = TempDir::new().expect("input");
        let output = TempDir::new().expect("output");
        write_scan(input.path(), "1-R.jpg", 100);
        write_scan(input.path(), "1-V.jpg", 150);
        write_corrupt(input.path(), "2-R.jpg");
        write_scan(input.path(), "2-V.jpg", 150);

        let run = orchestrator(fast_config())
            .run(input.path(), Some(output.path()))
            .expect("run");

        assert_eq!(run.statistics.total, 2);
        assert_eq!(run.statistics.succeeded, 1);
        assert_eq!(run.statistics.failed, 1);
        assert_eq!(run.fiches.len(), 1);
        assert_eq!(run.fiches[0].sequence, "001");
        assert_eq!(run.statistics.errors.len(), 1);
        assert_eq!(run.statistics.errors[0].index, 2);
        assert!(run.statistics.errors[0].message.contains("2-R.jpg"));
    }

    #[test]
    fn outputs_and_metadata_are_written() {
        let input = TempDir::new().expect("input");
        let output = TempDir::new().expect("output");
        write_scan(input.path(), "7-R.jpg", 90);
        write_scan(input.path(), "7-V.jpg", 180);

        let run = orchestrator(fast_config())
            .run(input.path(), Some(output.path()))
            .expect("run");

        let prepared = output.path().join("images").join("007_prepared.jpg");
        assert!(prepared.is_file());
        assert!(output.path().join("metadata.json").is_file());

        let record = run.fiches[0].prepared.as_ref().expect("prepared record");
        assert_eq!(record.relative_path, "images/007_prepared.jpg");
        // Fused canvas: both sides 60x40 stacked.
        assert_eq!(record.dimensions, [60, 80]);

        // The recorded hash matches the bytes on disk.
        assert_eq!(record.sha256, hash_file(&prepared).expect("hash"));

        // The document on disk parses back into the same shape.
        let json = fs::read_to_string(output.path().join("metadata.json")).expect("read");
        let parsed: BatchRun = serde_json::from_str(&json).expect("parse");
        assert_eq!(parsed.statistics.succeeded, 1);
    }

    #[test]
    fn preview_mode_writes_nothing_but_reports_everything() {
        let input = TempDir::new().expect("input");
        write_scan(input.path(), "1-R.jpg", 100);
        write_scan(input.path(), "1-V.jpg", 150);
        write_scan(input.path(), "2-R.jpg", 100);
        write_scan(input.path(), "2-V.jpg", 150);

        let preview_run = orchestrator(BatchConfig {
            preview: true,
            ..fast_config()
        })
        .run(input.path(), None)
        .expect("preview run");

        assert_eq!(preview_run.statistics.total, 2);
        assert_eq!(preview_run.statistics.succeeded, 2);
        assert!(preview_run.fiches.iter().all(|f| f.prepared.is_none()));

        // Same batch without preview: identical records aside from the
        // output-file fields.
        let output = TempDir::new().expect("output");
        let real_run = orchestrator(fast_config())
            .run(input.path(), Some(output.path()))
            .expect("real run");

        assert_eq!(real_run.statistics.total, preview_run.statistics.total);
        for (preview, real) in preview_run.fiches.iter().zip(&real_run.fiches) {
            assert_eq!(preview.sequence, real.sequence);
            assert_eq!(preview.sources.recto.sha256, real.sources.recto.sha256);
            assert_eq!(preview.quality, real.quality);
            assert!(preview.prepared.is_none());
            assert!(real.prepared.is_some());
        }

        // The input directory gained no files from either run.
        let count = fs::read_dir(input.path()).expect("read dir").count();
        assert_eq!(count, 4);
    }

    #[test]
    fn deskew_disabled_is_recorded_as_inactive() {
        let input = TempDir::new().expect("input");
        write_scan(input.path(), "3-R.jpg", 100);
        write_scan(input.path(), "3-V.jpg", 150);

        // Outside preview mode an output directory is mandatory.
        assert!(orchestrator(fast_config()).run(input.path(), None).is_err());

        let run = orchestrator(BatchConfig {
            preview: true,
            ..fast_config()
        })
        .run(input.path(), None)
        .expect("run");
        assert!(matches!(
            run.fiches[0].operations.deskew,
            DeskewOps::Disabled { active: false }
        ));
    }

    #[test]
    fn deskew_enabled_records_both_sides() {
        let input = TempDir::new().expect("input");
        write_scan(input.path(), "4-R.jpg", 100);
        write_scan(input.path(), "4-V.jpg", 150);

        let run = orchestrator(BatchConfig {
            preview: true,
            auto_deskew: true,
            optimize: false,
            ..BatchConfig::default()
        })
        .run(input.path(), None)
        .expect("run");

        // Solid scans give no confident angle: both sides fall through to
        // the none outcome, which is not an error.
        match &run.fiches[0].operations.deskew {
            DeskewOps::Applied { recto, verso } => {
                assert_eq!(recto.angle, 0.0);
                assert_eq!(recto.method, scanwerk_core::types::DeskewMethod::None);
                assert_eq!(verso.angle, 0.0);
                assert_eq!(verso.method, scanwerk_core::types::DeskewMethod::None);
            }
            DeskewOps::Disabled { .. } => panic!("deskew should have been recorded per side"),
        }
    }

    #[test]
    fn nested_directories_are_scanned() {
        let input = TempDir::new().expect("input");
        let nested = input.path().join("box-a");
        fs::create_dir(&nested).expect("mkdir");
        write_scan(&nested, "5-R.jpg", 100);
        write_scan(&nested, "5-V.jpg", 150);

        let run = orchestrator(BatchConfig {
            preview: true,
            ..fast_config()
        })
        .run(input.path(), None)
        .expect("run");
        assert_eq!(run.statistics.succeeded, 1);
        assert_eq!(run.fiches[0].sequence, "005");
    }

    #[test]
    fn atomic_write_replaces_existing_files() {
        let dir = TempDir::new().expect("tempdir");
        let target = dir.path().join("metadata.json");

        atomic_write(&target, b"first").expect("first write");
        atomic_write(&target, b"second").expect("second write");

        assert_eq!(fs::read(&target).expect("read"), b"second");
        // No stray temp files left beside the target.
        let names: Vec<_> = fs::read_dir(dir.path())
            .expect("read dir")
            .map(|e| e.expect("entry").file_name())
            .collect();
        assert_eq!(names.len(), 1);
    }
}
