// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Scanwerk — batch preparation of recto/verso record-card scans for OCR.
//
// Entry point. Parses arguments, initialises logging, runs the batch
// orchestrator, and prints the run summary.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use scanwerk_batch::{BatchOrchestrator, BatchRun};
use scanwerk_core::config::BatchConfig;

#[derive(Parser)]
#[command(name = "scanwerk")]
#[command(
    about = "Prepare recto/verso record-card scans for OCR: pairing, deskew, \
             enhancement, fusion, and a provenance metadata document"
)]
#[command(version)]
struct Cli {
    /// Directory containing the raw recto/verso scans (searched recursively).
    #[arg(long)]
    input: PathBuf,

    /// Output directory (created automatically). Required unless --preview.
    #[arg(long, required_unless_present = "preview")]
    output: Option<PathBuf>,

    /// Width kept from the verso when fusing, in percent (55 or 100).
    #[arg(long, default_value_t = 100, value_parser = parse_crop)]
    crop: u32,

    /// Operator name, recorded in the metadata document only.
    #[arg(long, default_value = "Utilisateur")]
    operator: String,

    /// Disable automatic skew correction.
    #[arg(long)]
    skip_deskew: bool,

    /// Disable the OCR enhancement pipeline.
    #[arg(long)]
    skip_optimize: bool,

    /// Preview mode: process everything, write nothing.
    #[arg(long)]
    preview: bool,

    /// Verbose (debug-level) logging.
    #[arg(long)]
    verbose: bool,
}

/// The verso crop is a fixed choice, not a free percentage: either the full
/// back of the card or the annotated left part.
fn parse_crop(value: &str) -> Result<u32, String> {
    match value.parse::<u32>() {
        Ok(crop @ (55 | 100)) => Ok(crop),
        Ok(other) => Err(format!("crop must be 55 or 100, got {other}")),
        Err(err) => Err(err.to_string()),
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_directive = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive)),
        )
        .init();

    let config = BatchConfig {
        crop_percent: cli.crop,
        operator: cli.operator.clone(),
        auto_deskew: !cli.skip_deskew,
        optimize: !cli.skip_optimize,
        preview: cli.preview,
        ..BatchConfig::default()
    };

    tracing::info!(
        input = %cli.input.display(),
        crop = config.crop_percent,
        deskew = config.auto_deskew,
        optimize = config.optimize,
        preview = config.preview,
        "Scanwerk starting"
    );

    let orchestrator = BatchOrchestrator::new(config);
    match orchestrator.run(&cli.input, cli.output.as_deref()) {
        Ok(run) => {
            print_summary(&cli, &run);
            ExitCode::SUCCESS
        }
        Err(err) => {
            tracing::error!(error = %err, "batch aborted");
            ExitCode::FAILURE
        }
    }
}

/// Human-readable run summary, mirroring the statistics block of the
/// metadata document.
fn print_summary(cli: &Cli, run: &BatchRun) {
    let stats = &run.statistics;

    println!("{}", "=".repeat(60));
    println!("Batch complete");
    println!("  fiches processed:   {}/{}", stats.succeeded, stats.total);
    println!("  total duration:     {:.1}s", stats.total_duration_s);
    println!("  mean per fiche:     {:.1}s", stats.mean_duration_s);

    if cli.preview {
        println!("  preview mode:       nothing was written");
    } else if let Some(output) = &cli.output {
        println!("  metadata:           {}", output.join("metadata.json").display());
        println!("  images:             {}", output.join("images").display());
    }

    if stats.failed > 0 {
        println!("  errors:             {}", stats.failed);
        for error in &stats.errors {
            println!("    fiche {}: {}", error.index, error.message);
        }
    }
    if stats.warnings_total > 0 {
        println!("  quality warnings:   {}", stats.warnings_total);
    }
    println!("{}", "=".repeat(60));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crop_accepts_only_the_two_presets() {
        assert_eq!(parse_crop("55"), Ok(55));
        assert_eq!(parse_crop("100"), Ok(100));
        assert!(parse_crop("70").is_err());
        assert!(parse_crop("full").is_err());
    }

    #[test]
    fn output_is_optional_only_in_preview_mode() {
        assert!(Cli::try_parse_from(["scanwerk", "--input", "scans"]).is_err());
        assert!(Cli::try_parse_from(["scanwerk", "--input", "scans", "--preview"]).is_ok());
        assert!(
            Cli::try_parse_from(["scanwerk", "--input", "scans", "--output", "out"]).is_ok()
        );
    }

    #[test]
    fn defaults_match_the_reference_invocation() {
        let cli = Cli::try_parse_from(["scanwerk", "--input", "scans", "--preview"])
            .expect("parse");
        assert_eq!(cli.crop, 100);
        assert_eq!(cli.operator, "Utilisateur");
        assert!(!cli.skip_deskew);
        assert!(!cli.skip_optimize);
    }
}
