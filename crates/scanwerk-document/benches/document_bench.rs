// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Criterion benchmarks for the scanwerk-document crate. Benchmarks skew
// detection and the enhancement pipeline on small synthetic card images.

use criterion::{Criterion, black_box, criterion_group, criterion_main};
use image::{DynamicImage, GrayImage, Luma};

use scanwerk_core::config::EnhanceOptions;
use scanwerk_document::{SkewDetector, optimize_for_ocr, rotate_expanded};

/// Build a small synthetic card: bright background with dark ruled lines,
/// the same pattern used in the deskew unit tests.
fn lined_card(width: u32, height: u32) -> DynamicImage {
    let mut img = GrayImage::from_pixel(width, height, Luma([235u8]));
    for band in (20..height.saturating_sub(20)).step_by(20) {
        for y in band..(band + 4).min(height) {
            for x in 10..width - 10 {
                img.put_pixel(x, y, Luma([25u8]));
            }
        }
    }
    DynamicImage::ImageLuma8(img)
}

/// Benchmark the built-in deskew strategies on a 200x140 tilted card. The
/// external tool is deliberately excluded so the numbers stay comparable
/// across hosts.
fn bench_deskew(c: &mut Criterion) {
    let tilted = rotate_expanded(&lined_card(200, 140), 3.0);
    let detector = SkewDetector::builtin(45.0);

    c.bench_function("deskew builtin (200x140)", |b| {
        b.iter(|| {
            let outcome = detector.detect(black_box(&tilted)).expect("detect");
            black_box(outcome.angle);
        });
    });
}

/// Benchmark the default enhancement pipeline (contrast + denoise + sharpen)
/// on a 160x120 card.
fn bench_enhance(c: &mut Criterion) {
    let card = lined_card(160, 120);
    let options = EnhanceOptions::default();

    c.bench_function("optimize_for_ocr (160x120)", |b| {
        b.iter(|| {
            let result = optimize_for_ocr(black_box(&card), &options).expect("enhance");
            black_box(result.image);
        });
    });
}

criterion_group!(benches, bench_deskew, bench_enhance);
criterion_main!(benches);
