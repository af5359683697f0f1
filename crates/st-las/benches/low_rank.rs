// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use st_las::{FeatureMatrix, LowRankEngine, OnePassSvd, TwoPassSvd};

fn synthetic_matrix(rows: usize, cols: usize, per_row: usize) -> FeatureMatrix {
    let mut triplets = Vec::with_capacity(rows * per_row);
    for row in 0..rows {
        for k in 0..per_row {
            let col = (row * 131 + k * 977) % cols;
            let value = ((row * per_row + k) as f32 * 0.173).sin();
            triplets.push((row, col, value));
        }
    }
    FeatureMatrix::from_triplets(rows, cols, &triplets)
}

fn bench_one_pass(c: &mut Criterion) {
    let mut group = c.benchmark_group("one_pass_svd");
    for &(actions, threads) in &[(256usize, 1usize), (1024, 1), (1024, 4), (4096, 4)] {
        let matrix = synthetic_matrix(actions, 1 << 18, 24);
        let shrink = vec![1.0f32; actions];
        let id = BenchmarkId::from_parameter(format!("{actions}actions_{threads}threads"));
        group.bench_with_input(id, &matrix, |b, matrix| {
            let mut engine = OnePassSvd::new(20, 7, threads, 0, false).unwrap();
            let mut round = 0u64;
            b.iter(|| {
                round += 1;
                let factors = engine.factor(black_box(matrix), &shrink, round);
                black_box(factors.singular_values);
            });
        });
    }
    group.finish();
}

fn bench_two_pass(c: &mut Criterion) {
    let mut group = c.benchmark_group("two_pass_svd");
    for &actions in &[256usize, 1024, 4096] {
        let matrix = synthetic_matrix(actions, 1 << 18, 24);
        group.bench_with_input(BenchmarkId::from_parameter(actions), &matrix, |b, matrix| {
            let mut engine = TwoPassSvd::new(20, 7);
            b.iter(|| {
                let factors = engine.factor(black_box(matrix), &[], 0);
                black_box(factors.singular_values);
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_one_pass, bench_two_pass);
criterion_main!(benches);
