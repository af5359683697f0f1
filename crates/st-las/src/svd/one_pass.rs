// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use nalgebra::DMatrix;
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use tracing::trace;

#[cfg(feature = "simd")]
use wide::f32x8;

use super::{finish_with_core_svd, gram_schmidt, mixing_matrix, row_scale};
use super::{LowRankEngine, LowRankFactors};
use crate::matrix::FeatureMatrix;
use crate::projection;
use crate::{LasError, LasResult};

#[cfg(feature = "simd")]
const LANES: usize = 8;

/// Single-sweep randomized factorisation.
///
/// Each action row of `diag(shrink) · A · Ω` only depends on that row of
/// `A`, so rows are split into fixed-size blocks and projected on the
/// engine's own worker pool. Within a row, activations are folded in column
/// order, which keeps the result bit-identical for any pool or block size.
pub struct OnePassSvd {
    d: usize,
    seed: u64,
    block_size: usize,
    explicit_simd: bool,
    threads: usize,
    pool: ThreadPool,
}

impl OnePassSvd {
    /// `block_size == 0` splits the rows evenly across the pool.
    pub fn new(
        d: usize,
        seed: u64,
        thread_pool_size: usize,
        block_size: usize,
        explicit_simd: bool,
    ) -> LasResult<Self> {
        let threads = thread_pool_size.max(1);
        let pool = ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|index| format!("st-las-one-pass-{index}"))
            .build()
            .map_err(|err| LasError::ThreadPool(err.to_string()))?;
        Ok(Self {
            d: d.max(1),
            seed,
            block_size,
            explicit_simd: explicit_simd && cfg!(feature = "simd"),
            threads,
            pool,
        })
    }

    pub fn threads(&self) -> usize {
        self.threads
    }

    pub fn uses_explicit_simd(&self) -> bool {
        self.explicit_simd
    }

    fn block_rows(&self, rows: usize) -> usize {
        if self.block_size == 0 {
            rows.div_ceil(self.threads).max(1)
        } else {
            self.block_size
        }
    }

    /// Row-major `rows × d` buffer holding `diag(shrink) · A · Ω`.
    fn project_rows(&self, a: &FeatureMatrix, shrink: &[f32], seed: u64) -> Vec<f32> {
        let d = self.d;
        let block = self.block_rows(a.rows());
        let csr = a.as_csr();
        let tall = projection::tall_seed(seed);
        let explicit_simd = self.explicit_simd;
        let mut projected = vec![0.0f32; a.rows() * d];

        self.pool.install(|| {
            projected
                .par_chunks_mut(block * d)
                .enumerate()
                .for_each(|(block_id, chunk)| {
                    let mut omega = vec![0.0f32; d];
                    for (local, out) in chunk.chunks_mut(d).enumerate() {
                        let row = block_id * block + local;
                        let scale = row_scale(shrink, row);
                        let Some(view) = csr.outer_view(row) else {
                            continue;
                        };
                        for (col, &value) in view.iter() {
                            projection::fill_tall_row(tall, col as u64, &mut omega);
                            accumulate(out, &omega, scale * value, explicit_simd);
                        }
                    }
                });
        });
        projected
    }
}

#[inline]
fn accumulate(out: &mut [f32], omega: &[f32], coeff: f32, explicit_simd: bool) {
    #[cfg(feature = "simd")]
    {
        if explicit_simd {
            accumulate_simd(out, omega, coeff);
            return;
        }
    }
    #[cfg(not(feature = "simd"))]
    let _ = explicit_simd;
    accumulate_scalar(out, omega, coeff);
}

#[inline]
fn accumulate_scalar(out: &mut [f32], omega: &[f32], coeff: f32) {
    for (slot, weight) in out.iter_mut().zip(omega.iter()) {
        *slot += coeff * *weight;
    }
}

#[cfg(feature = "simd")]
#[inline]
fn accumulate_simd(out: &mut [f32], omega: &[f32], coeff: f32) {
    let splat = f32x8::splat(coeff);
    let full = out.len() / LANES * LANES;
    let (head, tail) = out.split_at_mut(full);
    for (dst, src) in head.chunks_exact_mut(LANES).zip(omega.chunks_exact(LANES)) {
        let mut lanes = [0.0f32; LANES];
        lanes.copy_from_slice(dst);
        let mut weights = [0.0f32; LANES];
        weights.copy_from_slice(src);
        let acc = f32x8::from(lanes) + splat * f32x8::from(weights);
        dst.copy_from_slice(&acc.to_array());
    }
    accumulate_scalar(tail, &omega[full..], coeff);
}

impl LowRankEngine for OnePassSvd {
    fn name(&self) -> &'static str {
        "one_pass_svd"
    }

    fn rank(&self) -> usize {
        self.d
    }

    fn factor(&mut self, a: &FeatureMatrix, shrink: &[f32], round: u64) -> LowRankFactors {
        if !a.is_non_degenerate() {
            return LowRankFactors::empty();
        }
        let seed = projection::round_seed(self.seed, round);
        let rows = a.rows();
        let projected = self.project_rows(a, shrink, seed);
        let b = DMatrix::from_row_slice(rows, self.d, &projected);

        let mut z = &b * mixing_matrix(seed, self.d);
        gram_schmidt(&mut z);
        let factors = finish_with_core_svd(&z, &b);
        trace!(
            engine = self.name(),
            rows,
            cols = a.cols(),
            nnz = a.nnz(),
            threads = self.threads,
            block = self.block_rows(rows),
            "factored action matrix"
        );
        factors
    }
}
