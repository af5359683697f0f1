// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Randomized low-rank factorisation of the action feature matrix.
//!
//! Both engines follow the same skeleton: project the (shrink-scaled) matrix
//! onto a handful of random directions, orthonormalise, and finish with an
//! exact SVD of the small `d × d` core. Neither ever materialises a dense
//! copy of the full matrix.

mod one_pass;
mod two_pass;

pub use one_pass::OnePassSvd;
pub use two_pass::TwoPassSvd;

use nalgebra::DMatrix;

use crate::matrix::FeatureMatrix;
use crate::projection;

/// Columns whose norm falls below this are treated as numerically zero.
pub(crate) const COLUMN_EPSILON: f32 = 1e-6;

/// Residual share below which a column counts as dependent on its
/// predecessors.
pub(crate) const RELATIVE_EPSILON: f32 = 1e-4;

/// Share of the singular-value mass kept by [`effective_rank`].
pub const SINGULAR_MASS: f32 = 0.99;

/// Iteration cap of the `d × d` core decomposition.
pub(crate) const CORE_SVD_MAX_ITERATIONS: usize = 1_000;

/// Transient output of one factorisation.
#[derive(Clone, Debug)]
pub struct LowRankFactors {
    /// Action embedding, one row per action.
    pub u: DMatrix<f32>,
    /// Singular values in descending order, aligned with `u`'s columns.
    pub singular_values: Vec<f32>,
}

impl LowRankFactors {
    /// Embedding reported for degenerate matrices.
    pub fn empty() -> Self {
        Self {
            u: DMatrix::zeros(0, 0),
            singular_values: Vec::new(),
        }
    }

    pub fn rows(&self) -> usize {
        self.u.nrows()
    }

    pub fn cols(&self) -> usize {
        self.u.ncols()
    }

    pub fn is_empty(&self) -> bool {
        self.u.nrows() == 0
    }
}

/// Strategy interface shared by the one-pass and two-pass engines.
pub trait LowRankEngine: Send {
    /// Short identifier used in logs.
    fn name(&self) -> &'static str;

    /// Target rank `d`.
    fn rank(&self) -> usize;

    /// Factors `diag(shrink) · a` for the given round. Degenerate matrices
    /// yield [`LowRankFactors::empty`].
    fn factor(&mut self, a: &FeatureMatrix, shrink: &[f32], round: u64) -> LowRankFactors;
}

/// Smallest number of leading singular values whose running sum exceeds
/// 99% of the total. Empty input yields zero.
pub fn effective_rank(singular_values: &[f32]) -> usize {
    if singular_values.is_empty() {
        return 0;
    }
    let total: f32 = singular_values.iter().sum();
    let mut running = 0.0f32;
    let mut count = 0usize;
    for value in singular_values {
        count += 1;
        running += value;
        if running > SINGULAR_MASS * total {
            break;
        }
    }
    count
}

/// Modified Gram-Schmidt over the columns of `m`, in place, with one
/// re-orthogonalisation sweep. Columns that collapse below
/// [`COLUMN_EPSILON`] or lose all but [`RELATIVE_EPSILON`] of their
/// original norm are linearly dependent and get zeroed.
pub fn gram_schmidt(m: &mut DMatrix<f32>) {
    let cols = m.ncols();
    for i in 0..cols {
        let original = m.column(i).norm();
        for _ in 0..2 {
            for j in 0..i {
                let projection = m.column(j).dot(&m.column(i));
                if projection != 0.0 {
                    let basis = m.column(j).clone_owned();
                    m.column_mut(i).axpy(-projection, &basis, 1.0);
                }
            }
        }
        let norm = m.column(i).norm();
        if norm > COLUMN_EPSILON && norm > RELATIVE_EPSILON * original {
            m.column_mut(i).unscale_mut(norm);
        } else {
            m.column_mut(i).fill(0.0);
        }
    }
}

/// Square `d × d` Gaussian mixing matrix for `seed`.
pub(crate) fn mixing_matrix(seed: u64, d: usize) -> DMatrix<f32> {
    DMatrix::from_fn(d, d, |inner, column| {
        projection::mixing_entry(seed, inner, column)
    })
}

/// Final stage shared by both engines: given an orthonormal basis `z` of the
/// sampled range and the projected matrix `b`, rotate `z` onto the singular
/// directions of `zᵀ b` and return them sorted by singular value.
///
/// Non-finite input or a core decomposition that fails to converge yields
/// [`LowRankFactors::empty`].
pub(crate) fn finish_with_core_svd(z: &DMatrix<f32>, b: &DMatrix<f32>) -> LowRankFactors {
    let core = z.transpose() * b;
    if !core.iter().all(|value| value.is_finite()) {
        return LowRankFactors::empty();
    }
    let Some(svd) = core.try_svd(true, false, f32::EPSILON, CORE_SVD_MAX_ITERATIONS) else {
        return LowRankFactors::empty();
    };
    let Some(core_u) = svd.u else {
        return LowRankFactors::empty();
    };

    let mut order: Vec<usize> = (0..svd.singular_values.len()).collect();
    order.sort_by(|&l, &r| {
        svd.singular_values[r]
            .partial_cmp(&svd.singular_values[l])
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let rotated = z * core_u;
    let mut u = DMatrix::zeros(rotated.nrows(), order.len());
    let mut singular_values = Vec::with_capacity(order.len());
    for (dst, &src) in order.iter().enumerate() {
        u.set_column(dst, &rotated.column(src));
        singular_values.push(svd.singular_values[src].abs());
    }
    LowRankFactors { u, singular_values }
}

/// Applies `diag(shrink)` on the left when shrink factors cover every row.
#[inline]
pub(crate) fn row_scale(shrink: &[f32], row: usize) -> f32 {
    shrink.get(row).copied().unwrap_or(1.0)
}
