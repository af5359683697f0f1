// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use nalgebra::DMatrix;
use tracing::trace;

use super::{finish_with_core_svd, gram_schmidt, mixing_matrix, row_scale};
use super::{LowRankEngine, LowRankFactors};
use crate::matrix::FeatureMatrix;
use crate::projection;

/// Two-sweep randomized factorisation.
///
/// The first sweep samples the row space through `Aᵀ`, the second projects
/// `A` onto that orthonormal basis, so the reported singular values are
/// those of `A` itself whenever its rank fits in `d`. Optional power
/// iterations sharpen the row-space estimate for slowly decaying spectra.
/// Work stays proportional to the number of occupied columns, not to the
/// hashed table width.
#[derive(Clone, Debug)]
pub struct TwoPassSvd {
    d: usize,
    seed: u64,
    power_iterations: usize,
}

impl TwoPassSvd {
    pub fn new(d: usize, seed: u64) -> Self {
        Self {
            d: d.max(1),
            seed,
            power_iterations: 0,
        }
    }

    pub fn with_power_iterations(mut self, iterations: usize) -> Self {
        self.power_iterations = iterations;
        self
    }

    pub fn power_iterations(&self) -> usize {
        self.power_iterations
    }
}

/// `diag(shrink) · A · x` where `x` is indexed by compacted column.
fn times(a: &FeatureMatrix, shrink: &[f32], columns: &[usize], x: &DMatrix<f32>) -> DMatrix<f32> {
    let d = x.ncols();
    let csr = a.as_csr();
    let mut out = DMatrix::zeros(a.rows(), d);
    for (row, view) in csr.outer_iterator().enumerate() {
        let scale = row_scale(shrink, row);
        for (col, &value) in view.iter() {
            let Ok(pos) = columns.binary_search(&col) else {
                continue;
            };
            let coeff = scale * value;
            for c in 0..d {
                out[(row, c)] += coeff * x[(pos, c)];
            }
        }
    }
    out
}

/// `(diag(shrink) · A)ᵀ · x`, rows of the result indexed by compacted column.
fn transpose_times(
    a: &FeatureMatrix,
    shrink: &[f32],
    columns: &[usize],
    x: &DMatrix<f32>,
) -> DMatrix<f32> {
    let d = x.ncols();
    let csr = a.as_csr();
    let mut out = DMatrix::zeros(columns.len(), d);
    for (row, view) in csr.outer_iterator().enumerate() {
        let scale = row_scale(shrink, row);
        for (col, &value) in view.iter() {
            let Ok(pos) = columns.binary_search(&col) else {
                continue;
            };
            let coeff = scale * value;
            for c in 0..d {
                out[(pos, c)] += coeff * x[(row, c)];
            }
        }
    }
    out
}

impl LowRankEngine for TwoPassSvd {
    fn name(&self) -> &'static str {
        "two_pass_svd"
    }

    fn rank(&self) -> usize {
        self.d
    }

    fn factor(&mut self, a: &FeatureMatrix, shrink: &[f32], round: u64) -> LowRankFactors {
        if !a.is_non_degenerate() {
            return LowRankFactors::empty();
        }
        let d = self.d;
        let seed = projection::round_seed(self.seed, round);
        let tall = projection::tall_seed(seed);
        let columns = a.occupied_columns();

        let omega = DMatrix::from_fn(a.rows(), d, |row, col| {
            projection::tall_entry(tall, row as u64, col, d)
        });
        let mut y = transpose_times(a, shrink, &columns, &omega);
        gram_schmidt(&mut y);
        for _ in 0..self.power_iterations {
            let mut range = times(a, shrink, &columns, &y);
            gram_schmidt(&mut range);
            y = transpose_times(a, shrink, &columns, &range);
            gram_schmidt(&mut y);
        }

        let b = times(a, shrink, &columns, &y);
        let mut z = &b * mixing_matrix(seed, d);
        gram_schmidt(&mut z);
        let factors = finish_with_core_svd(&z, &b);
        trace!(
            engine = self.name(),
            rows = a.rows(),
            occupied = columns.len(),
            power_iterations = self.power_iterations,
            "factored action matrix"
        );
        factors
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::svd::OnePassSvd;
    use approx::assert_abs_diff_eq;

    /// Rank-2 matrix built from two feature templates mixed per row.
    fn rank_two(rows: usize) -> (FeatureMatrix, DMatrix<f32>) {
        let left = [(1usize, 1.0f32), (4, -2.0), (9, 0.5)];
        let right = [(4usize, 1.0f32), (6, 3.0), (12, -1.0)];
        let mut triplets = Vec::new();
        let mut dense = DMatrix::zeros(rows, 13);
        for row in 0..rows {
            let alpha = 1.0 + row as f32 * 0.25;
            let beta = (row as f32 * 0.7).cos();
            for &(col, value) in &left {
                triplets.push((row, col, alpha * value));
                dense[(row, col)] += alpha * value;
            }
            for &(col, value) in &right {
                triplets.push((row, col, beta * value));
                dense[(row, col)] += beta * value;
            }
        }
        (FeatureMatrix::from_triplets(rows, 13, &triplets), dense)
    }

    #[test]
    fn recovers_exact_spectrum_of_low_rank_matrix() {
        let (a, dense) = rank_two(15);
        let mut engine = TwoPassSvd::new(4, 1234);
        let factors = engine.factor(&a, &[], 3);
        assert_eq!(factors.rows(), 15);

        let mut exact: Vec<f32> = dense.svd(false, false).singular_values.iter().copied().collect();
        exact.sort_by(|l, r| r.partial_cmp(l).unwrap());
        assert_abs_diff_eq!(factors.singular_values[0], exact[0], epsilon = 1e-2 * exact[0]);
        assert_abs_diff_eq!(factors.singular_values[1], exact[1], epsilon = 1e-2 * exact[0]);
        assert!(factors.singular_values[2] < 1e-2 * exact[0]);
    }

    #[test]
    fn leading_direction_matches_exact_svd() {
        let (a, dense) = rank_two(15);
        let exact = dense.clone().svd(true, false);
        let (top, _) = exact
            .singular_values
            .iter()
            .enumerate()
            .fold((0, f32::MIN), |best, (i, &s)| if s > best.1 { (i, s) } else { best });
        let exact_u = exact.u.unwrap();
        let mut engine = TwoPassSvd::new(4, 99).with_power_iterations(1);
        assert_eq!(engine.power_iterations(), 1);
        assert_eq!(engine.rank(), 4);
        let factors = engine.factor(&a, &[], 0);
        let overlap = factors.u.column(0).dot(&exact_u.column(top)).abs();
        assert_abs_diff_eq!(overlap, 1.0, epsilon = 1e-3);
    }

    #[test]
    fn shrink_factors_scale_rows() {
        let (a, _) = rank_two(6);
        let mut engine = TwoPassSvd::new(3, 5);
        let base = engine.factor(&a, &[], 0);
        let doubled = engine.factor(&a, &[2.0; 6], 0);
        assert_abs_diff_eq!(doubled.singular_values[0], 2.0 * base.singular_values[0], epsilon = 1e-3 * base.singular_values[0]);
    }

    #[test]
    fn agrees_with_one_pass_on_subspace() {
        let (a, _) = rank_two(20);
        let mut two = TwoPassSvd::new(3, 8);
        let mut one = OnePassSvd::new(3, 8, 1, 0, false).unwrap();
        let u2 = two.factor(&a, &[], 1).u;
        let u1 = one.factor(&a, &[], 1).u;
        // both leading directions live in the same two-dimensional range
        let projection = u2.columns(0, 2).transpose() * u1.column(0);
        assert_abs_diff_eq!(projection.norm(), 1.0, epsilon = 1e-3);
    }

    #[test]
    fn degenerate_matrix_yields_empty_embedding() {
        let mut engine = TwoPassSvd::new(3, 5);
        assert!(engine.factor(&FeatureMatrix::empty(), &[], 0).is_empty());
    }
}
