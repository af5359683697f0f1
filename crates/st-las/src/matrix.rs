// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Sparse action/feature matrix assembly.
//!
//! Rows are actions in batch order, columns are masked feature indices.
//! Entries are collected as triplets first and materialised into CSR once,
//! which sums duplicates produced by overlapping interaction terms.

use sprs::{CsMat, TriMat};
use tracing::trace;

use crate::features::{ActionBatch, Interactions, WeightTable};

/// Immutable CSR view of one batch.
#[derive(Clone, Debug)]
pub struct FeatureMatrix {
    inner: CsMat<f32>,
}

impl FeatureMatrix {
    /// The 0×0 matrix reported for batches without any usable activation.
    pub fn empty() -> Self {
        Self {
            inner: CsMat::zero((0, 0)),
        }
    }

    /// Materialises `(row, col, value)` triplets into a `rows × cols` matrix.
    pub fn from_triplets(rows: usize, cols: usize, triplets: &[(usize, usize, f32)]) -> Self {
        if triplets.is_empty() || rows == 0 || cols == 0 {
            return Self::empty();
        }
        let mut tri = TriMat::with_capacity((rows, cols), triplets.len());
        for &(row, col, value) in triplets {
            tri.add_triplet(row, col, value);
        }
        Self {
            inner: tri.to_csr(),
        }
    }

    pub fn rows(&self) -> usize {
        self.inner.rows()
    }

    pub fn cols(&self) -> usize {
        self.inner.cols()
    }

    pub fn nnz(&self) -> usize {
        self.inner.nnz()
    }

    /// Both dimensions are nonzero.
    pub fn is_non_degenerate(&self) -> bool {
        self.rows() != 0 && self.cols() != 0
    }

    /// Nonzero `(column, value)` pairs of `row` in ascending column order.
    pub fn row(&self, row: usize) -> impl Iterator<Item = (usize, f32)> + '_ {
        self.inner
            .outer_view(row)
            .into_iter()
            .flat_map(|view| {
                view.iter()
                    .map(|(col, &value)| (col, value))
                    .collect::<Vec<_>>()
            })
    }

    /// Dense value at `(row, col)`, zero when absent.
    pub fn get(&self, row: usize, col: usize) -> f32 {
        self.inner.get(row, col).copied().unwrap_or(0.0)
    }

    /// Sorted list of columns holding at least one entry.
    pub fn occupied_columns(&self) -> Vec<usize> {
        let mut cols: Vec<usize> = self.inner.indices().to_vec();
        cols.sort_unstable();
        cols.dedup();
        cols
    }

    pub fn as_csr(&self) -> &CsMat<f32> {
        &self.inner
    }
}

/// Builds [`FeatureMatrix`] instances from action batches.
pub struct FeatureMatrixBuilder<'a> {
    weights: &'a dyn WeightTable,
    interactions: &'a Interactions,
}

impl<'a> FeatureMatrixBuilder<'a> {
    pub fn new(weights: &'a dyn WeightTable, interactions: &'a Interactions) -> Self {
        Self {
            weights,
            interactions,
        }
    }

    /// Expands every action (with the shared example merged in) and records
    /// activations whose value and learned weight are both nonzero.
    pub fn build(&self, batch: &ActionBatch) -> FeatureMatrix {
        let mask = self.weights.mask();
        let mut triplets: Vec<(usize, usize, f32)> = Vec::new();
        let mut max_col = 0u64;

        for (row, action) in batch.actions.iter().enumerate() {
            self.interactions
                .for_each_activation(action, batch.shared.as_ref(), |index, value| {
                    if value == 0.0 {
                        return;
                    }
                    let col = index & mask;
                    if self.weights.weight(col) == 0.0 {
                        return;
                    }
                    max_col = max_col.max(col);
                    triplets.push((row, col as usize, value));
                });
        }

        let rows = batch.actions.len();
        let matrix = if triplets.is_empty() {
            FeatureMatrix::empty()
        } else {
            FeatureMatrix::from_triplets(rows, max_col as usize + 1, &triplets)
        };
        trace!(
            rows = matrix.rows(),
            cols = matrix.cols(),
            nnz = matrix.nnz(),
            "assembled action feature matrix"
        );
        matrix
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::{DenseWeights, Example, Feature, Namespace, SparseWeights};

    fn action(feats: &[(u64, f32)]) -> Example {
        Example::new(vec![Namespace::new(
            b'a',
            feats.iter().map(|&(i, v)| Feature::new(i, v)).collect(),
        )])
    }

    fn all_ones(bits: u32) -> DenseWeights {
        let mut weights = DenseWeights::new(bits);
        for i in 0..(1u64 << bits) {
            weights.set(i, 1.0);
        }
        weights
    }

    #[test]
    fn rows_follow_actions_and_columns_are_masked() {
        let weights = all_ones(4);
        let inter = Interactions::default();
        let batch = ActionBatch::new(
            None,
            vec![action(&[(1, 1.0)]), action(&[]), action(&[(35, 2.0)])],
        );
        let matrix = FeatureMatrixBuilder::new(&weights, &inter).build(&batch);
        assert!(matrix.is_non_degenerate());
        assert_eq!(matrix.rows(), 3);
        assert_eq!(matrix.cols(), 4);
        assert!(matrix.occupied_columns().iter().all(|&c| (c as u64) < 16));
        assert_eq!(matrix.get(2, 3), 2.0);
        assert_eq!(matrix.row(1).count(), 0);
    }

    #[test]
    fn duplicate_entries_accumulate() {
        let weights = all_ones(4);
        let inter = Interactions::default();
        let batch = ActionBatch::new(None, vec![action(&[(2, 1.0), (18, 0.5)])]);
        let matrix = FeatureMatrixBuilder::new(&weights, &inter).build(&batch);
        assert_eq!(matrix.nnz(), 1);
        assert_eq!(matrix.get(0, 2), 1.5);
    }

    #[test]
    fn zero_features_yield_empty_matrix() {
        let weights = all_ones(4);
        let inter = Interactions::default();
        let batch = ActionBatch::new(None, vec![action(&[(1, 0.0)]), action(&[])]);
        let matrix = FeatureMatrixBuilder::new(&weights, &inter).build(&batch);
        assert!(!matrix.is_non_degenerate());
        assert_eq!((matrix.rows(), matrix.cols()), (0, 0));
    }

    #[test]
    fn untrained_weights_yield_empty_matrix() {
        let weights = SparseWeights::new(8);
        let inter = Interactions::default();
        let batch = ActionBatch::new(None, vec![action(&[(1, 1.0)]), action(&[(2, 1.0)])]);
        let matrix = FeatureMatrixBuilder::new(&weights, &inter).build(&batch);
        assert!(!matrix.is_non_degenerate());
    }

    #[test]
    fn shared_features_appear_in_every_row() {
        let weights = all_ones(6);
        let inter = Interactions::default();
        let shared = Example::new(vec![Namespace::new(b's', vec![Feature::new(9, 3.0)])]);
        let batch = ActionBatch::new(Some(shared), vec![action(&[(1, 1.0)]), action(&[(2, 1.0)])]);
        let matrix = FeatureMatrixBuilder::new(&weights, &inter).build(&batch);
        assert_eq!(matrix.rows(), 2);
        assert_eq!(matrix.get(0, 9), 3.0);
        assert_eq!(matrix.get(1, 9), 3.0);
        assert_eq!(matrix.cols(), 10);
    }
}
