// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! C-approximate barycentric spanner over the action embedding.
//!
//! The basis `X` holds one embedding row per slot. Replacing slot `i` with a
//! row `v` scales `|det X|` by `|(X⁻¹ v)_i|`, so each candidate is scored
//! with a single dot product against row `i` of the maintained inverse, and
//! the inverse itself is refreshed with a Sherman-Morrison rank-one update.

use nalgebra::{DMatrix, DVector};
use tracing::trace;

/// Volumes at or below this are treated as a rank-deficient embedding.
const VOLUME_EPSILON: f64 = 1e-9;

/// Default cap on improvement sweeps after the greedy basis is built.
pub const DEFAULT_MAX_SWEEPS: usize = 32;

/// Strategy interface for spanner selection.
pub trait SpannerSelector: Send {
    /// Selects up to `rank` rows of `u` (scaled by `shrink`) as members.
    fn compute_spanner(&mut self, u: &DMatrix<f32>, rank: usize, shrink: &[f32]);

    /// Membership query by action id.
    fn is_action_in_spanner(&self, action: u32) -> bool;

    /// Number of selected members.
    fn spanner_size(&self) -> usize;

    /// Number of actions covered by the membership bookkeeping.
    fn tracked_actions(&self) -> usize;

    /// Selected action ids in slot order.
    fn members(&self) -> &[u32];
}

/// Spanner search driven by rank-one inverse updates.
#[derive(Clone, Debug)]
pub struct OneRankSpanner {
    c: f32,
    d: usize,
    max_sweeps: usize,
    members: Vec<u32>,
    in_spanner: Vec<bool>,
    log_volume: f64,
    swaps: usize,
}

impl OneRankSpanner {
    pub fn new(c: f32, d: usize) -> Self {
        Self {
            c,
            d,
            max_sweeps: DEFAULT_MAX_SWEEPS,
            members: Vec::new(),
            in_spanner: Vec::new(),
            log_volume: 0.0,
            swaps: 0,
        }
    }

    pub fn with_max_sweeps(mut self, sweeps: usize) -> Self {
        self.max_sweeps = sweeps;
        self
    }

    pub fn approximation_factor(&self) -> f32 {
        self.c
    }

    /// `ln |det X|` of the final basis.
    pub fn log_volume(&self) -> f64 {
        self.log_volume
    }

    /// Improving swaps performed by the last computation.
    pub fn swaps(&self) -> usize {
        self.swaps
    }

    fn reset(&mut self, actions: usize) {
        self.members.clear();
        self.in_spanner.clear();
        self.in_spanner.resize(actions, false);
        self.log_volume = 0.0;
        self.swaps = 0;
    }
}

/// Row with the largest `|phi · row|`; ties resolve to the lowest index.
fn find_max_volume(rows: &DMatrix<f64>, phi: &DVector<f64>) -> (usize, f64) {
    let scores = rows * phi;
    let mut best = (0usize, f64::NEG_INFINITY);
    for (index, score) in scores.iter().enumerate() {
        let volume = score.abs();
        if volume > best.1 {
            best = (index, volume);
        }
    }
    best
}

/// Replaces column `slot` of `x` with `v` and updates `x_inv` accordingly.
fn replace_column(x: &mut DMatrix<f64>, x_inv: &mut DMatrix<f64>, slot: usize, v: &DVector<f64>) {
    let w = &*x_inv * v;
    let denom = w[slot];
    let phi = x_inv.row(slot).clone_owned();
    let mut delta = w;
    delta[slot] -= 1.0;
    *x_inv -= (delta / denom) * phi;
    x.set_column(slot, v);
}

impl SpannerSelector for OneRankSpanner {
    fn compute_spanner(&mut self, u: &DMatrix<f32>, rank: usize, shrink: &[f32]) {
        let actions = u.nrows();
        self.reset(actions);

        let r = rank.min(self.d).min(u.ncols());
        if r == 0 {
            return;
        }
        if rank >= actions {
            self.in_spanner.iter_mut().for_each(|flag| *flag = true);
            self.members = (0..actions as u32).collect();
            return;
        }

        let rows = DMatrix::<f64>::from_fn(actions, r, |row, col| {
            let scale = shrink.get(row).copied().unwrap_or(1.0) as f64;
            u[(row, col)] as f64 * scale
        });

        let mut x = DMatrix::<f64>::identity(r, r);
        let mut x_inv = DMatrix::<f64>::identity(r, r);
        let mut basis: Vec<Option<usize>> = vec![None; r];

        for slot in 0..r {
            let phi = x_inv.row(slot).transpose();
            let (row, volume) = find_max_volume(&rows, &phi);
            if volume <= VOLUME_EPSILON {
                continue;
            }
            let v = rows.row(row).transpose();
            replace_column(&mut x, &mut x_inv, slot, &v);
            basis[slot] = Some(row);
            self.log_volume += volume.ln();
        }

        let threshold = self.c.max(1.0) as f64;
        let mut sweeps = 0usize;
        loop {
            let mut changed = false;
            for slot in 0..r {
                if basis[slot].is_none() {
                    continue;
                }
                let phi = x_inv.row(slot).transpose();
                let (row, volume) = find_max_volume(&rows, &phi);
                if volume > threshold {
                    let v = rows.row(row).transpose();
                    replace_column(&mut x, &mut x_inv, slot, &v);
                    basis[slot] = Some(row);
                    self.log_volume += volume.ln();
                    self.swaps += 1;
                    changed = true;
                }
            }
            sweeps += 1;
            if !changed || sweeps >= self.max_sweeps {
                break;
            }
            if let Some(refreshed) = x.clone().try_inverse() {
                x_inv = refreshed;
            }
        }

        for row in basis.into_iter().flatten() {
            if !self.in_spanner[row] {
                self.in_spanner[row] = true;
                self.members.push(row as u32);
            }
        }
        trace!(
            actions,
            rank = r,
            members = self.members.len(),
            swaps = self.swaps,
            sweeps,
            "computed action spanner"
        );
    }

    fn is_action_in_spanner(&self, action: u32) -> bool {
        self.in_spanner
            .get(action as usize)
            .copied()
            .unwrap_or(false)
    }

    fn spanner_size(&self) -> usize {
        self.members.len()
    }

    fn tracked_actions(&self) -> usize {
        self.in_spanner.len()
    }

    fn members(&self) -> &[u32] {
        &self.members
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::projection;

    fn random_embedding(rows: usize, cols: usize, seed: u64) -> DMatrix<f32> {
        DMatrix::from_fn(rows, cols, |r, c| {
            projection::tall_entry(seed, r as u64, c, cols)
        })
    }

    #[test]
    fn small_batches_keep_every_action() {
        let u = random_embedding(3, 3, 1);
        let mut spanner = OneRankSpanner::new(2.0, 5);
        spanner.compute_spanner(&u, 3, &[]);
        assert_eq!(spanner.spanner_size(), 3);
        assert!((0..3).all(|a| spanner.is_action_in_spanner(a)));
        assert_eq!(spanner.tracked_actions(), 3);
    }

    #[test]
    fn picks_dominant_axis_rows() {
        let u = DMatrix::from_row_slice(
            5,
            2,
            &[0.1, 0.1, 3.0, 0.0, 0.2, -0.1, 0.0, -4.0, 0.3, 0.3],
        );
        let mut spanner = OneRankSpanner::new(1.5, 2);
        spanner.compute_spanner(&u, 2, &[]);
        assert_eq!(spanner.spanner_size(), 2);
        assert!(spanner.is_action_in_spanner(1));
        assert!(spanner.is_action_in_spanner(3));
        assert!(!spanner.is_action_in_spanner(0));
        assert!(!spanner.is_action_in_spanner(42));
        assert_eq!(spanner.approximation_factor(), 1.5);
        assert_eq!(spanner.swaps(), 0);
        assert!((spanner.log_volume() - 12f64.ln()).abs() < 1e-9);
    }

    #[test]
    fn result_is_c_approximate() {
        let u = random_embedding(60, 4, 17);
        let c = 2.0f32;
        let mut spanner = OneRankSpanner::new(c, 4);
        spanner.compute_spanner(&u, 4, &[]);
        assert_eq!(spanner.spanner_size(), 4);
        assert_eq!(spanner.tracked_actions(), 60);

        let x = DMatrix::<f64>::from_fn(4, 4, |row, slot| {
            u[(spanner.members()[slot] as usize, row)] as f64
        });
        let x_inv = x.try_inverse().expect("spanner basis must be invertible");
        for row in 0..60 {
            let v = DVector::from_fn(4, |i, _| u[(row, i)] as f64);
            let coeffs = &x_inv * v;
            assert!(coeffs.amax() <= c as f64 + 1e-3, "row {row}: {}", coeffs.amax());
        }
    }

    #[test]
    fn shrink_factors_favour_scaled_rows() {
        let u = DMatrix::from_row_slice(4, 1, &[1.0, 1.0, 0.5, -0.2]);
        let mut spanner = OneRankSpanner::new(2.0, 1);
        spanner.compute_spanner(&u, 1, &[1.0, 1.0, 4.0, 1.0]);
        assert_eq!(spanner.members(), &[2]);
    }

    #[test]
    fn duplicate_rows_are_selected_once() {
        let u = DMatrix::from_row_slice(4, 2, &[1.0, 0.0, 1.0, 0.0, 0.0, 1.0, 0.5, 0.5]);
        let mut spanner = OneRankSpanner::new(2.0, 2);
        spanner.compute_spanner(&u, 2, &[]);
        assert_eq!(spanner.spanner_size(), 2);
        assert!(spanner.is_action_in_spanner(0));
        assert!(!spanner.is_action_in_spanner(1));
        assert!(spanner.is_action_in_spanner(2));
    }

    #[test]
    fn rank_deficient_embedding_selects_fewer_members() {
        let u = DMatrix::from_row_slice(5, 2, &[1.0, 0.0, 2.0, 0.0, -1.0, 0.0, 0.5, 0.0, 3.0, 0.0]);
        let mut spanner = OneRankSpanner::new(2.0, 2);
        spanner.compute_spanner(&u, 2, &[]);
        assert_eq!(spanner.spanner_size(), 1);
        assert!(spanner.is_action_in_spanner(4));
    }

    #[test]
    fn zero_rank_selects_nothing() {
        let u = random_embedding(6, 2, 3);
        let mut spanner = OneRankSpanner::new(2.0, 2);
        spanner.compute_spanner(&u, 0, &[]);
        assert_eq!(spanner.spanner_size(), 0);
        assert_eq!(spanner.tracked_actions(), 6);
    }
}
