// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Stateless Gaussian projection source.
//!
//! Every projection entry is a pure function of an integer index, so the
//! low-rank engines never carry generator state: two runs with the same seed
//! and round draw the same matrices, and parallel workers can sample without
//! coordination.

const LCG_MULTIPLIER: u64 = 0xeece_66d5_deec_e66d;
const LCG_INCREMENT: u64 = 2_147_483_647;
const EXPONENT_BIAS: u32 = 127 << 23;
const MAX_REJECTIONS: usize = 64;
const ROUND_STRIDE: u64 = 0x9e37_79b9_7f4a_7c15;
const TALL_SALT: u64 = 0x5851_f42d_4c95_7f2d;

/// Advances `state` and maps it to a uniform value in `[0, 1)`.
#[inline]
fn uniform_step(state: &mut u64) -> f32 {
    *state = state
        .wrapping_mul(LCG_MULTIPLIER)
        .wrapping_add(LCG_INCREMENT);
    let mantissa = ((*state >> 25) & 0x7f_ffff) as u32;
    f32::from_bits(mantissa | EXPONENT_BIAS) - 1.0
}

/// Uniform value in `[0, 1)` derived from `index`.
#[inline]
pub fn uniform(index: u64) -> f32 {
    let mut state = index;
    uniform_step(&mut state)
}

/// Standard-normal-like value derived from `index` via the polar Box-Muller
/// transform.
#[inline]
pub fn gaussian(index: u64) -> f32 {
    let mut state = index;
    for _ in 0..MAX_REJECTIONS {
        let x1 = 2.0 * uniform_step(&mut state) - 1.0;
        let x2 = 2.0 * uniform_step(&mut state) - 1.0;
        let r2 = x1 * x1 + x2 * x2;
        if r2 < 1.0 && r2 > 0.0 {
            return (-2.0 * r2.ln() / r2).sqrt() * x1;
        }
    }
    0.0
}

/// Seed shared by every projection of one round.
#[inline]
pub fn round_seed(seed: u64, round: u64) -> u64 {
    seed.wrapping_add(round.wrapping_mul(ROUND_STRIDE))
}

/// Seed of the tall projections, kept apart from the mixing matrix draws.
#[inline]
pub fn tall_seed(seed: u64) -> u64 {
    seed ^ TALL_SALT
}

/// Entry `(inner, column)` of the square `d × d` mixing matrix.
#[inline]
pub fn mixing_entry(seed: u64, inner: usize, column: usize) -> f32 {
    gaussian(seed.wrapping_add(column as u64).wrapping_add(inner as u64))
}

/// Entry `(row, column)` of a tall projection with `width` columns. Distinct
/// `(row, column)` pairs map to distinct indices.
#[inline]
pub fn tall_entry(seed: u64, row: u64, column: usize, width: usize) -> f32 {
    gaussian(
        seed.wrapping_add(row.wrapping_mul(width as u64))
            .wrapping_add(column as u64),
    )
}

/// Fills `out` with row `row` of a tall projection.
#[inline]
pub fn fill_tall_row(seed: u64, row: u64, out: &mut [f32]) {
    let width = out.len();
    for (column, slot) in out.iter_mut().enumerate() {
        *slot = tall_entry(seed, row, column, width);
    }
}
