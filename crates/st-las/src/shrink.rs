// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use crate::config::ShrinkConfig;
use crate::features::ActionScore;

/// Per-action scaling that dampens the score-driven bias of squarecb-style
/// exploration. Factors are indexed by action id, not prediction position.
#[derive(Clone, Debug)]
pub struct ShrinkFactorCalculator {
    gamma_scale: f32,
    gamma_exponent: f32,
    apply: bool,
}

impl ShrinkFactorCalculator {
    pub fn new(gamma_scale: f32, gamma_exponent: f32, apply: bool) -> Self {
        Self {
            gamma_scale,
            gamma_exponent,
            apply,
        }
    }

    pub fn from_config(config: &ShrinkConfig) -> Self {
        Self::new(config.gamma_scale, config.gamma_exponent, config.apply)
    }

    pub fn is_enabled(&self) -> bool {
        self.apply
    }

    /// Exploration temperature at `counter`.
    pub fn gamma(&self, counter: u64) -> f32 {
        self.gamma_scale * (counter as f32).powf(self.gamma_exponent)
    }

    /// Writes one factor per action into `out`.
    ///
    /// `max_actions` is the target rank and must be at least one.
    pub fn calculate(
        &self,
        counter: u64,
        max_actions: usize,
        preds: &[ActionScore],
        out: &mut Vec<f32>,
    ) {
        out.clear();
        out.resize(preds.len(), 1.0);
        if !self.apply || preds.is_empty() {
            return;
        }
        debug_assert!(max_actions >= 1);

        let rank = max_actions as f32;
        let min_score = preds
            .iter()
            .map(|pred| pred.score)
            .fold(f32::INFINITY, f32::min);
        let slope = self.gamma(counter) / (4.0 * rank);
        for pred in preds {
            let factor = (1.0 + rank + slope * (pred.score - min_score)).sqrt();
            if let Some(slot) = out.get_mut(pred.action as usize) {
                *slot = factor;
            }
        }
    }
}
