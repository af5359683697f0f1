// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Per-instance counters reported alongside the model.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::explore::ExplorationState;
use crate::features::ActionBatch;

/// Prefix of every key written by [`LasMetrics::persist`].
pub const METRIC_PREFIX: &str = "cbea_las_";

/// Counters accumulated over the lifetime of a reduction instance.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct LasMetrics {
    pub bypass: u64,
    pub cold_start: u64,
    pub filtered: u64,
    /// Learning calls whose base learner also refreshed predictions.
    pub predict_in_learn: u64,
    pub labeled_examples: u64,
    pub label_first_action: u64,
    pub label_not_first: u64,
    pub non_zero_cost: u64,
    pub sum_cost: f64,
    /// Actions seen by non-bypass calls.
    pub actions_seen: u64,
    /// Predictions left after those calls.
    pub actions_kept: u64,
}

impl LasMetrics {
    pub fn record_state(&mut self, state: ExplorationState, actions: usize, kept: usize) {
        match state {
            ExplorationState::Bypass => {
                self.bypass += 1;
                return;
            }
            ExplorationState::ColdStart => self.cold_start += 1,
            ExplorationState::Filtered => self.filtered += 1,
        }
        self.actions_seen += actions as u64;
        self.actions_kept += kept as u64;
    }

    /// Records the first labelled action of a learning batch, if any.
    pub fn record_label(&mut self, batch: &ActionBatch) {
        let Some((position, label)) = batch
            .actions
            .iter()
            .enumerate()
            .find_map(|(position, action)| action.label.map(|label| (position, label)))
        else {
            return;
        };
        self.labeled_examples += 1;
        self.sum_cost += label.cost as f64;
        if label.cost != 0.0 {
            self.non_zero_cost += 1;
        }
        if position == 0 {
            self.label_first_action += 1;
        } else {
            self.label_not_first += 1;
        }
    }

    pub fn record_predict_in_learn(&mut self) {
        self.predict_in_learn += 1;
    }

    /// Total non-learning-only calls that reached the reduction.
    pub fn calls(&self) -> u64 {
        self.bypass + self.cold_start + self.filtered
    }

    /// Share of actions retained by non-bypass calls.
    pub fn kept_fraction(&self) -> Option<f64> {
        (self.actions_seen > 0).then(|| self.actions_kept as f64 / self.actions_seen as f64)
    }

    /// Writes every counter into `out` under [`METRIC_PREFIX`].
    pub fn persist(&self, out: &mut Map<String, Value>) {
        let entries = [
            ("bypass", Value::from(self.bypass)),
            ("cold_start", Value::from(self.cold_start)),
            ("filtered", Value::from(self.filtered)),
            ("predict_in_learn", Value::from(self.predict_in_learn)),
            ("labeled_examples", Value::from(self.labeled_examples)),
            ("label_first_action", Value::from(self.label_first_action)),
            ("label_not_first", Value::from(self.label_not_first)),
            ("non_zero_cost", Value::from(self.non_zero_cost)),
            ("sum_cost", Value::from(self.sum_cost)),
            ("actions_seen", Value::from(self.actions_seen)),
            ("actions_kept", Value::from(self.actions_kept)),
        ];
        for (name, value) in entries {
            out.insert(format!("{METRIC_PREFIX}{name}"), value);
        }
    }
}
