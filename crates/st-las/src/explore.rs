// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Per-call sequencing of the reduction.
//!
//! A call either leaves the predictions untouched (small batches), spreads a
//! uniform distribution over every action (no usable embedding yet), or
//! prunes the list down to the spanner members plus the best action.

use std::io::{Read, Write};

use tracing::debug;

use crate::config::LasConfig;
use crate::features::{ActionBatch, Interactions, WeightTable};
use crate::matrix::FeatureMatrixBuilder;
use crate::metrics::LasMetrics;
use crate::persist;
use crate::setup::{self, EngineKind, ResolvedSetup, UpstreamOptions};
use crate::shrink::ShrinkFactorCalculator;
use crate::spanner::{OneRankSpanner, SpannerSelector};
use crate::svd::{effective_rank, LowRankEngine, OnePassSvd, TwoPassSvd};
use crate::{LasError, LasResult};

/// Learner stacked underneath the reduction. It scores the batch and owns
/// the weights the feature matrix is read from.
pub trait BaseLearner {
    /// Fills `batch.predictions` with one score per action.
    fn predict(&mut self, batch: &mut ActionBatch);

    /// Updates the model from the labelled action in `batch`.
    fn learn(&mut self, batch: &mut ActionBatch);

    /// Whether [`BaseLearner::learn`] also leaves fresh predictions behind.
    fn learn_returns_prediction(&self) -> bool;

    fn weights(&self) -> &dyn WeightTable;

    fn interactions(&self) -> &Interactions;
}

/// Outcome of a single call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExplorationState {
    /// Batch no larger than the target rank; predictions untouched.
    Bypass,
    /// No embedding could be computed; every action got `1 / n`.
    ColdStart,
    /// Predictions pruned to spanner members plus the best action.
    Filtered,
}

impl ExplorationState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExplorationState::Bypass => "bypass",
            ExplorationState::ColdStart => "cold_start",
            ExplorationState::Filtered => "filtered",
        }
    }
}

/// Large action space exploration reduction.
pub struct LargeActionSpace {
    d: usize,
    counter: u64,
    seed: u64,
    engine: Box<dyn LowRankEngine>,
    spanner: Box<dyn SpannerSelector>,
    shrink: ShrinkFactorCalculator,
    shrink_factors: Vec<f32>,
    last_state: Option<ExplorationState>,
    last_rank: usize,
    metrics: Option<LasMetrics>,
}

impl LargeActionSpace {
    /// Builds the reduction with no upstream policy attached.
    pub fn new(config: LasConfig) -> LasResult<Self> {
        Self::from_setup(setup::resolve(config, &UpstreamOptions::default())?)
    }

    pub fn from_setup(setup: ResolvedSetup) -> LasResult<Self> {
        let ResolvedSetup {
            config,
            engine,
            seed,
            ..
        } = setup;
        let d = config.max_actions;
        let engine: Box<dyn LowRankEngine> = match engine {
            EngineKind::OnePass => Box::new(OnePassSvd::new(
                d,
                seed,
                config.thread_pool_size,
                config.block_size,
                config.explicit_simd,
            )?),
            EngineKind::TwoPass => Box::new(
                TwoPassSvd::new(d, seed).with_power_iterations(config.power_iterations),
            ),
        };
        let spanner = OneRankSpanner::new(config.spanner_c, d)
            .with_max_sweeps(config.max_spanner_sweeps);
        let shrink = ShrinkFactorCalculator::from_config(&config.shrink);
        debug!(
            d,
            seed,
            engine = engine.name(),
            rank = engine.rank(),
            spanner_c = config.spanner_c,
            shrink = shrink.is_enabled(),
            metrics = config.metrics,
            "constructed large action space reduction"
        );
        Ok(Self {
            d,
            counter: 0,
            seed,
            engine,
            spanner: Box::new(spanner),
            shrink,
            shrink_factors: Vec::new(),
            last_state: None,
            last_rank: 0,
            metrics: config.metrics.then(LasMetrics::default),
        })
    }

    /// Swaps in a different low-rank engine.
    pub fn with_engine(mut self, engine: Box<dyn LowRankEngine>) -> Self {
        self.engine = engine;
        self
    }

    /// Swaps in a different spanner strategy.
    pub fn with_spanner(mut self, spanner: Box<dyn SpannerSelector>) -> Self {
        self.spanner = spanner;
        self
    }

    pub fn max_actions(&self) -> usize {
        self.d
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn counter(&self) -> u64 {
        self.counter
    }

    pub fn set_counter(&mut self, counter: u64) {
        self.counter = counter;
    }

    pub fn engine_name(&self) -> &'static str {
        self.engine.name()
    }

    pub fn last_state(&self) -> Option<ExplorationState> {
        self.last_state
    }

    /// Shrink factors of the last non-bypass call, indexed by action id.
    pub fn last_shrink_factors(&self) -> &[f32] {
        &self.shrink_factors
    }

    /// Rank handed to the spanner on the last filtered call.
    pub fn last_effective_rank(&self) -> usize {
        self.last_rank
    }

    pub fn spanner(&self) -> &dyn SpannerSelector {
        self.spanner.as_ref()
    }

    /// Counters collected so far; `None` unless metrics were enabled.
    pub fn metrics(&self) -> Option<&LasMetrics> {
        self.metrics.as_ref()
    }

    /// Adds the collected counters to a metrics report.
    pub fn persist_metrics(&self, out: &mut serde_json::Map<String, serde_json::Value>) {
        if let Some(metrics) = &self.metrics {
            metrics.persist(out);
        }
    }

    /// Prediction-only call: score with the base learner, then filter.
    pub fn predict<B: BaseLearner + ?Sized>(
        &mut self,
        base: &mut B,
        batch: &mut ActionBatch,
    ) -> LasResult<ExplorationState> {
        base.predict(batch);
        self.update_prediction(base.weights(), base.interactions(), batch)
    }

    /// Learning call. Filtering only runs when the base learner refreshed its
    /// predictions while learning; the round counter advances either way.
    pub fn learn<B: BaseLearner + ?Sized>(
        &mut self,
        base: &mut B,
        batch: &mut ActionBatch,
    ) -> LasResult<Option<ExplorationState>> {
        base.learn(batch);
        if let Some(metrics) = self.metrics.as_mut() {
            metrics.record_label(batch);
        }
        let outcome = if base.learn_returns_prediction() {
            if let Some(metrics) = self.metrics.as_mut() {
                metrics.record_predict_in_learn();
            }
            self.update_prediction(base.weights(), base.interactions(), batch)
                .map(Some)
        } else {
            Ok(None)
        };
        self.counter += 1;
        outcome
    }

    /// Runs the reduction over predictions already present in `batch`.
    pub fn update_prediction(
        &mut self,
        weights: &dyn WeightTable,
        interactions: &Interactions,
        batch: &mut ActionBatch,
    ) -> LasResult<ExplorationState> {
        let actions = batch.action_count();
        if actions <= self.d {
            debug!(
                actions,
                d = self.d,
                state = ExplorationState::Bypass.as_str(),
                "large action space"
            );
            return Ok(self.finish(ExplorationState::Bypass, actions, actions));
        }
        if batch.predictions.len() != actions {
            return Err(LasError::DimensionMismatch {
                label: "predictions",
                expected: actions,
                got: batch.predictions.len(),
            });
        }

        self.shrink.calculate(
            self.counter,
            self.d,
            &batch.predictions,
            &mut self.shrink_factors,
        );
        let matrix = FeatureMatrixBuilder::new(weights, interactions).build(batch);
        let factors = self
            .engine
            .factor(&matrix, &self.shrink_factors, self.counter);

        if factors.is_empty() {
            let uniform = 1.0 / actions as f32;
            for pred in batch.predictions.iter_mut() {
                pred.score = uniform;
            }
            debug!(
                actions,
                state = ExplorationState::ColdStart.as_str(),
                "large action space"
            );
            return Ok(self.finish(ExplorationState::ColdStart, actions, actions));
        }

        let rank = effective_rank(&factors.singular_values).min(self.d);
        self.last_rank = rank;
        self.spanner
            .compute_spanner(&factors.u, rank, &self.shrink_factors);
        assert_eq!(
            self.spanner.tracked_actions(),
            actions,
            "spanner bookkeeping must cover every action of the batch"
        );

        let best = best_action(batch);
        let spanner = self.spanner.as_ref();
        batch
            .predictions
            .retain(|pred| Some(pred.action) == best || spanner.is_action_in_spanner(pred.action));
        debug!(
            actions,
            rank,
            spanner = spanner.spanner_size(),
            kept = batch.predictions.len(),
            state = ExplorationState::Filtered.as_str(),
            "large action space"
        );
        let kept = batch.predictions.len();
        Ok(self.finish(ExplorationState::Filtered, actions, kept))
    }

    fn finish(
        &mut self,
        state: ExplorationState,
        actions: usize,
        kept: usize,
    ) -> ExplorationState {
        if let Some(metrics) = self.metrics.as_mut() {
            metrics.record_state(state, actions, kept);
        }
        self.last_state = Some(state);
        state
    }

    /// Writes the round counter.
    pub fn save<W: Write>(&self, writer: &mut W, text: bool) -> LasResult<()> {
        persist::save_counter(writer, self.counter, text)
    }

    /// Restores the round counter; an exhausted reader leaves it untouched.
    pub fn load<R: Read>(&mut self, reader: &mut R, text: bool) -> LasResult<()> {
        if let Some(counter) = persist::load_counter(reader, text)? {
            self.counter = counter;
        }
        Ok(())
    }

    /// Combined save/restore hook driven by the model serializer.
    pub fn save_load<T: Read + Write>(
        &mut self,
        io: &mut T,
        read: bool,
        text: bool,
    ) -> LasResult<()> {
        if read {
            self.load(io, text)
        } else {
            self.save(io, text)
        }
    }
}

/// Lowest-scoring action; ties resolve to the first in prediction order.
fn best_action(batch: &ActionBatch) -> Option<u32> {
    let mut best: Option<(u32, f32)> = None;
    for pred in &batch.predictions {
        match best {
            Some((_, score)) if pred.score >= score => {}
            _ => best = Some((pred.action, pred.score)),
        }
    }
    best.map(|(action, _)| action)
}
