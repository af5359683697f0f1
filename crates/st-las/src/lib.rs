// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

// crates/st-las/src/lib.rs
//! SpiralTorch large action space reduction.
//!
//! Contextual-bandit exploration over thousands of candidate actions is
//! expensive, so this crate compresses a batch of actions down to a handful
//! of representatives before an exploration policy samples from it:
//! - [`matrix`] assembles the sparse action/feature matrix of a batch.
//! - [`svd`] factors it with a randomized one-pass or two-pass engine.
//! - [`spanner`] picks a c-approximate volume spanner of the embedding.
//! - [`explore`] sequences the pipeline per learn/predict call and owns the
//!   persisted round counter.

pub mod config;
pub mod explore;
pub mod features;
pub mod matrix;
pub mod metrics;
pub mod persist;
pub mod projection;
pub mod setup;
pub mod shrink;
pub mod spanner;
pub mod svd;
pub mod trace;

use thiserror::Error;

pub use config::{LasConfig, ShrinkConfig};
pub use explore::{BaseLearner, ExplorationState, LargeActionSpace};
pub use features::{
    ActionBatch, ActionScore, DenseWeights, Example, Feature, Interactions, Namespace,
    SparseWeights, WeightTable,
};
pub use matrix::{FeatureMatrix, FeatureMatrixBuilder};
pub use metrics::LasMetrics;
pub use setup::{resolve, EngineKind, ResolvedSetup, SquareCbOptions, UpstreamOptions};
pub use shrink::ShrinkFactorCalculator;
pub use spanner::{OneRankSpanner, SpannerSelector};
pub use svd::{effective_rank, LowRankEngine, LowRankFactors, OnePassSvd, TwoPassSvd};

/// Errors surfaced by the large action space reduction.
///
/// Degenerate batches are never errors; they resolve to a bypass or a
/// uniform fallback inside [`LargeActionSpace`].
#[derive(Debug, Error)]
pub enum LasError {
    /// A configuration value failed validation.
    #[error("invalid configuration for '{field}': {reason}")]
    InvalidConfig { field: &'static str, reason: String },
    /// The one-pass worker pool could not be constructed.
    #[error("failed to build worker pool: {0}")]
    ThreadPool(String),
    /// Caller supplied buffers whose length disagrees with the batch.
    #[error("{label} expected length {expected} but received {got}")]
    DimensionMismatch {
        label: &'static str,
        expected: usize,
        got: usize,
    },
    /// Persisted state did not contain the expected field.
    #[error("persisted state is missing field '{field}'")]
    MissingField { field: &'static str },
    /// Wrapper around I/O failures while saving or restoring state.
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// Wrapper around serde failures for configuration or state.
    #[error("serialization failure: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for LasError {
    fn from(value: serde_json::Error) -> Self {
        LasError::Serialization(value.to_string())
    }
}

impl From<toml::de::Error> for LasError {
    fn from(value: toml::de::Error) -> Self {
        LasError::Serialization(value.to_string())
    }
}

/// Convenient result alias for the large action space helpers.
pub type LasResult<T> = Result<T, LasError>;
