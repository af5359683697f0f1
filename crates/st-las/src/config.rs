// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Reduction configuration, loadable from TOML.
//!
//! ```toml
//! max_actions = 20
//! spanner_c = 2.0
//! two_pass_svd = false
//!
//! [shrink]
//! gamma_scale = 10.0
//! gamma_exponent = 0.5
//! apply = true
//! ```

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::spanner::DEFAULT_MAX_SWEEPS;
use crate::{LasError, LasResult};

/// Shrink factor settings inherited from the squarecb policy.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShrinkConfig {
    pub gamma_scale: f32,
    pub gamma_exponent: f32,
    pub apply: bool,
}

impl Default for ShrinkConfig {
    fn default() -> Self {
        Self {
            gamma_scale: 1.0,
            gamma_exponent: 0.0,
            apply: false,
        }
    }
}

/// Full configuration of [`crate::LargeActionSpace`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LasConfig {
    /// Target rank `d`: number of actions kept when filtering kicks in.
    pub max_actions: usize,
    /// Approximation factor of the spanner search.
    pub spanner_c: f32,
    /// Worker threads of the one-pass engine.
    pub thread_pool_size: usize,
    /// Actions per scheduled block; zero splits rows evenly across workers.
    pub block_size: usize,
    /// Explicit f32x8 kernel in the one-pass engine.
    pub explicit_simd: bool,
    /// Use the slower, more accurate two-pass engine.
    pub two_pass_svd: bool,
    /// Extra subspace iterations of the two-pass engine.
    pub power_iterations: usize,
    /// Cap on spanner improvement sweeps.
    pub max_spanner_sweeps: usize,
    /// Construction-time projection seed; drawn at random when absent.
    pub seed: Option<u64>,
    /// Collect per-instance call counters.
    pub metrics: bool,
    pub shrink: ShrinkConfig,
}

impl Default for LasConfig {
    fn default() -> Self {
        Self {
            max_actions: 20,
            spanner_c: 2.0,
            thread_pool_size: default_thread_pool_size(),
            block_size: 0,
            explicit_simd: false,
            two_pass_svd: false,
            power_iterations: 0,
            max_spanner_sweeps: DEFAULT_MAX_SWEEPS,
            seed: None,
            metrics: false,
            shrink: ShrinkConfig::default(),
        }
    }
}

/// Half of the hardware threads, leaving one for the parser.
pub fn default_thread_pool_size() -> usize {
    let available = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    (available.saturating_sub(1) / 2).max(1)
}

impl LasConfig {
    pub fn with_max_actions(mut self, max_actions: usize) -> Self {
        self.max_actions = max_actions;
        self
    }

    pub fn with_spanner_c(mut self, c: f32) -> Self {
        self.spanner_c = c;
        self
    }

    pub fn with_thread_pool(mut self, threads: usize, block_size: usize) -> Self {
        self.thread_pool_size = threads;
        self.block_size = block_size;
        self
    }

    pub fn with_two_pass(mut self, enabled: bool) -> Self {
        self.two_pass_svd = enabled;
        self
    }

    pub fn with_explicit_simd(mut self, enabled: bool) -> Self {
        self.explicit_simd = enabled;
        self
    }

    pub fn with_power_iterations(mut self, iterations: usize) -> Self {
        self.power_iterations = iterations;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_metrics(mut self, enabled: bool) -> Self {
        self.metrics = enabled;
        self
    }

    pub fn with_shrink(mut self, gamma_scale: f32, gamma_exponent: f32, apply: bool) -> Self {
        self.shrink = ShrinkConfig {
            gamma_scale,
            gamma_exponent,
            apply,
        };
        self
    }

    pub fn validate(&self) -> LasResult<()> {
        if self.max_actions == 0 {
            return Err(LasError::InvalidConfig {
                field: "max_actions",
                reason: "must be > 0".to_string(),
            });
        }
        if !self.spanner_c.is_finite() || self.spanner_c < 1.0 {
            return Err(LasError::InvalidConfig {
                field: "spanner_c",
                reason: format!("must be a finite value >= 1, got {}", self.spanner_c),
            });
        }
        if self.thread_pool_size == 0 {
            return Err(LasError::InvalidConfig {
                field: "thread_pool_size",
                reason: "must be > 0".to_string(),
            });
        }
        if self.max_spanner_sweeps == 0 {
            return Err(LasError::InvalidConfig {
                field: "max_spanner_sweeps",
                reason: "must be > 0".to_string(),
            });
        }
        let ShrinkConfig {
            gamma_scale,
            gamma_exponent,
            ..
        } = self.shrink;
        if !gamma_scale.is_finite() || gamma_scale < 0.0 {
            return Err(LasError::InvalidConfig {
                field: "shrink.gamma_scale",
                reason: format!("must be a finite value >= 0, got {gamma_scale}"),
            });
        }
        if !gamma_exponent.is_finite() || gamma_exponent < 0.0 {
            return Err(LasError::InvalidConfig {
                field: "shrink.gamma_exponent",
                reason: format!("must be a finite value >= 0, got {gamma_exponent}"),
            });
        }
        Ok(())
    }

    pub fn from_toml_str(config: &str) -> LasResult<Self> {
        let parsed: LasConfig = toml::from_str(config)?;
        parsed.validate()?;
        Ok(parsed)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> LasResult<Self> {
        let data = fs::read_to_string(path)?;
        Self::from_toml_str(&data)
    }
}
