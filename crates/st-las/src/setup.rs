// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Reconciles the reduction's own options with the surrounding exploration
//! stack before anything is constructed.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::{LasConfig, ShrinkConfig};
use crate::features::Interactions;
use crate::LasResult;

/// Reward target the reduction is built around.
pub const REQUIRED_CB_TYPE: &str = "mtr";

/// Options of a squarecb policy sitting on top of the reduction.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SquareCbOptions {
    pub gamma_scale: f32,
    pub gamma_exponent: f32,
}

impl Default for SquareCbOptions {
    fn default() -> Self {
        Self {
            gamma_scale: 10.0,
            gamma_exponent: 0.5,
        }
    }
}

/// What the surrounding stack was configured with.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct UpstreamOptions {
    pub squarecb: Option<SquareCbOptions>,
    pub cb_type: Option<String>,
    /// Interaction terms the base learner expands.
    pub interactions: Interactions,
}

impl UpstreamOptions {
    pub fn with_squarecb(mut self, gamma_scale: f32, gamma_exponent: f32) -> Self {
        self.squarecb = Some(SquareCbOptions {
            gamma_scale,
            gamma_exponent,
        });
        self
    }

    pub fn with_cb_type(mut self, cb_type: impl Into<String>) -> Self {
        self.cb_type = Some(cb_type.into());
        self
    }

    pub fn with_interactions(mut self, interactions: Interactions) -> Self {
        self.interactions = interactions;
        self
    }
}

/// Low-rank engine picked at construction time.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum EngineKind {
    OnePass,
    TwoPass,
}

/// Effective configuration after upstream coercions.
#[derive(Clone, Debug, PartialEq)]
pub struct ResolvedSetup {
    pub config: LasConfig,
    pub cb_type: String,
    pub engine: EngineKind,
    /// Projection seed, fixed for the lifetime of the reduction.
    pub seed: u64,
}

/// Validates `config` and applies the upstream coercions.
pub fn resolve(config: LasConfig, upstream: &UpstreamOptions) -> LasResult<ResolvedSetup> {
    config.validate()?;
    let mut config = config;

    if let Some(squarecb) = &upstream.squarecb {
        config.shrink = ShrinkConfig {
            gamma_scale: squarecb.gamma_scale,
            gamma_exponent: squarecb.gamma_exponent,
            apply: true,
        };
        info!(
            gamma_scale = squarecb.gamma_scale,
            gamma_exponent = squarecb.gamma_exponent,
            "squarecb detected, enabling shrink factors"
        );
    }

    let cb_type = match upstream.cb_type.as_deref() {
        Some(REQUIRED_CB_TYPE) | None => REQUIRED_CB_TYPE.to_string(),
        Some(other) => {
            warn!(
                requested = other,
                "large action space only supports cb_type '{REQUIRED_CB_TYPE}', overriding"
            );
            REQUIRED_CB_TYPE.to_string()
        }
    };

    let engine = if config.two_pass_svd {
        EngineKind::TwoPass
    } else {
        EngineKind::OnePass
    };

    if config.explicit_simd {
        if engine == EngineKind::TwoPass {
            warn!("explicit simd only applies to the one-pass engine, disabling");
            config.explicit_simd = false;
        } else if !cfg!(feature = "simd") {
            warn!("explicit simd requested but the `simd` feature is not compiled in");
            config.explicit_simd = false;
        } else if !upstream.interactions.is_quadratic_only() {
            warn!("explicit simd only supports quadratic interactions, disabling");
            config.explicit_simd = false;
        }
    }

    let seed = match config.seed {
        Some(seed) => seed,
        None => StdRng::from_entropy().gen(),
    };

    Ok(ResolvedSetup {
        config,
        cb_type,
        engine,
        seed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::LasError;

    #[test]
    fn squarecb_defaults_follow_the_policy() {
        let options = SquareCbOptions::default();
        assert_eq!(options.gamma_scale, 10.0);
        assert_eq!(options.gamma_exponent, 0.5);

        let upstream = UpstreamOptions {
            squarecb: Some(options),
            ..UpstreamOptions::default()
        };
        let setup = resolve(LasConfig::default().with_seed(1), &upstream).unwrap();
        assert!(setup.config.shrink.apply);
        assert_eq!(setup.config.shrink.gamma_scale, 10.0);
    }

    #[test]
    fn squarecb_enables_shrink_factors() {
        let upstream = UpstreamOptions::default().with_squarecb(20.0, 0.25);
        let setup = resolve(LasConfig::default().with_seed(1), &upstream).unwrap();
        assert!(setup.config.shrink.apply);
        assert_eq!(setup.config.shrink.gamma_scale, 20.0);
        assert_eq!(setup.config.shrink.gamma_exponent, 0.25);
    }

    #[test]
    fn shrink_stays_off_without_squarecb() {
        let setup = resolve(LasConfig::default(), &UpstreamOptions::default()).unwrap();
        assert!(!setup.config.shrink.apply);
        assert_eq!(setup.cb_type, "mtr");
    }

    #[test]
    fn foreign_cb_type_is_coerced() {
        let upstream = UpstreamOptions::default().with_cb_type("ips");
        let setup = resolve(LasConfig::default(), &upstream).unwrap();
        assert_eq!(setup.cb_type, REQUIRED_CB_TYPE);
    }

    #[test]
    fn two_pass_disables_explicit_simd() {
        let config = LasConfig::default()
            .with_two_pass(true)
            .with_explicit_simd(true);
        let setup = resolve(config, &UpstreamOptions::default()).unwrap();
        assert_eq!(setup.engine, EngineKind::TwoPass);
        assert!(!setup.config.explicit_simd);
    }

    #[test]
    fn cubic_interactions_disable_explicit_simd() {
        let upstream = UpstreamOptions::default()
            .with_interactions(Interactions::new(vec![b"abc".to_vec()]));
        let setup = resolve(LasConfig::default().with_explicit_simd(true), &upstream).unwrap();
        assert!(!setup.config.explicit_simd);
    }

    #[cfg(feature = "simd")]
    #[test]
    fn quadratic_interactions_keep_explicit_simd() {
        let upstream = UpstreamOptions::default().with_interactions(Interactions::quadratic(&["ab"]));
        let setup = resolve(LasConfig::default().with_explicit_simd(true), &upstream).unwrap();
        assert!(setup.config.explicit_simd);
    }

    #[test]
    fn explicit_seed_is_kept() {
        let setup = resolve(LasConfig::default().with_seed(4242), &UpstreamOptions::default())
            .unwrap();
        assert_eq!(setup.seed, 4242);
        assert_eq!(setup.engine, EngineKind::OnePass);
    }

    #[test]
    fn invalid_config_is_rejected() {
        let err = resolve(
            LasConfig::default().with_max_actions(0),
            &UpstreamOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(err, LasError::InvalidConfig { .. }));
    }
}
