// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use std::io::IsTerminal;
use std::sync::OnceLock;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

/// Environment variable holding the filter directives for this crate.
pub const LOG_ENV: &str = "ST_LAS_LOG";

static INITIALISED: OnceLock<()> = OnceLock::new();

/// Configures the global tracing subscriber.
///
/// Directives come from `ST_LAS_LOG`, then `RUST_LOG`, then `info`.
/// A failed install leaves the next call free to try again.
pub fn init_tracing() -> Result<(), InitError> {
    if INITIALISED.get().is_some() {
        return Err(InitError::AlreadyInitialised);
    }

    let ansi = std::io::stdout().is_terminal();
    let filter = env_filter()?;
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_ansi(ansi);
    Registry::default()
        .with(filter)
        .with(fmt_layer)
        .try_init()
        .map_err(|err| InitError::Subscriber(err.to_string()))?;
    let _ = INITIALISED.set(());
    Ok(())
}

fn env_filter() -> Result<EnvFilter, InitError> {
    match std::env::var(LOG_ENV) {
        Ok(raw) => filter_from(Some(&raw)),
        Err(std::env::VarError::NotPresent) => filter_from(None),
        Err(err) => Err(InitError::Env(err)),
    }
}

fn filter_from(directives: Option<&str>) -> Result<EnvFilter, InitError> {
    match directives.map(str::trim) {
        Some(raw) if !raw.is_empty() => {
            EnvFilter::try_new(raw).map_err(|err| InitError::Directive(err.to_string()))
        }
        _ => Ok(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))),
    }
}

/// Errors emitted when configuring the tracing subscriber.
#[derive(Debug, thiserror::Error)]
pub enum InitError {
    #[error("tracing has already been initialised")]
    AlreadyInitialised,
    #[error("failed to read ST_LAS_LOG: {0}")]
    Env(std::env::VarError),
    #[error("invalid filter directive: {0}")]
    Directive(String),
    #[error("failed to install subscriber: {0}")]
    Subscriber(String),
}
