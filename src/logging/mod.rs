//! Structured Logging & Tracing
//!
//! Structured logging via the `tracing` crate:
//! - One default level plus per-module levels, parsed into an `EnvFilter`
//! - `RUST_LOG` overrides the configured filter
//! - A span around every destruction frame
//! - Idempotent initialization (tests, plugin and host may all call it)

use bevy::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::Once;
use tracing_subscriber::EnvFilter;

use crate::error::DestructionError;

/// Installs the global subscriber; `DestructionPlugin` adds it when missing
#[derive(Default)]
pub struct LoggingPlugin {
    pub config: TracingConfig,
}

impl Plugin for LoggingPlugin {
    fn build(&self, _app: &mut App) {
        if let Err(e) = init_tracing(&self.config) {
            eprintln!("tracing not initialised: {e}");
        }
    }
}

/// Levels are `EnvFilter` level names (`trace` .. `error`, `off`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TracingConfig {
    pub default_level: String,
    /// `(module path, level)`
    pub module_levels: Vec<(String, String)>,
    pub show_targets: bool,
}

impl Default for TracingConfig {
    fn default() -> Self {
        let module =
            |path: &str, level: &str| (format!("tower_destruction::{path}"), level.to_string());
        Self {
            default_level: "info".to_string(),
            module_levels: vec![
                module("engine", "info"),
                module("fracture", "info"),
                module("contacts", "warn"),
                module("profiling", "warn"),
            ],
            show_targets: true,
        }
    }
}

impl TracingConfig {
    pub fn to_env_filter_string(&self) -> String {
        std::iter::once(self.default_level.clone())
            .chain(
                self.module_levels
                    .iter()
                    .map(|(module, level)| format!("{module}={level}")),
            )
            .collect::<Vec<_>>()
            .join(",")
    }

    /// `RUST_LOG` when set, otherwise the configured levels
    pub fn env_filter(&self) -> Result<EnvFilter, DestructionError> {
        if let Ok(filter) = EnvFilter::try_from_default_env() {
            return Ok(filter);
        }
        EnvFilter::try_new(self.to_env_filter_string())
            .map_err(|e| DestructionError::InvalidConfig(format!("tracing filter: {e}")))
    }
}

static TRACING_INIT: Once = Once::new();

/// Initialize tracing with default settings (idempotent)
pub fn init_tracing_default() {
    let config = TracingConfig::default();
    let filter = config
        .env_filter()
        .unwrap_or_else(|_| EnvFilter::new(&config.default_level));
    TRACING_INIT.call_once(move || install(filter, config.show_targets));
}

/// Initialize tracing with a custom config (first successful call wins)
pub fn init_tracing(config: &TracingConfig) -> Result<(), DestructionError> {
    let filter = config.env_filter()?;
    let show_targets = config.show_targets;
    TRACING_INIT.call_once(move || install(filter, show_targets));
    Ok(())
}

fn install(filter: EnvFilter, show_targets: bool) {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(show_targets)
        .with_thread_ids(false)
        .compact();

    // A host (e.g. Bevy's LogPlugin) may already own the global subscriber
    let _ = subscriber.try_init();
}

/// Span guard covering one destruction frame
pub struct TimingSpan {
    _span: tracing::span::EnteredSpan,
}

impl TimingSpan {
    pub fn new(name: &str, frame: u64) -> Self {
        let span = tracing::debug_span!("destruction", name = name, frame = frame);
        Self {
            _span: span.entered(),
        }
    }
}
