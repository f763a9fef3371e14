//! Logging setup.
//!
//! `RUST_LOG` wins when set; otherwise the filter starts at `info` (or
//! `debug` with `--verbose`) and can be swapped at runtime through the
//! reload handle, which backs `PUT /log_level`.

use aicrew_gateway::LogLevelControl;
use std::sync::Arc;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, Registry, fmt, reload};

pub struct LogControl {
    handle: reload::Handle<EnvFilter, Registry>,
}

impl LogControl {
    /// Replace the active filter with `directives`.
    pub fn apply(&self, directives: &str) -> Result<(), String> {
        let filter = EnvFilter::try_new(directives).map_err(|e| e.to_string())?;
        self.handle.reload(filter).map_err(|e| e.to_string())
    }
}

impl LogLevelControl for LogControl {
    fn set_level(&self, level: &str) -> Result<(), String> {
        self.apply(level)
    }
}

pub fn env_filter_set() -> bool {
    std::env::var_os(EnvFilter::DEFAULT_ENV).is_some()
}

/// Install the global subscriber.
pub fn init(default_level: &str, json: bool) -> Arc<LogControl> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let (filter, handle) = reload::Layer::new(filter);

    tracing_subscriber::registry()
        .with(filter)
        .with(json.then(|| fmt::layer().json().with_target(false)))
        .with((!json).then(|| fmt::layer().with_target(false)))
        .init();

    Arc::new(LogControl { handle })
}
