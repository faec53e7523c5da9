// ── Log subscriber ──

use tracing_subscriber::EnvFilter;

use crate::{ConfigError, Settings};

/// Environment variable checked before `RUST_LOG`.
pub const LOG_ENV: &str = "PODKIT_LOG";

fn verbosity_level(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    }
}

fn env_filter(fallback: &str) -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(fallback))
}

fn install(filter: EnvFilter, json: bool) -> Result<(), ConfigError> {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    let installed = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    installed.map_err(|e| ConfigError::Logging(e.to_string()))
}

/// Install a stderr subscriber. `PODKIT_LOG` wins, then `RUST_LOG`, then a
/// level derived from `verbosity` (0 = warn … 3+ = trace).
pub fn init_tracing(verbosity: u8, json: bool) -> Result<(), ConfigError> {
    install(env_filter(verbosity_level(verbosity)), json)
}

impl Settings {
    /// Like [`init_tracing`], with `log_level` and `log_json` taken from the
    /// settings. `log_level` replaces the verbosity-derived default.
    pub fn init_tracing(&self, verbosity: u8) -> Result<(), ConfigError> {
        let fallback = self
            .log_level
            .as_deref()
            .unwrap_or_else(|| verbosity_level(verbosity));
        install(env_filter(fallback), self.log_json)
    }
}
