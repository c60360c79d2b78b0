//! Tracing initialization (fmt subscriber driven by `RUST_LOG`).
//!
//! Output defaults to human-readable lines. Set `log_format: json` in the
//! configuration to emit one JSON object per event, which log shippers can
//! ingest without parsing:
//!
//! ```yaml
//! log_format: json
//! ```
//!
//! The filter is taken from `RUST_LOG` when set, otherwise `info`:
//! ```bash
//! export RUST_LOG="kemlabels=debug,tower_http=info"
//! ```

use serde::{Deserialize, Serialize};
use tracing::info;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Log line format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Initialize tracing with the console fmt layer.
pub fn init_telemetry(format: LogFormat) -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    match format {
        LogFormat::Pretty => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer())
                .try_init()?;
        }
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json().with_current_span(true))
                .try_init()?;
        }
    }

    info!(?format, "Telemetry initialized");
    Ok(())
}
