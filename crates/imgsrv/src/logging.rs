//! Tracing setup: stderr always, plus an optional append-mode log file.

use crate::config::LogConfig;
use anyhow::{bail, Context, Result};
use std::fs::OpenOptions;
use std::sync::Mutex;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

const LEVELS: &[&str] = &["debug", "info", "warn", "error"];

/// Install the global subscriber. `IMGSRV_LOG` overrides the configured
/// level with a full filter directive.
pub fn init(config: &LogConfig) -> Result<()> {
    if !LEVELS.contains(&config.level.as_str()) {
        bail!("unknown log level {:?}", config.level);
    }

    let filter = || {
        EnvFilter::try_from_env("IMGSRV_LOG").unwrap_or_else(|_| {
            EnvFilter::new(format!(
                "imgsrv={level},imgsrv_db={level},tower_http=warn",
                level = config.level
            ))
        })
    };

    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_filter(filter());

    let file_layer = match &config.file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("cannot open log file {}", path.display()))?;
            Some(
                fmt::layer()
                    .with_ansi(false)
                    .with_writer(Mutex::new(file))
                    .with_filter(filter()),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(file_layer)
        .init();
    Ok(())
}
