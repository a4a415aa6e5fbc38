//! Logging bootstrap for embedding applications.
//!
//! The library itself only emits `tracing` events; hosts that do not
//! install their own subscriber can call [`init_logging`] once at startup.

use anyhow::Result;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize a console subscriber with the given default level; the
/// `RUST_LOG` environment variable takes precedence when set.
pub fn init_logging(default_level: &str) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "{}={}",
            env!("CARGO_PKG_NAME").replace('-', "_"),
            default_level
        ))
    });

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_target(true))
        .try_init()
        .map_err(|err| anyhow::anyhow!("failed to initialize logging: {err}"))?;

    Ok(())
}
