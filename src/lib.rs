pub mod app;
pub mod audio;
pub mod client;
pub mod config;
pub mod container;
pub mod error;
pub mod pcm;
pub mod session;

use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Application-specific environment variable for log filtering (overrides config).
const LOG_ENV_VAR: &str = "ORDERVOICE_LOG";

/// Entry point for the capture binary: configures logging and runs the
/// interactive recording loop.
pub async fn run() -> anyhow::Result<()> {
    let config = config::Config::load().unwrap_or_default();

    // ORDERVOICE_LOG env var overrides config file level
    let filter = EnvFilter::builder()
        .with_env_var(LOG_ENV_VAR)
        .with_default_directive(config.logging.level.as_directive().parse()?)
        .from_env()?;

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    app::run(config).await
}
