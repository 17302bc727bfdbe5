use anyhow::Result;
use clap::Parser;

use watchdata_core::config::WatchdataConfig;
use watchdata_daemon::cli::DaemonCli;
use watchdata_daemon::{logging, orchestrator};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = DaemonCli::parse();

    // file -> env -> CLI, then validate
    let mut config = WatchdataConfig::from_file(&cli.config)
        .await
        .map_err(|e| anyhow::anyhow!("failed to load config: {}", e))?;
    config.apply_env_overrides();
    cli.apply_overrides(&mut config);
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("config validation failed: {}", e))?;

    if cli.validate {
        println!("configuration OK: {}", cli.config.display());
        return Ok(());
    }

    logging::init_tracing(&config.general)?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %cli.config.display(),
        "watchdata-daemon starting"
    );

    let result = orchestrator::run_daemon(config).await;
    match &result {
        Ok(()) => tracing::info!("watchdata-daemon stopped"),
        Err(e) => tracing::error!(error = %e, "watchdata-daemon exited with error"),
    }
    result
}
