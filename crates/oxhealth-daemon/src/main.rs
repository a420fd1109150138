mod config;

use anyhow::Result;
use oxhealth_engine::{
    CommandNotifier, EngineConfig, HealthEngine, Host, HostOptions, HostRegistry,
};
use std::path::Path;
use std::sync::{Arc, RwLock};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("oxhealth=info".parse()?))
        .init();

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config/health.toml".to_string());

    let config = config::DaemonConfig::load(&config_path)?;

    if !config.health.enabled {
        tracing::info!("health monitoring is disabled");
        return Ok(());
    }

    let silencers = oxhealth_engine::silence::load_silencers(
        Path::new(&config.health.silencers_file),
        oxhealth_engine::silence::SILENCERS_MAX_FILE_LEN,
    );

    let engine = Arc::new(HealthEngine::new(
        EngineConfig {
            min_run_every: config.health.run_at_least_every_secs,
            hibernation_delay: config.health.postpone_hibernation_secs,
        },
        Arc::new(RwLock::new(silencers)),
        Arc::new(CommandNotifier),
    ));

    let hostname = std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string());
    tracing::info!(host = %hostname, config = %config_path, "oxhealth starting");

    let registry = Arc::new(HostRegistry::new());
    // The embedding collector attaches charts and installs rules from the
    // configured directories; standalone the worker idles at its cadence.
    registry.add(Host::new(HostOptions {
        hostname,
        registry_hostname: None,
        health_enabled: true,
        default_exec: config.health.default_exec.clone(),
        default_recipient: config.health.default_recipient.clone(),
        log_max: config.health.log_max_entries,
    }));

    let worker = {
        let engine = engine.clone();
        let registry = registry.clone();
        tokio::task::spawn_blocking(move || engine.run(&registry))
    };

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");
    engine.request_exit();
    worker.await?;

    Ok(())
}
