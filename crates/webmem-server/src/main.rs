//! HTTP server binary for the personal web-memory search engine.
//!
//! Wires up configuration, the enrichment client (live or mock), the core
//! `Engine`, a periodic eviction sweep, and the Axum router, then serves
//! until ctrl-c/SIGTERM.

mod protocol;

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use webmem_core::{Config, Engine, EnrichmentClient, LiveProvider, MockProvider};

use crate::protocol::http::{self, HttpTransportConfig};

/// HTTP control surface for the web-memory search engine.
#[derive(Parser, Debug)]
#[command(name = "webmem-server", version, about)]
struct Cli {
    /// Path to a webmem.toml configuration file.
    #[arg(long, default_value = "webmem.toml")]
    config: PathBuf,

    /// Override the resolved store directory for this run.
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Host to bind the HTTP server to.
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Port to bind the HTTP server to.
    #[arg(long, default_value_t = 3100)]
    port: u16,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .with_target(false)
        .init();

    info!("web-memory server v{} starting", env!("CARGO_PKG_VERSION"));

    let mut config = match Config::load(&cli.config) {
        Ok(c) => c,
        Err(e) => {
            error!(error = %e, path = %cli.config.display(), "failed to load configuration, using defaults");
            Config::resolve(&webmem_core::ConfigFile::default())
        }
    };

    if let Some(data_dir) = &cli.data_dir {
        if let Err(e) = std::fs::create_dir_all(data_dir) {
            error!(error = %e, "failed to create data directory");
            std::process::exit(1);
        }
        config.store_path = data_dir.join("webmem.db");
        config.cache_persistence_path = data_dir.join("query_cache.json");
    }

    let enrichment: Arc<dyn EnrichmentClient> = match &config.enrichment_endpoint {
        Some(endpoint) => {
            info!(endpoint, "using live enrichment provider");
            match LiveProvider::new(
                endpoint,
                config.enrichment_token.clone(),
                config.enrichment_llm_model.clone(),
                config.enrichment_embedding_model.clone(),
                config.embedding_dimension,
                std::time::Duration::from_secs(config.enrichment_timeout_secs),
                config.enrichment_retries,
            ) {
                Ok(provider) => Arc::new(provider),
                Err(e) => {
                    error!(error = %e, "failed to initialize live enrichment provider");
                    std::process::exit(1);
                }
            }
        }
        None => {
            warn!("no enrichment.endpoint configured, using deterministic mock provider");
            Arc::new(MockProvider::new(config.embedding_dimension))
        }
    };

    let engine = match Engine::new(config.clone(), enrichment) {
        Ok(e) => Arc::new(e),
        Err(e) => {
            error!(error = %e, "failed to initialize engine");
            std::process::exit(1);
        }
    };

    spawn_eviction_sweeper(engine.clone(), config.eviction_sweep_interval_secs);

    let transport_config = HttpTransportConfig { host: cli.host, port: cli.port };
    if let Err(e) = http::serve(transport_config, engine).await {
        error!(error = %e, "server error");
        std::process::exit(1);
    }

    info!("web-memory server shut down");
}

/// Long-lived background task running an eviction sweep every
/// `interval_secs`, independent of the probabilistic per-visit trigger.
fn spawn_eviction_sweeper(engine: Arc<Engine>, interval_secs: u64) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(interval_secs));
        interval.tick().await; // first tick fires immediately; skip it
        loop {
            interval.tick().await;
            match engine.run_eviction() {
                Ok(report) if !report.removed_ids.is_empty() => {
                    info!(removed = report.removed_ids.len(), "periodic eviction sweep completed");
                }
                Ok(_) => {}
                Err(e) => warn!(error = %e, "periodic eviction sweep failed"),
            }
        }
    });
}
