//! `relayclaw serve`: start the routing proxy.

use relayclaw_config::AppConfig;
use relayclaw_core::tool::ToolRegistry;
use relayclaw_gateway::GatewayState;
use relayclaw_memory::{IndexTarget, PersistenceWriter, RecallTool, SqliteStore, WriterSettings};
use relayclaw_providers::ProviderSet;
use relayclaw_routing::Router;
use relayclaw_wiretap::Wiretap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

pub async fn run(
    config_path: &Path,
    port_override: Option<u16>,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = super::load_config(config_path)?;
    if let Some(port) = port_override {
        config.gateway.port = port;
    }

    let providers = relayclaw_providers::build_from_config(&config);
    let router = Arc::new(Router::from_config(&config, &providers)?);

    let database = config.persistence.database_path();
    let store = Arc::new(SqliteStore::open(&database).await?);
    let index = index_target(&config, &providers, &store);
    let tools = tool_registry(&config, index.clone());
    let writer = Arc::new(PersistenceWriter::new(store.clone(), index, writer_settings(&config)));

    let wiretap = Arc::new(match &config.wiretap.path {
        Some(path) => Wiretap::open(path, config.wiretap.buffer).await?,
        None => Wiretap::disabled(),
    });

    println!("RelayClaw");
    println!("   Listening: {}:{}", config.gateway.host, config.gateway.port);
    println!("   Backend:   {}", config.backend.url);
    println!("   Routes:    {}", config.routes.len());
    println!(
        "   Tiers:     {}",
        router.tiers().iter().map(|t| t.as_str()).collect::<Vec<_>>().join(" → ")
    );
    println!("   Database:  {}", database.display());
    if !tools.is_empty() {
        println!("   Tools:     {}", tools.names().join(", "));
    }

    spawn_reload_on_hangup(router.clone(), config_path.to_path_buf());

    let state = Arc::new(GatewayState {
        router,
        backend: providers.backend.clone(),
        tools,
        writer: writer.clone(),
        wiretap: wiretap.clone(),
    });

    relayclaw_gateway::start(state, &config.gateway, shutdown_signal()).await?;

    writer.shutdown().await;
    wiretap.shutdown().await;
    info!("Shutdown complete");

    Ok(())
}

/// Indexing needs both an embedding endpoint and `persistence.index`.
fn index_target(
    config: &AppConfig,
    providers: &ProviderSet,
    store: &Arc<SqliteStore>,
) -> Option<IndexTarget> {
    if !config.persistence.index {
        return None;
    }
    providers.embedding.as_ref().map(|endpoint| IndexTarget {
        store: store.clone(),
        embedder: endpoint.provider.clone(),
        model: endpoint.model.clone(),
    })
}

/// The `rag` tool searches the same index the writer fills.
fn tool_registry(config: &AppConfig, index: Option<IndexTarget>) -> ToolRegistry {
    let mut tools = ToolRegistry::new();
    if let Some(target) = index {
        tools.register(Arc::new(RecallTool::new(
            target,
            config.persistence.recall_limit,
            config.persistence.recall_min_score,
            Duration::from_millis(config.embedding.timeout_ms),
        )));
    }
    tools
}

fn writer_settings(config: &AppConfig) -> WriterSettings {
    WriterSettings {
        write_max_attempts: config.persistence.write_max_attempts,
        index_max_attempts: config.persistence.index_max_attempts,
        index_workers: config.persistence.index_workers,
        index_queue: config.persistence.index_queue,
        embed_timeout: Duration::from_millis(config.embedding.timeout_ms),
        ..WriterSettings::default()
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
    info!("Shutdown requested, draining");
}

/// Re-read the config file on SIGHUP and swap in the new route table.
#[cfg(unix)]
fn spawn_reload_on_hangup(router: Arc<Router>, config_path: PathBuf) {
    use tokio::signal::unix::{SignalKind, signal};

    tokio::spawn(async move {
        let mut hangup = match signal(SignalKind::hangup()) {
            Ok(hangup) => hangup,
            Err(e) => {
                tracing::warn!(error = %e, "SIGHUP reload unavailable");
                return;
            }
        };
        while hangup.recv().await.is_some() {
            info!(path = %config_path.display(), "SIGHUP received, reloading routes");
            let reloaded =
                AppConfig::load_with_env(&config_path).and_then(|config| router.reload(&config));
            if let Err(e) = reloaded {
                tracing::error!(
                    error = %e,
                    "Route table reload rejected, keeping the current table"
                );
            }
        }
    });
}

#[cfg(not(unix))]
fn spawn_reload_on_hangup(_router: Arc<Router>, _config_path: PathBuf) {}
