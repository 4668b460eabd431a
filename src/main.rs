mod cache;
mod config;
mod controller;
mod error;
mod models;
mod processor;
mod repository;
mod response;
mod routes;
mod storage;
mod utils;
mod validation;

#[cfg(test)]
mod tests;

#[macro_use]
extern crate tracing;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use mimalloc::MiMalloc;
use poem::listener::TcpListener;
use poem::middleware::{Cors, Tracing};
use poem::{EndpointExt, Route, Server};
use poem_openapi::OpenApiService;
use tracing::Level;
use tracing_futures::Instrument;

use crate::controller::{ImageLifecycleManager, LifecycleSettings};
use crate::storage::StorageBackend;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[derive(Debug, Parser)]
#[clap(author, version, about)]
pub struct ServerConfig {
    #[clap(long, env, default_value = "127.0.0.1")]
    /// The binding host address of the server.
    host: String,

    #[clap(short, long, env, default_value = "8000")]
    port: u16,

    #[clap(long, env)]
    /// The external URL which would be used to access the server.
    base_url: Option<String>,

    #[clap(long, env, default_value = "/ui")]
    /// The path the API documentation is served on.
    docs_url: String,

    #[clap(long, env, default_value = "info")]
    /// The log level filter for the server.
    log_level: Level,

    #[clap(long, env, default_value = "config.yaml")]
    /// The file path to the runtime configuration file.
    config_file: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args: ServerConfig = ServerConfig::parse();

    tracing_subscriber::fmt()
        .with_max_level(args.log_level)
        .init();

    if let Err(e) = config::init(&args.config_file).await {
        error!("Failed to load config file {:?}: {}", &args.config_file, e);
        return Err(e);
    }

    let cfg = config::config();

    let storage: Arc<dyn StorageBackend> = cfg.storage.connect().await?;
    let stores = cfg.metadata.connect().await?;

    let manager = Arc::new(ImageLifecycleManager::new(
        storage,
        stores.repository,
        stores.albums,
        LifecycleSettings::from(cfg),
    ));

    if let Some(secs) = cfg.reconcile_interval_secs {
        tokio::spawn(
            reconcile_periodically(manager.clone(), Duration::from_secs(secs))
                .instrument(info_span!("reconcile-task")),
        );
    }

    let serving_url = args
        .base_url
        .clone()
        .unwrap_or_else(|| format!("http://{}:{}", &args.host, args.port));

    let api_service = OpenApiService::new(
        routes::AlbumImagesApi::new(manager, cfg.exposes_internal_errors()),
        "Album Images API",
        env!("CARGO_PKG_VERSION"),
    )
    .description("Stores album images and keeps their data and metadata consistent.")
    .server(format!("{}/api/v1", serving_url));

    let ui = api_service.redoc();
    let app = Route::new()
        .nest("/api/v1", routes::guarded(api_service, cfg.max_upload_size))
        .nest(&args.docs_url, ui)
        .with(Cors::new())
        .with(Tracing);

    let addr: SocketAddr = format!("{}:{}", &args.host, args.port).parse()?;
    info!("Album images server running @ {}", serving_url);
    info!("Docs served @ {}{}", serving_url, &args.docs_url);

    Server::new(TcpListener::bind(addr)).run(app).await?;

    Ok(())
}

async fn reconcile_periodically(manager: Arc<ImageLifecycleManager>, every: Duration) {
    let mut interval = tokio::time::interval(every);

    // The first tick completes immediately.
    interval.tick().await;

    loop {
        interval.tick().await;

        match manager.reconcile_orphans().await {
            Ok(outcome) if outcome.cleaned_count > 0 || !outcome.errors.is_empty() => {
                info!(
                    "Reconciled {} orphaned images with {} errors",
                    outcome.cleaned_count,
                    outcome.errors.len(),
                );
            },
            Ok(_) => debug!("No orphaned images found"),
            Err(e) => error!("Reconciliation failed: {}", e),
        }
    }
}
