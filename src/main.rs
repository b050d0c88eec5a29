use anyhow::{Context, Result};
use axum::Router;
use services::{pipeline::ThumbnailPipeline, storage_service::StorageService};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::{io::ErrorKind, path::Path, str::FromStr, sync::Arc};
use tokio::{fs, net::TcpListener};
use tracing_subscriber::EnvFilter;

mod config;
mod errors;
mod handlers;
mod models;
mod routes;
mod services;

/// Shared by every handler.
#[derive(Clone)]
pub struct AppState {
    pub storage: StorageService,
    pub pipeline: ThumbnailPipeline,
    pub notify_on_upload: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Configuration (fails fast, e.g. when DEST_BUCKET is missing) ---
    let (cfg, migrate) = match config::AppConfig::from_env_and_args() {
        Ok(loaded) => loaded,
        Err(err) => {
            tracing::error!("invalid configuration: {:#}", err);
            return Err(err);
        }
    };

    tracing::info!("Starting thumbnailer with config: {:?}", cfg);

    // --- Payload directory ---
    if !Path::new(&cfg.storage_dir).exists() {
        fs::create_dir_all(&cfg.storage_dir).await?;
        tracing::info!("Created storage directory at {}", cfg.storage_dir);
    }

    // --- SQLite metadata ---
    let connect_options = SqliteConnectOptions::from_str(&cfg.database_url)
        .with_context(|| format!("parsing database URL `{}`", cfg.database_url))?
        .create_if_missing(true);
    if let Some(parent) = connect_options.get_filename().parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent).await?;
            tracing::info!("Created missing directory {:?}", parent);
        }
    }

    let db = Arc::new(
        SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(connect_options)
            .await
            .context("opening metadata database")?,
    );

    let storage = StorageService::new(db, cfg.storage_dir.clone());
    storage.migrate().await.context("applying schema")?;

    if migrate {
        tracing::info!("Database migration complete.");
        return Ok(());
    }

    // --- Destination bucket must be usable before the first event ---
    let destination = storage
        .ensure_bucket(&cfg.pipeline.destination_bucket)
        .await
        .with_context(|| {
            format!(
                "preparing destination bucket `{}`",
                cfg.pipeline.destination_bucket
            )
        })?;
    tracing::info!(bucket = %destination.name, "destination bucket ready");

    let pipeline = ThumbnailPipeline::new(Arc::new(storage.clone()), cfg.pipeline.clone());
    let state = AppState {
        storage,
        pipeline,
        notify_on_upload: cfg.notify_on_upload,
    };

    let app: Router = routes::routes::routes().with_state(state);

    // --- Start server ---
    let addr = cfg.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}
