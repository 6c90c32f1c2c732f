use anyhow::{Context, Result};
use axum::Router;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::{io::ErrorKind, path::Path, str::FromStr, sync::Arc};
use tokio::{fs, net::TcpListener};
use tracing_subscriber::EnvFilter;

use services::{
    asset_service::AssetService, blob_store::DiskBlobStore, metadata_store::SqliteMetadataStore,
    staging::Stager, user_registry::UserRegistry,
};
use state::AppState;

mod config;
mod errors;
mod handlers;
mod models;
mod routes;
mod services;
mod state;

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config + migrate flag ---
    let (cfg, migrate) = config::AppConfig::from_env_and_args()?;

    tracing::info!("Starting image-repository with config: {:?}", cfg);

    // --- Initialize SQLite connection ---
    let db_url = &cfg.database_url;
    let db_path = db_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .trim_start_matches("file:");
    tracing::debug!("Interpreted SQLite path => {}", db_path);

    if let Some(parent) = Path::new(db_path).parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent).await?;
            tracing::info!("Created missing directory {:?}", parent);
        }
    }

    let options = SqliteConnectOptions::from_str(db_url)
        .with_context(|| format!("parsing database url `{}`", db_url))?
        .create_if_missing(true);
    let db = Arc::new(
        SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?,
    );

    let metadata = Arc::new(SqliteMetadataStore::new(db));
    metadata.migrate().await?;

    // --- Initialize core services ---
    let blobs = Arc::new(DiskBlobStore::new(&cfg.storage_dir, cfg.public_base_url.clone()).await?);
    tracing::info!("Blob storage at {}", cfg.storage_dir);

    let assets = AssetService::new(blobs, metadata.clone());
    let users = UserRegistry::new(metadata, assets.clone());
    users.backfill_username_claims().await?;

    // --- Handle migration mode ---
    if migrate {
        tracing::info!("Database migration complete.");
        return Ok(()); // exit after migration
    }

    fs::create_dir_all(&cfg.staging_dir).await?;
    let stager = Stager::new(&cfg.staging_dir, cfg.max_file_bytes);
    let state = AppState {
        assets,
        users,
        stager,
    };

    // --- Build router ---
    let app: Router =
        routes::routes::routes(cfg.max_file_bytes, cfg.http_error_status).with_state(state);

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
