use anyhow::{Context, Result};
use axum::Router;
use std::{fs, io::ErrorKind, sync::Arc};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

mod config;
mod db;
mod errors;
mod handlers;
mod models;
mod routes;
mod services;
mod state;

use services::{codec::WebpCodec, layout::StorageLayout};
use state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config + migrate flag ---
    let (cfg, migrate) = config::AppConfig::from_env_and_args()?;

    tracing::info!("Starting theme-asset-store with config: {:?}", cfg);

    // --- Ensure storage root exists, then pin it to an absolute path ---
    fs::create_dir_all(&cfg.storage_root)
        .with_context(|| format!("creating storage root {}", cfg.storage_root))?;
    let storage_root = fs::canonicalize(&cfg.storage_root)
        .with_context(|| format!("resolving storage root {}", cfg.storage_root))?;
    tracing::info!("Storage root is {}", storage_root.display());

    // --- Initialize SQLite connection ---
    let db = Arc::new(db::connect(&cfg.database_url).await?);

    // --- Apply the embedded schema; migration mode stops here ---
    db::run_migrations(&db).await?;
    if migrate {
        tracing::info!("Database migration complete.");
        return Ok(()); // exit after migration
    }

    // --- Initialize services ---
    let layout = StorageLayout::new(storage_root, &cfg.public_base)?;
    let base_path = layout.base_path().to_string();
    let state = AppState::new(db, layout, Arc::new(WebpCodec), cfg.limits());

    // --- Build router ---
    let app: Router = routes::routes::routes(&base_path, cfg.max_upload_bytes).with_state(state);

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
