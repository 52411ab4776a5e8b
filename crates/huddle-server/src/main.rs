use std::sync::Arc;

use anyhow::Result;
use axum::http::HeaderValue;
use clap::Parser;
use huddle_core::cache::{ReadThroughCache, RedisBackend};
use huddle_core::AppState;
use tracing_subscriber::EnvFilter;

mod cli;
mod config;

use config::CacheBackendKind;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("huddle=info,tower_http=debug")),
        )
        .init();

    let args = cli::Args::parse();
    let config = config::Config::load(&args.config)?;

    ensure_data_dirs(&config);

    let db = huddle_db::create_pool(&config.database.url, config.database.max_connections).await?;
    huddle_db::run_migrations(&db).await?;
    tracing::info!("Database ready");

    let cache = build_cache(&config).await;
    let state = AppState::new(db, cache, config.app_config());

    let cors_origin = match config.server.cors_origin.as_deref() {
        Some(origin) => match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!("Ignoring invalid cors_origin '{}'", origin);
                None
            }
        },
        None => None,
    };

    let app = huddle_api::build_router(cors_origin)
        .merge(huddle_ws::gateway_router())
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(&config.server.bind_address).await?;
    tracing::info!("Huddle server listening on {}", config.server.bind_address);

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(async {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Shutdown signal received");
            }
        })
        .await?;

    Ok(())
}

/// Redis when configured and reachable, otherwise the in-process cache.
async fn build_cache(config: &config::Config) -> ReadThroughCache {
    let memory = || ReadThroughCache::in_memory(config.cache.max_capacity);
    if config.cache.backend != CacheBackendKind::Redis {
        return memory();
    }
    let Some(url) = config.cache.redis_url.as_deref() else {
        tracing::warn!("cache.backend is redis but cache.redis_url is unset; using in-memory cache");
        return memory();
    };
    match RedisBackend::connect(url).await {
        Ok(backend) => ReadThroughCache::new(Arc::new(backend)),
        Err(e) => {
            tracing::warn!("Could not connect to redis at '{}': {}; using in-memory cache", url, e);
            memory()
        }
    }
}

/// Create the SQLite file's parent directory before the pool opens it.
fn ensure_data_dirs(config: &config::Config) {
    if let Some(db_path) = config
        .database
        .url
        .strip_prefix("sqlite://")
        .and_then(|s| s.split('?').next())
    {
        if let Some(parent) = std::path::Path::new(db_path).parent() {
            if !parent.as_os_str().is_empty() {
                if let Err(e) = std::fs::create_dir_all(parent) {
                    tracing::warn!("Could not create directory '{}': {}", parent.display(), e);
                }
            }
        }
    }
}
