use std::sync::Arc;

use anyhow::Context;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use dedupstore_api::{router, AppState};
use dedupstore_core::StoreConfig;
use dedupstore_db::{Database, PoolConfig};
use dedupstore_engine::{DiskRegistry, EngineOptions, StorageEngine};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // Environment variables:
    //   LOG_FORMAT  - "json" or "text" (default: "text")
    //   LOG_FILE    - path to log file (optional, daily rotation)
    //   LOG_ANSI    - "true"/"false" override ANSI colors
    //   RUST_LOG    - env filter (default: "dedupstore_api=debug,dedupstore_engine=info,tower_http=debug")
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "text".to_string());
    let log_file = std::env::var("LOG_FILE").ok();
    let log_ansi = std::env::var("LOG_ANSI")
        .ok()
        .map(|v| v == "true" || v == "1");

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        "dedupstore_api=debug,dedupstore_engine=info,dedupstore_db=info,tower_http=debug".into()
    });
    let registry = tracing_subscriber::registry().with(env_filter);

    let _file_guard = if let Some(ref path) = log_file {
        let file_dir = std::path::Path::new(path)
            .parent()
            .unwrap_or(std::path::Path::new("."));
        let file_name = std::path::Path::new(path)
            .file_name()
            .and_then(|f| f.to_str())
            .unwrap_or("dedupstore-api.log");
        let file_appender = tracing_appender::rolling::daily(file_dir, file_name);
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        if log_format == "json" {
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(non_blocking),
                )
                .init();
        } else {
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(log_ansi.unwrap_or(false));
            registry.with(layer).init();
        }
        Some(guard)
    } else {
        if log_format == "json" {
            registry
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        } else {
            let mut layer = tracing_subscriber::fmt::layer();
            if let Some(ansi) = log_ansi {
                layer = layer.with_ansi(ansi);
            }
            registry.with(layer).init();
        }
        None
    };

    info!(
        log_format = %log_format,
        log_file = log_file.as_deref().unwrap_or("(stdout)"),
        "Logging initialized"
    );

    let config = StoreConfig::load().context("failed to load configuration")?;

    let pool_config = PoolConfig::from_database_config(&config.database);
    let db = Database::connect_with_config(&config.database.url, pool_config)
        .await
        .context("failed to connect to database")?;
    db.migrate().await.context("failed to apply migrations")?;
    info!("Database ready");

    let engine = Arc::new(StorageEngine::new(
        db.object_repository(),
        db.link_repository(),
        DiskRegistry::from_config(&config)?,
        EngineOptions::from_config(&config),
    ));
    let disks: Vec<&str> = engine.disks().names().collect();
    info!(
        default_disk = engine.disks().default_disk(),
        disks = ?disks,
        "Storage disks configured"
    );

    let app = router(AppState::new(engine.clone(), &config));

    let listener = tokio::net::TcpListener::bind(&config.api.bind)
        .await
        .with_context(|| format!("failed to bind {}", config.api.bind))?;
    info!(
        bind = %config.api.bind,
        max_upload_bytes = config.api.max_upload_bytes,
        "Listening"
    );
    axum::serve(listener, app).await?;

    Ok(())
}
