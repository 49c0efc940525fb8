use std::{net::SocketAddr, sync::Arc};

use sqlx::sqlite::SqlitePoolOptions;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use snaplink::{
    aggregator::Aggregator, cache::LinkCache, codegen::CodeGenerator, config::AppConfig,
    geo::GeoService, notifier::Notifier, recorder::ClickRecorder, store::SqliteStore, AppState,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env (ignore error if file is absent — env vars may already be set)
    dotenvy::dotenv().ok();

    // Initialise structured logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "snaplink=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration from environment
    let config = AppConfig::from_env()?;
    tracing::info!("Starting snaplink on {}:{}", config.host, config.port);
    tracing::info!("Base URL: {}", config.base_url);

    // Open SQLite connection pool
    // CREATE the file if it doesn't exist yet
    let pool = SqlitePoolOptions::new()
        .max_connections(10)
        .connect_with(
            config
                .database_url
                .parse::<sqlx::sqlite::SqliteConnectOptions>()?
                .create_if_missing(true)
                .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
                .foreign_keys(true),
        )
        .await?;

    // Run embedded migrations (files in migrations/)
    sqlx::migrate!("./migrations").run(&pool).await?;
    tracing::info!("Database migrations applied");

    // Build the pipeline: store → recorder worker → aggregator → notifier
    let store: Arc<dyn snaplink::store::LinkStore> = Arc::new(SqliteStore::new(pool));
    let cache = LinkCache::new();
    let aggregator = Arc::new(Aggregator::new());
    let notifier = Arc::new(Notifier::new());

    let geo = if config.geo_lookup_enabled {
        Some(Arc::new(GeoService::new()?))
    } else {
        None
    };

    let (recorder, recorder_handle) = ClickRecorder::spawn(
        store.clone(),
        aggregator.clone(),
        notifier.clone(),
        geo,
        config.recorder_queue_depth,
    );

    // Warm the cache and replay the click log into summaries
    snaplink::warm(store.as_ref(), &cache, &aggregator).await?;

    let state = Arc::new(AppState {
        generator: CodeGenerator::new(config.code_length),
        config,
        store,
        cache,
        aggregator,
        notifier: notifier.clone(),
        recorder,
    });

    let app = snaplink::router(state.clone());

    // ── Serve ──────────────────────────────────────────────────────────────
    let bind_addr = format!("{}:{}", state.config.host, state.config.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!("Listening on http://{}", listener.local_addr()?);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    // Close live dashboards first, then drain the click queue so accepted
    // events are persisted before exit.
    notifier.shutdown();
    recorder_handle.shutdown().await;
    tracing::info!("shutdown complete");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for shutdown signal: {e}");
    }
}
