use std::{collections::HashMap, sync::Arc};

use axum::{
    http::StatusCode,
    routing::{delete, get, post},
    Router,
};
use tower_http::trace::TraceLayer;

pub mod aggregator;
pub mod cache;
pub mod codegen;
pub mod config;
pub mod errors;
pub mod geo;
pub mod handlers;
pub mod models;
pub mod notifier;
pub mod recorder;
pub mod store;

use aggregator::Aggregator;
use cache::LinkCache;
use codegen::CodeGenerator;
use notifier::Notifier;
use recorder::ClickRecorder;
use store::LinkStore;

// ── Shared application state ───────────────────────────────────────────────

pub struct AppState {
    pub config: config::AppConfig,
    pub store: Arc<dyn LinkStore>,
    pub cache: LinkCache,
    pub generator: CodeGenerator,
    pub aggregator: Arc<Aggregator>,
    pub notifier: Arc<Notifier>,
    pub recorder: ClickRecorder,
}

// ── Router ─────────────────────────────────────────────────────────────────

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(|| async { StatusCode::OK }))
        .route(
            "/api/links",
            post(handlers::links::create_link).get(handlers::links::list_links),
        )
        .route("/api/links/:code", delete(handlers::links::delete_link))
        .route("/api/links/:code/analytics", get(handlers::links::analytics))
        .route("/api/events", get(handlers::events::stream_deltas))
        // Short-link redirect — static routes above take priority
        .route("/:code", get(handlers::redirect::redirect))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

// ── Warm-up ────────────────────────────────────────────────────────────────

/// Load every link into the cache and rebuild every summary by replaying
/// the click log. Run once at startup; the replay path is the same one
/// used for repair, so a restart always converges with the incremental
/// state it replaces.
pub async fn warm(
    store: &dyn LinkStore,
    cache: &LinkCache,
    aggregator: &Aggregator,
) -> anyhow::Result<()> {
    let links = store.all_links().await?;
    for link in &links {
        cache.set(link);
    }

    let mut by_code: HashMap<String, Vec<models::ClickEvent>> = HashMap::new();
    for event in store.all_events().await? {
        by_code.entry(event.code.clone()).or_default().push(event);
    }

    let code_count = by_code.len();
    for (code, events) in by_code {
        aggregator.rebuild(&code, &events);
    }

    tracing::info!(
        "cache warmed with {} link(s), rebuilt summaries for {} code(s)",
        cache.len(),
        code_count
    );
    Ok(())
}
