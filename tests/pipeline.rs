use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use sqlx::sqlite::SqlitePoolOptions;
use tower::util::ServiceExt;

use snaplink::{
    aggregator::Aggregator,
    cache::LinkCache,
    codegen::CodeGenerator,
    config::AppConfig,
    errors::StoreError,
    models::{ClickEvent, Link},
    notifier::Notifier,
    recorder::{ClickRecorder, RecorderHandle},
    store::{LinkStore, SqliteStore},
    AppState,
};

// ── Test harness ───────────────────────────────────────────────────────────

async fn sqlite_store() -> SqliteStore {
    // A single connection keeps the in-memory database shared across
    // queries within one test.
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("open in-memory sqlite");

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("run migrations");

    SqliteStore::new(pool)
}

fn build(store: Arc<dyn LinkStore>) -> (Router, Arc<AppState>, RecorderHandle) {
    let aggregator = Arc::new(Aggregator::new());
    let notifier = Arc::new(Notifier::new());
    let (recorder, handle) = ClickRecorder::spawn(
        store.clone(),
        aggregator.clone(),
        notifier.clone(),
        None,
        64,
    );

    let state = Arc::new(AppState {
        config: AppConfig::default(),
        store,
        cache: LinkCache::new(),
        generator: CodeGenerator::new(7),
        aggregator,
        notifier,
        recorder,
    });

    (snaplink::router(state.clone()), state, handle)
}

async fn app() -> (Router, Arc<AppState>, RecorderHandle) {
    build(Arc::new(sqlite_store().await))
}

fn create_request(owner: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/api/links")
        .header(header::CONTENT_TYPE, "application/json")
        .header("x-owner-id", owner)
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get_request(uri: &str, owner: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().uri(uri);
    if let Some(owner) = owner {
        builder = builder.header("x-owner-id", owner);
    }
    builder.body(Body::empty()).unwrap()
}

async fn json_body(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

/// The recorder settles asynchronously; poll until the expected total
/// shows up instead of sleeping a fixed amount.
async fn wait_for_total(state: &AppState, code: &str, expected: u64) {
    for _ in 0..100 {
        if state.aggregator.total_clicks(code) == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!(
        "total for {code} never reached {expected}, is {}",
        state.aggregator.total_clicks(code)
    );
}

// ── Creation ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn creates_link_with_generated_code() {
    let (app, _state, handle) = app().await;

    let response = app
        .oneshot(create_request(
            "owner-1",
            serde_json::json!({ "target_url": "https://example.com" }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::CREATED);
    let body = json_body(response).await;
    let code = body["code"].as_str().unwrap();
    assert_eq!(code.len(), 7);
    assert_eq!(body["target_url"], "https://example.com");
    assert_eq!(body["owner_id"], "owner-1");
    assert_eq!(
        body["short_url"],
        format!("http://localhost:3000/{code}")
    );

    handle.shutdown().await;
}

#[tokio::test]
async fn rejects_invalid_target_url_and_missing_owner() {
    let (app, _state, handle) = app().await;

    let response = app
        .clone()
        .oneshot(create_request(
            "owner-1",
            serde_json::json!({ "target_url": "ftp://nope" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/links")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(
                    serde_json::json!({ "target_url": "https://example.com" }).to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

    handle.shutdown().await;
}

#[tokio::test]
async fn concurrent_generated_codes_are_all_distinct() {
    let (app, _state, handle) = app().await;

    let mut tasks = tokio::task::JoinSet::new();
    for i in 0..10 {
        let app = app.clone();
        let owner = format!("owner-{i}");
        tasks.spawn(async move {
            app.oneshot(create_request(
                &owner,
                serde_json::json!({ "target_url": "https://example.com" }),
            ))
            .await
            .unwrap()
        });
    }

    let mut codes = std::collections::HashSet::new();
    while let Some(result) = tasks.join_next().await {
        let response = result.unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let body = json_body(response).await;
        codes.insert(body["code"].as_str().unwrap().to_owned());
    }

    // Every concurrent creation got its own code.
    assert_eq!(codes.len(), 10);

    handle.shutdown().await;
}

#[tokio::test]
async fn concurrent_custom_code_creation_has_one_winner() {
    let (app, _state, handle) = app().await;

    let body = serde_json::json!({
        "target_url": "https://example.com",
        "custom_code": "promo"
    });

    let (first, second) = tokio::join!(
        app.clone().oneshot(create_request("owner-1", body.clone())),
        app.clone().oneshot(create_request("owner-2", body.clone())),
    );

    let mut statuses = vec![first.unwrap().status(), second.unwrap().status()];
    statuses.sort();
    assert_eq!(statuses, vec![StatusCode::CREATED, StatusCode::CONFLICT]);

    handle.shutdown().await;
}

// ── Redirect + analytics pipeline ──────────────────────────────────────────

#[tokio::test]
async fn redirect_records_click_and_updates_analytics() {
    let (app, state, handle) = app().await;

    let response = app
        .clone()
        .oneshot(create_request(
            "owner-1",
            serde_json::json!({
                "target_url": "https://example.com",
                "custom_code": "abc123"
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    let response = app
        .clone()
        .oneshot(get_request("/abc123", None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(
        response.headers()[header::LOCATION],
        "https://example.com"
    );

    wait_for_total(&state, "abc123", 1).await;

    let response = app
        .oneshot(get_request("/api/links/abc123/analytics", None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["total_clicks"], 1);

    // The click landed durably in the store as well.
    let events = state.store.events_for_code("abc123").await.unwrap();
    assert_eq!(events.len(), 1);

    handle.shutdown().await;
}

#[tokio::test]
async fn unknown_code_is_not_found_and_records_nothing() {
    let (app, state, handle) = app().await;

    let response = app
        .clone()
        .oneshot(get_request("/doesnotexist", None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = app
        .oneshot(get_request("/api/links/doesnotexist/analytics", None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    // Give the recorder a beat; nothing should have been queued at all.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(state.aggregator.total_clicks("doesnotexist"), 0);
    assert!(state
        .store
        .events_for_code("doesnotexist")
        .await
        .unwrap()
        .is_empty());

    handle.shutdown().await;
}

#[tokio::test]
async fn soft_delete_hides_but_still_redirects_hard_delete_stops_resolving() {
    let (app, _state, handle) = app().await;

    let response = app
        .clone()
        .oneshot(create_request(
            "owner-1",
            serde_json::json!({
                "target_url": "https://example.com",
                "custom_code": "gone-soon"
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    // Soft delete: hidden from listings, still redirecting.
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri("/api/links/gone-soon")
                .header("x-owner-id", "owner-1")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let listing = app
        .clone()
        .oneshot(get_request("/api/links", Some("owner-1")))
        .await
        .unwrap();
    assert_eq!(json_body(listing).await.as_array().unwrap().len(), 0);

    let response = app
        .clone()
        .oneshot(get_request("/gone-soon", None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FOUND);

    // Hard delete: the code stops resolving entirely.
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri("/api/links/gone-soon?hard=true")
                .header("x-owner-id", "owner-1")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = app
        .oneshot(get_request("/gone-soon", None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    handle.shutdown().await;
}

#[tokio::test]
async fn delete_requires_the_owning_identity() {
    let (app, _state, handle) = app().await;

    app.clone()
        .oneshot(create_request(
            "owner-1",
            serde_json::json!({
                "target_url": "https://example.com",
                "custom_code": "mine"
            }),
        ))
        .await
        .unwrap();

    let response = app
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri("/api/links/mine")
                .header("x-owner-id", "owner-2")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    handle.shutdown().await;
}

// ── Failure modes ──────────────────────────────────────────────────────────

/// Store whose lookups fail, standing in for an unreachable backend.
struct UnavailableStore;

#[async_trait]
impl LinkStore for UnavailableStore {
    async fn get(&self, _code: &str) -> Result<Option<Link>, StoreError> {
        Err(StoreError::Backend(anyhow::anyhow!("backend down")))
    }
    async fn put(&self, _link: &Link) -> Result<(), StoreError> {
        Err(StoreError::Backend(anyhow::anyhow!("backend down")))
    }
    async fn soft_delete(&self, _code: &str) -> Result<bool, StoreError> {
        Err(StoreError::Backend(anyhow::anyhow!("backend down")))
    }
    async fn hard_delete(&self, _code: &str) -> Result<bool, StoreError> {
        Err(StoreError::Backend(anyhow::anyhow!("backend down")))
    }
    async fn list_by_owner(&self, _owner_id: &str) -> Result<Vec<Link>, StoreError> {
        Err(StoreError::Backend(anyhow::anyhow!("backend down")))
    }
    async fn all_links(&self) -> Result<Vec<Link>, StoreError> {
        Err(StoreError::Backend(anyhow::anyhow!("backend down")))
    }
    async fn append_event(&self, _event: &ClickEvent) -> Result<(), StoreError> {
        Err(StoreError::Backend(anyhow::anyhow!("backend down")))
    }
    async fn events_for_code(&self, _code: &str) -> Result<Vec<ClickEvent>, StoreError> {
        Err(StoreError::Backend(anyhow::anyhow!("backend down")))
    }
    async fn all_events(&self) -> Result<Vec<ClickEvent>, StoreError> {
        Err(StoreError::Backend(anyhow::anyhow!("backend down")))
    }
}

#[tokio::test]
async fn unreachable_store_is_transient_not_not_found() {
    let (app, _state, handle) = build(Arc::new(UnavailableStore));

    let response = app
        .oneshot(get_request("/abc123", None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

    handle.shutdown().await;
}

/// Store whose click appends are artificially slow. Resolution still goes
/// through at full speed; only the recorder worker feels the delay.
struct SlowAppendStore {
    inner: SqliteStore,
    delay: Duration,
}

#[async_trait]
impl LinkStore for SlowAppendStore {
    async fn get(&self, code: &str) -> Result<Option<Link>, StoreError> {
        self.inner.get(code).await
    }
    async fn put(&self, link: &Link) -> Result<(), StoreError> {
        self.inner.put(link).await
    }
    async fn soft_delete(&self, code: &str) -> Result<bool, StoreError> {
        self.inner.soft_delete(code).await
    }
    async fn hard_delete(&self, code: &str) -> Result<bool, StoreError> {
        self.inner.hard_delete(code).await
    }
    async fn list_by_owner(&self, owner_id: &str) -> Result<Vec<Link>, StoreError> {
        self.inner.list_by_owner(owner_id).await
    }
    async fn all_links(&self) -> Result<Vec<Link>, StoreError> {
        self.inner.all_links().await
    }
    async fn append_event(&self, event: &ClickEvent) -> Result<(), StoreError> {
        tokio::time::sleep(self.delay).await;
        self.inner.append_event(event).await
    }
    async fn events_for_code(&self, code: &str) -> Result<Vec<ClickEvent>, StoreError> {
        self.inner.events_for_code(code).await
    }
    async fn all_events(&self) -> Result<Vec<ClickEvent>, StoreError> {
        self.inner.all_events().await
    }
}

#[tokio::test]
async fn redirect_latency_is_independent_of_recorder_latency() {
    let store = SlowAppendStore {
        inner: sqlite_store().await,
        delay: Duration::from_millis(500),
    };
    let (app, state, handle) = build(Arc::new(store));

    app.clone()
        .oneshot(create_request(
            "owner-1",
            serde_json::json!({
                "target_url": "https://example.com",
                "custom_code": "fast"
            }),
        ))
        .await
        .unwrap();

    let started = std::time::Instant::now();
    let response = app.oneshot(get_request("/fast", None)).await.unwrap();
    let elapsed = started.elapsed();

    assert_eq!(response.status(), StatusCode::FOUND);
    // The click write takes 500ms; the redirect must not wait for it.
    assert!(
        elapsed < Duration::from_millis(250),
        "redirect took {elapsed:?}, blocked on recording"
    );

    // The event still lands once the worker settles.
    wait_for_total(&state, "fast", 1).await;
    handle.shutdown().await;
}

// ── Realtime channel ───────────────────────────────────────────────────────

#[tokio::test]
async fn event_stream_opens_for_an_owner() {
    let (app, _state, handle) = app().await;

    let response = app
        .oneshot(get_request("/api/events", Some("owner-1")))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "text/event-stream"
    );

    handle.shutdown().await;
}

#[tokio::test]
async fn subscriber_receives_delta_for_recorded_click() {
    let (app, state, handle) = app().await;

    app.clone()
        .oneshot(create_request(
            "owner-1",
            serde_json::json!({
                "target_url": "https://example.com",
                "custom_code": "live"
            }),
        ))
        .await
        .unwrap();

    let mut rx = state.notifier.subscribe("owner-1");

    app.oneshot(get_request("/live", None)).await.unwrap();

    let delta = tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("delta within 2s")
        .unwrap();
    assert_eq!(delta.code, "live");
    assert_eq!(delta.total_clicks, 1);

    handle.shutdown().await;
}
