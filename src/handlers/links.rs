use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::codegen::validate_custom_code;
use crate::errors::{ServiceError, StoreError};
use crate::handlers::OwnerId;
use crate::models::{AnalyticsSummary, Link, LinkWithStats};
use crate::AppState;

/// How many times creation retries the generate-then-insert cycle when a
/// freshly drawn code loses the insert race. Matches the generator's own
/// draw cap; past this the caller gets `GenerationExhausted`.
const CLAIM_ATTEMPTS: usize = 5;

#[derive(Deserialize)]
pub struct CreateLinkRequest {
    pub target_url: String,
    pub custom_code: Option<String>,
}

/// Creation response: the new link plus the full short URL to hand out.
#[derive(Serialize)]
struct CreatedLink {
    #[serde(flatten)]
    link: Link,
    short_url: String,
}

#[derive(Deserialize)]
pub struct DeleteParams {
    #[serde(default)]
    pub hard: bool,
}

/// POST /api/links
///
/// Creates a link for the calling owner, with either a validated custom
/// code or a generated one. The store's uniqueness constraint is the
/// final arbiter: under concurrent creation exactly one request wins a
/// contested code.
pub async fn create_link(
    State(state): State<Arc<AppState>>,
    OwnerId(owner_id): OwnerId,
    Json(req): Json<CreateLinkRequest>,
) -> Result<Response, ServiceError> {
    let target_url = req.target_url.trim().to_owned();
    if !target_url.starts_with("http://") && !target_url.starts_with("https://") {
        return Err(ServiceError::InvalidRequest(
            "target URL must start with http:// or https://".into(),
        ));
    }

    let custom = req
        .custom_code
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty());

    let link = match custom {
        Some(code) => {
            validate_custom_code(code)?;
            let link = new_link(code, &owner_id, &target_url);
            // Custom codes go through the same uniqueness check as
            // generated ones; a loss here is CodeTaken, not a retry.
            state.store.put(&link).await?;
            link
        }
        None => claim_generated_code(&state, &owner_id, &target_url).await?,
    };

    state.cache.set(&link);
    let short_url = format!("{}/{}", state.config.base_url, link.code);
    tracing::info!(code = %link.code, owner = %link.owner_id, %short_url, "link created");

    Ok((StatusCode::CREATED, Json(CreatedLink { link, short_url })).into_response())
}

/// GET /api/links — the calling owner's active links with click totals.
pub async fn list_links(
    State(state): State<Arc<AppState>>,
    OwnerId(owner_id): OwnerId,
) -> Result<Json<Vec<LinkWithStats>>, ServiceError> {
    let links = state.store.list_by_owner(&owner_id).await?;

    let listed = links
        .into_iter()
        .map(|link| {
            let total_clicks = state.aggregator.total_clicks(&link.code);
            LinkWithStats { link, total_clicks }
        })
        .collect();

    Ok(Json(listed))
}

/// GET /api/links/:code/analytics
///
/// Current summary for one link. A link with no clicks yet returns the
/// empty summary rather than 404; only an unknown (or hard-deleted) code
/// is not found.
pub async fn analytics(
    State(state): State<Arc<AppState>>,
    Path(code): Path<String>,
) -> Result<Json<AnalyticsSummary>, ServiceError> {
    if state.cache.get(&code).is_none() && state.store.get(&code).await?.is_none() {
        return Err(ServiceError::NotFound);
    }

    Ok(Json(state.aggregator.get_summary(&code).unwrap_or_default()))
}

/// DELETE /api/links/:code
///
/// Soft delete by default: the link disappears from listings but its code
/// stays reserved and keeps redirecting. With `?hard=true` the link and
/// its click history are removed and the code stops resolving.
pub async fn delete_link(
    State(state): State<Arc<AppState>>,
    OwnerId(owner_id): OwnerId,
    Path(code): Path<String>,
    Query(params): Query<DeleteParams>,
) -> Result<StatusCode, ServiceError> {
    // Only the owner may delete their link.
    match state.store.get(&code).await? {
        Some(link) if link.owner_id == owner_id => {}
        _ => return Err(ServiceError::NotFound),
    }

    let deleted = if params.hard {
        let deleted = state.store.hard_delete(&code).await?;
        state.cache.remove(&code);
        state.aggregator.remove(&code);
        deleted
    } else {
        state.store.soft_delete(&code).await?
    };

    if deleted {
        tracing::info!(code = %code, hard = params.hard, "link deleted");
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ServiceError::NotFound)
    }
}

// ── Private helpers ────────────────────────────────────────────────────────

fn new_link(code: &str, owner_id: &str, target_url: &str) -> Link {
    Link {
        code: code.to_owned(),
        owner_id: owner_id.to_owned(),
        target_url: target_url.to_owned(),
        created_at: chrono::Utc::now().naive_utc(),
        is_active: true,
    }
}

/// Generate a code and insert the link, retrying with a fresh draw when a
/// concurrent creation claims the same code first.
async fn claim_generated_code(
    state: &AppState,
    owner_id: &str,
    target_url: &str,
) -> Result<Link, ServiceError> {
    for _ in 0..CLAIM_ATTEMPTS {
        let code = state.generator.generate(state.store.as_ref()).await?;
        let link = new_link(&code, owner_id, target_url);
        match state.store.put(&link).await {
            Ok(()) => return Ok(link),
            Err(StoreError::Conflict) => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Err(ServiceError::GenerationExhausted)
}
