use async_trait::async_trait;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::errors::StoreError;
use crate::models::{ClickEvent, DeviceClass, Link};

/// Narrow interface over the persistent code -> link mapping and the
/// append-only click log. No business logic lives behind this trait; the
/// backend is expected to guarantee atomic append/read and enforce code
/// uniqueness on `put`.
#[async_trait]
pub trait LinkStore: Send + Sync {
    /// Fetch a link by code. Soft-deleted links are still returned
    /// (they keep redirecting); hard-deleted links are gone.
    async fn get(&self, code: &str) -> Result<Option<Link>, StoreError>;

    /// Insert a new link. Fails with `StoreError::Conflict` if the code
    /// already exists — this is the authoritative uniqueness check under
    /// concurrent creation.
    async fn put(&self, link: &Link) -> Result<(), StoreError>;

    /// Hide a link from listings without releasing its code. Returns
    /// whether a row was affected.
    async fn soft_delete(&self, code: &str) -> Result<bool, StoreError>;

    /// Remove a link and its click events. The code stops resolving.
    async fn hard_delete(&self, code: &str) -> Result<bool, StoreError>;

    /// All active links for one owner, newest first.
    async fn list_by_owner(&self, owner_id: &str) -> Result<Vec<Link>, StoreError>;

    /// Every link regardless of status, used to warm the cache at boot.
    async fn all_links(&self) -> Result<Vec<Link>, StoreError>;

    /// Durably append one click event.
    async fn append_event(&self, event: &ClickEvent) -> Result<(), StoreError>;

    /// Replay the click log for one code in clicked-at order. Used to
    /// rebuild a summary from scratch.
    async fn events_for_code(&self, code: &str) -> Result<Vec<ClickEvent>, StoreError>;

    /// Replay the whole click log, used to warm every summary at boot.
    async fn all_events(&self) -> Result<Vec<ClickEvent>, StoreError>;
}

// ── SQLite implementation ──────────────────────────────────────────────────

#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

/// Intermediate row for `clicks`: the event id is stored as TEXT, so it
/// round-trips through a String before parsing back into a Uuid.
#[derive(sqlx::FromRow)]
struct ClickRow {
    event_id: String,
    code: String,
    clicked_at: chrono::DateTime<chrono::Utc>,
    referrer: Option<String>,
    device: DeviceClass,
    country: Option<String>,
    region: Option<String>,
    city: Option<String>,
}

impl TryFrom<ClickRow> for ClickEvent {
    type Error = StoreError;

    fn try_from(row: ClickRow) -> Result<Self, StoreError> {
        let event_id = Uuid::parse_str(&row.event_id)
            .map_err(|e| StoreError::Backend(anyhow::anyhow!("bad event_id in store: {e}")))?;
        Ok(ClickEvent {
            event_id,
            code: row.code,
            clicked_at: row.clicked_at,
            referrer: row.referrer,
            device: row.device,
            country: row.country,
            region: row.region,
            city: row.city,
        })
    }
}

fn backend(e: sqlx::Error) -> StoreError {
    StoreError::Backend(anyhow::Error::from(e))
}

#[async_trait]
impl LinkStore for SqliteStore {
    async fn get(&self, code: &str) -> Result<Option<Link>, StoreError> {
        sqlx::query_as(
            "SELECT code, owner_id, target_url, created_at, is_active
             FROM links WHERE code = ?1",
        )
        .bind(code)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)
    }

    async fn put(&self, link: &Link) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO links (code, owner_id, target_url, created_at, is_active)
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .bind(&link.code)
        .bind(&link.owner_id)
        .bind(&link.target_url)
        .bind(link.created_at)
        .bind(link.is_active)
        .execute(&self.pool)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db) if db.is_unique_violation() => StoreError::Conflict,
            _ => backend(e),
        })?;

        Ok(())
    }

    async fn soft_delete(&self, code: &str) -> Result<bool, StoreError> {
        let affected = sqlx::query("UPDATE links SET is_active = 0 WHERE code = ?1")
            .bind(code)
            .execute(&self.pool)
            .await
            .map_err(backend)?
            .rows_affected();

        Ok(affected > 0)
    }

    async fn hard_delete(&self, code: &str) -> Result<bool, StoreError> {
        let affected = sqlx::query("DELETE FROM links WHERE code = ?1")
            .bind(code)
            .execute(&self.pool)
            .await
            .map_err(backend)?
            .rows_affected();

        Ok(affected > 0)
    }

    async fn list_by_owner(&self, owner_id: &str) -> Result<Vec<Link>, StoreError> {
        sqlx::query_as(
            "SELECT code, owner_id, target_url, created_at, is_active
             FROM links WHERE owner_id = ?1 AND is_active = 1
             ORDER BY created_at DESC",
        )
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)
    }

    async fn all_links(&self) -> Result<Vec<Link>, StoreError> {
        sqlx::query_as("SELECT code, owner_id, target_url, created_at, is_active FROM links")
            .fetch_all(&self.pool)
            .await
            .map_err(backend)
    }

    async fn append_event(&self, event: &ClickEvent) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO clicks
                 (event_id, code, clicked_at, referrer, device, country, region, city)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        )
        .bind(event.event_id.to_string())
        .bind(&event.code)
        .bind(event.clicked_at)
        .bind(&event.referrer)
        .bind(event.device)
        .bind(&event.country)
        .bind(&event.region)
        .bind(&event.city)
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        Ok(())
    }

    async fn events_for_code(&self, code: &str) -> Result<Vec<ClickEvent>, StoreError> {
        let rows: Vec<ClickRow> = sqlx::query_as(
            "SELECT event_id, code, clicked_at, referrer, device, country, region, city
             FROM clicks WHERE code = ?1
             ORDER BY clicked_at ASC",
        )
        .bind(code)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        rows.into_iter().map(ClickEvent::try_from).collect()
    }

    async fn all_events(&self) -> Result<Vec<ClickEvent>, StoreError> {
        let rows: Vec<ClickRow> = sqlx::query_as(
            "SELECT event_id, code, clicked_at, referrer, device, country, region, city
             FROM clicks ORDER BY clicked_at ASC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        rows.into_iter().map(ClickEvent::try_from).collect()
    }
}

// ── In-memory implementation for unit tests ────────────────────────────────
