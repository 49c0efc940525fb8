use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A shortened link record from the `links` table.
///
/// `code` is the primary lookup key: unique across the store, immutable
/// once created, and never recycled while the row exists.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Link {
    pub code: String,
    pub owner_id: String,
    pub target_url: String,
    pub created_at: NaiveDateTime,
    pub is_active: bool,
}

/// Coarse device classification derived from the User-Agent header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum DeviceClass {
    Desktop,
    Mobile,
    Bot,
    Unknown,
}

/// A single recorded redirect occurrence. Append-only and immutable once
/// written; `event_id` is the dedup key the aggregator guards on.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ClickEvent {
    pub event_id: Uuid,
    pub code: String,
    pub clicked_at: DateTime<Utc>,
    pub referrer: Option<String>,
    pub device: DeviceClass,
    pub country: Option<String>,
    pub region: Option<String>,
    pub city: Option<String>,
}

impl ClickEvent {
    pub fn new(code: impl Into<String>, referrer: Option<String>, device: DeviceClass) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            code: code.into(),
            clicked_at: Utc::now(),
            referrer,
            device,
            country: None,
            region: None,
            city: None,
        }
    }
}

/// Derived aggregate view for one link. Events are the source of truth;
/// the summary is a cache that can be rebuilt by replaying them.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AnalyticsSummary {
    pub total_clicks: u64,
    /// Click counts keyed by UTC calendar day.
    pub clicks_by_day: BTreeMap<NaiveDate, u64>,
    pub referrers: HashMap<String, u64>,
    pub devices: HashMap<DeviceClass, u64>,
}

/// An incremental change to a summary, pushed to live subscribers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummaryDelta {
    pub code: String,
    pub day: NaiveDate,
    pub referrer: String,
    pub device: DeviceClass,
    /// Total for the link after this delta was applied.
    pub total_clicks: u64,
}

/// A link joined with its total click count, used for owner listings.
#[derive(Debug, Clone, Serialize)]
pub struct LinkWithStats {
    #[serde(flatten)]
    pub link: Link,
    pub total_clicks: u64,
}
