use std::collections::HashSet;

use chrono::NaiveDate;
use dashmap::DashMap;
use uuid::Uuid;

use crate::models::{AnalyticsSummary, ClickEvent, SummaryDelta};

/// Bucket key for clicks with no referrer header.
const DIRECT: &str = "direct";

/// Per-code analytics state. `seen` holds every event id already applied
/// so replays and redeliveries are at-most-once; it is rebuilt alongside
/// the summary when the click log is replayed.
#[derive(Default)]
struct CodeState {
    summary: AnalyticsSummary,
    seen: HashSet<Uuid>,
}

/// Maintains per-link summaries derived from click events.
///
/// Events are the source of truth; every summary here can be rebuilt by
/// replaying the click log, and incremental application converges to the
/// same result as a full replay. Mutation goes through the DashMap entry
/// guard, so concurrent updates to the same code serialize at the shard
/// lock and updates are never lost.
#[derive(Default)]
pub struct Aggregator {
    states: DashMap<String, CodeState>,
}

impl Aggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one click event to its code's summary.
    ///
    /// Returns the delta to fan out to subscribers, or `None` if this
    /// event id was already applied (duplicate delivery or replay).
    pub fn apply_event(&self, event: &ClickEvent) -> Option<SummaryDelta> {
        let mut entry = self.states.entry(event.code.clone()).or_default();
        let state = entry.value_mut();

        if !state.seen.insert(event.event_id) {
            return None;
        }

        let day = event.clicked_at.date_naive();
        let referrer = referrer_bucket(event.referrer.as_deref());

        state.summary.total_clicks += 1;
        *state.summary.clicks_by_day.entry(day).or_insert(0) += 1;
        *state.summary.referrers.entry(referrer.clone()).or_insert(0) += 1;
        *state.summary.devices.entry(event.device).or_insert(0) += 1;

        Some(SummaryDelta {
            code: event.code.clone(),
            day,
            referrer,
            device: event.device,
            total_clicks: state.summary.total_clicks,
        })
    }

    /// Current summary for a code, if any events have been applied.
    pub fn get_summary(&self, code: &str) -> Option<AnalyticsSummary> {
        self.states.get(code).map(|s| s.summary.clone())
    }

    pub fn total_clicks(&self, code: &str) -> u64 {
        self.states
            .get(code)
            .map(|s| s.summary.total_clicks)
            .unwrap_or(0)
    }

    /// Replace a code's summary with one rebuilt from scratch, replaying
    /// the given events. Used for repair/backfill and at startup.
    pub fn rebuild(&self, code: &str, events: &[ClickEvent]) {
        let mut state = CodeState::default();
        for event in events {
            if !state.seen.insert(event.event_id) {
                continue;
            }
            let day = event.clicked_at.date_naive();
            state.summary.total_clicks += 1;
            *state.summary.clicks_by_day.entry(day).or_insert(0) += 1;
            *state
                .summary
                .referrers
                .entry(referrer_bucket(event.referrer.as_deref()))
                .or_insert(0) += 1;
            *state.summary.devices.entry(event.device).or_insert(0) += 1;
        }
        self.states.insert(code.to_owned(), state);
    }

    /// Drop all state for a code (hard delete).
    pub fn remove(&self, code: &str) {
        self.states.remove(code);
    }

    /// Clicks for a single UTC day, used by tests and repair tooling.
    pub fn clicks_on(&self, code: &str, day: NaiveDate) -> u64 {
        self.states
            .get(code)
            .and_then(|s| s.summary.clicks_by_day.get(&day).copied())
            .unwrap_or(0)
    }
}

/// Normalize a referrer header into its breakdown bucket. Applied
/// identically on the incremental and replay paths so the two converge.
fn referrer_bucket(referrer: Option<&str>) -> String {
    match referrer {
        Some(r) if !r.trim().is_empty() => r.trim().to_owned(),
        _ => DIRECT.to_owned(),
    }
}
