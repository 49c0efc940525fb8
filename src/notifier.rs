use dashmap::DashMap;
use tokio::sync::broadcast;

use crate::models::SummaryDelta;

/// Per-subscriber buffer depth. A subscriber that lags past this many
/// deltas sees a `Lagged` error and is expected to pull a fresh summary,
/// the same recovery as a reconnect.
const CHANNEL_CAPACITY: usize = 256;

/// Fans out summary deltas to live dashboard sessions, keyed by owner.
///
/// Delivery is best-effort and at-most-once: a session that is not
/// connected when a delta is published simply misses it, and on reconnect
/// pulls a fresh full summary instead of replaying. Deltas published for
/// one owner arrive on each of that owner's channels in publish order.
///
/// Topics are created lazily on first subscribe and pruned once the last
/// receiver is gone. `shutdown` drops every sender, which closes all open
/// channels; nothing is delivered or retried after that.
#[derive(Default)]
pub struct Notifier {
    topics: DashMap<String, broadcast::Sender<SummaryDelta>>,
}

impl Notifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a live channel for one owner's deltas. The returned receiver
    /// only sees deltas published after this call.
    pub fn subscribe(&self, owner_id: &str) -> broadcast::Receiver<SummaryDelta> {
        // Opportunistically sweep topics whose last subscriber is gone.
        // Safe against racing subscribers: a receiver is created under the
        // entry guard below, so a topic observed here with zero receivers
        // really has none.
        self.topics.retain(|_, sender| sender.receiver_count() > 0);

        self.topics
            .entry(owner_id.to_owned())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// Publish a delta to every session subscribed to this owner.
    /// A topic with no live receivers is pruned rather than buffered.
    pub fn publish(&self, owner_id: &str, delta: SummaryDelta) {
        let Some(sender) = self.topics.get(owner_id) else {
            return;
        };

        if sender.send(delta).is_err() {
            // Last receiver already disconnected.
            drop(sender);
            self.topics
                .remove_if(owner_id, |_, s| s.receiver_count() == 0);
        }
    }

    /// Number of live subscriptions across all owners.
    pub fn subscriber_count(&self) -> usize {
        self.topics.iter().map(|t| t.receiver_count()).sum()
    }

    /// Number of owner topics currently held, pruned or not.
    pub fn topic_count(&self) -> usize {
        self.topics.len()
    }

    /// Close every open channel. Subscribers observe end-of-stream and no
    /// further deltas are delivered.
    pub fn shutdown(&self) {
        self.topics.clear();
    }
}
