use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::aggregator::Aggregator;
use crate::geo::GeoService;
use crate::models::ClickEvent;
use crate::notifier::Notifier;
use crate::store::LinkStore;

/// One unit of recording work handed off by the redirect path. Carries
/// everything the worker needs so the redirect never waits on it.
#[derive(Debug)]
pub struct ClickJob {
    pub event: ClickEvent,
    pub owner_id: String,
    /// Client IP for the optional geo lookup; never persisted raw.
    pub ip: Option<String>,
}

/// Accepts click jobs from the redirect path and feeds the single worker
/// task. The queue is bounded: when the worker falls behind, new jobs are
/// rejected (and logged) instead of growing memory without limit.
#[derive(Clone)]
pub struct ClickRecorder {
    tx: mpsc::Sender<ClickJob>,
}

impl ClickRecorder {
    /// Spawn the worker and return the enqueue handle plus a shutdown
    /// handle for the worker task.
    pub fn spawn(
        store: Arc<dyn LinkStore>,
        aggregator: Arc<Aggregator>,
        notifier: Arc<Notifier>,
        geo: Option<Arc<GeoService>>,
        queue_depth: usize,
    ) -> (Self, RecorderHandle) {
        let (tx, rx) = mpsc::channel(queue_depth);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let worker = Worker {
            store,
            aggregator,
            notifier,
            geo,
        };
        let task = tokio::spawn(worker.run(rx, shutdown_rx));

        (
            Self { tx },
            RecorderHandle {
                shutdown_tx,
                task,
            },
        )
    }

    /// Hand off a click for recording. Returns immediately; `false` means
    /// the job was rejected (queue full or worker gone) — the redirect
    /// has already been issued either way, so the failure is only logged.
    pub fn enqueue(&self, job: ClickJob) -> bool {
        match self.tx.try_send(job) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(job)) => {
                tracing::warn!(
                    code = %job.event.code,
                    "recording failed: queue full, click dropped"
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(job)) => {
                tracing::warn!(
                    code = %job.event.code,
                    "recording failed: recorder stopped, click dropped"
                );
                false
            }
        }
    }
}

/// Owns the worker task. `shutdown` drains jobs already accepted into the
/// queue, then stops the worker.
pub struct RecorderHandle {
    shutdown_tx: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl RecorderHandle {
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(());
        if let Err(e) = self.task.await {
            tracing::error!("recorder worker panicked: {e}");
        }
    }
}

/// The single consumer of the click queue. One worker means events are
/// applied to the aggregator in exactly the order they were accepted,
/// which is what gives subscribers in-order deltas per link.
struct Worker {
    store: Arc<dyn LinkStore>,
    aggregator: Arc<Aggregator>,
    notifier: Arc<Notifier>,
    geo: Option<Arc<GeoService>>,
}

impl Worker {
    async fn run(self, mut rx: mpsc::Receiver<ClickJob>, mut shutdown: oneshot::Receiver<()>) {
        loop {
            tokio::select! {
                job = rx.recv() => match job {
                    Some(job) => self.handle(job).await,
                    None => break,
                },
                _ = &mut shutdown => {
                    // Drain what was already accepted, then stop.
                    while let Ok(job) = rx.try_recv() {
                        self.handle(job).await;
                    }
                    break;
                }
            }
        }
        tracing::debug!("click recorder worker stopped");
    }

    /// Persist one click, fold it into the summary, and fan the delta out.
    /// Failures here are logged and swallowed — the redirect this click
    /// came from completed long ago.
    async fn handle(&self, job: ClickJob) {
        let ClickJob {
            mut event,
            owner_id,
            ip,
        } = job;

        if let (Some(geo), Some(ip)) = (&self.geo, ip.as_deref()) {
            if let Some(info) = geo.lookup(ip).await {
                event.country = Some(info.country);
                event.region = Some(info.region);
                event.city = Some(info.city);
            }
        }

        if let Err(e) = self.store.append_event(&event).await {
            tracing::error!(code = %event.code, "recording failed: {e:#}");
            return;
        }

        match self.aggregator.apply_event(&event) {
            Some(delta) => self.notifier.publish(&owner_id, delta),
            None => {
                tracing::debug!(
                    code = %event.code,
                    event_id = %event.event_id,
                    "duplicate click event ignored"
                );
            }
        }
    }
}
