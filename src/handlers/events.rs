use std::{convert::Infallible, sync::Arc, time::Duration};

use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
};
use tokio_stream::{wrappers::BroadcastStream, Stream, StreamExt};

use crate::handlers::OwnerId;
use crate::AppState;

/// GET /api/events — live summary deltas for the calling owner, as SSE.
///
/// Best-effort, at-most-once: a session only sees deltas published while
/// it is connected. A session that lags or reconnects pulls a fresh full
/// summary from the analytics endpoint instead of replaying; nothing is
/// buffered for it here. The channel is torn down when the client
/// disconnects.
pub async fn stream_deltas(
    State(state): State<Arc<AppState>>,
    OwnerId(owner_id): OwnerId,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = state.notifier.subscribe(&owner_id);

    let stream = BroadcastStream::new(rx).filter_map(|result| match result {
        Ok(delta) => match serde_json::to_string(&delta) {
            Ok(json) => Some(Ok::<_, Infallible>(Event::default().data(json))),
            Err(e) => {
                tracing::error!("failed to serialize summary delta: {e}");
                None
            }
        },
        // Lagged receiver: the subscriber recovers by pulling a fresh
        // summary, so dropped deltas are skipped, not replayed.
        Err(_) => None,
    });

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}
