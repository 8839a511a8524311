use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
};
use futures::stream::{self, Stream};
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};

use crate::{
    metrics::ACTIVITY_STREAM_CONNECTIONS_ACTIVE,
    models::{
        activity::{ActivityEvent, ACTIVITY_EVENT_NAME},
        user::CurrentUser,
    },
    services::AppState,
};

/// Keeps the open-connection gauge accurate however the stream ends.
struct ConnectionGuard;

impl ConnectionGuard {
    fn open() -> Self {
        ACTIVITY_STREAM_CONNECTIONS_ACTIVE.inc();
        ConnectionGuard
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        ACTIVITY_STREAM_CONNECTIONS_ACTIVE.dec();
    }
}

/// GET /api/activity/stream
pub async fn activity_stream(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    tracing::info!(user_id = %user.id, "Activity stream connected");
    let receiver = state.activity.subscribe();
    Sse::new(activity_events(receiver, ConnectionGuard::open())).keep_alive(KeepAlive::default())
}

fn activity_events(
    receiver: broadcast::Receiver<ActivityEvent>,
    guard: ConnectionGuard,
) -> impl Stream<Item = Result<Event, Infallible>> {
    stream::unfold((receiver, guard), |(mut receiver, guard)| async move {
        loop {
            match receiver.recv().await {
                Ok(event) => {
                    let sse = Event::default()
                        .event(ACTIVITY_EVENT_NAME)
                        .data(event.to_sse_data());
                    return Some((Ok(sse), (receiver, guard)));
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Activity subscriber lagged; events skipped");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    })
}
