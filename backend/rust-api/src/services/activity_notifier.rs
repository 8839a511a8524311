use tokio::sync::broadcast;

use crate::metrics::ACTIVITY_EVENTS_TOTAL;
use crate::models::activity::ActivityEvent;

/// One-way, best-effort sink for activity events.
///
/// Implementations must not block and must not fail the caller: the state
/// change that produced the event has already been committed.
pub trait ActivityNotifier: Send + Sync {
    fn notify(&self, event: ActivityEvent);
}

/// Process-local fan-out to every connected activity stream.
pub struct BroadcastNotifier {
    tx: broadcast::Sender<ActivityEvent>,
}

impl BroadcastNotifier {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ActivityEvent> {
        self.tx.subscribe()
    }
}

impl ActivityNotifier for BroadcastNotifier {
    fn notify(&self, event: ActivityEvent) {
        ACTIVITY_EVENTS_TOTAL
            .with_label_values(&[event.kind.as_str()])
            .inc();
        match self.tx.send(event) {
            Ok(receivers) => tracing::debug!(receivers, "Activity event published"),
            // No subscribers connected
            Err(_) => tracing::debug!("Activity event dropped"),
        }
    }
}
