use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;
use uuid::Uuid;

use crate::engine::queue::enqueue_expiry;
use crate::observability::metrics::Metrics;

/// Identifies one offer. A fire carrying an older attempt number than the
/// order's current one is stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct TimerKey {
    pub order_id: Uuid,
    pub attempt_number: u32,
}

struct ArmedTimer {
    attempt_number: u32,
    handle: JoinHandle<()>,
}

/// Cancellable acceptance deadlines, at most one per order.
#[derive(Clone)]
pub struct AcceptanceTimers {
    armed: Arc<DashMap<Uuid, ArmedTimer>>,
    expired_tx: mpsc::Sender<TimerKey>,
    metrics: Metrics,
}

impl AcceptanceTimers {
    pub fn new(expired_tx: mpsc::Sender<TimerKey>, metrics: Metrics) -> Self {
        Self {
            armed: Arc::new(DashMap::new()),
            expired_tx,
            metrics,
        }
    }

    /// Starts the deadline for `key`, replacing any timer still armed for the
    /// same order.
    pub fn arm(&self, key: TimerKey, after: Duration) {
        let expired_tx = self.expired_tx.clone();
        let metrics = self.metrics.clone();

        let handle = tokio::spawn(async move {
            tokio::time::sleep(after).await;
            if let Err(err) = enqueue_expiry(&expired_tx, &metrics, key).await {
                debug!(
                    order_id = %key.order_id,
                    error = %err,
                    "acceptance timer fired after shutdown"
                );
            }
        });

        let replaced = self.armed.insert(
            key.order_id,
            ArmedTimer {
                attempt_number: key.attempt_number,
                handle,
            },
        );
        if let Some(previous) = replaced {
            previous.handle.abort();
        }
        self.metrics.pending_offers.set(self.armed.len() as i64);
    }

    /// Idempotent. Returns whether a timer for exactly this attempt was armed.
    pub fn cancel(&self, key: TimerKey) -> bool {
        let removed = self
            .armed
            .remove_if(&key.order_id, |_, timer| {
                timer.attempt_number == key.attempt_number
            });
        self.metrics.pending_offers.set(self.armed.len() as i64);

        match removed {
            Some((_, timer)) => {
                timer.handle.abort();
                true
            }
            None => false,
        }
    }

    pub fn is_armed(&self, key: TimerKey) -> bool {
        self.armed
            .get(&key.order_id)
            .is_some_and(|timer| timer.attempt_number == key.attempt_number)
    }

    pub fn armed_count(&self) -> usize {
        self.armed.len()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::sync::mpsc;
    use uuid::Uuid;

    use super::{AcceptanceTimers, TimerKey};
    use crate::observability::metrics::Metrics;

    fn key(attempt_number: u32) -> TimerKey {
        TimerKey {
            order_id: Uuid::from_u128(42),
            attempt_number,
        }
    }

    #[tokio::test]
    async fn armed_timer_fires_once() {
        let (tx, mut rx) = mpsc::channel(8);
        let timers = AcceptanceTimers::new(tx, Metrics::new());

        timers.arm(key(1), Duration::from_millis(10));
        let fired = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();

        assert_eq!(fired, key(1));
    }

    #[tokio::test]
    async fn cancelled_timer_never_fires() {
        let (tx, mut rx) = mpsc::channel(8);
        let timers = AcceptanceTimers::new(tx, Metrics::new());

        timers.arm(key(1), Duration::from_millis(20));
        assert!(timers.cancel(key(1)));
        assert!(!timers.cancel(key(1)));

        let fired = tokio::time::timeout(Duration::from_millis(100), rx.recv()).await;
        assert!(fired.is_err());
        assert_eq!(timers.armed_count(), 0);
    }

    #[tokio::test]
    async fn cancel_for_other_attempt_leaves_timer_armed() {
        let (tx, _rx) = mpsc::channel(8);
        let timers = AcceptanceTimers::new(tx, Metrics::new());

        timers.arm(key(2), Duration::from_secs(60));
        assert!(!timers.cancel(key(1)));
        assert!(timers.is_armed(key(2)));
    }

    #[tokio::test]
    async fn rearming_replaces_previous_attempt() {
        let (tx, mut rx) = mpsc::channel(8);
        let timers = AcceptanceTimers::new(tx, Metrics::new());

        timers.arm(key(1), Duration::from_millis(30));
        timers.arm(key(2), Duration::from_millis(60));
        assert_eq!(timers.armed_count(), 1);

        let fired = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(fired, key(2));
    }
}
