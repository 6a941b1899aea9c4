use tokio::sync::mpsc;

use crate::engine::timer::TimerKey;
use crate::error::AppError;
use crate::observability::metrics::Metrics;

/// Hands a lapsed acceptance deadline to the supervisor loop.
pub async fn enqueue_expiry(
    tx: &mpsc::Sender<TimerKey>,
    metrics: &Metrics,
    key: TimerKey,
) -> Result<(), AppError> {
    // Counted before the send so the consumer never decrements first.
    metrics.expiries_in_queue.inc();

    if let Err(err) = tx.send(key).await {
        metrics.expiries_in_queue.dec();
        return Err(AppError::Internal(format!("expiry queue send failed: {err}")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use tokio::sync::mpsc;
    use uuid::Uuid;

    use super::enqueue_expiry;
    use crate::engine::timer::TimerKey;
    use crate::observability::metrics::Metrics;

    fn key() -> TimerKey {
        TimerKey {
            order_id: Uuid::from_u128(7),
            attempt_number: 2,
        }
    }

    #[tokio::test]
    async fn enqueued_key_reaches_consumer() {
        let metrics = Metrics::new();
        let (tx, mut rx) = mpsc::channel(4);

        enqueue_expiry(&tx, &metrics, key()).await.unwrap();

        assert_eq!(rx.recv().await, Some(key()));
        assert_eq!(metrics.expiries_in_queue.get(), 1);
    }

    #[tokio::test]
    async fn closed_queue_is_an_error_and_not_counted() {
        let metrics = Metrics::new();
        let (tx, rx) = mpsc::channel(4);
        drop(rx);

        assert!(enqueue_expiry(&tx, &metrics, key()).await.is_err());
        assert_eq!(metrics.expiries_in_queue.get(), 0);
    }
}
