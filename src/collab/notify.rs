use async_trait::async_trait;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::collab::Notifier;
use crate::error::CollaboratorError;
use crate::models::event::OfferSummary;

/// Publishes offers to connected driver sessions (see the offers websocket).
#[derive(Clone)]
pub struct BroadcastNotifier {
    offers_tx: broadcast::Sender<OfferSummary>,
}

impl BroadcastNotifier {
    pub fn new(buffer_size: usize) -> Self {
        let (offers_tx, _unused_rx) = broadcast::channel(buffer_size);
        Self { offers_tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<OfferSummary> {
        self.offers_tx.subscribe()
    }
}

#[async_trait]
impl Notifier for BroadcastNotifier {
    async fn offer(
        &self,
        driver_id: Uuid,
        _order_id: Uuid,
        summary: &OfferSummary,
    ) -> Result<(), CollaboratorError> {
        self.offers_tx
            .send(summary.clone())
            .map(|_| ())
            .map_err(|_| CollaboratorError::Unavailable {
                collaborator: "notifier",
                message: format!("no session connected for driver {driver_id}"),
            })
    }
}

/// Drops every offer. For tests and headless runs.
pub struct NoopNotifier;

#[async_trait]
impl Notifier for NoopNotifier {
    async fn offer(
        &self,
        _driver_id: Uuid,
        _order_id: Uuid,
        _summary: &OfferSummary,
    ) -> Result<(), CollaboratorError> {
        Ok(())
    }
}
