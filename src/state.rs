use std::sync::Arc;

use tokio::sync::broadcast;

use crate::collab::memory::{InMemoryDriverDirectory, InMemoryOrderStore};
use crate::collab::notify::BroadcastNotifier;
use crate::config::DispatchConfig;
use crate::engine::coordinator::Collaborators;
use crate::engine::DispatchEngine;
use crate::geo::HaversineEstimator;
use crate::models::event::DispatchEvent;
use crate::observability::metrics::Metrics;

/// Engine wired to the in-memory collaborators, shared by the HTTP layer.
pub struct AppState {
    pub engine: DispatchEngine,
    pub orders: Arc<InMemoryOrderStore>,
    pub drivers: Arc<InMemoryDriverDirectory>,
    pub offers: BroadcastNotifier,
    pub metrics: Metrics,
}

impl AppState {
    pub fn new(config: DispatchConfig, event_buffer_size: usize) -> Self {
        let metrics = Metrics::new();
        let orders = Arc::new(InMemoryOrderStore::new(event_buffer_size));
        let drivers = Arc::new(InMemoryDriverDirectory::new());
        let offers = BroadcastNotifier::new(event_buffer_size);
        let (events_tx, _unused_rx) = broadcast::channel::<DispatchEvent>(event_buffer_size);

        let collab = Collaborators {
            orders: orders.clone(),
            drivers: drivers.clone(),
            notifier: Arc::new(offers.clone()),
            distance: Arc::new(HaversineEstimator),
        };

        Self {
            engine: DispatchEngine::new(config, collab, events_tx, metrics.clone()),
            orders,
            drivers,
            offers,
            metrics,
        }
    }
}
