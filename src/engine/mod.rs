pub mod coordinator;
pub mod eligibility;
pub mod locks;
pub mod queue;
pub mod scoring;
pub mod supervisor;
pub mod timer;

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{broadcast, mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{error, warn};
use uuid::Uuid;

use crate::collab::OrderFilter;
use crate::config::DispatchConfig;
use crate::engine::coordinator::{
    AcceptOutcome, Collaborators, DeclineOutcome, DispatchCoordinator, DispatchOutcome,
};
use crate::engine::supervisor::{ReassignOutcome, ReassignTrigger, ReassignmentSupervisor};
use crate::engine::timer::{AcceptanceTimers, TimerKey};
use crate::error::EngineError;
use crate::models::candidate::CandidateSearch;
use crate::models::driver::GeoPoint;
use crate::models::event::DispatchEvent;
use crate::models::order::{Order, OrderStatus, PaymentMethod};
use crate::observability::metrics::Metrics;

struct RunningSupervisor {
    shutdown_tx: watch::Sender<bool>,
    handle: JoinHandle<mpsc::Receiver<TimerKey>>,
}

struct SupervisorRunner {
    idle_rx: Option<mpsc::Receiver<TimerKey>>,
    running: Option<RunningSupervisor>,
}

/// Entry point for intake and driver-session handlers.
pub struct DispatchEngine {
    coordinator: Arc<DispatchCoordinator>,
    supervisor: Arc<ReassignmentSupervisor>,
    events_tx: broadcast::Sender<DispatchEvent>,
    runner: Mutex<SupervisorRunner>,
}

impl DispatchEngine {
    pub fn new(
        config: DispatchConfig,
        collab: Collaborators,
        events_tx: broadcast::Sender<DispatchEvent>,
        metrics: Metrics,
    ) -> Self {
        let (expired_tx, expired_rx) = mpsc::channel(config.signal_queue_size);
        let timers = AcceptanceTimers::new(expired_tx, metrics.clone());

        let coordinator = Arc::new(DispatchCoordinator::new(
            config,
            collab,
            timers,
            events_tx.clone(),
            metrics.clone(),
        ));
        let supervisor = Arc::new(ReassignmentSupervisor::new(coordinator.clone(), metrics));

        Self {
            coordinator,
            supervisor,
            events_tx,
            runner: Mutex::new(SupervisorRunner {
                idle_rx: Some(expired_rx),
                running: None,
            }),
        }
    }

    pub fn coordinator(&self) -> &Arc<DispatchCoordinator> {
        &self.coordinator
    }

    pub fn supervisor(&self) -> &Arc<ReassignmentSupervisor> {
        &self.supervisor
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<DispatchEvent> {
        self.events_tx.subscribe()
    }

    /// Intake: stores a new order in `SEARCHING` and runs the first dispatch.
    pub async fn submit(
        &self,
        pickup: GeoPoint,
        dropoff: GeoPoint,
        payment_method: PaymentMethod,
    ) -> Result<(Order, DispatchOutcome), EngineError> {
        let order = Order::new(pickup, dropoff, payment_method, Utc::now());
        let order = self.coordinator.insert(order).await?;
        let outcome = self.coordinator.dispatch(order.id).await?;
        let order = self.coordinator.load(order.id).await?;
        Ok((order, outcome))
    }

    pub async fn dispatch(&self, order_id: Uuid) -> Result<DispatchOutcome, EngineError> {
        self.coordinator.dispatch(order_id).await
    }

    pub async fn accept(
        &self,
        order_id: Uuid,
        driver_id: Uuid,
    ) -> Result<AcceptOutcome, EngineError> {
        self.coordinator.accept(order_id, driver_id).await
    }

    /// Declines the offer and retries right away instead of waiting for the
    /// next scan.
    pub async fn decline(
        &self,
        order_id: Uuid,
        driver_id: Uuid,
    ) -> Result<DeclineOutcome, EngineError> {
        let outcome = self.coordinator.decline(order_id, driver_id).await?;

        if outcome == DeclineOutcome::Declined {
            if let Err(err) = self
                .supervisor
                .reassign(order_id, ReassignTrigger::Retry)
                .await
            {
                warn!(
                    order_id = %order_id,
                    error = %err,
                    "retry after decline failed; scan will pick it up"
                );
            }
        }

        Ok(outcome)
    }

    pub async fn cancel_by_driver(
        &self,
        order_id: Uuid,
        driver_id: Uuid,
        reason: &str,
    ) -> Result<ReassignOutcome, EngineError> {
        self.supervisor
            .handle_driver_cancellation(order_id, driver_id, reason)
            .await
    }

    pub async fn driver_went_offline(
        &self,
        driver_id: Uuid,
    ) -> Result<Vec<(Uuid, ReassignOutcome)>, EngineError> {
        self.supervisor.handle_driver_offline(driver_id).await
    }

    pub async fn cancel_order(&self, order_id: Uuid, reason: &str) -> Result<Order, EngineError> {
        self.coordinator.cancel(order_id, reason).await
    }

    pub async fn record_progress(
        &self,
        order_id: Uuid,
        status: OrderStatus,
    ) -> Result<Order, EngineError> {
        self.coordinator.record_progress(order_id, status).await
    }

    pub async fn preview_candidates(&self, order_id: Uuid) -> Result<CandidateSearch, EngineError> {
        self.coordinator.preview_candidates(order_id).await
    }

    pub async fn get_order(&self, order_id: Uuid) -> Result<Order, EngineError> {
        self.coordinator.load(order_id).await
    }

    pub async fn list_orders(&self, filter: OrderFilter) -> Result<Vec<Order>, EngineError> {
        self.coordinator.query(filter).await
    }

    /// Starts the background scan loop. Returns `false` if it was already
    /// running.
    pub async fn start_supervisor(&self) -> Result<bool, EngineError> {
        let mut runner = self.runner.lock().await;
        if runner.running.is_some() {
            return Ok(false);
        }

        let expired_rx = runner
            .idle_rx
            .take()
            .ok_or(EngineError::SupervisorUnavailable("expiry queue was lost"))?;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(self.supervisor.clone().run(expired_rx, shutdown_rx));

        runner.running = Some(RunningSupervisor {
            shutdown_tx,
            handle,
        });
        Ok(true)
    }

    /// Stops the loop and waits for it to exit. Returns `false` if it was not
    /// running.
    pub async fn stop_supervisor(&self) -> bool {
        let mut runner = self.runner.lock().await;
        let Some(running) = runner.running.take() else {
            return false;
        };

        let _ = running.shutdown_tx.send(true);
        match running.handle.await {
            Ok(expired_rx) => runner.idle_rx = Some(expired_rx),
            Err(err) => error!(error = %err, "supervisor task ended abnormally"),
        }
        true
    }

    pub async fn supervisor_running(&self) -> bool {
        self.runner.lock().await.running.is_some()
    }
}
