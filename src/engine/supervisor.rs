use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::collab::OrderFilter;
use crate::engine::coordinator::{DispatchCoordinator, DispatchOutcome};
use crate::engine::locks::ReassignmentFlags;
use crate::engine::timer::TimerKey;
use crate::error::EngineError;
use crate::models::attempt::AttemptOutcome;
use crate::models::order::OrderStatus;
use crate::observability::metrics::Metrics;

#[derive(Debug, Clone, PartialEq)]
pub enum ReassignTrigger {
    /// The offer for `attempt_number` ran out of time. `observed_at` is set by
    /// the periodic scan and re-checked under the order lock.
    Timeout {
        attempt_number: u32,
        observed_at: Option<DateTime<Utc>>,
    },
    DriverCancelled {
        driver_id: Uuid,
        reason: String,
    },
    DriverOffline {
        driver_id: Uuid,
    },
    /// The order is back in `SEARCHING` and should be offered again.
    Retry,
}

impl ReassignTrigger {
    pub fn label(&self) -> &'static str {
        match self {
            ReassignTrigger::Timeout { .. } => "timeout",
            ReassignTrigger::DriverCancelled { .. } => "driver_cancelled",
            ReassignTrigger::DriverOffline { .. } => "driver_offline",
            ReassignTrigger::Retry => "retry",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "result", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReassignOutcome {
    Redispatched { dispatch: DispatchOutcome },
    Failed,
    /// Another trigger for the same order is being handled.
    AlreadyInProgress,
    /// The order moved on before this trigger was applied.
    Superseded,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScanReport {
    pub timed_out: usize,
    pub retried: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl ScanReport {
    fn tally(&mut self, outcome: &ReassignOutcome, counted: fn(&mut Self)) {
        match outcome {
            ReassignOutcome::Failed => self.failed += 1,
            ReassignOutcome::Redispatched { .. } => counted(self),
            ReassignOutcome::AlreadyInProgress | ReassignOutcome::Superseded => self.skipped += 1,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.timed_out + self.retried + self.failed == 0
    }
}

/// Makes sure no order waits on an unanswered offer forever and that every
/// order runs out of attempts in `FAILED` rather than looping.
pub struct ReassignmentSupervisor {
    coordinator: Arc<DispatchCoordinator>,
    flags: ReassignmentFlags,
    metrics: Metrics,
}

impl ReassignmentSupervisor {
    pub fn new(coordinator: Arc<DispatchCoordinator>, metrics: Metrics) -> Self {
        Self {
            coordinator,
            flags: ReassignmentFlags::new(),
            metrics,
        }
    }

    pub fn flags(&self) -> &ReassignmentFlags {
        &self.flags
    }

    pub async fn reassign(
        &self,
        order_id: Uuid,
        trigger: ReassignTrigger,
    ) -> Result<ReassignOutcome, EngineError> {
        let Some(_flag) = self.flags.try_begin(order_id) else {
            debug!(
                order_id = %order_id,
                trigger = trigger.label(),
                "reassignment already in progress"
            );
            return Ok(ReassignOutcome::AlreadyInProgress);
        };

        let _guard = self.coordinator.lock_order(order_id).await;
        let order = self.coordinator.load(order_id).await?;
        let timeout = self.coordinator.config().acceptance_timeout_chrono();

        let (driver_id, outcome) = match &trigger {
            ReassignTrigger::Retry => {
                if order.status != OrderStatus::Searching {
                    return Ok(ReassignOutcome::Superseded);
                }
                (None, None)
            }
            ReassignTrigger::Timeout {
                attempt_number,
                observed_at,
            } => {
                let Some(pending) = order.pending_attempt() else {
                    return Ok(ReassignOutcome::Superseded);
                };
                if pending.attempt_number != *attempt_number {
                    return Ok(ReassignOutcome::Superseded);
                }
                if observed_at.is_some_and(|now| pending.offered_at + timeout > now) {
                    return Ok(ReassignOutcome::Superseded);
                }
                (Some(pending.driver_id), Some(AttemptOutcome::TimedOut))
            }
            ReassignTrigger::DriverCancelled { driver_id, reason } => {
                let holds = order.assigned_driver_id == Some(*driver_id)
                    && matches!(order.status, OrderStatus::Assigned | OrderStatus::Accepted);
                if !holds {
                    return Ok(ReassignOutcome::Superseded);
                }
                info!(
                    order_id = %order_id,
                    driver_id = %driver_id,
                    reason = reason.as_str(),
                    "driver cancelled order"
                );
                (Some(*driver_id), Some(AttemptOutcome::CancelledByDriver))
            }
            ReassignTrigger::DriverOffline { driver_id } => {
                if !order.is_offered_to(*driver_id) {
                    return Ok(ReassignOutcome::Superseded);
                }
                (Some(*driver_id), Some(AttemptOutcome::DriverOffline))
            }
        };

        let order = match (driver_id, outcome) {
            (Some(driver_id), Some(outcome)) => {
                match self
                    .coordinator
                    .release_locked(order, driver_id, outcome)
                    .await?
                {
                    Some(order) => order,
                    None => return Ok(ReassignOutcome::Superseded),
                }
            }
            _ => order,
        };

        self.metrics
            .reassignments_total
            .with_label_values(&[trigger.label()])
            .inc();

        match self.coordinator.dispatch_locked(order).await? {
            DispatchOutcome::MaxAttemptsExceeded => Ok(ReassignOutcome::Failed),
            dispatch => Ok(ReassignOutcome::Redispatched { dispatch }),
        }
    }

    pub async fn handle_expiry(&self, key: TimerKey) -> Result<ReassignOutcome, EngineError> {
        self.reassign(
            key.order_id,
            ReassignTrigger::Timeout {
                attempt_number: key.attempt_number,
                observed_at: None,
            },
        )
        .await
    }

    pub async fn handle_driver_cancellation(
        &self,
        order_id: Uuid,
        driver_id: Uuid,
        reason: &str,
    ) -> Result<ReassignOutcome, EngineError> {
        self.reassign(
            order_id,
            ReassignTrigger::DriverCancelled {
                driver_id,
                reason: reason.to_string(),
            },
        )
        .await
    }

    /// Reassigns every order currently offered to `driver_id`.
    pub async fn handle_driver_offline(
        &self,
        driver_id: Uuid,
    ) -> Result<Vec<(Uuid, ReassignOutcome)>, EngineError> {
        let offered = self
            .coordinator
            .query(OrderFilter::assigned_to(driver_id))
            .await?;

        info!(driver_id = %driver_id, orders = offered.len(), "driver went offline");

        let results = join_all(offered.iter().map(|order| {
            self.reassign(order.id, ReassignTrigger::DriverOffline { driver_id })
        }))
        .await;

        let mut outcomes = Vec::with_capacity(results.len());
        for (order, result) in offered.iter().zip(results) {
            match result {
                Ok(outcome) => outcomes.push((order.id, outcome)),
                Err(err) => {
                    warn!(
                        order_id = %order.id,
                        driver_id = %driver_id,
                        error = %err,
                        "offline reassignment failed"
                    );
                }
            }
        }
        Ok(outcomes)
    }

    pub async fn scan_once(&self) -> ScanReport {
        self.scan_once_at(Utc::now()).await
    }

    /// Times out every offer older than the acceptance timeout at `now` and
    /// retries every order still searching.
    pub async fn scan_once_at(&self, now: DateTime<Utc>) -> ScanReport {
        let mut report = ScanReport::default();
        let timeout = self.coordinator.config().acceptance_timeout_chrono();

        let expired: Vec<(Uuid, u32)> = match self
            .coordinator
            .query(OrderFilter::status(OrderStatus::Assigned))
            .await
        {
            Ok(orders) => orders
                .iter()
                .filter_map(|order| {
                    order
                        .pending_attempt()
                        .filter(|attempt| attempt.offered_at + timeout <= now)
                        .map(|attempt| (order.id, attempt.attempt_number))
                })
                .collect(),
            Err(err) => {
                warn!(error = %err, "scan could not list assigned orders");
                Vec::new()
            }
        };

        let results = join_all(expired.iter().map(|(order_id, attempt_number)| {
            self.reassign(
                *order_id,
                ReassignTrigger::Timeout {
                    attempt_number: *attempt_number,
                    observed_at: Some(now),
                },
            )
        }))
        .await;
        for ((order_id, _), result) in expired.iter().zip(results) {
            match result {
                Ok(outcome) => report.tally(&outcome, |report| report.timed_out += 1),
                Err(err) => {
                    report.skipped += 1;
                    warn!(order_id = %order_id, error = %err, "timeout reassignment failed");
                }
            }
        }

        let searching: Vec<Uuid> = match self
            .coordinator
            .query(OrderFilter::status(OrderStatus::Searching))
            .await
        {
            Ok(orders) => orders.iter().map(|order| order.id).collect(),
            Err(err) => {
                warn!(error = %err, "scan could not list searching orders");
                Vec::new()
            }
        };

        let results = join_all(
            searching
                .iter()
                .map(|order_id| self.reassign(*order_id, ReassignTrigger::Retry)),
        )
        .await;
        for (order_id, result) in searching.iter().zip(results) {
            match result {
                Ok(outcome) => report.tally(&outcome, |report| report.retried += 1),
                Err(err) => {
                    report.skipped += 1;
                    warn!(order_id = %order_id, error = %err, "retry failed");
                }
            }
        }

        report
    }

    /// Runs until `shutdown_rx` flips to `true`, then hands the expiry queue
    /// back so the loop can be restarted.
    pub async fn run(
        self: Arc<Self>,
        mut expired_rx: mpsc::Receiver<TimerKey>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) -> mpsc::Receiver<TimerKey> {
        let scan_interval = self.coordinator.config().scan_interval;
        info!(scan_interval_secs = scan_interval.as_secs(), "reassignment supervisor started");

        let mut ticker = tokio::time::interval(scan_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let report = self.scan_once().await;
                    if !report.is_empty() {
                        info!(
                            timed_out = report.timed_out,
                            retried = report.retried,
                            failed = report.failed,
                            skipped = report.skipped,
                            "supervisor scan finished"
                        );
                    }
                }
                expired = expired_rx.recv() => {
                    let Some(key) = expired else {
                        warn!("expiry queue closed");
                        break;
                    };
                    self.metrics.expiries_in_queue.dec();

                    let supervisor = self.clone();
                    tokio::spawn(async move {
                        if let Err(err) = supervisor.handle_expiry(key).await {
                            warn!(
                                order_id = %key.order_id,
                                error = %err,
                                "acceptance timeout handling failed"
                            );
                        }
                    });
                }
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                }
            }
        }

        info!("reassignment supervisor stopped");
        expired_rx
    }
}
