use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::collab::{DistanceEstimator, DriverDirectory, Notifier, OrderFilter, OrderStore};
use crate::config::DispatchConfig;
use crate::engine::eligibility::{is_eligible, EligibilityRules};
use crate::engine::locks::{OrderGuard, OrderLocks};
use crate::engine::scoring::compute_score;
use crate::engine::timer::{AcceptanceTimers, TimerKey};
use crate::error::{CollaboratorError, EngineError, StoreError};
use crate::models::attempt::{AttemptOutcome, DispatchAttempt};
use crate::models::candidate::{CandidateSearch, DriverCandidate};
use crate::models::event::{DispatchEvent, OfferSummary};
use crate::models::order::{Order, OrderPatch, OrderStatus};
use crate::observability::metrics::Metrics;

/// Reloads allowed after a version conflict before giving up on a transition.
const MAX_RELOADS: usize = 3;

pub const MAX_ATTEMPTS_EXCEEDED: &str = "MAX_ATTEMPTS_EXCEEDED";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DispatchOutcome {
    Offered {
        driver_id: Uuid,
        attempt_number: u32,
        score: f64,
    },
    /// No eligible driver right now. No attempt was consumed.
    NoCandidates,
    NotDispatchable {
        status: OrderStatus,
    },
    MaxAttemptsExceeded,
    /// Another writer kept changing the order; the caller's trigger is moot.
    Superseded,
}

impl DispatchOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            DispatchOutcome::Offered { .. } => "offered",
            DispatchOutcome::NoCandidates => "no_candidates",
            DispatchOutcome::NotDispatchable { .. } => "not_dispatchable",
            DispatchOutcome::MaxAttemptsExceeded => "max_attempts_exceeded",
            DispatchOutcome::Superseded => "superseded",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AcceptOutcome {
    Accepted,
    AlreadyAccepted,
    StaleAccept,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeclineOutcome {
    Declined,
    StaleDecline,
}

#[derive(Clone)]
pub struct Collaborators {
    pub orders: Arc<dyn OrderStore>,
    pub drivers: Arc<dyn DriverDirectory>,
    pub notifier: Arc<dyn Notifier>,
    pub distance: Arc<dyn DistanceEstimator>,
}

/// Owns the assignment lifecycle of every order: search, offer, accept,
/// decline and the transitions the supervisor drives.
pub struct DispatchCoordinator {
    config: DispatchConfig,
    rules: EligibilityRules,
    collab: Collaborators,
    locks: OrderLocks,
    timers: AcceptanceTimers,
    events_tx: broadcast::Sender<DispatchEvent>,
    metrics: Metrics,
}

impl DispatchCoordinator {
    pub fn new(
        config: DispatchConfig,
        collab: Collaborators,
        timers: AcceptanceTimers,
        events_tx: broadcast::Sender<DispatchEvent>,
        metrics: Metrics,
    ) -> Self {
        Self {
            rules: EligibilityRules::from(&config),
            config,
            collab,
            locks: OrderLocks::new(),
            timers,
            events_tx,
            metrics,
        }
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    pub fn timers(&self) -> &AcceptanceTimers {
        &self.timers
    }

    pub async fn lock_order(&self, order_id: Uuid) -> OrderGuard {
        self.locks.lock(order_id).await
    }

    pub async fn load(&self, order_id: Uuid) -> Result<Order, EngineError> {
        let order = timeout(
            self.config.collaborator_timeout,
            self.collab.orders.get(order_id),
        )
        .await
        .map_err(|_| StoreError::Unavailable("order store timed out".to_string()))??;
        Ok(order)
    }

    pub async fn query(&self, filter: OrderFilter) -> Result<Vec<Order>, EngineError> {
        let orders = timeout(
            self.config.collaborator_timeout,
            self.collab.orders.query(filter),
        )
        .await
        .map_err(|_| StoreError::Unavailable("order store timed out".to_string()))??;
        Ok(orders)
    }

    pub async fn insert(&self, order: Order) -> Result<Order, EngineError> {
        let order = timeout(
            self.config.collaborator_timeout,
            self.collab.orders.insert(order),
        )
        .await
        .map_err(|_| StoreError::Unavailable("order store timed out".to_string()))??;
        Ok(order)
    }

    async fn write(&self, order: &Order, patch: OrderPatch) -> Result<Order, StoreError> {
        timeout(
            self.config.collaborator_timeout,
            self.collab.orders.update(order.id, patch, Some(order.version)),
        )
        .await
        .map_err(|_| StoreError::Unavailable("order store timed out".to_string()))?
    }

    /// Applies the patch chosen by `plan` with optimistic concurrency. On a
    /// version conflict the order is reloaded and `plan` runs again against
    /// the fresh state. `Ok(None)` means `plan` found nothing to do.
    async fn transition<F>(
        &self,
        mut order: Order,
        mut plan: F,
    ) -> Result<Option<Order>, EngineError>
    where
        F: FnMut(&Order) -> Result<Option<OrderPatch>, EngineError>,
    {
        for _ in 0..MAX_RELOADS {
            let Some(patch) = plan(&order)? else {
                return Ok(None);
            };

            match self.write(&order, patch).await {
                Ok(updated) => return Ok(Some(updated)),
                Err(StoreError::Conflict {
                    expected, actual, ..
                }) => {
                    debug!(
                        order_id = %order.id,
                        expected,
                        actual,
                        "order changed underneath; reloading"
                    );
                    order = self.load(order.id).await?;
                }
                Err(err) => return Err(err.into()),
            }
        }

        Ok(None)
    }

    pub async fn dispatch(&self, order_id: Uuid) -> Result<DispatchOutcome, EngineError> {
        let _guard = self.lock_order(order_id).await;
        let order = match self.load(order_id).await {
            Ok(order) => order,
            Err(EngineError::Store(err)) => {
                self.metrics
                    .collaborator_errors_total
                    .with_label_values(&["order_store"])
                    .inc();
                warn!(order_id = %order_id, error = %err, "could not load order for dispatch");
                return Ok(DispatchOutcome::NoCandidates);
            }
            Err(err) => return Err(err),
        };
        self.dispatch_locked(order).await
    }

    /// Offers a `SEARCHING` order to the best candidate. The caller holds the
    /// order's lock.
    pub(crate) async fn dispatch_locked(
        &self,
        mut order: Order,
    ) -> Result<DispatchOutcome, EngineError> {
        let mut outcome = DispatchOutcome::Superseded;

        for _ in 0..MAX_RELOADS {
            if order.status != OrderStatus::Searching {
                outcome = DispatchOutcome::NotDispatchable {
                    status: order.status,
                };
                break;
            }

            if order.attempt_count >= self.config.max_attempts {
                self.fail_locked(order, MAX_ATTEMPTS_EXCEEDED).await?;
                outcome = DispatchOutcome::MaxAttemptsExceeded;
                break;
            }

            let search = match self.search(&order).await {
                Ok(search) => search,
                Err(err) => {
                    self.record_collaborator_error(&err);
                    warn!(
                        order_id = %order.id,
                        error = %err,
                        "candidate search failed; will retry on next scan"
                    );
                    outcome = DispatchOutcome::NoCandidates;
                    break;
                }
            };

            let Some(best) = search.best().cloned() else {
                info!(
                    order_id = %order.id,
                    rejected = search.rejected.len(),
                    "no eligible drivers; order stays searching"
                );
                outcome = DispatchOutcome::NoCandidates;
                break;
            };

            let attempt = DispatchAttempt::pending(
                order.id,
                best.driver_id,
                order.attempt_count + 1,
                best.score,
                Utc::now(),
            );

            match self.write(&order, OrderPatch::offer(attempt.clone())).await {
                Ok(updated) => {
                    self.after_offer(&updated, &attempt, best.distance_km);
                    outcome = DispatchOutcome::Offered {
                        driver_id: best.driver_id,
                        attempt_number: attempt.attempt_number,
                        score: best.score,
                    };
                    break;
                }
                Err(StoreError::Conflict { .. }) => {
                    debug!(order_id = %order.id, "offer raced another writer; reloading");
                    order = match self.load(order.id).await {
                        Ok(order) => order,
                        Err(EngineError::Store(err)) => {
                            warn!(
                                order_id = %order.id,
                                error = %err,
                                "reload after conflict failed"
                            );
                            outcome = DispatchOutcome::NoCandidates;
                            break;
                        }
                        Err(err) => return Err(err),
                    };
                }
                Err(StoreError::Unavailable(message)) => {
                    self.metrics
                        .collaborator_errors_total
                        .with_label_values(&["order_store"])
                        .inc();
                    warn!(
                        order_id = %order.id,
                        error = %message,
                        "could not persist offer; will retry on next scan"
                    );
                    outcome = DispatchOutcome::NoCandidates;
                    break;
                }
                Err(err) => return Err(err.into()),
            }
        }

        self.metrics
            .dispatch_outcomes_total
            .with_label_values(&[outcome.as_str()])
            .inc();
        Ok(outcome)
    }

    fn after_offer(&self, order: &Order, attempt: &DispatchAttempt, distance_km: f64) {
        let key = TimerKey {
            order_id: order.id,
            attempt_number: attempt.attempt_number,
        };
        self.timers.arm(key, self.config.acceptance_timeout);

        let summary = OfferSummary {
            order_id: order.id,
            driver_id: attempt.driver_id,
            attempt_number: attempt.attempt_number,
            pickup: order.pickup,
            dropoff: order.dropoff,
            payment_method: order.payment_method,
            distance_km,
            expires_at: attempt.offered_at + self.config.acceptance_timeout_chrono(),
        };
        self.push_offer(summary);

        let _ = self.events_tx.send(DispatchEvent::Offered {
            order_id: order.id,
            driver_id: attempt.driver_id,
            attempt_number: attempt.attempt_number,
            score: attempt.score,
            at: attempt.offered_at,
        });

        info!(
            order_id = %order.id,
            driver_id = %attempt.driver_id,
            attempt = attempt.attempt_number,
            score = attempt.score,
            "order offered"
        );
    }

    /// Fire-and-forget. A lost push is not a dispatch failure: the driver
    /// still sees the offer on the next refresh.
    fn push_offer(&self, summary: OfferSummary) {
        let notifier = self.collab.notifier.clone();
        let metrics = self.metrics.clone();
        let limit = self.config.collaborator_timeout;

        tokio::spawn(async move {
            let result = timeout(
                limit,
                notifier.offer(summary.driver_id, summary.order_id, &summary),
            )
            .await
            .unwrap_or(Err(CollaboratorError::Timeout("notifier")));

            if let Err(err) = result {
                metrics
                    .collaborator_errors_total
                    .with_label_values(&[err.collaborator()])
                    .inc();
                warn!(
                    order_id = %summary.order_id,
                    driver_id = %summary.driver_id,
                    error = %err,
                    "offer push failed"
                );
            }
        });
    }

    /// Ranks every online driver for `order`. Read-only.
    pub async fn search(&self, order: &Order) -> Result<CandidateSearch, CollaboratorError> {
        let start = Instant::now();

        let drivers = timeout(
            self.config.collaborator_timeout,
            self.collab.drivers.list_online_drivers(),
        )
        .await
        .map_err(|_| CollaboratorError::Timeout("driver_directory"))??;

        let now = Utc::now();
        let mut search = CandidateSearch::default();

        for driver in drivers {
            let eligibility = is_eligible(&driver, order, &self.rules, now);
            let distance_km = self
                .collab
                .distance
                .distance_km(&driver.location, &order.pickup)?;

            let (score, breakdown) = if eligibility.eligible {
                let (score, breakdown) = compute_score(
                    distance_km,
                    driver.active_orders,
                    driver.rating,
                    self.config.max_concurrent_orders,
                    self.config.max_reasonable_distance_km,
                );
                (score, Some(breakdown))
            } else {
                (0.0, None)
            };

            let candidate = DriverCandidate {
                driver_id: driver.id,
                distance_km,
                active_orders: driver.active_orders,
                rating: driver.rating,
                score,
                breakdown,
                eligibility,
            };

            if eligibility.eligible {
                search.ranked.push(candidate);
            } else {
                debug!(
                    order_id = %order.id,
                    driver_id = %driver.id,
                    reason = eligibility.reason.map(|reason| reason.as_str()),
                    "driver rejected"
                );
                search.rejected.push(candidate);
            }
        }

        search.ranked.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then(a.active_orders.cmp(&b.active_orders))
                .then(a.driver_id.cmp(&b.driver_id))
        });

        self.metrics
            .candidate_search_seconds
            .observe(start.elapsed().as_secs_f64());
        Ok(search)
    }

    pub async fn preview_candidates(&self, order_id: Uuid) -> Result<CandidateSearch, EngineError> {
        let order = self.load(order_id).await?;
        Ok(self.search(&order).await?)
    }

    pub async fn accept(
        &self,
        order_id: Uuid,
        driver_id: Uuid,
    ) -> Result<AcceptOutcome, EngineError> {
        let _guard = self.lock_order(order_id).await;
        let order = self.load(order_id).await?;

        if order.status == OrderStatus::Accepted && order.assigned_driver_id == Some(driver_id) {
            return Ok(AcceptOutcome::AlreadyAccepted);
        }

        let accepted = self
            .transition(order, |current| {
                if !current.is_offered_to(driver_id) {
                    return Ok(None);
                }
                let resolved = current
                    .pending_attempt()
                    .and_then(|attempt| attempt.resolve(AttemptOutcome::Accepted, Utc::now()));
                Ok(resolved.map(OrderPatch::accepted))
            })
            .await?;

        let Some(order) = accepted else {
            debug!(order_id = %order_id, driver_id = %driver_id, "stale accept ignored");
            return Ok(AcceptOutcome::StaleAccept);
        };

        let key = TimerKey {
            order_id,
            attempt_number: order.attempt_count,
        };
        self.timers.cancel(key);
        self.report_offer_outcome(driver_id, order_id, true).await;

        let _ = self.events_tx.send(DispatchEvent::Accepted {
            order_id,
            driver_id,
            attempt_number: key.attempt_number,
            at: order.last_transition_at,
        });
        info!(
            order_id = %order_id,
            driver_id = %driver_id,
            attempt = key.attempt_number,
            "offer accepted"
        );

        Ok(AcceptOutcome::Accepted)
    }

    /// Declines the open offer. The caller is expected to trigger a retry.
    pub async fn decline(
        &self,
        order_id: Uuid,
        driver_id: Uuid,
    ) -> Result<DeclineOutcome, EngineError> {
        let _guard = self.lock_order(order_id).await;
        let order = self.load(order_id).await?;

        if !order.is_offered_to(driver_id) {
            debug!(order_id = %order_id, driver_id = %driver_id, "stale decline ignored");
            return Ok(DeclineOutcome::StaleDecline);
        }

        match self
            .release_locked(order, driver_id, AttemptOutcome::Declined)
            .await?
        {
            Some(_) => Ok(DeclineOutcome::Declined),
            None => Ok(DeclineOutcome::StaleDecline),
        }
    }

    /// Detaches `driver_id` from the order, resolves its open attempt with
    /// `outcome`, and puts the driver on the exclusion list. Returns `None`
    /// if the driver no longer holds the order. The caller holds the lock.
    pub(crate) async fn release_locked(
        &self,
        order: Order,
        driver_id: Uuid,
        outcome: AttemptOutcome,
    ) -> Result<Option<Order>, EngineError> {
        let mut was_accepted = false;
        let released = self
            .transition(order, |current| {
                let holds = current.assigned_driver_id == Some(driver_id)
                    && matches!(
                        current.status,
                        OrderStatus::Assigned | OrderStatus::Accepted
                    );
                if !holds {
                    return Ok(None);
                }
                was_accepted = current.status == OrderStatus::Accepted;
                let resolved = current
                    .current_attempt()
                    .and_then(|attempt| attempt.resolve(outcome, Utc::now()));
                Ok(Some(OrderPatch::released(driver_id, resolved)))
            })
            .await?;

        let Some(order) = released else {
            return Ok(None);
        };

        self.timers.cancel(TimerKey {
            order_id: order.id,
            attempt_number: order.attempt_count,
        });
        if was_accepted {
            self.report_release(driver_id, order.id).await;
        } else {
            self.report_offer_outcome(driver_id, order.id, false).await;
        }

        let _ = self.events_tx.send(DispatchEvent::Released {
            order_id: order.id,
            driver_id,
            outcome,
            at: order.last_transition_at,
        });
        info!(
            order_id = %order.id,
            driver_id = %driver_id,
            outcome = outcome.as_str(),
            attempts = order.attempt_count,
            "driver released from order"
        );

        Ok(Some(order))
    }

    /// Marks the order `FAILED`. The caller holds the lock.
    pub(crate) async fn fail_locked(
        &self,
        order: Order,
        reason: &str,
    ) -> Result<Order, EngineError> {
        let fallback = order.clone();
        let failed = self
            .transition(order, |current| {
                if current.status.is_terminal() {
                    return Ok(None);
                }
                Ok(Some(OrderPatch::failed(reason)))
            })
            .await?;

        let Some(order) = failed else {
            return Ok(fallback);
        };

        self.timers.cancel(TimerKey {
            order_id: order.id,
            attempt_number: order.attempt_count,
        });
        self.metrics.orders_failed_total.inc();

        let _ = self.events_tx.send(DispatchEvent::Failed {
            order_id: order.id,
            reason: reason.to_string(),
            at: order.last_transition_at,
        });
        error!(
            order_id = %order.id,
            attempts = order.attempt_count,
            excluded = order.exclusion_list.len(),
            reason,
            "order failed; manual assignment required"
        );

        Ok(order)
    }

    /// External cancellation from any non-terminal state.
    pub async fn cancel(&self, order_id: Uuid, reason: &str) -> Result<Order, EngineError> {
        let _guard = self.lock_order(order_id).await;
        let order = self.load(order_id).await?;

        let mut carrier = None;
        let cancelled = self
            .transition(order, |current| {
                if current.status.is_terminal() {
                    return Err(EngineError::InvalidTransition {
                        order_id,
                        from: current.status.as_str(),
                        to: OrderStatus::Cancelled.as_str(),
                    });
                }
                carrier = current
                    .assigned_driver_id
                    .filter(|_| current.status.counts_against_load());
                let closed = current.pending_attempt().and_then(|attempt| {
                    attempt.resolve(AttemptOutcome::OrderCancelled, Utc::now())
                });
                Ok(Some(OrderPatch::cancelled(reason, closed)))
            })
            .await?;

        let order = cancelled.ok_or(EngineError::Contended(order_id))?;

        self.timers.cancel(TimerKey {
            order_id,
            attempt_number: order.attempt_count,
        });
        if let Some(driver_id) = carrier {
            self.report_release(driver_id, order_id).await;
        }
        self.publish_status(&order);
        info!(order_id = %order_id, reason, "order cancelled");

        Ok(order)
    }

    /// Records a delivery-progress transition reported by fulfillment.
    pub async fn record_progress(
        &self,
        order_id: Uuid,
        status: OrderStatus,
    ) -> Result<Order, EngineError> {
        let _guard = self.lock_order(order_id).await;
        let order = self.load(order_id).await?;

        let mut carrier = None;
        let progressed = self
            .transition(order, |current| {
                let invalid = || EngineError::InvalidTransition {
                    order_id,
                    from: current.status.as_str(),
                    to: status.as_str(),
                };

                let reportable = matches!(
                    status,
                    OrderStatus::PickedUp
                        | OrderStatus::InTransit
                        | OrderStatus::Delivered
                        | OrderStatus::Completed
                );
                let from = current.status.progress_rank().ok_or_else(invalid)?;
                let to = status.progress_rank().ok_or_else(invalid)?;

                // Progress starts once a driver has accepted and only moves forward.
                if !reportable || from < 2 || to <= from {
                    return Err(invalid());
                }
                carrier = current
                    .assigned_driver_id
                    .filter(|_| status == OrderStatus::Completed);
                Ok(Some(OrderPatch::progressed(status)))
            })
            .await?;

        let order = progressed.ok_or(EngineError::Contended(order_id))?;

        if let Some(driver_id) = carrier {
            self.report_release(driver_id, order_id).await;
        }
        self.publish_status(&order);
        info!(order_id = %order_id, status = status.as_str(), "delivery progress recorded");
        Ok(order)
    }

    fn publish_status(&self, order: &Order) {
        let _ = self.events_tx.send(DispatchEvent::StatusChanged {
            order_id: order.id,
            status: order.status,
            at: order.last_transition_at,
        });
    }

    async fn report_offer_outcome(&self, driver_id: Uuid, order_id: Uuid, accepted: bool) {
        let result = timeout(
            self.config.collaborator_timeout,
            self.collab
                .drivers
                .record_offer_outcome(driver_id, order_id, accepted),
        )
        .await
        .unwrap_or(Err(CollaboratorError::Timeout("driver_directory")));

        if let Err(err) = result {
            self.record_collaborator_error(&err);
            warn!(
                order_id = %order_id,
                driver_id = %driver_id,
                accepted,
                error = %err,
                "could not report offer outcome to driver directory"
            );
        }
    }

    async fn report_release(&self, driver_id: Uuid, order_id: Uuid) {
        let result = timeout(
            self.config.collaborator_timeout,
            self.collab.drivers.release_order(driver_id, order_id),
        )
        .await
        .unwrap_or(Err(CollaboratorError::Timeout("driver_directory")));

        if let Err(err) = result {
            self.record_collaborator_error(&err);
            warn!(
                order_id = %order_id,
                driver_id = %driver_id,
                error = %err,
                "could not report released order to driver directory"
            );
        }
    }

    fn record_collaborator_error(&self, err: &CollaboratorError) {
        self.metrics
            .collaborator_errors_total
            .with_label_values(&[err.collaborator()])
            .inc();
    }
}
