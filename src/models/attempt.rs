use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AttemptOutcome {
    Pending,
    Accepted,
    TimedOut,
    Declined,
    DriverOffline,
    CancelledByDriver,
    OrderCancelled,
}

impl AttemptOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttemptOutcome::Pending => "pending",
            AttemptOutcome::Accepted => "accepted",
            AttemptOutcome::TimedOut => "timed_out",
            AttemptOutcome::Declined => "declined",
            AttemptOutcome::DriverOffline => "driver_offline",
            AttemptOutcome::CancelledByDriver => "cancelled_by_driver",
            AttemptOutcome::OrderCancelled => "order_cancelled",
        }
    }
}

/// Audit record of one offer. The outcome is written once, when the offer
/// leaves `Pending`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DispatchAttempt {
    pub order_id: Uuid,
    pub driver_id: Uuid,
    pub attempt_number: u32,
    pub outcome: AttemptOutcome,
    pub score: f64,
    pub offered_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl DispatchAttempt {
    pub fn pending(
        order_id: Uuid,
        driver_id: Uuid,
        attempt_number: u32,
        score: f64,
        offered_at: DateTime<Utc>,
    ) -> Self {
        Self {
            order_id,
            driver_id,
            attempt_number,
            outcome: AttemptOutcome::Pending,
            score,
            offered_at,
            resolved_at: None,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.outcome == AttemptOutcome::Pending
    }

    /// Returns the resolved copy, or `None` if this attempt was already resolved.
    pub fn resolve(&self, outcome: AttemptOutcome, at: DateTime<Utc>) -> Option<Self> {
        if !self.is_pending() || outcome == AttemptOutcome::Pending {
            return None;
        }

        let mut resolved = self.clone();
        resolved.outcome = outcome;
        resolved.resolved_at = Some(at);
        Some(resolved)
    }
}
