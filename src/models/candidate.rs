use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct ScoreBreakdown {
    pub distance_factor: f64,
    pub load_factor: f64,
    pub rating_factor: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IneligibleReason {
    DriverUnavailable,
    ComplianceBlocked,
    LoadLimit,
    DebtLimitExceeded,
    AlreadyTried,
}

impl IneligibleReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            IneligibleReason::DriverUnavailable => "DRIVER_UNAVAILABLE",
            IneligibleReason::ComplianceBlocked => "COMPLIANCE_BLOCKED",
            IneligibleReason::LoadLimit => "LOAD_LIMIT",
            IneligibleReason::DebtLimitExceeded => "DEBT_LIMIT_EXCEEDED",
            IneligibleReason::AlreadyTried => "ALREADY_TRIED",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Eligibility {
    pub eligible: bool,
    pub reason: Option<IneligibleReason>,
}

impl Eligibility {
    pub fn eligible() -> Self {
        Self {
            eligible: true,
            reason: None,
        }
    }

    pub fn rejected(reason: IneligibleReason) -> Self {
        Self {
            eligible: false,
            reason: Some(reason),
        }
    }
}

/// A driver evaluated for one order during one search. Never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverCandidate {
    pub driver_id: Uuid,
    pub distance_km: f64,
    pub active_orders: u32,
    pub rating: f64,
    pub score: f64,
    pub breakdown: Option<ScoreBreakdown>,
    pub eligibility: Eligibility,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CandidateSearch {
    /// Eligible drivers, best first.
    pub ranked: Vec<DriverCandidate>,
    pub rejected: Vec<DriverCandidate>,
}

impl CandidateSearch {
    pub fn best(&self) -> Option<&DriverCandidate> {
        self.ranked.first()
    }
}
