use chrono::{DateTime, Utc};

use crate::config::DispatchConfig;
use crate::models::candidate::{Eligibility, IneligibleReason};
use crate::models::driver::Driver;
use crate::models::order::{Order, PaymentMethod};

#[derive(Debug, Clone, Copy)]
pub struct EligibilityRules {
    pub max_concurrent_orders: u32,
    pub cash_debt_ceiling: f64,
}

impl From<&DispatchConfig> for EligibilityRules {
    fn from(config: &DispatchConfig) -> Self {
        Self {
            max_concurrent_orders: config.max_concurrent_orders,
            cash_debt_ceiling: config.cash_debt_ceiling,
        }
    }
}

/// Decides whether `driver` may be offered `order`. Checks run in a fixed
/// order and the first failure is reported.
pub fn is_eligible(
    driver: &Driver,
    order: &Order,
    rules: &EligibilityRules,
    now: DateTime<Utc>,
) -> Eligibility {
    if !driver.is_operational() {
        return Eligibility::rejected(IneligibleReason::DriverUnavailable);
    }

    if !driver.compliance.cleared(now) {
        return Eligibility::rejected(IneligibleReason::ComplianceBlocked);
    }

    if driver.active_orders >= rules.max_concurrent_orders {
        return Eligibility::rejected(IneligibleReason::LoadLimit);
    }

    // Card orders settle electronically and carry no cash exposure.
    if order.payment_method == PaymentMethod::Cash {
        let ceiling = driver.debt_ceiling.unwrap_or(rules.cash_debt_ceiling);
        if !(driver.outstanding_debt < ceiling) {
            return Eligibility::rejected(IneligibleReason::DebtLimitExceeded);
        }
    }

    if order.is_excluded(&driver.id) {
        return Eligibility::rejected(IneligibleReason::AlreadyTried);
    }

    Eligibility::eligible()
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};
    use uuid::Uuid;

    use super::{is_eligible, EligibilityRules};
    use crate::models::candidate::IneligibleReason;
    use crate::models::driver::{Compliance, Driver, DriverStatus, GeoPoint};
    use crate::models::order::{Order, PaymentMethod};

    const RULES: EligibilityRules = EligibilityRules {
        max_concurrent_orders: 3,
        cash_debt_ceiling: 300.0,
    };

    fn driver() -> Driver {
        let now = Utc::now();
        Driver {
            id: Uuid::from_u128(1),
            name: "test-driver".to_string(),
            online: true,
            status: DriverStatus::Available,
            location: GeoPoint {
                lat: 52.52,
                lng: 13.405,
            },
            active_orders: 0,
            compliance: Compliance {
                registration_approved: true,
                documents_approved: true,
                training_expires_at: Some(now + Duration::days(30)),
            },
            outstanding_debt: 0.0,
            debt_ceiling: None,
            rating: 4.5,
            updated_at: now,
        }
    }

    fn order(payment_method: PaymentMethod) -> Order {
        let point = GeoPoint {
            lat: 52.51,
            lng: 13.39,
        };
        Order::new(point, point, payment_method, Utc::now())
    }

    fn reason(driver: &Driver, order: &Order) -> Option<IneligibleReason> {
        is_eligible(driver, order, &RULES, Utc::now()).reason
    }

    #[test]
    fn healthy_driver_is_eligible() {
        let verdict = is_eligible(&driver(), &order(PaymentMethod::Cash), &RULES, Utc::now());
        assert!(verdict.eligible);
        assert_eq!(verdict.reason, None);
    }

    #[test]
    fn offline_or_busy_driver_is_unavailable() {
        let mut offline = driver();
        offline.online = false;
        assert_eq!(
            reason(&offline, &order(PaymentMethod::Card)),
            Some(IneligibleReason::DriverUnavailable)
        );

        let mut busy = driver();
        busy.status = DriverStatus::Busy;
        assert_eq!(
            reason(&busy, &order(PaymentMethod::Card)),
            Some(IneligibleReason::DriverUnavailable)
        );
    }

    #[test]
    fn expired_training_blocks_compliance() {
        let mut expired = driver();
        expired.compliance.training_expires_at = Some(Utc::now() - Duration::days(1));
        assert_eq!(
            reason(&expired, &order(PaymentMethod::Card)),
            Some(IneligibleReason::ComplianceBlocked)
        );

        let mut unregistered = driver();
        unregistered.compliance.registration_approved = false;
        assert_eq!(
            reason(&unregistered, &order(PaymentMethod::Card)),
            Some(IneligibleReason::ComplianceBlocked)
        );
    }

    #[test]
    fn full_driver_hits_load_limit() {
        let mut loaded = driver();
        loaded.active_orders = 3;
        assert_eq!(
            reason(&loaded, &order(PaymentMethod::Card)),
            Some(IneligibleReason::LoadLimit)
        );
    }

    #[test]
    fn debt_ceiling_only_applies_to_cash_orders() {
        let mut indebted = driver();
        indebted.outstanding_debt = 310.0;

        assert_eq!(
            reason(&indebted, &order(PaymentMethod::Cash)),
            Some(IneligibleReason::DebtLimitExceeded)
        );
        assert_eq!(reason(&indebted, &order(PaymentMethod::Card)), None);
    }

    #[test]
    fn debt_at_exact_ceiling_is_rejected() {
        let mut indebted = driver();
        indebted.outstanding_debt = 300.0;
        assert_eq!(
            reason(&indebted, &order(PaymentMethod::Cash)),
            Some(IneligibleReason::DebtLimitExceeded)
        );
    }

    #[test]
    fn per_driver_ceiling_overrides_default() {
        let mut trusted = driver();
        trusted.outstanding_debt = 310.0;
        trusted.debt_ceiling = Some(500.0);
        assert_eq!(reason(&trusted, &order(PaymentMethod::Cash)), None);
    }

    #[test]
    fn excluded_driver_was_already_tried() {
        let driver = driver();
        let mut order = order(PaymentMethod::Card);
        order.exclusion_list.push(driver.id);
        assert_eq!(reason(&driver, &order), Some(IneligibleReason::AlreadyTried));
    }

    #[test]
    fn first_failing_check_wins() {
        let mut driver = driver();
        driver.online = false;
        driver.active_orders = 10;
        driver.outstanding_debt = 1_000.0;
        let mut order = order(PaymentMethod::Cash);
        order.exclusion_list.push(driver.id);

        assert_eq!(
            reason(&driver, &order),
            Some(IneligibleReason::DriverUnavailable)
        );
    }
}
