use crate::models::candidate::ScoreBreakdown;

const DISTANCE_WEIGHT: f64 = 0.5;
const LOAD_WEIGHT: f64 = 0.3;
const RATING_WEIGHT: f64 = 0.2;

const MAX_RATING: f64 = 5.0;

/// Suitability of a driver for a pickup, in `[0, 1]` rounded to 3 decimals.
///
/// Out-of-range inputs are clamped rather than rejected. The score never
/// rises with distance or load and never falls with rating.
pub fn compute_score(
    distance_km: f64,
    active_orders: u32,
    rating: f64,
    max_active_orders: u32,
    max_reasonable_distance_km: f64,
) -> (f64, ScoreBreakdown) {
    let breakdown = ScoreBreakdown {
        distance_factor: distance_factor(distance_km, max_reasonable_distance_km),
        load_factor: load_factor(active_orders, max_active_orders),
        rating_factor: rating_factor(rating),
    };

    (round3(weighted_score(&breakdown)), breakdown)
}

pub fn weighted_score(breakdown: &ScoreBreakdown) -> f64 {
    (breakdown.distance_factor * DISTANCE_WEIGHT)
        + (breakdown.load_factor * LOAD_WEIGHT)
        + (breakdown.rating_factor * RATING_WEIGHT)
}

fn distance_factor(distance_km: f64, max_reasonable_distance_km: f64) -> f64 {
    if !distance_km.is_finite() || !(max_reasonable_distance_km > 0.0) {
        return 0.0;
    }

    (1.0 - distance_km.max(0.0) / max_reasonable_distance_km).clamp(0.0, 1.0)
}

fn load_factor(active_orders: u32, max_active_orders: u32) -> f64 {
    if max_active_orders == 0 {
        return 0.0;
    }

    (1.0 - active_orders as f64 / max_active_orders as f64).clamp(0.0, 1.0)
}

fn rating_factor(rating: f64) -> f64 {
    if rating.is_nan() {
        return 0.0;
    }

    (rating / MAX_RATING).clamp(0.0, 1.0)
}

fn round3(value: f64) -> f64 {
    (value * 1_000.0).round() / 1_000.0
}

#[cfg(test)]
mod tests {
    use super::compute_score;

    const MAX_DISTANCE: f64 = 10.0;

    fn score(distance_km: f64, active_orders: u32, rating: f64) -> f64 {
        compute_score(distance_km, active_orders, rating, 3, MAX_DISTANCE).0
    }

    #[test]
    fn perfect_driver_scores_one() {
        assert_eq!(score(0.0, 0, 5.0), 1.0);
    }

    #[test]
    fn weights_combine_as_documented() {
        // 0.5 * 0.5 + 0.3 * (1 - 1/3) + 0.2 * 0.8
        assert_eq!(score(5.0, 1, 4.0), 0.61);
    }

    #[test]
    fn closer_driver_never_scores_lower() {
        let mut previous = score(0.0, 1, 4.5);
        for step in 1..=30 {
            let current = score(step as f64 * 0.5, 1, 4.5);
            assert!(current <= previous, "distance {} raised the score", step);
            previous = current;
        }
    }

    #[test]
    fn lighter_load_never_scores_lower() {
        let mut previous = score(2.0, 0, 4.0);
        for load in 1..=5 {
            let current = score(2.0, load, 4.0);
            assert!(current <= previous, "load {load} raised the score");
            previous = current;
        }
    }

    #[test]
    fn higher_rating_never_scores_lower() {
        let mut previous = score(2.0, 1, 0.0);
        for tenth in 1..=50 {
            let current = score(2.0, 1, tenth as f64 / 10.0);
            assert!(current >= previous);
            previous = current;
        }
    }

    #[test]
    fn out_of_range_inputs_are_clamped() {
        let (far, breakdown) = compute_score(250.0, 9, 9.9, 3, MAX_DISTANCE);
        assert_eq!(breakdown.distance_factor, 0.0);
        assert_eq!(breakdown.load_factor, 0.0);
        assert_eq!(breakdown.rating_factor, 1.0);
        assert_eq!(far, 0.2);

        let (negative, _) = compute_score(-4.0, 0, -1.0, 3, MAX_DISTANCE);
        assert_eq!(negative, 0.8);
    }

    #[test]
    fn non_finite_inputs_do_not_escape_the_unit_interval() {
        let (nan_distance, _) = compute_score(f64::NAN, 0, 5.0, 3, MAX_DISTANCE);
        assert_eq!(nan_distance, 0.5);

        let (zero_capacity, _) = compute_score(0.0, 0, f64::NAN, 0, MAX_DISTANCE);
        assert_eq!(zero_capacity, 0.5);
    }

    #[test]
    fn score_is_rounded_to_three_decimals() {
        let value = score(3.3333, 1, 3.3333);
        assert_eq!(value, (value * 1_000.0).round() / 1_000.0);
    }
}
