use crate::collab::DistanceEstimator;
use crate::error::CollaboratorError;
use crate::models::driver::GeoPoint;

const EARTH_RADIUS_KM: f64 = 6_371.0;

pub fn haversine_km(a: &GeoPoint, b: &GeoPoint) -> f64 {
    let lat1 = a.lat.to_radians();
    let lat2 = b.lat.to_radians();
    let delta_lat = (b.lat - a.lat).to_radians();
    let delta_lng = (b.lng - a.lng).to_radians();

    let sin_lat = (delta_lat / 2.0).sin();
    let sin_lng = (delta_lng / 2.0).sin();

    let haversine = sin_lat * sin_lat + lat1.cos() * lat2.cos() * sin_lng * sin_lng;
    let central_angle = 2.0 * haversine.sqrt().asin();

    EARTH_RADIUS_KM * central_angle
}

/// Straight-line distance. Good enough for ranking pickups.
#[derive(Debug, Clone, Copy, Default)]
pub struct HaversineEstimator;

impl DistanceEstimator for HaversineEstimator {
    fn distance_km(&self, a: &GeoPoint, b: &GeoPoint) -> Result<f64, CollaboratorError> {
        let distance = haversine_km(a, b);
        if distance.is_finite() {
            Ok(distance)
        } else {
            Err(CollaboratorError::InvalidDistance(distance))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{haversine_km, HaversineEstimator};
    use crate::collab::DistanceEstimator;
    use crate::models::driver::GeoPoint;

    const PICKUP: GeoPoint = GeoPoint {
        lat: 52.51,
        lng: 13.39,
    };

    #[test]
    fn hundredth_of_a_degree_north_is_about_1_1_km() {
        let north = GeoPoint {
            lat: PICKUP.lat + 0.01,
            lng: PICKUP.lng,
        };
        let distance = haversine_km(&PICKUP, &north);
        assert!((distance - 1.112).abs() < 0.01, "got {distance}");
    }

    #[test]
    fn distance_is_symmetric() {
        let potsdam = GeoPoint {
            lat: 52.3906,
            lng: 13.0645,
        };
        let there = haversine_km(&PICKUP, &potsdam);
        let back = haversine_km(&potsdam, &PICKUP);
        assert!((there - back).abs() < 1e-9);
        assert!(there > 20.0 && there < 30.0);
    }

    #[test]
    fn estimator_rejects_non_finite_coordinates() {
        let broken = GeoPoint {
            lat: f64::NAN,
            lng: 0.0,
        };
        assert!(HaversineEstimator.distance_km(&broken, &PICKUP).is_err());
        assert_eq!(HaversineEstimator.distance_km(&PICKUP, &PICKUP), Ok(0.0));
    }
}
