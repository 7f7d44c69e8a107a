//! Pure distance and ETA functions.
//!
//! Spherical-Earth haversine is accurate to well under a meter at the city
//! scales this engine deals with (a few kilometers). No state lives here.

use std::time::SystemTime;

use crate::error::{ProximityError, Result};
use crate::types::Position;

/// Mean Earth radius used by every distance computation, in meters.
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Great-circle distance between two positions in meters (haversine).
///
/// Symmetric, and zero exactly when both points share coordinates.
pub fn distance_meters(a: &Position, b: &Position) -> f64 {
    let lat1 = a.latitude().to_radians();
    let lat2 = b.latitude().to_radians();
    // abs() keeps the result bit-identical when the arguments are swapped
    let d_lat = (b.latitude() - a.latitude()).abs().to_radians();
    let d_lon = (b.longitude() - a.longitude()).abs().to_radians();

    let sin_lat = (d_lat / 2.0).sin();
    let sin_lon = (d_lon / 2.0).sin();
    let h = (sin_lat * sin_lat + lat1.cos() * lat2.cos() * sin_lon * sin_lon).clamp(0.0, 1.0);

    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());
    EARTH_RADIUS_M * c
}

/// Seconds needed to cover `distance_m` at a constant `speed_mps`.
///
/// Speed is always supplied by the caller: a collection vehicle crawling
/// down a lane and a truck dispatched across town use different figures.
pub fn eta_seconds(distance_m: f64, speed_mps: f64) -> Result<f64> {
    if !speed_mps.is_finite() || speed_mps <= 0.0 {
        return Err(ProximityError::invalid(format!(
            "speed must be positive, got {speed_mps} m/s"
        )));
    }
    if !distance_m.is_finite() || distance_m < 0.0 {
        return Err(ProximityError::invalid(format!(
            "distance must be non-negative, got {distance_m} m"
        )));
    }
    Ok(distance_m / speed_mps)
}

/// Converts km/h to m/s.
#[inline]
pub fn speed_from_kmh(kmh: f64) -> f64 {
    kmh / 3.6
}

/// Moves `from` toward `to` by `step_m` meters along the straight lat/lon
/// segment, stamping the result with `captured_at`.
///
/// Snaps onto `to` when the remaining distance is no more than one step.
/// The segment does not wrap the antimeridian.
pub fn step_toward(
    from: &Position,
    to: &Position,
    step_m: f64,
    captured_at: SystemTime,
) -> Result<Position> {
    if !step_m.is_finite() || step_m <= 0.0 {
        return Err(ProximityError::invalid(format!(
            "step must be positive, got {step_m} m"
        )));
    }

    let remaining = distance_meters(from, to);
    if remaining <= step_m {
        return Position::new(to.latitude(), to.longitude(), captured_at);
    }

    let fraction = step_m / remaining;
    let lat = from.latitude() + (to.latitude() - from.latitude()) * fraction;
    let lon = from.longitude() + (to.longitude() - from.longitude()) * fraction;
    Position::new(lat, lon, captured_at)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use proptest::prelude::*;

    fn pos(lat: f64, lon: f64) -> Position {
        Position::new(lat, lon, SystemTime::UNIX_EPOCH).unwrap()
    }

    #[test]
    fn test_one_degree_of_latitude() {
        // 2πR / 360
        let d = distance_meters(&pos(0.0, 0.0), &pos(1.0, 0.0));
        assert_relative_eq!(d, 111_194.93, max_relative = 1e-6);
    }

    #[test]
    fn test_raipur_demo_offset() {
        // Truck spawned 0.015° south-west of Raipur center
        let observer = pos(21.2514, 81.6296);
        let truck = pos(21.2514 - 0.015, 81.6296 - 0.015);
        let d = distance_meters(&observer, &truck);
        assert!(d > 2_200.0 && d < 2_400.0, "got {d}");
    }

    #[test]
    fn test_eta_rejects_non_positive_speed() {
        assert!(matches!(eta_seconds(100.0, 0.0), Err(ProximityError::InvalidInput(_))));
        assert!(matches!(eta_seconds(100.0, -1.4), Err(ProximityError::InvalidInput(_))));
        assert!(eta_seconds(-5.0, 1.0).is_err());
    }

    #[test]
    fn test_eta_values() {
        assert_relative_eq!(eta_seconds(139.0, 1.39).unwrap(), 100.0, max_relative = 1e-12);
        // 2 km at 20 km/h is six minutes
        let road = speed_from_kmh(20.0);
        assert_relative_eq!(eta_seconds(2_000.0, road).unwrap(), 360.0, epsilon = 1e-9);
    }

    #[test]
    fn test_step_toward_moves_by_step() {
        let start = pos(21.2364, 81.6146);
        let goal = pos(21.2514, 81.6296);
        let before = distance_meters(&start, &goal);

        let next = step_toward(&start, &goal, 50.0, SystemTime::UNIX_EPOCH).unwrap();
        let moved = distance_meters(&start, &next);
        assert_relative_eq!(moved, 50.0, max_relative = 1e-3);
        assert_relative_eq!(distance_meters(&next, &goal), before - 50.0, max_relative = 1e-3);
    }

    #[test]
    fn test_step_toward_snaps_when_close() {
        let start = pos(21.25140, 81.62960);
        let goal = pos(21.25142, 81.62961);
        let next = step_toward(&start, &goal, 10.0, SystemTime::UNIX_EPOCH).unwrap();
        assert!(next.same_coordinates(&goal));
    }

    proptest! {
        #[test]
        fn prop_distance_is_symmetric(
            lat1 in -89.0f64..89.0, lon1 in -179.0f64..179.0,
            lat2 in -89.0f64..89.0, lon2 in -179.0f64..179.0,
        ) {
            let a = pos(lat1, lon1);
            let b = pos(lat2, lon2);
            prop_assert_eq!(distance_meters(&a, &b), distance_meters(&b, &a));
        }

        #[test]
        fn prop_distance_to_self_is_zero(lat in -90.0f64..=90.0, lon in -180.0f64..=180.0) {
            let a = pos(lat, lon);
            prop_assert_eq!(distance_meters(&a, &a), 0.0);
        }

        #[test]
        fn prop_distinct_points_are_apart(
            lat in -80.0f64..80.0, lon in -170.0f64..170.0,
            dlat in 1e-6f64..0.05, dlon in -0.05f64..0.05,
        ) {
            let a = pos(lat, lon);
            let b = pos(lat + dlat, lon + dlon);
            prop_assert!(distance_meters(&a, &b) > 0.0);
        }

        #[test]
        fn prop_colinear_distances_add_up(
            lat in -60.0f64..60.0, lon in -170.0f64..170.0,
            dlat in -0.05f64..0.05, dlon in -0.05f64..0.05,
            t in 0.0f64..=1.0,
        ) {
            let a = pos(lat, lon);
            let c = pos(lat + dlat, lon + dlon);
            let b = pos(lat + dlat * t, lon + dlon * t);

            let direct = distance_meters(&a, &c);
            let via = distance_meters(&a, &b) + distance_meters(&b, &c);
            prop_assert!((direct - via).abs() <= direct * 1e-3 + 0.01,
                "direct={} via={}", direct, via);
        }
    }
}
