//! Helpers shared by the unit tests.

use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use vicinity_env::Clock;

use crate::types::{EntityKind, EntityStatus, Position, TrackedEntity};

/// A clock that only moves when told to.
pub struct ManualClock {
    elapsed: Mutex<Duration>,
    epoch: SystemTime,
}

impl ManualClock {
    pub fn shared() -> Arc<Self> {
        Arc::new(Self {
            elapsed: Mutex::new(Duration::ZERO),
            epoch: UNIX_EPOCH + Duration::from_secs(1_704_067_200),
        })
    }

    pub fn advance(&self, by: Duration) {
        *self.elapsed.lock().unwrap() += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        *self.elapsed.lock().unwrap()
    }

    fn system_time(&self) -> SystemTime {
        self.epoch + self.now()
    }
}

pub fn pos(lat: f64, lon: f64) -> Position {
    Position::new(lat, lon, UNIX_EPOCH + Duration::from_secs(1_704_067_200)).unwrap()
}

pub fn entity(id: &str, kind: EntityKind, lat: f64, lon: f64) -> TrackedEntity {
    TrackedEntity::new(id, kind, pos(lat, lon), EntityStatus::Available)
}

/// A point `meters` due north of `origin`.
pub fn north_of(origin: &Position, meters: f64) -> Position {
    let dlat = (meters / crate::geo_math::EARTH_RADIUS_M).to_degrees();
    Position::new(origin.latitude() + dlat, origin.longitude(), origin.captured_at()).unwrap()
}
