//! Engine configuration.
//!
//! The thresholds and speeds below were scattered across three call sites
//! (truck approach, nearest-truck search, worker geofence) with slightly
//! different constants. They live here once and are injected everywhere.

use serde::Deserialize;
use std::time::Duration;

use crate::error::{ProximityError, Result};

/// Runtime configuration shared by all engine components.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Distance at which a target counts as arrived (default: 10 m)
    pub arrival_epsilon_m: f64,

    /// Guard tier boundary between CLOSE and MARGINAL (default: 100 m)
    pub close_epsilon_m: f64,

    /// Alert radius used when a caller does not pick one (default: 500 m)
    pub default_alert_radius_m: f64,

    /// Radius a worker must be within to submit proof (default: 500 m)
    pub geofence_radius_m: f64,

    /// Maximum number of trail points kept per session (default: 500)
    pub max_path_len: usize,

    /// ETA speed for a collection vehicle crawling toward a citizen
    /// (default: 1.39 m/s, about 5 km/h)
    pub approach_speed_mps: f64,

    /// ETA speed for nearest-truck estimates (default: 20 km/h)
    pub road_speed_mps: f64,

    /// Distance the simulated mover advances per tick (default: 3.3 m)
    pub mover_step_m: f64,

    /// Interval between simulated mover ticks (default: 3000 ms)
    pub mover_interval_ms: u64,

    /// Interval between successful position polls (default: 5000 ms)
    pub poll_interval_ms: u64,

    /// First retry delay after a failed poll (default: 250 ms)
    pub backoff_base_ms: u64,

    /// Retry delay cap (default: 4000 ms)
    pub backoff_max_ms: u64,

    /// Age after which a registry entry is reported stale (default: 300 s)
    pub stale_after_secs: u64,

    /// Oldest fix accepted for a gated action (default: 30 s)
    pub max_fix_age_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            arrival_epsilon_m: 10.0,
            close_epsilon_m: 100.0,
            default_alert_radius_m: 500.0,
            geofence_radius_m: 500.0,
            max_path_len: 500,
            approach_speed_mps: 1.39,
            road_speed_mps: crate::geo_math::speed_from_kmh(20.0),
            mover_step_m: 3.3,
            mover_interval_ms: 3000,
            poll_interval_ms: 5000,
            backoff_base_ms: 250,
            backoff_max_ms: 4000,
            stale_after_secs: 300,
            max_fix_age_secs: 30,
        }
    }
}

impl EngineConfig {
    /// Parses a JSON document; missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| ProximityError::invalid(format!("config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Checks internal consistency of the thresholds.
    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("arrival_epsilon_m", self.arrival_epsilon_m),
            ("close_epsilon_m", self.close_epsilon_m),
            ("default_alert_radius_m", self.default_alert_radius_m),
            ("geofence_radius_m", self.geofence_radius_m),
            ("approach_speed_mps", self.approach_speed_mps),
            ("road_speed_mps", self.road_speed_mps),
            ("mover_step_m", self.mover_step_m),
        ];
        for (name, value) in positive {
            if !value.is_finite() || value <= 0.0 {
                return Err(ProximityError::invalid(format!(
                    "{name} must be positive, got {value}"
                )));
            }
        }
        if self.max_path_len == 0 {
            return Err(ProximityError::invalid("max_path_len must be at least 1"));
        }
        if self.arrival_epsilon_m >= self.default_alert_radius_m {
            return Err(ProximityError::invalid(
                "arrival_epsilon_m must be smaller than default_alert_radius_m",
            ));
        }
        if self.close_epsilon_m > self.geofence_radius_m {
            return Err(ProximityError::invalid(
                "close_epsilon_m must not exceed geofence_radius_m",
            ));
        }
        if self.backoff_base_ms == 0 || self.backoff_base_ms > self.backoff_max_ms {
            return Err(ProximityError::invalid(
                "backoff_base_ms must be in 1..=backoff_max_ms",
            ));
        }
        Ok(())
    }

    pub fn mover_interval(&self) -> Duration {
        Duration::from_millis(self.mover_interval_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_secs)
    }

    pub fn max_fix_age(&self) -> Duration {
        Duration::from_secs(self.max_fix_age_secs)
    }
}
