//! Common types for the Vicinity environment abstraction.

use serde::{Deserialize, Serialize};
use std::time::SystemTime;

/// A raw reading as delivered by a position provider.
///
/// This is a transport-level value: coordinates are not range-checked here.
/// The engine validates them when converting into its own `Position`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PositionFix {
    /// Latitude in degrees
    pub latitude: f64,

    /// Longitude in degrees
    pub longitude: f64,

    /// When the provider captured the reading
    pub timestamp: SystemTime,

    /// Reported horizontal accuracy in meters, if the provider has one
    pub accuracy_m: Option<f64>,
}

impl PositionFix {
    /// Creates a fix without an accuracy estimate.
    pub fn new(latitude: f64, longitude: f64, timestamp: SystemTime) -> Self {
        Self {
            latitude,
            longitude,
            timestamp,
            accuracy_m: None,
        }
    }

    /// Attaches a horizontal accuracy estimate.
    pub fn with_accuracy(mut self, accuracy_m: f64) -> Self {
        self.accuracy_m = Some(accuracy_m);
        self
    }
}
