//! Value types shared by every engine component.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::SystemTime;
use uuid::Uuid;
use vicinity_env::PositionFix;

use crate::error::{ProximityError, Result};

// ============================================================================
// POSITION
// ============================================================================

/// A validated point on the Earth's surface at a moment in time.
///
/// Immutable once built. The only ways in are [`Position::new`] and
/// `TryFrom<PositionFix>`, both of which enforce latitude in [-90, 90] and
/// longitude in [-180, 180].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "PositionFix", into = "PositionFix")]
pub struct Position {
    latitude: f64,
    longitude: f64,
    captured_at: SystemTime,
    accuracy_m: Option<f64>,
}

impl Position {
    /// Creates a position, rejecting out-of-range or non-finite coordinates.
    pub fn new(latitude: f64, longitude: f64, captured_at: SystemTime) -> Result<Self> {
        if !latitude.is_finite() || !(-90.0..=90.0).contains(&latitude) {
            return Err(ProximityError::invalid(format!(
                "latitude {latitude} outside [-90, 90]"
            )));
        }
        if !longitude.is_finite() || !(-180.0..=180.0).contains(&longitude) {
            return Err(ProximityError::invalid(format!(
                "longitude {longitude} outside [-180, 180]"
            )));
        }
        Ok(Self {
            latitude,
            longitude,
            captured_at,
            accuracy_m: None,
        })
    }

    /// Attaches a horizontal accuracy estimate in meters.
    pub fn with_accuracy(mut self, accuracy_m: f64) -> Result<Self> {
        if !accuracy_m.is_finite() || accuracy_m < 0.0 {
            return Err(ProximityError::invalid(format!(
                "accuracy {accuracy_m} must be a non-negative number of meters"
            )));
        }
        self.accuracy_m = Some(accuracy_m);
        Ok(self)
    }

    #[inline]
    pub fn latitude(&self) -> f64 {
        self.latitude
    }

    #[inline]
    pub fn longitude(&self) -> f64 {
        self.longitude
    }

    #[inline]
    pub fn captured_at(&self) -> SystemTime {
        self.captured_at
    }

    #[inline]
    pub fn accuracy_m(&self) -> Option<f64> {
        self.accuracy_m
    }

    /// True when both points share the same coordinates, ignoring capture
    /// time and accuracy.
    pub fn same_coordinates(&self, other: &Position) -> bool {
        self.latitude == other.latitude && self.longitude == other.longitude
    }
}

impl TryFrom<PositionFix> for Position {
    type Error = ProximityError;

    fn try_from(fix: PositionFix) -> Result<Self> {
        let position = Position::new(fix.latitude, fix.longitude, fix.timestamp)?;
        match fix.accuracy_m {
            Some(accuracy) => position.with_accuracy(accuracy),
            None => Ok(position),
        }
    }
}

impl From<Position> for PositionFix {
    fn from(position: Position) -> Self {
        PositionFix {
            latitude: position.latitude,
            longitude: position.longitude,
            timestamp: position.captured_at,
            accuracy_m: position.accuracy_m,
        }
    }
}

// ============================================================================
// ENTITIES
// ============================================================================

/// Identifier of a tracked entity (truck number, worker id, device id).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityId(pub String);

impl EntityId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for EntityId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for EntityId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What kind of thing is being tracked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Truck,
    Worker,
    /// A citizen waiting for a truck, or any other passive watcher.
    Observer,
}

/// Dispatch availability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityStatus {
    Available,
    Busy,
    Offline,
}

/// A movable entity and its latest known position.
///
/// Instances handed out by the registry are snapshots; `last_updated` and
/// `revision` are assigned by the registry on every committed write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackedEntity {
    pub id: EntityId,
    pub kind: EntityKind,
    pub position: Position,
    pub status: EntityStatus,
    pub last_updated: SystemTime,
    /// Per-entity write counter, strictly increasing
    pub revision: u64,
}

impl TrackedEntity {
    /// Builds an entity ready for `EntityRegistry::upsert`.
    pub fn new(
        id: impl Into<EntityId>,
        kind: EntityKind,
        position: Position,
        status: EntityStatus,
    ) -> Self {
        Self {
            id: id.into(),
            kind,
            position,
            status,
            last_updated: position.captured_at(),
            revision: 0,
        }
    }
}

// ============================================================================
// SESSION IDENTITY
// ============================================================================

/// Unique identifier for a proximity session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub Uuid);

impl SessionId {
    /// Creates a new random SessionId.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the inner UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Show first 8 chars for readability
        write!(f, "{}", &self.0.to_string()[..8])
    }
}
