//! Vicinity Core - proximity tracking for mobile field entities
//!
//! Tracks trucks, workers and citizens on a shared position registry and
//! answers three questions about them:
//! 1. **Approach alerts**: has the watched truck come within my radius yet?
//! 2. **Nearest search**: which available truck is closest to this point?
//! 3. **Geofence gating**: is the worker close enough to submit proof?
//!
//! Time comes in through [`vicinity_env::Clock`], so the same engine runs
//! against the wall clock or a deterministic simulation.

pub mod backoff;
pub mod bus;
pub mod config;
pub mod error;
pub mod geo_math;
pub mod geofence;
pub mod mover;
pub mod registry;
pub mod search;
pub mod session;
pub mod types;

#[cfg(test)]
mod test_support;

// Re-export key types for convenience
pub use backoff::Backoff;
pub use bus::{BusEvent, PollHandle, RealtimeUpdateBus, Subscription, Topic};
pub use config::EngineConfig;
pub use error::{ProximityError, Result};
pub use geo_math::{distance_meters, eta_seconds, step_toward};
pub use geofence::{GeofenceGuard, Tier, Verdict};
pub use mover::{MoverStep, SimulatedMover};
pub use registry::{EntityRegistry, MemoryStore, RegistryChange, RegistryObserver, RegistryStore};
pub use search::{find_nearest, find_nearest_available, find_within_radius, Candidate};
pub use session::{ProximityEvent, ProximitySession, ProximityTracker, SessionSnapshot, SessionState};
pub use types::{EntityId, EntityKind, EntityStatus, Position, SessionId, TrackedEntity};
