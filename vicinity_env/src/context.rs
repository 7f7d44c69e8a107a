//! Core environment context traits for Vicinity components.

use async_trait::async_trait;
use std::future::Future;
use std::time::{Duration, SystemTime};

/// Read-only access to time.
///
/// Split from [`VicinityContext`] so that synchronous components (the entity
/// registry, the session tracker) can hold an `Arc<dyn Clock>` without
/// becoming generic over the whole context.
pub trait Clock: Send + Sync + 'static {
    /// Returns the monotonic time elapsed since the context was created.
    ///
    /// In simulation, this is the virtual clock time.
    fn now(&self) -> Duration;

    /// Returns the wall-clock time used for `last_updated` stamps and fix
    /// freshness checks.
    ///
    /// In simulation, this is derived from virtual clock + epoch offset.
    fn system_time(&self) -> SystemTime;
}

/// The central interface for environment interaction.
///
/// This trait abstracts the "real world" so that the proximity engine can
/// run on a device (tokio) and in the deterministic simulation harness.
///
/// # Implementations
///
/// - **Production**: `TokioContext` - wraps `tokio::time` and the system clock
/// - **Simulation**: `SimContext` - manually advanced virtual clock
#[async_trait]
pub trait VicinityContext: Clock {
    /// Suspends execution for the given duration.
    ///
    /// In production: wraps `tokio::time::sleep`
    /// In simulation: advances virtual clock
    async fn sleep(&self, duration: Duration);

    /// Spawns a background task.
    ///
    /// Pollers and movers run through this so the harness controls where
    /// they execute.
    fn spawn<F>(&self, name: &str, future: F)
    where
        F: Future<Output = ()> + Send + 'static;
}
