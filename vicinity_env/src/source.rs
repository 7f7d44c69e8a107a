//! Position source abstraction for Vicinity.

use async_trait::async_trait;
use crate::error::EnvError;
use crate::types::PositionFix;

/// An external provider of position fixes.
///
/// # Implementations
///
/// - **Production**: device GPS or a server-side location feed
/// - **Simulation**: seeded noisy source with scripted outages
///
/// # Fix Flow
///
/// ```text
/// Provider                 Poller                  Registry
///   |                        |                        |
///   |<-- current_fix() ------|                        |
///   |--- Ok(fix) ----------->|-- update_position ---->|
///   |--- Err(Unavailable) -->|-- [backoff, stale] ----|
/// ```
#[async_trait]
pub trait PositionSource: Send + Sync + 'static {
    /// Samples the current position.
    ///
    /// # Returns
    /// * `Ok(fix)` - A fresh raw reading (not yet range-validated)
    /// * `Err(EnvError::SourceUnavailable)` - No fix could be obtained
    ///
    /// # Note
    /// Implementations must never substitute a placeholder coordinate when
    /// no fix is available; they report the failure instead.
    async fn current_fix(&self) -> Result<PositionFix, EnvError>;
}
