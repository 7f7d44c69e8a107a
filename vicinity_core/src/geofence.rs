//! Geofenced authorization: may an actor perform an action here?
//!
//! Used to gate a worker's photographic proof of completed work on the
//! worker standing near the complaint site. `check` is a pure function of
//! its inputs. `authorize` samples a fresh fix first, because the proof
//! derives its legitimacy from where the actor is at capture time.

use serde::Serialize;
use std::time::Duration;
use tracing::debug;
use vicinity_env::{Clock, PositionSource};

use crate::error::{ProximityError, Result};
use crate::geo_math;
use crate::types::Position;

/// How comfortably an actor sits inside the fence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    /// Within `close_epsilon_m` of the target
    Close,
    /// Inside the radius but not close; the UI may ask for confirmation
    Marginal,
    /// Outside the radius
    Denied,
}

/// Result of a geofence check.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Verdict {
    pub allowed: bool,
    pub distance_m: f64,
    pub tier: Tier,
}

impl Verdict {
    /// A UX hint only; the check has already passed.
    pub fn requires_confirmation(&self) -> bool {
        self.tier == Tier::Marginal
    }
}

/// Stateless policy gate.
#[derive(Debug, Clone, Copy)]
pub struct GeofenceGuard {
    close_epsilon_m: f64,
    max_fix_age: Duration,
}

impl GeofenceGuard {
    /// `close_epsilon_m` must be a finite, non-negative distance.
    pub fn new(close_epsilon_m: f64, max_fix_age: Duration) -> Result<Self> {
        if !close_epsilon_m.is_finite() || close_epsilon_m < 0.0 {
            return Err(ProximityError::invalid(format!(
                "close epsilon must be a non-negative number of meters, got {close_epsilon_m}"
            )));
        }
        Ok(Self {
            close_epsilon_m,
            max_fix_age,
        })
    }

    pub fn from_config(config: &crate::config::EngineConfig) -> Result<Self> {
        Self::new(config.close_epsilon_m, config.max_fix_age())
    }

    /// Classifies `actor` against a fence of `radius_m` around `target`.
    ///
    /// Either position being absent is `MissingLocation`; there is no
    /// default location to fall back on.
    pub fn check(
        &self,
        actor: Option<&Position>,
        target: Option<&Position>,
        radius_m: f64,
    ) -> Result<Verdict> {
        if !radius_m.is_finite() || radius_m < 0.0 {
            return Err(ProximityError::invalid(format!(
                "radius must be a non-negative number of meters, got {radius_m}"
            )));
        }
        let actor = actor.ok_or_else(|| ProximityError::missing("actor has no position fix"))?;
        let target = target.ok_or_else(|| ProximityError::missing("target has no location"))?;

        let distance_m = geo_math::distance_meters(actor, target);
        let verdict = if distance_m > radius_m {
            Verdict {
                allowed: false,
                distance_m,
                tier: Tier::Denied,
            }
        } else if distance_m <= self.close_epsilon_m {
            Verdict {
                allowed: true,
                distance_m,
                tier: Tier::Close,
            }
        } else {
            Verdict {
                allowed: true,
                distance_m,
                tier: Tier::Marginal,
            }
        };
        Ok(verdict)
    }

    /// Samples the actor's position right now and checks it.
    ///
    /// A source failure or a fix older than `max_fix_age` counts as a
    /// missing location.
    pub async fn authorize<S>(
        &self,
        clock: &dyn Clock,
        source: &S,
        target: Option<&Position>,
        radius_m: f64,
    ) -> Result<Verdict>
    where
        S: PositionSource + ?Sized,
    {
        let fix = source
            .current_fix()
            .await
            .map_err(|e| ProximityError::missing(format!("no fresh fix: {e}")))?;
        let actor = Position::try_from(fix)?;

        let age = clock
            .system_time()
            .duration_since(actor.captured_at())
            .unwrap_or(Duration::ZERO);
        if age > self.max_fix_age {
            return Err(ProximityError::missing(format!(
                "fix is {}s old, limit is {}s",
                age.as_secs(),
                self.max_fix_age.as_secs()
            )));
        }

        let verdict = self.check(Some(&actor), target, radius_m)?;
        debug!(
            "Geofence verdict {:?} at {:.0} m (radius {} m)",
            verdict.tier, verdict.distance_m, radius_m
        );
        Ok(verdict)
    }
}

impl Default for GeofenceGuard {
    fn default() -> Self {
        let config = crate::config::EngineConfig::default();
        Self {
            close_epsilon_m: config.close_epsilon_m,
            max_fix_age: config.max_fix_age(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{north_of, pos, ManualClock};
    use async_trait::async_trait;
    use vicinity_env::{EnvError, PositionFix};

    fn site() -> Position {
        pos(21.2514, 81.6296)
    }

    #[test]
    fn test_tiers() {
        let guard = GeofenceGuard::default();
        let target = site();

        let far = guard.check(Some(&north_of(&target, 600.0)), Some(&target), 500.0).unwrap();
        assert!(!far.allowed);
        assert_eq!(far.tier, Tier::Denied);

        let close = guard.check(Some(&north_of(&target, 80.0)), Some(&target), 500.0).unwrap();
        assert!(close.allowed);
        assert_eq!(close.tier, Tier::Close);

        let marginal = guard.check(Some(&north_of(&target, 300.0)), Some(&target), 500.0).unwrap();
        assert!(marginal.allowed);
        assert_eq!(marginal.tier, Tier::Marginal);
        assert!(marginal.requires_confirmation());
    }

    #[test]
    fn test_check_is_pure() {
        let guard = GeofenceGuard::default();
        let target = site();
        let actor = north_of(&target, 250.0);
        let first = guard.check(Some(&actor), Some(&target), 500.0).unwrap();
        for _ in 0..10 {
            assert_eq!(guard.check(Some(&actor), Some(&target), 500.0).unwrap(), first);
        }
    }

    #[test]
    fn test_missing_positions_never_default_to_allowed() {
        let guard = GeofenceGuard::default();
        let target = site();
        assert!(matches!(
            guard.check(None, Some(&target), 500.0),
            Err(ProximityError::MissingLocation(_))
        ));
        assert!(matches!(
            guard.check(Some(&target), None, 500.0),
            Err(ProximityError::MissingLocation(_))
        ));
    }

    #[test]
    fn test_guard_rejects_bad_close_epsilon() {
        for eps in [-1.0, f64::NAN, f64::INFINITY] {
            assert!(matches!(
                GeofenceGuard::new(eps, Duration::from_secs(30)),
                Err(ProximityError::InvalidInput(_))
            ));
        }
        let config = crate::config::EngineConfig {
            close_epsilon_m: -5.0,
            ..Default::default()
        };
        assert!(GeofenceGuard::from_config(&config).is_err());
        assert!(GeofenceGuard::new(0.0, Duration::from_secs(30)).is_ok());
    }

    #[test]
    fn test_negative_radius_rejected() {
        let guard = GeofenceGuard::default();
        let target = site();
        assert!(matches!(
            guard.check(Some(&target), Some(&target), -10.0),
            Err(ProximityError::InvalidInput(_))
        ));
    }

    struct FixedSource(std::result::Result<PositionFix, String>);

    #[async_trait]
    impl PositionSource for FixedSource {
        async fn current_fix(&self) -> std::result::Result<PositionFix, EnvError> {
            self.0.clone().map_err(EnvError::unavailable)
        }
    }

    #[tokio::test]
    async fn test_authorize_samples_fresh_fix() {
        let clock = ManualClock::shared();
        let target = site();
        let here = north_of(&target, 80.0);
        let source = FixedSource(Ok(PositionFix::new(
            here.latitude(),
            here.longitude(),
            clock.system_time(),
        )));

        let verdict = GeofenceGuard::default()
            .authorize(clock.as_ref(), &source, Some(&target), 500.0)
            .await
            .unwrap();
        assert_eq!(verdict.tier, Tier::Close);
    }

    #[tokio::test]
    async fn test_authorize_rejects_old_fix() {
        let clock = ManualClock::shared();
        let target = site();
        let source = FixedSource(Ok(PositionFix::new(
            target.latitude(),
            target.longitude(),
            clock.system_time(),
        )));
        clock.advance(Duration::from_secs(31));

        let err = GeofenceGuard::default()
            .authorize(clock.as_ref(), &source, Some(&target), 500.0)
            .await
            .unwrap_err();
        assert!(matches!(err, ProximityError::MissingLocation(_)));
    }

    #[tokio::test]
    async fn test_authorize_without_gps_is_missing_location() {
        let clock = ManualClock::shared();
        let target = site();
        let source = FixedSource(Err("permission denied".to_string()));

        let err = GeofenceGuard::default()
            .authorize(clock.as_ref(), &source, Some(&target), 500.0)
            .await
            .unwrap_err();
        assert!(matches!(err, ProximityError::MissingLocation(_)));
    }
}
