//! Simulated approach of a target toward an observer.
//!
//! Stands in for a live vehicle feed in demos and scenarios: every tick the
//! target steps a fixed distance along the straight line to the observer's
//! current position and the result is written through the registry like
//! any other update.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use vicinity_env::{Clock, VicinityContext};

use crate::bus::PollHandle;
use crate::config::EngineConfig;
use crate::error::{ProximityError, Result};
use crate::geo_math;
use crate::registry::EntityRegistry;
use crate::types::EntityId;

/// Outcome of one mover tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MoverStep {
    /// Target advanced; distance left to the observer
    Moved { distance_m: f64 },
    /// Target is within the arrival epsilon and will not move again
    Arrived,
}

pub struct SimulatedMover {
    registry: Arc<EntityRegistry>,
    clock: Arc<dyn Clock>,
    target_id: EntityId,
    observer_id: EntityId,
    step_m: f64,
    arrival_epsilon_m: f64,
    arrived: AtomicBool,
}

impl SimulatedMover {
    pub fn new(
        registry: Arc<EntityRegistry>,
        clock: Arc<dyn Clock>,
        target_id: EntityId,
        observer_id: EntityId,
        config: &EngineConfig,
    ) -> Self {
        Self {
            registry,
            clock,
            target_id,
            observer_id,
            step_m: config.mover_step_m,
            arrival_epsilon_m: config.arrival_epsilon_m,
            arrived: AtomicBool::new(false),
        }
    }

    /// Overrides the per-tick step.
    pub fn with_step(mut self, step_m: f64) -> Self {
        self.step_m = step_m;
        self
    }

    pub fn has_arrived(&self) -> bool {
        self.arrived.load(Ordering::SeqCst)
    }

    /// Advances the target one step toward the observer.
    ///
    /// Once within the arrival epsilon the mover stops writing and every
    /// further tick reports `Arrived`.
    pub fn tick(&self) -> Result<MoverStep> {
        if self.has_arrived() {
            return Ok(MoverStep::Arrived);
        }

        let observer = self.registry.position_of(&self.observer_id).ok_or_else(|| {
            ProximityError::missing(format!("observer {} has no position", self.observer_id))
        })?;
        let target = self
            .registry
            .position_of(&self.target_id)
            .ok_or_else(|| ProximityError::not_found(format!("entity {}", self.target_id)))?;

        if geo_math::distance_meters(&target, &observer) <= self.arrival_epsilon_m {
            self.arrived.store(true, Ordering::SeqCst);
            return Ok(MoverStep::Arrived);
        }

        let next =
            geo_math::step_toward(&target, &observer, self.step_m, self.clock.system_time())?;
        self.registry.update_position(&self.target_id, next, None)?;

        let distance_m = geo_math::distance_meters(&next, &observer);
        if distance_m <= self.arrival_epsilon_m {
            self.arrived.store(true, Ordering::SeqCst);
            info!("{} reached {}", self.target_id, self.observer_id);
        }
        Ok(MoverStep::Moved { distance_m })
    }

    /// Ticks every `interval` until arrival, an error, or cancellation.
    pub fn run<Ctx: VicinityContext>(
        self: Arc<Self>,
        ctx: Arc<Ctx>,
        interval: Duration,
    ) -> PollHandle {
        let handle = PollHandle::new();
        let cancel = handle.clone();
        let task_ctx = ctx.clone();

        ctx.spawn(&format!("mover-{}", self.target_id), async move {
            while !cancel.is_cancelled() {
                match self.tick() {
                    Ok(MoverStep::Moved { distance_m }) => {
                        debug!("{} is {:.1} m from {}", self.target_id, distance_m, self.observer_id);
                    }
                    Ok(MoverStep::Arrived) => break,
                    Err(e) => {
                        debug!("Mover for {} stopped: {}", self.target_id, e);
                        break;
                    }
                }
                task_ctx.sleep(interval).await;
            }
        });

        handle
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{entity, north_of, pos, ManualClock};
    use crate::types::EntityKind;
    use vicinity_env::TokioContext;

    fn setup(start_m: f64) -> (Arc<EntityRegistry>, Arc<ManualClock>) {
        let clock = ManualClock::shared();
        let registry = Arc::new(EntityRegistry::new(clock.clone(), Duration::from_secs(300)));
        let home = pos(21.2514, 81.6296);
        registry.upsert(entity("citizen", EntityKind::Observer, 21.2514, 81.6296));
        let mut truck = entity("truck", EntityKind::Truck, 0.0, 0.0);
        truck.position = north_of(&home, start_m);
        registry.upsert(truck);
        (registry, clock)
    }

    fn mover(registry: &Arc<EntityRegistry>, clock: &Arc<ManualClock>) -> SimulatedMover {
        SimulatedMover::new(
            registry.clone(),
            clock.clone(),
            "truck".into(),
            "citizen".into(),
            &EngineConfig::default(),
        )
    }

    #[test]
    fn test_tick_closes_distance_by_one_step() {
        let (registry, clock) = setup(100.0);
        let m = mover(&registry, &clock);

        match m.tick().unwrap() {
            MoverStep::Moved { distance_m } => assert!((distance_m - 96.7).abs() < 0.01),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(registry.get(&"truck".into()).unwrap().revision, 2);
    }

    #[test]
    fn test_stops_writing_after_arrival() {
        let (registry, clock) = setup(30.0);
        let m = mover(&registry, &clock).with_step(12.0);

        assert!(matches!(m.tick().unwrap(), MoverStep::Moved { .. }));
        assert!(matches!(m.tick().unwrap(), MoverStep::Moved { .. }));
        assert!(m.has_arrived());

        let revision = registry.get(&"truck".into()).unwrap().revision;
        assert_eq!(m.tick().unwrap(), MoverStep::Arrived);
        assert_eq!(registry.get(&"truck".into()).unwrap().revision, revision);
    }

    #[test]
    fn test_missing_observer() {
        let (registry, clock) = setup(30.0);
        registry.remove(&"citizen".into());
        assert!(matches!(
            mover(&registry, &clock).tick(),
            Err(ProximityError::MissingLocation(_))
        ));
    }

    #[tokio::test]
    async fn test_spawned_mover_runs_to_arrival() {
        let (registry, clock) = setup(50.0);
        let m = Arc::new(mover(&registry, &clock).with_step(10.0));
        let ctx = TokioContext::shared();

        let handle = m.clone().run(ctx, Duration::from_millis(1));
        for _ in 0..200 {
            if m.has_arrived() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        handle.cancel();

        assert!(m.has_arrived());
        let home = pos(21.2514, 81.6296);
        let truck = registry.position_of(&"truck".into()).unwrap();
        assert!(geo_math::distance_meters(&truck, &home) <= 10.0);
    }
}
