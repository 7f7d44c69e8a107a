//! Scenario runner - executes the named demo scenarios on a virtual clock.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, info, warn};
use vicinity_core::geo_math::EARTH_RADIUS_M;
use vicinity_core::{
    search, Backoff, BusEvent, EngineConfig, EntityId, EntityKind, EntityRegistry, EntityStatus,
    GeofenceGuard, MoverStep, Position, ProximityError, ProximityEvent, ProximityTracker,
    RealtimeUpdateBus, SessionId, SessionState, SimulatedMover, Tier, Topic, TrackedEntity,
};
use vicinity_env::Clock;

use crate::context::SimContext;
use crate::error::{Result, SimError};
use crate::exporter::{SimExport, SimFrame};
use crate::scenarios::ScenarioId;
use crate::source::SimPositionSource;

/// Citizen's home in the demo city
const HOME: (f64, f64) = (21.2514, 81.6296);

/// Raipur demo fleet: (id, latitude, longitude, status)
const DEMO_FLEET: [(&str, f64, f64, EntityStatus); 5] = [
    ("mock-1", 21.2514, 81.6296, EntityStatus::Available),
    ("mock-2", 21.2379, 81.6337, EntityStatus::Available),
    ("mock-3", 21.2167, 81.6335, EntityStatus::Busy),
    ("mock-4", 21.2711, 81.6051, EntityStatus::Available),
    ("mock-5", 21.1959, 81.6871, EntityStatus::Available),
];

/// Results from running a scenario.
#[derive(Debug, Clone)]
pub struct ScenarioResult {
    pub scenario: ScenarioId,
    pub seed: u64,

    /// Whether scenario passed all assertions
    pub passed: bool,

    /// Mover ticks, poll updates or checks executed
    pub ticks: u64,

    /// Final virtual time in seconds
    pub final_time_secs: f64,

    /// Proximity events observed
    pub alerts: usize,
    pub arrivals: usize,

    /// Every failed assertion, joined
    pub failure_reason: Option<String>,

    pub frames: Vec<SimFrame>,
}

impl ScenarioResult {
    pub fn to_export(&self) -> SimExport {
        let mut export = SimExport::new(self.scenario.name(), self.seed);
        for frame in &self.frames {
            export.add_frame(frame.clone());
        }
        export.finalize(self.passed, self.failure_reason.clone());
        export
    }
}

/// Accumulates what a scenario saw and which checks failed.
#[derive(Default)]
struct Outcome {
    ticks: u64,
    alerts: usize,
    arrivals: usize,
    frames: Vec<SimFrame>,
    failures: Vec<String>,
}

impl Outcome {
    fn check(&mut self, ok: bool, failure: impl FnOnce() -> String) {
        if !ok {
            let message = failure();
            warn!("Check failed: {}", message);
            self.failures.push(message);
        }
    }

    fn count(&mut self, event: &ProximityEvent) -> String {
        match event {
            ProximityEvent::Alert { distance_m, .. } => {
                self.alerts += 1;
                format!("alert at {distance_m:.1} m")
            }
            ProximityEvent::Arrived { distance_m, .. } => {
                self.arrivals += 1;
                format!("arrived at {distance_m:.1} m")
            }
        }
    }
}

/// Runs demo scenarios.
pub struct ScenarioRunner {
    seed: u64,
    config: EngineConfig,

    /// Upper bound on mover ticks / runtime yields per scenario
    max_ticks: u64,
}

impl ScenarioRunner {
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            config: EngineConfig::default(),
            max_ticks: 10_000,
        }
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_max_ticks(mut self, max_ticks: u64) -> Self {
        self.max_ticks = max_ticks;
        self
    }

    /// Runs a scenario and returns the result.
    pub fn run(&self, scenario: ScenarioId) -> ScenarioResult {
        info!("Starting scenario: {} (seed={})", scenario.name(), self.seed);

        let ctx = SimContext::shared(self.seed);
        let outcome = match scenario {
            ScenarioId::TruckApproach => self.run_truck_approach(&ctx),
            ScenarioId::NearestTruck => self.run_nearest_truck(&ctx),
            ScenarioId::WorkerGeofence => self.run_worker_geofence(&ctx),
            ScenarioId::FeedOutage => self.run_feed_outage(&ctx),
        };

        let mut outcome = outcome.unwrap_or_else(|e| Outcome {
            failures: vec![format!("scenario aborted: {e}")],
            ..Default::default()
        });
        let failure_reason = if outcome.failures.is_empty() {
            None
        } else {
            Some(outcome.failures.join("; "))
        };

        ScenarioResult {
            scenario,
            seed: self.seed,
            passed: failure_reason.is_none(),
            ticks: outcome.ticks,
            final_time_secs: ctx.now().as_secs_f64(),
            alerts: outcome.alerts,
            arrivals: outcome.arrivals,
            failure_reason,
            frames: std::mem::take(&mut outcome.frames),
        }
    }

    /// Engine pieces every scenario shares: a bus observing a registry on
    /// the virtual clock.
    fn world(&self, ctx: &Arc<SimContext>) -> (RealtimeUpdateBus, Arc<EntityRegistry>) {
        let bus = RealtimeUpdateBus::new();
        let registry = Arc::new(
            EntityRegistry::new(ctx.clone(), self.config.stale_after())
                .with_observer(Arc::new(bus.clone())),
        );
        (bus, registry)
    }

    fn session_frame(
        &self,
        ctx: &SimContext,
        tracker: &ProximityTracker,
        id: SessionId,
    ) -> Result<SimFrame> {
        let snap = tracker.snapshot(id)?;
        let mut frame = SimFrame::at(ctx.now().as_secs_f64());
        frame.distance_m = snap.distance_m;
        frame.state = Some(state_name(snap.state).to_string());
        frame.path_len = snap.path_len;
        frame.stale = snap.stale;
        Ok(frame)
    }

    /// Truck crawls toward the citizen; exactly one alert, then arrival.
    fn run_truck_approach(&self, ctx: &Arc<SimContext>) -> Result<Outcome> {
        let mut out = Outcome::default();
        let (bus, registry) = self.world(ctx);
        let tracker = Arc::new(ProximityTracker::new(
            registry.clone(),
            ctx.clone(),
            self.config.clone(),
        ));
        let _attached = tracker.attach(&bus);
        let mut events = tracker.events();

        let citizen = EntityId::from("citizen");
        let truck = EntityId::from("truck-1");
        registry.upsert(TrackedEntity::new(
            citizen.clone(),
            EntityKind::Observer,
            position_at(ctx, HOME.0, HOME.1)?,
            EntityStatus::Available,
        ));
        registry.upsert(TrackedEntity::new(
            truck.clone(),
            EntityKind::Truck,
            position_at(ctx, HOME.0 - 0.015, HOME.1 - 0.015)?,
            EntityStatus::Busy,
        ));

        let radius = self.config.default_alert_radius_m;
        let session = tracker.start(citizen.clone(), truck.clone(), radius)?;
        let mover = SimulatedMover::new(registry, ctx.clone(), truck, citizen, &self.config);

        let mut start_distance = None;
        while out.ticks < self.max_ticks {
            ctx.advance_time(self.config.mover_interval());
            let step = mover.tick()?;
            out.ticks += 1;

            let mut frame = self.session_frame(ctx, &tracker, session)?;
            if start_distance.is_none() {
                start_distance = frame.distance_m;
                let watching = frame.state.as_deref() == Some("watching");
                out.check(watching, || "session not watching after first update".into());
            }
            while let Ok(event) = events.try_recv() {
                if let ProximityEvent::Alert { distance_m, .. } = &event {
                    let d = *distance_m;
                    let slack = self.config.mover_step_m + 1.0;
                    out.check(d > radius - slack, || format!("alert fired late at {d:.1} m"));
                }
                let message = out.count(&event);
                frame = frame.with_event(message);
            }
            if out.ticks % 10 == 1 || !frame.events.is_empty() {
                out.frames.push(frame);
            }
            if step == MoverStep::Arrived {
                break;
            }
        }

        let start = start_distance.unwrap_or(0.0);
        out.check((2_200.0..2_400.0).contains(&start), || {
            format!("truck started {start:.0} m away")
        });
        let (alerts, arrivals) = (out.alerts, out.arrivals);
        out.check(alerts == 1, || format!("expected one alert, saw {alerts}"));
        out.check(arrivals == 1, || format!("expected one arrival, saw {arrivals}"));
        let final_state = tracker.snapshot(session)?.state;
        out.check(final_state == SessionState::Arrived, || {
            format!("session ended in {}", state_name(final_state))
        });
        Ok(out)
    }

    /// Nearest available truck: synthetic 400/900/50 m fleet, then the demo
    /// fleet around a busy truck.
    fn run_nearest_truck(&self, ctx: &Arc<SimContext>) -> Result<Outcome> {
        let mut out = Outcome::default();
        let (_bus, registry) = self.world(ctx);
        let home = position_at(ctx, HOME.0, HOME.1)?;

        let synthetic = [("t-400", 400.0, 0.0), ("t-900", -900.0, 0.0), ("t-50", 0.0, 50.0)];
        for (id, north_m, east_m) in synthetic {
            let (lat, lon) = offset(HOME, north_m, east_m);
            registry.upsert(TrackedEntity::new(
                id,
                EntityKind::Truck,
                position_at(ctx, lat, lon)?,
                EntityStatus::Available,
            ));
        }

        let radius = self.config.default_alert_radius_m;
        let nearest = search::find_nearest(
            &registry,
            &home,
            EntityKind::Truck,
            Some(EntityStatus::Available),
            radius,
        )?;
        out.ticks += 1;
        out.check(nearest.entity.id.as_str() == "t-50", || {
            format!("nearest was {}", nearest.entity.id)
        });
        let within = search::find_within_radius(&registry, &home, EntityKind::Truck, radius, None)?;
        let ids: Vec<&str> = within.iter().map(|c| c.entity.id.as_str()).collect();
        out.check(ids == ["t-50", "t-400"], || format!("within {radius} m: {ids:?}"));
        out.frames.push(
            SimFrame::at(ctx.now().as_secs_f64())
                .with_event(format!("nearest {} at {:.1} m", nearest.entity.id, nearest.distance_m)),
        );

        // Demo fleet, asked from right next to the busy truck
        let (_bus, fleet) = self.world(ctx);
        for (id, lat, lon, status) in DEMO_FLEET {
            fleet.upsert(TrackedEntity::new(
                id,
                EntityKind::Truck,
                position_at(ctx, lat, lon)?,
                status,
            ));
        }
        let query = position_at(ctx, 21.2180, 81.6330)?;

        let any = search::find_nearest(&fleet, &query, EntityKind::Truck, None, f64::INFINITY)?;
        let available = search::find_nearest_available(&fleet, &query, EntityKind::Truck)?;
        out.ticks += 1;
        out.check(any.entity.id.as_str() == "mock-3", || {
            format!("closest truck was {}", any.entity.id)
        });
        out.check(available.entity.id.as_str() == "mock-2", || {
            format!("closest available truck was {}", available.entity.id)
        });

        let eta = available.eta_seconds(self.config.road_speed_mps)?;
        out.frames.push(SimFrame::at(ctx.now().as_secs_f64()).with_event(format!(
            "nearest available {} at {:.0} m, eta {:.0} s",
            available.entity.id, available.distance_m, eta
        )));
        Ok(out)
    }

    /// Proof gating against a live position source.
    fn run_worker_geofence(&self, ctx: &Arc<SimContext>) -> Result<Outcome> {
        let mut out = Outcome::default();
        let guard = GeofenceGuard::from_config(&self.config)?;
        let site = position_at(ctx, HOME.0, HOME.1)?;
        let radius = self.config.geofence_radius_m;

        let runtime = current_thread_runtime()?;
        runtime.block_on(async {
            let cases = [
                (600.0, Tier::Denied),
                (300.0, Tier::Marginal),
                (80.0, Tier::Close),
            ];
            for (stream, (distance, expected)) in cases.into_iter().enumerate() {
                let (lat, lon) = offset(HOME, distance, 0.0);
                let worker = SimPositionSource::new(ctx.clone(), lat, lon, stream as u64);
                let verdict = guard
                    .authorize(ctx.as_ref(), &worker, Some(&site), radius)
                    .await?;
                out.ticks += 1;

                out.check(verdict.tier == expected, || {
                    format!("{distance} m gave {:?}, expected {:?}", verdict.tier, expected)
                });
                out.check(verdict.allowed == (verdict.tier != Tier::Denied), || {
                    format!("{distance} m: allowed flag disagrees with tier")
                });
                out.frames.push(
                    SimFrame::at(ctx.now().as_secs_f64()).with_event(format!(
                        "{:.0} m -> {:?}{}",
                        verdict.distance_m,
                        verdict.tier,
                        if verdict.requires_confirmation() { " (confirm)" } else { "" }
                    )),
                );
                ctx.advance_time(Duration::from_secs(1));
            }

            // No fix means no verdict, never a fallback location
            let dark = SimPositionSource::new(ctx.clone(), HOME.0, HOME.1, 99)
                .with_outage(Duration::ZERO..Duration::from_secs(3_600));
            let result = guard.authorize(ctx.as_ref(), &dark, Some(&site), radius).await;
            out.ticks += 1;
            out.check(matches!(result, Err(ProximityError::MissingLocation(_))), || {
                format!("authorize during outage returned {result:?}")
            });
            out.frames
                .push(SimFrame::at(ctx.now().as_secs_f64()).with_event("outage -> missing location"));
            Ok::<_, SimError>(())
        })?;

        Ok(out)
    }

    /// A 30 s feed outage under the poller: one `Stale`, one `Fresh`, and
    /// polling carries on.
    fn run_feed_outage(&self, ctx: &Arc<SimContext>) -> Result<Outcome> {
        let mut out = Outcome::default();
        let (bus, registry) = self.world(ctx);
        let tracker = Arc::new(ProximityTracker::new(
            registry.clone(),
            ctx.clone(),
            self.config.clone(),
        ));
        let _attached = tracker.attach(&bus);

        let citizen = EntityId::from("citizen");
        let truck = EntityId::from("truck-7");
        let (lat, lon) = offset(HOME, 1_000.0, 0.0);
        registry.upsert(TrackedEntity::new(
            citizen.clone(),
            EntityKind::Observer,
            position_at(ctx, HOME.0, HOME.1)?,
            EntityStatus::Available,
        ));
        registry.upsert(TrackedEntity::new(
            truck.clone(),
            EntityKind::Truck,
            position_at(ctx, lat, lon)?,
            EntityStatus::Busy,
        ));
        let session = tracker.start(citizen, truck.clone(), self.config.default_alert_radius_m)?;

        let outage = Duration::from_secs(30)..Duration::from_secs(60);
        let horizon = Duration::from_secs(120);
        let source = Arc::new(
            SimPositionSource::new(ctx.clone(), lat, lon, 7)
                .with_noise(3.0)
                .with_outage(outage.clone()),
        );

        // (virtual seconds, event)
        let seen: Arc<Mutex<Vec<(f64, &'static str)>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let clock = ctx.clone();
        let _watch = bus.subscribe(Topic::Entity(truck.clone()), move |event| {
            let kind = match event {
                BusEvent::Updated(_) => "updated",
                BusEvent::Removed(_) => "removed",
                BusEvent::Stale(_) => "stale",
                BusEvent::Fresh(_) => "fresh",
            };
            sink.lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push((clock.now().as_secs_f64(), kind));
        });

        let mut saw_stale_session = false;
        let runtime = current_thread_runtime()?;
        runtime.block_on(async {
            let poller = bus.spawn_poller(
                ctx.clone(),
                registry.clone(),
                source,
                truck.clone(),
                self.config.poll_interval(),
                Backoff::from_config(&self.config),
            );

            let mut yields = 0;
            while ctx.now() < horizon && yields < self.max_ticks {
                tokio::task::yield_now().await;
                yields += 1;
                let frame = self.session_frame(ctx, &tracker, session)?;
                if frame.stale && !saw_stale_session {
                    saw_stale_session = true;
                    out.frames.push(frame.with_event("session stale"));
                }
            }
            poller.cancel();
            debug!("Feed outage ran {} yields", yields);
            Ok::<_, SimError>(())
        })?;

        let seen = seen.lock().unwrap_or_else(PoisonError::into_inner).clone();
        for (time_sec, kind) in &seen {
            if *kind != "updated" {
                out.frames.push(SimFrame::at(*time_sec).with_event(*kind));
            }
        }
        out.frames.sort_by(|a, b| a.time_sec.total_cmp(&b.time_sec));

        let updates = seen.iter().filter(|(_, k)| *k == "updated").count();
        let stale: Vec<f64> = seen.iter().filter(|(_, k)| *k == "stale").map(|(t, _)| *t).collect();
        let fresh: Vec<f64> = seen.iter().filter(|(_, k)| *k == "fresh").map(|(t, _)| *t).collect();
        out.ticks = updates as u64;

        let (start, end) = (outage.start.as_secs_f64(), outage.end.as_secs_f64());
        out.check(stale.len() == 1, || format!("expected one stale, saw {}", stale.len()));
        out.check(fresh.len() == 1, || format!("expected one fresh, saw {}", fresh.len()));
        if let (Some(s), Some(f)) = (stale.first(), fresh.first()) {
            out.check((start..end).contains(s), || format!("stale at {s:.1} s"));
            out.check(*f >= end, || format!("fresh at {f:.1} s"));
        }
        let after = seen
            .iter()
            .filter(|(t, k)| *k == "updated" && *t >= end)
            .count();
        out.check(after > 0, || "no updates after the outage".into());
        out.check(saw_stale_session, || "session never flagged stale".into());
        out.check(!tracker.snapshot(session)?.stale, || "session still stale at the end".into());
        Ok(out)
    }
}

fn position_at(ctx: &SimContext, latitude: f64, longitude: f64) -> Result<Position> {
    Ok(Position::new(latitude, longitude, ctx.system_time())?)
}

/// Flat-earth offset, good to a few centimeters at city scale.
fn offset(origin: (f64, f64), north_m: f64, east_m: f64) -> (f64, f64) {
    let dlat = (north_m / EARTH_RADIUS_M).to_degrees();
    let dlon = (east_m / (EARTH_RADIUS_M * origin.0.to_radians().cos())).to_degrees();
    (origin.0 + dlat, origin.1 + dlon)
}

fn state_name(state: SessionState) -> &'static str {
    match state {
        SessionState::Idle => "idle",
        SessionState::Watching => "watching",
        SessionState::Alerted => "alerted",
        SessionState::Arrived => "arrived",
        SessionState::Stopped => "stopped",
    }
}

fn current_thread_runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .map_err(|e| SimError::Runtime(e.to_string()))
}
