//! The "ALERT" engine - per-observer proximity sessions.
//!
//! A session watches one target on behalf of one observer:
//!
//! ```text
//! IDLE ──start──► WATCHING ──≤ alert radius──► ALERTED ──≤ arrival ε──► ARRIVED
//!                    │  └───────────────≤ arrival ε─────────────────────►  │
//!                    └──────────────────────stop──────────────────────► STOPPED ◄─┘
//! ```
//!
//! Either side moving re-evaluates the pair: target writes extend the trail,
//! observer writes re-check the newest trail point.
//!
//! `alert_fired` is one-shot: once set it stays set until the session is
//! restarted, however often the target drifts out of and back into range.
//! Every session sits behind its own mutex, so the check-and-fire step is a
//! single critical section even when updates race.

use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::SystemTime;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use vicinity_env::Clock;

use crate::bus::{BusEvent, RealtimeUpdateBus, Subscription, Topic};
use crate::config::EngineConfig;
use crate::error::{ProximityError, Result};
use crate::geo_math;
use crate::registry::EntityRegistry;
use crate::types::{EntityId, Position, SessionId, TrackedEntity};

const EVENT_CHANNEL_CAPACITY: usize = 64;

// ============================================================================
// STATE & EVENTS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Watching,
    Alerted,
    Arrived,
    Stopped,
}

impl SessionState {
    /// Only a stopped session frees its (observer, target) pair.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Stopped)
    }
}

/// Emitted for the UI/notification layer to render.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum ProximityEvent {
    /// Target came within the alert radius (once per session)
    Alert {
        session_id: SessionId,
        target_id: EntityId,
        distance_m: f64,
        eta_secs: Option<f64>,
    },
    /// Target reached the observer (once per session)
    Arrived {
        session_id: SessionId,
        target_id: EntityId,
        distance_m: f64,
    },
}

impl ProximityEvent {
    pub fn session_id(&self) -> SessionId {
        match self {
            ProximityEvent::Alert { session_id, .. } | ProximityEvent::Arrived { session_id, .. } => {
                *session_id
            }
        }
    }

    pub fn is_alert(&self) -> bool {
        matches!(self, ProximityEvent::Alert { .. })
    }
}

/// Display view of a session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSnapshot {
    pub id: SessionId,
    pub observer_id: EntityId,
    pub target_id: EntityId,
    pub state: SessionState,
    pub alert_radius_m: f64,
    pub alert_fired: bool,
    pub distance_m: Option<f64>,
    pub eta_secs: Option<f64>,
    pub path_len: usize,
    /// The feed behind this session is down; distance is last-known
    pub stale: bool,
}

// ============================================================================
// SESSION (pure state machine)
// ============================================================================

/// One observer watching one target.
#[derive(Debug, Clone)]
pub struct ProximitySession {
    id: SessionId,
    observer_id: EntityId,
    target_id: EntityId,
    alert_radius_m: f64,
    state: SessionState,
    alert_fired: bool,
    arrival_fired: bool,

    /// Target trail, oldest first, at most `max_path_len` points
    path: VecDeque<Position>,
    max_path_len: usize,

    last_distance_m: Option<f64>,
    last_eta_secs: Option<f64>,
    stale: bool,

    /// Highest registry revision of the target applied so far
    last_target_revision: u64,
    /// Same, for the observer
    last_observer_revision: u64,
    started_at: SystemTime,
}

impl ProximitySession {
    /// Creates an `Idle` session.
    pub fn new(
        observer_id: EntityId,
        target_id: EntityId,
        alert_radius_m: f64,
        max_path_len: usize,
        started_at: SystemTime,
    ) -> Result<Self> {
        if !alert_radius_m.is_finite() || alert_radius_m < 0.0 {
            return Err(ProximityError::invalid(format!(
                "alert radius must be a non-negative number of meters, got {alert_radius_m}"
            )));
        }
        Ok(Self {
            id: SessionId::new(),
            observer_id,
            target_id,
            alert_radius_m,
            state: SessionState::Idle,
            alert_fired: false,
            arrival_fired: false,
            path: VecDeque::new(),
            max_path_len: max_path_len.max(1),
            last_distance_m: None,
            last_eta_secs: None,
            stale: false,
            last_target_revision: 0,
            last_observer_revision: 0,
            started_at,
        })
    }

    /// `Idle` → `Watching`.
    pub fn begin(&mut self) {
        if self.state == SessionState::Idle {
            self.state = SessionState::Watching;
        }
    }

    /// Applies one target position and returns whatever events it fired.
    ///
    /// Only `Watching` and `Alerted` sessions take updates. A position
    /// captured before the newest trail point is dropped as out of order.
    pub fn apply(
        &mut self,
        target: Position,
        observer: &Position,
        config: &EngineConfig,
    ) -> Vec<ProximityEvent> {
        if !self.is_live() {
            return Vec::new();
        }
        if let Some(newest) = self.path.back() {
            if target.captured_at() < newest.captured_at() {
                debug!("Session {} dropped out-of-order fix for {}", self.id, self.target_id);
                return Vec::new();
            }
        }

        if self.path.len() >= self.max_path_len {
            self.path.pop_front();
        }
        self.path.push_back(target);
        self.stale = false;

        self.evaluate(&target, observer, config)
    }

    /// Re-checks `target` against an observer that moved. The trail is left
    /// alone.
    pub fn reobserve(
        &mut self,
        target: &Position,
        observer: &Position,
        config: &EngineConfig,
    ) -> Vec<ProximityEvent> {
        if !self.is_live() {
            return Vec::new();
        }
        self.evaluate(target, observer, config)
    }

    /// Newest trail point, if the target has reported since the start.
    pub fn latest_target(&self) -> Option<Position> {
        self.path.back().copied()
    }

    fn is_live(&self) -> bool {
        matches!(self.state, SessionState::Watching | SessionState::Alerted)
    }

    fn evaluate(
        &mut self,
        target: &Position,
        observer: &Position,
        config: &EngineConfig,
    ) -> Vec<ProximityEvent> {
        let mut events = Vec::new();
        let distance_m = geo_math::distance_meters(observer, target);
        let eta_secs = geo_math::eta_seconds(distance_m, config.approach_speed_mps).ok();
        self.last_distance_m = Some(distance_m);
        self.last_eta_secs = eta_secs;

        if self.state == SessionState::Watching
            && distance_m <= self.alert_radius_m
            && !self.alert_fired
        {
            self.state = SessionState::Alerted;
            self.alert_fired = true;
            events.push(ProximityEvent::Alert {
                session_id: self.id,
                target_id: self.target_id.clone(),
                distance_m,
                eta_secs,
            });
        }

        if distance_m <= config.arrival_epsilon_m && !self.arrival_fired {
            self.state = SessionState::Arrived;
            self.arrival_fired = true;
            events.push(ProximityEvent::Arrived {
                session_id: self.id,
                target_id: self.target_id.clone(),
                distance_m,
            });
        }

        events
    }

    /// Moves to `Stopped`. Returns false if it already was.
    pub fn stop(&mut self) -> bool {
        if self.state == SessionState::Stopped {
            return false;
        }
        self.state = SessionState::Stopped;
        true
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn alert_fired(&self) -> bool {
        self.alert_fired
    }

    pub fn observer_id(&self) -> &EntityId {
        &self.observer_id
    }

    pub fn target_id(&self) -> &EntityId {
        &self.target_id
    }

    pub fn alert_radius_m(&self) -> f64 {
        self.alert_radius_m
    }

    pub fn path(&self) -> impl Iterator<Item = &Position> {
        self.path.iter()
    }

    pub fn started_at(&self) -> SystemTime {
        self.started_at
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            id: self.id,
            observer_id: self.observer_id.clone(),
            target_id: self.target_id.clone(),
            state: self.state,
            alert_radius_m: self.alert_radius_m,
            alert_fired: self.alert_fired,
            distance_m: self.last_distance_m,
            eta_secs: self.last_eta_secs,
            path_len: self.path.len(),
            stale: self.stale,
        }
    }
}

// ============================================================================
// TRACKER (session owner)
// ============================================================================

type SessionCell = Arc<Mutex<ProximitySession>>;

/// Owns every proximity session on this device.
///
/// Observer positions are always read from the registry at update time,
/// never cached in the session.
pub struct ProximityTracker {
    registry: Arc<EntityRegistry>,
    clock: Arc<dyn Clock>,
    config: EngineConfig,
    sessions: Mutex<HashMap<SessionId, SessionCell>>,
    events: broadcast::Sender<ProximityEvent>,
}

impl ProximityTracker {
    pub fn new(registry: Arc<EntityRegistry>, clock: Arc<dyn Clock>, config: EngineConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            registry,
            clock,
            config,
            sessions: Mutex::new(HashMap::new()),
            events,
        }
    }

    /// Starts watching `target` for `observer`.
    ///
    /// Fails with `AlreadyWatching` while a non-stopped session exists for
    /// the same pair. The radius must exceed the arrival epsilon.
    pub fn start(
        &self,
        observer: EntityId,
        target: EntityId,
        alert_radius_m: f64,
    ) -> Result<SessionId> {
        if alert_radius_m <= self.config.arrival_epsilon_m {
            return Err(ProximityError::invalid(format!(
                "alert radius {alert_radius_m} m must exceed the arrival epsilon ({} m)",
                self.config.arrival_epsilon_m
            )));
        }
        let mut session = ProximitySession::new(
            observer.clone(),
            target.clone(),
            alert_radius_m,
            self.config.max_path_len,
            self.clock.system_time(),
        )?;

        let mut sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
        let busy = sessions.values().any(|cell| {
            let s = cell.lock().unwrap_or_else(PoisonError::into_inner);
            s.observer_id == observer && s.target_id == target && !s.state.is_terminal()
        });
        if busy {
            return Err(ProximityError::AlreadyWatching { observer, target });
        }

        session.begin();
        let id = session.id();
        sessions.insert(id, Arc::new(Mutex::new(session)));
        info!(
            "Session {} started: {} watching {} (alert at {} m)",
            id, observer, target, alert_radius_m
        );
        Ok(id)
    }

    /// Starts with the configured default alert radius.
    pub fn start_default(&self, observer: EntityId, target: EntityId) -> Result<SessionId> {
        self.start(observer, target, self.config.default_alert_radius_m)
    }

    /// Feeds one target position into a session.
    ///
    /// A missing observer position is `MissingLocation` and leaves the
    /// session untouched. Updates to a stopped or arrived session are no-ops.
    pub fn on_target_position_update(
        &self,
        session_id: SessionId,
        position: Position,
    ) -> Result<Vec<ProximityEvent>> {
        let cell = self.cell(session_id)?;
        let mut session = cell.lock().unwrap_or_else(PoisonError::into_inner);
        self.apply_locked(&mut session, position)
    }

    /// Routes a committed registry write to every session it concerns.
    ///
    /// A target write extends the trail; an observer write re-checks the
    /// target's latest position against where the observer now is. Target
    /// and observer revisions are tracked separately, and anything not newer
    /// than what a session has already seen is discarded.
    pub fn handle_entity_update(&self, entity: &TrackedEntity) -> Vec<ProximityEvent> {
        let mut fired = Vec::new();
        for cell in self.cells_where(|s| s.observer_id == entity.id) {
            let mut session = cell.lock().unwrap_or_else(PoisonError::into_inner);
            if entity.revision <= session.last_observer_revision {
                debug!(
                    "Session {} skipped observer revision {} of {} (at {})",
                    session.id, entity.revision, entity.id, session.last_observer_revision
                );
                continue;
            }
            session.last_observer_revision = entity.revision;
            if !session.is_live() {
                continue;
            }
            let target = session
                .latest_target()
                .or_else(|| self.registry.position_of(&session.target_id));
            let Some(target) = target else {
                debug!("Session {}: {} has no position yet", session.id, session.target_id);
                continue;
            };
            let events = session.reobserve(&target, &entity.position, &self.config);
            self.emit(&session, &events);
            fired.extend(events);
        }

        for cell in self.cells_where(|s| s.target_id == entity.id) {
            let mut session = cell.lock().unwrap_or_else(PoisonError::into_inner);
            if entity.revision <= session.last_target_revision {
                debug!(
                    "Session {} skipped revision {} of {} (at {})",
                    session.id, entity.revision, entity.id, session.last_target_revision
                );
                continue;
            }
            match self.apply_locked(&mut session, entity.position) {
                Ok(events) => {
                    session.last_target_revision = entity.revision;
                    fired.extend(events);
                }
                Err(e) => warn!("Session {} could not apply update: {}", session.id, e),
            }
        }
        fired
    }

    /// Flags sessions whose target or observer feed went stale (or clears
    /// the flag when `stale` is false).
    pub fn mark_stale(&self, entity_id: &EntityId, stale: bool) {
        for cell in self.cells_where(|s| &s.target_id == entity_id || &s.observer_id == entity_id) {
            let mut session = cell.lock().unwrap_or_else(PoisonError::into_inner);
            if !session.state.is_terminal() {
                session.stale = stale;
            }
        }
    }

    /// Stops a session. Stopping twice is a no-op.
    pub fn stop(&self, session_id: SessionId) -> Result<()> {
        let cell = self.cell(session_id)?;
        let mut session = cell.lock().unwrap_or_else(PoisonError::into_inner);
        if session.stop() {
            info!("Session {} stopped", session_id);
        }
        Ok(())
    }

    /// Stops the session and starts a fresh one for the same pair and
    /// radius. The only way to re-arm the alert.
    pub fn restart(&self, session_id: SessionId) -> Result<SessionId> {
        let (observer, target, radius) = {
            let cell = self.cell(session_id)?;
            let mut session = cell.lock().unwrap_or_else(PoisonError::into_inner);
            session.stop();
            (
                session.observer_id.clone(),
                session.target_id.clone(),
                session.alert_radius_m,
            )
        };
        self.start(observer, target, radius)
    }

    pub fn snapshot(&self, session_id: SessionId) -> Result<SessionSnapshot> {
        let cell = self.cell(session_id)?;
        let session = cell.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(session.snapshot())
    }

    /// The target's trail, oldest first.
    pub fn path(&self, session_id: SessionId) -> Result<Vec<Position>> {
        let cell = self.cell(session_id)?;
        let session = cell.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(session.path().copied().collect())
    }

    /// Drops stopped sessions; returns how many were removed.
    pub fn prune_stopped(&self) -> usize {
        let mut sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
        let before = sessions.len();
        sessions.retain(|_, cell| {
            !cell
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .state
                .is_terminal()
        });
        before - sessions.len()
    }

    /// Receiver for every alert and arrival emitted from now on.
    pub fn events(&self) -> broadcast::Receiver<ProximityEvent> {
        self.events.subscribe()
    }

    /// Wires the tracker to the bus: updates drive sessions, stale/fresh
    /// and removals flag them.
    pub fn attach(self: &Arc<Self>, bus: &RealtimeUpdateBus) -> Subscription {
        let tracker: Weak<Self> = Arc::downgrade(self);
        bus.subscribe(Topic::All, move |event| {
            let Some(tracker) = tracker.upgrade() else {
                return;
            };
            match event {
                BusEvent::Updated(entity) => {
                    tracker.handle_entity_update(entity);
                }
                BusEvent::Stale(id) | BusEvent::Removed(id) => tracker.mark_stale(id, true),
                BusEvent::Fresh(id) => tracker.mark_stale(id, false),
            }
        })
    }

    fn apply_locked(
        &self,
        session: &mut ProximitySession,
        position: Position,
    ) -> Result<Vec<ProximityEvent>> {
        if matches!(session.state, SessionState::Stopped | SessionState::Arrived) {
            return Ok(Vec::new());
        }
        let observer = self.registry.position_of(&session.observer_id).ok_or_else(|| {
            ProximityError::missing(format!("observer {} has no position", session.observer_id))
        })?;

        let events = session.apply(position, &observer, &self.config);
        self.emit(session, &events);
        Ok(events)
    }

    fn emit(&self, session: &ProximitySession, events: &[ProximityEvent]) {
        for event in events {
            match event {
                ProximityEvent::Alert { distance_m, .. } => info!(
                    "Session {}: {} within {:.0} m of {}",
                    session.id, session.target_id, distance_m, session.observer_id
                ),
                ProximityEvent::Arrived { .. } => info!(
                    "Session {}: {} arrived at {}",
                    session.id, session.target_id, session.observer_id
                ),
            }
            // No receivers is fine; callers also get the events back
            let _ = self.events.send(event.clone());
        }
    }

    fn cell(&self, session_id: SessionId) -> Result<SessionCell> {
        let sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
        sessions
            .get(&session_id)
            .cloned()
            .ok_or_else(|| ProximityError::not_found(format!("session {session_id}")))
    }

    fn cells_where(&self, pred: impl Fn(&ProximitySession) -> bool) -> Vec<SessionCell> {
        let sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
        sessions
            .values()
            .filter(|cell| pred(&cell.lock().unwrap_or_else(PoisonError::into_inner)))
            .cloned()
            .collect()
    }
}
