//! The "REALTIME" bus - fan-out of position changes to subscribers.
//!
//! Two ways in:
//! - **Push**: every committed registry write (GPS callback, simulated mover,
//!   server-pushed update) arrives through [`RegistryObserver`].
//! - **Pull**: [`RealtimeUpdateBus::spawn_poller`] samples a
//!   [`PositionSource`] on an interval and writes into the registry, retrying
//!   with backoff while the feed is down and surfacing `Stale`/`Fresh`.
//!
//! A one-shot "get current location" is just a subscription that cancels
//! itself after the first update ([`RealtimeUpdateBus::next_update`]).
//!
//! Callbacks run synchronously on the publishing thread, in publish order.
//! They may unsubscribe (themselves or others) at any time; an unsubscribed
//! callback is never invoked again, even by a dispatch already in flight.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};
use vicinity_env::{PositionSource, VicinityContext};

use crate::backoff::Backoff;
use crate::error::{ProximityError, Result};
use crate::registry::{EntityRegistry, RegistryChange, RegistryObserver};
use crate::types::{EntityId, EntityKind, Position, TrackedEntity};

// ============================================================================
// EVENTS & TOPICS
// ============================================================================

/// Something subscribers may care about.
#[derive(Debug, Clone, PartialEq)]
pub enum BusEvent {
    /// A committed position/status write. Concurrent writers to one entity
    /// may deliver these out of `revision` order; compare revisions or use
    /// [`RealtimeUpdateBus::subscribe_latest`].
    Updated(TrackedEntity),
    /// The entity was deregistered
    Removed(EntityId),
    /// The entity's feed dropped; its last known data is getting old
    Stale(EntityId),
    /// The feed recovered
    Fresh(EntityId),
}

impl BusEvent {
    pub fn entity_id(&self) -> &EntityId {
        match self {
            BusEvent::Updated(entity) => &entity.id,
            BusEvent::Removed(id) | BusEvent::Stale(id) | BusEvent::Fresh(id) => id,
        }
    }
}

/// Subscription filter.
#[derive(Debug, Clone, PartialEq)]
pub enum Topic {
    All,
    Entity(EntityId),
    /// Only `Updated` events carry a kind, so only those match
    Kind(EntityKind),
}

impl Topic {
    fn matches(&self, event: &BusEvent) -> bool {
        match self {
            Topic::All => true,
            Topic::Entity(id) => event.entity_id() == id,
            Topic::Kind(kind) => matches!(event, BusEvent::Updated(e) if e.kind == *kind),
        }
    }
}

// ============================================================================
// SUBSCRIPTIONS
// ============================================================================

type Callback = dyn Fn(&BusEvent) + Send + Sync;

struct Subscriber {
    id: u64,
    topic: Topic,
    active: Arc<AtomicBool>,
    callback: Box<Callback>,
}

#[derive(Default)]
struct BusInner {
    subscribers: Mutex<Vec<Arc<Subscriber>>>,
    next_id: AtomicU64,
}

impl BusInner {
    fn detach(&self, id: u64) {
        let mut subs = self.subscribers.lock().unwrap_or_else(PoisonError::into_inner);
        subs.retain(|s| s.id != id);
    }
}

/// Handle to a registered callback.
///
/// Cloning shares the same registration. Dropping a handle does not cancel
/// it; call [`Subscription::unsubscribe`].
#[derive(Clone)]
pub struct Subscription {
    id: u64,
    active: Arc<AtomicBool>,
    bus: Weak<BusInner>,
}

impl Subscription {
    /// Stops further invocations immediately. Idempotent, and safe to call
    /// from inside the callback itself.
    pub fn unsubscribe(&self) {
        if self.active.swap(false, Ordering::SeqCst) {
            if let Some(bus) = self.bus.upgrade() {
                bus.detach(self.id);
            }
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("active", &self.is_active())
            .finish()
    }
}

struct UnsubscribeOnDrop(Subscription);

impl Drop for UnsubscribeOnDrop {
    fn drop(&mut self) {
        self.0.unsubscribe();
    }
}

// ============================================================================
// POLLER HANDLE
// ============================================================================

/// Cancels a running poller.
#[derive(Debug, Clone)]
pub struct PollHandle {
    cancelled: Arc<AtomicBool>,
}

impl PollHandle {
    pub(crate) fn new() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Stops the poller before its next write. Idempotent.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

// ============================================================================
// THE BUS
// ============================================================================

/// Delivers position changes to subscribers. Cheap to clone.
#[derive(Clone, Default)]
pub struct RealtimeUpdateBus {
    inner: Arc<BusInner>,
}

impl RealtimeUpdateBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `callback` for events matching `topic`.
    pub fn subscribe<F>(&self, topic: Topic, callback: F) -> Subscription
    where
        F: Fn(&BusEvent) + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let active = Arc::new(AtomicBool::new(true));
        let subscriber = Arc::new(Subscriber {
            id,
            topic,
            active: active.clone(),
            callback: Box::new(callback),
        });

        self.inner
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(subscriber);

        Subscription {
            id,
            active,
            bus: Arc::downgrade(&self.inner),
        }
    }

    /// Subscribes to one entity, delivering only `Updated` events newer than
    /// the last one delivered. Other event kinds pass through.
    ///
    /// Deliveries to this callback are serialized, so it must not write the
    /// same entity back into the registry synchronously.
    pub fn subscribe_latest<F>(&self, entity_id: EntityId, callback: F) -> Subscription
    where
        F: Fn(&BusEvent) + Send + Sync + 'static,
    {
        let newest = Mutex::new(0u64);
        self.subscribe(Topic::Entity(entity_id), move |event| {
            let mut newest = newest.lock().unwrap_or_else(PoisonError::into_inner);
            if let BusEvent::Updated(entity) = event {
                if entity.revision <= *newest {
                    debug!(
                        "Dropped revision {} of {} (delivered {})",
                        entity.revision, entity.id, *newest
                    );
                    return;
                }
                *newest = entity.revision;
            }
            callback(event);
        })
    }

    /// Delivers `event` to every matching, still-active subscriber.
    ///
    /// The subscriber list is snapshotted first so callbacks can subscribe or
    /// unsubscribe without deadlocking.
    pub fn publish(&self, event: &BusEvent) {
        let targets: Vec<Arc<Subscriber>> = {
            let subs = self.inner.subscribers.lock().unwrap_or_else(PoisonError::into_inner);
            subs.iter().filter(|s| s.topic.matches(event)).cloned().collect()
        };

        for subscriber in targets {
            if subscriber.active.load(Ordering::SeqCst) {
                (subscriber.callback)(event);
            }
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Resolves with the next committed update for `entity_id`.
    ///
    /// The underlying subscription cancels itself on the first update, and
    /// is also cancelled if this future is dropped early.
    pub async fn next_update(&self, entity_id: EntityId) -> Result<TrackedEntity> {
        let (tx, rx) = oneshot::channel();
        let tx = Mutex::new(Some(tx));
        let slot: Arc<OnceLock<Subscription>> = Arc::new(OnceLock::new());

        let own = slot.clone();
        let subscription = self.subscribe(Topic::Entity(entity_id.clone()), move |event| {
            if let BusEvent::Updated(entity) = event {
                if let Some(tx) = tx.lock().unwrap_or_else(PoisonError::into_inner).take() {
                    let _ = tx.send(entity.clone());
                }
                if let Some(subscription) = own.get() {
                    subscription.unsubscribe();
                }
            }
        });
        let _ = slot.set(subscription.clone());
        let _guard = UnsubscribeOnDrop(subscription);

        rx.await
            .map_err(|_| ProximityError::not_found(format!("update for {entity_id}")))
    }

    /// Starts the pull fallback for `entity_id`.
    ///
    /// Each successful sample is written through
    /// [`EntityRegistry::update_position`], which in turn publishes
    /// `Updated` here when this bus is the registry's observer. While the
    /// source fails, retries back off up to the configured cap; the first
    /// failure publishes `Stale`, the first success after that `Fresh`.
    pub fn spawn_poller<Ctx, S>(
        &self,
        ctx: Arc<Ctx>,
        registry: Arc<EntityRegistry>,
        source: Arc<S>,
        entity_id: EntityId,
        interval: Duration,
        backoff: Backoff,
    ) -> PollHandle
    where
        Ctx: VicinityContext,
        S: PositionSource + ?Sized,
    {
        let handle = PollHandle::new();
        let cancelled = handle.cancelled.clone();
        let bus = self.clone();
        let task_ctx = ctx.clone();
        let mut backoff = backoff;

        ctx.spawn(&format!("poll-{entity_id}"), async move {
            let mut stale = false;

            while !cancelled.load(Ordering::SeqCst) {
                let sample = source
                    .current_fix()
                    .await
                    .map_err(ProximityError::from)
                    .and_then(Position::try_from);

                if cancelled.load(Ordering::SeqCst) {
                    break;
                }

                match sample {
                    Ok(position) => {
                        if let Err(e) = registry.update_position(&entity_id, position, None) {
                            debug!("Poll for {} not applied: {}", entity_id, e);
                        }
                        if stale {
                            stale = false;
                            info!("Position feed for {} recovered", entity_id);
                            bus.publish(&BusEvent::Fresh(entity_id.clone()));
                        }
                        backoff.reset();
                        task_ctx.sleep(interval).await;
                    }
                    Err(e) => {
                        if !stale {
                            stale = true;
                            warn!("Position feed for {} is stale: {}", entity_id, e);
                            bus.publish(&BusEvent::Stale(entity_id.clone()));
                        }
                        let delay = backoff.next_delay();
                        debug!("Poll for {} retrying in {:?}", entity_id, delay);
                        task_ctx.sleep(delay).await;
                    }
                }
            }

            debug!("Poller for {} stopped", entity_id);
        });

        handle
    }
}

impl RegistryObserver for RealtimeUpdateBus {
    fn on_change(&self, change: &RegistryChange) {
        let event = match change {
            RegistryChange::Updated(entity) => BusEvent::Updated(entity.clone()),
            RegistryChange::Removed(id) => BusEvent::Removed(id.clone()),
        };
        self.publish(&event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{entity, pos, ManualClock};
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use vicinity_env::{EnvError, PositionFix, TokioContext};

    fn wired() -> (RealtimeUpdateBus, Arc<EntityRegistry>) {
        let bus = RealtimeUpdateBus::new();
        let registry = Arc::new(
            EntityRegistry::new(ManualClock::shared(), Duration::from_secs(300))
                .with_observer(Arc::new(bus.clone())),
        );
        (bus, registry)
    }

    #[test]
    fn test_registry_writes_reach_topic_subscribers() {
        let (bus, registry) = wired();
        let trucks = Arc::new(AtomicUsize::new(0));
        let one = Arc::new(AtomicUsize::new(0));

        let t = trucks.clone();
        bus.subscribe(Topic::Kind(EntityKind::Truck), move |_| {
            t.fetch_add(1, Ordering::SeqCst);
        });
        let o = one.clone();
        bus.subscribe(Topic::Entity("t-1".into()), move |_| {
            o.fetch_add(1, Ordering::SeqCst);
        });

        registry.upsert(entity("t-1", EntityKind::Truck, 21.0, 81.0));
        registry.upsert(entity("t-2", EntityKind::Truck, 21.0, 81.0));
        registry.upsert(entity("w-1", EntityKind::Worker, 21.0, 81.0));
        registry.remove(&"t-1".into());

        assert_eq!(trucks.load(Ordering::SeqCst), 2);
        // Update + removal
        assert_eq!(one.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_subscribe_latest_drops_older_revisions() {
        let bus = RealtimeUpdateBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        bus.subscribe_latest("t-1".into(), move |event| {
            if let BusEvent::Updated(e) = event {
                s.lock().unwrap().push(e.revision);
            }
        });

        let at = |revision| {
            let mut e = entity("t-1", EntityKind::Truck, 21.0, 81.0);
            e.revision = revision;
            BusEvent::Updated(e)
        };
        // Two writers raced: revision 3 was published before revision 2
        bus.publish(&at(1));
        bus.publish(&at(3));
        bus.publish(&at(2));
        bus.publish(&at(4));

        assert_eq!(*seen.lock().unwrap(), vec![1, 3, 4]);
    }

    #[test]
    fn test_unsubscribe_from_inside_callback() {
        let (bus, registry) = wired();
        let calls = Arc::new(AtomicUsize::new(0));
        let slot: Arc<OnceLock<Subscription>> = Arc::new(OnceLock::new());

        let c = calls.clone();
        let own = slot.clone();
        let sub = bus.subscribe(Topic::All, move |_| {
            c.fetch_add(1, Ordering::SeqCst);
            if let Some(s) = own.get() {
                s.unsubscribe();
            }
        });
        slot.set(sub.clone()).unwrap();

        registry.upsert(entity("t-1", EntityKind::Truck, 21.0, 81.0));
        registry.upsert(entity("t-1", EntityKind::Truck, 21.1, 81.0));

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!sub.is_active());
        assert_eq!(bus.subscriber_count(), 0);
        // Idempotent
        sub.unsubscribe();
    }

    #[test]
    fn test_unsubscribe_stops_in_flight_dispatch() {
        let bus = RealtimeUpdateBus::new();
        let second_calls = Arc::new(AtomicUsize::new(0));
        let victim: Arc<OnceLock<Subscription>> = Arc::new(OnceLock::new());

        // First subscriber cancels the second during the same dispatch
        let v = victim.clone();
        bus.subscribe(Topic::All, move |_| {
            if let Some(s) = v.get() {
                s.unsubscribe();
            }
        });
        let c = second_calls.clone();
        let second = bus.subscribe(Topic::All, move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        victim.set(second).unwrap();

        bus.publish(&BusEvent::Stale("t-1".into()));
        assert_eq!(second_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_next_update_is_one_shot() {
        let (bus, registry) = wired();
        registry.upsert(entity("t-1", EntityKind::Truck, 21.0, 81.0));

        let waiter = {
            let bus = bus.clone();
            tokio::spawn(async move { bus.next_update("t-1".into()).await })
        };
        // Let the waiter register before publishing
        while bus.subscriber_count() == 0 {
            tokio::task::yield_now().await;
        }

        registry.update_position(&"t-1".into(), pos(21.01, 81.0), None).unwrap();
        let got = waiter.await.unwrap().unwrap();
        assert_eq!(got.position.latitude(), 21.01);
        assert_eq!(bus.subscriber_count(), 0);
    }

    /// Scripted source: `true` yields a fix, `false` a failure; repeats the
    /// last step once the script runs out.
    struct ScriptedSource {
        script: Vec<bool>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl PositionSource for ScriptedSource {
        async fn current_fix(&self) -> std::result::Result<PositionFix, EnvError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            let ok = *self.script.get(n).or(self.script.last()).unwrap_or(&true);
            if ok {
                Ok(PositionFix::new(21.2514, 81.6296 + n as f64 * 1e-5, std::time::SystemTime::now()))
            } else {
                Err(EnvError::unavailable("no signal"))
            }
        }
    }

    #[tokio::test]
    async fn test_poller_surfaces_stale_then_fresh() {
        let (bus, registry) = wired();
        registry.upsert(entity("w-1", EntityKind::Worker, 21.0, 81.0));

        let events = Arc::new(Mutex::new(Vec::new()));
        let e = events.clone();
        bus.subscribe(Topic::Entity("w-1".into()), move |event| {
            let tag = match event {
                BusEvent::Updated(_) => "updated",
                BusEvent::Stale(_) => "stale",
                BusEvent::Fresh(_) => "fresh",
                BusEvent::Removed(_) => "removed",
            };
            e.lock().unwrap().push(tag);
        });

        let source = Arc::new(ScriptedSource {
            script: vec![true, false, false, false, true],
            calls: AtomicUsize::new(0),
        });
        let ctx = TokioContext::shared();
        let handle = bus.spawn_poller(
            ctx.clone(),
            registry.clone(),
            source.clone(),
            "w-1".into(),
            Duration::from_millis(5),
            Backoff::new(2, 8),
        );

        while source.calls.load(Ordering::SeqCst) < 6 {
            ctx.sleep(Duration::from_millis(2)).await;
        }
        handle.cancel();
        ctx.sleep(Duration::from_millis(30)).await;

        let seen = events.lock().unwrap().clone();
        assert_eq!(&seen[..4], &["updated", "stale", "updated", "fresh"]);
        assert!(seen[4..].iter().all(|t| *t == "updated"));
        assert!(handle.is_cancelled());

        // Cancelled: no further writes land
        let revision = registry.get(&"w-1".into()).unwrap().revision;
        ctx.sleep(Duration::from_millis(30)).await;
        assert_eq!(registry.get(&"w-1".into()).unwrap().revision, revision);
    }
}
