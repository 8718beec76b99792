//! Collector-facing bookkeeping for tracked references
//!
//! [`ReferenceCollector`] is the service a host runtime talks to. It creates
//! references that it tracks by object identity, turns the host's liveness
//! reports into clears, and forwards heap growth and cycle completion to
//! every soft reference class.
//!
//! Without a tracing collector, reachability is approximated through `Arc`
//! ownership: [`ReferenceCollector::sweep`] clears every tracked weak
//! reference whose target has no strong owner left, and
//! [`ReferenceCollector::collect`] runs a sweep followed by the soft
//! heuristic as one application-driven cycle.
//!
//! Weak and soft references created here are cached per (strength, class,
//! object): asking again for the same object returns the existing uncleared
//! reference with the new queue bound to it.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use flume::{Receiver, Sender};

use crate::config::ReferenceConfig;
use crate::error::{RefError, RefResult};
use crate::identity::IdentityToken;
use crate::reference::handle::ErasedReference;
use crate::reference::{Reference, ReferenceQueue, SoftReferenceRegistry, Strength};

/// Name of the soft class created with every collector
pub const DEFAULT_SOFT_CLASS: &str = "default";

/// Instance cache slot: soft references are cached per class, weak ones use class 0
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct CacheKey {
    strength: Strength,
    class: usize,
    identity: IdentityToken,
}

/// Reference tracking and collection-cycle driver
///
/// # Examples
///
/// ```
/// use refqueue::{ReferenceCollector, ReferenceQueue};
/// use std::sync::Arc;
///
/// let collector = ReferenceCollector::default();
/// let queue = ReferenceQueue::new();
/// let object = Arc::new(String::from("short lived"));
/// let weak = collector.weak(&object, Some(&queue));
///
/// drop(object);
/// let report = collector.collect();
/// assert_eq!(report.cleared_unreachable, 1);
/// assert_eq!(queue.pop_oldest(), Some(weak));
/// ```
pub struct ReferenceCollector {
    config: ArcSwap<ReferenceConfig>,
    /// Tracked weak and soft references, by target identity
    refs_by_identity: DashMap<IdentityToken, Vec<Weak<dyn ErasedReference>>>,
    /// At most one uncleared weak or soft reference per cache key
    instance_cache: DashMap<CacheKey, Weak<dyn ErasedReference>>,
    /// Tracked references with at least one live handle
    live_instances: Arc<AtomicUsize>,
    /// Soft class used by [`ReferenceCollector::soft`]
    default_class: Arc<SoftReferenceRegistry>,
    /// Every soft class by name, the default one included
    soft_classes: DashMap<String, Arc<SoftReferenceRegistry>>,
    /// Total references tracked
    total_tracked: AtomicUsize,
    /// Total references cleared as unreachable
    total_cleared: AtomicUsize,
    /// Total soft references evicted by the heuristic
    total_evicted: AtomicUsize,
    /// Completed cycles
    cycles_completed: AtomicUsize,
    /// Shutdown flag for the background collector
    shutdown: Arc<AtomicBool>,
    background_running: AtomicBool,
    /// Wake-up channel for the background collector
    wake_sender: Sender<()>,
    wake_receiver: Receiver<()>,
}

impl ReferenceCollector {
    /// Create a collector, validating `config` first
    pub fn new(config: ReferenceConfig) -> RefResult<Self> {
        config.validate()?;
        let default_class = Arc::new(SoftReferenceRegistry::new(
            DEFAULT_SOFT_CLASS,
            config.soft_ttl_default,
        )?);

        let soft_classes = DashMap::new();
        soft_classes.insert(DEFAULT_SOFT_CLASS.to_string(), Arc::clone(&default_class));

        let (wake_sender, wake_receiver) = flume::bounded(1);

        Ok(Self {
            config: ArcSwap::from_pointee(config),
            refs_by_identity: DashMap::new(),
            instance_cache: DashMap::new(),
            live_instances: Arc::new(AtomicUsize::new(0)),
            default_class,
            soft_classes,
            total_tracked: AtomicUsize::new(0),
            total_cleared: AtomicUsize::new(0),
            total_evicted: AtomicUsize::new(0),
            cycles_completed: AtomicUsize::new(0),
            shutdown: Arc::new(AtomicBool::new(false)),
            background_running: AtomicBool::new(false),
            wake_sender,
            wake_receiver,
        })
    }

    /// Current configuration
    pub fn config(&self) -> Arc<ReferenceConfig> {
        self.config.load_full()
    }

    /// Replace the configuration.
    ///
    /// Takes effect for the next background wait; existing soft classes keep
    /// the ttl they were created with.
    pub fn reconfigure(&self, config: ReferenceConfig) -> RefResult<()> {
        config.validate()?;
        self.config.store(Arc::new(config));
        Ok(())
    }

    fn track<T: Send + Sync + 'static>(&self, reference: &Reference<T>) {
        let mut refs = self
            .refs_by_identity
            .entry(reference.identity())
            .or_insert_with(Vec::new);
        refs.retain(|tracked| tracked.upgrade().is_some_and(|tracked| !tracked.is_cleared()));
        refs.push(reference.erased());
        drop(refs);

        self.total_tracked.fetch_add(1, Ordering::Relaxed);
    }

    /// Create an untracked hard reference; hard references are never cleared by a cycle
    pub fn hard<T: Send + Sync + 'static>(
        &self,
        target: Arc<T>,
        queue: Option<&ReferenceQueue<T>>,
    ) -> Reference<T> {
        Reference::hard(target, queue)
    }

    fn create_tracked<T: Send + Sync + 'static>(
        &self,
        create: impl FnOnce() -> Reference<T>,
    ) -> Reference<T> {
        let reference = create();
        reference.count_in(&self.live_instances);
        self.track(&reference);
        reference
    }

    /// Return the cached reference for `key`, or create and cache a new one
    fn cached_or_create<T: Send + Sync + 'static>(
        &self,
        key: CacheKey,
        target: &Arc<T>,
        queue: Option<&ReferenceQueue<T>>,
        create: impl FnOnce() -> Reference<T>,
    ) -> Reference<T> {
        match self.instance_cache.entry(key) {
            Entry::Occupied(mut occupied) => {
                let cached = occupied
                    .get()
                    .upgrade()
                    .filter(|cached| !cached.is_cleared())
                    .and_then(Reference::<T>::from_erased)
                    .filter(|cached| cached.points_to(target));
                if let Some(cached) = cached {
                    drop(occupied);
                    cached.bind_queue(queue);
                    return cached;
                }
                let reference = self.create_tracked(create);
                occupied.insert(reference.erased());
                reference
            }
            Entry::Vacant(vacant) => {
                let reference = self.create_tracked(create);
                vacant.insert(reference.erased());
                reference
            }
        }
    }

    /// Get the tracked weak reference to `target`, creating it if needed.
    ///
    /// `queue` is bound to the returned reference either way.
    pub fn weak<T: Send + Sync + 'static>(
        &self,
        target: &Arc<T>,
        queue: Option<&ReferenceQueue<T>>,
    ) -> Reference<T> {
        let key = CacheKey {
            strength: Strength::Weak,
            class: 0,
            identity: IdentityToken::of(target),
        };
        self.cached_or_create(key, target, queue, || Reference::weak(target, queue))
    }

    /// Create a tracked weak reference that is never shared through the cache.
    ///
    /// For owners that invalidate their references on their own.
    pub(crate) fn weak_uncached<T: Send + Sync + 'static>(
        &self,
        target: &Arc<T>,
        queue: Option<&ReferenceQueue<T>>,
    ) -> Reference<T> {
        self.create_tracked(|| Reference::weak(target, queue))
    }

    /// Get the tracked soft reference to `target` in the default class
    pub fn soft<T: Send + Sync + 'static>(
        &self,
        target: Arc<T>,
        queue: Option<&ReferenceQueue<T>>,
    ) -> Reference<T> {
        self.soft_in_class(&self.default_class, target, queue)
    }

    /// Get the tracked soft reference to `target` in `class`.
    ///
    /// `class` must come from [`ReferenceCollector::soft_class`] or
    /// [`ReferenceCollector::default_soft_class`] of this collector; any
    /// other registry is never driven by its cycles and is rejected with
    /// [`RefError::InvalidArgument`].
    pub fn soft_in<T: Send + Sync + 'static>(
        &self,
        class: &Arc<SoftReferenceRegistry>,
        target: Arc<T>,
        queue: Option<&ReferenceQueue<T>>,
    ) -> RefResult<Reference<T>> {
        if !self.owns_class(class) {
            return Err(RefError::InvalidArgument(format!(
                "soft class `{}` is not managed by this collector",
                class.name()
            )));
        }
        Ok(self.soft_in_class(class, target, queue))
    }

    fn soft_in_class<T: Send + Sync + 'static>(
        &self,
        class: &Arc<SoftReferenceRegistry>,
        target: Arc<T>,
        queue: Option<&ReferenceQueue<T>>,
    ) -> Reference<T> {
        let key = CacheKey {
            strength: Strength::Soft,
            class: Arc::as_ptr(class) as usize,
            identity: IdentityToken::of(&target),
        };
        self.cached_or_create(key, &target, queue, || {
            Reference::soft(Arc::clone(&target), class, queue)
        })
    }

    fn owns_class(&self, class: &Arc<SoftReferenceRegistry>) -> bool {
        self.soft_classes
            .get(class.name())
            .is_some_and(|owned| Arc::ptr_eq(owned.value(), class))
    }

    /// The soft class used by [`ReferenceCollector::soft`]
    pub fn default_soft_class(&self) -> &Arc<SoftReferenceRegistry> {
        &self.default_class
    }

    /// Get or create the soft class `name`.
    ///
    /// `ttl_default` only applies when the class is created; an existing
    /// class keeps its own ttl.
    pub fn soft_class(&self, name: &str, ttl_default: u32) -> RefResult<Arc<SoftReferenceRegistry>> {
        if let Some(existing) = self.soft_classes.get(name) {
            return Ok(Arc::clone(existing.value()));
        }

        let class = Arc::new(SoftReferenceRegistry::new(name, ttl_default)?);
        Ok(Arc::clone(
            self.soft_classes
                .entry(name.to_string())
                .or_insert(class)
                .value(),
        ))
    }

    fn classes(&self) -> Vec<Arc<SoftReferenceRegistry>> {
        self.soft_classes
            .iter()
            .map(|class| Arc::clone(class.value()))
            .collect()
    }

    /// Record a heap growth event in every soft class
    pub fn on_heap_growth(&self) {
        for class in self.classes() {
            class.on_heap_growth();
        }
    }

    /// Run the soft heuristic of every class.
    ///
    /// # Returns
    /// Number of soft references evicted
    pub fn on_cycle_complete(&self) -> usize {
        let evicted: usize = self
            .classes()
            .iter()
            .map(|class| class.on_cycle_complete().evicted)
            .sum();

        self.total_evicted.fetch_add(evicted, Ordering::Relaxed);
        self.cycles_completed.fetch_add(1, Ordering::Relaxed);
        evicted
    }

    /// Clear all tracked references to an object the host found unreachable.
    ///
    /// # Returns
    /// Number of references cleared by this call
    pub fn clear_refs_for_identity(&self, identity: IdentityToken) -> usize {
        let Some((_, refs)) = self.refs_by_identity.remove(&identity) else {
            return 0;
        };

        let cleared = refs
            .iter()
            .filter_map(Weak::upgrade)
            .map(ErasedReference::clear)
            .filter(|cleared| *cleared)
            .count();

        if cleared > 0 {
            self.total_cleared.fetch_add(cleared, Ordering::Relaxed);
        }
        tracing::trace!(%identity, cleared, "cleared references to unreachable object");
        cleared
    }

    /// Clear tracked weak references whose target has no strong owner left.
    ///
    /// Also drops bookkeeping for references that were released or cleared
    /// by other means.
    ///
    /// # Returns
    /// Number of references cleared by this sweep
    pub fn sweep(&self) -> usize {
        let mut cleared = 0;
        let mut emptied = Vec::new();

        for mut entry in self.refs_by_identity.iter_mut() {
            let identity = *entry.key();
            entry.value_mut().retain(|tracked| {
                let Some(reference) = tracked.upgrade() else {
                    return false;
                };
                if reference.is_cleared() {
                    return false;
                }
                if reference.target_reclaimed() {
                    if reference.clear() {
                        cleared += 1;
                    }
                    return false;
                }
                true
            });

            if entry.value().is_empty() {
                emptied.push(identity);
            }
        }

        // Remove empty entries; a concurrent `track` may have refilled one.
        for identity in emptied {
            self.refs_by_identity
                .remove_if(&identity, |_, refs| refs.is_empty());
        }
        self.instance_cache.retain(|_, cached| {
            cached
                .upgrade()
                .is_some_and(|cached| !cached.is_cleared())
        });

        if cleared > 0 {
            self.total_cleared.fetch_add(cleared, Ordering::Relaxed);
        }
        cleared
    }

    /// Run one full cycle: sweep unreachable references, then the soft heuristic
    pub fn collect(&self) -> CollectionReport {
        let cleared_unreachable = self.sweep();
        let evicted_soft = self.on_cycle_complete();

        tracing::debug!(
            cleared_unreachable,
            evicted_soft,
            tracked_objects = self.refs_by_identity.len(),
            "reference collection cycle complete"
        );

        CollectionReport {
            cleared_unreachable,
            evicted_soft,
        }
    }

    /// Number of tracked references pointing at `identity`
    pub fn refs_count_for_identity(&self, identity: IdentityToken) -> usize {
        self.refs_by_identity
            .get(&identity)
            .map(|refs| refs.len())
            .unwrap_or(0)
    }

    /// Start running [`ReferenceCollector::collect`] on a rayon worker.
    ///
    /// The worker runs a cycle every `collection_interval`, or sooner when
    /// [`ReferenceCollector::request_collection`] is called. It stops on
    /// [`ReferenceCollector::shutdown`] or once the collector is dropped.
    ///
    /// # Returns
    /// `false` if a background collector is already running
    pub fn start_background_collector(self: &Arc<Self>) -> bool {
        if self.background_running.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.shutdown.store(false, Ordering::Release);
        // Wake-ups left over from an earlier shutdown must not trigger a cycle.
        while self.wake_receiver.try_recv().is_ok() {}

        let collector = Arc::downgrade(self);
        let shutdown = Arc::clone(&self.shutdown);
        let wake_receiver = self.wake_receiver.clone();

        rayon::spawn(move || {
            tracing::debug!("background reference collector started");
            while !shutdown.load(Ordering::Acquire) {
                let interval = match collector.upgrade() {
                    Some(collector) => collector.config().collection_interval,
                    None => break,
                };

                match wake_receiver.recv_timeout(interval) {
                    Ok(()) | Err(flume::RecvTimeoutError::Timeout) => {}
                    Err(flume::RecvTimeoutError::Disconnected) => break,
                }
                if shutdown.load(Ordering::Acquire) {
                    break;
                }

                let Some(collector) = collector.upgrade() else {
                    break;
                };
                collector.collect();

                // Drain wake-ups that arrived during the cycle
                while wake_receiver.try_recv().is_ok() {}
            }

            if let Some(collector) = collector.upgrade() {
                collector
                    .background_running
                    .store(false, Ordering::Release);
            }
            tracing::debug!("background reference collector stopped");
        });
        true
    }

    /// Ask the background collector to run a cycle now
    pub fn request_collection(&self) {
        let _ = self.wake_sender.try_send(());
    }

    /// Whether a background collector is running
    pub fn is_background_running(&self) -> bool {
        self.background_running.load(Ordering::Acquire)
    }

    /// Stop the background collector after its current cycle
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
        let _ = self.wake_sender.try_send(());
    }

    /// Get statistics for this collector
    pub fn stats(&self) -> CollectorStats {
        CollectorStats {
            tracked_objects: self.refs_by_identity.len(),
            cached_instances: self.cached_instance_count(),
            live_instances: self.live_instances.load(Ordering::Relaxed),
            soft_classes: self.soft_classes.len(),
            total_tracked: self.total_tracked.load(Ordering::Relaxed),
            total_cleared: self.total_cleared.load(Ordering::Relaxed),
            total_evicted: self.total_evicted.load(Ordering::Relaxed),
            cycles_completed: self.cycles_completed.load(Ordering::Relaxed),
        }
    }

    /// Uncleared references currently held in the instance cache
    pub fn cached_instance_count(&self) -> usize {
        self.instance_cache
            .iter()
            .filter(|cached| {
                cached
                    .value()
                    .upgrade()
                    .is_some_and(|cached| !cached.is_cleared())
            })
            .count()
    }

    /// Wait until the background collector has stopped or `timeout` elapsed.
    ///
    /// A timeout too large for a deadline waits without one.
    pub fn wait_for_background_stop(&self, timeout: Duration) -> bool {
        let deadline = Instant::now().checked_add(timeout);
        while self.is_background_running() {
            if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                return false;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        true
    }
}

impl Default for ReferenceCollector {
    fn default() -> Self {
        // The default configuration always validates.
        match Self::new(ReferenceConfig::default()) {
            Ok(collector) => collector,
            Err(error) => unreachable!("default reference config rejected: {error}"),
        }
    }
}

impl Drop for ReferenceCollector {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// What one [`ReferenceCollector::collect`] cycle did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CollectionReport {
    /// Weak references cleared because their target lost all strong owners
    pub cleared_unreachable: usize,
    /// Soft references evicted by the heuristic
    pub evicted_soft: usize,
}

/// Statistics for a reference collector
#[derive(Debug, Clone)]
pub struct CollectorStats {
    /// Objects with at least one tracked reference
    pub tracked_objects: usize,
    /// Uncleared weak and soft references in the instance cache
    pub cached_instances: usize,
    /// Tracked references with at least one live handle, cleared or not
    pub live_instances: usize,
    /// Soft classes, the default one included
    pub soft_classes: usize,
    /// Total references tracked
    pub total_tracked: usize,
    /// Total references cleared as unreachable
    pub total_cleared: usize,
    /// Total soft references evicted
    pub total_evicted: usize,
    /// Completed cycles
    pub cycles_completed: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collector_creation() {
        let collector = ReferenceCollector::default();
        let stats = collector.stats();
        assert_eq!(stats.tracked_objects, 0);
        assert_eq!(stats.soft_classes, 1);
        assert_eq!(collector.default_soft_class().name(), DEFAULT_SOFT_CLASS);
        assert_eq!(collector.default_soft_class().ttl_default(), 10);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = ReferenceConfig {
            soft_ttl_default: 0,
            ..ReferenceConfig::default()
        };
        assert!(ReferenceCollector::new(config).is_err());
    }

    #[test]
    fn test_weak_references_are_tracked_by_identity() {
        let collector = ReferenceCollector::default();
        let object = Arc::new(1u32);
        let identity = IdentityToken::of(&object);

        let _weak = collector.weak(&object, None);
        let _soft = collector.soft(Arc::clone(&object), None);
        let _hard = collector.hard(Arc::clone(&object), None);

        assert_eq!(collector.refs_count_for_identity(identity), 2);
        assert_eq!(collector.stats().total_tracked, 2);
    }

    #[test]
    fn test_clear_refs_for_identity() {
        let collector = ReferenceCollector::default();
        let queue = ReferenceQueue::new();
        let object = Arc::new(7u32);
        let identity = IdentityToken::of(&object);

        let weak = collector.weak(&object, Some(&queue));
        let soft = collector.soft(Arc::clone(&object), Some(&queue));

        assert_eq!(collector.clear_refs_for_identity(identity), 2);
        assert!(weak.is_cleared());
        assert!(soft.is_cleared());
        assert_eq!(queue.len(), 2);
        assert_eq!(collector.clear_refs_for_identity(identity), 0);
    }

    #[test]
    fn test_sweep_clears_only_unreachable() {
        let collector = ReferenceCollector::default();
        let alive = Arc::new(1u32);
        let dead = Arc::new(2u32);

        let alive_ref = collector.weak(&alive, None);
        let dead_ref = collector.weak(&dead, None);
        drop(dead);

        assert_eq!(collector.sweep(), 1);
        assert!(!alive_ref.is_cleared());
        assert!(dead_ref.is_cleared());
        assert_eq!(collector.stats().tracked_objects, 1);
        assert_eq!(collector.sweep(), 0);
    }

    #[test]
    fn test_sweep_prunes_released_references() {
        let collector = ReferenceCollector::default();
        let object = Arc::new(1u32);
        let reference = collector.weak(&object, None);
        drop(reference);

        assert_eq!(collector.sweep(), 0);
        assert_eq!(collector.stats().tracked_objects, 0);
    }

    #[test]
    fn test_soft_reference_keeps_target_through_sweep() {
        let collector = ReferenceCollector::default();
        let soft = collector.soft(Arc::new(5u32), None);

        let report = collector.collect();
        assert_eq!(report.cleared_unreachable, 0);
        assert_eq!(report.evicted_soft, 0);
        assert_eq!(soft.get().as_deref(), Some(&5));
    }

    #[test]
    fn test_soft_class_get_or_create() {
        let collector = ReferenceCollector::default();
        let short = collector.soft_class("short", 2).unwrap();
        let again = collector.soft_class("short", 9).unwrap();

        assert!(Arc::ptr_eq(&short, &again));
        assert_eq!(again.ttl_default(), 2);
        assert!(collector.soft_class("broken", 0).is_err());
        assert_eq!(collector.stats().soft_classes, 2);
    }

    #[test]
    fn test_cycle_drives_every_class() {
        let collector = ReferenceCollector::default();
        let short = collector.soft_class("short", 1).unwrap();
        let evicted = collector.soft_in(&short, Arc::new(1u32), None).unwrap();
        let kept = collector.soft(Arc::new(2u32), None);

        assert_eq!(collector.on_cycle_complete(), 1);
        assert!(evicted.is_cleared());
        assert_eq!(kept.remaining_ttl(), Some(9));
        assert_eq!(collector.stats().total_evicted, 1);
    }

    #[test]
    fn test_heap_growth_reaches_every_class() {
        let collector = ReferenceCollector::default();
        let other = collector.soft_class("other", 4).unwrap();
        collector.on_heap_growth();

        assert_eq!(collector.default_soft_class().pending_memory_pressure(), 1);
        assert_eq!(other.pending_memory_pressure(), 1);
    }

    #[test]
    fn test_weak_reference_is_reused_per_object() {
        let collector = ReferenceCollector::default();
        let first_queue = ReferenceQueue::new();
        let second_queue = ReferenceQueue::new();
        let object = Arc::new(1u32);

        let first = collector.weak(&object, Some(&first_queue));
        let second = collector.weak(&object, Some(&second_queue));
        assert_eq!(first, second);
        assert_eq!(first.bound_queue_count(), 2);
        assert_eq!(collector.stats().total_tracked, 1);

        first.invalidate();
        assert_eq!(first_queue.pop_oldest(), Some(first.clone()));
        assert_eq!(second_queue.pop_oldest(), Some(first.clone()));

        // A cleared reference is replaced, not handed out again.
        let third = collector.weak(&object, None);
        assert_ne!(third, first);
        assert!(!third.is_cleared());
    }

    #[test]
    fn test_soft_reference_is_reused_per_class() {
        let collector = ReferenceCollector::default();
        let other = collector.soft_class("other", 4).unwrap();
        let object = Arc::new(2u32);

        let default_soft = collector.soft(Arc::clone(&object), None);
        assert_eq!(collector.soft(Arc::clone(&object), None), default_soft);

        let other_soft = collector.soft_in(&other, Arc::clone(&object), None).unwrap();
        assert_ne!(other_soft, default_soft);
        assert_eq!(other_soft.remaining_ttl(), Some(4));
        let weak = collector.weak(&object, None);
        assert_eq!(weak.strength(), Strength::Weak);
        assert_eq!(collector.stats().cached_instances, 3);
    }

    #[test]
    fn test_instance_counts() {
        let collector = ReferenceCollector::default();
        let object = Arc::new(3u32);

        let weak = collector.weak(&object, None);
        let soft = collector.soft(Arc::clone(&object), None);
        let stats = collector.stats();
        assert_eq!(stats.cached_instances, 2);
        assert_eq!(stats.live_instances, 2);

        // Cleared but still held: live, no longer cached.
        weak.invalidate();
        let stats = collector.stats();
        assert_eq!(stats.cached_instances, 1);
        assert_eq!(stats.live_instances, 2);

        drop(weak);
        drop(soft);
        collector.sweep();
        let stats = collector.stats();
        assert_eq!(stats.cached_instances, 0);
        assert_eq!(stats.live_instances, 0);
    }

    #[test]
    fn test_foreign_soft_class_rejected() {
        let collector = ReferenceCollector::default();
        let other = ReferenceCollector::default();
        let foreign = Arc::new(SoftReferenceRegistry::default());

        assert!(matches!(
            collector.soft_in(&foreign, Arc::new(1u8), None),
            Err(RefError::InvalidArgument(_))
        ));
        assert!(collector
            .soft_in(other.default_soft_class(), Arc::new(1u8), None)
            .is_err());
        assert_eq!(foreign.live_count(), 0);
    }

    #[test]
    fn test_wait_for_background_stop_without_deadline() {
        let collector = ReferenceCollector::default();
        assert!(collector.wait_for_background_stop(Duration::MAX));
    }

    #[test]
    fn test_restart_ignores_stale_wake_up() {
        let config = ReferenceConfig {
            collection_interval: Duration::from_secs(60),
            ..ReferenceConfig::default()
        };
        let collector = Arc::new(ReferenceCollector::new(config).unwrap());

        // Leaves a wake-up in the channel, as a shutdown racing the worker does.
        collector.shutdown();
        assert!(collector.start_background_collector());
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(collector.stats().cycles_completed, 0);

        collector.shutdown();
        assert!(collector.wait_for_background_stop(Duration::MAX));
        assert_eq!(collector.stats().cycles_completed, 0);
    }

    #[test]
    fn test_reconfigure_validates() {
        let collector = ReferenceCollector::default();
        let config = ReferenceConfig {
            collection_interval: Duration::from_millis(5),
            ..ReferenceConfig::default()
        };
        assert!(collector.reconfigure(config.clone()).is_ok());
        assert_eq!(*collector.config(), config);

        let broken = ReferenceConfig {
            collection_interval: Duration::ZERO,
            ..ReferenceConfig::default()
        };
        assert!(collector.reconfigure(broken).is_err());
        assert_eq!(*collector.config(), config);
    }
}
