//! Soft reference registry and eviction heuristic
//!
//! Each registry is one soft-reference class: every soft reference created
//! against it shares the class `ttl_default`. Once per collection cycle the
//! registry walks its live set:
//!
//! * references read since the previous cycle get their ttl reset,
//! * the rest lose `decrement` cycles of ttl,
//! * references whose ttl would reach zero are cleared.
//!
//! `decrement` is 1, plus half the average remaining ttl when the heap grew
//! since the previous cycle. Heap growth speeds decay up instead of evicting
//! everything at once.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use super::handle::{Decay, ErasedReference, Reference};
use crate::config::DEFAULT_SOFT_TTL;
use crate::error::{RefError, RefResult};

/// Entry count below which registration never prunes
const MIN_PRUNE_THRESHOLD: usize = 64;

struct RegistryState {
    /// Soft references registered with this class, held weakly
    entries: Vec<Weak<dyn ErasedReference>>,
    /// Registration prunes released entries once `entries` reaches this length
    prune_threshold: usize,
    /// Heap growth events since the last cycle
    pending_memory_pressure: u32,
}

impl RegistryState {
    fn reset_prune_threshold(&mut self) {
        self.prune_threshold = (self.entries.len() * 2).max(MIN_PRUNE_THRESHOLD);
    }
}

/// Book-keeping for all live soft references of one class.
///
/// Every mutation of the live set and of the pressure counter happens under
/// one lock, and cycles are mutually exclusive.
///
/// # Examples
///
/// ```
/// use refqueue::{Reference, SoftReferenceRegistry};
/// use std::sync::Arc;
///
/// let registry = SoftReferenceRegistry::new("images", 2).unwrap();
/// let soft = Reference::soft(Arc::new([0u8; 16]), &registry, None);
///
/// let report = registry.on_cycle_complete();
/// assert_eq!(report.decremented, 1);
/// assert_eq!(soft.remaining_ttl(), Some(1));
///
/// let report = registry.on_cycle_complete();
/// assert_eq!(report.evicted, 1);
/// assert!(soft.get().is_none());
/// ```
pub struct SoftReferenceRegistry {
    /// Class name for logging and statistics
    name: String,
    /// ttl every reference of this class starts with
    ttl_default: u32,
    state: Mutex<RegistryState>,
    /// Total soft references ever registered
    total_registered: AtomicUsize,
    /// Total soft references cleared by the heuristic
    total_evicted: AtomicUsize,
    /// Total heap growth events observed
    total_pressure_events: AtomicUsize,
    /// Completed heuristic cycles
    cycles_completed: AtomicU64,
}

impl SoftReferenceRegistry {
    /// Create a registry whose references start with `ttl_default` cycles.
    ///
    /// A zero ttl is rejected with [`RefError::InvalidArgument`].
    pub fn new(name: &str, ttl_default: u32) -> RefResult<Self> {
        if ttl_default == 0 {
            return Err(RefError::InvalidArgument(format!(
                "soft class {name}: ttl_default must be at least 1"
            )));
        }
        Ok(Self::with_ttl(name, ttl_default))
    }

    fn with_ttl(name: &str, ttl_default: u32) -> Self {
        Self {
            name: name.to_string(),
            ttl_default,
            state: Mutex::new(RegistryState {
                entries: Vec::new(),
                prune_threshold: MIN_PRUNE_THRESHOLD,
                pending_memory_pressure: 0,
            }),
            total_registered: AtomicUsize::new(0),
            total_evicted: AtomicUsize::new(0),
            total_pressure_events: AtomicUsize::new(0),
            cycles_completed: AtomicU64::new(0),
        }
    }

    /// Get the class name
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ttl_default(&self) -> u32 {
        self.ttl_default
    }

    pub(crate) fn register<T: Send + Sync + 'static>(&self, reference: &Reference<T>) {
        let mut state = self.state.lock();
        if state.entries.len() >= state.prune_threshold {
            state.entries.retain(|entry| entry.strong_count() > 0);
            state.reset_prune_threshold();
        }
        state.entries.push(reference.erased());
        drop(state);

        self.total_registered.fetch_add(1, Ordering::Relaxed);
    }

    /// Record one heap growth event. Safe to call from any thread at any time.
    pub fn on_heap_growth(&self) {
        let mut state = self.state.lock();
        state.pending_memory_pressure = state.pending_memory_pressure.saturating_add(1);
        drop(state);

        self.total_pressure_events.fetch_add(1, Ordering::Relaxed);
    }

    /// Heap growth events waiting for the next cycle
    pub fn pending_memory_pressure(&self) -> u32 {
        self.state.lock().pending_memory_pressure
    }

    /// Run the eviction heuristic once. Call after every collection cycle.
    pub fn on_cycle_complete(&self) -> CycleReport {
        let mut state = self.state.lock();

        // Drop entries whose reference was released or cleared elsewhere.
        let live: Vec<Arc<dyn ErasedReference>> = state
            .entries
            .iter()
            .filter_map(Weak::upgrade)
            .filter(|reference| !reference.is_cleared())
            .collect();

        let average_ttl = average_remaining_ttl(&live);
        let mut decrement = 1;
        if state.pending_memory_pressure > 0 {
            decrement += average_ttl / 2;
            state.pending_memory_pressure = 0;
        }

        let mut report = CycleReport {
            live_entries: live.len(),
            average_ttl,
            decrement,
            ..CycleReport::default()
        };

        let mut survivors = Vec::with_capacity(live.len());
        let mut expired = Vec::new();
        for reference in live {
            let decay = match reference.soft_state() {
                Some(soft) => soft.decay(self.ttl_default, decrement),
                None => continue,
            };
            match decay {
                Decay::Refreshed => {
                    report.refreshed += 1;
                    survivors.push(Arc::downgrade(&reference));
                }
                Decay::Decremented => {
                    report.decremented += 1;
                    survivors.push(Arc::downgrade(&reference));
                }
                Decay::Expired => expired.push(reference),
            }
        }
        state.entries = survivors;
        state.reset_prune_threshold();
        drop(state);

        // Expired references already left the live set; clearing them runs
        // target destructors and queue pushes, which must not hold our lock.
        for reference in expired {
            tracing::trace!(
                class = %self.name,
                reference = %reference.id(),
                identity = %reference.identity(),
                "soft reference evicted"
            );
            if reference.clear() {
                report.evicted += 1;
            }
        }

        self.total_evicted
            .fetch_add(report.evicted, Ordering::Relaxed);
        self.cycles_completed.fetch_add(1, Ordering::Relaxed);

        tracing::debug!(
            class = %self.name,
            live = report.live_entries,
            average_ttl = report.average_ttl,
            decrement = report.decrement,
            refreshed = report.refreshed,
            evicted = report.evicted,
            "soft reference cycle complete"
        );
        report
    }

    /// Number of registered soft references that are neither dropped nor cleared
    pub fn live_count(&self) -> usize {
        self.state
            .lock()
            .entries
            .iter()
            .filter_map(Weak::upgrade)
            .filter(|reference| !reference.is_cleared())
            .count()
    }

    /// Get statistics for this registry
    pub fn stats(&self) -> SoftRegistryStats {
        SoftRegistryStats {
            name: self.name.clone(),
            ttl_default: self.ttl_default,
            live_entries: self.live_count(),
            pending_memory_pressure: self.pending_memory_pressure(),
            total_registered: self.total_registered.load(Ordering::Relaxed),
            total_evicted: self.total_evicted.load(Ordering::Relaxed),
            total_pressure_events: self.total_pressure_events.load(Ordering::Relaxed),
            cycles_completed: self.cycles_completed.load(Ordering::Relaxed),
        }
    }
}

impl Default for SoftReferenceRegistry {
    fn default() -> Self {
        Self::with_ttl("default", DEFAULT_SOFT_TTL)
    }
}

impl std::fmt::Debug for SoftReferenceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SoftReferenceRegistry")
            .field("name", &self.name)
            .field("ttl_default", &self.ttl_default)
            .finish()
    }
}

/// Mean remaining ttl over `live`, or 1 when there is nothing to average
fn average_remaining_ttl(live: &[Arc<dyn ErasedReference>]) -> u32 {
    let (sum, count) = live
        .iter()
        .filter_map(|reference| reference.soft_state())
        .fold((0u64, 0u64), |(sum, count), soft| {
            (sum + u64::from(soft.remaining_ttl()), count + 1)
        });

    if count == 0 {
        1
    } else {
        (sum / count) as u32
    }
}

/// What one heuristic cycle did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Live soft references examined
    pub live_entries: usize,
    /// Mean remaining ttl before the cycle
    pub average_ttl: u32,
    /// ttl removed from each untraversed reference
    pub decrement: u32,
    /// References whose ttl was reset by traversal
    pub refreshed: usize,
    /// References that lost ttl but survived
    pub decremented: usize,
    /// References cleared by this cycle
    pub evicted: usize,
}

/// Statistics for a soft reference registry
#[derive(Debug, Clone)]
pub struct SoftRegistryStats {
    /// Class name
    pub name: String,
    /// ttl of the class
    pub ttl_default: u32,
    /// Soft references currently live
    pub live_entries: usize,
    /// Heap growth events not yet consumed by a cycle
    pub pending_memory_pressure: u32,
    /// Total soft references registered
    pub total_registered: usize,
    /// Total soft references evicted by the heuristic
    pub total_evicted: usize,
    /// Total heap growth events
    pub total_pressure_events: usize,
    /// Completed cycles
    pub cycles_completed: u64,
}
