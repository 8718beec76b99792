//! Reference handles and their strength contracts
//!
//! A [`Reference`] points at an `Arc`-shared target with one of three
//! strengths:
//!
//! - **Hard**: co-owns the target; cleared only by [`Reference::invalidate`].
//! - **Weak**: owns nothing; cleared once the last strong owner is gone.
//! - **Soft**: holds the target until the soft heuristic of its
//!   [`SoftReferenceRegistry`] decides it has gone stale.
//!
//! Clearing is one-way. The reference keeps its [`IdentityToken`] after
//! clearing and notifies every bound [`ReferenceQueue`] exactly once.

use std::any::Any;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock, Weak};

use parking_lot::Mutex;

use super::queue::{QueueShared, ReferenceQueue};
use super::soft::SoftReferenceRegistry;
use crate::error::{RefError, RefResult};
use crate::identity::{IdentityToken, ReferenceId};

/// How strongly a reference holds on to its target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Strength {
    /// Keeps the target alive until explicitly invalidated
    Hard,
    /// Cleared as soon as the target has no strong owner
    Weak,
    /// Keeps the target alive until the soft heuristic evicts it
    Soft,
}

enum Target<T> {
    Strong(Arc<T>),
    Weak(Weak<T>),
    Cleared,
}

/// Outcome of one heuristic step for a single soft reference
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Decay {
    Refreshed,
    Decremented,
    Expired,
}

/// Heuristic bookkeeping carried by soft references.
///
/// `traversed` is set lock-free by [`Reference::get`]; `remaining_ttl` is
/// only written by the owning registry while it holds its lock.
#[derive(Debug)]
pub(crate) struct SoftState {
    traversed: AtomicBool,
    remaining_ttl: AtomicU32,
}

impl SoftState {
    fn new(ttl_default: u32) -> Self {
        Self {
            traversed: AtomicBool::new(false),
            remaining_ttl: AtomicU32::new(ttl_default),
        }
    }

    fn mark_traversed(&self) {
        self.traversed.store(true, Ordering::Release);
    }

    pub(crate) fn traversed(&self) -> bool {
        self.traversed.load(Ordering::Acquire)
    }

    pub(crate) fn remaining_ttl(&self) -> u32 {
        self.remaining_ttl.load(Ordering::Acquire)
    }

    /// Apply one cycle. The traversal flag is consumed whatever the outcome.
    pub(crate) fn decay(&self, ttl_default: u32, decrement: u32) -> Decay {
        if self.traversed.swap(false, Ordering::AcqRel) {
            self.remaining_ttl.store(ttl_default, Ordering::Release);
            return Decay::Refreshed;
        }

        let remaining = self.remaining_ttl.load(Ordering::Acquire);
        if remaining > decrement {
            self.remaining_ttl
                .store(remaining - decrement, Ordering::Release);
            Decay::Decremented
        } else {
            self.remaining_ttl.store(0, Ordering::Release);
            Decay::Expired
        }
    }
}

pub(crate) struct ReferenceInner<T> {
    id: ReferenceId,
    identity: IdentityToken,
    strength: Strength,
    target: Mutex<Target<T>>,
    /// Bound queues, held weakly so a reference never pins a queue
    queues: Mutex<Vec<Weak<QueueShared<T>>>>,
    soft: Option<SoftState>,
    /// Live-instance counter of the collector that created this reference
    instances: OnceLock<Arc<AtomicUsize>>,
}

impl<T> ReferenceInner<T> {
    fn is_cleared(&self) -> bool {
        matches!(*self.target.lock(), Target::Cleared)
    }

    fn target_reclaimed(&self) -> bool {
        match &*self.target.lock() {
            Target::Weak(target) => target.strong_count() == 0,
            Target::Strong(_) | Target::Cleared => false,
        }
    }
}

impl<T> Drop for ReferenceInner<T> {
    fn drop(&mut self) {
        if let Some(instances) = self.instances.get() {
            instances.fetch_sub(1, Ordering::Relaxed);
        }
    }
}

/// Type-erased view used by registries that track references of any target type
pub(crate) trait ErasedReference: Send + Sync {
    fn id(&self) -> ReferenceId;
    fn identity(&self) -> IdentityToken;
    fn is_cleared(&self) -> bool;
    /// True when a weak target lost its last strong owner but was not cleared yet
    fn target_reclaimed(&self) -> bool;
    fn soft_state(&self) -> Option<&SoftState>;
    fn clear(self: Arc<Self>) -> bool;
    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

impl<T: Send + Sync + 'static> ErasedReference for ReferenceInner<T> {
    fn id(&self) -> ReferenceId {
        self.id
    }

    fn identity(&self) -> IdentityToken {
        self.identity
    }

    fn is_cleared(&self) -> bool {
        ReferenceInner::is_cleared(self)
    }

    fn target_reclaimed(&self) -> bool {
        ReferenceInner::target_reclaimed(self)
    }

    fn soft_state(&self) -> Option<&SoftState> {
        self.soft.as_ref()
    }

    fn clear(self: Arc<Self>) -> bool {
        Reference { inner: self }.clear()
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

/// Handle to a target object with a fixed [`Strength`].
///
/// Cloning a `Reference` yields another handle to the same reference; two
/// handles compare equal only if they denote the same reference.
///
/// # Examples
///
/// ```
/// use refqueue::{Reference, ReferenceQueue};
/// use std::sync::Arc;
///
/// let queue = ReferenceQueue::new();
/// let object = Arc::new(String::from("payload"));
/// let weak = Reference::weak(&object, Some(&queue));
///
/// assert_eq!(weak.get().as_deref().map(String::as_str), Some("payload"));
///
/// drop(object);
/// assert!(weak.get().is_none());
/// assert_eq!(queue.pop_oldest(), Some(weak));
/// ```
pub struct Reference<T> {
    inner: Arc<ReferenceInner<T>>,
}

impl<T: Send + Sync + 'static> Reference<T> {
    fn build(
        identity: IdentityToken,
        strength: Strength,
        target: Target<T>,
        soft: Option<SoftState>,
        queue: Option<&ReferenceQueue<T>>,
    ) -> Self {
        let reference = Self {
            inner: Arc::new(ReferenceInner {
                id: ReferenceId::next(),
                identity,
                strength,
                target: Mutex::new(target),
                queues: Mutex::new(Vec::new()),
                soft,
                instances: OnceLock::new(),
            }),
        };
        reference.bind_queue(queue);
        reference
    }

    /// Create a reference that co-owns `target`
    pub fn hard(target: Arc<T>, queue: Option<&ReferenceQueue<T>>) -> Self {
        let identity = IdentityToken::of(&target);
        Self::build(identity, Strength::Hard, Target::Strong(target), None, queue)
    }

    /// Create a reference that does not keep `target` alive
    pub fn weak(target: &Arc<T>, queue: Option<&ReferenceQueue<T>>) -> Self {
        let identity = IdentityToken::of(target);
        Self::build(
            identity,
            Strength::Weak,
            Target::Weak(Arc::downgrade(target)),
            None,
            queue,
        )
    }

    /// Create a soft reference governed by `registry`
    ///
    /// The reference starts with `remaining_ttl` equal to the registry's
    /// `ttl_default` and joins the registry's live set.
    ///
    /// # Examples
    ///
    /// ```
    /// use refqueue::{Reference, SoftReferenceRegistry};
    /// use std::sync::Arc;
    ///
    /// let registry = SoftReferenceRegistry::new("cache", 3).unwrap();
    /// let soft = Reference::soft(Arc::new(5u64), &registry, None);
    ///
    /// assert_eq!(soft.remaining_ttl(), Some(3));
    /// registry.on_cycle_complete();
    /// registry.on_cycle_complete();
    /// assert!(soft.get().is_some());
    /// registry.on_cycle_complete();
    /// registry.on_cycle_complete();
    /// assert!(soft.get().is_some());
    /// ```
    pub fn soft(
        target: Arc<T>,
        registry: &SoftReferenceRegistry,
        queue: Option<&ReferenceQueue<T>>,
    ) -> Self {
        let identity = IdentityToken::of(&target);
        let reference = Self::build(
            identity,
            Strength::Soft,
            Target::Strong(target),
            Some(SoftState::new(registry.ttl_default())),
            queue,
        );
        registry.register(&reference);
        reference
    }

    /// Create a reference from a possibly absent target.
    ///
    /// Returns [`RefError::InvalidArgument`] when `target` is `None`, or when
    /// a soft reference is requested without a registry.
    pub fn try_new(
        strength: Strength,
        target: Option<Arc<T>>,
        registry: Option<&SoftReferenceRegistry>,
        queue: Option<&ReferenceQueue<T>>,
    ) -> RefResult<Self> {
        let target = target.ok_or_else(RefError::absent_target)?;
        match strength {
            Strength::Hard => Ok(Self::hard(target, queue)),
            Strength::Weak => Ok(Self::weak(&target, queue)),
            Strength::Soft => {
                let registry = registry.ok_or_else(|| {
                    RefError::InvalidArgument("soft reference requires a registry".into())
                })?;
                Ok(Self::soft(target, registry, queue))
            }
        }
    }

    /// Create a weak reference from a `std::sync::Weak`.
    ///
    /// A `Weak` whose object is already gone has no target to refer to and
    /// is rejected with [`RefError::InvalidArgument`].
    pub fn from_weak(target: &Weak<T>, queue: Option<&ReferenceQueue<T>>) -> RefResult<Self> {
        let target = target.upgrade().ok_or_else(RefError::absent_target)?;
        Ok(Self::weak(&target, queue))
    }

    /// Get the target, or `None` once the reference is cleared
    ///
    /// Reading a soft reference marks it traversed, which makes it survive
    /// the next heuristic cycle. A weak reference whose target was reclaimed
    /// is cleared on the spot.
    pub fn get(&self) -> Option<Arc<T>> {
        let target = self.inner.target.lock();
        match &*target {
            Target::Strong(object) => {
                if let Some(soft) = &self.inner.soft {
                    soft.mark_traversed();
                }
                Some(Arc::clone(object))
            }
            Target::Weak(object) => {
                let upgraded = object.upgrade();
                if upgraded.is_none() {
                    drop(target);
                    self.clear();
                }
                upgraded
            }
            Target::Cleared => None,
        }
    }

    /// Bind `queue` so it receives this reference when it is cleared.
    ///
    /// Binding the same queue twice, passing `None`, or binding after the
    /// reference was cleared has no effect.
    pub fn bind_queue(&self, queue: Option<&ReferenceQueue<T>>) {
        let Some(queue) = queue else {
            return;
        };

        let mut queues = self.inner.queues.lock();
        if self.inner.is_cleared() {
            return;
        }
        queues.retain(|bound| bound.strong_count() > 0);
        let candidate = queue.downgrade();
        if !queues.iter().any(|bound| Weak::ptr_eq(bound, &candidate)) {
            queues.push(candidate);
        }
    }

    /// Number of live queues currently bound
    pub fn bound_queue_count(&self) -> usize {
        self.inner
            .queues
            .lock()
            .iter()
            .filter(|bound| bound.strong_count() > 0)
            .count()
    }

    /// Clear the target and notify bound queues.
    ///
    /// Returns `true` only for the call that performed the transition.
    pub(crate) fn clear(&self) -> bool {
        let previous = std::mem::replace(&mut *self.inner.target.lock(), Target::Cleared);
        if matches!(previous, Target::Cleared) {
            return false;
        }
        // Release a strong hold outside the target lock.
        drop(previous);

        let queues = std::mem::take(&mut *self.inner.queues.lock());
        tracing::trace!(
            reference = %self.inner.id,
            identity = %self.inner.identity,
            strength = ?self.inner.strength,
            queues = queues.len(),
            "reference cleared"
        );
        for queue in queues {
            if let Some(queue) = queue.upgrade() {
                queue.push(self.clone());
            }
        }
        true
    }

    /// Explicitly clear this reference, whatever its strength.
    ///
    /// This is the only way a hard reference is ever cleared. Returns `true`
    /// if this call cleared the reference, `false` if it was already clear.
    pub fn invalidate(&self) -> bool {
        self.clear()
    }

    pub(crate) fn erased(&self) -> Weak<dyn ErasedReference> {
        let erased: Arc<dyn ErasedReference> = self.inner.clone();
        Arc::downgrade(&erased)
    }

    /// Count this reference in `instances` until its last handle is dropped
    pub(crate) fn count_in(&self, instances: &Arc<AtomicUsize>) {
        if self.inner.instances.set(Arc::clone(instances)).is_ok() {
            instances.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Recover the typed handle; `None` if `erased` refers to another target type
    pub(crate) fn from_erased(erased: Arc<dyn ErasedReference>) -> Option<Self> {
        erased
            .into_any()
            .downcast::<ReferenceInner<T>>()
            .ok()
            .map(|inner| Self { inner })
    }
}

impl<T> Reference<T> {
    /// Process-unique id of this reference
    pub fn id(&self) -> ReferenceId {
        self.inner.id
    }

    /// Identity of the target captured at construction, kept after clearing
    pub fn identity(&self) -> IdentityToken {
        self.inner.identity
    }

    pub fn strength(&self) -> Strength {
        self.inner.strength
    }

    /// Whether the clear transition has happened
    pub fn is_cleared(&self) -> bool {
        self.inner.is_cleared()
    }

    /// Cycles left before an untraversed soft reference is evicted
    pub fn remaining_ttl(&self) -> Option<u32> {
        self.inner.soft.as_ref().map(SoftState::remaining_ttl)
    }

    /// Whether a soft reference was read since the last heuristic cycle
    pub fn traversed_since_last_cycle(&self) -> Option<bool> {
        self.inner.soft.as_ref().map(SoftState::traversed)
    }

    pub(crate) fn target_reclaimed(&self) -> bool {
        self.inner.target_reclaimed()
    }

    /// Whether the target is exactly `object`, compared by identity
    pub(crate) fn points_to(&self, object: &Arc<T>) -> bool {
        match &*self.inner.target.lock() {
            Target::Strong(target) => Arc::ptr_eq(target, object),
            Target::Weak(target) => std::ptr::eq(target.as_ptr(), Arc::as_ptr(object)),
            Target::Cleared => false,
        }
    }
}

impl<T> Clone for Reference<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> PartialEq for Reference<T> {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl<T> Eq for Reference<T> {}

impl<T> Hash for Reference<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.inner.id.hash(state);
    }
}

impl<T> fmt::Debug for Reference<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reference")
            .field("id", &self.inner.id)
            .field("strength", &self.inner.strength)
            .field("identity", &self.inner.identity)
            .field("cleared", &self.is_cleared())
            .finish()
    }
}
