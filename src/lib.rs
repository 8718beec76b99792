//! Hard, weak and soft references with thread-safe reference queues
//!
//! - [`Reference`]: one handle type with three strength contracts
//! - [`ReferenceQueue`]: receives references at the moment they are cleared
//! - [`SoftReferenceRegistry`]: ttl and memory-pressure eviction for soft references
//! - [`WeakIdentityMap`]: identity-keyed map whose entries vanish with their keys
//! - [`ReferenceCollector`]: tracks references by identity and drives cycles
//!
//! # Examples
//!
//! ```
//! use refqueue::{ReferenceCollector, ReferenceQueue};
//! use std::sync::Arc;
//!
//! let collector = ReferenceCollector::default();
//! let queue = ReferenceQueue::new();
//!
//! let cached = collector.soft(Arc::new(vec![0u8; 64]), Some(&queue));
//! for _ in 0..10 {
//!     collector.collect();
//! }
//!
//! // Untouched for ten cycles: evicted and delivered.
//! assert!(cached.get().is_none());
//! assert_eq!(queue.pop_oldest(), Some(cached));
//! ```

pub mod collector;
pub mod config;
pub mod error;
pub mod identity;
pub mod reference;

pub use collector::{CollectionReport, CollectorStats, ReferenceCollector, DEFAULT_SOFT_CLASS};
pub use config::ReferenceConfig;
pub use error::{RefError, RefResult};
pub use identity::{IdentityToken, ReferenceId};
pub use reference::{
    CycleReport, Reference, ReferenceQueue, ReferenceQueueStats, SoftReferenceRegistry,
    SoftRegistryStats, Strength, WeakIdentityMap, WeakIdentityMapStats,
};
