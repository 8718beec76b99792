//! Hard, weak and soft references with delivery queues
//!
//! This module implements the reference layer that sits between an
//! application and whatever decides object liveness.
//!
//! ## Features
//!
//! - **References**: one handle type with three strength contracts
//! - **Reference Queues**: thread-safe delivery of cleared references
//! - **Soft Registry**: ttl/memory-pressure eviction heuristic for soft references
//! - **Weak Identity Map**: identity-keyed map whose entries vanish with their keys

// Submodules
pub mod handle;
pub mod queue;
pub mod soft;
pub mod weak_identity_map;

// Re-export public APIs
pub use handle::{Reference, Strength};
pub use queue::{ReferenceQueue, ReferenceQueueStats};
pub use soft::{CycleReport, SoftReferenceRegistry, SoftRegistryStats};
pub use weak_identity_map::{WeakIdentityMap, WeakIdentityMapStats};
