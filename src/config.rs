//! Tunables for the reference layer.

use std::time::Duration;

use crate::error::{RefError, RefResult};

/// Default number of collection cycles an untraversed soft reference survives.
pub const DEFAULT_SOFT_TTL: u32 = 10;

/// Default pause between background collection cycles.
pub const DEFAULT_COLLECTION_INTERVAL: Duration = Duration::from_millis(100);

/// Configuration for a [`ReferenceCollector`](crate::ReferenceCollector).
///
/// # Examples
///
/// ```
/// use refqueue::ReferenceConfig;
/// use std::time::Duration;
///
/// let default_config = ReferenceConfig::default();
/// assert_eq!(default_config.soft_ttl_default, 10);
///
/// let custom_config = ReferenceConfig {
///     soft_ttl_default: 4,
///     collection_interval: Duration::from_millis(20),
/// };
/// assert!(custom_config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceConfig {
    /// ttl given to soft references of the default class
    pub soft_ttl_default: u32,
    /// How long the background collector waits between cycles
    pub collection_interval: Duration,
}

impl ReferenceConfig {
    /// Reject configurations the heuristic cannot run with.
    pub fn validate(&self) -> RefResult<()> {
        if self.soft_ttl_default == 0 {
            return Err(RefError::InvalidArgument(
                "soft_ttl_default must be at least 1".into(),
            ));
        }
        if self.collection_interval.is_zero() {
            return Err(RefError::InvalidArgument(
                "collection_interval must be non-zero".into(),
            ));
        }
        Ok(())
    }
}

impl Default for ReferenceConfig {
    fn default() -> Self {
        Self {
            soft_ttl_default: DEFAULT_SOFT_TTL,
            collection_interval: DEFAULT_COLLECTION_INTERVAL,
        }
    }
}
