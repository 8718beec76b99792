//! Error types for reference construction and lookup.

use thiserror::Error;

/// Errors raised at the call boundary of the reference layer.
///
/// Clearing and eviction are state transitions, not errors: a cleared
/// reference answers `None` from [`Reference::get`](crate::Reference::get)
/// instead of failing.
///
/// # Examples
///
/// ```
/// use refqueue::{RefError, RefResult};
///
/// let error = RefError::InvalidArgument("reference target is absent".into());
/// assert_eq!(
///     error.to_string(),
///     "Invalid argument: reference target is absent"
/// );
///
/// let success: RefResult<u32> = Ok(42);
/// assert!(success.is_ok());
/// ```
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RefError {
    /// A reference target or map key was absent or already reclaimed
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

impl RefError {
    pub(crate) fn absent_target() -> Self {
        RefError::InvalidArgument("reference target is absent".into())
    }
}

/// Result type for reference operations
pub type RefResult<T> = Result<T, RefError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_formats_readable_messages() {
        let cases = [
            (
                RefError::InvalidArgument("ttl must be at least 1".into()),
                "Invalid argument: ttl must be at least 1",
            ),
            (
                RefError::absent_target(),
                "Invalid argument: reference target is absent",
            ),
        ];

        for (error, expected) in cases {
            assert_eq!(error.to_string(), expected);
        }
    }

    #[test]
    fn ref_result_alias_behaves_like_result() {
        fn take_result(value: RefResult<usize>) -> usize {
            value.unwrap_or_default()
        }

        assert_eq!(take_result(Ok(42)), 42);
        assert_eq!(take_result(Err(RefError::absent_target())), 0);
    }
}
