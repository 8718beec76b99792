//! Object and reference identities.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Stable identity of a shared object, independent of value equality.
///
/// The token is the address of the object's `Arc` allocation. It is unique
/// among objects that are alive at the same time and never keeps the object
/// alive.
///
/// # Examples
///
/// ```
/// use refqueue::IdentityToken;
/// use std::sync::Arc;
///
/// let a = Arc::new(String::from("same"));
/// let b = Arc::new(String::from("same"));
///
/// assert_eq!(IdentityToken::of(&a), IdentityToken::of(&Arc::clone(&a)));
/// assert_ne!(IdentityToken::of(&a), IdentityToken::of(&b));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct IdentityToken(usize);

impl IdentityToken {
    /// Identity of the object behind `object`
    pub fn of<T: ?Sized>(object: &Arc<T>) -> Self {
        IdentityToken(Arc::as_ptr(object) as *const () as usize)
    }

    /// Identity of the object behind a weak pointer, valid even if it died
    pub fn of_weak<T>(object: &std::sync::Weak<T>) -> Self {
        IdentityToken(object.as_ptr() as *const () as usize)
    }

    /// Raw address value, for logging
    pub fn as_usize(self) -> usize {
        self.0
    }
}

impl fmt::Display for IdentityToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Process-unique id of a reference handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ReferenceId(u64);

static NEXT_REFERENCE_ID: AtomicU64 = AtomicU64::new(1);

impl ReferenceId {
    pub(crate) fn next() -> Self {
        ReferenceId(NEXT_REFERENCE_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ReferenceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ref#{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_survives_target_drop() {
        let object = Arc::new(7u32);
        let weak = Arc::downgrade(&object);
        let token = IdentityToken::of(&object);
        drop(object);
        assert_eq!(IdentityToken::of_weak(&weak), token);
    }

    #[test]
    fn identity_ignores_value_equality() {
        let a = Arc::new(vec![1, 2, 3]);
        let b = Arc::new(vec![1, 2, 3]);
        assert_eq!(a, b);
        assert_ne!(IdentityToken::of(&a), IdentityToken::of(&b));
    }

    #[test]
    fn identity_display_is_hex() {
        let object = Arc::new(1u8);
        let token = IdentityToken::of(&object);
        assert_eq!(token.to_string(), format!("{:#x}", token.as_usize()));
    }

    #[test]
    fn reference_ids_are_unique_and_increasing() {
        let first = ReferenceId::next();
        let second = ReferenceId::next();
        assert!(second > first);
        assert_eq!(first.to_string(), format!("ref#{}", first.as_u64()));
    }
}
