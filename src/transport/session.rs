//! Transport session identity.

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use std::sync::atomic::{AtomicU64, Ordering};

/// Number of random bytes in a generated id (20 base64 characters).
const ID_BYTES: usize = 15;

static FALLBACK_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Identity of one transport session.
///
/// Handles and registry entries are keyed on this value, never on object
/// identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(String);

impl SessionId {
    /// Wrap an id assigned by the transport.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh random id.
    ///
    /// Falls back to system time mixed with a process counter if getrandom fails.
    #[must_use]
    pub fn generate() -> Self {
        let mut buf = [0u8; ID_BYTES];
        if getrandom::getrandom(&mut buf).is_err() {
            use std::time::{SystemTime, UNIX_EPOCH};
            let nanos = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_nanos() as u64)
                .unwrap_or(0x1234_5678);
            let count = FALLBACK_COUNTER.fetch_add(1, Ordering::Relaxed);
            buf[..8].copy_from_slice(&nanos.to_le_bytes());
            buf[8..].copy_from_slice(&count.to_le_bytes()[..ID_BYTES - 8]);
        }
        Self(URL_SAFE_NO_PAD.encode(buf))
    }

    /// The id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_generated_length() {
        let id = SessionId::generate();
        assert_eq!(id.as_str().len(), 20);
    }

    #[test]
    fn test_generated_ids_are_url_safe() {
        let id = SessionId::generate();
        assert!(
            id.as_str()
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        );
    }

    #[test]
    fn test_generated_ids_are_unique() {
        let ids: HashSet<_> = (0..1000).map(|_| SessionId::generate()).collect();
        assert_eq!(ids.len(), 1000);
    }

    #[test]
    fn test_display() {
        assert_eq!(SessionId::from("abc").to_string(), "abc");
    }
}
