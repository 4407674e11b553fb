//! Opaque per-account keys

use std::fmt;
use std::sync::Arc;

/// Number of leading characters shown when a key is displayed
const VISIBLE_PREFIX: usize = 8;

/// An opaque identifier for one recurring unit of work
///
/// Keys are credentials, so both `Display` and `Debug` redact everything past
/// the first few characters. Use [`Key::expose`] when the raw value is needed.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Key(Arc<str>);

impl Key {
    /// Create a key from its raw value
    pub fn new(value: impl Into<Arc<str>>) -> Self {
        Self(value.into())
    }

    /// The raw, unredacted value
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Redacted form used in logs and status output
    pub fn redacted(&self) -> String {
        let prefix: String = self.0.chars().take(VISIBLE_PREFIX).collect();
        if self.0.chars().count() > VISIBLE_PREFIX {
            format!("{}...", prefix)
        } else {
            prefix
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.redacted())
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Key").field(&self.redacted()).finish()
    }
}

impl From<&str> for Key {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}
