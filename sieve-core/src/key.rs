//! Store keys for filter sets and ephemeral candidate sets.
//!
//! A `SetKey` can only be built through its constructors, so every key that
//! reaches a store has been validated and every filter set lives under the
//! `idx_` prefix.

use std::fmt;

use uuid::Uuid;

use crate::error::StoreError;

/// Prefix of every persisted filter set.
pub const INDEX_KEY_PREFIX: &str = "idx_";

/// A validated key naming one set in the store.
///
/// Any non-empty UTF-8 string is a valid key. Filter arguments are free-form,
/// so keys may be long and may contain control characters; backends with key
/// size or alphabet limits map keys to their own row layout.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SetKey {
    inner: String,
}

impl SetKey {
    /// Key of the persisted set for a filter with the given derived name.
    ///
    /// Never empty, so it always satisfies [`SetKey::parse`].
    pub fn index(filter_name: &str) -> Self {
        Self {
            inner: format!("{}{}", INDEX_KEY_PREFIX, filter_name),
        }
    }

    /// Fresh, collision-resistant key for a transient candidate set.
    pub fn ephemeral(prefix: &str) -> Self {
        Self {
            inner: format!("{}{}", prefix, Uuid::new_v4().simple()),
        }
    }

    /// Validate an arbitrary key string.
    pub fn parse(raw: &str) -> Result<Self, StoreError> {
        if raw.is_empty() {
            return Err(StoreError::InvalidKey {
                key: raw.to_string(),
                reason: "key must not be empty".to_string(),
            });
        }
        Ok(Self {
            inner: raw.to_string(),
        })
    }

    /// The key as stored.
    pub fn as_str(&self) -> &str {
        &self.inner
    }

    /// True for keys under [`INDEX_KEY_PREFIX`].
    pub fn is_index(&self) -> bool {
        self.inner.starts_with(INDEX_KEY_PREFIX)
    }
}

impl fmt::Display for SetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.inner)
    }
}

impl AsRef<str> for SetKey {
    fn as_ref(&self) -> &str {
        &self.inner
    }
}
