//! Core type definitions for entigraph.

use std::fmt;

/// Separator between type name and id in a storage key.
pub const KEY_SEPARATOR: char = '@';

/// Prefix marking engine bookkeeping keys.
pub const RESERVED_PREFIX: char = '_';

/// Returns whether a storage key is reserved for engine bookkeeping.
#[must_use]
pub fn is_reserved_key(key: &str) -> bool {
    key.starts_with(RESERVED_PREFIX)
}

/// Identity of a stored entity: its type name and id.
///
/// Renders as the storage key `"{type}@{id}"`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EntityKey {
    /// Entity type name.
    pub type_name: String,
    /// Entity id.
    pub id: String,
}

impl EntityKey {
    /// Creates a key from its parts.
    pub fn new(type_name: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            id: id.into(),
        }
    }

    /// Parses a storage key.
    ///
    /// Returns `None` for reserved keys and for keys that do not contain
    /// exactly one separator with non-empty parts on both sides.
    #[must_use]
    pub fn parse(key: &str) -> Option<Self> {
        if is_reserved_key(key) {
            return None;
        }
        let mut parts = key.split(KEY_SEPARATOR);
        let type_name = parts.next()?;
        let id = parts.next()?;
        if parts.next().is_some() || type_name.is_empty() || id.is_empty() {
            return None;
        }
        Some(Self::new(type_name, id))
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.type_name, KEY_SEPARATOR, self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_display() {
        let key = EntityKey::new("person", "1");
        assert_eq!(key.to_string(), "person@1");
    }

    #[test]
    fn key_parse_roundtrip() {
        let key = EntityKey::parse("Department@42").unwrap();
        assert_eq!(key.type_name, "Department");
        assert_eq!(key.id, "42");
    }

    #[test]
    fn key_parse_rejects_malformed() {
        assert!(EntityKey::parse("_next_id").is_none());
        assert!(EntityKey::parse("noseparator").is_none());
        assert!(EntityKey::parse("a@b@c").is_none());
        assert!(EntityKey::parse("@1").is_none());
        assert!(EntityKey::parse("person@").is_none());
    }

    #[test]
    fn reserved_keys() {
        assert!(is_reserved_key("_min_id"));
        assert!(!is_reserved_key("person@1"));
    }
}
