//! Typed ID definitions.
//!
//! Context IDs are ULID-based for sortability and uniqueness. Handles are
//! small integers allocated sequentially by the context that owns them.

use std::fmt;
use std::str::FromStr;

use ulid::Ulid;

use crate::IdError;

// =============================================================================
// Instantiation Contexts
// =============================================================================

/// Identifier of one persisted instantiation context, `ctx_<ulid>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ContextId(Ulid);

impl ContextId {
    pub const PREFIX: &'static str = "ctx";

    /// A fresh, time-ordered ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }

    #[must_use]
    pub const fn ulid(&self) -> Ulid {
        self.0
    }

    /// Parse `ctx_<ulid>`. Any other prefix is rejected.
    pub fn parse(s: &str) -> Result<Self, IdError> {
        if s.is_empty() {
            return Err(IdError::Empty);
        }
        let (prefix, raw) = s.split_once('_').ok_or(IdError::MissingSeparator)?;
        if prefix != Self::PREFIX {
            return Err(IdError::InvalidPrefix {
                expected: Self::PREFIX,
                actual: prefix.to_string(),
            });
        }
        raw.parse::<Ulid>()
            .map(Self)
            .map_err(|e| IdError::InvalidUlid(e.to_string()))
    }
}

impl Default for ContextId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", Self::PREFIX, self.0)
    }
}

impl FromStr for ContextId {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl serde::Serialize for ContextId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> serde::Deserialize<'de> for ContextId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}

// =============================================================================
// Context Node Handles
// =============================================================================

/// Handle of a node inside one persisted context tree.
///
/// Handles are issued by the context when a node is created and are never
/// reused within that context. A handle from one context means nothing in
/// another.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Handle(u64);

impl Handle {
    /// The handle of the context root.
    pub const ROOT: Self = Self(0);

    /// Creates a handle from its raw value.
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the underlying value.
    #[must_use]
    pub const fn value(&self) -> u64 {
        self.0
    }

    /// Returns the handle that follows this one in allocation order.
    #[must_use]
    pub const fn next(&self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Handle {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(IdError::Empty);
        }
        s.parse::<u64>()
            .map(Self)
            .map_err(|_| IdError::InvalidHandle(s.to_string()))
    }
}

impl From<u64> for Handle {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}

impl From<Handle> for u64 {
    fn from(handle: Handle) -> Self {
        handle.0
    }
}

impl serde::Serialize for Handle {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_u64(self.0)
    }
}

impl<'de> serde::Deserialize<'de> for Handle {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = u64::deserialize(deserializer)?;
        Ok(Self(raw))
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_id_roundtrip() {
        let id = ContextId::new();
        let s = id.to_string();
        let parsed: ContextId = s.parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_context_id_prefix() {
        let id = ContextId::new();
        assert!(id.to_string().starts_with("ctx_"));
    }

    #[test]
    fn test_context_id_invalid_prefix() {
        let result: Result<ContextId, _> = "app_01HV4Z2WQXKJNM8GPQY6VBKC3D".parse();
        assert!(matches!(
            result.unwrap_err(),
            crate::IdError::InvalidPrefix { .. }
        ));
    }

    #[test]
    fn test_context_id_missing_separator() {
        let result: Result<ContextId, _> = "ctx01HV4Z2WQXKJNM8GPQY6VBKC3D".parse();
        assert!(matches!(
            result.unwrap_err(),
            crate::IdError::MissingSeparator
        ));
    }

    #[test]
    fn test_context_id_empty() {
        let result: Result<ContextId, _> = "".parse();
        assert!(result.unwrap_err().is_empty());
    }

    #[test]
    fn test_context_id_invalid_ulid() {
        let result: Result<ContextId, _> = "ctx_invalid".parse();
        assert!(matches!(
            result.unwrap_err(),
            crate::IdError::InvalidUlid(_)
        ));
    }

    #[test]
    fn test_context_id_json_is_plain_string() {
        let id = ContextId::new();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{id}\""));
        let parsed: ContextId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_context_ids_distinct() {
        let a = ContextId::new();
        let b = ContextId::new();
        assert_ne!(a, b);
    }

    #[test]
    fn test_handle_next_and_parse() {
        let root = Handle::ROOT;
        assert_eq!(root.value(), 0);
        assert_eq!(root.next().value(), 1);
        assert_eq!("42".parse::<Handle>().unwrap(), Handle::new(42));
        assert!(matches!(
            "x".parse::<Handle>().unwrap_err(),
            crate::IdError::InvalidHandle(_)
        ));
    }
}
