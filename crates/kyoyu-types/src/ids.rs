//! Typed identifiers for principals and records.
//!
//! Both wrap UUIDv7 (time-ordered, globally unique). They are opaque to the
//! core: the store hands them out, the core only compares and hashes them.
//! The `short()` form (first 8 hex chars) is for human-facing output and is
//! never used as a lookup key.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A principal (signed-in user) identifier.
#[derive(Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PrincipalId(uuid::Uuid);

/// A record identifier, stable for the lifetime of a task or finance entry.
#[derive(Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(uuid::Uuid);

macro_rules! impl_typed_id {
    ($T:ident, $name:literal) => {
        impl $T {
            /// Create a new time-ordered ID (UUIDv7).
            pub fn new() -> Self {
                Self(uuid::Uuid::now_v7())
            }

            /// First 8 hex characters. Display only.
            pub fn short(&self) -> String {
                self.0.as_simple().to_string()[..8].to_string()
            }

            /// Parse from a hex string (32 chars, no hyphens) or standard UUID format.
            pub fn parse(s: &str) -> Result<Self, uuid::Error> {
                uuid::Uuid::parse_str(s).map(Self)
            }

            /// Check if a query string matches this ID by hex prefix.
            pub fn matches_hex_prefix(&self, prefix: &str) -> bool {
                self.0.as_simple().to_string().starts_with(prefix)
            }

            /// The nil ID. Never handed out by a store.
            pub fn nil() -> Self {
                Self(uuid::Uuid::nil())
            }

            pub fn is_nil(&self) -> bool {
                self.0.is_nil()
            }
        }

        impl Default for $T {
            fn default() -> Self {
                Self::new()
            }
        }

        impl From<uuid::Uuid> for $T {
            fn from(u: uuid::Uuid) -> Self {
                Self(u)
            }
        }

        impl From<$T> for uuid::Uuid {
            fn from(id: $T) -> uuid::Uuid {
                id.0
            }
        }

        impl std::str::FromStr for $T {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::parse(s)
            }
        }

        impl fmt::Display for $T {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl fmt::Debug for $T {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", $name, self.short())
            }
        }
    };
}

impl_typed_id!(PrincipalId, "PrincipalId");
impl_typed_id!(RecordId, "RecordId");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_unique_and_ordered() {
        let a = RecordId::new();
        let b = RecordId::new();
        assert_ne!(a, b);
        assert!(a < b, "UUIDv7 ids should sort by creation time");
    }

    #[test]
    fn test_parse_accepts_display_and_hex_forms() {
        let id = PrincipalId::new();
        assert_eq!(PrincipalId::parse(&id.to_string()).unwrap(), id);

        let hex = uuid::Uuid::from(id).as_simple().to_string();
        assert_eq!(hex.parse::<PrincipalId>().unwrap(), id);
    }

    #[test]
    fn test_short_is_prefix() {
        let id = RecordId::new();
        assert_eq!(id.short().len(), 8);
        assert!(id.matches_hex_prefix(&id.short()));
        assert!(!id.matches_hex_prefix("zz"));
    }

    #[test]
    fn test_nil() {
        assert!(PrincipalId::nil().is_nil());
        assert!(!PrincipalId::new().is_nil());
    }

    #[test]
    fn test_debug_is_terse() {
        let id = RecordId::new();
        assert_eq!(format!("{id:?}"), format!("RecordId({})", id.short()));
    }

    #[test]
    fn test_json_is_transparent() {
        let id = PrincipalId::new();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{id}\""));
    }
}
