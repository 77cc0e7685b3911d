//! Strongly-typed identifiers.
//!
//! All IDs are UUID-backed, allocated at construction time, and implement
//! common traits. Kernel registries are keyed by these IDs rather than by
//! object references, so holding an ID never keeps the referent alive.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Macro to define a strongly-typed UUID ID newtype wrapper.
///
/// Generates: struct, `new()` (UUID v4), `from_uuid()`, `as_uuid()`,
/// Display, Default, Serialize, Deserialize.
macro_rules! define_id {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(uuid::Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(uuid::Uuid::new_v4())
            }

            pub fn from_uuid(id: uuid::Uuid) -> Self {
                Self(id)
            }

            pub fn as_uuid(&self) -> &uuid::Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

define_id!(AgentId);
define_id!(ContextId);
define_id!(SpaceId);
