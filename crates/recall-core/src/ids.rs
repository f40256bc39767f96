use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Shared shape for every opaque entity id in the system: `<prefix>_<uuid>`.
///
/// Built by [`IdGenerator::new_id`]; never constructed directly outside
/// this module except when parsing ids that came back from a repository.
macro_rules! entity_id {
    ($name:ident, $prefix:literal) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(pub String);

        impl $name {
            /// Prefix used by [`IdGenerator::new_id`] for this entity kind.
            pub const PREFIX: &'static str = $prefix;

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }
    };
}

entity_id!(RecallSetId, "rs");
entity_id!(RecallPointId, "rp");
entity_id!(SessionId, "sess");
entity_id!(MessageId, "msg");
entity_id!(RabbitholeId, "rh");
entity_id!(OutcomeId, "out");

/// Generates entity ids. Injectable so tests can assert on deterministic
/// sequences instead of random UUIDs.
pub trait IdGenerator: Send + Sync {
    /// Return a fresh id string of the form `<prefix>_<uuid>`.
    fn new_id(&self, prefix: &str) -> String;
}

/// Default generator: UUIDv7 bodies (time-sortable, matching the teacher's
/// convention for ids that benefit from log-correlation ordering).
#[derive(Debug, Default, Clone, Copy)]
pub struct UuidGenerator;

impl IdGenerator for UuidGenerator {
    fn new_id(&self, prefix: &str) -> String {
        format!("{prefix}_{}", Uuid::now_v7())
    }
}
