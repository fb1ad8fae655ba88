//! Identifiers shared by every component of a node.
//!
//! `node_id`, `conn_id` and `msg_id` are all 128-bit UUIDs in canonical
//! 36-char dashed form, but they are kept as distinct newtypes so that a
//! mismatch (passing a `ConnId` where a `NodeId` is expected) is caught at
//! compile time rather than at a `from.node_id == from.conn_id` runtime
//! check.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Namespace under which a configured textual `node_identifier` is turned
/// into a deterministic `node_id` via UUIDv5.
pub const PAN_NAMESPACE: Uuid = Uuid::from_bytes([
    0x21, 0x9d, 0xd2, 0x4f, 0x63, 0xc4, 0x5e, 0x35, 0xb8, 0x86, 0xda, 0x1b, 0x21, 0xec, 0xc0, 0xe0,
]);

macro_rules! uuid_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            /// Mint a fresh random identifier.
            pub fn new_random() -> Self {
                Self(Uuid::new_v4())
            }

            /// The all-zero identifier, the only legal `from` value on an
            /// unauthenticated frame.
            pub const NULL: $name = $name(Uuid::nil());

            pub fn is_null(&self) -> bool {
                self.0.is_nil()
            }

            pub fn as_uuid(&self) -> Uuid {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Display::fmt(&self.0, f)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(Uuid::parse_str(s)?))
            }
        }

        impl From<Uuid> for $name {
            fn from(u: Uuid) -> Self {
                Self(u)
            }
        }
    };
}

uuid_newtype!(NodeId);
uuid_newtype!(ConnId);
uuid_newtype!(MsgId);

impl MsgId {
    /// Fresh identifier for an outbound frame.
    pub fn generate() -> Self {
        Self::new_random()
    }
}

impl NodeId {
    /// Derive a stable id from a configured textual identifier.
    pub fn derive_from(node_identifier: &str) -> Self {
        Self(Uuid::new_v5(&PAN_NAMESPACE, node_identifier.as_bytes()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_id_is_nil_uuid() {
        assert!(ConnId::NULL.is_null());
        assert_eq!(ConnId::NULL.to_string().chars().filter(|&c| c == '0').count(), 32);
    }

    #[test]
    fn derivation_is_deterministic() {
        let a = NodeId::derive_from("edge-01");
        let b = NodeId::derive_from("edge-01");
        let c = NodeId::derive_from("edge-02");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn derivation_matches_the_spec_namespace() {
        // Pinned against a UUIDv5 computed independently with namespace
        // `219dd24f-63c4-5e35-b886-da1b21ecc0e0` (spec.md §3) and name
        // "x", so a wrong namespace byte breaks this test even though
        // `derivation_is_deterministic` above would not catch it.
        let id = NodeId::derive_from("x");
        assert_eq!(id.to_string(), "62d1598e-033c-53f2-8a11-68d0771cfb14");
    }

    #[test]
    fn roundtrips_through_display_and_parse() {
        let id = ConnId::new_random();
        let parsed: ConnId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }
}
