use serde::{Deserialize, Serialize};
use std::fmt;
use ulid::Ulid;

use crate::watermark::Watermark;

macro_rules! opaque_string_id {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn as_str(&self) -> &str { &self.0 }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{}", self.0) }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self { Self(s) }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self { Self(s.to_string()) }
        }
    };
}

/// Supplied by the client; identifies which View Syncer/CVR a connection
/// belongs to (§3 "CVR", §4.I `push`'s `clientGroupID` check).
opaque_string_id!(ClientGroupId);

/// Supplied by the client; one client group may contain several `ClientId`s
/// sharing a CVR (§3 `clients: map clientID -> ...`).
opaque_string_id!(ClientId);

/// The hash a client computes over a query AST; the CVR's `queries` map is
/// keyed by this (§3). The reserved value `"lmids"` names the internal
/// last-mutation-ID query (§3, §4.H).
opaque_string_id!(QueryHash);

pub const LMIDS_QUERY_HASH: &str = "lmids";

/// Assigned by the server at connection time, not supplied by the client —
/// this is what lets `initConnection` supersede a stale prior socket for
/// the same `ClientId` (§4.H).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WsId(Ulid);

impl WsId {
    pub fn new() -> Self { Self(Ulid::new()) }
}

impl Default for WsId {
    fn default() -> Self { Self::new() }
}

impl fmt::Display for WsId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{}", self.0) }
}

/// A poke is identified by the upstream state version it corresponds to
/// (§4.H step 3d: `pokeStart{pokeID=v, ...}`) — not a separately minted id.
pub type PokeId = Watermark;
