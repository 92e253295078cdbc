//! Client wire protocol (§6). Every message is a JSON 2-element array
//! `[tag, payload]`. `serde`'s tagged-enum representations all produce a
//! JSON *object*, so each enum here gets a small hand-written
//! `Serialize`/`Deserialize` pair that encodes/decodes the literal tuple
//! shape via `(String, serde_json::Value)`.

use serde::de::Error as DeError;
use serde::ser::SerializeTuple;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::ids::{ClientGroupId, PokeId, QueryHash, WsId};
use crate::watermark::Watermark;

/// `{op: put|del, hash, ast?}` — one entry of a `desiredQueriesPatch` (§3, §6).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DesiredQueriesPatchOp {
    pub op: PatchOp,
    pub hash: QueryHash,
    /// Present for `put`, absent for `del`.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub ast: Option<sync_ql::Select>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatchOp {
    Put,
    Del,
}

/// A single client mutation carried in a `push` message. The mutagen
/// service that applies these is out of scope (§1); the Connection only
/// needs enough shape to forward it and report per-mutation failure (§4.I).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Mutation {
    pub id: u64,
    pub client_id: String,
    pub name: String,
    pub args: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MutationPush {
    pub client_group_id: ClientGroupId,
    pub mutations: Vec<Mutation>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChangeDesiredQueriesBody {
    desired_queries_patch: Vec<DesiredQueriesPatchOp>,
}

/// Upstream (client -> server) messages (§6).
#[derive(Debug, Clone, PartialEq)]
pub enum Upstream {
    Ping,
    Push(MutationPush),
    ChangeDesiredQueries { desired_queries_patch: Vec<DesiredQueriesPatchOp> },
    InitConnection { desired_queries_patch: Vec<DesiredQueriesPatchOp> },
}

impl Serialize for Upstream {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut tup = serializer.serialize_tuple(2)?;
        match self {
            Upstream::Ping => {
                tup.serialize_element("ping")?;
                tup.serialize_element(&serde_json::json!({}))?;
            }
            Upstream::Push(body) => {
                tup.serialize_element("push")?;
                tup.serialize_element(body)?;
            }
            Upstream::ChangeDesiredQueries { desired_queries_patch } => {
                tup.serialize_element("changeDesiredQueries")?;
                tup.serialize_element(&ChangeDesiredQueriesBody { desired_queries_patch: desired_queries_patch.clone() })?;
            }
            Upstream::InitConnection { desired_queries_patch } => {
                tup.serialize_element("initConnection")?;
                tup.serialize_element(&ChangeDesiredQueriesBody { desired_queries_patch: desired_queries_patch.clone() })?;
            }
        }
        tup.end()
    }
}

impl<'de> Deserialize<'de> for Upstream {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let (tag, payload): (String, serde_json::Value) = Deserialize::deserialize(deserializer)?;
        Ok(match tag.as_str() {
            "ping" => Upstream::Ping,
            "push" => Upstream::Push(serde_json::from_value(payload).map_err(DeError::custom)?),
            "changeDesiredQueries" => {
                let body: ChangeDesiredQueriesBody = serde_json::from_value(payload).map_err(DeError::custom)?;
                Upstream::ChangeDesiredQueries { desired_queries_patch: body.desired_queries_patch }
            }
            "initConnection" => {
                let body: ChangeDesiredQueriesBody = serde_json::from_value(payload).map_err(DeError::custom)?;
                Upstream::InitConnection { desired_queries_patch: body.desired_queries_patch }
            }
            other => return Err(DeError::custom(format!("unknown upstream tag: {other}"))),
        })
    }
}

/// `{op: put|del, entityType, entityID, value?}` (§6).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntitiesPatchOp {
    pub op: PatchOp,
    pub entity_type: String,
    pub entity_id: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub value: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorKind {
    InvalidMessage,
    InvalidPush,
    MutationFailed,
    Internal,
    /// A value fell outside the wire format's representable-integer range
    /// (§7 "Representability errors"): the specific poke failed, but the
    /// CVR still advanced past it.
    Representability,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Connected {
    pub wsid: WsId,
    pub timestamp: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PokeStartBody {
    pub poke_id: PokeId,
    pub base_cookie: Option<Watermark>,
    pub cookie: Watermark,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PokePartBody {
    pub poke_id: PokeId,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub clients_patch: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub last_mutation_id_changes: Option<std::collections::BTreeMap<String, u64>>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub desired_queries_patches: Option<std::collections::BTreeMap<String, Vec<DesiredQueriesPatchOp>>>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub entities_patch: Option<Vec<EntitiesPatchOp>>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub got_queries_patch: Option<Vec<DesiredQueriesPatchOp>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PokeEndBody {
    pub poke_id: PokeId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    pub kind: ErrorKind,
    pub detail: String,
}

/// Downstream (server -> client) messages (§6).
#[derive(Debug, Clone, PartialEq)]
pub enum Downstream {
    Connected(Connected),
    Pong,
    PokeStart(PokeStartBody),
    PokePart(PokePartBody),
    PokeEnd(PokeEndBody),
    Error(ErrorBody),
}

impl Downstream {
    pub fn error(kind: ErrorKind, detail: impl Into<String>) -> Self { Downstream::Error(ErrorBody { kind, detail: detail.into() }) }
}

impl Serialize for Downstream {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut tup = serializer.serialize_tuple(2)?;
        match self {
            Downstream::Connected(body) => {
                tup.serialize_element("connected")?;
                tup.serialize_element(body)?;
            }
            Downstream::Pong => {
                tup.serialize_element("pong")?;
                tup.serialize_element(&serde_json::json!({}))?;
            }
            Downstream::PokeStart(body) => {
                tup.serialize_element("pokeStart")?;
                tup.serialize_element(body)?;
            }
            Downstream::PokePart(body) => {
                tup.serialize_element("pokePart")?;
                tup.serialize_element(body)?;
            }
            Downstream::PokeEnd(body) => {
                tup.serialize_element("pokeEnd")?;
                tup.serialize_element(body)?;
            }
            Downstream::Error(body) => {
                tup.serialize_element("error")?;
                tup.serialize_element(body)?;
            }
        }
        tup.end()
    }
}

impl<'de> Deserialize<'de> for Downstream {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let (tag, payload): (String, serde_json::Value) = Deserialize::deserialize(deserializer)?;
        Ok(match tag.as_str() {
            "connected" => Downstream::Connected(serde_json::from_value(payload).map_err(DeError::custom)?),
            "pong" => Downstream::Pong,
            "pokeStart" => Downstream::PokeStart(serde_json::from_value(payload).map_err(DeError::custom)?),
            "pokePart" => Downstream::PokePart(serde_json::from_value(payload).map_err(DeError::custom)?),
            "pokeEnd" => Downstream::PokeEnd(serde_json::from_value(payload).map_err(DeError::custom)?),
            "error" => Downstream::Error(serde_json::from_value(payload).map_err(DeError::custom)?),
            other => return Err(DeError::custom(format!("unknown downstream tag: {other}"))),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upstream_ping_round_trips_as_tagged_tuple() {
        let msg = Upstream::Ping;
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json, serde_json::json!(["ping", {}]));
        let back: Upstream = serde_json::from_value(json).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn downstream_poke_start_round_trips() {
        let msg = Downstream::PokeStart(PokeStartBody {
            poke_id: Watermark::new("w1"),
            base_cookie: Some(Watermark::new("w0")),
            cookie: Watermark::new("w1"),
        });
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json[0], "pokeStart");
        let back: Downstream = serde_json::from_value(json).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn unknown_upstream_tag_is_rejected() {
        let json = serde_json::json!(["bogus", {}]);
        let result: Result<Upstream, _> = serde_json::from_value(json);
        assert!(result.is_err());
    }
}
