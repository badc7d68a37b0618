//! The `NetMessage` envelope and its payload variants (source spec §3).
//!
//! Every on-wire message is a [`NetMessage`]: the common envelope fields
//! (`from`, `ts`, `seq`, `ttl`) plus a [`MessagePayload`] tagged by `t`.
//! Modeled as a Rust enum rather than a loosely-typed map so every dispatch
//! site is exhaustive — see the "Polymorphic envelopes" design note.

use serde::{Deserialize, Serialize};

use crate::ids::PlayerId;
use crate::state::{GlobalGameState, InventoryItem};

/// A position triple. `z` is optional on the wire and defaults to `0.0`
/// when absent; in memory it is always present.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
    #[serde(default)]
    pub z: f64,
}

/// A velocity triple, same wire convention as [`Position`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Velocity {
    pub x: f64,
    pub y: f64,
    #[serde(default)]
    pub z: f64,
}

/// One change within a [`StateDelta`]: a dot-separated path navigating
/// `GlobalGameState` (no array indices) and the value to overwrite its
/// leaf with.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DeltaChange {
    pub path: String,
    pub value: serde_json::Value,
}

/// An incremental update to the replicated state. Applying `changes[i]`
/// creates any missing intermediate mapping along `path`, then overwrites
/// the leaf with a deep copy of `value`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StateDelta {
    pub tick: u64,
    pub changes: Vec<DeltaChange>,
}

/// The envelope carried by every on-wire message: common fields plus the
/// type-tagged payload.
///
/// `ttl` is declared but never interpreted by this crate or by
/// `backbone-lib` — it is reserved, per the open question carried from the
/// source spec.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NetMessage {
    pub from: PlayerId,
    pub ts: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seq: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl: Option<u32>,
    #[serde(flatten)]
    pub payload: MessagePayload,
}

impl NetMessage {
    /// The routing class from source spec §4.7: `move`/`ping`/`pong` (or an
    /// explicit override elsewhere) go on the unreliable channel, anything
    /// else goes on the reliable one.
    pub fn is_unreliable_by_default(&self) -> bool {
        matches!(
            self.payload,
            MessagePayload::Move { .. } | MessagePayload::Ping | MessagePayload::Pong
        )
    }
}

/// The type-tagged payload of a [`NetMessage`], one variant per `t` value.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t")]
pub enum MessagePayload {
    #[serde(rename = "move")]
    Move {
        position: Position,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        velocity: Option<Velocity>,
    },
    #[serde(rename = "inventory")]
    Inventory { items: Vec<InventoryItem> },
    #[serde(rename = "transfer")]
    Transfer { to: PlayerId, item: InventoryItem },
    #[serde(rename = "state_full")]
    StateFull { state: GlobalGameState },
    #[serde(rename = "state_delta")]
    StateDelta { delta: StateDelta },
    #[serde(rename = "payload")]
    Payload {
        payload: serde_json::Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        channel: Option<String>,
    },
    /// Internal keep-alive probe. Never surfaced as an application event —
    /// the round-trip timestamp lives in the envelope's own `ts` field.
    #[serde(rename = "ping")]
    Ping,
    /// Internal keep-alive reply, echoing the `ts` of the `ping` it answers.
    #[serde(rename = "pong")]
    Pong,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_z_defaults_to_zero() {
        let parsed: Position = serde_json::from_str(r#"{"x":1.0,"y":2.0}"#).unwrap();
        assert_eq!(parsed, Position { x: 1.0, y: 2.0, z: 0.0 });
    }

    #[test]
    fn move_message_round_trips() {
        let msg = NetMessage {
            from: PlayerId::from("P"),
            ts: 1.0,
            seq: Some(2),
            ttl: None,
            payload: MessagePayload::Move {
                position: Position { x: 1.0, y: 2.0, z: 0.0 },
                velocity: None,
            },
        };
        let encoded = serde_json::to_string(&msg).unwrap();
        let decoded: NetMessage = serde_json::from_str(&encoded).unwrap();
        assert_eq!(msg, decoded);
    }

    #[test]
    fn unreliable_routing_covers_move_ping_pong() {
        let ping = NetMessage {
            from: PlayerId::from("P"),
            ts: 1.0,
            seq: None,
            ttl: None,
            payload: MessagePayload::Ping,
        };
        assert!(ping.is_unreliable_by_default());

        let inventory = NetMessage {
            from: PlayerId::from("P"),
            ts: 1.0,
            seq: None,
            ttl: None,
            payload: MessagePayload::Inventory { items: vec![] },
        };
        assert!(!inventory.is_unreliable_by_default());
    }
}
