//! The replicated game world: [`GlobalGameState`] and the entries it owns.
//!
//! Exactly one [`GlobalGameState`] exists per session, owned by the state
//! manager in `backbone-lib`. This crate only describes its shape; the
//! merge/apply rules live with the owner.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::ids::PlayerId;
use crate::message::{Position, Velocity};

/// A single player's replicated position/velocity.
///
/// Created by the first accepted move for that player or by a snapshot
/// merge; mutated by the conflict resolver and the movement integrator;
/// removed on explicit cleanup or snapshot overwrite.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PlayerState {
    pub position: Position,
    pub velocity: Option<Velocity>,
}

/// An inventory entry. An item with `quantity == 0` must be pruned —
/// callers are responsible for upholding this; the type itself does not
/// enforce it so that deserialized-but-not-yet-applied deltas can still be
/// represented.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InventoryItem {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub quantity: u32,
}

/// A free-form world object. `data` is intentionally opaque: the spec does
/// not constrain object payload shape, and path-based delta application
/// must be able to address into whatever nested structure a game puts
/// there.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GameObject {
    pub id: String,
    pub kind: String,
    pub data: serde_json::Value,
}

/// The single replicated world for a session.
///
/// Invariants (enforced by the owner, not by this type):
/// - `tick` is non-decreasing over the session's lifetime;
/// - `inventories[p]` never holds two entries with the same item id;
/// - `objects` is replaced wholesale on snapshot, addressed path-wise on
///   delta.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct GlobalGameState {
    pub players: HashMap<PlayerId, PlayerState>,
    pub inventories: HashMap<PlayerId, Vec<InventoryItem>>,
    pub objects: HashMap<String, GameObject>,
    pub tick: u64,
}
