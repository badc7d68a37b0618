//! The wire-level vocabulary shared between every member of the workspace.
//! Kept free of any logic or I/O: `backbone-lib` and `relay-server` both
//! depend on this crate, so the shapes here have to stay consistent across
//! the whole mesh.

mod ids;
mod message;
mod relay;
mod state;

pub use ids::{compare_player_ids, PlayerId};
pub use message::{DeltaChange, MessagePayload, NetMessage, Position, StateDelta, Velocity};
pub use relay::{IceCandidateInit, JoinPayload, RelayEnvelope, RelayKind, RosterTag, RosterPush, SdpDescription, SdpType};
pub use state::{GameObject, GlobalGameState, InventoryItem, PlayerState};
