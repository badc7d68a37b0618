//! Room/roster state the relay keeps for the signaling contract (reference
//! signaling-relay wire format). Generalizes the teacher's own
//! `to_host_sender`/`host_to_client_broadcaster` pair from "one host, many
//! clients" to "any player may target any other player": every participant
//! in a room gets its own outbox sender, and delivery is either targeted
//! (`to` present on the envelope) or a broadcast to the rest of the room.
//!
//! There is no `GameConfig.json`/room-capacity concept here — a full-mesh
//! room has no host to size a game around, so membership is unconditional.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use axum::extract::ws::Message;
use protocol::PlayerId;
use tokio::sync::{mpsc, Mutex};

/// One signaling room, keyed by `room_id` in [`AppState`].
#[derive(Default)]
pub struct Room {
    /// Every player id that has announced itself in this room.
    pub roster: HashSet<PlayerId>,
    /// Per-player outbox; a message addressed `to` a player is pushed here,
    /// a broadcast is pushed to every entry except the sender's.
    pub senders: HashMap<PlayerId, mpsc::UnboundedSender<Message>>,
}

impl Room {
    fn roster_vec(&self) -> Vec<PlayerId> {
        self.roster.iter().cloned().collect()
    }
}

/// Shared server state: one [`Room`] per active `room_id`.
#[derive(Default)]
pub struct AppState {
    pub rooms: Mutex<HashMap<String, Room>>,
}

impl AppState {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Adds `player_id` to `room_id`'s roster, creating the room if this is
    /// its first member. Returns the roster snapshot to push to the room.
    pub async fn join(
        &self,
        room_id: &str,
        player_id: PlayerId,
        outbox: mpsc::UnboundedSender<Message>,
    ) -> Vec<PlayerId> {
        let mut rooms = self.rooms.lock().await;
        let room = rooms.entry(room_id.to_string()).or_default();
        room.roster.insert(player_id.clone());
        room.senders.insert(player_id, outbox);
        room.roster_vec()
    }

    /// Removes `player_id` from `room_id`, dropping the room entirely once
    /// empty. Returns the remaining roster, or `None` if the room is gone.
    pub async fn leave(&self, room_id: &str, player_id: &PlayerId) -> Option<Vec<PlayerId>> {
        let mut rooms = self.rooms.lock().await;
        let room = rooms.get_mut(room_id)?;
        room.roster.remove(player_id);
        room.senders.remove(player_id);
        if room.roster.is_empty() {
            rooms.remove(room_id);
            return None;
        }
        Some(room.roster_vec())
    }

    /// Forwards `message` to one specific player in `room_id`. Silently
    /// does nothing if the room or the player is gone — a late ICE
    /// candidate arriving after its target already left is not this
    /// server's problem (malformed/undeliverable: silent drop).
    pub async fn send_to(&self, room_id: &str, to: &PlayerId, message: Message) {
        let rooms = self.rooms.lock().await;
        if let Some(sender) = rooms.get(room_id).and_then(|room| room.senders.get(to)) {
            let _ = sender.send(message);
        }
    }

    /// Broadcasts `message` to every socket in `room_id` except `from`.
    pub async fn broadcast_except(&self, room_id: &str, from: &PlayerId, message: Message) {
        let rooms = self.rooms.lock().await;
        if let Some(room) = rooms.get(room_id) {
            for (id, sender) in &room.senders {
                if id != from {
                    let _ = sender.send(message.clone());
                }
            }
        }
    }

    /// Broadcasts `message` to every socket in `room_id`, including the
    /// room member it originated from — used for the roster push on
    /// join/leave, since every member's view of the roster must agree.
    pub async fn broadcast_all(&self, room_id: &str, message: Message) {
        let rooms = self.rooms.lock().await;
        if let Some(room) = rooms.get(room_id) {
            for sender in room.senders.values() {
                let _ = sender.send(message.clone());
            }
        }
    }

    /// Diagnostic snapshot for the `/rooms` endpoint: `room_id` paired with
    /// its current player count.
    pub async fn room_counts(&self) -> Vec<(String, usize)> {
        let rooms = self.rooms.lock().await;
        rooms.iter().map(|(id, room)| (id.clone(), room.roster.len())).collect()
    }

    /// Drops any room whose every sender has already closed. A fallback
    /// cleanup for rooms that should have emptied out through normal
    /// disconnect handling but didn't (e.g. a task panicked mid-cleanup).
    pub async fn evict_dead_rooms(&self) {
        let mut rooms = self.rooms.lock().await;
        rooms.retain(|room_id, room| {
            let is_alive = room.senders.values().any(|sender| !sender.is_closed());
            if !is_alive {
                tracing::info!("Removing dead room: {}", room_id);
            }
            is_alive
        });
    }
}
