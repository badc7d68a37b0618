//! Owns the single [`GlobalGameState`] and the per-sender sequence
//! high-water marks (source spec §4.4). The only component allowed to
//! mutate the replicated state.

use std::collections::HashMap;

use protocol::{GlobalGameState, InventoryItem, MessagePayload, NetMessage, PlayerId, StateDelta};

use crate::config::ConflictResolution;
use crate::conflict_resolver;
use crate::event_bus::Event;
use crate::validator;

/// The outcome of handing one envelope to [`StateManager::handle`], used by
/// the session facade to decide which bus event (if any) to emit. `None`
/// covers every silent-drop path (malformed, stale, or policy-rejected).
pub enum Outcome {
    PlayerMove { peer: PlayerId },
    InventoryUpdate { peer: PlayerId },
    ObjectTransfer { from: PlayerId, to: PlayerId, item: InventoryItem },
    SharedPayload { from: PlayerId, payload: serde_json::Value, channel: Option<String> },
    StateSync { tick: u64 },
    StateDelta { tick: u64 },
}

impl Outcome {
    pub fn into_event(self) -> Event {
        match self {
            Outcome::PlayerMove { peer } => Event::PlayerMove { peer },
            Outcome::InventoryUpdate { peer } => Event::InventoryUpdate { peer },
            Outcome::ObjectTransfer { from, to, item } => Event::ObjectTransfer { from, to, item },
            Outcome::SharedPayload { from, payload, channel } => {
                Event::SharedPayload { from, payload, channel }
            }
            Outcome::StateSync { tick } => Event::StateSync { tick },
            Outcome::StateDelta { tick } => Event::StateDelta { tick },
        }
    }
}

pub struct StateManager {
    state: GlobalGameState,
    last_applied_seq: HashMap<PlayerId, u64>,
    local_id: PlayerId,
    debug_enabled: bool,
}

impl StateManager {
    pub fn new(local_id: PlayerId, debug_enabled: bool) -> Self {
        Self {
            state: GlobalGameState::default(),
            last_applied_seq: HashMap::new(),
            local_id,
            debug_enabled,
        }
    }

    /// A deep copy of the replicated state, safe for the caller to mutate
    /// freely.
    pub fn snapshot(&self) -> GlobalGameState {
        self.state.clone()
    }

    /// Closes the initial-join window: called once the facade has
    /// broadcast a sequenced local move, so a later host-migration
    /// `state_full` no longer counts as the local player's first join and
    /// must not roll back the local live view (source spec §4.4).
    ///
    /// `last_applied_seq` is otherwise only written from `handle()`, keyed
    /// by an inbound envelope's `from` — but anti-spoofing means no inbound
    /// envelope ever carries `from == local_id`, and outbound local moves
    /// bypass `handle()` entirely (they mutate state directly and are only
    /// broadcast). Without this call the local id would never appear in the
    /// map and `state_full` would keep rolling back the local player
    /// forever, never just on initial join.
    pub fn note_local_move_sent(&mut self) {
        self.last_applied_seq.entry(self.local_id.clone()).or_insert(0);
    }

    /// Direct read access for the movement integrator, which runs in the
    /// same scheduling context and is the one other owner of this state.
    pub fn state(&self) -> &GlobalGameState {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut GlobalGameState {
        &mut self.state
    }

    /// The dispatch entry point (source spec §4.4 step-by-step):
    /// validate, dedup by `seq`, then resolve against policy.
    pub fn handle(
        &mut self,
        message: &NetMessage,
        mode: ConflictResolution,
        authority: Option<&PlayerId>,
    ) -> Option<Outcome> {
        if !validator::is_valid(message) {
            self.trace_drop("malformed envelope");
            return None;
        }

        if let Some(seq) = message.seq {
            let last = self.last_applied_seq.get(&message.from).copied();
            if let Some(last) = last {
                if seq <= last {
                    self.trace_drop("stale or duplicate seq");
                    return None;
                }
            }
            self.last_applied_seq.insert(message.from.clone(), seq);
        }

        match &message.payload {
            MessagePayload::Move { position, velocity } => {
                if !conflict_resolver::authority_gate(mode, authority, &message.from) {
                    self.trace_drop("authority gate rejected move");
                    return None;
                }
                conflict_resolver::apply_move(&mut self.state, &message.from, *position, *velocity);
                Some(Outcome::PlayerMove { peer: message.from.clone() })
            }
            MessagePayload::Inventory { items } => {
                if !conflict_resolver::authority_gate(mode, authority, &message.from) {
                    self.trace_drop("authority gate rejected inventory");
                    return None;
                }
                conflict_resolver::apply_inventory(&mut self.state, &message.from, items);
                Some(Outcome::InventoryUpdate { peer: message.from.clone() })
            }
            MessagePayload::Transfer { to, item } => {
                if !conflict_resolver::authority_gate(mode, authority, &message.from) {
                    self.trace_drop("authority gate rejected transfer");
                    return None;
                }
                if !conflict_resolver::apply_transfer(&mut self.state, &message.from, to, item) {
                    self.trace_drop("transfer rejected: insufficient inventory");
                    return None;
                }
                Some(Outcome::ObjectTransfer {
                    from: message.from.clone(),
                    to: to.clone(),
                    item: item.clone(),
                })
            }
            MessagePayload::StateFull { state } => {
                let is_initial_join = !self.last_applied_seq.contains_key(&self.local_id);
                conflict_resolver::apply_snapshot(&mut self.state, state, &self.local_id, is_initial_join);
                Some(Outcome::StateSync { tick: self.state.tick })
            }
            MessagePayload::StateDelta { delta } => {
                conflict_resolver::apply_delta(&mut self.state, delta);
                Some(Outcome::StateDelta { tick: self.state.tick })
            }
            MessagePayload::Payload { payload, channel } => Some(Outcome::SharedPayload {
                from: message.from.clone(),
                payload: payload.clone(),
                channel: channel.clone(),
            }),
            MessagePayload::Ping | MessagePayload::Pong => None,
        }
    }

    /// Builds a delta snapshotting the current values at `paths`,
    /// atomically advancing `tick`.
    pub fn build_delta(&mut self, paths: &[String]) -> StateDelta {
        conflict_resolver::build_delta_from_paths(&mut self.state, paths)
    }

    /// Removes a departed player's entries, for the host's
    /// `cleanupOnPeerLeave` behavior. Returns the dot-paths that changed, so
    /// the caller can build and broadcast a delta for them.
    pub fn remove_player(&mut self, id: &PlayerId) -> Vec<String> {
        let mut touched = Vec::new();
        if self.state.players.remove(id).is_some() {
            touched.push(format!("players.{id}"));
        }
        if self.state.inventories.remove(id).is_some() {
            touched.push(format!("inventories.{id}"));
        }
        touched
    }

    fn trace_drop(&self, reason: &'static str) {
        if self.debug_enabled {
            tracing::debug!(reason, "dropped inbound envelope");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use protocol::{InventoryItem, Position};

    fn move_msg(from: &str, seq: Option<u64>, x: f64, y: f64) -> NetMessage {
        NetMessage {
            from: PlayerId::from(from),
            ts: 1.0,
            seq,
            ttl: None,
            payload: MessagePayload::Move { position: Position { x, y, z: 0.0 }, velocity: None },
        }
    }

    #[test]
    fn stale_move_dropped() {
        let mut mgr = StateManager::new(PlayerId::from("L"), false);
        assert!(mgr
            .handle(&move_msg("P", Some(2), 2.0, 2.0), ConflictResolution::Timestamp, None)
            .is_some());
        assert!(mgr
            .handle(&move_msg("P", Some(1), 1.0, 1.0), ConflictResolution::Timestamp, None)
            .is_none());
        assert_eq!(mgr.state().players[&PlayerId::from("P")].position, Position { x: 2.0, y: 2.0, z: 0.0 });
    }

    #[test]
    fn seq_strictly_increases_on_each_accepted_envelope() {
        let mut mgr = StateManager::new(PlayerId::from("L"), false);
        mgr.handle(&move_msg("P", Some(1), 1.0, 1.0), ConflictResolution::Timestamp, None);
        assert_eq!(mgr.last_applied_seq[&PlayerId::from("P")], 1);
        mgr.handle(&move_msg("P", Some(5), 1.0, 1.0), ConflictResolution::Timestamp, None);
        assert_eq!(mgr.last_applied_seq[&PlayerId::from("P")], 5);
    }

    #[test]
    fn tick_never_decreases_across_deltas_and_snapshots() {
        let mut mgr = StateManager::new(PlayerId::from("L"), false);
        let delta_msg = NetMessage {
            from: PlayerId::from("P"),
            ts: 1.0,
            seq: None,
            ttl: None,
            payload: MessagePayload::StateDelta {
                delta: StateDelta { tick: 10, changes: vec![] },
            },
        };
        mgr.handle(&delta_msg, ConflictResolution::Timestamp, None);
        assert_eq!(mgr.state().tick, 10);

        let mut stale_state = GlobalGameState::default();
        stale_state.tick = 3;
        let snapshot_msg = NetMessage {
            from: PlayerId::from("P"),
            ts: 1.0,
            seq: None,
            ttl: None,
            payload: MessagePayload::StateFull { state: stale_state },
        };
        mgr.handle(&snapshot_msg, ConflictResolution::Timestamp, None);
        assert_eq!(mgr.state().tick, 10);
    }

    #[test]
    fn transfer_consistency_scenario() {
        let mut mgr = StateManager::new(PlayerId::from("L"), false);
        mgr.state_mut().inventories.insert(
            PlayerId::from("A"),
            vec![InventoryItem { id: "potion".into(), kind: "heal".into(), quantity: 2 }],
        );
        let transfer = NetMessage {
            from: PlayerId::from("A"),
            ts: 1.0,
            seq: None,
            ttl: None,
            payload: MessagePayload::Transfer {
                to: PlayerId::from("B"),
                item: InventoryItem { id: "potion".into(), kind: "heal".into(), quantity: 1 },
            },
        };
        assert!(mgr.handle(&transfer, ConflictResolution::Timestamp, None).is_some());
        assert_eq!(mgr.state().inventories[&PlayerId::from("A")][0].quantity, 1);
        assert_eq!(mgr.state().inventories[&PlayerId::from("B")][0].quantity, 1);

        let too_much = NetMessage {
            from: PlayerId::from("A"),
            ts: 2.0,
            seq: None,
            ttl: None,
            payload: MessagePayload::Transfer {
                to: PlayerId::from("B"),
                item: InventoryItem { id: "potion".into(), kind: "heal".into(), quantity: 2 },
            },
        };
        assert!(mgr.handle(&too_much, ConflictResolution::Timestamp, None).is_none());
        assert_eq!(mgr.state().inventories[&PlayerId::from("A")][0].quantity, 1);
    }

    /// Exercises the initial-join gate itself in isolation, by feeding a
    /// sequenced move `from == local_id` straight through `handle`. The
    /// facade never does this in practice — outbound local moves bypass
    /// `handle` entirely, and anti-spoofing means no inbound envelope can
    /// carry `from == local_id` either — so this only covers
    /// `conflict_resolver::apply_snapshot`'s gating logic, not the real
    /// "has the local id closed its join window" bookkeeping. That path is
    /// covered by `session::tests::snapshot_after_local_move_does_not_roll_back_local_player`,
    /// which drives the local move through `MeshSession::broadcast_move`.
    #[test]
    fn snapshot_respects_local_live_view() {
        let mut mgr = StateManager::new(PlayerId::from("L"), false);
        mgr.handle(&move_msg("L", Some(1), 100.0, 100.0), ConflictResolution::Timestamp, None);

        let mut incoming = GlobalGameState::default();
        incoming.players.insert(
            PlayerId::from("L"),
            protocol::PlayerState { position: Position { x: 0.0, y: 0.0, z: 0.0 }, velocity: None },
        );
        incoming.players.insert(
            PlayerId::from("R"),
            protocol::PlayerState { position: Position { x: 5.0, y: 5.0, z: 0.0 }, velocity: None },
        );
        let snapshot_msg = NetMessage {
            from: PlayerId::from("H"),
            ts: 1.0,
            seq: None,
            ttl: None,
            payload: MessagePayload::StateFull { state: incoming },
        };
        mgr.handle(&snapshot_msg, ConflictResolution::Timestamp, None);
        assert_eq!(mgr.state().players[&PlayerId::from("L")].position, Position { x: 100.0, y: 100.0, z: 0.0 });
        assert_eq!(mgr.state().players[&PlayerId::from("R")].position, Position { x: 5.0, y: 5.0, z: 0.0 });
    }

    #[test]
    fn initial_join_snapshot_is_accepted_for_local_id() {
        let mut mgr = StateManager::new(PlayerId::from("L"), false);
        let mut incoming = GlobalGameState::default();
        incoming.players.insert(
            PlayerId::from("L"),
            protocol::PlayerState { position: Position { x: 1.0, y: 2.0, z: 0.0 }, velocity: None },
        );
        let snapshot_msg = NetMessage {
            from: PlayerId::from("H"),
            ts: 1.0,
            seq: None,
            ttl: None,
            payload: MessagePayload::StateFull { state: incoming },
        };
        mgr.handle(&snapshot_msg, ConflictResolution::Timestamp, None);
        assert_eq!(mgr.state().players[&PlayerId::from("L")].position, Position { x: 1.0, y: 2.0, z: 0.0 });
    }

    #[test]
    fn authoritative_mode_rejects_non_authority_moves() {
        let mut mgr = StateManager::new(PlayerId::from("L"), false);
        let authority = PlayerId::from("H");
        let rejected = mgr.handle(&move_msg("P", None, 1.0, 1.0), ConflictResolution::Authoritative, Some(&authority));
        assert!(rejected.is_none());
        let accepted = mgr.handle(&move_msg("H", None, 1.0, 1.0), ConflictResolution::Authoritative, Some(&authority));
        assert!(accepted.is_some());
    }

    #[test]
    fn remove_player_reports_touched_paths() {
        let mut mgr = StateManager::new(PlayerId::from("L"), false);
        mgr.handle(&move_msg("P", None, 1.0, 1.0), ConflictResolution::Timestamp, None);
        let touched = mgr.remove_player(&PlayerId::from("P"));
        assert!(touched.contains(&"players.P".to_string()));
        assert!(!mgr.state().players.contains_key(&PlayerId::from("P")));
    }
}
