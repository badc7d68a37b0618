//! Applies one decoded envelope to the replicated state according to policy
//! (source spec §4.3). Stateless with respect to sequence numbers — dedup
//! lives in `state_manager`, which is the only caller of this module.

use protocol::{GlobalGameState, InventoryItem, PlayerId, Position, StateDelta, Velocity};
use serde_json::Value;

use crate::config::ConflictResolution;

/// Whether `from` is allowed to mutate state under `mode`. In
/// `Authoritative` mode with no authority established yet, nothing is
/// allowed through — the gate opens only once an authority id is known.
pub fn authority_gate(mode: ConflictResolution, authority: Option<&PlayerId>, from: &PlayerId) -> bool {
    match mode {
        ConflictResolution::Timestamp => true,
        ConflictResolution::Authoritative => authority == Some(from),
    }
}

/// Upserts `players[from]`. `position` always overwrites in full (the wire
/// form always carries both axes); `velocity` only overwrites when `Some`,
/// so a message that omits it does not clear the previously known value.
pub fn apply_move(
    state: &mut GlobalGameState,
    from: &PlayerId,
    position: Position,
    velocity: Option<Velocity>,
) {
    let entry = state.players.entry(from.clone()).or_default();
    entry.position = position;
    if let Some(v) = velocity {
        entry.velocity = Some(v);
    }
}

/// Replaces `inventories[from]` with a deep copy of `items`, pruning any
/// entry whose quantity is zero.
pub fn apply_inventory(state: &mut GlobalGameState, from: &PlayerId, items: &[InventoryItem]) {
    let pruned: Vec<InventoryItem> = items.iter().filter(|i| i.quantity > 0).cloned().collect();
    state.inventories.insert(from.clone(), pruned);
}

/// Moves `item.quantity` units of `item.id` from `from`'s inventory to
/// `to`'s. Returns `false` (no mutation at all) if `from` lacks the item or
/// holds an insufficient quantity.
pub fn apply_transfer(
    state: &mut GlobalGameState,
    from: &PlayerId,
    to: &PlayerId,
    item: &InventoryItem,
) -> bool {
    let Some(sender) = state.inventories.get_mut(from) else {
        return false;
    };
    let Some(index) = sender.iter().position(|held| held.id == item.id) else {
        return false;
    };
    if sender[index].quantity < item.quantity {
        return false;
    }
    sender[index].quantity -= item.quantity;
    if sender[index].quantity == 0 {
        sender.remove(index);
    }

    let receiver = state.inventories.entry(to.clone()).or_default();
    if let Some(existing) = receiver.iter_mut().find(|held| held.id == item.id) {
        existing.quantity += item.quantity;
    } else {
        receiver.push(item.clone());
    }
    true
}

/// Merges an inbound full snapshot per the "overwrite remote, preserve
/// local unless initial-join" rule: every remote player/inventory entry in
/// `incoming` overwrites the local copy; `local_id`'s own entry is only
/// applied when `is_initial_join` is set (so a newly elected host's
/// snapshot never rolls back the local live view on a routine resync).
/// `objects` is always replaced wholesale, and `tick` never decreases.
pub fn apply_snapshot(
    state: &mut GlobalGameState,
    incoming: &GlobalGameState,
    local_id: &PlayerId,
    is_initial_join: bool,
) {
    for (id, player) in &incoming.players {
        if id != local_id || is_initial_join {
            state.players.insert(id.clone(), player.clone());
        }
    }
    for (id, items) in &incoming.inventories {
        if id != local_id || is_initial_join {
            state.inventories.insert(id.clone(), items.clone());
        }
    }
    state.objects = incoming.objects.clone();
    state.tick = state.tick.max(incoming.tick);
}

/// Applies an incremental delta: every change overwrites the leaf at its
/// dot-path with a deep copy of its value, creating missing intermediate
/// maps along the way. `tick` is raised to `max(tick, delta.tick)`
/// regardless of whether any path touched `tick` directly.
pub fn apply_delta(state: &mut GlobalGameState, delta: &StateDelta) {
    let previous_tick = state.tick;
    let mut value = serde_json::to_value(&*state).expect("GlobalGameState always serializes");
    for change in &delta.changes {
        set_path(&mut value, &change.path, change.value.clone());
    }
    match serde_json::from_value(value) {
        Ok(next) => *state = next,
        Err(err) => {
            tracing::warn!(tick = delta.tick, error = %err, "state_delta produced an unrepresentable state, dropped");
        }
    }
    state.tick = previous_tick.max(delta.tick);
}

/// Builds a delta snapshotting the current values at `paths`, atomically
/// advancing `tick` first so `delta.tick` is the state's new tick.
pub fn build_delta_from_paths(state: &mut GlobalGameState, paths: &[String]) -> StateDelta {
    state.tick += 1;
    let value = serde_json::to_value(&*state).expect("GlobalGameState always serializes");
    let changes = paths
        .iter()
        .map(|path| protocol::DeltaChange {
            path: path.clone(),
            value: get_path(&value, path).cloned().unwrap_or(Value::Null),
        })
        .collect();
    StateDelta { tick: state.tick, changes }
}

fn set_path(root: &mut Value, path: &str, leaf: Value) {
    let mut cursor = root;
    let segments: Vec<&str> = path.split('.').collect();
    for segment in &segments[..segments.len().saturating_sub(1)] {
        if !cursor.is_object() {
            *cursor = Value::Object(Default::default());
        }
        cursor = cursor
            .as_object_mut()
            .unwrap()
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Default::default()));
    }
    if let Some(last) = segments.last() {
        if !cursor.is_object() {
            *cursor = Value::Object(Default::default());
        }
        cursor
            .as_object_mut()
            .unwrap()
            .insert(last.to_string(), leaf);
    }
}

fn get_path<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    let mut cursor = root;
    for segment in path.split('.') {
        cursor = cursor.as_object()?.get(segment)?;
    }
    Some(cursor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use protocol::PlayerState;

    #[test]
    fn move_preserves_velocity_when_omitted() {
        let mut state = GlobalGameState::default();
        let p = PlayerId::from("P");
        apply_move(&mut state, &p, Position { x: 1.0, y: 1.0, z: 0.0 }, Some(Velocity { x: 2.0, y: 0.0, z: 0.0 }));
        apply_move(&mut state, &p, Position { x: 2.0, y: 1.0, z: 0.0 }, None);
        assert_eq!(state.players[&p].velocity, Some(Velocity { x: 2.0, y: 0.0, z: 0.0 }));
        assert_eq!(state.players[&p].position, Position { x: 2.0, y: 1.0, z: 0.0 });
    }

    #[test]
    fn transfer_moves_and_prunes_zero() {
        let mut state = GlobalGameState::default();
        let a = PlayerId::from("A");
        let b = PlayerId::from("B");
        state.inventories.insert(
            a.clone(),
            vec![InventoryItem { id: "potion".into(), kind: "heal".into(), quantity: 2 }],
        );
        let item = InventoryItem { id: "potion".into(), kind: "heal".into(), quantity: 1 };
        assert!(apply_transfer(&mut state, &a, &b, &item));
        assert_eq!(state.inventories[&a][0].quantity, 1);
        assert_eq!(state.inventories[&b][0].quantity, 1);

        let rejected = apply_transfer(&mut state, &a, &b, &InventoryItem { id: "potion".into(), kind: "heal".into(), quantity: 2 });
        assert!(!rejected);
        assert_eq!(state.inventories[&a][0].quantity, 1);
    }

    #[test]
    fn snapshot_preserves_local_unless_initial_join() {
        let mut state = GlobalGameState::default();
        let local = PlayerId::from("L");
        state.players.insert(local.clone(), PlayerState { position: Position { x: 100.0, y: 100.0, z: 0.0 }, velocity: None });

        let mut incoming = GlobalGameState::default();
        incoming.players.insert(local.clone(), PlayerState { position: Position { x: 0.0, y: 0.0, z: 0.0 }, velocity: None });
        let remote = PlayerId::from("R");
        incoming.players.insert(remote.clone(), PlayerState { position: Position { x: 5.0, y: 5.0, z: 0.0 }, velocity: None });

        apply_snapshot(&mut state, &incoming, &local, false);
        assert_eq!(state.players[&local].position, Position { x: 100.0, y: 100.0, z: 0.0 });
        assert_eq!(state.players[&remote].position, Position { x: 5.0, y: 5.0, z: 0.0 });
    }

    #[test]
    fn snapshot_applies_local_on_initial_join() {
        let mut state = GlobalGameState::default();
        let local = PlayerId::from("L");
        let mut incoming = GlobalGameState::default();
        incoming.players.insert(local.clone(), PlayerState { position: Position { x: 1.0, y: 2.0, z: 0.0 }, velocity: None });

        apply_snapshot(&mut state, &incoming, &local, true);
        assert_eq!(state.players[&local].position, Position { x: 1.0, y: 2.0, z: 0.0 });
    }

    #[test]
    fn delta_creates_intermediate_maps_and_raises_tick() {
        let mut state = GlobalGameState::default();
        let delta = StateDelta {
            tick: 5,
            changes: vec![protocol::DeltaChange {
                path: "objects.rock1.kind".to_string(),
                value: Value::String("boulder".to_string()),
            }],
        };
        apply_delta(&mut state, &delta);
        assert_eq!(state.tick, 5);
    }

    #[test]
    fn applying_same_delta_twice_is_idempotent() {
        let mut state = GlobalGameState::default();
        state.players.insert(PlayerId::from("A"), PlayerState::default());
        let delta = StateDelta {
            tick: 1,
            changes: vec![protocol::DeltaChange {
                path: "tick".to_string(),
                value: Value::from(1u64),
            }],
        };
        apply_delta(&mut state, &delta);
        let first = state.clone();
        apply_delta(&mut state, &delta);
        assert_eq!(first, state);
    }

    #[test]
    fn build_delta_captures_current_value_and_bumps_tick() {
        let mut state = GlobalGameState::default();
        state.tick = 10;
        state.players.insert(
            PlayerId::from("A"),
            PlayerState { position: Position { x: 3.0, y: 4.0, z: 0.0 }, velocity: None },
        );
        let delta = build_delta_from_paths(&mut state, &["players.A.position.x".to_string()]);
        assert_eq!(delta.tick, 11);
        assert_eq!(delta.changes[0].value, Value::from(3.0));
    }

    #[test]
    fn authority_gate_requires_exact_match_in_authoritative_mode() {
        let a = PlayerId::from("A");
        let b = PlayerId::from("B");
        assert!(authority_gate(ConflictResolution::Authoritative, Some(&a), &a));
        assert!(!authority_gate(ConflictResolution::Authoritative, Some(&a), &b));
        assert!(!authority_gate(ConflictResolution::Authoritative, None, &a));
        assert!(authority_gate(ConflictResolution::Timestamp, None, &a));
    }
}
