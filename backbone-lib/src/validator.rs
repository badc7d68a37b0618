//! Structural acceptance of a decoded envelope (source spec §4.5).
//!
//! Most of the structural shape the distilled spec describes (`t` is one of
//! a fixed set, `items` is a list, `item.quantity` is a number, …) is
//! already enforced by [`protocol::NetMessage`]'s `Deserialize` impl —
//! `serializer::decode` returns `None` for anything that doesn't match one
//! of the `MessagePayload` variants, which *is* the "anything else: reject"
//! rule. What remains here are the constraints a successful deserialize
//! does not rule out: non-finite numbers and an empty sender id.

use protocol::{MessagePayload, NetMessage};

/// Whether `message` is acceptable to hand to the state manager.
pub fn is_valid(message: &NetMessage) -> bool {
    if message.from.as_str().is_empty() {
        return false;
    }
    if !message.ts.is_finite() {
        return false;
    }
    match &message.payload {
        MessagePayload::Move { position, velocity } => {
            position.x.is_finite()
                && position.y.is_finite()
                && position.z.is_finite()
                && velocity
                    .as_ref()
                    .map(|v| v.x.is_finite() && v.y.is_finite() && v.z.is_finite())
                    .unwrap_or(true)
        }
        MessagePayload::Transfer { to, .. } => !to.as_str().is_empty(),
        MessagePayload::Inventory { .. }
        | MessagePayload::StateFull { .. }
        | MessagePayload::StateDelta { .. }
        | MessagePayload::Payload { .. }
        | MessagePayload::Ping
        | MessagePayload::Pong => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use protocol::{InventoryItem, PlayerId, Position};

    fn base(payload: MessagePayload) -> NetMessage {
        NetMessage { from: PlayerId::from("P"), ts: 1.0, seq: None, ttl: None, payload }
    }

    #[test]
    fn rejects_empty_sender() {
        let mut msg = base(MessagePayload::Ping);
        msg.from = PlayerId::from("");
        assert!(!is_valid(&msg));
    }

    #[test]
    fn rejects_non_finite_timestamp() {
        let mut msg = base(MessagePayload::Ping);
        msg.ts = f64::NAN;
        assert!(!is_valid(&msg));
    }

    #[test]
    fn rejects_non_finite_move_position() {
        let msg = base(MessagePayload::Move {
            position: Position { x: f64::INFINITY, y: 0.0, z: 0.0 },
            velocity: None,
        });
        assert!(!is_valid(&msg));
    }

    #[test]
    fn accepts_well_formed_transfer() {
        let msg = base(MessagePayload::Transfer {
            to: PlayerId::from("Q"),
            item: InventoryItem { id: "potion".into(), kind: "heal".into(), quantity: 1 },
        });
        assert!(is_valid(&msg));
    }

    #[test]
    fn rejects_transfer_to_empty_id() {
        let msg = base(MessagePayload::Transfer {
            to: PlayerId::from(""),
            item: InventoryItem { id: "potion".into(), kind: "heal".into(), quantity: 1 },
        });
        assert!(!is_valid(&msg));
    }
}
