//! Wire encode/decode for the two recognized schemes (source spec §4.2).
//!
//! `json` goes through `serde_json` as UTF-8 text; `binary-min` goes through
//! `rmp-serde` (MessagePack). `NetMessage` flattens an internally-tagged
//! `MessagePayload` into its envelope and carries `serde_json::Value` leaves
//! (`payload`, `GameObject::data`, `DeltaChange::value`) — decoding any of
//! that needs `deserialize_any`, which a non-self-describing format like
//! `postcard` or `bincode` cannot provide (its deserializer has to know the
//! next type from the schema, not the bytes). MessagePack is self-describing
//! the same way JSON is, so it round-trips this envelope shape exactly,
//! just onto an opaque byte buffer instead of text. Both directions are a
//! total inverse of each other for any value that round-trips through the
//! public API — there is no scheme that can fail to decode its own
//! encoding.

use bytes::Bytes;
use protocol::NetMessage;

use crate::config::SerializationScheme;
use crate::error::MeshError;

/// Encodes `message` per `scheme`.
pub fn encode(message: &NetMessage, scheme: SerializationScheme) -> Result<Bytes, MeshError> {
    match scheme {
        SerializationScheme::Json => {
            let text = serde_json::to_vec(message)
                .map_err(|e| MeshError::Serialization(e.to_string()))?;
            Ok(Bytes::from(text))
        }
        SerializationScheme::BinaryMin => {
            let bytes = rmp_serde::to_vec_named(message)
                .map_err(|e| MeshError::Serialization(e.to_string()))?;
            Ok(Bytes::from(bytes))
        }
    }
}

/// Decodes `bytes` per `scheme`. Returns `None` on malformed input rather
/// than an error — decode failures on inbound data are a silent drop per
/// source spec §7, the caller is expected to discard and move on.
pub fn decode(bytes: &[u8], scheme: SerializationScheme) -> Option<NetMessage> {
    match scheme {
        SerializationScheme::Json => serde_json::from_slice(bytes).ok(),
        SerializationScheme::BinaryMin => rmp_serde::from_slice(bytes).ok(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use protocol::{MessagePayload, PlayerId, Position};

    fn sample() -> NetMessage {
        NetMessage {
            from: PlayerId::from("P1"),
            ts: 123.0,
            seq: Some(4),
            ttl: None,
            payload: MessagePayload::Move {
                position: Position { x: 1.0, y: 2.0, z: 3.0 },
                velocity: None,
            },
        }
    }

    #[test]
    fn json_round_trips() {
        let msg = sample();
        let encoded = encode(&msg, SerializationScheme::Json).unwrap();
        let decoded = decode(&encoded, SerializationScheme::Json).unwrap();
        assert_eq!(msg, decoded);
    }

    #[test]
    fn binary_min_round_trips() {
        let msg = sample();
        let encoded = encode(&msg, SerializationScheme::BinaryMin).unwrap();
        let decoded = decode(&encoded, SerializationScheme::BinaryMin).unwrap();
        assert_eq!(msg, decoded);
    }

    #[test]
    fn malformed_bytes_decode_to_none_not_a_panic() {
        assert!(decode(b"not a message", SerializationScheme::Json).is_none());
        assert!(decode(b"\xff\xff\xff", SerializationScheme::BinaryMin).is_none());
    }

    #[test]
    fn schemes_do_not_cross_decode() {
        let msg = sample();
        let encoded = encode(&msg, SerializationScheme::Json).unwrap();
        assert!(decode(&encoded, SerializationScheme::BinaryMin).is_none());
    }
}
