//! The reference signaling-relay wire format (source spec §6.2). This is a
//! compatibility-preserving contract: any relay that speaks this envelope
//! shape can stand in for `relay-server`.

use serde::{Deserialize, Serialize};

use crate::ids::PlayerId;

/// What a [`RelayEnvelope`] carries.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelayKind {
    /// An SDP offer or answer.
    Desc,
    /// An ICE candidate.
    Ice,
    /// The initial room-join/announce message.
    Register,
}

/// One message exchanged with the signaling relay, one per websocket frame.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RelayEnvelope {
    pub room_id: String,
    pub from: PlayerId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<PlayerId>,
    pub kind: RelayKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub announce: Option<bool>,
}

/// The roster push the relay broadcasts to every socket in a room whenever
/// membership changes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RosterPush {
    pub sys: RosterTag,
    pub room_id: String,
    pub roster: Vec<PlayerId>,
}

/// Discriminant for [`RosterPush`] so it round-trips as `{"sys":"roster", ...}`
/// without needing a hand-rolled tag field.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RosterTag {
    Roster,
}

/// Payload carried by a [`RelayKind::Register`] envelope's `payload` field,
/// letting a room be identified the way the teacher's own `JoinRequest`
/// identifies a game room — kept minimal since the relay itself only
/// brokers roster membership and message delivery, not room lifecycle
/// rules.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct JoinPayload {
    #[serde(default)]
    pub display_name: Option<String>,
}

/// An SDP offer or answer, carried opaquely by a [`RelayKind::Desc`]
/// envelope's `payload`. The WebRTC stack itself is an external
/// collaborator (source spec §1) — this crate only pins the shape
/// signaling exchanges, never interprets `sdp`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SdpDescription {
    #[serde(rename = "type")]
    pub sdp_type: SdpType,
    pub sdp: String,
}

/// Whether an [`SdpDescription`] is an offer or an answer.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Answer,
}

/// An ICE candidate, carried opaquely by a [`RelayKind::Ice`] envelope's
/// `payload`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IceCandidateInit {
    pub candidate: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_m_line_index: Option<u16>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sdp_description_round_trips_through_relay_payload() {
        let desc = SdpDescription { sdp_type: SdpType::Offer, sdp: "v=0...".to_string() };
        let envelope = RelayEnvelope {
            room_id: "room-1".to_string(),
            from: PlayerId::from("A"),
            to: Some(PlayerId::from("B")),
            kind: RelayKind::Desc,
            payload: Some(serde_json::to_value(&desc).unwrap()),
            announce: None,
        };
        let text = serde_json::to_string(&envelope).unwrap();
        let decoded: RelayEnvelope = serde_json::from_str(&text).unwrap();
        let decoded_desc: SdpDescription =
            serde_json::from_value(decoded.payload.unwrap()).unwrap();
        assert_eq!(decoded_desc, desc);
    }
}
