//! The signaling-adapter contract (source spec §6.1) and a reference
//! implementation speaking the compatibility-preserving relay wire format
//! of source spec §6.2 over `ewebsock`, the same crate the teacher's
//! `web_socket_interface.rs` uses for its native transport.
//!
//! Signaling is an external collaborator: `backbone-lib` only needs
//! [`SignalingAdapter`] to exist, not this particular relay. A host
//! application wired to a different signaling transport (a Firebase room,
//! a matchmaking service, …) implements the trait directly instead.

use async_trait::async_trait;
use protocol::{IceCandidateInit, PlayerId, RelayEnvelope, RelayKind, RosterPush, RosterTag, SdpDescription};

use crate::error::MeshError;

/// One inbound event a [`SignalingAdapter`] can produce between polls —
/// the Rust shape of the three subscription hooks named in source spec
/// §6.1 (`onRemoteDescription`, `onIceCandidate`, `onRoster`), collapsed
/// into a single polled stream the way `peer_manager` already pumps RTC
/// events, rather than three independent callback registrations.
pub enum SignalingEvent {
    RemoteDescription { from: PlayerId, description: SdpDescription },
    IceCandidate { from: PlayerId, candidate: IceCandidateInit },
    Roster(Vec<PlayerId>),
}

/// What the peer manager needs from a signaling transport.
#[async_trait]
pub trait SignalingAdapter: Send {
    fn local_id(&self) -> &PlayerId;

    /// Registers this participant with the signaling transport. Source
    /// spec §6.1 names this `async` explicitly — it is the one signaling
    /// operation this crate calls directly rather than through a glue
    /// layer, since [`RelayWebSocketSignaling`] below is a real
    /// implementation, not just a pinned interface.
    async fn register(&mut self) -> Result<(), MeshError>;

    /// Sends an SDP offer/answer, targeted at `to` when present.
    async fn announce(&mut self, description: SdpDescription, to: Option<PlayerId>) -> Result<(), MeshError>;

    /// Sends an ICE candidate, targeted at `to` when present.
    async fn send_ice_candidate(&mut self, candidate: IceCandidateInit, to: Option<PlayerId>) -> Result<(), MeshError>;

    /// Drains the next queued inbound event, if any.
    fn poll_event(&mut self) -> Option<SignalingEvent>;

    /// Invoked on disposal. Default no-op since not every transport owns a
    /// closeable resource.
    fn close(&mut self) {}
}

/// A [`SignalingAdapter`] speaking the reference wire format of source spec
/// §6.2 over a websocket connection to `relay-server`.
pub struct RelayWebSocketSignaling {
    local_id: PlayerId,
    room_id: String,
    sender: ewebsock::WsSender,
    receiver: ewebsock::WsReceiver,
    buffered_events: std::collections::VecDeque<SignalingEvent>,
}

impl RelayWebSocketSignaling {
    /// Opens the websocket immediately (connection completion is observed
    /// through the first successful `poll_event`/`register`, matching
    /// `ewebsock`'s own non-blocking connect).
    pub fn connect(url: &str, room_id: impl Into<String>, local_id: PlayerId) -> Result<Self, MeshError> {
        let (sender, receiver) = ewebsock::connect(url, ewebsock::Options::default())
            .map_err(MeshError::Signaling)?;
        Ok(Self {
            local_id,
            room_id: room_id.into(),
            sender,
            receiver,
            buffered_events: std::collections::VecDeque::new(),
        })
    }

    fn send_envelope(&mut self, envelope: &RelayEnvelope) -> Result<(), MeshError> {
        let text = serde_json::to_string(envelope)
            .map_err(|e| MeshError::Serialization(e.to_string()))?;
        self.sender.send(ewebsock::WsMessage::Text(text));
        Ok(())
    }

    /// Pulls every pending websocket frame into `buffered_events`, parsing
    /// `RelayEnvelope`/`RosterPush` shapes and silently dropping anything
    /// else (an unparsable frame is not this crate's business to surface
    /// as an error — it mirrors the "malformed envelope: silent drop" rule
    /// of source spec §7 at the signaling boundary).
    fn drain_socket(&mut self) {
        while let Some(event) = self.receiver.try_recv() {
            let ewebsock::WsEvent::Message(ewebsock::WsMessage::Text(text)) = event else {
                continue;
            };
            if let Ok(roster) = serde_json::from_str::<RosterPush>(&text) {
                if matches!(roster.sys, RosterTag::Roster) {
                    self.buffered_events.push_back(SignalingEvent::Roster(roster.roster));
                    continue;
                }
            }
            let Ok(envelope) = serde_json::from_str::<RelayEnvelope>(&text) else {
                continue;
            };
            match envelope.kind {
                RelayKind::Desc => {
                    let Some(payload) = envelope.payload else { continue };
                    let Ok(description) = serde_json::from_value::<SdpDescription>(payload) else {
                        continue;
                    };
                    self.buffered_events.push_back(SignalingEvent::RemoteDescription {
                        from: envelope.from,
                        description,
                    });
                }
                RelayKind::Ice => {
                    let Some(payload) = envelope.payload else { continue };
                    let Ok(candidate) = serde_json::from_value::<IceCandidateInit>(payload) else {
                        continue;
                    };
                    self.buffered_events.push_back(SignalingEvent::IceCandidate {
                        from: envelope.from,
                        candidate,
                    });
                }
                RelayKind::Register => {}
            }
        }
    }
}

#[async_trait]
impl SignalingAdapter for RelayWebSocketSignaling {
    fn local_id(&self) -> &PlayerId {
        &self.local_id
    }

    async fn register(&mut self) -> Result<(), MeshError> {
        self.send_envelope(&RelayEnvelope {
            room_id: self.room_id.clone(),
            from: self.local_id.clone(),
            to: None,
            kind: RelayKind::Register,
            payload: None,
            announce: Some(true),
        })
    }

    async fn announce(&mut self, description: SdpDescription, to: Option<PlayerId>) -> Result<(), MeshError> {
        let payload = serde_json::to_value(&description).map_err(|e| MeshError::Serialization(e.to_string()))?;
        self.send_envelope(&RelayEnvelope {
            room_id: self.room_id.clone(),
            from: self.local_id.clone(),
            to,
            kind: RelayKind::Desc,
            payload: Some(payload),
            announce: None,
        })
    }

    async fn send_ice_candidate(&mut self, candidate: IceCandidateInit, to: Option<PlayerId>) -> Result<(), MeshError> {
        let payload = serde_json::to_value(&candidate).map_err(|e| MeshError::Serialization(e.to_string()))?;
        self.send_envelope(&RelayEnvelope {
            room_id: self.room_id.clone(),
            from: self.local_id.clone(),
            to,
            kind: RelayKind::Ice,
            payload: Some(payload),
            announce: None,
        })
    }

    fn poll_event(&mut self) -> Option<SignalingEvent> {
        self.drain_socket();
        self.buffered_events.pop_front()
    }

    fn close(&mut self) {
        // Dropping the sender/receiver pair closes the socket; ewebsock has
        // no explicit close handle beyond that.
    }
}
