//! Reads the first frame of a freshly upgraded websocket and validates it
//! as the room-join announcement the reference signaling-relay wire format
//! requires before anything else is relayed:
//! `{ roomId, from, kind: "register", announce: true }`.

use axum::extract::ws::Message::{Close, Text};
use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{sink::SinkExt, stream::StreamExt};
use protocol::{PlayerId, RelayEnvelope, RelayKind};

/// What a successful handshake hands back to the connection's message pump.
pub struct HandshakeResult {
    pub room_id: String,
    pub player_id: PlayerId,
}

/// Closes the socket with a short text reason. Matches the wire format's
/// own rule that frames are JSON text, not binary.
async fn reject(sender: &mut SplitSink<WebSocket, Message>, reason: &str) {
    let _ = sender.send(Text(reason.to_string().into())).await;
    let _ = sender.send(Close(None)).await;
}

/// Waits for the initial `register` envelope and returns the room/player it
/// names. Any other first frame, or a connection that closes first, fails
/// the handshake and the caller drops the socket.
pub async fn perform_handshake(
    sender: &mut SplitSink<WebSocket, Message>,
    receiver: &mut SplitStream<WebSocket>,
) -> Option<HandshakeResult> {
    let envelope = loop {
        let Some(frame) = receiver.next().await else {
            tracing::warn!("Websocket closed before handshake completed");
            return None;
        };
        match frame {
            Err(err) => {
                tracing::error!(?err, "Error reading handshake frame");
                reject(sender, "Error during handshake.").await;
                return None;
            }
            Ok(Text(text)) => match serde_json::from_str::<RelayEnvelope>(&text) {
                Ok(envelope) => break envelope,
                Err(err) => {
                    tracing::error!(?err, "Failed to parse handshake envelope");
                    reject(sender, "Malformed handshake envelope.").await;
                    return None;
                }
            },
            // Ping/pong/binary frames carry nothing useful before the
            // handshake is done; keep waiting for the register text frame.
            Ok(_) => {}
        }
    };

    if !matches!(envelope.kind, RelayKind::Register) || envelope.announce != Some(true) {
        tracing::error!(kind = ?envelope.kind, "First frame was not a register/announce envelope");
        reject(sender, "Expected a register envelope first.").await;
        return None;
    }

    Some(HandshakeResult { room_id: envelope.room_id, player_id: envelope.from })
}
