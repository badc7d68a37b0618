//! Per-connection message pump for the relay.
//!
//! Once a connection has announced itself ([`crate::hand_shake`]), this
//! module owns the rest of its lifetime: a send task drains the
//! connection's own outbox and writes it to the websocket, while the
//! receive loop parses every further frame as a [`RelayEnvelope`] and
//! routes it per the reference signaling-relay wire format:
//! - `to` present: forward only to that player's socket.
//! - otherwise: broadcast to every other player in the room.
//!
//! On disconnect the player is evicted and the roster rebroadcast; the
//! room is dropped once the last member leaves.

use std::sync::Arc;

use axum::extract::ws::Message::{Close, Text};
use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{sink::SinkExt, stream::StreamExt};
use protocol::{PlayerId, RelayEnvelope, RosterPush, RosterTag};
use tokio::sync::mpsc;

use crate::hand_shake::{perform_handshake, HandshakeResult};
use crate::lobby::AppState;

fn roster_push_message(room_id: &str, roster: Vec<PlayerId>) -> Message {
    let push = RosterPush { sys: RosterTag::Roster, room_id: room_id.to_string(), roster };
    Text(serde_json::to_string(&push).expect("RosterPush always serializes").into())
}

/// Drains `outbox` and writes every message straight to the websocket
/// sink. Ends when the outbox closes (the connection is tearing down) or a
/// write fails (the peer is gone).
async fn pump_outbox(mut sender: SplitSink<WebSocket, Message>, mut outbox: mpsc::UnboundedReceiver<Message>) {
    while let Some(message) = outbox.recv().await {
        if sender.send(message).await.is_err() {
            return;
        }
    }
}

/// Reads every further frame from the socket and routes it through `state`
/// per the reference relay's wire format. Returns once the connection
/// closes, errors, or sends a `Close` frame.
async fn pump_inbound(
    mut receiver: SplitStream<WebSocket>,
    state: &Arc<AppState>,
    room_id: &str,
    player_id: &PlayerId,
) {
    while let Some(frame) = receiver.next().await {
        let text = match frame {
            Ok(Text(text)) => text,
            Ok(Close(_)) => return,
            Ok(_) => continue,
            Err(err) => {
                tracing::warn!(?err, "Error reading frame, dropping connection");
                return;
            }
        };

        // A malformed envelope is not this server's business to surface
        // as an error — it only routes bytes, it never interprets SDP/ICE.
        let envelope = match serde_json::from_str::<RelayEnvelope>(&text) {
            Ok(envelope) => envelope,
            Err(err) => {
                tracing::debug!(?err, "Dropping malformed envelope");
                continue;
            }
        };

        let raw = Text(text);
        match envelope.to {
            Some(to) => state.send_to(room_id, &to, raw).await,
            None => state.broadcast_except(room_id, player_id, raw).await,
        }
    }
}

/// Drives one websocket connection from handshake to disconnect.
pub async fn run_connection(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();

    let Some(HandshakeResult { room_id, player_id }) = perform_handshake(&mut sender, &mut receiver).await else {
        return;
    };

    let (outbox_tx, outbox_rx) = mpsc::unbounded_channel();
    let roster = state.join(&room_id, player_id.clone(), outbox_tx).await;
    state.broadcast_all(&room_id, roster_push_message(&room_id, roster)).await;
    tracing::info!(room_id = %room_id, player_id = %player_id, "Player joined room");

    let send_task = tokio::spawn(pump_outbox(sender, outbox_rx));

    pump_inbound(receiver, &state, &room_id, &player_id).await;

    send_task.abort();
    if let Some(roster) = state.leave(&room_id, &player_id).await {
        state.broadcast_all(&room_id, roster_push_message(&room_id, roster)).await;
    }
    tracing::info!(room_id = %room_id, player_id = %player_id, "Player left room");
}
