//! [`PeerInfo`] — exclusively owned by [`crate::peer_manager::PeerManager`]
//! per the "Ownership of peer state" design note. Nothing outside that
//! module should hold one; external consumers only ever see
//! [`protocol::PlayerId`] values.

use std::collections::VecDeque;

use protocol::{NetMessage, PlayerId};

use crate::transport::{ChannelLabel, DataChannelHandle, RtcPeerConnectionHandle};

/// The 30 s pending-offer timeout (source spec §4.7 "Initiator role").
pub const PENDING_OFFER_TIMEOUT_MS: f64 = 30_000.0;

/// The 2 s internal ping cadence (source spec §4.7 "Internal ping loop").
pub const PING_INTERVAL_MS: f64 = 2_000.0;

/// A remote participant with an active (or activating) RTC connection.
pub struct PeerInfo {
    pub id: PlayerId,
    pub rtc: Box<dyn RtcPeerConnectionHandle>,
    pub dc_unreliable: Option<Box<dyn DataChannelHandle>>,
    pub dc_reliable: Option<Box<dyn DataChannelHandle>>,
    /// Queued outbound messages awaiting an open channel, kept as typed
    /// [`NetMessage`]s (rather than pre-encoded bytes) so the
    /// coalesce-moves backpressure policy can inspect payload type without
    /// decoding (source spec §4.7).
    pub outbox_unreliable: VecDeque<NetMessage>,
    pub outbox_reliable: VecDeque<NetMessage>,
    pub ping_ms: f64,
    pub last_pong_ts: Option<f64>,
    /// Set once this connection was promoted from `pendingInitiators`, so
    /// re-election logic can tell initiator-side peers from
    /// responder-side ones if ever needed for diagnostics.
    pub was_initiator: bool,
}

impl PeerInfo {
    pub fn new(id: PlayerId, rtc: Box<dyn RtcPeerConnectionHandle>, was_initiator: bool) -> Self {
        Self {
            id,
            rtc,
            dc_unreliable: None,
            dc_reliable: None,
            outbox_unreliable: VecDeque::new(),
            outbox_reliable: VecDeque::new(),
            ping_ms: 0.0,
            last_pong_ts: None,
            was_initiator,
        }
    }

    /// Attaches a newly created/received data channel at the right slot.
    /// Draining its outbox happens once the channel actually reaches
    /// `Open` (source spec §4.7 "Channel opening side effects") — see
    /// [`crate::peer_manager::PeerManager::pump`], since a channel just
    /// created by `createDataChannel` starts in `connecting`, not `open`.
    pub fn attach_channel(&mut self, channel: Box<dyn DataChannelHandle>) {
        match channel.label() {
            ChannelLabel::Unreliable => self.dc_unreliable = Some(channel),
            ChannelLabel::Reliable => self.dc_reliable = Some(channel),
        }
    }
}
