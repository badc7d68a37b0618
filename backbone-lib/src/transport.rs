//! The external collaborator contracts for the data plane (source spec §1:
//! "the underlying WebRTC stack itself... assumed to implement an ICE-agent
//! with ordered/unordered SCTP data channels"). `backbone-lib` never talks
//! to a real `RTCPeerConnection` — it is handed one through these traits
//! and only pins the shape of the interaction.
//!
//! Every method here is synchronous by design, even though a browser's own
//! `createOffer`/`setLocalDescription`/… are genuinely asynchronous (source
//! spec §5 lists them as suspension points). The asynchrony is pushed to
//! the embedding glue code that implements [`RtcPeerConnectionHandle`] for
//! a real `web_sys::RtcPeerConnection`: that glue awaits the browser API
//! and then feeds the result back in through [`RtcPeerConnectionHandle::poll_event`].
//! [`peer_manager`](crate::peer_manager) only ever sees a poll loop, the
//! same shape the teacher's own `web_socket_interface.rs` uses for its
//! `try_recv_binary`.

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::MeshError;

/// Which of the two data channels a message belongs on (source spec §4.7).
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum ChannelLabel {
    Unreliable,
    Reliable,
}

impl ChannelLabel {
    pub const UNRELIABLE_LABEL: &'static str = "game-unreliable";
    pub const RELIABLE_LABEL: &'static str = "game-reliable";

    pub fn as_label(self) -> &'static str {
        match self {
            ChannelLabel::Unreliable => Self::UNRELIABLE_LABEL,
            ChannelLabel::Reliable => Self::RELIABLE_LABEL,
        }
    }

    /// Recovers the label from an inbound `ondatachannel` event. Any other
    /// label is silently ignored by the caller (source spec §4.7
    /// "Responder role").
    pub fn from_label(label: &str) -> Option<Self> {
        match label {
            Self::UNRELIABLE_LABEL => Some(ChannelLabel::Unreliable),
            Self::RELIABLE_LABEL => Some(ChannelLabel::Reliable),
            _ => None,
        }
    }
}

/// Mirrors `RTCDataChannelState`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DataChannelReadyState {
    Connecting,
    Open,
    Closing,
    Closed,
}

/// Mirrors `RTCPeerConnectionState`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PeerConnectionState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

/// One event a [`DataChannelHandle`] can produce between polls.
pub enum DataChannelEvent {
    Open,
    Message(Bytes),
    Closed,
}

/// A single data channel, either the unreliable or the reliable one of a
/// peer connection.
pub trait DataChannelHandle: Send {
    fn label(&self) -> ChannelLabel;
    fn ready_state(&self) -> DataChannelReadyState;
    /// `RTCDataChannel.bufferedAmount`, consulted by the `drop-moves`
    /// backpressure policy (source spec §4.7).
    fn buffered_amount(&self) -> u32;
    fn send(&mut self, bytes: &[u8]) -> Result<(), MeshError>;
    /// Drains the next queued event, if any. Called once per pump from
    /// [`crate::peer_manager::PeerManager`].
    fn poll_event(&mut self) -> Option<DataChannelEvent>;
    fn close(&mut self);
}

/// One event an [`RtcPeerConnectionHandle`] can produce between polls:
/// a locally gathered ICE candidate to relay to the remote peer, or an
/// inbound data channel from `ondatachannel`, or a connection-state
/// transition.
pub enum PeerConnectionEvent {
    LocalIceCandidate(protocol::IceCandidateInit),
    DataChannelOpened(Box<dyn DataChannelHandle>),
    ConnectionStateChanged(PeerConnectionState),
}

/// One RTC peer connection, exclusively owned by [`crate::peer::PeerInfo`].
///
/// `create_offer`/`create_answer`/`set_local_description`/
/// `set_remote_description`/`add_ice_candidate` are genuinely `async fn`s,
/// not a polled-synchronous facade: source spec §5 names every one of
/// these a suspension point, and a real `RTCPeerConnection` resolves each
/// through a JS `Promise`. [`crate::peer_manager::PeerManager`] already
/// runs inside `async fn`s for exactly this reason, the same way it awaits
/// [`crate::signaling::SignalingAdapter::announce`].
///
/// Declared `?Send`: the `wasm32` backend awaits `web_sys`/
/// `wasm_bindgen_futures::JsFuture` promises, and `JsValue` is never `Send`.
/// wasm32 has no OS threads to race over in the first place; the `Send`
/// supertrait below still lets `Box<dyn RtcPeerConnectionHandle>` satisfy
/// callers elsewhere that expect it, via an `unsafe impl Send` on the
/// wasm-side handle types.
#[async_trait(?Send)]
pub trait RtcPeerConnectionHandle: Send {
    fn connection_state(&self) -> PeerConnectionState;

    /// Opens a new data channel with the given reliability characteristics
    /// (source spec §4.7: `ordered=false, maxRetransmits=0` for
    /// `game-unreliable`; `ordered=true` with default retransmission for
    /// `game-reliable`). Channel creation itself is synchronous in every
    /// WebRTC implementation, unlike the SDP/ICE operations below.
    fn create_data_channel(&mut self, label: ChannelLabel) -> Box<dyn DataChannelHandle>;

    async fn create_offer(&mut self) -> Result<protocol::SdpDescription, MeshError>;
    async fn create_answer(&mut self) -> Result<protocol::SdpDescription, MeshError>;
    async fn set_local_description(&mut self, description: protocol::SdpDescription) -> Result<(), MeshError>;
    async fn set_remote_description(&mut self, description: protocol::SdpDescription) -> Result<(), MeshError>;
    /// `true` once [`set_remote_description`](Self::set_remote_description)
    /// has completed — callers buffer ICE candidates that arrive before
    /// this (source spec §4.7 "ICE handling").
    fn has_remote_description(&self) -> bool;
    async fn add_ice_candidate(&mut self, candidate: protocol::IceCandidateInit) -> Result<(), MeshError>;

    /// Called on `ondatachannel` by the glue code that drives this
    /// connection, and surfaced here as a polled event.
    fn poll_event(&mut self) -> Option<PeerConnectionEvent>;

    fn close(&mut self);
}

/// Creates peer connections pre-configured with the session's ICE servers.
/// The one seam `backbone-lib` needs to manufacture a fresh
/// [`RtcPeerConnectionHandle`] without knowing how it's actually backed.
pub trait RtcPeerFactory: Send + Sync {
    fn create_peer_connection(&self) -> Box<dyn RtcPeerConnectionHandle>;
}
