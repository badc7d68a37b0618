//! An in-process [`RtcPeerFactory`] whose connections accept any offer/
//! answer unconditionally rather than negotiating with a real ICE agent —
//! the native-build analogue of the teacher's own pattern of exercising game
//! logic directly instead of through a live socket. Building block for this
//! crate's own [`crate::peer_manager::PeerManager`] coverage, which needs a
//! [`RtcPeerConnectionHandle`]/[`DataChannelHandle`] pair it can drive
//! deterministically without a browser.
//!
//! Two [`LoopbackDataChannel`] instances constructed by hand, each given the
//! other's [`Link`] as `remote`, deliver a `send` on one side as a
//! `poll_event` message on the other — see the test below. A channel minted
//! by [`LoopbackRtc::create_data_channel`] is not wired to a peer's this way;
//! it only exists to give [`crate::peer_manager::PeerManager`] something
//! that satisfies [`DataChannelHandle`] while driving the offer/initiator
//! side of its own state machine in isolation.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use protocol::{IceCandidateInit, SdpDescription, SdpType};

use crate::error::MeshError;
use crate::transport::{
    ChannelLabel, DataChannelEvent, DataChannelHandle, DataChannelReadyState, PeerConnectionEvent,
    PeerConnectionState, RtcPeerConnectionHandle, RtcPeerFactory,
};

pub struct Link {
    inbound: Mutex<VecDeque<Bytes>>,
}

impl Link {
    pub fn new() -> Arc<Self> {
        Arc::new(Self { inbound: Mutex::new(VecDeque::new()) })
    }
}

/// One endpoint of an in-process data channel pair.
pub struct LoopbackDataChannel {
    label: ChannelLabel,
    state: DataChannelReadyState,
    local: Arc<Link>,
    remote: Arc<Link>,
}

impl DataChannelHandle for LoopbackDataChannel {
    fn label(&self) -> ChannelLabel {
        self.label
    }

    fn ready_state(&self) -> DataChannelReadyState {
        self.state
    }

    fn buffered_amount(&self) -> u32 {
        0
    }

    fn send(&mut self, bytes: &[u8]) -> Result<(), MeshError> {
        self.remote.inbound.lock().unwrap().push_back(Bytes::copy_from_slice(bytes));
        Ok(())
    }

    fn poll_event(&mut self) -> Option<DataChannelEvent> {
        self.local.inbound.lock().unwrap().pop_front().map(DataChannelEvent::Message)
    }

    fn close(&mut self) {
        self.state = DataChannelReadyState::Closed;
    }
}

/// One endpoint of an in-process peer connection pair. Unconditionally
/// reports `Connected` once a remote description is installed, since there
/// is no real ICE/DTLS handshake to wait on.
pub struct LoopbackRtc {
    state: PeerConnectionState,
    has_remote_desc: bool,
    queued_events: VecDeque<PeerConnectionEvent>,
}

impl LoopbackRtc {
    pub fn new() -> Self {
        Self { state: PeerConnectionState::New, has_remote_desc: false, queued_events: VecDeque::new() }
    }
}

impl Default for LoopbackRtc {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait(?Send)]
impl RtcPeerConnectionHandle for LoopbackRtc {
    fn connection_state(&self) -> PeerConnectionState {
        self.state
    }

    fn create_data_channel(&mut self, label: ChannelLabel) -> Box<dyn DataChannelHandle> {
        // Not linked to any other connection's channel — there is no
        // rendezvous point between two independently-constructed
        // `LoopbackRtc`s. A test that needs two ends to actually talk builds
        // a [`LoopbackDataChannel`] pair directly, sharing one `Link` each
        // way, instead of going through this factory method.
        let a = Arc::new(Link { inbound: Mutex::new(VecDeque::new()) });
        let b = Arc::new(Link { inbound: Mutex::new(VecDeque::new()) });
        Box::new(LoopbackDataChannel { label, state: DataChannelReadyState::Open, local: a, remote: b })
    }

    async fn create_offer(&mut self) -> Result<SdpDescription, MeshError> {
        Ok(SdpDescription { sdp_type: SdpType::Offer, sdp: "loopback-offer".to_string() })
    }

    async fn create_answer(&mut self) -> Result<SdpDescription, MeshError> {
        Ok(SdpDescription { sdp_type: SdpType::Answer, sdp: "loopback-answer".to_string() })
    }

    async fn set_local_description(&mut self, _description: SdpDescription) -> Result<(), MeshError> {
        Ok(())
    }

    async fn set_remote_description(&mut self, _description: SdpDescription) -> Result<(), MeshError> {
        self.has_remote_desc = true;
        self.state = PeerConnectionState::Connected;
        self.queued_events.push_back(PeerConnectionEvent::ConnectionStateChanged(PeerConnectionState::Connected));
        Ok(())
    }

    fn has_remote_description(&self) -> bool {
        self.has_remote_desc
    }

    async fn add_ice_candidate(&mut self, _candidate: IceCandidateInit) -> Result<(), MeshError> {
        Ok(())
    }

    fn poll_event(&mut self) -> Option<PeerConnectionEvent> {
        self.queued_events.pop_front()
    }

    fn close(&mut self) {
        self.state = PeerConnectionState::Closed;
        self.queued_events.push_back(PeerConnectionEvent::ConnectionStateChanged(PeerConnectionState::Closed));
    }
}

/// Always hands out a fresh, unconnected [`LoopbackRtc`].
pub struct LoopbackFactory;

impl RtcPeerFactory for LoopbackFactory {
    fn create_peer_connection(&self) -> Box<dyn RtcPeerConnectionHandle> {
        Box::new(LoopbackRtc::new())
    }
}
