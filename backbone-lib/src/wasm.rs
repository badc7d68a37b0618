//! The `web_sys`-backed [`RtcPeerFactory`] used when this crate is compiled
//! to `wasm32` and embedded in a browser. [`loopback`](crate::loopback) is
//! this module's in-process stand-in for native tests; this one talks to a
//! real `RTCPeerConnection`.
//!
//! Every `async fn` on [`RtcPeerConnectionHandle`] awaits the matching
//! browser `Promise` through [`wasm_bindgen_futures::JsFuture`] — there is
//! no synchronous shortcut here, which is exactly why that trait stopped
//! being fully synchronous (source spec §5). Events the browser delivers by
//! callback (`onicecandidate`, `ondatachannel`, `onconnectionstatechange`,
//! `onopen`/`onmessage`/`onclose`) are pushed into a shared queue from a
//! [`Closure`] and drained by [`poll_event`](RtcPeerConnectionHandle::poll_event),
//! the same poll shape the loopback backend and every other caller in
//! [`crate::peer_manager`] already expects.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use async_trait::async_trait;
use bytes::Bytes;
use js_sys::Reflect;
use protocol::{IceCandidateInit, SdpDescription, SdpType};
use wasm_bindgen::closure::Closure;
use wasm_bindgen::{JsCast, JsValue};
use wasm_bindgen_futures::JsFuture;
use web_sys::{
    MessageEvent, RtcConfiguration, RtcDataChannel, RtcDataChannelEvent, RtcDataChannelInit, RtcDataChannelState,
    RtcDataChannelType, RtcIceCandidate, RtcIceCandidateInit as WebIceCandidateInit, RtcPeerConnection,
    RtcPeerConnectionIceEvent, RtcPeerConnectionState, RtcSdpType, RtcSessionDescriptionInit,
};

use crate::config::IceServerConfig;
use crate::error::MeshError;
use crate::transport::{
    ChannelLabel, DataChannelEvent, DataChannelHandle, DataChannelReadyState, PeerConnectionEvent,
    PeerConnectionState, RtcPeerConnectionHandle, RtcPeerFactory,
};

fn js_err(context: &str, err: JsValue) -> MeshError {
    let message = Reflect::get(&err, &JsValue::from_str("message"))
        .ok()
        .and_then(|v| v.as_string())
        .unwrap_or_else(|| format!("{err:?}"));
    MeshError::Rtc(format!("{context}: {message}"))
}

fn map_connection_state(state: RtcPeerConnectionState) -> PeerConnectionState {
    match state {
        RtcPeerConnectionState::New => PeerConnectionState::New,
        RtcPeerConnectionState::Connecting => PeerConnectionState::Connecting,
        RtcPeerConnectionState::Connected => PeerConnectionState::Connected,
        RtcPeerConnectionState::Disconnected => PeerConnectionState::Disconnected,
        RtcPeerConnectionState::Failed => PeerConnectionState::Failed,
        RtcPeerConnectionState::Closed => PeerConnectionState::Closed,
        _ => PeerConnectionState::Disconnected,
    }
}

fn map_channel_state(state: RtcDataChannelState) -> DataChannelReadyState {
    match state {
        RtcDataChannelState::Connecting => DataChannelReadyState::Connecting,
        RtcDataChannelState::Open => DataChannelReadyState::Open,
        RtcDataChannelState::Closing => DataChannelReadyState::Closing,
        RtcDataChannelState::Closed => DataChannelReadyState::Closed,
        _ => DataChannelReadyState::Closed,
    }
}

fn build_rtc_configuration(ice_servers: &[IceServerConfig]) -> RtcConfiguration {
    let config = RtcConfiguration::new();
    let servers = js_sys::Array::new();
    for server in ice_servers {
        let entry = web_sys::RtcIceServer::new();
        let urls = js_sys::Array::new();
        for url in &server.urls {
            urls.push(&JsValue::from_str(url));
        }
        entry.set_urls(&urls.into());
        servers.push(&entry);
    }
    config.set_ice_servers(&servers);
    config
}

/// Wraps a `web_sys::RtcDataChannel`, forwarding its `onopen`/`onmessage`/
/// `onclose` callbacks into a queue drained by [`DataChannelHandle::poll_event`].
pub struct WasmDataChannel {
    label: ChannelLabel,
    channel: RtcDataChannel,
    events: Rc<RefCell<VecDeque<DataChannelEvent>>>,
    // Closures must outlive the channel's listeners; dropping them
    // detaches the callback.
    _on_open: Closure<dyn FnMut()>,
    _on_message: Closure<dyn FnMut(MessageEvent)>,
    _on_close: Closure<dyn FnMut()>,
}

impl WasmDataChannel {
    fn new(label: ChannelLabel, channel: RtcDataChannel) -> Self {
        channel.set_binary_type(web_sys::RtcDataChannelType::Arraybuffer);
        let events: Rc<RefCell<VecDeque<DataChannelEvent>>> = Rc::new(RefCell::new(VecDeque::new()));

        let open_events = events.clone();
        let on_open = Closure::wrap(Box::new(move || {
            open_events.borrow_mut().push_back(DataChannelEvent::Open);
        }) as Box<dyn FnMut()>);
        channel.set_onopen(Some(on_open.as_ref().unchecked_ref()));

        let message_events = events.clone();
        let on_message = Closure::wrap(Box::new(move |event: MessageEvent| {
            if let Ok(array_buffer) = event.data().dyn_into::<js_sys::ArrayBuffer>() {
                let array = js_sys::Uint8Array::new(&array_buffer);
                let bytes = Bytes::from(array.to_vec());
                message_events.borrow_mut().push_back(DataChannelEvent::Message(bytes));
            }
        }) as Box<dyn FnMut(MessageEvent)>);
        channel.set_onmessage(Some(on_message.as_ref().unchecked_ref()));

        let close_events = events.clone();
        let on_close = Closure::wrap(Box::new(move || {
            close_events.borrow_mut().push_back(DataChannelEvent::Closed);
        }) as Box<dyn FnMut()>);
        channel.set_onclose(Some(on_close.as_ref().unchecked_ref()));

        Self { label, channel, events, _on_open: on_open, _on_message: on_message, _on_close: on_close }
    }
}

// `wasm32-unknown-unknown` never runs more than one thread; the `Send`
// bound on `RtcPeerConnectionHandle`/`DataChannelHandle` exists for the
// native loopback backend, not this one, and the `Rc`/`Closure` fields
// below never actually cross a thread boundary.
unsafe impl Send for WasmDataChannel {}

impl DataChannelHandle for WasmDataChannel {
    fn label(&self) -> ChannelLabel {
        self.label
    }

    fn ready_state(&self) -> DataChannelReadyState {
        map_channel_state(self.channel.ready_state())
    }

    fn buffered_amount(&self) -> u32 {
        self.channel.buffered_amount()
    }

    fn send(&mut self, bytes: &[u8]) -> Result<(), MeshError> {
        self.channel.send_with_u8_array(bytes).map_err(|err| js_err("RtcDataChannel.send", err))
    }

    fn poll_event(&mut self) -> Option<DataChannelEvent> {
        self.events.borrow_mut().pop_front()
    }

    fn close(&mut self) {
        self.channel.close();
    }
}

/// Wraps a `web_sys::RtcPeerConnection`. `onicecandidate`,
/// `ondatachannel` and `onconnectionstatechange` all feed the same queue —
/// [`crate::peer_manager::PeerManager::pump`] distinguishes them by variant,
/// same as it already does for [`crate::loopback::LoopbackRtc`].
pub struct WasmRtc {
    connection: RtcPeerConnection,
    events: Rc<RefCell<VecDeque<PeerConnectionEvent>>>,
    _on_ice_candidate: Closure<dyn FnMut(RtcPeerConnectionIceEvent)>,
    _on_data_channel: Closure<dyn FnMut(RtcDataChannelEvent)>,
    _on_connection_state_change: Closure<dyn FnMut()>,
}

impl WasmRtc {
    fn new(ice_servers: &[IceServerConfig]) -> Result<Self, MeshError> {
        let config = build_rtc_configuration(ice_servers);
        let connection =
            RtcPeerConnection::new_with_configuration(&config).map_err(|err| js_err("RtcPeerConnection::new", err))?;
        let events: Rc<RefCell<VecDeque<PeerConnectionEvent>>> = Rc::new(RefCell::new(VecDeque::new()));

        let ice_events = events.clone();
        let on_ice_candidate = Closure::wrap(Box::new(move |event: RtcPeerConnectionIceEvent| {
            if let Some(candidate) = event.candidate() {
                ice_events.borrow_mut().push_back(PeerConnectionEvent::LocalIceCandidate(IceCandidateInit {
                    candidate: candidate.candidate(),
                    sdp_mid: candidate.sdp_mid(),
                    sdp_m_line_index: candidate.sdp_m_line_index(),
                }));
            }
        }) as Box<dyn FnMut(RtcPeerConnectionIceEvent)>);
        connection.set_onicecandidate(Some(on_ice_candidate.as_ref().unchecked_ref()));

        let channel_events = events.clone();
        let on_data_channel = Closure::wrap(Box::new(move |event: RtcDataChannelEvent| {
            let channel = event.channel();
            let Some(label) = ChannelLabel::from_label(&channel.label()) else { return };
            channel_events.borrow_mut().push_back(PeerConnectionEvent::DataChannelOpened(Box::new(
                WasmDataChannel::new(label, channel),
            )));
        }) as Box<dyn FnMut(RtcDataChannelEvent)>);
        connection.set_ondatachannel(Some(on_data_channel.as_ref().unchecked_ref()));

        let state_events = events.clone();
        let connection_for_state = connection.clone();
        let on_connection_state_change = Closure::wrap(Box::new(move || {
            state_events
                .borrow_mut()
                .push_back(PeerConnectionEvent::ConnectionStateChanged(map_connection_state(
                    connection_for_state.connection_state(),
                )));
        }) as Box<dyn FnMut()>);
        connection.set_onconnectionstatechange(Some(on_connection_state_change.as_ref().unchecked_ref()));

        Ok(Self {
            connection,
            events,
            _on_ice_candidate: on_ice_candidate,
            _on_data_channel: on_data_channel,
            _on_connection_state_change: on_connection_state_change,
        })
    }
}

unsafe impl Send for WasmRtc {}

#[async_trait(?Send)]
impl RtcPeerConnectionHandle for WasmRtc {
    fn connection_state(&self) -> PeerConnectionState {
        map_connection_state(self.connection.connection_state())
    }

    fn create_data_channel(&mut self, label: ChannelLabel) -> Box<dyn DataChannelHandle> {
        let init = RtcDataChannelInit::new();
        match label {
            ChannelLabel::Unreliable => {
                init.set_ordered(false);
                init.set_max_retransmits(0);
            }
            ChannelLabel::Reliable => {
                init.set_ordered(true);
            }
        }
        let channel = self.connection.create_data_channel_with_data_channel_dict(label.as_label(), &init);
        Box::new(WasmDataChannel::new(label, channel))
    }

    async fn create_offer(&mut self) -> Result<SdpDescription, MeshError> {
        let promise = self.connection.create_offer();
        let value = JsFuture::from(promise).await.map_err(|err| js_err("createOffer", err))?;
        let sdp = Reflect::get(&value, &JsValue::from_str("sdp"))
            .ok()
            .and_then(|v| v.as_string())
            .ok_or_else(|| MeshError::Rtc("createOffer returned no sdp".to_string()))?;
        Ok(SdpDescription { sdp_type: SdpType::Offer, sdp })
    }

    async fn create_answer(&mut self) -> Result<SdpDescription, MeshError> {
        let promise = self.connection.create_answer();
        let value = JsFuture::from(promise).await.map_err(|err| js_err("createAnswer", err))?;
        let sdp = Reflect::get(&value, &JsValue::from_str("sdp"))
            .ok()
            .and_then(|v| v.as_string())
            .ok_or_else(|| MeshError::Rtc("createAnswer returned no sdp".to_string()))?;
        Ok(SdpDescription { sdp_type: SdpType::Answer, sdp })
    }

    async fn set_local_description(&mut self, description: SdpDescription) -> Result<(), MeshError> {
        let init = RtcSessionDescriptionInit::new(match description.sdp_type {
            SdpType::Offer => RtcSdpType::Offer,
            SdpType::Answer => RtcSdpType::Answer,
        });
        init.set_sdp(&description.sdp);
        let promise = self.connection.set_local_description(&init);
        JsFuture::from(promise).await.map_err(|err| js_err("setLocalDescription", err))?;
        Ok(())
    }

    async fn set_remote_description(&mut self, description: SdpDescription) -> Result<(), MeshError> {
        let init = RtcSessionDescriptionInit::new(match description.sdp_type {
            SdpType::Offer => RtcSdpType::Offer,
            SdpType::Answer => RtcSdpType::Answer,
        });
        init.set_sdp(&description.sdp);
        let promise = self.connection.set_remote_description(&init);
        JsFuture::from(promise).await.map_err(|err| js_err("setRemoteDescription", err))?;
        Ok(())
    }

    fn has_remote_description(&self) -> bool {
        self.connection.remote_description().is_some()
    }

    async fn add_ice_candidate(&mut self, candidate: IceCandidateInit) -> Result<(), MeshError> {
        let init = WebIceCandidateInit::new(&candidate.candidate);
        init.set_sdp_mid(candidate.sdp_mid.as_deref());
        init.set_sdp_m_line_index(candidate.sdp_m_line_index);
        let ice = RtcIceCandidate::new(&init).map_err(|err| js_err("RtcIceCandidate::new", err))?;
        let promise = self.connection.add_ice_candidate_with_opt_rtc_ice_candidate(Some(&ice));
        JsFuture::from(promise).await.map_err(|err| js_err("addIceCandidate", err))?;
        Ok(())
    }

    fn poll_event(&mut self) -> Option<PeerConnectionEvent> {
        self.events.borrow_mut().pop_front()
    }

    fn close(&mut self) {
        self.connection.close();
    }
}

/// Builds [`WasmRtc`] instances pre-configured with the session's ICE
/// servers. Construction itself can only fail on a malformed
/// `RtcConfiguration`, which never happens given a valid [`IceServerConfig`]
/// list — callers that hit it anyway get a connection already in
/// [`PeerConnectionState::Closed`] rather than a panic.
pub struct WasmRtcFactory {
    ice_servers: Vec<IceServerConfig>,
}

impl WasmRtcFactory {
    pub fn new(ice_servers: Vec<IceServerConfig>) -> Self {
        Self { ice_servers }
    }
}

/// A closed, immediately-unusable connection returned when `RTCPeerConnection`
/// construction itself throws — `peer_manager` always closes a handle before
/// discarding it, so routing the failure through `connection_state()` rather
/// than panicking keeps that path uniform.
struct DeadRtc;

unsafe impl Send for DeadRtc {}

#[async_trait]
impl RtcPeerConnectionHandle for DeadRtc {
    fn connection_state(&self) -> PeerConnectionState {
        PeerConnectionState::Closed
    }
    fn create_data_channel(&mut self, _label: ChannelLabel) -> Box<dyn DataChannelHandle> {
        unreachable!("peer_manager closes the connection before ever requesting a channel")
    }
    async fn create_offer(&mut self) -> Result<SdpDescription, MeshError> {
        Err(MeshError::Rtc("peer connection failed to construct".to_string()))
    }
    async fn create_answer(&mut self) -> Result<SdpDescription, MeshError> {
        Err(MeshError::Rtc("peer connection failed to construct".to_string()))
    }
    async fn set_local_description(&mut self, _description: SdpDescription) -> Result<(), MeshError> {
        Err(MeshError::Rtc("peer connection failed to construct".to_string()))
    }
    async fn set_remote_description(&mut self, _description: SdpDescription) -> Result<(), MeshError> {
        Err(MeshError::Rtc("peer connection failed to construct".to_string()))
    }
    fn has_remote_description(&self) -> bool {
        false
    }
    async fn add_ice_candidate(&mut self, _candidate: IceCandidateInit) -> Result<(), MeshError> {
        Err(MeshError::Rtc("peer connection failed to construct".to_string()))
    }
    fn poll_event(&mut self) -> Option<PeerConnectionEvent> {
        None
    }
    fn close(&mut self) {}
}

impl RtcPeerFactory for WasmRtcFactory {
    fn create_peer_connection(&self) -> Box<dyn RtcPeerConnectionHandle> {
        match WasmRtc::new(&self.ice_servers) {
            Ok(rtc) => Box::new(rtc),
            Err(_) => Box::new(DeadRtc),
        }
    }
}
