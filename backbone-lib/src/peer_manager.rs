//! Mesh formation, dual data channels, backpressure, host election and the
//! internal ping loop (source spec §4.7) — the densest module in this
//! crate. [`crate::session::MeshSession`] drives it once per `tick()` and
//! forwards signaling events into it.
//!
//! This module knows nothing about [`crate::event_bus::EventBus`] — it
//! reports what happened through [`PeerLifecycleEvent`] and returns inbound
//! [`NetMessage`]s, and the session facade decides how to turn those into
//! bus events and the hostChange/peerJoin/peerLeave side effects named in
//! source spec §4.8 (a newly-elected host broadcasting a snapshot, for
//! instance, is session's job, not this module's).

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use bytes::Bytes;
use protocol::{IceCandidateInit, MessagePayload, NetMessage, PlayerId, SdpDescription, SdpType};

use crate::config::{BackpressureConfig, BackpressureStrategy, SerializationScheme};
use crate::peer::{PeerInfo, PENDING_OFFER_TIMEOUT_MS, PING_INTERVAL_MS};
use crate::serializer;
use crate::signaling::SignalingAdapter;
use crate::timer::Timer;
use crate::transport::{
    ChannelLabel, DataChannelEvent, DataChannelReadyState, PeerConnectionEvent, PeerConnectionState,
    RtcPeerConnectionHandle, RtcPeerFactory,
};

/// A fact about the peer set that the session facade needs to react to,
/// in the order it happened.
#[derive(Clone, Debug)]
pub enum PeerLifecycleEvent {
    HostChange(PlayerId),
    PeerJoin(PlayerId),
    PeerLeave(PlayerId),
    MaxCapacityReached(u16),
    /// A ping round-trip completed; carries the measured RTT.
    Ping { peer: PlayerId, rtt_ms: f64 },
}

/// Owns every [`PeerInfo`] and the RTC connections behind them. Three pools,
/// matching the lifecycle in source spec §4.7:
///
/// - `pending_initiators`: offer sent, no answer yet (subject to the 30 s
///   timeout).
/// - `pending_connect`: an SDP exchange has completed (we've either received
///   an answer or sent one) and we're waiting for the underlying
///   transport's own ICE/DTLS handshake to reach `connected`. The source
///   spec's data model doesn't name this pool separately — real WebRTC
///   code tracks it implicitly in event-handler closures — kept explicit
///   here so a second offer/answer for the same id can be rejected as a
///   duplicate attempt. It does *not* count against the `maxPlayers`
///   capacity gate (see `capacity_reached`), which is `|peers| +
///   |pendingInitiators|` per source spec §4.7, literally.
/// - `peers`: promoted once `connected` fires; the active set used for
///   broadcast, host election and capacity accounting.
pub struct PeerManager {
    local_id: PlayerId,
    factory: Arc<dyn RtcPeerFactory>,
    max_players: u16,
    backpressure: BackpressureConfig,
    serialization: SerializationScheme,

    pending_initiators: HashMap<PlayerId, PeerInfo>,
    pending_connect: HashMap<PlayerId, PeerInfo>,
    peers: HashMap<PlayerId, PeerInfo>,
    buffered_remote_ice: HashMap<PlayerId, Vec<IceCandidateInit>>,

    host_id: Option<PlayerId>,
    pending_offer_timers: Timer<PlayerId>,
    ping_elapsed_ms: f64,
    last_pump_ts: Option<f64>,
}

impl PeerManager {
    pub fn new(
        local_id: PlayerId,
        factory: Arc<dyn RtcPeerFactory>,
        max_players: u16,
        backpressure: BackpressureConfig,
        serialization: SerializationScheme,
    ) -> Self {
        Self {
            local_id,
            factory,
            max_players,
            backpressure,
            serialization,
            pending_initiators: HashMap::new(),
            pending_connect: HashMap::new(),
            peers: HashMap::new(),
            buffered_remote_ice: HashMap::new(),
            host_id: None,
            pending_offer_timers: Timer::new(),
            ping_elapsed_ms: 0.0,
            last_pump_ts: None,
        }
    }

    pub fn host_id(&self) -> Option<&PlayerId> {
        self.host_id.as_ref()
    }

    pub fn connected_peer_ids(&self) -> impl Iterator<Item = &PlayerId> {
        self.peers.keys()
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    /// The capacity gate from source spec §4.7, literally:
    /// `|peers| + |pendingInitiators| < maxPlayers - 1`. `pending_connect`
    /// (an SDP exchange that finished but hasn't reached `connected` yet)
    /// is deliberately excluded even though it is as real an in-flight slot
    /// as `pending_initiators` — the spec's own data model names only
    /// `peers` and `pendingInitiators` in this formula, so widening it to
    /// include a third bucket would admit one fewer concurrent attempt than
    /// the spec's literal rule and change the `maxPlayers`-th-attempt
    /// boundary §8 tests against.
    fn capacity_reached(&self) -> bool {
        self.peers.len() + self.pending_initiators.len() >= self.max_players.saturating_sub(1) as usize
    }

    /// Lowest id over `{local} ∪ connected peers` under
    /// [`protocol::compare_player_ids`] (source spec §4.7 "Host election").
    /// Appends a `HostChange` fact only on a real change — callers append
    /// this *before* any `PeerJoin` produced in the same step, since the
    /// source spec calls out that ordering explicitly.
    fn recompute_host(&mut self, events: &mut Vec<PeerLifecycleEvent>) {
        let mut candidate = self.local_id.clone();
        for id in self.peers.keys() {
            if *id < candidate {
                candidate = id.clone();
            }
        }
        if self.host_id.as_ref() != Some(&candidate) {
            self.host_id = Some(candidate.clone());
            events.push(PeerLifecycleEvent::HostChange(candidate));
        }
    }

    /// Finds the RTC connection for `id` across every pool that can hold
    /// one, regardless of its lifecycle stage.
    fn find_rtc_mut(&mut self, id: &PlayerId) -> Option<&mut dyn RtcPeerConnectionHandle> {
        if let Some(peer) = self.pending_initiators.get_mut(id) {
            return Some(peer.rtc.as_mut());
        }
        if let Some(peer) = self.pending_connect.get_mut(id) {
            return Some(peer.rtc.as_mut());
        }
        if let Some(peer) = self.peers.get_mut(id) {
            return Some(peer.rtc.as_mut());
        }
        None
    }

    /// Reconciles against a fresh roster push: tears down connections (and
    /// attempts) for ids no longer listed, then initiates toward every
    /// unlisted, unconnected id this side is responsible for (source spec
    /// §4.7 "mesh formation" / "initiator direction").
    pub async fn handle_roster(
        &mut self,
        roster: &[PlayerId],
        signaling: &mut dyn SignalingAdapter,
        events: &mut Vec<PeerLifecycleEvent>,
    ) {
        let listed: HashSet<&PlayerId> = roster.iter().collect();

        let departed: Vec<PlayerId> = self
            .peers
            .keys()
            .chain(self.pending_connect.keys())
            .chain(self.pending_initiators.keys())
            .filter(|id| !listed.contains(id))
            .cloned()
            .collect();
        for id in departed {
            self.disconnect_peer(&id, events);
        }

        for peer_id in roster {
            if *peer_id == self.local_id {
                continue;
            }
            if self.peers.contains_key(peer_id)
                || self.pending_connect.contains_key(peer_id)
                || self.pending_initiators.contains_key(peer_id)
            {
                continue;
            }
            if self.capacity_reached() {
                events.push(PeerLifecycleEvent::MaxCapacityReached(self.max_players));
                continue;
            }
            // Initiator direction: the lower id (by total order) opens the
            // connection; the higher id waits for an offer.
            if self.local_id < *peer_id {
                self.initiate(peer_id.clone(), signaling).await;
            }
        }
    }

    async fn initiate(&mut self, peer_id: PlayerId, signaling: &mut dyn SignalingAdapter) {
        let mut rtc = self.factory.create_peer_connection();
        let dc_unreliable = rtc.create_data_channel(ChannelLabel::Unreliable);
        let dc_reliable = rtc.create_data_channel(ChannelLabel::Reliable);

        let offer = match rtc.create_offer().await {
            Ok(offer) => offer,
            Err(_) => {
                rtc.close();
                return;
            }
        };
        if rtc.set_local_description(offer.clone()).await.is_err() {
            rtc.close();
            return;
        }
        if signaling.announce(offer, Some(peer_id.clone())).await.is_err() {
            rtc.close();
            return;
        }

        let mut peer = PeerInfo::new(peer_id.clone(), rtc, true);
        peer.attach_channel(dc_unreliable);
        peer.attach_channel(dc_reliable);
        self.pending_offer_timers.start_timer(peer_id.clone(), PENDING_OFFER_TIMEOUT_MS);
        self.pending_initiators.insert(peer_id, peer);
    }

    /// On receiving an offer from `from` (source spec §4.7 "Responder
    /// role"): capacity check, create the connection, install the remote
    /// description, flush any ICE that arrived first, then answer.
    pub async fn handle_offer(
        &mut self,
        from: PlayerId,
        description: SdpDescription,
        signaling: &mut dyn SignalingAdapter,
        events: &mut Vec<PeerLifecycleEvent>,
    ) {
        debug_assert_eq!(description.sdp_type, SdpType::Offer);
        if self.peers.contains_key(&from)
            || self.pending_connect.contains_key(&from)
            || self.pending_initiators.contains_key(&from)
        {
            return;
        }
        if self.capacity_reached() {
            events.push(PeerLifecycleEvent::MaxCapacityReached(self.max_players));
            return;
        }

        let mut rtc = self.factory.create_peer_connection();
        if rtc.set_remote_description(description).await.is_err() {
            rtc.close();
            return;
        }
        if let Some(buffered) = self.buffered_remote_ice.remove(&from) {
            for candidate in buffered {
                let _ = rtc.add_ice_candidate(candidate).await;
            }
        }
        let answer = match rtc.create_answer().await {
            Ok(answer) => answer,
            Err(_) => {
                rtc.close();
                return;
            }
        };
        if rtc.set_local_description(answer.clone()).await.is_err() {
            rtc.close();
            return;
        }
        if signaling.announce(answer, Some(from.clone())).await.is_err() {
            rtc.close();
            return;
        }

        let peer = PeerInfo::new(from.clone(), rtc, false);
        self.pending_connect.insert(from, peer);
    }

    /// On receiving an answer for an offer we sent (source spec §4.7
    /// "Initiator role"): install the remote description, flush buffered
    /// ICE, and move the attempt into `pending_connect` to await `connected`.
    pub async fn handle_answer(&mut self, from: PlayerId, description: SdpDescription) {
        debug_assert_eq!(description.sdp_type, SdpType::Answer);
        let Some(mut peer) = self.pending_initiators.remove(&from) else {
            return;
        };
        self.pending_offer_timers.cancel_timer(&from);
        if peer.rtc.set_remote_description(description).await.is_err() {
            peer.rtc.close();
            return;
        }
        if let Some(buffered) = self.buffered_remote_ice.remove(&from) {
            for candidate in buffered {
                let _ = peer.rtc.add_ice_candidate(candidate).await;
            }
        }
        self.pending_connect.insert(from, peer);
    }

    /// Applies an inbound ICE candidate immediately if the matching
    /// connection already has a remote description installed, otherwise
    /// buffers it (source spec §4.7 "ICE handling").
    pub async fn handle_remote_ice(&mut self, from: PlayerId, candidate: IceCandidateInit) {
        if let Some(rtc) = self.find_rtc_mut(&from) {
            if rtc.has_remote_description() {
                let _ = rtc.add_ice_candidate(candidate).await;
                return;
            }
        }
        self.buffered_remote_ice.entry(from).or_default().push(candidate);
    }

    /// Tears down a connection (active or in-flight) and, if it had been
    /// promoted, reports `PeerLeave` and re-elects the host.
    pub fn disconnect_peer(&mut self, id: &PlayerId, events: &mut Vec<PeerLifecycleEvent>) {
        self.pending_offer_timers.cancel_timer(id);
        self.buffered_remote_ice.remove(id);
        if let Some(mut peer) = self.pending_initiators.remove(id) {
            peer.rtc.close();
        }
        if let Some(mut peer) = self.pending_connect.remove(id) {
            peer.rtc.close();
        }
        if let Some(mut peer) = self.peers.remove(id) {
            peer.rtc.close();
            events.push(PeerLifecycleEvent::PeerLeave(id.clone()));
            self.recompute_host(events);
        }
    }

    /// One pump of the network layer: advances the pending-offer timeout,
    /// drains every RTC connection's events (forwarding local ICE through
    /// `signaling`, promoting newly-`connected` attempts, attaching
    /// `ondatachannel` channels), drains data-channel messages (applying
    /// anti-spoofing and intercepting ping/pong), and runs the 2 s ping
    /// loop. Returns the inbound application messages this pump produced in
    /// arrival order, plus the lifecycle facts it produced in order.
    pub async fn pump(
        &mut self,
        now: f64,
        signaling: &mut dyn SignalingAdapter,
    ) -> (Vec<NetMessage>, Vec<PeerLifecycleEvent>) {
        let delta_ms = self.last_pump_ts.map_or(0.0, |prev| (now - prev).max(0.0));
        self.last_pump_ts = Some(now);
        let mut events = Vec::new();

        for id in self.pending_offer_timers.update_and_get_expired(delta_ms) {
            if let Some(mut peer) = self.pending_initiators.remove(&id) {
                peer.rtc.close();
            }
        }

        let mut local_ice: Vec<(PlayerId, IceCandidateInit)> = Vec::new();
        let mut newly_connected: Vec<PlayerId> = Vec::new();
        let mut newly_dropped: Vec<PlayerId> = Vec::new();

        for (id, peer) in self.pending_initiators.iter_mut() {
            while let Some(event) = peer.rtc.poll_event() {
                match event {
                    PeerConnectionEvent::LocalIceCandidate(candidate) => {
                        local_ice.push((id.clone(), candidate));
                    }
                    PeerConnectionEvent::ConnectionStateChanged(
                        PeerConnectionState::Failed | PeerConnectionState::Closed,
                    ) => newly_dropped.push(id.clone()),
                    PeerConnectionEvent::DataChannelOpened(_) | PeerConnectionEvent::ConnectionStateChanged(_) => {}
                }
            }
        }
        for (id, peer) in self.pending_connect.iter_mut() {
            while let Some(event) = peer.rtc.poll_event() {
                match event {
                    PeerConnectionEvent::LocalIceCandidate(candidate) => {
                        local_ice.push((id.clone(), candidate));
                    }
                    PeerConnectionEvent::DataChannelOpened(channel) => peer.attach_channel(channel),
                    PeerConnectionEvent::ConnectionStateChanged(PeerConnectionState::Connected) => {
                        newly_connected.push(id.clone());
                    }
                    PeerConnectionEvent::ConnectionStateChanged(
                        PeerConnectionState::Failed | PeerConnectionState::Closed,
                    ) => newly_dropped.push(id.clone()),
                    PeerConnectionEvent::ConnectionStateChanged(_) => {}
                }
            }
        }
        for (id, peer) in self.peers.iter_mut() {
            while let Some(event) = peer.rtc.poll_event() {
                match event {
                    PeerConnectionEvent::LocalIceCandidate(candidate) => {
                        local_ice.push((id.clone(), candidate));
                    }
                    PeerConnectionEvent::DataChannelOpened(channel) => peer.attach_channel(channel),
                    PeerConnectionEvent::ConnectionStateChanged(
                        PeerConnectionState::Failed | PeerConnectionState::Closed,
                    ) => newly_dropped.push(id.clone()),
                    PeerConnectionEvent::ConnectionStateChanged(_) => {}
                }
            }
        }

        for (id, candidate) in local_ice {
            let _ = signaling.send_ice_candidate(candidate, Some(id)).await;
        }

        // Promote before the hostChange fact, hostChange before peerJoin.
        for id in newly_connected {
            if let Some(peer) = self.pending_connect.remove(&id) {
                self.peers.insert(id.clone(), peer);
                self.recompute_host(&mut events);
                events.push(PeerLifecycleEvent::PeerJoin(id));
            }
        }
        for id in newly_dropped {
            self.disconnect_peer(&id, &mut events);
        }

        self.flush_opened_channels();

        let mut inbound = Vec::new();
        let mut raw_messages: Vec<(PlayerId, Bytes)> = Vec::new();
        for (id, peer) in self.peers.iter_mut() {
            Self::drain_channel(peer.dc_unreliable.as_deref_mut(), id, &mut raw_messages);
            Self::drain_channel(peer.dc_reliable.as_deref_mut(), id, &mut raw_messages);
        }
        for (transport_peer, bytes) in raw_messages {
            let Some(mut message) = serializer::decode(&bytes, self.serialization) else {
                continue;
            };
            // Anti-spoofing: the transport's own peer id always wins over
            // whatever `from` the envelope itself claims (source spec §4.7
            // "Identity discipline").
            message.from = transport_peer;

            match message.payload {
                MessagePayload::Ping => {
                    self.send_control(&message.from, NetMessage {
                        from: self.local_id.clone(),
                        ts: message.ts,
                        seq: None,
                        ttl: None,
                        payload: MessagePayload::Pong,
                    });
                }
                MessagePayload::Pong => {
                    if let Some(peer) = self.peers.get_mut(&message.from) {
                        peer.ping_ms = (now - message.ts).max(0.0);
                        peer.last_pong_ts = Some(now);
                        events.push(PeerLifecycleEvent::Ping { peer: message.from.clone(), rtt_ms: peer.ping_ms });
                    }
                }
                _ => inbound.push(message),
            }
        }

        self.ping_elapsed_ms += delta_ms;
        if self.ping_elapsed_ms >= PING_INTERVAL_MS {
            self.ping_elapsed_ms = 0.0;
            let ids: Vec<PlayerId> = self.peers.keys().cloned().collect();
            for id in ids {
                let ping = NetMessage {
                    from: self.local_id.clone(),
                    ts: now,
                    seq: None,
                    ttl: None,
                    payload: MessagePayload::Ping,
                };
                self.send_control(&id, ping);
            }
        }

        (inbound, events)
    }

    fn drain_channel(
        channel: Option<&mut dyn crate::transport::DataChannelHandle>,
        peer_id: &PlayerId,
        out: &mut Vec<(PlayerId, Bytes)>,
    ) {
        let Some(channel) = channel else { return };
        while let Some(event) = channel.poll_event() {
            match event {
                DataChannelEvent::Message(bytes) => out.push((peer_id.clone(), bytes)),
                DataChannelEvent::Open | DataChannelEvent::Closed => {}
            }
        }
    }

    /// Drains outboxes for any channel that has just become `Open`. A
    /// channel only needs draining once — it starts `connecting` and the
    /// outbox only grows while it stays that way — so this is safe to call
    /// every pump.
    fn flush_opened_channels(&mut self) {
        for peer in self.peers.values_mut() {
            Self::flush_outbox(peer.dc_unreliable.as_deref_mut(), &mut peer.outbox_unreliable, self.serialization);
            Self::flush_outbox(peer.dc_reliable.as_deref_mut(), &mut peer.outbox_reliable, self.serialization);
        }
    }

    fn flush_outbox(
        channel: Option<&mut dyn crate::transport::DataChannelHandle>,
        outbox: &mut VecDeque<NetMessage>,
        scheme: SerializationScheme,
    ) {
        let Some(channel) = channel else { return };
        if channel.ready_state() != DataChannelReadyState::Open {
            return;
        }
        while let Some(message) = outbox.pop_front() {
            if let Ok(bytes) = serializer::encode(&message, scheme) {
                let _ = channel.send(&bytes);
            }
        }
    }

    /// Internal ping/pong control messages are routed exactly like
    /// application sends (same channel, same backpressure policy) but never
    /// surfaced through the public send API.
    fn send_control(&mut self, to: &PlayerId, message: NetMessage) {
        self.route(to, message, true);
    }

    /// Sends `message` to a single connected peer, on the unreliable channel
    /// when `unreliable` is set, applying the configured backpressure
    /// policy there (source spec §4.7 "Backpressure policy").
    pub fn send(&mut self, to: &PlayerId, message: NetMessage, unreliable: bool) {
        self.route(to, message, unreliable);
    }

    pub fn broadcast(&mut self, message: NetMessage, unreliable: bool) {
        let ids: Vec<PlayerId> = self.peers.keys().cloned().collect();
        for id in ids {
            self.route(&id, message.clone(), unreliable);
        }
    }

    pub fn broadcast_except(&mut self, except: &PlayerId, message: NetMessage, unreliable: bool) {
        let ids: Vec<PlayerId> = self.peers.keys().filter(|id| *id != except).cloned().collect();
        for id in ids {
            self.route(&id, message.clone(), unreliable);
        }
    }

    fn route(&mut self, to: &PlayerId, message: NetMessage, unreliable: bool) {
        let Some(peer) = self.peers.get_mut(to) else { return };
        let channel = if unreliable { peer.dc_unreliable.as_deref_mut() } else { peer.dc_reliable.as_deref_mut() };

        if let Some(channel) = channel {
            if channel.ready_state() == DataChannelReadyState::Open {
                if unreliable
                    && self.backpressure.strategy == BackpressureStrategy::DropMoves
                    && matches!(message.payload, MessagePayload::Move { .. })
                    && channel.buffered_amount() > self.backpressure.threshold_bytes
                {
                    return;
                }
                if let Ok(bytes) = serializer::encode(&message, self.serialization) {
                    let _ = channel.send(&bytes);
                }
                return;
            }
        }

        let outbox = if unreliable { &mut peer.outbox_unreliable } else { &mut peer.outbox_reliable };
        if unreliable
            && self.backpressure.strategy == BackpressureStrategy::CoalesceMoves
            && matches!(message.payload, MessagePayload::Move { .. })
            && matches!(outbox.back().map(|m| &m.payload), Some(MessagePayload::Move { .. }))
        {
            outbox.pop_back();
        }
        outbox.push_back(message);
    }

    /// Idempotent teardown of every connection, in-flight or active.
    pub fn dispose(&mut self) {
        for (_, mut peer) in self.pending_initiators.drain() {
            peer.rtc.close();
        }
        for (_, mut peer) in self.pending_connect.drain() {
            peer.rtc.close();
        }
        for (_, mut peer) in self.peers.drain() {
            peer.rtc.close();
        }
        self.buffered_remote_ice.clear();
        self.pending_offer_timers = Timer::new();
        self.host_id = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signaling::SignalingEvent;
    use crate::transport::{DataChannelEvent as DcEvent, DataChannelReadyState as DcState, PeerConnectionEvent as PcEvent, PeerConnectionState as PcState};
    use std::collections::VecDeque as Deque;
    use std::sync::Mutex;

    struct FakeDataChannel {
        label: ChannelLabel,
        ready_state: DcState,
        sent: Vec<Bytes>,
        events: Deque<DcEvent>,
    }

    impl crate::transport::DataChannelHandle for FakeDataChannel {
        fn label(&self) -> ChannelLabel {
            self.label
        }
        fn ready_state(&self) -> DcState {
            self.ready_state
        }
        fn buffered_amount(&self) -> u32 {
            0
        }
        fn send(&mut self, bytes: &[u8]) -> Result<(), crate::error::MeshError> {
            self.sent.push(Bytes::copy_from_slice(bytes));
            Ok(())
        }
        fn poll_event(&mut self) -> Option<DcEvent> {
            self.events.pop_front()
        }
        fn close(&mut self) {
            self.ready_state = DcState::Closed;
        }
    }

    struct FakeRtc {
        state: PcState,
        events: Mutex<Deque<PcEvent>>,
        has_remote_desc: bool,
    }

    #[async_trait::async_trait(?Send)]
    impl crate::transport::RtcPeerConnectionHandle for FakeRtc {
        fn connection_state(&self) -> PcState {
            self.state
        }
        fn create_data_channel(&mut self, label: ChannelLabel) -> Box<dyn crate::transport::DataChannelHandle> {
            Box::new(FakeDataChannel { label, ready_state: DcState::Open, sent: Vec::new(), events: Deque::new() })
        }
        async fn create_offer(&mut self) -> Result<SdpDescription, crate::error::MeshError> {
            Ok(SdpDescription { sdp_type: SdpType::Offer, sdp: "offer".into() })
        }
        async fn create_answer(&mut self) -> Result<SdpDescription, crate::error::MeshError> {
            Ok(SdpDescription { sdp_type: SdpType::Answer, sdp: "answer".into() })
        }
        async fn set_local_description(&mut self, _description: SdpDescription) -> Result<(), crate::error::MeshError> {
            Ok(())
        }
        async fn set_remote_description(&mut self, _description: SdpDescription) -> Result<(), crate::error::MeshError> {
            self.has_remote_desc = true;
            self.state = PcState::Connected;
            self.events.lock().unwrap().push_back(PcEvent::ConnectionStateChanged(PcState::Connected));
            Ok(())
        }
        fn has_remote_description(&self) -> bool {
            self.has_remote_desc
        }
        async fn add_ice_candidate(&mut self, _candidate: IceCandidateInit) -> Result<(), crate::error::MeshError> {
            Ok(())
        }
        fn poll_event(&mut self) -> Option<PcEvent> {
            self.events.lock().unwrap().pop_front()
        }
        fn close(&mut self) {
            self.state = PcState::Closed;
        }
    }

    struct FakeFactory;
    impl RtcPeerFactory for FakeFactory {
        fn create_peer_connection(&self) -> Box<dyn RtcPeerConnectionHandle> {
            Box::new(FakeRtc { state: PcState::New, events: Mutex::new(Deque::new()), has_remote_desc: false })
        }
    }

    struct FakeSignaling {
        local: PlayerId,
        announced: Vec<(SdpDescription, Option<PlayerId>)>,
    }

    #[async_trait::async_trait]
    impl SignalingAdapter for FakeSignaling {
        fn local_id(&self) -> &PlayerId {
            &self.local
        }
        async fn register(&mut self) -> Result<(), crate::error::MeshError> {
            Ok(())
        }
        async fn announce(&mut self, description: SdpDescription, to: Option<PlayerId>) -> Result<(), crate::error::MeshError> {
            self.announced.push((description, to));
            Ok(())
        }
        async fn send_ice_candidate(&mut self, _candidate: IceCandidateInit, _to: Option<PlayerId>) -> Result<(), crate::error::MeshError> {
            Ok(())
        }
        fn poll_event(&mut self) -> Option<SignalingEvent> {
            None
        }
    }

    fn manager(local: &str, max_players: u16) -> PeerManager {
        PeerManager::new(
            PlayerId::from(local),
            Arc::new(FakeFactory),
            max_players,
            BackpressureConfig::default(),
            SerializationScheme::Json,
        )
    }

    fn signaling(local: &str) -> FakeSignaling {
        FakeSignaling { local: PlayerId::from(local), announced: Vec::new() }
    }

    #[test]
    fn lower_id_initiates_toward_higher_id() {
        pollster::block_on(async {
            let mut mgr = manager("A", 4);
            let mut sig = signaling("A");
            let mut events = Vec::new();
            mgr.handle_roster(&[PlayerId::from("A"), PlayerId::from("B")], &mut sig, &mut events).await;
            assert_eq!(sig.announced.len(), 1);
            assert_eq!(sig.announced[0].0.sdp_type, SdpType::Offer);
        });
    }

    #[test]
    fn higher_id_waits_for_an_offer() {
        pollster::block_on(async {
            let mut mgr = manager("B", 4);
            let mut sig = signaling("B");
            let mut events = Vec::new();
            mgr.handle_roster(&[PlayerId::from("A"), PlayerId::from("B")], &mut sig, &mut events).await;
            assert!(sig.announced.is_empty());
        });
    }

    #[test]
    fn answer_promotes_to_peers_and_fires_host_then_join() {
        pollster::block_on(async {
            let mut mgr = manager("A", 4);
            let mut sig = signaling("A");
            let mut events = Vec::new();
            mgr.handle_roster(&[PlayerId::from("A"), PlayerId::from("B")], &mut sig, &mut events).await;
            mgr.handle_answer(PlayerId::from("B"), SdpDescription { sdp_type: SdpType::Answer, sdp: "answer".into() }).await;
            let (_, pump_events) = mgr.pump(0.0, &mut sig).await;

            assert_eq!(mgr.peer_count(), 1);
            let kinds: Vec<&str> = pump_events
                .iter()
                .filter_map(|e| match e {
                    PeerLifecycleEvent::HostChange(_) => Some("host"),
                    PeerLifecycleEvent::PeerJoin(_) => Some("join"),
                    _ => None,
                })
                .collect();
            assert_eq!(kinds, vec!["host", "join"]);
        });
    }

    #[test]
    fn max_capacity_reached_blocks_further_initiation() {
        pollster::block_on(async {
            let mut mgr = manager("A", 1);
            let mut sig = signaling("A");
            let mut events = Vec::new();
            mgr.handle_roster(&[PlayerId::from("A"), PlayerId::from("B")], &mut sig, &mut events).await;
            assert!(matches!(events.as_slice(), [PeerLifecycleEvent::MaxCapacityReached(1)]));
            assert!(sig.announced.is_empty());
        });
    }

    #[test]
    fn buffered_ice_applies_once_remote_description_is_set() {
        pollster::block_on(async {
            let mut mgr = manager("B", 4);
            mgr.handle_remote_ice(PlayerId::from("A"), IceCandidateInit { candidate: "c1".into(), sdp_mid: None, sdp_m_line_index: None }).await;
            let mut sig = signaling("B");
            let mut events = Vec::new();
            mgr.handle_offer(PlayerId::from("A"), SdpDescription { sdp_type: SdpType::Offer, sdp: "offer".into() }, &mut sig, &mut events).await;
            assert!(mgr.buffered_remote_ice.is_empty());
        });
    }

    #[test]
    fn disconnect_emits_leave_and_reelects_host_only_when_active() {
        pollster::block_on(async {
            let mut mgr = manager("A", 4);
            let mut sig = signaling("A");
            let mut events = Vec::new();
            mgr.handle_roster(&[PlayerId::from("A"), PlayerId::from("B")], &mut sig, &mut events).await;
            mgr.handle_answer(PlayerId::from("B"), SdpDescription { sdp_type: SdpType::Answer, sdp: "answer".into() }).await;
            mgr.pump(0.0, &mut sig).await;
            assert_eq!(mgr.peer_count(), 1);

            let mut leave_events = Vec::new();
            mgr.disconnect_peer(&PlayerId::from("B"), &mut leave_events);
            assert!(matches!(leave_events[0], PeerLifecycleEvent::PeerLeave(_)));
            assert_eq!(mgr.peer_count(), 0);
        });
    }
}
