//! The public facade (source spec §4.8/§6.3): lifecycle, per-sender
//! sequence counters, host-hydration wiring and the outward API. Everything
//! else in this crate is reachable only through a [`MeshSession`].

use std::sync::Arc;

use protocol::{GlobalGameState, InventoryItem, MessagePayload, NetMessage, PlayerId, Position, Velocity};

use crate::config::{ConflictResolution, SessionConfig};
use crate::error::MeshError;
use crate::event_bus::{Event, EventBus, EventKind, SubscriptionHandle};
use crate::peer_manager::{PeerLifecycleEvent, PeerManager};
use crate::ping_overlay::PingOverlay;
use crate::signaling::{SignalingAdapter, SignalingEvent};
use crate::state_manager::StateManager;
use crate::movement::MovementIntegrator;
use crate::transport::RtcPeerFactory;

/// The single public entry point. Owns every other component and is the
/// only thing a host application holds a reference to.
pub struct MeshSession {
    config: SessionConfig,
    local_id: PlayerId,
    disposed: bool,

    bus: EventBus,
    peer_manager: PeerManager,
    state_manager: StateManager,
    movement: MovementIntegrator,
    signaling: Box<dyn SignalingAdapter>,
    ping_overlay: Option<Box<dyn PingOverlay>>,

    /// The authority id under `Authoritative` mode. Seeded from
    /// `authoritative_client_id` when configured explicitly; otherwise
    /// adopted from whoever becomes host (source spec §4.8 "hostChange").
    authority: Option<PlayerId>,
    local_seq: u64,
}

impl MeshSession {
    pub fn new(
        config: SessionConfig,
        local_id: PlayerId,
        factory: Arc<dyn RtcPeerFactory>,
        signaling: Box<dyn SignalingAdapter>,
    ) -> Self {
        let authority = config.authoritative_client_id.clone();
        let debug_enabled = config.debug.enabled;
        Self {
            peer_manager: PeerManager::new(
                local_id.clone(),
                factory,
                config.max_players,
                config.backpressure.clone(),
                config.serialization,
            ),
            state_manager: StateManager::new(local_id.clone(), debug_enabled),
            movement: MovementIntegrator::new(config.movement),
            bus: EventBus::new(),
            signaling,
            ping_overlay: None,
            authority,
            local_seq: 0,
            config,
            local_id,
            disposed: false,
        }
    }

    fn ensure_active(&self) -> Result<(), MeshError> {
        if self.disposed {
            return Err(MeshError::Disposed);
        }
        Ok(())
    }

    fn next_seq(&mut self) -> u64 {
        self.local_seq += 1;
        self.local_seq
    }

    fn is_host(&self) -> bool {
        self.peer_manager.host_id() == Some(&self.local_id)
    }

    fn envelope(&mut self, now: f64, seq: Option<u64>, payload: MessagePayload) -> NetMessage {
        NetMessage { from: self.local_id.clone(), ts: now, seq, ttl: None, payload }
    }

    /// Mirrors `message` to `debug.on_send` before it leaves the process
    /// (source spec §6.4/§7 "ambient observability seam").
    fn trace_send(&self, message: &NetMessage) {
        if let Some(hook) = &self.config.debug.on_send {
            hook(message);
        }
    }

    fn broadcast(&mut self, message: NetMessage) {
        self.trace_send(&message);
        let unreliable = message.is_unreliable_by_default();
        self.peer_manager.broadcast(message, unreliable);
    }

    fn send_to(&mut self, to: &PlayerId, message: NetMessage) {
        self.trace_send(&message);
        let unreliable = message.is_unreliable_by_default();
        self.peer_manager.send(to, message, unreliable);
    }

    // ---- lifecycle ----------------------------------------------------

    /// Establishes signaling and begins mesh formation.
    pub async fn start(&mut self) -> Result<(), MeshError> {
        self.ensure_active()?;
        self.signaling.register().await
    }

    /// Idempotent disposal.
    pub fn stop(&mut self) {
        if self.disposed {
            return;
        }
        self.disposed = true;
        self.peer_manager.dispose();
        self.signaling.close();
        self.bus.clear();
    }

    // ---- event subscription --------------------------------------------

    pub fn on(&mut self, kind: EventKind, handler: impl Fn(&Event) + Send + 'static) -> SubscriptionHandle {
        self.bus.subscribe(kind, handler)
    }

    pub fn off(&mut self, handle: SubscriptionHandle) {
        self.bus.unsubscribe(handle);
    }

    // ---- read surface ---------------------------------------------------

    /// A deep copy of the replicated state; mutating it has no effect on
    /// the session's own view.
    pub fn get_state(&self) -> Result<GlobalGameState, MeshError> {
        self.ensure_active()?;
        Ok(self.state_manager.snapshot())
    }

    pub fn get_host_id(&self) -> Result<Option<PlayerId>, MeshError> {
        self.ensure_active()?;
        Ok(self.peer_manager.host_id().cloned())
    }

    // ---- outbound mutation surface --------------------------------------

    /// Unreliable; carries a fresh `seq`.
    pub fn broadcast_move(&mut self, now: f64, position: Position, velocity: Option<Velocity>) -> Result<(), MeshError> {
        self.ensure_active()?;
        crate::conflict_resolver::apply_move(self.state_manager.state_mut(), &self.local_id, position, velocity);
        self.movement.note_move(&self.local_id, now);
        self.state_manager.note_local_move_sent();
        let seq = self.next_seq();
        let message = self.envelope(now, Some(seq), MessagePayload::Move { position, velocity });
        self.broadcast(message);
        Ok(())
    }

    /// Inserts the local player entry and broadcasts a move **without** a
    /// `seq`, so the joiner's own first `state_full` from the host can still
    /// overwrite it during initial-join handling (source spec §4.8).
    pub fn announce_presence(&mut self, now: f64, position: Position) -> Result<(), MeshError> {
        self.ensure_active()?;
        crate::conflict_resolver::apply_move(self.state_manager.state_mut(), &self.local_id, position, None);
        self.movement.note_move(&self.local_id, now);
        let message = self.envelope(now, None, MessagePayload::Move { position, velocity: None });
        self.broadcast(message);
        Ok(())
    }

    pub fn update_inventory(&mut self, now: f64, items: Vec<InventoryItem>) -> Result<(), MeshError> {
        self.ensure_active()?;
        crate::conflict_resolver::apply_inventory(self.state_manager.state_mut(), &self.local_id, &items);
        let seq = self.next_seq();
        let message = self.envelope(now, Some(seq), MessagePayload::Inventory { items });
        self.broadcast(message);
        Ok(())
    }

    pub fn transfer_item(&mut self, now: f64, to: PlayerId, item: InventoryItem) -> Result<(), MeshError> {
        self.ensure_active()?;
        crate::conflict_resolver::apply_transfer(self.state_manager.state_mut(), &self.local_id, &to, &item);
        let seq = self.next_seq();
        let message = self.envelope(now, Some(seq), MessagePayload::Transfer { to, item });
        self.broadcast(message);
        Ok(())
    }

    pub fn broadcast_payload(&mut self, now: f64, payload: serde_json::Value, channel: Option<String>) -> Result<(), MeshError> {
        self.ensure_active()?;
        let seq = self.next_seq();
        let message = self.envelope(now, Some(seq), MessagePayload::Payload { payload, channel });
        self.broadcast(message);
        Ok(())
    }

    pub fn send_payload(&mut self, now: f64, to: PlayerId, payload: serde_json::Value, channel: Option<String>) -> Result<(), MeshError> {
        self.ensure_active()?;
        let seq = self.next_seq();
        let message = self.envelope(now, Some(seq), MessagePayload::Payload { payload, channel });
        self.send_to(&to, message);
        Ok(())
    }

    pub fn broadcast_full_state(&mut self, now: f64) -> Result<(), MeshError> {
        self.ensure_active()?;
        let seq = self.next_seq();
        let state = self.state_manager.snapshot();
        let message = self.envelope(now, Some(seq), MessagePayload::StateFull { state });
        self.broadcast(message);
        Ok(())
    }

    pub fn broadcast_delta(&mut self, now: f64, paths: Vec<String>) -> Result<(), MeshError> {
        self.ensure_active()?;
        let delta = self.state_manager.build_delta(&paths);
        let seq = self.next_seq();
        let message = self.envelope(now, Some(seq), MessagePayload::StateDelta { delta });
        self.broadcast(message);
        Ok(())
    }

    /// Applies `mutate` directly to the local replicated state, then
    /// broadcasts the result as a full snapshot.
    pub fn set_state_and_broadcast(&mut self, now: f64, mutate: impl FnOnce(&mut GlobalGameState)) -> Result<(), MeshError> {
        self.ensure_active()?;
        mutate(self.state_manager.state_mut());
        self.broadcast_full_state(now)
    }

    pub fn set_ping_overlay(&mut self, overlay: Box<dyn PingOverlay>) {
        self.ping_overlay = Some(overlay);
    }

    pub fn set_ping_overlay_enabled(&mut self, enabled: bool) {
        if let Some(overlay) = self.ping_overlay.as_deref_mut() {
            overlay.set_enabled(enabled);
        }
    }

    // ---- the driving loop -----------------------------------------------

    /// Runs one scheduling turn: drains signaling, pumps the mesh, applies
    /// inbound messages to the replicated state, reacts to peer lifecycle
    /// facts (source spec §4.8), then runs one movement step.
    pub async fn tick(&mut self, now: f64) -> Result<(), MeshError> {
        self.ensure_active()?;

        while let Some(event) = self.signaling.poll_event() {
            match event {
                SignalingEvent::RemoteDescription { from, description } => {
                    use protocol::SdpType;
                    match description.sdp_type {
                        SdpType::Offer => {
                            let mut lifecycle = Vec::new();
                            self.peer_manager.handle_offer(from, description, self.signaling.as_mut(), &mut lifecycle).await;
                            self.react_to_lifecycle(now, lifecycle);
                        }
                        SdpType::Answer => {
                            self.peer_manager.handle_answer(from, description).await;
                        }
                    }
                }
                SignalingEvent::IceCandidate { from, candidate } => {
                    self.peer_manager.handle_remote_ice(from, candidate).await;
                }
                SignalingEvent::Roster(roster) => {
                    let mut lifecycle = Vec::new();
                    self.peer_manager.handle_roster(&roster, self.signaling.as_mut(), &mut lifecycle).await;
                    self.react_to_lifecycle(now, lifecycle);
                }
            }
        }

        let (inbound, lifecycle) = self.peer_manager.pump(now, self.signaling.as_mut()).await;
        self.react_to_lifecycle(now, lifecycle);

        for message in inbound {
            self.bus.emit(Event::NetMessage { message: message.clone() });
            let authority = self.authority.clone();
            if let Some(outcome) = self.state_manager.handle(&message, self.config.conflict_resolution.clone(), authority.as_ref()) {
                if let crate::state_manager::Outcome::PlayerMove { ref peer } = outcome {
                    self.movement.note_move(peer, now);
                }
                self.bus.emit(outcome.into_event());
            }
        }

        self.movement.interpolate(self.state_manager.state_mut(), now);
        self.movement.resolve_collisions(self.state_manager.state_mut());

        Ok(())
    }

    /// Converts [`PeerLifecycleEvent`]s into bus events and performs the
    /// associated side effects, in the order they were produced (source
    /// spec §4.8).
    fn react_to_lifecycle(&mut self, now: f64, events: Vec<PeerLifecycleEvent>) {
        for event in events {
            match event {
                PeerLifecycleEvent::HostChange(host) => {
                    if self.config.conflict_resolution == ConflictResolution::Authoritative
                        && self.config.authoritative_client_id.is_none()
                    {
                        self.authority = Some(host.clone());
                    }
                    let became_host = host == self.local_id;
                    self.bus.emit(Event::HostChange { host });
                    if became_host {
                        let _ = self.broadcast_full_state(now);
                    }
                }
                PeerLifecycleEvent::PeerJoin(peer) => {
                    self.bus.emit(Event::PeerJoin { peer: peer.clone() });
                    if self.is_host() {
                        let seq = self.next_seq();
                        let state = self.state_manager.snapshot();
                        let message = self.envelope(now, Some(seq), MessagePayload::StateFull { state });
                        self.send_to(&peer, message);
                    }
                }
                PeerLifecycleEvent::PeerLeave(peer) => {
                    self.movement.remove_player(&peer);
                    self.bus.emit(Event::PeerLeave { peer: peer.clone() });
                    if self.is_host() && self.config.cleanup_on_peer_leave {
                        let touched = self.state_manager.remove_player(&peer);
                        if !touched.is_empty() {
                            let _ = self.broadcast_delta(now, touched);
                        }
                    }
                }
                PeerLifecycleEvent::MaxCapacityReached(max_players) => {
                    self.bus.emit(Event::MaxCapacityReached { max_players });
                }
                PeerLifecycleEvent::Ping { peer, rtt_ms } => {
                    self.bus.emit(Event::Ping { peer, rtt_ms });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_state_is_a_deep_copy() {
        let mut session = test_session();
        session.broadcast_move(0.0, Position { x: 1.0, y: 2.0, z: 0.0 }, None).unwrap();

        let mut copy = session.get_state().unwrap();
        copy.players.get_mut(&PlayerId::from("L")).unwrap().position.x = 999.0;

        let fresh = session.get_state().unwrap();
        assert_eq!(fresh.players[&PlayerId::from("L")].position.x, 1.0);
    }

    #[test]
    fn public_methods_fail_once_disposed() {
        let mut session = test_session();
        session.stop();
        assert!(matches!(session.get_state(), Err(MeshError::Disposed)));
        assert!(matches!(
            session.broadcast_move(0.0, Position::default(), None),
            Err(MeshError::Disposed)
        ));
    }

    #[test]
    fn stop_is_idempotent() {
        let mut session = test_session();
        session.stop();
        session.stop();
        assert!(matches!(session.get_state(), Err(MeshError::Disposed)));
    }

    /// Source spec §8 scenario 3 ("snapshot respects local live view"),
    /// driven through the real facade entry point instead of calling
    /// `StateManager::handle` directly for the local move: `broadcast_move`
    /// is the only place that marks the local id as having authored a
    /// sequenced move, closing the initial-join window. Without that
    /// bookkeeping this test fails, since every `state_full` would still
    /// look like an initial join and roll the local player back to the
    /// snapshot's stale position.
    #[test]
    fn snapshot_after_local_move_does_not_roll_back_local_player() {
        let mut session = test_session();
        session.broadcast_move(0.0, Position { x: 100.0, y: 100.0, z: 0.0 }, None).unwrap();

        let mut incoming = GlobalGameState::default();
        incoming.players.insert(
            PlayerId::from("L"),
            protocol::PlayerState { position: Position { x: 0.0, y: 0.0, z: 0.0 }, velocity: None },
        );
        incoming.players.insert(
            PlayerId::from("R"),
            protocol::PlayerState { position: Position { x: 5.0, y: 5.0, z: 0.0 }, velocity: None },
        );
        let snapshot_msg = NetMessage {
            from: PlayerId::from("H"),
            ts: 1.0,
            seq: None,
            ttl: None,
            payload: MessagePayload::StateFull { state: incoming },
        };
        session
            .state_manager
            .handle(&snapshot_msg, session.config.conflict_resolution.clone(), session.authority.as_ref());

        let state = session.get_state().unwrap();
        assert_eq!(state.players[&PlayerId::from("L")].position, Position { x: 100.0, y: 100.0, z: 0.0 });
        assert_eq!(state.players[&PlayerId::from("R")].position, Position { x: 5.0, y: 5.0, z: 0.0 });
    }

    #[test]
    fn announce_presence_omits_seq() {
        let mut session = test_session();
        let observed: Arc<std::sync::Mutex<Vec<Option<u64>>>> = Arc::new(std::sync::Mutex::new(Vec::new()));
        let observed_clone = observed.clone();
        session.config.debug.on_send = Some(Arc::new(move |m| observed_clone.lock().unwrap().push(m.seq)));
        session.announce_presence(0.0, Position::default()).unwrap();
        assert_eq!(*observed.lock().unwrap(), vec![None]);
    }

    fn test_session() -> MeshSession {
        struct NullFactory;
        impl RtcPeerFactory for NullFactory {
            fn create_peer_connection(&self) -> Box<dyn crate::transport::RtcPeerConnectionHandle> {
                unimplemented!("not exercised by these tests")
            }
        }
        struct NullSignaling(PlayerId);
        #[async_trait::async_trait]
        impl SignalingAdapter for NullSignaling {
            fn local_id(&self) -> &PlayerId {
                &self.0
            }
            async fn register(&mut self) -> Result<(), MeshError> {
                Ok(())
            }
            async fn announce(&mut self, _description: protocol::SdpDescription, _to: Option<PlayerId>) -> Result<(), MeshError> {
                Ok(())
            }
            async fn send_ice_candidate(&mut self, _candidate: protocol::IceCandidateInit, _to: Option<PlayerId>) -> Result<(), MeshError> {
                Ok(())
            }
            fn poll_event(&mut self) -> Option<SignalingEvent> {
                None
            }
        }

        MeshSession::new(
            SessionConfig::default(),
            PlayerId::from("L"),
            Arc::new(NullFactory),
            Box::new(NullSignaling(PlayerId::from("L"))),
        )
    }
}
