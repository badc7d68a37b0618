//! `mesh-core` — the full-mesh, signaling-driven WebRTC replication core
//! (source spec §1-§9). A host application constructs a
//! [`session::MeshSession`] with a [`config::SessionConfig`], a
//! [`transport::RtcPeerFactory`] and a [`signaling::SignalingAdapter`], then
//! drives it with `start()`/`tick(now)`/`stop()` and listens on
//! [`event_bus::EventBus`] via [`session::MeshSession::on`].
//!
//! Everything below `session` is an implementation detail a host
//! application does not need to reach into directly, with two exceptions:
//! the [`transport`] and [`signaling`] traits, which a host implements to
//! plug in a real `RTCPeerConnection` and signaling transport.

pub mod config;
pub mod conflict_resolver;
pub mod error;
pub mod event_bus;
pub mod loopback;
pub mod movement;
mod peer;
pub mod peer_manager;
pub mod ping_overlay;
pub mod serializer;
pub mod session;
pub mod signaling;
mod state_manager;
mod timer;
pub mod transport;
mod validator;
#[cfg(target_arch = "wasm32")]
pub mod wasm;

pub use config::{
    BackpressureConfig, BackpressureStrategy, ConflictResolution, DebugConfig, IceServerConfig, MovementConfig,
    SerializationScheme, SessionConfig,
};
pub use error::MeshError;
pub use event_bus::{Event, EventBus, EventKind, SubscriptionHandle};
pub use ping_overlay::PingOverlay;
pub use session::MeshSession;
pub use signaling::{RelayWebSocketSignaling, SignalingAdapter, SignalingEvent};
pub use transport::{
    ChannelLabel, DataChannelEvent, DataChannelHandle, DataChannelReadyState, PeerConnectionEvent, PeerConnectionState,
    RtcPeerConnectionHandle, RtcPeerFactory,
};
pub use loopback::LoopbackFactory;
#[cfg(target_arch = "wasm32")]
pub use wasm::WasmRtcFactory;

pub use protocol;
