//! Recognized configuration options (source spec §6.4). Parsed once at
//! [`crate::session::MeshSession`] construction; anything invalid there is a
//! fatal configuration error, never a runtime one.

use std::sync::Arc;

use protocol::{NetMessage, PlayerId};

use crate::error::MeshError;

/// How conflicting writes are arbitrated (source spec §4.3).
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConflictResolution {
    /// Last-writer-wins by per-sender sequence number; no gate on `from`.
    Timestamp,
    /// Only the current authority's `move`/`inventory`/`transfer` messages
    /// are accepted. Defaults to the host unless `authoritative_client_id`
    /// pins it explicitly.
    Authoritative,
}

/// Wire encoding scheme (source spec §4.2).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SerializationScheme {
    Json,
    BinaryMin,
}

/// Backpressure policy applied only to the unreliable channel (source spec
/// §4.7).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BackpressureStrategy {
    Off,
    DropMoves,
    CoalesceMoves,
}

/// Backpressure configuration.
#[derive(Clone, Debug, PartialEq)]
pub struct BackpressureConfig {
    pub strategy: BackpressureStrategy,
    pub threshold_bytes: u32,
}

impl Default for BackpressureConfig {
    fn default() -> Self {
        Self {
            strategy: BackpressureStrategy::CoalesceMoves,
            threshold_bytes: 262_144,
        }
    }
}

/// `debug` configuration: a flag plus an optional hook invoked just before
/// every outbound send, mirroring the `on_send` callback named in the
/// source spec and giving the host application an observability seam the
/// way `relay-server` has one via `tracing`.
#[derive(Clone, Default)]
pub struct DebugConfig {
    pub enabled: bool,
    pub on_send: Option<Arc<dyn Fn(&NetMessage) + Send + Sync>>,
}

impl std::fmt::Debug for DebugConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DebugConfig")
            .field("enabled", &self.enabled)
            .field("on_send", &self.on_send.as_ref().map(|_| "<fn>"))
            .finish()
    }
}

/// Movement integrator tuning (source spec §4.6).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MovementConfig {
    pub max_speed: f64,
    pub smoothing: f64,
    pub extrapolation_ms: f64,
    pub world_width: f64,
    pub world_height: f64,
    pub world_depth: f64,
    pub ignore_world_bounds: bool,
    pub player_radius: f64,
}

impl Default for MovementConfig {
    fn default() -> Self {
        Self {
            max_speed: 400.0,
            smoothing: 0.2,
            extrapolation_ms: 120.0,
            world_width: 2000.0,
            world_height: 2000.0,
            world_depth: 0.0,
            ignore_world_bounds: false,
            player_radius: 16.0,
        }
    }
}

/// ICE server configuration handed to the configured [`crate::transport::RtcPeerFactory`].
#[derive(Clone, Debug, PartialEq)]
pub struct IceServerConfig {
    pub urls: Vec<String>,
}

impl Default for IceServerConfig {
    fn default() -> Self {
        Self {
            urls: vec!["stun:stun.l.google.com:19302".to_string()],
        }
    }
}

/// The full set of recognized session options.
#[derive(Clone, Debug)]
pub struct SessionConfig {
    pub max_players: u16,
    pub conflict_resolution: ConflictResolution,
    pub authoritative_client_id: Option<PlayerId>,
    pub serialization: SerializationScheme,
    pub ice_servers: Vec<IceServerConfig>,
    pub cleanup_on_peer_leave: bool,
    pub debug: DebugConfig,
    pub backpressure: BackpressureConfig,
    pub movement: MovementConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_players: 4,
            conflict_resolution: ConflictResolution::Timestamp,
            authoritative_client_id: None,
            serialization: SerializationScheme::Json,
            ice_servers: vec![IceServerConfig::default()],
            cleanup_on_peer_leave: false,
            debug: DebugConfig::default(),
            backpressure: BackpressureConfig::default(),
            movement: MovementConfig::default(),
        }
    }
}

impl SessionConfig {
    /// Parses a `"json"`/`"binary-min"` scheme string, the only place the
    /// "unknown serializer is a fatal configuration error" rule (source
    /// spec §4.2/§7) can actually be observed, since the typed
    /// [`SerializationScheme`] enum cannot represent an unknown variant.
    pub fn with_serialization_str(mut self, scheme: &str) -> Result<Self, MeshError> {
        self.serialization = match scheme {
            "json" => SerializationScheme::Json,
            "binary-min" => SerializationScheme::BinaryMin,
            other => return Err(MeshError::UnknownSerializationScheme(other.to_string())),
        };
        Ok(self)
    }
}
