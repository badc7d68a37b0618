//! The handful of *loud* failures a [`crate::session::MeshSession`] can
//! raise. Everything else (malformed envelopes, stale sequence numbers,
//! policy rejections) is a silent drop per source spec §7 and never reaches
//! this type.

use thiserror::Error;

/// Errors surfaced by the public API.
#[derive(Debug, Error)]
pub enum MeshError {
    /// A public method was called after [`crate::session::MeshSession::stop`].
    #[error("session is disposed")]
    Disposed,

    /// `serialization` in [`crate::config::SessionConfig`] named a scheme
    /// this crate does not implement. Fatal at construction.
    #[error("unknown serialization scheme: {0}")]
    UnknownSerializationScheme(String),

    /// The room is already at `max_players`; the caller explicitly asked to
    /// connect rather than this being discovered mid-roster-update (which
    /// instead emits `Event::MaxCapacityReached`).
    #[error("room at capacity ({max_players} players)")]
    CapacityExceeded { max_players: u16 },

    /// The configured signaling adapter failed to register or announce.
    #[error("signaling adapter error: {0}")]
    Signaling(String),

    /// A value could not be encoded/decoded by the configured serializer.
    /// Decoding failures on *inbound* data are not routed through this
    /// variant — those are silent drops handled by the validator; this is
    /// only raised for outbound encode failures, which indicate a
    /// programmer error (e.g. a payload with non-finite floats under the
    /// `json` scheme).
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The embedding glue code's WebRTC call failed — `createOffer`,
    /// `createAnswer`, `setLocalDescription`/`setRemoteDescription`, or
    /// `addIceCandidate` rejected. `peer_manager` treats every variant of
    /// this identically: close the connection attempt and drop it (source
    /// spec §4.7 callers never distinguish *why* signaling negotiation
    /// failed).
    #[error("rtc error: {0}")]
    Rtc(String),
}
