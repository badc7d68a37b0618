//! The ping-overlay external collaborator (source spec §1: "ping overlay
//! rendering" is explicitly out of scope for this crate). `MeshSession` only
//! needs a place to forward the `enabled` flag from `setPingOverlayEnabled`
//! — drawing anything is the host application's job.

/// A passive subscriber to [`crate::event_bus::Event::Ping`], toggled on and
/// off by [`crate::session::MeshSession::set_ping_overlay_enabled`].
pub trait PingOverlay: Send {
    fn set_enabled(&mut self, enabled: bool);
}
