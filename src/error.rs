//! Error taxonomy for the session, launch, and wire layers.

use thiserror::Error;

/// Fatal wire-protocol violations.
///
/// A truncated frame is not a protocol error: the decoder reports it as
/// incomplete and the reassembler simply waits for more bytes.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    /// The peer sent a frame with a type tag the protocol does not define.
    #[error("unknown frame type: {0}")]
    UnknownFrameType(u8),
    /// The declared length cannot hold the fields the tag requires.
    #[error("malformed frame: {0}")]
    Malformed(&'static str),
}

/// Failures while resolving or starting the backend process.
#[derive(Debug, Error)]
pub enum LaunchError {
    /// The backend executable could not be located.
    #[error("backend executable not found: {0}")]
    BackendNotFound(String),
    /// The backend process could not be spawned.
    #[error("failed to spawn backend process")]
    Spawn(#[source] std::io::Error),
    /// Translating a host path into the backend environment failed.
    #[error("path translation failed for {path}: {reason}")]
    PathTranslation { path: String, reason: String },
}

/// Terminal session failures, surfaced once through the event stream.
///
/// Peer-initiated disconnects are not errors; they surface as
/// [`PtyEvent::Exit`](crate::PtyEvent::Exit) so callers can tell "ended"
/// from "failed".
#[derive(Debug, Error)]
pub enum PtyError {
    #[error("backend launch failed")]
    Launch(#[from] LaunchError),
    #[error("listener failed")]
    Listen(#[source] std::io::Error),
    #[error("protocol error")]
    Protocol(#[from] ProtocolError),
}
