use huddle_protocol::PeerId;

/// Errors surfaced by the media orchestration core.
///
/// Negotiation failures are containable: callers treat them as a failure of
/// the affected peer connection, not of the whole session.
#[derive(Debug, thiserror::Error)]
pub enum RtcError {
    #[error("media access failed: {0}")]
    MediaAccess(String),

    #[error("no connection registered for peer {0}")]
    PeerNotFound(PeerId),

    #[error("negotiation error: {0}")]
    Negotiation(#[from] webrtc::Error),

    #[error("signaling relay is closed")]
    RelayClosed,
}
