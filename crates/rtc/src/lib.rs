//! Media orchestration core for Huddle meetings.
//!
//! The crate owns everything between the host application's capture stack
//! and its signaling transport: local media lifecycle, one peer connection
//! per remote participant, SDP negotiation with glare handling, bounded ICE
//! restart supervision and periodic link quality monitoring.
//!
//! The host supplies two seams. A [`media::MediaBackend`] opens cameras,
//! microphones and displays; a [`signaling::SignalingRelay`] carries typed
//! [`huddle_protocol::SignalMessage`]s to the meeting's signaling service.
//! Everything else is driven through a [`session::CallSession`].

pub mod error;
pub mod events;
pub mod media;
pub mod negotiate;
pub mod peer;
pub mod reconnect;
pub mod session;
pub mod signaling;
pub mod stats;

#[cfg(test)]
pub(crate) mod test_support;

pub use error::RtcError;
pub use events::SessionEvent;
pub use media::{
    CaptureSource, LocalMediaSource, MediaBackend, MediaConstraints, VideoInputInfo, VideoProfile,
};
pub use peer::{PeerLink, PeerRegistry};
pub use session::CallSession;
pub use signaling::{ChannelRelay, SignalingRelay};
pub use stats::{classify, QualityClass, QualityMonitor, QualitySample};
