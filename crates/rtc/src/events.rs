use std::fmt;
use std::sync::Arc;

use huddle_protocol::PeerId;
use tokio::sync::broadcast;
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::track::track_remote::TrackRemote;

use crate::stats::QualitySample;

/// Session-level notifications for the embedding application.
///
/// Events are broadcast; slow subscribers lose the oldest entries rather
/// than backpressuring media handling.
#[derive(Clone)]
pub enum SessionEvent {
    PeerConnected {
        peer_id: PeerId,
    },
    PeerDisconnected {
        peer_id: PeerId,
    },
    /// A local ICE candidate was discovered and relayed.
    LocalCandidate {
        peer_id: PeerId,
        candidate: RTCIceCandidateInit,
    },
    /// First media track observed on an inbound stream.
    RemoteTrack {
        peer_id: PeerId,
        track: Arc<TrackRemote>,
    },
    ReconnectAttempt {
        peer_id: PeerId,
        attempt: u32,
    },
    /// The reconnection budget for this peer is spent; the connection stays
    /// down until negotiation is triggered again from outside.
    ReconnectExhausted {
        peer_id: PeerId,
    },
    StatsUpdate {
        samples: Vec<QualitySample>,
    },
}

impl fmt::Debug for SessionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PeerConnected { peer_id } => {
                f.debug_struct("PeerConnected").field("peer_id", peer_id).finish()
            }
            Self::PeerDisconnected { peer_id } => {
                f.debug_struct("PeerDisconnected").field("peer_id", peer_id).finish()
            }
            Self::LocalCandidate { peer_id, candidate } => f
                .debug_struct("LocalCandidate")
                .field("peer_id", peer_id)
                .field("candidate", &candidate.candidate)
                .finish(),
            Self::RemoteTrack { peer_id, .. } => {
                f.debug_struct("RemoteTrack").field("peer_id", peer_id).finish_non_exhaustive()
            }
            Self::ReconnectAttempt { peer_id, attempt } => f
                .debug_struct("ReconnectAttempt")
                .field("peer_id", peer_id)
                .field("attempt", attempt)
                .finish(),
            Self::ReconnectExhausted { peer_id } => {
                f.debug_struct("ReconnectExhausted").field("peer_id", peer_id).finish()
            }
            Self::StatsUpdate { samples } => {
                f.debug_struct("StatsUpdate").field("samples", samples).finish()
            }
        }
    }
}

/// Fan-out point for [`SessionEvent`]s.
#[derive(Clone)]
pub(crate) struct EventHub {
    tx: broadcast::Sender<SessionEvent>,
}

impl EventHub {
    pub(crate) fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.tx.subscribe()
    }

    /// Delivery is best-effort: no subscribers is not an error.
    pub(crate) fn emit(&self, event: SessionEvent) {
        let _ = self.tx.send(event);
    }
}
