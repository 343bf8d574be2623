use std::sync::Arc;

use huddle_protocol::{PeerId, SignalMessage};
use tracing::{debug, info, warn};
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::peer_connection::offer_answer_options::RTCOfferOptions;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;

use crate::error::RtcError;
use crate::peer::{PeerLink, PeerRegistry};
use crate::signaling::SignalingRelay;

/// Drives the SDP offer/answer exchange for registered peers.
#[derive(Clone)]
pub struct NegotiationEngine {
    registry: Arc<PeerRegistry>,
    relay: Arc<dyn SignalingRelay>,
}

impl NegotiationEngine {
    pub(crate) fn new(registry: Arc<PeerRegistry>, relay: Arc<dyn SignalingRelay>) -> Self {
        Self { registry, relay }
    }

    async fn link(&self, peer_id: &PeerId) -> Result<Arc<PeerLink>, RtcError> {
        self.registry
            .get(peer_id)
            .await
            .ok_or_else(|| RtcError::PeerNotFound(peer_id.clone()))
    }

    /// Create and relay an offer. Skipped when a local description is
    /// already in place, so repeated triggers for the same peer cannot
    /// stack offers.
    pub async fn send_offer(&self, peer_id: &PeerId) -> Result<(), RtcError> {
        let link = self.link(peer_id).await?;
        if link.pc.local_description().await.is_some() {
            debug!(peer = %peer_id, "Offer skipped, local description already set");
            return Ok(());
        }
        let offer = link.pc.create_offer(None).await?;
        link.pc.set_local_description(offer.clone()).await?;
        self.relay.send(SignalMessage::Offer { peer_id: peer_id.clone(), sdp: offer.sdp })?;
        info!(peer = %peer_id, "Offer sent");
        Ok(())
    }

    /// Offer with the ICE restart flag set: same media sections, fresh
    /// credentials, so transport recovery never tears the link down.
    pub async fn send_restart_offer(&self, peer_id: &PeerId) -> Result<(), RtcError> {
        let link = self.link(peer_id).await?;
        let options = RTCOfferOptions { ice_restart: true, ..Default::default() };
        let offer = link.pc.create_offer(Some(options)).await?;
        link.pc.set_local_description(offer.clone()).await?;
        self.relay.send(SignalMessage::Offer { peer_id: peer_id.clone(), sdp: offer.sdp })?;
        info!(peer = %peer_id, "ICE restart offer sent");
        Ok(())
    }

    pub async fn send_answer(&self, peer_id: &PeerId) -> Result<(), RtcError> {
        let link = self.link(peer_id).await?;
        let answer = link.pc.create_answer(None).await?;
        link.pc.set_local_description(answer.clone()).await?;
        self.relay.send(SignalMessage::Answer { peer_id: peer_id.clone(), sdp: answer.sdp })?;
        info!(peer = %peer_id, "Answer sent");
        Ok(())
    }

    pub async fn apply_remote_offer(&self, peer_id: &PeerId, sdp: String) -> Result<(), RtcError> {
        let desc = RTCSessionDescription::offer(sdp)?;
        self.apply_remote_description(peer_id, desc).await
    }

    pub async fn apply_remote_answer(&self, peer_id: &PeerId, sdp: String) -> Result<(), RtcError> {
        let desc = RTCSessionDescription::answer(sdp)?;
        self.apply_remote_description(peer_id, desc).await
    }

    async fn apply_remote_description(
        &self,
        peer_id: &PeerId,
        desc: RTCSessionDescription,
    ) -> Result<(), RtcError> {
        let link = self.link(peer_id).await?;
        link.pc.set_remote_description(desc).await?;
        self.flush_candidates(&link).await;
        Ok(())
    }

    /// Apply a remote candidate, or buffer it when the remote description
    /// has not landed yet. Buffered candidates flush in arrival order as
    /// soon as the description is applied.
    pub async fn apply_remote_candidate(
        &self,
        peer_id: &PeerId,
        init: RTCIceCandidateInit,
    ) -> Result<(), RtcError> {
        let link = self.link(peer_id).await?;
        {
            // Hold the buffer lock across the description check so a flush
            // cannot race past a candidate being queued.
            let mut pending = link.pending_candidates.lock().await;
            if link.pc.remote_description().await.is_none() {
                pending.push(init);
                debug!(peer = %peer_id, buffered = pending.len(), "ICE candidate buffered before remote description");
                return Ok(());
            }
        }
        link.pc.add_ice_candidate(init).await?;
        debug!(peer = %peer_id, "ICE candidate applied");
        Ok(())
    }

    async fn flush_candidates(&self, link: &PeerLink) {
        let drained: Vec<RTCIceCandidateInit> = {
            let mut pending = link.pending_candidates.lock().await;
            std::mem::take(&mut *pending)
        };
        if drained.is_empty() {
            return;
        }
        debug!(peer = %link.peer_id, count = drained.len(), "Flushing buffered ICE candidates");
        for init in drained {
            if let Err(e) = link.pc.add_ice_candidate(init).await {
                warn!(peer = %link.peer_id, "Buffered ICE candidate rejected: {e}");
            }
        }
    }

    /// True while this side has an unanswered local offer out, which is the
    /// window in which an incoming offer means glare.
    pub async fn offer_pending(&self, link: &PeerLink) -> bool {
        if link.pc.remote_description().await.is_some() {
            return false;
        }
        matches!(
            link.pc.local_description().await,
            Some(desc) if desc.sdp_type == RTCSdpType::Offer
        )
    }
}
