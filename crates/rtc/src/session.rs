use std::sync::Arc;
use std::time::Duration;

use huddle_protocol::{MediaSettings, PeerId, RtcConfig, SignalMessage};
use tokio::sync::{broadcast, mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;

use crate::error::RtcError;
use crate::events::{EventHub, SessionEvent};
use crate::media::{LocalMediaSource, MediaBackend, MediaConstraints, VideoProfile};
use crate::negotiate::NegotiationEngine;
use crate::peer::{PeerRegistry, PeerTransition};
use crate::reconnect::{ReconnectSupervisor, RestartOrder};
use crate::signaling::SignalingRelay;
use crate::stats::{QualityMonitor, QualitySample};

/// One participant's view of a meeting: local media, a connection per remote
/// peer, negotiation, reconnection and quality monitoring, all driven by the
/// signal stream the host application feeds in.
pub struct CallSession {
    session_id: Uuid,
    local_id: PeerId,
    config: RtcConfig,
    settings: Arc<RwLock<MediaSettings>>,
    media: Arc<LocalMediaSource>,
    registry: Arc<PeerRegistry>,
    negotiation: NegotiationEngine,
    supervisor: Arc<ReconnectSupervisor>,
    monitor: Arc<QualityMonitor>,
    events: EventHub,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl CallSession {
    pub fn new(
        local_id: PeerId,
        config: RtcConfig,
        backend: Arc<dyn MediaBackend>,
        relay: Arc<dyn SignalingRelay>,
    ) -> Result<Arc<Self>, RtcError> {
        let events = EventHub::new(64);
        let settings = Arc::new(RwLock::new(config.media.clone()));
        let (transition_tx, transition_rx) = mpsc::unbounded_channel();
        let (restart_tx, restart_rx) = mpsc::unbounded_channel();

        let media = Arc::new(LocalMediaSource::new(backend));
        let registry = Arc::new(PeerRegistry::new(
            &config.ice,
            events.clone(),
            Arc::clone(&relay),
            transition_tx,
        )?);
        let negotiation = NegotiationEngine::new(Arc::clone(&registry), relay);
        let supervisor =
            Arc::new(ReconnectSupervisor::new(config.reconnect.clone(), events.clone(), restart_tx));
        let monitor = Arc::new(QualityMonitor::new(
            Arc::clone(&registry),
            Arc::clone(&media),
            Arc::clone(&settings),
            events.clone(),
        ));

        let pump = tokio::spawn(pump_loop(
            Arc::clone(&registry),
            negotiation.clone(),
            Arc::clone(&supervisor),
            transition_rx,
            restart_rx,
        ));

        let session_id = Uuid::new_v4();
        info!(session = %session_id, local = %local_id, "Call session created");
        Ok(Arc::new(Self {
            session_id,
            local_id,
            config,
            settings,
            media,
            registry,
            negotiation,
            supervisor,
            monitor,
            events,
            pump: Mutex::new(Some(pump)),
        }))
    }

    pub fn local_id(&self) -> &PeerId {
        &self.local_id
    }

    pub fn config(&self) -> &RtcConfig {
        &self.config
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    #[cfg(test)]
    pub(crate) fn registry(&self) -> &Arc<PeerRegistry> {
        &self.registry
    }

    #[cfg(test)]
    pub(crate) fn media(&self) -> &Arc<LocalMediaSource> {
        &self.media
    }

    #[cfg(test)]
    pub(crate) fn negotiation(&self) -> &NegotiationEngine {
        &self.negotiation
    }

    #[cfg(test)]
    pub(crate) fn supervisor(&self) -> &Arc<ReconnectSupervisor> {
        &self.supervisor
    }

    /// Acquire camera and microphone according to the configured presets.
    pub async fn init_media(&self) -> Result<(), RtcError> {
        let settings = self.settings.read().await.clone();
        let constraints = MediaConstraints {
            video: VideoProfile::for_preset(settings.video_quality),
            audio: true,
        };
        self.media.init(constraints, settings.audio_quality).await?;
        if settings.bandwidth_optimization && settings.bandwidth_limit > 0 {
            self.media.set_bitrate_limit(settings.bandwidth_limit).await;
        }
        info!(session = %self.session_id, "Local media initialized");
        Ok(())
    }

    /// Mute or unmute outgoing video without touching any connection.
    pub async fn toggle_video(&self, enabled: bool) {
        self.media.toggle_video(enabled).await;
        info!(enabled, "Video toggled");
    }

    pub async fn toggle_audio(&self, enabled: bool) {
        self.media.toggle_audio(enabled).await;
        info!(enabled, "Audio toggled");
    }

    /// Cycle to the next camera. With a single device this is a no-op. The
    /// previous capture stays alive until every sender carries the new
    /// track, so remote frames never gap.
    pub async fn switch_camera(&self) -> Result<(), RtcError> {
        let Some(switch) = self.media.switch_camera().await? else {
            debug!("Camera switch skipped, fewer than two video inputs");
            return Ok(());
        };
        if !switch.screen_active {
            self.registry.replace_video_track(Arc::clone(&switch.track)).await;
        }
        switch.finish();
        Ok(())
    }

    pub async fn start_screen_share(&self) -> Result<(), RtcError> {
        let track = self.media.start_screen_share().await?;
        self.registry.replace_video_track(track).await;
        Ok(())
    }

    pub async fn stop_screen_share(&self) {
        if let Some(camera) = self.media.stop_screen_share().await {
            self.registry.replace_video_track(camera).await;
        }
    }

    /// Register a connection for a peer. With `initiate` set, this side also
    /// sends the first offer.
    pub async fn add_peer(&self, peer_id: &PeerId, initiate: bool) -> Result<(), RtcError> {
        self.registry.create(peer_id, &self.media).await?;
        if initiate {
            self.negotiation.send_offer(peer_id).await?;
        }
        Ok(())
    }

    /// Tear down one peer, cancelling any reconnection in flight.
    pub async fn remove_peer(&self, peer_id: &PeerId) {
        self.supervisor.clear(peer_id).await;
        self.registry.close(peer_id).await;
    }

    pub async fn peer_count(&self) -> usize {
        self.registry.len().await
    }

    pub async fn peer_state(&self, peer_id: &PeerId) -> Option<RTCPeerConnectionState> {
        self.registry.get(peer_id).await.map(|link| link.state())
    }

    /// Feed one inbound signaling message into the session. Failures are
    /// contained per peer: a bad message never tears the session down.
    pub async fn handle_signal(&self, msg: SignalMessage) {
        match msg {
            SignalMessage::PeerJoined { peer_id, display_name, role } => {
                info!(peer = %peer_id, %display_name, ?role, "Participant joined");
                if let Err(e) = self.add_peer(&peer_id, true).await {
                    error!(peer = %peer_id, "Failed to connect to joining peer: {e}");
                }
            }
            SignalMessage::PeerLeft { peer_id } => {
                info!(peer = %peer_id, "Participant left");
                self.remove_peer(&peer_id).await;
            }
            SignalMessage::Offer { peer_id, sdp } => self.handle_offer(peer_id, sdp).await,
            SignalMessage::Answer { peer_id, sdp } => {
                match self.negotiation.apply_remote_answer(&peer_id, sdp).await {
                    Ok(()) => {}
                    Err(RtcError::PeerNotFound(_)) => {
                        warn!(peer = %peer_id, "Dropping answer for unknown peer")
                    }
                    Err(e) => self.contain_negotiation_error(&peer_id, e).await,
                }
            }
            SignalMessage::IceCandidate { peer_id, candidate, sdp_mid, sdp_mline_index } => {
                let init = RTCIceCandidateInit {
                    candidate,
                    sdp_mid,
                    sdp_mline_index,
                    ..Default::default()
                };
                match self.negotiation.apply_remote_candidate(&peer_id, init).await {
                    Ok(()) => {}
                    Err(RtcError::PeerNotFound(_)) => {
                        warn!(peer = %peer_id, "Dropping ICE candidate for unknown peer")
                    }
                    Err(e) => warn!(peer = %peer_id, "Failed to apply ICE candidate: {e}"),
                }
            }
        }
    }

    async fn handle_offer(&self, peer_id: PeerId, sdp: String) {
        let Some(link) = self.registry.get(&peer_id).await else {
            warn!(peer = %peer_id, "Dropping offer for unknown peer");
            return;
        };
        // Glare: both sides offered at once. The lexicographically greater
        // id yields by rebuilding its connection and answering; the lesser
        // keeps its own offer and ignores the colliding one.
        if self.negotiation.offer_pending(&link).await {
            if self.local_id > peer_id {
                info!(peer = %peer_id, "Offer glare, yielding to remote offer");
                if let Err(e) = self.rebuild_and_answer(&peer_id, sdp).await {
                    self.contain_negotiation_error(&peer_id, e).await;
                }
            } else {
                debug!(peer = %peer_id, "Offer glare, keeping local offer");
            }
            return;
        }
        if let Err(e) = self.answer_offer(&peer_id, sdp).await {
            self.contain_negotiation_error(&peer_id, e).await;
        }
    }

    async fn answer_offer(&self, peer_id: &PeerId, sdp: String) -> Result<(), RtcError> {
        self.negotiation.apply_remote_offer(peer_id, sdp).await?;
        self.negotiation.send_answer(peer_id).await
    }

    async fn rebuild_and_answer(&self, peer_id: &PeerId, sdp: String) -> Result<(), RtcError> {
        self.registry.create(peer_id, &self.media).await?;
        self.answer_offer(peer_id, sdp).await
    }

    /// A negotiation failure counts as a connection failure for that peer
    /// and goes to the reconnection supervisor.
    async fn contain_negotiation_error(&self, peer_id: &PeerId, e: RtcError) {
        error!(peer = %peer_id, "Negotiation failed: {e}");
        self.supervisor.note_failure(peer_id).await;
    }

    pub async fn start_monitoring(&self) {
        self.monitor.start(Duration::from_millis(self.config.stats.interval_ms)).await;
    }

    pub async fn stop_monitoring(&self) {
        self.monitor.stop().await;
    }

    /// One immediate sampling pass, outside the timer.
    pub async fn sample_now(&self) -> Vec<QualitySample> {
        self.monitor.sample_all().await
    }

    /// Replace the media settings. Bitrate caps apply immediately; quality
    /// presets take effect on the next media init.
    pub async fn update_settings(&self, settings: MediaSettings) {
        if settings.bandwidth_optimization && settings.bandwidth_limit > 0 {
            self.media.set_bitrate_limit(settings.bandwidth_limit).await;
        } else {
            // a zeroed limit or disabled optimization lifts any earlier cap
            self.media.set_bitrate_limit(0).await;
        }
        *self.settings.write().await = settings;
        info!("Media settings updated");
    }

    /// Leave the meeting: stop monitoring, cancel reconnections, close every
    /// connection best-effort and release local devices.
    pub async fn leave(&self) {
        self.monitor.stop().await;
        self.supervisor.clear_all().await;
        self.registry.close_all().await;
        self.media.shutdown().await;
        if let Some(pump) = self.pump.lock().await.take() {
            pump.abort();
        }
        info!(session = %self.session_id, "Left meeting, all connections closed");
    }
}

/// Single task multiplexing connection state transitions and due restart
/// orders, so supervision never runs inside a webrtc callback.
async fn pump_loop(
    registry: Arc<PeerRegistry>,
    negotiation: NegotiationEngine,
    supervisor: Arc<ReconnectSupervisor>,
    mut transitions: mpsc::UnboundedReceiver<PeerTransition>,
    mut restarts: mpsc::UnboundedReceiver<RestartOrder>,
) {
    loop {
        tokio::select! {
            transition = transitions.recv() => {
                let Some(transition) = transition else { break };
                match transition.state {
                    RTCPeerConnectionState::Connected => {
                        supervisor.note_connected(&transition.peer_id).await;
                    }
                    RTCPeerConnectionState::Disconnected | RTCPeerConnectionState::Failed => {
                        supervisor.note_failure(&transition.peer_id).await;
                    }
                    _ => {}
                }
            }
            order = restarts.recv() => {
                let Some(order) = order else { break };
                handle_restart_order(&registry, &negotiation, &supervisor, order).await;
            }
        }
    }
}

/// A due restart only proceeds against a link that is still down; anything
/// else means it recovered while the timer ran.
fn should_restart(link: &crate::peer::PeerLink) -> bool {
    matches!(
        link.state(),
        RTCPeerConnectionState::Disconnected | RTCPeerConnectionState::Failed
    )
}

async fn handle_restart_order(
    registry: &PeerRegistry,
    negotiation: &NegotiationEngine,
    supervisor: &ReconnectSupervisor,
    order: RestartOrder,
) {
    let Some(link) = registry.get(&order.peer_id).await else {
        debug!(peer = %order.peer_id, "Restart order for deregistered peer dropped");
        return;
    };
    if !should_restart(&link) {
        debug!(peer = %order.peer_id, "Connection recovered before restart fired");
        return;
    }
    info!(peer = %order.peer_id, attempt = order.attempt, "Restarting ICE");
    if let Err(e) = negotiation.send_restart_offer(&order.peer_id).await {
        warn!(peer = %order.peer_id, "ICE restart failed: {e}");
        supervisor.note_failure(&order.peer_id).await;
    }
}
