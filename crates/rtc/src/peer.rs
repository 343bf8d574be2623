use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use huddle_protocol::{IceConfig, PeerId, SignalMessage};
use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::{info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::{APIBuilder, API};
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_sender::RTCRtpSender;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

use crate::error::RtcError;
use crate::events::{EventHub, SessionEvent};
use crate::media::LocalMediaSource;
use crate::signaling::SignalingRelay;

/// Connection state change, forwarded to the session pump.
#[derive(Debug, Clone)]
pub(crate) struct PeerTransition {
    pub peer_id: PeerId,
    pub state: RTCPeerConnectionState,
}

/// One peer's connection plus the per-link state the engine needs around it.
pub struct PeerLink {
    pub(crate) peer_id: PeerId,
    pub(crate) pc: Arc<RTCPeerConnection>,
    pub(crate) video_sender: Mutex<Option<Arc<RTCRtpSender>>>,
    pub(crate) audio_sender: Mutex<Option<Arc<RTCRtpSender>>>,
    /// First inbound track; later tracks on the same link are delivered via
    /// events but do not displace it.
    remote_track: Mutex<Option<Arc<TrackRemote>>>,
    /// Remote candidates that arrived before the remote description.
    pub(crate) pending_candidates: Mutex<Vec<RTCIceCandidateInit>>,
    /// Tracks the connected edge so disconnect events fire exactly once per
    /// drop out of connected.
    connected: AtomicBool,
}

impl PeerLink {
    pub fn peer_id(&self) -> &PeerId {
        &self.peer_id
    }

    pub fn state(&self) -> RTCPeerConnectionState {
        self.pc.connection_state()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == RTCPeerConnectionState::Connected
    }

    pub async fn remote_track(&self) -> Option<Arc<TrackRemote>> {
        self.remote_track.lock().await.clone()
    }
}

/// Owns every active peer connection, keyed by peer id.
pub struct PeerRegistry {
    api: API,
    ice_servers: Vec<RTCIceServer>,
    links: RwLock<HashMap<PeerId, Arc<PeerLink>>>,
    events: EventHub,
    relay: Arc<dyn SignalingRelay>,
    transitions: mpsc::UnboundedSender<PeerTransition>,
}

impl PeerRegistry {
    pub(crate) fn new(
        ice: &IceConfig,
        events: EventHub,
        relay: Arc<dyn SignalingRelay>,
        transitions: mpsc::UnboundedSender<PeerTransition>,
    ) -> Result<Self, RtcError> {
        let mut media_engine = MediaEngine::default();
        media_engine.register_default_codecs()?;
        let registry = register_default_interceptors(Registry::new(), &mut media_engine)?;
        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        Ok(Self {
            api,
            ice_servers: ice_servers(ice),
            links: RwLock::new(HashMap::new()),
            events,
            relay,
            transitions,
        })
    }

    /// Create a connection for `peer_id`, attaching the current local tracks.
    ///
    /// One connection per peer: a second create for the same id closes the
    /// previous connection before the new one takes its slot.
    pub async fn create(
        &self,
        peer_id: &PeerId,
        media: &LocalMediaSource,
    ) -> Result<Arc<PeerLink>, RtcError> {
        if let Some(prior) = self.links.write().await.remove(peer_id) {
            info!(peer = %peer_id, "Replacing existing connection");
            if let Err(e) = prior.pc.close().await {
                warn!(peer = %peer_id, "Failed to close replaced connection: {e}");
            }
        }

        let config = RTCConfiguration {
            ice_servers: self.ice_servers.clone(),
            ..Default::default()
        };
        let pc = Arc::new(self.api.new_peer_connection(config).await?);
        let link = Arc::new(PeerLink {
            peer_id: peer_id.clone(),
            pc: Arc::clone(&pc),
            video_sender: Mutex::new(None),
            audio_sender: Mutex::new(None),
            remote_track: Mutex::new(None),
            pending_candidates: Mutex::new(Vec::new()),
            connected: AtomicBool::new(false),
        });

        if let Some(track) = media.outgoing_video_track().await {
            let sender = pc.add_track(track as Arc<dyn TrackLocal + Send + Sync>).await?;
            *link.video_sender.lock().await = Some(sender);
        }
        if let Some(track) = media.audio_track().await {
            let sender = pc.add_track(track as Arc<dyn TrackLocal + Send + Sync>).await?;
            *link.audio_sender.lock().await = Some(sender);
        }

        self.wire_callbacks(&pc, &link);

        // The map is unlocked across the awaits above, so a concurrent
        // create for the same peer may have landed meanwhile. The newest
        // connection wins; anything displaced gets closed, keeping one
        // connection per peer.
        let displaced = self.links.write().await.insert(peer_id.clone(), Arc::clone(&link));
        if let Some(displaced) = displaced {
            warn!(peer = %peer_id, "Closing connection displaced by a concurrent create");
            if let Err(e) = displaced.pc.close().await {
                warn!(peer = %peer_id, "Failed to close displaced connection: {e}");
            }
        }
        info!(peer = %peer_id, "Peer connection created");
        Ok(link)
    }

    fn wire_callbacks(&self, pc: &Arc<RTCPeerConnection>, link: &Arc<PeerLink>) {
        // Trickle ICE: relay each local candidate as it is discovered.
        {
            let relay = Arc::clone(&self.relay);
            let events = self.events.clone();
            let id = link.peer_id.clone();
            pc.on_ice_candidate(Box::new(move |candidate| {
                if let Some(c) = candidate {
                    match c.to_json() {
                        Ok(init) => {
                            events.emit(SessionEvent::LocalCandidate {
                                peer_id: id.clone(),
                                candidate: init.clone(),
                            });
                            let msg = SignalMessage::IceCandidate {
                                peer_id: id.clone(),
                                candidate: init.candidate,
                                sdp_mid: init.sdp_mid,
                                sdp_mline_index: init.sdp_mline_index,
                            };
                            if let Err(e) = relay.send(msg) {
                                warn!(peer = %id, "Failed to relay ICE candidate: {e}");
                            }
                        }
                        Err(e) => warn!(peer = %id, "Failed to serialize ICE candidate: {e}"),
                    }
                }
                Box::pin(async {})
            }));
        }

        {
            let events = self.events.clone();
            let id = link.peer_id.clone();
            let weak = Arc::downgrade(link);
            pc.on_track(Box::new(move |track, _receiver, _transceiver| {
                let events = events.clone();
                let id = id.clone();
                let weak = weak.clone();
                Box::pin(async move {
                    if let Some(link) = weak.upgrade() {
                        let mut slot = link.remote_track.lock().await;
                        if slot.is_none() {
                            *slot = Some(Arc::clone(&track));
                        }
                        info!(peer = %id, kind = %track.kind(), "Remote track received");
                        events.emit(SessionEvent::RemoteTrack { peer_id: id, track });
                    }
                })
            }));
        }

        {
            let events = self.events.clone();
            let id = link.peer_id.clone();
            let weak = Arc::downgrade(link);
            let transitions = self.transitions.clone();
            pc.on_peer_connection_state_change(Box::new(move |state| {
                match state {
                    RTCPeerConnectionState::Failed => warn!(peer = %id, "Peer connection failed"),
                    RTCPeerConnectionState::Disconnected => {
                        warn!(peer = %id, "Peer connection disconnected")
                    }
                    _ => info!(peer = %id, ?state, "Peer connection state changed"),
                }
                if let Some(link) = weak.upgrade() {
                    match state {
                        RTCPeerConnectionState::Connected => {
                            if !link.connected.swap(true, Ordering::SeqCst) {
                                events.emit(SessionEvent::PeerConnected { peer_id: id.clone() });
                            }
                        }
                        RTCPeerConnectionState::Disconnected
                        | RTCPeerConnectionState::Failed
                        | RTCPeerConnectionState::Closed => {
                            if link.connected.swap(false, Ordering::SeqCst) {
                                events.emit(SessionEvent::PeerDisconnected { peer_id: id.clone() });
                            }
                        }
                        _ => {}
                    }
                }
                let _ = transitions.send(PeerTransition { peer_id: id.clone(), state });
                Box::pin(async {})
            }));
        }
    }

    /// Lookup never fails; absence is `None`.
    pub async fn get(&self, peer_id: &PeerId) -> Option<Arc<PeerLink>> {
        self.links.read().await.get(peer_id).cloned()
    }

    /// Close and deregister one peer. Idempotent.
    pub async fn close(&self, peer_id: &PeerId) {
        if let Some(link) = self.links.write().await.remove(peer_id) {
            if let Err(e) = link.pc.close().await {
                warn!(peer = %peer_id, "Failed to close peer connection: {e}");
            }
            info!(peer = %peer_id, "Peer connection closed");
        }
    }

    /// Close everything, best-effort. One failing close never blocks the
    /// rest from being torn down.
    pub async fn close_all(&self) {
        let drained: Vec<Arc<PeerLink>> =
            self.links.write().await.drain().map(|(_, link)| link).collect();
        for link in drained {
            if let Err(e) = link.pc.close().await {
                warn!(peer = %link.peer_id, "Failed to close peer connection: {e}");
            }
        }
    }

    pub async fn links(&self) -> Vec<Arc<PeerLink>> {
        self.links.read().await.values().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.links.read().await.len()
    }

    /// Point every video sender at `track`. Used for camera switches and
    /// screen share handover; the SDP is untouched so nothing renegotiates.
    pub async fn replace_video_track(&self, track: Arc<TrackLocalStaticSample>) {
        for link in self.links().await {
            let sender = link.video_sender.lock().await;
            if let Some(sender) = sender.as_ref() {
                let replacement = Arc::clone(&track) as Arc<dyn TrackLocal + Send + Sync>;
                if let Err(e) = sender.replace_track(Some(replacement)).await {
                    warn!(peer = %link.peer_id, "Failed to replace video track: {e}");
                }
            }
        }
    }
}

fn ice_servers(cfg: &IceConfig) -> Vec<RTCIceServer> {
    let mut servers = vec![RTCIceServer {
        urls: cfg.stun_urls.clone(),
        ..Default::default()
    }];
    if !cfg.turn_urls.is_empty() {
        servers.push(RTCIceServer {
            urls: cfg.turn_urls.clone(),
            username: cfg.turn_username.clone().unwrap_or_default(),
            credential: cfg.turn_credential.clone().unwrap_or_default(),
            ..Default::default()
        });
    }
    servers
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{registry_fixture, registry_fixture_with, FakeBackend};

    #[test]
    fn turn_servers_carry_credentials() {
        let cfg = IceConfig {
            stun_urls: vec!["stun:stun.example.org:3478".into()],
            turn_urls: vec!["turn:turn.example.org:3478".into()],
            turn_username: Some("user".into()),
            turn_credential: Some("pass".into()),
        };
        let servers = ice_servers(&cfg);
        assert_eq!(servers.len(), 2);
        assert_eq!(servers[1].username, "user");
        assert_eq!(servers[1].credential, "pass");
    }

    #[test]
    fn stun_only_config_yields_single_server() {
        let servers = ice_servers(&IceConfig::default());
        assert_eq!(servers.len(), 1);
        assert!(servers[0].username.is_empty());
    }

    #[tokio::test]
    async fn create_attaches_local_tracks() {
        let fx = registry_fixture().await;
        let link = fx.registry.create(&PeerId::from("peer-1"), &fx.media).await.unwrap();
        assert!(link.video_sender.lock().await.is_some());
        assert!(link.audio_sender.lock().await.is_some());
        assert_eq!(fx.registry.len().await, 1);
    }

    #[tokio::test]
    async fn create_without_media_attaches_nothing() {
        let fx = registry_fixture_uninitialized().await;
        let link = fx.registry.create(&PeerId::from("peer-1"), &fx.media).await.unwrap();
        assert!(link.video_sender.lock().await.is_none());
        assert!(link.audio_sender.lock().await.is_none());
    }

    #[tokio::test]
    async fn duplicate_create_closes_the_first_connection() {
        let fx = registry_fixture().await;
        let id = PeerId::from("peer-1");
        let first = fx.registry.create(&id, &fx.media).await.unwrap();
        let second = fx.registry.create(&id, &fx.media).await.unwrap();

        assert_eq!(fx.registry.len().await, 1);
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(first.state(), RTCPeerConnectionState::Closed);
        let current = fx.registry.get(&id).await.unwrap();
        assert!(Arc::ptr_eq(&current, &second));
    }

    #[tokio::test]
    async fn interleaved_creates_leave_exactly_one_open_connection() {
        let fx = registry_fixture().await;
        let id = PeerId::from("peer-1");

        // drive both creates on one task so their awaits interleave
        let (first, second) = tokio::join!(
            fx.registry.create(&id, &fx.media),
            fx.registry.create(&id, &fx.media),
        );
        let first = first.unwrap();
        let second = second.unwrap();

        assert_eq!(fx.registry.len().await, 1);
        let current = fx.registry.get(&id).await.unwrap();
        for link in [first, second] {
            if !Arc::ptr_eq(&link, &current) {
                assert_eq!(link.state(), RTCPeerConnectionState::Closed);
            }
        }
        assert_ne!(current.state(), RTCPeerConnectionState::Closed);
    }

    #[tokio::test]
    async fn get_returns_none_for_unknown_peer() {
        let fx = registry_fixture().await;
        assert!(fx.registry.get(&PeerId::from("nobody")).await.is_none());
    }

    #[tokio::test]
    async fn close_is_idempotent_and_deregisters() {
        let fx = registry_fixture().await;
        let id = PeerId::from("peer-1");
        let link = fx.registry.create(&id, &fx.media).await.unwrap();

        fx.registry.close(&id).await;
        assert_eq!(fx.registry.len().await, 0);
        assert_eq!(link.state(), RTCPeerConnectionState::Closed);
        // second close finds nothing and does nothing
        fx.registry.close(&id).await;
    }

    #[tokio::test]
    async fn close_all_empties_the_registry() {
        let fx = registry_fixture().await;
        fx.registry.create(&PeerId::from("a"), &fx.media).await.unwrap();
        fx.registry.create(&PeerId::from("b"), &fx.media).await.unwrap();
        fx.registry.close_all().await;
        assert_eq!(fx.registry.len().await, 0);
    }

    async fn registry_fixture_uninitialized() -> crate::test_support::RegistryFixture {
        registry_fixture_with(FakeBackend::with_devices(1), false).await
    }
}
