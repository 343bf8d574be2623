//! Fakes shared by the unit tests: an in-memory capture backend and a
//! recording signaling relay.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use huddle_protocol::{IceConfig, PeerId, QualityPreset, RtcConfig, SignalMessage};
use tokio::sync::{mpsc, RwLock};
use webrtc::api::media_engine::{MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

use crate::error::RtcError;
use crate::events::EventHub;
use crate::media::{
    CaptureSource, LocalMediaSource, MediaBackend, MediaConstraints, VideoInputInfo, VideoProfile,
};
use crate::peer::{PeerRegistry, PeerTransition};
use crate::session::CallSession;
use crate::signaling::SignalingRelay;
use crate::stats::QualityMonitor;

static TRACK_SEQ: AtomicUsize = AtomicUsize::new(0);

/// Route traces to the test harness. `RUST_LOG` controls verbosity.
pub(crate) fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Observable state of one fake capture, kept alive by the backend so tests
/// can inspect captures the media source owns.
pub(crate) struct CaptureProbe {
    pub device_id: String,
    pub kind: &'static str,
    pub enabled: AtomicBool,
    pub stopped: AtomicBool,
    pub profile: Mutex<Option<VideoProfile>>,
    /// Number of times the capture has been re-constrained.
    pub profile_sets: AtomicUsize,
    pub bitrate: AtomicU64,
}

struct FakeCapture {
    probe: Arc<CaptureProbe>,
    track: Arc<TrackLocalStaticSample>,
}

impl FakeCapture {
    fn new(device_id: &str, kind: &'static str, profile: Option<VideoProfile>) -> Self {
        let seq = TRACK_SEQ.fetch_add(1, Ordering::SeqCst);
        let (mime, stream) = match kind {
            "audio" => (MIME_TYPE_OPUS, "huddle-audio"),
            _ => (MIME_TYPE_VP8, "huddle-video"),
        };
        let track = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability { mime_type: mime.to_owned(), ..Default::default() },
            format!("{kind}-{seq}"),
            stream.to_owned(),
        ));
        let probe = Arc::new(CaptureProbe {
            device_id: device_id.to_owned(),
            kind,
            enabled: AtomicBool::new(true),
            stopped: AtomicBool::new(false),
            profile: Mutex::new(profile),
            profile_sets: AtomicUsize::new(0),
            bitrate: AtomicU64::new(0),
        });
        Self { probe, track }
    }
}

impl CaptureSource for FakeCapture {
    fn track(&self) -> Arc<TrackLocalStaticSample> {
        Arc::clone(&self.track)
    }

    fn set_enabled(&self, enabled: bool) {
        self.probe.enabled.store(enabled, Ordering::SeqCst);
    }

    fn is_enabled(&self) -> bool {
        self.probe.enabled.load(Ordering::SeqCst)
    }

    fn set_profile(&self, profile: VideoProfile) {
        *self.probe.profile.lock().unwrap() = Some(profile);
        self.probe.profile_sets.fetch_add(1, Ordering::SeqCst);
    }

    fn set_bitrate_limit(&self, bytes_per_sec: u64) {
        self.probe.bitrate.store(bytes_per_sec, Ordering::SeqCst);
    }

    fn stop(&self) {
        self.probe.stopped.store(true, Ordering::SeqCst);
    }

    fn device_id(&self) -> &str {
        &self.probe.device_id
    }
}

/// Capture backend over imaginary devices `cam-0`, `cam-1`, ...
pub(crate) struct FakeBackend {
    pub devices: Mutex<Vec<VideoInputInfo>>,
    pub deny: AtomicBool,
    /// Blocking delay per open, for tests that overlap media operations the
    /// way slow real hardware does.
    pub open_delay_ms: AtomicU64,
    /// Every capture ever opened, in open order.
    pub probes: Mutex<Vec<Arc<CaptureProbe>>>,
}

impl FakeBackend {
    pub fn with_devices(count: usize) -> Arc<Self> {
        let devices = (0..count)
            .map(|i| VideoInputInfo {
                device_id: format!("cam-{i}"),
                label: format!("Fake Camera {i}"),
            })
            .collect();
        Arc::new(Self {
            devices: Mutex::new(devices),
            deny: AtomicBool::new(false),
            open_delay_ms: AtomicU64::new(0),
            probes: Mutex::new(Vec::new()),
        })
    }

    fn open(&self, device_id: &str, kind: &'static str, profile: Option<VideoProfile>) -> Result<Box<dyn CaptureSource>, RtcError> {
        if self.deny.load(Ordering::SeqCst) {
            return Err(RtcError::MediaAccess("permission denied".into()));
        }
        let delay = self.open_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            std::thread::sleep(std::time::Duration::from_millis(delay));
        }
        let capture = FakeCapture::new(device_id, kind, profile);
        self.probes.lock().unwrap().push(Arc::clone(&capture.probe));
        Ok(Box::new(capture))
    }
}

impl MediaBackend for FakeBackend {
    fn video_inputs(&self) -> Vec<VideoInputInfo> {
        self.devices.lock().unwrap().clone()
    }

    fn open_video(
        &self,
        device: &VideoInputInfo,
        profile: VideoProfile,
    ) -> Result<Box<dyn CaptureSource>, RtcError> {
        self.open(&device.device_id, "video", Some(profile))
    }

    fn open_audio(&self, _quality: QualityPreset) -> Result<Box<dyn CaptureSource>, RtcError> {
        self.open("mic-0", "audio", None)
    }

    fn open_display(&self) -> Result<Box<dyn CaptureSource>, RtcError> {
        self.open("display-0", "display", None)
    }
}

/// Relay that records everything it is asked to send.
pub(crate) struct FakeRelay {
    sent: Mutex<Vec<SignalMessage>>,
}

impl FakeRelay {
    pub fn new() -> Arc<Self> {
        Arc::new(Self { sent: Mutex::new(Vec::new()) })
    }

    pub fn clone_dyn(self: &Arc<Self>) -> Arc<dyn SignalingRelay> {
        Arc::clone(self) as Arc<dyn SignalingRelay>
    }

    pub fn len(&self) -> usize {
        self.sent.lock().unwrap().len()
    }

    pub fn drain(&self) -> Vec<SignalMessage> {
        std::mem::take(&mut *self.sent.lock().unwrap())
    }

    pub fn offers(&self) -> usize {
        self.count(|m| matches!(m, SignalMessage::Offer { .. }))
    }

    pub fn answers(&self) -> usize {
        self.count(|m| matches!(m, SignalMessage::Answer { .. }))
    }

    pub fn last_offer_sdp(&self) -> Option<String> {
        self.sent.lock().unwrap().iter().rev().find_map(|m| match m {
            SignalMessage::Offer { sdp, .. } => Some(sdp.clone()),
            _ => None,
        })
    }

    pub fn last_answer_sdp(&self) -> Option<String> {
        self.sent.lock().unwrap().iter().rev().find_map(|m| match m {
            SignalMessage::Answer { sdp, .. } => Some(sdp.clone()),
            _ => None,
        })
    }

    fn count(&self, pred: impl Fn(&SignalMessage) -> bool) -> usize {
        self.sent.lock().unwrap().iter().filter(|m| pred(m)).count()
    }
}

impl SignalingRelay for FakeRelay {
    fn send(&self, msg: SignalMessage) -> Result<(), RtcError> {
        self.sent.lock().unwrap().push(msg);
        Ok(())
    }
}

pub(crate) struct RegistryFixture {
    pub registry: Arc<PeerRegistry>,
    pub media: Arc<LocalMediaSource>,
    pub relay: Arc<FakeRelay>,
    pub backend: Arc<FakeBackend>,
    pub events: EventHub,
    _transitions: mpsc::UnboundedReceiver<PeerTransition>,
}

pub(crate) async fn registry_fixture() -> RegistryFixture {
    registry_fixture_with(FakeBackend::with_devices(1), true).await
}

pub(crate) async fn registry_fixture_with(
    backend: Arc<FakeBackend>,
    init_media: bool,
) -> RegistryFixture {
    init_tracing();
    let events = EventHub::new(64);
    let relay = FakeRelay::new();
    let (tx, rx) = mpsc::unbounded_channel();
    let registry = Arc::new(
        PeerRegistry::new(&IceConfig::default(), events.clone(), relay.clone_dyn(), tx)
            .expect("registry"),
    );
    let media = Arc::new(LocalMediaSource::new(Arc::clone(&backend) as _));
    if init_media {
        media
            .init(MediaConstraints::default(), QualityPreset::High)
            .await
            .expect("media init");
    }
    RegistryFixture { registry, media, relay, backend, events, _transitions: rx }
}

pub(crate) struct MonitorFixture {
    pub monitor: Arc<QualityMonitor>,
    pub registry: Arc<PeerRegistry>,
    pub media: Arc<LocalMediaSource>,
    pub backend: Arc<FakeBackend>,
    pub events: EventHub,
    _inner: RegistryFixture,
}

pub(crate) async fn monitor_fixture() -> MonitorFixture {
    let fx = registry_fixture().await;
    let settings = Arc::new(RwLock::new(RtcConfig::default().media));
    let monitor = Arc::new(QualityMonitor::new(
        Arc::clone(&fx.registry),
        Arc::clone(&fx.media),
        settings,
        fx.events.clone(),
    ));
    MonitorFixture {
        monitor,
        registry: Arc::clone(&fx.registry),
        media: Arc::clone(&fx.media),
        backend: Arc::clone(&fx.backend),
        events: fx.events.clone(),
        _inner: fx,
    }
}

pub(crate) struct SessionFixture {
    pub session: Arc<CallSession>,
    pub relay: Arc<FakeRelay>,
    pub backend: Arc<FakeBackend>,
}

pub(crate) async fn session_fixture(local_id: &str) -> SessionFixture {
    init_tracing();
    let backend = FakeBackend::with_devices(1);
    let relay = FakeRelay::new();
    let session = CallSession::new(
        PeerId::from(local_id),
        RtcConfig::default(),
        Arc::clone(&backend) as _,
        relay.clone_dyn(),
    )
    .expect("session");
    session.init_media().await.expect("media init");
    SessionFixture { session, relay, backend }
}
