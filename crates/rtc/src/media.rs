use std::sync::Arc;

use huddle_protocol::QualityPreset;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

use crate::error::RtcError;

/// Capture resolution and frame rate for outgoing video.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoProfile {
    pub width: u32,
    pub height: u32,
    pub framerate: u32,
}

impl VideoProfile {
    pub const HIGH: VideoProfile = VideoProfile { width: 1920, height: 1080, framerate: 30 };
    pub const MEDIUM: VideoProfile = VideoProfile { width: 1280, height: 720, framerate: 30 };
    pub const LOW: VideoProfile = VideoProfile { width: 640, height: 480, framerate: 15 };

    pub fn for_preset(preset: QualityPreset) -> VideoProfile {
        match preset {
            QualityPreset::High => Self::HIGH,
            QualityPreset::Medium => Self::MEDIUM,
            QualityPreset::Low => Self::LOW,
        }
    }
}

/// What to open when acquiring local media.
#[derive(Debug, Clone, Copy)]
pub struct MediaConstraints {
    pub video: VideoProfile,
    pub audio: bool,
}

impl Default for MediaConstraints {
    fn default() -> Self {
        Self { video: VideoProfile::HIGH, audio: true }
    }
}

/// A video input device known to the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoInputInfo {
    pub device_id: String,
    pub label: String,
}

/// One live capture (camera, microphone or display) feeding a local track.
///
/// `set_enabled(false)` mutes at the source: the capture keeps running but
/// stops writing samples, so the track object stays stable and no
/// renegotiation is triggered.
pub trait CaptureSource: Send + Sync {
    fn track(&self) -> Arc<TrackLocalStaticSample>;
    fn set_enabled(&self, enabled: bool);
    fn is_enabled(&self) -> bool;
    /// Re-constrain a running capture in place.
    fn set_profile(&self, profile: VideoProfile);
    /// Cap the encoder, in bytes per second. Zero lifts the cap.
    fn set_bitrate_limit(&self, bytes_per_sec: u64);
    fn stop(&self);
    fn device_id(&self) -> &str;
}

/// Host-provided access to capture hardware.
///
/// The orchestration core never talks to devices directly; the embedding
/// application implements this against its platform capture stack.
pub trait MediaBackend: Send + Sync {
    fn video_inputs(&self) -> Vec<VideoInputInfo>;
    fn open_video(
        &self,
        device: &VideoInputInfo,
        profile: VideoProfile,
    ) -> Result<Box<dyn CaptureSource>, RtcError>;
    fn open_audio(&self, quality: QualityPreset) -> Result<Box<dyn CaptureSource>, RtcError>;
    fn open_display(&self) -> Result<Box<dyn CaptureSource>, RtcError>;
}

/// Outcome of a camera switch. The retired capture must stay alive until
/// every sender has been moved to the new track, then [`finish`] stops it.
///
/// [`finish`]: CameraSwitch::finish
pub struct CameraSwitch {
    pub track: Arc<TrackLocalStaticSample>,
    /// True when a screen share currently owns the outgoing video slot, in
    /// which case senders keep the screen track and only the camera swaps.
    pub screen_active: bool,
    retired: Box<dyn CaptureSource>,
}

impl CameraSwitch {
    pub fn finish(self) {
        self.retired.stop();
    }
}

/// Owns the local captures and the tracks they feed.
pub struct LocalMediaSource {
    backend: Arc<dyn MediaBackend>,
    camera: RwLock<Option<Box<dyn CaptureSource>>>,
    mic: RwLock<Option<Box<dyn CaptureSource>>>,
    screen: RwLock<Option<Box<dyn CaptureSource>>>,
    profile: Mutex<VideoProfile>,
}

impl LocalMediaSource {
    pub fn new(backend: Arc<dyn MediaBackend>) -> Self {
        Self {
            backend,
            camera: RwLock::new(None),
            mic: RwLock::new(None),
            screen: RwLock::new(None),
            profile: Mutex::new(VideoProfile::HIGH),
        }
    }

    /// Acquire camera and microphone. Re-initializing stops the previous
    /// captures first, so repeated calls never leak devices.
    pub async fn init(
        &self,
        constraints: MediaConstraints,
        audio_quality: QualityPreset,
    ) -> Result<(), RtcError> {
        if let Some(old) = self.camera.write().await.take() {
            old.stop();
        }
        if let Some(old) = self.mic.write().await.take() {
            old.stop();
        }

        let devices = self.backend.video_inputs();
        let device = devices
            .first()
            .ok_or_else(|| RtcError::MediaAccess("no video input devices".into()))?;
        let camera = self.backend.open_video(device, constraints.video)?;
        info!(device = %device.device_id, width = constraints.video.width, height = constraints.video.height, "Camera capture opened");
        *self.profile.lock().await = constraints.video;
        *self.camera.write().await = Some(camera);

        if constraints.audio {
            let mic = self.backend.open_audio(audio_quality)?;
            info!(quality = ?audio_quality, "Microphone capture opened");
            *self.mic.write().await = Some(mic);
        }
        Ok(())
    }

    /// The track currently carrying outgoing video: the screen share when
    /// one is active, the camera otherwise.
    pub async fn outgoing_video_track(&self) -> Option<Arc<TrackLocalStaticSample>> {
        if let Some(screen) = self.screen.read().await.as_ref() {
            return Some(screen.track());
        }
        self.camera.read().await.as_ref().map(|c| c.track())
    }

    pub async fn audio_track(&self) -> Option<Arc<TrackLocalStaticSample>> {
        self.mic.read().await.as_ref().map(|m| m.track())
    }

    /// Mute or unmute outgoing video at the source. Applies to whichever
    /// capture feeds the video slot.
    pub async fn toggle_video(&self, enabled: bool) {
        if let Some(camera) = self.camera.read().await.as_ref() {
            camera.set_enabled(enabled);
        }
        if let Some(screen) = self.screen.read().await.as_ref() {
            screen.set_enabled(enabled);
        }
    }

    pub async fn toggle_audio(&self, enabled: bool) {
        if let Some(mic) = self.mic.read().await.as_ref() {
            mic.set_enabled(enabled);
        }
    }

    pub async fn is_video_enabled(&self) -> bool {
        match self.camera.read().await.as_ref() {
            Some(camera) => camera.is_enabled(),
            None => false,
        }
    }

    pub async fn is_audio_enabled(&self) -> bool {
        match self.mic.read().await.as_ref() {
            Some(mic) => mic.is_enabled(),
            None => false,
        }
    }

    /// Cycle to the next video input device, preserving the current profile
    /// and mute state. Returns `None` when fewer than two devices exist.
    pub async fn switch_camera(&self) -> Result<Option<CameraSwitch>, RtcError> {
        let devices = self.backend.video_inputs();
        if devices.len() < 2 {
            return Ok(None);
        }

        // Never hold the camera lock while touching the screen slot; the
        // screen share paths take their locks in the opposite order.
        let screen_active = self.screen.read().await.is_some();
        let mut camera = self.camera.write().await;
        let Some(current) = camera.as_ref() else {
            return Ok(None);
        };
        let current_idx = devices
            .iter()
            .position(|d| d.device_id == current.device_id())
            .unwrap_or(0);
        let next = &devices[(current_idx + 1) % devices.len()];

        let profile = *self.profile.lock().await;
        let replacement = self.backend.open_video(next, profile)?;
        replacement.set_enabled(current.is_enabled());
        let track = replacement.track();
        info!(device = %next.device_id, "Switched camera");

        let retired = camera.replace(replacement);
        match retired {
            Some(retired) => Ok(Some(CameraSwitch { track, screen_active, retired })),
            None => Ok(None),
        }
    }

    /// Open a display capture and make it the outgoing video. Idempotent
    /// while a share is already running.
    pub async fn start_screen_share(&self) -> Result<Arc<TrackLocalStaticSample>, RtcError> {
        // Snapshot the camera's mute state up front; holding the screen lock
        // while reading the camera slot would invert switch_camera's order.
        let video_enabled = self.camera.read().await.as_ref().map(|c| c.is_enabled());

        let mut screen = self.screen.write().await;
        if let Some(existing) = screen.as_ref() {
            debug!("Screen share already active");
            return Ok(existing.track());
        }
        let capture = self.backend.open_display()?;
        if let Some(enabled) = video_enabled {
            capture.set_enabled(enabled);
        }
        let track = capture.track();
        *screen = Some(capture);
        info!("Display capture opened");
        Ok(track)
    }

    /// Stop the display capture and hand back the camera track that should
    /// carry outgoing video again, if a camera is open.
    pub async fn stop_screen_share(&self) -> Option<Arc<TrackLocalStaticSample>> {
        let retired = self.screen.write().await.take()?;
        retired.stop();
        info!("Display capture stopped");
        self.camera.read().await.as_ref().map(|c| c.track())
    }

    pub async fn screen_share_active(&self) -> bool {
        self.screen.read().await.is_some()
    }

    /// Re-constrain the live video capture. The track object is untouched,
    /// so peers see a resolution change without renegotiation.
    pub async fn apply_video_profile(&self, profile: VideoProfile) {
        *self.profile.lock().await = profile;
        if let Some(screen) = self.screen.read().await.as_ref() {
            screen.set_profile(profile);
            return;
        }
        if let Some(camera) = self.camera.read().await.as_ref() {
            camera.set_profile(profile);
        }
    }

    pub async fn current_profile(&self) -> VideoProfile {
        *self.profile.lock().await
    }

    pub async fn set_bitrate_limit(&self, bytes_per_sec: u64) {
        for slot in [&self.camera, &self.screen] {
            if let Some(capture) = slot.read().await.as_ref() {
                capture.set_bitrate_limit(bytes_per_sec);
            }
        }
        debug!(bytes_per_sec, "Outgoing bitrate cap applied");
    }

    pub async fn shutdown(&self) {
        for slot in [&self.camera, &self.mic, &self.screen] {
            if let Some(capture) = slot.write().await.take() {
                capture.stop();
            }
        }
    }
}
