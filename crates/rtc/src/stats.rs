use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use huddle_protocol::{MediaSettings, PeerId};
use serde::Serialize;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info};
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::stats::StatsReportType;

use crate::events::{EventHub, SessionEvent};
use crate::media::{LocalMediaSource, VideoProfile};
use crate::peer::PeerRegistry;

/// Ordered by severity: `Low` is the worst link quality and compares
/// greatest, so the worst class of a batch is its `max()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityClass {
    High,
    Medium,
    Low,
}

/// Classify one observation interval. Loss is packets lost during the
/// interval, bandwidth is receive throughput over it in bytes per second.
pub fn classify(packets_lost: i64, bandwidth_bytes_per_sec: u64) -> QualityClass {
    if packets_lost > 5 || bandwidth_bytes_per_sec < 500_000 {
        QualityClass::Low
    } else if packets_lost > 2 || bandwidth_bytes_per_sec < 1_000_000 {
        QualityClass::Medium
    } else {
        QualityClass::High
    }
}

/// One peer's measurements for one sampling tick.
#[derive(Debug, Clone, Serialize)]
pub struct QualitySample {
    pub peer_id: PeerId,
    pub bandwidth_bytes_per_sec: u64,
    pub packets_lost: i64,
    pub round_trip_time_ms: f64,
    pub jitter_ms: f64,
    pub quality: QualityClass,
    pub sampled_at_ms: u64,
}

/// Per-peer window over the previous tick's cumulative counters.
#[derive(Debug, Default)]
struct StatsWindow {
    prev_bytes: u64,
    prev_at: Option<Instant>,
    prev_lost_total: i64,
    prev_rtt_ms: Option<f64>,
    jitter_ms: f64,
}

impl StatsWindow {
    /// Smoothed variation estimate in the interarrival-jitter style of
    /// RFC 3550: each new deviation moves the estimate by a sixteenth.
    fn update_jitter(&mut self, rtt_ms: f64) -> f64 {
        if let Some(prev) = self.prev_rtt_ms {
            let deviation = (rtt_ms - prev).abs();
            self.jitter_ms += (deviation - self.jitter_ms) / 16.0;
        }
        self.prev_rtt_ms = Some(rtt_ms);
        self.jitter_ms
    }
}

#[derive(Debug, Default)]
struct TransportSnapshot {
    pair_bytes_received: u64,
    rtt_ms: f64,
    video_lost_total: i64,
    audio_lost_total: i64,
    has_video: bool,
}

/// Pull the numbers we care about out of a raw stats report: the nominated
/// candidate pair for throughput and transport RTT, remote inbound RTP for
/// loss as the far side saw it.
async fn snapshot(pc: &RTCPeerConnection) -> TransportSnapshot {
    let report = pc.get_stats().await;
    let mut snap = TransportSnapshot::default();
    for stat in report.reports.values() {
        match stat {
            StatsReportType::CandidatePair(pair) => {
                if pair.nominated {
                    snap.pair_bytes_received = pair.bytes_received;
                    snap.rtt_ms = pair.current_round_trip_time * 1000.0;
                }
            }
            StatsReportType::RemoteInboundRTP(remote) => {
                if remote.kind == "video" {
                    snap.has_video = true;
                    snap.video_lost_total = remote.packets_lost;
                    if let Some(rtt) = remote.round_trip_time {
                        snap.rtt_ms = rtt * 1000.0;
                    }
                } else if remote.kind == "audio" {
                    snap.audio_lost_total = remote.packets_lost;
                }
            }
            _ => {}
        }
    }
    snap
}

/// Samples every connected peer on a timer, classifies link quality and
/// adapts the outgoing capture profile when enabled.
pub struct QualityMonitor {
    registry: Arc<PeerRegistry>,
    media: Arc<LocalMediaSource>,
    settings: Arc<RwLock<MediaSettings>>,
    events: EventHub,
    windows: Mutex<HashMap<PeerId, StatsWindow>>,
    tick: Mutex<Option<JoinHandle<()>>>,
    applied: Mutex<Option<VideoProfile>>,
}

impl QualityMonitor {
    pub(crate) fn new(
        registry: Arc<PeerRegistry>,
        media: Arc<LocalMediaSource>,
        settings: Arc<RwLock<MediaSettings>>,
        events: EventHub,
    ) -> Self {
        Self {
            registry,
            media,
            settings,
            events,
            windows: Mutex::new(HashMap::new()),
            tick: Mutex::new(None),
            applied: Mutex::new(None),
        }
    }

    /// Start periodic sampling. A second start replaces the running timer
    /// instead of stacking another one.
    pub async fn start(self: &Arc<Self>, interval: Duration) {
        let mut tick = self.tick.lock().await;
        if let Some(old) = tick.take() {
            old.abort();
        }
        let monitor = Arc::clone(self);
        *tick = Some(tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                monitor.sample_all().await;
            }
        }));
        info!(interval_ms = interval.as_millis() as u64, "Quality monitoring started");
    }

    pub async fn stop(&self) {
        if let Some(timer) = self.tick.lock().await.take() {
            timer.abort();
            info!("Quality monitoring stopped");
        }
    }

    pub async fn is_running(&self) -> bool {
        self.tick.lock().await.is_some()
    }

    /// One sampling pass over every registered peer. Links that are not
    /// connected are skipped, and each peer's first pass only seeds its
    /// window since deltas need two observations.
    pub async fn sample_all(&self) -> Vec<QualitySample> {
        let now = Instant::now();
        let sampled_at_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;

        let links = self.registry.links().await;
        let mut windows = self.windows.lock().await;
        windows.retain(|id, _| links.iter().any(|l| l.peer_id() == id));

        let mut samples = Vec::new();
        for link in &links {
            if !link.is_connected() {
                continue;
            }
            let snap = snapshot(&link.pc).await;
            let window = windows.entry(link.peer_id().clone()).or_default();

            let lost_total =
                if snap.has_video { snap.video_lost_total } else { snap.audio_lost_total };
            let Some(prev_at) = window.prev_at else {
                window.prev_bytes = snap.pair_bytes_received;
                window.prev_lost_total = lost_total;
                window.prev_at = Some(now);
                continue;
            };

            let elapsed = now.duration_since(prev_at).as_secs_f64();
            let bytes_delta = snap.pair_bytes_received.saturating_sub(window.prev_bytes);
            let bandwidth =
                if elapsed > 0.0 { (bytes_delta as f64 / elapsed) as u64 } else { 0 };
            let packets_lost = (lost_total - window.prev_lost_total).max(0);
            let jitter_ms = window.update_jitter(snap.rtt_ms);

            window.prev_bytes = snap.pair_bytes_received;
            window.prev_lost_total = lost_total;
            window.prev_at = Some(now);

            samples.push(QualitySample {
                peer_id: link.peer_id().clone(),
                bandwidth_bytes_per_sec: bandwidth,
                packets_lost,
                round_trip_time_ms: snap.rtt_ms,
                jitter_ms,
                quality: classify(packets_lost, bandwidth),
                sampled_at_ms,
            });
        }
        drop(windows);

        debug!(peers = samples.len(), "Stats batch sampled");
        self.events.emit(SessionEvent::StatsUpdate { samples: samples.clone() });

        if self.settings.read().await.adaptive_quality {
            // One shared capture serves every peer, so adapt once per batch
            // to the worst class observed. Per-peer adaptation would thrash
            // the camera between profiles on every tick.
            if let Some(worst) = samples.iter().map(|s| s.quality).max() {
                self.adapt_quality(worst).await;
            }
        }
        samples
    }

    /// Move the outgoing capture between the high and low profiles based on
    /// the batch's worst classified quality. Medium holds the current
    /// profile. The track object never changes, so no renegotiation follows.
    async fn adapt_quality(&self, quality: QualityClass) {
        let target = match quality {
            QualityClass::Low => VideoProfile::LOW,
            QualityClass::High => VideoProfile::HIGH,
            QualityClass::Medium => return,
        };
        let mut applied = self.applied.lock().await;
        if *applied == Some(target) {
            return;
        }
        info!(
            width = target.width,
            height = target.height,
            fps = target.framerate,
            "Adapting outgoing video profile"
        );
        self.media.apply_video_profile(target).await;
        *applied = Some(target);
    }
}
