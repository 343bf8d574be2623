use serde::{Deserialize, Serialize};

/// Top-level configuration for the meeting media core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RtcConfig {
    #[serde(default)]
    pub media: MediaSettings,
    #[serde(default)]
    pub ice: IceConfig,
    #[serde(default)]
    pub reconnect: ReconnectConfig,
    #[serde(default)]
    pub stats: StatsConfig,
}

/// Quality preset for outgoing media.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityPreset {
    High,
    Medium,
    Low,
}

/// Runtime-tunable media settings, readable by the negotiation engine and the
/// quality monitor. Session-scoped and mutable while a call is live.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaSettings {
    /// Outgoing video quality preset
    #[serde(default = "default_preset")]
    pub video_quality: QualityPreset,
    /// Outgoing audio quality preset
    #[serde(default = "default_preset")]
    pub audio_quality: QualityPreset,
    /// Outgoing bandwidth cap in bytes per second (0 = unlimited)
    #[serde(default)]
    pub bandwidth_limit: u64,
    /// Let the quality monitor adjust the outgoing video profile
    #[serde(default = "default_true")]
    pub adaptive_quality: bool,
    /// Apply `bandwidth_limit` as a capture-side bitrate cap
    #[serde(default = "default_true")]
    pub bandwidth_optimization: bool,
}

/// ICE/TURN server configuration for NAT traversal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IceConfig {
    /// STUN server URLs (default: Google's public STUN servers)
    #[serde(default = "default_stun_urls")]
    pub stun_urls: Vec<String>,
    /// TURN server URLs (e.g., "turn:turn.example.com:3478")
    #[serde(default)]
    pub turn_urls: Vec<String>,
    /// TURN username (for long-term credential mechanism)
    pub turn_username: Option<String>,
    /// TURN credential/password
    pub turn_credential: Option<String>,
}

/// Bounded exponential backoff for per-peer recovery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconnectConfig {
    /// Attempts per peer before giving up
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Delay before the first attempt, in milliseconds (doubles each attempt)
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Ceiling on the backoff delay, in milliseconds
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

/// Transport statistics sampling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsConfig {
    /// Sampling tick for all peers, in milliseconds
    #[serde(default = "default_stats_interval_ms")]
    pub interval_ms: u64,
}

impl Default for MediaSettings {
    fn default() -> Self {
        Self {
            video_quality: QualityPreset::High,
            audio_quality: QualityPreset::High,
            bandwidth_limit: 0,
            adaptive_quality: true,
            bandwidth_optimization: true,
        }
    }
}

impl Default for IceConfig {
    fn default() -> Self {
        Self {
            stun_urls: default_stun_urls(),
            turn_urls: Vec::new(),
            turn_username: None,
            turn_credential: None,
        }
    }
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_stats_interval_ms(),
        }
    }
}

impl Default for RtcConfig {
    fn default() -> Self {
        Self {
            media: MediaSettings::default(),
            ice: IceConfig::default(),
            reconnect: ReconnectConfig::default(),
            stats: StatsConfig::default(),
        }
    }
}

impl RtcConfig {
    /// Validate the configuration, returning a list of issues found.
    ///
    /// Issues are prefixed with "ERROR:" (fatal, the session should not be
    /// created) or "WARNING:" (advisory, the config is likely wrong).
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut issues = Vec::new();

        // --- STUN URLs ---
        for url in &self.ice.stun_urls {
            if !url.starts_with("stun:") && !url.starts_with("stuns:") {
                issues.push(format!(
                    "ERROR: STUN URL '{}' must start with 'stun:' or 'stuns:'. \
                     Example: stun:stun.l.google.com:19302",
                    url
                ));
            }
        }

        // --- TURN URLs ---
        for url in &self.ice.turn_urls {
            if !url.starts_with("turn:") && !url.starts_with("turns:") {
                issues.push(format!(
                    "ERROR: TURN URL '{}' must start with 'turn:' or 'turns:'. \
                     Example: turn:turn.example.com:3478",
                    url
                ));
            }
        }

        if (self.ice.turn_username.is_some()) != (self.ice.turn_credential.is_some()) {
            issues.push(
                "WARNING: turn_username and turn_credential must be set together. \
                 The TURN server will reject half-configured credentials."
                    .to_string(),
            );
        }

        // --- Reconnect ---
        if self.reconnect.max_attempts == 0 {
            issues.push(
                "ERROR: reconnect.max_attempts must be >= 1. \
                 Use a large value to retry aggressively, not 0."
                    .to_string(),
            );
        }
        if self.reconnect.base_delay_ms == 0 {
            issues.push("ERROR: reconnect.base_delay_ms must be >= 1.".to_string());
        }
        if self.reconnect.max_delay_ms < self.reconnect.base_delay_ms {
            issues.push(format!(
                "ERROR: reconnect.max_delay_ms ({}) must be >= base_delay_ms ({}).",
                self.reconnect.max_delay_ms, self.reconnect.base_delay_ms
            ));
        }

        // --- Stats ---
        if self.stats.interval_ms < 250 {
            issues.push(format!(
                "ERROR: stats.interval_ms must be at least 250, got {}. \
                 Sub-250ms sampling floods the stats pipeline for no benefit.",
                self.stats.interval_ms
            ));
        }

        // --- Bandwidth cap ---
        if self.media.bandwidth_limit > 0 && self.media.bandwidth_limit < 50_000 {
            issues.push(format!(
                "WARNING: media.bandwidth_limit is {} B/s, below what a single \
                 audio stream needs. Video will be unusable at this cap.",
                self.media.bandwidth_limit
            ));
        }

        if issues.is_empty() { Ok(()) } else { Err(issues) }
    }
}

fn default_preset() -> QualityPreset {
    QualityPreset::High
}
fn default_true() -> bool {
    true
}
fn default_max_attempts() -> u32 {
    5
}
fn default_base_delay_ms() -> u64 {
    1000
}
fn default_max_delay_ms() -> u64 {
    30_000
}
fn default_stats_interval_ms() -> u64 {
    3000
}
fn default_stun_urls() -> Vec<String> {
    vec![
        "stun:stun.l.google.com:19302".to_string(),
        "stun:stun1.l.google.com:19302".to_string(),
    ]
}
