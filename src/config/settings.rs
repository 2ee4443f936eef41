//! Application settings structs, defaults and TOML persistence.
//!
//! All structs implement `Serialize`, `Deserialize`, `Default` and `Clone`
//! so they can be round-tripped through TOML files and shared across tasks.
//! Every section is `#[serde(default)]`, so a `settings.toml` that only sets
//! a handful of keys still loads.

use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use super::AppPaths;

// ---------------------------------------------------------------------------
// ServiceConfig
// ---------------------------------------------------------------------------

/// Where the speech, chat and synthesis services live.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Base URL shared by `/api/stt`, `/api/chat`, `/api/tts` and
    /// `/api/verify`.
    pub base_url: String,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3000".into(),
            timeout_secs: 30,
        }
    }
}

impl ServiceConfig {
    /// Join `path` onto the base URL without doubling the slash.
    pub fn endpoint(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

// ---------------------------------------------------------------------------
// AudioConfig
// ---------------------------------------------------------------------------

/// Capture, volume metering and silence detection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Sample rate of the finished WAV clip sent for transcription.
    pub target_sample_rate: u32,
    /// FFT window used by the volume analyser (power of two).
    pub fft_size: usize,
    /// Smoothing time constant applied to bin magnitudes between frames
    /// (0.0 – 1.0).
    pub smoothing: f32,
    /// Bottom of the decibel range mapped to volume 0.
    pub min_decibels: f32,
    /// Top of the decibel range mapped to full scale.
    pub max_decibels: f32,
    /// Volume (0 – 100) at or above which the user counts as speaking.
    pub silence_threshold: f32,
    /// Continuous sub-threshold time after which recording stops.
    pub silence_duration_ms: u64,
    /// How often the silence clock is checked.
    pub silence_check_interval_ms: u64,
    /// Hard cap on a single recording.
    pub max_recording_secs: f32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            target_sample_rate: 16_000,
            fft_size: 256,
            smoothing: 0.8,
            min_decibels: -100.0,
            max_decibels: -30.0,
            silence_threshold: 15.0,
            silence_duration_ms: 1_500,
            silence_check_interval_ms: 100,
            max_recording_secs: 60.0,
        }
    }
}

// ---------------------------------------------------------------------------
// SpeechConfig
// ---------------------------------------------------------------------------

/// How a reply is turned into audio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchMode {
    /// One synthesis request for the whole reply.
    FullReply,
    /// One request per speakable unit, a few in flight at once.
    Chunked,
}

impl Default for DispatchMode {
    fn default() -> Self {
        Self::Chunked
    }
}

/// Reply segmentation and text-to-speech settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SpeechConfig {
    pub dispatch: DispatchMode,
    /// Synthesis requests in flight at once in `Chunked` mode.
    pub concurrency: usize,
    /// Longest speakable unit, in characters.
    pub max_unit_chars: usize,
    /// Voice identifier forwarded to the synthesis service.  `None` lets the
    /// service pick its default voice.
    pub voice_id: Option<String>,
    /// Synthesized clips kept in memory; `0` disables the cache.
    pub cache_capacity: usize,
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            dispatch: DispatchMode::default(),
            concurrency: 3,
            max_unit_chars: 200,
            voice_id: None,
            cache_capacity: 50,
        }
    }
}

// ---------------------------------------------------------------------------
// PlaybackConfig
// ---------------------------------------------------------------------------

/// Audio output settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    /// Speed multiplier applied to every clip (1.0 = as synthesized).  The
    /// clip is resampled, so pitch moves with speed.
    pub playback_rate: f32,
    /// Delay before a rejected playback is attempted again.
    pub retry_delay_ms: u64,
    /// Length of the silent clip played to unlock the output device.
    pub unlock_clip_ms: u64,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            playback_rate: 1.0,
            retry_delay_ms: 200,
            unlock_clip_ms: 50,
        }
    }
}

// ---------------------------------------------------------------------------
// HotkeyConfig
// ---------------------------------------------------------------------------

/// Global hotkey bindings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HotkeyConfig {
    /// Key that acts as the single talk / stop / interrupt control
    /// (e.g. `"F9"`).
    pub control_key: String,
}

impl Default for HotkeyConfig {
    fn default() -> Self {
        Self {
            control_key: "F9".into(),
        }
    }
}

// ---------------------------------------------------------------------------
// GateConfig
// ---------------------------------------------------------------------------

/// Free-use limit and owner password.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    /// Sessions an unauthenticated user may start.
    pub max_free_uses: u32,
    /// Verified against the service at startup; a valid password lifts the
    /// limit for this process.
    pub owner_password: Option<String>,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            max_free_uses: 5,
            owner_password: None,
        }
    }
}

// ---------------------------------------------------------------------------
// AppConfig  (top-level)
// ---------------------------------------------------------------------------

/// Top-level application configuration, serialised as `settings.toml`.
///
/// # Persistence
///
/// ```rust,no_run
/// use voice_practice::config::AppConfig;
///
/// // Load (returns Default when file is missing)
/// let config = AppConfig::load().unwrap();
///
/// // Modify and save
/// // config.save().unwrap();
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub service: ServiceConfig,
    pub audio: AudioConfig,
    pub speech: SpeechConfig,
    pub playback: PlaybackConfig,
    pub hotkey: HotkeyConfig,
    pub gate: GateConfig,
}

impl AppConfig {
    /// Load configuration from the platform-appropriate `settings.toml`.
    ///
    /// Returns `Ok(AppConfig::default())` when the file does not exist yet.
    pub fn load() -> Result<Self> {
        Self::load_from(&AppPaths::new().settings_file)
    }

    /// Load from an explicit path (useful for tests).
    pub fn load_from(path: &std::path::Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to the platform-appropriate `settings.toml`,
    /// creating parent directories as needed.
    pub fn save(&self) -> Result<()> {
        self.save_to(&AppPaths::new().settings_file)
    }

    /// Save to an explicit path (useful for tests).
    pub fn save_to(&self, path: &std::path::Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
