//! Session configuration (config.toml)
//!
//! Timing, audio and rewind constants for a session. Every field has a
//! default, so a partial (or missing) file is always valid. Settings live in
//! the platform-specific config directory.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::ConfigError;

/// Complete session configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct SessionConfig {
    /// Frame clock settings
    #[serde(default)]
    pub clock: ClockConfig,
    /// Audio pacing settings
    #[serde(default)]
    pub audio: AudioConfig,
    /// Rewind history settings
    #[serde(default)]
    pub rewind: RewindConfig,
    /// Persistent RAM flushing
    #[serde(default)]
    pub persist: PersistConfig,
}

/// Frame clock configuration.
///
/// The tick rate is not configurable; it belongs to the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClockConfig {
    /// Longest wall-clock interval simulated by one callback (default: 5/60 s)
    #[serde(default = "default_max_update_sec")]
    pub max_update_sec: f64,
    /// Weight kept by the previous throughput estimate (default: 0.3)
    #[serde(default = "default_fps_smoothing")]
    pub fps_smoothing: f64,
    /// Cap on the instantaneous callback rate (default: 10000)
    #[serde(default = "default_max_fps")]
    pub max_fps: f64,
}

/// Audio configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioConfig {
    /// Output sample rate in Hz (default: 44100)
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
    /// Stereo frames per audio batch (default: 4096)
    #[serde(default = "default_audio_frames")]
    pub frames: usize,
    /// Scheduling lead over the audio clock in seconds (default: 0.1)
    #[serde(default = "default_latency_sec")]
    pub latency_sec: f64,
}

/// Rewind configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RewindConfig {
    /// Frames between full base records (default: 45)
    #[serde(default = "default_frames_per_base_state")]
    pub frames_per_base_state: u32,
    /// History capacity in bytes (default: 4 MiB)
    #[serde(default = "default_buffer_capacity")]
    pub buffer_capacity: usize,
    /// Auto-rewind speed relative to real time (default: 1.5)
    #[serde(default = "default_rewind_factor")]
    pub factor: f64,
    /// Auto-rewind timer period in milliseconds (default: 16)
    #[serde(default = "default_update_interval_ms")]
    pub update_interval_ms: u64,
}

/// Persistent RAM configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistConfig {
    /// Minimum period between persistent RAM flushes in milliseconds (default: 1000)
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,
}

fn default_max_update_sec() -> f64 {
    5.0 / 60.0
}
fn default_fps_smoothing() -> f64 {
    0.3
}
fn default_max_fps() -> f64 {
    10_000.0
}

fn default_sample_rate() -> u32 {
    44_100
}
fn default_audio_frames() -> usize {
    4096
}
fn default_latency_sec() -> f64 {
    0.1
}

fn default_frames_per_base_state() -> u32 {
    45
}
fn default_buffer_capacity() -> usize {
    4 * 1024 * 1024
}
fn default_rewind_factor() -> f64 {
    1.5
}
fn default_update_interval_ms() -> u64 {
    16
}

fn default_flush_interval_ms() -> u64 {
    1000
}

impl Default for ClockConfig {
    fn default() -> Self {
        Self {
            max_update_sec: default_max_update_sec(),
            fps_smoothing: default_fps_smoothing(),
            max_fps: default_max_fps(),
        }
    }
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: default_sample_rate(),
            frames: default_audio_frames(),
            latency_sec: default_latency_sec(),
        }
    }
}

impl Default for RewindConfig {
    fn default() -> Self {
        Self {
            frames_per_base_state: default_frames_per_base_state(),
            buffer_capacity: default_buffer_capacity(),
            factor: default_rewind_factor(),
            update_interval_ms: default_update_interval_ms(),
        }
    }
}

impl Default for PersistConfig {
    fn default() -> Self {
        Self {
            flush_interval_ms: default_flush_interval_ms(),
        }
    }
}

impl SessionConfig {
    /// Parse and validate a TOML document
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize to a TOML document
    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Reject values the schedulers cannot work with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.clock.max_update_sec > 0.0) {
            return Err(ConfigError::Invalid("clock.max_update_sec must be > 0".into()));
        }
        if !(0.0..1.0).contains(&self.clock.fps_smoothing) {
            return Err(ConfigError::Invalid(
                "clock.fps_smoothing must be in [0, 1)".into(),
            ));
        }
        if !(self.clock.max_fps > 0.0) {
            return Err(ConfigError::Invalid("clock.max_fps must be > 0".into()));
        }
        if self.audio.sample_rate == 0 || self.audio.frames == 0 {
            return Err(ConfigError::Invalid(
                "audio.sample_rate and audio.frames must be > 0".into(),
            ));
        }
        if !self.audio.latency_sec.is_finite() || self.audio.latency_sec < 0.0 {
            return Err(ConfigError::Invalid("audio.latency_sec must be >= 0".into()));
        }
        if self.rewind.frames_per_base_state == 0 {
            return Err(ConfigError::Invalid(
                "rewind.frames_per_base_state must be > 0".into(),
            ));
        }
        if self.rewind.buffer_capacity == 0 {
            return Err(ConfigError::Invalid("rewind.buffer_capacity must be > 0".into()));
        }
        if !(self.rewind.factor > 1.0) {
            return Err(ConfigError::Invalid("rewind.factor must be > 1".into()));
        }
        if self.rewind.update_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "rewind.update_interval_ms must be > 0".into(),
            ));
        }
        Ok(())
    }

    /// Auto-rewind timer period in seconds
    pub fn rewind_interval_sec(&self) -> f64 {
        self.rewind.update_interval_ms as f64 / 1000.0
    }

    /// Duration of one audio batch in seconds
    pub fn audio_batch_sec(&self) -> f64 {
        self.audio.frames as f64 / self.audio.sample_rate as f64
    }
}

/// Returns the platform-specific configuration directory.
///
/// On Linux: `~/.config/Rewinder`
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("io.rewinder", "", "Rewinder")
        .map(|dirs| dirs.config_dir().to_path_buf())
}

/// Returns the platform-specific data directory (blob store root).
pub fn data_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("io.rewinder", "", "Rewinder")
        .map(|dirs| dirs.data_dir().to_path_buf())
}

/// Loads `config.toml` from the platform config directory.
///
/// Returns defaults if the file doesn't exist or cannot be parsed.
pub fn load() -> SessionConfig {
    config_dir()
        .and_then(|dir| load_from(&dir.join("config.toml")).ok())
        .unwrap_or_default()
}

/// Loads and validates a specific config file.
pub fn load_from(path: &Path) -> Result<SessionConfig, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    SessionConfig::from_toml_str(&content)
}

/// Writes `config.toml` to the platform config directory, creating it if needed.
pub fn save(config: &SessionConfig) -> Result<(), ConfigError> {
    if let Some(dir) = config_dir() {
        std::fs::create_dir_all(&dir)?;
        std::fs::write(dir.join("config.toml"), config.to_toml_string()?)?;
    }
    Ok(())
}
