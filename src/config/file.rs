//! Configuration file management for storyvoice.
//!
//! Loads and saves the TOML configuration stored in the user's config directory.
//! Every section and field has a default, so a partial (or empty) file is valid.

use anyhow::anyhow;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::feedback::presenter::TierThresholds;

/// Visualization type for the recording display.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum VisualizationType {
    /// Scrolling amplitude history
    Waveform,
    /// Energy across the voice frequency range
    #[default]
    Spectrum,
}

impl std::fmt::Display for VisualizationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Waveform => write!(f, "waveform"),
            Self::Spectrum => write!(f, "spectrum"),
        }
    }
}

/// Audio capture and visualization settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    /// "default", a numeric index, or a device name from `storyvoice list-devices`
    #[serde(default = "default_device")]
    pub device: String,
    /// Requested sample rate in Hz; the device rate wins if they differ
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
    /// Reference level in dBFS for a full-height bar
    #[serde(default = "default_reference_level_db")]
    pub reference_level_db: i8,
    #[serde(default)]
    pub visualization: VisualizationType,
    /// How often buffered samples are cut into a chunk
    #[serde(default = "default_chunk_interval_ms")]
    pub chunk_interval_ms: u64,
    /// Visualizer frames per second
    #[serde(default = "default_frame_rate")]
    pub frame_rate: u32,
    /// Upload webm/opus when ffmpeg is available, wav otherwise
    #[serde(default = "default_true")]
    pub prefer_compressed: bool,
}

/// Recording limits for a single practice attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Recording stops on its own after this many seconds
    #[serde(default = "default_max_duration_secs")]
    pub max_duration_secs: u64,
    /// Recordings smaller than this are rejected as too short
    #[serde(default = "default_min_audio_bytes")]
    pub min_audio_bytes: usize,
    /// Recordings playing for less than this are rejected as too short,
    /// whatever the sample rate
    #[serde(default = "default_min_duration_ms")]
    pub min_duration_ms: u64,
}

/// Backend connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

/// Score thresholds for the feedback message tiers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresenterConfig {
    #[serde(default = "default_top")]
    pub top: u8,
    #[serde(default = "default_second")]
    pub second: u8,
    #[serde(default = "default_third")]
    pub third: u8,
}

/// Defaults for the practice context when not given on the command line.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PracticeConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryConfig {
    /// Maximum number of feedback entries kept locally
    #[serde(default = "default_history_capacity")]
    pub capacity: usize,
}

fn default_device() -> String {
    "default".to_string()
}

fn default_sample_rate() -> u32 {
    16000
}

fn default_reference_level_db() -> i8 {
    -20
}

fn default_chunk_interval_ms() -> u64 {
    100
}

fn default_frame_rate() -> u32 {
    60
}

fn default_true() -> bool {
    true
}

fn default_max_duration_secs() -> u64 {
    30
}

fn default_min_audio_bytes() -> usize {
    1000
}

fn default_min_duration_ms() -> u64 {
    50
}

fn default_base_url() -> String {
    "http://localhost:8082/api/tutor".to_string()
}

fn default_timeout_secs() -> u64 {
    60
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_top() -> u8 {
    90
}

fn default_second() -> u8 {
    75
}

fn default_third() -> u8 {
    60
}

fn default_history_capacity() -> usize {
    50
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            device: default_device(),
            sample_rate: default_sample_rate(),
            reference_level_db: default_reference_level_db(),
            visualization: VisualizationType::default(),
            chunk_interval_ms: default_chunk_interval_ms(),
            frame_rate: default_frame_rate(),
            prefer_compressed: true,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_duration_secs: default_max_duration_secs(),
            min_audio_bytes: default_min_audio_bytes(),
            min_duration_ms: default_min_duration_ms(),
        }
    }
}

impl SessionConfig {
    pub fn max_duration(&self) -> Duration {
        Duration::from_secs(self.max_duration_secs)
    }

    pub fn min_duration(&self) -> Duration {
        Duration::from_millis(self.min_duration_ms)
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_secs: default_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

impl Default for PresenterConfig {
    fn default() -> Self {
        Self {
            top: default_top(),
            second: default_second(),
            third: default_third(),
        }
    }
}

impl PresenterConfig {
    /// Validated tier thresholds.
    pub fn thresholds(&self) -> anyhow::Result<TierThresholds> {
        TierThresholds::new(self.top, self.second, self.third)
    }
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            capacity: default_history_capacity(),
        }
    }
}

/// Complete application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub audio: AudioConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub presenter: PresenterConfig,
    #[serde(default)]
    pub practice: PracticeConfig,
    #[serde(default)]
    pub history: HistoryConfig,
}

impl AppConfig {
    /// Loads configuration from the user's config directory, writing the defaults
    /// first if no file exists yet.
    ///
    /// # Errors
    /// - If the config directory cannot be determined or created
    /// - If the file cannot be read or written
    /// - If the TOML is malformed or the values are inconsistent
    pub fn load() -> anyhow::Result<Self> {
        let config_path = get_config_path()?;
        if !config_path.exists() {
            tracing::info!(
                "No configuration found, writing defaults to {}",
                config_path.display()
            );
            Self::default().save_to(&config_path)?;
        }
        Self::load_from(&config_path)
    }

    /// Loads and validates configuration from a specific file.
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| anyhow!("Failed to read {}: {e}", path.display()))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> anyhow::Result<Self> {
        let config: AppConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        self.presenter.thresholds()?;
        if self.audio.frame_rate == 0 {
            return Err(anyhow!("audio.frame_rate must be greater than zero"));
        }
        if self.audio.chunk_interval_ms == 0 {
            return Err(anyhow!("audio.chunk_interval_ms must be greater than zero"));
        }
        if self.session.max_duration_secs == 0 {
            return Err(anyhow!("session.max_duration_secs must be greater than zero"));
        }
        if self.session.min_duration() >= self.session.max_duration() {
            return Err(anyhow!(
                "session.min_duration_ms must be shorter than session.max_duration_secs"
            ));
        }
        Ok(())
    }

    /// Writes this configuration to `path`, creating parent directories.
    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;
        tracing::info!("Configuration saved to {}", path.display());
        Ok(())
    }
}

/// Path of the configuration file, `~/.config/storyvoice/storyvoice.toml`.
///
/// # Errors
/// - If the home directory cannot be determined
pub fn get_config_path() -> anyhow::Result<PathBuf> {
    let home = dirs::home_dir().ok_or_else(|| anyhow!("Could not determine home directory"))?;
    Ok(home.join(".config").join("storyvoice").join("storyvoice.toml"))
}

/// Directory for persistent application data, `~/.local/share/storyvoice`.
pub fn get_data_dir() -> anyhow::Result<PathBuf> {
    let home = dirs::home_dir().ok_or_else(|| anyhow!("Could not determine home directory"))?;
    let data_dir = home.join(".local").join("share").join("storyvoice");
    fs::create_dir_all(&data_dir)?;
    Ok(data_dir)
}
