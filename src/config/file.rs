//! TOML configuration file loading
//!
//! Supports `~/.config/hark/config.toml` as a persistent config source.
//! Every field is optional; the file is a partial overlay on top of defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::Result;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct HarkConfigFile {
    /// Wake word engine
    #[serde(default)]
    pub detector: DetectorFileConfig,

    /// Input device selection
    #[serde(default)]
    pub audio: AudioFileConfig,

    /// Utterance capture tunables
    #[serde(default)]
    pub capture: CaptureFileConfig,

    /// Speech-to-text
    #[serde(default)]
    pub stt: SttFileConfig,

    /// Text-to-speech
    #[serde(default)]
    pub tts: TtsFileConfig,

    /// Language-model agent
    #[serde(default)]
    pub agent: AgentFileConfig,

    /// Gmail tools
    #[serde(default)]
    pub email: EmailFileConfig,

    /// Audio output
    #[serde(default)]
    pub playback: PlaybackFileConfig,

    /// API keys for external services
    #[serde(default)]
    pub api_keys: ApiKeysFileConfig,
}

/// Wake word engine configuration
#[derive(Debug, Default, Deserialize)]
pub struct DetectorFileConfig {
    /// Picovoice access key
    pub access_key: Option<String>,

    /// Keyword model files (`.ppn`)
    pub keyword_paths: Option<Vec<PathBuf>>,

    /// Per-keyword sensitivities in [0, 1]
    pub sensitivities: Option<Vec<f32>>,

    /// Custom engine model file
    pub model_path: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
pub struct AudioFileConfig {
    /// Device index, name, or "default"
    pub input_device: Option<String>,

    /// Prefer opening the device at the detector's rate when supported
    pub prefer_detector_rate: Option<bool>,

    /// Seconds to wait before retrying a failed stream open
    pub reopen_backoff_secs: Option<f64>,

    /// Seconds without audio before a read counts as stalled
    pub read_timeout_secs: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CaptureFileConfig {
    pub calibration_secs: Option<f64>,
    pub start_timeout_secs: Option<f64>,
    pub pause_threshold_secs: Option<f64>,
    pub phrase_limit_secs: Option<f64>,
    pub min_energy: Option<f32>,
    pub energy_ratio: Option<f32>,

    /// Play a tone when the wake word is heard
    pub tone: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SttFileConfig {
    /// "whisper" or "deepgram"
    pub provider: Option<String>,
    pub model: Option<String>,
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct TtsFileConfig {
    /// "openai" or "elevenlabs"
    pub provider: Option<String>,
    pub model: Option<String>,
    pub voice: Option<String>,
    pub speed: Option<f32>,
}

#[derive(Debug, Default, Deserialize)]
pub struct AgentFileConfig {
    pub model: Option<String>,
    pub base_url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct EmailFileConfig {
    pub enabled: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PlaybackFileConfig {
    /// "auto", "cpal" or "command"
    pub backend: Option<String>,
}

/// API keys configuration
#[derive(Debug, Default, Deserialize)]
pub struct ApiKeysFileConfig {
    pub openai: Option<String>,
    pub deepgram: Option<String>,
    pub elevenlabs: Option<String>,
    pub gmail: Option<String>,
}

/// Parse config file contents
///
/// # Errors
///
/// Returns error if the TOML is malformed or has wrongly typed fields
pub fn parse_config(content: &str) -> Result<HarkConfigFile> {
    Ok(toml::from_str(content)?)
}

/// Load a config file the user asked for explicitly
///
/// # Errors
///
/// Returns error if the file cannot be read or parsed
pub fn load_config_file(path: &Path) -> Result<HarkConfigFile> {
    let content = std::fs::read_to_string(path)?;
    let config = parse_config(&content)?;
    tracing::info!(path = %path.display(), "loaded config file");
    Ok(config)
}

/// Load the config file from the standard path
///
/// Returns defaults if the file doesn't exist or can't be parsed.
pub fn load_default_config_file() -> HarkConfigFile {
    let Some(path) = config_file_path() else {
        return HarkConfigFile::default();
    };

    if !path.exists() {
        return HarkConfigFile::default();
    }

    match load_config_file(&path) {
        Ok(config) => config,
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to load config file, using defaults"
            );
            HarkConfigFile::default()
        }
    }
}

/// Return the config file path: `~/.config/hark/config.toml`
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("hark").join("config.toml"))
}
