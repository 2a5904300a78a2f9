//! Configuration management for Hark
//!
//! Values are layered env > TOML file > defaults.

pub mod file;

use std::path::{Path, PathBuf};
use std::time::Duration;

use secrecy::SecretString;

use crate::audio::{DevicePreference, PlaybackKind};
use crate::capture::ListenSettings;
use crate::speech::{DEFAULT_STT_TIMEOUT, SttProvider, TtsProvider};
use crate::wake::DEFAULT_REOPEN_BACKOFF;
use crate::{Error, Result};

pub use file::{HarkConfigFile, config_file_path};

/// Hark configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Wake word engine
    pub detector: DetectorSettings,

    /// Input device and stream recovery
    pub audio: AudioSettings,

    /// Utterance capture
    pub capture: CaptureSettings,

    /// Speech-to-text
    pub stt: SttSettings,

    /// Text-to-speech
    pub tts: TtsSettings,

    /// Language-model agent
    pub agent: AgentSettings,

    /// Gmail tools
    pub email: EmailSettings,

    /// Audio output implementation
    pub playback: PlaybackKind,
}

/// Wake word engine configuration
#[derive(Debug, Clone, Default)]
pub struct DetectorSettings {
    /// Picovoice access key
    pub access_key: Option<SecretString>,

    /// Keyword model files, one per keyword
    pub keyword_paths: Vec<PathBuf>,

    /// Per-keyword sensitivities; empty means engine defaults
    pub sensitivities: Vec<f32>,

    /// Custom engine model file
    pub model_path: Option<PathBuf>,
}

/// Input device configuration
#[derive(Debug, Clone)]
pub struct AudioSettings {
    /// Which device to capture from
    pub input_device: DevicePreference,

    /// Open the device at the detector's rate when it supports it
    pub prefer_detector_rate: bool,

    /// Wait between failed stream opens
    pub reopen_backoff: Duration,

    /// Silence from the device longer than this is a stall
    pub read_timeout: Duration,
}

impl Default for AudioSettings {
    fn default() -> Self {
        Self {
            input_device: DevicePreference::FirstInput,
            prefer_detector_rate: true,
            reopen_backoff: DEFAULT_REOPEN_BACKOFF,
            read_timeout: Duration::from_secs(2),
        }
    }
}

/// Utterance capture configuration
#[derive(Debug, Clone)]
pub struct CaptureSettings {
    /// Listener tunables
    pub listen: ListenSettings,

    /// Play the notification tone on detection
    pub tone: bool,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            listen: ListenSettings::default(),
            tone: true,
        }
    }
}

/// Speech-to-text configuration
#[derive(Debug, Clone)]
pub struct SttSettings {
    pub provider: SttProvider,
    pub model: String,
    pub api_key: Option<SecretString>,
    pub timeout: Duration,
}

/// Text-to-speech configuration
#[derive(Debug, Clone)]
pub struct TtsSettings {
    pub provider: TtsProvider,
    pub model: String,
    pub voice: String,
    pub speed: f32,
    pub api_key: Option<SecretString>,
}

/// Agent configuration
#[derive(Debug, Clone)]
pub struct AgentSettings {
    pub model: String,
    pub base_url: Option<String>,
    pub api_key: Option<SecretString>,
}

/// Gmail tools configuration
#[derive(Debug, Clone, Default)]
pub struct EmailSettings {
    /// Offer email tools to the agent
    pub enabled: bool,

    /// OAuth access token with the `gmail.modify` scope
    pub access_token: Option<SecretString>,
}

impl Config {
    /// Load configuration from the environment and a config file
    ///
    /// With `path`, that file must exist and parse. Without it, the standard path is
    /// used when present.
    ///
    /// # Errors
    ///
    /// Returns error if an explicit config file cannot be loaded or a value is invalid
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = match path {
            Some(path) => file::load_config_file(path)?,
            None => file::load_default_config_file(),
        };
        Self::from_sources(file, |key| std::env::var(key).ok())
    }

    /// Build configuration from a parsed file and an environment lookup
    ///
    /// # Errors
    ///
    /// Returns error if a provider name, device, or number is invalid
    pub fn from_sources<F>(file: HarkConfigFile, env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |keys: &[&str]| {
            keys.iter()
                .find_map(|key| env(key).filter(|v| !v.trim().is_empty()))
        };
        let secret = |keys: &[&str], file_value: Option<String>| {
            var(keys)
                .or(file_value)
                .filter(|v| !v.is_empty())
                .map(SecretString::from)
        };

        let keys = file.api_keys;

        let detector = DetectorSettings {
            access_key: secret(
                &["PICOVOICE_ACCESS_KEY", "ACCESS_KEY"],
                file.detector.access_key,
            ),
            keyword_paths: var(&["HARK_KEYWORD_PATHS", "KEYWORD_PATH"])
                .map(|v| split_list(&v).map(PathBuf::from).collect())
                .or(file.detector.keyword_paths)
                .unwrap_or_default(),
            sensitivities: file.detector.sensitivities.unwrap_or_default(),
            model_path: file.detector.model_path,
        };

        let audio_defaults = AudioSettings::default();
        let audio = AudioSettings {
            input_device: var(&["HARK_INPUT_DEVICE"])
                .or(file.audio.input_device)
                .map_or(DevicePreference::FirstInput, |v| DevicePreference::parse(&v)),
            prefer_detector_rate: file
                .audio
                .prefer_detector_rate
                .unwrap_or(audio_defaults.prefer_detector_rate),
            reopen_backoff: seconds(file.audio.reopen_backoff_secs, "reopen_backoff_secs")?
                .unwrap_or(audio_defaults.reopen_backoff),
            read_timeout: seconds(file.audio.read_timeout_secs, "read_timeout_secs")?
                .unwrap_or(audio_defaults.read_timeout),
        };

        let listen_defaults = ListenSettings::default();
        let capture = CaptureSettings {
            listen: ListenSettings {
                calibration: seconds(file.capture.calibration_secs, "calibration_secs")?
                    .unwrap_or(listen_defaults.calibration),
                start_timeout: seconds(file.capture.start_timeout_secs, "start_timeout_secs")?
                    .unwrap_or(listen_defaults.start_timeout),
                pause_threshold: seconds(
                    file.capture.pause_threshold_secs,
                    "pause_threshold_secs",
                )?
                .unwrap_or(listen_defaults.pause_threshold),
                phrase_limit: seconds(file.capture.phrase_limit_secs, "phrase_limit_secs")?,
                min_energy: file.capture.min_energy.unwrap_or(listen_defaults.min_energy),
                energy_ratio: file
                    .capture
                    .energy_ratio
                    .unwrap_or(listen_defaults.energy_ratio),
                ..listen_defaults
            },
            tone: file.capture.tone.unwrap_or(true),
        };

        let stt_provider: SttProvider = var(&["HARK_STT_PROVIDER"])
            .or(file.stt.provider)
            .as_deref()
            .unwrap_or("whisper")
            .parse()?;
        let stt = SttSettings {
            provider: stt_provider,
            model: file.stt.model.unwrap_or_else(|| match stt_provider {
                SttProvider::Whisper => "whisper-1".to_string(),
                SttProvider::Deepgram => "nova-2".to_string(),
            }),
            api_key: match stt_provider {
                SttProvider::Whisper => secret(&["OPENAI_API_KEY"], keys.openai.clone()),
                SttProvider::Deepgram => secret(&["DEEPGRAM_API_KEY"], keys.deepgram),
            },
            timeout: file
                .stt
                .timeout_secs
                .map_or(DEFAULT_STT_TIMEOUT, Duration::from_secs),
        };

        let tts_provider: TtsProvider = var(&["HARK_TTS_PROVIDER"])
            .or(file.tts.provider)
            .as_deref()
            .unwrap_or("openai")
            .parse()?;
        let tts = TtsSettings {
            provider: tts_provider,
            model: file.tts.model.unwrap_or_else(|| match tts_provider {
                TtsProvider::OpenAI => "tts-1".to_string(),
                TtsProvider::ElevenLabs => "eleven_monolingual_v1".to_string(),
            }),
            voice: file.tts.voice.unwrap_or_else(|| match tts_provider {
                TtsProvider::OpenAI => "alloy".to_string(),
                TtsProvider::ElevenLabs => "21m00Tcm4TlvDq8ikWAM".to_string(),
            }),
            speed: file.tts.speed.unwrap_or(1.0),
            api_key: match tts_provider {
                TtsProvider::OpenAI => secret(&["OPENAI_API_KEY"], keys.openai.clone()),
                TtsProvider::ElevenLabs => secret(&["ELEVENLABS_API_KEY"], keys.elevenlabs),
            },
        };

        let agent = AgentSettings {
            model: var(&["HARK_AGENT_MODEL"])
                .or(file.agent.model)
                .unwrap_or_else(|| crate::agent::DEFAULT_AGENT_MODEL.to_string()),
            base_url: file.agent.base_url,
            api_key: secret(&["OPENAI_API_KEY"], keys.openai),
        };

        let access_token = secret(&["GMAIL_ACCESS_TOKEN"], keys.gmail);
        let email = EmailSettings {
            enabled: file.email.enabled.unwrap_or(access_token.is_some()),
            access_token,
        };

        let playback: PlaybackKind = var(&["HARK_PLAYBACK"])
            .or(file.playback.backend)
            .as_deref()
            .unwrap_or("auto")
            .parse()?;

        Ok(Self {
            detector,
            audio,
            capture,
            stt,
            tts,
            agent,
            email,
            playback,
        })
    }
}

fn split_list(value: &str) -> impl Iterator<Item = &str> {
    value.split(',').map(str::trim).filter(|s| !s.is_empty())
}

fn seconds(value: Option<f64>, field: &str) -> Result<Option<Duration>> {
    value
        .map(|secs| {
            Duration::try_from_secs_f64(secs)
                .map_err(|e| Error::Config(format!("invalid {field} ({secs}): {e}")))
        })
        .transpose()
}
