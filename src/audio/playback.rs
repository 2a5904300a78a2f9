//! Audio playback to speakers
//!
//! One [`PlaybackPort`] is chosen at startup and used for every clip. `CpalPlayback`
//! drives the default output device directly; `CommandPlayback` hands a WAV file to the
//! platform's player when no cpal output is usable.

use std::io::{Cursor, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, StreamConfig};

use crate::audio::frame::{f32_to_i16, samples_to_wav};
use crate::audio::resample::resample_buffer;
use crate::speech::{AudioFormat, SpeechAudio};
use crate::{Error, Result};

/// Sample rate for playback (matches common TTS output)
const PLAYBACK_SAMPLE_RATE: u32 = 24000;

/// Plays synthesized speech and short PCM clips
#[async_trait(?Send)]
pub trait PlaybackPort {
    /// Implementation name for logs
    fn name(&self) -> &'static str;

    /// Play an encoded speech clip to completion
    ///
    /// # Errors
    ///
    /// Returns error if decoding or playback fails
    async fn play_speech(&mut self, audio: &SpeechAudio) -> Result<()>;

    /// Play raw mono samples to completion
    ///
    /// # Errors
    ///
    /// Returns error if playback fails
    async fn play_pcm(&mut self, samples: &[f32], sample_rate: u32) -> Result<()>;
}

/// Which playback implementation to use
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PlaybackKind {
    /// cpal if an output device is available, otherwise a platform command
    #[default]
    Auto,
    /// cpal default output device
    Cpal,
    /// Platform player command (afplay, paplay, aplay)
    Command,
}

impl std::str::FromStr for PlaybackKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "" | "auto" => Ok(Self::Auto),
            "cpal" => Ok(Self::Cpal),
            "command" => Ok(Self::Command),
            other => Err(Error::Config(format!("unknown playback backend: {other}"))),
        }
    }
}

/// Pick the playback implementation once at startup
///
/// # Errors
///
/// Returns error if the requested implementation is unavailable
pub fn select_playback(kind: PlaybackKind) -> Result<Box<dyn PlaybackPort>> {
    let port: Box<dyn PlaybackPort> = match kind {
        PlaybackKind::Cpal => Box::new(CpalPlayback::new()?),
        PlaybackKind::Command => Box::new(CommandPlayback::detect()?),
        PlaybackKind::Auto => match CpalPlayback::new() {
            Ok(playback) => Box::new(playback),
            Err(e) => {
                tracing::warn!(error = %e, "cpal output unavailable, trying player command");
                Box::new(CommandPlayback::detect()?)
            }
        },
    };

    tracing::info!(backend = port.name(), "playback selected");
    Ok(port)
}

/// Decode a speech clip to mono f32 samples and its sample rate
///
/// # Errors
///
/// Returns error if the clip cannot be decoded
pub fn decode_speech(audio: &SpeechAudio) -> Result<(Vec<f32>, u32)> {
    match audio.format {
        AudioFormat::Mp3 => decode_mp3(&audio.data),
        AudioFormat::Wav => decode_wav(&audio.data),
    }
}

/// Plays audio to the default output device
pub struct CpalPlayback {
    config: StreamConfig,
}

impl CpalPlayback {
    /// Create a new audio playback instance
    ///
    /// # Errors
    ///
    /// Returns error if audio device cannot be opened
    pub fn new() -> Result<Self> {
        let host = cpal::default_host();

        let device = host
            .default_output_device()
            .ok_or_else(|| Error::Playback("no output device available".to_string()))?;

        let supported_config = device
            .supported_output_configs()
            .map_err(|e| Error::Playback(e.to_string()))?
            .find(|c| {
                c.channels() == 1
                    && c.min_sample_rate() <= SampleRate(PLAYBACK_SAMPLE_RATE)
                    && c.max_sample_rate() >= SampleRate(PLAYBACK_SAMPLE_RATE)
            })
            .or_else(|| {
                // Fallback: try stereo
                device.supported_output_configs().ok()?.find(|c| {
                    c.channels() == 2
                        && c.min_sample_rate() <= SampleRate(PLAYBACK_SAMPLE_RATE)
                        && c.max_sample_rate() >= SampleRate(PLAYBACK_SAMPLE_RATE)
                })
            })
            .ok_or_else(|| Error::Playback("no suitable output config found".to_string()))?;

        let config = supported_config
            .with_sample_rate(SampleRate(PLAYBACK_SAMPLE_RATE))
            .config();

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            sample_rate = PLAYBACK_SAMPLE_RATE,
            channels = config.channels,
            "audio playback initialized"
        );

        Ok(Self { config })
    }

    /// Play samples already at the output rate
    async fn play_samples(&self, samples: Vec<f32>) -> Result<()> {
        if samples.is_empty() {
            return Ok(());
        }

        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| Error::Playback("no output device".to_string()))?;

        let channels = usize::from(self.config.channels.max(1));
        let sample_count = samples.len();
        let samples = Arc::new(samples);
        let position = Arc::new(AtomicUsize::new(0));
        let finished = Arc::new(AtomicBool::new(false));

        let stream = {
            let samples = Arc::clone(&samples);
            let position = Arc::clone(&position);
            let finished = Arc::clone(&finished);
            device
                .build_output_stream(
                    &self.config,
                    move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                        for frame in data.chunks_mut(channels) {
                            let pos = position.load(Ordering::Relaxed);
                            let sample = samples.get(pos).copied().unwrap_or_else(|| {
                                finished.store(true, Ordering::Relaxed);
                                0.0
                            });
                            frame.fill(sample);
                            if pos < samples.len() {
                                position.store(pos + 1, Ordering::Relaxed);
                            }
                        }
                    },
                    |err| {
                        tracing::error!(error = %err, "audio playback error");
                    },
                    None,
                )
                .map_err(|e| Error::Playback(e.to_string()))?
        };

        stream.play().map_err(|e| Error::Playback(e.to_string()))?;

        let duration_ms = (sample_count as u64 * 1000) / u64::from(PLAYBACK_SAMPLE_RATE);
        let start = Instant::now();
        let timeout = Duration::from_millis(duration_ms + 500);

        while !finished.load(Ordering::Relaxed) {
            if start.elapsed() > timeout {
                tracing::warn!("playback did not finish in time");
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        // Let the device drain its last buffer
        tokio::time::sleep(Duration::from_millis(100)).await;

        drop(stream);
        tracing::debug!(samples = sample_count, "playback complete");

        Ok(())
    }
}

#[async_trait(?Send)]
impl PlaybackPort for CpalPlayback {
    fn name(&self) -> &'static str {
        "cpal"
    }

    async fn play_speech(&mut self, audio: &SpeechAudio) -> Result<()> {
        let (samples, rate) = decode_speech(audio)?;
        self.play_pcm(&samples, rate).await
    }

    async fn play_pcm(&mut self, samples: &[f32], sample_rate: u32) -> Result<()> {
        let samples = resample_buffer(samples, sample_rate, PLAYBACK_SAMPLE_RATE)?;
        self.play_samples(samples).await
    }
}

/// Plays audio through a platform command-line player
pub struct CommandPlayback {
    program: PathBuf,
}

impl CommandPlayback {
    /// Candidate players in preference order for this platform
    #[must_use]
    pub const fn candidates() -> &'static [&'static str] {
        if cfg!(target_os = "macos") {
            &["afplay"]
        } else if cfg!(target_os = "windows") {
            &[]
        } else {
            &["paplay", "aplay", "pw-play"]
        }
    }

    /// Find the first available player on `PATH`
    ///
    /// # Errors
    ///
    /// Returns error if no supported player is installed
    pub fn detect() -> Result<Self> {
        Self::candidates()
            .iter()
            .find_map(|name| which::which(name).ok())
            .map(|program| {
                tracing::debug!(program = %program.display(), "found player command");
                Self { program }
            })
            .ok_or_else(|| Error::Playback("no audio player command found".to_string()))
    }

    /// Use a specific player binary
    #[must_use]
    pub const fn with_program(program: PathBuf) -> Self {
        Self { program }
    }

    async fn play_wav(&self, wav: &[u8]) -> Result<()> {
        let mut file = tempfile::Builder::new()
            .prefix("hark-")
            .suffix(".wav")
            .tempfile()?;
        file.write_all(wav)?;
        file.flush()?;

        let status = tokio::process::Command::new(&self.program)
            .arg(file.path())
            .status()
            .await?;

        if !status.success() {
            return Err(Error::Playback(format!(
                "{} exited with {status}",
                self.program.display()
            )));
        }
        Ok(())
    }
}

#[async_trait(?Send)]
impl PlaybackPort for CommandPlayback {
    fn name(&self) -> &'static str {
        "command"
    }

    async fn play_speech(&mut self, audio: &SpeechAudio) -> Result<()> {
        match audio.format {
            AudioFormat::Wav => self.play_wav(&audio.data).await,
            AudioFormat::Mp3 => {
                let (samples, rate) = decode_mp3(&audio.data)?;
                self.play_pcm(&samples, rate).await
            }
        }
    }

    async fn play_pcm(&mut self, samples: &[f32], sample_rate: u32) -> Result<()> {
        let pcm: Vec<i16> = samples.iter().map(|&s| f32_to_i16(s)).collect();
        let wav = samples_to_wav(&pcm, sample_rate)?;
        self.play_wav(&wav).await
    }
}

/// Decode MP3 bytes to mono f32 samples
fn decode_mp3(mp3_data: &[u8]) -> Result<(Vec<f32>, u32)> {
    let mut decoder = minimp3::Decoder::new(Cursor::new(mp3_data));
    let mut samples = Vec::new();
    let mut sample_rate = PLAYBACK_SAMPLE_RATE;

    loop {
        match decoder.next_frame() {
            Ok(frame) => {
                if let Ok(rate) = u32::try_from(frame.sample_rate) {
                    sample_rate = rate;
                }
                let channels = frame.channels.max(1);
                // Average channels down to mono
                #[allow(clippy::cast_precision_loss)]
                samples.extend(frame.data.chunks(channels).map(|chunk| {
                    chunk.iter().map(|&s| f32::from(s) / 32768.0).sum::<f32>() / chunk.len() as f32
                }));
            }
            Err(minimp3::Error::Eof) => break,
            Err(e) => return Err(Error::Playback(format!("MP3 decode error: {e}"))),
        }
    }

    Ok((samples, sample_rate))
}

/// Decode WAV bytes to mono f32 samples
fn decode_wav(wav_data: &[u8]) -> Result<(Vec<f32>, u32)> {
    let mut reader = hound::WavReader::new(Cursor::new(wav_data))?;
    let spec = reader.spec();
    let channels = usize::from(spec.channels.max(1));

    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Int => reader
            .samples::<i16>()
            .map(|s| s.map(|v| f32::from(v) / 32768.0))
            .collect::<std::result::Result<_, _>>()?,
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<std::result::Result<_, _>>()?,
    };

    #[allow(clippy::cast_precision_loss)]
    let mono = interleaved
        .chunks(channels)
        .map(|chunk| chunk.iter().sum::<f32>() / chunk.len() as f32)
        .collect();

    Ok((mono, spec.sample_rate))
}
