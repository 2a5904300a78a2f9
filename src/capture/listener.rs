//! Energy-based utterance listener
//!
//! Calibrates against ambient noise, waits for speech, and records until a pause.
//! All timing is counted in samples, so the listener runs the same under a paused clock.

use std::collections::VecDeque;
use std::time::Duration;

use crate::audio::{AudioFrame, InputStream, StreamFault, StreamHandle, rms_energy};

/// Tunables for one listen
#[derive(Debug, Clone, PartialEq)]
pub struct ListenSettings {
    /// Ambient noise sampling before listening
    pub calibration: Duration,
    /// How long to wait for speech to start
    pub start_timeout: Duration,
    /// Silence that ends an utterance
    pub pause_threshold: Duration,
    /// Hard cap on utterance length
    pub phrase_limit: Option<Duration>,
    /// Size of each read
    pub chunk: Duration,
    /// Lowest speech threshold regardless of ambient level
    pub min_energy: f32,
    /// Threshold multiple over the ambient level
    pub energy_ratio: f32,
    /// Audio kept from before speech onset
    pub pre_roll: Duration,
}

impl Default for ListenSettings {
    fn default() -> Self {
        Self {
            calibration: Duration::from_millis(500),
            start_timeout: Duration::from_secs(5),
            pause_threshold: Duration::from_millis(800),
            phrase_limit: None,
            chunk: Duration::from_millis(30),
            min_energy: 0.01,
            energy_ratio: 1.5,
            pre_roll: Duration::from_millis(300),
        }
    }
}

impl ListenSettings {
    /// Speech threshold for a measured ambient level
    #[must_use]
    pub fn threshold(&self, ambient: f32) -> f32 {
        (ambient * self.energy_ratio).max(self.min_energy)
    }
}

/// Why a listen produced no audio
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ListenError {
    /// The capture stream failed
    #[error("capture stream fault: {0}")]
    Fault(#[from] StreamFault),

    /// Nobody spoke before the start timeout
    #[error("no speech before timeout")]
    NoSpeech,
}

/// Progress of an [`UtteranceRecorder`] after one chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecorderState {
    /// Still waiting for speech onset
    Waiting,
    /// Speech in progress
    Recording,
    /// Utterance ended by a pause or the phrase limit
    Complete,
    /// Start timeout elapsed without speech
    TimedOut,
}

/// Convert a duration to a sample count at `rate`
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
fn samples_for(duration: Duration, rate: u32) -> usize {
    (duration.as_secs_f64() * f64::from(rate)).round() as usize
}

/// Chunk-fed recorder deciding where an utterance starts and ends
pub struct UtteranceRecorder {
    sample_rate: u32,
    threshold: f32,
    start_timeout: usize,
    pause: usize,
    phrase_limit: Option<usize>,
    pre_roll: usize,
    ring: VecDeque<i16>,
    recorded: Vec<i16>,
    waited: usize,
    silence: usize,
    state: RecorderState,
}

impl UtteranceRecorder {
    /// Recorder for audio at `sample_rate` with a fixed speech `threshold`
    #[must_use]
    pub fn new(settings: &ListenSettings, sample_rate: u32, threshold: f32) -> Self {
        Self {
            sample_rate,
            threshold,
            start_timeout: samples_for(settings.start_timeout, sample_rate),
            pause: samples_for(settings.pause_threshold, sample_rate),
            phrase_limit: settings
                .phrase_limit
                .map(|limit| samples_for(limit, sample_rate)),
            pre_roll: samples_for(settings.pre_roll, sample_rate),
            ring: VecDeque::new(),
            recorded: Vec::new(),
            waited: 0,
            silence: 0,
            state: RecorderState::Waiting,
        }
    }

    /// Feed one chunk
    pub fn push(&mut self, chunk: &[i16]) -> RecorderState {
        let loud = rms_energy(chunk) > self.threshold;

        match self.state {
            RecorderState::Waiting => {
                if loud {
                    self.recorded.extend(self.ring.drain(..));
                    self.recorded.extend_from_slice(chunk);
                    self.state = RecorderState::Recording;
                    self.check_limit();
                } else {
                    self.ring.extend(chunk.iter().copied());
                    let excess = self.ring.len().saturating_sub(self.pre_roll);
                    self.ring.drain(..excess);

                    self.waited += chunk.len();
                    if self.waited >= self.start_timeout {
                        self.state = RecorderState::TimedOut;
                    }
                }
            }
            RecorderState::Recording => {
                self.recorded.extend_from_slice(chunk);
                if loud {
                    self.silence = 0;
                } else {
                    self.silence += chunk.len();
                }
                if self.silence >= self.pause {
                    self.state = RecorderState::Complete;
                } else {
                    self.check_limit();
                }
            }
            RecorderState::Complete | RecorderState::TimedOut => {}
        }

        self.state
    }

    fn check_limit(&mut self) {
        if self
            .phrase_limit
            .is_some_and(|limit| self.recorded.len() >= limit)
        {
            self.state = RecorderState::Complete;
        }
    }

    /// Current progress
    #[must_use]
    pub const fn state(&self) -> RecorderState {
        self.state
    }

    /// The recorded utterance, pre-roll included
    #[must_use]
    pub fn finish(self) -> AudioFrame {
        AudioFrame::new(self.recorded, self.sample_rate)
    }
}

/// Measure ambient level, then record one utterance from `stream`
///
/// # Errors
///
/// Returns [`ListenError::Fault`] if a read fails, [`ListenError::NoSpeech`] if the start
/// timeout passes in silence
pub async fn listen<S: InputStream>(
    stream: &mut StreamHandle<S>,
    settings: &ListenSettings,
) -> Result<AudioFrame, ListenError> {
    let rate = stream.sample_rate();
    let chunk_len = samples_for(settings.chunk, rate).max(1);

    let ambient = calibrate(stream, settings, chunk_len).await?;
    let threshold = settings.threshold(ambient);
    tracing::debug!(ambient, threshold, "ambient noise calibrated");

    let mut recorder = UtteranceRecorder::new(settings, rate, threshold);
    loop {
        let chunk = stream.read(chunk_len).await?;
        match recorder.push(chunk.samples()) {
            RecorderState::Waiting | RecorderState::Recording => {}
            RecorderState::Complete => break,
            RecorderState::TimedOut => return Err(ListenError::NoSpeech),
        }
    }

    let utterance = recorder.finish();
    tracing::debug!(
        seconds = utterance.duration_secs(),
        "utterance recorded"
    );
    Ok(utterance)
}

/// RMS over the calibration window
#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
async fn calibrate<S: InputStream>(
    stream: &mut StreamHandle<S>,
    settings: &ListenSettings,
    chunk_len: usize,
) -> Result<f32, ListenError> {
    let total = samples_for(settings.calibration, stream.sample_rate());
    if total == 0 {
        return Ok(0.0);
    }

    let mut sum_squares = 0.0f64;
    let mut count = 0usize;
    while count < total {
        let chunk = stream.read(chunk_len.min(total - count)).await?;
        let energy = f64::from(chunk.energy());
        sum_squares += energy * energy * chunk.len() as f64;
        count += chunk.len();
    }

    let ambient = (sum_squares / count as f64).sqrt() as f32;
    Ok(ambient)
}
