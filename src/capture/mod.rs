//! Capture cycle
//!
//! Runs once per wake word detection: opens its own short-lived microphone session,
//! records one utterance, transcribes it, asks the agent, and speaks the answer. A
//! response that asks for more input gets exactly one follow-up turn.

mod listener;

use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

use async_trait::async_trait;

use crate::agent::Agent;
use crate::audio::{AudioBackend, DeviceConfig, NotificationTone, PlaybackPort, StreamHandle};
use crate::speech::{SpeechSynthesizer, TranscribeError, Transcriber};
use crate::wake::{KeywordId, UtteranceHandler};

pub use listener::{ListenError, ListenSettings, RecorderState, UtteranceRecorder, listen};

/// Turns per activation: the first plus at most one follow-up
pub const MAX_TURNS: usize = 2;

/// How one turn of a capture cycle ended
#[derive(Debug, Clone, PartialEq)]
pub enum CaptureOutcome {
    /// The capture session could not be opened or faulted mid-listen
    SessionFailed(String),
    /// Nobody spoke before the start timeout
    NoSpeech,
    /// Transcription produced no text
    TranscriptionFailed(TranscribeError),
    /// The agent call failed
    AgentFailed(String),
    /// The agent answered
    Answered {
        /// What the user said
        transcript: String,
        /// The agent's answer text
        answer: String,
        /// Whether the answer reached the speaker
        spoken: bool,
        /// Whether the agent asked for more input
        requires_followup: bool,
    },
}

impl CaptureOutcome {
    /// Whether this turn asks for another
    #[must_use]
    pub const fn wants_followup(&self) -> bool {
        matches!(
            self,
            Self::Answered {
                requires_followup: true,
                ..
            }
        )
    }
}

impl fmt::Display for CaptureOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SessionFailed(reason) => write!(f, "session failed: {reason}"),
            Self::NoSpeech => f.write_str("no speech"),
            Self::TranscriptionFailed(e) => write!(f, "transcription failed: {e}"),
            Self::AgentFailed(e) => write!(f, "agent failed: {e}"),
            Self::Answered { answer, .. } => write!(f, "answered: {answer}"),
        }
    }
}

/// Result of one capture cycle
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureReport {
    /// Keyword that started the cycle
    pub keyword: KeywordId,
    /// Outcome of each turn, in order
    pub turns: Vec<CaptureOutcome>,
}

/// Everything a capture cycle talks to
pub struct CaptureCycle<B> {
    backend: Rc<B>,
    device: DeviceConfig,
    settings: ListenSettings,
    transcriber: Arc<dyn Transcriber>,
    agent: Arc<dyn Agent>,
    synthesizer: Arc<dyn SpeechSynthesizer>,
    playback: Box<dyn PlaybackPort>,
    tone: Option<NotificationTone>,
    reports: Vec<CaptureReport>,
}

impl<B: AudioBackend> CaptureCycle<B> {
    /// Build a cycle recording from `device`
    #[must_use]
    pub fn new(
        backend: Rc<B>,
        device: DeviceConfig,
        transcriber: Arc<dyn Transcriber>,
        agent: Arc<dyn Agent>,
        synthesizer: Arc<dyn SpeechSynthesizer>,
        playback: Box<dyn PlaybackPort>,
    ) -> Self {
        Self {
            backend,
            device,
            settings: ListenSettings::default(),
            transcriber,
            agent,
            synthesizer,
            playback,
            tone: Some(NotificationTone::default()),
            reports: Vec::new(),
        }
    }

    /// Override listen tunables
    #[must_use]
    pub fn with_settings(mut self, settings: ListenSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Set or disable the detection tone
    #[must_use]
    pub fn with_tone(mut self, tone: Option<NotificationTone>) -> Self {
        self.tone = tone;
        self
    }

    /// Reports of completed cycles, oldest first
    #[must_use]
    pub fn reports(&self) -> &[CaptureReport] {
        &self.reports
    }

    /// Run one cycle to completion
    ///
    /// Never fails: every fault ends the current turn and is recorded in the report.
    pub async fn run(&mut self, keyword: KeywordId) -> CaptureReport {
        self.notify().await;

        let mut turns = Vec::with_capacity(MAX_TURNS);
        while turns.len() < MAX_TURNS {
            let outcome = self.turn().await;
            tracing::info!(turn = turns.len() + 1, %outcome, "capture turn finished");
            let again = outcome.wants_followup();
            turns.push(outcome);
            if !again {
                break;
            }
        }

        CaptureReport { keyword, turns }
    }

    async fn notify(&mut self) {
        let Some(tone) = &self.tone else {
            return;
        };
        let samples = tone.render();
        if let Err(e) = self.playback.play_pcm(&samples, tone.sample_rate).await {
            tracing::warn!(error = %e, "failed to play notification tone");
        }
    }

    async fn turn(&mut self) -> CaptureOutcome {
        let mut session = StreamHandle::open(self.backend.as_ref(), &self.device);
        if !session.is_open() {
            let reason = session.fault_reason().unwrap_or("unknown").to_string();
            tracing::warn!(%reason, "capture session unavailable");
            return CaptureOutcome::SessionFailed(reason);
        }

        tracing::info!("listening");
        let heard = listen(&mut session, &self.settings).await;
        session.close();

        let utterance = match heard {
            Ok(utterance) => utterance,
            Err(ListenError::NoSpeech) => {
                tracing::info!("no speech detected");
                return CaptureOutcome::NoSpeech;
            }
            Err(ListenError::Fault(fault)) => {
                tracing::warn!(%fault, "capture session faulted");
                return CaptureOutcome::SessionFailed(fault.to_string());
            }
        };

        let transcript = match self.transcriber.transcribe(&utterance).await {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(error = %e, "transcription failed");
                return CaptureOutcome::TranscriptionFailed(e);
            }
        };
        tracing::info!(%transcript, "heard");

        let response = match self.agent.respond(&transcript).await {
            Ok(response) => response,
            Err(e) => {
                tracing::error!(error = %e, "agent failed");
                return CaptureOutcome::AgentFailed(e.to_string());
            }
        };
        tracing::info!(
            answer = %response.answer,
            confidence = response.confidence,
            source = response.source.as_deref().unwrap_or("-"),
            "agent responded"
        );

        let spoken = self.speak(&response.answer).await;

        CaptureOutcome::Answered {
            transcript,
            answer: response.answer,
            spoken,
            requires_followup: response.requires_followup,
        }
    }

    async fn speak(&mut self, text: &str) -> bool {
        if text.trim().is_empty() {
            return false;
        }

        let audio = match self.synthesizer.synthesize(text).await {
            Ok(audio) => audio,
            Err(e) => {
                tracing::warn!(error = %e, "speech synthesis failed");
                return false;
            }
        };

        match self.playback.play_speech(&audio).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(player = self.playback.name(), error = %e, "playback failed");
                false
            }
        }
    }
}

#[async_trait(?Send)]
impl<B: AudioBackend> UtteranceHandler for CaptureCycle<B> {
    async fn on_wake(&mut self, keyword: KeywordId, label: &str) {
        tracing::debug!(%keyword, label, "starting capture cycle");
        let report = self.run(keyword).await;
        self.reports.push(report);
    }
}
