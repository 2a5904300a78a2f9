//! Wake word scanning loop
//!
//! ```text
//!              no detection
//!             ┌──────────┐
//!             ▼          │
//!  start ──▶ Scanning ───┘ ── detection ──▶ Capturing
//!             ▲   │                            │
//!      opened │   │ read fault                 │ always
//!             │   ▼                            │
//!           Reopening ◀────────────────────────┘
//!            │    ▲
//!            └────┘ open failed (backoff)
//!
//!  any state ── stop signal ──▶ ShuttingDown
//! ```
//!
//! The loop is cooperative and single-threaded: while a capture runs, no frames are
//! read or fed to the detector, so detections are never queued.

use std::fmt;
use std::rc::Rc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::Result;
use crate::audio::{AudioBackend, DeviceConfig, FrameResampler, StreamHandle};
use crate::wake::detector::{KeywordDetector, KeywordEngine, KeywordId};

/// Default wait between failed stream opens
pub const DEFAULT_REOPEN_BACKOFF: Duration = Duration::from_secs(1);

/// Runs once per wake word detection, with scanning paused
#[async_trait(?Send)]
pub trait UtteranceHandler {
    /// Handle one activation to completion
    async fn on_wake(&mut self, keyword: KeywordId, label: &str);
}

#[async_trait(?Send)]
impl<H: UtteranceHandler + ?Sized> UtteranceHandler for &mut H {
    async fn on_wake(&mut self, keyword: KeywordId, label: &str) {
        (**self).on_wake(keyword, label).await;
    }
}

/// State of the hotword loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    /// Reading frames and running detection
    Scanning,
    /// Running the capture cycle for a detected keyword
    Capturing(KeywordId),
    /// Opening a fresh scanning stream
    Reopening,
    /// Stop requested; terminal
    ShuttingDown,
}

impl fmt::Display for LoopState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scanning => f.write_str("scanning"),
            Self::Capturing(k) => write!(f, "capturing({k})"),
            Self::Reopening => f.write_str("reopening"),
            Self::ShuttingDown => f.write_str("shutting down"),
        }
    }
}

/// Counters reported when the loop stops
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoopSummary {
    /// Frames passed to the detector
    pub frames_scanned: u64,
    /// Scanning → Capturing transitions
    pub detections: u64,
    /// Completed capture cycles
    pub captures: u64,
    /// Reads that faulted
    pub read_faults: u64,
    /// Stream open attempts made from Reopening
    pub reopen_attempts: u64,
}

/// The wake word scanning state machine
pub struct HotwordLoop<B: AudioBackend, E, H> {
    backend: Rc<B>,
    device: DeviceConfig,
    detector: KeywordDetector<E>,
    resampler: FrameResampler,
    handler: H,
    backoff: Duration,
    stream: StreamHandle<B::Stream>,
    state: LoopState,
    wait_before_open: bool,
    summary: LoopSummary,
}

impl<B, E, H> HotwordLoop<B, E, H>
where
    B: AudioBackend,
    E: KeywordEngine,
    H: UtteranceHandler,
{
    /// Build a loop reading from `device` through `backend`
    ///
    /// # Errors
    ///
    /// Returns error if the frame resampler cannot be built for the device/detector rates
    pub fn new(
        backend: Rc<B>,
        device: DeviceConfig,
        detector: KeywordDetector<E>,
        handler: H,
    ) -> Result<Self> {
        let detector_config = detector.config();
        let resampler = FrameResampler::new(
            device.sample_rate,
            device.frame_length,
            detector_config.sample_rate,
            detector_config.frame_length,
        )?;

        Ok(Self {
            backend,
            device,
            detector,
            resampler,
            handler,
            backoff: DEFAULT_REOPEN_BACKOFF,
            stream: StreamHandle::closed(),
            state: LoopState::Scanning,
            wait_before_open: false,
            summary: LoopSummary::default(),
        })
    }

    /// Override the wait between failed stream opens
    #[must_use]
    pub const fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    /// Current state
    #[must_use]
    pub const fn state(&self) -> LoopState {
        self.state
    }

    /// Run until `shutdown` fires or its senders are dropped
    ///
    /// Releases the stream and the detector before returning.
    pub async fn run(mut self, shutdown: &mut mpsc::Receiver<()>) -> LoopSummary {
        self.stream = StreamHandle::open(self.backend.as_ref(), &self.device);
        self.state = if self.stream.is_open() {
            LoopState::Scanning
        } else {
            LoopState::Reopening
        };

        tracing::info!(
            device = %self.device.device_name,
            keywords = ?self.detector.config().keywords,
            "listening for wake word"
        );

        loop {
            let next = match self.state {
                LoopState::Scanning => self.scan(shutdown).await,
                LoopState::Capturing(keyword) => self.capture(keyword, shutdown).await,
                LoopState::Reopening => self.reopen(shutdown).await,
                LoopState::ShuttingDown => break,
            };
            self.transition(next);
        }

        self.shutdown();
        self.summary
    }

    async fn scan(&mut self, shutdown: &mut mpsc::Receiver<()>) -> LoopState {
        let frame_length = self.device.frame_length;
        let read = tokio::select! {
            biased;
            _ = shutdown.recv() => return LoopState::ShuttingDown,
            read = self.stream.read(frame_length) => read,
        };

        let frame = match read {
            Ok(frame) => frame,
            Err(fault) => {
                self.summary.read_faults += 1;
                tracing::warn!(%fault, "audio input fault, reopening stream");
                self.wait_before_open = true;
                return LoopState::Reopening;
            }
        };

        let samples = self.resampler.resample(frame.samples());
        self.summary.frames_scanned += 1;

        match self.detector.detect(&samples) {
            Ok(Some(keyword)) => {
                self.summary.detections += 1;
                tracing::info!(
                    keyword = self.detector.keyword_name(keyword),
                    "wake word detected"
                );
                LoopState::Capturing(keyword)
            }
            Ok(None) => LoopState::Scanning,
            Err(e) => {
                tracing::warn!(error = %e, "keyword detection failed");
                LoopState::Scanning
            }
        }
    }

    async fn capture(&mut self, keyword: KeywordId, shutdown: &mut mpsc::Receiver<()>) -> LoopState {
        // Hand the microphone over to the capture session
        self.stream.close();

        let label = self.detector.keyword_name(keyword).to_string();
        let next = tokio::select! {
            biased;
            _ = shutdown.recv() => LoopState::ShuttingDown,
            () = self.handler.on_wake(keyword, &label) => LoopState::Reopening,
        };

        if next == LoopState::Reopening {
            self.summary.captures += 1;
        }
        next
    }

    async fn reopen(&mut self, shutdown: &mut mpsc::Receiver<()>) -> LoopState {
        if std::mem::take(&mut self.wait_before_open) && self.sleep_backoff(shutdown).await {
            return LoopState::ShuttingDown;
        }

        self.summary.reopen_attempts += 1;
        if self.stream.reopen(self.backend.as_ref(), &self.device) {
            tracing::debug!(attempt = self.summary.reopen_attempts, "scanning stream open");
            return LoopState::Scanning;
        }

        tracing::warn!(
            reason = self.stream.fault_reason().unwrap_or("unknown"),
            backoff = ?self.backoff,
            "failed to reopen input stream, retrying"
        );
        if self.sleep_backoff(shutdown).await {
            return LoopState::ShuttingDown;
        }
        LoopState::Reopening
    }

    /// Sleep for the backoff; returns true if shutdown fired first
    async fn sleep_backoff(&self, shutdown: &mut mpsc::Receiver<()>) -> bool {
        tokio::select! {
            biased;
            _ = shutdown.recv() => true,
            () = tokio::time::sleep(self.backoff) => false,
        }
    }

    fn transition(&mut self, next: LoopState) {
        if next != self.state {
            tracing::debug!(from = %self.state, to = %next, "hotword loop transition");
        }
        self.state = next;
    }

    fn shutdown(&mut self) {
        self.state = LoopState::ShuttingDown;
        self.stream.close();
        self.detector.release();
        tracing::info!(
            frames = self.summary.frames_scanned,
            detections = self.summary.detections,
            "hotword loop stopped"
        );
    }
}
