//! Hark - voice-activated personal assistant
//!
//! Listens for a wake word, captures one utterance, transcribes it, asks a
//! language-model agent, and speaks the answer.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                   Hotword Loop                       │
//! │  StreamHandle ─▶ FrameResampler ─▶ KeywordDetector  │
//! └────────────────────┬────────────────────────────────┘
//!                      │ detection
//! ┌────────────────────▼────────────────────────────────┐
//! │                  Capture Cycle                       │
//! │  listen ─▶ Transcriber ─▶ Agent ─▶ Synthesizer ─▶ 🔊 │
//! └─────────────────────────────────────────────────────┘
//! ```

pub mod agent;
pub mod assistant;
pub mod audio;
pub mod capture;
pub mod config;
pub mod error;
pub mod speech;
pub mod wake;

pub use agent::{Agent, AgentResponse};
pub use audio::{AudioFrame, DeviceConfig, FrameResampler, StreamHandle};
pub use capture::{CaptureCycle, CaptureOutcome, CaptureReport};
pub use config::Config;
pub use error::{Error, Result};
pub use wake::{HotwordLoop, KeywordDetector, LoopState, LoopSummary};
