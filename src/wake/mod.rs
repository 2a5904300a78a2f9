//! Wake word detection
//!
//! A frame-synchronous keyword engine behind [`KeywordDetector`], driven by the
//! [`HotwordLoop`] state machine.

mod detector;
mod hotword;
#[cfg(feature = "porcupine")]
mod porcupine;

pub use detector::{DetectorConfig, KeywordDetector, KeywordEngine, KeywordId, keyword_label};
pub use hotword::{DEFAULT_REOPEN_BACKOFF, HotwordLoop, LoopState, LoopSummary, UtteranceHandler};
#[cfg(feature = "porcupine")]
pub use porcupine::PorcupineEngine;
