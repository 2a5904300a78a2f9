//! Speech services
//!
//! Transcription of captured utterances and synthesis of spoken answers.

mod stt;
mod tts;

pub use stt::{DEFAULT_STT_TIMEOUT, SpeechToText, SttProvider, TranscribeError, Transcriber};
pub use tts::{AudioFormat, SpeechAudio, SpeechSynthesizer, TextToSpeech, TtsProvider};
