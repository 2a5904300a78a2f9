//! Keyword detector adapter
//!
//! Wraps a frame-synchronous wake word engine. The engine keeps streaming state between
//! calls, so every frame must be exactly the engine's frame length.

use std::fmt;
use std::path::Path;

use crate::{Error, Result};

/// Fixed input contract of a keyword engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectorConfig {
    /// Required sample rate (`R_d`)
    pub sample_rate: u32,

    /// Samples per detection call (`N_d`)
    pub frame_length: usize,

    /// Keyword labels, indexed by [`KeywordId`]
    pub keywords: Vec<String>,
}

impl DetectorConfig {
    /// Create a detector configuration
    #[must_use]
    pub const fn new(sample_rate: u32, frame_length: usize, keywords: Vec<String>) -> Self {
        Self {
            sample_rate,
            frame_length,
            keywords,
        }
    }
}

/// Index of a configured keyword
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct KeywordId(pub usize);

impl fmt::Display for KeywordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A frame-synchronous wake word engine
pub trait KeywordEngine {
    /// Sample rate the engine consumes
    fn sample_rate(&self) -> u32;

    /// Samples per [`Self::process`] call
    fn frame_length(&self) -> usize;

    /// Labels of the configured keywords in index order
    fn keywords(&self) -> Vec<String>;

    /// Feed one frame; returns the index of a detected keyword
    ///
    /// # Errors
    ///
    /// Returns error if the engine rejects the frame
    fn process(&mut self, frame: &[i16]) -> Result<Option<usize>>;

    /// Free engine resources ahead of drop
    ///
    /// # Errors
    ///
    /// Returns error if the engine fails to shut down cleanly
    fn release(&mut self) -> Result<()> {
        Ok(())
    }
}

impl<E: KeywordEngine + ?Sized> KeywordEngine for Box<E> {
    fn sample_rate(&self) -> u32 {
        (**self).sample_rate()
    }

    fn frame_length(&self) -> usize {
        (**self).frame_length()
    }

    fn keywords(&self) -> Vec<String> {
        (**self).keywords()
    }

    fn process(&mut self, frame: &[i16]) -> Result<Option<usize>> {
        (**self).process(frame)
    }

    fn release(&mut self) -> Result<()> {
        (**self).release()
    }
}

/// Enforces the frame contract in front of a [`KeywordEngine`]
pub struct KeywordDetector<E> {
    engine: Option<E>,
    config: DetectorConfig,
}

impl<E: KeywordEngine> KeywordDetector<E> {
    /// Wrap `engine`, reading its fixed rate and frame length
    ///
    /// # Errors
    ///
    /// Returns error if the engine reports a zero rate, zero frame length, or no keywords
    pub fn new(engine: E) -> Result<Self> {
        let config = DetectorConfig::new(
            engine.sample_rate(),
            engine.frame_length(),
            engine.keywords(),
        );

        if config.sample_rate == 0 || config.frame_length == 0 {
            return Err(Error::Detector(format!(
                "engine reported invalid format: {} Hz, {} samples",
                config.sample_rate, config.frame_length
            )));
        }
        if config.keywords.is_empty() {
            return Err(Error::Detector("no keywords configured".to_string()));
        }

        tracing::debug!(
            sample_rate = config.sample_rate,
            frame_length = config.frame_length,
            keywords = ?config.keywords,
            "keyword detector initialized"
        );

        Ok(Self {
            engine: Some(engine),
            config,
        })
    }

    /// The engine's input contract
    #[must_use]
    pub const fn config(&self) -> &DetectorConfig {
        &self.config
    }

    /// Run detection on one frame
    ///
    /// # Panics
    ///
    /// Panics if `frame` is not exactly [`DetectorConfig::frame_length`] samples
    ///
    /// # Errors
    ///
    /// Returns error if the engine fails or has been released
    pub fn detect(&mut self, frame: &[i16]) -> Result<Option<KeywordId>> {
        assert_eq!(
            frame.len(),
            self.config.frame_length,
            "keyword detector requires frames of exactly {} samples",
            self.config.frame_length
        );

        let engine = self
            .engine
            .as_mut()
            .ok_or_else(|| Error::Detector("detector already released".to_string()))?;

        Ok(engine.process(frame)?.map(KeywordId))
    }

    /// Label of a detected keyword
    #[must_use]
    pub fn keyword_name(&self, id: KeywordId) -> &str {
        self.config
            .keywords
            .get(id.0)
            .map_or("unknown", String::as_str)
    }

    /// Release the engine; returns false if it was already released
    ///
    /// Engine shutdown errors are logged, never returned.
    pub fn release(&mut self) -> bool {
        let Some(mut engine) = self.engine.take() else {
            return false;
        };
        if let Err(e) = engine.release() {
            tracing::warn!(error = %e, "keyword engine release failed");
        }
        drop(engine);
        tracing::debug!("keyword detector released");
        true
    }

    /// Whether the engine has been released
    #[must_use]
    pub const fn is_released(&self) -> bool {
        self.engine.is_none()
    }
}

/// Derive a display label from a keyword model path
///
/// `hey-jarvis_en_linux_v3_0_0.ppn` becomes `hey jarvis`.
#[must_use]
pub fn keyword_label(path: &Path) -> String {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let base = stem.split('_').next().unwrap_or_default();
    base.replace('-', " ").trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    struct CountingEngine {
        calls: usize,
        fire_on: usize,
        released: usize,
    }

    impl KeywordEngine for CountingEngine {
        fn sample_rate(&self) -> u32 {
            16000
        }

        fn frame_length(&self) -> usize {
            512
        }

        fn keywords(&self) -> Vec<String> {
            vec!["computer".to_string(), "jarvis".to_string()]
        }

        fn process(&mut self, _frame: &[i16]) -> Result<Option<usize>> {
            self.calls += 1;
            Ok((self.calls == self.fire_on).then_some(1))
        }

        fn release(&mut self) -> Result<()> {
            self.released += 1;
            Err(Error::Detector("already gone".to_string()))
        }
    }

    fn detector(fire_on: usize) -> KeywordDetector<CountingEngine> {
        KeywordDetector::new(CountingEngine {
            calls: 0,
            fire_on,
            released: 0,
        })
        .unwrap()
    }

    #[test]
    fn test_forwards_detection() {
        let mut detector = detector(2);
        let frame = vec![0i16; 512];

        assert_eq!(detector.detect(&frame).unwrap(), None);
        let hit = detector.detect(&frame).unwrap().unwrap();
        assert_eq!(hit, KeywordId(1));
        assert_eq!(detector.keyword_name(hit), "jarvis");
        assert_eq!(detector.keyword_name(KeywordId(7)), "unknown");
    }

    #[test]
    #[should_panic(expected = "exactly 512 samples")]
    fn test_short_frame_fails_fast() {
        let mut detector = detector(1);
        let _ = detector.detect(&[0i16; 511]);
    }

    #[test]
    #[should_panic(expected = "exactly 512 samples")]
    fn test_long_frame_fails_fast() {
        let mut detector = detector(1);
        let _ = detector.detect(&[0i16; 513]);
    }

    #[test]
    fn test_release_once() {
        let mut detector = detector(1);
        assert!(detector.release());
        assert!(!detector.release());
        assert!(detector.is_released());
        assert!(detector.detect(&[0i16; 512]).is_err());
    }

    #[test]
    fn test_keyword_label() {
        assert_eq!(
            keyword_label(Path::new("/models/hey-jarvis_en_linux_v3_0_0.ppn")),
            "hey jarvis"
        );
        assert_eq!(keyword_label(Path::new("computer.ppn")), "computer");
    }
}
