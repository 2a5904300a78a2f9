//! Picovoice Porcupine wake word engine

use std::path::PathBuf;

use porcupine::{Porcupine, PorcupineBuilder};
use secrecy::ExposeSecret;

use crate::config::DetectorSettings;
use crate::wake::detector::{KeywordEngine, keyword_label};
use crate::{Error, Result};

/// Porcupine engine loaded from keyword model files
pub struct PorcupineEngine {
    inner: Porcupine,
    keywords: Vec<String>,
}

impl PorcupineEngine {
    /// Initialize Porcupine from detector settings
    ///
    /// # Errors
    ///
    /// Returns error if the access key is missing, a model file does not exist, or the
    /// engine fails to initialize
    pub fn new(settings: &DetectorSettings) -> Result<Self> {
        let access_key = settings
            .access_key
            .as_ref()
            .ok_or_else(|| Error::Config("Picovoice access key required".to_string()))?;

        if settings.keyword_paths.is_empty() {
            return Err(Error::Config("at least one keyword path required".to_string()));
        }
        if let Some(missing) = settings.keyword_paths.iter().find(|p| !p.exists()) {
            return Err(Error::Config(format!(
                "keyword model not found: {}",
                missing.display()
            )));
        }

        let paths: Vec<PathBuf> = settings.keyword_paths.clone();
        let mut builder =
            PorcupineBuilder::new_with_keyword_paths(access_key.expose_secret(), &paths);
        if !settings.sensitivities.is_empty() {
            builder.sensitivities(&settings.sensitivities);
        }
        if let Some(model_path) = &settings.model_path {
            builder.model_path(model_path.clone());
        }

        let inner = builder
            .init()
            .map_err(|e| Error::Detector(format!("porcupine init failed: {e}")))?;

        let keywords: Vec<String> = paths.iter().map(|p| keyword_label(p)).collect();
        tracing::info!(keywords = ?keywords, "porcupine initialized");

        Ok(Self { inner, keywords })
    }
}

impl KeywordEngine for PorcupineEngine {
    #[allow(clippy::unnecessary_cast)]
    fn sample_rate(&self) -> u32 {
        self.inner.sample_rate() as u32
    }

    #[allow(clippy::unnecessary_cast)]
    fn frame_length(&self) -> usize {
        self.inner.frame_length() as usize
    }

    fn keywords(&self) -> Vec<String> {
        self.keywords.clone()
    }

    fn process(&mut self, frame: &[i16]) -> Result<Option<usize>> {
        let index = self
            .inner
            .process(frame)
            .map_err(|e| Error::Detector(e.to_string()))?;
        Ok(usize::try_from(index).ok())
    }
}
