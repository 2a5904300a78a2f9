//! Startup wiring
//!
//! Builds every collaborator from [`Config`] and runs the hotword loop until shutdown.
//! Anything missing at this point (device, engine, credential) aborts startup.

use std::rc::Rc;
use std::sync::Arc;

use secrecy::SecretString;
use tokio::sync::mpsc;

use crate::agent::{Agent, GmailTools, OpenAiAgent};
use crate::audio::{
    AudioBackend, CpalBackend, DeviceSelector, NotificationTone, select_playback,
};
use crate::capture::CaptureCycle;
use crate::config::{
    AgentSettings, Config, DetectorSettings, EmailSettings, SttSettings, TtsSettings,
};
use crate::speech::{
    SpeechSynthesizer, SpeechToText, SttProvider, TextToSpeech, Transcriber, TtsProvider,
};
use crate::wake::{HotwordLoop, KeywordDetector, KeywordEngine, LoopSummary};
use crate::{Error, Result};

/// Build the wake word engine
///
/// # Errors
///
/// Returns error if the engine cannot be initialized or was compiled out
#[cfg(feature = "porcupine")]
pub fn build_engine(settings: &DetectorSettings) -> Result<Box<dyn KeywordEngine>> {
    Ok(Box::new(crate::wake::PorcupineEngine::new(settings)?))
}

/// Build the wake word engine
///
/// # Errors
///
/// Always: no engine is compiled in
#[cfg(not(feature = "porcupine"))]
pub fn build_engine(_settings: &DetectorSettings) -> Result<Box<dyn KeywordEngine>> {
    Err(Error::Detector(
        "built without a wake word engine; enable the `porcupine` feature".to_string(),
    ))
}

fn required(key: Option<&SecretString>, what: &str) -> Result<SecretString> {
    key.cloned()
        .ok_or_else(|| Error::Config(format!("{what} required")))
}

/// Build the speech-to-text client
///
/// # Errors
///
/// Returns error if the provider's API key is missing
pub fn build_transcriber(settings: &SttSettings) -> Result<Arc<dyn Transcriber>> {
    let stt = match settings.provider {
        SttProvider::Whisper => SpeechToText::new_whisper(
            required(settings.api_key.as_ref(), "OPENAI_API_KEY")?,
            settings.model.clone(),
            settings.timeout,
        )?,
        SttProvider::Deepgram => SpeechToText::new_deepgram(
            required(settings.api_key.as_ref(), "DEEPGRAM_API_KEY")?,
            settings.model.clone(),
            settings.timeout,
        )?,
    };
    Ok(Arc::new(stt))
}

/// Build the text-to-speech client
///
/// # Errors
///
/// Returns error if the provider's API key is missing
pub fn build_synthesizer(settings: &TtsSettings) -> Result<Arc<dyn SpeechSynthesizer>> {
    let tts = match settings.provider {
        TtsProvider::OpenAI => TextToSpeech::new_openai(
            required(settings.api_key.as_ref(), "OPENAI_API_KEY")?,
            settings.voice.clone(),
            settings.speed,
            settings.model.clone(),
        )?,
        TtsProvider::ElevenLabs => TextToSpeech::new_elevenlabs(
            required(settings.api_key.as_ref(), "ELEVENLABS_API_KEY")?,
            settings.voice.clone(),
            settings.model.clone(),
        )?,
    };
    Ok(Arc::new(tts))
}

/// Build the agent, with email tools when enabled
///
/// # Errors
///
/// Returns error if the `OpenAI` key is missing, or email is enabled without a token
pub fn build_agent(settings: &AgentSettings, email: &EmailSettings) -> Result<Arc<dyn Agent>> {
    let mut agent = OpenAiAgent::new(
        required(settings.api_key.as_ref(), "OPENAI_API_KEY")?,
        settings.model.clone(),
    )?;
    if let Some(base_url) = &settings.base_url {
        agent = agent.with_base_url(base_url.clone());
    }
    if email.enabled {
        let token = required(email.access_token.as_ref(), "GMAIL_ACCESS_TOKEN")?;
        agent = agent.with_tools(Arc::new(GmailTools::new(token)?));
        tracing::info!("email tools enabled");
    }
    Ok(Arc::new(agent))
}

/// Channel that fires once on Ctrl-C
#[must_use]
pub fn ctrl_c_shutdown() -> mpsc::Receiver<()> {
    let (tx, rx) = mpsc::channel::<()>(1);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("shutdown requested");
            let _ = tx.send(()).await;
        }
    });
    rx
}

/// Run the assistant until `shutdown` fires
///
/// # Errors
///
/// Returns error if startup fails: no usable input device, engine failure, missing
/// credentials, or no playback backend
#[allow(clippy::future_not_send)]
pub async fn run(config: &Config, shutdown: &mut mpsc::Receiver<()>) -> Result<LoopSummary> {
    let detector = KeywordDetector::new(build_engine(&config.detector)?)?;

    let backend = Rc::new(CpalBackend::new().with_read_timeout(config.audio.read_timeout));
    let devices = backend.input_devices()?;
    let device = DeviceSelector::new(
        config.audio.input_device.clone(),
        config.audio.prefer_detector_rate,
    )
    .configure(&devices, detector.config())?;

    let transcriber = build_transcriber(&config.stt)?;
    let synthesizer = build_synthesizer(&config.tts)?;
    let agent = build_agent(&config.agent, &config.email)?;
    let playback = select_playback(config.playback)?;
    tracing::info!(player = playback.name(), "playback ready");

    let cycle = CaptureCycle::new(
        Rc::clone(&backend),
        device.clone(),
        transcriber,
        agent,
        synthesizer,
        playback,
    )
    .with_settings(config.capture.listen.clone())
    .with_tone(config.capture.tone.then(NotificationTone::default));

    let hotword = HotwordLoop::new(backend, device, detector, cycle)?
        .with_backoff(config.audio.reopen_backoff);

    let summary = hotword.run(shutdown).await;
    tracing::info!(?summary, "assistant stopped");
    Ok(summary)
}
