//! Shared test utilities
//!
//! Scripted audio backend, scripted keyword engine and stub collaborators, so the
//! hotword loop and capture cycle run without audio hardware or network access.

#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::mpsc;

use hark::agent::{Agent, AgentResponse};
use hark::audio::{
    AudioBackend, AudioFrame, DeviceConfig, InputDeviceInfo, InputStream, PlaybackPort,
    StreamFault,
};
use hark::speech::{AudioFormat, SpeechAudio, SpeechSynthesizer, TranscribeError, Transcriber};
use hark::wake::{DetectorConfig, KeywordDetector, KeywordEngine};
use hark::{Error, Result};

pub const RATE: u32 = 16000;
pub const FRAME: usize = 512;

/// One step of a scripted stream
#[derive(Debug, Clone)]
pub enum Chunk {
    Samples(Vec<i16>),
    Fault(StreamFault),
}

/// What the next `open_input` call does
#[derive(Debug, Clone)]
pub enum Script {
    Fail(String),
    Stream(Vec<Chunk>),
}

/// Scanning frames tagged with their index in every sample
pub fn tagged_frames(range: std::ops::RangeInclusive<i16>) -> Vec<Chunk> {
    range.map(|tag| Chunk::Samples(vec![tag; FRAME])).collect()
}

/// A capture session: quiet calibration, speech, then a long pause
pub fn utterance() -> Vec<Chunk> {
    vec![
        Chunk::Samples(vec![0; 8000]),
        Chunk::Samples(vec![9000; 4800]),
        Chunk::Samples(vec![0; 16000]),
    ]
}

/// A capture session where nobody speaks
pub fn silence() -> Vec<Chunk> {
    vec![Chunk::Samples(vec![0; RATE as usize * 6])]
}

struct BackendState {
    scripts: VecDeque<Script>,
    opens: usize,
    stop: Option<mpsc::Sender<()>>,
}

/// Audio backend replaying scripted streams, one per open
#[derive(Clone)]
pub struct ScriptedBackend {
    state: Rc<RefCell<BackendState>>,
}

impl ScriptedBackend {
    pub fn new(scripts: Vec<Script>) -> Self {
        Self {
            state: Rc::new(RefCell::new(BackendState {
                scripts: scripts.into(),
                opens: 0,
                stop: None,
            })),
        }
    }

    /// Fire `stop` once a stream runs out of script
    pub fn stop_when_exhausted(self, stop: mpsc::Sender<()>) -> Self {
        self.state.borrow_mut().stop = Some(stop);
        self
    }

    pub fn opens(&self) -> usize {
        self.state.borrow().opens
    }

    pub fn remaining_scripts(&self) -> usize {
        self.state.borrow().scripts.len()
    }

    pub fn device() -> DeviceConfig {
        DeviceConfig {
            device_index: 0,
            device_name: "scripted mic".to_string(),
            sample_rate: RATE,
            frame_length: FRAME,
        }
    }
}

impl AudioBackend for ScriptedBackend {
    type Stream = ScriptedStream;

    fn input_devices(&self) -> Result<Vec<InputDeviceInfo>> {
        Ok(vec![InputDeviceInfo {
            index: 0,
            name: "scripted mic".to_string(),
            max_input_channels: 1,
            default_sample_rate: RATE,
            supported_rates: vec![RATE..=RATE],
        }])
    }

    fn open_input(&self, _device: &DeviceConfig) -> Result<ScriptedStream> {
        let mut state = self.state.borrow_mut();
        state.opens += 1;
        match state.scripts.pop_front() {
            Some(Script::Stream(chunks)) => Ok(ScriptedStream {
                chunks: chunks.into(),
                pending: VecDeque::new(),
                stop: state.stop.clone(),
            }),
            Some(Script::Fail(reason)) => Err(Error::Device(reason)),
            None => Err(Error::Device("no scripted stream left".to_string())),
        }
    }
}

pub struct ScriptedStream {
    chunks: VecDeque<Chunk>,
    pending: VecDeque<i16>,
    stop: Option<mpsc::Sender<()>>,
}

#[async_trait(?Send)]
impl InputStream for ScriptedStream {
    async fn read(&mut self, frame_length: usize) -> std::result::Result<Vec<i16>, StreamFault> {
        while self.pending.len() < frame_length {
            match self.chunks.pop_front() {
                Some(Chunk::Samples(samples)) => self.pending.extend(samples),
                Some(Chunk::Fault(fault)) => return Err(fault),
                None => {
                    if let Some(stop) = &self.stop {
                        let _ = stop.try_send(());
                    }
                    std::future::pending::<()>().await;
                }
            }
        }
        Ok(self.pending.drain(..frame_length).collect())
    }
}

/// Keyword engine that fires on frames carrying a trigger tag
pub struct ScriptedEngine {
    triggers: Vec<i16>,
    seen: Rc<RefCell<Vec<i16>>>,
    released: Rc<Cell<usize>>,
}

/// What a [`ScriptedEngine`] observed
#[derive(Clone)]
pub struct EngineProbe {
    pub seen: Rc<RefCell<Vec<i16>>>,
    pub released: Rc<Cell<usize>>,
}

impl EngineProbe {
    pub fn seen(&self) -> Vec<i16> {
        self.seen.borrow().clone()
    }
}

pub fn scripted_detector(triggers: &[i16]) -> (KeywordDetector<ScriptedEngine>, EngineProbe) {
    let probe = EngineProbe {
        seen: Rc::new(RefCell::new(Vec::new())),
        released: Rc::new(Cell::new(0)),
    };
    let engine = ScriptedEngine {
        triggers: triggers.to_vec(),
        seen: Rc::clone(&probe.seen),
        released: Rc::clone(&probe.released),
    };
    (KeywordDetector::new(engine).unwrap(), probe)
}

impl KeywordEngine for ScriptedEngine {
    fn sample_rate(&self) -> u32 {
        RATE
    }

    fn frame_length(&self) -> usize {
        FRAME
    }

    fn keywords(&self) -> Vec<String> {
        vec!["jarvis".to_string()]
    }

    fn process(&mut self, frame: &[i16]) -> Result<Option<usize>> {
        let tag = frame[0];
        self.seen.borrow_mut().push(tag);
        Ok(self.triggers.contains(&tag).then_some(0))
    }

    fn release(&mut self) -> Result<()> {
        self.released.set(self.released.get() + 1);
        Ok(())
    }
}

pub fn detector_config() -> DetectorConfig {
    DetectorConfig::new(RATE, FRAME, vec!["jarvis".to_string()])
}

/// Transcriber returning a fixed result
pub struct StubTranscriber {
    result: std::result::Result<String, TranscribeError>,
    pub calls: AtomicUsize,
    pub samples_heard: AtomicUsize,
}

impl StubTranscriber {
    pub fn text(text: &str) -> Self {
        Self::with(Ok(text.to_string()))
    }

    pub fn failing(error: TranscribeError) -> Self {
        Self::with(Err(error))
    }

    fn with(result: std::result::Result<String, TranscribeError>) -> Self {
        Self {
            result,
            calls: AtomicUsize::new(0),
            samples_heard: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transcriber for StubTranscriber {
    async fn transcribe(&self, audio: &AudioFrame) -> std::result::Result<String, TranscribeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.samples_heard.store(audio.len(), Ordering::SeqCst);
        self.result.clone()
    }
}

/// Agent returning a fixed response and recording questions
pub struct StubAgent {
    response: AgentResponse,
    pub questions: Mutex<Vec<String>>,
}

impl StubAgent {
    pub fn new(response: AgentResponse) -> Self {
        Self {
            response,
            questions: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.questions.lock().unwrap().len()
    }
}

#[async_trait]
impl Agent for StubAgent {
    async fn respond(&self, question: &str) -> Result<AgentResponse> {
        self.questions.lock().unwrap().push(question.to_string());
        Ok(self.response.clone())
    }
}

/// Synthesizer that "encodes" text as its UTF-8 bytes
pub struct EchoSynthesizer;

#[async_trait]
impl SpeechSynthesizer for EchoSynthesizer {
    async fn synthesize(&self, text: &str) -> Result<SpeechAudio> {
        Ok(SpeechAudio {
            data: text.as_bytes().to_vec(),
            format: AudioFormat::Wav,
        })
    }
}

/// What a [`RecordingPlayback`] was asked to play
#[derive(Clone, Default)]
pub struct PlaybackLog {
    pub speech: Rc<RefCell<Vec<String>>>,
    pub tones: Rc<Cell<usize>>,
}

impl PlaybackLog {
    pub fn speech(&self) -> Vec<String> {
        self.speech.borrow().clone()
    }
}

pub struct RecordingPlayback {
    log: PlaybackLog,
}

impl RecordingPlayback {
    pub fn new() -> (Box<dyn PlaybackPort>, PlaybackLog) {
        let log = PlaybackLog::default();
        (Box::new(Self { log: log.clone() }), log)
    }
}

#[async_trait(?Send)]
impl PlaybackPort for RecordingPlayback {
    fn name(&self) -> &'static str {
        "recording"
    }

    async fn play_speech(&mut self, audio: &SpeechAudio) -> Result<()> {
        self.log
            .speech
            .borrow_mut()
            .push(String::from_utf8_lossy(&audio.data).into_owned());
        Ok(())
    }

    async fn play_pcm(&mut self, _samples: &[f32], _sample_rate: u32) -> Result<()> {
        self.log.tones.set(self.log.tones.get() + 1);
        Ok(())
    }
}
