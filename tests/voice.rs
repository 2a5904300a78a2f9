//! Voice pipeline integration tests
//!
//! Tests the hotword loop and capture cycle without audio hardware

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use hark::agent::AgentResponse;
use hark::audio::{FrameResampler, StreamFault, StreamHandle, StreamState, native_frame_length};
use hark::capture::{CaptureCycle, CaptureOutcome};
use hark::speech::TranscribeError;
use hark::wake::{HotwordLoop, KeywordId, UtteranceHandler};

mod common;

use common::{
    Chunk, EchoSynthesizer, FRAME, RATE, RecordingPlayback, Script, ScriptedBackend, StubAgent,
    StubTranscriber, scripted_detector, tagged_frames, utterance,
};

/// Records each activation and what the detector had seen at that moment
struct WakeRecorder {
    seen: Rc<RefCell<Vec<i16>>>,
    wakes: Vec<(KeywordId, String, usize, usize)>,
}

#[async_trait(?Send)]
impl UtteranceHandler for WakeRecorder {
    async fn on_wake(&mut self, keyword: KeywordId, label: &str) {
        let before = self.seen.borrow().len();
        tokio::time::sleep(Duration::from_millis(250)).await;
        let after = self.seen.borrow().len();
        self.wakes.push((keyword, label.to_string(), before, after));
    }
}

fn cycle(
    backend: &Rc<ScriptedBackend>,
    transcriber: &Arc<StubTranscriber>,
    agent: &Arc<StubAgent>,
) -> (CaptureCycle<ScriptedBackend>, common::PlaybackLog) {
    let (playback, log) = RecordingPlayback::new();
    let cycle = CaptureCycle::new(
        Rc::clone(backend),
        ScriptedBackend::device(),
        transcriber.clone(),
        agent.clone(),
        Arc::new(EchoSynthesizer),
        playback,
    );
    (cycle, log)
}

#[tokio::test(start_paused = true)]
async fn test_detection_at_frame_40_pauses_scanning() {
    let (tx, mut rx) = mpsc::channel(1);
    let backend = Rc::new(
        ScriptedBackend::new(vec![
            Script::Stream(tagged_frames(0..=40)),
            Script::Stream(tagged_frames(41..=50)),
        ])
        .stop_when_exhausted(tx),
    );
    let (detector, probe) = scripted_detector(&[40]);
    let mut recorder = WakeRecorder {
        seen: Rc::clone(&probe.seen),
        wakes: Vec::new(),
    };

    let summary = HotwordLoop::new(
        Rc::clone(&backend),
        ScriptedBackend::device(),
        detector,
        &mut recorder,
    )
    .unwrap()
    .run(&mut rx)
    .await;

    // Scanning → Capturing exactly once
    assert_eq!(summary.detections, 1);
    assert_eq!(summary.captures, 1);
    assert_eq!(recorder.wakes.len(), 1);

    // Nothing reached the detector while the capture ran, and frame 40 was the last one
    let (keyword, label, before, after) = recorder.wakes[0].clone();
    assert_eq!(keyword, KeywordId(0));
    assert_eq!(label, "jarvis");
    assert_eq!(before, 41);
    assert_eq!(after, 41);

    // Every frame delivered once, in order, scanning resumed on a fresh stream
    assert_eq!(probe.seen(), (0..=50).collect::<Vec<i16>>());
    assert_eq!(summary.frames_scanned, 51);
    assert_eq!(backend.opens(), 2);
    assert_eq!(probe.released.get(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_overflow_recovers_without_intervention() {
    let (tx, mut rx) = mpsc::channel(1);
    let mut first = tagged_frames(0..=5);
    first.push(Chunk::Fault(StreamFault::Overflow));
    let backend = Rc::new(
        ScriptedBackend::new(vec![
            Script::Stream(first),
            Script::Fail("device busy".to_string()),
            Script::Fail("device busy".to_string()),
            Script::Fail("device busy".to_string()),
            Script::Stream(tagged_frames(6..=10)),
        ])
        .stop_when_exhausted(tx),
    );
    let (detector, probe) = scripted_detector(&[]);
    let mut recorder = WakeRecorder {
        seen: Rc::clone(&probe.seen),
        wakes: Vec::new(),
    };

    let started = tokio::time::Instant::now();
    let summary = HotwordLoop::new(
        Rc::clone(&backend),
        ScriptedBackend::device(),
        detector,
        &mut recorder,
    )
    .unwrap()
    .with_backoff(Duration::from_secs(1))
    .run(&mut rx)
    .await;

    assert_eq!(summary.read_faults, 1);
    assert_eq!(summary.reopen_attempts, 4);
    assert_eq!(backend.opens(), 5);
    assert_eq!(probe.seen(), (0..=10).collect::<Vec<i16>>());
    assert!(recorder.wakes.is_empty());
    // One backoff after the fault, one after each failed open
    assert!(started.elapsed() >= Duration::from_secs(4));
}

#[tokio::test(start_paused = true)]
async fn test_startup_open_failure_is_retried() {
    let (tx, mut rx) = mpsc::channel(1);
    let backend = Rc::new(
        ScriptedBackend::new(vec![
            Script::Fail("not ready".to_string()),
            Script::Stream(tagged_frames(0..=2)),
        ])
        .stop_when_exhausted(tx),
    );
    let (detector, probe) = scripted_detector(&[]);
    let mut recorder = WakeRecorder {
        seen: Rc::clone(&probe.seen),
        wakes: Vec::new(),
    };

    let summary = HotwordLoop::new(backend, ScriptedBackend::device(), detector, &mut recorder)
        .unwrap()
        .run(&mut rx)
        .await;

    assert_eq!(summary.reopen_attempts, 1);
    assert_eq!(probe.seen(), vec![0, 1, 2]);
}

#[tokio::test]
async fn test_shutdown_releases_detector_once() {
    let (tx, mut rx) = mpsc::channel(1);
    tx.send(()).await.unwrap();

    let backend = Rc::new(ScriptedBackend::new(vec![Script::Stream(tagged_frames(
        0..=100,
    ))]));
    let (detector, probe) = scripted_detector(&[]);
    let mut recorder = WakeRecorder {
        seen: Rc::clone(&probe.seen),
        wakes: Vec::new(),
    };

    let summary = HotwordLoop::new(backend, ScriptedBackend::device(), detector, &mut recorder)
        .unwrap()
        .run(&mut rx)
        .await;

    assert_eq!(summary.frames_scanned, 0);
    assert_eq!(probe.released.get(), 1);
}

#[test]
fn test_stream_handle_fault_and_reopen() {
    let backend = ScriptedBackend::new(vec![
        Script::Fail("busy".to_string()),
        Script::Stream(tagged_frames(0..=0)),
        Script::Fail("gone".to_string()),
    ]);
    let device = ScriptedBackend::device();

    let mut handle = StreamHandle::open(&backend, &device);
    assert_eq!(handle.state(), StreamState::Faulted);
    assert!(handle.fault_reason().unwrap().contains("busy"));

    assert!(handle.reopen(&backend, &device));
    assert_eq!(handle.state(), StreamState::Open);

    assert!(!handle.reopen(&backend, &device));
    assert_eq!(handle.state(), StreamState::Closed);
    assert!(handle.fault_reason().unwrap().contains("gone"));

    handle.close();
    handle.close();
    assert_eq!(handle.state(), StreamState::Closed);
}

#[tokio::test]
async fn test_stream_handle_read_fault() {
    let backend = ScriptedBackend::new(vec![Script::Stream(vec![
        Chunk::Samples(vec![1; FRAME]),
        Chunk::Fault(StreamFault::Overflow),
    ])]);
    let mut handle = StreamHandle::open(&backend, &ScriptedBackend::device());

    let frame = handle.read(FRAME).await.unwrap();
    assert_eq!(frame.len(), FRAME);
    assert_eq!(frame.sample_rate(), RATE);

    assert_eq!(handle.read(FRAME).await, Err(StreamFault::Overflow));
    assert_eq!(handle.state(), StreamState::Faulted);
    assert_eq!(handle.read(FRAME).await, Err(StreamFault::Closed));
}

#[tokio::test(start_paused = true)]
async fn test_unintelligible_never_reaches_agent() {
    let (tx, mut rx) = mpsc::channel(1);
    let backend = Rc::new(
        ScriptedBackend::new(vec![
            Script::Stream(tagged_frames(0..=0)),
            Script::Stream(utterance()),
            Script::Stream(tagged_frames(1..=3)),
        ])
        .stop_when_exhausted(tx),
    );
    let transcriber = Arc::new(StubTranscriber::failing(TranscribeError::Unintelligible));
    let agent = Arc::new(StubAgent::new(AgentResponse::answer("unused")));
    let (mut cycle, log) = cycle(&backend, &transcriber, &agent);
    let (detector, probe) = scripted_detector(&[0]);

    let summary = HotwordLoop::new(
        Rc::clone(&backend),
        ScriptedBackend::device(),
        detector,
        &mut cycle,
    )
    .unwrap()
    .run(&mut rx)
    .await;

    assert_eq!(transcriber.calls(), 1);
    assert_eq!(agent.calls(), 0);
    assert!(log.speech().is_empty());

    let reports = cycle.reports();
    assert_eq!(reports.len(), 1);
    assert_eq!(
        reports[0].turns,
        vec![CaptureOutcome::TranscriptionFailed(
            TranscribeError::Unintelligible
        )]
    );

    // Back through Reopening to scanning
    assert_eq!(summary.captures, 1);
    assert_eq!(summary.reopen_attempts, 1);
    assert_eq!(probe.seen(), vec![0, 1, 2, 3]);
}

#[tokio::test]
async fn test_followup_is_bounded_to_one_extra_turn() {
    let backend = Rc::new(ScriptedBackend::new(vec![
        Script::Stream(utterance()),
        Script::Stream(utterance()),
        Script::Stream(utterance()),
    ]));
    let transcriber = Arc::new(StubTranscriber::text("send an email"));
    let agent = Arc::new(StubAgent::new(
        AgentResponse::answer("To whom?").with_followup(),
    ));
    let (mut cycle, log) = cycle(&backend, &transcriber, &agent);

    let report = cycle.run(KeywordId(0)).await;

    assert_eq!(report.turns.len(), 2);
    assert!(report.turns.iter().all(CaptureOutcome::wants_followup));
    assert_eq!(transcriber.calls(), 2);
    assert_eq!(agent.calls(), 2);
    assert_eq!(log.speech(), vec!["To whom?", "To whom?"]);
    assert_eq!(backend.opens(), 2);
    assert_eq!(backend.remaining_scripts(), 1);
}

#[tokio::test]
async fn test_no_speech_ends_turn() {
    let backend = Rc::new(ScriptedBackend::new(vec![Script::Stream(common::silence())]));
    let transcriber = Arc::new(StubTranscriber::text("unused"));
    let agent = Arc::new(StubAgent::new(AgentResponse::answer("unused")));
    let (mut cycle, _log) = cycle(&backend, &transcriber, &agent);

    let report = cycle.run(KeywordId(0)).await;

    assert_eq!(report.turns, vec![CaptureOutcome::NoSpeech]);
    assert_eq!(transcriber.calls(), 0);
    assert_eq!(agent.calls(), 0);
}

#[tokio::test]
async fn test_capture_session_failure_ends_turn() {
    let backend = Rc::new(ScriptedBackend::new(vec![Script::Fail("busy".to_string())]));
    let transcriber = Arc::new(StubTranscriber::text("unused"));
    let agent = Arc::new(StubAgent::new(AgentResponse::answer("unused")));
    let (mut cycle, log) = cycle(&backend, &transcriber, &agent);

    let report = cycle.run(KeywordId(0)).await;

    assert!(matches!(report.turns[..], [CaptureOutcome::SessionFailed(_)]));
    assert_eq!(transcriber.calls(), 0);
    // The detection tone still played
    assert_eq!(log.tones.get(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_end_to_end_answer_is_spoken_once() {
    let (tx, mut rx) = mpsc::channel(1);
    let backend = Rc::new(
        ScriptedBackend::new(vec![
            Script::Stream(tagged_frames(0..=0)),
            Script::Stream(utterance()),
            Script::Stream(tagged_frames(1..=4)),
        ])
        .stop_when_exhausted(tx),
    );
    let transcriber = Arc::new(StubTranscriber::text("what time is it"));
    let mut noon = AgentResponse::answer("it's noon");
    noon.confidence = 0.9;
    let agent = Arc::new(StubAgent::new(noon));
    let (mut cycle, log) = cycle(&backend, &transcriber, &agent);
    let (detector, probe) = scripted_detector(&[0]);

    let summary = HotwordLoop::new(
        Rc::clone(&backend),
        ScriptedBackend::device(),
        detector,
        &mut cycle,
    )
    .unwrap()
    .run(&mut rx)
    .await;

    assert_eq!(log.speech(), vec!["it's noon"]);
    assert_eq!(log.tones.get(), 1);
    assert_eq!(
        agent.questions.lock().unwrap().as_slice(),
        ["what time is it"]
    );
    // 4800 samples of speech plus the pause that ended it
    assert!(transcriber.samples_heard.load(std::sync::atomic::Ordering::SeqCst) > 4800);

    let reports = cycle.reports();
    assert_eq!(reports.len(), 1);
    assert!(matches!(
        &reports[0].turns[..],
        [CaptureOutcome::Answered { answer, spoken: true, .. }] if answer == "it's noon"
    ));

    // Scanning resumed after the capture
    assert_eq!(summary.detections, 1);
    assert_eq!(probe.seen(), vec![0, 1, 2, 3, 4]);
}

#[test]
fn test_resampler_always_yields_detector_frame() {
    for source_rate in [8000, 16000, 22050, 44100, 48000] {
        let source_len = native_frame_length(FRAME, source_rate, RATE);
        let mut resampler = FrameResampler::new(source_rate, source_len, RATE, FRAME).unwrap();

        for len in [0, 1, source_len / 2, source_len, source_len + 17, source_len * 3] {
            let input: Vec<i16> = (0..len).map(|i| ((i % 200) as i16 - 100) * 50).collect();
            assert_eq!(
                resampler.resample(&input).len(),
                FRAME,
                "{source_rate} Hz, {len} samples"
            );
        }
    }
}

#[test]
fn test_resampler_identity_and_silence() {
    let mut resampler = FrameResampler::new(RATE, FRAME, RATE, FRAME).unwrap();
    let input: Vec<i16> = (0..FRAME).map(|i| i as i16).collect();
    assert_eq!(resampler.resample(&input), input);

    let mut resampler = FrameResampler::new(44100, 1411, RATE, FRAME).unwrap();
    assert_eq!(resampler.resample(&[]), vec![0; FRAME]);
}
