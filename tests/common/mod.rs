//! Shared test utilities: scripted engine doubles that record their calls

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Notify, Semaphore};

use herald::dispatch::{CommandDispatcher, DispatchReply};
use herald::voice::{
    AudioCapture, AudioPlayback, AudioSegment, LanguageDetector, PlaybackOutcome, SAMPLE_RATE,
    StateHandler, SynthesizedSpeech, Synthesizer, TranscriptionResult, Transcriber,
    WakeWordMonitor,
};
use herald::{Engines, Error, Language, ListeningState, Result, Session, VoiceOrchestrator};

/// Ordered record of engine calls shared by all doubles
#[derive(Clone, Default)]
pub struct CallLog(Arc<Mutex<Vec<String>>>);

impl CallLog {
    pub fn push(&self, entry: impl Into<String>) {
        self.0.lock().unwrap().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.entries().iter().filter(|e| e.starts_with(prefix)).count()
    }

    pub fn contains(&self, prefix: &str) -> bool {
        self.count(prefix) > 0
    }
}

/// Half a second of audible tone
pub fn speech_samples() -> Vec<f32> {
    (0..SAMPLE_RATE as usize / 2)
        .map(|i| 0.3 * (i as f32 * 0.17).sin())
        .collect()
}

/// Capture double returning a fixed segment, optionally held at a gate
pub struct ScriptedCapture {
    samples: Vec<f32>,
    log: CallLog,
    gate: Option<Arc<Semaphore>>,
    entered: Arc<Notify>,
}

#[async_trait]
impl AudioCapture for ScriptedCapture {
    async fn capture(&self, _timeout: Duration) -> Result<AudioSegment> {
        self.log.push("capture");
        self.entered.notify_one();
        if let Some(gate) = &self.gate
            && let Ok(permit) = gate.acquire().await
        {
            permit.forget();
        }
        Ok(AudioSegment::new(self.samples.clone(), SAMPLE_RATE))
    }
}

/// Detector double returning a fixed language, or failing when `None`
pub struct ScriptedDetector {
    detected: Option<Language>,
    log: CallLog,
    sticky: Mutex<Option<Language>>,
}

impl ScriptedDetector {
    pub fn sticky(&self) -> Option<Language> {
        *self.sticky.lock().unwrap()
    }
}

#[async_trait]
impl LanguageDetector for ScriptedDetector {
    async fn detect_from_audio(&self, _samples: &[f32]) -> Result<(Language, f32)> {
        self.log.push("detect");
        self.detected
            .map(|language| (language, 0.9))
            .ok_or_else(|| Error::LanguageDetection("no language".to_string()))
    }

    fn override_language(&self, language: Language) {
        *self.sticky.lock().unwrap() = Some(language);
    }

    fn clear_override(&self) {
        *self.sticky.lock().unwrap() = None;
    }
}

/// Transcriber double returning a fixed transcript
pub struct ScriptedTranscriber {
    text: String,
    log: CallLog,
}

#[async_trait]
impl Transcriber for ScriptedTranscriber {
    async fn transcribe(&self, segment: &AudioSegment) -> Result<TranscriptionResult> {
        let language = segment.language.map_or("none", Language::code);
        self.log.push(format!("transcribe:{language}"));
        Ok(TranscriptionResult::new(&self.text, 0.95))
    }
}

/// Dispatcher double returning a fixed reply
pub struct ScriptedDispatcher {
    reply: DispatchReply,
    log: CallLog,
}

#[async_trait]
impl CommandDispatcher for ScriptedDispatcher {
    async fn dispatch(&self, text: &str) -> DispatchReply {
        self.log.push(format!("dispatch:{text}"));
        self.reply.clone()
    }
}

/// Synthesizer double producing a short silent clip
pub struct ScriptedSynthesizer {
    fail: bool,
    log: CallLog,
}

#[async_trait]
impl Synthesizer for ScriptedSynthesizer {
    async fn synthesize(&self, text: &str, language: Language) -> Result<SynthesizedSpeech> {
        self.log.push(format!("synthesize:{text}:{}", language.code()));
        if self.fail {
            return Err(Error::Tts("synthesis failed".to_string()));
        }
        Ok(SynthesizedSpeech::new(vec![0.0; 2400], 24_000))
    }
}

/// Playback double that completes immediately, or holds until stopped
///
/// A held clip only hears a `stop()` issued while it is playing, like a
/// real device that latches its stop signal when the clip starts.
pub struct ScriptedPlayback {
    log: CallLog,
    stops: AtomicUsize,
    held: bool,
    interrupt: Notify,
    entered: Arc<Notify>,
}

impl ScriptedPlayback {
    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AudioPlayback for ScriptedPlayback {
    async fn play(&self, speech: &SynthesizedSpeech) -> Result<PlaybackOutcome> {
        self.log.push(format!("play:{}", speech.duration_ms));
        if !self.held {
            return Ok(PlaybackOutcome::Completed);
        }

        let interrupted = self.interrupt.notified();
        tokio::pin!(interrupted);
        interrupted.as_mut().enable();
        self.entered.notify_one();
        interrupted.await;
        Ok(PlaybackOutcome::Interrupted)
    }

    fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
        self.interrupt.notify_waiters();
    }
}

/// Monitor double whose state changes are raised by the test
#[derive(Default)]
pub struct ManualMonitor {
    handler: Mutex<Option<StateHandler>>,
    wake_phrase: Mutex<String>,
    starts: AtomicUsize,
    stops: AtomicUsize,
    running: AtomicBool,
    fail_start: bool,
    start_gate: Option<Arc<Semaphore>>,
    start_entered: Notify,
}

impl ManualMonitor {
    pub fn failing() -> Self {
        Self {
            fail_start: true,
            ..Self::default()
        }
    }

    /// Monitor whose start blocks until [`Self::release_start`]
    pub fn gated() -> Self {
        Self {
            start_gate: Some(Arc::new(Semaphore::new(0))),
            ..Self::default()
        }
    }

    /// Gated monitor whose start fails once released
    pub fn gated_failing() -> Self {
        Self {
            fail_start: true,
            ..Self::gated()
        }
    }

    pub fn release_start(&self) {
        if let Some(gate) = &self.start_gate {
            gate.add_permits(1);
        }
    }

    /// Wait until a start is blocked at the gate
    pub async fn start_entered(&self) {
        tokio::time::timeout(Duration::from_secs(2), self.start_entered.notified())
            .await
            .expect("monitor start never began");
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Raise a state change as the real monitor would
    pub fn fire(&self, state: ListeningState) {
        let handler = self.handler.lock().unwrap().clone();
        if let Some(handler) = handler {
            handler(state);
        }
    }

    pub fn wake_phrase(&self) -> String {
        self.wake_phrase.lock().unwrap().clone()
    }

    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WakeWordMonitor for ManualMonitor {
    async fn start_monitoring(&self) -> Result<()> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.start_gate {
            self.start_entered.notify_one();
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }
        if self.fail_start {
            return Err(Error::WakeWord("no microphone".to_string()));
        }
        self.running.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn stop_monitoring(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
        self.running.store(false, Ordering::SeqCst);
    }

    fn set_custom_wake_word(&self, phrase: &str) {
        *self.wake_phrase.lock().unwrap() = phrase.to_string();
    }

    fn on_state_change(&self, handler: StateHandler) {
        *self.handler.lock().unwrap() = Some(handler);
    }
}

/// What each double returns
pub struct Script {
    pub samples: Vec<f32>,
    pub detected: Option<Language>,
    pub transcript: String,
    pub reply: DispatchReply,
    pub synth_fails: bool,
    pub gated: bool,
    pub playback_held: bool,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            samples: speech_samples(),
            detected: Some(Language::English),
            transcript: "turn off the lights".to_string(),
            reply: DispatchReply::Reply("Lights turned off".to_string()),
            synth_fails: false,
            gated: false,
            playback_held: false,
        }
    }
}

/// Engines built from scripted doubles, plus handles to inspect them
pub struct Doubles {
    pub engines: Engines,
    pub detector: Arc<ScriptedDetector>,
    pub playback: Arc<ScriptedPlayback>,
    pub log: CallLog,
    pub gate: Arc<Semaphore>,
    pub capture_entered: Arc<Notify>,
    pub playback_entered: Arc<Notify>,
}

impl Doubles {
    pub fn new(script: Script) -> Self {
        let log = CallLog::default();
        let gate = Arc::new(Semaphore::new(0));
        let capture_entered = Arc::new(Notify::new());
        let playback_entered = Arc::new(Notify::new());

        let detector = Arc::new(ScriptedDetector {
            detected: script.detected,
            log: log.clone(),
            sticky: Mutex::new(None),
        });
        let playback = Arc::new(ScriptedPlayback {
            log: log.clone(),
            stops: AtomicUsize::new(0),
            held: script.playback_held,
            interrupt: Notify::new(),
            entered: Arc::clone(&playback_entered),
        });

        let engines = Engines {
            capture: Arc::new(ScriptedCapture {
                samples: script.samples,
                log: log.clone(),
                gate: script.gated.then(|| Arc::clone(&gate)),
                entered: Arc::clone(&capture_entered),
            }),
            detector: detector.clone(),
            transcriber: Arc::new(ScriptedTranscriber {
                text: script.transcript,
                log: log.clone(),
            }),
            dispatcher: Arc::new(ScriptedDispatcher {
                reply: script.reply,
                log: log.clone(),
            }),
            synthesizer: Arc::new(ScriptedSynthesizer {
                fail: script.synth_fails,
                log: log.clone(),
            }),
            playback: playback.clone(),
        };

        Self {
            engines,
            detector,
            playback,
            log,
            gate,
            capture_entered,
            playback_entered,
        }
    }
}

/// Orchestrator wired to scripted doubles
pub struct Harness {
    pub orchestrator: VoiceOrchestrator,
    pub monitor: Arc<ManualMonitor>,
    pub detector: Arc<ScriptedDetector>,
    pub playback: Arc<ScriptedPlayback>,
    pub log: CallLog,
    pub gate: Arc<Semaphore>,
    pub capture_entered: Arc<Notify>,
    pub playback_entered: Arc<Notify>,
}

impl Harness {
    pub fn new(script: Script) -> Self {
        Self::with_session(script, Session::new("user_demo", "Hey Dev"), ManualMonitor::default())
    }

    pub fn with_session(script: Script, session: Session, monitor: ManualMonitor) -> Self {
        let doubles = Doubles::new(script);
        let monitor = Arc::new(monitor);
        let orchestrator = VoiceOrchestrator::new(session, doubles.engines, monitor.clone());

        Self {
            orchestrator,
            monitor,
            detector: doubles.detector,
            playback: doubles.playback,
            log: doubles.log,
            gate: doubles.gate,
            capture_entered: doubles.capture_entered,
            playback_entered: doubles.playback_entered,
        }
    }

    /// Let a gated capture return
    pub fn release_capture(&self) {
        self.gate.add_permits(1);
    }

    /// Wait until `n` pipeline runs have completed
    pub async fn wait_for_runs(&self, n: u64) {
        wait_until(|| self.orchestrator.stats().runs_completed >= n).await;
    }
}

/// Poll `condition` until it holds, failing the test after two seconds
pub async fn wait_until(condition: impl Fn() -> bool) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not met in time");
}
