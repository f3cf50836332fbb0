//! Background wake word monitor
//!
//! A dedicated thread owns the microphone stream and forwards chunks to an
//! async evaluator. The evaluator segments speech, verifies the wake phrase
//! through STT and raises listening state transitions via the registered
//! handler.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::Instant;

use super::capture::{SAMPLE_RATE, SPEECH_ENERGY_THRESHOLD, calculate_energy, input_config, open_input_stream};
use super::wake_word::WakeWordDetector;
use super::{AudioSegment, StateHandler, Transcriber, WakeWordMonitor};
use crate::language::ListeningState;
use crate::session::normalize_wake_phrase;
use crate::{Error, Result};

/// Buffered audio chunks between the device thread and the evaluator
const CHUNK_QUEUE: usize = 512;

/// Shortest segment worth sending to STT for wake phrase verification
const MIN_CANDIDATE_SAMPLES: usize = SAMPLE_RATE as usize / 2;

/// Wake phrase and handler shared with the evaluator task
struct Shared {
    wake_phrase: RwLock<String>,
    handler: RwLock<Option<StateHandler>>,
}

impl Shared {
    fn wake_phrase(&self) -> String {
        self.wake_phrase
            .read()
            .map(|p| p.clone())
            .unwrap_or_default()
    }

    fn emit(&self, state: ListeningState) {
        let handler = self.handler.read().ok().and_then(|h| h.clone());
        match handler {
            Some(handler) => handler(state),
            None => tracing::debug!(%state, "no state handler registered"),
        }
    }
}

/// Running monitor resources
struct Running {
    stop: Arc<AtomicBool>,
    audio_thread: std::thread::JoinHandle<()>,
    evaluator: tokio::task::JoinHandle<()>,
}

/// Listens on the default microphone for the wake phrase
pub struct MicrophoneWakeMonitor {
    transcriber: Arc<dyn Transcriber>,
    listen_window: Duration,
    shared: Arc<Shared>,
    running: Mutex<Option<Running>>,
}

impl MicrophoneWakeMonitor {
    /// Create a monitor that verifies candidates with `transcriber`
    ///
    /// `listen_window` is how long the monitor stays active after a wake
    /// phrase before falling back to standby.
    #[must_use]
    pub fn new(transcriber: Arc<dyn Transcriber>, wake_phrase: &str, listen_window: Duration) -> Self {
        Self {
            transcriber,
            listen_window,
            shared: Arc::new(Shared {
                wake_phrase: RwLock::new(normalize_wake_phrase(wake_phrase)),
                handler: RwLock::new(None),
            }),
            running: Mutex::new(None),
        }
    }

    /// Check if the monitor is running
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.lock().is_ok_and(|r| r.is_some())
    }
}

#[async_trait]
impl WakeWordMonitor for MicrophoneWakeMonitor {
    async fn start_monitoring(&self) -> Result<()> {
        if self.is_running() {
            return Ok(());
        }

        let config = input_config()?;
        let (chunk_tx, chunk_rx) = mpsc::channel::<Vec<f32>>(CHUNK_QUEUE);
        let (ready_tx, ready_rx) = std::sync::mpsc::sync_channel::<Result<()>>(1);
        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = Arc::clone(&stop);

        let audio_thread = std::thread::Builder::new()
            .name("wake-monitor-audio".to_string())
            .spawn(move || {
                let stream = match open_input_stream(&config, move |data| {
                    // Drop audio rather than block the device callback
                    let _ = chunk_tx.try_send(data.to_vec());
                }) {
                    Ok(stream) => {
                        let _ = ready_tx.send(Ok(()));
                        stream
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                while !thread_stop.load(Ordering::Acquire) {
                    std::thread::sleep(Duration::from_millis(50));
                }

                drop(stream);
                tracing::debug!("wake monitor audio released");
            })?;

        tokio::task::spawn_blocking(move || ready_rx.recv())
            .await
            .map_err(|e| Error::WakeWord(e.to_string()))?
            .map_err(|_| Error::WakeWord("audio thread exited during startup".to_string()))??;

        let evaluator = tokio::spawn(run_evaluator(
            chunk_rx,
            Arc::clone(&self.transcriber),
            Arc::clone(&self.shared),
            self.listen_window,
        ));

        if let Ok(mut running) = self.running.lock() {
            *running = Some(Running {
                stop,
                audio_thread,
                evaluator,
            });
        }

        tracing::info!(wake_phrase = %self.shared.wake_phrase(), "wake word monitor started");
        Ok(())
    }

    async fn stop_monitoring(&self) {
        let running = self.running.lock().ok().and_then(|mut r| r.take());
        let Some(running) = running else {
            return;
        };

        running.stop.store(true, Ordering::Release);
        running.evaluator.abort();

        let joined = tokio::task::spawn_blocking(move || running.audio_thread.join()).await;
        if !matches!(joined, Ok(Ok(()))) {
            tracing::warn!("wake monitor audio thread did not shut down cleanly");
        }

        tracing::info!("wake word monitor stopped");
    }

    fn set_custom_wake_word(&self, phrase: &str) {
        if let Ok(mut current) = self.shared.wake_phrase.write() {
            *current = normalize_wake_phrase(phrase);
        }
    }

    fn on_state_change(&self, handler: StateHandler) {
        if let Ok(mut current) = self.shared.handler.write() {
            *current = Some(handler);
        }
    }
}

/// Listening window opened by a wake phrase
struct ActivationWindow {
    deadline: Instant,
    heard_speech: bool,
}

/// Consume audio chunks until the sender goes away
async fn run_evaluator(
    mut chunks: mpsc::Receiver<Vec<f32>>,
    transcriber: Arc<dyn Transcriber>,
    shared: Arc<Shared>,
    listen_window: Duration,
) {
    let mut detector = WakeWordDetector::new(&shared.wake_phrase());
    let mut window: Option<ActivationWindow> = None;

    loop {
        let next = match &window {
            Some(w) => tokio::time::timeout_at(w.deadline, chunks.recv()).await,
            None => Ok(chunks.recv().await),
        };

        let samples = match next {
            Ok(Some(samples)) => samples,
            Ok(None) => break,
            Err(_) => {
                // Window elapsed; only report standby if nothing was said
                if window.take().is_some_and(|w| !w.heard_speech) {
                    tracing::debug!("listening window timed out");
                    shared.emit(ListeningState::Standby);
                }
                detector.reset();
                continue;
            }
        };

        // Pick up phrase changes without a restart
        detector.set_wake_phrase(&shared.wake_phrase());

        if let Some(w) = window.as_mut() {
            if calculate_energy(&samples) > SPEECH_ENERGY_THRESHOLD {
                w.heard_speech = true;
            }
        }

        let Some(candidate) = detector.process(&samples) else {
            continue;
        };
        if candidate.len() < MIN_CANDIDATE_SAMPLES {
            continue;
        }

        tracing::debug!(samples = candidate.len(), "checking for wake word");
        let segment = AudioSegment::new(candidate, SAMPLE_RATE);
        match transcriber.transcribe(&segment).await {
            Ok(result) if detector.matches(&result.text) => {
                tracing::info!(transcript = %result.text, "wake word detected");
                shared.emit(ListeningState::Active);
                window = Some(ActivationWindow {
                    deadline: Instant::now() + listen_window,
                    heard_speech: false,
                });
            }
            Ok(result) => {
                tracing::trace!(transcript = %result.text, "no wake word");
            }
            Err(e) => {
                tracing::warn!(error = %e, "wake word verification failed");
            }
        }
    }

    tracing::debug!("wake word evaluator finished");
}
