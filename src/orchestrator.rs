//! Voice interaction state machine
//!
//! The wake word monitor talks to the orchestrator only through the
//! registered state handler, which forwards events into a channel. A single
//! worker task consumes that channel and runs at most one pipeline at a
//! time; wake events that arrive while a pipeline is running are dropped
//! and counted, never queued.
//!
//! ```text
//!   Idle ──start()──▶ Standby ◀──────────────┐
//!                       │                    │ pipeline done
//!                  ACTIVE event              │
//!                       ▼                    │
//!                   Processing ──────────────┘
//!
//!   any state ──stop()──▶ Stopped
//! ```

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{Mutex, RwLock, mpsc, watch};
use tokio::task::JoinHandle;

use crate::language::{Language, ListeningState, ModelMode};
use crate::pipeline::{Engines, Pipeline};
use crate::session::Session;
use crate::stats::{PipelineStats, StatsSnapshot};
use crate::voice::{AudioPlayback, LanguageDetector, WakeWordMonitor};
use crate::{Error, Result};

/// Lifecycle state of the orchestrator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OrchestratorState {
    /// Constructed, monitor not yet started
    Idle,
    /// Monitoring, no pipeline running
    Standby,
    /// A pipeline is running for one wake event
    Processing,
    /// Terminal; monitor and playback released
    Stopped,
}

impl fmt::Display for OrchestratorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Standby => write!(f, "standby"),
            Self::Processing => write!(f, "processing"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

/// Owns the session and turns wake events into pipeline runs
pub struct VoiceOrchestrator {
    session: Arc<RwLock<Session>>,
    pipeline: Arc<Pipeline>,
    monitor: Arc<dyn WakeWordMonitor>,
    detector: Arc<dyn LanguageDetector>,
    playback: Arc<dyn AudioPlayback>,
    state: Arc<watch::Sender<OrchestratorState>>,
    stats: Arc<PipelineStats>,
    worker: Mutex<Option<JoinHandle<()>>>,
    /// Held across `start` and `stop` so neither sees the other half done
    lifecycle: Mutex<()>,
}

impl VoiceOrchestrator {
    /// Create an orchestrator for `session`
    ///
    /// The session's wake phrase and language override are pushed to the
    /// monitor and detector right away.
    #[must_use]
    pub fn new(session: Session, engines: Engines, monitor: Arc<dyn WakeWordMonitor>) -> Self {
        Self::with_capture_timeout(session, engines, monitor, crate::pipeline::CAPTURE_TIMEOUT)
    }

    /// Create an orchestrator with a custom per-utterance capture timeout
    #[must_use]
    pub fn with_capture_timeout(
        session: Session,
        engines: Engines,
        monitor: Arc<dyn WakeWordMonitor>,
        capture_timeout: Duration,
    ) -> Self {
        monitor.set_custom_wake_word(&session.active_wake_phrase);
        if let Some(language) = session.language_override {
            engines.detector.override_language(language);
        }

        let stats = Arc::new(PipelineStats::default());
        let detector = Arc::clone(&engines.detector);
        let playback = Arc::clone(&engines.playback);
        let pipeline = Pipeline::new(engines, Arc::clone(&stats)).with_capture_timeout(capture_timeout);
        let (state, _) = watch::channel(OrchestratorState::Idle);

        tracing::debug!(user = %session.user_id, "voice orchestrator created");

        Self {
            session: Arc::new(RwLock::new(session)),
            pipeline: Arc::new(pipeline),
            monitor,
            detector,
            playback,
            state: Arc::new(state),
            stats,
            worker: Mutex::new(None),
            lifecycle: Mutex::new(()),
        }
    }

    /// Register with the monitor and begin listening for the wake phrase
    ///
    /// # Errors
    ///
    /// Returns error if not idle or if the monitor cannot start
    pub async fn start(&self) -> Result<()> {
        let _lifecycle = self.lifecycle.lock().await;
        let started = self.state.send_if_modified(|state| {
            if *state == OrchestratorState::Idle {
                *state = OrchestratorState::Standby;
                true
            } else {
                false
            }
        });
        if !started {
            let current = *self.state.borrow();
            return Err(Error::Voice(format!("cannot start from {current} state")));
        }

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        self.monitor.on_state_change(Arc::new(move |state| {
            // Receiver is gone once the worker has exited
            let _ = events_tx.send(state);
        }));

        let worker = Worker {
            pipeline: Arc::clone(&self.pipeline),
            session: Arc::clone(&self.session),
            state: Arc::clone(&self.state),
            stats: Arc::clone(&self.stats),
            events: events_rx,
        };
        *self.worker.lock().await = Some(tokio::spawn(worker.run()));

        if let Err(e) = self.monitor.start_monitoring().await {
            tracing::error!(error = %e, "failed to start wake word monitor");
            // Retire the worker, then allow another start attempt
            self.state.send_replace(OrchestratorState::Stopped);
            self.join().await;
            transition(&self.state, OrchestratorState::Stopped, OrchestratorState::Idle);
            return Err(e);
        }

        let wake_phrase = self.session.read().await.active_wake_phrase.clone();
        tracing::info!(wake_phrase, "listening for wake word");
        Ok(())
    }

    /// Stop monitoring and playback; idempotent
    ///
    /// Once this returns the monitor is not running and no new pipeline
    /// will start. A pipeline already running ends after its current stage.
    /// A `start` in progress completes first, then is undone.
    pub async fn stop(&self) {
        let _lifecycle = self.lifecycle.lock().await;
        let previous = self.state.send_replace(OrchestratorState::Stopped);
        if previous == OrchestratorState::Stopped {
            return;
        }

        self.monitor.stop_monitoring().await;
        self.playback.stop();
        tracing::info!(from = %previous, "voice orchestrator stopped");
    }

    /// Wait for the worker task to exit (after [`Self::stop`])
    pub async fn join(&self) {
        let handle = self.worker.lock().await.take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "voice worker ended abnormally");
            }
        }
    }

    /// Change the wake phrase; the monitor applies it on its next cycle
    pub async fn set_wake_word(&self, phrase: &str) {
        let mut session = self.session.write().await;
        session.set_wake_phrase(phrase);
        self.monitor.set_custom_wake_word(&session.active_wake_phrase);
        tracing::info!(wake_phrase = %session.active_wake_phrase, "wake word set");
    }

    /// Change the reply language; takes effect at the next synthesis
    pub async fn set_language_preference(&self, language: Language) {
        self.session.write().await.preferred_language = language;
        tracing::info!(%language, "language preference set");
    }

    /// Pin the input language for the rest of the session
    pub async fn override_language(&self, language: Language) {
        self.session.write().await.language_override = Some(language);
        self.detector.override_language(language);
        tracing::info!(%language, "language overridden");
    }

    /// Return to per-utterance language detection
    pub async fn clear_language_override(&self) {
        self.session.write().await.language_override = None;
        self.detector.clear_override();
        tracing::info!("language override cleared");
    }

    /// Record the engine mode for this session
    pub async fn set_model_mode(&self, mode: ModelMode) {
        self.session.write().await.model_mode = mode;
        tracing::info!(%mode, "model mode set");
    }

    /// Copy of the current session
    pub async fn session(&self) -> Session {
        self.session.read().await.clone()
    }

    /// Current lifecycle state
    #[must_use]
    pub fn state(&self) -> OrchestratorState {
        *self.state.borrow()
    }

    /// Watch lifecycle state changes
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<OrchestratorState> {
        self.state.subscribe()
    }

    /// Pipeline counters
    #[must_use]
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }
}

/// Single consumer of monitor events
struct Worker {
    pipeline: Arc<Pipeline>,
    session: Arc<RwLock<Session>>,
    state: Arc<watch::Sender<OrchestratorState>>,
    stats: Arc<PipelineStats>,
    events: mpsc::UnboundedReceiver<ListeningState>,
}

impl Worker {
    async fn run(self) {
        let Self {
            pipeline,
            session,
            state,
            stats,
            mut events,
        } = self;

        loop {
            let event = tokio::select! {
                event = events.recv() => event,
                () = wait_stopped(state.subscribe()) => None,
            };
            let Some(event) = event else {
                break;
            };

            match event {
                ListeningState::Standby => {
                    tracing::info!("listening window timed out");
                }
                ListeningState::Active => {
                    if !transition(&state, OrchestratorState::Standby, OrchestratorState::Processing) {
                        // Only a stop can get here
                        tracing::debug!("wake event after stop ignored");
                        break;
                    }
                    tracing::info!("wake word heard");

                    let is_stopped = || *state.borrow() == OrchestratorState::Stopped;
                    let run = pipeline.run(&session, &is_stopped);
                    tokio::pin!(run);

                    loop {
                        tokio::select! {
                            biased;
                            _ = &mut run => break,
                            Some(event) = events.recv() => busy_drop(&stats, event),
                        }
                    }

                    // Events queued right up to the return to standby are dropped too
                    while let Ok(event) = events.try_recv() {
                        busy_drop(&stats, event);
                    }

                    transition(&state, OrchestratorState::Processing, OrchestratorState::Standby);
                }
            }
        }

        tracing::debug!("voice worker exited");
    }
}

/// Move `from` → `to`, failing if the state is anything else
fn transition(
    state: &watch::Sender<OrchestratorState>,
    from: OrchestratorState,
    to: OrchestratorState,
) -> bool {
    state.send_if_modified(|current| {
        if *current == from {
            *current = to;
            true
        } else {
            false
        }
    })
}

fn busy_drop(stats: &PipelineStats, event: ListeningState) {
    if event == ListeningState::Active {
        stats.busy_drop();
        tracing::debug!("wake event dropped: pipeline busy");
    } else {
        tracing::debug!(%event, "state event during pipeline ignored");
    }
}

async fn wait_stopped(mut rx: watch::Receiver<OrchestratorState>) {
    let _ = rx.wait_for(|s| *s == OrchestratorState::Stopped).await;
}
