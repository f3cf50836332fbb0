//! Voice pipeline: capture → detect language → transcribe → dispatch →
//! synthesize → play
//!
//! One run per wake event, strictly sequential. Every fault is contained
//! here and reported as a [`PipelineOutcome`]; nothing escapes to the
//! orchestrator.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::RwLock;
use tracing::Instrument;
use uuid::Uuid;

use crate::dispatch::{CommandDispatcher, DispatchFailure, DispatchReply};
use crate::session::Session;
use crate::stats::PipelineStats;
use crate::voice::{
    AudioCapture, AudioPlayback, LanguageDetector, PlaybackOutcome, SynthesizedSpeech,
    Synthesizer, Transcriber,
};

/// Longest utterance captured per wake event
pub const CAPTURE_TIMEOUT: Duration = Duration::from_millis(5000);

/// How often playback checks whether the orchestrator stopped
const STOP_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Spoken when the command backend cannot be reached
pub const FALLBACK_REPLY: &str = "System offline.";

/// Faults the pipeline recovers from locally
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum VoiceFault {
    /// No usable audio was captured
    #[error("no usable audio captured")]
    CaptureEmpty,

    /// The engine returned no confident text
    #[error("could not transcribe")]
    TranscriptionEmpty,

    /// The command backend failed
    #[error("command dispatch failed: {0}")]
    DispatchFailure(DispatchFailure),

    /// `stop()` interrupted playback
    #[error("playback interrupted")]
    PlaybackInterrupted,
}

/// How one pipeline run ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineOutcome {
    /// A reply was spoken in full
    Responded {
        /// Text that was spoken
        reply: String,
        /// True when the reply is the offline fallback
        dispatch_failed: bool,
    },
    /// Capture yielded nothing; no further stage ran
    CaptureEmpty,
    /// Transcription yielded nothing; nothing was dispatched or spoken
    TranscriptionEmpty,
    /// The reply could not be synthesized
    SynthesisFailed,
    /// The reply could not be played
    PlaybackFailed,
    /// Playback was cut short by `stop()`
    Interrupted,
    /// The orchestrator stopped between stages
    Cancelled,
}

/// Engines the pipeline drives
#[derive(Clone)]
pub struct Engines {
    pub capture: Arc<dyn AudioCapture>,
    pub detector: Arc<dyn LanguageDetector>,
    pub transcriber: Arc<dyn Transcriber>,
    pub dispatcher: Arc<dyn CommandDispatcher>,
    pub synthesizer: Arc<dyn Synthesizer>,
    pub playback: Arc<dyn AudioPlayback>,
}

/// Runs the sequential voice pipeline
pub struct Pipeline {
    engines: Engines,
    capture_timeout: Duration,
    stats: Arc<PipelineStats>,
}

impl Pipeline {
    /// Create a pipeline over `engines`
    #[must_use]
    pub fn new(engines: Engines, stats: Arc<PipelineStats>) -> Self {
        Self {
            engines,
            capture_timeout: CAPTURE_TIMEOUT,
            stats,
        }
    }

    /// Override the capture timeout
    #[must_use]
    pub const fn with_capture_timeout(mut self, timeout: Duration) -> Self {
        self.capture_timeout = timeout;
        self
    }

    /// Engines driven by this pipeline
    #[must_use]
    pub const fn engines(&self) -> &Engines {
        &self.engines
    }

    /// Run once for a wake event
    ///
    /// `is_stopped` is consulted between stages; once it returns true no
    /// further stage starts.
    pub async fn run(
        &self,
        session: &RwLock<Session>,
        is_stopped: &(dyn Fn() -> bool + Send + Sync),
    ) -> PipelineOutcome {
        let run_id = Uuid::new_v4();
        self.stats.run_started();

        let outcome = self
            .run_stages(session, is_stopped)
            .instrument(tracing::info_span!("pipeline", %run_id))
            .await;

        match &outcome {
            PipelineOutcome::CaptureEmpty => self.stats.capture_empty(),
            PipelineOutcome::TranscriptionEmpty => self.stats.transcription_empty(),
            PipelineOutcome::Interrupted => self.stats.playback_interrupted(),
            PipelineOutcome::SynthesisFailed | PipelineOutcome::PlaybackFailed => {
                self.stats.engine_failure();
            }
            PipelineOutcome::Responded { .. } | PipelineOutcome::Cancelled => {}
        }
        self.stats.run_completed();

        tracing::debug!(%run_id, ?outcome, "pipeline finished");
        outcome
    }

    async fn run_stages(
        &self,
        session: &RwLock<Session>,
        is_stopped: &(dyn Fn() -> bool + Send + Sync),
    ) -> PipelineOutcome {
        tracing::info!("capturing audio");
        let mut segment = match self.engines.capture.capture(self.capture_timeout).await {
            Ok(segment) if !segment.is_empty() => segment,
            Ok(_) => {
                tracing::info!(fault = %VoiceFault::CaptureEmpty, "nothing to process");
                return PipelineOutcome::CaptureEmpty;
            }
            Err(e) => {
                tracing::warn!(error = %e, fault = %VoiceFault::CaptureEmpty, "capture failed");
                return PipelineOutcome::CaptureEmpty;
            }
        };
        if is_stopped() {
            return PipelineOutcome::Cancelled;
        }

        // Input language: override > per-utterance detection > preferred
        let (language_override, preferred) = {
            let session = session.read().await;
            (session.language_override, session.preferred_language)
        };
        let language = match language_override {
            Some(language) => {
                tracing::debug!(%language, "using language override");
                language
            }
            None => match self.engines.detector.detect_from_audio(&segment.samples).await {
                Ok((language, confidence)) => {
                    tracing::info!(%language, confidence, "language detected");
                    language
                }
                Err(e) => {
                    tracing::warn!(error = %e, fallback = %preferred, "language detection failed");
                    preferred
                }
            },
        };
        segment.language = Some(language);
        if is_stopped() {
            return PipelineOutcome::Cancelled;
        }

        let transcript = match self.engines.transcriber.transcribe(&segment).await {
            Ok(result) if !result.is_empty() => result,
            Ok(result) => {
                tracing::info!(
                    confidence = result.confidence,
                    fault = %VoiceFault::TranscriptionEmpty,
                    "could not transcribe"
                );
                return PipelineOutcome::TranscriptionEmpty;
            }
            Err(e) => {
                tracing::warn!(error = %e, fault = %VoiceFault::TranscriptionEmpty, "could not transcribe");
                return PipelineOutcome::TranscriptionEmpty;
            }
        };
        drop(segment);
        tracing::info!(
            transcript = %transcript.text,
            confidence = transcript.confidence,
            "transcription"
        );
        if is_stopped() {
            return PipelineOutcome::Cancelled;
        }

        let (reply, dispatch_failed) = match self.engines.dispatcher.dispatch(&transcript.text).await {
            DispatchReply::Reply(text) => (text, false),
            DispatchReply::Failure(failure) => {
                let fault = VoiceFault::DispatchFailure(failure);
                tracing::warn!(%fault, "using fallback reply");
                self.stats.dispatch_failure();
                (FALLBACK_REPLY.to_string(), true)
            }
        };
        if is_stopped() {
            return PipelineOutcome::Cancelled;
        }

        // Replies use the session's language, read as late as possible
        let reply_language = session.read().await.preferred_language;
        tracing::info!(reply = %reply, language = %reply_language, "responding");
        let speech = match self.engines.synthesizer.synthesize(&reply, reply_language).await {
            Ok(speech) => speech,
            Err(e) => {
                tracing::error!(error = %e, "speech synthesis failed");
                return PipelineOutcome::SynthesisFailed;
            }
        };
        if is_stopped() {
            return PipelineOutcome::Cancelled;
        }

        tracing::debug!(duration_ms = speech.duration_ms, "playing reply");
        match self.play_until_stopped(&speech, is_stopped).await {
            Ok(PlaybackOutcome::Completed) => PipelineOutcome::Responded {
                reply,
                dispatch_failed,
            },
            Ok(PlaybackOutcome::Interrupted) => {
                tracing::debug!(fault = %VoiceFault::PlaybackInterrupted, "reply cut short");
                PipelineOutcome::Interrupted
            }
            Err(e) => {
                tracing::error!(error = %e, "playback failed");
                PipelineOutcome::PlaybackFailed
            }
        }
    }

    /// Play `speech`, interrupting it if a stop lands after playback began
    ///
    /// A stop raised between the last stage check and the start of the clip
    /// would otherwise be missed by the playback engine.
    async fn play_until_stopped(
        &self,
        speech: &SynthesizedSpeech,
        is_stopped: &(dyn Fn() -> bool + Send + Sync),
    ) -> crate::Result<PlaybackOutcome> {
        let playback = &self.engines.playback;
        let play = playback.play(speech);
        tokio::pin!(play);

        let mut stop_sent = false;
        loop {
            tokio::select! {
                biased;
                result = &mut play => return result,
                () = tokio::time::sleep(STOP_POLL_INTERVAL) => {
                    if !stop_sent && is_stopped() {
                        playback.stop();
                        stop_sent = true;
                    }
                }
            }
        }
    }
}
