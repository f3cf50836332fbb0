//! Voice processing module
//!
//! Engine contracts used by the orchestrator plus the concrete engines:
//! microphone capture, wake word monitoring, language identification,
//! STT, TTS and speaker playback.
//!
//! Every engine sits behind a trait so the orchestration logic can run
//! against test doubles without audio hardware or network access.

mod capture;
mod language_id;
mod monitor;
mod playback;
mod stt;
mod tts;
mod wake_word;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

pub use capture::{MicrophoneCapture, SAMPLE_RATE, calculate_energy, samples_to_wav};
pub use language_id::SttLanguageDetector;
pub use monitor::MicrophoneWakeMonitor;
pub use playback::SpeakerPlayback;
pub use stt::SpeechToText;
pub use tts::{TextToSpeech, decode_mp3};
pub use wake_word::{DetectorState, WakeWordDetector};

use crate::Result;
use crate::language::{Language, ListeningState};

/// One bounded audio capture
#[derive(Debug, Clone, Default)]
pub struct AudioSegment {
    /// Mono f32 samples in [-1.0, 1.0]
    pub samples: Vec<f32>,
    /// Samples per second
    pub sample_rate: u32,
    /// Wall-clock length of the recording
    pub duration: Duration,
    /// Spoken language, filled in after detection
    pub language: Option<Language>,
}

impl AudioSegment {
    /// Build a segment from samples, deriving its duration
    #[must_use]
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        let duration = samples_duration(samples.len(), sample_rate);
        Self {
            samples,
            sample_rate,
            duration,
            language: None,
        }
    }

    /// A segment holding no audio
    #[must_use]
    pub const fn empty(sample_rate: u32) -> Self {
        Self {
            samples: Vec::new(),
            sample_rate,
            duration: Duration::ZERO,
            language: None,
        }
    }

    /// True when the capture yielded no usable audio
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Text recognized from a segment
#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptionResult {
    /// Recognized text; empty when nothing usable was heard
    pub text: String,
    /// Engine confidence in [0, 1]
    pub confidence: f32,
}

impl TranscriptionResult {
    /// Build a result, trimming text and clamping confidence
    #[must_use]
    pub fn new(text: impl AsRef<str>, confidence: f32) -> Self {
        let confidence = if confidence.is_nan() {
            0.0
        } else {
            confidence.clamp(0.0, 1.0)
        };

        Self {
            text: text.as_ref().trim().to_string(),
            confidence,
        }
    }

    /// A result carrying no text
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            text: String::new(),
            confidence: 0.0,
        }
    }

    /// True when no text was recognized
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }
}

/// Playable reply audio
#[derive(Debug, Clone, Default)]
pub struct SynthesizedSpeech {
    /// Mono f32 samples
    pub samples: Vec<f32>,
    /// Samples per second
    pub sample_rate: u32,
    /// Clip length in milliseconds
    pub duration_ms: u64,
}

impl SynthesizedSpeech {
    /// Build a clip from samples, deriving its duration
    #[must_use]
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        #[allow(clippy::cast_possible_truncation)]
        let duration_ms = samples_duration(samples.len(), sample_rate).as_millis() as u64;
        Self {
            samples,
            sample_rate,
            duration_ms,
        }
    }
}

/// How a playback call ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackOutcome {
    /// The whole clip was played
    Completed,
    /// `stop()` cut the clip short
    Interrupted,
}

/// Callback invoked on listening state transitions
pub type StateHandler = Arc<dyn Fn(ListeningState) + Send + Sync>;

/// Records a bounded audio segment on demand
#[async_trait]
pub trait AudioCapture: Send + Sync {
    /// Record up to `timeout` of audio
    ///
    /// Returns an empty segment on silence instead of failing.
    ///
    /// # Errors
    ///
    /// Returns error if the input device cannot be used
    async fn capture(&self, timeout: Duration) -> Result<AudioSegment>;
}

/// Infers the spoken language of captured audio
#[async_trait]
pub trait LanguageDetector: Send + Sync {
    /// Detect the language of `samples`, returning it with a confidence in [0, 1]
    ///
    /// # Errors
    ///
    /// Returns error if identification fails
    async fn detect_from_audio(&self, samples: &[f32]) -> Result<(Language, f32)>;

    /// Stick to `language` for the rest of the session
    fn override_language(&self, language: Language);

    /// Return to per-utterance detection
    fn clear_override(&self);
}

/// Converts a language-tagged segment into text
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Transcribe `segment` using its assigned language
    ///
    /// # Errors
    ///
    /// Returns error if the engine fails
    async fn transcribe(&self, segment: &AudioSegment) -> Result<TranscriptionResult>;
}

/// Converts reply text into playable audio
#[async_trait]
pub trait Synthesizer: Send + Sync {
    /// Speak `text` in `language`
    ///
    /// # Errors
    ///
    /// Returns error if synthesis fails
    async fn synthesize(&self, text: &str, language: Language) -> Result<SynthesizedSpeech>;
}

/// Plays synthesized speech
#[async_trait]
pub trait AudioPlayback: Send + Sync {
    /// Play `speech`, resolving when it finishes or is interrupted
    ///
    /// # Errors
    ///
    /// Returns error if the output device cannot be used
    async fn play(&self, speech: &SynthesizedSpeech) -> Result<PlaybackOutcome>;

    /// Interrupt the clip currently playing
    fn stop(&self);
}

/// Continuously watches for the wake phrase
#[async_trait]
pub trait WakeWordMonitor: Send + Sync {
    /// Begin background listening
    ///
    /// # Errors
    ///
    /// Returns error if the monitor cannot start
    async fn start_monitoring(&self) -> Result<()>;

    /// Halt listening and release audio resources
    async fn stop_monitoring(&self);

    /// Replace the trigger phrase; applies on the next evaluation cycle
    fn set_custom_wake_word(&self, phrase: &str);

    /// Register the single state change handler, replacing any previous one
    fn on_state_change(&self, handler: StateHandler);
}

/// Duration of `len` samples at `sample_rate`
#[must_use]
pub fn samples_duration(len: usize, sample_rate: u32) -> Duration {
    if sample_rate == 0 {
        return Duration::ZERO;
    }
    Duration::from_micros(len as u64 * 1_000_000 / u64::from(sample_rate))
}
