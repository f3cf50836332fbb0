//! Wake word detection
//!
//! Energy gating finds candidate speech segments locally; the monitor then
//! transcribes each segment and checks it for the wake phrase.

use super::capture::{SPEECH_ENERGY_THRESHOLD, calculate_energy};
use crate::session::normalize_wake_phrase;

/// Minimum duration of speech to consider (in samples at 16kHz)
const MIN_SPEECH_SAMPLES: usize = 4800; // 0.3 seconds

/// Silence duration to consider end of a segment (in samples)
const SILENCE_SAMPLES: usize = 8000; // 0.5 seconds

/// Longest segment kept before it is forced out (in samples)
const MAX_SEGMENT_SAMPLES: usize = 16000 * 4;

/// State of the wake word detector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectorState {
    /// Waiting for speech
    Idle,
    /// Detected potential speech, accumulating
    Listening,
}

/// Segments speech and matches transcripts against the wake phrase
#[derive(Debug)]
pub struct WakeWordDetector {
    wake_phrase: String,
    state: DetectorState,
    speech_buffer: Vec<f32>,
    silence_counter: usize,
}

impl WakeWordDetector {
    /// Create a detector for `wake_phrase` (e.g. "hey dev")
    #[must_use]
    pub fn new(wake_phrase: &str) -> Self {
        let wake_phrase = normalize_wake_phrase(wake_phrase);
        tracing::debug!(wake_phrase, "wake word detector initialized");

        Self {
            wake_phrase,
            state: DetectorState::Idle,
            speech_buffer: Vec::new(),
            silence_counter: 0,
        }
    }

    /// Feed audio samples
    ///
    /// Returns a complete speech segment once enough speech has been
    /// followed by silence. The detector is back to idle afterwards.
    pub fn process(&mut self, samples: &[f32]) -> Option<Vec<f32>> {
        let energy = calculate_energy(samples);
        let is_speech = energy > SPEECH_ENERGY_THRESHOLD;

        match self.state {
            DetectorState::Idle => {
                if is_speech {
                    self.state = DetectorState::Listening;
                    self.speech_buffer.clear();
                    self.speech_buffer.extend_from_slice(samples);
                    self.silence_counter = 0;
                    tracing::trace!(energy, "speech detected, listening");
                }
                None
            }
            DetectorState::Listening => {
                self.speech_buffer.extend_from_slice(samples);

                if is_speech {
                    self.silence_counter = 0;
                } else {
                    self.silence_counter += samples.len();
                }

                let complete = self.silence_counter > SILENCE_SAMPLES
                    && self.speech_buffer.len() > MIN_SPEECH_SAMPLES;
                if complete || self.speech_buffer.len() >= MAX_SEGMENT_SAMPLES {
                    tracing::debug!(samples = self.speech_buffer.len(), "speech segment complete");
                    let segment = std::mem::take(&mut self.speech_buffer);
                    self.reset();
                    return Some(segment);
                }

                // Too much silence without enough speech
                if self.silence_counter > SILENCE_SAMPLES * 2 {
                    tracing::trace!("timeout - resetting");
                    self.reset();
                }
                None
            }
        }
    }

    /// Check whether a transcript contains the wake phrase
    #[must_use]
    pub fn matches(&self, transcript: &str) -> bool {
        if self.wake_phrase.is_empty() {
            return false;
        }
        let normalized = normalize_transcript(transcript);
        normalized.contains(&normalize_transcript(&self.wake_phrase))
    }

    /// Replace the wake phrase
    pub fn set_wake_phrase(&mut self, phrase: &str) {
        let phrase = normalize_wake_phrase(phrase);
        if phrase != self.wake_phrase {
            tracing::info!(wake_phrase = %phrase, "wake phrase updated");
            self.wake_phrase = phrase;
        }
    }

    /// Get the configured wake phrase
    #[must_use]
    pub fn wake_phrase(&self) -> &str {
        &self.wake_phrase
    }

    /// Get the accumulated speech buffer
    #[must_use]
    pub fn speech_buffer(&self) -> &[f32] {
        &self.speech_buffer
    }

    /// Reset detector to idle state
    pub fn reset(&mut self) {
        self.state = DetectorState::Idle;
        self.speech_buffer.clear();
        self.silence_counter = 0;
    }

    /// Get current state
    #[must_use]
    pub const fn state(&self) -> DetectorState {
        self.state
    }
}

/// Lowercase and strip punctuation so "Hey, Dev!" matches "hey dev"
fn normalize_transcript(text: &str) -> String {
    text.to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}
