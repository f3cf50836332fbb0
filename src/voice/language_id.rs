//! Spoken language identification

use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use super::capture::{SAMPLE_RATE, samples_to_wav};
use super::stt::SpeechToText;
use super::LanguageDetector;
use crate::language::Language;
use crate::{Error, Result};

/// Identifies languages with the STT engine's language-ID output
///
/// A sticky override, once set, short-circuits detection entirely.
pub struct SttLanguageDetector {
    stt: Arc<SpeechToText>,
    override_language: Mutex<Option<Language>>,
}

impl SttLanguageDetector {
    /// Create a detector backed by `stt`
    #[must_use]
    pub const fn new(stt: Arc<SpeechToText>) -> Self {
        Self {
            stt,
            override_language: Mutex::new(None),
        }
    }

    /// Current override, if any
    #[must_use]
    pub fn current_override(&self) -> Option<Language> {
        self.override_language.lock().ok().and_then(|o| *o)
    }
}

#[async_trait]
impl LanguageDetector for SttLanguageDetector {
    async fn detect_from_audio(&self, samples: &[f32]) -> Result<(Language, f32)> {
        if let Some(language) = self.current_override() {
            return Ok((language, 1.0));
        }

        let wav = samples_to_wav(samples, SAMPLE_RATE)?;
        let (label, confidence) = self.stt.identify_language(&wav).await?;

        let language = Language::from_code(&label).ok_or_else(|| {
            Error::LanguageDetection(format!("unsupported language reported: {label}"))
        })?;

        tracing::debug!(%language, confidence, "language identified");
        Ok((language, confidence.clamp(0.0, 1.0)))
    }

    fn override_language(&self, language: Language) {
        if let Ok(mut current) = self.override_language.lock() {
            *current = Some(language);
        }
    }

    fn clear_override(&self) {
        if let Ok(mut current) = self.override_language.lock() {
            *current = None;
        }
    }
}
