//! Per-user voice session preferences

use serde::Serialize;

use crate::language::{Language, ModelMode};

/// Long-lived context holding a user's language and wake word preferences
///
/// Owned by the orchestrator for its whole lifetime. Only explicit
/// preference-setting calls mutate it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Session {
    /// User this session belongs to
    pub user_id: String,
    /// Language replies are spoken in
    pub preferred_language: Language,
    /// Normalized wake phrase
    pub active_wake_phrase: String,
    /// Whether speech engines run hosted or locally
    pub model_mode: ModelMode,
    /// Sticky input language that bypasses per-utterance detection
    pub language_override: Option<Language>,
}

impl Session {
    /// Create a session with default preferences
    #[must_use]
    pub fn new(user_id: impl Into<String>, wake_phrase: &str) -> Self {
        Self {
            user_id: user_id.into(),
            preferred_language: Language::default(),
            active_wake_phrase: normalize_wake_phrase(wake_phrase),
            model_mode: ModelMode::default(),
            language_override: None,
        }
    }

    /// Set the reply language
    #[must_use]
    pub const fn with_preferred_language(mut self, language: Language) -> Self {
        self.preferred_language = language;
        self
    }

    /// Set the engine mode
    #[must_use]
    pub const fn with_model_mode(mut self, mode: ModelMode) -> Self {
        self.model_mode = mode;
        self
    }

    /// Set a sticky input language
    #[must_use]
    pub const fn with_language_override(mut self, language: Option<Language>) -> Self {
        self.language_override = language;
        self
    }

    /// Replace the wake phrase, normalizing it
    pub fn set_wake_phrase(&mut self, phrase: &str) {
        self.active_wake_phrase = normalize_wake_phrase(phrase);
    }
}

/// Trim and lowercase a wake phrase for matching
#[must_use]
pub fn normalize_wake_phrase(phrase: &str) -> String {
    phrase.trim().to_lowercase()
}
