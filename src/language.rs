//! Shared voice vocabulary: spoken languages, listening states, model modes

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::Error;

/// Languages the voice front end can hear and speak
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "&'static str")]
pub enum Language {
    #[default]
    English,
    Spanish,
    French,
    German,
    Italian,
    Portuguese,
    Hindi,
    Japanese,
    Chinese,
    Korean,
    Arabic,
    Russian,
}

impl Language {
    /// Every supported language
    pub const ALL: [Self; 12] = [
        Self::English,
        Self::Spanish,
        Self::French,
        Self::German,
        Self::Italian,
        Self::Portuguese,
        Self::Hindi,
        Self::Japanese,
        Self::Chinese,
        Self::Korean,
        Self::Arabic,
        Self::Russian,
    ];

    /// ISO 639-1 code
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::English => "en",
            Self::Spanish => "es",
            Self::French => "fr",
            Self::German => "de",
            Self::Italian => "it",
            Self::Portuguese => "pt",
            Self::Hindi => "hi",
            Self::Japanese => "ja",
            Self::Chinese => "zh",
            Self::Korean => "ko",
            Self::Arabic => "ar",
            Self::Russian => "ru",
        }
    }

    /// English display name
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::English => "English",
            Self::Spanish => "Spanish",
            Self::French => "French",
            Self::German => "German",
            Self::Italian => "Italian",
            Self::Portuguese => "Portuguese",
            Self::Hindi => "Hindi",
            Self::Japanese => "Japanese",
            Self::Chinese => "Chinese",
            Self::Korean => "Korean",
            Self::Arabic => "Arabic",
            Self::Russian => "Russian",
        }
    }

    /// Look up a language by ISO code (region subtags are ignored) or English name
    #[must_use]
    pub fn from_code(input: &str) -> Option<Self> {
        let normalized = input.trim().to_lowercase();
        let primary = normalized
            .split(['-', '_'])
            .next()
            .unwrap_or_default();

        Self::ALL
            .into_iter()
            .find(|lang| lang.code() == primary || lang.name().eq_ignore_ascii_case(&normalized))
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Language {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_code(s).ok_or_else(|| Error::Config(format!("unsupported language: {s}")))
    }
}

impl TryFrom<String> for Language {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Language> for &'static str {
    fn from(lang: Language) -> Self {
        lang.code()
    }
}

/// Listening state raised by the wake word monitor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ListeningState {
    /// Idle-listening for the wake phrase
    Standby,
    /// Wake phrase matched, an utterance is expected
    Active,
}

impl fmt::Display for ListeningState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Standby => write!(f, "standby"),
            Self::Active => write!(f, "active"),
        }
    }
}

/// Where speech engines run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelMode {
    /// Hosted STT/TTS providers
    #[default]
    Online,
    /// Local OpenAI-compatible speech server
    Offline,
}

impl fmt::Display for ModelMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Online => write!(f, "online"),
            Self::Offline => write!(f, "offline"),
        }
    }
}

impl FromStr for ModelMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "online" => Ok(Self::Online),
            "offline" => Ok(Self::Offline),
            other => Err(Error::Config(format!("unknown model mode: {other}"))),
        }
    }
}
