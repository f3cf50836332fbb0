//! Configuration management for Herald

pub mod file;

use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;

use crate::language::{Language, ModelMode};
use crate::{Error, Result};

use file::HeraldConfigFile;

/// Default session user
pub const DEFAULT_USER_ID: &str = "user_demo";

/// Default wake phrase
pub const DEFAULT_WAKE_PHRASE: &str = "hey dev";

/// Default command backend endpoint
pub const DEFAULT_DISPATCH_URL: &str = "http://localhost:3001/api/command";

/// Default local engine server
pub const DEFAULT_OFFLINE_BASE_URL: &str = "http://localhost:8000";

/// Herald configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Session user identifier
    pub user_id: String,

    /// Voice configuration
    pub voice: VoiceConfig,

    /// Command backend configuration
    pub dispatch: DispatchConfig,

    /// API keys
    pub api_keys: ApiKeys,

    /// Local engine server used in offline mode
    pub offline: OfflineConfig,
}

/// Voice processing configuration
#[derive(Debug, Clone)]
pub struct VoiceConfig {
    /// Phrase that arms the pipeline
    pub wake_phrase: String,

    /// Language replies are spoken in
    pub language: Language,

    /// Input language pinned for the session
    pub override_language: Option<Language>,

    /// Hosted or local engines
    pub model_mode: ModelMode,

    /// Per-utterance capture limit
    pub capture_timeout: Duration,

    /// How long the monitor stays armed waiting for speech
    pub listen_window: Duration,

    /// STT provider for online mode
    pub stt_provider: SttProvider,

    /// STT model (e.g. "whisper-1", "nova-2")
    pub stt_model: String,

    /// TTS provider for online mode
    pub tts_provider: TtsProvider,

    /// TTS model (e.g. "tts-1", "eleven_multilingual_v2")
    pub tts_model: String,

    /// TTS voice identifier
    pub tts_voice: String,

    /// TTS speed multiplier (0.25 to 4.0)
    pub tts_speed: f32,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            wake_phrase: DEFAULT_WAKE_PHRASE.to_string(),
            language: Language::default(),
            override_language: None,
            model_mode: ModelMode::default(),
            capture_timeout: crate::pipeline::CAPTURE_TIMEOUT,
            listen_window: Duration::from_secs(8),
            stt_provider: SttProvider::default(),
            stt_model: "whisper-1".to_string(),
            tts_provider: TtsProvider::default(),
            tts_model: "tts-1".to_string(),
            tts_voice: "alloy".to_string(),
            tts_speed: 1.0,
        }
    }
}

/// Hosted STT provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SttProvider {
    #[default]
    Whisper,
    Deepgram,
}

impl FromStr for SttProvider {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "whisper" | "openai" => Ok(Self::Whisper),
            "deepgram" => Ok(Self::Deepgram),
            other => Err(Error::Config(format!("unknown STT provider: {other}"))),
        }
    }
}

/// Hosted TTS provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TtsProvider {
    #[default]
    OpenAi,
    ElevenLabs,
}

impl FromStr for TtsProvider {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "openai" => Ok(Self::OpenAi),
            "elevenlabs" => Ok(Self::ElevenLabs),
            other => Err(Error::Config(format!("unknown TTS provider: {other}"))),
        }
    }
}

/// Command backend configuration
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Endpoint receiving `POST {"command": ...}`
    pub url: String,

    /// Per-request timeout
    pub timeout: Duration,

    /// Optional bearer token
    pub api_token: Option<SecretString>,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_DISPATCH_URL.to_string(),
            timeout: Duration::from_secs(10),
            api_token: None,
        }
    }
}

/// API keys for external services
#[derive(Debug, Clone, Default)]
pub struct ApiKeys {
    /// `OpenAI` API key (for Whisper and TTS)
    pub openai: Option<SecretString>,

    /// `Deepgram` API key (optional STT)
    pub deepgram: Option<SecretString>,

    /// `ElevenLabs` API key (optional TTS)
    pub elevenlabs: Option<SecretString>,
}

/// Local OpenAI-compatible engine server
#[derive(Debug, Clone)]
pub struct OfflineConfig {
    pub base_url: String,
}

impl Default for OfflineConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_OFFLINE_BASE_URL.to_string(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            user_id: DEFAULT_USER_ID.to_string(),
            voice: VoiceConfig::default(),
            dispatch: DispatchConfig::default(),
            api_keys: ApiKeys::default(),
            offline: OfflineConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration (env > toml > default)
    ///
    /// # Errors
    ///
    /// Returns error if a language, mode or provider value is invalid
    pub fn load() -> Result<Self> {
        let fc = file::load_config_file();
        Self::from_sources(fc, |key| std::env::var(key).ok())
    }

    /// Build configuration from a parsed file and an environment lookup
    ///
    /// # Errors
    ///
    /// Returns error if a language, mode or provider value is invalid
    pub fn from_sources<F>(fc: HeraldConfigFile, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = VoiceConfig::default();
        let env = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let user_id = env("HERALD_USER_ID")
            .or(fc.user_id)
            .unwrap_or_else(|| DEFAULT_USER_ID.to_string());

        // API keys (env > toml > None)
        let api_keys = ApiKeys {
            openai: env("OPENAI_API_KEY")
                .or(fc.api_keys.openai)
                .map(SecretString::from),
            deepgram: env("DEEPGRAM_API_KEY")
                .or(fc.api_keys.deepgram)
                .map(SecretString::from),
            elevenlabs: env("ELEVENLABS_API_KEY")
                .or(fc.api_keys.elevenlabs)
                .map(SecretString::from),
        };

        // Voice config (env > toml > default)
        let fv = fc.voice;
        let language = env("HERALD_LANGUAGE")
            .or(fv.language)
            .map(|s| s.parse::<Language>())
            .transpose()?
            .unwrap_or(defaults.language);
        let override_language = env("HERALD_OVERRIDE_LANGUAGE")
            .or(fv.override_language)
            .map(|s| s.parse::<Language>())
            .transpose()?;
        let model_mode = env("HERALD_MODEL_MODE")
            .or(fv.model_mode)
            .map(|s| s.parse::<ModelMode>())
            .transpose()?
            .unwrap_or(defaults.model_mode);
        let stt_provider = env("HERALD_STT_PROVIDER")
            .or(fv.stt_provider)
            .map(|s| s.parse::<SttProvider>())
            .transpose()?
            .unwrap_or(defaults.stt_provider);
        let tts_provider = env("HERALD_TTS_PROVIDER")
            .or(fv.tts_provider)
            .map(|s| s.parse::<TtsProvider>())
            .transpose()?
            .unwrap_or(defaults.tts_provider);

        #[allow(clippy::cast_possible_truncation)]
        let tts_speed = fv
            .tts_speed
            .map_or(defaults.tts_speed, |s| (s as f32).clamp(0.25, 4.0));

        let voice = VoiceConfig {
            wake_phrase: env("HERALD_WAKE_WORD")
                .or(fv.wake_phrase)
                .unwrap_or(defaults.wake_phrase),
            language,
            override_language,
            model_mode,
            capture_timeout: fv
                .capture_timeout_ms
                .map_or(defaults.capture_timeout, Duration::from_millis),
            listen_window: fv
                .listen_window_secs
                .map_or(defaults.listen_window, Duration::from_secs),
            stt_provider,
            stt_model: env("HERALD_STT_MODEL")
                .or(fv.stt_model)
                .unwrap_or(defaults.stt_model),
            tts_provider,
            tts_model: env("HERALD_TTS_MODEL")
                .or(fv.tts_model)
                .unwrap_or(defaults.tts_model),
            tts_voice: env("HERALD_TTS_VOICE")
                .or(fv.tts_voice)
                .unwrap_or(defaults.tts_voice),
            tts_speed,
        };

        // Command backend (env > toml > default)
        let dispatch = DispatchConfig {
            url: env("HERALD_DISPATCH_URL")
                .or(fc.dispatch.url)
                .unwrap_or_else(|| DEFAULT_DISPATCH_URL.to_string()),
            timeout: env("HERALD_DISPATCH_TIMEOUT")
                .and_then(|s| s.parse().ok())
                .or(fc.dispatch.timeout_secs)
                .map_or(DispatchConfig::default().timeout, Duration::from_secs),
            api_token: env("HERALD_DISPATCH_TOKEN")
                .or(fc.dispatch.api_token)
                .map(SecretString::from),
        };

        let offline = OfflineConfig {
            base_url: env("HERALD_OFFLINE_URL")
                .or(fc.offline.base_url)
                .unwrap_or_else(|| DEFAULT_OFFLINE_BASE_URL.to_string()),
        };

        Ok(Self {
            user_id,
            voice,
            dispatch,
            api_keys,
            offline,
        })
    }

    /// Check that online engines have the keys they need
    ///
    /// # Errors
    ///
    /// Returns error naming the first missing key
    pub fn validate(&self) -> Result<()> {
        if self.voice.model_mode == ModelMode::Offline {
            return Ok(());
        }

        let stt_key = match self.voice.stt_provider {
            SttProvider::Whisper => ("OPENAI_API_KEY", &self.api_keys.openai),
            SttProvider::Deepgram => ("DEEPGRAM_API_KEY", &self.api_keys.deepgram),
        };
        let tts_key = match self.voice.tts_provider {
            TtsProvider::OpenAi => ("OPENAI_API_KEY", &self.api_keys.openai),
            TtsProvider::ElevenLabs => ("ELEVENLABS_API_KEY", &self.api_keys.elevenlabs),
        };

        for (name, key) in [stt_key, tts_key] {
            if key.is_none() {
                return Err(Error::Config(format!(
                    "{name} is required in online mode (or run with --offline)"
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use secrecy::ExposeSecret;

    use super::*;

    fn env_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_sources(HeraldConfigFile::default(), env_from(&[])).unwrap();

        assert_eq!(config.user_id, "user_demo");
        assert_eq!(config.voice.wake_phrase, "hey dev");
        assert_eq!(config.voice.language, Language::English);
        assert_eq!(config.voice.model_mode, ModelMode::Online);
        assert_eq!(config.voice.capture_timeout, Duration::from_millis(5000));
        assert_eq!(config.dispatch.url, DEFAULT_DISPATCH_URL);
        assert_eq!(config.offline.base_url, "http://localhost:8000");
    }

    #[test]
    fn test_env_overrides_file() {
        let fc: HeraldConfigFile = toml::from_str(
            r#"
            [voice]
            wake_phrase = "hey file"
            language = "fr"

            [api_keys]
            openai = "file-key"
            "#,
        )
        .unwrap();

        let config = Config::from_sources(
            fc,
            env_from(&[("HERALD_WAKE_WORD", "hey env"), ("OPENAI_API_KEY", "env-key")]),
        )
        .unwrap();

        assert_eq!(config.voice.wake_phrase, "hey env");
        assert_eq!(config.voice.language, Language::French);
        assert_eq!(
            config.api_keys.openai.as_ref().map(ExposeSecret::expose_secret),
            Some("env-key")
        );
    }

    #[test]
    fn test_blank_env_ignored() {
        let config = Config::from_sources(
            HeraldConfigFile::default(),
            env_from(&[("HERALD_USER_ID", "  ")]),
        )
        .unwrap();
        assert_eq!(config.user_id, DEFAULT_USER_ID);
    }

    #[test]
    fn test_invalid_language_rejected() {
        let result = Config::from_sources(
            HeraldConfigFile::default(),
            env_from(&[("HERALD_LANGUAGE", "klingon")]),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_validate_requires_keys_online() {
        let mut config = Config::default();
        assert!(config.validate().is_err());

        config.api_keys.openai = Some(SecretString::from("sk-test"));
        assert!(config.validate().is_ok());

        config.voice.tts_provider = TtsProvider::ElevenLabs;
        assert!(config.validate().is_err());

        config.voice.model_mode = ModelMode::Offline;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let config = Config::from_sources(
            HeraldConfigFile::default(),
            env_from(&[
                ("OPENAI_API_KEY", "sk-live-openai"),
                ("DEEPGRAM_API_KEY", "dg-live-key"),
                ("HERALD_DISPATCH_TOKEN", "backend-bearer"),
            ]),
        )
        .unwrap();

        let rendered = format!("{config:?}");
        assert!(!rendered.contains("sk-live-openai"));
        assert!(!rendered.contains("dg-live-key"));
        assert!(!rendered.contains("backend-bearer"));
        assert!(config.api_keys.deepgram.is_some());
    }
}
