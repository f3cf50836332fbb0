//! TOML configuration file loading
//!
//! Supports `~/.config/herald/config.toml` as a persistent config source.
//! All fields are optional; the file is a partial overlay on top of defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct HeraldConfigFile {
    /// Session user identifier
    #[serde(default)]
    pub user_id: Option<String>,

    /// Voice/audio configuration
    #[serde(default)]
    pub voice: VoiceFileConfig,

    /// Command backend configuration
    #[serde(default)]
    pub dispatch: DispatchFileConfig,

    /// API keys for external services
    #[serde(default)]
    pub api_keys: ApiKeysFileConfig,

    /// Local engine server configuration
    #[serde(default)]
    pub offline: OfflineFileConfig,
}

/// Voice processing configuration
#[derive(Debug, Default, Deserialize)]
pub struct VoiceFileConfig {
    /// Wake phrase (e.g. "hey dev")
    pub wake_phrase: Option<String>,

    /// Reply language code (e.g. "en")
    pub language: Option<String>,

    /// Pin the input language instead of detecting it
    pub override_language: Option<String>,

    /// "online" or "offline"
    pub model_mode: Option<String>,

    /// Per-utterance capture limit in milliseconds
    pub capture_timeout_ms: Option<u64>,

    /// How long the monitor waits for speech after arming, in seconds
    pub listen_window_secs: Option<u64>,

    /// STT provider ("whisper" or "deepgram")
    pub stt_provider: Option<String>,

    /// STT model (e.g. "whisper-1")
    pub stt_model: Option<String>,

    /// TTS provider ("openai" or "elevenlabs")
    pub tts_provider: Option<String>,

    /// TTS model (e.g. "tts-1")
    pub tts_model: Option<String>,

    /// TTS voice identifier (e.g. "alloy")
    pub tts_voice: Option<String>,

    /// TTS speed multiplier
    pub tts_speed: Option<f64>,
}

/// Command backend configuration
#[derive(Debug, Default, Deserialize)]
pub struct DispatchFileConfig {
    pub url: Option<String>,
    pub timeout_secs: Option<u64>,
    pub api_token: Option<String>,
}

/// API keys configuration
#[derive(Debug, Default, Deserialize)]
pub struct ApiKeysFileConfig {
    pub openai: Option<String>,
    pub deepgram: Option<String>,
    pub elevenlabs: Option<String>,
}

/// Local OpenAI-compatible engine server
#[derive(Debug, Default, Deserialize)]
pub struct OfflineFileConfig {
    pub base_url: Option<String>,
}

/// Load the TOML config file from the standard path
///
/// Returns `HeraldConfigFile::default()` if the file doesn't exist or can't be parsed.
#[must_use]
pub fn load_config_file() -> HeraldConfigFile {
    config_file_path().map_or_else(HeraldConfigFile::default, |path| load_config_from(&path))
}

/// Load a TOML config file from `path`, falling back to defaults
#[must_use]
pub fn load_config_from(path: &Path) -> HeraldConfigFile {
    if !path.exists() {
        return HeraldConfigFile::default();
    }

    match std::fs::read_to_string(path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "loaded config file");
                config
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse config file, using defaults"
                );
                HeraldConfigFile::default()
            }
        },
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read config file"
            );
            HeraldConfigFile::default()
        }
    }
}

/// Return the config file path: `~/.config/herald/config.toml`
///
/// `HERALD_CONFIG` overrides the location.
#[must_use]
pub fn config_file_path() -> Option<PathBuf> {
    if let Ok(path) = std::env::var("HERALD_CONFIG") {
        return Some(PathBuf::from(path));
    }

    directories::BaseDirs::new().map(|d| d.config_dir().join("herald").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_file_parses() {
        let fc: HeraldConfigFile = toml::from_str(
            r#"
            user_id = "user_demo"

            [voice]
            wake_phrase = "Hey Dev"
            tts_speed = 1.25

            [dispatch]
            url = "http://localhost:3001/api/command"
            "#,
        )
        .unwrap();

        assert_eq!(fc.user_id.as_deref(), Some("user_demo"));
        assert_eq!(fc.voice.wake_phrase.as_deref(), Some("Hey Dev"));
        assert_eq!(fc.voice.tts_speed, Some(1.25));
        assert!(fc.voice.language.is_none());
        assert_eq!(
            fc.dispatch.url.as_deref(),
            Some("http://localhost:3001/api/command")
        );
        assert!(fc.api_keys.openai.is_none());
    }

    #[test]
    fn test_missing_file_is_default() {
        let fc = load_config_from(Path::new("/nonexistent/herald/config.toml"));
        assert!(fc.user_id.is_none());
        assert!(fc.offline.base_url.is_none());
    }
}
