//! Daemon - the main voice service
//!
//! Builds the engines from configuration, runs the orchestrator and shuts it
//! down on Ctrl-C.

use std::sync::Arc;

use secrecy::{ExposeSecret, SecretString};
use tokio::sync::mpsc;

use crate::config::{SttProvider, TtsProvider};
use crate::dispatch::HttpCommandDispatcher;
use crate::language::ModelMode;
use crate::orchestrator::VoiceOrchestrator;
use crate::pipeline::Engines;
use crate::session::Session;
use crate::voice::{
    MicrophoneCapture, MicrophoneWakeMonitor, SpeakerPlayback, SpeechToText, SttLanguageDetector,
    TextToSpeech, Transcriber,
};
use crate::{Config, Error, Result};

/// The Herald daemon - listens for the wake phrase and answers commands
pub struct Daemon {
    config: Config,
}

impl Daemon {
    /// Create a new daemon instance
    #[must_use]
    pub const fn new(config: Config) -> Self {
        Self { config }
    }

    /// Get the daemon configuration
    #[must_use]
    pub const fn config(&self) -> &Config {
        &self.config
    }

    /// Build the initial session from configuration
    #[must_use]
    pub fn session(&self) -> Session {
        Session::new(&self.config.user_id, &self.config.voice.wake_phrase)
            .with_preferred_language(self.config.voice.language)
            .with_model_mode(self.config.voice.model_mode)
            .with_language_override(self.config.voice.override_language)
    }

    /// Build the STT engine for the configured mode and provider
    ///
    /// # Errors
    ///
    /// Returns error if a required API key is missing
    pub fn build_stt(&self) -> Result<SpeechToText> {
        let voice = &self.config.voice;
        if voice.model_mode == ModelMode::Offline {
            return Ok(SpeechToText::new_local(
                &self.config.offline.base_url,
                voice.stt_model.clone(),
            ));
        }

        match voice.stt_provider {
            SttProvider::Whisper => SpeechToText::new_whisper(
                required_key(self.config.api_keys.openai.as_ref(), "OPENAI_API_KEY")?,
                voice.stt_model.clone(),
            ),
            SttProvider::Deepgram => SpeechToText::new_deepgram(
                required_key(self.config.api_keys.deepgram.as_ref(), "DEEPGRAM_API_KEY")?,
                voice.stt_model.clone(),
            ),
        }
    }

    /// Build the TTS engine for the configured mode and provider
    ///
    /// # Errors
    ///
    /// Returns error if a required API key is missing
    pub fn build_tts(&self) -> Result<TextToSpeech> {
        let voice = &self.config.voice;
        if voice.model_mode == ModelMode::Offline {
            return Ok(TextToSpeech::new_local(
                &self.config.offline.base_url,
                voice.tts_voice.clone(),
                voice.tts_speed,
                voice.tts_model.clone(),
            ));
        }

        match voice.tts_provider {
            TtsProvider::OpenAi => TextToSpeech::new_openai(
                required_key(self.config.api_keys.openai.as_ref(), "OPENAI_API_KEY")?,
                voice.tts_voice.clone(),
                voice.tts_speed,
                voice.tts_model.clone(),
            ),
            TtsProvider::ElevenLabs => TextToSpeech::new_elevenlabs(
                required_key(self.config.api_keys.elevenlabs.as_ref(), "ELEVENLABS_API_KEY")?,
                voice.tts_voice.clone(),
                voice.tts_model.clone(),
            ),
        }
    }

    /// Build the command dispatcher
    ///
    /// # Errors
    ///
    /// Returns error if the backend URL is empty or the client cannot be built
    pub fn build_dispatcher(&self) -> Result<HttpCommandDispatcher> {
        let dispatch = &self.config.dispatch;
        Ok(HttpCommandDispatcher::new(&dispatch.url, dispatch.timeout)?
            .with_api_token(dispatch.api_token.clone()))
    }

    /// Build every pipeline engine plus the wake word monitor
    ///
    /// # Errors
    ///
    /// Returns error if an audio device or engine cannot be initialized
    pub fn build_engines(&self) -> Result<(Engines, Arc<MicrophoneWakeMonitor>)> {
        let stt = Arc::new(self.build_stt()?);
        let transcriber: Arc<dyn Transcriber> = stt.clone();

        let engines = Engines {
            capture: Arc::new(MicrophoneCapture::new()?),
            detector: Arc::new(SttLanguageDetector::new(Arc::clone(&stt))),
            transcriber: Arc::clone(&transcriber),
            dispatcher: Arc::new(self.build_dispatcher()?),
            synthesizer: Arc::new(self.build_tts()?),
            playback: Arc::new(SpeakerPlayback::new()?),
        };

        let monitor = Arc::new(MicrophoneWakeMonitor::new(
            transcriber,
            &self.config.voice.wake_phrase,
            self.config.voice.listen_window,
        ));

        Ok((engines, monitor))
    }

    /// Run the daemon until Ctrl-C
    ///
    /// # Errors
    ///
    /// Returns error if the engines or the monitor cannot start
    pub async fn run(self) -> Result<()> {
        self.config.validate()?;

        let (engines, monitor) = self.build_engines()?;
        let orchestrator = VoiceOrchestrator::with_capture_timeout(
            self.session(),
            engines,
            monitor,
            self.config.voice.capture_timeout,
        );

        tracing::info!(
            user = %self.config.user_id,
            mode = %self.config.voice.model_mode,
            language = %self.config.voice.language,
            backend = %self.config.dispatch.url,
            "daemon running"
        );

        // Set up shutdown signal
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                let _ = shutdown_tx.send(()).await;
            }
        });

        orchestrator.start().await?;

        shutdown_rx.recv().await;
        tracing::info!("shutdown requested");

        orchestrator.stop().await;
        orchestrator.join().await;

        let stats = orchestrator.stats();
        tracing::info!(
            runs = stats.runs_completed,
            busy_drops = stats.busy_drops,
            dispatch_failures = stats.dispatch_failures,
            "daemon stopped"
        );
        Ok(())
    }
}

fn required_key(key: Option<&SecretString>, name: &str) -> Result<String> {
    key.map(|k| k.expose_secret().to_string())
        .ok_or_else(|| Error::Config(format!("{name} is required in online mode")))
}
