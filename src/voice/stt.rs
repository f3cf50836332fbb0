//! Speech-to-text (STT) processing

use async_trait::async_trait;

use super::capture::samples_to_wav;
use super::{AudioSegment, Transcriber, TranscriptionResult};
use crate::language::Language;
use crate::{Error, Result};

/// Hosted OpenAI API base
const OPENAI_BASE_URL: &str = "https://api.openai.com";

/// Hosted Deepgram API base
const DEEPGRAM_BASE_URL: &str = "https://api.deepgram.com";

/// Verbose response from an OpenAI-compatible Whisper transcription API
#[derive(Debug, serde::Deserialize)]
pub(crate) struct WhisperVerboseResponse {
    pub text: String,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub segments: Vec<WhisperSegment>,
}

#[derive(Debug, serde::Deserialize)]
pub(crate) struct WhisperSegment {
    #[serde(default)]
    pub avg_logprob: f32,
}

impl WhisperVerboseResponse {
    /// Mean token probability across segments
    #[allow(clippy::cast_precision_loss)]
    pub fn confidence(&self) -> f32 {
        if self.segments.is_empty() {
            return if self.text.trim().is_empty() { 0.0 } else { 1.0 };
        }
        let mean = self.segments.iter().map(|s| s.avg_logprob).sum::<f32>()
            / self.segments.len() as f32;
        mean.exp().clamp(0.0, 1.0)
    }
}

/// Response from Deepgram transcription API
#[derive(Debug, serde::Deserialize)]
struct DeepgramResponse {
    results: DeepgramResults,
}

#[derive(Debug, serde::Deserialize)]
struct DeepgramResults {
    channels: Vec<DeepgramChannel>,
}

#[derive(Debug, serde::Deserialize)]
struct DeepgramChannel {
    #[serde(default)]
    alternatives: Vec<DeepgramAlternative>,
    #[serde(default)]
    detected_language: Option<String>,
    #[serde(default)]
    language_confidence: Option<f32>,
}

#[derive(Debug, serde::Deserialize)]
struct DeepgramAlternative {
    transcript: String,
    #[serde(default)]
    confidence: f32,
}

/// STT provider backend
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum SttProvider {
    Whisper,
    Deepgram,
}

/// Transcribes speech to text
pub struct SpeechToText {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
    provider: SttProvider,
}

impl SpeechToText {
    /// Create a new STT instance using hosted `OpenAI` Whisper
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing
    pub fn new_whisper(api_key: String, model: String) -> Result<Self> {
        if api_key.is_empty() {
            return Err(Error::Config(
                "OpenAI API key required for Whisper".to_string(),
            ));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            base_url: OPENAI_BASE_URL.to_string(),
            api_key: Some(api_key),
            model,
            provider: SttProvider::Whisper,
        })
    }

    /// Create a new STT instance against a local OpenAI-compatible server
    #[must_use]
    pub fn new_local(base_url: &str, model: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: None,
            model,
            provider: SttProvider::Whisper,
        }
    }

    /// Create a new STT instance using Deepgram
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing
    pub fn new_deepgram(api_key: String, model: String) -> Result<Self> {
        if api_key.is_empty() {
            return Err(Error::Config("Deepgram API key required".to_string()));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            base_url: DEEPGRAM_BASE_URL.to_string(),
            api_key: Some(api_key),
            model,
            provider: SttProvider::Deepgram,
        })
    }

    /// Point the engine at a different API base
    #[must_use]
    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    /// Transcribe WAV audio, optionally hinting the spoken language
    ///
    /// # Errors
    ///
    /// Returns error if transcription fails
    pub async fn transcribe_wav(
        &self,
        audio: &[u8],
        language: Option<Language>,
    ) -> Result<TranscriptionResult> {
        match self.provider {
            SttProvider::Whisper => {
                let result = self.whisper_verbose(audio, language).await?;
                Ok(TranscriptionResult::new(&result.text, result.confidence()))
            }
            SttProvider::Deepgram => self.transcribe_deepgram(audio, language).await,
        }
    }

    /// Identify the spoken language, returning the engine's label and confidence
    ///
    /// # Errors
    ///
    /// Returns error if the request fails or no language is reported
    pub async fn identify_language(&self, audio: &[u8]) -> Result<(String, f32)> {
        match self.provider {
            SttProvider::Whisper => {
                let result = self.whisper_verbose(audio, None).await?;
                let confidence = result.confidence();
                result
                    .language
                    .map(|lang| (lang, confidence))
                    .ok_or_else(|| Error::LanguageDetection("no language in response".to_string()))
            }
            SttProvider::Deepgram => {
                let url = format!(
                    "{}/v1/listen?model={}&detect_language=true",
                    self.base_url, self.model
                );
                let result = self.post_deepgram(&url, audio).await?;
                let channel = result
                    .results
                    .channels
                    .into_iter()
                    .next()
                    .ok_or_else(|| Error::LanguageDetection("empty Deepgram response".to_string()))?;
                let language = channel
                    .detected_language
                    .ok_or_else(|| Error::LanguageDetection("no language in response".to_string()))?;
                Ok((language, channel.language_confidence.unwrap_or(0.5)))
            }
        }
    }

    /// Transcribe using an OpenAI-compatible Whisper endpoint
    pub(crate) async fn whisper_verbose(
        &self,
        audio: &[u8],
        language: Option<Language>,
    ) -> Result<WhisperVerboseResponse> {
        tracing::debug!(audio_bytes = audio.len(), ?language, "starting Whisper transcription");

        let mut form = reqwest::multipart::Form::new()
            .part(
                "file",
                reqwest::multipart::Part::bytes(audio.to_vec())
                    .file_name("audio.wav")
                    .mime_str("audio/wav")
                    .map_err(|e| Error::Stt(e.to_string()))?,
            )
            .text("model", self.model.clone())
            .text("response_format", "verbose_json");

        if let Some(language) = language {
            form = form.text("language", language.code());
        }

        let mut request = self
            .client
            .post(format!("{}/v1/audio/transcriptions", self.base_url))
            .multipart(form);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| {
            tracing::error!(error = %e, "Whisper request failed");
            e
        })?;

        let status = response.status();
        tracing::debug!(status = %status, "received response");

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "Whisper API error");
            return Err(Error::Stt(format!("Whisper API error {status}: {body}")));
        }

        let result: WhisperVerboseResponse = response.json().await.map_err(|e| {
            tracing::error!(error = %e, "failed to parse response");
            e
        })?;

        tracing::info!(transcript = %result.text, "transcription complete");
        Ok(result)
    }

    /// Transcribe using Deepgram
    async fn transcribe_deepgram(
        &self,
        audio: &[u8],
        language: Option<Language>,
    ) -> Result<TranscriptionResult> {
        tracing::debug!(audio_bytes = audio.len(), ?language, "starting Deepgram transcription");

        let mut url = format!(
            "{}/v1/listen?model={}&punctuate=true",
            self.base_url, self.model
        );
        if let Some(language) = language {
            url.push_str("&language=");
            url.push_str(language.code());
        }

        let result = self.post_deepgram(&url, audio).await?;
        let transcript = result
            .results
            .channels
            .first()
            .and_then(|c| c.alternatives.first())
            .map(|a| TranscriptionResult::new(&a.transcript, a.confidence))
            .unwrap_or_else(TranscriptionResult::empty);

        tracing::info!(transcript = %transcript.text, "transcription complete");
        Ok(transcript)
    }

    async fn post_deepgram(&self, url: &str, audio: &[u8]) -> Result<DeepgramResponse> {
        let mut request = self
            .client
            .post(url)
            .header("Content-Type", "audio/wav")
            .body(audio.to_vec());
        if let Some(key) = &self.api_key {
            request = request.header("Authorization", format!("Token {key}"));
        }

        let response = request.send().await.map_err(|e| {
            tracing::error!(error = %e, "Deepgram request failed");
            e
        })?;

        let status = response.status();
        tracing::debug!(status = %status, "received response");

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "Deepgram API error");
            return Err(Error::Stt(format!("Deepgram API error {status}: {body}")));
        }

        Ok(response.json().await.map_err(|e| {
            tracing::error!(error = %e, "failed to parse Deepgram response");
            e
        })?)
    }
}

#[async_trait]
impl Transcriber for SpeechToText {
    async fn transcribe(&self, segment: &AudioSegment) -> Result<TranscriptionResult> {
        if segment.is_empty() {
            return Ok(TranscriptionResult::empty());
        }
        let wav = samples_to_wav(&segment.samples, segment.sample_rate)?;
        self.transcribe_wav(&wav, segment.language).await
    }
}
