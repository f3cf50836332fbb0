//! Audio capture from microphone

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, Stream, StreamConfig};

use super::{AudioCapture, AudioSegment};
use crate::{Error, Result};

/// Sample rate for audio capture (16kHz for speech)
pub const SAMPLE_RATE: u32 = 16000;

/// Minimum RMS energy considered speech
pub const SPEECH_ENERGY_THRESHOLD: f32 = 0.03;

/// Trailing silence that ends an utterance
const END_OF_UTTERANCE: Duration = Duration::from_millis(800);

/// How often the recording loop inspects new samples
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Records utterances from the default input device
///
/// Each capture opens its own stream on a blocking thread, since cpal
/// streams cannot move between threads.
pub struct MicrophoneCapture {
    config: StreamConfig,
}

impl MicrophoneCapture {
    /// Create a new microphone capture instance
    ///
    /// # Errors
    ///
    /// Returns error if audio device cannot be opened
    pub fn new() -> Result<Self> {
        let config = input_config()?;
        Ok(Self { config })
    }

    /// Record exactly `duration` of audio without voice activity gating
    ///
    /// # Errors
    ///
    /// Returns error if capture fails
    pub async fn record_raw(&self, duration: Duration) -> Result<Vec<f32>> {
        let config = self.config.clone();
        tokio::task::spawn_blocking(move || record_blocking(&config, duration, false))
            .await
            .map_err(|e| Error::Audio(e.to_string()))?
    }

    /// Get the sample rate
    #[must_use]
    pub const fn sample_rate(&self) -> u32 {
        SAMPLE_RATE
    }
}

#[async_trait]
impl AudioCapture for MicrophoneCapture {
    async fn capture(&self, timeout: Duration) -> Result<AudioSegment> {
        let config = self.config.clone();
        let samples = tokio::task::spawn_blocking(move || record_blocking(&config, timeout, true))
            .await
            .map_err(|e| Error::Audio(e.to_string()))??;

        if samples.is_empty() {
            tracing::debug!(timeout_ms = timeout.as_millis(), "no speech captured");
            return Ok(AudioSegment::empty(SAMPLE_RATE));
        }

        let segment = AudioSegment::new(samples, SAMPLE_RATE);
        tracing::debug!(
            samples = segment.samples.len(),
            duration_ms = segment.duration.as_millis(),
            "utterance captured"
        );
        Ok(segment)
    }
}

/// Find a mono 16kHz configuration on the default input device
pub(crate) fn input_config() -> Result<StreamConfig> {
    let host = cpal::default_host();

    let device = host
        .default_input_device()
        .ok_or_else(|| Error::Audio("no input device available".to_string()))?;

    let supported_config = device
        .supported_input_configs()
        .map_err(|e| Error::Audio(e.to_string()))?
        .find(|c| {
            c.channels() == 1
                && c.min_sample_rate() <= SampleRate(SAMPLE_RATE)
                && c.max_sample_rate() >= SampleRate(SAMPLE_RATE)
        })
        .ok_or_else(|| Error::Audio("no suitable audio config found".to_string()))?;

    let config = supported_config
        .with_sample_rate(SampleRate(SAMPLE_RATE))
        .config();

    tracing::debug!(
        device = device.name().unwrap_or_default(),
        sample_rate = SAMPLE_RATE,
        channels = config.channels,
        "audio capture initialized"
    );

    Ok(config)
}

/// Open and start an input stream feeding `on_data`
pub(crate) fn open_input_stream<F>(config: &StreamConfig, mut on_data: F) -> Result<Stream>
where
    F: FnMut(&[f32]) + Send + 'static,
{
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or_else(|| Error::Audio("no input device".to_string()))?;

    let stream = device
        .build_input_stream(
            config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| on_data(data),
            |err| {
                tracing::error!(error = %err, "audio capture error");
            },
            None,
        )
        .map_err(|e| Error::Audio(e.to_string()))?;

    stream.play().map_err(|e| Error::Audio(e.to_string()))?;
    Ok(stream)
}

/// Record on the current thread
///
/// With `until_silence`, stops once speech is followed by a pause and
/// returns nothing if no speech was heard before `timeout`.
fn record_blocking(config: &StreamConfig, timeout: Duration, until_silence: bool) -> Result<Vec<f32>> {
    let buffer = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&buffer);
    let stream = open_input_stream(config, move |data| {
        if let Ok(mut buf) = sink.lock() {
            buf.extend_from_slice(data);
        }
    })?;

    let start = Instant::now();
    let mut scanned = 0usize;
    let mut heard_speech = false;
    let mut last_speech = start;

    while start.elapsed() < timeout {
        std::thread::sleep(POLL_INTERVAL);
        if !until_silence {
            continue;
        }

        let energy = buffer
            .lock()
            .map(|buf| {
                let energy = calculate_energy(&buf[scanned..]);
                scanned = buf.len();
                energy
            })
            .unwrap_or_default();

        if energy > SPEECH_ENERGY_THRESHOLD {
            heard_speech = true;
            last_speech = Instant::now();
        } else if heard_speech && last_speech.elapsed() >= END_OF_UTTERANCE {
            break;
        }
    }

    drop(stream);

    let samples = buffer
        .lock()
        .map(|mut buf| std::mem::take(&mut *buf))
        .unwrap_or_default();

    if until_silence && !heard_speech {
        return Ok(Vec::new());
    }
    Ok(samples)
}

/// Calculate RMS energy of audio samples
#[allow(clippy::cast_precision_loss)]
#[must_use]
pub fn calculate_energy(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }

    let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
    (sum_squares / samples.len() as f32).sqrt()
}

/// Convert f32 samples to WAV bytes for STT APIs
///
/// # Errors
///
/// Returns error if WAV encoding fails
pub fn samples_to_wav(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer =
            hound::WavWriter::new(&mut cursor, spec).map_err(|e| Error::Audio(e.to_string()))?;

        for &sample in samples {
            #[allow(clippy::cast_possible_truncation)]
            let sample_i16 = (sample * 32767.0).clamp(-32768.0, 32767.0) as i16;
            writer
                .write_sample(sample_i16)
                .map_err(|e| Error::Audio(e.to_string()))?;
        }

        writer.finalize().map_err(|e| Error::Audio(e.to_string()))?;
    }

    Ok(cursor.into_inner())
}
