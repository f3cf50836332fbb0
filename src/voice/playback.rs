//! Audio playback to speakers

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, StreamConfig};

use super::{AudioPlayback, PlaybackOutcome, SynthesizedSpeech};
use crate::{Error, Result};

/// How often the playback loop checks for completion or interruption
const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Plays audio to the default output device
///
/// `stop()` bumps a generation counter; a clip started under an older
/// generation ends early and reports `Interrupted`.
pub struct SpeakerPlayback {
    generation: Arc<AtomicU64>,
}

impl SpeakerPlayback {
    /// Create a new audio playback instance
    ///
    /// # Errors
    ///
    /// Returns error if no output device is available
    pub fn new() -> Result<Self> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| Error::Audio("no output device available".to_string()))?;

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            "audio playback initialized"
        );

        Ok(Self {
            generation: Arc::new(AtomicU64::new(0)),
        })
    }
}

#[async_trait]
impl AudioPlayback for SpeakerPlayback {
    async fn play(&self, speech: &SynthesizedSpeech) -> Result<PlaybackOutcome> {
        if speech.samples.is_empty() {
            return Ok(PlaybackOutcome::Completed);
        }

        let samples = speech.samples.clone();
        let sample_rate = speech.sample_rate;
        let generation = Arc::clone(&self.generation);
        let started_at = generation.load(Ordering::Acquire);

        tokio::task::spawn_blocking(move || {
            play_blocking(samples, sample_rate, || {
                generation.load(Ordering::Acquire) != started_at
            })
        })
        .await
        .map_err(|e| Error::Audio(e.to_string()))?
    }

    fn stop(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
        tracing::debug!("playback stop requested");
    }
}

/// Play samples on the current thread until done or `interrupted` returns true
fn play_blocking(
    samples: Vec<f32>,
    sample_rate: u32,
    interrupted: impl Fn() -> bool,
) -> Result<PlaybackOutcome> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| Error::Audio("no output device".to_string()))?;

    let (config, samples) = match output_config(&device, sample_rate) {
        Some(config) => (config, samples),
        None => {
            let default = device
                .default_output_config()
                .map_err(|e| Error::Audio(e.to_string()))?
                .config();
            let resampled = resample_audio(&samples, sample_rate, default.sample_rate.0)?;
            (default, resampled)
        }
    };

    let channels = config.channels as usize;
    let output_rate = config.sample_rate.0;
    let sample_count = samples.len();
    let samples = Arc::new(samples);
    let position = Arc::new(AtomicUsize::new(0));
    let finished = Arc::new(AtomicBool::new(false));

    let stream = {
        let samples = Arc::clone(&samples);
        let position = Arc::clone(&position);
        let finished = Arc::clone(&finished);
        device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    let mut pos = position.load(Ordering::Relaxed);
                    for frame in data.chunks_mut(channels) {
                        let sample = samples.get(pos).copied().unwrap_or_else(|| {
                            finished.store(true, Ordering::Release);
                            0.0
                        });
                        frame.fill(sample);
                        if pos < samples.len() {
                            pos += 1;
                        }
                    }
                    position.store(pos, Ordering::Relaxed);
                },
                |err| {
                    tracing::error!(error = %err, "audio playback error");
                },
                None,
            )
            .map_err(|e| Error::Audio(e.to_string()))?
    };

    stream.play().map_err(|e| Error::Audio(e.to_string()))?;

    let duration_ms = (sample_count as u64 * 1000) / u64::from(output_rate.max(1));
    let timeout = Duration::from_millis(duration_ms + 500);
    let start = Instant::now();
    let mut outcome = PlaybackOutcome::Completed;

    while !finished.load(Ordering::Acquire) {
        if interrupted() {
            outcome = PlaybackOutcome::Interrupted;
            break;
        }
        if start.elapsed() > timeout {
            break;
        }
        std::thread::sleep(POLL_INTERVAL);
    }

    if outcome == PlaybackOutcome::Completed {
        // Let the device drain its last buffer
        std::thread::sleep(Duration::from_millis(100));
    }

    drop(stream);
    tracing::debug!(samples = sample_count, ?outcome, "playback finished");

    Ok(outcome)
}

/// Find a mono (or stereo) output config at `sample_rate`
fn output_config(device: &cpal::Device, sample_rate: u32) -> Option<StreamConfig> {
    let rate = SampleRate(sample_rate);
    let supports = |c: &cpal::SupportedStreamConfigRange, channels: u16| {
        c.channels() == channels && c.min_sample_rate() <= rate && c.max_sample_rate() >= rate
    };

    device
        .supported_output_configs()
        .ok()?
        .find(|c| supports(c, 1))
        .or_else(|| {
            device
                .supported_output_configs()
                .ok()?
                .find(|c| supports(c, 2))
        })
        .map(|c| c.with_sample_rate(rate).config())
}

/// Resample audio using rubato for devices that cannot run at the clip rate
///
/// The last partial chunk is zero padded so the tail of the reply is kept.
#[allow(clippy::cast_possible_truncation)]
fn resample_audio(samples: &[f32], from_rate: u32, to_rate: u32) -> Result<Vec<f32>> {
    use rubato::{FftFixedIn, Resampler};

    if from_rate == to_rate || samples.is_empty() {
        return Ok(samples.to_vec());
    }

    let chunk_size = 1024;
    let sub_chunks = 2;

    let mut resampler =
        FftFixedIn::<f64>::new(from_rate as usize, to_rate as usize, chunk_size, sub_chunks, 1)
            .map_err(|e| Error::Audio(format!("resampler init failed: {e}")))?;

    let input: Vec<f64> = samples.iter().map(|&s| f64::from(s)).collect();
    let mut output = Vec::new();

    for chunk in input.chunks(chunk_size) {
        let mut frames = chunk.to_vec();
        frames.resize(chunk_size, 0.0);
        let result = resampler
            .process(&[frames], None)
            .map_err(|e| Error::Audio(format!("resample failed: {e}")))?;
        output.extend_from_slice(&result[0]);
    }

    Ok(output.iter().map(|&s| s as f32).collect())
}
