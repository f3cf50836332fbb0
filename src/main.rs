use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use herald::dispatch::{CommandDispatcher, DispatchReply};
use herald::pipeline::FALLBACK_REPLY;
use herald::voice::{
    AudioPlayback, MicrophoneCapture, SpeakerPlayback, SynthesizedSpeech, Synthesizer,
    calculate_energy,
};
use herald::{Config, Daemon, Language, ModelMode};

/// Herald - wake word voice assistant front end
#[derive(Parser)]
#[command(name = "herald", version, about)]
struct Cli {
    /// Wake phrase to listen for (e.g. "hey dev")
    #[arg(short, long, env = "HERALD_WAKE_WORD")]
    wake_word: Option<String>,

    /// Language replies are spoken in (code or name, e.g. "es")
    #[arg(short, long)]
    language: Option<Language>,

    /// Pin the input language instead of detecting it per utterance
    #[arg(long)]
    override_language: Option<Language>,

    /// Use the local engine server instead of hosted providers
    #[arg(long)]
    offline: bool,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Test microphone input
    TestMic {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
    },
    /// Test speaker output
    TestSpeaker,
    /// Test TTS output
    TestTts {
        /// Text to speak
        #[arg(default_value = "Hello! This is a test of the text to speech system.")]
        text: String,
    },
    /// Send a command to the backend and print the reply
    Send {
        /// Command text
        text: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "info,herald=info",
        1 => "info,herald=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = load_config(&cli)?;
    tracing::debug!(?config, "loaded configuration");

    if let Some(cmd) = cli.command {
        return match cmd {
            Command::TestMic { duration } => test_mic(duration).await,
            Command::TestSpeaker => test_speaker().await,
            Command::TestTts { text } => test_tts(config, &text).await,
            Command::Send { text } => send(config, &text).await,
        };
    }

    tracing::info!(
        wake_word = %config.voice.wake_phrase,
        offline = cli.offline,
        "starting herald"
    );
    tracing::info!("herald ready - say \"{}\"", config.voice.wake_phrase);

    // Run until interrupted
    Daemon::new(config).run().await?;

    Ok(())
}

/// Load configuration and apply command line overrides
fn load_config(cli: &Cli) -> anyhow::Result<Config> {
    let mut config = Config::load()?;

    if let Some(wake_word) = &cli.wake_word {
        config.voice.wake_phrase.clone_from(wake_word);
    }
    if let Some(language) = cli.language {
        config.voice.language = language;
    }
    if let Some(language) = cli.override_language {
        config.voice.override_language = Some(language);
    }
    if cli.offline {
        config.voice.model_mode = ModelMode::Offline;
    }

    Ok(config)
}

/// Test microphone input
async fn test_mic(duration: u64) -> anyhow::Result<()> {
    println!("Testing microphone for {duration} seconds...");
    println!("Speak into your microphone!\n");

    let capture = MicrophoneCapture::new()?;
    let sample_rate = capture.sample_rate();
    println!("Sample rate: {sample_rate} Hz");
    println!("---");

    let samples = capture.record_raw(Duration::from_secs(duration)).await?;

    for (i, second) in samples.chunks(sample_rate as usize).enumerate() {
        let energy = calculate_energy(second);
        let peak = second.iter().map(|s| s.abs()).fold(0.0f32, f32::max);

        // Visual meter
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let meter_len = (energy * 100.0).min(50.0) as usize;
        let meter: String = "#".repeat(meter_len) + &" ".repeat(50 - meter_len);

        println!(
            "[{:2}s] RMS: {:.4} | Peak: {:.4} | [{}]",
            i + 1,
            energy,
            peak,
            meter
        );
    }

    println!("\n---");
    println!("If you saw movement in the meter, your mic is working!");
    println!("If RMS stayed near 0, check:");
    println!("  1. Is your mic plugged in?");
    println!("  2. Run: pactl info | grep 'Default Source'");
    println!("  3. Run: arecord -l (to list devices)");

    Ok(())
}

/// Test speaker output with a sine wave
async fn test_speaker() -> anyhow::Result<()> {
    println!("Testing speaker output...");
    println!("You should hear a 440Hz tone for 2 seconds\n");

    let playback = SpeakerPlayback::new()?;

    // 2 seconds of 440Hz sine wave at 24kHz
    let sample_rate = 24000_u32;
    let frequency = 440.0_f32;
    let num_samples = sample_rate as usize * 2;

    #[allow(clippy::cast_precision_loss)]
    let samples: Vec<f32> = (0..num_samples)
        .map(|i| {
            let t = i as f32 / sample_rate as f32;
            (2.0 * std::f32::consts::PI * frequency * t).sin() * 0.3 // 30% volume
        })
        .collect();

    println!("Playing {} samples at {} Hz...", samples.len(), sample_rate);

    playback
        .play(&SynthesizedSpeech::new(samples, sample_rate))
        .await?;

    println!("\n---");
    println!("If you heard the tone, your speakers are working!");
    println!("If you didn't hear anything, check:");
    println!("  1. Run: pactl info | grep 'Default Sink'");
    println!("  2. Run: pactl list sinks short");

    Ok(())
}

/// Test TTS output with the configured engine
async fn test_tts(config: Config, text: &str) -> anyhow::Result<()> {
    println!("Testing TTS with text: \"{text}\"\n");

    let language = config.voice.language;
    let daemon = Daemon::new(config);
    let tts = daemon.build_tts()?;
    let playback = SpeakerPlayback::new()?;

    println!("Synthesizing speech ({language})...");
    let speech = tts.synthesize(text, language).await?;
    println!(
        "Got {} samples at {} Hz ({} ms)",
        speech.samples.len(),
        speech.sample_rate,
        speech.duration_ms
    );

    playback.play(&speech).await?;
    println!("\nTTS test complete!");

    Ok(())
}

/// Send one command to the backend
async fn send(config: Config, text: &str) -> anyhow::Result<()> {
    let dispatcher = Daemon::new(config).build_dispatcher()?;

    match dispatcher.dispatch(text).await {
        DispatchReply::Reply(reply) => println!("{reply}"),
        DispatchReply::Failure(failure) => {
            eprintln!("dispatch failed: {failure}");
            println!("{FALLBACK_REPLY}");
        }
    }

    Ok(())
}
