//! Herald - wake word voice assistant front end
//!
//! This library provides the voice interaction loop:
//! - Wake word monitoring and listening state tracking
//! - Per-utterance language detection with a sticky override
//! - STT, command dispatch to a remote backend, TTS and playback
//! - An orchestrator that runs at most one pipeline at a time
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │               Wake Word Monitor                      │
//! │        microphone  →  segment  →  STT match          │
//! └────────────────────┬────────────────────────────────┘
//!                      │ ACTIVE / STANDBY
//! ┌────────────────────▼────────────────────────────────┐
//! │               Voice Orchestrator                     │
//! │        session  │  state machine  │  stats           │
//! └────────────────────┬────────────────────────────────┘
//!                      │ one run per wake event
//! ┌────────────────────▼────────────────────────────────┐
//! │                   Pipeline                           │
//! │ capture → language → STT → dispatch → TTS → playback │
//! └─────────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod daemon;
pub mod dispatch;
pub mod error;
pub mod language;
pub mod orchestrator;
pub mod pipeline;
pub mod session;
pub mod stats;
pub mod voice;

pub use config::Config;
pub use daemon::Daemon;
pub use dispatch::{CommandDispatcher, DispatchFailure, DispatchReply, HttpCommandDispatcher};
pub use error::{Error, Result};
pub use language::{Language, ListeningState, ModelMode};
pub use orchestrator::{OrchestratorState, VoiceOrchestrator};
pub use pipeline::{Engines, Pipeline, PipelineOutcome, VoiceFault};
pub use session::Session;
pub use stats::StatsSnapshot;
