//! Orchestrator integration tests
//!
//! Drive the state machine with scripted engines and a manual monitor

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::sync::RwLock;

use herald::dispatch::{DispatchFailure, DispatchReply};
use herald::stats::PipelineStats;
use herald::{Language, ListeningState, OrchestratorState, Pipeline, PipelineOutcome, Session};

mod common;

use common::{Doubles, Harness, ManualMonitor, Script, wait_until};

async fn wait_for_state(harness: &Harness, state: OrchestratorState) {
    wait_until(|| harness.orchestrator.state() == state).await;
}

async fn wait_for_playback(harness: &Harness) {
    tokio::time::timeout(Duration::from_secs(2), harness.playback_entered.notified())
        .await
        .expect("playback never started");
}

async fn wait_for_capture(harness: &Harness) {
    tokio::time::timeout(Duration::from_secs(2), harness.capture_entered.notified())
        .await
        .expect("capture never started");
}

#[tokio::test]
async fn test_full_interaction() {
    let harness = Harness::new(Script::default());
    assert_eq!(harness.orchestrator.state(), OrchestratorState::Idle);
    assert_eq!(harness.monitor.wake_phrase(), "hey dev");

    harness.orchestrator.start().await.unwrap();
    assert_eq!(harness.orchestrator.state(), OrchestratorState::Standby);
    assert_eq!(harness.monitor.starts(), 1);

    harness.monitor.fire(ListeningState::Active);
    harness.wait_for_runs(1).await;
    wait_for_state(&harness, OrchestratorState::Standby).await;

    assert_eq!(
        harness.log.entries(),
        vec![
            "capture",
            "detect",
            "transcribe:en",
            "dispatch:turn off the lights",
            "synthesize:Lights turned off:en",
            "play:100",
        ]
    );

    let stats = harness.orchestrator.stats();
    assert_eq!(stats.runs_started, 1);
    assert_eq!(stats.dispatch_failures, 0);
    assert!(stats.last_run_at.is_some());
}

#[tokio::test]
async fn test_wake_events_while_busy_are_dropped() {
    let harness = Harness::new(Script {
        gated: true,
        ..Script::default()
    });
    harness.orchestrator.start().await.unwrap();

    harness.monitor.fire(ListeningState::Active);
    wait_for_capture(&harness).await;
    assert_eq!(harness.orchestrator.state(), OrchestratorState::Processing);

    for _ in 0..3 {
        harness.monitor.fire(ListeningState::Active);
    }
    harness.release_capture();

    harness.wait_for_runs(1).await;
    wait_for_state(&harness, OrchestratorState::Standby).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let stats = harness.orchestrator.stats();
    assert_eq!(stats.runs_started, 1);
    assert_eq!(stats.busy_drops, 3);
    assert_eq!(harness.log.count("dispatch"), 1);

    // Back in standby, the next wake event runs normally
    harness.monitor.fire(ListeningState::Active);
    wait_for_capture(&harness).await;
    harness.release_capture();
    harness.wait_for_runs(2).await;
    assert_eq!(harness.log.count("dispatch"), 2);
}

#[tokio::test]
async fn test_standby_event_starts_nothing() {
    let harness = Harness::new(Script::default());
    harness.orchestrator.start().await.unwrap();

    harness.monitor.fire(ListeningState::Standby);
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(harness.orchestrator.state(), OrchestratorState::Standby);
    assert_eq!(harness.orchestrator.stats().runs_started, 0);
    assert!(harness.log.entries().is_empty());
}

#[tokio::test]
async fn test_empty_capture_skips_everything() {
    let harness = Harness::new(Script {
        samples: Vec::new(),
        ..Script::default()
    });
    harness.orchestrator.start().await.unwrap();

    harness.monitor.fire(ListeningState::Active);
    harness.wait_for_runs(1).await;
    wait_for_state(&harness, OrchestratorState::Standby).await;

    assert_eq!(harness.log.entries(), vec!["capture"]);
    assert_eq!(harness.orchestrator.stats().capture_empty, 1);
}

#[tokio::test]
async fn test_empty_transcript_is_not_dispatched() {
    let harness = Harness::new(Script {
        transcript: "   ".to_string(),
        ..Script::default()
    });
    harness.orchestrator.start().await.unwrap();

    harness.monitor.fire(ListeningState::Active);
    harness.wait_for_runs(1).await;
    wait_for_state(&harness, OrchestratorState::Standby).await;

    assert!(harness.log.contains("transcribe"));
    assert!(!harness.log.contains("dispatch"));
    assert!(!harness.log.contains("synthesize"));
    assert!(!harness.log.contains("play"));
    assert_eq!(harness.orchestrator.stats().transcription_empty, 1);
}

#[tokio::test]
async fn test_dispatch_failure_speaks_fallback() {
    let harness = Harness::new(Script {
        reply: DispatchReply::Failure(DispatchFailure::Network("connection refused".to_string())),
        ..Script::default()
    });
    harness.orchestrator.start().await.unwrap();

    harness.monitor.fire(ListeningState::Active);
    harness.wait_for_runs(1).await;

    assert!(harness.log.contains("synthesize:System offline.:en"));
    assert!(harness.log.contains("play"));
    assert_eq!(harness.orchestrator.stats().dispatch_failures, 1);
}

#[tokio::test]
async fn test_synthesis_failure_skips_playback() {
    let harness = Harness::new(Script {
        synth_fails: true,
        ..Script::default()
    });
    harness.orchestrator.start().await.unwrap();

    harness.monitor.fire(ListeningState::Active);
    harness.wait_for_runs(1).await;
    wait_for_state(&harness, OrchestratorState::Standby).await;

    assert!(harness.log.contains("synthesize"));
    assert!(!harness.log.contains("play"));
    assert_eq!(harness.orchestrator.stats().engine_failures, 1);
}

#[tokio::test]
async fn test_language_override_bypasses_detection() {
    let session =
        Session::new("user_demo", "hey dev").with_language_override(Some(Language::Spanish));
    let harness = Harness::with_session(
        Script {
            detected: Some(Language::French),
            ..Script::default()
        },
        session,
        ManualMonitor::default(),
    );
    assert_eq!(harness.detector.sticky(), Some(Language::Spanish));

    harness.orchestrator.start().await.unwrap();
    harness.monitor.fire(ListeningState::Active);
    harness.wait_for_runs(1).await;
    wait_for_state(&harness, OrchestratorState::Standby).await;

    assert!(!harness.log.contains("detect"));
    assert!(harness.log.contains("transcribe:es"));

    harness.orchestrator.clear_language_override().await;
    assert_eq!(harness.detector.sticky(), None);

    harness.monitor.fire(ListeningState::Active);
    harness.wait_for_runs(2).await;

    assert_eq!(harness.log.count("detect"), 1);
    assert!(harness.log.contains("transcribe:fr"));
}

#[tokio::test]
async fn test_detection_failure_falls_back_to_preference() {
    let session = Session::new("user_demo", "hey dev").with_preferred_language(Language::Italian);
    let harness = Harness::with_session(
        Script {
            detected: None,
            ..Script::default()
        },
        session,
        ManualMonitor::default(),
    );
    harness.orchestrator.start().await.unwrap();

    harness.monitor.fire(ListeningState::Active);
    harness.wait_for_runs(1).await;

    assert!(harness.log.contains("transcribe:it"));
    assert!(harness.log.contains("dispatch:turn off the lights"));
}

#[tokio::test]
async fn test_reply_uses_current_preference() {
    let harness = Harness::new(Script {
        detected: Some(Language::French),
        ..Script::default()
    });
    harness.orchestrator.start().await.unwrap();
    harness
        .orchestrator
        .set_language_preference(Language::German)
        .await;

    harness.monitor.fire(ListeningState::Active);
    harness.wait_for_runs(1).await;

    assert!(harness.log.contains("transcribe:fr"));
    assert!(harness.log.contains("synthesize:Lights turned off:de"));
    assert_eq!(
        harness.orchestrator.session().await.preferred_language,
        Language::German
    );
}

#[tokio::test]
async fn test_set_wake_word_reaches_monitor() {
    let harness = Harness::new(Script::default());

    harness.orchestrator.set_wake_word("  OK Herald ").await;

    assert_eq!(harness.monitor.wake_phrase(), "ok herald");
    assert_eq!(
        harness.orchestrator.session().await.active_wake_phrase,
        "ok herald"
    );
}

#[tokio::test]
async fn test_stop_is_idempotent_and_final() {
    let harness = Harness::new(Script::default());
    harness.orchestrator.start().await.unwrap();

    harness.orchestrator.stop().await;
    assert_eq!(harness.orchestrator.state(), OrchestratorState::Stopped);
    assert_eq!(harness.monitor.stops(), 1);
    assert_eq!(harness.playback.stops(), 1);

    harness.orchestrator.stop().await;
    assert_eq!(harness.monitor.stops(), 1);
    assert_eq!(harness.playback.stops(), 1);

    // A late event from the monitor must not start a pipeline
    harness.monitor.fire(ListeningState::Active);
    tokio::time::sleep(Duration::from_millis(50)).await;
    harness.orchestrator.join().await;

    assert_eq!(harness.orchestrator.state(), OrchestratorState::Stopped);
    assert_eq!(harness.orchestrator.stats().runs_started, 0);
    assert!(harness.orchestrator.start().await.is_err());
}

#[tokio::test]
async fn test_stop_during_processing_cancels_remaining_stages() {
    let harness = Harness::new(Script {
        gated: true,
        ..Script::default()
    });
    harness.orchestrator.start().await.unwrap();

    harness.monitor.fire(ListeningState::Active);
    wait_for_capture(&harness).await;

    harness.orchestrator.stop().await;
    harness.release_capture();
    harness.orchestrator.join().await;

    assert_eq!(harness.orchestrator.state(), OrchestratorState::Stopped);
    assert_eq!(harness.log.entries(), vec!["capture"]);
    assert_eq!(harness.orchestrator.stats().runs_completed, 1);
}

#[tokio::test]
async fn test_start_twice_rejected() {
    let harness = Harness::new(Script::default());

    harness.orchestrator.start().await.unwrap();
    assert!(harness.orchestrator.start().await.is_err());
    assert_eq!(harness.monitor.starts(), 1);
}

#[tokio::test]
async fn test_failed_monitor_start_returns_to_idle() {
    let harness = Harness::with_session(
        Script::default(),
        Session::new("user_demo", "hey dev"),
        ManualMonitor::failing(),
    );

    assert!(harness.orchestrator.start().await.is_err());
    assert_eq!(harness.orchestrator.state(), OrchestratorState::Idle);
}

#[tokio::test]
async fn test_runtime_override_bypasses_detection() {
    let harness = Harness::new(Script {
        detected: Some(Language::Spanish),
        ..Script::default()
    });
    harness.orchestrator.start().await.unwrap();

    harness.orchestrator.override_language(Language::Japanese).await;
    assert_eq!(harness.detector.sticky(), Some(Language::Japanese));
    assert_eq!(
        harness.orchestrator.session().await.language_override,
        Some(Language::Japanese)
    );

    harness.monitor.fire(ListeningState::Active);
    harness.wait_for_runs(1).await;

    assert!(!harness.log.contains("detect"));
    assert!(harness.log.contains("transcribe:ja"));
    assert!(!harness.log.contains("transcribe:es"));
}

#[tokio::test]
async fn test_stop_interrupts_playback() {
    let harness = Harness::new(Script {
        playback_held: true,
        ..Script::default()
    });
    harness.orchestrator.start().await.unwrap();

    harness.monitor.fire(ListeningState::Active);
    wait_for_playback(&harness).await;
    assert_eq!(harness.orchestrator.state(), OrchestratorState::Processing);

    harness.orchestrator.stop().await;
    harness.orchestrator.join().await;

    let stats = harness.orchestrator.stats();
    assert_eq!(stats.playback_interrupted, 1);
    assert_eq!(stats.runs_completed, 1);
    assert_eq!(harness.orchestrator.state(), OrchestratorState::Stopped);
}

#[tokio::test]
async fn test_stop_after_last_stage_check_still_interrupts_playback() {
    let doubles = Doubles::new(Script {
        playback_held: true,
        ..Script::default()
    });
    let stats = Arc::new(PipelineStats::default());
    let pipeline = Pipeline::new(doubles.engines, Arc::clone(&stats));
    let session = RwLock::new(Session::new("user_demo", "hey dev"));

    // Every stage check passes; the stop only becomes visible once the clip is playing
    let checks = AtomicUsize::new(0);
    let stage_checks = 5;
    let is_stopped = move || checks.fetch_add(1, Ordering::SeqCst) >= stage_checks;

    let outcome = tokio::time::timeout(Duration::from_secs(2), pipeline.run(&session, &is_stopped))
        .await
        .expect("playback was never interrupted");

    assert_eq!(outcome, PipelineOutcome::Interrupted);
    assert_eq!(doubles.playback.stops(), 1);
    assert!(doubles.log.contains("play"));
    assert_eq!(stats.snapshot().playback_interrupted, 1);
}

#[tokio::test]
async fn test_stop_waits_for_start_in_progress() {
    let harness = Arc::new(Harness::with_session(
        Script::default(),
        Session::new("user_demo", "hey dev"),
        ManualMonitor::gated(),
    ));

    let starter = Arc::clone(&harness);
    let start = tokio::spawn(async move { starter.orchestrator.start().await });
    harness.monitor.start_entered().await;

    let stopper = Arc::clone(&harness);
    let stop = tokio::spawn(async move { stopper.orchestrator.stop().await });
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!stop.is_finished());

    harness.monitor.release_start();
    stop.await.unwrap();

    assert!(!harness.monitor.is_running());
    assert_eq!(harness.monitor.stops(), 1);
    assert_eq!(harness.orchestrator.state(), OrchestratorState::Stopped);
    assert!(start.await.unwrap().is_ok());

    harness.orchestrator.join().await;
    assert_eq!(harness.orchestrator.state(), OrchestratorState::Stopped);
}

#[tokio::test]
async fn test_stop_during_failing_start_stays_stopped() {
    let harness = Arc::new(Harness::with_session(
        Script::default(),
        Session::new("user_demo", "hey dev"),
        ManualMonitor::gated_failing(),
    ));

    let starter = Arc::clone(&harness);
    let start = tokio::spawn(async move { starter.orchestrator.start().await });
    harness.monitor.start_entered().await;

    let stopper = Arc::clone(&harness);
    let stop = tokio::spawn(async move { stopper.orchestrator.stop().await });
    tokio::time::sleep(Duration::from_millis(20)).await;

    harness.monitor.release_start();
    assert!(start.await.unwrap().is_err());
    stop.await.unwrap();

    assert_eq!(harness.orchestrator.state(), OrchestratorState::Stopped);
    assert!(harness.orchestrator.start().await.is_err());
}
