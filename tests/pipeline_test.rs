//! End-to-end tests for the wearable and companion pipelines.
//!
//! Every test runs on a paused tokio clock, so dwell and cooldown timings are
//! exact and the tests finish instantly.

use chrono::TimeZone;
use pretty_assertions::assert_eq;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use watchher_core::{
    companion::CompanionService,
    core::{AlertState, RiskClassifier, RiskScorer},
    link_pair,
    simulation::{spawn_sensor_feed, Scenario, DEMO_FOREST},
    sinks::FixedClock,
    stats::{create_shared_stats, SharedStats},
    telemetry::{
        decode_features, encode_confidence, encode_features, Envelope, PHONE_TO_WATCH_PATH,
        WATCH_TO_PHONE_PATH,
    },
    AlertSink, CompanionSink, CompanionUpdate, Config, FeatureVector, HelpRequest, MonitorStatus,
    TelemetryError, Transport, TransportError, WearableMonitor,
};

#[derive(Default)]
struct Recorder {
    sent: Mutex<Vec<Envelope>>,
    pulses: Mutex<usize>,
    help: Mutex<Vec<HelpRequest>>,
    rendered: Mutex<Vec<CompanionUpdate>>,
}

impl Recorder {
    fn pulses(&self) -> usize {
        *self.pulses.lock().unwrap()
    }

    fn help_count(&self) -> usize {
        self.help.lock().unwrap().len()
    }

    fn sent_features(&self) -> Vec<FeatureVector> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.path == WATCH_TO_PHONE_PATH)
            .map(|e| decode_features(&e.payload).unwrap())
            .collect()
    }
}

impl Transport for Recorder {
    fn send(&self, path: &str, payload: Vec<u8>) -> Result<(), TransportError> {
        self.sent.lock().unwrap().push(Envelope {
            path: path.to_string(),
            payload,
        });
        Ok(())
    }
}

impl AlertSink for Recorder {
    fn vibrate(&self) {
        *self.pulses.lock().unwrap() += 1;
    }

    fn dispatch_help(&self, request: &HelpRequest) {
        self.help.lock().unwrap().push(request.clone());
    }

    fn render(&self, _status: &MonitorStatus) {}
}

impl CompanionSink for Recorder {
    fn render(&self, update: &CompanionUpdate) {
        self.rendered.lock().unwrap().push(update.clone());
    }
}

fn clock() -> Arc<FixedClock> {
    Arc::new(FixedClock(
        chrono::Utc.with_ymd_and_hms(2024, 6, 14, 23, 10, 0).unwrap(),
    ))
}

fn wearable(recorder: &Arc<Recorder>) -> WearableMonitor {
    WearableMonitor::builder(Config::default(), recorder.clone(), recorder.clone())
        .clock(clock())
        .build()
        .unwrap()
}

fn demo_scorer(stats: &SharedStats) -> RiskScorer {
    let classifier = RiskClassifier::from_json(DEMO_FOREST).unwrap();
    RiskScorer::new(Some(Arc::new(classifier)), stats.clone())
}

async fn send_confidence(monitor: &WearableMonitor, pct: f64) {
    monitor
        .handle_inbound(PHONE_TO_WATCH_PATH, &encode_confidence(pct).unwrap())
        .await
        .unwrap();
}

async fn sleep_secs(secs: f64) {
    tokio::time::sleep(Duration::from_secs_f64(secs)).await;
}

#[tokio::test(start_paused = true)]
async fn test_sustained_confidence_dispatches_help_once() {
    let recorder = Arc::new(Recorder::default());
    let mut monitor = wearable(&recorder);
    monitor.start().unwrap();

    send_confidence(&monitor, 70.0).await;
    assert_eq!(monitor.state().await, AlertState::Detecting);

    for _ in 0..15 {
        sleep_secs(1.0).await;
        send_confidence(&monitor, 70.0).await;
    }

    assert_eq!(monitor.state().await, AlertState::AlertSent);
    assert_eq!(recorder.help_count(), 1);
    // Pulses at 0, 2.5, 5 and 7.5 seconds into the dwell.
    assert_eq!(recorder.pulses(), 4);

    // The snapshot at tick 20 reports the escalation.
    sleep_secs(5.5).await;
    let snapshots = recorder.sent_features();
    assert_eq!(snapshots.len(), 2);
    assert!(snapshots[1].needs_help);

    let stats = monitor.stats().stats();
    assert_eq!(stats.help_dispatches, 1);
    assert_eq!(stats.vibration_pulses, 4);
    monitor.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_cancel_suppresses_detection_until_cooldown_expires() {
    let recorder = Arc::new(Recorder::default());
    let mut monitor = wearable(&recorder);
    monitor.start().unwrap();

    send_confidence(&monitor, 90.0).await;
    sleep_secs(4.0).await;

    assert!(monitor.cancel().await);
    let status = monitor.status().await;
    assert_eq!(status.state, AlertState::Safe);
    assert_eq!(status.cooldown_remaining_ms, 15_000);

    for second in 5..15 {
        sleep_secs(1.0).await;
        send_confidence(&monitor, 90.0).await;
        assert_eq!(monitor.state().await, AlertState::Safe, "at {second}s");
    }

    // Cooldown ends 19 s in; samples from inside it do not arm detection.
    sleep_secs(5.5).await;
    assert_eq!(monitor.state().await, AlertState::Safe);

    send_confidence(&monitor, 90.0).await;
    assert_eq!(monitor.state().await, AlertState::Detecting);
    assert_eq!(recorder.help_count(), 0);
    assert_eq!(monitor.stats().stats().cancellations, 1);

    // A second cancel outside detection is a no-op.
    sleep_secs(11.0).await;
    assert_eq!(monitor.state().await, AlertState::AlertSent);
    assert!(!monitor.cancel().await);
    assert_eq!(recorder.help_count(), 1);
    monitor.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_cancel_before_dwell_boundary_prevents_alert() {
    let recorder = Arc::new(Recorder::default());
    let mut monitor = wearable(&recorder);
    monitor.start().unwrap();

    send_confidence(&monitor, 95.0).await;
    sleep_secs(9.9).await;
    assert!(monitor.cancel().await);

    sleep_secs(5.0).await;
    assert_eq!(monitor.state().await, AlertState::Safe);
    assert_eq!(recorder.help_count(), 0);
    monitor.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_recovery_applies_long_cooldown() {
    let recorder = Arc::new(Recorder::default());
    let mut monitor = wearable(&recorder);
    monitor.start().unwrap();

    send_confidence(&monitor, 80.0).await;
    sleep_secs(11.0).await;
    assert_eq!(monitor.state().await, AlertState::AlertSent);

    send_confidence(&monitor, 40.0).await;
    let status = monitor.status().await;
    assert_eq!(status.state, AlertState::Safe);
    assert_eq!(status.cooldown_remaining_ms, 30_000);

    send_confidence(&monitor, 99.0).await;
    sleep_secs(29.5).await;
    assert_eq!(monitor.state().await, AlertState::Safe);

    sleep_secs(1.0).await;
    assert_eq!(monitor.state().await, AlertState::Safe);

    send_confidence(&monitor, 99.0).await;
    assert_eq!(monitor.state().await, AlertState::Detecting);
    assert_eq!(recorder.help_count(), 1);
    monitor.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_silent_companion_after_cancel_never_alerts() {
    let recorder = Arc::new(Recorder::default());
    let mut monitor = wearable(&recorder);
    monitor.start().unwrap();

    send_confidence(&monitor, 90.0).await;
    sleep_secs(4.0).await;
    assert!(monitor.cancel().await);

    sleep_secs(40.0).await;
    assert_eq!(monitor.state().await, AlertState::Safe);
    assert_eq!(recorder.help_count(), 0);
    monitor.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_alert_holds_until_a_later_sample_drops() {
    let recorder = Arc::new(Recorder::default());
    let mut monitor = wearable(&recorder);
    monitor.start().unwrap();

    send_confidence(&monitor, 80.0).await;
    sleep_secs(3.0).await;
    send_confidence(&monitor, 40.0).await;
    assert_eq!(monitor.state().await, AlertState::Detecting);

    // The tick at 20 s reports needsHelp since no sample has arrived since.
    sleep_secs(17.5).await;
    assert_eq!(monitor.state().await, AlertState::AlertSent);
    let snapshots = recorder.sent_features();
    assert_eq!(snapshots.len(), 2);
    assert!(snapshots[1].needs_help);

    send_confidence(&monitor, 40.0).await;
    assert_eq!(monitor.state().await, AlertState::Safe);
    monitor.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_invalid_confidence_message_leaves_state_unchanged() {
    let recorder = Arc::new(Recorder::default());
    let mut monitor = wearable(&recorder);
    monitor.start().unwrap();

    send_confidence(&monitor, 75.0).await;
    sleep_secs(3.0).await;
    let before = monitor.status().await;

    let err = monitor
        .handle_inbound(PHONE_TO_WATCH_PATH, br#"{"confidence":0.1}"#)
        .await
        .unwrap_err();
    assert_eq!(
        err,
        TelemetryError::MissingField("confidencePercentage".to_string())
    );

    let err = monitor
        .handle_inbound(PHONE_TO_WATCH_PATH, br#"{"confidencePercentage":250}"#)
        .await
        .unwrap_err();
    assert_eq!(err.field(), Some("confidencePercentage"));

    assert_eq!(monitor.status().await, before);
    assert_eq!(monitor.stats().stats().decode_failures, 2);
    monitor.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_companion_rejects_message_missing_field() {
    let recorder = Arc::new(Recorder::default());
    let stats = create_shared_stats();
    let companion = CompanionService::new(
        demo_scorer(&stats),
        recorder.clone(),
        recorder.clone(),
        stats.clone(),
    );

    let mut message = serde_json::to_value(FeatureVector::default()).unwrap();
    message.as_object_mut().unwrap().remove("accelPeak");

    let err = companion
        .handle_message(WATCH_TO_PHONE_PATH, message.to_string().as_bytes())
        .unwrap_err();
    assert_eq!(err.field(), Some("accelPeak"));
    assert!(recorder.sent.lock().unwrap().is_empty());
    assert!(recorder.rendered.lock().unwrap().is_empty());

    // The next valid message is processed normally.
    let payload = encode_features(&FeatureVector::default()).unwrap();
    assert!(companion
        .handle_message(WATCH_TO_PHONE_PATH, &payload)
        .is_ok());
    assert_eq!(recorder.sent.lock().unwrap().len(), 1);
    assert_eq!(stats.stats().decode_failures, 1);
}

#[tokio::test(start_paused = true)]
async fn test_distress_over_link_escalates() {
    let wearable_sink = Arc::new(Recorder::default());
    let companion_sink = Arc::new(Recorder::default());
    let stats = create_shared_stats();
    let ((wearable_tx, wearable_rx), (companion_tx, companion_rx)) = link_pair();

    let companion = Arc::new(CompanionService::new(
        demo_scorer(&stats),
        Arc::new(companion_tx),
        companion_sink.clone(),
        stats.clone(),
    ));
    let companion_task = companion.spawn(companion_rx);

    let mut monitor =
        WearableMonitor::builder(Config::default(), Arc::new(wearable_tx), wearable_sink.clone())
            .clock(clock())
            .stats(stats.clone())
            .build()
            .unwrap();
    monitor.attach_inbound(wearable_rx);
    monitor.start().unwrap();
    let feed = spawn_sensor_feed(monitor.sensor_handle(), Scenario::Distress, 1.0);

    // First snapshot at 10 s starts the dwell; the alert follows at 20 s.
    sleep_secs(15.0).await;
    assert_eq!(monitor.state().await, AlertState::Detecting);
    assert!(wearable_sink.pulses() >= 2);

    sleep_secs(10.0).await;
    assert_eq!(monitor.state().await, AlertState::AlertSent);
    assert_eq!(wearable_sink.help_count(), 1);

    let help = wearable_sink.help.lock().unwrap()[0].clone();
    assert!(help.confidence_pct > 60.0);
    assert!(help.features.is_some());

    let rendered = companion_sink.rendered.lock().unwrap().clone();
    assert_eq!(rendered.len(), 2);
    assert!(rendered.iter().all(|u| u.confidence_pct > 60.0));

    let counters = stats.stats();
    assert_eq!(counters.snapshots_sent, 2);
    assert_eq!(counters.predictions, 2);
    assert_eq!(counters.decode_failures, 0);

    feed.abort();
    monitor.stop().await;
    companion_task.abort();
}

#[tokio::test(start_paused = true)]
async fn test_calm_over_link_stays_safe() {
    let wearable_sink = Arc::new(Recorder::default());
    let stats = create_shared_stats();
    let ((wearable_tx, wearable_rx), (companion_tx, companion_rx)) = link_pair();

    let companion = Arc::new(CompanionService::new(
        demo_scorer(&stats),
        Arc::new(companion_tx),
        Arc::new(Recorder::default()),
        stats.clone(),
    ));
    let companion_task = companion.spawn(companion_rx);

    let mut monitor =
        WearableMonitor::builder(Config::default(), Arc::new(wearable_tx), wearable_sink.clone())
            .stats(stats.clone())
            .build()
            .unwrap();
    monitor.attach_inbound(wearable_rx);
    monitor.start().unwrap();
    let feed = spawn_sensor_feed(monitor.sensor_handle(), Scenario::Calm, 1.0);

    sleep_secs(45.0).await;
    assert_eq!(monitor.state().await, AlertState::Safe);
    assert_eq!(wearable_sink.pulses(), 0);
    assert_eq!(wearable_sink.help_count(), 0);
    assert_eq!(stats.stats().snapshots_sent, 4);

    feed.abort();
    monitor.stop().await;
    companion_task.abort();
}

#[tokio::test(start_paused = true)]
async fn test_missing_model_never_alerts() {
    let wearable_sink = Arc::new(Recorder::default());
    let stats = create_shared_stats();
    let ((wearable_tx, wearable_rx), (companion_tx, companion_rx)) = link_pair();

    let scorer = RiskScorer::load_or_fallback("/nonexistent/rf_model.json", stats.clone());
    assert!(!scorer.has_model());
    let companion = Arc::new(CompanionService::new(
        scorer,
        Arc::new(companion_tx),
        Arc::new(Recorder::default()),
        stats.clone(),
    ));
    let companion_task = companion.spawn(companion_rx);

    let mut monitor =
        WearableMonitor::builder(Config::default(), Arc::new(wearable_tx), wearable_sink.clone())
            .stats(stats.clone())
            .build()
            .unwrap();
    monitor.attach_inbound(wearable_rx);
    monitor.start().unwrap();
    let feed = spawn_sensor_feed(monitor.sensor_handle(), Scenario::Distress, 1.0);

    sleep_secs(35.0).await;
    assert_eq!(monitor.state().await, AlertState::Safe);
    assert_eq!(monitor.status().await.confidence_pct, 0.0);
    assert_eq!(wearable_sink.help_count(), 0);
    assert_eq!(stats.stats().model_fallbacks, 3);

    feed.abort();
    monitor.stop().await;
    companion_task.abort();
}

#[tokio::test(start_paused = true)]
async fn test_unreachable_peer_counts_send_failures() {
    let wearable_sink = Arc::new(Recorder::default());
    let ((wearable_tx, _wearable_rx), (_companion_tx, _companion_rx)) = link_pair();
    wearable_tx.set_connected(false);

    let mut monitor =
        WearableMonitor::builder(Config::default(), Arc::new(wearable_tx), wearable_sink)
            .build()
            .unwrap();
    monitor.start().unwrap();

    sleep_secs(20.5).await;
    let counters = monitor.stats().stats();
    assert_eq!(counters.ticks, 20);
    assert_eq!(counters.snapshots_sent, 0);
    assert_eq!(counters.send_failures, 2);
    assert_eq!(monitor.state().await, AlertState::Safe);
    monitor.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_readings_after_stop_are_dropped() {
    let recorder = Arc::new(Recorder::default());
    let mut monitor = wearable(&recorder);
    let sensors = monitor.sensor_handle();

    assert!(sensors.heart_rate(80).is_err());
    monitor.start().unwrap();
    assert!(sensors.heart_rate(80).is_ok());
    monitor.stop().await;
    assert!(sensors.heart_rate(80).is_err());
    assert_eq!(monitor.stats().stats().dropped_readings, 2);
}
