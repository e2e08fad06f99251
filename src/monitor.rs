//! Wearable pipeline.
//!
//! ```text
//!  SensorHandle ──▶ SensorHub ──▶ SampleAggregator ──every 10th tick──▶ Transport
//!                                    (1 Hz tick)                   watch_to_phone
//!
//!  Transport ──phone_to_watch──▶ AlertStateMachine ──▶ AlertSink
//!  cancel() ──────────────────▶        │               (vibrate, help, render)
//!                                      └─ alert timer (pulses, dwell, cooldown)
//! ```
//!
//! The aggregator and the state machine each sit behind their own
//! `tokio::sync::Mutex`. Neither lock is ever held while acquiring the other.

use crate::config::{Config, ConfigError};
use crate::core::alert::{AlertEffect, AlertState, AlertStateMachine};
use crate::core::classifier::RiskScorer;
use crate::core::features::FeatureVector;
use crate::core::windowing::SampleAggregator;
use crate::sensors::{SensorError, SensorHandle, SensorHub};
use crate::sinks::{AlertSink, HelpRequest, MonitorStatus, SystemClock, WallClock};
use crate::stats::{create_shared_stats, SharedStats};
use crate::telemetry::{
    decode_inbound, encode_features, InboundMessage, LinkReceiver, TelemetryError, Transport,
    WATCH_TO_PHONE_PATH,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("Sensor error: {0}")]
    Sensor(#[from] SensorError),
    #[error("Monitor is already running")]
    AlreadyRunning,
}

struct AlertSlot {
    machine: AlertStateMachine,
    /// Task sleeping until the machine's next deadline
    timer: Option<JoinHandle<()>>,
    armed_for: Option<Instant>,
    last_features: Option<FeatureVector>,
}

struct MonitorInner {
    config: Config,
    hub: SensorHub,
    aggregator: Mutex<SampleAggregator>,
    alerts: Mutex<AlertSlot>,
    local_scorer: Option<RiskScorer>,
    transport: Arc<dyn Transport>,
    sink: Arc<dyn AlertSink>,
    clock: Arc<dyn WallClock>,
    stats: SharedStats,
    /// Set by `stop()`; a stopped monitor ignores alert input
    stopped: AtomicBool,
}

/// Builder for [`WearableMonitor`].
pub struct MonitorBuilder {
    config: Config,
    transport: Arc<dyn Transport>,
    sink: Arc<dyn AlertSink>,
    clock: Arc<dyn WallClock>,
    local_scorer: Option<RiskScorer>,
    stats: Option<SharedStats>,
}

impl MonitorBuilder {
    pub fn clock(mut self, clock: Arc<dyn WallClock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn stats(mut self, stats: SharedStats) -> Self {
        self.stats = Some(stats);
        self
    }

    /// Score snapshots on the wearable itself, in addition to any
    /// confidence the companion sends back.
    pub fn local_scorer(mut self, scorer: RiskScorer) -> Self {
        self.local_scorer = Some(scorer);
        self
    }

    pub fn build(self) -> Result<WearableMonitor, MonitorError> {
        self.config.validate()?;
        let timezone = self.config.tz()?;
        let stats = self.stats.unwrap_or_else(create_shared_stats);

        let aggregator = SampleAggregator::new(
            self.config.window_capacity,
            self.config.snapshot_every_ticks,
            self.config.tick_interval,
            timezone,
        );
        let machine = AlertStateMachine::new(self.config.alert.clone(), Instant::now());

        let inner = MonitorInner {
            hub: SensorHub::new(self.config.sensor_queue_capacity, stats.clone()),
            aggregator: Mutex::new(aggregator),
            alerts: Mutex::new(AlertSlot {
                machine,
                timer: None,
                armed_for: None,
                last_features: None,
            }),
            local_scorer: self.local_scorer,
            transport: self.transport,
            sink: self.sink,
            clock: self.clock,
            stats,
            config: self.config,
            stopped: AtomicBool::new(false),
        };

        Ok(WearableMonitor {
            inner: Arc::new(inner),
            tasks: Vec::new(),
        })
    }
}

/// The wearable side: owns the sensor queue, the windows and the alert
/// workflow.
pub struct WearableMonitor {
    inner: Arc<MonitorInner>,
    tasks: Vec<JoinHandle<()>>,
}

impl WearableMonitor {
    pub fn builder(
        config: Config,
        transport: Arc<dyn Transport>,
        sink: Arc<dyn AlertSink>,
    ) -> MonitorBuilder {
        MonitorBuilder {
            config,
            transport,
            sink,
            clock: Arc::new(SystemClock),
            local_scorer: None,
            stats: None,
        }
    }

    /// Producer handle for a sensor callback.
    pub fn sensor_handle(&self) -> SensorHandle {
        self.inner.hub.handle()
    }

    pub fn stats(&self) -> &SharedStats {
        &self.inner.stats
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub fn is_running(&self) -> bool {
        !self.tasks.is_empty()
    }

    /// Start accepting sensor readings and spawn the tick task.
    pub fn start(&mut self) -> Result<(), MonitorError> {
        if self.is_running() {
            return Err(MonitorError::AlreadyRunning);
        }
        self.inner.hub.start()?;
        self.inner.stopped.store(false, Ordering::SeqCst);

        let inner = Arc::clone(&self.inner);
        let period = inner.config.tick_interval;
        self.tasks.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                inner.tick().await;
            }
        }));

        tracing::info!(
            tick_ms = period.as_millis() as u64,
            snapshot_every = self.inner.config.snapshot_every_ticks,
            "wearable monitor started"
        );
        Ok(())
    }

    /// Feed confidence messages arriving on `receiver` into the monitor.
    pub fn attach_inbound(&mut self, mut receiver: LinkReceiver) {
        let inner = Arc::clone(&self.inner);
        self.tasks.push(tokio::spawn(async move {
            while let Some(envelope) = receiver.recv().await {
                // Failures are logged and counted inside.
                let _ = inner.handle_inbound(&envelope.path, &envelope.payload).await;
            }
            tracing::debug!("inbound link closed");
        }));
    }

    /// Stop all tasks, discard queued readings and persist counters.
    pub async fn stop(&mut self) {
        self.inner.stopped.store(true, Ordering::SeqCst);
        for task in self.tasks.drain(..) {
            task.abort();
        }
        {
            let mut slot = self.inner.alerts.lock().await;
            if let Some(timer) = slot.timer.take() {
                timer.abort();
            }
            slot.armed_for = None;
        }
        self.inner.hub.stop();

        if let Err(e) = self.inner.stats.save() {
            tracing::warn!(error = %e, "failed to persist counters");
        }
        tracing::info!("wearable monitor stopped");
    }

    /// Run one tick immediately. Returns the snapshot if one was due.
    pub async fn tick(&self) -> Option<FeatureVector> {
        self.inner.tick().await
    }

    /// Take and send a snapshot now, regardless of the tick schedule.
    pub async fn publish_snapshot(&self) -> FeatureVector {
        self.inner.publish_snapshot().await
    }

    /// Decode and apply one inbound message. A message that fails
    /// validation is dropped and leaves all state untouched.
    pub async fn handle_inbound(&self, path: &str, payload: &[u8]) -> Result<(), TelemetryError> {
        self.inner.handle_inbound(path, payload).await
    }

    /// Apply a confidence percentage directly.
    pub async fn apply_confidence(&self, confidence_pct: f64) {
        self.inner.apply_confidence(confidence_pct).await
    }

    /// User cancel. Returns `true` if a detection was cancelled.
    pub async fn cancel(&self) -> bool {
        self.inner.cancel().await
    }

    pub async fn state(&self) -> AlertState {
        self.inner.alerts.lock().await.machine.state()
    }

    pub async fn status(&self) -> MonitorStatus {
        self.inner.status().await
    }
}

impl Drop for WearableMonitor {
    fn drop(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
        if let Ok(mut slot) = self.inner.alerts.try_lock() {
            if let Some(timer) = slot.timer.take() {
                timer.abort();
            }
        }
    }
}

impl MonitorInner {
    async fn tick(self: &Arc<Self>) -> Option<FeatureVector> {
        let due = {
            let mut aggregator = self.aggregator.lock().await;
            for reading in self.hub.drain() {
                aggregator.apply(reading);
            }
            aggregator.tick()
        };
        self.stats.record_tick();

        let snapshot = if due {
            Some(self.publish_snapshot().await)
        } else {
            None
        };

        {
            let mut slot = self.alerts.lock().await;
            let effects = slot.machine.poll(Instant::now());
            self.perform(&slot, effects);
            self.rearm(&mut slot);
        }
        self.render().await;

        snapshot
    }

    async fn publish_snapshot(self: &Arc<Self>) -> FeatureVector {
        let features = {
            let aggregator = self.aggregator.lock().await;
            aggregator.snapshot(self.clock.now())
        };

        let features = {
            let mut slot = self.alerts.lock().await;
            let features = features.with_needs_help(slot.machine.needs_help());
            slot.last_features = Some(features);
            features
        };

        match encode_features(&features) {
            Ok(payload) => match self.transport.send(WATCH_TO_PHONE_PATH, payload) {
                Ok(()) => {
                    self.stats.record_snapshot_sent();
                    tracing::debug!(
                        hr_mean = features.hr_mean,
                        steps = features.steps_20s,
                        needs_help = features.needs_help,
                        "feature snapshot sent"
                    );
                }
                Err(e) => {
                    self.stats.record_send_failure();
                    tracing::warn!(error = %e, "feature snapshot not delivered");
                }
            },
            Err(e) => {
                self.stats.record_send_failure();
                tracing::warn!(error = %e, "failed to encode feature snapshot");
            }
        }

        if let Some(ref scorer) = self.local_scorer {
            let confidence = scorer.score_percentage(&features);
            self.apply_confidence(confidence).await;
        }

        features
    }

    async fn handle_inbound(
        self: &Arc<Self>,
        path: &str,
        payload: &[u8],
    ) -> Result<(), TelemetryError> {
        let confidence = match decode_inbound(path, payload) {
            Ok(InboundMessage::Confidence(message)) => message.confidence_percentage,
            Ok(InboundMessage::Features(_)) => {
                let err = TelemetryError::UnknownPath(path.to_string());
                self.reject(path, &err);
                return Err(err);
            }
            Err(err) => {
                self.reject(path, &err);
                return Err(err);
            }
        };

        self.apply_confidence(confidence).await;
        Ok(())
    }

    fn reject(&self, path: &str, err: &TelemetryError) {
        self.stats.record_decode_failure();
        tracing::warn!(
            path,
            field = err.field().unwrap_or("-"),
            error = %err,
            "inbound message discarded"
        );
    }

    async fn apply_confidence(self: &Arc<Self>, confidence_pct: f64) {
        if self.is_stopped() {
            tracing::debug!(confidence = confidence_pct, "monitor stopped, confidence ignored");
            return;
        }
        {
            let mut slot = self.alerts.lock().await;
            let effects = slot.machine.on_confidence(confidence_pct, Instant::now());
            self.perform(&slot, effects);
            self.rearm(&mut slot);
        }
        self.render().await;
    }

    async fn cancel(self: &Arc<Self>) -> bool {
        if self.is_stopped() {
            return false;
        }
        let cancelled = {
            let mut slot = self.alerts.lock().await;
            let effects = slot.machine.cancel(Instant::now());
            let cancelled = !effects.is_empty();
            self.perform(&slot, effects);
            self.rearm(&mut slot);
            cancelled
        };

        if cancelled {
            self.stats.record_cancellation();
            tracing::info!("detection cancelled by user");
            self.render().await;
        }
        cancelled
    }

    fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    async fn status(&self) -> MonitorStatus {
        let heart_rate = self.aggregator.lock().await.current_heart_rate();
        let slot = self.alerts.lock().await;
        let now = Instant::now();
        MonitorStatus {
            state: slot.machine.state(),
            confidence_pct: slot.machine.confidence_pct(),
            heart_rate,
            cooldown_remaining_ms: slot.machine.cooldown_remaining(now).as_millis() as u64,
            dwell_progress: slot.machine.dwell_progress(now),
        }
    }

    async fn render(&self) {
        let status = self.status().await;
        self.sink.render(&status);
    }

    /// Carry out the platform side of each effect.
    fn perform(&self, slot: &AlertSlot, effects: Vec<AlertEffect>) {
        for effect in effects {
            match effect {
                AlertEffect::VibrationPulse => {
                    self.stats.record_vibration_pulse();
                    self.sink.vibrate();
                }
                AlertEffect::DispatchHelp { confidence_pct } => {
                    let request =
                        HelpRequest::new(self.clock.now(), confidence_pct, slot.last_features);
                    self.stats.record_help_dispatch();
                    tracing::warn!(id = %request.id, confidence = confidence_pct, "dispatching help");
                    self.sink.dispatch_help(&request);
                }
                AlertEffect::StateChanged { .. } => {}
            }
        }
    }

    /// Make sure exactly one timer is sleeping until the machine's next
    /// deadline, or none if it has no deadline.
    fn rearm(self: &Arc<Self>, slot: &mut AlertSlot) {
        let deadline = if self.is_stopped() {
            None
        } else {
            slot.machine.next_deadline()
        };
        let live = slot.timer.as_ref().is_some_and(|t| !t.is_finished());
        if live && deadline == slot.armed_for {
            return;
        }

        if let Some(timer) = slot.timer.take() {
            timer.abort();
        }
        slot.armed_for = deadline;
        if let Some(deadline) = deadline {
            slot.timer = Some(self.spawn_alert_timer(deadline));
        }
    }

    fn spawn_alert_timer(self: &Arc<Self>, first: Instant) -> JoinHandle<()> {
        let inner = Arc::clone(self);
        tokio::spawn(async move {
            let mut deadline = first;
            loop {
                tokio::time::sleep_until(deadline).await;

                let next = {
                    let mut slot = inner.alerts.lock().await;
                    let effects = slot.machine.poll(Instant::now());
                    inner.perform(&slot, effects);

                    let next = slot.machine.next_deadline();
                    slot.armed_for = next;
                    if next.is_none() {
                        // Detach ourselves; nothing left to wait for.
                        slot.timer = None;
                    }
                    next
                };
                inner.render().await;

                match next {
                    Some(next) => deadline = next,
                    None => return,
                }
            }
        })
    }
}
