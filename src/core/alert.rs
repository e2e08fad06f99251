//! Alert state machine: SAFE → DETECTING → ALERT_SENT with cooldowns.
//!
//! ```text
//!            confidence > threshold
//!            and cooldown elapsed            dwell elapsed
//!   ┌──────┐ ───────────────────────▶ ┌───────────┐ ─────────────▶ ┌────────────┐
//!   │ SAFE │                          │ DETECTING │                │ ALERT_SENT │
//!   └──────┘ ◀─────────────────────── └───────────┘                └────────────┘
//!      ▲        cancel (+cancel cooldown)                                 │
//!      └──────────────────────────────────────────────────────────────────┘
//!                 confidence <= threshold (+recovery cooldown)
//! ```
//!
//! The machine owns no timers. Callers pass the current [`Instant`] into
//! every operation and perform the returned [`AlertEffect`]s; the runtime
//! uses [`AlertStateMachine::next_deadline`] to know when to poll again.
//!
//! Only a fresh sample can move the machine out of SAFE or ALERT_SENT. A
//! sample counts as fresh until a cooldown starts or the alert is sent, and
//! samples received during a cooldown never arm detection. A silent
//! companion therefore leaves the wearable where it is.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;

/// Thresholds and timings of the alert workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertConfig {
    /// Confidence percentage that must be exceeded to start detecting
    pub threshold_pct: f64,
    /// Time spent detecting before the alert is sent
    #[serde(with = "crate::config::duration_millis")]
    pub dwell: Duration,
    /// Suppression window after a user cancel
    #[serde(with = "crate::config::duration_millis")]
    pub cancel_cooldown: Duration,
    /// Suppression window after an alert resolves
    #[serde(with = "crate::config::duration_millis")]
    pub recovery_cooldown: Duration,
    /// Gap between vibration pulses while detecting
    #[serde(with = "crate::config::duration_millis")]
    pub vibration_interval: Duration,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            threshold_pct: 60.0,
            dwell: Duration::from_secs(10),
            cancel_cooldown: Duration::from_secs(15),
            recovery_cooldown: Duration::from_secs(30),
            vibration_interval: Duration::from_millis(2_500),
        }
    }
}

/// Alert workflow state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertState {
    Safe,
    Detecting,
    AlertSent,
}

impl std::fmt::Display for AlertState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AlertState::Safe => write!(f, "SAFE"),
            AlertState::Detecting => write!(f, "DETECTING"),
            AlertState::AlertSent => write!(f, "ALERT_SENT"),
        }
    }
}

/// Side effect the caller must perform after a transition or poll.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AlertEffect {
    StateChanged { from: AlertState, to: AlertState },
    VibrationPulse,
    /// Send the help request; emitted exactly once per escalation
    DispatchHelp { confidence_pct: f64 },
}

#[derive(Debug, Clone)]
pub struct AlertStateMachine {
    config: AlertConfig,
    state: AlertState,
    cooldown_until: Instant,
    /// Last confidence sample, kept for status and the help request
    confidence_pct: f64,
    /// Arrival time of the sample the machine may still act on
    sample_at: Option<Instant>,
    dwell_deadline: Option<Instant>,
    next_pulse: Option<Instant>,
}

impl AlertStateMachine {
    pub fn new(config: AlertConfig, now: Instant) -> Self {
        Self {
            config,
            state: AlertState::Safe,
            cooldown_until: now,
            confidence_pct: 0.0,
            sample_at: None,
            dwell_deadline: None,
            next_pulse: None,
        }
    }

    pub fn state(&self) -> AlertState {
        self.state
    }

    pub fn cooldown_until(&self) -> Instant {
        self.cooldown_until
    }

    pub fn confidence_pct(&self) -> f64 {
        self.confidence_pct
    }

    pub fn config(&self) -> &AlertConfig {
        &self.config
    }

    /// Whether the wearable should report `needsHelp`.
    pub fn needs_help(&self) -> bool {
        self.state == AlertState::AlertSent
    }

    /// Whether SAFE is currently pinned by a cooldown.
    pub fn is_suppressed(&self, now: Instant) -> bool {
        now < self.cooldown_until
    }

    pub fn cooldown_remaining(&self, now: Instant) -> Duration {
        self.cooldown_until.saturating_duration_since(now)
    }

    /// Fraction of the dwell elapsed, while detecting.
    pub fn dwell_progress(&self, now: Instant) -> Option<f64> {
        let deadline = self.dwell_deadline?;
        let remaining = deadline.saturating_duration_since(now).as_secs_f64();
        let dwell = self.config.dwell.as_secs_f64();
        if dwell <= 0.0 {
            return Some(1.0);
        }
        Some((1.0 - remaining / dwell).clamp(0.0, 1.0))
    }

    /// When the machine next needs a [`poll`](Self::poll) without new input.
    pub fn next_deadline(&self) -> Option<Instant> {
        match self.state {
            AlertState::Detecting => match (self.next_pulse, self.dwell_deadline) {
                (Some(pulse), Some(dwell)) => Some(pulse.min(dwell)),
                (pulse, dwell) => pulse.or(dwell),
            },
            _ => None,
        }
    }

    /// Record a confidence sample (percentage) and re-evaluate.
    pub fn on_confidence(&mut self, confidence_pct: f64, now: Instant) -> Vec<AlertEffect> {
        self.confidence_pct = if confidence_pct.is_finite() {
            confidence_pct.clamp(0.0, 100.0)
        } else {
            0.0
        };
        self.sample_at = Some(now);
        self.poll(now)
    }

    /// User cancel. Only meaningful while detecting; otherwise a no-op.
    pub fn cancel(&mut self, now: Instant) -> Vec<AlertEffect> {
        if self.state != AlertState::Detecting {
            return Vec::new();
        }
        self.cooldown_until = now + self.config.cancel_cooldown;
        self.sample_at = None;
        vec![self.enter(AlertState::Safe)]
    }

    /// Advance timed behavior (pulses, dwell expiry) and re-check thresholds.
    pub fn poll(&mut self, now: Instant) -> Vec<AlertEffect> {
        let mut effects = Vec::new();

        match self.state {
            AlertState::Safe => {
                let fresh = self
                    .sample_at
                    .is_some_and(|at| at >= self.cooldown_until);
                if fresh
                    && self.confidence_pct > self.config.threshold_pct
                    && now >= self.cooldown_until
                {
                    effects.push(self.enter(AlertState::Detecting));
                    effects.push(AlertEffect::VibrationPulse);
                    self.dwell_deadline = Some(now + self.config.dwell);
                    self.next_pulse = Some(now + self.config.vibration_interval);
                }
            }
            AlertState::Detecting => {
                let deadline = self.dwell_deadline.unwrap_or(now);

                if let Some(pulse) = self.next_pulse {
                    if pulse <= now && pulse < deadline {
                        effects.push(AlertEffect::VibrationPulse);
                        let mut next = pulse + self.config.vibration_interval;
                        // A late poll skips missed pulses rather than bursting them.
                        while next <= now && !self.config.vibration_interval.is_zero() {
                            next += self.config.vibration_interval;
                        }
                        self.next_pulse = Some(next);
                    }
                }

                if now >= deadline {
                    effects.push(self.enter(AlertState::AlertSent));
                    effects.push(AlertEffect::DispatchHelp {
                        confidence_pct: self.confidence_pct,
                    });
                }
            }
            AlertState::AlertSent => {
                if self.sample_at.is_some() && self.confidence_pct <= self.config.threshold_pct {
                    self.cooldown_until = now + self.config.recovery_cooldown;
                    self.sample_at = None;
                    effects.push(self.enter(AlertState::Safe));
                }
            }
        }

        effects
    }

    fn enter(&mut self, to: AlertState) -> AlertEffect {
        let from = self.state;
        self.state = to;
        if to != AlertState::Detecting {
            self.dwell_deadline = None;
            self.next_pulse = None;
        }
        if to == AlertState::AlertSent {
            self.sample_at = None;
        }
        tracing::info!(%from, %to, confidence = self.confidence_pct, "alert state changed");
        AlertEffect::StateChanged { from, to }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(s: f64) -> Duration {
        Duration::from_secs_f64(s)
    }

    fn count(effects: &[AlertEffect], pred: impl Fn(&AlertEffect) -> bool) -> usize {
        effects.iter().filter(|e| pred(e)).count()
    }

    fn is_help(e: &AlertEffect) -> bool {
        matches!(e, AlertEffect::DispatchHelp { .. })
    }

    #[test]
    fn test_sustained_confidence_escalates_once() {
        let t0 = Instant::now();
        let mut machine = AlertStateMachine::new(AlertConfig::default(), t0);
        let mut effects = Vec::new();

        for s in 0..=15 {
            effects.extend(machine.on_confidence(70.0, t0 + secs(s as f64)));
        }

        assert_eq!(machine.state(), AlertState::AlertSent);
        assert!(machine.needs_help());
        assert_eq!(count(&effects, is_help), 1);
        assert_eq!(
            count(&effects, |e| matches!(
                e,
                AlertEffect::StateChanged {
                    to: AlertState::Detecting,
                    ..
                }
            )),
            1
        );
        assert_eq!(
            count(&effects, |e| matches!(
                e,
                AlertEffect::StateChanged {
                    to: AlertState::AlertSent,
                    ..
                }
            )),
            1
        );
    }

    #[test]
    fn test_threshold_is_exclusive() {
        let t0 = Instant::now();
        let mut machine = AlertStateMachine::new(AlertConfig::default(), t0);
        assert!(machine.on_confidence(60.0, t0).is_empty());
        assert_eq!(machine.state(), AlertState::Safe);
        assert_eq!(machine.next_deadline(), None);
    }

    #[test]
    fn test_cancel_sets_cooldown_and_suppresses() {
        let t0 = Instant::now();
        let mut machine = AlertStateMachine::new(AlertConfig::default(), t0);
        machine.on_confidence(90.0, t0);
        assert_eq!(machine.state(), AlertState::Detecting);

        let cancel_at = t0 + secs(4.0);
        machine.poll(cancel_at);
        let effects = machine.cancel(cancel_at);
        assert_eq!(
            effects,
            vec![AlertEffect::StateChanged {
                from: AlertState::Detecting,
                to: AlertState::Safe
            }]
        );
        assert_eq!(machine.cooldown_until(), cancel_at + secs(15.0));

        for s in 5..19 {
            let effects = machine.on_confidence(90.0, t0 + secs(s as f64));
            assert!(effects.is_empty(), "re-entered detecting at {s}s");
            assert_eq!(machine.state(), AlertState::Safe);
        }
        assert_eq!(machine.next_deadline(), None);

        // Samples from inside the cooldown do not arm detection at expiry.
        assert!(machine.poll(t0 + secs(19.0)).is_empty());
        assert_eq!(machine.state(), AlertState::Safe);

        machine.on_confidence(90.0, t0 + secs(19.0));
        assert_eq!(machine.state(), AlertState::Detecting);
    }

    #[test]
    fn test_silent_companion_after_cancel_stays_safe() {
        let t0 = Instant::now();
        let mut machine = AlertStateMachine::new(AlertConfig::default(), t0);
        let mut effects = machine.on_confidence(90.0, t0);
        effects.extend(machine.cancel(t0 + secs(4.0)));

        for s in 5..=40 {
            effects.extend(machine.poll(t0 + secs(s as f64)));
        }

        assert_eq!(machine.state(), AlertState::Safe);
        assert_eq!(count(&effects, is_help), 0);
        assert_eq!(machine.next_deadline(), None);
    }

    #[test]
    fn test_sample_from_dwell_does_not_resolve_alert() {
        let t0 = Instant::now();
        let mut machine = AlertStateMachine::new(AlertConfig::default(), t0);
        machine.on_confidence(80.0, t0);
        machine.on_confidence(40.0, t0 + secs(3.0));
        machine.poll(t0 + secs(10.0));
        assert_eq!(machine.state(), AlertState::AlertSent);

        assert!(machine.poll(t0 + secs(11.0)).is_empty());
        assert!(machine.poll(t0 + secs(20.0)).is_empty());
        assert_eq!(machine.state(), AlertState::AlertSent);
        assert!(machine.needs_help());

        machine.on_confidence(40.0, t0 + secs(21.0));
        assert_eq!(machine.state(), AlertState::Safe);
    }

    #[test]
    fn test_cancel_prevents_dispatch() {
        let t0 = Instant::now();
        let mut machine = AlertStateMachine::new(AlertConfig::default(), t0);
        let mut effects = machine.on_confidence(95.0, t0);
        effects.extend(machine.cancel(t0 + secs(9.9)));
        effects.extend(machine.poll(t0 + secs(10.0)));
        effects.extend(machine.poll(t0 + secs(11.0)));

        assert_eq!(machine.state(), AlertState::Safe);
        assert_eq!(count(&effects, is_help), 0);
    }

    #[test]
    fn test_recovery_cooldown() {
        let t0 = Instant::now();
        let mut machine = AlertStateMachine::new(AlertConfig::default(), t0);
        machine.on_confidence(80.0, t0);
        machine.poll(t0 + secs(10.0));
        assert_eq!(machine.state(), AlertState::AlertSent);

        let drop_at = t0 + secs(12.0);
        let effects = machine.on_confidence(40.0, drop_at);
        assert_eq!(machine.state(), AlertState::Safe);
        assert_eq!(machine.cooldown_until(), drop_at + secs(30.0));
        assert_eq!(count(&effects, is_help), 0);

        machine.on_confidence(99.0, drop_at + secs(29.0));
        assert_eq!(machine.state(), AlertState::Safe);
        machine.poll(drop_at + secs(30.0));
        assert_eq!(machine.state(), AlertState::Safe);
        machine.on_confidence(99.0, drop_at + secs(30.0));
        assert_eq!(machine.state(), AlertState::Detecting);
    }

    #[test]
    fn test_alert_sent_holds_while_confidence_high() {
        let t0 = Instant::now();
        let mut machine = AlertStateMachine::new(AlertConfig::default(), t0);
        machine.on_confidence(80.0, t0);
        machine.poll(t0 + secs(10.0));

        for s in 11..60 {
            assert!(machine.on_confidence(61.0, t0 + secs(s as f64)).is_empty());
        }
        assert_eq!(machine.state(), AlertState::AlertSent);
    }

    #[test]
    fn test_low_confidence_does_not_abort_dwell() {
        let t0 = Instant::now();
        let mut machine = AlertStateMachine::new(AlertConfig::default(), t0);
        machine.on_confidence(80.0, t0);
        machine.on_confidence(10.0, t0 + secs(3.0));
        assert_eq!(machine.state(), AlertState::Detecting);
    }

    #[test]
    fn test_vibration_pulses_during_dwell() {
        let t0 = Instant::now();
        let mut machine = AlertStateMachine::new(AlertConfig::default(), t0);
        let mut effects = machine.on_confidence(75.0, t0);

        let mut t = 0.5;
        while t <= 12.0 {
            effects.extend(machine.poll(t0 + secs(t)));
            t += 0.5;
        }

        // Pulses at 0, 2.5, 5 and 7.5 seconds; none once the alert is sent.
        assert_eq!(
            count(&effects, |e| matches!(e, AlertEffect::VibrationPulse)),
            4
        );
        assert_eq!(count(&effects, is_help), 1);
    }

    #[test]
    fn test_cancel_outside_detecting_is_noop() {
        let t0 = Instant::now();
        let mut machine = AlertStateMachine::new(AlertConfig::default(), t0);
        assert!(machine.cancel(t0).is_empty());
        assert_eq!(machine.cooldown_until(), t0);

        machine.on_confidence(80.0, t0);
        machine.poll(t0 + secs(10.0));
        assert!(machine.cancel(t0 + secs(11.0)).is_empty());
        assert_eq!(machine.state(), AlertState::AlertSent);
    }

    #[test]
    fn test_next_deadline_while_detecting() {
        let t0 = Instant::now();
        let mut machine = AlertStateMachine::new(AlertConfig::default(), t0);
        machine.on_confidence(80.0, t0);
        assert_eq!(machine.next_deadline(), Some(t0 + secs(2.5)));
        assert_eq!(machine.dwell_progress(t0 + secs(5.0)), Some(0.5));
    }

    #[test]
    fn test_non_finite_confidence_treated_as_zero() {
        let t0 = Instant::now();
        let mut machine = AlertStateMachine::new(AlertConfig::default(), t0);
        machine.on_confidence(f64::NAN, t0);
        assert_eq!(machine.confidence_pct(), 0.0);
        assert_eq!(machine.state(), AlertState::Safe);
    }
}
