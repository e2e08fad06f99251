//! Demonstration of the WatchHer monitoring loop.
//!
//! This example shows how to:
//! 1. Pair a wearable monitor and a companion over an in-process link
//! 2. Feed synthetic sensor readings through a sensor handle
//! 3. Watch the companion's confidence drive the alert workflow
//! 4. Cancel a detection before help is dispatched
//!
//! Run with: cargo run --example monitor_demo
//!
//! Timings are compressed 5x so the whole run takes about 10 seconds.

use std::sync::Arc;
use std::time::Duration;

use watchher_core::{
    companion::CompanionService,
    config::Config,
    link_pair,
    simulation::{spawn_sensor_feed, Scenario, DEMO_FOREST},
    stats::create_shared_stats,
    AlertSink, HelpRequest, LoggingSink, MonitorStatus, RiskClassifier, RiskScorer,
    WearableMonitor,
};

const SPEED: f64 = 5.0;

/// Prints wearable effects to stdout.
struct ConsoleSink;

impl AlertSink for ConsoleSink {
    fn vibrate(&self) {
        println!("  * bzzt *");
    }

    fn dispatch_help(&self, request: &HelpRequest) {
        println!(
            "  >>> HELP REQUEST {} (confidence {:.0}%)",
            request.id, request.confidence_pct
        );
    }

    fn render(&self, status: &MonitorStatus) {
        println!("  [{status}]");
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("WatchHer - Monitor Demo");
    println!("=======================");
    println!();

    let mut config = Config::default();
    config.tick_interval = config.tick_interval.div_f64(SPEED);
    config.alert.dwell = config.alert.dwell.div_f64(SPEED);
    config.alert.cancel_cooldown = config.alert.cancel_cooldown.div_f64(SPEED);
    config.alert.recovery_cooldown = config.alert.recovery_cooldown.div_f64(SPEED);
    config.alert.vibration_interval = config.alert.vibration_interval.div_f64(SPEED);

    let stats = create_shared_stats();
    let classifier = RiskClassifier::from_json(DEMO_FOREST)?;
    println!("Loaded demo forest ({} trees)", classifier.tree_count());
    println!();

    let ((wearable_tx, wearable_rx), (companion_tx, companion_rx)) = link_pair();

    let companion = Arc::new(CompanionService::new(
        RiskScorer::new(Some(Arc::new(classifier)), stats.clone()),
        Arc::new(companion_tx),
        Arc::new(LoggingSink),
        stats.clone(),
    ));
    let companion_task = companion.spawn(companion_rx);

    let mut monitor = WearableMonitor::builder(config, Arc::new(wearable_tx), Arc::new(ConsoleSink))
        .stats(stats.clone())
        .build()?;
    monitor.attach_inbound(wearable_rx);
    monitor.start()?;

    println!("Distress scenario, cancelling shortly after detection starts...");
    let feed = spawn_sensor_feed(monitor.sensor_handle(), Scenario::Distress, SPEED);

    // First snapshot lands after 10 scenario seconds.
    tokio::time::sleep(Duration::from_secs_f64(13.0 / SPEED)).await;
    if monitor.cancel().await {
        println!("  (user cancelled)");
    }

    // Cooldown expires, detection re-arms and this time runs to completion.
    tokio::time::sleep(Duration::from_secs_f64(40.0 / SPEED)).await;

    feed.abort();
    monitor.stop().await;
    companion_task.abort();

    println!();
    println!("{}", stats.summary());
    Ok(())
}
