//! WatchHer CLI
//!
//! Runs the wearable and companion pipelines in-process and exposes the
//! classifier and wire schema for inspection.

use anyhow::{bail, Context};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{fmt, EnvFilter};
use watchher_core::{
    companion::CompanionService,
    config::Config,
    core::{classifier::to_percentage, RiskClassifier, RiskScorer, FEATURE_COUNT, FEATURE_NAMES},
    link_pair,
    simulation::{spawn_sensor_feed, Scenario, DEMO_FOREST},
    stats::{create_shared_stats_with_persistence, MonitorStats},
    telemetry::{decode_confidence, decode_features},
    LoggingSink, WearableMonitor, VERSION,
};

#[derive(Parser)]
#[command(name = "watchher")]
#[command(author = "WatchHer")]
#[command(version = VERSION)]
#[command(about = "Wearable safety monitor core", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a wearable and a companion over an in-process link
    Simulate {
        /// Synthetic sensor scenario (calm or distress)
        #[arg(long, default_value = "distress")]
        scenario: Scenario,

        /// Scenario length in seconds
        #[arg(long, default_value = "60")]
        duration: u64,

        /// Cancel the detection this many seconds in
        #[arg(long)]
        cancel_at: Option<u64>,

        /// Forest asset to score with (defaults to the configured model)
        #[arg(long)]
        model: Option<PathBuf>,

        /// Use the bundled demo forest instead of a model file
        #[arg(long, conflicts_with = "model")]
        demo_model: bool,

        /// Time compression factor applied to every interval
        #[arg(long, default_value = "1.0")]
        speed: f64,
    },

    /// Score one feature vector
    Predict {
        /// Eight comma-separated values in model order
        features: String,

        /// Forest asset (defaults to the configured model)
        #[arg(long)]
        model: Option<PathBuf>,
    },

    /// Validate a wire message
    Decode {
        /// Which direction the message travels
        #[arg(value_enum)]
        direction: Direction,

        /// JSON payload; read from --file when omitted
        payload: Option<String>,

        #[arg(long, short)]
        file: Option<PathBuf>,
    },

    /// Show configuration
    Config,

    /// Show cumulative counters
    Status,
}

#[derive(Clone, Copy, ValueEnum)]
enum Direction {
    /// Feature message, wearable to companion
    Watch,
    /// Confidence message, companion to wearable
    Phone,
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).with_target(false).init();
}

fn main() {
    init_logging();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Simulate {
            scenario,
            duration,
            cancel_at,
            model,
            demo_model,
            speed,
        } => cmd_simulate(scenario, duration, cancel_at, model, demo_model, speed),
        Commands::Predict { features, model } => cmd_predict(&features, model),
        Commands::Decode {
            direction,
            payload,
            file,
        } => cmd_decode(direction, payload, file),
        Commands::Config => cmd_config(),
        Commands::Status => cmd_status(),
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

fn cmd_simulate(
    scenario: Scenario,
    duration: u64,
    cancel_at: Option<u64>,
    model: Option<PathBuf>,
    demo_model: bool,
    speed: f64,
) -> anyhow::Result<()> {
    if !speed.is_finite() || speed <= 0.0 {
        bail!("--speed must be a positive number");
    }

    let mut config = Config::load().context("loading configuration")?;
    if let Err(e) = config.ensure_directories() {
        eprintln!("Warning: Could not create directories: {e}");
    }
    scale_timings(&mut config, speed);

    let stats = create_shared_stats_with_persistence(config.stats_path());
    let scorer = if demo_model {
        let classifier = RiskClassifier::from_json(DEMO_FOREST).context("bundled demo forest")?;
        RiskScorer::new(Some(Arc::new(classifier)), stats.clone())
    } else {
        let path = model.unwrap_or_else(|| config.model_path.clone());
        RiskScorer::load_or_fallback(path, stats.clone())
    };

    println!("WatchHer v{VERSION}");
    println!();
    println!("  Scenario: {scenario}");
    println!("  Duration: {duration}s");
    println!("  Speed: {speed}x");
    println!(
        "  Model: {}",
        if scorer.has_model() {
            "loaded"
        } else {
            "unavailable (confidence fixed at 0)"
        }
    );
    if let Some(at) = cancel_at {
        println!("  Cancel at: {at}s");
    }
    println!();
    println!("Press Ctrl+C to stop");
    println!();

    let running = Arc::new(AtomicBool::new(true));
    ctrlc_handler(running.clone())?;

    let session_stats = stats.clone();
    let runtime = tokio::runtime::Runtime::new().context("starting async runtime")?;
    runtime.block_on(async move {
        let ((wearable_tx, wearable_rx), (companion_tx, companion_rx)) = link_pair();

        let companion = Arc::new(CompanionService::new(
            scorer,
            Arc::new(companion_tx),
            Arc::new(LoggingSink),
            session_stats.clone(),
        ));
        let companion_task = companion.spawn(companion_rx);

        let mut monitor =
            WearableMonitor::builder(config, Arc::new(wearable_tx), Arc::new(LoggingSink))
                .stats(session_stats)
                .build()?;
        monitor.attach_inbound(wearable_rx);
        monitor.start()?;
        let feed = spawn_sensor_feed(monitor.sensor_handle(), scenario, speed);

        let start = tokio::time::Instant::now();
        let scaled = |secs: u64| Duration::from_secs(secs).div_f64(speed);
        let end = start + scaled(duration);
        let mut cancel_deadline = cancel_at.map(|secs| start + scaled(secs));

        let mut poll = tokio::time::interval(Duration::from_millis(100));
        while running.load(Ordering::SeqCst) {
            poll.tick().await;
            let now = tokio::time::Instant::now();
            if now >= end {
                break;
            }
            if let Some(at) = cancel_deadline {
                if now >= at {
                    cancel_deadline = None;
                    if monitor.cancel().await {
                        println!("Detection cancelled by user.");
                    } else {
                        println!("Nothing to cancel.");
                    }
                }
            }
        }

        let status = monitor.status().await;
        feed.abort();
        monitor.stop().await;
        companion_task.abort();

        println!();
        println!("Final state: {status}");
        anyhow::Ok(())
    })?;

    println!();
    println!("{}", stats.summary());
    Ok(())
}

/// Compress every configured interval by `speed`.
fn scale_timings(config: &mut Config, speed: f64) {
    config.tick_interval = config.tick_interval.div_f64(speed);
    let alert = &mut config.alert;
    alert.dwell = alert.dwell.div_f64(speed);
    alert.cancel_cooldown = alert.cancel_cooldown.div_f64(speed);
    alert.recovery_cooldown = alert.recovery_cooldown.div_f64(speed);
    alert.vibration_interval = alert.vibration_interval.div_f64(speed);
}

fn cmd_predict(features: &str, model: Option<PathBuf>) -> anyhow::Result<()> {
    let values = features
        .split(',')
        .map(|v| {
            v.trim()
                .parse::<f64>()
                .with_context(|| format!("invalid feature value '{}'", v.trim()))
        })
        .collect::<anyhow::Result<Vec<f64>>>()?;

    let values: [f64; FEATURE_COUNT] = match values.try_into() {
        Ok(values) => values,
        Err(values) => bail!(
            "expected {FEATURE_COUNT} values ({}), got {}",
            FEATURE_NAMES.join(", "),
            values.len()
        ),
    };

    let path = match model {
        Some(path) => path,
        None => Config::load()?.model_path,
    };
    let classifier = RiskClassifier::load(&path)?;
    let probability = classifier.predict(&values);

    println!("Model: {path:?} ({} trees)", classifier.tree_count());
    for (name, value) in FEATURE_NAMES.iter().zip(values.iter()) {
        println!("  {name:>10}: {value}");
    }
    println!();
    println!("Probability: {probability:.4}");
    println!("Confidence:  {}%", to_percentage(probability));
    Ok(())
}

fn cmd_decode(
    direction: Direction,
    payload: Option<String>,
    file: Option<PathBuf>,
) -> anyhow::Result<()> {
    let payload = match (payload, file) {
        (Some(payload), _) => payload,
        (None, Some(file)) => {
            std::fs::read_to_string(&file).with_context(|| format!("reading {file:?}"))?
        }
        (None, None) => bail!("provide a payload or --file"),
    };

    match direction {
        Direction::Watch => {
            let features = decode_features(payload.as_bytes())?;
            println!("Valid feature message:");
            println!("{}", serde_json::to_string_pretty(&features)?);
        }
        Direction::Phone => {
            let message = decode_confidence(payload.as_bytes())?;
            println!(
                "Valid confidence message: {}%",
                message.confidence_percentage
            );
        }
    }
    Ok(())
}

fn cmd_config() -> anyhow::Result<()> {
    let config = Config::load()?;

    println!("Configuration");
    println!("=============");
    println!();
    println!("Config file: {:?}", Config::config_path());
    println!();
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}

fn cmd_status() -> anyhow::Result<()> {
    let config = Config::load()?;
    let stats_path = config.stats_path();

    println!("WatchHer Status");
    println!("===============");
    println!();
    println!("Model: {:?}", config.model_path);
    println!(
        "  Present: {}",
        if config.model_path.exists() {
            "yes"
        } else {
            "no"
        }
    );
    println!();

    if stats_path.exists() {
        let stats = MonitorStats::with_persistence(stats_path);
        println!("Cumulative Statistics:");
        println!("{}", stats.summary());
    } else {
        println!("No previous session data found.");
    }
    Ok(())
}

/// Set up Ctrl+C handler.
fn ctrlc_handler(running: Arc<AtomicBool>) -> anyhow::Result<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .context("setting Ctrl+C handler")
}
