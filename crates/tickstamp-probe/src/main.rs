//! tickstamp-probe: Operator probe for the acquisition controller
//!
//! Builds a controller from a config file or `TICKSTAMP_*` variables, samples
//! timestamps, then prints the diagnostics snapshot and prometheus metrics.

use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tickstamp::{decode, encode_metrics, AcquisitionController, Config, StartMode};

#[derive(Parser, Debug)]
#[command(name = "tickstamp-probe")]
#[command(about = "Sample encoded timestamps and inspect controller state")]
struct Args {
    /// Path to controller configuration file (defaults to TICKSTAMP_* env vars)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Promote explicitly before sampling: auto, internal or worker
    #[arg(short, long)]
    mode: Option<StartMode>,

    /// Number of samples to take
    #[arg(short, long, default_value_t = 10)]
    samples: u64,

    /// Delay between samples in milliseconds
    #[arg(short, long, default_value_t = 100)]
    interval_ms: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::from_env()?,
    };
    info!(
        name = %config.name,
        prefer = %config.prefer,
        threshold_calls = config.threshold_calls,
        "Loaded controller configuration"
    );

    let controller = AcquisitionController::new(config)?;
    if let Some(mode) = args.mode {
        controller.start(mode);
    }

    let interval = Duration::from_millis(args.interval_ms);
    for i in 0..args.samples {
        let stamp = controller.get();
        println!(
            "{:>4}  {}  {:>15}  {}",
            i,
            stamp,
            decode(stamp.as_str()).unwrap_or_default(),
            controller.state()
        );
        tokio::time::sleep(interval).await;
    }

    let diag = controller.diagnostics();
    println!();
    println!("state:                 {}", diag.state);
    if let Some(cached) = diag.cached {
        println!("cached:                {}", cached);
    }
    println!("worker available:      {}", diag.worker_available);
    println!("worker active:         {}", diag.worker_active);
    println!("cooperative available: {}", diag.cooperative_available);
    println!("cooperative active:    {}", diag.cooperative_active);
    if let Some(idle) = diag.idle_for {
        println!("idle for:              {:?}", idle);
    }
    if let Some(t) = diag.last_transition {
        println!("last transition:       {} -> {} ({})", t.from, t.to, t.reason);
    }
    println!(
        "promotions/demotions/fallbacks: {}/{}/{}",
        diag.promotions, diag.demotions, diag.fallbacks
    );

    controller.stop();
    println!();
    print!("{}", encode_metrics()?);

    Ok(())
}
