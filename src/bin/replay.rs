use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use serde_json::json;

use hybrid_location_rs::anchor::LocalFrame;
use hybrid_location_rs::live_status::LiveStatus;
use hybrid_location_rs::replay::{replay, ReplayLog};
use hybrid_location_rs::TrackerConfig;

#[derive(Parser, Debug)]
#[command(name = "replay")]
#[command(about = "Replay a recorded session through the hybrid tracker", long_about = None)]
struct Args {
    /// Path to a session log (.json or .json.gz)
    #[arg(long)]
    log: PathBuf,

    /// JSON tracker config; missing fields use defaults
    #[arg(long)]
    config: Option<PathBuf>,

    /// Disable dead reckoning during replay (GPS-only baseline)
    #[arg(long, default_value_t = false)]
    no_motion: bool,

    /// Write the final status snapshot here as well as printing it
    #[arg(long)]
    output: Option<PathBuf>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => TrackerConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => TrackerConfig::default(),
    };
    if args.no_motion {
        config.enable_motion = false;
    }

    let log = ReplayLog::load(&args.log)
        .with_context(|| format!("loading log {}", args.log.display()))?;
    let tracker = replay(&log, &config);

    let frame = tracker
        .state()
        .gps_position
        .as_ref()
        .map(|p| LocalFrame::new(p.base()));
    let status = LiveStatus::from_tracker(&tracker, frame.as_ref(), (log.duration_ms() / 1000).max(0) as u64);
    if let Some(path) = &args.output {
        status.save(path)?;
    }

    let summary = json!({
        "log": args.log.display().to_string(),
        "records": log.records.len(),
        "duration_ms": log.duration_ms(),
        "state": tracker.state(),
        "stats": tracker.stats(),
        "source_divergence_m": tracker.state().source_divergence_m(),
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);

    Ok(())
}
