use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use tokio::sync::mpsc;
use tokio::time::{interval, sleep, Duration};

use hybrid_location_rs::anchor::LocalFrame;
use hybrid_location_rs::clock::{Clock, SystemClock};
use hybrid_location_rs::live_status::LiveStatus;
use hybrid_location_rs::permission::PermissionState;
use hybrid_location_rs::sensors::{SimulatedPlatform, SimulationConfig};
use hybrid_location_rs::session::{run_session_with_commands, Platform, SessionCommand};
use hybrid_location_rs::tracker::HybridTracker;
use hybrid_location_rs::types::format_coordinates;
use hybrid_location_rs::TrackerConfig;

#[derive(Parser, Debug)]
#[command(name = "hybrid_tracker")]
#[command(about = "Hybrid GPS + dead-reckoning location tracker (simulated platform)", long_about = None)]
struct Args {
    /// Duration in seconds (0 = until Ctrl-C)
    #[arg(value_name = "SECONDS", default_value = "0")]
    duration: u64,

    /// JSON tracker config; missing fields use defaults
    #[arg(long)]
    config: Option<PathBuf>,

    /// Output directory for live status snapshots
    #[arg(long, default_value = "hybrid_tracker_sessions")]
    output_dir: PathBuf,

    /// Seconds after start at which GPS goes quiet
    #[arg(long)]
    gps_gap_after: Option<u64>,

    /// Length of the GPS gap in seconds
    #[arg(long, default_value = "10")]
    gps_gap_secs: u64,

    /// Simulate the user refusing motion permission
    #[arg(long)]
    deny_motion: bool,

    /// Simulate the user refusing location permission
    #[arg(long)]
    deny_gps: bool,

    /// Simulate a platform with no motion permission API
    #[arg(long)]
    no_permission_api: bool,

    /// Disable dead reckoning entirely
    #[arg(long)]
    no_motion: bool,

    /// Override the GPS freshness window (ms)
    #[arg(long)]
    gps_freshness_ms: Option<i64>,

    /// Re-request a one-shot GPS fix every N seconds (0 = never)
    #[arg(long, default_value = "0")]
    refresh_secs: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
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
    if let Some(freshness) = args.gps_freshness_ms {
        config.gps_freshness_ms = freshness;
    }

    let simulation = SimulationConfig {
        gps_gap: args
            .gps_gap_after
            .map(|after| (after as i64 * 1000, args.gps_gap_secs as i64 * 1000)),
        deny_geolocation: args.deny_gps,
        motion_permission: if args.no_permission_api {
            None
        } else if args.deny_motion {
            Some(PermissionState::Denied)
        } else {
            Some(PermissionState::Granted)
        },
        ..Default::default()
    };

    println!("[{}] Hybrid Tracker Starting", ts_now());
    println!("  Duration: {} seconds (0=until Ctrl-C)", args.duration);
    println!("  Motion: {}", config.enable_motion);
    println!("  GPS freshness: {} ms", config.gps_freshness_ms);
    if args.refresh_secs > 0 {
        println!("  GPS refresh: every {}s", args.refresh_secs);
    }
    if let Some((start, len)) = simulation.gps_gap {
        println!("  GPS gap: {}s for {}s", start / 1000, len / 1000);
    }
    println!("  Output Dir: {}", args.output_dir.display());

    std::fs::create_dir_all(&args.output_dir)?;
    let status_path = args.output_dir.join("live_status.json");

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let platform = Platform::simulated(Arc::new(SimulatedPlatform::new(simulation, clock.clone())));
    let mut tracker = HybridTracker::new(&config, clock.clone());

    let start = Utc::now();
    let mut frame: Option<LocalFrame> = None;

    let duration = args.duration;
    let shutdown = async move {
        if duration > 0 {
            tokio::select! {
                _ = sleep(Duration::from_secs(duration)) => {
                    println!("[{}] Duration reached, stopping...", ts_now());
                }
                _ = tokio::signal::ctrl_c() => {}
            }
        } else {
            let _ = tokio::signal::ctrl_c().await;
        }
    };

    let (commands_tx, commands) = mpsc::channel(4);
    if args.refresh_secs > 0 {
        let period = Duration::from_secs(args.refresh_secs);
        tokio::spawn(async move {
            let mut ticks = interval(period);
            ticks.tick().await;
            loop {
                ticks.tick().await;
                if commands_tx.send(SessionCommand::Refresh).await.is_err() {
                    break;
                }
            }
        });
    } else {
        drop(commands_tx);
    }

    let motion = run_session_with_commands(&mut tracker, &platform, &config, commands, shutdown, |tracker| {
        if frame.is_none() {
            frame = tracker.state().gps_position.as_ref().map(|p| LocalFrame::new(p.base()));
        }
        let status = LiveStatus::from_tracker(tracker, frame.as_ref(), uptime_secs(start));
        if let Err(e) = status.save(&status_path) {
            log::warn!("[fusion] failed to write {}: {}", status_path.display(), e);
        }
    })
    .await;

    let final_status = LiveStatus::from_tracker(&tracker, frame.as_ref(), uptime_secs(start));
    let final_path = args.output_dir.join("live_status_final.json");
    final_status.save(&final_path)?;
    println!("[{}] Final status written to {}", ts_now(), final_path.display());

    let state = tracker.state();
    let stats = tracker.stats();
    println!("\n=== Final Stats ===");
    println!("Status: {:?}", state.status);
    println!("Dead reckoning: {:?}", motion);
    if let Some(permission) = tracker.geolocation_permission() {
        println!("Geolocation permission: {:?}", permission);
    }
    if let Some(pos) = state.position.as_ref() {
        println!(
            "Position: {} ({:?})",
            format_coordinates(pos.lat, pos.lng, 6),
            pos.source
        );
        if let Some(frame) = frame.as_ref() {
            let origin = frame.origin();
            let local = frame.to_local(pos);
            println!(
                "Offset from first fix ({}): {:.2} m east, {:.2} m north",
                format_coordinates(origin.lat, origin.lng, 6),
                local.x,
                local.y
            );
        }
    }
    if let Some(divergence) = state.source_divergence_m() {
        println!("GPS / dead-reckoning divergence: {:.2} m", divergence);
    }
    if let Some(err) = tracker.last_gps_error() {
        println!("Last GPS error: {}", err.detail());
    }
    println!("GPS fixes: {} ({} errors)", stats.gps_fixes, stats.gps_errors);
    println!(
        "Motion samples: {}, flushes: {} ({} discarded)",
        stats.motion_samples, stats.flushes, stats.discarded_flushes
    );

    Ok(())
}

fn uptime_secs(start: chrono::DateTime<Utc>) -> u64 {
    Utc::now().signed_duration_since(start).num_seconds().max(0) as u64
}

fn ts_now() -> String {
    Utc::now().format("%H:%M:%S").to_string()
}
