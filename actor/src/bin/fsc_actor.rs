//! Scan driver: reads a coordinate file and walks the rig through it.

use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use actor::{
    load_targets, scan_targets, AlwaysAccept, ExposureTuning, Rig, RigConfig, SweepParams,
};
use anyhow::Context;
use clap::Parser;
use protocol::FrameType;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(about = "Focal surface scan orchestrator")]
struct Args {
    /// Coordinate CSV: r,t,z,expTime,filterSlot.
    targets: PathBuf,

    /// Frame type for every exposure.
    #[arg(long, default_value = "light")]
    frame: FrameType,

    #[arg(long, default_value_t = format!("localhost:{}", protocol::CAMERA_PORT))]
    camera: String,

    #[arg(long, default_value_t = format!("localhost:{}", protocol::FILTER_PORT))]
    filter: String,

    #[arg(long, default_value_t = format!("localhost:{}", protocol::STAGE_PORT))]
    stage: String,

    /// Fractional exposure-time adjustment per rejected attempt.
    #[arg(long, default_value_t = 0.5)]
    time_factor: f64,

    /// Maximum exposures per target before skipping it.
    #[arg(long, default_value_t = 3)]
    max_attempts: u32,

    /// Run a focus sweep at each target with this Z step in mm.
    #[arg(long, requires = "sweep_count")]
    sweep_step: Option<f64>,

    /// Number of sweep exposures either side of each target's focus.
    #[arg(long, requires = "sweep_step")]
    sweep_count: Option<u32>,

    /// Loop over the coordinate file until interrupted.
    #[arg(long)]
    repeat: bool,

    /// Status poll interval in milliseconds.
    #[arg(long, default_value_t = 100)]
    poll_ms: u64,

    /// Append logs to this file instead of stderr.
    #[arg(long)]
    log_file: Option<PathBuf>,
}

fn init_logging(log_file: Option<&std::path::Path>) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("failed to open log file {}", path.display()))?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(Arc::new(file))
                .with_ansi(false)
                .init();
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(args.log_file.as_deref())?;

    let targets = load_targets(&args.targets)
        .with_context(|| format!("loading {}", args.targets.display()))?;
    info!(count = targets.len(), file = %args.targets.display(), "loaded scan targets");

    let rig = Rig::new(RigConfig {
        camera_addr: args.camera,
        filter_addr: args.filter,
        stage_addr: args.stage,
        poll_interval: Duration::from_millis(args.poll_ms),
        ..RigConfig::default()
    });

    let signal_rig = Arc::clone(&rig);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, stopping all devices");
            signal_rig.cancel();
        }
    });

    let tuning = ExposureTuning {
        time_factor: args.time_factor,
        max_attempts: args.max_attempts,
    };
    let sweep = match (args.sweep_step, args.sweep_count) {
        (Some(offset_step), Some(offset_count)) => Some(SweepParams {
            offset_step,
            offset_count,
        }),
        _ => None,
    };
    let frame = args.frame;
    let repeat = args.repeat;

    tokio::task::spawn_blocking(move || {
        let mut quality = AlwaysAccept;
        scan_targets(&rig, &mut quality, tuning, &targets, frame, sweep, repeat)
    })
    .await
    .context("orchestration task panicked")?
    .context("scan failed")?;

    info!("scan complete");
    Ok(())
}
