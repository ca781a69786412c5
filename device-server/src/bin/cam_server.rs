//! Camera command server over the simulated CCD.

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use device_server::{CameraService, CommandServer};
use hardware::sim::SimCamera;

#[derive(Parser, Debug)]
#[command(about = "TCP command server for the rig CCD camera")]
struct Args {
    /// Address to listen on.
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    /// TCP port.
    #[arg(long, default_value_t = protocol::CAMERA_PORT)]
    port: u16,

    /// Directory where exposures are written.
    #[arg(long, default_value = "images")]
    file_dir: PathBuf,

    /// Scale factor from commanded exposure seconds to simulated wall time.
    #[arg(long, default_value_t = 1.0)]
    time_scale: f64,

    /// Append logs to this file instead of stderr.
    #[arg(long)]
    log_file: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    device_server::logging::init_logging(args.log_file.as_deref())
        .context("failed to open log file")?;

    let camera = SimCamera::new().with_time_scale(args.time_scale);
    let service = CameraService::new(camera, &args.file_dir)
        .with_context(|| format!("failed to prepare image dir {}", args.file_dir.display()))?;

    let addr: SocketAddr = format!("{}:{}", args.host, args.port)
        .parse()
        .context("invalid host/port")?;
    CommandServer::new(service)
        .serve(addr)
        .await
        .context("camera server failed")?;
    Ok(())
}
