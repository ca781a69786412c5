//! Stage assembly command server over the simulated stage.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use device_server::{CommandServer, StageService};
use hardware::sim::SimStage;

#[derive(Parser, Debug)]
#[command(about = "TCP command server for the rig stage assembly")]
struct Args {
    /// Address to listen on.
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    /// TCP port.
    #[arg(long, default_value_t = protocol::STAGE_PORT)]
    port: u16,

    /// Simulated move/settle time in milliseconds.
    #[arg(long, default_value_t = 50)]
    move_time_ms: u64,

    /// Append logs to this file instead of stderr.
    #[arg(long)]
    log_file: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    device_server::logging::init_logging(args.log_file.as_deref())
        .context("failed to open log file")?;

    let stage = SimStage::new().with_move_time(Duration::from_millis(args.move_time_ms));
    let addr: SocketAddr = format!("{}:{}", args.host, args.port)
        .parse()
        .context("invalid host/port")?;
    CommandServer::new(StageService::new(stage))
        .serve(addr)
        .await
        .context("stage server failed")?;
    Ok(())
}
