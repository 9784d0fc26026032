//! modbusfs binary
//!
//! ```bash
//! # RTU on the default serial port
//! modbusfs /mnt/modbus
//!
//! # Explicit line settings, startup exports from a file
//! modbusfs rtu:/dev/ttyS1,9600,8E1 /mnt/modbus --config plant.toml
//!
//! # Modbus TCP
//! modbusfs tcp:plc.local:502 /mnt/modbus -d
//!
//! echo "17 0755" > /mnt/modbus/exports
//! echo "5 0644" > /mnt/modbus/17/exports
//! cat /mnt/modbus/17/5
//! ```

use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use modbusfs_fuse::cli::Args;

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(args.log_level()));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    match run(&args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: &Args) -> Result<()> {
    let config = args.load_config()?;
    let transport = args.transport(&config)?;
    let mountpoint = args.mountpoint();
    tracing::info!(%transport, mountpoint = %mountpoint.display(), "starting modbusfs");
    modbusfs_fuse::start(&transport, &config, &mountpoint, args.mount_config()).await
}
