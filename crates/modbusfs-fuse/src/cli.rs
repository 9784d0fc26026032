//! Command-line arguments.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser};
use modbusfs_kernel::{Config, TransportConfig};

use crate::MountConfig;

/// Modbus slaves and holding registers as a filesystem.
#[derive(Parser, Debug)]
#[command(name = "modbusfs")]
#[command(about = "Expose Modbus holding registers as files")]
#[command(after_help = "DEVICE: rtu[:<ttydev>[,<baud>[,<bits><parity><stop>]]] \
    | tcp:<host>[:<port>]\n\
    Defaults to rtu:/dev/ttyUSB0,115200,8N1 unless the config file names a transport.")]
pub struct Args {
    /// [DEVICE] MOUNTPOINT
    #[arg(required = true, num_args = 1..=2, value_name = "ARGS")]
    positional: Vec<String>,

    /// TOML config file (transport, response timeout, startup exports)
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Raise log verbosity (-d debug, -dd trace)
    #[arg(short, long, action = ArgAction::Count)]
    pub debug: u8,

    /// Extra FUSE mount options, comma separated
    #[arg(short = 'o', value_name = "OPTIONS")]
    pub options: Vec<String>,

    /// Let other users access the mount
    #[arg(long)]
    pub allow_other: bool,
}

impl Args {
    pub fn mountpoint(&self) -> PathBuf {
        PathBuf::from(self.positional.last().map(String::as_str).unwrap_or_default())
    }

    /// Device specification given on the command line, if any.
    pub fn device(&self) -> Option<&str> {
        match self.positional.as_slice() {
            [device, _] => Some(device.as_str()),
            _ => None,
        }
    }

    /// Base tracing filter for the requested verbosity.
    pub fn log_level(&self) -> &'static str {
        match self.debug {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    }

    pub fn load_config(&self) -> Result<Config> {
        match &self.config {
            Some(path) => Ok(Config::load(path)?),
            None => Ok(Config::default()),
        }
    }

    /// Command-line device wins over the config file, which wins over the
    /// RTU defaults.
    pub fn transport(&self, config: &Config) -> Result<TransportConfig> {
        match self.device() {
            Some(spec) => spec
                .parse()
                .with_context(|| format!("device {spec:?}")),
            None => Ok(config.transport.clone().unwrap_or_default()),
        }
    }

    pub fn mount_config(&self) -> MountConfig {
        MountConfig {
            allow_other: self.allow_other,
            options: self.options.clone(),
        }
    }
}
