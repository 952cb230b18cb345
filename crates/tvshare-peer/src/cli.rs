use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "tvshare-peer", version)]
pub struct Args {
    /// Path to a TOML config file
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Number of simulated in-process followers to run alongside the host
    #[arg(long, default_value_t = 0)]
    pub followers: usize,

    /// Start with the output device powered off
    #[arg(long)]
    pub powered_off: bool,
}
