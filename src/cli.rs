use std::net::SocketAddr;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "audiod", version)]
pub struct Args {
    /// Address to listen on for control connections
    #[arg(long, default_value = "127.0.0.1:1350")]
    pub bind: SocketAddr,

    /// Use a specific output device by substring match
    #[arg(long)]
    pub device: Option<String>,

    /// List output devices and exit
    #[arg(long)]
    pub list_devices: bool,

    /// Update loop tick in milliseconds
    #[arg(long, default_value_t = 1)]
    pub tick_ms: u64,
}
