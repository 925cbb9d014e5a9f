//! audiod — a minimal, network-controllable audio file player daemon.
//!
//! The daemon plays one file at a time and is driven over a line-oriented
//! TCP protocol (load, play, stop, seek, eject, quit). Decoding runs
//! cooperatively on the update loop; the device callback is fed through a
//! lock-free ring buffer and never blocks.
//!
//! ## Pipeline
//! file → source decode → in-flight chunk → ring buffer → device callback
//!
//! ## Threads
//! - the main thread runs the player update loop (decode, commands,
//!   broadcasts)
//! - the OS audio thread runs the device callback (ring reads only)
//! - one reader and one writer thread per control client

mod audio;
mod cli;
mod device;
mod errors;
mod net;
mod player;
mod response;
mod ringbuf;
mod sink;
mod source;
mod time_parse;
mod tokeniser;

use std::net::TcpListener;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use cpal::traits::DeviceTrait;
use tracing_subscriber::EnvFilter;

use crate::audio::DeviceAudioSystem;
use crate::player::{Event, Player};
use crate::response::BROADCAST;

fn main() -> Result<()> {
    let args = cli::Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let host = cpal::default_host();

    if args.list_devices {
        device::list_devices(&host)?;
        return Ok(());
    }

    // Device acquisition is the process-scoped part of the audio stack;
    // failure here is fatal before any client is accepted.
    let device = device::pick_device(&host, args.device.as_deref())?;
    tracing::info!(device = %device.name()?, "output device");

    let listener =
        TcpListener::bind(args.bind).with_context(|| format!("bind {}", args.bind))?;
    tracing::info!(bind = %args.bind, "listening for control connections");

    let broadcaster = Arc::new(net::Broadcaster::new());
    let (event_tx, event_rx) = crossbeam_channel::unbounded();
    net::spawn(listener, broadcaster.clone(), event_tx.clone());

    let quit_tx = event_tx.clone();
    let _ = ctrlc::set_handler(move || {
        let _ = quit_tx.send(Event::Line(BROADCAST, vec!["quit".to_string()]));
    });

    let system = DeviceAudioSystem::new(device);
    let mut player = Player::new(
        Box::new(system),
        broadcaster,
        event_rx,
        Duration::from_millis(args.tick_ms.max(1)),
    );
    player.run();

    // Give client writers a moment to flush the farewell.
    std::thread::sleep(Duration::from_millis(100));
    Ok(())
}
