//! Output device selection.

use cpal::traits::{DeviceTrait, HostTrait};

use crate::errors::{Error, Result};

/// Picks an output device, by case-insensitive substring when `needle` is
/// given, otherwise the host default.
pub fn pick_device(host: &cpal::Host, needle: Option<&str>) -> Result<cpal::Device> {
    let mut devices: Vec<cpal::Device> = host
        .output_devices()
        .map_err(|e| Error::Config(format!("no output devices: {e}")))?
        .collect();

    if let Some(needle) = needle {
        let needle_lc = needle.to_lowercase();
        if let Some(d) = devices.drain(..).find(|d| {
            d.name()
                .ok()
                .map(|n| n.to_lowercase().contains(&needle_lc))
                .unwrap_or(false)
        }) {
            return Ok(d);
        }
        return Err(Error::Config(format!("no output device matched: {needle}")));
    }

    host.default_output_device()
        .ok_or_else(|| Error::Config("no default output device".to_string()))
}

pub fn list_devices(host: &cpal::Host) -> Result<()> {
    let devices = host
        .output_devices()
        .map_err(|e| Error::Config(format!("no output devices: {e}")))?;
    for (i, d) in devices.enumerate() {
        eprintln!("#{i}: {}", d.name().unwrap_or_else(|_| "<unnamed>".to_string()));
    }
    Ok(())
}
