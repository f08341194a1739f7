//! Audio device selection by name, falling back to the host default.

use anyhow::Context;
use cpal::Device;
use cpal::traits::{DeviceTrait, HostTrait};

fn host() -> cpal::Host {
    cpal::default_host()
}

/// Resolves an input device by name, or the host default when no name is
/// given.
pub fn input_device(device_name: Option<&str>) -> anyhow::Result<Device> {
    let host = host();
    tracing::debug!(host = ?host.id(), "resolving input device");
    match device_name {
        None => host
            .default_input_device()
            .context("no default input device"),
        Some(target) => host
            .input_devices()
            .context("failed to enumerate input devices")?
            .find(|device| device.name().is_ok_and(|name| name == target))
            .with_context(|| format!("input device '{target}' not found")),
    }
}

/// Resolves an output device by name, or the host default when no name is
/// given.
pub fn output_device(device_name: Option<&str>) -> anyhow::Result<Device> {
    let host = host();
    tracing::debug!(host = ?host.id(), "resolving output device");
    match device_name {
        None => host
            .default_output_device()
            .context("no default output device"),
        Some(target) => host
            .output_devices()
            .context("failed to enumerate output devices")?
            .find(|device| device.name().is_ok_and(|name| name == target))
            .with_context(|| format!("output device '{target}' not found")),
    }
}

/// One line per input device, with channel count and sample rate, the
/// default marked.
pub fn describe_inputs() -> anyhow::Result<String> {
    let host = host();
    let default_name = host
        .default_input_device()
        .and_then(|device| device.name().ok());
    let mut lines = Vec::new();
    for device in host
        .input_devices()
        .context("failed to enumerate input devices")?
    {
        let name = device.name().unwrap_or_else(|_| "<unnamed>".to_string());
        let config = device
            .default_input_config()
            .with_context(|| format!("input device '{name}' has no default config"))?;
        let mut line = format!(
            " * {}({}ch, {}hz)",
            name,
            config.channels(),
            config.sample_rate().0
        );
        if Some(&name) == default_name.as_ref() {
            line.push_str(" [default]");
        }
        lines.push(line);
    }
    Ok(lines.join("\n"))
}

/// One line per output device, with channel count and sample rate, the
/// default marked.
pub fn describe_outputs() -> anyhow::Result<String> {
    let host = host();
    let default_name = host
        .default_output_device()
        .and_then(|device| device.name().ok());
    let mut lines = Vec::new();
    for device in host
        .output_devices()
        .context("failed to enumerate output devices")?
    {
        let name = device.name().unwrap_or_else(|_| "<unnamed>".to_string());
        let config = device
            .default_output_config()
            .with_context(|| format!("output device '{name}' has no default config"))?;
        let mut line = format!(
            " * {}({}ch, {}hz)",
            name,
            config.channels(),
            config.sample_rate().0
        );
        if Some(&name) == default_name.as_ref() {
            line.push_str(" [default]");
        }
        lines.push(line);
    }
    Ok(lines.join("\n"))
}
