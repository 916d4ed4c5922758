//! Audio device enumeration through cpal.

use cpal::Device;
use cpal::traits::{DeviceTrait, HostTrait};

use crate::Result;

/// Extract device name via `description()` (cpal 0.17+).
pub(crate) fn device_name(device: &Device) -> std::result::Result<String, cpal::DeviceNameError> {
    device.description().map(|d| d.name().to_string())
}

/// Audio device information.
#[derive(Debug, Clone)]
pub struct AudioDevice {
    /// Human-readable device name.
    pub name: String,
    /// Whether the device supports audio input.
    pub is_input: bool,
    /// Whether the device supports audio output.
    pub is_output: bool,
    /// Default sample rate in Hz.
    pub default_sample_rate: u32,
}

/// List all available audio devices on the default host.
pub fn list_devices() -> Result<Vec<AudioDevice>> {
    let host = cpal::default_host();
    let mut devices = Vec::new();

    if let Ok(inputs) = host.input_devices() {
        for device in inputs {
            if let Ok(name) = device_name(&device) {
                let sample_rate = device
                    .default_input_config()
                    .map(|c| c.sample_rate())
                    .unwrap_or(48000);
                devices.push(AudioDevice {
                    name,
                    is_input: true,
                    is_output: device.default_output_config().is_ok(),
                    default_sample_rate: sample_rate,
                });
            }
        }
    }

    // Output-only devices
    if let Ok(outputs) = host.output_devices() {
        for device in outputs {
            let Ok(name) = device_name(&device) else {
                continue;
            };
            if devices.iter().any(|d| d.name == name) {
                continue;
            }
            let sample_rate = device
                .default_output_config()
                .map(|c| c.sample_rate())
                .unwrap_or(48000);
            devices.push(AudioDevice {
                name,
                is_input: false,
                is_output: true,
                default_sample_rate: sample_rate,
            });
        }
    }

    tracing::debug!(count = devices.len(), "audio devices enumerated");
    Ok(devices)
}

/// Default `(input, output)` devices of the default host.
pub fn default_device() -> Result<(Option<AudioDevice>, Option<AudioDevice>)> {
    let host = cpal::default_host();

    let describe = |device: Device, is_input: bool| {
        let config = if is_input {
            device.default_input_config()
        } else {
            device.default_output_config()
        };
        device_name(&device).ok().map(|name| AudioDevice {
            name,
            is_input,
            is_output: !is_input,
            default_sample_rate: config.map(|c| c.sample_rate()).unwrap_or(48000),
        })
    };

    let input = host.default_input_device().and_then(|d| describe(d, true));
    let output = host.default_output_device().and_then(|d| describe(d, false));
    Ok((input, output))
}
