//! Engine and output settings stored as TOML.

use std::path::Path;

use cadenza_core::{EngineConfig, Format, SampleFormat};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::paths::default_config_path;

/// Complete settings file: engine limits plus the output boundary.
///
/// Every field has a default, so a partial (or empty) file is valid:
///
/// ```toml
/// [engine]
/// max_frames = 1024
///
/// [output]
/// sample_rate = 44100
/// sample_format = "i24"
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Renderer sizing.
    pub engine: EngineSettings,
    /// Output boundary format and device.
    pub output: OutputSettings,
}

/// `[engine]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Largest quantum a single pull may render.
    pub max_frames: usize,
    /// Capacity of the node arena.
    pub max_nodes: usize,
    /// Committed snapshots that may wait for adoption.
    pub staging_depth: usize,
    /// Capacity of the render event ring.
    pub event_capacity: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        let config = EngineConfig::default();
        Self {
            max_frames: config.max_frames,
            max_nodes: config.max_nodes,
            staging_depth: config.staging_depth,
            event_capacity: config.event_capacity,
        }
    }
}

/// `[output]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputSettings {
    /// Render rate in Hz.
    pub sample_rate: u32,
    /// Output channel count.
    pub channels: u16,
    /// One of `"i16"`, `"i24"`, `"i32"`, `"f32"`, `"f64"`.
    pub sample_format: String,
    /// Interleaved rather than planar layout.
    pub interleaved: bool,
    /// Output device name filter; the system default when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device: Option<String>,
    /// Device buffer size in frames.
    pub buffer_size: u32,
}

impl Default for OutputSettings {
    fn default() -> Self {
        Self {
            sample_rate: 48000,
            channels: 2,
            sample_format: SampleFormat::Float32.name().to_string(),
            interleaved: false,
            device: None,
            buffer_size: 512,
        }
    }
}

impl OutputSettings {
    /// Parsed sample encoding.
    pub fn sample_format(&self) -> Result<SampleFormat, ConfigError> {
        self.sample_format.parse().map_err(|_| {
            ConfigError::Invalid(format!(
                "output.sample_format '{}' is not one of i16, i24, i32, f32, f64",
                self.sample_format
            ))
        })
    }

    /// Output boundary format.
    pub fn format(&self) -> Result<Format, ConfigError> {
        let format = Format::new(
            f64::from(self.sample_rate),
            self.channels,
            self.sample_format()?,
        )?;
        Ok(format.with_interleaved(self.interleaved))
    }
}

impl Settings {
    /// Load settings from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content =
            std::fs::read_to_string(path).map_err(|e| ConfigError::read_file(path, e))?;
        let settings = Self::from_toml_str(&content)?;
        Ok(settings)
    }

    /// Parse and validate settings from a TOML string.
    pub fn from_toml_str(toml_str: &str) -> Result<Self, ConfigError> {
        let settings: Settings = toml::from_str(toml_str)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Serialize to a TOML string.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Save to a TOML file, creating its directory if needed.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::write_file(parent, e))?;
        }
        let content = self.to_toml()?;
        std::fs::write(path, content).map_err(|e| ConfigError::write_file(path, e))?;
        Ok(())
    }

    /// Loads `path` if given; otherwise the default config file if it exists,
    /// falling back to defaults.
    ///
    /// An explicit path that cannot be read is an error.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = path {
            return Self::load(path);
        }
        let default_path = default_config_path();
        if default_path.is_file() {
            Self::load(default_path)
        } else {
            Ok(Self::default())
        }
    }

    /// Checks that the settings describe a usable engine.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.output.buffer_size == 0 {
            return Err(ConfigError::Invalid(
                "output.buffer_size must be non-zero".to_string(),
            ));
        }
        self.engine_config()?.validate()?;
        Ok(())
    }

    /// Engine configuration described by these settings.
    pub fn engine_config(&self) -> Result<EngineConfig, ConfigError> {
        Ok(EngineConfig {
            format: self.output.format()?,
            max_frames: self.engine.max_frames,
            max_nodes: self.engine.max_nodes,
            staging_depth: self.engine.staging_depth,
            event_capacity: self.engine.event_capacity,
        })
    }
}
