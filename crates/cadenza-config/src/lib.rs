//! TOML settings for the Cadenza graph engine.
//!
//! A settings file has two sections: `[engine]` sizes the renderer and
//! `[output]` describes the output boundary and its device. Missing keys take
//! the same defaults as [`EngineConfig::default`](cadenza_core::EngineConfig).
//!
//! # Example
//!
//! ```rust,no_run
//! use cadenza_config::Settings;
//! use cadenza_core::Graph;
//!
//! let settings = Settings::load_or_default(None).unwrap();
//! let (graph, renderer) = Graph::new(settings.engine_config().unwrap()).unwrap();
//! ```

mod error;
mod settings;

/// Platform-specific configuration paths.
pub mod paths;

pub use error::ConfigError;
pub use paths::{default_config_path, user_config_dir};
pub use settings::{EngineSettings, OutputSettings, Settings};
