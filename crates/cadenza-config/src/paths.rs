//! Platform-specific configuration paths.
//!
//! - Linux: `~/.config/cadenza/`
//! - macOS: `~/Library/Application Support/cadenza/`
//! - Windows: `%APPDATA%\cadenza\`

use std::path::PathBuf;

/// Application name used for directory paths.
const APP_NAME: &str = "cadenza";

/// File name of the settings file inside [`user_config_dir`].
const CONFIG_FILE: &str = "config.toml";

/// Returns the user-specific configuration directory.
///
/// Returns a fallback path if the config directory cannot be determined.
pub fn user_config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_NAME)
}

/// Path of the settings file loaded when none is given.
pub fn default_config_path() -> PathBuf {
    user_config_dir().join(CONFIG_FILE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_dir_contains_app_name() {
        assert!(user_config_dir().to_string_lossy().contains("cadenza"));
    }

    #[test]
    fn test_default_config_path_is_toml() {
        let path = default_config_path();
        assert!(path.starts_with(user_config_dir()));
        assert_eq!(path.extension().unwrap(), "toml");
    }
}
