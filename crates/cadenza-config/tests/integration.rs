//! File-level tests for cadenza-config.

use cadenza_config::{ConfigError, Settings};
use cadenza_core::{Graph, SampleFormat};
use tempfile::TempDir;

#[test]
fn save_then_load_preserves_settings() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("nested").join("config.toml");

    let mut settings = Settings::default();
    settings.engine.max_frames = 256;
    settings.output.sample_rate = 96000;
    settings.output.sample_format = "i32".to_string();
    settings.output.device = Some("Scarlett".to_string());
    settings.save(&path).unwrap();

    let loaded = Settings::load(&path).unwrap();
    assert_eq!(loaded, settings);
    assert_eq!(
        loaded.output.sample_format().unwrap(),
        SampleFormat::Int32
    );
}

#[test]
fn explicit_missing_path_is_an_error() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("absent.toml");
    let err = Settings::load_or_default(Some(path.as_path())).unwrap_err();
    assert!(matches!(err, ConfigError::ReadFile { .. }));
}

#[test]
fn invalid_file_is_rejected_on_load() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("bad.toml");
    std::fs::write(&path, "[engine]\nmax_frames = 0\n").unwrap();
    assert!(matches!(
        Settings::load(&path),
        Err(ConfigError::Invalid(_))
    ));
}

#[test]
fn loaded_settings_build_a_graph() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(
        &path,
        "[engine]\nmax_frames = 128\nmax_nodes = 8\n\n[output]\nchannels = 1\n",
    )
    .unwrap();

    let settings = Settings::load_or_default(Some(path.as_path())).unwrap();
    let (graph, renderer) = Graph::new(settings.engine_config().unwrap()).unwrap();
    assert_eq!(graph.config().max_nodes, 8);
    assert_eq!(renderer.max_frames(), 128);
    assert_eq!(renderer.format().channel_count(), 1);
}
