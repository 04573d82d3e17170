//! Settings store integration tests
//!
//! Exercises loading from real files in a temporary directory, so the
//! read-only settings path behaves the same way it does against the
//! application's persisted store.

use gamesage::config::{load_from_path, AppSettings};
use gamesage::session::SessionConfig;
use std::fs;
use tempfile::TempDir;

#[test]
fn test_missing_file_yields_defaults() {
    let dir = TempDir::new().unwrap();
    let settings = load_from_path(&dir.path().join("config.json")).unwrap();

    assert!(settings.recognition.app_key.is_none());
    assert_eq!(settings.capture.active_interval_seconds, 5.0);
    assert_eq!(settings.capture.escalation_threshold, 2);
}

#[test]
fn test_full_store_roundtrip() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.json");

    let mut settings = AppSettings::default();
    settings.recognition.app_key = Some("game-app".to_string());
    settings.recognition.token = Some("nls-token".to_string());
    settings.analysis.api_key = Some("sk-test".to_string());
    settings.analysis.model = "gpt-4o-mini".to_string();
    settings.capture.active_interval_seconds = 2.5;
    settings.listener.volume_threshold = 0.035;
    settings.speech.enabled = true;

    fs::write(&path, serde_json::to_string_pretty(&settings).unwrap()).unwrap();
    let loaded = load_from_path(&path).unwrap();

    assert_eq!(loaded.recognition.app_key.as_deref(), Some("game-app"));
    assert_eq!(loaded.analysis.model, "gpt-4o-mini");
    assert_eq!(loaded.capture.active_interval_seconds, 2.5);
    assert_eq!(loaded.listener.volume_threshold, 0.035);
    assert!(loaded.speech.enabled);
}

#[test]
fn test_partial_store_fills_defaults() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.json");

    fs::write(
        &path,
        r#"{ "capture": { "escalation_threshold": 3 } }"#,
    )
    .unwrap();
    let loaded = load_from_path(&path).unwrap();

    assert_eq!(loaded.capture.escalation_threshold, 3);
    assert_eq!(loaded.capture.idle_interval_seconds, 15.0);
    assert_eq!(loaded.listener.silence_duration_secs, 1.5);
}

#[test]
fn test_malformed_store_is_an_error() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.json");

    fs::write(&path, "{ not json").unwrap();
    assert!(load_from_path(&path).is_err());
}

#[test]
fn test_session_config_derived_from_store() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.json");

    fs::write(
        &path,
        r#"{
            "capture": { "active_interval_seconds": 3.0, "escalation_threshold": 4 },
            "listener": { "volume_threshold": 0.035, "silence_duration_secs": 2.5 },
            "speech": { "enabled": true }
        }"#,
    )
    .unwrap();

    let settings = load_from_path(&path).unwrap();
    let config = SessionConfig::from_settings(&settings);

    assert_eq!(config.strategy.active_interval_seconds, 3.0);
    assert_eq!(config.escalation_threshold, 4);
    assert_eq!(config.listener.volume_threshold, 0.035);
    assert_eq!(config.listener.silence_duration_secs, 2.5);
    assert!(config.speak_replies);
    // The cadence flags always start inert
    assert!(!config.strategy.is_active);
    assert!(!config.strategy.need_immediate_capture);
}
