//! Application settings
//!
//! Read-only view of the persisted settings store at
//! `~/.gamesage/config.json`. The companion's settings UI owns the write
//! path; this core only consumes credentials and capture defaults. The
//! settings are loaded once and cached for the lifetime of the process.

use crate::listener::vad::ListenerConfig;
use anyhow::{Context, Result};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

/// Settings schema version
const CURRENT_VERSION: u32 = 1;

/// Global settings instance for caching
static SETTINGS: OnceLock<RwLock<AppSettings>> = OnceLock::new();

/// Top-level settings structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSettings {
    /// Schema version
    pub version: u32,
    /// Speech recognition service credentials
    pub recognition: RecognitionSettings,
    /// AI analysis service configuration
    pub analysis: AnalysisSettings,
    /// Screen capture cadence and escalation policy
    pub capture: CaptureSettings,
    /// Voice-activity thresholds
    pub listener: ListenerConfig,
    /// Spoken playback of AI replies
    pub speech: SpeechSettings,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            version: CURRENT_VERSION,
            recognition: RecognitionSettings::default(),
            analysis: AnalysisSettings::default(),
            capture: CaptureSettings::default(),
            listener: ListenerConfig::default(),
            speech: SpeechSettings::default(),
        }
    }
}

/// Speech recognition (one-sentence ASR) configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecognitionSettings {
    /// Gateway endpoint for the one-sentence recognition API
    pub endpoint: String,
    /// Project app key (None until the user configures the service)
    pub app_key: Option<String>,
    /// Access token (None until the user configures the service)
    pub token: Option<String>,
}

impl Default for RecognitionSettings {
    fn default() -> Self {
        Self {
            endpoint: "https://nls-gateway.aliyuncs.com/stream/v1/asr".to_string(),
            app_key: None,
            token: None,
        }
    }
}

/// AI analysis (multimodal chat completions) configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisSettings {
    /// OpenAI-compatible chat completions endpoint
    pub endpoint: String,
    /// API key (None until the user configures the service)
    pub api_key: Option<String>,
    /// Model name
    pub model: String,
    /// Request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for AnalysisSettings {
    fn default() -> Self {
        Self {
            endpoint: "https://api.openai.com/v1/chat/completions".to_string(),
            api_key: None,
            model: "gpt-4o".to_string(),
            timeout_secs: 30,
        }
    }
}

/// Screen capture cadence defaults and escalation policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureSettings {
    /// Capture interval while the game is active, in seconds
    pub active_interval_seconds: f32,
    /// Capture interval while the game is idle, in seconds
    pub idle_interval_seconds: f32,
    /// Consecutive both-missing sessions before the listening session is
    /// forcibly stopped
    pub escalation_threshold: u32,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            active_interval_seconds: 5.0,
            idle_interval_seconds: 15.0,
            escalation_threshold: crate::capture::DEFAULT_ESCALATION_THRESHOLD,
        }
    }
}

/// Spoken playback configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SpeechSettings {
    /// Whether AI replies are spoken aloud
    pub enabled: bool,
    /// Whether a new reply interrupts the previous one
    pub interrupt_previous: bool,
}

impl Default for SpeechSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            interrupt_previous: true,
        }
    }
}

/// Path to the settings file (~/.gamesage/config.json)
pub fn settings_path() -> PathBuf {
    home_dir_or_fallback().join(".gamesage").join("config.json")
}

/// Get the home directory, falling back to /tmp if unavailable
fn home_dir_or_fallback() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| {
        tracing::error!("Could not determine home directory, using /tmp");
        PathBuf::from("/tmp")
    })
}

/// Load settings from an explicit path
///
/// A missing file yields the defaults; a present but malformed file is an
/// error so a broken store never silently loses the user's credentials.
pub fn load_from_path(path: &Path) -> Result<AppSettings> {
    if !path.exists() {
        tracing::info!("Settings file not found, using defaults");
        return Ok(AppSettings::default());
    }

    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read settings file {}", path.display()))?;

    let settings: AppSettings =
        serde_json::from_str(&contents).context("failed to parse settings")?;

    Ok(settings)
}

fn settings_instance() -> &'static RwLock<AppSettings> {
    SETTINGS.get_or_init(|| {
        let settings = load_from_path(&settings_path()).unwrap_or_else(|e| {
            tracing::error!("Failed to load settings, using defaults: {}", e);
            AppSettings::default()
        });
        RwLock::new(settings)
    })
}

/// Current settings snapshot
///
/// Loaded from disk on first access and cached for the process lifetime.
pub fn get_settings() -> AppSettings {
    settings_instance().read().clone()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = AppSettings::default();
        assert_eq!(settings.version, CURRENT_VERSION);
        assert!(settings.recognition.app_key.is_none());
        assert_eq!(settings.capture.active_interval_seconds, 5.0);
        assert_eq!(settings.capture.idle_interval_seconds, 15.0);
        assert_eq!(settings.capture.escalation_threshold, 2);
        assert!(!settings.speech.enabled);
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let settings = load_from_path(Path::new("/nonexistent/config.json")).unwrap();
        assert_eq!(settings.version, CURRENT_VERSION);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let json = r#"{
            "recognition": { "app_key": "my-app", "token": "my-token" },
            "capture": { "active_interval_seconds": 3.0 }
        }"#;
        let settings: AppSettings = serde_json::from_str(json).unwrap();

        assert_eq!(settings.recognition.app_key.as_deref(), Some("my-app"));
        assert_eq!(settings.capture.active_interval_seconds, 3.0);
        // Untouched sections keep their defaults
        assert_eq!(settings.capture.idle_interval_seconds, 15.0);
        assert_eq!(settings.analysis.model, "gpt-4o");
        assert_eq!(settings.listener.volume_threshold, 0.02);
    }

    #[test]
    fn test_roundtrip() {
        let mut settings = AppSettings::default();
        settings.analysis.api_key = Some("sk-test".to_string());
        settings.speech.enabled = true;

        let json = serde_json::to_string_pretty(&settings).unwrap();
        let back: AppSettings = serde_json::from_str(&json).unwrap();

        assert_eq!(back.analysis.api_key.as_deref(), Some("sk-test"));
        assert!(back.speech.enabled);
    }
}
