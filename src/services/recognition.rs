//! HTTP client for one-sentence speech recognition
//!
//! Posts a finished PCM segment to the NLS one-sentence ASR gateway and
//! returns the recognized text. Credentials (app key + token) come from the
//! read-only settings store; `ensure_ready` lets the orchestrator reject a
//! chain before any network traffic when they are absent.

use super::{RecognitionService, ServiceError};
use crate::config::RecognitionSettings;
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

/// Default timeout for recognition requests in seconds
const DEFAULT_TIMEOUT_SECS: u64 = 15;

/// Service status code for a successful recognition
const STATUS_SUCCESS: u32 = 20_000_000;

/// Response body from the one-sentence recognition endpoint
#[derive(Debug, Deserialize)]
struct AsrResponse {
    status: u32,
    #[serde(default)]
    result: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

/// One-sentence ASR client
#[derive(Debug, Clone)]
pub struct OneSentenceAsrClient {
    endpoint: String,
    app_key: Option<String>,
    token: Option<String>,
    client: reqwest::Client,
}

impl OneSentenceAsrClient {
    pub fn new(settings: &RecognitionSettings) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            endpoint: settings.endpoint.clone(),
            app_key: settings.app_key.clone(),
            token: settings.token.clone(),
            client,
        }
    }

    fn credentials(&self) -> Result<(&str, &str), ServiceError> {
        let app_key = self
            .app_key
            .as_deref()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| ServiceError::MissingCredentials("recognition app key".to_string()))?;
        let token = self
            .token
            .as_deref()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| ServiceError::MissingCredentials("recognition token".to_string()))?;
        Ok((app_key, token))
    }
}

#[async_trait]
impl RecognitionService for OneSentenceAsrClient {
    fn ensure_ready(&self) -> Result<(), ServiceError> {
        self.credentials().map(|_| ())
    }

    async fn recognize(&self, pcm: &[u8], sample_rate: u32) -> Result<String, ServiceError> {
        let (app_key, token) = self.credentials()?;

        let url = format!(
            "{}?appkey={}&format=pcm&sample_rate={}",
            self.endpoint, app_key, sample_rate
        );

        tracing::debug!(
            "ASR: posting {} bytes at {} Hz",
            pcm.len(),
            sample_rate
        );

        let response = self
            .client
            .post(&url)
            .header("X-NLS-Token", token)
            .header("Content-Type", "application/octet-stream")
            .body(pcm.to_vec())
            .send()
            .await
            .map_err(|e| ServiceError::Transport(e.to_string()))?;

        let http_status = response.status();
        if !http_status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ServiceError::Api {
                status: http_status.as_u16(),
                message,
            });
        }

        let body: AsrResponse = response
            .json()
            .await
            .map_err(|e| ServiceError::Parse(e.to_string()))?;

        if body.status != STATUS_SUCCESS {
            return Err(ServiceError::Api {
                status: http_status.as_u16(),
                message: format!(
                    "recognition status {}: {}",
                    body.status,
                    body.message.unwrap_or_default()
                ),
            });
        }

        let text = body.result.unwrap_or_default();
        tracing::info!("ASR: recognized {} characters", text.len());
        Ok(text)
    }
}
