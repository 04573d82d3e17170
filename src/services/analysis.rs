//! HTTP client for multimodal AI analysis
//!
//! Sends the recognized speech together with the before/after screenshots
//! to an OpenAI-compatible chat completions endpoint and returns the
//! model's free-text reply. The reply is expected to end with a fenced JSON
//! control block (`active`, `now`, `suggested_interval`) that the cadence
//! controller extracts; replies without one still work, they just leave the
//! capture cadence unchanged.
//!
//! There is no automatic retry: a failed analysis surfaces as a diagnostic
//! conversation message and the user re-triggers by speaking again.

use super::{AnalysisRequest, AnalysisService, ServiceError};
use crate::config::AnalysisSettings;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;

/// Upper bound on reply length in tokens
const MAX_REPLY_TOKENS: u32 = 800;

/// Sampling temperature for companion replies
const REPLY_TEMPERATURE: f32 = 0.7;

const SYSTEM_PROMPT: &str = "You are an AI gaming companion watching a \
player's screen while they talk. React to what they said and to what \
changed between the two screenshots (when present): keep replies short, \
conversational, and in the player's language. End every reply with a \
fenced ```json block containing {\"active\": bool, \"now\": bool, \
\"suggested_interval\": seconds} describing whether the game is in an \
active phase, whether you need a fresh screenshot immediately, and how \
often the screen should be captured next.";

/// OpenAI-compatible chat completions client
#[derive(Debug, Clone)]
pub struct ChatAnalysisClient {
    endpoint: String,
    api_key: Option<String>,
    model: String,
    client: reqwest::Client,
}

impl ChatAnalysisClient {
    pub fn new(settings: &AnalysisSettings) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            endpoint: settings.endpoint.clone(),
            api_key: settings.api_key.clone(),
            model: settings.model.clone(),
            client,
        }
    }

    /// Build the chat message list for a request
    ///
    /// Screenshot slots holding empty strings (capture misses) are simply
    /// omitted; the model still gets the speech text.
    fn build_messages(&self, request: &AnalysisRequest) -> Vec<Value> {
        let mut content = vec![json!({
            "type": "text",
            "text": format!(
                "The player said: \"{}\"\n\nImage 1 (if present) is the game \
                 when they started speaking; image 2 is when they finished.",
                request.speech_text
            ),
        })];

        for screenshot in [&request.screenshot_before, &request.screenshot_after] {
            if !screenshot.is_empty() {
                content.push(json!({
                    "type": "image_url",
                    "image_url": {
                        "url": format!("data:image/png;base64,{}", screenshot)
                    },
                }));
            }
        }

        vec![
            json!({ "role": "system", "content": SYSTEM_PROMPT }),
            json!({ "role": "user", "content": content }),
        ]
    }
}

#[async_trait]
impl AnalysisService for ChatAnalysisClient {
    async fn analyze(&self, request: &AnalysisRequest) -> Result<String, ServiceError> {
        let api_key = self
            .api_key
            .as_deref()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| ServiceError::MissingCredentials("analysis api key".to_string()))?;

        let body = json!({
            "model": self.model,
            "messages": self.build_messages(request),
            "temperature": REPLY_TEMPERATURE,
            "max_tokens": MAX_REPLY_TOKENS,
        });

        tracing::debug!(
            "Analysis: sending request (speech {} chars, before {}, after {})",
            request.speech_text.len(),
            if request.screenshot_before.is_empty() { "absent" } else { "present" },
            if request.screenshot_after.is_empty() { "absent" } else { "present" },
        );

        let response = self
            .client
            .post(&self.endpoint)
            .header("Authorization", format!("Bearer {}", api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| ServiceError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ServiceError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| ServiceError::Parse(e.to_string()))?;

        let reply = body["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| ServiceError::Parse("no message content in response".to_string()))?;

        tracing::info!("Analysis: received {} character reply", reply.len());
        Ok(reply.to_string())
    }
}
