use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;

use crate::error::{GenerationError, Result};
use crate::parser;
use crate::types::{Credential, GeneratedFields, GenerationMode, GenerationRequest};
use crate::MetadataGenerator;

pub const DEFAULT_ENDPOINT: &str = "https://generativelanguage.googleapis.com";

/// Configuration for the Gemini client.
#[derive(Debug, Clone)]
pub struct GeminiConfig {
    /// API base URL, without a trailing path.
    pub endpoint: String,
    /// Per-request timeout (default: 120s).
    pub timeout: Duration,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            timeout: Duration::from_secs(120),
        }
    }
}

impl GeminiConfig {
    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// [`MetadataGenerator`] backed by the Gemini `generateContent` API.
#[derive(Debug, Clone)]
pub struct GeminiClient {
    client: Client,
    config: GeminiConfig,
}

impl GeminiClient {
    pub fn new(client: Client, config: GeminiConfig) -> Self {
        Self { client, config }
    }

    fn url(&self, model: &str) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent",
            self.config.endpoint.trim_end_matches('/'),
            model
        )
    }
}

impl Default for GeminiClient {
    fn default() -> Self {
        Self::new(Client::new(), GeminiConfig::default())
    }
}

impl MetadataGenerator for GeminiClient {
    async fn generate(
        &self,
        request: &GenerationRequest,
        credential: &Credential,
    ) -> Result<GeneratedFields> {
        let body = build_body(request);
        let url = self.url(&request.model);

        let resp = self
            .client
            .post(&url)
            .timeout(self.config.timeout)
            .header("x-goog-api-key", credential.token())
            .json(&body)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(GenerationError::Service { status, body });
        }

        let json: Value = resp.json().await?;
        let text = response_text(&json)?;
        parser::parse_fields(&text, request.mode)
    }
}

/// JSON schema sent as `responseSchema` for `mode`.
pub fn response_schema(mode: GenerationMode) -> Value {
    match mode {
        GenerationMode::Metadata => json!({
            "type": "OBJECT",
            "properties": {
                "title": { "type": "STRING" },
                "description": { "type": "STRING" },
                "keywords": { "type": "ARRAY", "items": { "type": "STRING" } },
                "category": { "type": "STRING" }
            },
            "required": ["title", "description", "keywords", "category"]
        }),
        GenerationMode::Prompt => json!({
            "type": "OBJECT",
            "properties": {
                "description": { "type": "STRING" }
            },
            "required": ["description"]
        }),
    }
}

fn build_body(request: &GenerationRequest) -> Value {
    json!({
        "contents": [{
            "parts": [
                { "text": request.prompt },
                {
                    "inlineData": {
                        "mimeType": request.payload.mime_type,
                        "data": request.payload.base64_data
                    }
                }
            ]
        }],
        "generationConfig": {
            "responseMimeType": "application/json",
            "responseSchema": response_schema(request.mode)
        }
    })
}

/// Concatenated text of the first candidate, or the reason there is none.
fn response_text(json: &Value) -> Result<String> {
    let candidate = json.get("candidates").and_then(|c| c.get(0));

    let text: String = candidate
        .and_then(|c| c.pointer("/content/parts"))
        .and_then(|p| p.as_array())
        .map(|parts| {
            parts
                .iter()
                .filter_map(|p| p.get("text").and_then(|t| t.as_str()))
                .collect()
        })
        .unwrap_or_default();

    if !text.trim().is_empty() {
        return Ok(text);
    }

    let finish_reason = candidate
        .and_then(|c| c.get("finishReason"))
        .and_then(|r| r.as_str());
    let block_reason = json
        .pointer("/promptFeedback/blockReason")
        .and_then(|r| r.as_str());

    if finish_reason == Some("SAFETY") || block_reason == Some("SAFETY") {
        tracing::debug!(response = %json, "Safety block");
        return Err(GenerationError::SafetyBlocked);
    }

    tracing::debug!(response = %json, "Response without text");
    Err(GenerationError::InvalidResponse(format!(
        "no text in response (finishReason: {})",
        finish_reason.unwrap_or("none")
    )))
}
