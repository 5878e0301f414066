//! Gemini session implementation
//!
//! Keeps the chat history client-side and ships the whole thing on every
//! `generateContent` call, which is what makes `send_message` with
//! `expect_response = false` free: the text joins the history without an
//! HTTP request.

use super::{ModelError, ModelGateway, ModelSession};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

const TITLE_PROMPT: &str = "Generate a very short (3-6 words) title summarizing this request. \
Output only the title, no quotes or punctuation.\n\nRequest:\n";

/// A stateful chat session against the Gemini API.
pub struct GeminiSession {
    http: Client,
    api_key: String,
    model: String,
    base_url: String,
    system_instruction: Mutex<Option<String>>,
    history: Mutex<Vec<Content>>,
}

impl GeminiSession {
    pub fn new(http: Client, api_key: String, model: String, base_url: String) -> Self {
        Self {
            http,
            api_key,
            model,
            base_url,
            system_instruction: Mutex::new(None),
            history: Mutex::new(Vec::new()),
        }
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/models/{}:generateContent",
            self.base_url.trim_end_matches('/'),
            self.model
        )
    }

    async fn complete(&self, request: &GenerateRequest) -> Result<String, ModelError> {
        let response = self
            .http
            .post(self.endpoint())
            .header("x-goog-api-key", &self.api_key)
            .json(request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ModelError::network(format!("Request timeout: {e}"))
                } else if e.is_connect() {
                    ModelError::network(format!("Connection failed: {e}"))
                } else {
                    ModelError::unknown(format!("Request failed: {e}"))
                }
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ModelError::network(format!("Failed to read response: {e}")))?;

        if !status.is_success() {
            return Err(classify_error(status, &body));
        }

        let parsed: GenerateResponse = serde_json::from_str(&body).map_err(|e| {
            ModelError::unknown(format!("Failed to parse response: {e} - body: {body}"))
        })?;

        let text = parsed
            .candidates
            .into_iter()
            .next()
            .map(|c| {
                c.content
                    .parts
                    .into_iter()
                    .filter_map(|p| p.text)
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();

        if text.is_empty() {
            return Err(ModelError::unknown("Model returned an empty reply"));
        }
        Ok(text)
    }

    fn request_with_history(&self, contents: Vec<Content>) -> GenerateRequest {
        GenerateRequest {
            system_instruction: self
                .system_instruction
                .lock()
                .unwrap()
                .as_ref()
                .map(|text| SystemInstruction {
                    parts: vec![Part {
                        text: Some(text.clone()),
                    }],
                }),
            contents,
            generation_config: None,
        }
    }
}

#[async_trait]
impl ModelSession for GeminiSession {
    async fn send_system_instruction(&self, text: &str) -> Result<(), ModelError> {
        *self.system_instruction.lock().unwrap() = Some(text.to_string());
        Ok(())
    }

    async fn send_message(&self, text: &str, expect_response: bool) -> Result<String, ModelError> {
        let contents = {
            let mut history = self.history.lock().unwrap();
            history.push(Content::user(text));
            if !expect_response {
                return Ok(String::new());
            }
            history.clone()
        };

        let request = self.request_with_history(contents);
        let reply = self.complete(&request).await?;

        self.history.lock().unwrap().push(Content::model(&reply));
        Ok(reply)
    }

    async fn reset(&self) {
        self.history.lock().unwrap().clear();
        *self.system_instruction.lock().unwrap() = None;
    }

    async fn generate_title(&self, seed: &str) -> Result<String, ModelError> {
        let prompt = format!("{TITLE_PROMPT}{seed}");
        let request = GenerateRequest {
            system_instruction: None,
            contents: vec![Content::user(&prompt)],
            generation_config: Some(GenerationConfig {
                max_output_tokens: 50,
            }),
        };
        self.complete(&request).await
    }
}

fn classify_error(status: reqwest::StatusCode, body: &str) -> ModelError {
    match status.as_u16() {
        401 | 403 => ModelError::auth(format!("Authentication failed: {body}")),
        429 => ModelError::rate_limit(format!("Rate limited: {body}")),
        400 => ModelError::invalid_request(format!("Invalid request: {body}")),
        500..=599 => ModelError::server_error(format!("Server error: {body}")),
        _ => ModelError::unknown(format!("HTTP {status}: {body}")),
    }
}

/// Opens Gemini sessions sharing one HTTP client.
pub struct GeminiGateway {
    http: Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl GeminiGateway {
    pub fn new(api_key: String, model: String, base_url: Option<String>) -> Self {
        let http = Client::builder()
            .timeout(Duration::from_secs(300))
            .build()
            .expect("Failed to create HTTP client");
        Self {
            http,
            api_key,
            model,
            base_url: base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
        }
    }
}

impl ModelGateway for GeminiGateway {
    fn open_session(&self) -> Arc<dyn ModelSession> {
        Arc::new(GeminiSession::new(
            self.http.clone(),
            self.api_key.clone(),
            self.model.clone(),
            self.base_url.clone(),
        ))
    }
}

// Gemini API types

#[derive(Debug, Serialize)]
struct GenerateRequest {
    #[serde(rename = "systemInstruction", skip_serializing_if = "Option::is_none")]
    system_instruction: Option<SystemInstruction>,
    contents: Vec<Content>,
    #[serde(rename = "generationConfig", skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig>,
}

#[derive(Debug, Serialize)]
struct SystemInstruction {
    parts: Vec<Part>,
}

#[derive(Debug, Serialize)]
struct GenerationConfig {
    #[serde(rename = "maxOutputTokens")]
    max_output_tokens: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Content {
    role: String,
    parts: Vec<Part>,
}

impl Content {
    fn user(text: &str) -> Self {
        Self {
            role: "user".to_string(),
            parts: vec![Part {
                text: Some(text.to_string()),
            }],
        }
    }

    fn model(text: &str) -> Self {
        Self {
            role: "model".to_string(),
            parts: vec![Part {
                text: Some(text.to_string()),
            }],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: CandidateContent,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<Part>,
}
