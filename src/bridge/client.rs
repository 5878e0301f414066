//! HTTP client for the tool bridge

use super::{
    rejection_record, BridgeError, BridgeFailure, BridgeHealth, ServerInfo, ToolBridge,
    ToolOutcome, ToolSpec,
};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;

/// Control-plane calls (health, listings, confirmations) are quick.
const CONTROL_TIMEOUT: Duration = Duration::from_secs(30);

/// Tool executions can legitimately run for a very long time.
const EXECUTE_TIMEOUT: Duration = Duration::from_secs(6000);

/// Client for an MCP-style tool bridge speaking HTTP/JSON.
pub struct BridgeClient {
    http: Client,
    base_url: String,
}

impl BridgeClient {
    pub fn new(base_url: &str) -> Self {
        let http = Client::builder()
            .build()
            .expect("Failed to create HTTP client");
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    /// Interpret a 2xx execution body: a `requires_confirmation` marker means
    /// the bridge gated the call, anything else is the literal result.
    fn outcome_from_body(body: Value) -> ToolOutcome {
        if body.get("requires_confirmation").and_then(Value::as_bool) == Some(true) {
            match serde_json::from_value::<ConfirmationEnvelope>(body.clone()) {
                Ok(envelope) => ToolOutcome::ConfirmationRequired {
                    confirmation_id: envelope.confirmation_id,
                    method: envelope.method,
                    risk_level: envelope.risk_level,
                    risk_description: envelope.risk_description,
                },
                Err(e) => ToolOutcome::Failed {
                    kind: BridgeFailure::Rejected,
                    message: format!("Invalid confirmation payload: {e}"),
                },
            }
        } else {
            ToolOutcome::Completed { result: body }
        }
    }

    fn transport_failure(e: &reqwest::Error) -> ToolOutcome {
        let message = if e.is_timeout() {
            format!("Request timeout: {e}")
        } else if e.is_connect() {
            format!("Connection failed: {e}")
        } else {
            format!("Request failed: {e}")
        };
        ToolOutcome::Failed {
            kind: BridgeFailure::Transport,
            message,
        }
    }

    /// Non-2xx responses: 5xx means the bridge itself is in trouble, 4xx is
    /// an application-level rejection. The body's `error` field is surfaced
    /// when present.
    fn status_failure(status: reqwest::StatusCode, body: &str) -> ToolOutcome {
        let detail = serde_json::from_str::<Value>(body)
            .ok()
            .and_then(|v| {
                v.get("error")
                    .and_then(Value::as_str)
                    .map(ToString::to_string)
            })
            .unwrap_or_else(|| body.to_string());
        let kind = if status.is_server_error() {
            BridgeFailure::Transport
        } else {
            BridgeFailure::Rejected
        };
        ToolOutcome::Failed {
            kind,
            message: format!("Error executing tool: HTTP {status}: {detail}"),
        }
    }

    async fn get_control(&self, path: &str) -> Result<String, BridgeError> {
        let response = self
            .http
            .get(self.url(path))
            .timeout(CONTROL_TIMEOUT)
            .send()
            .await?
            .error_for_status()?;
        Ok(response.text().await?)
    }

    async fn post_for_outcome(&self, url: &str, body: &Value, timeout: Duration) -> ToolOutcome {
        let response = match self
            .http
            .post(url)
            .timeout(timeout)
            .json(body)
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => return Self::transport_failure(&e),
        };

        let status = response.status();
        let text = match response.text().await {
            Ok(t) => t,
            Err(e) => return Self::transport_failure(&e),
        };

        if !status.is_success() {
            return Self::status_failure(status, &text);
        }

        match serde_json::from_str::<Value>(&text) {
            Ok(parsed) => Self::outcome_from_body(parsed),
            Err(e) => ToolOutcome::Failed {
                kind: BridgeFailure::Rejected,
                message: format!("Invalid bridge response: {e}"),
            },
        }
    }
}

#[async_trait]
impl ToolBridge for BridgeClient {
    async fn health(&self) -> Result<BridgeHealth, BridgeError> {
        let body = self.get_control("/health").await?;
        serde_json::from_str(&body).map_err(|e| BridgeError::InvalidPayload(e.to_string()))
    }

    async fn list_servers(&self) -> Result<Vec<ServerInfo>, BridgeError> {
        let body = self.get_control("/servers").await?;
        let list: ServerList = serde_json::from_str(&body)
            .map_err(|e| BridgeError::InvalidPayload(e.to_string()))?;
        Ok(list.servers)
    }

    async fn list_tools(&self, server_id: &str) -> Result<Vec<ToolSpec>, BridgeError> {
        let body = self
            .get_control(&format!("/servers/{server_id}/tools"))
            .await?;
        let list: ToolList = serde_json::from_str(&body)
            .map_err(|e| BridgeError::InvalidPayload(e.to_string()))?;
        Ok(list.tools)
    }

    async fn execute(&self, server_id: &str, tool_name: &str, parameters: &Value) -> ToolOutcome {
        tracing::info!(server = %server_id, tool = %tool_name, "Executing tool");
        let url = self.url(&format!("/servers/{server_id}/tools/{tool_name}"));
        self.post_for_outcome(&url, parameters, EXECUTE_TIMEOUT)
            .await
    }

    async fn confirm(&self, confirmation_id: &str, approve: bool, reason: &str) -> ToolOutcome {
        let url = self.url(&format!("/confirmations/{confirmation_id}"));
        let body = serde_json::json!({ "confirm": approve });

        if approve {
            tracing::info!(confirmation = %confirmation_id, "Confirming gated operation");
            let outcome = self.post_for_outcome(&url, &body, EXECUTE_TIMEOUT).await;
            // The bridge must not gate a decided call again; surface that as
            // a protocol error instead of suspending forever.
            if let ToolOutcome::ConfirmationRequired { .. } = outcome {
                return ToolOutcome::Failed {
                    kind: BridgeFailure::Rejected,
                    message: "Bridge requested confirmation again after approval".to_string(),
                };
            }
            outcome
        } else {
            tracing::info!(confirmation = %confirmation_id, "Rejecting gated operation");
            // Tell the bridge so it can discard the pending call, but the
            // user's rejection stands whatever the bridge answers.
            let _ = self.post_for_outcome(&url, &body, CONTROL_TIMEOUT).await;
            ToolOutcome::Completed {
                result: rejection_record(reason),
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct ServerList {
    #[serde(default)]
    servers: Vec<ServerInfo>,
}

#[derive(Debug, Deserialize)]
struct ToolList {
    #[serde(default)]
    tools: Vec<ToolSpec>,
}

#[derive(Debug, Deserialize)]
struct ConfirmationEnvelope {
    confirmation_id: String,
    #[serde(default)]
    method: String,
    #[serde(default)]
    risk_level: u8,
    #[serde(default)]
    risk_description: String,
}
