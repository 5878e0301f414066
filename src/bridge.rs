//! Tool bridge abstraction
//!
//! The bridge is the external service that executes named tools against
//! named backend servers and gates risky calls behind confirmations. Every
//! invocation may have a real-world effect, so there are no retries and no
//! caching anywhere in this module — one explicit request, one outbound call.

mod client;

pub use client::BridgeClient;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

/// Mapping from server id to the tools it exposes. Rebuilt wholesale on
/// refresh, never patched incrementally.
pub type ToolCatalog = BTreeMap<String, Vec<ToolSpec>>;

/// Bridge health snapshot.
#[derive(Debug, Clone, Deserialize)]
pub struct BridgeHealth {
    #[serde(rename = "serverCount", default)]
    pub server_count: u32,
}

/// A backend server registered with the bridge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerInfo {
    pub id: String,
}

/// One tool exposed by a server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(rename = "inputSchema", default)]
    pub input_schema: Option<Value>,
}

/// How a single tool invocation ended.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolOutcome {
    /// The tool ran and returned a result payload.
    Completed { result: Value },
    /// The bridge declined to execute until a human confirms.
    ConfirmationRequired {
        confirmation_id: String,
        method: String,
        risk_level: u8,
        risk_description: String,
    },
    /// Transport or bridge error. Never retried automatically — retrying a
    /// state-mutating tool call is unsafe by default.
    Failed {
        kind: BridgeFailure,
        message: String,
    },
}

/// Failure classification for tool invocations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeFailure {
    /// Network-level failure reaching the bridge.
    Transport,
    /// The bridge answered with an application-level error.
    Rejected,
}

/// Errors from the bridge's control-plane calls (health, catalog).
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("Bridge request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Bridge returned an invalid payload: {0}")]
    InvalidPayload(String),
}

/// Interface to the tool bridge.
#[async_trait]
pub trait ToolBridge: Send + Sync {
    async fn health(&self) -> Result<BridgeHealth, BridgeError>;

    async fn list_servers(&self) -> Result<Vec<ServerInfo>, BridgeError>;

    async fn list_tools(&self, server_id: &str) -> Result<Vec<ToolSpec>, BridgeError>;

    /// Execute a tool. Exactly one outbound call per invocation.
    async fn execute(&self, server_id: &str, tool_name: &str, parameters: &Value) -> ToolOutcome;

    /// Submit the user's decision for a gated call. Never returns
    /// `ConfirmationRequired`. On rejection the outcome is `Completed` with
    /// a result recording the cancellation and the supplied reason, so the
    /// feedback loop reports it to the model uniformly.
    async fn confirm(&self, confirmation_id: &str, approve: bool, reason: &str) -> ToolOutcome;

    /// Fetch the full catalog: every server, every tool. Servers whose tool
    /// listing fails contribute an empty entry rather than aborting the
    /// whole refresh.
    async fn load_catalog(&self) -> Result<ToolCatalog, BridgeError> {
        let mut catalog = ToolCatalog::new();
        for server in self.list_servers().await? {
            match self.list_tools(&server.id).await {
                Ok(tools) => {
                    catalog.insert(server.id, tools);
                }
                Err(e) => {
                    tracing::warn!(server = %server.id, error = %e, "Failed to list tools");
                    catalog.insert(server.id, Vec::new());
                }
            }
        }
        Ok(catalog)
    }
}

#[async_trait]
impl<T: ToolBridge + ?Sized> ToolBridge for Arc<T> {
    async fn health(&self) -> Result<BridgeHealth, BridgeError> {
        (**self).health().await
    }

    async fn list_servers(&self) -> Result<Vec<ServerInfo>, BridgeError> {
        (**self).list_servers().await
    }

    async fn list_tools(&self, server_id: &str) -> Result<Vec<ToolSpec>, BridgeError> {
        (**self).list_tools(server_id).await
    }

    async fn execute(&self, server_id: &str, tool_name: &str, parameters: &Value) -> ToolOutcome {
        (**self).execute(server_id, tool_name, parameters).await
    }

    async fn confirm(&self, confirmation_id: &str, approve: bool, reason: &str) -> ToolOutcome {
        (**self).confirm(confirmation_id, approve, reason).await
    }
}

/// The synthesized result recorded when the user rejects a gated call.
pub fn rejection_record(reason: &str) -> Value {
    serde_json::json!({
        "status": "rejected",
        "message": reason,
    })
}
