//! Shared data-model types used across modules.
//!
//! Kept separate from any one component to avoid circular dependencies
//! between, e.g., the decision engine and the controller.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single message in a call's conversation history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into(), tool_name: None, timestamp: Utc::now() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: content.into(), tool_name: None, timestamp: Utc::now() }
    }

    pub fn tool(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self { role: Role::Tool, content: content.into(), tool_name: Some(name.into()), timestamp: Utc::now() }
    }
}

/// Role of a message sender.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    Tool,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Active task hint that nudges prompt assembly.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    #[default]
    None,
    CaptureLead,
    CreateAppt,
    EditAppt,
    DeleteAppt,
}

/// A tool invocation extracted from the model's free-form text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub name: String,
    pub arguments: HashMap<String, Value>,
}

/// The reserved flag a tool result may carry to request call termination.
pub const TERMINATE_FLAG: &str = "__terminate__";

/// Structured result of executing a `ToolCall`.
pub type ToolResult = serde_json::Map<String, Value>;

pub fn tool_error_result(error: impl Into<String>, details: impl Into<String>, arguments: &HashMap<String, Value>) -> ToolResult {
    let mut map = serde_json::Map::new();
    map.insert("error".to_string(), Value::String(error.into()));
    map.insert("details".to_string(), Value::String(details.into()));
    map.insert(
        "arguments_used".to_string(),
        serde_json::to_value(arguments).unwrap_or(Value::Null),
    );
    map
}

pub fn terminate_result(reason: impl Into<String>) -> ToolResult {
    let mut map = serde_json::Map::new();
    map.insert("action".to_string(), Value::String("end_call".to_string()));
    map.insert("reason".to_string(), Value::String(reason.into()));
    map.insert(TERMINATE_FLAG.to_string(), Value::Bool(true));
    map
}

pub fn result_is_terminate(result: &ToolResult) -> bool {
    result.get(TERMINATE_FLAG).and_then(Value::as_bool).unwrap_or(false)
}

/// Connectivity state machine for an external dependency (STT/TTS).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct ServiceHealth {
    pub status: HealthStatus,
    pub last_connected: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub reconnect_attempts: u32,
    pub total_reconnects: u32,
}

impl Default for ServiceHealth {
    fn default() -> Self {
        Self {
            status: HealthStatus::Disconnected,
            last_connected: None,
            last_error: None,
            reconnect_attempts: 0,
            total_reconnects: 0,
        }
    }
}

/// Why a Session ended, surfaced on the `Closed` transition.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    CallerHangup,
    AssistantRequest,
    SilenceTimeout,
    MaxDuration,
    SttLost,
    Fatal,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminate_result_round_trips() {
        let result = terminate_result("user_request");
        assert!(result_is_terminate(&result));
        assert_eq!(result.get("reason").unwrap().as_str(), Some("user_request"));
    }

    #[test]
    fn non_terminate_result_is_not_flagged() {
        let result: ToolResult = serde_json::from_str(r#"{"status":"ok"}"#).unwrap();
        assert!(!result_is_terminate(&result));
    }
}
