//! ToolRegistry (C8, §4.8)
//!
//! Dispatches parsed `ToolCall`s to executors. Two built-ins (`end_call`,
//! `set_mode`) are handled in-process since they mutate gateway state
//! directly; every other tool is opaque business logic behind the
//! `ToolExecutor` trait, run on a bounded worker pool so one slow backend
//! call can't stall the whole turn.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Semaphore;

use crate::types::{terminate_result, tool_error_result, Mode, ToolCall, ToolResult};

pub const CALL_TIMEOUT: Duration = Duration::from_secs(10);

/// A pluggable business-tool implementation. Registered under its tool
/// name; the registry never inspects `arguments` itself.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    async fn execute(&self, arguments: &HashMap<String, Value>) -> ToolResult;
}

/// Placeholder executor for business tools this gateway doesn't implement
/// a real backend for (appointment scheduling, lead capture, ...). Returns
/// a generic success envelope so the conversation can continue end to end
/// without a calendar/CRM integration wired up.
pub struct StubExecutor {
    status: &'static str,
}

impl StubExecutor {
    pub fn new(status: &'static str) -> Self {
        Self { status }
    }
}

#[async_trait]
impl ToolExecutor for StubExecutor {
    async fn execute(&self, arguments: &HashMap<String, Value>) -> ToolResult {
        let mut map = serde_json::Map::new();
        map.insert("status".to_string(), Value::String(self.status.to_string()));
        map.insert("arguments_used".to_string(), serde_json::to_value(arguments).unwrap_or(Value::Null));
        map
    }
}

/// Result of dispatching one call: either a tool result ready for history,
/// or a signal that the call requests the conversation end.
pub enum DispatchOutcome {
    Result(ToolResult),
    Terminate { reason: String },
    SetMode(Mode),
}

pub struct ToolRegistry {
    executors: HashMap<String, Arc<dyn ToolExecutor>>,
    worker_slots: Arc<Semaphore>,
}

impl ToolRegistry {
    pub fn new(worker_pool_size: usize) -> Self {
        Self { executors: HashMap::new(), worker_slots: Arc::new(Semaphore::new(worker_pool_size.max(1))) }
    }

    pub fn register(&mut self, name: impl Into<String>, executor: Arc<dyn ToolExecutor>) {
        self.executors.insert(name.into(), executor);
    }

    /// Dispatch one parsed call. `end_call` and `set_mode` are handled
    /// in-process; everything else goes through the bounded worker pool
    /// with a 10s timeout and a `{"error":"busy"}` result when the pool is
    /// saturated.
    pub async fn dispatch(&self, call: &ToolCall) -> DispatchOutcome {
        if call.name == "end_call" {
            let reason = call
                .arguments
                .get("reason")
                .and_then(Value::as_str)
                .unwrap_or("assistant_request")
                .to_string();
            return DispatchOutcome::Terminate { reason };
        }

        if call.name == "set_mode" {
            let mode = match call.arguments.get("mode").and_then(Value::as_str) {
                Some("create_appt") => Mode::CreateAppt,
                Some("edit_appt") => Mode::EditAppt,
                Some("delete_appt") => Mode::DeleteAppt,
                Some("capture_lead") => Mode::CaptureLead,
                _ => Mode::None,
            };
            return DispatchOutcome::SetMode(mode);
        }

        let Some(executor) = self.executors.get(&call.name).cloned() else {
            return DispatchOutcome::Result(tool_error_result("unknown_tool", format!("no executor registered for {}", call.name), &call.arguments));
        };

        let permit = match tokio::time::timeout(CALL_TIMEOUT, self.worker_slots.clone().acquire_owned()).await {
            Ok(Ok(permit)) => permit,
            _ => {
                let mut busy = serde_json::Map::new();
                busy.insert("error".to_string(), Value::String("busy".to_string()));
                return DispatchOutcome::Result(busy);
            }
        };

        let arguments = call.arguments.clone();
        let result = tokio::time::timeout(CALL_TIMEOUT, executor.execute(&arguments)).await;
        drop(permit);

        match result {
            Ok(result) => DispatchOutcome::Result(result),
            Err(_) => DispatchOutcome::Result(tool_error_result("timeout", "tool call exceeded 10s", &arguments)),
        }
    }
}

/// A registry populated with the built-in catalog, all stubbed to a
/// success envelope. Real deployments replace the relevant entries with
/// executors backed by the business's CRM/calendar.
pub fn default_registry(worker_pool_size: usize) -> ToolRegistry {
    let mut registry = ToolRegistry::new(worker_pool_size);
    for name in [
        "registrar_lead",
        "process_appointment_request",
        "create_calendar_event",
        "edit_calendar_event",
        "delete_calendar_event",
        "search_calendar_event_by_phone",
    ] {
        registry.register(name, Arc::new(StubExecutor::new("success")));
    }
    registry
}

pub fn terminate_tool_result(reason: &str) -> ToolResult {
    terminate_result(reason)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn end_call_short_circuits_to_terminate() {
        let registry = default_registry(4);
        let call = ToolCall { name: "end_call".to_string(), arguments: HashMap::from([("reason".to_string(), Value::String("done".to_string()))]) };
        match registry.dispatch(&call).await {
            DispatchOutcome::Terminate { reason } => assert_eq!(reason, "done"),
            _ => panic!("expected terminate"),
        }
    }

    #[tokio::test]
    async fn set_mode_maps_string_argument_to_mode_enum() {
        let registry = default_registry(4);
        let call = ToolCall { name: "set_mode".to_string(), arguments: HashMap::from([("mode".to_string(), Value::String("create_appt".to_string()))]) };
        match registry.dispatch(&call).await {
            DispatchOutcome::SetMode(Mode::CreateAppt) => {}
            _ => panic!("expected CreateAppt"),
        }
    }

    #[tokio::test]
    async fn unknown_tool_name_returns_error_result() {
        let registry = default_registry(4);
        let call = ToolCall { name: "does_not_exist".to_string(), arguments: HashMap::new() };
        match registry.dispatch(&call).await {
            DispatchOutcome::Result(result) => assert_eq!(result.get("error").unwrap(), "unknown_tool"),
            _ => panic!("expected result"),
        }
    }

    #[tokio::test]
    async fn registered_stub_executor_returns_success_status() {
        let registry = default_registry(4);
        let call = ToolCall { name: "registrar_lead".to_string(), arguments: HashMap::new() };
        match registry.dispatch(&call).await {
            DispatchOutcome::Result(result) => assert_eq!(result.get("status").unwrap(), "success"),
            _ => panic!("expected result"),
        }
    }
}
