//! Error kind taxonomy shared by every component.
//!
//! Components never unwind into the controller. Every fallible operation
//! returns `Result<T, GatewayError>`; the controller matches on `kind` to
//! decide recoverable vs. fatal handling.

use serde::Serialize;
use thiserror::Error;

/// Coarse error classification used for recovery policy, not for carrying
/// detail (that lives in `GatewayError::detail`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// STT/TTS/telephony link dropped.
    TransportLost,
    /// LLM first-token, TTS first-chunk, tool, or farewell deadline exceeded.
    Timeout,
    /// Malformed tool-call syntax; the call is skipped, others still run.
    ParseError,
    /// A tool executor returned or raised an error.
    ToolError,
    /// An operation was requested in a state that forbids it.
    InvalidState,
    /// Unrecoverable: component init failure, exhausted reconnects, panic boundary.
    Fatal,
}

#[derive(Debug, Error)]
#[error("{kind:?}: {detail}")]
pub struct GatewayError {
    pub kind: ErrorKind,
    pub detail: String,
}

impl GatewayError {
    pub fn new(kind: ErrorKind, detail: impl Into<String>) -> Self {
        Self { kind, detail: detail.into() }
    }

    pub fn transport_lost(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::TransportLost, detail)
    }

    pub fn timeout(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, detail)
    }

    pub fn parse_error(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::ParseError, detail)
    }

    pub fn tool_error(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::ToolError, detail)
    }

    pub fn invalid_state(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidState, detail)
    }

    pub fn fatal(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::Fatal, detail)
    }
}

/// Converts a process-boundary `anyhow::Error` (config/startup failures)
/// into the typed taxonomy before it can reach Session code.
impl From<anyhow::Error> for GatewayError {
    fn from(err: anyhow::Error) -> Self {
        GatewayError::fatal(err.to_string())
    }
}

pub type Outcome<T> = Result<T, GatewayError>;
