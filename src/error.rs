//! Error taxonomy for the RPC core.
//!
//! Two closed families: [`TransportError`] for connection-level failures and
//! [`RpcError`] for request/protocol-level failures. Each variant is reached
//! through a factory constructor rather than built with struct-literal
//! syntax, so call sites read as intent (`RpcError::invalid_path(path)`)
//! rather than data assembly.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Connection-level failure produced by a [`crate::transport::Transport`].
///
/// `retryable()` reports whether the condition is expected to clear on its
/// own (a dropped socket, a timed-out call) as opposed to one the caller
/// must fix before trying again (bad auth, an insecure scheme).
#[derive(Error, Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "code", rename_all = "camelCase")]
pub enum TransportError {
    #[error("failed to connect: {message}")]
    ConnectionFailed { message: String },

    #[error("connection timed out after {}ms", .0.as_millis())]
    ConnectionTimeout(Duration),

    #[error("connection lost")]
    ConnectionLost,

    #[error("request timed out after {}ms", .0.as_millis())]
    RequestTimeout(Duration),

    #[error("authentication failed: {message}")]
    AuthFailed { message: String },

    #[error("refusing to send auth token over an insecure connection")]
    InsecureConnection,

    #[error("reconnect failed after {attempts} attempts")]
    ReconnectFailed { attempts: u32 },

    #[error("heartbeat timed out — peer stopped responding to pings")]
    HeartbeatTimeout,

    #[error("{queue} queue full (limit {limit})")]
    QueueFull { queue: QueueKind, limit: usize },

    #[error("message dropped from receive buffer due to overflow")]
    MessageQueueOverflow,

    #[error("transport closed")]
    Closed,
}

/// Which bounded FIFO a [`TransportError::QueueFull`] refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueKind {
    Send,
    Receive,
}

impl std::fmt::Display for QueueKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Send => write!(f, "send"),
            Self::Receive => write!(f, "receive"),
        }
    }
}

impl TransportError {
    pub fn connection_failed(message: impl Into<String>) -> Self {
        Self::ConnectionFailed {
            message: message.into(),
        }
    }

    pub fn connection_timeout(after: Duration) -> Self {
        Self::ConnectionTimeout(after)
    }

    pub fn connection_lost() -> Self {
        Self::ConnectionLost
    }

    pub fn request_timeout(after: Duration) -> Self {
        Self::RequestTimeout(after)
    }

    pub fn auth_failed(message: impl Into<String>) -> Self {
        Self::AuthFailed {
            message: message.into(),
        }
    }

    pub fn insecure_connection() -> Self {
        Self::InsecureConnection
    }

    pub fn reconnect_failed(attempts: u32) -> Self {
        Self::ReconnectFailed { attempts }
    }

    pub fn heartbeat_timeout() -> Self {
        Self::HeartbeatTimeout
    }

    pub fn queue_full(queue: QueueKind, limit: usize) -> Self {
        Self::QueueFull { queue, limit }
    }

    pub fn message_queue_overflow() -> Self {
        Self::MessageQueueOverflow
    }

    pub fn closed() -> Self {
        Self::Closed
    }

    /// Whether retrying the same operation later might succeed.
    ///
    /// `AuthFailed`, `InsecureConnection`, and `ReconnectFailed` are
    /// non-retryable; everything else is.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            Self::AuthFailed { .. } | Self::InsecureConnection | Self::ReconnectFailed { .. }
        )
    }

    /// Stable string code, mirrored onto the wire in the WS full error form.
    pub fn code(&self) -> &'static str {
        match self {
            Self::ConnectionFailed { .. } => "CONNECTION_FAILED",
            Self::ConnectionTimeout(_) => "CONNECTION_TIMEOUT",
            Self::ConnectionLost => "CONNECTION_LOST",
            Self::RequestTimeout(_) => "REQUEST_TIMEOUT",
            Self::AuthFailed { .. } => "AUTH_FAILED",
            Self::InsecureConnection => "INSECURE_CONNECTION",
            Self::ReconnectFailed { .. } => "RECONNECT_FAILED",
            Self::HeartbeatTimeout => "HEARTBEAT_TIMEOUT",
            Self::QueueFull { .. } => "QUEUE_FULL",
            Self::MessageQueueOverflow => "MESSAGE_QUEUE_OVERFLOW",
            Self::Closed => "CLOSED",
        }
    }
}

/// Request/protocol-level failure — surfaced from a single `call()`.
#[derive(Error, Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcError {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl std::fmt::Display for RpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl RpcError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn invalid_path(path: impl std::fmt::Display) -> Self {
        Self::new("INVALID_PATH", format!("invalid method path: {path}"))
    }

    pub fn method_not_found(path: impl std::fmt::Display) -> Self {
        Self::new("METHOD_NOT_FOUND", format!("method not found: {path}"))
    }

    pub fn unknown_namespace(segment: impl std::fmt::Display) -> Self {
        Self::new(
            "UNKNOWN_NAMESPACE",
            format!("unknown namespace: {segment}"),
        )
    }

    pub fn unknown_method(segment: impl std::fmt::Display) -> Self {
        Self::new("UNKNOWN_METHOD", format!("unknown method: {segment}"))
    }

    pub fn parse_error(message: impl Into<String>) -> Self {
        Self::new("PARSE_ERROR", message)
    }

    pub fn protocol_error(message: impl Into<String>) -> Self {
        Self::new("PROTOCOL_ERROR", message)
    }

    pub fn module_error(message: impl Into<String>) -> Self {
        Self::new("MODULE_ERROR", message)
    }

    pub fn request_error(message: impl Into<String>) -> Self {
        Self::new("REQUEST_ERROR", message)
    }

    pub fn unknown_error(message: impl Into<String>) -> Self {
        Self::new("UNKNOWN_ERROR", message)
    }

    /// Classify an opaque failure from the HTTP batch transport (§7): consult
    /// a numeric status if present, otherwise fall back to a substring match
    /// on the message. The substring path is a fallback only — prefer
    /// carrying a real status code whenever the caller has one.
    pub fn classify_http(status: Option<u16>, message: &str) -> RpcClassification {
        if let Some(status) = status {
            return match status {
                401 => RpcClassification::Connection(TransportError::auth_failed(message)),
                429 => RpcClassification::Connection(TransportError::connection_failed(format!(
                    "rate limited: {message}"
                ))),
                500..=599 => {
                    RpcClassification::Connection(TransportError::connection_failed(message))
                }
                400..=499 => RpcClassification::Rpc(RpcError::request_error(message)),
                _ => RpcClassification::Rpc(RpcError::unknown_error(message)),
            };
        }

        let lower = message.to_ascii_lowercase();
        if lower.contains("401") {
            return RpcClassification::Connection(TransportError::auth_failed(message));
        }
        if lower.contains("429") {
            return RpcClassification::Connection(TransportError::connection_failed(message));
        }
        if has_5xx_substring(&lower) {
            return RpcClassification::Connection(TransportError::connection_failed(message));
        }
        if lower.contains("network")
            || lower.contains("fetch")
            || lower.contains("econnrefused")
            || lower.contains("enotfound")
            || lower.contains("timeout")
        {
            return RpcClassification::Connection(TransportError::connection_failed(message));
        }
        RpcClassification::Rpc(RpcError::unknown_error(message))
    }
}

fn has_5xx_substring(lower: &str) -> bool {
    ["500", "501", "502", "503", "504", "505"]
        .iter()
        .any(|code| lower.contains(code))
}

/// Result of classifying an opaque error from the HTTP batch transport.
#[derive(Debug, Clone)]
pub enum RpcClassification {
    Connection(TransportError),
    Rpc(RpcError),
}

/// The single error type a [`crate::transport::Transport::call`] surfaces.
///
/// `call()` returns exactly one error per invocation (§7) drawn from either
/// family; this wraps both so every transport implementation can share one
/// method signature without committing to just one taxonomy.
#[derive(Error, Debug, Clone)]
pub enum CallError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Rpc(#[from] RpcError),
}

impl From<RpcClassification> for CallError {
    fn from(c: RpcClassification) -> Self {
        match c {
            RpcClassification::Connection(e) => Self::Transport(e),
            RpcClassification::Rpc(e) => Self::Rpc(e),
        }
    }
}

impl CallError {
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_retryable(),
            Self::Rpc(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_retryable_kinds_are_exact() {
        assert!(!TransportError::auth_failed("x").is_retryable());
        assert!(!TransportError::insecure_connection().is_retryable());
        assert!(!TransportError::reconnect_failed(3).is_retryable());
        assert!(TransportError::connection_lost().is_retryable());
        assert!(TransportError::heartbeat_timeout().is_retryable());
        assert!(TransportError::queue_full(QueueKind::Send, 10).is_retryable());
    }

    #[test]
    fn classify_http_prefers_status_over_message() {
        match RpcError::classify_http(Some(401), "anything") {
            RpcClassification::Connection(e) => assert_eq!(e.code(), "AUTH_FAILED"),
            _ => panic!("expected connection error"),
        }
        match RpcError::classify_http(Some(404), "not found") {
            RpcClassification::Rpc(e) => assert_eq!(e.code, "REQUEST_ERROR"),
            _ => panic!("expected rpc error"),
        }
    }

    #[test]
    fn classify_http_falls_back_to_message_substring() {
        match RpcError::classify_http(None, "upstream returned 503 Service Unavailable") {
            RpcClassification::Connection(_) => {}
            _ => panic!("expected connection error from substring match"),
        }
        match RpcError::classify_http(None, "ECONNREFUSED: connect failed") {
            RpcClassification::Connection(_) => {}
            _ => panic!("expected connection error from keyword match"),
        }
        match RpcError::classify_http(None, "no such table 'widgets'") {
            RpcClassification::Rpc(e) => assert_eq!(e.code, "UNKNOWN_ERROR"),
            _ => panic!("expected rpc error"),
        }
    }
}
