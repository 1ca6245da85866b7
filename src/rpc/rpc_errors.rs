use crate::retry::Retryable;
use solana_client::client_error::ClientError;
use std::time::Duration;
use thiserror::Error;

/// Failures talking to the chain RPC endpoint.
#[derive(Debug, Clone, Error)]
pub enum ChainRpcError {
    /// No response inside the configured timeout
    #[error("{operation} timed out after {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },

    /// Network-level failure (connection refused, reset, DNS)
    #[error("transport error during {operation}: {message}")]
    Transport { operation: String, message: String },

    /// The node answered with an error
    #[error("RPC error during {operation}: {message} (code: {code:?})")]
    Response {
        operation: String,
        message: String,
        code: Option<i64>,
    },

    /// Response arrived but could not be interpreted
    #[error("unexpected response during {operation}: {message}")]
    InvalidResponse { operation: String, message: String },
}

impl ChainRpcError {
    /// Transport failures and server-side 5xx/rate limits may succeed later.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout { .. } | Self::Transport { .. } => true,
            Self::Response { code, message, .. } => {
                matches!(code, Some(c) if (500..600).contains(c) || *c == 429)
                    || message.to_lowercase().contains("too many requests")
            }
            Self::InvalidResponse { .. } => false,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    pub fn operation(&self) -> &str {
        match self {
            Self::Timeout { operation, .. }
            | Self::Transport { operation, .. }
            | Self::Response { operation, .. }
            | Self::InvalidResponse { operation, .. } => operation,
        }
    }

    pub fn timeout(operation: &str, timeout_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.to_string(),
            timeout_ms,
        }
    }

    pub fn invalid_response(operation: &str, message: impl Into<String>) -> Self {
        Self::InvalidResponse {
            operation: operation.to_string(),
            message: message.into(),
        }
    }

    /// Classify a `solana-client` error by its message.
    pub fn from_client_error(err: ClientError, operation: &str, timeout_ms: u64) -> Self {
        let message = err.to_string();
        let lowered = message.to_lowercase();

        if lowered.contains("timed out") || lowered.contains("timeout") {
            return Self::timeout(operation, timeout_ms);
        }
        if lowered.contains("connection refused")
            || lowered.contains("connection reset")
            || lowered.contains("error sending request")
            || lowered.contains("dns error")
        {
            return Self::Transport {
                operation: operation.to_string(),
                message,
            };
        }

        let code = lowered
            .split("code:")
            .nth(1)
            .or_else(|| lowered.split("status code").nth(1))
            .and_then(|rest| {
                rest.trim_start_matches(|c: char| !c.is_ascii_digit() && c != '-')
                    .split(|c: char| !c.is_ascii_digit() && c != '-')
                    .next()
                    .and_then(|digits| digits.parse::<i64>().ok())
            });

        Self::Response {
            operation: operation.to_string(),
            message,
            code,
        }
    }
}

impl Retryable for ChainRpcError {
    fn is_retryable(&self) -> bool {
        ChainRpcError::is_retryable(self)
    }

    fn attempt_timed_out(operation: &str, limit: Duration) -> Self {
        Self::timeout(operation, limit.as_millis() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_is_retryable() {
        assert!(ChainRpcError::timeout("getAccountInfo", 5000).is_retryable());
        assert!(ChainRpcError::Transport {
            operation: "getEpochInfo".to_string(),
            message: "connection refused".to_string(),
        }
        .is_retryable());
        assert!(ChainRpcError::Response {
            operation: "getProgramAccounts".to_string(),
            message: "server error".to_string(),
            code: Some(503),
        }
        .is_retryable());

        assert!(!ChainRpcError::Response {
            operation: "getProgramAccounts".to_string(),
            message: "invalid param".to_string(),
            code: Some(-32602),
        }
        .is_retryable());
        assert!(!ChainRpcError::invalid_response("getVoteAccounts", "bad pubkey").is_retryable());
    }

    #[test]
    fn test_error_display_and_operation() {
        let err = ChainRpcError::timeout("getLatestBlockhash", 30_000);
        assert_eq!(err.to_string(), "getLatestBlockhash timed out after 30000ms");
        assert_eq!(err.operation(), "getLatestBlockhash");
        assert!(err.is_timeout());
    }
}
