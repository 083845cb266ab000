use std::time::Duration;

use thiserror::Error;

/// Errors returned by the answer-generation and mention-detection clients.
#[derive(Debug, Error)]
pub enum BackendError {
    /// The request was rejected before dispatch.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The requested model has no pricing entry, so it is never dispatched.
    #[error("unknown model '{0}'")]
    UnknownModel(String),

    /// The invocation exceeded its wall-clock budget. A subprocess is killed.
    #[error("backend timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    /// The backend command could not be started.
    #[error("failed to spawn backend '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// Pipe I/O with the backend subprocess failed.
    #[error("backend I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The subprocess exited without writing a response line.
    #[error("backend exited with {status} and no output: {stderr}")]
    Exited { status: String, stderr: String },

    /// Network or TLS failure from the underlying HTTP client.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The HTTP backend answered with a non-2xx status.
    #[error("backend returned HTTP {status}: {body}")]
    HttpStatus { status: u16, body: String },

    /// The response body could not be deserialized into the expected shape.
    #[error("JSON deserialization error for {context}: {source}")]
    Deserialize {
        context: String,
        #[source]
        source: serde_json::Error,
    },

    /// The response parsed but violates the contract (e.g. empty answer).
    #[error("malformed backend response: {0}")]
    InvalidResponse(String),

    /// The backend replied with an `{"error": "..."}` envelope.
    #[error("backend error: {0}")]
    Backend(String),
}

impl BackendError {
    /// Returns `true` for errors that are worth retrying after a back-off delay.
    ///
    /// Timeouts and transport failures (spawn, pipe I/O, silent exit, connect,
    /// HTTP 5xx and 429) are retriable. Malformed bodies, error envelopes,
    /// and request validation failures are not: retrying won't fix them.
    #[must_use]
    pub fn is_retriable(&self) -> bool {
        match self {
            Self::Timeout(_) | Self::Spawn { .. } | Self::Io(_) | Self::Exited { .. } => true,
            Self::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            Self::HttpStatus { status, .. } => *status == 429 || (500..600).contains(status),
            Self::InvalidRequest(_)
            | Self::UnknownModel(_)
            | Self::Deserialize { .. }
            | Self::InvalidResponse(_)
            | Self::Backend(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_failures_are_retriable() {
        assert!(BackendError::Timeout(Duration::from_secs(60)).is_retriable());
        assert!(BackendError::Io(std::io::Error::other("broken pipe")).is_retriable());
        assert!(BackendError::Exited {
            status: "exit status: 1".to_string(),
            stderr: String::new()
        }
        .is_retriable());
    }

    #[test]
    fn throttling_and_server_errors_are_retriable() {
        for status in [429, 500, 502, 503] {
            let err = BackendError::HttpStatus {
                status,
                body: String::new(),
            };
            assert!(err.is_retriable(), "{status} should be retried");
        }
    }

    #[test]
    fn client_errors_are_not_retriable() {
        let err = BackendError::HttpStatus {
            status: 400,
            body: "bad request".to_string(),
        };
        assert!(!err.is_retriable());
    }

    #[test]
    fn contract_violations_are_not_retriable() {
        let src = serde_json::from_str::<()>("invalid").unwrap_err();
        assert!(!BackendError::Deserialize {
            context: "answer".to_string(),
            source: src,
        }
        .is_retriable());
        assert!(!BackendError::Backend("model overloaded".to_string()).is_retriable());
        assert!(!BackendError::InvalidResponse("empty answer".to_string()).is_retriable());
        assert!(!BackendError::UnknownModel("ghost-model".to_string()).is_retriable());
    }
}
