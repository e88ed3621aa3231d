use http::StatusCode;
use thiserror::Error;

/// Result type alias for bridged operations
pub type Result<T, E = BridgeFault> = std::result::Result<T, E>;

/// Upper bound on the diagnostic text kept from a failed backend response.
pub const BODY_SNIPPET_LIMIT: usize = 1024;

/// Uniform failure of a bridged call.
///
/// Call executors normalize every transport, status and decoding failure into
/// one of these variants; operation handlers match on them and never see raw
/// client errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BridgeFault {
    /// Missing or invalid input, detected before anything is sent.
    #[error("{0}")]
    CallerArgument(String),

    /// Connection, DNS or TLS failure.
    #[error("network error calling {target}: {message}")]
    Network { target: String, message: String },

    /// Connect or read deadline exceeded.
    #[error("timed out calling {target}: {message}")]
    Timeout { target: String, message: String },

    /// Backend reachable but answered with a non-2xx status.
    #[error("{target} returned {status}: {body}")]
    Status {
        target: String,
        status: StatusCode,
        body: String,
    },

    /// Backend answered 2xx but the body could not be decoded.
    #[error("malformed response from {target}: {message}")]
    MalformedBody { target: String, message: String },
}

/// Tag of a [`BridgeFault`], as reported to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    CallerArgument,
    Network,
    Timeout,
    Status,
    MalformedBody,
}

impl FaultKind {
    pub const fn as_str(&self) -> &'static str {
        match self {
            FaultKind::CallerArgument => "caller-argument-error",
            FaultKind::Network => "network-error",
            FaultKind::Timeout => "timeout",
            FaultKind::Status => "non-2xx-status",
            FaultKind::MalformedBody => "malformed-body",
        }
    }
}

impl BridgeFault {
    pub fn caller_argument(message: impl Into<String>) -> Self {
        BridgeFault::CallerArgument(message.into())
    }

    /// Fails with a caller-argument error when a required argument is empty.
    pub fn require<'a>(name: &str, value: Option<&'a str>) -> Result<&'a str> {
        match value {
            Some(v) if !v.trim().is_empty() => Ok(v),
            _ => Err(BridgeFault::CallerArgument(format!(
                "Missing required argument '{name}'"
            ))),
        }
    }

    pub fn kind(&self) -> FaultKind {
        match self {
            BridgeFault::CallerArgument(_) => FaultKind::CallerArgument,
            BridgeFault::Network { .. } => FaultKind::Network,
            BridgeFault::Timeout { .. } => FaultKind::Timeout,
            BridgeFault::Status { .. } => FaultKind::Status,
            BridgeFault::MalformedBody { .. } => FaultKind::MalformedBody,
        }
    }

    pub fn status(&self) -> Option<StatusCode> {
        match self {
            BridgeFault::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.status() == Some(StatusCode::NOT_FOUND)
    }

    /// Message handed to callers in faults and per-item results.
    ///
    /// For status faults this is the backend's diagnostic text when it sent
    /// one, otherwise the canonical reason of the status code.
    pub fn message(&self) -> String {
        match self {
            BridgeFault::Status { status, body, .. } if body.is_empty() => status
                .canonical_reason()
                .map(str::to_string)
                .unwrap_or_else(|| status.to_string()),
            BridgeFault::Status { body, .. } => body.clone(),
            other => other.to_string(),
        }
    }
}

/// Truncates backend diagnostic text to [`BODY_SNIPPET_LIMIT`] bytes on a
/// character boundary.
pub fn snippet(text: &str) -> String {
    let trimmed = text.trim();
    if trimmed.len() <= BODY_SNIPPET_LIMIT {
        return trimmed.to_string();
    }
    let mut end = BODY_SNIPPET_LIMIT;
    while !trimmed.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &trimmed[..end])
}

/// Errors of the serving process itself, never returned to callers as faults.
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(#[from] crate::config::ValidationError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fault_kinds() {
        let fault = BridgeFault::Status {
            target: "poller".to_string(),
            status: StatusCode::NOT_FOUND,
            body: String::new(),
        };
        assert_eq!(fault.kind().as_str(), "non-2xx-status");
        assert!(fault.is_not_found());
        assert_eq!(fault.message(), "Not Found");

        let fault = BridgeFault::Timeout {
            target: "crawler".to_string(),
            message: "deadline elapsed".to_string(),
        };
        assert_eq!(fault.kind(), FaultKind::Timeout);
        assert!(!fault.is_not_found());
        assert_eq!(fault.message(), "timed out calling crawler: deadline elapsed");
    }

    #[test]
    fn test_status_message_prefers_body() {
        let fault = BridgeFault::Status {
            target: "repository".to_string(),
            status: StatusCode::INTERNAL_SERVER_ERROR,
            body: "disk full".to_string(),
        };
        assert_eq!(fault.message(), "disk full");
    }

    #[test]
    fn test_require() {
        assert_eq!(BridgeFault::require("auId", Some("a")).unwrap(), "a");
        assert!(matches!(
            BridgeFault::require("auId", Some("  ")),
            Err(BridgeFault::CallerArgument(_))
        ));
        let err = BridgeFault::require("auId", None).unwrap_err();
        assert_eq!(err.to_string(), "Missing required argument 'auId'");
    }

    #[test]
    fn test_snippet_truncates_on_char_boundary() {
        let long = "é".repeat(BODY_SNIPPET_LIMIT);
        let cut = snippet(&long);
        assert!(cut.ends_with("..."));
        assert!(cut.len() <= BODY_SNIPPET_LIMIT + 3);
        assert_eq!(snippet("  short  "), "short");
    }
}
