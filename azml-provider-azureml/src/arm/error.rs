//! ARM error types

use azml_core::provider::{ProviderError, ProviderErrorKind};
use serde::Deserialize;
use thiserror::Error;

/// Errors returned while talking to Azure Resource Manager
#[derive(Debug, Error)]
pub enum ArmError {
    /// Transport failure
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Non-success status with the ARM error envelope
    #[error("ARM returned {status} ({code}): {message}")]
    Api {
        status: u16,
        code: String,
        message: String,
    },

    /// Token acquisition failed
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// A long-running operation finished in a failed or canceled state
    #[error("Operation {status}: {message}")]
    OperationFailed { status: String, message: String },

    #[error("Timed out after {0:?} waiting for {1}")]
    Timeout(std::time::Duration, String),

    /// The response could not be understood
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl ArmError {
    pub fn status(&self) -> Option<u16> {
        match self {
            ArmError::Api { status, .. } => Some(*status),
            ArmError::Http(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.status() == Some(404)
    }

    /// Throttling or transient server failure
    pub fn is_retryable(&self) -> bool {
        matches!(self.status(), Some(429) | Some(500..=599))
    }

    /// Build an `Api` error from a status and response body
    pub fn from_response(status: u16, body: &str) -> Self {
        #[derive(Deserialize)]
        struct Envelope {
            error: Option<ErrorDetail>,
        }

        match serde_json::from_str::<Envelope>(body)
            .ok()
            .and_then(|e| e.error)
        {
            Some(detail) => ArmError::Api {
                status,
                code: detail.code.unwrap_or_default(),
                message: detail.message.unwrap_or_default(),
            },
            None => ArmError::Api {
                status,
                code: String::new(),
                message: body.to_string(),
            },
        }
    }
}

/// `{ "code": ..., "message": ... }` part of the ARM error envelope
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorDetail {
    pub code: Option<String>,
    pub message: Option<String>,
}

impl From<ArmError> for ProviderError {
    fn from(err: ArmError) -> Self {
        let kind = match &err {
            e if e.is_not_found() => ProviderErrorKind::NotFound,
            ArmError::Timeout(..) => ProviderErrorKind::Timeout,
            _ => ProviderErrorKind::Api,
        };
        ProviderError::new("Azure Resource Manager request failed")
            .with_kind(kind)
            .with_cause(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_error_envelope() {
        let body = r#"{"error":{"code":"ResourceNotFound","message":"Workspace not found"}}"#;
        let err = ArmError::from_response(404, body);
        assert!(err.is_not_found());
        assert_eq!(
            err.to_string(),
            "ARM returned 404 (ResourceNotFound): Workspace not found"
        );
    }

    #[test]
    fn unparseable_body_is_kept_as_message() {
        let err = ArmError::from_response(502, "Bad Gateway");
        assert!(err.is_retryable());
        match err {
            ArmError::Api { code, message, .. } => {
                assert!(code.is_empty());
                assert_eq!(message, "Bad Gateway");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn converts_to_provider_error_kind() {
        let err: ProviderError = ArmError::from_response(404, "").into();
        assert_eq!(err.kind, ProviderErrorKind::NotFound);

        let err: ProviderError = ArmError::from_response(409, "").into();
        assert_eq!(err.kind, ProviderErrorKind::Api);
    }
}
