//! Error types for xDS operations.
//!
//! This module provides [`XdsError`], the single error type shared by the
//! management plane and the data plane. Each variant maps onto a gRPC status
//! code so that failures can be surfaced on a discovery stream unchanged.
//!
//! Selecting no filter chain is deliberately absent here: that outcome is a
//! regular return value of the matcher, not a failure.

/// Error type for xDS operations.
///
/// # Example
///
/// ```rust
/// use xds_core::XdsError;
///
/// fn validate_name(name: &str) -> Result<(), XdsError> {
///     if name.is_empty() {
///         return Err(XdsError::Validation {
///             type_url: "type.googleapis.com/envoy.config.cluster.v3.Cluster".to_string(),
///             name: name.to_string(),
///             reason: "resource name cannot be empty".to_string(),
///         });
///     }
///     Ok(())
/// }
/// ```
#[derive(Debug, thiserror::Error)]
pub enum XdsError {
    /// Malformed or unknown type URL.
    #[error("invalid type URL: {type_url} - {reason}")]
    InvalidTypeUrl {
        /// The invalid type URL.
        type_url: String,
        /// Reason why the type URL is invalid.
        reason: String,
    },

    /// Malformed resource or resource set. Never applied.
    #[error("invalid resource {type_url}/{name}: {reason}")]
    Validation {
        /// The type URL of the resource.
        type_url: String,
        /// The name of the resource (may be empty for set-level failures).
        name: String,
        /// Reason for validation failure.
        reason: String,
    },

    /// Request referencing neither the applied nor the pushed version.
    #[error("protocol error on {type_url}: {reason}")]
    Protocol {
        /// The type URL of the session.
        type_url: String,
        /// What was wrong with the request.
        reason: String,
    },

    /// A canary push was rejected while the terminate policy is active.
    #[error("canary push {version} for {type_url} rejected: {message}")]
    CanaryRejected {
        /// The type URL of the session.
        type_url: String,
        /// The rejected canary version.
        version: String,
        /// Error message from the node.
        message: String,
    },

    /// Client rejected configuration (NACK).
    #[error("NACK received from {node_id} for {type_url}: {error_message}")]
    NackReceived {
        /// The node ID that sent the NACK.
        node_id: String,
        /// The type URL that was rejected.
        type_url: String,
        /// The nonce of the rejected response.
        nonce: String,
        /// Error message from the client.
        error_message: String,
    },

    /// Unary fetch against a version the caller already holds.
    #[error("{type_url} is up to date at version {version}")]
    UpToDate {
        /// The type URL requested.
        type_url: String,
        /// The version already held by the caller.
        version: String,
    },

    /// Protobuf decoding failed.
    #[error("decoding error for {type_url}: {message}")]
    DecodingError {
        /// The type URL being decoded.
        type_url: String,
        /// Error message.
        message: String,
    },

    /// Client stream closed unexpectedly.
    #[error("stream closed: {reason}")]
    StreamClosed {
        /// Reason for stream closure.
        reason: String,
    },

    /// Unexpected internal error.
    #[error("internal error: {message}")]
    Internal {
        /// Error message.
        message: String,
        /// Optional underlying error.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Configuration error.
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl XdsError {
    /// Create a validation error.
    pub fn validation(
        type_url: impl Into<String>,
        name: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::Validation {
            type_url: type_url.into(),
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Create an internal error from any error type.
    pub fn internal<E>(message: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Internal {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Whether the error ends the stream it occurred on.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::CanaryRejected { .. } | Self::StreamClosed { .. } | Self::Internal { .. }
        )
    }
}

/// Convert to tonic::Status for gRPC responses.
impl From<XdsError> for tonic::Status {
    fn from(err: XdsError) -> Self {
        match &err {
            XdsError::InvalidTypeUrl { .. }
            | XdsError::Validation { .. }
            | XdsError::DecodingError { .. }
            | XdsError::Configuration(_) => tonic::Status::invalid_argument(err.to_string()),
            XdsError::Protocol { .. } | XdsError::CanaryRejected { .. } => {
                tonic::Status::failed_precondition(err.to_string())
            }
            XdsError::NackReceived { .. } => {
                // NACKs are informational, not necessarily errors for the server
                tonic::Status::ok(err.to_string())
            }
            XdsError::UpToDate { .. } => tonic::Status::already_exists(err.to_string()),
            XdsError::StreamClosed { .. } => tonic::Status::unavailable(err.to_string()),
            XdsError::Internal { .. } => tonic::Status::internal(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = XdsError::validation(
            "type.googleapis.com/envoy.config.listener.v3.Listener",
            "ingress",
            "duplicate resource name",
        );
        let text = err.to_string();
        assert!(text.contains("ingress"));
        assert!(text.contains("duplicate"));
    }

    #[test]
    fn test_error_to_status() {
        let err = XdsError::Protocol {
            type_url: "type.googleapis.com/envoy.config.listener.v3.Listener".to_string(),
            reason: "unknown version".to_string(),
        };
        let status: tonic::Status = err.into();
        assert_eq!(status.code(), tonic::Code::FailedPrecondition);

        let status: tonic::Status = XdsError::Configuration("bad".into()).into();
        assert_eq!(status.code(), tonic::Code::InvalidArgument);
    }

    #[test]
    fn test_fatal_classification() {
        let canary = XdsError::CanaryRejected {
            type_url: "t".into(),
            version: "v2".into(),
            message: "bad".into(),
        };
        assert!(canary.is_fatal());
        assert!(!XdsError::validation("t", "n", "r").is_fatal());
    }

    #[test]
    fn test_internal_error_helper() {
        let io_err = std::io::Error::other("test error");
        let err = XdsError::internal("operation failed", io_err);
        assert!(matches!(err, XdsError::Internal { .. }));
        assert!(std::error::Error::source(&err).is_some());
    }
}
