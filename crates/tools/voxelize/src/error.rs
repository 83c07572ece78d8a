//! Error types for the voxelize client
//!
//! Every failure falls into one of a handful of kinds so callers can decide
//! whether to fix their input, retry, or treat a response as corrupt.

use crate::transport::Service;

/// Errors that can occur while talking to the packing and meshing services
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Missing or invalid credential / base URL. Raised before any request.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A locally detectable contract violation. Never sent to a service.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// An artifact reference that cannot be turned into a payload
    #[error("Invalid artifact: {0}")]
    InvalidArtifact(String),

    /// No response was received (connection refused, timeout, dropped body)
    #[error("Transport error talking to {service} service: {message}")]
    Transport { service: Service, message: String },

    /// The service answered with a non-success status
    #[error("{service} service returned {status}: {message}")]
    RemoteService {
        service: Service,
        status: u16,
        /// Response body, verbatim
        message: String,
    },

    /// A response arrived but does not have the expected shape or encoding
    #[error("Decode error: {0}")]
    Decode(String),

    /// Local filesystem failure (reading meshes, writing artifacts)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for voxelize operations
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub(crate) fn invalid_argument(message: impl Into<String>) -> Self {
        Error::InvalidArgument(message.into())
    }

    pub(crate) fn decode(message: impl Into<String>) -> Self {
        Error::Decode(message.into())
    }

    /// Returns true if repeating the same call might succeed
    ///
    /// Transport failures, rate limiting and 5xx responses qualify. The client
    /// itself never retries; remote jobs are not assumed to be idempotent.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Transport { .. } => true,
            Error::RemoteService { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }

    /// Returns true if the error is caused by the caller's input or setup
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            Error::Configuration(_) | Error::InvalidArgument(_) | Error::InvalidArtifact(_)
        )
    }

    /// Returns true if the service rejected the call with 429
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Error::RemoteService { status: 429, .. })
    }

    /// Returns true if the service rejected the API key
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Error::RemoteService { status: 401 | 403, .. })
    }

    /// The HTTP status of a remote failure, if any
    pub fn status(&self) -> Option<u16> {
        match self {
            Error::RemoteService { status, .. } => Some(*status),
            _ => None,
        }
    }
}
