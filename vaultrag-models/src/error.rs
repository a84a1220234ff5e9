//! Error types for the model service clients

use std::time::Duration;

/// Result type for model service operations.
pub type Result<T> = std::result::Result<T, ModelError>;

/// Error type for every call into an embedding, generation or entity service.
///
/// The variants separate failures worth retrying (the service was unreachable
/// or slow, see [`ModelError::is_transient`]) from failures that will repeat
/// on every attempt, such as a bad configuration or a response that does not
/// have the expected shape.
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    /// Error when the client configuration is invalid
    #[error("Invalid model configuration: {message}")]
    InvalidConfig { message: String },

    /// The service could not be reached or returned an HTTP error status
    #[error("Request to {service} failed: {source}")]
    Request {
        service: String,
        #[source]
        source: reqwest::Error,
    },

    /// The service reported itself unavailable (overloaded, model loading)
    #[error("{service} is unavailable: {message}")]
    Unavailable { service: String, message: String },

    /// The call did not finish within its deadline
    #[error("{service} did not answer within {elapsed:?}")]
    Timeout { service: String, elapsed: Duration },

    /// The service answered, but not with what was asked for
    #[error("Invalid response from {service}: {message}")]
    InvalidResponse { service: String, message: String },

    /// IO errors
    #[error("IO error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    /// Async task join errors
    #[error("Async task failed: {source}")]
    AsyncTask {
        #[from]
        source: tokio::task::JoinError,
    },

    /// Generic errors from other libraries
    #[error("External error: {source}")]
    External {
        #[from]
        source: anyhow::Error,
    },
}

impl ModelError {
    /// Create an invalid configuration error with a custom message.
    pub fn invalid_config<S: Into<String>>(message: S) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// Create an invalid response error for the named service.
    pub fn invalid_response<S: Into<String>, M: Into<String>>(service: S, message: M) -> Self {
        Self::InvalidResponse {
            service: service.into(),
            message: message.into(),
        }
    }

    pub fn unavailable<S: Into<String>, M: Into<String>>(service: S, message: M) -> Self {
        Self::Unavailable {
            service: service.into(),
            message: message.into(),
        }
    }

    /// Wraps a transport error, turning reqwest's own timeouts into
    /// [`ModelError::Timeout`].
    pub fn request<S: Into<String>>(service: S, source: reqwest::Error, limit: Duration) -> Self {
        let service = service.into();
        if source.is_timeout() {
            Self::Timeout {
                service,
                elapsed: limit,
            }
        } else {
            Self::Request { service, source }
        }
    }

    /// True for failures that may succeed on a later attempt: connection
    /// problems, server-side errors and timeouts.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Timeout { .. } | Self::Unavailable { .. } => true,
            Self::Request { source, .. } => {
                source.is_connect()
                    || source.is_timeout()
                    || source.is_request()
                    || source.status().is_some_and(|s| s.is_server_error())
            }
            _ => false,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}
