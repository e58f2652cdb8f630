/// Failures reported by a transport session.
///
/// These never leave the stream client as `Err` values; they travel inside
/// `TransportEvent::Failed` and are absorbed by the reconnect supervisor.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The connection could not be established.
    #[error("connect failed ({endpoint}): {message}")]
    Connect { endpoint: String, message: String },
    /// The connection attempt did not finish within the configured timeout.
    #[error("connect timed out ({endpoint})")]
    Timeout { endpoint: String },
    /// Reading from or writing to an open connection failed.
    #[error("stream i/o failed: {message}")]
    Io { message: String },
}

impl TransportError {
    /// Creates a connect error.
    pub fn connect(endpoint: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Connect {
            endpoint: endpoint.into(),
            message: message.into(),
        }
    }

    /// Creates a connect-timeout error.
    pub fn timeout(endpoint: impl Into<String>) -> Self {
        Self::Timeout {
            endpoint: endpoint.into(),
        }
    }

    /// Creates an i/o error on an open connection.
    pub fn io(message: impl Into<String>) -> Self {
        Self::Io {
            message: message.into(),
        }
    }
}

/// Errors returned by the request/response collaborator calls.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ApiError {
    /// Backend answered with a non-success status.
    #[error("request failed with status {status}: {body}")]
    Status { status: u16, body: String },
    /// Request could not be sent or the response could not be read.
    #[error("transport error: {0}")]
    Transport(String),
    /// Response body did not match the expected shape.
    #[error("decode error: {0}")]
    Decode(String),
}

impl ApiError {
    /// Returns the HTTP status when the backend answered.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            Self::Transport(_) | Self::Decode(_) => None,
        }
    }
}

/// Top-level error type for the public stream API.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StreamError {
    /// Invalid client configuration.
    #[error("config error: {0}")]
    Config(String),
    /// Invalid caller input.
    #[error("validation error: {0}")]
    Validation(String),
    /// A collaborator request failed.
    #[error(transparent)]
    Api(#[from] ApiError),
}

impl StreamError {
    pub(crate) fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }
}
