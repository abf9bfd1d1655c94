use thiserror::Error;
use util::ws::HubError;

/// Result type for caller-facing tracker operations.
pub type Result<T> = std::result::Result<T, TrackerError>;

/// Failures reported by the REST collaborator.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ApiError {
    #[error("server responded {status}: {message}")]
    Server {
        status: u16,
        error_key: Option<String>,
        message: String,
    },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("unexpected response body: {0}")]
    Decode(String),
}

impl ApiError {
    /// Error key the server uses when a grader holds too many locks.
    pub const LOCK_LIMIT_REACHED: &'static str = "lockedSubmissionsLimitReached";

    pub fn error_key(&self) -> Option<&str> {
        match self {
            ApiError::Server { error_key, .. } => error_key.as_deref(),
            _ => None,
        }
    }

    pub fn is_lock_limit_reached(&self) -> bool {
        self.error_key() == Some(Self::LOCK_LIMIT_REACHED)
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ApiError::Decode(err.to_string())
        } else {
            ApiError::Transport(err.to_string())
        }
    }
}

/// Failures of the push transport.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ChannelError {
    #[error("push channel is disconnected")]
    Disconnected,

    #[error("subscription to '{topic}' was refused: {reason}")]
    Rejected { topic: String, reason: String },
}

impl From<HubError> for ChannelError {
    fn from(err: HubError) -> Self {
        match err {
            HubError::Disconnected => ChannelError::Disconnected,
            HubError::Rejected { topic, reason } => ChannelError::Rejected { topic, reason },
        }
    }
}

/// Errors surfaced to callers of trigger and lock operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TrackerError {
    #[error(transparent)]
    Api(#[from] ApiError),

    #[error("a lock request for {0} is already in flight")]
    LockRequestInFlight(String),
}
