//! Error taxonomy for the client core.

use thiserror::Error;

/// Errors surfaced by the session, request, and realtime layers.
///
/// The merge engine never produces these; it drops bad input instead.
#[derive(Debug, Clone, Error)]
pub enum ClientError {
    /// Transport-level failure. Callers may retry; the core never does.
    #[error("network error: {0}")]
    Network(String),

    /// A 401 that the single refresh-and-replay could not recover.
    #[error("request was rejected as unauthorized")]
    AuthExpired,

    /// Renewal failed or no session exists. The shell must re-authenticate.
    #[error("session expired, sign in again")]
    SessionTerminated,

    /// The realtime channel is not connected.
    #[error("realtime channel is disconnected")]
    ChannelDisconnected,

    /// A live event failed validation at the channel boundary.
    #[error("malformed realtime event: {0}")]
    MalformedEvent(String),

    /// The endpoint answered with a non-success status.
    #[error("endpoint returned {status}: {message}")]
    Endpoint { status: u16, message: String },

    #[error("failed to decode response: {0}")]
    Decode(String),

    #[error("invalid token: {0}")]
    InvalidToken(String),

    #[error("credential storage error: {0}")]
    Storage(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl ClientError {
    /// True when the caller should send the user back to sign-in.
    pub fn requires_reauth(&self) -> bool {
        matches!(self, ClientError::SessionTerminated | ClientError::AuthExpired)
    }

    /// True for errors a caller may reasonably retry.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ClientError::Network(_) | ClientError::ChannelDisconnected
        )
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(err: serde_json::Error) -> Self {
        ClientError::Decode(err.to_string())
    }
}

impl From<std::io::Error> for ClientError {
    fn from(err: std::io::Error) -> Self {
        ClientError::Storage(err.to_string())
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        ClientError::Network(err.to_string())
    }
}

pub type Result<T, E = ClientError> = std::result::Result<T, E>;
