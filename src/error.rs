use thiserror::Error;

/// Error code the venue attaches to a rejected `authorize` when the
/// application identifier is not registered for the account.
pub const APP_ID_MISMATCH_CODE: &str = "InvalidAppID";

/// Error code for a subscribe request on an already-subscribed channel.
/// Benign: the existing stream keeps flowing, so dispatch swallows it.
pub const ALREADY_SUBSCRIBED_CODE: &str = "AlreadySubscribed";

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("missing API token")]
    MissingToken,

    #[error("WebSocket transport error: {0}")]
    Transport(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("authorization handshake timed out")]
    HandshakeTimeout,

    #[error("transport closed before authorization resolved")]
    ClosedBeforeAuth,

    #[error("transport closed while a request was in flight")]
    LinkClosed,

    #[error("venue rejected credentials [{code}]: {message}")]
    AuthRejected { code: String, message: String },

    #[error("application identifier not accepted by venue, re-registration required: {message}")]
    AppIdMismatch { message: String },

    #[error("operation requires an authorized connection")]
    NotAuthorized,

    #[error("no response from venue within the request timeout")]
    RequestTimeout,

    #[error("request [{code}] failed: {message}")]
    RequestRejected { code: String, message: String },

    #[error("link permanently down after exhausting reconnect attempts")]
    LinkDown,

    #[error("malformed venue message: {0}")]
    Protocol(String),

    #[error("JSON serialization/deserialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("URL parsing error: {0}")]
    Url(#[from] url::ParseError),

    #[error("outbound send failed, link is gone")]
    SendFailed,
}

impl ClientError {
    /// Classifies a venue-side `authorize` rejection, keeping the
    /// app-id mismatch distinguishable from a bad token.
    pub fn from_auth_rejection(code: &str, message: &str) -> Self {
        if code == APP_ID_MISMATCH_CODE {
            ClientError::AppIdMismatch {
                message: message.to_string(),
            }
        } else {
            ClientError::AuthRejected {
                code: code.to_string(),
                message: message.to_string(),
            }
        }
    }

    /// True for failures of the transport/handshake family.
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            ClientError::MissingToken
                | ClientError::Transport(_)
                | ClientError::HandshakeTimeout
                | ClientError::ClosedBeforeAuth
                | ClientError::LinkClosed
                | ClientError::SendFailed
        )
    }

    /// True when the venue explicitly refused the credentials.
    pub fn is_authorization_error(&self) -> bool {
        matches!(
            self,
            ClientError::AuthRejected { .. } | ClientError::AppIdMismatch { .. }
        )
    }
}
