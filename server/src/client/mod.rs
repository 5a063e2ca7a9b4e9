//! Notification stream client.
//!
//! [`NotificationClient`] keeps one user's inbox and unread count in step
//! with the server: it loads a snapshot, folds live frames from a
//! [`Subscription`] into it, and re-reads the snapshot after every reconnect
//! because the live channel never replays what was missed.

use thiserror::Error;

pub mod api;
pub mod backoff;
pub mod session;
pub mod subscription;

pub use api::{HttpApi, NotificationApi};
pub use backoff::Backoff;
pub use session::{
    run_session, ConnectionState, FrameOutcome, InboxView, NotificationClient, ReadAckPolicy,
};
pub use subscription::{
    ChannelSubscription, SseParser, SseSubscription, Subscription, SubscriptionEvent,
};

/// Snapshot size loaded on start and on every refresh.
pub const DEFAULT_SNAPSHOT_LIMIT: usize = 50;

#[derive(Debug, Error)]
pub enum ClientError {
    /// The request never got a well-formed answer.
    #[error("transport failure: {0}")]
    TransportFailure(String),

    /// The server answered with its error envelope.
    #[error("{code} ({status}): {message}")]
    Rejected {
        status: u16,
        code: String,
        message: String,
    },

    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        ClientError::TransportFailure(err.to_string())
    }
}

impl ClientError {
    /// Text fit to show the person who attempted the action.
    pub fn user_message(&self) -> String {
        match self {
            ClientError::Rejected { code, message, .. } => match code.as_str() {
                "CONFLICT" | "NOT_FOUND" => format!(
                    "This was already resolved by someone else. Refresh to see the latest state. ({})",
                    message
                ),
                "FORBIDDEN" => format!("You are not authorized to do this. ({})", message),
                "AUTH_ERROR" => "Sign in again to continue.".to_string(),
                "VALIDATION_ERROR" => message.clone(),
                _ => "The server could not complete the request. Try again later.".to_string(),
            },
            ClientError::TransportFailure(_) | ClientError::InvalidResponse(_) => {
                "Could not reach the server. Check your connection and try again.".to_string()
            }
        }
    }

    pub fn is_stale_state(&self) -> bool {
        matches!(self, ClientError::Rejected { code, .. } if code == "CONFLICT" || code == "NOT_FOUND")
    }
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub base_url: String,
    pub snapshot_limit: usize,
    pub backoff: Backoff,
    pub read_ack: ReadAckPolicy,
}

impl ClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            snapshot_limit: DEFAULT_SNAPSHOT_LIMIT,
            backoff: Backoff::default(),
            read_ack: ReadAckPolicy::default(),
        }
    }
}
