//! Centralized error types for mailrelay.

use thiserror::Error;

/// All errors produced by the mailrelay library.
#[derive(Error, Debug)]
pub enum RelayError {
    /// Network or TLS failure while opening a session.
    #[error("Connection to {endpoint} failed: {reason}")]
    Connection { endpoint: String, reason: String },

    /// The server rejected the credentials.
    #[error("Authentication as '{user}' failed: {reason}")]
    Auth { user: String, reason: String },

    /// The mailbox could not be selected.
    #[error("Cannot select mailbox '{mailbox}': {reason}")]
    Mailbox { mailbox: String, reason: String },

    /// The UNSEEN search failed at the protocol level.
    #[error("Search failed: {0}")]
    Search(String),

    /// A single message could not be fetched.
    #[error("Fetch of UID {uid} failed: {reason}")]
    Fetch { uid: u32, reason: String },

    /// A flag update on the source mailbox failed.
    #[error("Flag update for UID {uid} failed: {reason}")]
    Store { uid: u32, reason: String },

    /// The outbound message could not be assembled.
    #[error("Cannot build outbound message: {0}")]
    Build(String),

    /// The transport refused or dropped the outbound message.
    #[error("Send failed: {0}")]
    Send(String),

    /// A message could not be parsed as MIME.
    #[error("MIME parse error: {0}")]
    Parse(String),

    /// Missing or invalid configuration.
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Convenience alias for `Result<T, RelayError>`.
pub type Result<T> = std::result::Result<T, RelayError>;

impl RelayError {
    /// Create a `Connection` variant for `host:port`.
    pub fn connection(host: &str, port: u16, reason: impl ToString) -> Self {
        Self::Connection {
            endpoint: format!("{host}:{port}"),
            reason: reason.to_string(),
        }
    }
}
