//! Mailbox connection and protocol error types.

use std::time::Duration;

use thiserror::Error;

/// Failures while opening a mailbox session. Each one is fatal to the
/// attempt and the caller reconnects with backoff.
#[derive(Error, Debug)]
pub enum ConnectError {
    #[error("TCP connection to {address} failed: {source}")]
    Tcp {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("TLS handshake failed: {0}")]
    Tls(String),

    #[error("authentication failed: {0}")]
    Authentication(String),

    #[error("unable to select mailbox '{mailbox}': {reason}")]
    MailboxSelection { mailbox: String, reason: String },

    #[error("{phase} timed out after {limit:?}")]
    Timeout { phase: &'static str, limit: Duration },
}

/// Failures of an already open session while idling or fetching. The
/// session is assumed corrupt and discarded.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("IMAP protocol error: {0}")]
    Protocol(String),

    #[error("session is not connected")]
    Disconnected,

    #[error("no response within {0:?}")]
    Timeout(Duration),
}

impl From<async_imap::error::Error> for SessionError {
    fn from(err: async_imap::error::Error) -> Self {
        SessionError::Protocol(err.to_string())
    }
}
