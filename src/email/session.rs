//! Seams between the idle loop and the mail server.

use std::time::Duration;

use async_trait::async_trait;

use super::common::{FetchedMessage, SequenceRange};
use super::error::{ConnectError, SessionError};

/// Mailbox change pushed by the server while idling. Anything other than a
/// new message count is folded into `Other` and only restarts the idle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MailboxUpdate {
    Exists(u32),
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdleOutcome {
    Update(MailboxUpdate),
    /// The idle lifetime elapsed without any server push.
    Expired,
}

/// Opens authenticated sessions on the watched mailbox.
#[async_trait]
pub trait MailboxConnector: Send + Sync {
    type Session: MailboxSession;

    /// Connects, authenticates and selects the mailbox read-only. Returns the
    /// session and the number of messages currently in the mailbox.
    async fn open(&self) -> Result<(Self::Session, u32), ConnectError>;
}

/// One live connection, owned by a single worker.
#[async_trait]
pub trait MailboxSession: Send {
    /// Waits for a mailbox change for at most `lifetime`.
    async fn idle(&mut self, lifetime: Duration) -> Result<IdleOutcome, SessionError>;

    /// Retrieves envelope and raw body of every message in `range`.
    async fn fetch(&mut self, range: SequenceRange) -> Result<Vec<FetchedMessage>, SessionError>;

    /// Best-effort logout; never fails.
    async fn close(&mut self);
}
