pub mod common;
pub mod error;
pub mod filter;
pub mod session;

// Re-export commonly used items
pub use common::{FetchedMessage, ProcessingResult, SequenceRange};
pub use error::{ConnectError, SessionError};
pub use filter::{fetch_and_filter, filter_by_subject};
pub use session::{IdleOutcome, MailboxConnector, MailboxSession, MailboxUpdate};
