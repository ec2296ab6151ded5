use log::{debug, info};

use super::common::{FetchedMessage, SequenceRange};
use super::error::SessionError;
use super::session::MailboxSession;

/// Keeps the messages whose subject is exactly `subject` (surrounding
/// whitespace ignored).
pub fn filter_by_subject(messages: Vec<FetchedMessage>, subject: &str) -> Vec<FetchedMessage> {
    let expected = subject.trim();

    messages
        .into_iter()
        .filter(|message| {
            let keep = message.subject.trim() == expected;
            if !keep {
                debug!("Ignoring message {} with subject '{}'", message.sequence, message.subject);
            }
            keep
        })
        .collect()
}

/// Fetches `range` in one batch and returns the booking notification
/// candidates. A transport error aborts the whole batch.
pub async fn fetch_and_filter<S: MailboxSession + ?Sized>(
    session: &mut S,
    range: SequenceRange,
    subject: &str,
) -> Result<Vec<FetchedMessage>, SessionError> {
    let messages = session.fetch(range).await?;
    let fetched = messages.len();
    let candidates = filter_by_subject(messages, subject);

    info!(
        "Fetched {} message(s) in range {}, {} booking notification(s)",
        fetched, range, candidates.len()
    );

    Ok(candidates)
}
