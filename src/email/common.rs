/// Common structures for mailbox processing
use std::fmt;

/// Inclusive range of mailbox sequence numbers, `from..=to`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequenceRange {
    pub from: u32,
    pub to: u32,
}

impl SequenceRange {
    /// Messages that arrived after `watermark`, up to `new_count`.
    /// `None` when there is nothing new.
    pub fn after(watermark: u32, new_count: u32) -> Option<Self> {
        if new_count > watermark {
            Some(SequenceRange {
                from: watermark + 1,
                to: new_count,
            })
        } else {
            None
        }
    }

    pub fn count(&self) -> u32 {
        self.to - self.from + 1
    }
}

/// IMAP sequence-set syntax: "5" or "4:9".
impl fmt::Display for SequenceRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.from == self.to {
            write!(f, "{}", self.from)
        } else {
            write!(f, "{}:{}", self.from, self.to)
        }
    }
}

/// One message retrieved from the mailbox.
#[derive(Debug, Clone)]
pub struct FetchedMessage {
    pub sequence: u32,
    pub subject: String,
    pub body: Vec<u8>,
}

/// Result of processing one batch of candidate emails
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ProcessingResult {
    pub bookings_created: usize,
    pub bookings_duplicated: usize,
    pub extraction_failures: usize,
    pub persistence_failures: usize,
}

impl ProcessingResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failures(&self) -> usize {
        self.extraction_failures + self.persistence_failures
    }
}
