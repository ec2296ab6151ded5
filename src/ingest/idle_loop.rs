use std::time::Duration;

use log::{info, debug, warn};
use tokio::time::{interval_at, Instant};
use tokio_util::sync::CancellationToken;

use crate::backoff::Backoff;
use crate::booking::BookingProcessor;
use crate::config::IngestConfig;
use crate::email::{
    fetch_and_filter, ConnectError, IdleOutcome, MailboxConnector, MailboxSession, MailboxUpdate,
    SequenceRange, SessionError,
};

/// Floor for the health tick; `interval` rejects a zero period.
const MIN_HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Connecting,
    Idling,
    Fetching { new_count: u32 },
    Reconnecting,
    Stopped,
}

#[derive(Debug, Clone)]
pub struct LoopSettings {
    /// Hard upper bound of a single IDLE command.
    pub idle_lifetime: Duration,
    pub health_check_interval: Duration,
    /// Upper bound for opening a session and for one fetch.
    pub command_timeout: Duration,
    /// Exact subject of booking notifications.
    pub subject: String,
}

impl LoopSettings {
    pub fn from_config(config: &IngestConfig) -> Self {
        LoopSettings {
            idle_lifetime: config.idle_lifetime(),
            health_check_interval: config.health_check_interval(),
            command_timeout: config.command_timeout(),
            subject: config.booking_subject.clone(),
        }
    }
}

/// Idle/reconnect state machine for one mailbox.
///
/// Each call to [`IngestLoop::step`] performs exactly one transition, so the
/// loop can be driven by hand against fake connectors. [`IngestLoop::run`]
/// steps until the loop reaches [`LoopState::Stopped`], which only happens
/// through the cancellation token.
pub struct IngestLoop<C: MailboxConnector> {
    connector: C,
    processor: BookingProcessor,
    settings: LoopSettings,
    backoff: Backoff,
    cancel: CancellationToken,
    state: LoopState,
    attempt: u32,
    /// Highest sequence number already fetched on the current connection.
    watermark: u32,
    /// Watermark of a range whose fetch failed, carried over the reconnect.
    pending_from: Option<u32>,
    session: Option<C::Session>,
}

impl<C: MailboxConnector> IngestLoop<C> {
    pub fn new(
        connector: C,
        processor: BookingProcessor,
        settings: LoopSettings,
        backoff: Backoff,
    ) -> Self {
        IngestLoop {
            connector,
            processor,
            settings,
            backoff,
            cancel: CancellationToken::new(),
            state: LoopState::Connecting,
            attempt: 0,
            watermark: 0,
            pending_from: None,
            session: None,
        }
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn watermark(&self) -> u32 {
        self.watermark
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub async fn run(&mut self) {
        info!("🚀 Booking ingestion loop started");
        while self.step().await != LoopState::Stopped {}
        info!("Booking ingestion loop stopped");
    }

    pub async fn step(&mut self) -> LoopState {
        if self.state == LoopState::Stopped {
            return LoopState::Stopped;
        }

        let next = if self.cancel.is_cancelled() {
            LoopState::Stopped
        } else {
            match self.state {
                LoopState::Connecting => self.connect().await,
                LoopState::Idling => self.idle().await,
                LoopState::Fetching { new_count } => self.fetch(new_count).await,
                LoopState::Reconnecting => self.wait_backoff().await,
                LoopState::Stopped => LoopState::Stopped,
            }
        };

        if next == LoopState::Stopped {
            self.shutdown().await;
        }
        self.state = next;
        next
    }

    async fn connect(&mut self) -> LoopState {
        let limit = self.settings.command_timeout;
        let opened = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return LoopState::Stopped,
            opened = tokio::time::timeout(limit, self.connector.open()) => opened
                .unwrap_or_else(|_| Err(ConnectError::Timeout { phase: "mailbox open", limit })),
        };

        let (session, count) = match opened {
            Ok(opened) => opened,
            Err(e) => {
                warn!("❌ IMAP connection failed: {}", e);
                return self.fail();
            }
        };
        self.session = Some(session);

        match self.pending_from.take() {
            Some(from) => {
                self.watermark = from.min(count);
                info!(
                    "Connected, {} message(s) in mailbox, resuming after {}",
                    count, self.watermark
                );
                if count > self.watermark {
                    LoopState::Fetching { new_count: count }
                } else {
                    LoopState::Idling
                }
            }
            None => {
                self.watermark = count;
                info!("Connected, watermark set to {}", self.watermark);
                LoopState::Idling
            }
        }
    }

    async fn idle(&mut self) -> LoopState {
        let Some(session) = self.session.as_mut() else {
            return self.fail();
        };

        let period = self.settings.health_check_interval.max(MIN_HEALTH_CHECK_INTERVAL);
        let mut health = interval_at(Instant::now() + period, period);

        let outcome = {
            let mut idle = session.idle(self.settings.idle_lifetime);
            loop {
                tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => return LoopState::Stopped,
                    outcome = &mut idle => break outcome,
                    _ = health.tick() => {
                        debug!("Health check: IDLE alive, watermark {}", self.watermark);
                    }
                }
            }
        };

        match outcome {
            Ok(IdleOutcome::Update(MailboxUpdate::Exists(count))) if count > self.watermark => {
                self.attempt = 0;
                debug!("Mailbox now holds {} message(s), watermark {}", count, self.watermark);
                LoopState::Fetching { new_count: count }
            }
            Ok(outcome) => {
                self.attempt = 0;
                debug!("IDLE returned {:?}, idling again", outcome);
                LoopState::Idling
            }
            Err(e) => {
                warn!("IDLE failed: {}", e);
                self.fail()
            }
        }
    }

    async fn fetch(&mut self, new_count: u32) -> LoopState {
        let Some(range) = SequenceRange::after(self.watermark, new_count) else {
            return LoopState::Idling;
        };
        let Some(session) = self.session.as_mut() else {
            return self.fail();
        };

        let limit = self.settings.command_timeout;
        let fetched = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return LoopState::Stopped,
            fetched = tokio::time::timeout(limit, fetch_and_filter(session, range, &self.settings.subject)) => {
                fetched.unwrap_or_else(|_| Err(SessionError::Timeout(limit)))
            }
        };

        match fetched {
            Ok(candidates) => {
                self.processor.process_batch(candidates).await;
                self.watermark = new_count;
                self.pending_from = None;
                debug!("Watermark advanced to {}", self.watermark);
                LoopState::Idling
            }
            Err(e) => {
                warn!("Fetch of range {} failed: {}", range, e);
                self.pending_from = Some(self.watermark);
                self.fail()
            }
        }
    }

    async fn wait_backoff(&mut self) -> LoopState {
        let delay = self.backoff.delay(self.attempt);
        info!("Reconnecting in {:?} (attempt {})", delay, self.attempt);

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => LoopState::Stopped,
            _ = tokio::time::sleep(delay) => LoopState::Connecting,
        }
    }

    /// Drops the connection without talking to the server.
    fn fail(&mut self) -> LoopState {
        self.session = None;
        self.attempt = self.attempt.saturating_add(1);
        LoopState::Reconnecting
    }

    async fn shutdown(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.close().await;
        }
    }
}
