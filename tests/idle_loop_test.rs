use std::collections::VecDeque;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;

use booking_ingest::backoff::Backoff;
use booking_ingest::booking::{Booking, BookingProcessor};
use booking_ingest::email::{
    ConnectError, FetchedMessage, IdleOutcome, MailboxConnector, MailboxSession, MailboxUpdate,
    SequenceRange, SessionError,
};
use booking_ingest::ingest::{IngestLoop, IngestWorker, LoopSettings, LoopState};
use booking_ingest::persistence::{BookingRepository, IdGenerator, StoreOutcome};

const SUBJECT: &str = "New booking notification";

enum IdleStep {
    After(Duration, IdleOutcome),
    Fail,
}

enum FetchStep {
    Messages(Vec<FetchedMessage>),
    Fail,
    Stall,
}

/// Shared script and call log of the fake mail server.
#[derive(Default)]
struct Server {
    opens: VecDeque<Option<u32>>,
    /// When set, `open` never completes.
    stall_open: bool,
    idles: VecDeque<IdleStep>,
    fetches: VecDeque<FetchStep>,
    open_calls: usize,
    fetched_ranges: Vec<SequenceRange>,
    closes: usize,
}

type SharedServer = Arc<Mutex<Server>>;

struct FakeConnector(SharedServer);

struct FakeSession(SharedServer);

#[async_trait]
impl MailboxConnector for FakeConnector {
    type Session = FakeSession;

    async fn open(&self) -> Result<(FakeSession, u32), ConnectError> {
        let (next, stall) = {
            let mut server = self.0.lock().unwrap();
            server.open_calls += 1;
            (server.opens.pop_front().flatten(), server.stall_open)
        };
        if stall {
            std::future::pending::<()>().await;
        }

        match next {
            Some(count) => Ok((FakeSession(self.0.clone()), count)),
            None => Err(ConnectError::Authentication("rejected".to_string())),
        }
    }
}

#[async_trait]
impl MailboxSession for FakeSession {
    async fn idle(&mut self, lifetime: Duration) -> Result<IdleOutcome, SessionError> {
        let step = self.0.lock().unwrap().idles.pop_front();

        match step {
            Some(IdleStep::After(delay, outcome)) => {
                tokio::time::sleep(delay.min(lifetime)).await;
                Ok(outcome)
            }
            Some(IdleStep::Fail) => Err(SessionError::Protocol("connection reset".to_string())),
            // Nothing scripted: the server stays silent
            None => std::future::pending().await,
        }
    }

    async fn fetch(&mut self, range: SequenceRange) -> Result<Vec<FetchedMessage>, SessionError> {
        let step = {
            let mut server = self.0.lock().unwrap();
            server.fetched_ranges.push(range);
            server.fetches.pop_front()
        };

        match step {
            Some(FetchStep::Messages(messages)) => Ok(messages),
            Some(FetchStep::Stall) => std::future::pending().await,
            Some(FetchStep::Fail) | None => Err(SessionError::Disconnected),
        }
    }

    async fn close(&mut self) {
        self.0.lock().unwrap().closes += 1;
    }
}

struct CountingIds(AtomicI64);

impl IdGenerator for CountingIds {
    fn next_id(&self) -> Result<i64> {
        Ok(self.0.fetch_add(1, Ordering::SeqCst))
    }
}

#[derive(Default)]
struct MemoryRepository {
    bookings: Mutex<Vec<Booking>>,
}

#[async_trait]
impl BookingRepository for MemoryRepository {
    async fn create_booking(&self, booking: &Booking) -> Result<StoreOutcome> {
        self.bookings.lock().unwrap().push(booking.clone());
        Ok(StoreOutcome::Created)
    }
}

fn notification(sequence: u32, subject: &str, booking_number: &str) -> FetchedMessage {
    let html = format!(
        "<html><body><table><tr><td>Booking number: <b>{}</b></td></tr></table></body></html>",
        booking_number
    );
    FetchedMessage {
        sequence,
        subject: subject.to_string(),
        body: html.into_bytes(),
    }
}

fn exists(count: u32) -> IdleStep {
    IdleStep::After(Duration::from_secs(1), IdleOutcome::Update(MailboxUpdate::Exists(count)))
}

fn settings() -> LoopSettings {
    LoopSettings {
        idle_lifetime: Duration::from_secs(25 * 60),
        health_check_interval: Duration::from_secs(5 * 60),
        command_timeout: Duration::from_secs(3 * 60),
        subject: SUBJECT.to_string(),
    }
}

fn new_loop(server: &SharedServer) -> (IngestLoop<FakeConnector>, Arc<MemoryRepository>) {
    new_loop_with(server, settings())
}

fn new_loop_with(
    server: &SharedServer,
    settings: LoopSettings,
) -> (IngestLoop<FakeConnector>, Arc<MemoryRepository>) {
    let repository = Arc::new(MemoryRepository::default());
    let processor = BookingProcessor::new(
        Arc::new(CountingIds(AtomicI64::new(1))),
        repository.clone(),
    )
    .unwrap();

    let ingest = IngestLoop::new(
        FakeConnector(server.clone()),
        processor,
        settings,
        Backoff::default(),
    );

    (ingest, repository)
}

fn server(build: impl FnOnce(&mut Server)) -> SharedServer {
    let mut server = Server::default();
    build(&mut server);
    Arc::new(Mutex::new(server))
}

#[tokio::test(start_paused = true)]
async fn test_new_mail_is_fetched_filtered_and_stored() {
    let server = server(|s| {
        s.opens.push_back(Some(5));
        s.idles.push_back(exists(7));
        s.fetches.push_back(FetchStep::Messages(vec![
            notification(6, "Newsletter", "NOPE-1"),
            notification(7, SUBJECT, "HTL-1001"),
        ]));
    });
    let (mut ingest, repository) = new_loop(&server);

    assert_eq!(ingest.step().await, LoopState::Idling);
    assert_eq!(ingest.watermark(), 5);

    assert_eq!(ingest.step().await, LoopState::Fetching { new_count: 7 });
    assert_eq!(ingest.step().await, LoopState::Idling);
    assert_eq!(ingest.watermark(), 7);

    assert_eq!(server.lock().unwrap().fetched_ranges, vec![SequenceRange { from: 6, to: 7 }]);

    let bookings = repository.bookings.lock().unwrap();
    assert_eq!(bookings.len(), 1);
    assert_eq!(bookings[0].booking_number, "HTL-1001");
    assert_eq!(bookings[0].id, 1);
}

#[tokio::test(start_paused = true)]
async fn test_stale_counts_and_other_updates_keep_idling() {
    let server = server(|s| {
        s.opens.push_back(Some(5));
        s.idles.push_back(exists(5));
        s.idles.push_back(exists(3));
        s.idles.push_back(IdleStep::After(Duration::from_secs(1), IdleOutcome::Update(MailboxUpdate::Other)));
        s.idles.push_back(IdleStep::After(Duration::from_secs(25 * 60), IdleOutcome::Expired));
    });
    let (mut ingest, _) = new_loop(&server);

    assert_eq!(ingest.step().await, LoopState::Idling);
    for _ in 0..4 {
        assert_eq!(ingest.step().await, LoopState::Idling);
        assert_eq!(ingest.watermark(), 5);
    }

    assert!(server.lock().unwrap().fetched_ranges.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_failed_fetch_keeps_watermark_and_refetches_after_reconnect() {
    let server = server(|s| {
        s.opens.push_back(Some(5));
        s.opens.push_back(Some(8));
        s.idles.push_back(exists(7));
        s.fetches.push_back(FetchStep::Fail);
        s.fetches.push_back(FetchStep::Messages(vec![notification(6, SUBJECT, "HTL-6")]));
    });
    let (mut ingest, repository) = new_loop(&server);

    assert_eq!(ingest.step().await, LoopState::Idling);
    assert_eq!(ingest.step().await, LoopState::Fetching { new_count: 7 });

    assert_eq!(ingest.step().await, LoopState::Reconnecting);
    assert_eq!(ingest.watermark(), 5);
    assert_eq!(ingest.attempt(), 1);

    assert_eq!(ingest.step().await, LoopState::Connecting);
    assert_eq!(ingest.step().await, LoopState::Fetching { new_count: 8 });
    assert_eq!(ingest.watermark(), 5);

    assert_eq!(ingest.step().await, LoopState::Idling);
    assert_eq!(ingest.watermark(), 8);

    assert_eq!(
        server.lock().unwrap().fetched_ranges,
        vec![SequenceRange { from: 6, to: 7 }, SequenceRange { from: 6, to: 8 }]
    );
    assert_eq!(repository.bookings.lock().unwrap().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_backoff_grows_then_attempt_resets_after_clean_idle() {
    let server = server(|s| {
        s.opens.push_back(None);
        s.opens.push_back(None);
        s.opens.push_back(Some(2));
        s.idles.push_back(IdleStep::After(Duration::from_secs(25 * 60), IdleOutcome::Expired));
    });
    let (mut ingest, _) = new_loop(&server);

    assert_eq!(ingest.step().await, LoopState::Reconnecting);
    assert_eq!(ingest.attempt(), 1);

    let before = tokio::time::Instant::now();
    assert_eq!(ingest.step().await, LoopState::Connecting);
    assert_eq!(before.elapsed(), Backoff::default().delay(1));

    assert_eq!(ingest.step().await, LoopState::Reconnecting);
    assert_eq!(ingest.attempt(), 2);

    let before = tokio::time::Instant::now();
    assert_eq!(ingest.step().await, LoopState::Connecting);
    assert_eq!(before.elapsed(), Backoff::default().delay(2));

    assert_eq!(ingest.step().await, LoopState::Idling);
    assert_eq!(ingest.attempt(), 2);

    assert_eq!(ingest.step().await, LoopState::Idling);
    assert_eq!(ingest.attempt(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_idle_error_discards_session_and_reconnects() {
    let server = server(|s| {
        s.opens.push_back(Some(1));
        s.opens.push_back(Some(1));
        s.idles.push_back(IdleStep::Fail);
    });
    let (mut ingest, _) = new_loop(&server);

    assert_eq!(ingest.step().await, LoopState::Idling);
    assert_eq!(ingest.step().await, LoopState::Reconnecting);
    assert_eq!(ingest.step().await, LoopState::Connecting);
    assert_eq!(ingest.step().await, LoopState::Idling);

    let server = server.lock().unwrap();
    assert_eq!(server.open_calls, 2);
    // A broken session is dropped, never logged out
    assert_eq!(server.closes, 0);
}

#[tokio::test(start_paused = true)]
async fn test_health_ticks_do_not_interrupt_idle() {
    let server = server(|s| {
        s.opens.push_back(Some(1));
        s.idles.push_back(IdleStep::After(
            Duration::from_secs(12 * 60),
            IdleOutcome::Update(MailboxUpdate::Exists(2)),
        ));
    });
    let (mut ingest, _) = new_loop(&server);

    assert_eq!(ingest.step().await, LoopState::Idling);

    let before = tokio::time::Instant::now();
    assert_eq!(ingest.step().await, LoopState::Fetching { new_count: 2 });
    assert_eq!(before.elapsed(), Duration::from_secs(12 * 60));
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_loop_stops_before_any_network_call() {
    let server = server(|s| s.opens.push_back(Some(1)));
    let (mut ingest, _) = new_loop(&server);

    ingest.cancellation_token().cancel();

    assert_eq!(ingest.step().await, LoopState::Stopped);
    assert_eq!(ingest.step().await, LoopState::Stopped);
    assert_eq!(server.lock().unwrap().open_calls, 0);
}

#[tokio::test(start_paused = true)]
async fn test_stop_during_backoff_prevents_new_attempts() {
    // Every connection attempt is rejected
    let server = server(|_| {});
    let (ingest, _) = new_loop(&server);

    let worker = IngestWorker::start(ingest);
    tokio::time::sleep(Duration::from_secs(60)).await;

    worker.stop().await;
    let attempts = server.lock().unwrap().open_calls;
    assert!(attempts > 0);

    tokio::time::sleep(Duration::from_secs(3600)).await;
    assert_eq!(server.lock().unwrap().open_calls, attempts);
}

#[tokio::test(start_paused = true)]
async fn test_stop_during_idle_closes_session() {
    // No idle step scripted: the server never answers
    let server = server(|s| s.opens.push_back(Some(4)));
    let (ingest, _) = new_loop(&server);

    let worker = IngestWorker::start(ingest);
    tokio::time::sleep(Duration::from_secs(30 * 60)).await;
    assert!(!worker.is_finished());

    worker.stop().await;

    let server = server.lock().unwrap();
    assert_eq!(server.open_calls, 1);
    assert_eq!(server.closes, 1);
    assert!(server.fetched_ranges.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_stalled_open_times_out_into_reconnect() {
    let server = server(|s| s.stall_open = true);
    let (mut ingest, _) = new_loop(&server);

    let before = tokio::time::Instant::now();
    assert_eq!(ingest.step().await, LoopState::Reconnecting);
    assert_eq!(before.elapsed(), settings().command_timeout);
    assert_eq!(ingest.attempt(), 1);

    assert_eq!(ingest.step().await, LoopState::Connecting);
    assert_eq!(ingest.step().await, LoopState::Reconnecting);
    assert_eq!(server.lock().unwrap().open_calls, 2);
}

#[tokio::test(start_paused = true)]
async fn test_stalled_fetch_times_out_and_range_is_retried() {
    let server = server(|s| {
        s.opens.push_back(Some(5));
        s.opens.push_back(Some(7));
        s.idles.push_back(exists(7));
        s.fetches.push_back(FetchStep::Stall);
        s.fetches.push_back(FetchStep::Messages(vec![notification(7, SUBJECT, "HTL-7")]));
    });
    let (mut ingest, repository) = new_loop(&server);

    assert_eq!(ingest.step().await, LoopState::Idling);
    assert_eq!(ingest.step().await, LoopState::Fetching { new_count: 7 });

    let before = tokio::time::Instant::now();
    assert_eq!(ingest.step().await, LoopState::Reconnecting);
    assert_eq!(before.elapsed(), settings().command_timeout);
    assert_eq!(ingest.watermark(), 5);

    assert_eq!(ingest.step().await, LoopState::Connecting);
    assert_eq!(ingest.step().await, LoopState::Fetching { new_count: 7 });
    assert_eq!(ingest.step().await, LoopState::Idling);
    assert_eq!(ingest.watermark(), 7);

    assert_eq!(
        server.lock().unwrap().fetched_ranges,
        vec![SequenceRange { from: 6, to: 7 }, SequenceRange { from: 6, to: 7 }]
    );
    assert_eq!(repository.bookings.lock().unwrap().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_zero_health_interval_does_not_break_idle() {
    let server = server(|s| {
        s.opens.push_back(Some(1));
        s.idles.push_back(IdleStep::After(Duration::from_secs(10), IdleOutcome::Expired));
    });
    let (mut ingest, _) = new_loop_with(
        &server,
        LoopSettings {
            health_check_interval: Duration::ZERO,
            ..settings()
        },
    );

    assert_eq!(ingest.step().await, LoopState::Idling);
    assert_eq!(ingest.step().await, LoopState::Idling);
    assert_eq!(ingest.attempt(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_new_mail_then_lost_session_is_fetched_after_reconnect() {
    // EXISTS reported, then the connection drops before the fetch
    let server = server(|s| {
        s.opens.push_back(Some(3));
        s.opens.push_back(Some(4));
        s.idles.push_back(exists(4));
        s.fetches.push_back(FetchStep::Fail);
        s.fetches.push_back(FetchStep::Messages(vec![notification(4, SUBJECT, "HTL-4")]));
    });
    let (mut ingest, repository) = new_loop(&server);

    assert_eq!(ingest.step().await, LoopState::Idling);
    assert_eq!(ingest.step().await, LoopState::Fetching { new_count: 4 });
    assert_eq!(ingest.step().await, LoopState::Reconnecting);
    assert_eq!(ingest.step().await, LoopState::Connecting);
    assert_eq!(ingest.step().await, LoopState::Fetching { new_count: 4 });
    assert_eq!(ingest.step().await, LoopState::Idling);

    let bookings = repository.bookings.lock().unwrap();
    assert_eq!(bookings.len(), 1);
    assert_eq!(bookings[0].booking_number, "HTL-4");
}
