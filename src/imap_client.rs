use std::future::Future;
use std::time::Duration;

use async_imap::extensions::idle::IdleResponse;
use async_imap::imap_proto::{MailboxDatum, Response};
use async_imap::types::{Fetch, UnsolicitedResponse};
use async_imap::Session;
use async_native_tls::{TlsConnector, TlsStream};
use async_trait::async_trait;
use futures::stream::StreamExt;
use log::{info, debug, warn};
use tokio::net::TcpStream;
use tokio_util::compat::{Compat, TokioAsyncReadCompatExt};

use crate::config::ImapConfig;
use crate::email::{
    ConnectError, FetchedMessage, IdleOutcome, MailboxConnector, MailboxSession, MailboxUpdate,
    SequenceRange, SessionError,
};

type ImapStream = TlsStream<Compat<TcpStream>>;

/// Upper bound for each connection phase and for IDLE setup/teardown, so a
/// stalled connection cannot block the worker.
const COMMAND_TIMEOUT: Duration = Duration::from_secs(30);
/// Upper bound for one FETCH, command and body transfer included.
const FETCH_TIMEOUT: Duration = Duration::from_secs(120);
const LOGOUT_TIMEOUT: Duration = Duration::from_secs(10);

/// Read-only IMAP session on the watched mailbox.
pub struct ImapClient {
    session: Option<Session<ImapStream>>,
    mailbox: String,
    /// Highest EXISTS count the server reported outside of IDLE.
    pending_exists: Option<u32>,
}

impl ImapClient {
    pub async fn connect(config: &ImapConfig) -> Result<(Self, u32), ConnectError> {
        info!("Connecting to IMAP server {}:{}", config.server, config.port);

        // Open the TCP connection
        let tcp_stream = connect_phase("TCP connect", TcpStream::connect((config.server.as_str(), config.port)))
            .await?
            .map_err(|source| ConnectError::Tcp {
                address: format!("{}:{}", config.server, config.port),
                source,
            })?;

        // TLS handshake over the futures-compatible stream
        let tls = TlsConnector::new();
        let tls_stream = connect_phase("TLS handshake", tls.connect(&config.server, tcp_stream.compat()))
            .await?
            .map_err(|e| ConnectError::Tls(e.to_string()))?;

        let client = async_imap::Client::new(tls_stream);

        // Authentication
        let mut session = connect_phase("LOGIN", client.login(&config.username, &config.password))
            .await?
            .map_err(|(e, _)| ConnectError::Authentication(e.to_string()))?;

        // EXAMINE keeps the mailbox read-only for this session
        let selection = match connect_phase("EXAMINE", session.examine(&config.mailbox)).await {
            Ok(Ok(mailbox)) => Ok(mailbox),
            Ok(Err(e)) => Err(ConnectError::MailboxSelection {
                mailbox: config.mailbox.clone(),
                reason: e.to_string(),
            }),
            Err(timeout) => Err(timeout),
        };
        let mailbox = match selection {
            Ok(mailbox) => mailbox,
            Err(e) => {
                let _ = with_timeout(LOGOUT_TIMEOUT, session.logout()).await;
                return Err(e);
            }
        };

        info!("✅ IMAP mailbox '{}' opened read-only, {} message(s)", config.mailbox, mailbox.exists);

        let client = ImapClient {
            session: Some(session),
            mailbox: config.mailbox.clone(),
            pending_exists: None,
        };

        Ok((client, mailbox.exists))
    }

    /// Collects EXISTS counts the server sent alongside earlier commands,
    /// e.g. mail that arrived while a FETCH was running.
    fn drain_unsolicited_responses(&mut self) {
        let Some(session) = self.session.as_ref() else {
            return;
        };

        while let Ok(response) = session.unsolicited_responses.try_recv() {
            match response {
                UnsolicitedResponse::Exists(count) => {
                    debug!("Unsolicited EXISTS {} on '{}'", count, self.mailbox);
                    self.pending_exists = Some(self.pending_exists.map_or(count, |c| c.max(count)));
                }
                other => debug!("Ignoring unsolicited response on '{}': {:?}", self.mailbox, other),
            }
        }
    }
}

async fn with_timeout<T, F>(limit: Duration, future: F) -> Result<T, SessionError>
where
    F: Future<Output = async_imap::error::Result<T>>,
{
    match tokio::time::timeout(limit, future).await {
        Ok(result) => result.map_err(SessionError::from),
        Err(_) => Err(SessionError::Timeout(limit)),
    }
}

async fn connect_phase<T, F>(phase: &'static str, future: F) -> Result<T, ConnectError>
where
    F: Future<Output = T>,
{
    tokio::time::timeout(COMMAND_TIMEOUT, future)
        .await
        .map_err(|_| ConnectError::Timeout { phase, limit: COMMAND_TIMEOUT })
}

/// Keeps an EXISTS count already pushed by the server when IDLE teardown
/// fails. The session is gone, so the following fetch fails and the range
/// is requested again after the reconnect.
fn outcome_after_teardown_failure(
    outcome: IdleOutcome,
    error: SessionError,
) -> Result<IdleOutcome, SessionError> {
    match outcome {
        IdleOutcome::Update(MailboxUpdate::Exists(count)) => {
            warn!("IDLE teardown failed after EXISTS {}: {}", count, error);
            Ok(outcome)
        }
        _ => Err(error),
    }
}

fn mailbox_update(response: &Response<'_>) -> MailboxUpdate {
    match response {
        Response::MailboxData(MailboxDatum::Exists(count)) => MailboxUpdate::Exists(*count),
        _ => MailboxUpdate::Other,
    }
}

/// Subject decoded from the message headers, falling back to the raw
/// envelope subject.
fn message_subject(fetch: &Fetch, body: &[u8]) -> String {
    let decoded = mail_parser::MessageParser::default()
        .parse(body)
        .and_then(|message| message.subject().map(str::to_string));

    decoded
        .or_else(|| {
            fetch.envelope()
                .and_then(|envelope| envelope.subject.as_ref())
                .map(|subject| String::from_utf8_lossy(subject).into_owned())
        })
        .unwrap_or_default()
}

#[async_trait]
impl MailboxSession for ImapClient {
    async fn idle(&mut self, lifetime: Duration) -> Result<IdleOutcome, SessionError> {
        self.drain_unsolicited_responses();
        if let Some(count) = self.pending_exists.take() {
            return Ok(IdleOutcome::Update(MailboxUpdate::Exists(count)));
        }

        let session = self.session.take().ok_or(SessionError::Disconnected)?;
        let mut handle = session.idle();
        with_timeout(COMMAND_TIMEOUT, handle.init()).await?;
        debug!("IDLE started on '{}' for at most {:?}", self.mailbox, lifetime);

        let (wait, _interrupt) = handle.wait();
        let response = match tokio::time::timeout(lifetime, wait).await {
            Ok(Ok(response)) => Some(response),
            Ok(Err(e)) => return Err(e.into()),
            // Hard lifetime, independent of the server
            Err(_) => None,
        };

        let outcome = match response {
            Some(IdleResponse::NewData(data)) => IdleOutcome::Update(mailbox_update(data.parsed())),
            Some(IdleResponse::Timeout) | Some(IdleResponse::ManualInterrupt) | None => {
                IdleOutcome::Expired
            }
        };

        match with_timeout(COMMAND_TIMEOUT, handle.done()).await {
            Ok(session) => {
                self.session = Some(session);
                Ok(outcome)
            }
            Err(e) => outcome_after_teardown_failure(outcome, e),
        }
    }

    async fn fetch(&mut self, range: SequenceRange) -> Result<Vec<FetchedMessage>, SessionError> {
        let session = self.session.as_mut().ok_or(SessionError::Disconnected)?;
        debug!("Fetching messages {} from '{}'", range, self.mailbox);

        // BODY.PEEK leaves the \Seen flag untouched
        let fetched = with_timeout(FETCH_TIMEOUT, async {
            let stream = session.fetch(range.to_string(), "(ENVELOPE BODY.PEEK[])").await?;
            let results: Vec<_> = stream.collect().await;
            results.into_iter().collect::<async_imap::error::Result<Vec<_>>>()
        })
        .await;

        let fetched = match fetched {
            Ok(fetched) => fetched,
            Err(e) => {
                // A half-read response leaves the stream unusable
                self.session = None;
                return Err(e);
            }
        };

        let mut messages = Vec::with_capacity(fetched.len());
        for fetch in fetched {
            let body = fetch.body().map(<[u8]>::to_vec).unwrap_or_default();
            if body.is_empty() {
                warn!("Message {} in '{}' has no body", fetch.message, self.mailbox);
            }

            messages.push(FetchedMessage {
                sequence: fetch.message,
                subject: message_subject(&fetch, &body),
                body,
            });
        }

        self.drain_unsolicited_responses();
        Ok(messages)
    }

    async fn close(&mut self) {
        self.pending_exists = None;
        if let Some(mut session) = self.session.take() {
            info!("Logging out from IMAP server");
            if let Err(e) = with_timeout(LOGOUT_TIMEOUT, session.logout()).await {
                debug!("IMAP logout failed (ignored): {}", e);
            }
        }
    }
}

/// Opens [`ImapClient`] sessions with a fixed configuration.
pub struct ImapConnector {
    config: ImapConfig,
}

impl ImapConnector {
    pub fn new(config: ImapConfig) -> Self {
        ImapConnector { config }
    }
}

#[async_trait]
impl MailboxConnector for ImapConnector {
    type Session = ImapClient;

    async fn open(&self) -> Result<(ImapClient, u32), ConnectError> {
        ImapClient::connect(&self.config).await
    }
}
