//! Network senders and their failover/retry decorators.
//!
//! A [`Sender`] pushes an encoded payload towards one collector endpoint.
//! [`MultiSender`] fans a send out over an ordered list of candidates until
//! one accepts; [`RetrySender`] wraps any sender with bounded
//! exponential-backoff retries. The emitter composes them as
//! `RetrySender(MultiSender([TcpSender, ..]))`.

use std::fmt;
use std::io::Write;
use std::net::{Shutdown, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Errors raised by the sender chain.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SenderError {
    /// An I/O failure talking to a single endpoint.
    #[error("i/o failure talking to endpoint: {0}")]
    Io(#[from] std::io::Error),

    /// Every candidate endpoint was unavailable or failed.
    #[error("all endpoints unavailable")]
    AllEndpointsUnavailable,

    /// The sender was closed, possibly mid-retry; carries the first failure
    /// observed before the close, if any.
    #[error("sender is already closed")]
    Closed(#[source] Option<Box<SenderError>>),

    /// The retry budget ran out; carries the first failure encountered.
    #[error("sending data was retried over")]
    RetriesExhausted(#[source] Box<SenderError>),
}

/// One hop towards the collector.
///
/// Implementations must be callable from the emitter thread while `close`
/// arrives from the application thread, so all state is interior-mutable.
pub trait Sender: Send + Sync + fmt::Debug {
    /// Attempt to deliver one encoded payload.
    fn send(&self, payload: &[u8]) -> Result<(), SenderError>;

    /// Whether this sender is currently worth trying.
    fn is_available(&self) -> bool {
        true
    }

    /// Close the sender. Further sends fail with [`SenderError::Closed`].
    fn close(&self);
}

/// A collector endpoint address.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Endpoint {
    /// Collector host name or address.
    pub host: String,
    /// Collector TCP port.
    pub port: u16,
}

impl Endpoint {
    /// Create an endpoint.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Endpoint {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Base sender writing payloads to a single TCP endpoint.
///
/// The connection is established lazily on the first send and dropped on any
/// I/O error, so the next send reconnects.
#[derive(Debug)]
pub struct TcpSender {
    endpoint: Endpoint,
    conn: Mutex<Option<TcpStream>>,
    closed: AtomicBool,
}

impl TcpSender {
    /// Create a sender for the given endpoint. No I/O happens until the
    /// first send.
    pub fn new(endpoint: Endpoint) -> Self {
        TcpSender {
            endpoint,
            conn: Mutex::new(None),
            closed: AtomicBool::new(false),
        }
    }

    /// The endpoint this sender talks to.
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }
}

impl Sender for TcpSender {
    fn send(&self, payload: &[u8]) -> Result<(), SenderError> {
        if self.closed.load(Ordering::Relaxed) {
            return Err(SenderError::Closed(None));
        }

        let mut conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        if conn.is_none() {
            let stream = TcpStream::connect((self.endpoint.host.as_str(), self.endpoint.port))?;
            debug!(endpoint = %self.endpoint, "connected to collector endpoint");
            *conn = Some(stream);
        }

        if let Some(stream) = conn.as_mut() {
            if let Err(err) = stream.write_all(payload).and_then(|()| stream.flush()) {
                // Drop the broken connection so the next send reconnects.
                *conn = None;
                return Err(err.into());
            }
        }
        Ok(())
    }

    fn is_available(&self) -> bool {
        !self.closed.load(Ordering::Relaxed)
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Relaxed);
        if let Some(stream) = self
            .conn
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            let _ = stream.shutdown(Shutdown::Both);
        }
    }
}

/// Failover sender: tries each available candidate in order, first to accept
/// the payload wins.
///
/// Failures on individual candidates are swallowed and the next is tried;
/// only when every candidate is unavailable or failing does the send fail
/// with [`SenderError::AllEndpointsUnavailable`].
#[derive(Debug)]
pub struct MultiSender {
    senders: Vec<Box<dyn Sender>>,
}

impl MultiSender {
    /// Create a failover sender over an ordered candidate list.
    pub fn new(senders: Vec<Box<dyn Sender>>) -> Self {
        MultiSender { senders }
    }
}

impl Sender for MultiSender {
    fn send(&self, payload: &[u8]) -> Result<(), SenderError> {
        for sender in &self.senders {
            if !sender.is_available() {
                continue;
            }
            match sender.send(payload) {
                Ok(()) => return Ok(()),
                Err(err) => {
                    // Skip silently, best effort; the next candidate may take it.
                    debug!(error = %err, "endpoint failed, trying next candidate");
                }
            }
        }
        Err(SenderError::AllEndpointsUnavailable)
    }

    fn is_available(&self) -> bool {
        self.senders.iter().any(|sender| sender.is_available())
    }

    fn close(&self) {
        for sender in &self.senders {
            sender.close();
        }
    }
}

/// Exponential-backoff policy for [`RetrySender`].
#[derive(Clone, Debug)]
pub struct BackoffPolicy {
    /// Maximum number of send attempts.
    pub max_retries: u32,
    /// Backoff interval before the second attempt.
    pub base_interval: Duration,
    /// Upper bound on the backoff interval.
    pub max_interval: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        BackoffPolicy {
            max_retries: 7,
            base_interval: Duration::from_millis(400),
            max_interval: Duration::from_secs(30),
        }
    }
}

impl BackoffPolicy {
    fn next_interval(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.base_interval
            .saturating_mul(factor)
            .min(self.max_interval)
    }
}

/// Retry decorator around a base sender (which may itself be a
/// [`MultiSender`]).
///
/// On failure it sleeps for the backoff interval and tries again, up to the
/// policy's attempt budget. Closing the sender wakes the backoff sleep; the
/// loop then observes the closed flag before the next attempt and fails with
/// [`SenderError::Closed`] rather than aborting a send already in flight.
#[derive(Debug)]
pub struct RetrySender {
    base: Box<dyn Sender>,
    policy: BackoffPolicy,
    closed: Mutex<bool>,
    wakeup: Condvar,
}

impl RetrySender {
    /// Wrap a base sender with the given backoff policy.
    pub fn new(base: Box<dyn Sender>, policy: BackoffPolicy) -> Self {
        RetrySender {
            base,
            policy,
            closed: Mutex::new(false),
            wakeup: Condvar::new(),
        }
    }

    fn is_closed(&self) -> bool {
        *self.closed.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Interruptible backoff sleep. A close during the sleep wakes it early;
    /// the caller re-checks the closed flag at the top of the retry loop.
    fn backoff(&self, interval: Duration) {
        let guard = self.closed.lock().unwrap_or_else(PoisonError::into_inner);
        if *guard {
            return;
        }
        let _ = self
            .wakeup
            .wait_timeout(guard, interval)
            .map_err(PoisonError::into_inner);
    }
}

impl Sender for RetrySender {
    fn send(&self, payload: &[u8]) -> Result<(), SenderError> {
        let mut first_error: Option<SenderError> = None;

        for attempt in 0..self.policy.max_retries {
            if self.is_closed() {
                return Err(SenderError::Closed(first_error.map(Box::new)));
            }

            match self.base.send(payload) {
                Ok(()) => return Ok(()),
                Err(err) => {
                    warn!(attempt, error = %err, "send failed, backing off before retry");
                    if first_error.is_none() {
                        first_error = Some(err);
                    }
                }
            }

            // No backoff after the last attempt: exhaustion reports
            // immediately.
            if attempt + 1 < self.policy.max_retries {
                self.backoff(self.policy.next_interval(attempt));
            }
        }

        Err(SenderError::RetriesExhausted(Box::new(
            first_error.unwrap_or(SenderError::AllEndpointsUnavailable),
        )))
    }

    fn is_available(&self) -> bool {
        !self.is_closed() && self.base.is_available()
    }

    fn close(&self) {
        *self.closed.lock().unwrap_or_else(PoisonError::into_inner) = true;
        self.wakeup.notify_all();
        self.base.close();
    }
}
