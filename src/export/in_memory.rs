//! In-memory sender for testing delivery pipelines.
//!
//! [`InMemorySender`] stands in for a network endpoint: it records every
//! payload it accepts and can be toggled unavailable or failing to exercise
//! the failover and retry paths without opening sockets.

use crate::export::sender::{Sender, SenderError};
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

#[derive(Debug)]
enum FailMode {
    Never,
    Always,
    Times(usize),
}

#[derive(Debug)]
struct InMemorySenderState {
    payloads: Mutex<Vec<Vec<u8>>>,
    fail_mode: Mutex<FailMode>,
    available: AtomicBool,
    closed: AtomicBool,
    attempts: AtomicUsize,
}

/// A [`Sender`] that keeps accepted payloads in memory.
///
/// Clones share state, so a test can hand a clone to the pipeline and keep
/// one to inspect afterwards.
#[derive(Clone, Debug)]
pub struct InMemorySender {
    inner: Arc<InMemorySenderState>,
}

impl Default for InMemorySender {
    fn default() -> Self {
        InMemorySender::new()
    }
}

impl InMemorySender {
    /// Create a healthy, available sender.
    pub fn new() -> Self {
        InMemorySender {
            inner: Arc::new(InMemorySenderState {
                payloads: Mutex::new(Vec::new()),
                fail_mode: Mutex::new(FailMode::Never),
                available: AtomicBool::new(true),
                closed: AtomicBool::new(false),
                attempts: AtomicUsize::new(0),
            }),
        }
    }

    /// Toggle endpoint availability.
    pub fn set_available(&self, available: bool) {
        self.inner.available.store(available, Ordering::SeqCst);
    }

    /// Make every send fail with an I/O error (or stop doing so).
    pub fn set_failing(&self, failing: bool) {
        *self
            .inner
            .fail_mode
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = if failing {
            FailMode::Always
        } else {
            FailMode::Never
        };
    }

    /// Fail the next `count` sends, then accept.
    pub fn fail_only_first(&self, count: usize) {
        *self
            .inner
            .fail_mode
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = FailMode::Times(count);
    }

    /// Number of send attempts made against this sender, failed or not.
    pub fn attempts(&self) -> usize {
        self.inner.attempts.load(Ordering::SeqCst)
    }

    /// Whether `close` has been called.
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// The raw payloads accepted so far.
    pub fn payloads(&self) -> Vec<Vec<u8>> {
        self.inner
            .payloads
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Accepted payloads parsed as JSON values, one per line-delimited
    /// forward-protocol frame.
    pub fn records(&self) -> Vec<serde_json::Value> {
        self.payloads()
            .iter()
            .filter_map(|payload| serde_json::from_slice(payload).ok())
            .collect()
    }
}

impl Sender for InMemorySender {
    fn send(&self, payload: &[u8]) -> Result<(), SenderError> {
        self.inner.attempts.fetch_add(1, Ordering::SeqCst);

        if self.is_closed() {
            return Err(SenderError::Closed(None));
        }

        let mut mode = self
            .inner
            .fail_mode
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let fail = match &mut *mode {
            FailMode::Never => false,
            FailMode::Always => true,
            FailMode::Times(remaining) => {
                if *remaining > 0 {
                    *remaining -= 1;
                    true
                } else {
                    false
                }
            }
        };
        drop(mode);

        if fail {
            return Err(SenderError::Io(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                "simulated endpoint failure",
            )));
        }

        self.inner
            .payloads
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(payload.to_vec());
        Ok(())
    }

    fn is_available(&self) -> bool {
        self.inner.available.load(Ordering::SeqCst) && !self.is_closed()
    }

    fn close(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_accepted_payloads() {
        let sender = InMemorySender::new();
        sender.send(b"one").unwrap();
        sender.send(b"two").unwrap();
        assert_eq!(sender.payloads(), vec![b"one".to_vec(), b"two".to_vec()]);
        assert_eq!(sender.attempts(), 2);
    }

    #[test]
    fn fails_the_configured_number_of_times() {
        let sender = InMemorySender::new();
        sender.fail_only_first(1);
        assert!(sender.send(b"x").is_err());
        assert!(sender.send(b"x").is_ok());
    }

    #[test]
    fn closed_sender_rejects_sends() {
        let sender = InMemorySender::new();
        sender.close();
        assert!(matches!(
            sender.send(b"x"),
            Err(SenderError::Closed(None))
        ));
        assert!(!sender.is_available());
    }
}
