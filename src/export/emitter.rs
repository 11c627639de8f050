use crate::export::{ExportError, IngestClient, SpanRecord, ACCESS_TOKEN_KEY, INGEST_TAG};
use crate::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, SyncSender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;
use tracing::{debug, info, trace, warn};

/// Default delay between two consecutive drains of the pending buffer.
pub const DEFAULT_EMIT_INTERVAL: Duration = Duration::from_millis(500);

const FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug)]
enum EmitterMessage {
    ForceFlush(SyncSender<Result<(), ExportError>>),
    Shutdown,
}

/// Background delivery loop for finished span records.
///
/// Producers append records to a mutex-guarded buffer; a dedicated thread
/// wakes on a fixed interval, swaps the buffer for an empty one (the
/// critical section is the swap only, so `finish()` callers never wait on
/// network I/O) and pushes each drained record through the ingestion
/// client. A failed record is dropped, not re-enqueued: reliability against
/// transient failure lives entirely in the sender chain underneath the
/// client. Under a permanently failing network the buffer grows without
/// bound; that trade-off favors the application's hot path and is accepted.
#[derive(Debug)]
pub struct Emitter {
    buffer: Arc<Mutex<Vec<SpanRecord>>>,
    client: Arc<dyn IngestClient>,
    message_sender: mpsc::Sender<EmitterMessage>,
    handle: Mutex<Option<thread::JoinHandle<()>>>,
    is_shutdown: AtomicBool,
}

impl Emitter {
    /// Start an emitter draining on the default interval.
    pub fn new(access_token: impl Into<String>, client: Arc<dyn IngestClient>) -> Self {
        Emitter::with_interval(access_token, client, DEFAULT_EMIT_INTERVAL)
    }

    /// Start an emitter draining on a custom interval.
    pub fn with_interval(
        access_token: impl Into<String>,
        client: Arc<dyn IngestClient>,
        interval: Duration,
    ) -> Self {
        let access_token = access_token.into();
        let buffer = Arc::new(Mutex::new(Vec::new()));
        let (message_sender, message_receiver) = mpsc::channel();

        let worker_buffer = Arc::clone(&buffer);
        let worker_client = Arc::clone(&client);
        let handle = thread::Builder::new()
            .name("traceport-emitter".to_string())
            .spawn(move || {
                run_loop(
                    interval,
                    worker_buffer,
                    worker_client,
                    access_token,
                    message_receiver,
                );
            })
            .ok();

        if handle.is_none() {
            warn!("failed to spawn emitter thread, records will not be delivered");
        }

        Emitter {
            buffer,
            client,
            message_sender,
            handle: Mutex::new(handle),
            is_shutdown: AtomicBool::new(false),
        }
    }

    /// Append a finished span record to the pending buffer.
    ///
    /// Never blocks on network I/O; after shutdown the record is dropped.
    pub fn emit(&self, record: SpanRecord) {
        if self.is_shutdown.load(Ordering::Relaxed) {
            trace!("emitter stopped, dropping span record");
            return;
        }
        trace!(operation = %record.operation_name, "buffering span record");
        self.buffer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(record);
    }

    /// Synchronously drain the pending buffer once.
    pub fn force_flush(&self) -> Result<(), ExportError> {
        if self.is_shutdown.load(Ordering::Relaxed) {
            return Err(ExportError::EmitterShutdown);
        }
        let (ack_sender, ack_receiver) = mpsc::sync_channel(1);
        self.message_sender
            .send(EmitterMessage::ForceFlush(ack_sender))
            .map_err(|_| ExportError::EmitterShutdown)?;
        ack_receiver
            .recv_timeout(FLUSH_TIMEOUT)
            .map_err(|_| ExportError::FlushTimedOut(FLUSH_TIMEOUT))?
    }

    /// Stop the loop and close the underlying client.
    ///
    /// Idempotent. Closing the client wakes any in-flight retry backoff;
    /// records still pending at shutdown are dropped.
    pub fn shutdown(&self) {
        if self.is_shutdown.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("emitter is being stopped");
        let _ = self.message_sender.send(EmitterMessage::Shutdown);
        self.client.close();
        if let Some(handle) = self
            .handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            let _ = handle.join();
        }
    }
}

impl Drop for Emitter {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_loop(
    interval: Duration,
    buffer: Arc<Mutex<Vec<SpanRecord>>>,
    client: Arc<dyn IngestClient>,
    access_token: String,
    receiver: mpsc::Receiver<EmitterMessage>,
) {
    loop {
        match receiver.recv_timeout(interval) {
            Ok(EmitterMessage::ForceFlush(ack)) => {
                let result = drain(&buffer, client.as_ref(), &access_token);
                let _ = ack.send(result);
            }
            Ok(EmitterMessage::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {
                if let Err(err) = drain(&buffer, client.as_ref(), &access_token) {
                    debug!(error = %err, "scheduled drain finished with failures");
                }
            }
        }
    }
}

/// Swap the buffer for an empty one and push every drained record through
/// the client. Records are sent in buffer order; a failure drops that record
/// and moves on to the next.
fn drain(
    buffer: &Mutex<Vec<SpanRecord>>,
    client: &dyn IngestClient,
    access_token: &str,
) -> Result<(), ExportError> {
    let pending = {
        let mut guard = buffer.lock().unwrap_or_else(PoisonError::into_inner);
        if guard.is_empty() {
            return Ok(());
        }
        std::mem::take(&mut *guard)
    };

    let mut first_error = None;
    for record in pending {
        let time = record.event_time();
        let mut map = record.as_map();
        map.insert(
            ACCESS_TOKEN_KEY.to_string(),
            Value::String(access_token.to_string()),
        );

        if let Err(err) = client.send(INGEST_TAG, time, &map) {
            warn!(error = %err, operation = %record.operation_name,
                "failed to deliver span record, dropping it");
            if first_error.is_none() {
                first_error = Some(err);
            }
        }
    }

    match first_error {
        Some(err) => Err(err),
        None => Ok(()),
    }
}
