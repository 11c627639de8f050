//! The asynchronous delivery pipeline.
//!
//! Finished spans become immutable [`SpanRecord`] snapshots, buffered by the
//! [`Emitter`] and shipped through an [`IngestClient`] backed by the
//! [`sender`] chain (failover plus retry).

use crate::trace::{SpanId, TraceId};
use crate::Value;
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

mod client;
mod emitter;
pub mod in_memory;
pub mod sender;

pub use client::ForwardClient;
pub use emitter::Emitter;

/// Tag under which span records are ingested.
pub(crate) const INGEST_TAG: &str = "ot";
/// Record key carrying the access token appended to every record.
pub(crate) const ACCESS_TOKEN_KEY: &str = "tp_access_token";

const RECORD_KEY_PREFIX: &str = "ot.";

/// Errors raised on the delivery path. These never surface to application
/// code calling span or tracer methods.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ExportError {
    /// A span record could not be encoded for the wire.
    #[error("failed to encode span record: {0}")]
    Encode(#[from] serde_json::Error),

    /// The sender chain gave up on the record.
    #[error(transparent)]
    Sender(#[from] sender::SenderError),

    /// The emitter was already shut down.
    #[error("emitter is shut down")]
    EmitterShutdown,

    /// A flush request was not acknowledged in time.
    #[error("flush timed out after {0:?}")]
    FlushTimedOut(std::time::Duration),
}

/// A fluentd-style event timestamp: whole seconds plus a nanosecond
/// remainder.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EventTime {
    /// Seconds since the unix epoch.
    pub unix_seconds: u64,
    /// Nanosecond remainder.
    pub nanos: u32,
}

impl EventTime {
    /// Split a microsecond epoch timestamp into seconds and nanoseconds.
    pub fn from_micros(micros: u64) -> Self {
        EventTime {
            unix_seconds: micros / 1_000_000,
            nanos: ((micros % 1_000_000) * 1_000) as u32,
        }
    }
}

/// Immutable snapshot of a finished span, handed from the finishing thread
/// to the background emitter. The pipeline never touches mutable span state.
#[derive(Clone, Debug)]
pub struct SpanRecord {
    /// Operation name of the finished span.
    pub operation_name: String,
    /// Start time, microseconds since the unix epoch.
    pub start_time_micros: u64,
    /// Observed duration in microseconds.
    pub duration_micros: u64,
    /// Trace the span belongs to.
    pub trace_id: TraceId,
    /// The span's own id.
    pub span_id: SpanId,
    /// Span id of the `child_of` parent, if any.
    pub parent_span_id: Option<SpanId>,
    /// Span id of the `follows_from` predecessor, if any.
    pub follows_from_span_id: Option<SpanId>,
    /// Tags set on the span, log fields included.
    pub tags: Vec<(String, Value)>,
    /// Baggage snapshot taken at finish time.
    pub baggage: Vec<(String, String)>,
}

impl SpanRecord {
    /// The ingestion timestamp derived from the span's start time.
    pub fn event_time(&self) -> EventTime {
        EventTime::from_micros(self.start_time_micros)
    }

    /// Render the record as the flat mapping delivered to the collector.
    ///
    /// Every tag and baggage key is namespaced under the tracing prefix;
    /// blank keys are skipped. Fixed fields carry the operation name,
    /// duration and identity.
    pub fn as_map(&self) -> BTreeMap<String, Value> {
        let mut out = BTreeMap::new();

        out.insert("_type".to_string(), Value::from("trace"));

        for (key, value) in &self.baggage {
            if key.trim().is_empty() {
                continue;
            }
            out.insert(
                format!("{RECORD_KEY_PREFIX}{key}"),
                Value::String(value.clone()),
            );
        }

        for (key, value) in &self.tags {
            if key.trim().is_empty() {
                continue;
            }
            out.insert(format!("{RECORD_KEY_PREFIX}{key}"), value.clone());
        }

        out.insert(
            "ot.operation_name".to_string(),
            Value::String(self.operation_name.clone()),
        );
        out.insert(
            "ot.duration_us".to_string(),
            Value::I64(self.duration_micros as i64),
        );
        out.insert(
            "ot.trace_id".to_string(),
            Value::I64(self.trace_id.to_u64() as i64),
        );
        out.insert(
            "ot.span_id".to_string(),
            Value::I64(self.span_id.to_u64() as i64),
        );

        if let Some(parent) = self.parent_span_id {
            out.insert(
                "ot.parent_span_id".to_string(),
                Value::I64(parent.to_u64() as i64),
            );
        }
        if let Some(follows) = self.follows_from_span_id {
            out.insert(
                "ot.follow_from_span_id".to_string(),
                Value::I64(follows.to_u64() as i64),
            );
        }

        out
    }
}

/// The ingestion seam between the emitter and the collector wire protocol.
///
/// `send` must be callable from the emitter thread while `close` arrives
/// from the application thread during shutdown.
pub trait IngestClient: Send + Sync + fmt::Debug {
    /// Deliver one record under the given tag and timestamp.
    fn send(
        &self,
        tag: &str,
        time: EventTime,
        record: &BTreeMap<String, Value>,
    ) -> Result<(), ExportError>;

    /// Close the client; in-flight retry backoffs are woken.
    fn close(&self);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_record() -> SpanRecord {
        SpanRecord {
            operation_name: "checkout".to_string(),
            start_time_micros: 1_700_000_000_123_456,
            duration_micros: 42,
            trace_id: TraceId::from_u64(7),
            span_id: SpanId::from_u64(8),
            parent_span_id: Some(SpanId::from_u64(3)),
            follows_from_span_id: None,
            tags: vec![
                ("http.status".to_string(), Value::I64(200)),
                ("  ".to_string(), Value::from("dropped")),
            ],
            baggage: vec![("tenant".to_string(), "blue".to_string())],
        }
    }

    #[test]
    fn event_time_splits_micros() {
        let time = EventTime::from_micros(1_700_000_000_123_456);
        assert_eq!(time.unix_seconds, 1_700_000_000);
        assert_eq!(time.nanos, 123_456_000);
    }

    #[test]
    fn as_map_namespaces_and_adds_fixed_fields() {
        let map = sample_record().as_map();

        assert_eq!(map.get("_type"), Some(&Value::from("trace")));
        assert_eq!(map.get("ot.http.status"), Some(&Value::I64(200)));
        assert_eq!(map.get("ot.tenant"), Some(&Value::from("blue")));
        assert_eq!(map.get("ot.operation_name"), Some(&Value::from("checkout")));
        assert_eq!(map.get("ot.duration_us"), Some(&Value::I64(42)));
        assert_eq!(map.get("ot.trace_id"), Some(&Value::I64(7)));
        assert_eq!(map.get("ot.span_id"), Some(&Value::I64(8)));
        assert_eq!(map.get("ot.parent_span_id"), Some(&Value::I64(3)));
        assert!(!map.contains_key("ot.follow_from_span_id"));
        // Blank tag keys are skipped entirely.
        assert!(map.keys().all(|k| !k.trim().is_empty()));
    }
}
