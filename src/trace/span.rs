use crate::export::SpanRecord;
use crate::trace::span_context::SpanContext;
use crate::trace::tracer::TracerInner;
use crate::trace::SpanId;
use crate::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Instant, SystemTime, UNIX_EPOCH};
use tracing::trace;

/// Current wall-clock time in microseconds since the unix epoch.
pub(crate) fn now_micros() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_micros() as u64)
        .unwrap_or(0)
}

/// Mutable state of an in-flight span, guarded by one mutex.
#[derive(Debug)]
struct SpanState {
    operation_name: String,
    tags: HashMap<String, Value>,
    parent_span_id: Option<SpanId>,
    follows_from_span_id: Option<SpanId>,
}

pub(crate) struct RecordingSpan {
    context: SpanContext,
    start_time_micros: u64,
    // Present when the span was started "now": duration then comes from the
    // monotonic clock instead of wall-clock subtraction.
    start_instant: Option<Instant>,
    state: Mutex<SpanState>,
    tracer: Arc<TracerInner>,
}

impl fmt::Debug for RecordingSpan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordingSpan")
            .field("context", &self.context)
            .field("start_time_micros", &self.start_time_micros)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

#[derive(Clone, Debug)]
enum SpanInner {
    Recording(Arc<RecordingSpan>),
    Noop,
}

/// A single timed operation.
///
/// Spans are cheap handles; clones refer to the same underlying span, and
/// all mutators take `&self`. A span produced by a disabled tracer is a
/// no-op: every method accepts calls and does nothing, so instrumentation
/// code never has to branch on whether tracing is on.
#[derive(Clone, Debug)]
pub struct Span {
    inner: SpanInner,
}

impl Span {
    /// The inert span. Accepts every call, records nothing.
    pub fn noop() -> Self {
        Span {
            inner: SpanInner::Noop,
        }
    }

    pub(crate) fn start_recording(
        tracer: Arc<TracerInner>,
        context: SpanContext,
        operation_name: String,
        tags: HashMap<String, Value>,
        parent_span_id: Option<SpanId>,
        follows_from_span_id: Option<SpanId>,
        start_time_micros: Option<u64>,
    ) -> Self {
        let (start_time_micros, start_instant) = match start_time_micros {
            Some(explicit) => (explicit, None),
            None => (now_micros(), Some(Instant::now())),
        };
        Span {
            inner: SpanInner::Recording(Arc::new(RecordingSpan {
                context,
                start_time_micros,
                start_instant,
                state: Mutex::new(SpanState {
                    operation_name,
                    tags,
                    parent_span_id,
                    follows_from_span_id,
                }),
                tracer,
            })),
        }
    }

    /// Whether this span records anything at all.
    pub fn is_recording(&self) -> bool {
        matches!(self.inner, SpanInner::Recording(_))
    }

    /// The span's context, usable for propagation and as a parent reference.
    /// `None` for a no-op span.
    pub fn context(&self) -> Option<SpanContext> {
        match &self.inner {
            SpanInner::Recording(span) => Some(span.context.clone()),
            SpanInner::Noop => None,
        }
    }

    /// Set or overwrite a tag. Blank keys are ignored.
    pub fn set_tag(&self, key: impl Into<String>, value: impl Into<Value>) {
        if let SpanInner::Recording(span) = &self.inner {
            let key = key.into();
            if key.trim().is_empty() {
                return;
            }
            span.lock_state().tags.insert(key, value.into());
        }
    }

    /// Record structured log fields on the span. Fields fold into the
    /// span's tags, later values overwriting earlier ones per key.
    pub fn log<K, V>(&self, fields: impl IntoIterator<Item = (K, V)>)
    where
        K: Into<String>,
        V: Into<Value>,
    {
        if let SpanInner::Recording(span) = &self.inner {
            let mut state = span.lock_state();
            for (key, value) in fields {
                let key = key.into();
                if key.trim().is_empty() {
                    continue;
                }
                state.tags.insert(key, value.into());
            }
        }
    }

    /// Like [`log`](Span::log), with a caller-supplied timestamp. The
    /// timestamp is accepted for interface compatibility and not recorded.
    pub fn log_at<K, V>(&self, _timestamp_micros: u64, fields: impl IntoIterator<Item = (K, V)>)
    where
        K: Into<String>,
        V: Into<Value>,
    {
        self.log(fields);
    }

    /// Record a single free-text event, folded into the tags under
    /// `message`.
    pub fn log_event(&self, message: impl Into<String>) {
        self.log([("message", Value::String(message.into()))]);
    }

    /// Rename the operation after the span has started.
    pub fn set_operation_name(&self, operation_name: impl Into<String>) {
        if let SpanInner::Recording(span) = &self.inner {
            span.lock_state().operation_name = operation_name.into();
        }
    }

    /// Set a baggage item, visible to every span sharing this context and
    /// to descendants started afterwards.
    pub fn set_baggage_item(&self, key: impl Into<String>, value: impl Into<String>) {
        if let SpanInner::Recording(span) = &self.inner {
            span.context.set_baggage_item(key, value);
        }
    }

    /// Look up a baggage item.
    pub fn baggage_item(&self, key: &str) -> Option<String> {
        match &self.inner {
            SpanInner::Recording(span) => span.context.baggage_item(key),
            SpanInner::Noop => None,
        }
    }

    /// Finish the span now and hand it to the delivery pipeline.
    pub fn finish(&self) {
        if let SpanInner::Recording(span) = &self.inner {
            let finish_time = match span.start_instant {
                Some(instant) => span.start_time_micros + instant.elapsed().as_micros() as u64,
                None => now_micros(),
            };
            span.submit(finish_time);
        }
    }

    /// Finish the span at an explicit wall-clock timestamp.
    pub fn finish_at(&self, finish_time_micros: u64) {
        if let SpanInner::Recording(span) = &self.inner {
            span.submit(finish_time_micros);
        }
    }

    /// Whether two handles refer to the same underlying span.
    pub(crate) fn same_span(&self, other: &Span) -> bool {
        match (&self.inner, &other.inner) {
            (SpanInner::Recording(a), SpanInner::Recording(b)) => Arc::ptr_eq(a, b),
            (SpanInner::Noop, SpanInner::Noop) => true,
            _ => false,
        }
    }
}

impl RecordingSpan {
    fn lock_state(&self) -> std::sync::MutexGuard<'_, SpanState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Snapshot the span into an immutable record and submit it. Calling
    /// twice submits twice; the handle stays usable either way.
    fn submit(&self, finish_time_micros: u64) {
        let record = {
            let state = self.lock_state();
            SpanRecord {
                operation_name: state.operation_name.clone(),
                start_time_micros: self.start_time_micros,
                duration_micros: finish_time_micros.saturating_sub(self.start_time_micros),
                trace_id: self.context.trace_id(),
                span_id: self.context.span_id(),
                parent_span_id: state.parent_span_id,
                follows_from_span_id: state.follows_from_span_id,
                tags: state
                    .tags
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect(),
                baggage: self.context.baggage_items(),
            }
        };
        trace!(operation = %record.operation_name, "span finished");
        self.tracer.submit(record);
    }
}
