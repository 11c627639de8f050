use crate::trace::{SpanId, TraceId};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

/// Immutable trace/span identity plus a baggage map.
///
/// A `SpanContext` is the unit propagated across process boundaries. The
/// identity portion never changes; baggage insertion is an explicit,
/// synchronized mutation that is visible to every clone of the context.
#[derive(Clone, Debug)]
pub struct SpanContext {
    trace_id: TraceId,
    span_id: SpanId,
    baggage: Arc<Mutex<HashMap<String, String>>>,
}

impl SpanContext {
    /// A context for a new root span: random trace and span ids, no baggage.
    pub fn new_root() -> Self {
        SpanContext::with_ids(TraceId::random(), SpanId::random())
    }

    /// A context for a child span: inherited trace id, fresh random span id.
    pub fn new_child(trace_id: TraceId) -> Self {
        SpanContext::with_ids(trace_id, SpanId::random())
    }

    /// A context with explicit ids, used when continuing a remote trace.
    pub fn with_ids(trace_id: TraceId, span_id: SpanId) -> Self {
        SpanContext::with_baggage(trace_id, span_id, HashMap::new())
    }

    /// A context with explicit ids and an initial baggage map, the
    /// extraction path.
    pub fn with_baggage(
        trace_id: TraceId,
        span_id: SpanId,
        baggage: HashMap<String, String>,
    ) -> Self {
        SpanContext {
            trace_id,
            span_id,
            baggage: Arc::new(Mutex::new(baggage)),
        }
    }

    /// The trace id for this context.
    pub fn trace_id(&self) -> TraceId {
        self.trace_id
    }

    /// The span id for this context.
    pub fn span_id(&self) -> SpanId {
        self.span_id
    }

    /// Insert a baggage item, visible to subsequent reads from any holder of
    /// this context.
    pub fn set_baggage_item(&self, key: impl Into<String>, value: impl Into<String>) {
        self.baggage
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.into(), value.into());
    }

    /// Look up a single baggage item.
    pub fn baggage_item(&self, key: &str) -> Option<String> {
        self.baggage
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    /// A point-in-time snapshot of all baggage items.
    pub fn baggage_items(&self) -> Vec<(String, String)> {
        self.baggage
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}
