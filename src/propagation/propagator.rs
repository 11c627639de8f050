use crate::propagation::{Extractor, Injector};
use crate::trace::{SpanContext, SpanId, TraceId};
use std::collections::HashMap;

const PREFIX_BAGGAGE: &str = "ot-baggage-";

/// Carrier key holding the trace id as lowercase hex.
pub const FIELD_TRACE_ID: &str = "ot-tracer-traceid";
/// Carrier key holding the span id as lowercase hex.
pub const FIELD_SPAN_ID: &str = "ot-tracer-spanid";
/// Carrier key holding the sampling decision. Always emitted as `"true"`;
/// no sampling decision is actually computed.
pub const FIELD_SAMPLED: &str = "ot-tracer-sampled";

/// `TextPropagator` reads and writes span contexts over textual carriers.
///
/// The wire format is a set of case-insensitive keys: `ot-tracer-traceid`
/// and `ot-tracer-spanid` carry the identity as lowercase hex,
/// `ot-tracer-sampled` is always the literal `true`, and each baggage entry
/// becomes an `ot-baggage-<key>` pair.
#[derive(Clone, Debug, Default)]
pub struct TextPropagator {
    _private: (),
}

impl TextPropagator {
    /// Create a new text propagator.
    pub fn new() -> Self {
        TextPropagator::default()
    }

    /// Write the context's identity and baggage into the carrier.
    pub fn inject(&self, context: &SpanContext, injector: &mut dyn Injector) {
        injector.set(FIELD_TRACE_ID, context.trace_id().to_string());
        injector.set(FIELD_SPAN_ID, context.span_id().to_string());
        injector.set(FIELD_SAMPLED, "true".to_string());
        for (key, value) in context.baggage_items() {
            injector.set(&format!("{PREFIX_BAGGAGE}{key}"), value);
        }
    }

    /// Reconstruct a context from the carrier.
    ///
    /// Keys are matched case-insensitively. Returns `None` unless both the
    /// trace id and the span id are present and parse as hex; a malformed
    /// carrier is never an error, just "no ambient trace".
    pub fn extract(&self, extractor: &dyn Extractor) -> Option<SpanContext> {
        let mut trace_id: Option<TraceId> = None;
        let mut span_id: Option<SpanId> = None;
        let mut baggage: HashMap<String, String> = HashMap::new();

        for key in extractor.keys() {
            let lower = key.to_lowercase();
            let Some(value) = extractor.get(key.as_ref()) else {
                continue;
            };

            if lower == FIELD_TRACE_ID {
                trace_id = TraceId::from_hex(&value).ok();
            } else if lower == FIELD_SPAN_ID {
                span_id = SpanId::from_hex(&value).ok();
            } else if let Some(name) = lower.strip_prefix(PREFIX_BAGGAGE) {
                baggage.insert(name.to_string(), value.into_owned());
            }
        }

        match (trace_id, span_id) {
            (Some(trace_id), Some(span_id)) => {
                Some(SpanContext::with_baggage(trace_id, span_id, baggage))
            }
            _ => None,
        }
    }
}
