use crate::trace::span::Span;
use crate::trace::span_context::SpanContext;
use crate::trace::tracer::{Scope, TracerInner};
use crate::trace::{SpanId, TraceId};
use crate::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Reference type naming a parent the new span is a direct child of.
pub const CHILD_OF: &str = "child_of";
/// Reference type naming a predecessor the new span follows causally.
pub const FOLLOWS_FROM: &str = "follows_from";

/// Fluent builder for a [`Span`].
///
/// References decide the span's place in a trace. The last recognized
/// reference wins as the parent context; a `child_of` reference also sets
/// the parent span id, `follows_from` sets the predecessor id. When no
/// reference is given the tracer's active span becomes the implicit parent
/// unless [`ignore_active_span`](SpanBuilder::ignore_active_span) was
/// called.
#[derive(Debug)]
pub struct SpanBuilder {
    tracer: Arc<TracerInner>,
    operation_name: String,
    tags: HashMap<String, Value>,
    parent: Option<SpanContext>,
    parent_span_id: Option<SpanId>,
    follows_from_span_id: Option<SpanId>,
    trace_id: Option<TraceId>,
    span_id: Option<SpanId>,
    start_time_micros: Option<u64>,
    ignore_active_span: bool,
}

impl SpanBuilder {
    pub(crate) fn new(tracer: Arc<TracerInner>, operation_name: impl Into<String>) -> Self {
        SpanBuilder {
            tracer,
            operation_name: operation_name.into(),
            tags: HashMap::new(),
            parent: None,
            parent_span_id: None,
            follows_from_span_id: None,
            trace_id: None,
            span_id: None,
            start_time_micros: None,
            ignore_active_span: false,
        }
    }

    /// Make the new span a child of `parent`.
    pub fn child_of(self, parent: &SpanContext) -> Self {
        self.add_reference(CHILD_OF, parent)
    }

    /// Make the new span follow from `predecessor`.
    pub fn follows_from(self, predecessor: &SpanContext) -> Self {
        self.add_reference(FOLLOWS_FROM, predecessor)
    }

    /// Add a reference by type name. Unrecognized types are dropped
    /// silently.
    pub fn add_reference(mut self, reference_type: &str, referenced: &SpanContext) -> Self {
        match reference_type {
            CHILD_OF => {
                self.parent = Some(referenced.clone());
                self.parent_span_id = Some(referenced.span_id());
            }
            FOLLOWS_FROM => {
                self.parent = Some(referenced.clone());
                self.follows_from_span_id = Some(referenced.span_id());
            }
            other => {
                debug!(reference_type = %other, "dropping unrecognized span reference");
            }
        }
        self
    }

    /// Pre-set a tag on the span. Blank keys are ignored.
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        let key = key.into();
        if !key.trim().is_empty() {
            self.tags.insert(key, value.into());
        }
        self
    }

    /// Start the span at an explicit timestamp instead of now.
    pub fn with_start_time_micros(mut self, start_time_micros: u64) -> Self {
        self.start_time_micros = Some(start_time_micros);
        self
    }

    /// Force a trace id. Ignored when the span ends up with a parent, whose
    /// trace id always wins.
    pub fn with_trace_id(mut self, trace_id: TraceId) -> Self {
        self.trace_id = Some(trace_id);
        self
    }

    /// Force a span id instead of generating one.
    pub fn with_span_id(mut self, span_id: SpanId) -> Self {
        self.span_id = Some(span_id);
        self
    }

    /// Do not fall back to the tracer's active span as the implicit parent.
    pub fn ignore_active_span(mut self) -> Self {
        self.ignore_active_span = true;
        self
    }

    /// Start the span. On a disabled tracer this returns the no-op span.
    pub fn start(self) -> Span {
        if !self.tracer.is_enabled() {
            return Span::noop();
        }

        let mut parent = self.parent;
        let mut parent_span_id = self.parent_span_id;
        if parent.is_none() && !self.ignore_active_span {
            if let Some(active) = self.tracer.active_span_context() {
                parent_span_id = Some(active.span_id());
                parent = Some(active);
            }
        }

        let context = match &parent {
            Some(parent_context) => {
                let span_id = self.span_id.unwrap_or_else(SpanId::random);
                let baggage: HashMap<String, String> =
                    parent_context.baggage_items().into_iter().collect();
                SpanContext::with_baggage(parent_context.trace_id(), span_id, baggage)
            }
            None => match (self.trace_id, self.span_id) {
                (Some(trace_id), Some(span_id)) => SpanContext::with_ids(trace_id, span_id),
                (Some(trace_id), None) => SpanContext::new_child(trace_id),
                (None, Some(span_id)) => SpanContext::with_ids(TraceId::random(), span_id),
                (None, None) => SpanContext::new_root(),
            },
        };

        Span::start_recording(
            self.tracer,
            context,
            self.operation_name,
            self.tags,
            parent_span_id,
            self.follows_from_span_id,
            self.start_time_micros,
        )
    }

    /// Start the span and make it the tracer's active span. The returned
    /// [`Scope`] deactivates it on drop; with `finish_on_close` the span is
    /// finished then as well.
    pub fn start_active(self, finish_on_close: bool) -> Scope {
        let tracer = Arc::clone(&self.tracer);
        let span = self.start();
        Scope::enter(tracer, span, finish_on_close)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace::tracer::tests::recording_tracer;

    #[test]
    fn root_span_gets_fresh_ids() {
        let (tracer, _sink) = recording_tracer();
        let a = tracer.build_span("a").start();
        let b = tracer.build_span("b").start();
        let (a, b) = (a.context().unwrap(), b.context().unwrap());
        assert_ne!(a.trace_id(), b.trace_id());
        assert_ne!(a.span_id(), b.span_id());
    }

    #[test]
    fn child_shares_the_parent_trace_id() {
        let (tracer, _sink) = recording_tracer();
        let parent = tracer.build_span("parent").start();
        let parent_context = parent.context().unwrap();
        let child = tracer.build_span("child").child_of(&parent_context).start();
        let child_context = child.context().unwrap();
        assert_eq!(child_context.trace_id(), parent_context.trace_id());
        assert_ne!(child_context.span_id(), parent_context.span_id());
    }

    #[test]
    fn the_last_child_of_reference_wins() {
        let (tracer, sink) = recording_tracer();
        let first = SpanContext::with_ids(TraceId::from_u64(1), SpanId::from_u64(10));
        let second = SpanContext::with_ids(TraceId::from_u64(2), SpanId::from_u64(20));

        let span = tracer
            .build_span("op")
            .child_of(&first)
            .child_of(&second)
            .start();
        span.finish();
        tracer.force_flush().unwrap();

        let frames = sink.records();
        assert_eq!(frames[0][2]["ot.trace_id"], 2);
        assert_eq!(frames[0][2]["ot.parent_span_id"], 20);
    }

    #[test]
    fn parent_trace_id_beats_an_explicit_override() {
        let (tracer, _sink) = recording_tracer();
        let parent = SpanContext::with_ids(TraceId::from_u64(5), SpanId::from_u64(50));
        let span = tracer
            .build_span("op")
            .with_trace_id(TraceId::from_u64(99))
            .child_of(&parent)
            .start();
        assert_eq!(span.context().unwrap().trace_id(), TraceId::from_u64(5));
    }

    #[test]
    fn explicit_ids_apply_to_parentless_spans() {
        let (tracer, _sink) = recording_tracer();
        let span = tracer
            .build_span("op")
            .with_trace_id(TraceId::from_u64(7))
            .with_span_id(SpanId::from_u64(8))
            .start();
        let context = span.context().unwrap();
        assert_eq!(context.trace_id(), TraceId::from_u64(7));
        assert_eq!(context.span_id(), SpanId::from_u64(8));
    }

    #[test]
    fn unrecognized_reference_types_are_dropped() {
        let (tracer, _sink) = recording_tracer();
        let other = SpanContext::with_ids(TraceId::from_u64(3), SpanId::from_u64(30));
        let span = tracer
            .build_span("op")
            .add_reference("references_decision_of", &other)
            .start();
        assert_ne!(span.context().unwrap().trace_id(), TraceId::from_u64(3));
    }

    #[test]
    fn follows_from_records_the_predecessor() {
        let (tracer, sink) = recording_tracer();
        let predecessor = SpanContext::with_ids(TraceId::from_u64(4), SpanId::from_u64(40));
        let span = tracer.build_span("op").follows_from(&predecessor).start();
        span.finish();
        tracer.force_flush().unwrap();

        let frames = sink.records();
        assert_eq!(frames[0][2]["ot.trace_id"], 4);
        assert_eq!(frames[0][2]["ot.follow_from_span_id"], 40);
        assert!(frames[0][2].get("ot.parent_span_id").is_none());
    }

    #[test]
    fn children_inherit_a_snapshot_of_parent_baggage() {
        let (tracer, _sink) = recording_tracer();
        let parent = tracer.build_span("parent").start();
        parent.set_baggage_item("tenant", "blue");

        let child = tracer
            .build_span("child")
            .child_of(&parent.context().unwrap())
            .start();
        assert_eq!(child.baggage_item("tenant").as_deref(), Some("blue"));

        // The copy is a snapshot: later parent changes do not leak in.
        parent.set_baggage_item("tenant", "green");
        assert_eq!(child.baggage_item("tenant").as_deref(), Some("blue"));
    }

    #[test]
    fn disabled_tracer_builds_noop_spans() {
        let tracer = crate::Tracer::new(crate::Config::builder().build());
        let span = tracer.build_span("op").start();
        assert!(!span.is_recording());
    }
}
