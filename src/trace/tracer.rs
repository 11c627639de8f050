use crate::config::Config;
use crate::export::{Emitter, ExportError, ForwardClient, IngestClient, SpanRecord};
use crate::propagation::{Extractor, Injector, TextPropagator};
use crate::trace::span::Span;
use crate::trace::span_builder::SpanBuilder;
use crate::trace::span_context::SpanContext;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, ThreadId};
use tracing::{debug, info, trace};

pub(crate) struct TracerInner {
    config: Config,
    emitter: Option<Emitter>,
    // Active-span stacks, one per activating thread. A span activated on
    // one thread is never the implicit parent of a span started on another.
    active: Mutex<HashMap<ThreadId, Vec<Span>>>,
    propagator: TextPropagator,
}

impl fmt::Debug for TracerInner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TracerInner")
            .field("config", &self.config)
            .field("enabled", &self.is_enabled())
            .finish_non_exhaustive()
    }
}

impl TracerInner {
    pub(crate) fn is_enabled(&self) -> bool {
        self.emitter.is_some()
    }

    pub(crate) fn submit(&self, record: SpanRecord) {
        match &self.emitter {
            Some(emitter) => emitter.emit(record),
            None => trace!("tracer is disabled, dropping span record"),
        }
    }

    pub(crate) fn active_span_context(&self) -> Option<SpanContext> {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&thread::current().id())
            .and_then(|stack| stack.last())
            .and_then(Span::context)
    }

    fn push_active(&self, span: Span) -> ThreadId {
        let thread_id = thread::current().id();
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(thread_id)
            .or_default()
            .push(span);
        thread_id
    }

    /// Pop `span` from the stack it was activated on. The scope carries the
    /// activating thread's id, so a scope dropped on another thread still
    /// unwinds the right stack.
    fn remove_active(&self, span: &Span, thread_id: ThreadId) {
        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(stack) = active.get_mut(&thread_id) {
            if let Some(position) = stack.iter().rposition(|entry| entry.same_span(span)) {
                stack.remove(position);
            }
            if stack.is_empty() {
                active.remove(&thread_id);
            }
        }
    }
}

/// The entry point of the crate.
///
/// A tracer built from a configuration with a non-empty access token starts
/// the delivery pipeline and records spans; with an empty token it is
/// disabled and every span it builds is a no-op. Tracers are cheap to clone
/// and share their state. Activation is per thread: each thread that opens
/// a [`Scope`] gets its own active-span stack, so implicit parenthood never
/// crosses a thread boundary.
#[derive(Clone, Debug)]
pub struct Tracer {
    inner: Arc<TracerInner>,
}

impl Tracer {
    /// Build a tracer, wiring the default TCP delivery pipeline when the
    /// configuration enables tracing.
    pub fn new(config: Config) -> Self {
        if config.is_enabled() {
            let client = Arc::new(ForwardClient::for_config(&config));
            Tracer::with_client(config, client)
        } else {
            debug!("tracer is disabled, spans will not be recorded");
            Tracer {
                inner: Arc::new(TracerInner {
                    config,
                    emitter: None,
                    active: Mutex::new(HashMap::new()),
                    propagator: TextPropagator::new(),
                }),
            }
        }
    }

    /// Build a tracer from the process environment.
    pub fn from_env() -> Self {
        Tracer::new(Config::from_env())
    }

    /// Build a tracer over a custom ingestion client. An empty access token
    /// still disables the tracer.
    pub fn with_client(config: Config, client: Arc<dyn IngestClient>) -> Self {
        let emitter = if config.is_enabled() {
            info!(
                host = %config.host(),
                port = config.port(),
                service = config.service_name().unwrap_or("<unset>"),
                "tracer enabled"
            );
            Some(Emitter::new(config.access_token(), client))
        } else {
            debug!("tracer is disabled, spans will not be recorded");
            None
        };
        Tracer {
            inner: Arc::new(TracerInner {
                config,
                emitter,
                active: Mutex::new(HashMap::new()),
                propagator: TextPropagator::new(),
            }),
        }
    }

    /// Whether this tracer records spans at all.
    pub fn is_enabled(&self) -> bool {
        self.inner.is_enabled()
    }

    /// The configuration the tracer was built from.
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Start describing a new span.
    pub fn build_span(&self, operation_name: impl Into<String>) -> SpanBuilder {
        SpanBuilder::new(Arc::clone(&self.inner), operation_name)
    }

    /// The calling thread's current active span, if any.
    pub fn active_span(&self) -> Option<Span> {
        self.inner
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&thread::current().id())
            .and_then(|stack| stack.last())
            .cloned()
    }

    /// Make an already-started span the active span until the returned
    /// [`Scope`] is dropped.
    pub fn activate_span(&self, span: Span) -> Scope {
        Scope::enter(Arc::clone(&self.inner), span, false)
    }

    /// Write a span context into a carrier, wire-format keys and baggage
    /// included.
    pub fn inject(&self, context: &SpanContext, carrier: &mut dyn Injector) {
        self.inner.propagator.inject(context, carrier);
    }

    /// Read a span context back out of a carrier. `None` when the carrier
    /// holds no complete, well-formed context.
    pub fn extract(&self, carrier: &dyn Extractor) -> Option<SpanContext> {
        self.inner.propagator.extract(carrier)
    }

    /// Synchronously deliver everything buffered so far.
    pub fn force_flush(&self) -> Result<(), ExportError> {
        match &self.inner.emitter {
            Some(emitter) => emitter.force_flush(),
            None => Ok(()),
        }
    }

    /// Stop the delivery pipeline. Idempotent; spans finished afterwards
    /// are dropped.
    pub fn shutdown(&self) {
        if let Some(emitter) = &self.inner.emitter {
            emitter.shutdown();
        }
    }
}

/// Guard for a span's tenure on the activating thread's active-span stack.
///
/// Dropping the scope removes its span from that stack (searching from the
/// top, so out-of-order drops cannot pop someone else's span) and, when the
/// scope was opened with `finish_on_close`, finishes the span.
#[derive(Debug)]
pub struct Scope {
    tracer: Arc<TracerInner>,
    span: Span,
    thread_id: ThreadId,
    finish_on_close: bool,
}

impl Scope {
    pub(crate) fn enter(tracer: Arc<TracerInner>, span: Span, finish_on_close: bool) -> Self {
        let thread_id = tracer.push_active(span.clone());
        Scope {
            tracer,
            span,
            thread_id,
            finish_on_close,
        }
    }

    /// The span this scope keeps active.
    pub fn span(&self) -> &Span {
        &self.span
    }
}

impl Drop for Scope {
    fn drop(&mut self) {
        self.tracer.remove_active(&self.span, self.thread_id);
        if self.finish_on_close {
            self.span.finish();
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::export::in_memory::InMemorySender;

    pub(crate) fn recording_tracer() -> (Tracer, InMemorySender) {
        let sink = InMemorySender::new();
        let client = Arc::new(ForwardClient::new(Box::new(sink.clone())));
        let config = Config::builder().with_access_token("test-token").build();
        (Tracer::with_client(config, client), sink)
    }

    #[test]
    fn empty_token_disables_the_tracer() {
        let tracer = Tracer::new(Config::builder().build());
        assert!(!tracer.is_enabled());
        assert!(tracer.force_flush().is_ok());
    }

    #[test]
    fn active_span_stack_nests_and_unwinds() {
        let (tracer, _sink) = recording_tracer();
        assert!(tracer.active_span().is_none());

        let outer = tracer.build_span("outer").start_active(false);
        assert!(tracer
            .active_span()
            .unwrap()
            .same_span(outer.span()));

        {
            let inner = tracer.build_span("inner").start_active(false);
            assert!(tracer.active_span().unwrap().same_span(inner.span()));
        }

        // Dropping the inner scope restores the outer span.
        assert!(tracer.active_span().unwrap().same_span(outer.span()));
        drop(outer);
        assert!(tracer.active_span().is_none());
    }

    #[test]
    fn out_of_order_scope_drops_pop_the_right_span() {
        let (tracer, _sink) = recording_tracer();
        let first = tracer.build_span("first").start_active(false);
        let second = tracer.build_span("second").start_active(false);

        drop(first);
        assert!(tracer.active_span().unwrap().same_span(second.span()));
        drop(second);
        assert!(tracer.active_span().is_none());
    }

    #[test]
    fn activation_does_not_leak_across_threads() {
        let (tracer, _sink) = recording_tracer();
        let scope = tracer.build_span("main").start_active(false);
        let main_trace_id = scope.span().context().unwrap().trace_id();

        let worker = {
            let tracer = tracer.clone();
            thread::spawn(move || {
                // The main thread's activation is invisible here.
                assert!(tracer.active_span().is_none());
                tracer
                    .build_span("worker")
                    .start()
                    .context()
                    .unwrap()
                    .trace_id()
            })
        };
        let worker_trace_id = worker.join().unwrap();

        assert_ne!(worker_trace_id, main_trace_id);
        // The activation itself survived the other thread's work.
        assert!(tracer.active_span().unwrap().same_span(scope.span()));
    }

    #[test]
    fn scope_dropped_on_another_thread_unwinds_the_activating_stack() {
        let (tracer, _sink) = recording_tracer();
        let scope = tracer.build_span("handed-off").start_active(false);
        assert!(tracer.active_span().is_some());

        let holder = thread::spawn(move || drop(scope));
        holder.join().unwrap();

        assert!(tracer.active_span().is_none());
    }

    #[test]
    fn log_event_delivers_a_message_field() {
        let (tracer, sink) = recording_tracer();
        let span = tracer.build_span("op").start();
        span.log_event("cache miss");
        span.finish();
        tracer.force_flush().unwrap();

        let frames = sink.records();
        assert_eq!(frames[0][2]["ot.message"], "cache miss");
    }

    #[test]
    fn the_active_span_is_the_implicit_parent() {
        let (tracer, sink) = recording_tracer();
        let parent = tracer.build_span("parent").start_active(false);
        let parent_context = parent.span().context().unwrap();

        let child = tracer.build_span("child").start();
        child.finish();
        drop(parent);
        tracer.force_flush().unwrap();

        let frames = sink.records();
        assert_eq!(
            frames[0][2]["ot.trace_id"].as_i64().unwrap(),
            parent_context.trace_id().to_u64() as i64
        );
        assert_eq!(
            frames[0][2]["ot.parent_span_id"].as_i64().unwrap(),
            parent_context.span_id().to_u64() as i64
        );
    }

    #[test]
    fn ignore_active_span_starts_a_fresh_trace() {
        let (tracer, _sink) = recording_tracer();
        let parent = tracer.build_span("parent").start_active(false);
        let parent_context = parent.span().context().unwrap();

        let detached = tracer.build_span("detached").ignore_active_span().start();
        assert_ne!(
            detached.context().unwrap().trace_id(),
            parent_context.trace_id()
        );
    }

    #[test]
    fn finish_on_close_scopes_deliver_their_span() {
        let (tracer, sink) = recording_tracer();
        {
            let scope = tracer.build_span("scoped").start_active(true);
            scope.span().set_tag("step", 1i64);
        }
        tracer.force_flush().unwrap();

        let frames = sink.records();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0][2]["ot.operation_name"], "scoped");
        assert_eq!(frames[0][2]["ot.step"], 1);
    }

    #[test]
    fn activate_span_does_not_finish_on_drop() {
        let (tracer, sink) = recording_tracer();
        let span = tracer.build_span("op").start();
        {
            let _scope = tracer.activate_span(span.clone());
            assert!(tracer.active_span().is_some());
        }
        assert!(tracer.active_span().is_none());
        tracer.force_flush().unwrap();
        assert!(sink.records().is_empty());

        span.finish();
        tracer.force_flush().unwrap();
        assert_eq!(sink.records().len(), 1);
    }

    #[test]
    fn shutdown_is_idempotent_and_stops_recording() {
        let (tracer, sink) = recording_tracer();
        let span = tracer.build_span("before").start();
        span.finish();
        tracer.force_flush().unwrap();
        assert_eq!(sink.records().len(), 1);

        tracer.shutdown();
        tracer.shutdown();
        assert!(sink.is_closed());

        tracer.build_span("after").start().finish();
        assert_eq!(sink.records().len(), 1);
    }

    #[test]
    fn inject_and_extract_round_trip_through_the_tracer() {
        use std::collections::HashMap;

        let (tracer, _sink) = recording_tracer();
        let span = tracer.build_span("op").start();
        span.set_baggage_item("tenant", "blue");
        let context = span.context().unwrap();

        let mut carrier: HashMap<String, String> = HashMap::new();
        tracer.inject(&context, &mut carrier);
        let extracted = tracer.extract(&carrier).unwrap();

        assert_eq!(extracted.trace_id(), context.trace_id());
        assert_eq!(extracted.span_id(), context.span_id());
        assert_eq!(extracted.baggage_item("tenant").as_deref(), Some("blue"));
    }
}
