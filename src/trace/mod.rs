//! The tracing API: tracer, spans, builders and identifiers.

mod id;
mod span;
mod span_builder;
mod span_context;
mod tracer;

pub use id::{SpanId, TraceId};
pub use span::Span;
pub use span_builder::{SpanBuilder, CHILD_OF, FOLLOWS_FROM};
pub use span_context::SpanContext;
pub use tracer::{Scope, Tracer};
