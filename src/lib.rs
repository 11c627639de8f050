//! A lightweight distributed-tracing client.
//!
//! Spans describe timed operations; finished spans are snapshotted and
//! shipped in the background to a collector over a line-delimited forward
//! protocol, with endpoint failover and retry underneath. A tracer built
//! without an access token is disabled end to end: every span it produces
//! is a no-op, so instrumentation can stay in place unconditionally.
//!
//! ```no_run
//! use traceport::{Config, Tracer};
//!
//! let config = Config::builder()
//!     .with_access_token("token")
//!     .with_service_name("checkout")
//!     .build();
//! let tracer = Tracer::new(config);
//!
//! let span = tracer.build_span("load-cart").start();
//! span.set_tag("cart.items", 3);
//! span.finish();
//!
//! tracer.shutdown();
//! ```
//!
//! Context crosses process boundaries through [`Tracer::inject`] and
//! [`Tracer::extract`] over any key-value carrier, HTTP headers included.

pub mod config;
pub mod export;
pub mod propagation;
pub mod trace;
mod value;

pub use config::{Config, ConfigBuilder};
pub use trace::{Scope, Span, SpanBuilder, SpanContext, SpanId, TraceId, Tracer};
pub use value::Value;
