//! Carrier propagation.
//!
//! Trace identity crosses process boundaries through textual carriers such
//! as HTTP headers. [`Injector`] and [`Extractor`] abstract over the carrier;
//! [`TextPropagator`] defines the wire format.

use std::borrow::Cow;
use std::collections::HashMap;

mod propagator;

pub use propagator::{TextPropagator, FIELD_SAMPLED, FIELD_SPAN_ID, FIELD_TRACE_ID};

/// Write half of a propagation carrier: anything the propagator can push
/// key/value pairs into, such as an outbound header map.
pub trait Injector {
    /// Store one wire-format entry in the carrier.
    fn set(&mut self, key: &str, value: String);
}

/// Read half of a propagation carrier, typically an inbound header map.
///
/// `keys` drives extraction: the propagator scans every key it returns, so
/// carriers with non-enumerable storage cannot back this trait.
pub trait Extractor {
    /// Look up one entry by key.
    fn get(&self, key: &str) -> Option<Cow<'_, str>>;

    /// Every key the carrier holds.
    fn keys(&self) -> Vec<Cow<'_, str>>;
}

impl<S: std::hash::BuildHasher> Injector for HashMap<String, String, S> {
    /// Keys are stored lowercase since the wire format is case-insensitive.
    fn set(&mut self, key: &str, value: String) {
        self.insert(key.to_lowercase(), value);
    }
}

impl<S: std::hash::BuildHasher> Extractor for HashMap<String, String, S> {
    /// Lowercases the lookup key to match what [`Injector::set`] stored.
    fn get(&self, key: &str) -> Option<Cow<'_, str>> {
        self.get(&key.to_lowercase())
            .map(|v| Cow::Borrowed(v.as_str()))
    }

    fn keys(&self) -> Vec<Cow<'_, str>> {
        self.keys().map(|k| Cow::Borrowed(k.as_str())).collect()
    }
}
