//! Request-tracing middleware for `http`/`tower` services.
//!
//! This crate instruments HTTP request handling with spans from a
//! [`tracekit`] tracer. The pieces:
//!
//! * [`tracing`](crate::tracing): the [`RequestTracing`] manager, which
//!   owns the span lifecycle of in-flight requests: extract a remote
//!   parent from the request headers, start and tag a server span, and
//!   close it with the response outcome.
//! * [`service`]: [`TraceLayer`] and [`TraceService`], the tower
//!   middleware driving the manager. One layer wraps the whole
//!   application, another wraps a single handler; the manager's
//!   `trace_all` flag decides which of the two is live.
//! * [`settings`]: the string-keyed configuration store and the
//!   construction protocol turning it into a manager at startup.
//!
//! Header carriers for the `http` types live at the crate root, so tracer
//! implementations can read and write propagation headers without
//! depending on this crate's middleware:
//!
//! ```
//! use tracekit::propagation::Extractor;
//! use tracekit_http::HeaderExtractor;
//!
//! let mut headers = http::HeaderMap::new();
//! headers.insert("x-trace-id", "00f067aa0ba902b7".parse().unwrap());
//! let carrier = HeaderExtractor(&headers);
//! assert!(carrier.get("x-trace-id").is_some());
//! ```
#![warn(
    future_incompatible,
    missing_debug_implementations,
    missing_docs,
    nonstandard_style,
    rust_2018_idioms,
    unreachable_pub,
    unused
)]

use std::borrow::Cow;

use tracekit::propagation::{Extractor, Injector};

pub mod service;
pub mod settings;
pub mod tracing;

pub use service::{ResponseFuture, TraceLayer, TraceService};
pub use settings::{ConfigError, FactoryRegistry, Setting, Settings};
pub use crate::tracing::{
    MatchedRoute, RequestHead, RequestTracing, RequestTracingBuilder, TraceKey, COMPONENT_NAME,
};

/// Helper for injecting propagation data into an [`http::HeaderMap`].
#[derive(Debug)]
pub struct HeaderInjector<'a>(pub &'a mut http::HeaderMap);

impl Injector for HeaderInjector<'_> {
    /// Set a key and value in the HeaderMap. Does nothing if the key or
    /// value are not valid inputs.
    fn set(&mut self, key: &str, value: String) {
        if let Ok(name) = http::header::HeaderName::from_bytes(key.as_bytes()) {
            if let Ok(val) = http::header::HeaderValue::from_str(&value) {
                self.0.insert(name, val);
            }
        }
    }
}

/// Helper for extracting propagation data from an [`http::HeaderMap`].
#[derive(Debug)]
pub struct HeaderExtractor<'a>(pub &'a http::HeaderMap);

impl Extractor for HeaderExtractor<'_> {
    /// Get a value for a key from the HeaderMap. If the value is not
    /// valid ASCII, returns None.
    fn get(&self, key: &str) -> Option<Cow<'_, str>> {
        self.0
            .get(key)
            .and_then(|value| value.to_str().ok())
            .map(Cow::Borrowed)
    }

    /// Collect all the keys from the HeaderMap.
    fn keys(&self) -> Vec<Cow<'_, str>> {
        self.0
            .keys()
            .map(|name| Cow::Borrowed(name.as_str()))
            .collect::<Vec<_>>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_headers_inject() {
        let mut carrier = http::HeaderMap::new();
        HeaderInjector(&mut carrier).set("X-Trace-Id", "00f067aa0ba902b7".to_string());

        assert_eq!(
            carrier.get("x-trace-id").map(|v| v.to_str().unwrap()),
            Some("00f067aa0ba902b7"),
            "injected values are header-name normalized"
        );
    }

    #[test]
    fn http_headers_inject_invalid_key_is_ignored() {
        let mut carrier = http::HeaderMap::new();
        HeaderInjector(&mut carrier).set("invalid key", "value".to_string());
        assert!(carrier.is_empty());
    }

    #[test]
    fn http_headers_extract() {
        let mut carrier = http::HeaderMap::new();
        carrier.insert("headername", "value".parse().unwrap());

        let extractor = HeaderExtractor(&carrier);
        assert_eq!(
            extractor.get("HEADERNAME"),
            Some(Cow::Borrowed("value")),
            "case insensitive extraction"
        );
        assert_eq!(extractor.keys(), vec![Cow::Borrowed("headername")]);
    }

    #[test]
    fn http_headers_extract_non_ascii_is_none() {
        let mut carrier = http::HeaderMap::new();
        carrier.insert(
            "headername",
            http::HeaderValue::from_bytes(&[0xff, 0xfe]).unwrap(),
        );
        assert_eq!(HeaderExtractor(&carrier).get("headername"), None);
    }
}
