//! Well-known span tag keys and values.
//!
//! These follow the OpenTracing semantic conventions for RPC-server
//! instrumentation: a `component` identifying the instrumented framework,
//! the HTTP request facts, and the `error` marker with its structured log
//! event fields.
use crate::Key;

/// The software package, framework or library that generated the span.
pub const COMPONENT: Key = Key::from_static_str("component");

/// Marks a span as failed. Value is boolean `true`.
pub const ERROR: Key = Key::from_static_str("error");

/// HTTP method of the traced request.
pub const HTTP_METHOD: Key = Key::from_static_str("http.method");

/// Full URL of the traced request.
pub const HTTP_URL: Key = Key::from_static_str("http.url");

/// Numeric HTTP status code of the response.
pub const HTTP_STATUS_CODE: Key = Key::from_static_str("http.status_code");

/// The matched route of the traced request, resolved by the router.
pub const HTTP_ROUTE: Key = Key::from_static_str("http.route");

/// Relationship of the span to the trace: client, server, producer,
/// consumer.
pub const SPAN_KIND: Key = Key::from_static_str("span.kind");

/// [`SPAN_KIND`] value for the server side of an RPC or HTTP request.
pub const SPAN_KIND_RPC_SERVER: &str = "server";

/// Log event field naming the event class of a structured log.
pub const EVENT: Key = Key::from_static_str("event");

/// [`EVENT`] value used for error log events.
pub const EVENT_ERROR: &str = "error";

/// Log event field carrying the error detail of an error event.
pub const ERROR_OBJECT: Key = Key::from_static_str("error.object");
