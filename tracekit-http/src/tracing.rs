//! The request-tracing lifecycle manager.
//!
//! [`RequestTracing`] owns the association between in-flight requests and
//! their active spans, and decides operation naming, parentage, tag
//! population and completion semantics. Both entry points, the global
//! interception layer and the per-handler layer in [`service`], drive
//! requests through [`open`] and one of the close operations.
//!
//! [`service`]: crate::service
//! [`open`]: RequestTracing::open
use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use http::{Request, Response};
use tracekit::trace::{Span, SpanBuilder, TraceResult, Tracer};
use tracekit::{global, tags, KeyValue};

use crate::HeaderExtractor;

/// Value of the `component` tag on every span opened by this adapter.
pub const COMPONENT_NAME: &str = "tower";

/// Identity of an opened request inside the active-span association.
///
/// Allocated by [`RequestTracing::open`] and stored as a typed extension
/// on the request, so downstream code holding the request can reach its
/// span without the framework threading extra state. The key embeds the
/// identity of the manager that allocated it; a manager never honors a key
/// minted by another manager.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TraceKey {
    manager: u64,
    seq: u64,
}

/// The route a router matched for a request.
///
/// Routers insert this into the request extensions when the route is known
/// before handling (it then names the span and is recorded as the
/// `http.route` tag at close), and/or into the response extensions when it
/// resolves only during handling. A response-extension route takes
/// precedence at close; neither renames the span.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MatchedRoute(Cow<'static, str>);

impl MatchedRoute {
    /// Create a matched-route marker.
    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        MatchedRoute(name.into())
    }

    /// The route name.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Borrowed view of a request without its body.
///
/// Start-span callbacks and operation-name overrides are stored type
/// erased and therefore cannot be generic over the request body; they
/// receive this view instead.
#[derive(Debug)]
pub struct RequestHead<'a> {
    /// The request method.
    pub method: &'a http::Method,
    /// The request URI.
    pub uri: &'a http::Uri,
    /// The request headers.
    pub headers: &'a http::HeaderMap,
    /// The request extensions.
    pub extensions: &'a http::Extensions,
}

impl<'a> RequestHead<'a> {
    /// Borrow the head of the given request.
    pub fn from_request<B>(request: &'a Request<B>) -> Self {
        RequestHead {
            method: request.method(),
            uri: request.uri(),
            headers: request.headers(),
            extensions: request.extensions(),
        }
    }
}

/// Callback invoked with every newly started span for custom enrichment.
pub type StartSpanCallback = Arc<dyn Fn(&mut dyn Span, &RequestHead<'_>) + Send + Sync>;

/// Override for the operation-name rule, receiving the raw request head.
pub type OperationNameFn = Arc<dyn Fn(&RequestHead<'_>) -> String + Send + Sync>;

/// Association entry for one opened request: the live span plus the route
/// that was already resolved at open time, kept so both close paths can
/// tag it after the request has been consumed by the inner service.
struct ActiveSpan {
    span: Box<dyn Span>,
    route: Option<MatchedRoute>,
}

/// Manages tracing spans around request handling.
///
/// One instance is shared by all requests of an application; the
/// active-span association is keyed by [`TraceKey`] so concurrent requests
/// never interfere. Entries are inserted by [`open`] and removed exactly
/// once by [`close`] or [`close_with_error`]; a request abandoned without
/// a close keeps its entry for the process lifetime.
///
/// [`open`]: RequestTracing::open
/// [`close`]: RequestTracing::close
/// [`close_with_error`]: RequestTracing::close_with_error
pub struct RequestTracing {
    id: u64,
    tracer: Option<Arc<dyn Tracer>>,
    trace_all: AtomicBool,
    start_span_cb: RwLock<Option<StartSpanCallback>>,
    operation_name: Option<OperationNameFn>,
    spans: Mutex<HashMap<TraceKey, ActiveSpan>>,
    next_seq: AtomicU64,
}

static NEXT_MANAGER_ID: AtomicU64 = AtomicU64::new(1);

impl Default for RequestTracing {
    fn default() -> Self {
        RequestTracing::builder().build()
    }
}

impl fmt::Debug for RequestTracing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestTracing")
            .field("trace_all", &self.trace_all())
            .field("active_spans", &self.active_spans())
            .finish()
    }
}

/// Builder for [`RequestTracing`].
#[derive(Default)]
pub struct RequestTracingBuilder {
    tracer: Option<Arc<dyn Tracer>>,
    trace_all: bool,
    start_span_cb: Option<StartSpanCallback>,
    operation_name: Option<OperationNameFn>,
}

impl fmt::Debug for RequestTracingBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestTracingBuilder")
            .field("trace_all", &self.trace_all)
            .finish()
    }
}

impl RequestTracingBuilder {
    /// Use the given tracer instead of the process-wide default.
    pub fn with_tracer(mut self, tracer: Arc<dyn Tracer>) -> Self {
        self.tracer = Some(tracer);
        self
    }

    /// Trace every request passing through a global layer built from this
    /// manager. Defaults to `false`.
    pub fn with_trace_all(mut self, trace_all: bool) -> Self {
        self.trace_all = trace_all;
        self
    }

    /// Invoke the given callback with every newly started span.
    pub fn with_start_span_cb(
        mut self,
        cb: impl Fn(&mut dyn Span, &RequestHead<'_>) + Send + Sync + 'static,
    ) -> Self {
        self.start_span_cb = Some(Arc::new(cb));
        self
    }

    /// Replace the route-name/method operation-name rule entirely.
    pub fn with_operation_name(
        mut self,
        f: impl Fn(&RequestHead<'_>) -> String + Send + Sync + 'static,
    ) -> Self {
        self.operation_name = Some(Arc::new(f));
        self
    }

    /// Build the manager.
    pub fn build(self) -> RequestTracing {
        RequestTracing {
            id: NEXT_MANAGER_ID.fetch_add(1, Ordering::Relaxed),
            tracer: self.tracer,
            trace_all: AtomicBool::new(self.trace_all),
            start_span_cb: RwLock::new(self.start_span_cb),
            operation_name: self.operation_name,
            spans: Mutex::new(HashMap::new()),
            next_seq: AtomicU64::new(1),
        }
    }
}

impl RequestTracing {
    /// A manager around the process-wide default tracer.
    pub fn new() -> Self {
        RequestTracing::default()
    }

    /// A manager around the given tracer.
    pub fn with_tracer(tracer: Arc<dyn Tracer>) -> Self {
        RequestTracing::builder().with_tracer(tracer).build()
    }

    /// Start building a manager.
    pub fn builder() -> RequestTracingBuilder {
        RequestTracingBuilder::default()
    }

    /// The tracer driven by this manager.
    ///
    /// Resolved lazily so a manager constructed before tracer setup picks
    /// up the configured global tracer.
    pub fn tracer(&self) -> Arc<dyn Tracer> {
        self.tracer.clone().unwrap_or_else(global::tracer)
    }

    /// Whether every request through a global layer is traced.
    pub fn trace_all(&self) -> bool {
        self.trace_all.load(Ordering::Relaxed)
    }

    /// Update the `trace_all` flag.
    ///
    /// Intended for the one-time application of configuration at startup.
    pub fn set_trace_all(&self, trace_all: bool) {
        self.trace_all.store(trace_all, Ordering::Relaxed);
    }

    /// Install a start-span callback after construction.
    ///
    /// Intended for the one-time application of configuration at startup.
    pub fn set_start_span_cb(&self, cb: StartSpanCallback) {
        if let Ok(mut slot) = self.start_span_cb.write() {
            *slot = Some(cb);
        }
    }

    /// Number of requests currently holding an unfinished span.
    pub fn active_spans(&self) -> usize {
        self.spans.lock().map(|spans| spans.len()).unwrap_or(0)
    }

    /// Open a tracing span for the given request.
    ///
    /// The operation name is the matched route if one is already resolved,
    /// the HTTP method otherwise, unless an operation-name override is
    /// configured. The span is parented to the remote context extracted
    /// from the request headers when one exists; the two recoverable
    /// extraction failures fall back to a rootless span, any other
    /// extraction error is returned. Each name in `attributes` that
    /// resolves to a non-empty request attribute is set as a tag under its
    /// raw name; unknown names are skipped.
    ///
    /// A request that already holds a live span is not opened again; its
    /// existing key is returned.
    pub fn open<B>(
        &self,
        request: &mut Request<B>,
        attributes: &[String],
    ) -> TraceResult<TraceKey> {
        if let Some(key) = request.extensions().get::<TraceKey>().copied() {
            // A key minted by another manager is never ours to honor.
            let live = key.manager == self.id
                && self
                    .spans
                    .lock()
                    .map(|spans| spans.contains_key(&key))
                    .unwrap_or(false);
            if live {
                return Ok(key);
            }
        }

        let tracer = self.tracer();
        let operation_name = self.resolve_operation_name(request);

        let parent = match tracer.extract(&HeaderExtractor(request.headers())) {
            Ok(parent) => parent.filter(|cx| cx.is_valid()),
            Err(err) if err.is_recoverable() => {
                tracing::debug!(error = %err, "starting rootless span");
                None
            }
            Err(err) => return Err(err),
        };

        let mut builder = SpanBuilder::from_name(operation_name);
        if let Some(parent) = parent {
            builder = builder.with_child_of(parent);
        }
        let mut span = tracer.start_span(builder);

        span.set_tag(KeyValue::new(tags::COMPONENT, COMPONENT_NAME));
        span.set_tag(KeyValue::new(tags::SPAN_KIND, tags::SPAN_KIND_RPC_SERVER));
        span.set_tag(KeyValue::new(
            tags::HTTP_METHOD,
            request.method().as_str().to_string(),
        ));
        span.set_tag(KeyValue::new(tags::HTTP_URL, request.uri().to_string()));

        {
            let head = RequestHead::from_request(request);
            for attr in attributes {
                if let Some(value) = request_attribute(&head, attr) {
                    if !value.is_empty() {
                        span.set_tag(KeyValue::new(attr.clone(), value));
                    }
                }
            }

            self.call_start_span_cb(span.as_mut(), &head);
        }

        let route = request.extensions().get::<MatchedRoute>().cloned();
        let key = TraceKey {
            manager: self.id,
            seq: self.next_seq.fetch_add(1, Ordering::Relaxed),
        };
        request.extensions_mut().insert(key);
        if let Ok(mut spans) = self.spans.lock() {
            spans.insert(key, ActiveSpan { span, route });
        }
        Ok(key)
    }

    /// Close the span for a completed request.
    ///
    /// Tags the response status code and the matched route, if one is
    /// resolved by now: either the route known at open time, or a
    /// [`MatchedRoute`] response extension, which takes precedence. Then
    /// finishes the span. A key without an active span is a no-op, which
    /// makes a second close harmless.
    pub fn close<B>(&self, key: TraceKey, response: &Response<B>) {
        let Some(ActiveSpan { mut span, route }) = self.remove(key) else {
            return;
        };

        span.set_tag(KeyValue::new(
            tags::HTTP_STATUS_CODE,
            response.status().as_u16(),
        ));
        let route = response.extensions().get::<MatchedRoute>().or(route.as_ref());
        if let Some(route) = route {
            span.set_tag(KeyValue::new(tags::HTTP_ROUTE, route.as_str().to_string()));
        }

        span.finish();
    }

    /// Close the span for a failed request.
    ///
    /// Tags the span as an error and records a structured error event; the
    /// route known at open time is still tagged, but no status tag is set
    /// on this path. A key without an active span is a no-op.
    pub fn close_with_error(&self, key: TraceKey, error: &dyn fmt::Display) {
        let Some(ActiveSpan { mut span, route }) = self.remove(key) else {
            return;
        };

        span.set_tag(KeyValue::new(tags::ERROR, true));
        span.log(vec![
            KeyValue::new(tags::EVENT, tags::EVENT_ERROR),
            KeyValue::new(tags::ERROR_OBJECT, error.to_string()),
        ]);
        if let Some(route) = route {
            span.set_tag(KeyValue::new(tags::HTTP_ROUTE, route.as_str().to_string()));
        }

        span.finish();
    }

    /// Run `f` against the active span of the given request.
    ///
    /// Returns `None` if the request was never opened or has already been
    /// closed.
    pub fn with_span<B, T>(
        &self,
        request: &Request<B>,
        f: impl FnOnce(&mut dyn Span) -> T,
    ) -> Option<T> {
        let key = request.extensions().get::<TraceKey>().copied()?;
        self.with_span_key(key, f)
    }

    /// Run `f` against the active span under the given key.
    pub fn with_span_key<T>(&self, key: TraceKey, f: impl FnOnce(&mut dyn Span) -> T) -> Option<T> {
        let mut spans = self.spans.lock().ok()?;
        let entry = spans.get_mut(&key)?;
        Some(f(entry.span.as_mut()))
    }

    fn resolve_operation_name<B>(&self, request: &Request<B>) -> String {
        if let Some(f) = &self.operation_name {
            return f(&RequestHead::from_request(request));
        }

        match request.extensions().get::<MatchedRoute>() {
            Some(route) => route.as_str().to_string(),
            None => request.method().as_str().to_string(),
        }
    }

    fn call_start_span_cb(&self, span: &mut dyn Span, head: &RequestHead<'_>) {
        let cb = match self.start_span_cb.read() {
            Ok(slot) => slot.clone(),
            Err(_) => return,
        };
        let Some(cb) = cb else {
            return;
        };

        // Enrichment failures never abort tracing or reach the caller.
        if catch_unwind(AssertUnwindSafe(|| cb(span, head))).is_err() {
            tracing::warn!("start-span callback panicked; span left as-is");
        }
    }

    fn remove(&self, key: TraceKey) -> Option<ActiveSpan> {
        self.spans.lock().ok().and_then(|mut spans| spans.remove(&key))
    }
}

/// Resolve a traced-attribute name against a request head.
///
/// Unknown names resolve to `None` and are skipped by the caller.
fn request_attribute(head: &RequestHead<'_>, name: &str) -> Option<String> {
    match name {
        "method" => Some(head.method.as_str().to_string()),
        "path" => Some(head.uri.path().to_string()),
        "query" => head.uri.query().map(str::to_string),
        "path_qs" => Some(
            head.uri
                .path_and_query()
                .map(|pq| pq.as_str().to_string())
                .unwrap_or_else(|| head.uri.path().to_string()),
        ),
        "url" => Some(head.uri.to_string()),
        "scheme" => head.uri.scheme_str().map(str::to_string),
        "host" => head.uri.host().map(str::to_string).or_else(|| {
            head.headers
                .get(http::header::HOST)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        }),
        _ => None,
    }
}
