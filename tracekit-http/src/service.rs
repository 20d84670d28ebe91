//! Tower integration for the request-tracing manager.
//!
//! Two entry points share one service type: the global interception layer
//! wraps every request of an application when `trace_all` is enabled, and
//! the per-handler layer traces a single handler when it is not. The two
//! are mutually exclusive per request, so stacking both never double
//! traces.
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{ready, Context, Poll};

use http::{Request, Response};
use pin_project_lite::pin_project;
use tower::{Layer, Service};

use crate::settings::{self, ConfigError, FactoryRegistry, Settings};
use crate::tracing::{RequestTracing, TraceKey};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Mode {
    /// Trace when `trace_all` is set; the tween over the whole app.
    Global,
    /// Trace when `trace_all` is unset; passthrough otherwise.
    PerHandler,
}

/// A [`Layer`] that traces requests through a [`RequestTracing`] manager.
///
/// Built either globally from a settings store (the interception point) or
/// per handler via [`RequestTracing::trace`] (the decorator).
#[derive(Clone, Debug)]
pub struct TraceLayer {
    tracing: Arc<RequestTracing>,
    attributes: Arc<[String]>,
    mode: Mode,
}

impl TraceLayer {
    /// A global layer around the given manager, tracing every request
    /// while the manager's `trace_all` flag is set.
    pub fn global(tracing: Arc<RequestTracing>, attributes: Vec<String>) -> Self {
        TraceLayer {
            tracing,
            attributes: attributes.into(),
            mode: Mode::Global,
        }
    }

    /// Construct the manager from a settings store and return the global
    /// layer over it.
    ///
    /// Runs the construction protocol once (see [`settings::build_tracing`])
    /// and publishes the manager back into the store, so handlers can
    /// retrieve it later. Configuration problems surface here, never at
    /// request time.
    pub fn from_settings(
        settings: &mut Settings,
        registry: &FactoryRegistry,
    ) -> Result<Self, ConfigError> {
        let tracing = settings::build_tracing(settings, registry)?;
        let attributes = match settings.get(settings::keys::TRACED_ATTRIBUTES) {
            Some(setting) => settings::as_list(settings::keys::TRACED_ATTRIBUTES, setting)?,
            None => Vec::new(),
        };
        Ok(TraceLayer::global(tracing, attributes))
    }

    /// The manager driving this layer.
    pub fn tracing(&self) -> &Arc<RequestTracing> {
        &self.tracing
    }
}

impl RequestTracing {
    /// A per-handler layer tracing a single wrapped service.
    ///
    /// While `trace_all` is active this layer is a passthrough, since the
    /// global layer already traces the request.
    pub fn trace<I, T>(self: &Arc<Self>, attributes: I) -> TraceLayer
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        TraceLayer {
            tracing: self.clone(),
            attributes: attributes.into_iter().map(Into::into).collect(),
            mode: Mode::PerHandler,
        }
    }
}

impl<S> Layer<S> for TraceLayer {
    type Service = TraceService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        TraceService {
            inner,
            tracing: self.tracing.clone(),
            attributes: self.attributes.clone(),
            mode: self.mode,
        }
    }
}

/// Middleware [`Service`] produced by [`TraceLayer`].
#[derive(Clone, Debug)]
pub struct TraceService<S> {
    inner: S,
    tracing: Arc<RequestTracing>,
    attributes: Arc<[String]>,
    mode: Mode,
}

impl<S, B, RB> Service<Request<B>> for TraceService<S>
where
    S: Service<Request<B>, Response = Response<RB>>,
    S::Error: fmt::Display,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = ResponseFuture<S::Future>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut request: Request<B>) -> Self::Future {
        let enabled = match self.mode {
            Mode::Global => self.tracing.trace_all(),
            Mode::PerHandler => !self.tracing.trace_all(),
        };
        if !enabled {
            return ResponseFuture {
                inner: self.inner.call(request),
                trace: None,
            };
        }

        let trace = match self.tracing.open(&mut request, &self.attributes) {
            Ok(key) => Some((self.tracing.clone(), key)),
            Err(err) => {
                // The inner service's error type cannot carry tracing
                // failures; the request proceeds untraced.
                tracing::warn!(error = %err, "context extraction failed, request untraced");
                None
            }
        };

        ResponseFuture {
            inner: self.inner.call(request),
            trace,
        }
    }
}

pin_project! {
    /// Response future for [`TraceService`], closing the span with the
    /// request outcome.
    pub struct ResponseFuture<F> {
        #[pin]
        inner: F,
        trace: Option<(Arc<RequestTracing>, TraceKey)>,
    }
}

impl<F> fmt::Debug for ResponseFuture<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseFuture").finish_non_exhaustive()
    }
}

impl<F, RB, E> Future for ResponseFuture<F>
where
    F: Future<Output = Result<Response<RB>, E>>,
    E: fmt::Display,
{
    type Output = Result<Response<RB>, E>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        let result = ready!(this.inner.poll(cx));

        if let Some((tracing, key)) = this.trace.take() {
            match &result {
                Ok(response) => tracing.close(key, response),
                Err(error) => tracing.close_with_error(key, error),
            }
        }

        Poll::Ready(result)
    }
}
