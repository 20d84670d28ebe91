//! End-to-end tests driving the middleware through tower services.
use std::sync::Arc;

use http::{Request, Response, StatusCode};
use tower::{service_fn, Layer, ServiceExt};

use tracekit::tags;
use tracekit::testing::{ExtractBehavior, TestTracer};
use tracekit::trace::{SpanContext, SpanId, TraceFlags, TraceId};
use tracekit::{KeyValue, Value};
use tracekit_http::settings::{self, keys, FactoryRegistry, Setting, Settings};
use tracekit_http::{MatchedRoute, RequestTracing, TraceLayer};

fn manager(tracer: &TestTracer) -> Arc<RequestTracing> {
    Arc::new(RequestTracing::with_tracer(Arc::new(tracer.clone())))
}

fn request(uri: &str) -> Request<()> {
    Request::builder().uri(uri).body(()).unwrap()
}

async fn ok_handler(_req: Request<()>) -> Result<Response<&'static str>, String> {
    Ok(Response::new("hello"))
}

#[tokio::test]
async fn global_layer_traces_each_request() {
    let tracer = TestTracer::new();
    let tracing = manager(&tracer);
    tracing.set_trace_all(true);

    let svc = TraceLayer::global(tracing.clone(), vec!["path".into()])
        .layer(service_fn(ok_handler));

    let response = svc.oneshot(request("/one?debug=1")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let spans = tracer.finished_spans();
    assert_eq!(spans.len(), 1);
    assert_eq!(spans[0].operation_name, "GET");
    assert_eq!(
        spans[0].tag(&tags::HTTP_STATUS_CODE),
        Some(&Value::from(200u16))
    );
    assert_eq!(
        spans[0].tag(&tracekit::Key::new("path")),
        Some(&Value::from("/one"))
    );
    assert_eq!(tracing.active_spans(), 0);
}

#[tokio::test]
async fn global_layer_is_passthrough_when_trace_all_is_off() {
    let tracer = TestTracer::new();
    let tracing = manager(&tracer);
    tracing.set_trace_all(false);

    let svc = TraceLayer::global(tracing, Vec::new()).layer(service_fn(ok_handler));
    svc.oneshot(request("/")).await.unwrap();

    assert_eq!(tracer.span_count(), 0);
}

#[tokio::test]
async fn per_handler_layer_traces_when_trace_all_is_off() {
    let tracer = TestTracer::new();
    let tracing = manager(&tracer);
    tracing.set_trace_all(false);

    let svc = tracing.trace(["method"]).layer(service_fn(ok_handler));
    svc.oneshot(request("/handler")).await.unwrap();

    let spans = tracer.finished_spans();
    assert_eq!(spans.len(), 1);
    assert_eq!(
        spans[0].tag(&tracekit::Key::new("method")),
        Some(&Value::from("GET"))
    );
}

#[tokio::test]
async fn per_handler_layer_defers_to_the_global_layer() {
    let tracer = TestTracer::new();
    let tracing = manager(&tracer);
    tracing.set_trace_all(true);

    // Stacked like an app would: global outermost, decorator inside.
    let inner = tracing.trace::<_, String>([]).layer(service_fn(ok_handler));
    let svc = TraceLayer::global(tracing, Vec::new()).layer(inner);
    svc.oneshot(request("/")).await.unwrap();

    assert_eq!(tracer.span_count(), 1);
}

#[tokio::test]
async fn handler_error_closes_the_span_and_propagates() {
    let tracer = TestTracer::new();
    let tracing = manager(&tracer);
    tracing.set_trace_all(true);

    let svc = TraceLayer::global(tracing, Vec::new()).layer(service_fn(
        |_req: Request<()>| async { Err::<Response<()>, String>("boom".to_string()) },
    ));

    let err = svc.oneshot(request("/")).await.unwrap_err();
    assert_eq!(err, "boom");

    let spans = tracer.finished_spans();
    assert_eq!(spans.len(), 1);
    assert_eq!(spans[0].tag(&tags::ERROR), Some(&Value::from(true)));
    assert_eq!(
        spans[0].logs,
        vec![vec![
            KeyValue::new(tags::EVENT, tags::EVENT_ERROR),
            KeyValue::new(tags::ERROR_OBJECT, "boom"),
        ]]
    );
    assert!(spans[0].tag(&tags::HTTP_STATUS_CODE).is_none());
}

#[tokio::test]
async fn remote_parent_is_honored() {
    let parent = SpanContext::new(
        TraceId::from(0xdeadbeefu128),
        SpanId::from(0xc0ffeeu64),
        TraceFlags::SAMPLED,
        true,
    );
    let tracer = TestTracer::with_extract(ExtractBehavior::Found(parent.clone()));
    let tracing = manager(&tracer);
    tracing.set_trace_all(true);

    let svc = TraceLayer::global(tracing, Vec::new()).layer(service_fn(ok_handler));
    svc.oneshot(request("/")).await.unwrap();

    assert_eq!(tracer.finished_spans()[0].parent, Some(parent));
}

#[tokio::test]
async fn hard_extract_error_leaves_request_untraced() {
    let tracer = TestTracer::with_extract(ExtractBehavior::Broken("socket closed".into()));
    let tracing = manager(&tracer);
    tracing.set_trace_all(true);

    let svc = TraceLayer::global(tracing, Vec::new()).layer(service_fn(ok_handler));
    let response = svc.oneshot(request("/")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(tracer.span_count(), 0);
}

#[tokio::test]
async fn route_matched_before_handling_names_and_tags_the_span() {
    let tracer = TestTracer::new();
    let tracing = manager(&tracer);
    tracing.set_trace_all(true);

    let svc = TraceLayer::global(tracing, Vec::new()).layer(service_fn(ok_handler));
    let mut req = request("/foo/42");
    req.extensions_mut().insert(MatchedRoute::new("foo"));
    svc.oneshot(req).await.unwrap();

    let spans = tracer.finished_spans();
    assert_eq!(spans[0].operation_name, "foo");
    assert_eq!(
        spans[0].tag(&tags::HTTP_ROUTE),
        Some(&Value::from("foo"))
    );
}

#[tokio::test]
async fn matched_route_on_the_response_is_tagged() {
    let tracer = TestTracer::new();
    let tracing = manager(&tracer);
    tracing.set_trace_all(true);

    let svc = TraceLayer::global(tracing, Vec::new()).layer(service_fn(
        |_req: Request<()>| async {
            let mut response = Response::new(());
            response
                .extensions_mut()
                .insert(MatchedRoute::new("/users/{id}"));
            Ok::<_, String>(response)
        },
    ));
    svc.oneshot(request("/users/42")).await.unwrap();

    let spans = tracer.finished_spans();
    assert_eq!(
        spans[0].tag(&tags::HTTP_ROUTE),
        Some(&Value::from("/users/{id}"))
    );
    // The route is a tag, the operation name stays as opened.
    assert_eq!(spans[0].operation_name, "GET");
}

#[tokio::test]
async fn from_settings_builds_publishes_and_traces() {
    let tracer = TestTracer::new();
    let mut store = Settings::new();
    store.insert(
        keys::BASE_TRACER,
        Setting::Tracer(Arc::new(tracer.clone())),
    );
    store.insert(keys::TRACED_ATTRIBUTES, "path method");

    let layer = TraceLayer::from_settings(&mut store, &FactoryRegistry::new()).unwrap();

    // trace_all defaults to true and the manager is published for handlers.
    let published = store.tracing().unwrap();
    assert!(Arc::ptr_eq(&published, layer.tracing()));
    assert!(published.trace_all());

    // A handler annotates its own request through the published manager.
    let handler_tracing = published.clone();
    let svc = layer.layer(service_fn(move |req: Request<()>| {
        let tracing = handler_tracing.clone();
        async move {
            tracing.with_span(&req, |span| {
                span.set_tag(KeyValue::new("component.detail", "users"))
            });
            Ok::<_, String>(Response::new(()))
        }
    }));
    svc.oneshot(request("/users?page=2")).await.unwrap();

    let spans = tracer.finished_spans();
    assert_eq!(spans.len(), 1);
    assert_eq!(
        spans[0].tag(&tracekit::Key::new("path")),
        Some(&Value::from("/users"))
    );
    assert_eq!(
        spans[0].tag(&tracekit::Key::new("method")),
        Some(&Value::from("GET"))
    );
    assert_eq!(
        spans[0].tag(&tracekit::Key::new("component.detail")),
        Some(&Value::from("users"))
    );
}

#[test]
fn settings_trace_all_off_routes_tracing_to_decorators() {
    let tracer = TestTracer::new();
    let mut store = Settings::new();
    store.insert(
        keys::BASE_TRACER,
        Setting::Tracer(Arc::new(tracer.clone())),
    );
    store.insert(keys::TRACE_ALL, "off");

    let tracing = settings::build_tracing(&mut store, &FactoryRegistry::new()).unwrap();
    assert!(!tracing.trace_all());
}
