//! In-memory tracer for instrumentation tests.
//!
//! [`TestTracer`] records every span it starts and keeps the record
//! accessible after the span handle is finished and dropped, so tests can
//! assert on operation names, tags, log events, parentage and finish
//! counts. Its [`extract`] behavior is scriptable through
//! [`ExtractBehavior`] to exercise the recoverable and fatal extraction
//! paths.
//!
//! [`extract`]: crate::trace::Tracer::extract
use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::propagation::Extractor;
use crate::trace::{ExtractError, Span, SpanBuilder, SpanContext, TraceResult, Tracer};
use crate::{Key, KeyValue, Value};

/// Scripted outcome of [`TestTracer`]'s context extraction.
#[derive(Clone, Debug, Default)]
pub enum ExtractBehavior {
    /// No propagation data in the carrier (the default).
    #[default]
    NotFound,
    /// A remote parent context is found.
    Found(SpanContext),
    /// Extraction fails with [`ExtractError::InvalidCarrier`].
    InvalidCarrier,
    /// Extraction fails with [`ExtractError::ContextCorrupted`].
    ContextCorrupted,
    /// Extraction fails with a non-recoverable error.
    Broken(String),
}

/// Recorded state of a single span started by a [`TestTracer`].
#[derive(Clone, Debug, Default)]
pub struct SpanData {
    /// Current operation name.
    pub operation_name: String,
    /// Parent context the span was started as a child of, if any.
    pub parent: Option<SpanContext>,
    /// Tags in write order, duplicates preserved.
    pub tags: Vec<KeyValue>,
    /// Structured log events in write order.
    pub logs: Vec<Vec<KeyValue>>,
    /// Number of times `finish` was called.
    pub finish_count: usize,
}

impl SpanData {
    /// Whether the span has been finished at least once.
    pub fn finished(&self) -> bool {
        self.finish_count > 0
    }

    /// The effective value for a tag key, last write wins.
    pub fn tag(&self, key: &Key) -> Option<&Value> {
        self.tags
            .iter()
            .rev()
            .find(|kv| &kv.key == key)
            .map(|kv| &kv.value)
    }

    /// The effective tag set, last write wins per key.
    pub fn tag_map(&self) -> HashMap<Key, Value> {
        self.tags
            .iter()
            .map(|kv| (kv.key.clone(), kv.value.clone()))
            .collect()
    }
}

/// Span handle produced by [`TestTracer`], writing through to the shared
/// record.
#[derive(Debug)]
pub struct TestSpan {
    data: Arc<Mutex<SpanData>>,
}

impl TestSpan {
    fn with_data(&self, f: impl FnOnce(&mut SpanData)) {
        if let Ok(mut data) = self.data.lock() {
            f(&mut data);
        }
    }
}

impl Span for TestSpan {
    fn set_tag(&mut self, tag: KeyValue) {
        self.with_data(|data| data.tags.push(tag));
    }

    fn log(&mut self, fields: Vec<KeyValue>) {
        self.with_data(|data| data.logs.push(fields));
    }

    fn set_operation_name(&mut self, name: Cow<'static, str>) {
        self.with_data(|data| data.operation_name = name.into_owned());
    }

    fn is_finished(&self) -> bool {
        self.data.lock().map(|data| data.finished()).unwrap_or(false)
    }

    fn finish(&mut self) {
        self.with_data(|data| data.finish_count += 1);
    }
}

/// A [`Tracer`] that records every started span in memory.
#[derive(Clone, Debug, Default)]
pub struct TestTracer {
    spans: Arc<Mutex<Vec<Arc<Mutex<SpanData>>>>>,
    extract: Arc<Mutex<ExtractBehavior>>,
}

impl TestTracer {
    /// Create a tracer whose extraction finds no remote context.
    pub fn new() -> Self {
        TestTracer::default()
    }

    /// Create a tracer with the given extraction behavior.
    pub fn with_extract(behavior: ExtractBehavior) -> Self {
        let tracer = TestTracer::default();
        tracer.set_extract(behavior);
        tracer
    }

    /// Replace the extraction behavior.
    pub fn set_extract(&self, behavior: ExtractBehavior) {
        if let Ok(mut extract) = self.extract.lock() {
            *extract = behavior;
        }
    }

    /// Snapshots of all spans started so far, in creation order.
    pub fn spans(&self) -> Vec<SpanData> {
        self.spans
            .lock()
            .map(|spans| {
                spans
                    .iter()
                    .filter_map(|span| span.lock().ok().map(|data| data.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Snapshots of the spans that have been finished.
    pub fn finished_spans(&self) -> Vec<SpanData> {
        self.spans()
            .into_iter()
            .filter(SpanData::finished)
            .collect()
    }

    /// Number of spans started so far.
    pub fn span_count(&self) -> usize {
        self.spans.lock().map(|spans| spans.len()).unwrap_or(0)
    }

    /// Forget all recorded spans.
    pub fn clear(&self) {
        if let Ok(mut spans) = self.spans.lock() {
            spans.clear();
        }
    }
}

impl Tracer for TestTracer {
    fn extract(&self, _carrier: &dyn Extractor) -> TraceResult<Option<SpanContext>> {
        let behavior = self
            .extract
            .lock()
            .map(|extract| extract.clone())
            .unwrap_or_default();
        match behavior {
            ExtractBehavior::NotFound => Ok(None),
            ExtractBehavior::Found(cx) => Ok(Some(cx)),
            ExtractBehavior::InvalidCarrier => Err(ExtractError::InvalidCarrier),
            ExtractBehavior::ContextCorrupted => Err(ExtractError::ContextCorrupted),
            ExtractBehavior::Broken(msg) => Err(ExtractError::Other(msg.into())),
        }
    }

    fn start_span(&self, builder: SpanBuilder) -> Box<dyn Span> {
        let data = Arc::new(Mutex::new(SpanData {
            operation_name: builder.operation_name.into_owned(),
            parent: builder.child_of,
            tags: builder.tags,
            logs: Vec::new(),
            finish_count: 0,
        }));
        if let Ok(mut spans) = self.spans.lock() {
            spans.push(data.clone());
        }
        Box::new(TestSpan { data })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace::{SpanId, TraceFlags, TraceId};

    fn remote_context() -> SpanContext {
        SpanContext::new(
            TraceId::from(0xdeadbeefu128),
            SpanId::from(0xc0ffeeu64),
            TraceFlags::SAMPLED,
            true,
        )
    }

    #[test]
    fn records_span_mutations_after_finish() {
        let tracer = TestTracer::new();
        let mut span = tracer.start_span(SpanBuilder::from_name("initial"));
        span.set_tag(KeyValue::new("key", "first"));
        span.set_tag(KeyValue::new("key", "second"));
        span.set_operation_name("renamed".into());
        span.log(vec![KeyValue::new("event", "error")]);
        span.finish();
        drop(span);

        let spans = tracer.finished_spans();
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].operation_name, "renamed");
        assert_eq!(spans[0].tag(&Key::new("key")), Some(&Value::from("second")));
        assert_eq!(spans[0].logs.len(), 1);
        assert_eq!(spans[0].finish_count, 1);
    }

    #[test]
    fn scripted_extraction() {
        let carrier: std::collections::HashMap<String, String> = Default::default();

        let tracer = TestTracer::new();
        assert!(matches!(tracer.extract(&carrier), Ok(None)));

        tracer.set_extract(ExtractBehavior::Found(remote_context()));
        assert_eq!(
            tracer.extract(&carrier).ok().flatten(),
            Some(remote_context())
        );

        tracer.set_extract(ExtractBehavior::InvalidCarrier);
        assert!(matches!(
            tracer.extract(&carrier),
            Err(ExtractError::InvalidCarrier)
        ));

        tracer.set_extract(ExtractBehavior::Broken("socket closed".into()));
        assert!(matches!(
            tracer.extract(&carrier),
            Err(ExtractError::Other(_))
        ));
    }
}
