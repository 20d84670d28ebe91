//! No-op trace impls
//!
//! This implementation is returned as the global tracer if no tracer has
//! been set. It is intended to have minimal resource utilization and
//! runtime impact.
use std::borrow::Cow;

use crate::propagation::Extractor;
use crate::trace::{Span, SpanBuilder, SpanContext, TraceResult, Tracer};
use crate::KeyValue;

/// A no-op instance of a `Tracer`.
#[derive(Clone, Debug, Default)]
pub struct NoopTracer {
    _private: (),
}

impl NoopTracer {
    /// Create a new no-op tracer.
    pub fn new() -> Self {
        NoopTracer { _private: () }
    }
}

impl Tracer for NoopTracer {
    /// Never finds a remote context.
    fn extract(&self, _carrier: &dyn Extractor) -> TraceResult<Option<SpanContext>> {
        Ok(None)
    }

    /// Returns a [`NoopSpan`], dropping the builder.
    fn start_span(&self, _builder: SpanBuilder) -> Box<dyn Span> {
        Box::new(NoopSpan::new())
    }
}

/// A no-op instance of a `Span`.
#[derive(Clone, Debug, Default)]
pub struct NoopSpan {
    finished: bool,
}

impl NoopSpan {
    /// Creates a new `NoopSpan` instance.
    pub fn new() -> Self {
        NoopSpan { finished: false }
    }
}

impl Span for NoopSpan {
    /// Ignores all tags.
    fn set_tag(&mut self, _tag: KeyValue) {
        // Ignored
    }

    /// Ignores all log events.
    fn log(&mut self, _fields: Vec<KeyValue>) {
        // Ignored
    }

    /// Ignores name updates.
    fn set_operation_name(&mut self, _name: Cow<'static, str>) {
        // Ignored
    }

    fn is_finished(&self) -> bool {
        self.finished
    }

    /// Only records the finished flag.
    fn finish(&mut self) {
        self.finished = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn noop_tracer_starts_rootless_spans() {
        let tracer = NoopTracer::new();
        let carrier: HashMap<String, String> = HashMap::new();

        assert!(matches!(tracer.extract(&carrier), Ok(None)));

        let mut span = tracer.start_span(SpanBuilder::from_name("noop"));
        assert!(!span.is_finished());
        span.finish();
        assert!(span.is_finished());
    }
}
