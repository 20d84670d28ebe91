//! Process-wide default tracer.
//!
//! Instrumentation that is not handed an explicit tracer falls back to the
//! tracer registered here. The default is the no-op tracer, so untraced
//! deployments pay for an `Arc` clone and nothing else.
//!
//! The global is resolved lazily at span-creation time, not captured at
//! adapter construction, so tests and late-initializing applications can
//! swap it with [`set_tracer`] and have existing adapters pick it up.
use once_cell::sync::Lazy;
use std::sync::{Arc, RwLock};

use crate::trace::noop::NoopTracer;
use crate::trace::Tracer;

static GLOBAL_TRACER: Lazy<RwLock<Arc<dyn Tracer>>> =
    Lazy::new(|| RwLock::new(Arc::new(NoopTracer::new())));

/// Returns the process-wide default [`Tracer`].
pub fn tracer() -> Arc<dyn Tracer> {
    GLOBAL_TRACER
        .read()
        .map(|t| t.clone())
        .unwrap_or_else(|_| Arc::new(NoopTracer::new()))
}

/// Sets the process-wide default [`Tracer`], returning the previous one.
pub fn set_tracer<T: Tracer + 'static>(new_tracer: T) -> Arc<dyn Tracer> {
    set_boxed_tracer(Arc::new(new_tracer))
}

/// Sets an already shared tracer as the process-wide default.
pub fn set_boxed_tracer(new_tracer: Arc<dyn Tracer>) -> Arc<dyn Tracer> {
    GLOBAL_TRACER
        .write()
        .map(|mut global| std::mem::replace(&mut *global, new_tracer.clone()))
        .unwrap_or(new_tracer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace::SpanBuilder;

    #[test]
    fn default_is_noop_and_replaceable() {
        let mut span = tracer().start_span(SpanBuilder::from_name("probe"));
        span.finish();

        let previous = set_tracer(NoopTracer::new());
        let _ = set_boxed_tracer(previous);
    }
}
