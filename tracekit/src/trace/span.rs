use crate::KeyValue;
use std::borrow::Cow;

/// The interface for a single unit of work within a trace.
///
/// A span handle is created by a [`Tracer`], mutated while its request is
/// in flight, and irreversibly finished exactly once. All methods take
/// `Cow`/owned arguments so the trait stays object safe; instrumentation
/// code holds spans as `Box<dyn Span>`.
///
/// [`Tracer`]: crate::trace::Tracer
pub trait Span: Send {
    /// Set a tag on this span.
    ///
    /// Setting a tag with the same key as an existing tag overwrites the
    /// existing value (last write wins).
    fn set_tag(&mut self, tag: KeyValue);

    /// Record a structured log event on this span.
    ///
    /// The fields are free-form key-value pairs; well-known field keys for
    /// error events live in the [`tags`] module.
    ///
    /// [`tags`]: crate::tags
    fn log(&mut self, fields: Vec<KeyValue>);

    /// Update the span's operation name.
    fn set_operation_name(&mut self, name: Cow<'static, str>);

    /// Returns `true` once [`finish`] has been called.
    ///
    /// [`finish`]: Span::finish
    fn is_finished(&self) -> bool;

    /// Signals that the operation described by this span has ended.
    ///
    /// Implementations should ignore subsequent calls; callers driving a
    /// span through [`Span::finish`] must nevertheless not invoke it twice
    /// for the same logical unit of work.
    fn finish(&mut self);
}

impl Span for Box<dyn Span> {
    fn set_tag(&mut self, tag: KeyValue) {
        (**self).set_tag(tag)
    }

    fn log(&mut self, fields: Vec<KeyValue>) {
        (**self).log(fields)
    }

    fn set_operation_name(&mut self, name: Cow<'static, str>) {
        (**self).set_operation_name(name)
    }

    fn is_finished(&self) -> bool {
        (**self).is_finished()
    }

    fn finish(&mut self) {
        (**self).finish()
    }
}
