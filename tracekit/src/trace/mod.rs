//! Interfaces for driving an external distributed tracer.
//!
//! This module defines the port a request-tracing adapter programs
//! against: a [`Tracer`] that can extract a remote [`SpanContext`] from a
//! carrier and start new [`Span`]s, optionally as children of an extracted
//! context. Tracer implementations (span storage, sampling, export
//! protocols, header encodings) live elsewhere; this crate only describes
//! the surface the instrumentation consumes.
//!
//! ```
//! use tracekit::trace::{SpanBuilder, Tracer};
//! use tracekit::{global, KeyValue};
//!
//! let tracer = global::tracer();
//! let mut span = tracer.start_span(
//!     SpanBuilder::from_name("GET").with_tags(vec![KeyValue::new("component", "demo")]),
//! );
//! span.finish();
//! ```
use std::borrow::Cow;
use std::time::SystemTime;
use thiserror::Error;

use crate::propagation::Extractor;
use crate::KeyValue;

mod span;
mod span_context;

pub mod noop;

pub use span::Span;
pub use span_context::{SpanContext, SpanId, TraceFlags, TraceId};

/// Errors returned by [`Tracer::extract`].
///
/// [`ExtractError::InvalidCarrier`] and [`ExtractError::ContextCorrupted`]
/// are recoverable from the instrumentation's point of view: a span is
/// started without a parent instead. Any other failure is propagated.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ExtractError {
    /// The carrier cannot hold the tracer's propagation format at all.
    #[error("the carrier is not valid for the tracer's propagation format")]
    InvalidCarrier,

    /// The carrier holds propagation data, but it cannot be decoded.
    #[error("the span context found in the carrier is corrupted")]
    ContextCorrupted,

    /// Other errors propagated from the tracer implementation.
    #[error(transparent)]
    Other(#[from] Box<dyn std::error::Error + Send + Sync + 'static>),
}

impl ExtractError {
    /// Whether instrumentation may fall back to a rootless span.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            ExtractError::InvalidCarrier | ExtractError::ContextCorrupted
        )
    }
}

/// Describe the result of fallible operations in the tracing API.
pub type TraceResult<T> = Result<T, ExtractError>;

/// Builder for new spans, passed to [`Tracer::start_span`].
#[derive(Clone, Debug, Default)]
pub struct SpanBuilder {
    /// The operation name of the span to be created.
    pub operation_name: Cow<'static, str>,

    /// The remote parent the new span is a child of, if any.
    pub child_of: Option<SpanContext>,

    /// Tags to set at span creation.
    pub tags: Vec<KeyValue>,

    /// Explicit start time, if the tracer should not use "now".
    pub start_time: Option<SystemTime>,
}

impl SpanBuilder {
    /// Create a builder with the given operation name.
    pub fn from_name<T: Into<Cow<'static, str>>>(name: T) -> Self {
        SpanBuilder {
            operation_name: name.into(),
            ..Default::default()
        }
    }

    /// Assign a parent context.
    pub fn with_child_of(self, parent: SpanContext) -> Self {
        SpanBuilder {
            child_of: Some(parent),
            ..self
        }
    }

    /// Assign creation-time tags.
    pub fn with_tags(self, tags: Vec<KeyValue>) -> Self {
        SpanBuilder { tags, ..self }
    }

    /// Assign an explicit start time.
    pub fn with_start_time<T: Into<SystemTime>>(self, start_time: T) -> Self {
        SpanBuilder {
            start_time: Some(start_time.into()),
            ..self
        }
    }
}

/// Interface for constructing [`Span`]s and resolving remote parents.
///
/// Implementations are supplied by a tracing client; the process-wide
/// default is available through [`global::tracer`].
///
/// [`global::tracer`]: crate::global::tracer
pub trait Tracer: Send + Sync {
    /// Extract a remote span context from the given carrier.
    ///
    /// Returns `Ok(None)` when the carrier holds no propagation data at
    /// all, which is not an error.
    fn extract(&self, carrier: &dyn Extractor) -> TraceResult<Option<SpanContext>>;

    /// Start a new span from the given builder.
    fn start_span(&self, builder: SpanBuilder) -> Box<dyn Span>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recoverable_extract_errors() {
        assert!(ExtractError::InvalidCarrier.is_recoverable());
        assert!(ExtractError::ContextCorrupted.is_recoverable());
        assert!(!ExtractError::Other("io".to_string().into()).is_recoverable());
    }

    #[test]
    fn builder_accumulates() {
        let parent = SpanContext::new(
            TraceId::from(1u128),
            SpanId::from(2u64),
            TraceFlags::SAMPLED,
            true,
        );
        let start = SystemTime::UNIX_EPOCH;
        let builder = SpanBuilder::from_name("GET")
            .with_child_of(parent.clone())
            .with_tags(vec![KeyValue::new("component", "test")])
            .with_start_time(start);

        assert_eq!(builder.operation_name, "GET");
        assert_eq!(builder.child_of, Some(parent));
        assert_eq!(builder.tags.len(), 1);
        assert_eq!(builder.start_time, Some(start));
        assert!(SpanBuilder::from_name("GET").start_time.is_none());
    }
}
