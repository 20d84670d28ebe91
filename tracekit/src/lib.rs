//! Vendor-neutral interfaces for request-tracing instrumentation.
//!
//! This crate defines the surface an instrumentation adapter consumes from
//! a distributed tracing client, without implementing one:
//!
//! * [`trace`]: the [`Tracer`] port (context extraction and span
//!   creation) and the [`Span`] handle (tags, structured logs, finish),
//!   plus the span-context value types.
//! * [`propagation`]: carrier access traits for reading and writing
//!   propagation data, with the concrete header format left to the tracer.
//! * [`tags`]: well-known tag keys for RPC-server spans.
//! * [`global`]: the process-wide default tracer, a no-op unless
//!   configured.
//! * [`testing`] (feature `testing`): an in-memory recording tracer for
//!   instrumentation tests.
//!
//! Tracer implementations are expected to be supplied by the application;
//! everything here is the seam between them and instrumentation such as
//! the `tracekit-http` adapter.
//!
//! [`Tracer`]: crate::trace::Tracer
//! [`Span`]: crate::trace::Span
#![warn(
    future_incompatible,
    missing_debug_implementations,
    missing_docs,
    nonstandard_style,
    rust_2018_idioms,
    unreachable_pub,
    unused
)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod global;
pub mod propagation;
pub mod tags;
pub mod trace;

#[cfg(any(feature = "testing", test))]
#[cfg_attr(docsrs, doc(cfg(feature = "testing")))]
pub mod testing;

mod common;

pub use common::{Key, KeyValue, Value};
