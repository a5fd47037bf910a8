#![forbid(unsafe_code)]
//! A co-process RPC worker: a long-lived subordinate process that accepts
//! framed remote procedure calls over a Unix domain socket from a
//! controlling host, dispatches each call to a host-registered handler, and
//! returns a framed reply.
//!
//! ## Wire protocol
//! Every frame is a big-endian `u32` byte count followed by exactly that
//! many payload bytes, encoded with one of four interchangeable codecs
//! (`json-stdlib`, `json-fast`, `structured-json`, `msgpack` — see
//! [`codec`]). A decoded payload is either a bare `Request` (the legacy,
//! un-enveloped form) or an envelope `{type, payload}` distinguishing a
//! `"request"` from a `"cancellation"` notification.
//!
//! ## Handlers
//! ```rust,no_run
//! use pyproc_worker::{register, HandlerRegistry, Worker};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut registry = HandlerRegistry::with_builtins();
//! register!(registry, "echo", |body| async move { Ok(body) });
//! register!(registry, "slow", cancellable |body, cancel| async move {
//!     cancel.cancelled().await;
//!     Ok(body)
//! });
//!
//! let worker = Worker::new(Some("/tmp/example.sock".into()), None, registry)?;
//! worker.run().await?;
//! # Ok(()) }
//! ```
//!
//! ## Cancellation
//! A handler registered with `accepts_cancel = true` receives a
//! [`CancelSignal`] it can poll (`is_cancelled`), await (`cancelled().await`),
//! or check periodically via [`CancellableOperation`]. The host signals
//! cancellation out of band — a dedicated reader task per connection
//! forwards it into the [`CancellationManager`] independent of whatever the
//! handler is currently doing (see the crate's design notes for why this
//! needs its own task rather than only running between requests).
//!
//! ## Observability and configuration
//! Logging uses `tracing`; enable span-per-request tracing and (behind the
//! `otel` feature) OpenTelemetry export via the `PYPROC_TRACING_ENABLED`,
//! `PYPROC_SERVICE_NAME`, and `PYPROC_TRACE_CONSOLE` environment variables.
//! Socket path and codec resolve from explicit arguments, then environment
//! variables, then defaults — see [`WorkerConfig`].

mod cancellation;
mod codec;
mod config;
mod dispatch;
mod error;
pub mod handlers;
mod protocol;
mod registry;
mod tracing_adapter;
mod transport;
mod worker;

pub use cancellation::{CancelSignal, CancellableOperation, CancellationManager};
pub use codec::{Codec, JsonFastCodec, JsonStdlibCodec, MsgpackCodec, StructuredJsonCodec};
pub use config::{TracingConfig, WorkerConfig};
pub use error::{Cancelled, CodecError, FramingError, HandlerError, WorkerError};
pub use protocol::{CancellationMessage, Headers, Request, Response};
pub use registry::{CancellableHandler, Handler, HandlerRegistry};
pub use tracing_adapter::{install_global_subscriber, TracingAdapter};
pub use worker::Worker;
