use std::path::PathBuf;

use thiserror::Error;

/// Fatal errors that abort worker construction or startup.
///
/// Per the error-propagation policy, only these kinds terminate the worker
/// process; everything else is recoverable and surfaces as an error reply on
/// the connection that triggered it.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("unknown codec `{0}`, expected one of: auto, json, json-fast, structured-json, msgpack")]
    InvalidCodec(String),
    #[error("socket path must be provided via Worker::new or PYPROC_SOCKET_PATH")]
    MissingSocketPath,
    #[error("failed to remove stale socket at `{path}`: {source}")]
    UnlinkStaleSocket {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to bind unix socket at `{path}`: {source}")]
    Bind {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors that can occur while decoding or encoding a single frame payload.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("json decode failed: {0}")]
    Json(#[from] serde_json::Error),
    #[error("simd-json decode failed: {0}")]
    SimdJson(String),
    #[error("msgpack encode failed: {0}")]
    MsgpackEncode(#[from] rmp_serde::encode::Error),
    #[error("msgpack decode failed: {0}")]
    MsgpackDecode(#[from] rmp_serde::decode::Error),
}

/// Errors surfaced while reading or writing a length-prefixed frame.
#[derive(Debug, Error)]
pub enum FramingError {
    #[error("connection closed mid-header")]
    ShortHeader,
    #[error("connection closed mid-body: expected {expected} bytes, got {got}")]
    ShortBody { expected: u32, got: usize },
    #[error("frame of {size} bytes exceeds the configured ceiling of {limit} bytes")]
    TooLarge { size: u32, limit: u32 },
    #[error("socket io error: {0}")]
    Io(#[from] std::io::Error),
}

/// The error a handler returns to signal that it observed cancellation.
///
/// Dispatch maps this into `{ ok: false, error: "Cancelled: <reason>" }`
/// rather than logging it as an unexpected failure.
#[derive(Debug, Error, Clone)]
#[error("request {request_id} cancelled: {reason}")]
pub struct Cancelled {
    pub request_id: u64,
    pub reason: String,
}

impl Cancelled {
    pub fn new(request_id: u64, reason: impl Into<String>) -> Self {
        Self {
            request_id,
            reason: reason.into(),
        }
    }
}

/// The error type handlers return for anything other than cancellation.
///
/// Boxed so handler authors can return any `std::error::Error` without this
/// crate needing to know its concrete type.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync + 'static>;
