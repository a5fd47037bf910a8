use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use crate::cancellation::CancellationManager;
use crate::codec::Codec;
use crate::protocol::{classify, Inbound, Request, Response};
use crate::registry::HandlerRegistry;
use crate::tracing_adapter::TracingAdapter;
use crate::transport::{read_frame, write_frame};

const REQUEST_CHANNEL_CAPACITY: usize = 32;

/// Services one client connection end to end: spawns the reader task,
/// drives the dispatch loop, and tears both down on exit (§4.5, §5).
pub async fn serve_connection<R, W>(
    reader: R,
    mut writer: W,
    codec: Arc<dyn Codec>,
    registry: Arc<HandlerRegistry>,
    tracing_adapter: TracingAdapter,
    max_frame_bytes: u32,
) where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin,
{
    let cancellation = CancellationManager::new();
    let (tx, mut rx) = mpsc::channel::<Request>(REQUEST_CHANNEL_CAPACITY);

    let reader_cancellation = cancellation.clone();
    let reader_codec = codec.clone();
    let reader_task = tokio::spawn(async move {
        run_reader(reader, reader_codec, reader_cancellation, tx, max_frame_bytes).await
    });

    while let Some(request) = rx.recv().await {
        let response = dispatch_one(request, &registry, &cancellation, &tracing_adapter).await;

        let encoded = match codec.encode(&response.to_value()) {
            Ok(bytes) => bytes,
            Err(err) => {
                error!(error = %err, "failed to encode response, closing connection");
                break;
            }
        };

        if let Err(err) = write_frame(&mut writer, &encoded).await {
            if is_broken_pipe(&err) {
                debug!("peer disconnected while writing reply");
            } else {
                error!(error = %err, "failed to write response frame");
            }
            break;
        }
    }

    reader_task.abort();
}

async fn run_reader<R>(
    mut reader: R,
    codec: Arc<dyn Codec>,
    cancellation: CancellationManager,
    tx: mpsc::Sender<Request>,
    max_frame_bytes: u32,
) where
    R: AsyncRead + Unpin,
{
    loop {
        let frame = match read_frame(&mut reader, max_frame_bytes).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => {
                debug!("connection closed by peer");
                break;
            }
            Err(err) => {
                debug!(error = %err, "framing error, closing connection");
                break;
            }
        };

        let value = match codec.decode(&frame) {
            Ok(value) => value,
            Err(err) => {
                warn!(error = %err, "failed to decode frame, closing connection");
                break;
            }
        };

        match classify(value) {
            Ok(Inbound::Request(request)) => {
                if tx.send(request).await.is_err() {
                    break;
                }
            }
            Ok(Inbound::Cancellation(msg)) => {
                cancellation.cancel(msg.id, msg.reason);
            }
            Ok(Inbound::UnknownEnvelope(kind)) => {
                warn!(envelope_type = %kind, "ignoring frame with unrecognised envelope type");
            }
            Err(err) => {
                warn!(error = %err, "failed to parse classified message, closing connection");
                break;
            }
        }
    }

    // The reader is the only task that notices a dropped connection
    // independent of whatever the dispatch task's handler is doing, so it
    // is the one that cancels any request still in flight (§4.5 step 1,
    // §5 out-of-band cancellation path).
    cancellation.cancel_all("connection closed");
}

async fn dispatch_one(
    request: Request,
    registry: &HandlerRegistry,
    cancellation: &CancellationManager,
    tracing_adapter: &TracingAdapter,
) -> Response {
    let span = tracing_adapter.request_span(&request.method, request.id, request.headers.as_ref());
    let _entered = span.enter();

    let Some(handler) = registry.get(&request.method) else {
        return Response::error(request.id, format!("Method '{}' not found", request.method));
    };

    let tracked = cancellation.track(request.id);
    let signal = tracked.signal();

    let outcome = if handler.accepts_cancel() {
        handler.call(request.body, Some(signal.clone())).await
    } else {
        handler.call(request.body, None).await
    };

    drop(tracked);

    let mut response = match outcome {
        Ok(body) => {
            if let Err(cancelled) = signal.check() {
                Response::error(request.id, format!("Cancelled: {}", cancelled.reason))
            } else {
                Response::ok(request.id, body, None)
            }
        }
        Err(err) => {
            tracing_adapter.record_error(&span, err.as_ref());
            error!(method = %request.method, request_id = request.id, error = %err, "handler failed");
            Response::error(request.id, err.to_string())
        }
    };

    tracing_adapter.inject_headers(&span, &mut response.headers);
    response
}

fn is_broken_pipe(err: &crate::error::FramingError) -> bool {
    matches!(
        err,
        crate::error::FramingError::Io(io_err) if io_err.kind() == std::io::ErrorKind::BrokenPipe
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::JsonStdlibCodec;
    use crate::config::TracingConfig;
    use serde_json::json;
    use tokio::io::duplex;

    fn test_tracing_adapter() -> TracingAdapter {
        let config = TracingConfig {
            enabled: false,
            service_name: "test".into(),
            console_exporter: false,
        };
        TracingAdapter::new(&config, "test-worker")
    }

    #[tokio::test]
    async fn unknown_method_yields_not_found_error() {
        let registry = HandlerRegistry::with_builtins();
        let cancellation = CancellationManager::new();
        let request = Request {
            id: 2,
            method: "nope".into(),
            body: json!(null),
            headers: None,
        };
        let response = dispatch_one(request, &registry, &cancellation, &test_tracing_adapter()).await;
        assert!(!response.ok);
        assert_eq!(response.error.unwrap(), "Method 'nope' not found");
    }

    #[tokio::test]
    async fn health_request_round_trips_through_the_connection() {
        let (client, server) = duplex(4096);
        let (mut client_read, mut client_write) = tokio::io::split(client);
        let (server_read, server_write) = tokio::io::split(server);

        let registry = Arc::new(HandlerRegistry::with_builtins());
        let codec: Arc<dyn Codec> = Arc::new(JsonStdlibCodec);
        tokio::spawn(serve_connection(
            server_read,
            server_write,
            codec.clone(),
            registry,
            test_tracing_adapter(),
            1024 * 1024,
        ));

        let request = json!({"id": 1, "method": "health", "body": {}});
        let encoded = codec.encode(&request).unwrap();
        write_frame(&mut client_write, &encoded).await.unwrap();

        let reply_bytes = read_frame(&mut client_read, 1024 * 1024).await.unwrap().unwrap();
        let reply = codec.decode(&reply_bytes).unwrap();
        assert_eq!(reply["id"], 1);
        assert_eq!(reply["ok"], true);
        assert_eq!(reply["body"]["status"], "healthy");
    }
}
