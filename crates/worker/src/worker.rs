use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::net::UnixListener;
use tracing::{error, info};

use crate::codec::resolve_codec;
use crate::config::WorkerConfig;
use crate::dispatch::serve_connection;
use crate::error::WorkerError;
use crate::registry::HandlerRegistry;
use crate::tracing_adapter::TracingAdapter;

/// The subordinate RPC process itself (C6): owns the listening socket,
/// accepts connections one at a time, and runs each through [`serve_connection`]
/// until a shutdown signal arrives.
pub struct Worker {
    socket_path: PathBuf,
    codec_name: String,
    max_frame_bytes: u32,
    registry: Arc<HandlerRegistry>,
    tracing_adapter: TracingAdapter,
}

impl Worker {
    /// Builds a worker from explicit arguments, falling back to environment
    /// variables and defaults per the precedence rules in §4.8. `registry`
    /// is the caller's handler table; the built-in `health` handler should
    /// already be present if constructed via [`HandlerRegistry::with_builtins`].
    pub fn new(
        socket_path: Option<String>,
        codec_name: Option<&str>,
        registry: HandlerRegistry,
    ) -> Result<Self, WorkerError> {
        let config = WorkerConfig::resolve(socket_path, codec_name)?;
        // Validated eagerly so an unknown codec name fails construction
        // rather than surfacing on the first connection.
        resolve_codec(&config.codec_name).map_err(WorkerError::InvalidCodec)?;

        let worker_id = format!("pyproc-worker-{}", std::process::id());
        let tracing_adapter = TracingAdapter::new(&config.tracing, worker_id);

        Ok(Self {
            socket_path: PathBuf::from(config.socket_path),
            codec_name: config.codec_name,
            max_frame_bytes: config.max_frame_bytes,
            registry: Arc::new(registry),
            tracing_adapter,
        })
    }

    /// Binds the socket (unlinking a stale file first), then accepts
    /// connections sequentially until `tokio::signal` delivers SIGINT or
    /// SIGTERM. Each connection is serviced to completion before the next
    /// `accept()` call, per the single-active-connection non-goal.
    pub async fn run(&self) -> Result<(), WorkerError> {
        unlink_stale(&self.socket_path)?;
        let listener = UnixListener::bind(&self.socket_path).map_err(|source| WorkerError::Bind {
            path: self.socket_path.clone(),
            source,
        })?;
        info!(socket_path = %self.socket_path.display(), codec = %self.codec_name, "worker listening");

        let mut shutdown = shutdown_signal();
        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, _addr)) => {
                            let (read_half, write_half) = stream.into_split();
                            let codec = resolve_codec(&self.codec_name)
                                .expect("codec name validated at construction")
                                .into();
                            serve_connection(
                                read_half,
                                write_half,
                                codec,
                                self.registry.clone(),
                                self.tracing_adapter.clone(),
                                self.max_frame_bytes,
                            )
                            .await;
                        }
                        Err(err) => {
                            error!(error = %err, "failed to accept connection, continuing");
                        }
                    }
                }
                _ = &mut shutdown => {
                    info!("shutdown signal received");
                    break;
                }
            }
        }

        let _ = std::fs::remove_file(&self.socket_path);
        Ok(())
    }
}

fn unlink_stale(path: &Path) -> Result<(), WorkerError> {
    if path.exists() {
        std::fs::remove_file(path).map_err(|source| WorkerError::UnlinkStaleSocket {
            path: path.to_path_buf(),
            source,
        })?;
    }
    Ok(())
}

fn shutdown_signal() -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>> {
    Box::pin(async {
        let mut sigterm = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(signal) => signal,
            Err(_) => {
                // No SIGTERM support on this platform; fall back to ctrl_c only.
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::HandlerRegistry;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn unknown_codec_fails_construction() {
        let result = Worker::new(
            Some("/tmp/pyproc-test-unused.sock".into()),
            Some("not-a-codec"),
            HandlerRegistry::with_builtins(),
        );
        assert!(matches!(result, Err(WorkerError::InvalidCodec(_))));
    }

    #[tokio::test]
    async fn unlink_stale_removes_an_existing_socket_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stale.sock");
        std::fs::write(&path, b"").unwrap();
        assert!(path.exists());
        unlink_stale(&path).unwrap();
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn binds_accepts_and_answers_health() {
        let dir = tempfile::tempdir().unwrap();
        let socket_path = dir.path().join("worker.sock");

        let worker = Worker::new(
            Some(socket_path.to_str().unwrap().to_string()),
            Some("json"),
            HandlerRegistry::with_builtins(),
        )
        .unwrap();

        let run_handle = tokio::spawn(async move {
            let _ = worker.run().await;
        });

        // Give the accept loop a moment to bind.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let mut stream = tokio::net::UnixStream::connect(&socket_path).await.unwrap();
        let body = serde_json::json!({"id": 1, "method": "health", "body": {}});
        let encoded = serde_json::to_vec(&body).unwrap();
        stream.write_all(&(encoded.len() as u32).to_be_bytes()).await.unwrap();
        stream.write_all(&encoded).await.unwrap();

        let mut header = [0u8; 4];
        stream.read_exact(&mut header).await.unwrap();
        let len = u32::from_be_bytes(header) as usize;
        let mut buf = vec![0u8; len];
        stream.read_exact(&mut buf).await.unwrap();
        let reply: serde_json::Value = serde_json::from_slice(&buf).unwrap();
        assert_eq!(reply["ok"], true);

        run_handle.abort();
    }
}
