use clap::{Parser, ValueEnum};

use pyproc_worker::{install_global_subscriber, HandlerRegistry, TracingConfig, Worker, WorkerError};

/// Co-process RPC worker: accepts framed calls over a Unix domain socket
/// and dispatches them to the built-in `health` handler (embedders link
/// their own binary against the `pyproc-worker` library to register more).
#[derive(Parser, Debug)]
#[command(name = "pyproc-worker", about = "Co-process RPC worker over a Unix domain socket")]
struct Args {
    /// Path to the Unix domain socket to listen on. Falls back to
    /// PYPROC_SOCKET_PATH if omitted.
    #[arg(long)]
    socket_path: Option<String>,

    /// Codec to use: auto, json, json-fast, structured-json, or msgpack.
    /// PYPROC_CODEC_TYPE always overrides this flag (see the crate docs).
    #[arg(long)]
    codec: Option<String>,

    /// Log verbosity.
    #[arg(long, value_enum, default_value_t = LogLevel::Info)]
    log_level: LogLevel,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl LogLevel {
    /// `tracing`'s `EnvFilter` spells the warning level `warn`, not
    /// `warning`; translate the CLI's spec-mandated spelling to it.
    fn as_filter_directive(self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warning => "warn",
            LogLevel::Error => "error",
        }
    }
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let tracing_config = TracingConfig::from_env();
    install_global_subscriber(args.log_level.as_filter_directive(), &tracing_config);

    let registry = HandlerRegistry::with_builtins();

    let worker = match Worker::new(args.socket_path, args.codec.as_deref(), registry) {
        Ok(worker) => worker,
        Err(err) => {
            eprintln!("pyproc-worker: configuration error: {err}");
            std::process::exit(1);
        }
    };

    if let Err(err) = worker.run().await {
        let code = match err {
            WorkerError::Bind { .. } => 2,
            _ => 1,
        };
        eprintln!("pyproc-worker: {err}");
        std::process::exit(code);
    }
}
