use std::env;

use crate::error::WorkerError;

pub(crate) const SOCKET_PATH_ENV: &str = "PYPROC_SOCKET_PATH";
pub(crate) const CODEC_TYPE_ENV: &str = "PYPROC_CODEC_TYPE";
pub(crate) const TRACING_ENABLED_ENV: &str = "PYPROC_TRACING_ENABLED";
pub(crate) const SERVICE_NAME_ENV: &str = "PYPROC_SERVICE_NAME";
pub(crate) const TRACE_CONSOLE_ENV: &str = "PYPROC_TRACE_CONSOLE";

pub(crate) const DEFAULT_SERVICE_NAME: &str = "pyproc-worker";
pub(crate) const DEFAULT_MAX_FRAME_BYTES: u32 = 64 * 1024 * 1024;

/// Resolved configuration for a [`crate::Worker`], merging explicit
/// constructor arguments with environment overrides.
///
/// Precedence (highest to lowest): explicit argument, environment variable,
/// built-in default. The one deliberate exception is the codec, where
/// `PYPROC_CODEC_TYPE` always outranks the constructor argument so operators
/// can force a codec without recompiling or re-invoking the host.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub socket_path: String,
    pub codec_name: String,
    pub max_frame_bytes: u32,
    pub tracing: TracingConfig,
}

/// Tracing/observability knobs, all driven by environment variables per the
/// wire protocol's external-interfaces contract.
#[derive(Debug, Clone)]
pub struct TracingConfig {
    pub enabled: bool,
    pub service_name: String,
    pub console_exporter: bool,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

impl TracingConfig {
    pub fn from_env() -> Self {
        Self {
            enabled: env_flag(TRACING_ENABLED_ENV),
            service_name: env::var(SERVICE_NAME_ENV).unwrap_or_else(|_| DEFAULT_SERVICE_NAME.into()),
            console_exporter: env_flag(TRACE_CONSOLE_ENV),
        }
    }
}

impl WorkerConfig {
    /// Resolves a socket path and codec name, applying the environment
    /// overrides documented in the wire protocol's external-interfaces table.
    ///
    /// `socket_path` and `codec_name` are the values supplied by the caller
    /// (CLI flags or an explicit constructor argument); either may be `None`.
    pub fn resolve(
        socket_path: Option<String>,
        codec_name: Option<&str>,
    ) -> Result<Self, WorkerError> {
        let socket_path = socket_path
            .or_else(|| env::var(SOCKET_PATH_ENV).ok())
            .ok_or(WorkerError::MissingSocketPath)?;

        let codec_name = env::var(CODEC_TYPE_ENV)
            .ok()
            .or_else(|| codec_name.map(str::to_string))
            .unwrap_or_else(|| "auto".to_string());

        Ok(Self {
            socket_path,
            codec_name,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
            tracing: TracingConfig::from_env(),
        })
    }
}

fn env_flag(name: &str) -> bool {
    env::var(name)
        .map(|value| value.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}
