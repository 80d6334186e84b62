//! Tracing pipeline initialisation.
//!
//! Call [`init_tracing`] once at process startup.  Spans and events from the
//! fusion loop, the planners, and the sensors all flow through the subscriber
//! it installs.
//!
//! # Environment variables
//!
//! | Variable | Effect |
//! |---|---|
//! | `OTEL_EXPORTER_OTLP_ENDPOINT` | OTLP collector base URL (e.g. `http://localhost:4318`). When set, spans are exported over OTLP/HTTP. |
//! | `RUST_LOG` | Log filter (default `"info"`). |
//! | `LCDEPTH_LOG_FORMAT=json` | Emit newline-delimited JSON logs. |
//!
//! # Example
//!
//! ```rust,no_run
//! let _guard = lcdepth_runtime::telemetry::init_tracing("lcdepth");
//! ```

use opentelemetry::trace::TracerProvider as _;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{Resource, trace::SdkTracerProvider};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Console log encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Compact,
    Json,
}

impl LogFormat {
    /// `Json` when `LCDEPTH_LOG_FORMAT=json`, otherwise `Compact`.
    pub fn from_env() -> Self {
        match std::env::var("LCDEPTH_LOG_FORMAT").as_deref() {
            Ok("json") => LogFormat::Json,
            _ => LogFormat::Compact,
        }
    }
}

/// Install the global subscriber, with an OTLP exporter when configured.
///
/// A second call is a no-op for the subscriber (the first one wins) but still
/// returns a guard for any exporter it built.  Hold the returned
/// [`TracerProviderGuard`] for the lifetime of the process.
pub fn init_tracing(service_name: &str) -> TracerProviderGuard {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let use_json = LogFormat::from_env() == LogFormat::Json;
    let provider = build_provider(service_name);

    let otel = provider
        .as_ref()
        .map(|p| tracing_opentelemetry::layer().with_tracer(p.tracer("lcdepth")));

    let installed = tracing_subscriber::registry()
        .with(env_filter)
        .with(otel)
        .with(use_json.then(|| fmt::layer().json()))
        .with((!use_json).then(|| fmt::layer().compact()))
        .try_init();
    if let Err(e) = installed {
        eprintln!("[lcdepth] tracing subscriber already installed: {e}");
    }

    TracerProviderGuard(provider)
}

/// Shuts the OTel provider down on drop, flushing pending spans.
pub struct TracerProviderGuard(Option<SdkTracerProvider>);

impl TracerProviderGuard {
    /// Whether spans are being exported.
    pub fn is_exporting(&self) -> bool {
        self.0.is_some()
    }
}

impl Drop for TracerProviderGuard {
    fn drop(&mut self) {
        if let Some(provider) = self.0.take()
            && let Err(e) = provider.shutdown()
        {
            eprintln!("[lcdepth] OpenTelemetry provider shutdown error: {e}");
        }
    }
}

/// Build a provider when `OTEL_EXPORTER_OTLP_ENDPOINT` is set.
///
/// Exporter failures are printed and treated as "no exporter".
fn build_provider(service_name: &str) -> Option<SdkTracerProvider> {
    let endpoint = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").ok()?;

    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_http()
        .with_endpoint(endpoint)
        .build()
        .map_err(|e| eprintln!("[lcdepth] OTLP exporter init failed: {e}"))
        .ok()?;

    let resource = Resource::builder()
        .with_service_name(service_name.to_string())
        .build();

    // Simple exporter: the pipeline is synchronous and has no async runtime.
    Some(
        SdkTracerProvider::builder()
            .with_resource(resource)
            .with_simple_exporter(exporter)
            .build(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_endpoint_means_no_exporter() {
        // SAFETY: no other test in this crate touches this variable.
        unsafe { std::env::remove_var("OTEL_EXPORTER_OTLP_ENDPOINT") };
        assert!(build_provider("lcdepth-test").is_none());

        let guard = init_tracing("lcdepth-test");
        assert!(!guard.is_exporting());
        drop(guard);
    }

    #[test]
    fn log_format_defaults_to_compact() {
        // SAFETY: no other test in this crate touches this variable.
        unsafe { std::env::remove_var("LCDEPTH_LOG_FORMAT") };
        assert_eq!(LogFormat::from_env(), LogFormat::Compact);
        unsafe { std::env::set_var("LCDEPTH_LOG_FORMAT", "json") };
        assert_eq!(LogFormat::from_env(), LogFormat::Json);
        unsafe { std::env::remove_var("LCDEPTH_LOG_FORMAT") };
    }
}
