//! OpenTelemetry export for nanogit.
//!
//! Export activates from the standard OTel environment variables:
//!
//! ```bash
//! OTEL_EXPORTER_OTLP_ENDPOINT=http://localhost:4317 nanogit server
//! ```
//!
//! Set `OTEL_SDK_DISABLED=true` to turn it off even when an endpoint is set.
//! Without the `telemetry` feature only [`otel_enabled`] and
//! [`sample_rate`] are available.

#[cfg(feature = "telemetry")]
mod otel;

#[cfg(feature = "telemetry")]
pub use otel::{otel_layer, OtelGuard};

/// Whether the environment asks for OTel export.
///
/// True when `OTEL_SDK_DISABLED` is not `"true"` and either
/// `OTEL_EXPORTER_OTLP_ENDPOINT` is set or `OTEL_TRACES_EXPORTER` is set to
/// something other than `"none"`.
pub fn otel_enabled() -> bool {
    enabled_from(
        std::env::var("OTEL_SDK_DISABLED").ok().as_deref(),
        std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").ok().as_deref(),
        std::env::var("OTEL_TRACES_EXPORTER").ok().as_deref(),
    )
}

fn enabled_from(disabled: Option<&str>, endpoint: Option<&str>, exporter: Option<&str>) -> bool {
    if disabled.is_some_and(|v| v.eq_ignore_ascii_case("true")) {
        return false;
    }
    if endpoint.is_some() {
        return true;
    }
    exporter.is_some_and(|e| !e.eq_ignore_ascii_case("none"))
}

/// Sampling rate for a span name.
///
/// | Span         | Rate |
/// |--------------|------|
/// | `connection` | 100% |
/// | `channel`    | 100% |
/// | other        |  10% |
pub fn sample_rate(name: &str) -> f64 {
    if name == "connection" || name == "channel" {
        1.0
    } else {
        0.1
    }
}
