//! Tracing subscriber setup.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Default for `--loglevel`: warn.
pub const DEFAULT_LOGLEVEL: u8 = 3;

/// Map the numeric `--loglevel` scale onto a filter directive.
///
/// `0=trace 1=debug 2=info 3=warn`; 4 (error), 5 (critical) and 6 (fatal) all
/// map to `error`.
pub fn level_directive(loglevel: u8) -> &'static str {
    match loglevel {
        0 => "trace",
        1 => "debug",
        2 => "info",
        3 => "warn",
        _ => "error",
    }
}

/// Keeps the OTel exporter alive; drop it last.
pub struct LoggingGuard {
    #[cfg(feature = "telemetry")]
    _otel: Option<nanogit_telemetry::OtelGuard>,
}

/// Install the global subscriber. `RUST_LOG` takes precedence over
/// `loglevel`. Call from inside the Tokio runtime.
pub fn init(loglevel: u8) -> LoggingGuard {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level_directive(loglevel)));

    let registry = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr));

    #[cfg(feature = "telemetry")]
    {
        if nanogit_telemetry::otel_enabled() {
            match nanogit_telemetry::otel_layer("nanogit") {
                Ok((otel_layer, guard)) => {
                    registry.with(otel_layer).init();
                    return LoggingGuard { _otel: Some(guard) };
                }
                Err(e) => {
                    registry.init();
                    tracing::warn!(error = %e, "OTel export disabled");
                    return LoggingGuard { _otel: None };
                }
            }
        }
        registry.init();
        LoggingGuard { _otel: None }
    }

    #[cfg(not(feature = "telemetry"))]
    {
        registry.init();
        LoggingGuard {}
    }
}
