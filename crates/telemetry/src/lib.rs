//! Structured logging and optional OpenTelemetry wiring for the loom
//! runtime.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter, Registry};

#[cfg(feature = "otel")]
pub mod policy_observer;

/// Errors raised while initializing telemetry.
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// OpenTelemetry pipeline setup failed.
    #[error("otel setup failed: {0}")]
    Otel(String),
}

/// Initialize structured JSON logging with an env filter. Set `RUST_LOG`,
/// e.g. `"info,orchestrator=debug"`.
pub fn init_json_logging() {
    let fmt_layer = fmt::layer().json().with_current_span(true).with_span_list(true);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = Registry::default().with(filter).with(fmt_layer);
    tracing::subscriber::set_global_default(subscriber).ok();
}

/// Initialize an OpenTelemetry tracer (behind the `otel` feature). Does not
/// hook the tracer into the `tracing` subscriber; callers that want both
/// call this alongside [`init_json_logging`].
#[cfg(feature = "otel")]
pub fn init_otel(service_name: &str) -> Result<(), TelemetryError> {
    use opentelemetry::KeyValue;
    use opentelemetry_sdk::trace as sdktrace;
    use opentelemetry_sdk::{runtime, Resource};

    let resource = Resource::new(vec![KeyValue::new("service.name", service_name.to_owned())]);
    let _tracer_provider = opentelemetry_otlp::new_pipeline()
        .tracing()
        .with_exporter(opentelemetry_otlp::new_exporter().http())
        .with_trace_config(sdktrace::config().with_resource(resource))
        .install_batch(runtime::Tokio)
        .map_err(|e| TelemetryError::Otel(e.to_string()))?;
    Ok(())
}

#[cfg(feature = "otel")]
pub mod metrics {
    //! OTel metrics (OTLP) for run-level budget usage.
    use super::TelemetryError;
    use once_cell::sync::OnceCell;
    use opentelemetry::global;
    use opentelemetry::metrics::{Counter, Meter};

    static METRICS_INIT: OnceCell<()> = OnceCell::new();

    fn detect_service_name() -> String {
        std::env::var("OTEL_SERVICE_NAME")
            .or_else(|_| std::env::var("LOOM_SERVICE_NAME"))
            .unwrap_or_else(|_| "orchestrator".to_string())
    }

    fn init_metrics_from_env() -> Result<(), TelemetryError> {
        let _svc = detect_service_name();
        let provider = opentelemetry_otlp::new_pipeline()
            .metrics(opentelemetry_sdk::runtime::Tokio)
            .with_exporter(opentelemetry_otlp::new_exporter().http())
            .build()
            .map_err(|e| TelemetryError::Otel(e.to_string()))?;
        global::set_meter_provider(provider);
        Ok(())
    }

    /// Initialize (idempotent) the global metrics provider from env.
    fn ensure_metrics_provider() {
        let _ = METRICS_INIT.get_or_init(|| {
            let _ = init_metrics_from_env();
        });
    }

    /// OTel counters for the three budget dimensions the runtime enforces.
    #[derive(Clone)]
    pub struct BudgetInstruments {
        turns: Counter<u64>,
        retries: Counter<u64>,
        replans: Counter<u64>,
    }

    impl BudgetInstruments {
        /// Record one turn having been used.
        pub fn record_turn(&self) {
            self.turns.add(1, &[]);
        }
        /// Record one retry attempt having been used.
        pub fn record_retry(&self) {
            self.retries.add(1, &[]);
        }
        /// Record one replan having been applied.
        pub fn record_replan(&self) {
            self.replans.add(1, &[]);
        }
    }

    /// Initialize the run-level budget instruments.
    pub fn init_budget_instruments() -> BudgetInstruments {
        ensure_metrics_provider();
        let meter: Meter = global::meter("loom.budget");
        BudgetInstruments {
            turns: meter.u64_counter("loom.turns.used").with_description("Turns consumed").init(),
            retries: meter
                .u64_counter("loom.retries.used")
                .with_description("Per-task retries consumed")
                .init(),
            replans: meter
                .u64_counter("loom.replans.used")
                .with_description("Replans applied")
                .init(),
        }
    }
}

/// In-process budget counters, mirrored locally when the `otel` feature is
/// off or an exporter is unreachable; always available so the runtime can
/// report usage without depending on the feature flag.
#[derive(Clone, Default)]
pub struct BudgetMetrics {
    turns_used: Arc<AtomicU64>,
    retries_used: Arc<AtomicU64>,
    replans_used: Arc<AtomicU64>,
}

impl BudgetMetrics {
    /// Construct empty counters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one turn having been used.
    pub fn record_turn(&self) {
        self.turns_used.fetch_add(1, Ordering::Relaxed);
    }

    /// Record one retry attempt having been used.
    pub fn record_retry(&self) {
        self.retries_used.fetch_add(1, Ordering::Relaxed);
    }

    /// Record one replan having been applied.
    pub fn record_replan(&self) {
        self.replans_used.fetch_add(1, Ordering::Relaxed);
    }

    /// Current `(turns, retries, replans)` counts.
    #[must_use]
    pub fn snapshot(&self) -> (u64, u64, u64) {
        (
            self.turns_used.load(Ordering::Relaxed),
            self.retries_used.load(Ordering::Relaxed),
            self.replans_used.load(Ordering::Relaxed),
        )
    }
}
