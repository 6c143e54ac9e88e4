#![allow(clippy::module_name_repetitions)]

use loom_core::GateStatus;
use once_cell::sync::OnceCell;
use opentelemetry::global;
use opentelemetry::metrics::{Counter, Meter};
use opentelemetry::KeyValue;

struct Instruments {
    counter: Counter<u64>,
}

static INSTR: OnceCell<Instruments> = OnceCell::new();

fn ensure_instruments() -> &'static Instruments {
    INSTR.get_or_init(|| {
        // Use the global meter provider (may be a no-op if OTLP not initialized).
        let meter: Meter = global::meter("loom.gate");
        let counter = meter
            .u64_counter("gate.decision.count")
            .with_description("Gate decision counter")
            .init();
        Instruments { counter }
    })
}

/// OTel-backed observer for Gate decisions.
#[derive(Clone, Copy, Debug, Default)]
pub struct OtelGateObserver;

impl policy::GateObserver for OtelGateObserver {
    fn on_decision(&self, change_type: &str, result: &loom_core::GateResult) {
        let inst = ensure_instruments();
        let status_str = match result.status {
            GateStatus::Approved => "approved",
            GateStatus::Denied => "denied",
            GateStatus::NeedsUserReview => "needs_user_review",
        };
        let attrs = [
            KeyValue::new("change_type", change_type.to_string()),
            KeyValue::new("status", status_str.to_string()),
        ];
        inst.counter.add(1, &attrs);
    }
}

/// Return an observer instance. Prefer a new value instead of &'static for simplicity.
pub fn global() -> OtelGateObserver {
    let _ = ensure_instruments();
    OtelGateObserver
}
