//! Deterministic time for the turn loop: audit timestamps are taken from a
//! `Clock` rather than `SystemTime` directly, so integration tests can drive
//! a run with injected timestamps instead of wall-clock time.

use std::sync::{Arc, Mutex, OnceLock, RwLock};

/// Clock abstraction for every timestamp the runtime records. Returns
/// milliseconds since UNIX epoch.
pub trait Clock: Send + Sync {
    /// Current time, in milliseconds since UNIX epoch.
    fn now_ms(&self) -> u64;
}

/// Production clock backed by `SystemTime`.
#[derive(Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        loom_core::ids::now_ms()
    }
}

/// Manually advanced clock for deterministic tests and replay.
pub struct VirtualClock {
    inner: Mutex<u64>,
}

impl VirtualClock {
    /// Create a virtual clock seeded at `start_ms`.
    #[must_use]
    pub fn new(start_ms: u64) -> Self {
        Self { inner: Mutex::new(start_ms) }
    }

    /// Advance the clock by `delta_ms`.
    pub fn advance_ms(&self, delta_ms: u64) {
        let mut g = self.inner.lock().expect("virtual clock lock poisoned");
        *g = g.saturating_add(delta_ms);
    }

    /// Set the clock to an absolute value.
    pub fn set_ms(&self, value: u64) {
        let mut g = self.inner.lock().expect("virtual clock lock poisoned");
        *g = value;
    }
}

impl Clock for VirtualClock {
    fn now_ms(&self) -> u64 {
        *self.inner.lock().expect("virtual clock lock poisoned")
    }
}

static PROCESS_CLOCK: OnceLock<RwLock<Arc<dyn Clock>>> = OnceLock::new();

fn cell() -> &'static RwLock<Arc<dyn Clock>> {
    PROCESS_CLOCK.get_or_init(|| RwLock::new(Arc::new(SystemClock)))
}

/// The current process-wide clock.
#[must_use]
pub fn process_clock() -> Arc<dyn Clock> {
    cell().read().expect("process clock lock poisoned").clone()
}

/// Swap the process-wide clock. Used by tests and replay to inject a
/// [`VirtualClock`].
pub fn set_process_clock(clock: Arc<dyn Clock>) {
    *cell().write().expect("process clock lock poisoned") = clock;
}
