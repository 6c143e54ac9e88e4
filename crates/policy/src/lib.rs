//! Deterministic, fail-closed evaluation of a proposed plan change against a
//! run's policy.
//!
//! The Gate never negotiates: the same `(request, policy, current_task_count)`
//! triple always yields the same [`GateResult`]. Rules are evaluated in a
//! fixed order and the first one that applies decides the outcome; unknown
//! change types are denied rather than defaulted to approval.
//!
//! Observability mirrors the rest of the workspace: every decision emits a
//! low-cardinality counter `policy.decision.count{change_type,status}`, an
//! optional [`GateObserver`] can be installed to watch decisions in-process,
//! and a process-global [`AuditSink`] captures [`AuditRecord`]s for tests.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use loom_core::{ChangeType, GateResult, GateStatus, PatchOp, PlanChangeRequest, Policy};
use once_cell::sync::OnceCell;
use regex::Regex;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

/// Observer invoked for each Gate decision.
///
/// Install an implementation via [`set_observer`] to receive callbacks.
/// Implementations must be cheap and non-blocking; this hook is primarily
/// intended for tests and in-process metrics.
pub trait GateObserver: Send + Sync {
    /// Called on every decision with the request's change type as text.
    fn on_decision(&self, change_type: &str, result: &GateResult);
}

static OBSERVER: OnceCell<RwLock<Option<Arc<dyn GateObserver>>>> = OnceCell::new();

/// Install or clear the global Gate observer used by this crate.
pub fn set_observer(observer: Option<Box<dyn GateObserver>>) {
    let cell = OBSERVER.get_or_init(|| RwLock::new(None));
    let mut w = cell.write().expect("observer write lock poisoned");
    *w = observer.map(Arc::from);
}

/// In-process counters for Gate decisions keyed by `{change_type, status}`.
/// Low-cardinality by construction; not persisted across process restarts.
#[derive(Default)]
pub struct GateMetrics {
    inner: Mutex<HashMap<String, u64>>,
}

impl GateMetrics {
    /// Read the current count for a given `{change_type, status}` pair.
    #[must_use]
    pub fn decision_counter(&self, change_type: &str, status: &str) -> u64 {
        let key = format!("{change_type}:{status}");
        self.inner.lock().expect("metrics lock poisoned").get(&key).copied().unwrap_or(0)
    }

    fn inc(&self, change_type: &str, status: &str) {
        let mut g = self.inner.lock().expect("metrics lock poisoned");
        *g.entry(format!("{change_type}:{status}")).or_insert(0) += 1;
    }
}

static METRICS: OnceCell<GateMetrics> = OnceCell::new();

/// Access the global Gate metrics registry.
pub fn gate_metrics() -> &'static GateMetrics {
    METRICS.get_or_init(GateMetrics::default)
}

/// Audit record for a single Gate decision.
#[derive(Debug, Clone)]
pub struct AuditRecord {
    /// The request's change type, as text.
    pub change_type: String,
    /// The resulting status.
    pub status: GateStatus,
    /// The result's reason.
    pub reason: String,
}

/// Handle for draining captured audit records. Cheap to clone; thread-safe.
#[derive(Clone)]
pub struct AuditSink {
    inner: Arc<Mutex<Vec<AuditRecord>>>,
}

impl AuditSink {
    /// Drain and return all captured audit records.
    pub fn drain(&self) -> Vec<AuditRecord> {
        let mut g = self.inner.lock().expect("audit lock poisoned");
        std::mem::take(&mut *g)
    }
}

static AUDIT: OnceCell<AuditSink> = OnceCell::new();

/// Install (or retrieve) the process-global audit sink.
pub fn install_audit_sink() -> AuditSink {
    AUDIT
        .get_or_init(|| AuditSink { inner: Arc::new(Mutex::new(Vec::new())) })
        .clone()
}

fn status_str(status: GateStatus) -> &'static str {
    match status {
        GateStatus::Approved => "approved",
        GateStatus::Denied => "denied",
        GateStatus::NeedsUserReview => "needs_user_review",
    }
}

fn change_type_str(change_type: ChangeType) -> &'static str {
    match change_type {
        ChangeType::ReorderTasks => "reorder_tasks",
        ChangeType::AddTask => "add_task",
        ChangeType::RemoveTask => "remove_task",
        ChangeType::EditTask => "edit_task",
        ChangeType::ScopeReduce => "scope_reduce",
        ChangeType::ScopeExpand => "scope_expand",
        ChangeType::ReplaceTech => "replace_tech",
        ChangeType::RelaxAcceptance => "relax_acceptance",
    }
}

fn notify_observers_and_record(change_type: &str, result: &GateResult) {
    gate_metrics().inc(change_type, status_str(result.status));
    if let Some(lock) = OBSERVER.get() {
        if let Ok(r) = lock.read() {
            if let Some(obs) = r.as_ref() {
                obs.on_decision(change_type, result);
            }
        }
    }
    if let Some(sink) = AUDIT.get() {
        let mut g = sink.inner.lock().expect("audit lock poisoned");
        g.push(AuditRecord {
            change_type: change_type.to_string(),
            status: result.status,
            reason: result.reason.clone(),
        });
    }
}

/// The deterministic Gate. Stateless: every call depends only on its
/// arguments.
#[derive(Debug, Clone, Copy, Default)]
pub struct Engine;

impl Engine {
    /// Construct a new `Engine`.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Evaluate `request` against `policy`, given the plan's current task
    /// count, and return the Gate's verdict. Rules are evaluated in a fixed
    /// order; the first applicable rule decides the outcome.
    #[must_use]
    pub fn evaluate(
        &self,
        request: &PlanChangeRequest,
        policy: &Policy,
        current_task_count: u64,
    ) -> GateResult {
        let result = self.evaluate_inner(request, policy, current_task_count);
        notify_observers_and_record(change_type_str(request.change_type), &result);
        result
    }

    fn evaluate_inner(
        &self,
        request: &PlanChangeRequest,
        policy: &Policy,
        current_task_count: u64,
    ) -> GateResult {
        // Rule 1: disallowed tools.
        if request
            .requested_tools
            .iter()
            .any(|t| !policy.safety.allowed_tools.iter().any(|allowed| allowed == t))
        {
            return GateResult::denied("request names a tool outside the allowed set");
        }

        let has_edit_acceptance = request.patch.iter().any(|op| matches!(op, PatchOp::EditAcceptance { .. }));
        let has_edit_tech_stack = request.patch.iter().any(|op| matches!(op, PatchOp::EditTechStack { .. }));

        // Rule 2: edit_acceptance without explicit allowance.
        if has_edit_acceptance && !policy.user_explicitly_allowed_relax_acceptance {
            return GateResult::denied("acceptance criteria are locked");
        }

        // Rule 3: edit_tech_stack while the tech stack is locked.
        if has_edit_tech_stack && policy.tech_stack_locked {
            return GateResult::denied("tech stack is locked");
        }

        // Rule 4: relax_acceptance without explicit allowance.
        if request.change_type == ChangeType::RelaxAcceptance
            && !policy.user_explicitly_allowed_relax_acceptance
        {
            return GateResult::denied("relaxing acceptance criteria requires explicit user allowance");
        }

        match request.change_type {
            // Rule 5: reorder_tasks.
            ChangeType::ReorderTasks => {
                if has_edit_acceptance || has_edit_tech_stack {
                    GateResult::denied("reorder_tasks may not bundle acceptance or tech-stack edits")
                } else {
                    GateResult::approved("structural reorder, no scope or stack change")
                }
            }
            // Rule 6: scope_reduce.
            ChangeType::ScopeReduce => GateResult::approved("scope reduction is always permitted"),
            // Rule 7: add_task.
            ChangeType::AddTask => {
                let steps_delta = request.impact.steps_delta.max(0) as u64;
                let within_budget = current_task_count + steps_delta <= policy.budgets.max_steps;
                let debug_signal = has_debug_style_signal(request);
                if within_budget && debug_signal {
                    GateResult::approved("within step budget and carries a debug-style signal")
                } else {
                    GateResult::needs_user_review(
                        "add_task outside the auto-approve envelope",
                        vec!["failure evidence".into(), "step impact estimate".into()],
                    )
                }
            }
            // Rule 8: scope_expand.
            ChangeType::ScopeExpand => GateResult::needs_user_review(
                "scope expansion always requires review",
                vec!["impact estimate".into(), "approval note".into()],
            ),
            // Rule 9: replace_tech.
            ChangeType::ReplaceTech => {
                let has_enough_evidence = request.evidence.len() >= 2;
                let has_migration_hint = migration_hint_re().is_match(&request.impact.risk);
                if has_enough_evidence && has_migration_hint {
                    GateResult::needs_user_review(
                        "tech replacement evidenced and risk-assessed, still requires approval",
                        vec!["approval note".into()],
                    )
                } else {
                    GateResult::needs_user_review(
                        "tech replacement lacks sufficient evidence or migration-impact assessment",
                        vec!["two failures".into(), "migration impact".into()],
                    )
                }
            }
            // Rule 10: remove_task, edit_task.
            ChangeType::RemoveTask | ChangeType::EditTask => {
                GateResult::approved("structural edit permitted by default")
            }
            // RelaxAcceptance reaching here has already passed rule 4's check.
            ChangeType::RelaxAcceptance => {
                GateResult::approved("acceptance relaxation explicitly allowed by the user")
            }
        }
    }
}

fn has_debug_style_signal(request: &PlanChangeRequest) -> bool {
    if debug_reason_re().is_match(&request.reason) {
        return true;
    }
    request.patch.iter().any(|op| match op {
        PatchOp::AddTask { task, .. } => task.task_type.is_debug_style(),
        _ => false,
    })
}

fn debug_reason_re() -> &'static Regex {
    static RE: OnceCell<Regex> = OnceCell::new();
    RE.get_or_init(|| Regex::new(r"(?i)debug|repair|verify|test|build").expect("valid regex"))
}

fn migration_hint_re() -> &'static Regex {
    static RE: OnceCell<Regex> = OnceCell::new();
    RE.get_or_init(|| Regex::new(r"(?i)migrat|impact|compat|risk").expect("valid regex"))
}
