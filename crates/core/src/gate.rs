//! Policy data model and gate verdict types. The deterministic
//! evaluation logic that produces a [`GateResult`] lives in the `policy`
//! crate; this crate only defines the shapes it operates on.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Budget limits enforced by the Turn Loop/Runtime and consulted by the
/// Gate.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Budgets {
    /// Maximum number of tasks a plan may contain.
    pub max_steps: u64,
    /// Maximum tool actions per task attempt.
    pub max_actions_per_task: u64,
    /// Maximum retry attempts per task before a replan is triggered.
    pub max_retries_per_task: u64,
    /// Maximum number of replans applied over the life of a run.
    pub max_replans: u64,
}

/// Acceptance-criteria lock state and, optionally, the locked criteria
/// themselves.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Acceptance {
    /// Whether acceptance criteria are locked against relaxation.
    pub locked: bool,
    /// The locked criteria, if the caller wants them recorded.
    #[serde(default)]
    pub criteria: Option<Vec<String>>,
}

/// Safety constraints on what the executor may invoke.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Safety {
    /// Tool names the executor is permitted to invoke.
    pub allowed_tools: Vec<String>,
    /// Shell commands permitted for `command`-kind success criteria.
    pub allowed_commands: Vec<String>,
}

/// The full policy governing one run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Policy {
    /// Opaque declared tech stack (framework/runtime choices).
    pub tech_stack: HashMap<String, Value>,
    /// Whether `edit_tech_stack` patches are denied outright.
    pub tech_stack_locked: bool,
    /// Acceptance-criteria lock state.
    pub acceptance: Acceptance,
    /// Tool/command safety constraints.
    pub safety: Safety,
    /// Budget limits.
    pub budgets: Budgets,
    /// Whether the user has explicitly authorized `relax_acceptance`
    /// changes and `edit_acceptance` patches despite a lock.
    pub user_explicitly_allowed_relax_acceptance: bool,
}

/// The Gate's verdict on a proposed plan change.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum GateStatus {
    /// The change may be applied without further review.
    Approved,
    /// The change is rejected; the run fails.
    Denied,
    /// The change requires a human reviewer's structured decision.
    NeedsUserReview,
}

/// The result of evaluating a [`crate::patch::PlanChangeRequest`] against a
/// [`Policy`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GateResult {
    /// The verdict.
    pub status: GateStatus,
    /// Human-readable reason for the verdict.
    pub reason: String,
    /// Guidance for a resubmission, if applicable.
    pub guidance: Option<String>,
    /// Evidence a human reviewer (or a resubmission) would need to provide.
    pub required_evidence: Vec<String>,
}

impl GateResult {
    /// Construct an `approved` result.
    #[must_use]
    pub fn approved(reason: impl Into<String>) -> Self {
        Self { status: GateStatus::Approved, reason: reason.into(), guidance: None, required_evidence: Vec::new() }
    }

    /// Construct a `denied` result.
    #[must_use]
    pub fn denied(reason: impl Into<String>) -> Self {
        Self { status: GateStatus::Denied, reason: reason.into(), guidance: None, required_evidence: Vec::new() }
    }

    /// Construct a `needs_user_review` result with the given required
    /// evidence.
    #[must_use]
    pub fn needs_user_review(reason: impl Into<String>, required_evidence: Vec<String>) -> Self {
        Self {
            status: GateStatus::NeedsUserReview,
            reason: reason.into(),
            guidance: None,
            required_evidence,
        }
    }

    /// Attach guidance text.
    #[must_use]
    pub fn with_guidance(mut self, guidance: impl Into<String>) -> Self {
        self.guidance = Some(guidance.into());
        self
    }
}
