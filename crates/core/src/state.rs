//! Run state: one `AgentState` per run, mutated in place by exactly one
//! logical thread of control through narrow setter helpers.

use crate::error::LastError;
use crate::patch::{PatchSummary, PlanChangeRequest};
use crate::plan::Plan;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Coarse run status. `status` is the only authoritative field; there is
/// deliberately no separate `phase` field to drift out of sync with it.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    /// A plan is being proposed or has just been proposed.
    Planning,
    /// A task action plan is being executed.
    Executing,
    /// Success criteria are being evaluated.
    Reviewing,
    /// A plan change is being proposed, gated, and applied.
    Replanning,
    /// The run completed successfully.
    Done,
    /// The run terminated without completing.
    Failed,
}

/// Outcome of a human plan-change review.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReviewDecisionKind {
    /// The reviewer approved the change.
    Approved,
    /// The reviewer denied the change.
    Denied,
}

/// A human (or automated-on-behalf-of-human) reviewer's structured
/// decision for a plan change escalated to `needs_user_review`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReviewDecision {
    /// The reviewer's decision.
    pub decision: ReviewDecisionKind,
    /// The reviewer's stated reason.
    pub reason: String,
    /// Optional guidance for the next plan-change attempt.
    pub guidance: Option<String>,
}

/// One append-only entry in a run's plan-change history. Entries always
/// appear in the order `initial -> change_request -> change_gate_result ->
/// [change_user_decision ->] change_applied -> next change_request -> ...`;
/// a rejected or budget-exhausted change stops before `change_applied`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PlanHistoryEntry {
    /// The plan this run started with.
    Initial {
        /// The initial plan.
        plan: Plan,
    },
    /// A raw plan-change request proposed by the planner.
    ChangeRequest {
        /// The request as proposed.
        request: PlanChangeRequest,
    },
    /// The Gate's decision on a change request.
    ChangeGateResult {
        /// The gate's verdict.
        status: crate::gate::GateStatus,
        /// The gate's reason.
        reason: String,
        /// Optional guidance.
        guidance: Option<String>,
        /// Evidence required before a resubmission could be approved.
        required_evidence: Vec<String>,
    },
    /// A human reviewer's decision on a change escalated by the Gate.
    ChangeUserDecision {
        /// The reviewer's decision.
        decision: ReviewDecision,
    },
    /// An approved change was applied to the plan.
    ChangeApplied {
        /// The plan version that resulted from applying the patch.
        plan_version: u64,
        /// Summary of what the patch did.
        summary: PatchSummary,
    },
}

/// Runtime flags surfaced by the LM transport collaborator.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Flags {
    /// Whether the transport reported that context was truncated.
    pub truncation: bool,
    /// The compaction threshold currently in effect, if any.
    pub compaction_threshold: Option<u64>,
}

/// Counters consumed against [`crate::policy::Policy`] budgets.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct BudgetsUsed {
    /// Turns consumed so far.
    pub turns: u64,
    /// Retries consumed per task id.
    pub retries_per_task: HashMap<String, u64>,
    /// Replans successfully applied so far.
    pub replans: u64,
}

/// The full mutable state of one run. Owned exclusively by the
/// runtime; the executor is the only writer for tool-result fields and
/// touched paths; the replanner is the only writer for `plan`,
/// `plan_version`, and `plan_history`. Enforced here by making every mutation
/// a named method rather than exposing public field writes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentState {
    status: Status,
    plan: Plan,
    plan_version: u64,
    completed: HashSet<String>,
    /// Last recorded criteria failures per task id.
    failure_history: HashMap<String, Vec<String>>,
    patch_paths: Vec<String>,
    touched_files: Vec<String>,
    last_lm_response_id: Option<String>,
    flags: Flags,
    budgets_used: BudgetsUsed,
    last_error: Option<LastError>,
    plan_history: Vec<PlanHistoryEntry>,
}

impl AgentState {
    /// Create a new state for a run that has just received its initial plan.
    #[must_use]
    pub fn new(plan: Plan) -> Self {
        let history = vec![PlanHistoryEntry::Initial { plan: plan.clone() }];
        Self {
            status: Status::Planning,
            plan,
            plan_version: 1,
            completed: HashSet::new(),
            failure_history: HashMap::new(),
            patch_paths: Vec::new(),
            touched_files: Vec::new(),
            last_lm_response_id: None,
            flags: Flags::default(),
            budgets_used: BudgetsUsed::default(),
            last_error: None,
            plan_history: history,
        }
    }

    /// Current status.
    #[must_use]
    pub fn status(&self) -> Status {
        self.status
    }

    /// Set the status. Any component may drive a legal transition; the
    /// runtime is the sole caller in practice.
    pub fn set_status(&mut self, status: Status) {
        self.status = status;
    }

    /// The current plan.
    #[must_use]
    pub fn plan(&self) -> &Plan {
        &self.plan
    }

    /// The current plan version (monotone, starts at 1).
    #[must_use]
    pub fn plan_version(&self) -> u64 {
        self.plan_version
    }

    /// Task ids completed so far.
    #[must_use]
    pub fn completed(&self) -> &HashSet<String> {
        &self.completed
    }

    /// True iff every task in the current plan has been completed.
    #[must_use]
    pub fn is_fully_complete(&self) -> bool {
        self.plan.tasks.iter().all(|t| self.completed.contains(&t.id))
    }

    /// Mark `task_id` as completed.
    pub fn mark_task_completed(&mut self, task_id: impl Into<String>) {
        self.completed.insert(task_id.into());
    }

    /// Record the most recent success-criteria failures for `task_id`,
    /// replacing any prior record for that task.
    pub fn record_task_failures(&mut self, task_id: impl Into<String>, failures: Vec<String>) {
        self.failure_history.insert(task_id.into(), failures);
    }

    /// The most recent recorded failures for `task_id`, if any.
    #[must_use]
    pub fn task_failures(&self, task_id: &str) -> Option<&[String]> {
        self.failure_history.get(task_id).map(Vec::as_slice)
    }

    /// All recorded failures, most recent per task (used to build failure
    /// evidence for the Replanner).
    #[must_use]
    pub fn failure_history(&self) -> &HashMap<String, Vec<String>> {
        &self.failure_history
    }

    /// Deduplicated, insertion-ordered touched paths across the run.
    #[must_use]
    pub fn touched_files(&self) -> &[String] {
        &self.touched_files
    }

    /// Merge newly touched paths into the run's deduplicated, ordered list.
    /// Executor-only in practice.
    pub fn record_touched_paths<I: IntoIterator<Item = String>>(&mut self, paths: I) {
        for p in paths {
            if !self.touched_files.contains(&p) {
                self.touched_files.push(p);
            }
        }
    }

    /// Paths produced as a side effect of applying a patch (distinct from
    /// `touched_files`, which covers all tool-driven writes).
    #[must_use]
    pub fn patch_paths(&self) -> &[String] {
        &self.patch_paths
    }

    /// Record a newly introduced patch path. Executor-only in practice.
    pub fn record_patch_path(&mut self, path: impl Into<String>) {
        let path = path.into();
        if !self.patch_paths.contains(&path) {
            self.patch_paths.push(path);
        }
    }

    /// The LM response id from the most recently completed call, if any.
    #[must_use]
    pub fn last_lm_response_id(&self) -> Option<&str> {
        self.last_lm_response_id.as_deref()
    }

    /// Record the response id of the most recently completed LM call.
    pub fn set_last_lm_response_id(&mut self, id: impl Into<String>) {
        self.last_lm_response_id = Some(id.into());
    }

    /// Transport-reported flags (truncation, compaction threshold).
    #[must_use]
    pub fn flags(&self) -> &Flags {
        &self.flags
    }

    /// Update transport-reported flags.
    pub fn set_flags(&mut self, flags: Flags) {
        self.flags = flags;
    }

    /// Budget counters consumed so far.
    #[must_use]
    pub fn budgets_used(&self) -> &BudgetsUsed {
        &self.budgets_used
    }

    /// Mark one turn as used.
    pub fn mark_turn_used(&mut self, turn: u64) {
        self.budgets_used.turns = turn;
    }

    /// Record a consumed retry attempt for `task_id`.
    pub fn mark_retry_used(&mut self, task_id: impl Into<String>) {
        *self.budgets_used.retries_per_task.entry(task_id.into()).or_insert(0) += 1;
    }

    /// Retries consumed so far for `task_id`.
    #[must_use]
    pub fn retries_used(&self, task_id: &str) -> u64 {
        self.budgets_used.retries_per_task.get(task_id).copied().unwrap_or(0)
    }

    /// The last error observed, if the run has failed or recovered from one.
    #[must_use]
    pub fn last_error(&self) -> Option<&LastError> {
        self.last_error.as_ref()
    }

    /// Record a terminal or task-level error. Does not itself transition
    /// `status`; callers that intend the error to be terminal should also
    /// call [`AgentState::set_status`] with [`Status::Failed`].
    pub fn set_state_error(&mut self, error: LastError) {
        self.last_error = Some(error);
    }

    /// The full append-only plan-change history.
    #[must_use]
    pub fn plan_history(&self) -> &[PlanHistoryEntry] {
        &self.plan_history
    }

    /// Append a plan-history entry. Replanner-only in practice.
    pub fn push_plan_history(&mut self, entry: PlanHistoryEntry) {
        self.plan_history.push(entry);
    }

    /// Apply a validated replacement plan, bump `plan_version`, record the
    /// replan against the budget, and append the `change_applied`
    /// `plan_history` entry carrying `summary`. Replanner-only: this is the
    /// sole path by which `plan`, `plan_version`, `plan_history`, and
    /// `budgets_used.replans` change after run start.
    pub fn apply_replanned_plan(&mut self, new_plan: Plan, summary: PatchSummary) {
        self.plan = new_plan;
        self.plan_version += 1;
        self.budgets_used.replans += 1;
        self.plan_history.push(PlanHistoryEntry::ChangeApplied {
            plan_version: self.plan_version,
            summary,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::{SuccessCriterion, Task, TaskType};

    fn sample_plan() -> Plan {
        Plan::new(
            "goal",
            vec![Task {
                id: "t1".into(),
                title: "t1".into(),
                description: String::new(),
                dependencies: Vec::new(),
                tool_hints: Vec::new(),
                success_criteria: vec![SuccessCriterion::FileExists { path: "a".into() }],
                task_type: TaskType::Build,
            }],
        )
    }

    #[test]
    fn new_state_starts_planning_v1() {
        let state = AgentState::new(sample_plan());
        assert_eq!(state.status(), Status::Planning);
        assert_eq!(state.plan_version(), 1);
        assert_eq!(state.plan_history().len(), 1);
    }

    #[test]
    fn touched_paths_are_deduplicated_and_ordered() {
        let mut state = AgentState::new(sample_plan());
        state.record_touched_paths(["a.txt".to_string(), "b.txt".to_string()]);
        state.record_touched_paths(["a.txt".to_string(), "c.txt".to_string()]);
        assert_eq!(state.touched_files(), ["a.txt", "b.txt", "c.txt"]);
    }

    #[test]
    fn completion_requires_full_coverage() {
        let mut state = AgentState::new(sample_plan());
        assert!(!state.is_fully_complete());
        state.mark_task_completed("t1");
        assert!(state.is_fully_complete());
    }

    #[test]
    fn plan_version_bumps_on_replan() {
        let mut state = AgentState::new(sample_plan());
        let plan = state.plan().clone();
        state.apply_replanned_plan(plan, PatchSummary::default());
        assert_eq!(state.plan_version(), 2);
    }
}
