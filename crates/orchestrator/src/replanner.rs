//! Replanner: proposes a plan change after a task exhausts its retries,
//! gates it, optionally routes it to a human reviewer, and applies it.
//! Owns every write to `plan`, `plan_version`, and `plan_history` past run
//! start, per the state-ownership rule in [`loom_core::AgentState`].

use crate::planner::{self, PlannerAudit, PlannerError};
use async_trait::async_trait;
use loom_core::{
    apply_patch, AgentState, ErrorKind, GateResult, GateStatus, LastError, LmClient,
    PlanHistoryEntry, Policy, ReviewDecision, ReviewDecisionKind,
};
use serde_json::Value;
use thiserror::Error;

/// A human (or automated-on-behalf-of-human) reviewer for plan changes the
/// Gate has escalated. The default implementation denies, matching the
/// teacher's fail-closed default for unattended callbacks.
#[async_trait]
pub trait ChangeReviewer: Send + Sync {
    /// Review an escalated change request, given the Gate's reasoning.
    async fn review(&self, gate_result: &GateResult) -> ReviewDecision;
}

/// Denies every escalated change with no guidance; the safe default when no
/// reviewer is wired in.
#[derive(Default)]
pub struct DenyingChangeReviewer;

#[async_trait]
impl ChangeReviewer for DenyingChangeReviewer {
    async fn review(&self, _gate_result: &GateResult) -> ReviewDecision {
        ReviewDecision {
            decision: ReviewDecisionKind::Denied,
            reason: "no reviewer configured".to_string(),
            guidance: None,
        }
    }
}

/// Why a replan attempt did not result in an applied patch.
#[derive(Debug, Error)]
pub enum ReplanError {
    /// The planner failed to produce a valid change request.
    #[error("planner failed to propose a plan change: {0}")]
    Planner(#[from] PlannerError),
    /// The Gate denied the change, or a human reviewer denied/returned an
    /// invalid decision.
    #[error("{0}")]
    Rejected(LastError),
    /// The change was approved but the replan budget was already spent.
    #[error("{0}")]
    BudgetExhausted(LastError),
    /// The approved patch failed plan re-validation.
    #[error("patch application failed: {0}")]
    PatchInvalid(loom_core::PatchError),
}

/// Outcome of a successful replan: the new `plan_version` and the
/// planner's audit trail for `proposePlanChange`.
#[derive(Debug)]
pub struct ReplanOutcome {
    /// The plan version after the patch was applied.
    pub plan_version: u64,
    /// Audit trail of the `proposePlanChange` call.
    pub planner_audit: PlannerAudit,
}

/// Run one full replan cycle per spec §4.6, mutating `state` in place.
/// Returns `Ok` iff a patch was gated-approved and successfully applied.
pub async fn replan(
    lm: &dyn LmClient,
    policy: &Policy,
    state: &mut AgentState,
    gate: &policy::Engine,
    reviewer: &dyn ChangeReviewer,
    replans_used: u64,
) -> Result<ReplanOutcome, ReplanError> {
    let failure_evidence: Vec<String> =
        state.failure_history().values().flatten().cloned().collect();
    let state_summary: Value = serde_json::json!({
        "status": format!("{:?}", state.status()),
        "plan_version": state.plan_version(),
        "completed": state.completed(),
    });

    let (request, planner_audit) =
        planner::propose_plan_change(lm, state.plan(), policy, &failure_evidence, &state_summary, None)
            .await?;

    state.push_plan_history(PlanHistoryEntry::ChangeRequest { request: request.clone() });

    let current_task_count = state.plan().tasks.len() as u64;
    let mut gate_result = gate.evaluate(&request, policy, current_task_count);

    state.push_plan_history(PlanHistoryEntry::ChangeGateResult {
        status: gate_result.status,
        reason: gate_result.reason.clone(),
        guidance: gate_result.guidance.clone(),
        required_evidence: gate_result.required_evidence.clone(),
    });

    if gate_result.status == GateStatus::Denied {
        let msg = format!(
            "Plan change denied: {}{}",
            gate_result.reason,
            gate_result.guidance.as_deref().map(|g| format!(" ({g})")).unwrap_or_default()
        );
        return Err(ReplanError::Rejected(LastError { kind: ErrorKind::Config, message: msg }));
    }

    if gate_result.status == GateStatus::NeedsUserReview {
        let decision = reviewer.review(&gate_result).await;
        state.push_plan_history(PlanHistoryEntry::ChangeUserDecision { decision: decision.clone() });

        match decision.decision {
            ReviewDecisionKind::Denied => {
                let msg = format!(
                    "Plan change denied: {}{}",
                    decision.reason,
                    decision.guidance.as_deref().map(|g| format!(" ({g})")).unwrap_or_default()
                );
                return Err(ReplanError::Rejected(LastError { kind: ErrorKind::Config, message: msg }));
            }
            ReviewDecisionKind::Approved => {
                gate_result = GateResult::approved(decision.reason);
            }
        }
    }

    debug_assert_eq!(gate_result.status, GateStatus::Approved);

    if replans_used >= policy.budgets.max_replans {
        let msg = format!(
            "Replan budget exceeded: {} >= {}",
            replans_used, policy.budgets.max_replans
        );
        return Err(ReplanError::BudgetExhausted(LastError { kind: ErrorKind::Config, message: msg }));
    }

    let (new_plan, summary) =
        apply_patch(state.plan(), &request.patch).map_err(ReplanError::PatchInvalid)?;
    state.apply_replanned_plan(new_plan, summary);

    Ok(ReplanOutcome { plan_version: state.plan_version(), planner_audit })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use loom_core::{
        Acceptance, Budgets, ChangeType, Impact, LmError, LmOptions, LmResponse, Message, Plan,
        PlanChangeRequest, Safety, SuccessCriterion, Task, TaskType,
    };

    struct ScriptedLm {
        text: String,
    }

    #[async_trait]
    impl LmClient for ScriptedLm {
        async fn respond(&self, _m: &[Message], _o: &LmOptions) -> Result<LmResponse, LmError> {
            Ok(LmResponse {
                text: self.text.clone(),
                response_id: Some("r1".into()),
                usage: None,
                raw: None,
            })
        }
    }

    fn sample_plan() -> Plan {
        Plan::new(
            "g",
            vec![Task {
                id: "t1".into(),
                title: "t1".into(),
                description: String::new(),
                dependencies: vec![],
                tool_hints: vec![],
                success_criteria: vec![SuccessCriterion::FileExists { path: "a".into() }],
                task_type: TaskType::Build,
            }],
        )
    }

    fn sample_policy() -> Policy {
        Policy {
            tech_stack: Default::default(),
            tech_stack_locked: false,
            acceptance: Acceptance { locked: false, criteria: None },
            safety: Safety { allowed_tools: vec![], allowed_commands: vec![] },
            budgets: Budgets { max_steps: 10, max_actions_per_task: 5, max_retries_per_task: 3, max_replans: 2 },
            user_explicitly_allowed_relax_acceptance: false,
        }
    }

    fn remove_task_change_json() -> String {
        let req = PlanChangeRequest {
            version: "v2".into(),
            reason: "cleanup".into(),
            change_type: ChangeType::RemoveTask,
            evidence: vec![],
            impact: Impact { steps_delta: -1, risk: String::new() },
            requested_tools: vec![],
            patch: vec![loom_core::PatchOp::RemoveTask { task_id: "does-not-exist".into() }],
        };
        // remove_task on a nonexistent id is rejected by plan validation's
        // patch engine only if it changes invariants; here it's a no-op in
        // practice for the test's purposes, so use an edit that is legal.
        serde_json::to_string(&req).unwrap()
    }

    #[tokio::test]
    async fn denied_change_is_rejected_with_config_error() {
        let policy = sample_policy();
        let mut state = AgentState::new(sample_plan());
        let req = PlanChangeRequest {
            version: "v2".into(),
            reason: "relax".into(),
            change_type: ChangeType::RelaxAcceptance,
            evidence: vec![],
            impact: Impact { steps_delta: 0, risk: String::new() },
            requested_tools: vec![],
            patch: vec![loom_core::PatchOp::EditAcceptance {
                changes: serde_json::json!({"locked": false}),
            }],
        };
        let lm = ScriptedLm { text: serde_json::to_string(&req).unwrap() };
        let gate = policy::Engine::new();
        let reviewer = DenyingChangeReviewer;
        let err = replan(&lm, &policy, &mut state, &gate, &reviewer, 0).await.unwrap_err();
        assert!(matches!(err, ReplanError::Rejected(_)));
        assert!(matches!(
            state.plan_history().last(),
            Some(PlanHistoryEntry::ChangeGateResult { status: GateStatus::Denied, .. })
        ));
    }

    #[tokio::test]
    async fn budget_exhausted_before_apply() {
        let mut policy = sample_policy();
        policy.budgets.max_replans = 1;
        let mut state = AgentState::new(sample_plan());
        let lm = ScriptedLm { text: remove_task_change_json() };
        let gate = policy::Engine::new();
        let reviewer = DenyingChangeReviewer;
        // remove_task/edit_task are auto-approved, so this should hit the
        // budget check with replans_used already at the cap.
        let err = replan(&lm, &policy, &mut state, &gate, &reviewer, 1).await.unwrap_err();
        assert!(matches!(err, ReplanError::BudgetExhausted(_)));
        assert_eq!(state.plan_version(), 1);
    }

    #[tokio::test]
    async fn needs_review_approved_applies_patch() {
        let mut policy = sample_policy();
        policy.budgets.max_steps = 20;
        let mut state = AgentState::new(sample_plan());
        let req = PlanChangeRequest {
            version: "v2".into(),
            reason: "scale up".into(),
            change_type: ChangeType::ScopeExpand,
            evidence: vec![],
            impact: Impact { steps_delta: 1, risk: String::new() },
            requested_tools: vec![],
            patch: vec![loom_core::PatchOp::AddTask {
                task: Task {
                    id: "t2".into(),
                    title: "t2".into(),
                    description: String::new(),
                    dependencies: vec![],
                    tool_hints: vec![],
                    success_criteria: vec![SuccessCriterion::FileExists { path: "b".into() }],
                    task_type: TaskType::Build,
                },
                after_task_id: None,
            }],
        };
        let lm = ScriptedLm { text: serde_json::to_string(&req).unwrap() };
        let gate = policy::Engine::new();
        struct ApprovingReviewer;
        #[async_trait]
        impl ChangeReviewer for ApprovingReviewer {
            async fn review(&self, _g: &GateResult) -> ReviewDecision {
                ReviewDecision {
                    decision: ReviewDecisionKind::Approved,
                    reason: "looks fine".into(),
                    guidance: None,
                }
            }
        }
        let reviewer = ApprovingReviewer;
        let outcome = replan(&lm, &policy, &mut state, &gate, &reviewer, 0).await.unwrap();
        assert_eq!(outcome.plan_version, 2);
        assert_eq!(state.plan().tasks.len(), 2);
    }
}
