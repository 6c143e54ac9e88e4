//! Turn Loop / Runtime: drives Plan -> Execute -> Review -> Replan,
//! enforcing turn/retry/replan budgets and flushing the audit trail on
//! every exit path.

use crate::audit::{self, AuditCollector, FinalRecord, TurnRecord, TurnToolResult};
use crate::clock::Clock;
use crate::executor::{self, ExecutionResult, PatchReviewer, ToolRegistry};
use crate::planner::{self, PlannerError};
use crate::replanner::{self, ChangeReviewer, ReplanError};
use budget::RunLimits;
use event_log::EventLogError;
use loom_core::{
    AgentState, ErrorKind, LastError, LmClient, Policy, SharedMemory, Status, ToolCall, ToolContext,
};
use std::sync::Arc;

/// Everything the Turn Loop needs that does not live on [`AgentState`].
pub struct RunConfig {
    /// The run's top-level goal, given to the planner.
    pub goal: String,
    /// The governing policy.
    pub policy: Policy,
    /// Filesystem root every relative path resolves against.
    pub project_root: String,
    /// Where the audit trail is written.
    pub audit_path: String,
    /// Turn/tool-call-per-turn ceilings not carried on [`Policy`].
    pub run_limits: RunLimits,
}

/// The runtime's single entry point's return value.
pub struct RunOutcome {
    /// Whether the run completed successfully.
    pub ok: bool,
    /// "Agent completed successfully" or the last error's message.
    pub summary: String,
    /// Path to the flushed audit log.
    pub audit_path: String,
    /// Patch paths produced over the run.
    pub patch_paths: Vec<String>,
    /// The final run state.
    pub state: AgentState,
}

/// Errors that can prevent a run from even starting (planning failure
/// before any `AgentState` exists).
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    /// The initial `proposePlan` call failed (including §3 invariant
    /// validation, performed as part of the planner's own retry protocol).
    #[error("initial plan proposal failed: {0}")]
    Planner(#[from] PlannerError),
    /// The audit log could not be opened.
    #[error("failed to open audit log: {0}")]
    Audit(#[from] EventLogError),
}

/// Drive a full run from `config.goal` to completion, calling `proposePlan`
/// to obtain the initial plan and then the turn loop until done, failed, or
/// budget-exhausted.
pub async fn run(
    lm: &dyn LmClient,
    registry: &ToolRegistry,
    patch_reviewer: &dyn PatchReviewer,
    change_reviewer: &dyn ChangeReviewer,
    gate: &policy::Engine,
    config: RunConfig,
    clock: Arc<dyn Clock>,
) -> Result<RunOutcome, StartupError> {
    let tool_index = planner::render_tool_index(registry);
    let state_summary = serde_json::json!({});
    let constraints = serde_json::json!({});

    let (plan, initial_audit) = planner::propose_plan(
        lm,
        &config.goal,
        &tool_index,
        &state_summary,
        &config.policy,
        &constraints,
        None,
    )
    .await?;

    let mut collector = AuditCollector::open(&config.audit_path, config.goal.clone(), clock.clone())?;
    record_planner_turns(&mut collector, 0, "initial_plan", &initial_audit);
    let initial_response_id = initial_audit.response_id.clone();

    if plan.has_cycle_or_unreachable_task() {
        let mut state = AgentState::new(plan);
        let err = LastError {
            kind: ErrorKind::Unknown,
            message: "plan has a dependency cycle or an unreachable task".to_string(),
        };
        state.set_state_error(err.clone());
        state.set_status(Status::Failed);
        return Ok(finish(&mut collector, state, &config, &tool_index, err.message));
    }

    let mut state = AgentState::new(plan);
    if let Some(id) = initial_response_id {
        state.set_last_lm_response_id(id);
    }
    let mem = SharedMemory::new();

    for turn in 1..=config.run_limits.max_turns {
        state.mark_turn_used(turn);

        let Some(task_id) = next_ready_task(&state) else {
            if state.is_fully_complete() {
                state.set_status(Status::Done);
            } else {
                state.set_state_error(LastError {
                    kind: ErrorKind::Unknown,
                    message: "no ready task but plan is incomplete".to_string(),
                });
                state.set_status(Status::Failed);
            }
            break;
        };
        let task = state.plan().task(&task_id).expect("selected task exists").clone();

        state.set_status(Status::Executing);
        let max_actions =
            budget::max_actions_for_turn(config.run_limits, &config.policy.budgets) as usize;

        let mut task_succeeded = false;
        let max_retries = config.policy.budgets.max_retries_per_task;
        let mut attempt = 0u64;

        while attempt < max_retries {
            attempt += 1;
            let recent_failures: Vec<String> =
                state.task_failures(&task_id).map(<[String]>::to_vec).unwrap_or_default();
            let plan_summary = serde_json::json!({"plan_version": state.plan_version()});
            let state_summary = serde_json::json!({"completed": state.completed()});

            let (action_plan, attempt_audit) = match planner::propose_task_action_plan(
                lm,
                &task,
                &plan_summary,
                &state_summary,
                &tool_index,
                &recent_failures,
                state.last_lm_response_id().map(str::to_string),
            )
            .await
            {
                Ok(v) => v,
                Err(e) => {
                    state.set_state_error(LastError { kind: ErrorKind::Config, message: e.to_string() });
                    state.set_status(Status::Failed);
                    return Ok(finish(&mut collector, state, &config, &tool_index, e.to_string()));
                }
            };
            if let Some(id) = attempt_audit.response_id.clone() {
                state.set_last_lm_response_id(id);
            }
            record_planner_turns(&mut collector, turn, &format!("task_action_plan:{task_id}"), &attempt_audit);

            let actions = &action_plan.actions[..action_plan.actions.len().min(max_actions)];
            let mut tool_results: Vec<ExecutionResult> = Vec::new();
            let mut audit_results: Vec<TurnToolResult> = Vec::new();
            let mut calls: Vec<ToolCall> = Vec::new();

            let ctx = ToolContext {
                memory: &mem,
                lm_client: Some(lm),
                command_runner: None,
                project_root: &config.project_root,
            };

            for action in actions {
                let call = ToolCall { name: action.name.clone(), input: action.input.clone() };
                calls.push(call.clone());
                let result = executor::execute(
                    &call,
                    registry,
                    &ctx,
                    &mut state,
                    &config.policy,
                    Some(patch_reviewer),
                )
                .await;
                audit_results.push(TurnToolResult {
                    name: result.tool_name.clone(),
                    ok: result.ok,
                    error: if result.ok { None } else { Some(result.note.clone()) },
                    touched_paths: result.touched_paths.clone(),
                });
                let stop = !result.ok && action.on_fail == loom_core::OnFail::Stop;
                tool_results.push(result);
                if stop {
                    break;
                }
            }

            collector
                .record_turn(&TurnRecord {
                    turn,
                    raw_text: String::new(),
                    previous_response_id_sent: None,
                    response_id: None,
                    usage: None,
                    note: format!("tool_calls:{task_id}"),
                    tool_calls: calls,
                    tool_results: audit_results,
                })
                .ok();

            state.set_status(Status::Reviewing);
            let report = crate::criteria::evaluate_criteria(
                &task,
                &tool_results,
                registry,
                &ctx,
                &mut state,
                &config.policy,
                Some(patch_reviewer),
            )
            .await;

            if report.ok {
                state.mark_task_completed(task_id.clone());
                task_succeeded = true;
                break;
            }

            state.record_task_failures(task_id.clone(), report.failures.clone());
            state.mark_retry_used(task_id.clone());
        }

        if !task_succeeded {
            state.set_status(Status::Replanning);
            let replans_used = state.budgets_used().replans;
            match replanner::replan(lm, &config.policy, &mut state, gate, change_reviewer, replans_used).await
            {
                Ok(outcome) => {
                    record_planner_turns(&mut collector, turn, "plan_change:approved", &outcome.planner_audit);
                }
                Err(ReplanError::Rejected(err)) => {
                    state.set_state_error(err.clone());
                    state.set_status(Status::Failed);
                    return Ok(finish(&mut collector, state, &config, &tool_index, err.message));
                }
                Err(ReplanError::BudgetExhausted(err)) => {
                    state.set_state_error(err.clone());
                    state.set_status(Status::Failed);
                    return Ok(finish(&mut collector, state, &config, &tool_index, err.message));
                }
                Err(ReplanError::Planner(e)) => {
                    let err = LastError { kind: ErrorKind::Config, message: e.to_string() };
                    state.set_state_error(err.clone());
                    state.set_status(Status::Failed);
                    return Ok(finish(&mut collector, state, &config, &tool_index, err.message));
                }
                Err(ReplanError::PatchInvalid(e)) => {
                    let err = LastError { kind: ErrorKind::Unknown, message: e.to_string() };
                    state.set_state_error(err.clone());
                    state.set_status(Status::Failed);
                    return Ok(finish(&mut collector, state, &config, &tool_index, err.message));
                }
            }
        }

        if state.is_fully_complete() {
            state.set_status(Status::Done);
            break;
        }
    }

    if !matches!(state.status(), Status::Done | Status::Failed) {
        state.set_state_error(LastError { kind: ErrorKind::Unknown, message: "max turns reached".to_string() });
        state.set_status(Status::Failed);
    }

    let summary = match state.status() {
        Status::Done => "Agent completed successfully".to_string(),
        _ => state
            .last_error()
            .map(|e| e.message.clone())
            .unwrap_or_else(|| "max turns reached".to_string()),
    };

    Ok(finish(&mut collector, state, &config, &tool_index, summary))
}

fn next_ready_task(state: &AgentState) -> Option<String> {
    state
        .plan()
        .tasks
        .iter()
        .find(|t| {
            !state.completed().contains(&t.id)
                && t.dependencies.iter().all(|d| state.completed().contains(d))
        })
        .map(|t| t.id.clone())
}

fn record_planner_turns(
    collector: &mut AuditCollector,
    turn: u64,
    note: &str,
    audit: &planner::PlannerAudit,
) {
    for attempt in &audit.attempts {
        let _ = collector.record_turn(&TurnRecord {
            turn,
            raw_text: attempt.raw_text.clone(),
            previous_response_id_sent: attempt.previous_response_id_sent.clone(),
            response_id: attempt.response_id.clone(),
            usage: None,
            note: note.to_string(),
            tool_calls: vec![],
            tool_results: vec![],
        });
    }
}

fn finish(
    collector: &mut AuditCollector,
    state: AgentState,
    config: &RunConfig,
    tool_index: &[planner::ToolIndexEntry],
    summary: String,
) -> RunOutcome {
    let patch_paths = state.patch_paths().to_vec();
    let final_record = FinalRecord {
        status: state.status(),
        verify_history: state.failure_history().clone(),
        patch_paths: patch_paths.clone(),
        touched_files: audit::last_n(state.touched_files(), 200),
        budgets: state.budgets_used().clone(),
        last_error: state.last_error().cloned(),
        policy: config.policy.clone(),
        tool_index: tool_index.to_vec(),
    };
    let _ = collector.flush(&final_record);

    RunOutcome {
        ok: state.status() == Status::Done,
        summary,
        audit_path: config.audit_path.clone(),
        patch_paths,
        state,
    }
}
