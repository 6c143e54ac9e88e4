//! Criteria Evaluator: runs a task's success criteria against the current
//! turn's tool results, synthesizing check-tool calls for criteria that need
//! a fresh observation. Failures are collected rather than short-circuited
//! so a single turn reports every violated criterion.

use crate::executor::{self, ExecutionResult, PatchReviewer, ToolRegistry};
use loom_core::{AgentState, Policy, SuccessCriterion, Task, ToolCall, ToolContext};
use serde_json::json;

/// One check-tool invocation performed while evaluating criteria, recorded
/// for the audit trail.
#[derive(Debug, Clone)]
pub struct ToolAuditEntry {
    /// The tool invoked.
    pub name: String,
    /// Whether it succeeded.
    pub ok: bool,
    /// Error detail, if it failed.
    pub error: Option<String>,
}

/// The outcome of evaluating every success criterion for a task.
#[derive(Debug, Clone, Default)]
pub struct CriteriaReport {
    /// Whether every criterion passed.
    pub ok: bool,
    /// One message per violated criterion.
    pub failures: Vec<String>,
    /// Every check-tool invocation performed during evaluation.
    pub tool_audit: Vec<ToolAuditEntry>,
}

/// Evaluate every success criterion for `task` against the current turn's
/// `tool_results` (for `tool_result` criteria) or freshly-synthesized check
/// calls (for `command`/`file_exists`/`file_contains`), routed through the
/// same Executor path as any other tool invocation.
#[allow(clippy::too_many_arguments)]
pub async fn evaluate_criteria(
    task: &Task,
    tool_results: &[ExecutionResult],
    registry: &ToolRegistry,
    ctx: &ToolContext<'_>,
    state: &mut AgentState,
    policy: &Policy,
    reviewer: Option<&dyn PatchReviewer>,
) -> CriteriaReport {
    let mut report = CriteriaReport { ok: true, failures: Vec::new(), tool_audit: Vec::new() };

    for criterion in &task.success_criteria {
        match criterion {
            SuccessCriterion::ToolResult { tool_name, expected_ok } => {
                let found = tool_results.iter().find(|r| &r.tool_name == tool_name);
                match found {
                    Some(r) if r.ok == *expected_ok => {}
                    Some(r) => {
                        report.ok = false;
                        report.failures.push(format!(
                            "tool_result: {tool_name} returned ok={} but expected {expected_ok}",
                            r.ok
                        ));
                    }
                    None => {
                        report.ok = false;
                        report
                            .failures
                            .push(format!("tool_result: {tool_name} was not invoked this turn"));
                    }
                }
            }
            SuccessCriterion::Command { cmd, args, cwd, expect_exit_code } => {
                let call = ToolCall {
                    name: "tool_check_command".into(),
                    input: json!({
                        "cmd": cmd,
                        "args": args,
                        "cwd": cwd,
                        "expect_exit_code": expect_exit_code
                    }),
                };
                run_check(&call, registry, ctx, state, policy, reviewer, &mut report).await;
            }
            SuccessCriterion::FileExists { path } => {
                let call = ToolCall {
                    name: "tool_check_file_exists".into(),
                    input: json!({"path": path}),
                };
                run_check(&call, registry, ctx, state, policy, reviewer, &mut report).await;
            }
            SuccessCriterion::FileContains { path, contains } => {
                let call = ToolCall {
                    name: "tool_check_file_contains".into(),
                    input: json!({"path": path, "contains": contains}),
                };
                run_check(&call, registry, ctx, state, policy, reviewer, &mut report).await;
            }
        }
    }

    report
}

#[allow(clippy::too_many_arguments)]
async fn run_check(
    call: &ToolCall,
    registry: &ToolRegistry,
    ctx: &ToolContext<'_>,
    state: &mut AgentState,
    policy: &Policy,
    reviewer: Option<&dyn PatchReviewer>,
    report: &mut CriteriaReport,
) {
    let res = executor::execute(call, registry, ctx, state, policy, reviewer).await;
    report.tool_audit.push(ToolAuditEntry {
        name: call.name.clone(),
        ok: res.ok,
        error: if res.ok { None } else { Some(res.note.clone()) },
    });
    if !res.ok {
        report.ok = false;
        report.failures.push(format!("{}: {}", call.name, res.note));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checks::{CheckFileExistsTool, CheckFileContainsTool};
    use loom_core::{Budgets, Plan, Safety, SharedMemory, TaskType};
    use std::io::Write;
    use std::sync::Arc;

    fn policy_allowing(tools: &[&str]) -> Policy {
        Policy {
            tech_stack: Default::default(),
            tech_stack_locked: false,
            acceptance: Default::default(),
            safety: Safety {
                allowed_tools: tools.iter().map(|s| s.to_string()).collect(),
                allowed_commands: vec![],
            },
            budgets: Budgets { max_steps: 10, max_actions_per_task: 5, max_retries_per_task: 3, max_replans: 2 },
            user_explicitly_allowed_relax_acceptance: false,
        }
    }

    fn task_with(criteria: Vec<SuccessCriterion>) -> Task {
        Task {
            id: "t1".into(),
            title: "t1".into(),
            description: String::new(),
            dependencies: vec![],
            tool_hints: vec![],
            success_criteria: criteria,
            task_type: TaskType::Build,
        }
    }

    #[tokio::test]
    async fn tool_result_criterion_passes_when_matching_result_present() {
        let task = task_with(vec![SuccessCriterion::ToolResult {
            tool_name: "tool_write_file".into(),
            expected_ok: true,
        }]);
        let results = vec![ExecutionResult {
            ok: true,
            note: String::new(),
            touched_paths: vec![],
            result_data: None,
            tool_name: "tool_write_file".into(),
        }];
        let registry = ToolRegistry::new();
        let mem = SharedMemory::new();
        let ctx = ToolContext { memory: &mem, lm_client: None, command_runner: None, project_root: "/tmp" };
        let mut state = AgentState::new(Plan::new("g", vec![task_with(vec![SuccessCriterion::FileExists { path: "x".into() }])]));
        let policy = policy_allowing(&[]);
        let report = evaluate_criteria(&task, &results, &registry, &ctx, &mut state, &policy, None).await;
        assert!(report.ok);
    }

    #[tokio::test]
    async fn file_exists_criterion_runs_synthesized_check() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::File::create(dir.path().join("a.txt")).unwrap().write_all(b"hi").unwrap();
        let task = task_with(vec![SuccessCriterion::FileExists { path: "a.txt".into() }]);
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(CheckFileExistsTool::default()));
        let mem = SharedMemory::new();
        let root = dir.path().to_string_lossy().into_owned();
        let ctx = ToolContext { memory: &mem, lm_client: None, command_runner: None, project_root: &root };
        let mut state = AgentState::new(Plan::new("g", vec![task.clone()]));
        let policy = policy_allowing(&["tool_check_file_exists"]);
        let report = evaluate_criteria(&task, &[], &registry, &ctx, &mut state, &policy, None).await;
        assert!(report.ok);
        assert_eq!(report.tool_audit.len(), 1);
    }

    #[tokio::test]
    async fn file_contains_criterion_fails_are_collected_not_short_circuited() {
        let dir = tempfile::tempdir().unwrap();
        let task = task_with(vec![
            SuccessCriterion::FileExists { path: "missing1.txt".into() },
            SuccessCriterion::FileContains { path: "missing2.txt".into(), contains: "x".into() },
        ]);
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(CheckFileExistsTool::default()));
        registry.register(Arc::new(CheckFileContainsTool::default()));
        let mem = SharedMemory::new();
        let root = dir.path().to_string_lossy().into_owned();
        let ctx = ToolContext { memory: &mem, lm_client: None, command_runner: None, project_root: &root };
        let mut state = AgentState::new(Plan::new("g", vec![task.clone()]));
        let policy = policy_allowing(&["tool_check_file_exists", "tool_check_file_contains"]);
        let report = evaluate_criteria(&task, &[], &registry, &ctx, &mut state, &policy, None).await;
        assert!(!report.ok);
        assert_eq!(report.failures.len(), 2);
    }
}
