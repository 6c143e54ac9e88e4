//! Plan, task, and success-criterion schema.

use crate::error::PlanError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};

/// Literal plan schema version tag.
pub const PLAN_VERSION: &str = "v1";

/// The kind of work a task represents. Informational for scheduling;
/// the Policy & Gate component uses it to detect a "debug-style" scope
/// signal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    /// General build/implementation work.
    Build,
    /// Code generation from a higher-level description.
    Codegen,
    /// Writing or running tests.
    Test,
    /// Diagnosing a failure.
    Debug,
    /// Verifying an artifact or claim.
    Verify,
    /// Repairing a previously broken task.
    Repair,
    /// Producing a design document or decision.
    Design,
    /// Materializing a design into concrete artifacts.
    Materialize,
    /// Anything not covered above.
    Other,
}

impl TaskType {
    /// True for task types the Gate treats as a "debug-style" scope signal.
    #[must_use]
    pub fn is_debug_style(self) -> bool {
        matches!(self, Self::Debug | Self::Test | Self::Build | Self::Repair | Self::Verify)
    }
}

/// A deterministic, machine-checkable condition a task must satisfy to be
/// considered complete.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SuccessCriterion {
    /// Passes iff running `cmd args... ` (optionally in `cwd`) exits with
    /// `expect_exit_code`.
    Command {
        /// Executable or command name.
        cmd: String,
        /// Positional arguments.
        #[serde(default)]
        args: Vec<String>,
        /// Working directory, relative to the project root.
        #[serde(default)]
        cwd: Option<String>,
        /// Expected exit code; defaults to 0.
        #[serde(default = "default_exit_code")]
        expect_exit_code: i32,
    },
    /// Passes iff `path` resolves inside the project root and exists.
    FileExists {
        /// Path, relative to the project root.
        path: String,
    },
    /// Passes iff `path` exists and its contents contain `contains`.
    FileContains {
        /// Path, relative to the project root.
        path: String,
        /// Required substring.
        contains: String,
    },
    /// Passes iff `tool_name` was invoked during the current task's action
    /// list and its `ok` flag equals `expected_ok`.
    ToolResult {
        /// Name of the tool whose result is being inspected.
        tool_name: String,
        /// Expected value of the tool result's `ok` flag.
        expected_ok: bool,
    },
}

fn default_exit_code() -> i32 {
    0
}

/// A unit of work with declared dependencies and success criteria.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Task {
    /// Unique id within the plan.
    pub id: String,
    /// Short human-readable title.
    pub title: String,
    /// Longer description of the work.
    #[serde(default)]
    pub description: String,
    /// Task ids that must be completed before this task is eligible.
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Non-binding hints about which tools this task is likely to need.
    #[serde(default)]
    pub tool_hints: Vec<String>,
    /// Deterministic success criteria; must be non-empty.
    pub success_criteria: Vec<SuccessCriterion>,
    /// Classification used by scheduling and the Gate.
    pub task_type: TaskType,
}

/// A named grouping of tasks for reporting/ordering purposes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Milestone {
    /// Unique id within the plan.
    pub id: String,
    /// Human-readable title.
    pub title: String,
    /// Task ids belonging to this milestone, in order.
    pub task_ids: Vec<String>,
}

/// The full plan for a run, version `"v1"`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Plan {
    /// Literal schema version, always `"v1"`.
    pub version: String,
    /// The goal this plan is trying to achieve.
    pub goal: String,
    /// Whether the acceptance criteria are locked against `edit_acceptance`.
    pub acceptance_locked: bool,
    /// Whether the tech stack is locked against `edit_tech_stack`.
    pub tech_stack_locked: bool,
    /// Ordered milestones.
    #[serde(default)]
    pub milestones: Vec<Milestone>,
    /// Ordered tasks.
    pub tasks: Vec<Task>,
}

impl Plan {
    /// Construct a new v1 plan without validating it; call [`Plan::validate`]
    /// before relying on its invariants.
    #[must_use]
    pub fn new(goal: impl Into<String>, tasks: Vec<Task>) -> Self {
        Self {
            version: PLAN_VERSION.to_string(),
            goal: goal.into(),
            acceptance_locked: false,
            tech_stack_locked: false,
            milestones: Vec::new(),
            tasks,
        }
    }

    /// Look up a task by id.
    #[must_use]
    pub fn task(&self, id: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == id)
    }

    /// Validate the full set of plan invariants:
    /// task ids unique; every dependency resolves; every milestone task_id
    /// resolves; milestone ids unique; at least one task; every task has at
    /// least one success criterion.
    pub fn validate(&self) -> Result<(), PlanError> {
        if self.tasks.is_empty() {
            return Err(PlanError::EmptyPlan);
        }

        let mut seen_tasks = HashSet::new();
        for t in &self.tasks {
            if !seen_tasks.insert(t.id.as_str()) {
                return Err(PlanError::DuplicateTaskId(t.id.clone()));
            }
            if t.success_criteria.is_empty() {
                return Err(PlanError::EmptyCriteria(t.id.clone()));
            }
        }
        for t in &self.tasks {
            for dep in &t.dependencies {
                if !seen_tasks.contains(dep.as_str()) {
                    return Err(PlanError::UnknownDependency {
                        task: t.id.clone(),
                        dependency: dep.clone(),
                    });
                }
            }
        }

        let mut seen_milestones = HashSet::new();
        for m in &self.milestones {
            if !seen_milestones.insert(m.id.as_str()) {
                return Err(PlanError::DuplicateMilestoneId(m.id.clone()));
            }
            for task_id in &m.task_ids {
                if !seen_tasks.contains(task_id.as_str()) {
                    return Err(PlanError::UnknownMilestoneTask {
                        milestone: m.id.clone(),
                        task: task_id.clone(),
                    });
                }
            }
        }

        Ok(())
    }

    /// True iff the plan's dependency graph has no cycle and every task is
    /// reachable from a task with no unmet dependency. A task is
    /// "unreachable" if every path to scheduling it requires a task that can
    /// never become ready.
    #[must_use]
    pub fn has_cycle_or_unreachable_task(&self) -> bool {
        let by_id: HashMap<&str, &Task> = self.tasks.iter().map(|t| (t.id.as_str(), t)).collect();
        let mut state: HashMap<&str, VisitState> = HashMap::new();

        fn visit<'a>(
            id: &'a str,
            by_id: &HashMap<&'a str, &'a Task>,
            state: &mut HashMap<&'a str, VisitState>,
        ) -> bool {
            match state.get(id) {
                Some(VisitState::Done) => return false,
                Some(VisitState::Visiting) => return true,
                None => {}
            }
            state.insert(id, VisitState::Visiting);
            if let Some(task) = by_id.get(id) {
                for dep in &task.dependencies {
                    if visit(dep, by_id, state) {
                        return true;
                    }
                }
            }
            state.insert(id, VisitState::Done);
            false
        }

        for t in &self.tasks {
            if visit(&t.id, &by_id, &mut state) {
                return true;
            }
        }
        false
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum VisitState {
    Visiting,
    Done,
}

/// What to do when an action in a [`TaskActionPlan`] fails.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OnFail {
    /// Stop executing further actions in this attempt.
    Stop,
    /// Continue to the next action despite this one failing.
    Continue,
}

impl Default for OnFail {
    fn default() -> Self {
        Self::Stop
    }
}

/// One proposed invocation of a registered tool.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Action {
    /// Registered tool name.
    pub name: String,
    /// Tool input, validated against the tool's input schema before
    /// invocation.
    pub input: Value,
    /// Behavior when this action's tool call fails.
    #[serde(default)]
    pub on_fail: OnFail,
    /// Optional idempotency key so a retried action can be recognized as a
    /// repeat by collaborator tools that support it.
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

/// A planner-proposed sequence of tool calls intended to satisfy one task's
/// success criteria.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskActionPlan {
    /// Literal schema version, always `"v1"`.
    pub version: String,
    /// The task this action plan is for.
    pub task_id: String,
    /// The planner's stated rationale.
    pub rationale: String,
    /// Ordered tool invocations; must be non-empty.
    pub actions: Vec<Action>,
    /// Artifacts the planner expects this action plan to produce, if known.
    #[serde(default)]
    pub expected_artifacts: Option<Vec<String>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(id: &str, deps: &[&str]) -> Task {
        Task {
            id: id.to_string(),
            title: id.to_string(),
            description: String::new(),
            dependencies: deps.iter().map(|s| s.to_string()).collect(),
            tool_hints: Vec::new(),
            success_criteria: vec![SuccessCriterion::FileExists { path: "x".into() }],
            task_type: TaskType::Build,
        }
    }

    #[test]
    fn validates_minimal_plan() {
        let plan = Plan::new("goal", vec![task("t1", &[])]);
        assert!(plan.validate().is_ok());
    }

    #[test]
    fn rejects_empty_plan() {
        let plan = Plan::new("goal", vec![]);
        assert_eq!(plan.validate(), Err(PlanError::EmptyPlan));
    }

    #[test]
    fn rejects_duplicate_task_id() {
        let plan = Plan::new("goal", vec![task("t1", &[]), task("t1", &[])]);
        assert_eq!(plan.validate(), Err(PlanError::DuplicateTaskId("t1".into())));
    }

    #[test]
    fn rejects_unknown_dependency() {
        let plan = Plan::new("goal", vec![task("t1", &["missing"])]);
        assert_eq!(
            plan.validate(),
            Err(PlanError::UnknownDependency { task: "t1".into(), dependency: "missing".into() })
        );
    }

    #[test]
    fn rejects_unknown_milestone_task() {
        let mut plan = Plan::new("goal", vec![task("t1", &[])]);
        plan.milestones.push(Milestone {
            id: "m1".into(),
            title: "m1".into(),
            task_ids: vec!["missing".into()],
        });
        assert_eq!(
            plan.validate(),
            Err(PlanError::UnknownMilestoneTask { milestone: "m1".into(), task: "missing".into() })
        );
    }

    #[test]
    fn detects_cycle() {
        let mut plan = Plan::new("goal", vec![task("t1", &["t2"]), task("t2", &["t1"])]);
        plan.milestones.clear();
        assert!(plan.has_cycle_or_unreachable_task());
    }

    #[test]
    fn no_cycle_for_dag() {
        let plan = Plan::new("goal", vec![task("t1", &[]), task("t2", &["t1"])]);
        assert!(!plan.has_cycle_or_unreachable_task());
    }
}
