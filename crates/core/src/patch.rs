//! Plan-change request schema and the patch-application algorithm.

use crate::error::{PatchError, PlanError};
use crate::plan::{Plan, Task};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Literal plan-change schema version tag.
pub const PLAN_CHANGE_VERSION: &str = "v2";

/// The kind of change a [`PlanChangeRequest`] proposes. Used by the Gate
/// to select which deterministic rule applies.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    /// Reorder tasks without altering scope.
    ReorderTasks,
    /// Add a new task.
    AddTask,
    /// Remove an existing task.
    RemoveTask,
    /// Edit an existing task's fields.
    EditTask,
    /// Reduce the overall scope of the plan.
    ScopeReduce,
    /// Expand the overall scope of the plan.
    ScopeExpand,
    /// Replace part of the declared tech stack.
    ReplaceTech,
    /// Relax a previously locked acceptance criterion.
    RelaxAcceptance,
}

/// The estimated impact of applying a change.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Impact {
    /// Net change in task count this request is expected to cause.
    pub steps_delta: i64,
    /// Free-text risk description; the Gate regex-matches this for
    /// `replace_tech`.
    pub risk: String,
}

/// A single validated, ordered transformation of a [`Plan`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PatchOp {
    /// Insert `task` into the plan, after `after_task_id` if given, else
    /// appended.
    AddTask {
        /// The task to add.
        task: Task,
        /// Id of the task to insert after; `None` appends to the end.
        #[serde(default)]
        after_task_id: Option<String>,
    },
    /// Remove `task_id` from the plan and strip it from every milestone.
    RemoveTask {
        /// The task id to remove.
        task_id: String,
    },
    /// Merge `changes` over the existing task's fields. `id` is immutable.
    EditTask {
        /// The task id to edit.
        task_id: String,
        /// Partial field updates, merged shallowly over the existing task.
        changes: Value,
    },
    /// Move `task_id` to immediately after `after_task_id`; missing anchor
    /// prepends; unknown anchor id is a no-op.
    Reorder {
        /// The task id to move.
        task_id: String,
        /// Id of the task to place it after; `None` prepends.
        #[serde(default)]
        after_task_id: Option<String>,
    },
    /// Flip `plan.acceptance_locked` if `changes.locked` is a boolean.
    EditAcceptance {
        /// Partial field updates.
        changes: Value,
    },
    /// Flip `plan.tech_stack_locked` if `changes.locked` is a boolean.
    EditTechStack {
        /// Partial field updates.
        changes: Value,
    },
}

/// A planner-proposed change to the current plan, subject to the Gate and,
/// when required, human review.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlanChangeRequest {
    /// Literal schema version, always `"v2"`.
    #[serde(default = "default_change_version")]
    pub version: String,
    /// Why this change is being proposed.
    pub reason: String,
    /// The kind of change.
    pub change_type: ChangeType,
    /// Supporting evidence (e.g., failure excerpts).
    #[serde(default)]
    pub evidence: Vec<String>,
    /// Estimated impact of applying this change.
    pub impact: Impact,
    /// Tools the replanned tasks are expected to need.
    #[serde(default)]
    pub requested_tools: Vec<String>,
    /// The ordered patch to apply if approved.
    pub patch: Vec<PatchOp>,
}

fn default_change_version() -> String {
    PLAN_CHANGE_VERSION.to_string()
}

/// Non-authoritative counts describing what a patch did, attached to the
/// audit trail's `change_request` record for readability.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PatchSummary {
    /// Number of `add_task` ops applied.
    pub tasks_added: usize,
    /// Number of `remove_task` ops applied.
    pub tasks_removed: usize,
    /// Number of `edit_task` ops applied.
    pub tasks_edited: usize,
    /// Number of `reorder` ops applied (including no-ops on unknown anchors).
    pub reorders: usize,
    /// Whether `acceptance_locked` was flipped.
    pub acceptance_lock_changed: bool,
    /// Whether `tech_stack_locked` was flipped.
    pub tech_stack_lock_changed: bool,
}

fn merge_task_changes(task: &Task, changes: &Value) -> Result<Task, PlanError> {
    let mut as_value = serde_json::to_value(task).map_err(|_| PlanError::EmptyPlan)?;
    if let (Some(obj), Some(changes_obj)) = (as_value.as_object_mut(), changes.as_object()) {
        for (k, v) in changes_obj {
            if k == "id" {
                continue; // id is immutable
            }
            obj.insert(k.clone(), v.clone());
        }
    }
    serde_json::from_value(as_value)
        .map_err(|_| PlanError::UnknownTaskId(task.id.clone()))
}

fn insert_after(tasks: &mut Vec<Task>, task: Task, after_task_id: Option<&str>) {
    match after_task_id.and_then(|anchor| tasks.iter().position(|t| t.id == anchor)) {
        Some(idx) => tasks.insert(idx + 1, task),
        None => tasks.push(task),
    }
}

fn reorder_task(tasks: &mut Vec<Task>, task_id: &str, after_task_id: Option<&str>) {
    let Some(pos) = tasks.iter().position(|t| t.id == task_id) else {
        return; // unknown id -> no-op per spec
    };
    match after_task_id {
        None => {
            let t = tasks.remove(pos);
            tasks.insert(0, t);
        }
        Some(anchor) => {
            let Some(anchor_pos) = tasks.iter().position(|t| t.id == anchor) else {
                return; // unknown anchor -> no-op per spec
            };
            let t = tasks.remove(pos);
            let insert_at = if anchor_pos > pos { anchor_pos } else { anchor_pos + 1 };
            let insert_at = insert_at.min(tasks.len());
            tasks.insert(insert_at, t);
        }
    }
}

fn apply_one_op(plan: &mut Plan, op: &PatchOp, summary: &mut PatchSummary) -> Result<(), PlanError> {
    match op {
        PatchOp::AddTask { task, after_task_id } => {
            if plan.tasks.iter().any(|t| t.id == task.id) {
                return Err(PlanError::DuplicateAddTask(task.id.clone()));
            }
            insert_after(&mut plan.tasks, task.clone(), after_task_id.as_deref());
            summary.tasks_added += 1;
        }
        PatchOp::RemoveTask { task_id } => {
            let before = plan.tasks.len();
            plan.tasks.retain(|t| &t.id != task_id);
            if plan.tasks.len() == before {
                return Err(PlanError::UnknownTaskId(task_id.clone()));
            }
            for m in &mut plan.milestones {
                m.task_ids.retain(|id| id != task_id);
            }
            summary.tasks_removed += 1;
        }
        PatchOp::EditTask { task_id, changes } => {
            let idx = plan
                .tasks
                .iter()
                .position(|t| &t.id == task_id)
                .ok_or_else(|| PlanError::UnknownTaskId(task_id.clone()))?;
            let merged = merge_task_changes(&plan.tasks[idx], changes)?;
            plan.tasks[idx] = merged;
            summary.tasks_edited += 1;
        }
        PatchOp::Reorder { task_id, after_task_id } => {
            reorder_task(&mut plan.tasks, task_id, after_task_id.as_deref());
            summary.reorders += 1;
        }
        PatchOp::EditAcceptance { changes } => {
            if let Some(locked) = changes.get("locked").and_then(Value::as_bool) {
                plan.acceptance_locked = locked;
                summary.acceptance_lock_changed = true;
            }
        }
        PatchOp::EditTechStack { changes } => {
            if let Some(locked) = changes.get("locked").and_then(Value::as_bool) {
                plan.tech_stack_locked = locked;
                summary.tech_stack_lock_changed = true;
            }
        }
    }
    Ok(())
}

/// Apply `ops` to `plan` atomically: every op is applied in order against a
/// copy of the plan, then the full result is re-validated; on any failure
/// the original plan is returned unchanged along with the first offending
/// error.
pub fn apply_patch(plan: &Plan, ops: &[PatchOp]) -> Result<(Plan, PatchSummary), PatchError> {
    let mut next = plan.clone();
    let mut summary = PatchSummary::default();
    for (index, op) in ops.iter().enumerate() {
        apply_one_op(&mut next, op, &mut summary)
            .map_err(|source| PatchError::OpFailed { index, source })?;
    }
    next.validate().map_err(PatchError::ResultInvalid)?;
    Ok((next, summary))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::{SuccessCriterion, TaskType};

    fn task(id: &str) -> Task {
        Task {
            id: id.to_string(),
            title: id.to_string(),
            description: String::new(),
            dependencies: Vec::new(),
            tool_hints: Vec::new(),
            success_criteria: vec![SuccessCriterion::FileExists { path: "x".into() }],
            task_type: TaskType::Build,
        }
    }

    #[test]
    fn empty_patch_is_noop() {
        let plan = Plan::new("g", vec![task("t1")]);
        let (next, summary) = apply_patch(&plan, &[]).unwrap();
        assert_eq!(next, plan);
        assert_eq!(summary, PatchSummary::default());
    }

    #[test]
    fn add_then_remove_round_trips() {
        let plan = Plan::new("g", vec![task("t1")]);
        let add = PatchOp::AddTask { task: task("t2"), after_task_id: Some("t1".into()) };
        let (added, _) = apply_patch(&plan, std::slice::from_ref(&add)).unwrap();
        assert_eq!(added.tasks.len(), 2);

        let remove = PatchOp::RemoveTask { task_id: "t2".into() };
        let (back, _) = apply_patch(&added, std::slice::from_ref(&remove)).unwrap();
        assert_eq!(back.tasks, plan.tasks);
        assert_eq!(back.milestones, plan.milestones);
    }

    #[test]
    fn remove_task_strips_milestones() {
        let mut plan = Plan::new("g", vec![task("t1"), task("t2")]);
        plan.milestones.push(crate::plan::Milestone {
            id: "m1".into(),
            title: "m1".into(),
            task_ids: vec!["t1".into(), "t2".into()],
        });
        let (next, _) =
            apply_patch(&plan, &[PatchOp::RemoveTask { task_id: "t1".into() }]).unwrap();
        assert_eq!(next.milestones[0].task_ids, vec!["t2".to_string()]);
    }

    #[test]
    fn edit_task_cannot_change_id() {
        let plan = Plan::new("g", vec![task("t1")]);
        let changes = serde_json::json!({"id": "hijacked", "title": "new title"});
        let (next, _) =
            apply_patch(&plan, &[PatchOp::EditTask { task_id: "t1".into(), changes }]).unwrap();
        assert_eq!(next.tasks[0].id, "t1");
        assert_eq!(next.tasks[0].title, "new title");
    }

    #[test]
    fn reorder_missing_anchor_prepends() {
        let plan = Plan::new("g", vec![task("t1"), task("t2")]);
        let (next, _) =
            apply_patch(&plan, &[PatchOp::Reorder { task_id: "t2".into(), after_task_id: None }])
                .unwrap();
        assert_eq!(next.tasks[0].id, "t2");
    }

    #[test]
    fn reorder_unknown_anchor_is_noop() {
        let plan = Plan::new("g", vec![task("t1"), task("t2")]);
        let (next, _) = apply_patch(
            &plan,
            &[PatchOp::Reorder { task_id: "t2".into(), after_task_id: Some("missing".into()) }],
        )
        .unwrap();
        assert_eq!(next.tasks, plan.tasks);
    }

    #[test]
    fn invalid_patch_is_rejected_atomically() {
        let plan = Plan::new("g", vec![task("t1")]);
        let ops = vec![
            PatchOp::AddTask { task: task("t2"), after_task_id: None },
            PatchOp::RemoveTask { task_id: "does-not-exist".into() },
        ];
        let err = apply_patch(&plan, &ops).unwrap_err();
        assert!(matches!(err, PatchError::OpFailed { index: 1, .. }));
    }

    #[test]
    fn edit_acceptance_flips_lock() {
        let plan = Plan::new("g", vec![task("t1")]);
        let changes = serde_json::json!({"locked": true});
        let (next, summary) = apply_patch(&plan, &[PatchOp::EditAcceptance { changes }]).unwrap();
        assert!(next.acceptance_locked);
        assert!(summary.acceptance_lock_changed);
    }
}
