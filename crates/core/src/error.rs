//! Error taxonomy shared across the runtime.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Coarse classification of a terminal or task-level failure.
///
/// `Deps`, `Ts`, `Rust`, and `Tauri` are diagnostic labels passed through
/// verbatim from verify-style collaborator tools; the core never produces
/// them itself and does not interpret them beyond display.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Input validation, policy rejection, denied plan change, exhausted
    /// replan budget, rejected patch review, invalid review decision.
    Config,
    /// Tool runtime failure or an unmapped internal invariant.
    Unknown,
    /// Dependency-resolution diagnostics surfaced by a collaborator tool.
    Deps,
    /// TypeScript diagnostics surfaced by a collaborator tool.
    Ts,
    /// Rust compiler diagnostics surfaced by a collaborator tool.
    Rust,
    /// Tauri build diagnostics surfaced by a collaborator tool.
    Tauri,
}

/// The last error observed by the runtime, surfaced verbatim in the audit
/// record and as the run summary on failure.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LastError {
    /// Coarse error classification.
    pub kind: ErrorKind,
    /// Human-readable message. For tool failures this is truncated detail,
    /// not the full collaborator error payload.
    pub message: String,
}

impl std::fmt::Display for LastError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl LastError {
    /// Construct a `Config`-kind error.
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self { kind: ErrorKind::Config, message: message.into() }
    }

    /// Construct an `Unknown`-kind error.
    #[must_use]
    pub fn unknown(message: impl Into<String>) -> Self {
        Self { kind: ErrorKind::Unknown, message: message.into() }
    }
}

/// Errors raised by the Plan Schema & Patch Engine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PlanError {
    /// Two tasks in the plan share an id.
    #[error("duplicate task id: {0}")]
    DuplicateTaskId(String),
    /// A task dependency refers to a task id that does not exist.
    #[error("task {task} depends on unknown task {dependency}")]
    UnknownDependency {
        /// The task whose dependency is invalid.
        task: String,
        /// The missing dependency id.
        dependency: String,
    },
    /// A milestone references a task id that does not exist.
    #[error("milestone {milestone} references unknown task {task}")]
    UnknownMilestoneTask {
        /// The milestone with the dangling reference.
        milestone: String,
        /// The missing task id.
        task: String,
    },
    /// Two milestones share an id.
    #[error("duplicate milestone id: {0}")]
    DuplicateMilestoneId(String),
    /// A plan with zero tasks was proposed or produced by a patch.
    #[error("plan has no tasks")]
    EmptyPlan,
    /// A success criterion list was empty for some task.
    #[error("task {0} has no success criteria")]
    EmptyCriteria(String),
    /// A patch referenced a task id that is not present in the plan.
    #[error("patch op referenced unknown task id: {0}")]
    UnknownTaskId(String),
    /// `add_task` supplied a task id that already exists.
    #[error("add_task: task id already exists: {0}")]
    DuplicateAddTask(String),
}

/// Errors raised while applying a patch: the first offending op or
/// invariant, per spec.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PatchError {
    /// The op at `index` failed to apply.
    #[error("patch op {index} failed: {source}")]
    OpFailed {
        /// Zero-based index of the failing op within the patch.
        index: usize,
        /// Underlying plan validation error.
        source: PlanError,
    },
    /// All ops applied but the resulting plan failed full re-validation.
    #[error("patch produced an invalid plan: {0}")]
    ResultInvalid(PlanError),
}
