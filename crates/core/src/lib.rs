//! loom-core: plan schema, patch engine, run state, and the tool/LM
//! contracts through which the orchestrator reaches its external
//! collaborators.
//!
//! This crate owns no I/O. Every type here is pure data or a trait; the
//! `orchestrator` crate wires them into the Plan → Execute → Review →
//! Replan loop.

#![deny(unsafe_code)]

/// Version of the loom-core library.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod error;
pub mod gate;
pub mod ids;
pub mod lm;
pub mod patch;
pub mod plan;
pub mod schema;
pub mod state;
pub mod tool;

pub use error::{ErrorKind, LastError, PatchError, PlanError};
pub use gate::{Acceptance, Budgets, GateResult, GateStatus, Policy, Safety};
pub use lm::{LmClient, LmError, LmOptions, LmResponse, Message, Role};
pub use patch::{apply_patch, ChangeType, Impact, PatchOp, PatchSummary, PlanChangeRequest};
pub use plan::{Action, Milestone, OnFail, Plan, SuccessCriterion, Task, TaskActionPlan, TaskType};
pub use state::{
    AgentState, BudgetsUsed, Flags, PlanHistoryEntry, ReviewDecision, ReviewDecisionKind, Status,
};
pub use tool::{
    CommandOutput, CommandRunner, SharedMemory, SideEffect, Tool, ToolCall, ToolContext,
    ToolError, ToolMeta, ToolOutcome, ToolSafety, ToolSpec,
};
