//! Orchestrator: the Turn Loop that drives an agent run from a goal to
//! `done`/`failed`, wiring the Planner Client, Executor, Criteria
//! Evaluator, Replanner, and Audit Collector around [`loom_core`]'s plan
//! and state types.

#![deny(unsafe_code)]

pub mod audit;
pub mod checks;
pub mod clock;
pub mod criteria;
pub mod executor;
pub mod planner;
pub mod replanner;
pub mod runtime;

pub use audit::{AuditCollector, AuditDocument, FinalRecord, TurnRecord, TurnToolResult};
pub use checks::{resolve_in_root, CheckCommandTool, CheckFileContainsTool, CheckFileExistsTool};
pub use clock::{Clock, SystemClock, VirtualClock};
pub use criteria::{evaluate_criteria, CriteriaReport, ToolAuditEntry};
pub use executor::{execute, DenyingPatchReviewer, ExecutionResult, PatchReviewer, ToolRegistry};
pub use planner::{render_tool_index, PlannerAudit, PlannerError, ToolIndexEntry};
pub use replanner::{replan, ChangeReviewer, DenyingChangeReviewer, ReplanError, ReplanOutcome};
pub use runtime::{run, RunConfig, RunOutcome, StartupError};
