//! Audit Collector: an append-only per-turn record plus a single final
//! record written once on termination, backed by [`event_log::JsonlEventLog`].

use crate::clock::Clock;
use crate::planner::ToolIndexEntry;
use event_log::{EventId, EventLogError, JsonlEventLog};
use loom_core::{BudgetsUsed, LastError, Policy, Status, ToolCall};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;

/// One check-or-action tool invocation's result, as recorded for a turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnToolResult {
    /// The tool invoked.
    pub name: String,
    /// Whether it succeeded.
    pub ok: bool,
    /// Error detail, if it failed.
    pub error: Option<String>,
    /// Paths touched by this call, if any.
    #[serde(default)]
    pub touched_paths: Vec<String>,
}

/// One turn's full record: the LM exchange that drove it plus every tool
/// call submitted and its result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnRecord {
    /// 1-based turn number.
    pub turn: u64,
    /// Raw LM response text for this turn's planning call.
    pub raw_text: String,
    /// `previous_response_id` sent with the call.
    pub previous_response_id_sent: Option<String>,
    /// `response_id` the transport returned.
    pub response_id: Option<String>,
    /// Opaque usage accounting, passed through from the transport.
    pub usage: Option<Value>,
    /// What this turn represents: `"initial_plan"`, `"task_action_plan:<id>"`,
    /// or `"plan_change:<decision>"`.
    pub note: String,
    /// Tool calls submitted this turn, in submission order.
    pub tool_calls: Vec<ToolCall>,
    /// Results for each submitted call, in the same order.
    pub tool_results: Vec<TurnToolResult>,
}

/// The single record written once a run terminates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalRecord {
    /// Terminal status (`done` or `failed`).
    pub status: Status,
    /// Most recent recorded criteria failures per task id.
    pub verify_history: std::collections::HashMap<String, Vec<String>>,
    /// Patch paths produced over the run.
    pub patch_paths: Vec<String>,
    /// Touched files, truncated to the most recent 200.
    pub touched_files: Vec<String>,
    /// Budget counters consumed.
    pub budgets: BudgetsUsed,
    /// The last error observed, if any.
    pub last_error: Option<LastError>,
    /// The policy this run was governed by.
    pub policy: Policy,
    /// The tool index the planner saw.
    pub tool_index: Vec<ToolIndexEntry>,
}

/// Top-level audit document shape, matching the persisted JSON layout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditDocument {
    /// The run's goal.
    pub goal: String,
    /// Every turn record, in order.
    pub turns: Vec<TurnRecord>,
    /// The final record, present once the run has terminated.
    pub final_record: Option<FinalRecord>,
}

/// Collects per-turn audit records during a run and flushes a final record
/// on termination. Every record is appended to the backing JSONL log as
/// soon as it is produced; `flush` is what writes the `final` record, not
/// what persists the turns (those are already durable).
pub struct AuditCollector {
    log: JsonlEventLog,
    path: String,
    next_id: EventId,
    clock: Arc<dyn Clock>,
    goal: String,
}

impl AuditCollector {
    /// Open (or create) the audit log at `path` for a run with the given
    /// goal.
    pub fn open(
        path: impl AsRef<Path>,
        goal: impl Into<String>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, EventLogError> {
        let log = JsonlEventLog::open(&path)?;
        Ok(Self {
            log,
            path: path.as_ref().to_string_lossy().into_owned(),
            next_id: 1,
            clock,
            goal: goal.into(),
        })
    }

    /// Append one turn's record.
    pub fn record_turn(&mut self, record: &TurnRecord) -> Result<EventId, EventLogError> {
        let id = self.next_id;
        self.next_id += 1;
        self.log.append(id, self.clock.now_ms(), &AuditEntry::Turn(record.clone()))
    }

    /// Write the final record, closing out the run's audit trail.
    pub fn flush(&mut self, record: &FinalRecord) -> Result<EventId, EventLogError> {
        let id = self.next_id;
        self.next_id += 1;
        self.log.append(id, self.clock.now_ms(), &AuditEntry::Final(record.clone()))
    }

    /// Path of the backing log file.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Re-read every entry from the backing log and assemble the full
    /// audit document (goal, ordered turns, final record if present).
    pub fn read_document(&self) -> Result<AuditDocument, EventLogError> {
        let records: Vec<event_log::EventRecord<AuditEntry>> = self.log.read_all()?;
        let mut turns = Vec::new();
        let mut final_record = None;
        for rec in records {
            match rec.payload {
                AuditEntry::Turn(t) => turns.push(t),
                AuditEntry::Final(f) => final_record = Some(f),
            }
        }
        Ok(AuditDocument { goal: self.goal.clone(), turns, final_record })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum AuditEntry {
    Turn(TurnRecord),
    Final(FinalRecord),
}

/// Truncate `touched_files` to the most recent `limit` entries, preserving
/// order, for inclusion in a [`FinalRecord`].
#[must_use]
pub fn last_n(touched_files: &[String], limit: usize) -> Vec<String> {
    if touched_files.len() <= limit {
        touched_files.to_vec()
    } else {
        touched_files[touched_files.len() - limit..].to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::VirtualClock;
    use loom_core::{Acceptance, Budgets, ErrorKind, Safety};

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

    #[test]
    fn turn_and_final_records_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        let clock = Arc::new(VirtualClock::new(1_000));
        let mut collector = AuditCollector::open(&path, "build a thing", clock).unwrap();

        collector
            .record_turn(&TurnRecord {
                turn: 1,
                raw_text: "{}".into(),
                previous_response_id_sent: None,
                response_id: Some("r1".into()),
                usage: None,
                note: "initial_plan".into(),
                tool_calls: vec![],
                tool_results: vec![],
            })
            .unwrap();

        collector
            .flush(&FinalRecord {
                status: Status::Done,
                verify_history: Default::default(),
                patch_paths: vec![],
                touched_files: vec!["a.txt".into()],
                budgets: BudgetsUsed::default(),
                last_error: None,
                policy: sample_policy(),
                tool_index: vec![],
            })
            .unwrap();

        let doc = collector.read_document().unwrap();
        assert_eq!(doc.goal, "build a thing");
        assert_eq!(doc.turns.len(), 1);
        assert_eq!(doc.final_record.unwrap().status, Status::Done);
    }

    #[test]
    fn last_n_truncates_from_the_front() {
        let files: Vec<String> = (0..5).map(|i| i.to_string()).collect();
        assert_eq!(last_n(&files, 3), vec!["2", "3", "4"]);
        assert_eq!(last_n(&files, 10), files);
    }

    #[test]
    fn last_error_kind_serializes_through_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        let clock = Arc::new(VirtualClock::new(0));
        let mut collector = AuditCollector::open(&path, "g", clock).unwrap();
        collector
            .flush(&FinalRecord {
                status: Status::Failed,
                verify_history: Default::default(),
                patch_paths: vec![],
                touched_files: vec![],
                budgets: BudgetsUsed::default(),
                last_error: Some(LastError { kind: ErrorKind::Config, message: "denied".into() }),
                policy: sample_policy(),
                tool_index: vec![],
            })
            .unwrap();
        let doc = collector.read_document().unwrap();
        let last_error = doc.final_record.unwrap().last_error.unwrap();
        assert_eq!(last_error.kind, ErrorKind::Config);
    }
}
