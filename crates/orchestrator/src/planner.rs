//! Planner Client: JSON-constrained LM calls with exactly one retry on
//! parse/schema failure. Renders the tool index the LM sees and threads
//! `previous_response_id` across calls without ever assuming the transport
//! is itself stateful (the full message history is resent every call).

use crate::executor::ToolRegistry;
use loom_core::{LmClient, LmError, LmOptions, Message, Plan, PlanChangeRequest, Policy, TaskActionPlan};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

/// One entry in the rendered tool index the planner prompts see.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolIndexEntry {
    /// Tool name.
    pub name: String,
    /// Coarse grouping.
    pub category: String,
    /// One-line summary (the tool's description).
    pub summary: String,
    /// Declared safety profile.
    pub safety: loom_core::ToolSafety,
    /// 16-hex-char SHA-256 prefix of the tool's input schema.
    pub input_schema_fingerprint: String,
}

/// Render every registered tool into a deterministic, name-sorted index.
#[must_use]
pub fn render_tool_index(registry: &ToolRegistry) -> Vec<ToolIndexEntry> {
    let mut entries: Vec<ToolIndexEntry> = registry
        .iter()
        .map(|tool| {
            let spec = tool.spec();
            ToolIndexEntry {
                name: spec.name.clone(),
                category: spec.category.clone(),
                summary: spec.description.clone(),
                safety: spec.safety.clone(),
                input_schema_fingerprint: spec.input_schema_fingerprint(),
            }
        })
        .collect();
    entries.sort_by(|a, b| a.name.cmp(&b.name));
    entries
}

/// Errors raised by a Planner Client operation.
#[derive(Debug, Error)]
pub enum PlannerError {
    /// The LM transport itself failed.
    #[error("lm transport error: {0}")]
    Transport(#[from] LmError),
    /// Both attempts failed to produce valid JSON matching the expected
    /// schema.
    #[error("invalid JSON/schema after {attempts} attempt(s): {reason}")]
    InvalidJson {
        /// Number of attempts made (always 2 for this error).
        attempts: usize,
        /// The final attempt's failure reason.
        reason: String,
    },
}

/// One LM call attempt's audit-relevant fields.
#[derive(Debug, Clone)]
pub struct PlannerAttempt {
    /// `previous_response_id` sent with this attempt, if any.
    pub previous_response_id_sent: Option<String>,
    /// Raw response text.
    pub raw_text: String,
    /// Response id returned by the transport, if any.
    pub response_id: Option<String>,
}

/// Full audit trail for one Planner Client operation: every attempt made
/// plus the final, successful response's id.
#[derive(Debug, Clone)]
pub struct PlannerAudit {
    /// Every attempt made (one or two entries).
    pub attempts: Vec<PlannerAttempt>,
    /// The response id of the attempt that finally succeeded.
    pub response_id: Option<String>,
}

fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    let rest = rest.trim_start_matches('\n');
    match rest.rfind("```") {
        Some(end) => rest[..end].trim(),
        None => rest.trim(),
    }
}

fn parse_strict_json<T: DeserializeOwned>(text: &str) -> Result<T, String> {
    serde_json::from_str(strip_code_fence(text)).map_err(|e| e.to_string())
}

async fn propose_json<T, F>(
    lm: &dyn LmClient,
    mut messages: Vec<Message>,
    previous_response_id: Option<String>,
    extra_validate: F,
) -> Result<(T, PlannerAudit), PlannerError>
where
    T: DeserializeOwned,
    F: Fn(&T) -> Result<(), String>,
{
    let mut attempts = Vec::new();
    let mut prev_id = previous_response_id;

    loop {
        let options = LmOptions { previous_response_id: prev_id.clone(), ..Default::default() };
        let resp = lm.respond(&messages, &options).await?;
        let parsed: Result<T, String> =
            parse_strict_json(&resp.text).and_then(|v| extra_validate(&v).map(|()| v));

        attempts.push(PlannerAttempt {
            previous_response_id_sent: prev_id.clone(),
            raw_text: resp.text.clone(),
            response_id: resp.response_id.clone(),
        });

        match parsed {
            Ok(value) => {
                let response_id = resp.response_id.clone();
                return Ok((value, PlannerAudit { attempts, response_id }));
            }
            Err(reason) => {
                if attempts.len() >= 2 {
                    return Err(PlannerError::InvalidJson { attempts: attempts.len(), reason });
                }
                prev_id = resp.response_id.clone();
                messages.push(Message::assistant(resp.text.clone()));
                messages.push(Message::user(format!(
                    "Invalid JSON/schema: {reason}. Return STRICT JSON only, no markdown."
                )));
            }
        }
    }
}

/// Propose a new plan from a goal, the rendered tool index, a summary of
/// run state, and the governing policy.
pub async fn propose_plan(
    lm: &dyn LmClient,
    goal: &str,
    tool_index: &[ToolIndexEntry],
    state_summary: &Value,
    policy: &Policy,
    constraints: &Value,
    previous_response_id: Option<String>,
) -> Result<(Plan, PlannerAudit), PlannerError> {
    let system = Message::system(
        "You are the planning component of a coding agent runtime. Respond with STRICT JSON \
         only, no markdown, matching the Plan v1 schema. Every task must carry at least one \
         machine-checkable success criterion.",
    );
    let user = Message::user(
        json!({
            "goal": goal,
            "tool_index": tool_index,
            "state_summary": state_summary,
            "policy": policy,
            "constraints": constraints,
        })
        .to_string(),
    );
    propose_json(lm, vec![system, user], previous_response_id, |plan: &Plan| {
        plan.validate().map_err(|e| e.to_string())
    })
    .await
}

/// Propose a task action plan: an ordered sequence of tool calls intended
/// to satisfy one task's success criteria.
pub async fn propose_task_action_plan(
    lm: &dyn LmClient,
    task: &loom_core::Task,
    plan_summary: &Value,
    state_summary: &Value,
    tool_index: &[ToolIndexEntry],
    recent_failures: &[String],
    previous_response_id: Option<String>,
) -> Result<(TaskActionPlan, PlannerAudit), PlannerError> {
    let system = Message::system(
        "Respond with STRICT JSON only, no markdown, matching the TaskActionPlan v1 schema. \
         Reference only tools present in the tool index. Prefer idempotent actions.",
    );
    let user = Message::user(
        json!({
            "task": task,
            "plan_summary": plan_summary,
            "state_summary": state_summary,
            "tool_index": tool_index,
            "recent_failures": recent_failures,
        })
        .to_string(),
    );
    propose_json(lm, vec![system, user], previous_response_id, |tap: &TaskActionPlan| {
        if tap.actions.is_empty() {
            Err("actions must be non-empty".to_string())
        } else {
            Ok(())
        }
    })
    .await
}

/// Propose a plan change after a task has exhausted its retries.
pub async fn propose_plan_change(
    lm: &dyn LmClient,
    current_plan: &Plan,
    policy: &Policy,
    failure_evidence: &[String],
    state_summary: &Value,
    previous_response_id: Option<String>,
) -> Result<(PlanChangeRequest, PlannerAudit), PlannerError> {
    let system = Message::system(
        "Respond with STRICT JSON only, no markdown, matching the PlanChangeRequest v2 schema.",
    );
    let user = Message::user(
        json!({
            "current_plan": current_plan,
            "policy": policy,
            "failure_evidence": failure_evidence,
            "state_summary": state_summary,
        })
        .to_string(),
    );
    propose_json(lm, vec![system, user], previous_response_id, |_: &PlanChangeRequest| Ok(())).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use loom_core::LmResponse;
    use std::sync::Mutex;

    struct ScriptedLm {
        responses: Mutex<Vec<LmResponse>>,
    }

    #[async_trait]
    impl LmClient for ScriptedLm {
        async fn respond(
            &self,
            _messages: &[Message],
            _options: &LmOptions,
        ) -> Result<LmResponse, LmError> {
            let mut g = self.responses.lock().unwrap();
            if g.is_empty() {
                return Err(LmError::Transport("no more scripted responses".into()));
            }
            Ok(g.remove(0))
        }
    }

    fn resp(text: &str, id: &str) -> LmResponse {
        LmResponse { text: text.to_string(), response_id: Some(id.to_string()), usage: None, raw: None }
    }

    fn minimal_plan_json() -> &'static str {
        r#"{"version":"v1","goal":"g","acceptance_locked":false,"tech_stack_locked":false,"milestones":[],"tasks":[{"id":"t1","title":"t1","description":"","dependencies":[],"tool_hints":[],"success_criteria":[{"type":"file_exists","path":"a.txt"}],"task_type":"build"}]}"#
    }

    fn sample_policy() -> Policy {
        Policy {
            tech_stack: Default::default(),
            tech_stack_locked: false,
            acceptance: Default::default(),
            safety: loom_core::Safety { allowed_tools: vec![], allowed_commands: vec![] },
            budgets: loom_core::Budgets {
                max_steps: 10,
                max_actions_per_task: 5,
                max_retries_per_task: 3,
                max_replans: 2,
            },
            user_explicitly_allowed_relax_acceptance: false,
        }
    }

    #[tokio::test]
    async fn first_attempt_success_needs_no_retry() {
        let lm = ScriptedLm { responses: Mutex::new(vec![resp(minimal_plan_json(), "r1")]) };
        let (plan, audit) = propose_plan(
            &lm,
            "goal",
            &[],
            &json!({}),
            &sample_policy(),
            &json!({}),
            None,
        )
        .await
        .unwrap();
        assert_eq!(plan.tasks.len(), 1);
        assert_eq!(audit.attempts.len(), 1);
        assert_eq!(audit.response_id.as_deref(), Some("r1"));
    }

    #[tokio::test]
    async fn invalid_json_retries_once_then_succeeds() {
        let lm = ScriptedLm {
            responses: Mutex::new(vec![resp("not json", "r1"), resp(minimal_plan_json(), "r2")]),
        };
        let (plan, audit) = propose_plan(
            &lm,
            "goal",
            &[],
            &json!({}),
            &sample_policy(),
            &json!({}),
            None,
        )
        .await
        .unwrap();
        assert_eq!(plan.tasks.len(), 1);
        assert_eq!(audit.attempts.len(), 2);
        assert_eq!(audit.attempts[1].previous_response_id_sent.as_deref(), Some("r1"));
        assert_eq!(audit.response_id.as_deref(), Some("r2"));
    }

    #[tokio::test]
    async fn invalid_json_twice_is_terminal() {
        let lm = ScriptedLm {
            responses: Mutex::new(vec![resp("not json", "r1"), resp("still not json", "r2")]),
        };
        let err = propose_plan(&lm, "goal", &[], &json!({}), &sample_policy(), &json!({}), None)
            .await
            .unwrap_err();
        assert!(matches!(err, PlannerError::InvalidJson { attempts: 2, .. }));
    }

    #[tokio::test]
    async fn strips_markdown_code_fence() {
        let fenced = format!("```json\n{}\n```", minimal_plan_json());
        let lm = ScriptedLm { responses: Mutex::new(vec![resp(&fenced, "r1")]) };
        let (plan, _) = propose_plan(&lm, "goal", &[], &json!({}), &sample_policy(), &json!({}), None)
            .await
            .unwrap();
        assert_eq!(plan.goal, "g");
    }
}
