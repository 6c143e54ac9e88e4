//! The Executor: validates a proposed tool call against policy and the
//! tool's own input schema, invokes the tool, and merges its side effects
//! into run state. The executor never touches the filesystem itself; every
//! observable effect is the invoked tool's.

use async_trait::async_trait;
use loom_core::schema::CompiledSchema;
use loom_core::{
    AgentState, ErrorKind, LastError, Policy, Tool, ToolCall, ToolContext, ToolError, ToolOutcome,
};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::instrument;

/// The registered set of tools an Executor may invoke.
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    /// Construct an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool, keyed by its spec's name.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.spec().name.clone(), tool);
    }

    /// Look up a registered tool by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.get(name)
    }

    /// Registered tool names and specs, in insertion order is not
    /// guaranteed by `HashMap`; callers that need a stable order (the
    /// Planner Client's tool index) sort by name themselves.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Tool>> {
        self.tools.values()
    }
}

/// A human reviewer's decision on a newly introduced patch path (a file
/// write the executor has not seen before in this run). Pluggable so a
/// caller can route review to an actual human; the default implementation
/// denies with guidance, matching the teacher's fail-closed default for
/// unattended callbacks.
#[async_trait]
pub trait PatchReviewer: Send + Sync {
    /// Decide whether `paths` may be written.
    async fn review(&self, paths: &[String]) -> bool;
}

/// Denies every patch review request; the safe default when no reviewer is
/// wired in.
#[derive(Default)]
pub struct DenyingPatchReviewer;

#[async_trait]
impl PatchReviewer for DenyingPatchReviewer {
    async fn review(&self, _paths: &[String]) -> bool {
        false
    }
}

/// Result of one executor invocation, matching the contract in spec §4.4.
pub struct ExecutionResult {
    /// Whether the call ultimately succeeded.
    pub ok: bool,
    /// Human-readable note (error detail or empty on success).
    pub note: String,
    /// Paths touched by this specific call.
    pub touched_paths: Vec<String>,
    /// The tool's result payload, if any.
    pub result_data: Option<serde_json::Value>,
    /// The name of the tool invoked.
    pub tool_name: String,
}

/// Execute one proposed tool call against the registry, enforcing policy's
/// allowed-tools list, the tool's own input schema, and (for newly
/// introduced patch paths) an optional human patch-review hook.
#[instrument(skip(call, registry, ctx, state, policy, reviewer), fields(tool = %call.name))]
pub async fn execute(
    call: &ToolCall,
    registry: &ToolRegistry,
    ctx: &ToolContext<'_>,
    state: &mut AgentState,
    policy: &Policy,
    reviewer: Option<&dyn PatchReviewer>,
) -> ExecutionResult {
    if !policy.safety.allowed_tools.iter().any(|t| t == &call.name) {
        let msg = format!("tool {} is not in the allowed set", call.name);
        state.set_state_error(LastError::config(msg.clone()));
        return ExecutionResult {
            ok: false,
            note: msg,
            touched_paths: Vec::new(),
            result_data: None,
            tool_name: call.name.clone(),
        };
    }

    let Some(tool) = registry.get(&call.name) else {
        let msg = format!("unknown tool: {}", call.name);
        state.set_state_error(LastError::unknown(msg.clone()));
        return ExecutionResult {
            ok: false,
            note: msg,
            touched_paths: Vec::new(),
            result_data: None,
            tool_name: call.name.clone(),
        };
    };

    if let Ok(schema) = CompiledSchema::compile(&tool.spec().input_schema) {
        if let Err(e) = schema.validate(&call.input) {
            let msg = format!("input validation failed: {e}");
            state.set_state_error(LastError::config(msg.clone()));
            return ExecutionResult {
                ok: false,
                note: msg,
                touched_paths: Vec::new(),
                result_data: None,
                tool_name: call.name.clone(),
            };
        }
    }

    let before = ctx.memory.touched_paths();
    let outcome: ToolOutcome = tool.run(call.input.clone(), ctx).await;
    let after = ctx.memory.touched_paths();
    let new_patch_paths: Vec<String> =
        after.iter().filter(|p| !before.contains(p)).cloned().collect();

    state.record_touched_paths(after.iter().cloned());

    if !new_patch_paths.is_empty() {
        if let Some(reviewer) = reviewer {
            let approved = reviewer.review(&new_patch_paths).await;
            if !approved {
                let msg = "review rejected".to_string();
                state.set_state_error(LastError::config(msg.clone()));
                return ExecutionResult {
                    ok: false,
                    note: msg,
                    touched_paths: new_patch_paths,
                    result_data: None,
                    tool_name: call.name.clone(),
                };
            }
        }
        for p in &new_patch_paths {
            state.record_patch_path(p.clone());
        }
    }

    if !outcome.ok {
        let detail = outcome
            .error
            .as_ref()
            .map(tool_error_detail)
            .unwrap_or_else(|| "tool failed with no error detail".to_string());
        state.set_state_error(LastError { kind: ErrorKind::Unknown, message: detail.clone() });
        return ExecutionResult {
            ok: false,
            note: detail,
            touched_paths: new_patch_paths,
            result_data: outcome.data,
            tool_name: call.name.clone(),
        };
    }

    ExecutionResult {
        ok: true,
        note: String::new(),
        touched_paths: new_patch_paths,
        result_data: outcome.data,
        tool_name: call.name.clone(),
    }
}

fn tool_error_detail(e: &ToolError) -> String {
    const MAX: usize = 500;
    let mut msg = format!("{}: {}", e.code, e.message);
    if msg.len() > MAX {
        msg.truncate(MAX);
        msg.push_str("...");
    }
    msg
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use loom_core::{
        Plan, SharedMemory, SideEffect, SuccessCriterion, Task, TaskType, ToolMeta, ToolSafety, ToolSpec,
    };
    use serde_json::json;

    struct EchoTool {
        spec: ToolSpec,
    }

    impl EchoTool {
        fn new() -> Self {
            Self {
                spec: ToolSpec {
                    name: "tool_echo".into(),
                    description: "echo".into(),
                    category: "test".into(),
                    capabilities: vec![],
                    input_schema: json!({"type": "object", "required": ["path"], "properties": {"path": {"type": "string"}}}),
                    output_schema: None,
                    safety: ToolSafety { side_effects: SideEffect::Fs, allowlist: None },
                    docs: String::new(),
                    examples: vec![],
                },
            }
        }
    }

    #[async_trait]
    impl Tool for EchoTool {
        fn spec(&self) -> &ToolSpec {
            &self.spec
        }
        async fn run(&self, input: serde_json::Value, ctx: &ToolContext<'_>) -> ToolOutcome {
            let path = input["path"].as_str().unwrap().to_string();
            ctx.memory.record_touched_paths([path.clone()]);
            ToolOutcome::ok(json!({}), vec![path])
        }
    }

    fn sample_state() -> AgentState {
        AgentState::new(Plan::new(
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
        ))
    }

    fn allow_policy(tools: &[&str]) -> Policy {
        Policy {
            tech_stack: Default::default(),
            tech_stack_locked: false,
            acceptance: Default::default(),
            safety: loom_core::Safety {
                allowed_tools: tools.iter().map(|s| s.to_string()).collect(),
                allowed_commands: vec![],
            },
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
    async fn disallowed_tool_is_rejected_without_invoking_it() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool::new()));
        let mem = SharedMemory::new();
        let ctx = ToolContext { memory: &mem, lm_client: None, command_runner: None, project_root: "/root" };
        let mut state = sample_state();
        let policy = allow_policy(&["other_tool"]);
        let call = loom_core::ToolCall { name: "tool_echo".into(), input: json!({"path": "x"}) };
        let res = execute(&call, &registry, &ctx, &mut state, &policy, None).await;
        assert!(!res.ok);
        assert!(mem.touched_paths().is_empty());
    }

    #[tokio::test]
    async fn allowed_tool_merges_touched_paths() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool::new()));
        let mem = SharedMemory::new();
        let ctx = ToolContext { memory: &mem, lm_client: None, command_runner: None, project_root: "/root" };
        let mut state = sample_state();
        let policy = allow_policy(&["tool_echo"]);
        let call = loom_core::ToolCall { name: "tool_echo".into(), input: json!({"path": "a.txt"}) };
        let res = execute(&call, &registry, &ctx, &mut state, &policy, None).await;
        assert!(res.ok);
        assert_eq!(state.touched_files(), ["a.txt"]);
    }

    #[tokio::test]
    async fn schema_violation_is_rejected() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool::new()));
        let mem = SharedMemory::new();
        let ctx = ToolContext { memory: &mem, lm_client: None, command_runner: None, project_root: "/root" };
        let mut state = sample_state();
        let policy = allow_policy(&["tool_echo"]);
        let call = loom_core::ToolCall { name: "tool_echo".into(), input: json!({}) };
        let res = execute(&call, &registry, &ctx, &mut state, &policy, None).await;
        assert!(!res.ok);
    }

    #[tokio::test]
    async fn new_patch_path_is_rejected_when_reviewer_denies() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool::new()));
        let mem = SharedMemory::new();
        let ctx = ToolContext { memory: &mem, lm_client: None, command_runner: None, project_root: "/root" };
        let mut state = sample_state();
        let policy = allow_policy(&["tool_echo"]);
        let call = loom_core::ToolCall { name: "tool_echo".into(), input: json!({"path": "a.txt"}) };
        let reviewer = DenyingPatchReviewer;
        let res = execute(&call, &registry, &ctx, &mut state, &policy, Some(&reviewer)).await;
        assert!(!res.ok);
        assert!(state.patch_paths().is_empty());
    }

    #[test]
    fn meta_merge_helper_unused_in_default_outcome() {
        // Sanity: ToolOutcome::ok always sets meta so executor merge logic has
        // something to read from.
        let outcome = ToolOutcome::ok(json!({}), vec!["a".into()]);
        assert_eq!(outcome.meta, Some(ToolMeta { touched_paths: vec!["a".into()] }));
    }
}
