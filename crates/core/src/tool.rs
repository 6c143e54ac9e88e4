//! Tool contract: a named, schema-typed capability with a
//! declared safety profile, invoked by the runtime on behalf of the
//! planner. Tool implementations themselves are external collaborators;
//! this module only defines the interface they satisfy.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Mutex;

/// The class of side effect a tool may perform, used by the Policy & Gate
/// and by audit readers to reason about blast radius without reading the
/// tool's implementation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SideEffect {
    /// No observable side effect (pure computation, read-only check).
    None,
    /// Filesystem mutation.
    Fs,
    /// Process execution.
    Exec,
    /// An outbound call to an LM.
    Llm,
}

/// Declared safety profile for a tool.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ToolSafety {
    /// The class of side effect this tool may perform.
    pub side_effects: SideEffect,
    /// An optional allowlist further constraining what the tool may touch
    /// (e.g., path globs for an `fs` tool); tool-defined.
    #[serde(default)]
    pub allowlist: Option<Vec<String>>,
}

/// Static, registry-visible metadata for a tool. Rendered into the
/// planner's tool index and fingerprinted for drift detection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolSpec {
    /// Unique tool name.
    pub name: String,
    /// Human-readable description.
    pub description: String,
    /// Coarse grouping for the rendered tool index.
    pub category: String,
    /// Declared capabilities (free-form tags).
    #[serde(default)]
    pub capabilities: Vec<String>,
    /// JSON Schema for this tool's input.
    pub input_schema: Value,
    /// JSON Schema for this tool's output, if declared.
    #[serde(default)]
    pub output_schema: Option<Value>,
    /// Declared safety profile.
    pub safety: ToolSafety,
    /// Free-form documentation.
    #[serde(default)]
    pub docs: String,
    /// Example invocations, for planner prompting.
    #[serde(default)]
    pub examples: Vec<Value>,
}

impl ToolSpec {
    /// Stable fingerprint of this tool's input schema.
    #[must_use]
    pub fn input_schema_fingerprint(&self) -> String {
        crate::schema::fingerprint(&self.input_schema)
    }
}

/// Structured error returned by a failing tool invocation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolError {
    /// Tool-defined error code (e.g., `"config"`, `"not_found"`).
    pub code: String,
    /// Human-readable message.
    pub message: String,
    /// Optional structured detail (e.g., schema violation field paths).
    #[serde(default)]
    pub detail: Option<Value>,
}

/// Side-effect metadata returned alongside a tool's result.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ToolMeta {
    /// Paths the tool wrote, relative to the project root.
    #[serde(default)]
    pub touched_paths: Vec<String>,
}

/// The outcome of invoking a tool.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolOutcome {
    /// Whether the invocation succeeded.
    pub ok: bool,
    /// Result payload, if any.
    #[serde(default)]
    pub data: Option<Value>,
    /// Structured error, present iff `ok` is false.
    #[serde(default)]
    pub error: Option<ToolError>,
    /// Side-effect metadata.
    #[serde(default)]
    pub meta: Option<ToolMeta>,
}

impl ToolOutcome {
    /// Construct a successful outcome.
    #[must_use]
    pub fn ok(data: Value, touched_paths: Vec<String>) -> Self {
        Self {
            ok: true,
            data: Some(data),
            error: None,
            meta: Some(ToolMeta { touched_paths }),
        }
    }

    /// Construct a failing outcome.
    #[must_use]
    pub fn fail(error: ToolError) -> Self {
        Self { ok: false, data: None, error: Some(error), meta: None }
    }
}

/// A requested tool invocation, as proposed by a [`crate::plan::Action`]
/// (or synthesized by the Criteria Evaluator for a check tool).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCall {
    /// Registered tool name.
    pub name: String,
    /// Raw input, validated against the tool's schema before invocation.
    pub input: Value,
}

/// Output of invoking a command via the command-runner collaborator,
/// consumed by the built-in `tool_check_command` check tool.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CommandOutput {
    /// Process exit code.
    pub exit_code: i32,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
}

/// Collaborator capable of running a shell command, used by
/// `tool_check_command`.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `cmd args...` in `cwd` (or the project root if `None`).
    async fn run(
        &self,
        cmd: &str,
        args: &[String],
        cwd: Option<&str>,
    ) -> Result<CommandOutput, ToolError>;
}

/// Mutable shared memory threaded through a turn's tool invocations: patch
/// paths, touched paths, the last verification result, and well-known
/// project paths. Interior mutability via `Mutex` since tools may be
/// invoked from async contexts that do not hold `&mut` access.
#[derive(Debug, Default)]
pub struct SharedMemory {
    inner: Mutex<SharedMemoryInner>,
}

#[derive(Debug, Default, Clone)]
struct SharedMemoryInner {
    patch_paths: Vec<String>,
    touched_paths: Vec<String>,
    verify_result: Option<Value>,
    well_known_paths: HashMap<String, String>,
}

impl SharedMemory {
    /// Construct empty shared memory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record newly touched paths (deduplicated).
    pub fn record_touched_paths<I: IntoIterator<Item = String>>(&self, paths: I) {
        let mut g = self.inner.lock().expect("shared memory lock poisoned");
        for p in paths {
            if !g.touched_paths.contains(&p) {
                g.touched_paths.push(p);
            }
        }
    }

    /// Snapshot of touched paths recorded so far.
    #[must_use]
    pub fn touched_paths(&self) -> Vec<String> {
        self.inner.lock().expect("shared memory lock poisoned").touched_paths.clone()
    }

    /// Record a newly introduced patch path.
    pub fn record_patch_path(&self, path: impl Into<String>) {
        let mut g = self.inner.lock().expect("shared memory lock poisoned");
        let path = path.into();
        if !g.patch_paths.contains(&path) {
            g.patch_paths.push(path);
        }
    }

    /// Snapshot of patch paths recorded so far.
    #[must_use]
    pub fn patch_paths(&self) -> Vec<String> {
        self.inner.lock().expect("shared memory lock poisoned").patch_paths.clone()
    }

    /// Record the most recent verification result (e.g., from a `verify`
    /// task type tool).
    pub fn set_verify_result(&self, result: Value) {
        self.inner.lock().expect("shared memory lock poisoned").verify_result = Some(result);
    }

    /// The most recently recorded verification result, if any.
    #[must_use]
    pub fn verify_result(&self) -> Option<Value> {
        self.inner.lock().expect("shared memory lock poisoned").verify_result.clone()
    }

    /// Record a well-known project path (e.g., `"app"`, `"out"`, `"spec"`).
    pub fn set_well_known_path(&self, key: impl Into<String>, path: impl Into<String>) {
        self.inner
            .lock()
            .expect("shared memory lock poisoned")
            .well_known_paths
            .insert(key.into(), path.into());
    }

    /// Look up a well-known project path.
    #[must_use]
    pub fn well_known_path(&self, key: &str) -> Option<String> {
        self.inner.lock().expect("shared memory lock poisoned").well_known_paths.get(key).cloned()
    }
}

/// Execution context passed to every tool invocation.
pub struct ToolContext<'a> {
    /// Shared mutable memory for this run.
    pub memory: &'a SharedMemory,
    /// The LM client collaborator, for tools that themselves call the LM
    /// (`side_effects == Llm`).
    pub lm_client: Option<&'a (dyn crate::lm::LmClient)>,
    /// The command-runner collaborator.
    pub command_runner: Option<&'a (dyn CommandRunner)>,
    /// Project root all relative paths resolve against.
    pub project_root: &'a str,
}

/// A registered, schema-typed capability invoked by the runtime.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Static metadata for this tool.
    fn spec(&self) -> &ToolSpec;

    /// Invoke the tool with validated input.
    async fn run(&self, input: Value, ctx: &ToolContext<'_>) -> ToolOutcome;
}
