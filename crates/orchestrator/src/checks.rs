//! Built-in check tools the Criteria Evaluator synthesizes calls to:
//! `tool_check_command`, `tool_check_file_exists`, `tool_check_file_contains`.
//! These are ordinary [`Tool`] implementations, invoked through the same
//! Executor path as any planner-proposed action so policy/safety still apply.

use async_trait::async_trait;
use loom_core::{SideEffect, Tool, ToolContext, ToolError, ToolOutcome, ToolSafety, ToolSpec};
use serde_json::{json, Value};
use std::path::{Component, Path, PathBuf};

/// Resolve `path` against `root`, rejecting any resolution that escapes
/// `root` via `..` components. Purely lexical: does not touch the
/// filesystem, so it also rejects traversal for paths that do not yet
/// exist.
#[must_use]
pub fn resolve_in_root(root: &str, path: &str) -> Option<PathBuf> {
    let mut out = PathBuf::from(root);
    let mut depth = 0usize;
    for component in Path::new(path).components() {
        match component {
            Component::Normal(part) => {
                out.push(part);
                depth += 1;
            }
            Component::CurDir => {}
            Component::ParentDir => {
                if depth == 0 {
                    return None;
                }
                out.pop();
                depth -= 1;
            }
            Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    Some(out)
}

fn name_spec(name: &str, description: &str, input_schema: Value) -> ToolSpec {
    ToolSpec {
        name: name.to_string(),
        description: description.to_string(),
        category: "check".to_string(),
        capabilities: vec!["check".to_string()],
        input_schema,
        output_schema: None,
        safety: ToolSafety { side_effects: SideEffect::None, allowlist: None },
        docs: String::new(),
        examples: Vec::new(),
    }
}

/// Passes iff running `cmd args...` (optionally in `cwd`) exits with
/// `expect_exit_code`.
pub struct CheckCommandTool {
    spec: ToolSpec,
}

impl Default for CheckCommandTool {
    fn default() -> Self {
        Self {
            spec: name_spec(
                "tool_check_command",
                "Run a command and check its exit code",
                json!({
                    "type": "object",
                    "required": ["cmd"],
                    "properties": {
                        "cmd": {"type": "string"},
                        "args": {"type": "array", "items": {"type": "string"}},
                        "cwd": {"type": "string"},
                        "expect_exit_code": {"type": "integer"}
                    }
                }),
            ),
        }
    }
}

#[async_trait]
impl Tool for CheckCommandTool {
    fn spec(&self) -> &ToolSpec {
        &self.spec
    }

    async fn run(&self, input: Value, ctx: &ToolContext<'_>) -> ToolOutcome {
        let Some(cmd) = input.get("cmd").and_then(Value::as_str) else {
            return ToolOutcome::fail(ToolError {
                code: "config".into(),
                message: "missing cmd".into(),
                detail: None,
            });
        };
        let args: Vec<String> = input
            .get("args")
            .and_then(Value::as_array)
            .map(|a| a.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
            .unwrap_or_default();
        let cwd = input.get("cwd").and_then(Value::as_str);
        let expect = input.get("expect_exit_code").and_then(Value::as_i64).unwrap_or(0) as i32;

        let Some(runner) = ctx.command_runner else {
            return ToolOutcome::fail(ToolError {
                code: "unknown".into(),
                message: "no command runner configured".into(),
                detail: None,
            });
        };
        match runner.run(cmd, &args, cwd).await {
            Ok(out) if out.exit_code == expect => ToolOutcome::ok(
                json!({"exit_code": out.exit_code, "stdout": out.stdout, "stderr": out.stderr}),
                Vec::new(),
            ),
            Ok(out) => ToolOutcome::fail(ToolError {
                code: "check_failed".into(),
                message: format!("exit code {} != expected {}", out.exit_code, expect),
                detail: Some(json!({"stdout": out.stdout, "stderr": out.stderr})),
            }),
            Err(e) => ToolOutcome::fail(e),
        }
    }
}

/// Passes iff `path` resolves inside the project root and exists.
pub struct CheckFileExistsTool {
    spec: ToolSpec,
}

impl Default for CheckFileExistsTool {
    fn default() -> Self {
        Self {
            spec: name_spec(
                "tool_check_file_exists",
                "Check that a file exists inside the project root",
                json!({
                    "type": "object",
                    "required": ["path"],
                    "properties": {"path": {"type": "string"}}
                }),
            ),
        }
    }
}

#[async_trait]
impl Tool for CheckFileExistsTool {
    fn spec(&self) -> &ToolSpec {
        &self.spec
    }

    async fn run(&self, input: Value, ctx: &ToolContext<'_>) -> ToolOutcome {
        let Some(path) = input.get("path").and_then(Value::as_str) else {
            return ToolOutcome::fail(ToolError {
                code: "config".into(),
                message: "missing path".into(),
                detail: None,
            });
        };
        let Some(resolved) = resolve_in_root(ctx.project_root, path) else {
            return ToolOutcome::fail(ToolError {
                code: "path_outside_root".into(),
                message: format!("path {path} resolves outside project root"),
                detail: None,
            });
        };
        if resolved.exists() {
            ToolOutcome::ok(json!({"exists": true}), Vec::new())
        } else {
            ToolOutcome::fail(ToolError {
                code: "check_failed".into(),
                message: format!("{path} does not exist"),
                detail: None,
            })
        }
    }
}

/// Passes iff `path` exists and its contents contain `contains`.
pub struct CheckFileContainsTool {
    spec: ToolSpec,
}

impl Default for CheckFileContainsTool {
    fn default() -> Self {
        Self {
            spec: name_spec(
                "tool_check_file_contains",
                "Check that a file exists and contains a substring",
                json!({
                    "type": "object",
                    "required": ["path", "contains"],
                    "properties": {
                        "path": {"type": "string"},
                        "contains": {"type": "string"}
                    }
                }),
            ),
        }
    }
}

#[async_trait]
impl Tool for CheckFileContainsTool {
    fn spec(&self) -> &ToolSpec {
        &self.spec
    }

    async fn run(&self, input: Value, ctx: &ToolContext<'_>) -> ToolOutcome {
        let (Some(path), Some(contains)) = (
            input.get("path").and_then(Value::as_str),
            input.get("contains").and_then(Value::as_str),
        ) else {
            return ToolOutcome::fail(ToolError {
                code: "config".into(),
                message: "missing path or contains".into(),
                detail: None,
            });
        };
        let Some(resolved) = resolve_in_root(ctx.project_root, path) else {
            return ToolOutcome::fail(ToolError {
                code: "path_outside_root".into(),
                message: format!("path {path} resolves outside project root"),
                detail: None,
            });
        };
        match std::fs::read_to_string(&resolved) {
            Ok(contents) if contents.contains(contains) => {
                ToolOutcome::ok(json!({"matched": true}), Vec::new())
            }
            Ok(_) => ToolOutcome::fail(ToolError {
                code: "check_failed".into(),
                message: format!("{path} does not contain expected substring"),
                detail: None,
            }),
            Err(e) => ToolOutcome::fail(ToolError {
                code: "check_failed".into(),
                message: format!("could not read {path}: {e}"),
                detail: None,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_simple_relative_path() {
        let resolved = resolve_in_root("/root", "a/b.txt").unwrap();
        assert_eq!(resolved, PathBuf::from("/root/a/b.txt"));
    }

    #[test]
    fn rejects_traversal_above_root() {
        assert!(resolve_in_root("/root", "../escape.txt").is_none());
        assert!(resolve_in_root("/root", "a/../../escape.txt").is_none());
    }

    #[test]
    fn allows_traversal_that_stays_within_root() {
        let resolved = resolve_in_root("/root", "a/../b.txt").unwrap();
        assert_eq!(resolved, PathBuf::from("/root/b.txt"));
    }
}
