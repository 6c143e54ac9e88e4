//! LM contract: a minimal message/response transport. Request
//! encoding, response parsing, response-id chaining, and truncation/
//! compaction hints are the transport collaborator's concern; this module
//! defines only the shape it must satisfy.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// The role of one message in a conversation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// End-user message.
    User,
    /// Prior model output, resent to preserve context.
    Assistant,
    /// System-level instruction.
    System,
    /// Developer-level instruction (distinct from end-user input).
    Developer,
}

/// One message in an ordered conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    /// The message's role.
    pub role: Role,
    /// The message's text content.
    pub content: String,
}

impl Message {
    /// Construct a user-role message.
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into() }
    }

    /// Construct a system-role message.
    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: Role::System, content: content.into() }
    }

    /// Construct an assistant-role message.
    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: content.into() }
    }
}

/// Context-management hint forwarded to the transport.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContextManagement {
    /// Ask the transport to compact context once it exceeds a threshold.
    Compaction {
        /// Token threshold at which compaction should occur.
        compact_threshold: u64,
    },
}

/// Truncation behavior requested from the transport.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Truncation {
    /// Let the transport truncate automatically.
    Auto,
    /// Disable automatic truncation.
    Disabled,
}

/// Per-call options for an LM request.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct LmOptions {
    /// Sampling temperature, if the transport supports it.
    #[serde(default)]
    pub temperature: Option<f32>,
    /// Maximum output tokens.
    #[serde(default)]
    pub max_output_tokens: Option<u32>,
    /// System/developer instructions, separate from the message list.
    #[serde(default)]
    pub instructions: Option<String>,
    /// The prior call's response id, to enable server-side conversational
    /// state. `None` on the first call of a run.
    #[serde(default)]
    pub previous_response_id: Option<String>,
    /// Truncation behavior.
    #[serde(default)]
    pub truncation: Option<Truncation>,
    /// Context-management hints.
    #[serde(default)]
    pub context_management: Vec<ContextManagement>,
}

/// The transport's response to one call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LmResponse {
    /// Raw text output.
    pub text: String,
    /// An opaque id identifying this response, for `previous_response_id`
    /// chaining on the next call.
    #[serde(default)]
    pub response_id: Option<String>,
    /// Opaque usage accounting, passed through for audit.
    #[serde(default)]
    pub usage: Option<Value>,
    /// The raw, unparsed transport payload, kept for audit.
    #[serde(default)]
    pub raw: Option<Value>,
}

/// Errors raised by the LM transport collaborator.
#[derive(Debug, Error, Clone)]
pub enum LmError {
    /// The transport itself failed (network, auth, rate limit, ...).
    #[error("lm transport error: {0}")]
    Transport(String),
}

/// The LM contract: an ordered sequence of messages and options
/// in, a response out. The transport is responsible for request encoding,
/// response parsing, and threading `previous_response_id`; the core never
/// assumes a stateful transport and resends the full prompt each call.
#[async_trait]
pub trait LmClient: Send + Sync {
    /// Issue one call to the underlying LM.
    async fn respond(
        &self,
        messages: &[Message],
        options: &LmOptions,
    ) -> Result<LmResponse, LmError>;
}
