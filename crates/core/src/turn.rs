//! Turn, transcript, and Session domain types.
//!
//! These are the core value objects that flow through the engine:
//! a user message arrives → the preparation stage normalizes it → the
//! reasoning loop appends assistant and tool turns → a final answer leaves.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::briefing::Briefing;

/// Stable identifier for a session (one ongoing conversation).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionKey(pub String);

impl SessionKey {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for SessionKey {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// The role of a turn in a transcript.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The end user
    User,
    /// The assistant (model decisions and final answers)
    Assistant,
    /// System instructions
    System,
    /// Tool execution result
    Tool,
}

/// A tool call requested on an assistant turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnToolCall {
    /// The model's id for this call (echoed back on the result turn)
    pub id: String,

    /// Name of the tool to invoke
    pub name: String,

    /// Arguments as a JSON value
    pub arguments: serde_json::Value,
}

/// One role-tagged message in a transcript.
///
/// An assistant turn may carry requested tool calls; a tool turn carries the
/// correlation id of the call it resolves. Invariant: every tool-call turn
/// is followed by exactly one matching tool-result turn, failed calls
/// included, so a stored transcript always replays cleanly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    /// Unique turn id
    pub id: String,

    /// Who produced this turn
    pub role: Role,

    /// The text content
    pub content: String,

    /// Tool calls requested by the assistant (if any)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<TurnToolCall>,

    /// If this is a tool result, which tool call it resolves
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,

    /// Timestamp
    pub timestamp: DateTime<Utc>,
}

impl Turn {
    /// Create a new user turn.
    pub fn user(content: impl Into<String>) -> Self {
        Self::tagged(Role::User, content)
    }

    /// Create a new assistant turn.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::tagged(Role::Assistant, content)
    }

    /// Create a new system turn.
    pub fn system(content: impl Into<String>) -> Self {
        Self::tagged(Role::System, content)
    }

    /// Create an assistant turn that requests tool calls.
    pub fn assistant_with_calls(content: impl Into<String>, calls: Vec<TurnToolCall>) -> Self {
        let mut turn = Self::tagged(Role::Assistant, content);
        turn.tool_calls = calls;
        turn
    }

    /// Create a tool-result turn resolving the given call id.
    pub fn tool_result(correlation_id: impl Into<String>, content: impl Into<String>) -> Self {
        let mut turn = Self::tagged(Role::Tool, content);
        turn.correlation_id = Some(correlation_id.into());
        turn
    }

    fn tagged(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            correlation_id: None,
            timestamp: Utc::now(),
        }
    }
}

/// Per-conversation mutable state: ordered transcript plus named fields.
///
/// Created on the first user message for a key; mutated by the preparation
/// stage and the reasoning loop; access is serialized per key by the session
/// store so no two loop instances mutate one Session concurrently.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// The session key this state belongs to
    pub key: SessionKey,

    /// Ordered transcript of turns
    pub transcript: Vec<Turn>,

    /// Structured user intent, replaced (not merged) on each refinement
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub briefing: Option<Briefing>,

    /// Set once the briefing-refinement sub-agent has run for this session
    #[serde(default)]
    pub briefing_refined: bool,

    /// Set when refinement failed and raw input was passed through unchanged
    #[serde(default)]
    pub briefing_unrefined_fallback: bool,

    /// Number of user turns handled for this session
    #[serde(default)]
    pub turn_counter: u64,

    /// Free-form named state fields (normalized message, host-supplied keys)
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub state: serde_json::Map<String, serde_json::Value>,

    /// When this session was created
    pub created_at: DateTime<Utc>,

    /// When the last mutation happened
    pub updated_at: DateTime<Utc>,
}

impl Session {
    /// Create an empty session for a key.
    pub fn new(key: SessionKey) -> Self {
        let now = Utc::now();
        Self {
            key,
            transcript: Vec::new(),
            briefing: None,
            briefing_refined: false,
            briefing_unrefined_fallback: false,
            turn_counter: 0,
            state: serde_json::Map::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Append a turn to the transcript.
    pub fn push_turn(&mut self, turn: Turn) {
        self.updated_at = Utc::now();
        self.transcript.push(turn);
    }

    /// Read a string field from named state.
    pub fn state_str(&self, key: &str) -> Option<&str> {
        self.state.get(key).and_then(|v| v.as_str())
    }

    /// Write a field into named state.
    pub fn set_state(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.updated_at = Utc::now();
        self.state.insert(key.into(), value);
    }

    /// The latest user turn's content, if any.
    pub fn latest_user_message(&self) -> Option<&str> {
        self.transcript
            .iter()
            .rev()
            .find(|t| t.role == Role::User)
            .map(|t| t.content.as_str())
    }

    /// Number of assistant turns produced by model calls.
    pub fn model_call_turns(&self) -> usize {
        self.transcript
            .iter()
            .filter(|t| t.role == Role::Assistant)
            .count()
    }
}
