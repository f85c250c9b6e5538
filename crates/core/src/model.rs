//! ModelClient trait — the abstraction over the external text-completion
//! capability.
//!
//! The engine is a consumer of a model, never an implementor. A client sends
//! the current transcript plus the tool catalog and gets back either a final
//! answer or one-or-more requested tool calls, as a tagged variant. Unknown
//! response shapes are rejected at this boundary rather than trusted at use
//! sites.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ModelError;
use crate::tool::ToolDescriptor;
use crate::turn::Turn;

/// A request to the external completion capability.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelRequest {
    /// The model to use
    pub model: String,

    /// System instruction assembled from identity, briefing, and facts
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,

    /// The transcript so far
    pub messages: Vec<Turn>,

    /// Temperature (0.0 = deterministic)
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Maximum tokens to generate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Tools the model may request, from the transport handshake
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolDescriptor>,
}

fn default_temperature() -> f32 {
    0.7
}

/// A tool call requested by the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolRequest {
    /// The model's id for this call
    pub call_id: String,

    /// Name of the requested tool
    pub name: String,

    /// Arguments as a JSON value
    pub arguments: serde_json::Value,
}

/// The model's decision for one call: a final answer or tool requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ModelReply {
    /// A final textual answer for the user
    Answer { text: String },

    /// One or more requested tool calls (with optional interim reasoning)
    ToolRequests {
        #[serde(default)]
        reasoning: String,
        requests: Vec<ToolRequest>,
    },
}

/// Token usage statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// A complete response from a model client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelResponse {
    /// The model's decision
    pub reply: ModelReply,

    /// Which model actually responded
    pub model: String,

    /// Token usage, if reported
    pub usage: Option<Usage>,
}

/// The core ModelClient trait.
///
/// The reasoning loop and the sub-agents call `complete()` without knowing
/// which backend serves the request.
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// A human-readable name for this client (e.g. "openai", "scripted").
    fn name(&self) -> &str;

    /// Send a request and get a complete response.
    async fn complete(&self, request: ModelRequest) -> Result<ModelResponse, ModelError>;
}
