//! Tool transport seam — calls, outcomes, and the handshake-declared catalog.
//!
//! Tools live in an external process reached over a persistent channel. The
//! registry of available operations is not compiled in: it is learned from
//! the capability handshake, and every call is validated against it before
//! dispatch.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use crate::error::{SchemaError, TransportError};

/// Reserved tool name used for the capability handshake request.
pub const HANDSHAKE_OP: &str = "__handshake__";

/// A request to execute a remote tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    /// Name of the tool, from the handshake catalog
    pub name: String,

    /// Arguments as a JSON object
    pub arguments: serde_json::Value,
}

impl ToolCall {
    pub fn new(name: impl Into<String>, arguments: serde_json::Value) -> Self {
        Self {
            name: name.into(),
            arguments,
        }
    }
}

/// The result of a tool execution, as reported by the tool process.
///
/// `Pending` means the operation is long-running: the handle must be polled
/// via a follow-up status-check call until a terminal state is reached. The
/// transport only executes whatever call it is given; scheduling polls is
/// the reasoning loop's job.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ToolOutcome {
    /// The tool completed with a value payload
    Ok { payload: serde_json::Value },

    /// The operation is still running; poll with this handle
    Pending { handle: String },

    /// The tool itself failed (distinct from a transport failure)
    Error {
        #[serde(rename = "error_detail")]
        detail: String,
    },
}

impl ToolOutcome {
    /// Render the outcome as a tool-result turn body.
    pub fn render(&self) -> String {
        match self {
            ToolOutcome::Ok { payload } => match payload.as_str() {
                Some(s) => s.to_string(),
                None => payload.to_string(),
            },
            ToolOutcome::Pending { handle } => {
                format!("Operation in progress (handle: {handle})")
            }
            ToolOutcome::Error { detail } => format!("Error: {detail}"),
        }
    }
}

/// A tool made available by the external process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDescriptor {
    /// The tool name
    pub name: String,

    /// Description of what the tool does (sent to the model)
    #[serde(default)]
    pub description: String,

    /// JSON Schema describing the tool's arguments
    pub schema: serde_json::Value,
}

impl ToolDescriptor {
    /// Names listed in the schema's `required` array.
    fn required_arguments(&self) -> impl Iterator<Item = &str> {
        self.schema
            .get("required")
            .and_then(|r| r.as_array())
            .into_iter()
            .flatten()
            .filter_map(|v| v.as_str())
    }
}

/// The registry of remote operations, as declared by the handshake.
#[derive(Debug, Clone, Default)]
pub struct ToolCatalog {
    tools: HashMap<String, ToolDescriptor>,
}

impl ToolCatalog {
    pub fn new(descriptors: Vec<ToolDescriptor>) -> Self {
        let tools = descriptors
            .into_iter()
            .map(|d| (d.name.clone(), d))
            .collect();
        Self { tools }
    }

    /// Look up a tool by name.
    pub fn get(&self, name: &str) -> Option<&ToolDescriptor> {
        self.tools.get(name)
    }

    /// All descriptors, for the model request.
    pub fn descriptors(&self) -> Vec<ToolDescriptor> {
        self.tools.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Validate a call before dispatch: the tool must exist and every
    /// required argument must be present. Fails fast with a `SchemaError`.
    pub fn validate(&self, call: &ToolCall) -> Result<(), SchemaError> {
        let descriptor = self
            .tools
            .get(&call.name)
            .ok_or_else(|| SchemaError::UnknownTool(call.name.clone()))?;

        let args = call.arguments.as_object().ok_or(SchemaError::NotAnObject {
            tool: call.name.clone(),
        })?;

        for required in descriptor.required_arguments() {
            if !args.contains_key(required) {
                return Err(SchemaError::MissingArgument {
                    tool: call.name.clone(),
                    argument: required.to_string(),
                });
            }
        }
        Ok(())
    }
}

/// The tool transport contract.
///
/// Implementations marshal a call to the external process and await the
/// matching response. Guarantees: at-most-one in-flight request per
/// correlation id, no response reordering on the channel, and a single
/// handshake in flight at a time (concurrent invokers wait for it).
#[async_trait]
pub trait ToolTransport: Send + Sync {
    /// The handshake-declared catalog. Performs the handshake on first use.
    async fn catalog(&self) -> Result<ToolCatalog, TransportError>;

    /// Execute a tool call, waiting up to `timeout` for the response.
    ///
    /// Validates the tool name and required argument presence against the
    /// handshake catalog before dispatch, failing fast with a
    /// [`SchemaError`]. Channel-level failures surface as
    /// [`TransportError`].
    async fn invoke(&self, call: &ToolCall, timeout: Duration) -> crate::error::Result<ToolOutcome>;

    /// Tear down the channel and re-establish it with a fresh handshake.
    /// Used by the caller's retry-once policy after a transport failure.
    async fn reconnect(&self) -> Result<(), TransportError>;
}
