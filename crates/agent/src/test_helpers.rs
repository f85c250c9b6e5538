//! Scripted doubles for the model and transport seams, used across the
//! crate's tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use parley_core::{
    Error, ModelClient, ModelError, ModelReply, ModelRequest, ModelResponse, Result, ToolCall,
    ToolCatalog, ToolDescriptor, ToolOutcome, ToolRequest, ToolTransport, TransportError,
};

/// A model client that replays a fixed script of responses.
pub struct ScriptedModel {
    responses: Mutex<VecDeque<std::result::Result<ModelResponse, ModelError>>>,
    requests: Mutex<Vec<ModelRequest>>,
    delay: Option<Duration>,
}

impl ScriptedModel {
    pub fn new(responses: Vec<std::result::Result<ModelResponse, ModelError>>) -> Self {
        Self {
            responses: Mutex::new(responses.into_iter().collect()),
            requests: Mutex::new(Vec::new()),
            delay: None,
        }
    }

    /// Sleep this long inside every completion, to let tests exercise
    /// overlap and queueing.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Number of completions requested so far.
    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<ModelRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ModelClient for ScriptedModel {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(
        &self,
        request: ModelRequest,
    ) -> std::result::Result<ModelResponse, ModelError> {
        self.requests.lock().unwrap().push(request);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(ModelError::Malformed("script exhausted".into())))
    }
}

pub fn answer(text: impl Into<String>) -> ModelResponse {
    ModelResponse {
        reply: ModelReply::Answer { text: text.into() },
        model: "scripted".into(),
        usage: None,
    }
}

pub fn tool_requests(requests: Vec<ToolRequest>) -> ModelResponse {
    ModelResponse {
        reply: ModelReply::ToolRequests {
            reasoning: String::new(),
            requests,
        },
        model: "scripted".into(),
        usage: None,
    }
}

pub fn request(call_id: &str, name: &str, arguments: serde_json::Value) -> ToolRequest {
    ToolRequest {
        call_id: call_id.into(),
        name: name.into(),
        arguments,
    }
}

/// One scripted transport behavior for a tool invocation.
pub enum ScriptedCall {
    /// Return this outcome immediately.
    Outcome(ToolOutcome),
    /// Sleep, then return the outcome. Lets tests skew completion order.
    Delayed(Duration, ToolOutcome),
    /// Fail at the channel level.
    Disconnect(String),
}

/// A transport that replays per-tool scripts and records invocation order.
pub struct ScriptedTransport {
    catalog: ToolCatalog,
    scripts: Mutex<HashMap<String, VecDeque<ScriptedCall>>>,
    invocations: Mutex<Vec<ToolCall>>,
    reconnects: AtomicUsize,
}

impl ScriptedTransport {
    pub fn new(catalog: ToolCatalog) -> Self {
        Self {
            catalog,
            scripts: Mutex::new(HashMap::new()),
            invocations: Mutex::new(Vec::new()),
            reconnects: AtomicUsize::new(0),
        }
    }

    pub fn script(self, tool: &str, calls: Vec<ScriptedCall>) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .insert(tool.to_string(), calls.into_iter().collect());
        self
    }

    /// Tool names in the order they were dispatched.
    pub fn invoked_names(&self) -> Vec<String> {
        self.invocations
            .lock()
            .unwrap()
            .iter()
            .map(|call| call.name.clone())
            .collect()
    }

    pub fn invocations(&self) -> Vec<ToolCall> {
        self.invocations.lock().unwrap().clone()
    }

    pub fn reconnects(&self) -> usize {
        self.reconnects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ToolTransport for ScriptedTransport {
    async fn catalog(&self) -> std::result::Result<ToolCatalog, TransportError> {
        Ok(self.catalog.clone())
    }

    async fn invoke(&self, call: &ToolCall, _timeout: Duration) -> Result<ToolOutcome> {
        self.catalog.validate(call).map_err(Error::Schema)?;
        self.invocations.lock().unwrap().push(call.clone());

        let scripted = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(&call.name)
            .and_then(|queue| queue.pop_front());

        match scripted {
            Some(ScriptedCall::Outcome(outcome)) => Ok(outcome),
            Some(ScriptedCall::Delayed(delay, outcome)) => {
                tokio::time::sleep(delay).await;
                Ok(outcome)
            }
            Some(ScriptedCall::Disconnect(reason)) => {
                Err(Error::Transport(TransportError::ChannelClosed(reason)))
            }
            None => Ok(ToolOutcome::Error {
                detail: format!("no scripted outcome for {}", call.name),
            }),
        }
    }

    async fn reconnect(&self) -> std::result::Result<(), TransportError> {
        self.reconnects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// A descriptor whose schema requires the given argument names.
pub fn descriptor(name: &str, required: &[&str]) -> ToolDescriptor {
    ToolDescriptor {
        name: name.into(),
        description: format!("scripted tool {name}"),
        schema: serde_json::json!({
            "type": "object",
            "required": required,
        }),
    }
}

pub fn catalog_of(descriptors: Vec<ToolDescriptor>) -> ToolCatalog {
    ToolCatalog::new(descriptors)
}
