//! OpenAI-compatible model client.
//!
//! The engine is a consumer of an external text-completion capability; this
//! crate is the HTTP shape of that consumption. Works with any endpoint
//! exposing `/v1/chat/completions` (OpenAI, OpenRouter, Ollama, vLLM, ...).
//!
//! The response is normalized at this boundary into the tagged
//! `ModelReply`: a final answer or a list of tool requests. Anything else
//! is rejected as `ModelError::Malformed` instead of being trusted
//! downstream.

use async_trait::async_trait;
use parley_core::error::ModelError;
use parley_core::model::{
    ModelClient, ModelReply, ModelRequest, ModelResponse, ToolRequest, Usage,
};
use parley_core::tool::ToolDescriptor;
use parley_core::turn::{Role, Turn};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// An OpenAI-compatible model client.
pub struct HttpModelClient {
    name: String,
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl HttpModelClient {
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .build()
            .expect("failed to build HTTP client");

        Self {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            client,
        }
    }

    /// OpenAI convenience constructor.
    pub fn openai(api_key: impl Into<String>) -> Self {
        Self::new("openai", "https://api.openai.com/v1", api_key)
    }

    /// OpenRouter convenience constructor.
    pub fn openrouter(api_key: impl Into<String>) -> Self {
        Self::new("openrouter", "https://openrouter.ai/api/v1", api_key)
    }

    fn to_api_messages(request: &ModelRequest) -> Vec<ApiMessage> {
        let mut messages = Vec::with_capacity(request.messages.len() + 1);

        if let Some(system) = &request.system {
            messages.push(ApiMessage {
                role: "system".into(),
                content: Some(system.clone()),
                tool_calls: None,
                tool_call_id: None,
            });
        }

        for turn in &request.messages {
            messages.push(ApiMessage {
                role: match turn.role {
                    Role::User => "user".into(),
                    Role::Assistant => "assistant".into(),
                    Role::System => "system".into(),
                    Role::Tool => "tool".into(),
                },
                content: Some(turn.content.clone()),
                tool_calls: if turn.tool_calls.is_empty() {
                    None
                } else {
                    Some(
                        turn.tool_calls
                            .iter()
                            .map(|tc| ApiToolCall {
                                id: tc.id.clone(),
                                r#type: "function".into(),
                                function: ApiFunction {
                                    name: tc.name.clone(),
                                    arguments: tc.arguments.to_string(),
                                },
                            })
                            .collect(),
                    )
                },
                tool_call_id: turn.correlation_id.clone(),
            });
        }

        messages
    }

    fn to_api_tools(tools: &[ToolDescriptor]) -> Vec<ApiToolDefinition> {
        tools
            .iter()
            .map(|t| ApiToolDefinition {
                r#type: "function".into(),
                function: ApiToolFunction {
                    name: t.name.clone(),
                    description: t.description.clone(),
                    parameters: t.schema.clone(),
                },
            })
            .collect()
    }
}

#[async_trait]
impl ModelClient for HttpModelClient {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(&self, request: ModelRequest) -> Result<ModelResponse, ModelError> {
        let url = format!("{}/chat/completions", self.base_url);

        let mut body = serde_json::json!({
            "model": request.model,
            "messages": Self::to_api_messages(&request),
            "temperature": request.temperature,
            "stream": false,
        });
        if let Some(max_tokens) = request.max_tokens {
            body["max_tokens"] = serde_json::json!(max_tokens);
        }
        if !request.tools.is_empty() {
            body["tools"] = serde_json::json!(Self::to_api_tools(&request.tools));
        }

        debug!(client = %self.name, model = %request.model, "sending completion request");

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ModelError::Timeout { timeout_secs: 120 }
                } else {
                    ModelError::Network(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(match status.as_u16() {
                401 | 403 => ModelError::AuthenticationFailed(message),
                429 => ModelError::RateLimited {
                    retry_after_secs: 1,
                },
                code => ModelError::ApiError {
                    status_code: code,
                    message,
                },
            });
        }

        let api: ApiResponse = response
            .json()
            .await
            .map_err(|e| ModelError::Malformed(format!("bad response body: {e}")))?;

        parse_api_response(api)
    }
}

/// Normalize the API response into the tagged `ModelReply`.
fn parse_api_response(api: ApiResponse) -> Result<ModelResponse, ModelError> {
    let choice = api
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| ModelError::Malformed("response has no choices".into()))?;

    let content = choice.message.content.unwrap_or_default();
    let tool_calls = choice.message.tool_calls.unwrap_or_default();

    let reply = if tool_calls.is_empty() {
        if content.is_empty() {
            return Err(ModelError::Malformed(
                "response has neither content nor tool calls".into(),
            ));
        }
        ModelReply::Answer { text: content }
    } else {
        let mut requests = Vec::with_capacity(tool_calls.len());
        for tc in tool_calls {
            let arguments = serde_json::from_str(&tc.function.arguments)
                .map_err(|e| ModelError::Malformed(format!("bad tool arguments: {e}")))?;
            requests.push(ToolRequest {
                call_id: tc.id,
                name: tc.function.name,
                arguments,
            });
        }
        ModelReply::ToolRequests {
            reasoning: content,
            requests,
        }
    };

    Ok(ModelResponse {
        reply,
        model: api.model,
        usage: api.usage.map(|u| Usage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        }),
    })
}

// --- API wire types ---

#[derive(Debug, Serialize)]
struct ApiMessage {
    role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<ApiToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiToolCall {
    id: String,
    r#type: String,
    function: ApiFunction,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiFunction {
    name: String,
    arguments: String,
}

#[derive(Debug, Serialize)]
struct ApiToolDefinition {
    r#type: String,
    function: ApiToolFunction,
}

#[derive(Debug, Serialize)]
struct ApiToolFunction {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    model: String,
    choices: Vec<ApiChoice>,
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    message: ApiResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ApiResponseMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ApiToolCall>>,
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_core::turn::TurnToolCall;

    #[test]
    fn text_choice_parses_as_answer() {
        let api: ApiResponse = serde_json::from_str(
            r#"{
                "model": "gpt-4o-mini",
                "choices": [{"message": {"content": "Nothing new since March."}}],
                "usage": {"prompt_tokens": 12, "completion_tokens": 6, "total_tokens": 18}
            }"#,
        )
        .unwrap();

        let response = parse_api_response(api).unwrap();
        assert!(matches!(
            response.reply,
            ModelReply::Answer { text } if text.contains("Nothing new")
        ));
        assert_eq!(response.usage.unwrap().total_tokens, 18);
    }

    #[test]
    fn tool_call_choice_parses_as_requests() {
        let api: ApiResponse = serde_json::from_str(
            r#"{
                "model": "gpt-4o-mini",
                "choices": [{"message": {
                    "content": "Checking the transcript first.",
                    "tool_calls": [{
                        "id": "call_1",
                        "type": "function",
                        "function": {"name": "fetch_talk", "arguments": "{\"url\": \"https://x\"}"}
                    }]
                }}],
                "usage": null
            }"#,
        )
        .unwrap();

        let response = parse_api_response(api).unwrap();
        match response.reply {
            ModelReply::ToolRequests {
                reasoning,
                requests,
            } => {
                assert_eq!(reasoning, "Checking the transcript first.");
                assert_eq!(requests.len(), 1);
                assert_eq!(requests[0].name, "fetch_talk");
                assert_eq!(requests[0].arguments["url"], "https://x");
            }
            other => panic!("expected tool requests, got {other:?}"),
        }
    }

    #[test]
    fn empty_choice_is_malformed() {
        let api: ApiResponse =
            serde_json::from_str(r#"{"model": "m", "choices": [{"message": {}}], "usage": null}"#)
                .unwrap();
        assert!(matches!(
            parse_api_response(api),
            Err(ModelError::Malformed(_))
        ));
    }

    #[test]
    fn no_choices_is_malformed() {
        let api: ApiResponse =
            serde_json::from_str(r#"{"model": "m", "choices": [], "usage": null}"#).unwrap();
        assert!(matches!(
            parse_api_response(api),
            Err(ModelError::Malformed(_))
        ));
    }

    #[test]
    fn api_messages_carry_tool_plumbing() {
        let mut assistant = Turn::assistant("checking");
        assistant.tool_calls = vec![TurnToolCall {
            id: "call_1".into(),
            name: "fetch_talk".into(),
            arguments: serde_json::json!({"url": "https://x"}),
        }];
        let request = ModelRequest {
            model: "gpt-4o-mini".into(),
            system: Some("You are Parley.".into()),
            messages: vec![
                Turn::user("what's new?"),
                assistant,
                Turn::tool_result("call_1", "transcript text"),
            ],
            temperature: 0.7,
            max_tokens: None,
            tools: vec![],
        };

        let messages = HttpModelClient::to_api_messages(&request);
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[0].role, "system");
        assert_eq!(messages[2].tool_calls.as_ref().unwrap().len(), 1);
        assert_eq!(messages[3].role, "tool");
        assert_eq!(messages[3].tool_call_id.as_deref(), Some("call_1"));
    }
}
