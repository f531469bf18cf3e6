//! On-device model backend speaking the Ollama chat API.
//!
//! Non-streaming: one POST to `/api/chat` with `stream: false`. The server
//! does not assign tool call ids, so ids are generated here.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::shared::{
    BackendRequest, BackendResponse, ProviderError, ProviderResult, USER_AGENT,
    classify_reqwest_error,
};
use crate::config::LocalConfig;
use crate::tools::{ToolCall, ToolDefinition};

pub struct LocalBackend {
    config: LocalConfig,
    http: reqwest::Client,
}

#[derive(Serialize)]
struct ApiChatRequest<'a> {
    model: &'a str,
    messages: Vec<ApiChatMessage<'a>>,
    stream: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<ApiTool<'a>>,
}

#[derive(Serialize)]
struct ApiChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ApiTool<'a> {
    #[serde(rename = "type")]
    tool_type: &'static str,
    function: ApiFunction<'a>,
}

#[derive(Serialize)]
struct ApiFunction<'a> {
    name: &'a str,
    description: &'a str,
    parameters: &'a Value,
}

#[derive(Deserialize)]
struct ApiChatResponse {
    message: ApiResponseMessage,
}

#[derive(Deserialize)]
struct ApiResponseMessage {
    #[serde(default)]
    content: String,
    #[serde(default)]
    tool_calls: Vec<ApiToolCall>,
}

#[derive(Deserialize)]
struct ApiToolCall {
    function: ApiToolCallFunction,
}

#[derive(Deserialize)]
struct ApiToolCallFunction {
    name: String,
    #[serde(default)]
    arguments: Value,
}

impl LocalBackend {
    pub fn new(config: LocalConfig) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
        }
    }

    /// Sends one turn and returns the model's full reply.
    ///
    /// # Errors
    /// Fails on transport errors, non-2xx statuses, and malformed bodies.
    pub async fn send_message(&self, request: &BackendRequest) -> ProviderResult<BackendResponse> {
        let mut messages: Vec<ApiChatMessage<'_>> = Vec::with_capacity(request.messages.len() + 1);
        if let Some(context) = &request.context {
            messages.push(ApiChatMessage {
                role: "system",
                content: context,
            });
        }
        messages.extend(request.messages.iter().map(|m| ApiChatMessage {
            role: &m.role,
            content: &m.content,
        }));

        let body = ApiChatRequest {
            model: &self.config.model,
            messages,
            stream: false,
            tools: request.tools.iter().map(api_tool).collect(),
        };

        let url = format!("{}/api/chat", self.config.base_url.trim_end_matches('/'));
        let response = self
            .http
            .post(&url)
            .header("content-type", "application/json")
            .header("user-agent", USER_AGENT)
            .json(&body)
            .send()
            .await
            .map_err(|e| classify_reqwest_error(&e))?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            return Err(ProviderError::http_status(status.as_u16(), &error_body));
        }

        let parsed: ApiChatResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::parse(format!("Failed to parse chat response: {e}")))?;

        Ok(BackendResponse {
            text: parsed.message.content,
            tool_calls: parsed
                .message
                .tool_calls
                .into_iter()
                .map(|tc| ToolCall {
                    id: format!("local_{}", Uuid::new_v4()),
                    name: tc.function.name,
                    arguments: tc.function.arguments,
                })
                .collect(),
        })
    }
}

fn api_tool(def: &ToolDefinition) -> ApiTool<'_> {
    ApiTool {
        tool_type: "function",
        function: ApiFunction {
            name: &def.name,
            description: &def.description,
            parameters: &def.parameters,
        },
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::providers::shared::ChatMessage;

    fn backend(base_url: String) -> LocalBackend {
        LocalBackend::new(LocalConfig {
            enabled: true,
            base_url,
            model: "test-model".to_string(),
        })
    }

    fn request() -> BackendRequest {
        BackendRequest {
            messages: vec![ChatMessage::user("hello")],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_send_message_parses_text_reply() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .and(body_partial_json(json!({"model": "test-model", "stream": false})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "message": {"role": "assistant", "content": "hi there"}
            })))
            .mount(&server)
            .await;

        let response = backend(server.uri()).send_message(&request()).await.unwrap();
        assert_eq!(response.text, "hi there");
        assert!(response.tool_calls.is_empty());
    }

    #[tokio::test]
    async fn test_send_message_generates_tool_call_ids() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "message": {
                    "role": "assistant",
                    "content": "",
                    "tool_calls": [
                        {"function": {"name": "read", "arguments": {"path": "a.txt"}}}
                    ]
                }
            })))
            .mount(&server)
            .await;

        let response = backend(server.uri()).send_message(&request()).await.unwrap();
        assert_eq!(response.tool_calls.len(), 1);
        assert_eq!(response.tool_calls[0].name, "read");
        assert!(response.tool_calls[0].id.starts_with("local_"));
        assert_eq!(response.tool_calls[0].arguments, json!({"path": "a.txt"}));
    }

    #[tokio::test]
    async fn test_context_becomes_system_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .and(body_partial_json(json!({
                "messages": [
                    {"role": "system", "content": "project notes"},
                    {"role": "user", "content": "hello"}
                ]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "message": {"role": "assistant", "content": "ok"}
            })))
            .mount(&server)
            .await;

        let mut req = request();
        req.context = Some("project notes".to_string());
        let response = backend(server.uri()).send_message(&req).await.unwrap();
        assert_eq!(response.text, "ok");
    }

    #[tokio::test]
    async fn test_http_error_is_classified() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .respond_with(ResponseTemplate::new(500).set_body_string("model not loaded"))
            .mount(&server)
            .await;

        let err = backend(server.uri()).send_message(&request()).await.unwrap_err();
        assert_eq!(err.message, "HTTP 500");
        assert_eq!(err.details.as_deref(), Some("model not loaded"));
    }
}
