//! Hosted model backend speaking the tarn respond API.
//!
//! One endpoint, `POST {base}/v1/respond`, in two shapes: a plain JSON reply,
//! or an SSE stream of `delta` events closed by a `response` event carrying
//! the full reply. The API key is resolved per request, config over env.

use eventsource_stream::Eventsource;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::shared::{
    BackendRequest, BackendResponse, ChunkSink, ProviderError, ProviderErrorKind, ProviderResult,
    StreamChunk, USER_AGENT, classify_reqwest_error,
};
use crate::config::{RemoteConfig, resolve_api_key};
use crate::tools::{ToolCall, ToolDefinition};

const API_KEY_ENV: &str = "TARN_REMOTE_API_KEY";

pub struct RemoteBackend {
    config: RemoteConfig,
    http: reqwest::Client,
}

#[derive(Serialize)]
struct RespondRequest<'a> {
    model: &'a str,
    messages: &'a [super::shared::ChatMessage],
    #[serde(skip_serializing_if = "Option::is_none")]
    context: Option<&'a str>,
    #[serde(skip_serializing_if = "<[_]>::is_empty")]
    tools: &'a [ToolDefinition],
    #[serde(skip_serializing_if = "Option::is_none")]
    mode: Option<crate::core::policy::ConversationMode>,
    stream: bool,
}

#[derive(Deserialize)]
struct RespondResponse {
    #[serde(default)]
    text: String,
    #[serde(default)]
    tool_calls: Vec<ToolCall>,
}

#[derive(Deserialize)]
struct DeltaEvent {
    text: String,
}

#[derive(Deserialize)]
struct ErrorEvent {
    #[serde(rename = "type", default)]
    error_type: String,
    message: String,
}

impl RemoteBackend {
    pub fn new(config: RemoteConfig) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
        }
    }

    /// Sends one turn and returns the model's full reply.
    ///
    /// # Errors
    /// Fails on missing credentials, transport errors, non-2xx statuses, and
    /// malformed bodies.
    pub async fn send_message(&self, request: &BackendRequest) -> ProviderResult<BackendResponse> {
        let response = self.post(request, false).await?;
        let parsed: RespondResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::parse(format!("Failed to parse respond body: {e}")))?;
        Ok(finalize(parsed))
    }

    /// Sends one turn, delivering text deltas to `on_chunk` as they arrive.
    ///
    /// The final `response` event carries the authoritative reply; its text is
    /// returned even if it disagrees with the concatenated deltas.
    ///
    /// # Errors
    /// Fails like `send_message`, plus on streams that end without a final
    /// `response` event.
    pub async fn send_message_stream(
        &self,
        request: &BackendRequest,
        on_chunk: ChunkSink<'_>,
    ) -> ProviderResult<BackendResponse> {
        let response = self.post(request, true).await?;
        let mut events = response.bytes_stream().eventsource();
        let mut final_response: Option<BackendResponse> = None;

        while let Some(event) = events.next().await {
            let event = event.map_err(|e| ProviderError::parse(format!("SSE stream error: {e}")))?;
            match event.event.as_str() {
                "delta" => {
                    let delta: DeltaEvent = serde_json::from_str(&event.data).map_err(|e| {
                        ProviderError::parse(format!("Failed to parse delta event: {e}"))
                    })?;
                    on_chunk(StreamChunk::delta(delta.text));
                }
                "response" => {
                    let parsed: RespondResponse =
                        serde_json::from_str(&event.data).map_err(|e| {
                            ProviderError::parse(format!("Failed to parse response event: {e}"))
                        })?;
                    final_response = Some(finalize(parsed));
                }
                "error" => {
                    let parsed: ErrorEvent = serde_json::from_str(&event.data).map_err(|e| {
                        ProviderError::parse(format!("Failed to parse error event: {e}"))
                    })?;
                    return Err(ProviderError::api_error(&parsed.error_type, &parsed.message));
                }
                // Keep-alives and unknown event types are skipped.
                _ => {}
            }
        }

        let response = final_response
            .ok_or_else(|| ProviderError::parse("Stream ended without a response event"))?;
        on_chunk(StreamChunk::done(String::new()));
        Ok(response)
    }

    async fn post(
        &self,
        request: &BackendRequest,
        stream: bool,
    ) -> ProviderResult<reqwest::Response> {
        let api_key = resolve_api_key(self.config.api_key.as_deref(), API_KEY_ENV)
            .map_err(|e| ProviderError::new(ProviderErrorKind::ApiError, e.to_string()))?;

        let body = RespondRequest {
            model: &self.config.model,
            messages: &request.messages,
            context: request.context.as_deref(),
            tools: &request.tools,
            mode: request.mode,
            stream,
        };

        let url = format!("{}/v1/respond", self.config.base_url.trim_end_matches('/'));
        let response = self
            .http
            .post(&url)
            .header("content-type", "application/json")
            .header("accept", if stream { "text/event-stream" } else { "application/json" })
            .header("user-agent", USER_AGENT)
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| classify_reqwest_error(&e))?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            return Err(ProviderError::http_status(status.as_u16(), &error_body));
        }
        Ok(response)
    }
}

fn finalize(parsed: RespondResponse) -> BackendResponse {
    BackendResponse {
        text: parsed.text,
        tool_calls: parsed
            .tool_calls
            .into_iter()
            .map(|mut tc| {
                tc.arguments = normalize_arguments(tc.arguments);
                tc
            })
            .collect(),
    }
}

/// Flattens tool call arguments that arrive as JSON strings.
///
/// Some gateways double-encode arguments; a string that parses as an object
/// is unwrapped so tools always see an object.
pub(crate) fn normalize_arguments(arguments: Value) -> Value {
    match &arguments {
        Value::String(s) => serde_json::from_str::<Value>(s)
            .ok()
            .filter(Value::is_object)
            .unwrap_or(arguments),
        _ => arguments,
    }
}
