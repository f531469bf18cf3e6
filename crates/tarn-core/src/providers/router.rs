//! Backend selection and dispatch.
//!
//! Selection is re-resolved from settings on every call; nothing about a
//! previous turn's routing is cached. There is no automatic cross-backend
//! retry: a failure on the chosen backend surfaces to the caller.

use tracing::debug;

use super::local::LocalBackend;
use super::remote::RemoteBackend;
use super::shared::{BackendRequest, BackendResponse, ChunkSink, ProviderResult, StreamChunk};
use crate::config::{Config, ProviderChoice, ProviderSettings};

/// Picks the backend for one call.
///
/// A disabled local backend with fallback allowed routes to the remote one;
/// with fallback denied the local backend is still chosen so the request
/// fails loudly instead of silently leaving the device.
pub fn resolve(settings: &ProviderSettings, local_enabled: bool) -> ProviderChoice {
    match settings.provider {
        ProviderChoice::Local if local_enabled => ProviderChoice::Local,
        ProviderChoice::Local if settings.allow_remote_fallback => ProviderChoice::Remote,
        ProviderChoice::Local => ProviderChoice::Local,
        ProviderChoice::Remote => ProviderChoice::Remote,
    }
}

/// One facade over the two concrete backends.
pub struct Router {
    settings: ProviderSettings,
    local_enabled: bool,
    remote: RemoteBackend,
    local: LocalBackend,
}

impl Router {
    pub fn new(config: &Config) -> Self {
        Self {
            settings: config.providers.clone(),
            local_enabled: config.local.enabled,
            remote: RemoteBackend::new(config.remote.clone()),
            local: LocalBackend::new(config.local.clone()),
        }
    }

    /// Sends one turn on the backend the settings resolve to.
    ///
    /// # Errors
    /// Propagates the chosen backend's failure.
    pub async fn send_message(&self, request: &BackendRequest) -> ProviderResult<BackendResponse> {
        match self.resolve_for_call() {
            ProviderChoice::Remote => self.remote.send_message(request).await,
            ProviderChoice::Local => self.local.send_message(request).await,
        }
    }

    /// Streaming variant of `send_message`.
    ///
    /// When the resolved backend does not stream, the full reply is delivered
    /// to `on_chunk` as one final chunk, so callers observe the same contract
    /// either way.
    ///
    /// # Errors
    /// Propagates the chosen backend's failure.
    pub async fn send_message_stream(
        &self,
        request: &BackendRequest,
        on_chunk: ChunkSink<'_>,
    ) -> ProviderResult<BackendResponse> {
        match self.resolve_for_call() {
            ProviderChoice::Remote => self.remote.send_message_stream(request, on_chunk).await,
            ProviderChoice::Local => {
                let response = self.local.send_message(request).await?;
                on_chunk(StreamChunk::done(response.text.clone()));
                Ok(response)
            }
        }
    }

    fn resolve_for_call(&self) -> ProviderChoice {
        let choice = resolve(&self.settings, self.local_enabled);
        debug!(?choice, "resolved backend");
        choice
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::providers::shared::ChatMessage;

    fn settings(provider: ProviderChoice, allow_remote_fallback: bool) -> ProviderSettings {
        ProviderSettings {
            provider,
            allow_remote_fallback,
        }
    }

    #[test]
    fn test_local_enabled_stays_local() {
        let choice = resolve(&settings(ProviderChoice::Local, true), true);
        assert_eq!(choice, ProviderChoice::Local);
    }

    #[test]
    fn test_local_disabled_with_fallback_goes_remote() {
        let choice = resolve(&settings(ProviderChoice::Local, true), false);
        assert_eq!(choice, ProviderChoice::Remote);
    }

    #[test]
    fn test_local_disabled_without_fallback_fails_loud() {
        // Still routed locally so the request errors instead of silently
        // leaving the device.
        let choice = resolve(&settings(ProviderChoice::Local, false), false);
        assert_eq!(choice, ProviderChoice::Local);
    }

    #[test]
    fn test_remote_is_remote_regardless_of_local_state() {
        assert_eq!(
            resolve(&settings(ProviderChoice::Remote, false), true),
            ProviderChoice::Remote
        );
        assert_eq!(
            resolve(&settings(ProviderChoice::Remote, true), false),
            ProviderChoice::Remote
        );
    }

    async fn local_config(server: &MockServer) -> Config {
        let mut config = Config::default();
        config.providers.provider = ProviderChoice::Local;
        config.local.enabled = true;
        config.local.base_url = server.uri();
        config
    }

    #[tokio::test]
    async fn test_router_dispatches_to_local() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "message": {"role": "assistant", "content": "local reply"}
            })))
            .mount(&server)
            .await;

        let router = Router::new(&local_config(&server).await);
        let request = BackendRequest {
            messages: vec![ChatMessage::user("hi")],
            ..Default::default()
        };

        let response = router.send_message(&request).await.unwrap();
        assert_eq!(response.text, "local reply");
    }

    #[tokio::test]
    async fn test_streaming_over_local_is_one_final_chunk() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "message": {"role": "assistant", "content": "whole reply"}
            })))
            .mount(&server)
            .await;

        let router = Router::new(&local_config(&server).await);
        let request = BackendRequest {
            messages: vec![ChatMessage::user("hi")],
            ..Default::default()
        };

        let mut chunks = Vec::new();
        let mut sink = |chunk: StreamChunk| chunks.push(chunk);
        let response = router.send_message_stream(&request, &mut sink).await.unwrap();

        assert_eq!(response.text, "whole reply");
        assert_eq!(chunks, vec![StreamChunk::done("whole reply")]);
    }

    #[tokio::test]
    async fn test_disabled_local_without_fallback_errors() {
        // Nothing is listening on the local port, so the request must fail
        // rather than fall back to the remote backend.
        let mut config = Config::default();
        config.providers.provider = ProviderChoice::Local;
        config.providers.allow_remote_fallback = false;
        config.local.enabled = false;
        config.local.base_url = "http://127.0.0.1:1".to_string();

        let router = Router::new(&config);
        let request = BackendRequest {
            messages: vec![ChatMessage::user("hi")],
            ..Default::default()
        };

        assert!(router.send_message(&request).await.is_err());
    }
}
