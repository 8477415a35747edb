//! HTTP client for the upstream chat-completion endpoint.

use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::error::RelayError;
use super::probe::{EMPTY_REPLY, PROBE_MAX_TOKENS, PROBE_PROMPT, ProbeReply};
use super::stream::{Fragments, relay};
use super::{ChatMessage, Settings};

/// The BigModel chat-completion endpoint.
pub const DEFAULT_ENDPOINT: &str = "https://open.bigmodel.cn/api/paas/v4/chat/completions";

/// Model used when the caller leaves the model blank.
pub const DEFAULT_MODEL: &str = "glm-4-plus";

const TEMPERATURE: f64 = 0.7;
// Upstream error bodies are logged up to this many characters.
const LOGGED_BODY_CHARS: usize = 512;
const CHAT_MAX_TOKENS: u32 = 2000;

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f64,
    max_tokens: u32,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct Completion {
    #[serde(default)]
    choices: Vec<CompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    #[serde(default)]
    message: CompletionMessage,
}

#[derive(Debug, Default, Deserialize)]
struct CompletionMessage {
    content: Option<String>,
}

/// Client for the one upstream endpoint. Holds no per-caller state; the
/// credential travels with each call.
///
/// Cloning is cheap and clones share the connection pool.
#[derive(Debug, Clone)]
pub struct UpstreamClient {
    http: reqwest::Client,
    endpoint: String,
    default_model: String,
}

impl UpstreamClient {
    /// Builds a client for `endpoint`. No request timeout is configured; a
    /// hung upstream keeps the caller's response open.
    pub fn new(
        endpoint: impl Into<String>,
        default_model: impl Into<String>,
    ) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("glm-relay/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            http,
            endpoint: endpoint.into(),
            default_model: default_model.into(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn model<'a>(&'a self, settings: &'a Settings) -> &'a str {
        match settings.model_name.trim() {
            "" => &self.default_model,
            model => model,
        }
    }

    async fn send(
        &self,
        credential: &str,
        request: &CompletionRequest<'_>,
    ) -> Result<reqwest::Response, reqwest::Error> {
        self.http
            .post(&self.endpoint)
            .bearer_auth(credential)
            .json(request)
            .send()
            .await
    }

    /// Opens a streamed completion for `messages` and returns its text fragments.
    ///
    /// # Errors
    ///
    /// - [`RelayError::MissingCredential`] before any upstream call when the key is blank.
    /// - [`RelayError::UpstreamStatus`] when the upstream rejects the request;
    ///   nothing has been streamed at that point.
    /// - [`RelayError::Transport`] when the upstream cannot be reached.
    ///
    /// Failures after this returns are reported in-band as
    /// [`StreamError`](super::StreamError)s.
    pub async fn stream_chat(
        &self,
        settings: &Settings,
        messages: &[ChatMessage],
    ) -> Result<Fragments, RelayError> {
        let credential = settings.credential().ok_or(RelayError::MissingCredential)?;
        let request = CompletionRequest {
            model: self.model(settings),
            messages,
            temperature: TEMPERATURE,
            max_tokens: CHAT_MAX_TOKENS,
            stream: true,
        };
        debug!(model = request.model, messages = messages.len(), "opening upstream stream");

        let response = self.send(credential, &request).await?;
        let status = response.status();
        if !status.is_success() {
            warn!(status = status.as_u16(), model = request.model, "upstream rejected chat request");
            return Err(RelayError::UpstreamStatus {
                status: status.as_u16(),
            });
        }

        Ok(relay(response.bytes_stream()).boxed())
    }

    /// Sends the fixed test prompt without streaming and returns the model's reply.
    ///
    /// # Errors
    ///
    /// Same as [`stream_chat`](Self::stream_chat). The upstream's error body is
    /// logged but not included in the error.
    pub async fn probe(&self, settings: &Settings) -> Result<ProbeReply, RelayError> {
        let credential = settings.credential().ok_or(RelayError::MissingCredential)?;
        let messages = [ChatMessage::user(PROBE_PROMPT)];
        let request = CompletionRequest {
            model: self.model(settings),
            messages: &messages,
            temperature: TEMPERATURE,
            max_tokens: PROBE_MAX_TOKENS,
            stream: false,
        };
        info!(model = request.model, "probing upstream");

        let response = self.send(credential, &request).await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(
                status = status.as_u16(),
                body = %clip(&body, LOGGED_BODY_CHARS),
                body_len = body.len(),
                "upstream rejected probe"
            );
            return Err(RelayError::UpstreamStatus {
                status: status.as_u16(),
            });
        }

        let completion: Completion = response.json().await?;
        let reply = completion
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|content| !content.is_empty())
            .unwrap_or_else(|| EMPTY_REPLY.to_owned());
        info!(model = request.model, "probe succeeded");

        Ok(ProbeReply::connected(reply))
    }
}

/// The first `max_chars` characters of `text`.
fn clip(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((end, _)) => &text[..end],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> UpstreamClient {
        UpstreamClient::new("http://127.0.0.1:9/never", DEFAULT_MODEL).unwrap()
    }

    #[test]
    fn request_body_shape() {
        let messages = [ChatMessage::user("hi")];
        let body = serde_json::to_value(CompletionRequest {
            model: "glm-4",
            messages: &messages,
            temperature: TEMPERATURE,
            max_tokens: CHAT_MAX_TOKENS,
            stream: true,
        })
        .unwrap();
        assert_eq!(
            body,
            serde_json::json!({
                "model": "glm-4",
                "messages": [{"role": "user", "content": "hi"}],
                "temperature": 0.7,
                "max_tokens": 2000,
                "stream": true,
            })
        );
    }

    #[test]
    fn blank_model_falls_back_to_default() {
        let c = client();
        assert_eq!(c.model(&Settings::new("k", "")), DEFAULT_MODEL);
        assert_eq!(c.model(&Settings::new("k", "  ")), DEFAULT_MODEL);
        assert_eq!(c.model(&Settings::new("k", "glm-4-flash")), "glm-4-flash");
    }

    #[tokio::test]
    async fn missing_credential_fails_before_any_call() {
        let c = client();
        let chat = c.stream_chat(&Settings::new("", "glm-4"), &[ChatMessage::user("hi")]).await;
        assert!(matches!(chat, Err(RelayError::MissingCredential)));
        let probe = c.probe(&Settings::new(" ", "glm-4")).await;
        assert!(matches!(probe, Err(RelayError::MissingCredential)));
    }

    #[test]
    fn logged_bodies_are_clipped_on_char_boundaries() {
        assert_eq!(clip("short", 512), "short");
        assert_eq!(clip("abcdef", 3), "abc");
        assert_eq!(clip("你好世界", 2), "你好");
        let long = "x".repeat(10_000);
        assert_eq!(clip(&long, LOGGED_BODY_CHARS).len(), LOGGED_BODY_CHARS);
    }
}
