//! Upstream chat-completion integration.
//!
//! - [`client::UpstreamClient`]: issues the streamed chat request and the
//!   connectivity probe against the configured completion endpoint.
//! - [`stream`]: turns the upstream event stream into plain text fragments.
//! - [`probe`]: status-code categories and reply shape of the connectivity probe.

use std::fmt;

use serde::{Deserialize, Serialize};

pub mod client;
pub mod error;
pub mod probe;
pub mod stream;

pub use client::UpstreamClient;
pub use error::{DecodeError, RelayError, StreamError};

/// Who authored a [`ChatMessage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One turn of the conversation. Order within a conversation is significant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// Caller-supplied credential and model, sent with every request.
///
/// Field names follow the browser front-end (`apiKey`, `modelName`);
/// `credential` and `modelIdentifier` are accepted too.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    #[serde(rename = "apiKey", alias = "credential")]
    pub api_key: String,
    #[serde(rename = "modelName", alias = "modelIdentifier")]
    pub model_name: String,
}

impl Settings {
    pub fn new(api_key: impl Into<String>, model_name: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model_name: model_name.into(),
        }
    }

    /// The credential with surrounding whitespace removed, or `None` if blank.
    pub fn credential(&self) -> Option<&str> {
        let key = self.api_key.trim();
        (!key.is_empty()).then_some(key)
    }
}

impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Settings")
            .field("api_key", &"<redacted>")
            .field("model_name", &self.model_name)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roles_serialize_lowercase() {
        let json = serde_json::to_string(&ChatMessage::user("hi")).unwrap();
        assert_eq!(json, r#"{"role":"user","content":"hi"}"#);
        let m: ChatMessage = serde_json::from_str(r#"{"role":"assistant","content":"yo"}"#).unwrap();
        assert_eq!(m.role, Role::Assistant);
        assert_eq!(m.content, "yo");
    }

    #[test]
    fn unknown_role_is_rejected() {
        assert!(serde_json::from_str::<ChatMessage>(r#"{"role":"system","content":"x"}"#).is_err());
    }

    #[test]
    fn settings_accept_both_field_spellings() {
        let a: Settings = serde_json::from_str(r#"{"apiKey":"k","modelName":"glm-4"}"#).unwrap();
        let b: Settings =
            serde_json::from_str(r#"{"credential":"k","modelIdentifier":"glm-4"}"#).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.credential(), Some("k"));
    }

    #[test]
    fn blank_credential_is_none() {
        assert_eq!(Settings::new("   ", "glm-4").credential(), None);
        assert_eq!(Settings::default().credential(), None);
    }

    #[test]
    fn debug_hides_the_key() {
        let out = format!("{:?}", Settings::new("sk-secret", "glm-4"));
        assert!(!out.contains("sk-secret"));
        assert!(out.contains("glm-4"));
    }
}
