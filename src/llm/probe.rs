//! Connectivity probe: fixed prompt, status categories, and reply shape.

use std::fmt;

use serde::Serialize;

/// Prompt sent by the probe.
pub const PROBE_PROMPT: &str =
    "Hello! Please respond with 'Connection successful' to test the API.";

/// Token ceiling for the probe's reply.
pub const PROBE_MAX_TOKENS: u32 = 50;

/// Reply text used when the upstream's answer has no content.
pub const EMPTY_REPLY: &str = "No response";

/// Why the upstream rejected a probe, as shown to the caller.
///
/// The upstream's own error payload is never part of this; only the category is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeFailure {
    InvalidCredential,
    ModelNotFound,
    RateLimited,
    ConnectionFailed,
}

impl ProbeFailure {
    /// Maps a non-success upstream status to its category.
    ///
    /// # Examples
    ///
    /// ```
    /// use glm_relay::llm::probe::ProbeFailure;
    ///
    /// assert_eq!(ProbeFailure::from_status(401), ProbeFailure::InvalidCredential);
    /// assert_eq!(ProbeFailure::from_status(503), ProbeFailure::ConnectionFailed);
    /// ```
    pub fn from_status(status: u16) -> Self {
        match status {
            401 => Self::InvalidCredential,
            404 => Self::ModelNotFound,
            429 => Self::RateLimited,
            _ => Self::ConnectionFailed,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::InvalidCredential => "invalid credential",
            Self::ModelNotFound => "model not found",
            Self::RateLimited => "rate limit exceeded",
            Self::ConnectionFailed => "connection failed",
        }
    }
}

impl fmt::Display for ProbeFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Body of a successful probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProbeReply {
    pub success: bool,
    pub message: String,
    pub response: String,
}

impl ProbeReply {
    pub fn connected(response: impl Into<String>) -> Self {
        Self {
            success: true,
            message: "Connection successful!".to_owned(),
            response: response.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mapping_is_total() {
        assert_eq!(ProbeFailure::from_status(401).as_str(), "invalid credential");
        assert_eq!(ProbeFailure::from_status(404).as_str(), "model not found");
        assert_eq!(ProbeFailure::from_status(429).as_str(), "rate limit exceeded");
        for status in [400, 402, 403, 418, 500, 502, 503] {
            assert_eq!(ProbeFailure::from_status(status), ProbeFailure::ConnectionFailed);
        }
    }

    #[test]
    fn reply_serializes_with_success_flag() {
        let json = serde_json::to_value(ProbeReply::connected("Connection successful")).unwrap();
        assert_eq!(json["success"], true);
        assert_eq!(json["message"], "Connection successful!");
        assert_eq!(json["response"], "Connection successful");
    }
}
