//! Command-line and environment configuration.

use clap::Parser;
use thiserror::Error;

use crate::llm::client::{DEFAULT_ENDPOINT, DEFAULT_MODEL};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("bind address must not be empty")]
    EmptyBind,

    #[error("upstream URL must start with http:// or https://, got {0:?}")]
    InvalidUpstreamUrl(String),

    #[error("default model must not be empty")]
    EmptyDefaultModel,
}

/// Runtime configuration. Every flag can also be set through its environment variable.
#[derive(Debug, Clone, Parser)]
#[command(name = "glm-relay", version, about = "Streaming chat relay and web front-end for the BigModel API")]
pub struct Config {
    /// Address the HTTP server listens on.
    #[arg(long, env = "GLM_RELAY_BIND", default_value = "127.0.0.1:3000")]
    pub bind: String,

    /// Chat-completion endpoint requests are forwarded to.
    #[arg(long, env = "GLM_RELAY_UPSTREAM_URL", default_value = DEFAULT_ENDPOINT)]
    pub upstream_url: String,

    /// Model used when a request leaves the model blank.
    #[arg(long, env = "GLM_RELAY_DEFAULT_MODEL", default_value = DEFAULT_MODEL)]
    pub default_model: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:3000".to_owned(),
            upstream_url: DEFAULT_ENDPOINT.to_owned(),
            default_model: DEFAULT_MODEL.to_owned(),
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.bind.trim().is_empty() {
            return Err(ConfigError::EmptyBind);
        }
        let url = self.upstream_url.trim();
        let has_host = ["http://", "https://"]
            .iter()
            .any(|scheme| url.strip_prefix(scheme).is_some_and(|rest| !rest.is_empty()));
        if !has_host {
            return Err(ConfigError::InvalidUpstreamUrl(self.upstream_url.clone()));
        }
        if self.default_model.trim().is_empty() {
            return Err(ConfigError::EmptyDefaultModel);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        assert_eq!(config.validate(), Ok(()));
        assert_eq!(config.default_model, "glm-4-plus");
    }

    #[test]
    fn parses_flags() {
        let config = Config::try_parse_from([
            "glm-relay",
            "--bind",
            "0.0.0.0:8080",
            "--upstream-url",
            "http://localhost:9000/v1/chat/completions",
            "--default-model",
            "glm-4-flash",
        ])
        .unwrap();
        assert_eq!(config.bind, "0.0.0.0:8080");
        assert_eq!(config.upstream_url, "http://localhost:9000/v1/chat/completions");
        assert_eq!(config.default_model, "glm-4-flash");
    }

    #[test]
    fn rejects_bad_upstream() {
        for url in ["", "ftp://example.com", "https://", "open.bigmodel.cn/api"] {
            let config = Config {
                upstream_url: url.to_owned(),
                ..Config::default()
            };
            assert!(matches!(
                config.validate(),
                Err(ConfigError::InvalidUpstreamUrl(_))
            ));
        }
    }

    #[test]
    fn rejects_blank_fields() {
        let config = Config {
            bind: " ".to_owned(),
            ..Config::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::EmptyBind));
        let config = Config {
            default_model: String::new(),
            ..Config::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::EmptyDefaultModel));
    }
}
