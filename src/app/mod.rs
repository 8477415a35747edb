//! Application wiring: configuration in, running server out.

use std::net::SocketAddr;
use std::sync::Arc;

use thiserror::Error;

use crate::config::{Config, ConfigError};
use crate::llm::UpstreamClient;
use crate::middleware::{LoggerMiddleware, Pipeline, from_middleware};
use crate::router::Router;
use crate::server::{Server, ServerError};

pub mod routes;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Server(#[from] ServerError),

    #[error("failed to build upstream client: {0}")]
    Client(#[from] reqwest::Error),
}

/// A bound, ready-to-run relay.
pub struct App {
    server: Server,
    pipeline: Pipeline,
}

impl App {
    /// Validates `config`, builds the upstream client and binds the listener.
    ///
    /// # Errors
    ///
    /// Fails on invalid configuration, a client that cannot be built, or an
    /// address that cannot be bound.
    pub async fn bind(config: &Config) -> Result<Self, AppError> {
        config.validate()?;
        let upstream = UpstreamClient::new(&config.upstream_url, &config.default_model)?;
        tracing::info!(
            upstream = %upstream.endpoint(),
            default_model = %config.default_model,
            "relay configured"
        );

        let mut router = Router::new();
        routes::register(&mut router, upstream);
        let pipeline = Pipeline::new(vec![from_middleware(Arc::new(LoggerMiddleware))], router);

        let server = Server::bind(&config.bind).await?;
        Ok(Self { server, pipeline })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.server.local_addr()
    }

    /// Serves requests until the process is terminated.
    pub async fn run(self) -> Result<(), AppError> {
        self.run_until(std::future::pending()).await
    }

    /// Serves requests until `shutdown` resolves.
    pub async fn run_until<S>(self, shutdown: S) -> Result<(), AppError>
    where
        S: Future<Output = ()> + Send,
    {
        let pipeline = self.pipeline;
        self.server
            .serve_until(
                move |request| {
                    let pipeline = pipeline.clone();
                    async move { pipeline.handle(request).await }
                },
                shutdown,
            )
            .await?;
        Ok(())
    }
}
