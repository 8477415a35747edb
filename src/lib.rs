//! # glm-relay
//!
//! A small web front-end and streaming relay for the BigModel chat-completion
//! API, served by a from-scratch async HTTP/1.1 server.
//!
//! The relay forwards a conversation upstream and streams the reply back as
//! plain text, one fragment per upstream event. A connectivity probe checks a
//! credential and model with a single short request.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use glm_relay::app::App;
//! use glm_relay::config::Config;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let app = App::bind(&Config::default()).await?;
//!     println!("Listening on http://{}", app.local_addr());
//!     app.run().await?;
//!     Ok(())
//! }
//! ```

pub mod app;
pub mod config;
pub mod context;
pub mod http;
pub mod llm;
pub mod middleware;
pub mod router;
pub mod server;
pub mod ui;

pub use http::{Headers, Method, Request, Response, StatusCode};
pub use server::{Server, ServerError};
