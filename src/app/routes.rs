//! Route handlers for the chat relay, the connectivity probe, and the UI.

use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use crate::context::Context;
use crate::llm::probe::ProbeFailure;
use crate::llm::stream::text_body;
use crate::llm::{ChatMessage, RelayError, Settings, UpstreamClient};
use crate::router::Router;
use crate::{Response, StatusCode, ui};

const INVALID_BODY: &str = "invalid request body";

#[derive(Debug, Deserialize)]
struct ChatPayload {
    #[serde(default)]
    messages: Vec<ChatMessage>,
    #[serde(flatten)]
    settings: Settings,
}

#[derive(Debug, Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
}

/// Registers every endpoint on `router`, with handlers sharing `upstream`.
pub fn register(router: &mut Router, upstream: UpstreamClient) {
    router.get("/", |_ctx: Context| async { index() });

    let client = upstream.clone();
    router.post("/api/chat", move |ctx: Context| {
        let client = client.clone();
        async move { chat(&client, ctx).await }
    });

    for path in ["/api/test", "/api/test-connection"] {
        let client = upstream.clone();
        router.post(path, move |ctx: Context| {
            let client = client.clone();
            async move { probe(&client, ctx).await }
        });
    }
}

fn index() -> Response {
    Response::new(StatusCode::Ok)
        .header("Content-Type", "text/html; charset=utf-8")
        .body(ui::INDEX_HTML)
}

async fn chat(client: &UpstreamClient, ctx: Context) -> Response {
    let payload: ChatPayload = match ctx.json() {
        Ok(payload) => payload,
        Err(e) => {
            log_rejected(&e);
            return Response::new(StatusCode::BadRequest).body(INVALID_BODY);
        }
    };

    match client.stream_chat(&payload.settings, &payload.messages).await {
        Ok(fragments) => Response::new(StatusCode::Ok)
            .header("Content-Type", "text/plain; charset=utf-8")
            .header("Cache-Control", "no-cache")
            .stream(text_body(fragments)),
        Err(e) => {
            let body = match &e {
                RelayError::MissingCredential => "missing credential".to_owned(),
                RelayError::UpstreamStatus { status } => format!("API Error: {status}"),
                RelayError::Transport(source) => {
                    error!(error = %source, "chat request could not reach upstream");
                    "Server error".to_owned()
                }
            };
            Response::new(e.status_code()).body(body)
        }
    }
}

async fn probe(client: &UpstreamClient, ctx: Context) -> Response {
    let settings: Settings = match ctx.json() {
        Ok(settings) => settings,
        Err(e) => {
            log_rejected(&e);
            return failure(StatusCode::BadRequest, INVALID_BODY);
        }
    };

    match client.probe(&settings).await {
        Ok(reply) => Response::json(StatusCode::Ok, &reply),
        Err(RelayError::MissingCredential) => failure(StatusCode::BadRequest, "missing credential"),
        Err(RelayError::UpstreamStatus { status }) => {
            failure(StatusCode::BadRequest, ProbeFailure::from_status(status).as_str())
        }
        Err(RelayError::Transport(e)) => {
            error!(error = %e, "probe could not reach upstream");
            failure(StatusCode::InternalServerError, "network error")
        }
    }
}

fn failure(status: StatusCode, error: &str) -> Response {
    Response::json(status, &ErrorBody { error })
}

fn log_rejected(e: &serde_json::Error) {
    warn!(error = %e, "rejected malformed request body");
}
