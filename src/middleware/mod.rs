//! Middleware pipeline: composable before/after request handler logic.
//!
//! ## Core types
//!
//! - [`Middleware`]: trait implemented by all middleware.
//! - [`Next`]: cursor into the remaining chain; call [`Next::run`] to advance.
//! - [`MiddlewareHandler`]: type-erased, cheaply-cloneable middleware function.
//! - [`Pipeline`]: an ordered middleware stack terminating in a [`Router`].
//! - [`LoggerMiddleware`]: built-in request/response logger.

use std::{future::Future, pin::Pin, sync::Arc};
use tokio::time::Instant;

use crate::{Request, Response, StatusCode, context::Context, router::Router};

/// A type-erased, reference-counted middleware function.
pub type MiddlewareHandler = Arc<
    dyn Fn(Context, Next) -> Pin<Box<dyn Future<Output = Response> + Send>> + Send + Sync + 'static,
>;

/// Converts a [`Middleware`] implementation into a [`MiddlewareHandler`].
pub fn from_middleware<M>(middleware: Arc<M>) -> MiddlewareHandler
where
    M: Middleware + 'static,
{
    Arc::new(move |ctx: Context, next: Next| middleware.handle(ctx, next))
}

/// A cursor into the remaining middleware chain for a single request.
///
/// `Next` is consumed by [`run`](Self::run), so each middleware can forward a
/// request at most once.
pub struct Next {
    middlewares: Arc<[MiddlewareHandler]>,
    // Which middleware the next `run` call invokes.
    index: usize,
}

impl Next {
    pub fn new(middlewares: Arc<[MiddlewareHandler]>) -> Self {
        Self {
            middlewares,
            index: 0,
        }
    }

    /// Invokes the next middleware in the chain and returns its response.
    ///
    /// When the chain is exhausted without any layer producing a response, a
    /// `500 Internal Server Error` is returned.
    pub async fn run(mut self, ctx: Context) -> Response {
        match self.middlewares.get(self.index).cloned() {
            Some(handler) => {
                self.index += 1;
                handler(ctx, self).await
            }
            None => Response::new(StatusCode::InternalServerError)
                .body("No response generated by middleware pipeline"),
        }
    }
}

/// The core middleware trait.
///
/// Implementors may pass through (`next.run(ctx).await`), short-circuit by
/// returning a [`Response`] directly, or decorate the downstream response.
pub trait Middleware: Send + Sync {
    fn handle(&self, ctx: Context, next: Next) -> Pin<Box<dyn Future<Output = Response> + Send>>;
}

/// Logs each request's method, path, status, and time-to-response-head.
///
/// For streamed bodies the elapsed time covers the handler up to the moment
/// the response head is ready, not the full stream.
pub struct LoggerMiddleware;

impl Middleware for LoggerMiddleware {
    fn handle(&self, ctx: Context, next: Next) -> Pin<Box<dyn Future<Output = Response> + Send>> {
        Box::pin(async move {
            let start = Instant::now();
            let method = ctx.request().method().to_string();
            let path = ctx.request().path().to_string();

            let response = next.run(ctx).await;

            tracing::info!(
                method = %method,
                path = %path,
                status = response.status().as_u16(),
                elapsed_ms = start.elapsed().as_millis() as u64,
                "request handled"
            );

            response
        })
    }
}

/// An ordered middleware stack with a [`Router`] as the innermost layer.
///
/// Cloning is cheap; the stack is shared behind an [`Arc`].
#[derive(Clone)]
pub struct Pipeline {
    stack: Arc<[MiddlewareHandler]>,
}

impl Pipeline {
    /// Builds a pipeline. `layers` run outermost-first, then `router` handles
    /// whatever reaches the end of the chain.
    pub fn new(layers: Vec<MiddlewareHandler>, router: Router) -> Self {
        let router = Arc::new(router);
        let terminal: MiddlewareHandler = Arc::new(
            move |ctx: Context, _next: Next| -> Pin<Box<dyn Future<Output = Response> + Send>> {
                let router = Arc::clone(&router);
                Box::pin(async move { router.route(ctx).await })
            },
        );

        let mut stack = layers;
        stack.push(terminal);
        Self {
            stack: stack.into(),
        }
    }

    /// Runs `request` through the stack.
    pub async fn handle(&self, request: Request) -> Response {
        Next::new(Arc::clone(&self.stack))
            .run(Context::new(request))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Deny;

    impl Middleware for Deny {
        fn handle(&self, _ctx: Context, _next: Next) -> Pin<Box<dyn Future<Output = Response> + Send>> {
            Box::pin(async { Response::new(StatusCode::Forbidden) })
        }
    }

    struct Tag;

    impl Middleware for Tag {
        fn handle(&self, ctx: Context, next: Next) -> Pin<Box<dyn Future<Output = Response> + Send>> {
            Box::pin(async move { next.run(ctx).await.header("X-Tag", "1") })
        }
    }

    fn request(method: &str, path: &str) -> Request {
        let raw = format!("{method} {path} HTTP/1.1\r\nHost: localhost\r\n\r\n");
        Request::parse(raw.as_bytes()).unwrap().0
    }

    fn router() -> Router {
        let mut router = Router::new();
        router.get("/", |_ctx: Context| async { Response::new(StatusCode::Ok) });
        router
    }

    #[tokio::test]
    async fn reaches_router_through_logger() {
        let pipeline = Pipeline::new(vec![from_middleware(Arc::new(LoggerMiddleware))], router());
        assert_eq!(pipeline.handle(request("GET", "/")).await.status(), StatusCode::Ok);
        assert_eq!(
            pipeline.handle(request("GET", "/nope")).await.status(),
            StatusCode::NotFound
        );
    }

    #[tokio::test]
    async fn middleware_can_short_circuit() {
        let pipeline = Pipeline::new(vec![from_middleware(Arc::new(Deny))], router());
        assert_eq!(pipeline.handle(request("GET", "/")).await.status(), StatusCode::Forbidden);
    }

    #[tokio::test]
    async fn middleware_can_decorate() {
        let pipeline = Pipeline::new(vec![from_middleware(Arc::new(Tag))], router());
        let response = pipeline.handle(request("GET", "/")).await;
        assert_eq!(response.headers().get("x-tag"), Some("1"));
    }

    #[tokio::test]
    async fn exhausted_chain_is_500() {
        let next = Next::new(Vec::new().into());
        let response = next.run(Context::new(request("GET", "/"))).await;
        assert_eq!(response.status(), StatusCode::InternalServerError);
    }
}
