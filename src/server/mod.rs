//! Async TCP server using Tokio.
//!
//! Accepts TCP connections and dispatches HTTP/1.1 requests to a handler function.
//! Supports persistent connections (keep-alive) and streamed, chunked responses.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::{Buf, BytesMut};
use futures_util::StreamExt;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};

use crate::http::{
    StatusCode,
    request::{Request, RequestError},
    response::{Encoded, LAST_CHUNK, Response, encode_chunk},
};

/// Errors produced by the server.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to bind to {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
}

/// Maximum size of a complete HTTP request we will buffer before rejecting it (8 MiB).
const MAX_REQUEST_SIZE: usize = 8 * 1024 * 1024;

/// Initial read buffer capacity per connection.
const INITIAL_BUF_SIZE: usize = 4096;

/// The HTTP server.
///
/// Binds to a TCP address and dispatches incoming HTTP/1.1 requests to a
/// handler function.
///
/// # Examples
///
/// ```rust,no_run
/// use glm_relay::server::Server;
/// use glm_relay::http::{Response, StatusCode};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let server = Server::bind("127.0.0.1:3000").await?;
///     let shutdown = async {
///         let _ = tokio::signal::ctrl_c().await;
///     };
///     server
///         .serve_until(|_req| async { Response::new(StatusCode::Ok).body("Hello!") }, shutdown)
///         .await?;
///     Ok(())
/// }
/// ```
pub struct Server {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl Server {
    /// Binds the server to the given TCP address.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Bind`] if the address cannot be bound.
    pub async fn bind(addr: impl AsRef<str>) -> Result<Self, ServerError> {
        let addr = addr.as_ref();
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::Bind {
                addr: addr.to_owned(),
                source: e,
            })?;
        let local_addr = listener.local_addr()?;
        Ok(Self {
            listener,
            local_addr,
        })
    }

    /// Returns the local address the server is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accepts connections and dispatches their requests to `handler` until
    /// `shutdown` resolves.
    ///
    /// The handler is shared across all spawned Tokio tasks, so it must be
    /// `Send + Sync + 'static`. Connections already accepted keep running to
    /// completion after shutdown; only the listener stops.
    ///
    /// # Errors
    ///
    /// Currently always `Ok`: accept failures are logged and the loop keeps going.
    pub async fn serve_until<H, F, S>(self, handler: H, shutdown: S) -> Result<(), ServerError>
    where
        H: Fn(Request) -> F + Send + Sync + 'static,
        F: Future<Output = Response> + Send + 'static,
        S: Future<Output = ()> + Send,
    {
        let handler = Arc::new(handler);
        let mut shutdown = std::pin::pin!(shutdown);
        info!(address = %self.local_addr, "glm-relay listening");

        loop {
            let accepted = tokio::select! {
                accepted = self.listener.accept() => accepted,
                () = &mut shutdown => {
                    info!(address = %self.local_addr, "shutdown requested, no longer accepting");
                    return Ok(());
                }
            };

            let (stream, peer_addr) = match accepted {
                Ok(pair) => pair,
                Err(e) => {
                    error!(error = %e, "failed to accept connection");
                    continue;
                }
            };

            debug!(peer = %peer_addr, "connection accepted");
            let handler = Arc::clone(&handler);
            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, peer_addr, handler).await {
                    warn!(peer = %peer_addr, error = %e, "connection closed with error");
                }
            });
        }
    }
}

/// Handles a single TCP connection over its lifetime.
///
/// Requests are served one at a time; the next request is not parsed until the
/// previous response, including every chunk of a streamed body, has been written.
async fn handle_connection<H, F>(
    mut stream: TcpStream,
    peer_addr: SocketAddr,
    handler: Arc<H>,
) -> Result<(), std::io::Error>
where
    H: Fn(Request) -> F + Send + Sync + 'static,
    F: Future<Output = Response> + Send + 'static,
{
    let mut buf = BytesMut::with_capacity(INITIAL_BUF_SIZE);

    loop {
        let parsed = if buf.is_empty() {
            Err(RequestError::Incomplete)
        } else {
            Request::parse(&buf)
        };

        let request = match parsed {
            Ok((request, body_offset)) if request.is_complete() => {
                let consumed = body_offset + request.wire_len();
                buf.advance(consumed);
                request
            }
            Ok((request, _)) if request.content_length() > MAX_REQUEST_SIZE => {
                return reject(
                    &mut stream,
                    peer_addr,
                    StatusCode::PayloadTooLarge,
                    "Request entity too large",
                )
                .await;
            }
            Ok(_) | Err(RequestError::Incomplete) => {
                if stream.read_buf(&mut buf).await? == 0 {
                    debug!(peer = %peer_addr, "connection closed by peer");
                    return Ok(());
                }
                if buf.len() > MAX_REQUEST_SIZE {
                    return reject(
                        &mut stream,
                        peer_addr,
                        StatusCode::PayloadTooLarge,
                        "Request entity too large",
                    )
                    .await;
                }
                continue;
            }
            Err(e @ RequestError::UnsupportedTransferEncoding { .. }) => {
                let message = format!("Not Implemented: {e}");
                return reject(&mut stream, peer_addr, StatusCode::NotImplemented, &message).await;
            }
            Err(e) => {
                let message = format!("Bad Request: {e}");
                return reject(&mut stream, peer_addr, StatusCode::BadRequest, &message).await;
            }
        };

        let keep_alive = request.is_keep_alive();

        debug!(
            peer = %peer_addr,
            method = %request.method(),
            path = %request.path(),
            "dispatching request"
        );

        let response = handler(request).await.keep_alive(keep_alive);
        write_response(&mut stream, response).await?;

        if !keep_alive {
            debug!(peer = %peer_addr, "Connection: close, shutting down");
            return Ok(());
        }
    }
}

/// Writes a response, forwarding each streamed chunk as soon as it is produced.
///
/// A failed write (the peer went away) returns early and drops the body stream,
/// which releases whatever the stream was reading from.
async fn write_response(stream: &mut TcpStream, response: Response) -> Result<(), std::io::Error> {
    match response.encode() {
        Encoded::Complete(bytes) => {
            stream.write_all(&bytes).await?;
            stream.flush().await
        }
        Encoded::Streaming { head, mut body } => {
            stream.write_all(&head).await?;
            stream.flush().await?;
            while let Some(chunk) = body.next().await {
                if let Some(framed) = encode_chunk(&chunk) {
                    stream.write_all(&framed).await?;
                    stream.flush().await?;
                }
            }
            stream.write_all(LAST_CHUNK).await?;
            stream.flush().await
        }
    }
}

async fn reject(
    stream: &mut TcpStream,
    peer_addr: SocketAddr,
    status: StatusCode,
    message: &str,
) -> Result<(), std::io::Error> {
    warn!(peer = %peer_addr, status = status.as_u16(), reason = message, "rejecting request");
    let response = Response::new(status).body(message).keep_alive(false);
    write_response(stream, response).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::stream;
    use tokio::sync::oneshot;

    async fn exchange(addr: SocketAddr, raw: &[u8]) -> String {
        let mut client = TcpStream::connect(addr).await.unwrap();
        client.write_all(raw).await.unwrap();
        let mut out = Vec::new();
        client.read_to_end(&mut out).await.unwrap();
        String::from_utf8(out).unwrap()
    }

    async fn spawn<H, F>(handler: H) -> (SocketAddr, oneshot::Sender<()>)
    where
        H: Fn(Request) -> F + Send + Sync + 'static,
        F: Future<Output = Response> + Send + 'static,
    {
        let server = Server::bind("127.0.0.1:0").await.unwrap();
        let addr = server.local_addr();
        let (tx, rx) = oneshot::channel();
        tokio::spawn(server.serve_until(handler, async move {
            let _ = rx.await;
        }));
        (addr, tx)
    }

    #[tokio::test]
    async fn bind_reports_bad_address() {
        let err = Server::bind("not an address").await.err().unwrap();
        assert!(matches!(err, ServerError::Bind { .. }));
    }

    #[tokio::test]
    async fn streams_chunked_body() {
        let (addr, _stop) = spawn(|_req: Request| async {
            Response::new(StatusCode::Ok).stream(stream::iter(vec![
                bytes::Bytes::from_static(b"Hel"),
                bytes::Bytes::new(),
                bytes::Bytes::from_static(b"lo"),
            ]))
        })
        .await;

        let reply = exchange(
            addr,
            b"POST /api/chat HTTP/1.1\r\nHost: x\r\nConnection: close\r\nContent-Length: 2\r\n\r\n{}",
        )
        .await;

        assert!(reply.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(reply.contains("Transfer-Encoding: chunked\r\n"));
        assert!(reply.ends_with("\r\n\r\n3\r\nHel\r\n2\r\nlo\r\n0\r\n\r\n"));
    }

    #[tokio::test]
    async fn serves_pipelined_requests_in_order() {
        let (addr, _stop) = spawn(|req: Request| async move {
            Response::new(StatusCode::Ok).body(req.path().to_owned())
        })
        .await;

        let reply = exchange(
            addr,
            b"GET /one HTTP/1.1\r\nHost: x\r\n\r\nGET /two HTTP/1.1\r\nHost: x\r\nConnection: close\r\n\r\n",
        )
        .await;

        let one = reply.find("/one").unwrap();
        let two = reply.find("/two").unwrap();
        assert!(one < two);
        assert_eq!(reply.matches("HTTP/1.1 200 OK").count(), 2);
    }

    #[tokio::test]
    async fn rejects_oversized_and_malformed_requests() {
        let (addr, _stop) =
            spawn(|_req: Request| async { Response::new(StatusCode::Ok) }).await;

        let raw = format!(
            "POST / HTTP/1.1\r\nHost: x\r\nContent-Length: {}\r\n\r\n",
            MAX_REQUEST_SIZE + 1
        );
        let reply = exchange(addr, raw.as_bytes()).await;
        assert!(reply.starts_with("HTTP/1.1 413 "));

        let reply = exchange(addr, b"GET / HTTP/1.1\r\nBad Header\r\n\r\n").await;
        assert!(reply.starts_with("HTTP/1.1 400 "));
    }

    #[tokio::test]
    async fn stops_accepting_after_shutdown() {
        let (addr, stop) =
            spawn(|_req: Request| async { Response::new(StatusCode::Ok) }).await;
        stop.send(()).unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(TcpStream::connect(addr).await.is_err());
    }

    #[tokio::test]
    async fn decodes_chunked_request_bodies() {
        let (addr, _stop) = spawn(|req: Request| async move {
            Response::new(StatusCode::Ok).body_bytes(req.body().to_vec())
        })
        .await;

        let reply = exchange(
            addr,
            b"POST /api/test HTTP/1.1\r\nHost: x\r\nTransfer-Encoding: chunked\r\n\r\n\
              f\r\n{\"apiKey\":\"k\",\"\r\n\
              13\r\nmodelName\":\"glm-4\"}\r\n\
              0\r\n\r\n\
              POST /api/test HTTP/1.1\r\nHost: x\r\nConnection: close\r\nContent-Length: 2\r\n\r\n{}",
        )
        .await;

        assert_eq!(reply.matches("HTTP/1.1 200 OK").count(), 2);
        assert!(reply.contains("\r\n\r\n{\"apiKey\":\"k\",\"modelName\":\"glm-4\"}"));
        assert!(!reply.contains("400"));
    }

    #[tokio::test]
    async fn rejects_unsupported_or_ambiguous_framing() {
        let (addr, _stop) =
            spawn(|_req: Request| async { Response::new(StatusCode::Ok) }).await;

        let reply = exchange(
            addr,
            b"POST / HTTP/1.1\r\nHost: x\r\nTransfer-Encoding: gzip\r\n\r\n",
        )
        .await;
        assert!(reply.starts_with("HTTP/1.1 501 "));
        assert!(reply.contains("Connection: close\r\n"));

        let reply = exchange(
            addr,
            b"POST / HTTP/1.1\r\nHost: x\r\nContent-Length: 3\r\nTransfer-Encoding: chunked\r\n\r\n0\r\n\r\n",
        )
        .await;
        assert!(reply.starts_with("HTTP/1.1 400 "));
        assert!(reply.contains("Connection: close\r\n"));
        assert_eq!(reply.matches("HTTP/1.1").count(), 1);
    }

    #[tokio::test]
    async fn client_disconnect_drops_the_body_stream() {
        use std::sync::atomic::{AtomicBool, Ordering};
        use std::time::Duration;

        struct DropFlag(Arc<AtomicBool>);

        impl Drop for DropFlag {
            fn drop(&mut self) {
                self.0.store(true, Ordering::SeqCst);
            }
        }

        let dropped = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&dropped);
        let (addr, _stop) = spawn(move |_req: Request| {
            let guard = DropFlag(Arc::clone(&flag));
            async move {
                Response::new(StatusCode::Ok).stream(async_stream::stream! {
                    let _guard = guard;
                    loop {
                        yield bytes::Bytes::from_static(b"tick");
                        tokio::time::sleep(Duration::from_millis(5)).await;
                    }
                })
            }
        })
        .await;

        let mut client = TcpStream::connect(addr).await.unwrap();
        client
            .write_all(b"GET / HTTP/1.1\r\nHost: x\r\n\r\n")
            .await
            .unwrap();
        let mut head = [0u8; 64];
        let n = client.read(&mut head).await.unwrap();
        assert!(head[..n].starts_with(b"HTTP/1.1 200 OK"));
        drop(client);

        for _ in 0..200 {
            if dropped.load(Ordering::SeqCst) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("body stream was still alive after the client went away");
    }
}
