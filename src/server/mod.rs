//! Async TCP front end using Tokio.
//!
//! Accepts TCP connections, parses HTTP/1.1 requests, and hands each one to a
//! sealed [`Router`]. Persistent connections (keep-alive) are supported out of
//! the box. Routing itself never blocks, so it runs inline on the
//! connection's task.

use std::net::SocketAddr;

use bytes::{Buf, Bytes, BytesMut};
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};

use crate::http::{
    StatusCode,
    request::{Request, RequestError},
    response::Response,
};
use crate::router::Router;

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

/// Initial read buffer capacity per connection.
const INITIAL_BUF_SIZE: usize = 4096;

/// A bound TCP listener that serves a [`Router`].
///
/// # Examples
///
/// ```rust,no_run
/// use rtrouter::{Router, Server, context::Context};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let mut builder = Router::builder();
///     builder.get("/ping", |ctx: &mut Context| {
///         ctx.send_string("pong");
///     });
///
///     let server = Server::bind("127.0.0.1:8080").await?;
///     server.serve(builder.build()).await?;
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
    /// Returns [`ServerError::Bind`] if the address cannot be bound
    /// (e.g. port already in use, insufficient permissions).
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

    /// Accepts connections and dispatches their requests through `router`.
    ///
    /// Each connection gets its own Tokio task and a clone of the router;
    /// clones share the route trees, lookup cache, and context pool.
    ///
    /// Runs until the process is terminated.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Io`] if the TCP listener itself fails.
    pub async fn serve(self, router: Router) -> Result<(), ServerError> {
        info!(address = %self.local_addr, routes = router.len(), "rtrouter listening");

        loop {
            let (stream, peer_addr) = match self.listener.accept().await {
                Ok(pair) => pair,
                Err(e) => {
                    error!(error = %e, "failed to accept connection");
                    continue;
                }
            };

            debug!(peer = %peer_addr, "connection accepted");
            let router = router.clone();

            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, peer_addr, router).await {
                    warn!(peer = %peer_addr, error = %e, "connection closed with error");
                }
            });
        }
    }
}

/// Handles a single TCP connection over its lifetime.
///
/// HTTP/1.1 connections are persistent by default: we loop, reading one
/// request per iteration, until the peer closes the connection or signals
/// `Connection: close`.
async fn handle_connection(
    mut stream: TcpStream,
    peer_addr: SocketAddr,
    router: Router,
) -> Result<(), std::io::Error> {
    let max_request_size = router.settings().max_request_body_size;
    let mut buf = BytesMut::with_capacity(INITIAL_BUF_SIZE);
    // A pipelined request may already be buffered, in which case parse first.
    let mut need_read = true;

    loop {
        if need_read {
            let bytes_read = stream.read_buf(&mut buf).await?;
            if bytes_read == 0 {
                debug!(peer = %peer_addr, "connection closed by peer");
                break;
            }
        }
        need_read = true;

        if buf.len() > max_request_size {
            return reject_too_large(&mut stream, peer_addr, max_request_size).await;
        }

        let (request, body_offset) = match Request::parse(&buf) {
            Ok(pair) => pair,
            Err(RequestError::Incomplete) => {
                // Headers not yet fully received.
                continue;
            }
            Err(e) => {
                warn!(peer = %peer_addr, error = %e, "bad request, sending 400");
                let response = Response::new(StatusCode::BadRequest)
                    .body(format!("Bad Request: {e}"))
                    .keep_alive(false);
                stream.write_all(&response.into_bytes()).await?;
                break;
            }
        };

        let content_length = request.content_length().unwrap_or(0);
        let total_needed = body_offset + content_length;
        if total_needed > max_request_size {
            return reject_too_large(&mut stream, peer_addr, max_request_size).await;
        }
        if buf.len() < total_needed {
            continue;
        }

        // Bytes past this request belong to the next one.
        let request = request.with_body(Bytes::copy_from_slice(&buf[body_offset..total_needed]));
        let keep_alive = request.is_keep_alive();

        debug!(
            peer = %peer_addr,
            method = %request.method(),
            path = %request.path(),
            "dispatching request"
        );

        let response = router.handle(request).keep_alive(keep_alive);
        stream.write_all(&response.into_bytes()).await?;
        stream.flush().await?;

        buf.advance(total_needed);

        if !keep_alive {
            debug!(peer = %peer_addr, "Connection: close, shutting down");
            break;
        }
        need_read = buf.is_empty();
    }

    Ok(())
}

async fn reject_too_large(
    stream: &mut TcpStream,
    peer_addr: SocketAddr,
    limit: usize,
) -> Result<(), std::io::Error> {
    warn!(peer = %peer_addr, limit, "request too large, sending 413");
    let response = Response::new(StatusCode::PayloadTooLarge)
        .body("Request entity too large")
        .keep_alive(false);
    stream.write_all(&response.into_bytes()).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::context::Context;
    use crate::router::RouterBuilder;

    async fn spawn(router: Router) -> SocketAddr {
        let server = Server::bind("127.0.0.1:0").await.unwrap();
        let addr = server.local_addr();
        tokio::spawn(server.serve(router));
        addr
    }

    async fn exchange(addr: SocketAddr, raw: &[u8]) -> String {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(raw).await.unwrap();
        let mut out = Vec::new();
        stream.read_to_end(&mut out).await.unwrap();
        String::from_utf8(out).unwrap()
    }

    fn echo_router(settings: Settings) -> Router {
        let mut builder = RouterBuilder::with_settings(settings);
        builder
            .get("/order/get", |ctx: &mut Context| {
                let name = ctx.query("name").unwrap_or_default().to_owned();
                ctx.send_string(name);
            })
            .post("/order/add", |ctx: &mut Context| {
                let body = ctx.body().to_vec();
                ctx.send_bytes(body);
            });
        builder.build()
    }

    #[tokio::test]
    async fn bind_error_names_the_address() {
        let err = Server::bind("not-an-address").await.err().unwrap();
        assert!(err.to_string().contains("not-an-address"));
    }

    #[tokio::test]
    async fn serves_routed_requests() {
        let addr = spawn(echo_router(Settings::default())).await;

        let text = exchange(
            addr,
            b"GET /order/get?name=art123 HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n",
        )
        .await;
        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"), "{text}");
        assert!(text.ends_with("\r\n\r\nart123"), "{text}");

        let text = exchange(
            addr,
            b"POST /order/add HTTP/1.1\r\nHost: localhost\r\nContent-Length: 9\r\nConnection: close\r\n\r\ntestOrder",
        )
        .await;
        assert!(text.ends_with("\r\n\r\ntestOrder"), "{text}");

        let text = exchange(
            addr,
            b"GET /missing HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n",
        )
        .await;
        assert!(text.starts_with("HTTP/1.1 404 Not Found\r\n"), "{text}");
    }

    #[tokio::test]
    async fn keep_alive_serves_pipelined_requests() {
        let addr = spawn(echo_router(Settings::default())).await;

        let text = exchange(
            addr,
            b"POST /order/add HTTP/1.1\r\nHost: a\r\nContent-Length: 3\r\n\r\none\
              GET /order/get?name=two HTTP/1.1\r\nHost: a\r\nConnection: close\r\n\r\n",
        )
        .await;
        assert_eq!(text.matches("HTTP/1.1 200 OK").count(), 2, "{text}");
        assert!(text.contains("\r\n\r\none"), "{text}");
        assert!(text.ends_with("\r\n\r\ntwo"), "{text}");
    }

    #[tokio::test]
    async fn malformed_request_gets_400() {
        let addr = spawn(echo_router(Settings::default())).await;
        let text = exchange(addr, b"NOT A REQUEST\r\n\r\n").await;
        assert!(text.starts_with("HTTP/1.1 400 Bad Request\r\n"), "{text}");
    }

    #[tokio::test]
    async fn oversized_request_gets_413() {
        let addr = spawn(echo_router(Settings {
            max_request_body_size: 64,
            ..Settings::default()
        }))
        .await;

        // The declared length alone exceeds the limit; no body needs to follow.
        let raw = b"POST /order/add HTTP/1.1\r\nHost: a\r\nContent-Length: 200\r\n\r\n";
        let text = exchange(addr, raw).await;
        assert!(text.starts_with("HTTP/1.1 413 Payload Too Large\r\n"), "{text}");
    }
}
