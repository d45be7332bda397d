//! Async TCP server using Tokio.
//!
//! Accepts connections, parses HTTP/1.1 requests, dispatches them to a
//! handler, and writes fixed or chunked responses. Persistent connections
//! are supported for fixed responses; streamed responses close the
//! connection when they end.
//!
//! While the handler is working, and while a streamed body is waiting on
//! its next chunk, the connection task also watches the socket. If the peer
//! hangs up, the handler future or body stream is dropped immediately, which
//! releases whatever upstream resource feeds it.

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::BytesMut;
use futures::StreamExt;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::http::response::{LAST_CHUNK, encode_chunk};
use crate::http::{Body, BoxError, StatusCode, request::RequestError};
use crate::middleware::Pipeline;
use crate::{Request, Response};

/// Errors produced by the server.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("failed to bind to {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },
}

// Why a connection ended early.
#[derive(Debug, Error)]
enum ConnectionError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("response body failed mid-stream: {0}")]
    Body(BoxError),

    #[error("peer hung up mid-stream")]
    PeerClosed,

    #[error("server shutting down mid-stream")]
    Shutdown,
}

/// Maximum size of a complete request (head plus body) we will buffer (8 MiB).
const MAX_REQUEST_SIZE: usize = 8 * 1024 * 1024;

const INITIAL_BUF_SIZE: usize = 4096;

/// The HTTP server.
///
/// # Examples
///
/// ```rust,no_run
/// use prompt_enhancer::{Router, Server, middleware::Pipeline};
/// use tokio_util::sync::CancellationToken;
///
/// # async fn run() -> Result<(), Box<dyn std::error::Error>> {
/// let server = Server::bind("127.0.0.1:3000").await?;
/// server.serve(Pipeline::new(Router::new()), CancellationToken::new()).await?;
/// # Ok(())
/// # }
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

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Serves `pipeline` until `shutdown` is cancelled.
    pub async fn serve(
        self,
        pipeline: Pipeline,
        shutdown: CancellationToken,
    ) -> Result<(), ServerError> {
        let pipeline = Arc::new(pipeline);
        self.run_until(
            move |request| {
                let pipeline = Arc::clone(&pipeline);
                async move { pipeline.handle(request).await }
            },
            shutdown,
        )
        .await
    }

    /// Accepts connections and dispatches requests to `handler` until
    /// `shutdown` is cancelled.
    ///
    /// Each connection gets a child token, so cancelling `shutdown` also
    /// aborts responses that are still streaming.
    pub async fn run_until<H, F>(
        self,
        handler: H,
        shutdown: CancellationToken,
    ) -> Result<(), ServerError>
    where
        H: Fn(Request) -> F + Send + Sync + 'static,
        F: Future<Output = Response> + Send + 'static,
    {
        let handler = Arc::new(handler);
        info!(address = %self.local_addr, "listening");

        loop {
            let (stream, peer) = tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok(pair) => pair,
                    Err(e) => {
                        error!(error = %e, "failed to accept connection");
                        continue;
                    }
                },
                () = shutdown.cancelled() => {
                    info!("shutdown requested, no longer accepting connections");
                    break;
                }
            };

            debug!(%peer, "connection accepted");
            let handler = Arc::clone(&handler);
            let shutdown = shutdown.child_token();

            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, peer, handler, shutdown).await {
                    warn!(%peer, error = %e, "connection closed with error");
                }
            });
        }

        Ok(())
    }
}

// Serves requests on one connection until the peer closes it, a response
// asks for `Connection: close`, or the request is unusable.
async fn handle_connection<H, F>(
    mut stream: TcpStream,
    peer: SocketAddr,
    handler: Arc<H>,
    shutdown: CancellationToken,
) -> Result<(), ConnectionError>
where
    H: Fn(Request) -> F + Send + Sync + 'static,
    F: Future<Output = Response> + Send + 'static,
{
    let mut buf = BytesMut::with_capacity(INITIAL_BUF_SIZE);

    loop {
        match take_request(&mut buf) {
            Ok(Some(request)) => {
                let wants_keep_alive = request.is_keep_alive();
                debug!(
                    %peer,
                    method = %request.method(),
                    path = %request.path(),
                    "dispatching request"
                );

                let response =
                    await_handler(&mut stream, &mut buf, handler(request), &shutdown).await?;
                let keep_alive = wants_keep_alive && response.keeps_alive();
                write_response(&mut stream, response.keep_alive(keep_alive), &shutdown).await?;

                if !keep_alive {
                    debug!(%peer, "closing connection after response");
                    break;
                }
                continue;
            }
            Ok(None) => {}
            Err(RequestError::BodyTooLarge { .. }) => {
                warn!(%peer, "request too large, sending 413");
                let response = Response::new(StatusCode::PayloadTooLarge)
                    .body("Request entity too large")
                    .keep_alive(false);
                write_response(&mut stream, response, &shutdown).await?;
                break;
            }
            Err(e) => {
                warn!(%peer, error = %e, "bad request, sending 400");
                let response = Response::new(StatusCode::BadRequest)
                    .body(format!("Bad Request: {e}"))
                    .keep_alive(false);
                write_response(&mut stream, response, &shutdown).await?;
                break;
            }
        }

        let bytes_read = tokio::select! {
            read = stream.read_buf(&mut buf) => read?,
            () = shutdown.cancelled() => break,
        };
        if bytes_read == 0 {
            debug!(%peer, "connection closed by peer");
            break;
        }
    }

    Ok(())
}

// Splits one complete request off the front of `buf`, if one has arrived.
fn take_request(buf: &mut BytesMut) -> Result<Option<Request>, RequestError> {
    if buf.is_empty() {
        return Ok(None);
    }

    let (request, body_offset) = match Request::parse(&buf[..]) {
        Ok(parsed) => parsed,
        Err(RequestError::Incomplete) if buf.len() > MAX_REQUEST_SIZE => {
            return Err(RequestError::BodyTooLarge {
                max_bytes: MAX_REQUEST_SIZE,
            });
        }
        Err(RequestError::Incomplete) => return Ok(None),
        Err(e) => return Err(e),
    };

    let total = body_offset
        .checked_add(request.content_length())
        .filter(|total| *total <= MAX_REQUEST_SIZE)
        .ok_or(RequestError::BodyTooLarge {
            max_bytes: MAX_REQUEST_SIZE,
        })?;
    if buf.len() < total {
        return Ok(None);
    }

    let mut raw = buf.split_to(total);
    let body = raw.split_off(body_offset).freeze();
    Ok(Some(request.with_body(body)))
}

// Waits for the handler's response while watching the socket. A handler
// may wait a long time before its first byte, so a peer that hangs up or a
// shutdown drops the handler future, and whatever it holds, right away.
// Bytes that arrive meanwhile are kept in `buf` for the next request.
async fn await_handler<F>(
    stream: &mut TcpStream,
    buf: &mut BytesMut,
    handling: F,
    shutdown: &CancellationToken,
) -> Result<Response, ConnectionError>
where
    F: Future<Output = Response>,
{
    tokio::pin!(handling);
    loop {
        tokio::select! {
            response = &mut handling => return Ok(response),
            read = stream.read_buf(buf), if buf.len() <= MAX_REQUEST_SIZE => {
                if read? == 0 {
                    return Err(ConnectionError::PeerClosed);
                }
            }
            () = shutdown.cancelled() => return Err(ConnectionError::Shutdown),
        }
    }
}

async fn write_response(
    stream: &mut TcpStream,
    response: Response,
    shutdown: &CancellationToken,
) -> Result<(), ConnectionError> {
    let (head, body) = response.into_parts();
    stream.write_all(&head).await?;

    match body {
        Body::Full(bytes) => {
            if !bytes.is_empty() {
                stream.write_all(&bytes).await?;
            }
        }
        Body::Stream(mut chunks) => loop {
            stream.flush().await?;
            let next = tokio::select! {
                next = chunks.next() => next,
                () = peer_hangup(stream) => return Err(ConnectionError::PeerClosed),
                () = shutdown.cancelled() => return Err(ConnectionError::Shutdown),
            };
            match next {
                Some(Ok(chunk)) if chunk.is_empty() => {}
                Some(Ok(chunk)) => stream.write_all(&encode_chunk(&chunk)).await?,
                // Returning without the last chunk makes the peer see a
                // truncated body rather than a short but complete one.
                Some(Err(e)) => return Err(ConnectionError::Body(e)),
                None => {
                    stream.write_all(LAST_CHUNK).await?;
                    break;
                }
            }
        },
    }

    stream.flush().await?;
    Ok(())
}

// Resolves once the peer has closed its side of the connection. Bytes the
// peer sends meanwhile are discarded; streamed responses close afterwards.
//
// A read of zero bytes cannot tell a full close from a half-close, so a
// client that shuts down its write side while still reading is treated as
// gone. Clients of this service keep the socket open until the body ends.
async fn peer_hangup(stream: &TcpStream) {
    let mut scratch = [0u8; 512];
    loop {
        if stream.readable().await.is_err() {
            return;
        }
        match stream.try_read(&mut scratch) {
            Ok(0) => return,
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
            Err(_) => return,
        }
    }
}
