//! TCP accept loop and per-connection request framing.
//!
//! A request is complete at the first blank CRLF line, plus
//! `Content-Length` body bytes when that header announces any. The reader
//! accumulates raw bytes with a short poll timeout so shutdown and the
//! idle deadline are observed even while blocked, and caps messages at
//! [`MAX_MESSAGE`] bytes.

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

use crate::protocol::Request;
use crate::server::ServerContext;
use crate::server::handler::MethodHandler;

/// Upper bound on one request, headers and body included.
pub const MAX_MESSAGE: usize = 4096;

/// Poll granularity of the accept loop and connection reads.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Bare error line sent when a request cannot even be parsed.
const RAW_SERVER_ERROR: &[u8] = b"RTSP/1.0 500 Internal server error\r\n\r\n";

/// Non-blocking accept loop. Checks the running flag between accepts so
/// `stop()` terminates it promptly; enforces the connection cap.
pub fn accept_loop(listener: TcpListener, ctx: Arc<ServerContext>) {
    while ctx.running.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((stream, peer)) => {
                let active = ctx.connections.fetch_add(1, Ordering::SeqCst);
                if active >= ctx.config.max_connections {
                    ctx.connections.fetch_sub(1, Ordering::SeqCst);
                    tracing::warn!(%peer, active, "connection limit reached, dropping");
                    continue;
                }
                let ctx = ctx.clone();
                std::thread::spawn(move || {
                    Connection::handle(stream, peer, ctx.clone());
                    ctx.connections.fetch_sub(1, Ordering::SeqCst);
                });
            }
            Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(POLL_INTERVAL);
            }
            Err(e) => {
                if ctx.running.load(Ordering::SeqCst) {
                    tracing::warn!(error = %e, "TCP accept error");
                }
            }
        }
    }
    tracing::debug!("accept loop exited");
}

/// A single RTSP client connection.
struct Connection {
    stream: TcpStream,
    peer: SocketAddr,
    handler: MethodHandler,
    buf: Vec<u8>,
}

impl Connection {
    fn handle(stream: TcpStream, peer: SocketAddr, ctx: Arc<ServerContext>) {
        tracing::info!(%peer, "client connected");
        if stream.set_read_timeout(Some(POLL_INTERVAL)).is_err() {
            return;
        }

        let handler = MethodHandler::new(ctx.sessions.clone(), ctx.control.clone(), peer);
        let mut conn = Connection {
            stream,
            peer,
            handler,
            buf: Vec::new(),
        };
        let reason = conn.run(&ctx);
        tracing::info!(%peer, reason, "client disconnected");
    }

    /// Request/response loop. Returns the reason for exiting.
    fn run(&mut self, ctx: &ServerContext) -> &'static str {
        let mut last_activity = Instant::now();
        loop {
            if !ctx.running.load(Ordering::SeqCst) {
                return "server shutting down";
            }

            if let Some(total) = complete_message_len(&self.buf) {
                let raw: Vec<u8> = self.buf.drain(..total).collect();
                last_activity = Instant::now();
                if !self.dispatch(&raw) {
                    return "write error";
                }
                continue;
            }

            let mut chunk = [0u8; 1024];
            match self.stream.read(&mut chunk) {
                Ok(0) => return "connection closed by client",
                Ok(n) => {
                    self.buf.extend_from_slice(&chunk[..n]);
                    if self.buf.len() > MAX_MESSAGE {
                        return "request too large";
                    }
                }
                Err(ref e)
                    if e.kind() == std::io::ErrorKind::WouldBlock
                        || e.kind() == std::io::ErrorKind::TimedOut =>
                {
                    if last_activity.elapsed() >= ctx.config.idle_timeout {
                        return "idle timeout";
                    }
                }
                Err(_) => return "read error",
            }
        }
    }

    /// Parse and answer one framed message. False means the socket broke.
    fn dispatch(&mut self, raw: &[u8]) -> bool {
        let parsed = std::str::from_utf8(raw)
            .map_err(|_| ())
            .and_then(|text| Request::parse(text).map_err(|_| ()));

        match parsed {
            Ok(request) => {
                tracing::debug!(
                    peer = %self.peer,
                    method = request.method.as_str(),
                    uri = %request.uri,
                    cseq = request.cseq,
                    "request"
                );
                let response = self.handler.handle(&request);
                tracing::debug!(peer = %self.peer, status = response.code, "response");
                match response.serialize() {
                    Ok(text) => self.stream.write_all(text.as_bytes()).is_ok(),
                    Err(e) => {
                        tracing::error!(peer = %self.peer, error = %e, "unserializable response");
                        self.stream.write_all(RAW_SERVER_ERROR).is_ok()
                    }
                }
            }
            Err(()) => {
                tracing::warn!(peer = %self.peer, "unparseable request");
                self.stream.write_all(RAW_SERVER_ERROR).is_ok()
            }
        }
    }
}

/// Length of the first complete message in `buf`: header block through the
/// blank line, plus any `Content-Length` body bytes.
fn complete_message_len(buf: &[u8]) -> Option<usize> {
    let header_end = buf.windows(4).position(|w| w == b"\r\n\r\n")? + 4;
    let content_length = std::str::from_utf8(&buf[..header_end])
        .ok()
        .and_then(|headers| {
            headers.lines().find_map(|line| {
                line.strip_prefix("Content-Length:")
                    .and_then(|v| v.trim().parse::<usize>().ok())
            })
        })
        .unwrap_or(0);
    let total = header_end + content_length;
    (buf.len() >= total).then_some(total)
}
