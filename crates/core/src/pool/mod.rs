//! Data-plane RTP server: the worker pool and its command surface.
//!
//! The pool listens on one TCP command port. Every inbound connection
//! carries exactly one bridge frame; the reply goes out on a fresh
//! connection back to the sender's callback port (see [`crate::bridge`]).
//! Alongside the acceptor run two utility threads: a supervisor reaping
//! workers that announced end of stream, and a reaper evicting workers
//! idle past the threshold.

pub mod registry;
pub mod stream;

use std::io::Write;
use std::net::{SocketAddr, SocketAddrV4, TcpListener, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::bridge::{Command, Reply};
use crate::error::{Error, Result};
use crate::media::{extract_uri, split_media_uri};
use crate::source::MediaCatalog;
use registry::WorkerRegistry;

/// Most simultaneous streaming workers.
pub const MAX_WORKERS: usize = 50;

/// Seconds a worker may go uncontacted before the reaper evicts it.
pub const IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// Cadence of the idle sweep.
const REAP_INTERVAL: Duration = Duration::from_secs(1);

/// Poll granularity of the accept loop.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Data-plane configuration.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Command listen address (`host:port`).
    pub bind_addr: String,
    pub max_workers: usize,
    pub idle_timeout: Duration,
    /// Bound on callback connects and command reads.
    pub reply_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        PoolConfig {
            bind_addr: "0.0.0.0:2001".to_string(),
            max_workers: MAX_WORKERS,
            idle_timeout: IDLE_TIMEOUT,
            reply_timeout: crate::bridge::DEFAULT_REPLY_TIMEOUT,
        }
    }
}

struct PoolContext {
    registry: WorkerRegistry,
    catalog: Arc<dyn MediaCatalog>,
    running: AtomicBool,
    config: PoolConfig,
}

/// Data-plane server orchestrator.
pub struct RtpServer {
    ctx: Arc<PoolContext>,
    done_rx: Option<Receiver<u32>>,
    threads: Vec<JoinHandle<()>>,
    local_addr: Option<SocketAddr>,
}

impl RtpServer {
    pub fn new(config: PoolConfig, catalog: Arc<dyn MediaCatalog>) -> RtpServer {
        let (done_tx, done_rx) = mpsc::channel();
        let ctx = PoolContext {
            registry: WorkerRegistry::new(config.max_workers, done_tx),
            catalog,
            running: AtomicBool::new(false),
            config,
        };
        RtpServer {
            ctx: Arc::new(ctx),
            done_rx: Some(done_rx),
            threads: Vec::new(),
            local_addr: None,
        }
    }

    pub fn start(&mut self) -> Result<()> {
        if self.ctx.running.load(Ordering::SeqCst) {
            return Err(Error::AlreadyRunning);
        }
        let done_rx = self.done_rx.take().ok_or(Error::AlreadyRunning)?;

        let listener = TcpListener::bind(&self.ctx.config.bind_addr)?;
        listener.set_nonblocking(true)?;
        self.local_addr = Some(listener.local_addr()?);
        self.ctx.running.store(true, Ordering::SeqCst);

        tracing::info!(addr = %self.ctx.config.bind_addr, "RTP pool listening");

        let ctx = self.ctx.clone();
        self.threads.push(std::thread::spawn(move || {
            accept_loop(listener, ctx);
        }));

        // Supervisor: workers that reach end of stream announce their ssrc
        // here and are joined off the directory.
        let ctx = self.ctx.clone();
        self.threads.push(std::thread::spawn(move || {
            supervisor_loop(done_rx, ctx);
        }));

        // Idle reaper.
        let ctx = self.ctx.clone();
        self.threads.push(std::thread::spawn(move || {
            while ctx.running.load(Ordering::SeqCst) {
                std::thread::sleep(REAP_INTERVAL);
                ctx.registry.sweep(ctx.config.idle_timeout);
            }
        }));
        Ok(())
    }

    /// Stop the utility threads and drain the worker pool.
    pub fn stop(&mut self) {
        if !self.ctx.running.swap(false, Ordering::SeqCst) {
            return;
        }
        tracing::info!("RTP pool stopping");
        for thread in self.threads.drain(..) {
            let _ = thread.join();
        }
        self.ctx.registry.shutdown();
    }

    pub fn is_running(&self) -> bool {
        self.ctx.running.load(Ordering::SeqCst)
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub fn worker_count(&self) -> usize {
        self.ctx.registry.len()
    }
}

impl Drop for RtpServer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn accept_loop(listener: TcpListener, ctx: Arc<PoolContext>) {
    while ctx.running.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((stream, peer)) => handle_command(&ctx, stream, peer),
            Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(POLL_INTERVAL);
            }
            Err(e) => {
                if ctx.running.load(Ordering::SeqCst) {
                    tracing::warn!(error = %e, "command accept error");
                }
            }
        }
    }
    tracing::debug!("command accept loop exited");
}

fn supervisor_loop(done_rx: Receiver<u32>, ctx: Arc<PoolContext>) {
    while ctx.running.load(Ordering::SeqCst) {
        match done_rx.recv_timeout(REAP_INTERVAL) {
            Ok(ssrc) => ctx.registry.finished(ssrc),
            Err(mpsc::RecvTimeoutError::Timeout) => {}
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }
    tracing::debug!("supervisor exited");
}

/// Read one command frame, execute it, reply on the callback port.
fn handle_command(ctx: &PoolContext, mut stream: TcpStream, peer: SocketAddr) {
    if stream
        .set_read_timeout(Some(ctx.config.reply_timeout))
        .is_err()
    {
        return;
    }
    let (command, response_port) = match Command::read_from(&mut stream) {
        Ok(frame) => frame,
        Err(e) => {
            tracing::warn!(%peer, error = %e, "bad command frame");
            return;
        }
    };
    drop(stream);

    tracing::debug!(%peer, ?command, "command received");
    let reply = execute(ctx, &command);

    let reply_addr = SocketAddr::new(peer.ip(), response_port);
    match TcpStream::connect_timeout(&reply_addr, ctx.config.reply_timeout) {
        Ok(mut callback) => {
            if let Err(e) = callback.write_all(&reply.encode()) {
                tracing::warn!(%reply_addr, error = %e, "reply write failed");
            }
        }
        Err(e) => tracing::warn!(%reply_addr, error = %e, "reply connect failed"),
    }
}

fn execute(ctx: &PoolContext, command: &Command) -> Reply {
    match command {
        Command::CheckExists { uri } => match catalog_path(uri) {
            Some(path) if ctx.catalog.exists(path) => Reply::Ok {
                ssrc: 0,
                server_port: 0,
            },
            _ => Reply::Err,
        },
        Command::SetupUnicast {
            uri,
            session: _,
            client_ip,
            client_port,
        } => {
            // Workers stream leaves, never whole sources.
            let Some((global_uri, kind)) = split_media_uri(uri) else {
                tracing::warn!(uri = %uri, "setup for non-media uri");
                return Reply::Err;
            };
            let Some(path) = catalog_path(global_uri) else {
                return Reply::Err;
            };
            if !ctx.catalog.exists(path) {
                tracing::warn!(path, "setup for unknown path");
                return Reply::Err;
            }
            let source = match ctx.catalog.open(path, kind) {
                Ok(source) => source,
                Err(e) => {
                    tracing::warn!(path, error = %e, "source open failed");
                    return Reply::Err;
                }
            };
            let client = SocketAddrV4::new(*client_ip, *client_port);
            match ctx.registry.create(source, client) {
                Ok((ssrc, server_port)) => Reply::Ok { ssrc, server_port },
                Err(e) => {
                    tracing::warn!(uri = %uri, error = %e, "worker creation failed");
                    Reply::Err
                }
            }
        }
        Command::Play { ssrc, .. } => reply_port(ctx.registry.play(*ssrc), *ssrc),
        Command::Pause { ssrc, .. } => reply_port(ctx.registry.pause(*ssrc), *ssrc),
        Command::Teardown { ssrc, .. } => reply_port(ctx.registry.remove(*ssrc), *ssrc),
    }
}

fn reply_port(result: Result<u16>, ssrc: u32) -> Reply {
    match result {
        Ok(server_port) => Reply::Ok { ssrc, server_port },
        Err(e) => {
            tracing::warn!(ssrc = format_args!("{ssrc:#010x}"), error = %e, "command refused");
            Reply::Err
        }
    }
}

/// URI path used for catalog lookups: the path component with any
/// `/audio`/`/video` suffix stripped.
fn catalog_path(uri: &str) -> Option<&str> {
    let (_, path) = extract_uri(uri)?;
    let path = path?;
    Some(
        split_media_uri(path)
            .map(|(global, _)| global)
            .unwrap_or(path),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_path_strips_media_suffix() {
        assert_eq!(catalog_path("rtsp://host/item/audio"), Some("/item"));
        assert_eq!(catalog_path("rtsp://host/item/video"), Some("/item"));
        assert_eq!(catalog_path("rtsp://host/item"), Some("/item"));
        assert_eq!(catalog_path("rtsp://host"), None);
        assert_eq!(catalog_path("not-a-uri"), None);
    }
}
