//! Control-plane RTSP server.
//!
//! Owns the shared state every connection works against — the session
//! directory, the bridge to the data plane, the running flag — and the
//! accept thread. Everything that was process-global in older designs
//! lives in one [`ServerContext`] constructed at startup and shared into
//! each connection thread.

pub mod conn;
pub mod handler;

use std::net::{SocketAddr, TcpListener};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::bridge::{BridgeClient, StreamControl};
use crate::error::{Error, Result};
use crate::session::SessionDirectory;

/// Most simultaneous RTSP connections served.
pub const MAX_CONNECTIONS: usize = 20;

/// Seconds a connection may sit idle before it is closed.
pub const IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// Control-plane configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Listen address (`host:port`).
    pub bind_addr: String,
    /// Command port of the data-plane pool.
    pub data_plane_port: u16,
    pub max_connections: usize,
    pub idle_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            bind_addr: "0.0.0.0:2000".to_string(),
            data_plane_port: 2001,
            max_connections: MAX_CONNECTIONS,
            idle_timeout: IDLE_TIMEOUT,
        }
    }
}

/// Shared state of one server instance.
pub struct ServerContext {
    pub sessions: Arc<SessionDirectory>,
    pub control: Arc<dyn StreamControl>,
    pub running: AtomicBool,
    pub connections: AtomicUsize,
    pub config: ServerConfig,
}

/// High-level RTSP server orchestrator.
pub struct RtspServer {
    ctx: Arc<ServerContext>,
    local_addr: Option<SocketAddr>,
    accept_thread: Option<JoinHandle<()>>,
}

impl RtspServer {
    pub fn new(config: ServerConfig) -> RtspServer {
        let control = Arc::new(BridgeClient::new(config.data_plane_port));
        RtspServer::with_control(config, control)
    }

    /// Build with a custom data-plane seam (tests substitute their own).
    pub fn with_control(config: ServerConfig, control: Arc<dyn StreamControl>) -> RtspServer {
        let ctx = ServerContext {
            sessions: Arc::new(SessionDirectory::new(config.max_connections * 2)),
            control,
            running: AtomicBool::new(false),
            connections: AtomicUsize::new(0),
            config,
        };
        RtspServer {
            ctx: Arc::new(ctx),
            local_addr: None,
            accept_thread: None,
        }
    }

    pub fn start(&mut self) -> Result<()> {
        if self.ctx.running.load(Ordering::SeqCst) {
            return Err(Error::AlreadyRunning);
        }

        let listener = TcpListener::bind(&self.ctx.config.bind_addr)?;
        listener.set_nonblocking(true)?;
        self.local_addr = Some(listener.local_addr()?);
        self.ctx.running.store(true, Ordering::SeqCst);

        tracing::info!(addr = %self.ctx.config.bind_addr, "RTSP server listening");

        let ctx = self.ctx.clone();
        self.accept_thread = Some(std::thread::spawn(move || {
            conn::accept_loop(listener, ctx);
        }));
        Ok(())
    }

    /// Stop accepting, let connections unwind, and drain the session
    /// directory.
    pub fn stop(&mut self) {
        if !self.ctx.running.swap(false, Ordering::SeqCst) {
            return;
        }
        tracing::info!("RTSP server stopping");
        if let Some(thread) = self.accept_thread.take() {
            let _ = thread.join();
        }
        self.ctx.sessions.clear();
    }

    pub fn is_running(&self) -> bool {
        self.ctx.running.load(Ordering::SeqCst)
    }

    /// Actual bound address (useful when binding port 0).
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Shared session directory (read by admin surfaces and tests).
    pub fn sessions(&self) -> Arc<SessionDirectory> {
        self.ctx.sessions.clone()
    }
}

impl Drop for RtspServer {
    fn drop(&mut self) {
        self.stop();
    }
}
