//! Serving side: listener, accept loop, per-connection tasks and coordinated
//! shutdown.

pub mod transfer;

use crate::error::Result;
use crate::logger::{NoopLogger, TransferLogger};
use crate::protocol::timeouts;
use crate::registry::ConnectionRegistry;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

pub use transfer::{serve_connection, ServeStats};

#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Bind address (host:port)
    pub bind: String,
    /// Files offered to every client, in this order
    pub files: Vec<PathBuf>,
    /// How long shutdown waits for handlers after closing their sockets
    pub shutdown_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: format!("0.0.0.0:{}", crate::protocol::DEFAULT_PORT),
            files: Vec::new(),
            shutdown_timeout: Duration::from_millis(timeouts::SHUTDOWN_MS),
        }
    }
}

/// Triggers shutdown of a running server. Cheap to clone; triggering more
/// than once is harmless.
#[derive(Clone)]
pub struct ShutdownHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl ShutdownHandle {
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }
}

/// Receiving end of a `ShutdownHandle`.
#[derive(Clone)]
pub struct ShutdownSignal {
    rx: watch::Receiver<bool>,
}

impl ShutdownSignal {
    /// Resolves once shutdown is triggered (or every handle is gone).
    pub async fn wait(&mut self) {
        while !*self.rx.borrow_and_update() {
            if self.rx.changed().await.is_err() {
                return;
            }
        }
    }
}

pub fn shutdown_channel() -> (ShutdownHandle, ShutdownSignal) {
    let (tx, rx) = watch::channel(false);
    (ShutdownHandle { tx: Arc::new(tx) }, ShutdownSignal { rx })
}

pub struct Server {
    listener: TcpListener,
    config: ServerConfig,
    registry: Arc<ConnectionRegistry>,
    logger: Arc<dyn TransferLogger>,
}

impl Server {
    pub async fn bind(config: ServerConfig) -> std::io::Result<Self> {
        let listener = TcpListener::bind(&config.bind).await?;
        Ok(Server {
            listener,
            config,
            registry: Arc::new(ConnectionRegistry::new()),
            logger: Arc::new(NoopLogger),
        })
    }

    pub fn with_logger(mut self, logger: Arc<dyn TransferLogger>) -> Self {
        self.logger = logger;
        self
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn registry(&self) -> Arc<ConnectionRegistry> {
        Arc::clone(&self.registry)
    }

    /// Accept connections until `signal` fires, then close every live
    /// connection and wait (bounded by the shutdown timeout) for their
    /// handlers to finish.
    pub async fn run(self, mut signal: ShutdownSignal) -> Result<()> {
        let Server {
            listener,
            config,
            registry,
            logger,
        } = self;
        info!(address = %listener.local_addr()?, files = config.files.len(), "server start");

        let stopping = Arc::new(AtomicBool::new(false));
        // Every handler holds a sender; recv() yields None once all are dropped
        let (alive_tx, mut alive_rx) = mpsc::channel::<()>(1);

        let accept = tokio::spawn(accept_loop(AcceptLoop {
            listener,
            files: Arc::from(config.files),
            registry: Arc::clone(&registry),
            logger,
            stopping: Arc::clone(&stopping),
            signal: signal.clone(),
            alive: alive_tx,
        }));

        signal.wait().await;
        warn!("shutting down server");
        stopping.store(true, Ordering::SeqCst);

        let closed = registry.close_all();
        warn!(connections = closed, "stopping server");

        let drain = async {
            if let Err(e) = accept.await {
                error!(error = %e, "accept loop task failed");
            }
            let _ = alive_rx.recv().await;
        };
        match tokio::time::timeout(config.shutdown_timeout, drain).await {
            Ok(()) => warn!("all connections closed, server stopped gracefully"),
            Err(_) => warn!(
                remaining = registry.len(),
                "shutdown timeout reached, forcing exit"
            ),
        }
        Ok(())
    }
}

struct AcceptLoop {
    listener: TcpListener,
    files: Arc<[PathBuf]>,
    registry: Arc<ConnectionRegistry>,
    logger: Arc<dyn TransferLogger>,
    stopping: Arc<AtomicBool>,
    signal: ShutdownSignal,
    alive: mpsc::Sender<()>,
}

async fn accept_loop(mut ctx: AcceptLoop) {
    loop {
        let accepted = tokio::select! {
            biased;
            _ = ctx.signal.wait() => break,
            r = ctx.listener.accept() => r,
        };
        let (stream, peer) = match accepted {
            Ok(conn) => conn,
            Err(e) => {
                if ctx.stopping.load(Ordering::SeqCst) {
                    break;
                }
                error!(error = %e, "listener accept failed");
                // avoid spinning on persistent errors such as EMFILE
                tokio::time::sleep(Duration::from_millis(50)).await;
                continue;
            }
        };

        let (stream, handle) = match detach_handle(stream) {
            Ok(pair) => pair,
            Err(e) => {
                warn!(%peer, error = %e, "failed to register connection");
                continue;
            }
        };
        // Register before the flag check: shutdown sets the flag before it
        // sweeps the registry, so no connection slips through both.
        ctx.registry.register(peer, handle);
        if ctx.stopping.load(Ordering::SeqCst) {
            ctx.registry.unregister(&peer);
            break;
        }

        info!(%peer, "new connection accepted");
        tokio::spawn(handle_connection(
            stream,
            peer,
            Arc::clone(&ctx.files),
            Arc::clone(&ctx.logger),
            ctx.alive.clone(),
            Registration {
                registry: Arc::clone(&ctx.registry),
                peer,
            },
        ));
    }
    debug!("accept loop stopped");
}

/// Split off a std handle to the same socket for the registry.
fn detach_handle(stream: TcpStream) -> std::io::Result<(TcpStream, std::net::TcpStream)> {
    let std_stream = stream.into_std()?;
    let handle = std_stream.try_clone()?;
    Ok((TcpStream::from_std(std_stream)?, handle))
}

/// Deregisters on drop, whatever path the handler leaves by.
struct Registration {
    registry: Arc<ConnectionRegistry>,
    peer: SocketAddr,
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.registry.unregister(&self.peer);
    }
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    files: Arc<[PathBuf]>,
    logger: Arc<dyn TransferLogger>,
    _alive: mpsc::Sender<()>,
    registration: Registration,
) {
    let _ = stream.set_nodelay(true);
    let peer_s = peer.to_string();
    logger.connection(&peer_s);
    let started = Instant::now();

    match serve_connection(stream, &peer_s, &files, logger.as_ref()).await {
        Ok(stats) => {
            info!(
                peer = %peer_s,
                sent = stats.files_sent,
                rejected = stats.rejected,
                bytes = stats.bytes_sent,
                "transfer finished"
            );
            if stats.confirmed {
                logger.done(
                    &peer_s,
                    stats.files_sent,
                    stats.bytes_sent,
                    started.elapsed().as_secs_f64(),
                );
            }
        }
        Err(e) if e.is_disconnect() => {
            info!(peer = %peer_s, "peer disconnected");
        }
        Err(e) if e.is_protocol_violation() => {
            warn!(peer = %peer_s, error = %e, "protocol violation, dropping connection");
            logger.error("protocol", &peer_s, &e.to_string());
        }
        Err(e) => {
            error!(peer = %peer_s, error = %e, "transfer failed");
            logger.error("transfer", &peer_s, &e.to_string());
        }
    }
    drop(registration);
    info!(peer = %peer_s, "connection closed");
}
