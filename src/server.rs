use std::convert::Infallible;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::Request;
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::config::BridgeConfig;
use crate::error::BridgeError;
use crate::handlers;
use crate::session::RpcSession;

/// How long open connections get to finish once shutdown starts.
const CONNECTION_DRAIN: Duration = Duration::from_secs(5);

/// Lifecycle of the bridge process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeState {
    Starting,
    Ready,
    ShuttingDown,
    Stopped,
}

impl fmt::Display for BridgeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Starting => "starting",
            Self::Ready => "ready",
            Self::ShuttingDown => "shutting down",
            Self::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// HTTP front for one MCP server child process.
pub struct BridgeServer {
    config: BridgeConfig,
    state: watch::Sender<BridgeState>,
}

impl BridgeServer {
    pub fn new(config: BridgeConfig) -> Self {
        let (state, _) = watch::channel(BridgeState::Starting);
        Self { config, state }
    }

    pub fn state(&self) -> BridgeState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<BridgeState> {
        self.state.subscribe()
    }

    /// Run until SIGINT (or SIGTERM on Unix).
    pub async fn run(&self) -> Result<(), BridgeError> {
        self.run_until(shutdown_signal()).await
    }

    /// Spawn the child, handshake, bind, and serve until `shutdown` resolves.
    ///
    /// A failed handshake ends startup before the port is bound.
    pub async fn run_until<F>(&self, shutdown: F) -> Result<(), BridgeError>
    where
        F: Future<Output = ()> + Send,
    {
        let session = self.start_session().await?;

        let addr = self.config.bind_addr();
        let listener = match TcpListener::bind(&addr).await {
            Ok(listener) => listener,
            Err(source) => {
                session.close().await;
                self.transition(BridgeState::Stopped);
                return Err(BridgeError::Bind { addr, source });
            }
        };

        self.serve(listener, Arc::new(session), shutdown).await;
        Ok(())
    }

    /// Spawn the configured child and complete the handshake.
    pub async fn start_session(&self) -> Result<RpcSession, BridgeError> {
        self.transition(BridgeState::Starting);
        info!(command = %self.config.command, args = ?self.config.args, "starting MCP server");

        let session = RpcSession::spawn(
            &self.config.command,
            &self.config.args,
            self.config.session_options(),
        )
        .map_err(|e| {
            self.transition(BridgeState::Stopped);
            BridgeError::Startup(e)
        })?;

        if let Err(e) = session.initialize().await {
            session.close().await;
            self.transition(BridgeState::Stopped);
            return Err(BridgeError::Startup(e));
        }
        Ok(session)
    }

    /// Accept connections on `listener` until `shutdown` resolves, then drain
    /// connections and close `session`.
    pub async fn serve<F>(&self, listener: TcpListener, session: Arc<RpcSession>, shutdown: F)
    where
        F: Future<Output = ()> + Send,
    {
        match listener.local_addr() {
            Ok(addr) => info!("MCP bridge listening on http://{addr}"),
            Err(_) => info!("MCP bridge listening"),
        }
        self.transition(BridgeState::Ready);

        let (stop_tx, stop_rx) = watch::channel(false);
        let mut connections = JoinSet::new();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        debug!(%peer, "accepted connection");
                        connections.spawn(serve_connection(
                            TokioIo::new(stream),
                            Arc::clone(&session),
                            stop_rx.clone(),
                        ));
                    }
                    Err(e) => error!("accepting connection: {e}"),
                },
                Some(_) = connections.join_next(), if !connections.is_empty() => {}
            }
        }

        self.transition(BridgeState::ShuttingDown);
        drop(listener);
        let _ = stop_tx.send(true);

        let drain = async { while connections.join_next().await.is_some() {} };
        if tokio::time::timeout(CONNECTION_DRAIN, drain).await.is_err() {
            warn!("connections still open after {}s, dropping them", CONNECTION_DRAIN.as_secs());
            connections.abort_all();
        }

        session.close().await;
        self.transition(BridgeState::Stopped);
    }

    fn transition(&self, next: BridgeState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            info!("bridge {previous} -> {next}");
        }
    }
}

async fn serve_connection(
    io: TokioIo<tokio::net::TcpStream>,
    session: Arc<RpcSession>,
    mut stop: watch::Receiver<bool>,
) {
    let service = service_fn(move |req: Request<Incoming>| {
        let session = Arc::clone(&session);
        async move { Ok::<_, Infallible>(handlers::handle(req, &session).await) }
    });

    let conn = http1::Builder::new().serve_connection(io, service);
    tokio::pin!(conn);

    tokio::select! {
        res = conn.as_mut() => {
            if let Err(e) = res {
                debug!("connection error: {e}");
            }
        }
        _ = stop.changed() => {
            conn.as_mut().graceful_shutdown();
            if let Err(e) = conn.await {
                debug!("connection error during shutdown: {e}");
            }
        }
    }
}

/// Resolves on SIGINT, or SIGTERM on Unix.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("cannot listen for Ctrl+C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("cannot listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received interrupt"),
        _ = terminate => info!("received terminate"),
    }
}
