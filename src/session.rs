//! JSON-RPC session with one child process.
//!
//! A background reader task owns the child's stdout and routes every response
//! to the caller waiting on its id, so any number of calls may be in flight at
//! once. The child's stdin sits behind an async mutex; each frame is written
//! whole before the lock is released.

use std::collections::HashMap;
use std::fmt;
use std::process::Stdio;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{FramerError, SessionError};
use crate::framer::{FrameReader, FrameWriter};
use crate::protocol::{
    ClientInfo, InitializeParams, MessageKind, RpcError, RpcId, RpcMessage, PROTOCOL_VERSION,
};

/// How long `close()` waits for the child to exit before killing it.
const CHILD_EXIT_GRACE: Duration = Duration::from_secs(3);

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;
type SharedWriter = Arc<Mutex<Option<FrameWriter<BoxedWriter>>>>;

/// Handshake state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Uninitialized,
    Initializing,
    Ready,
    Closed,
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Uninitialized => "uninitialized",
            Self::Initializing => "initializing",
            Self::Ready => "ready",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Tunables for an [`RpcSession`].
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Upper bound on a single call. `None` waits forever.
    pub call_timeout: Option<Duration>,
    pub protocol_version: String,
    pub client_info: ClientInfo,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            call_timeout: Some(Duration::from_secs(60)),
            protocol_version: PROTOCOL_VERSION.into(),
            client_info: ClientInfo::default(),
        }
    }
}

/// Outstanding requests keyed by id.
#[derive(Default)]
struct PendingCalls {
    waiters: HashMap<i64, oneshot::Sender<Result<RpcMessage, SessionError>>>,
    closed: bool,
}

type SharedPending = Arc<StdMutex<PendingCalls>>;

fn lock_pending(pending: &SharedPending) -> std::sync::MutexGuard<'_, PendingCalls> {
    // A panic while holding this lock cannot leave the map half-updated.
    pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Fail every waiter and refuse new ones.
fn close_pending(pending: &SharedPending) {
    let mut table = lock_pending(pending);
    table.closed = true;
    table.waiters.clear();
}

/// JSON-RPC client side of one peer.
pub struct RpcSession {
    writer: SharedWriter,
    pending: SharedPending,
    next_id: AtomicI64,
    status: watch::Sender<SessionStatus>,
    /// Cached `initialize` result; the lock doubles as the handshake gate.
    handshake: Mutex<Option<Value>>,
    reader_task: StdMutex<Option<JoinHandle<()>>>,
    child: Mutex<Option<Child>>,
    options: SessionOptions,
}

impl RpcSession {
    /// Spawn `command` with piped stdio and attach a session to it.
    ///
    /// The child's stderr is inherited. The child is killed if the session is
    /// dropped without [`close`](Self::close).
    pub fn spawn(
        command: &str,
        args: &[String],
        options: SessionOptions,
    ) -> Result<Self, SessionError> {
        let mut child = Command::new(command)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| SessionError::Spawn {
                command: command.to_string(),
                source,
            })?;

        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            return Err(SessionError::Spawn {
                command: command.to_string(),
                source: std::io::Error::new(
                    std::io::ErrorKind::Other,
                    "child stdio was not captured",
                ),
            });
        };

        info!(command, pid = ?child.id(), "spawned MCP server");
        Ok(Self::attach(stdout, stdin, options, Some(child)))
    }

    /// Attach a session to an already-connected pair of streams.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn from_streams<R, W>(reader: R, writer: W, options: SessionOptions) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self::attach(reader, writer, options, None)
    }

    fn attach<R, W>(reader: R, writer: W, options: SessionOptions, child: Option<Child>) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let writer: SharedWriter =
            Arc::new(Mutex::new(Some(FrameWriter::new(Box::new(writer) as BoxedWriter))));
        let pending: SharedPending = Arc::default();
        let reader_task = tokio::spawn(pump(
            FrameReader::new(BufReader::new(reader)),
            Arc::clone(&pending),
            Arc::clone(&writer),
        ));
        let (status, _) = watch::channel(SessionStatus::Uninitialized);

        Self {
            writer,
            pending,
            next_id: AtomicI64::new(1),
            status,
            handshake: Mutex::new(None),
            reader_task: StdMutex::new(Some(reader_task)),
            child: Mutex::new(child),
            options,
        }
    }

    pub fn status(&self) -> SessionStatus {
        *self.status.borrow()
    }

    /// Watch handshake state changes.
    pub fn subscribe(&self) -> watch::Receiver<SessionStatus> {
        self.status.subscribe()
    }

    /// Perform the `initialize` / `notifications/initialized` handshake.
    ///
    /// Idempotent: after the first success the cached peer result is returned
    /// without touching the wire. Concurrent callers wait for the in-flight
    /// handshake instead of starting their own.
    pub async fn initialize(&self) -> Result<Value, SessionError> {
        let mut cached = self.handshake.lock().await;
        if let Some(result) = cached.as_ref() {
            return Ok(result.clone());
        }
        if self.status() == SessionStatus::Closed {
            return Err(SessionError::PeerUnavailable);
        }

        self.status.send_replace(SessionStatus::Initializing);
        match self.perform_handshake().await {
            Ok(result) => {
                *cached = Some(result.clone());
                self.leave_initializing(SessionStatus::Ready);
                info!("MCP session ready");
                Ok(result)
            }
            Err(err) => {
                self.leave_initializing(SessionStatus::Uninitialized);
                warn!(error = %err, "MCP handshake failed");
                Err(err)
            }
        }
    }

    /// Move out of `Initializing` unless `close()` got there first.
    fn leave_initializing(&self, next: SessionStatus) {
        self.status.send_if_modified(|status| {
            if *status == SessionStatus::Initializing {
                *status = next;
                true
            } else {
                false
            }
        });
    }

    async fn perform_handshake(&self) -> Result<Value, SessionError> {
        let params = InitializeParams::new(
            self.options.protocol_version.clone(),
            self.options.client_info.clone(),
        );
        let params = serde_json::to_value(params)
            .map_err(|e| SessionError::Protocol(format!("cannot encode initialize params: {e}")))?;

        let response = self.request("initialize", Some(params)).await?;
        let result = match (&response.result, &response.error) {
            (Some(result), None) => result.clone(),
            _ => {
                let raw = serde_json::to_string(&response)
                    .unwrap_or_else(|_| format!("{response:?}"));
                return Err(SessionError::Handshake { response: raw });
            }
        };

        self.notify("notifications/initialized", None).await?;
        Ok(result)
    }

    /// Call `method` and return the peer's raw response.
    ///
    /// Runs the handshake first if the session is not yet ready. The caller
    /// inspects `result` vs `error` on the returned message.
    pub async fn call(&self, method: &str, params: Option<Value>) -> Result<RpcMessage, SessionError> {
        if self.status() != SessionStatus::Ready {
            self.initialize().await?;
        }
        self.request(method, params).await
    }

    /// Send a notification. No id, no reply.
    pub async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), SessionError> {
        debug!(method, "notify");
        self.send(&RpcMessage::notification(method, params)).await
    }

    async fn request(&self, method: &str, params: Option<Value>) -> Result<RpcMessage, SessionError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        {
            let mut table = lock_pending(&self.pending);
            if table.closed {
                return Err(SessionError::PeerUnavailable);
            }
            table.waiters.insert(id, tx);
        }

        debug!(id, method, "call");
        if let Err(err) = self.send(&RpcMessage::request(RpcId::Number(id), method, params)).await {
            lock_pending(&self.pending).waiters.remove(&id);
            return Err(err);
        }

        let reply = match self.options.call_timeout {
            Some(limit) => match tokio::time::timeout(limit, rx).await {
                Ok(reply) => reply,
                Err(_) => {
                    lock_pending(&self.pending).waiters.remove(&id);
                    warn!(id, method, "call timed out after {}s", limit.as_secs());
                    return Err(SessionError::PeerTimeout {
                        method: method.to_string(),
                        after: limit,
                    });
                }
            },
            None => rx.await,
        };

        reply.unwrap_or(Err(SessionError::PeerUnavailable))
    }

    async fn send(&self, message: &RpcMessage) -> Result<(), SessionError> {
        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or(SessionError::PeerUnavailable)?;
        writer.write(message).await.map_err(SessionError::from)
    }

    /// Close stdin, stop reading, and wait for the child to exit.
    ///
    /// Pending and later calls fail with [`SessionError::PeerUnavailable`].
    /// Safe to call more than once.
    pub async fn close(&self) {
        self.status.send_replace(SessionStatus::Closed);

        if let Some(mut writer) = self.writer.lock().await.take() {
            if let Err(e) = writer.shutdown().await {
                debug!("closing child stdin: {e}");
            }
        }

        close_pending(&self.pending);

        let child = self.child.lock().await.take();
        if let Some(mut child) = child {
            match tokio::time::timeout(CHILD_EXIT_GRACE, child.wait()).await {
                Ok(Ok(status)) => info!(%status, "MCP server exited"),
                Ok(Err(e)) => warn!("waiting for MCP server: {e}"),
                Err(_) => {
                    warn!("MCP server did not exit within {}s, killing it", CHILD_EXIT_GRACE.as_secs());
                    if let Err(e) = child.kill().await {
                        warn!("killing MCP server: {e}");
                    }
                }
            }
        }

        let task = self
            .reader_task
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(task) = task {
            task.abort();
        }
    }
}

impl Drop for RpcSession {
    fn drop(&mut self) {
        let task = self
            .reader_task
            .get_mut()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(task) = task {
            task.abort();
        }
    }
}

/// Read frames until end of stream, routing each one.
async fn pump<R>(mut reader: FrameReader<R>, pending: SharedPending, writer: SharedWriter)
where
    R: tokio::io::AsyncBufRead + Unpin,
{
    loop {
        match reader.read().await {
            Ok(Some(message)) => route(message, &pending, &writer),
            Ok(None) => {
                info!("MCP server closed its output");
                break;
            }
            Err(FramerError::Protocol(reason)) => {
                warn!("ignoring unreadable line from MCP server: {reason}");
            }
            Err(FramerError::MalformedReply { id, reason }) => {
                warn!(%id, "unreadable reply from MCP server: {reason}");
                if let RpcId::Number(id) = id {
                    fail_waiter(&pending, id, reason);
                }
            }
            Err(FramerError::Io(e)) => {
                warn!("reading from MCP server failed: {e}");
                break;
            }
        }
    }
    close_pending(&pending);
}

fn route(message: RpcMessage, pending: &SharedPending, writer: &SharedWriter) {
    match message.kind() {
        MessageKind::Response => {
            let waiter = match &message.id {
                Some(RpcId::Number(id)) => lock_pending(pending).waiters.remove(id),
                _ => None,
            };
            match waiter {
                Some(tx) => {
                    // The caller may have given up (timeout); nothing to do then.
                    let _ = tx.send(Ok(message));
                }
                None => warn!(id = ?message.id, "dropping response with no pending call"),
            }
        }
        MessageKind::Notification => {
            debug!(method = message.method.as_deref().unwrap_or_default(), "peer notification");
        }
        MessageKind::Request => {
            let method = message.method.unwrap_or_default();
            let Some(id) = message.id else { return };
            debug!(%id, method, "rejecting peer request");
            let reply = RpcMessage::failure(id, RpcError::method_not_found(&method));
            // The reader task never waits on the writer.
            let writer = Arc::clone(writer);
            tokio::spawn(async move {
                if let Some(writer) = writer.lock().await.as_mut() {
                    if let Err(e) = writer.write(&reply).await {
                        warn!("answering peer request `{method}`: {e}");
                    }
                }
            });
        }
        MessageKind::Invalid => {
            warn!(?message, "invalid message from MCP server");
            if let Some(RpcId::Number(id)) = message.id {
                fail_waiter(pending, id, "reply carries both result and error".into());
            }
        }
    }
}

/// Hand the caller waiting on `id` a protocol error instead of a reply.
fn fail_waiter(pending: &SharedPending, id: i64, reason: String) {
    if let Some(tx) = lock_pending(pending).waiters.remove(&id) {
        let _ = tx.send(Err(SessionError::Protocol(reason)));
    }
}
