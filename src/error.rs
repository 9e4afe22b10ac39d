use std::time::Duration;

use hyper::StatusCode;
use serde_json::{json, Value};

use crate::protocol::{RpcError, RpcId};

/// Failures reading or writing newline-delimited frames.
#[derive(Debug, thiserror::Error)]
pub enum FramerError {
    #[error("stream I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// A line that could not be decoded. The stream stays usable.
    #[error("protocol error: {0}")]
    Protocol(String),
    /// An undecodable line that still names the request it answers.
    #[error("malformed reply to {id}: {reason}")]
    MalformedReply { id: RpcId, reason: String },
}

/// Failures of an [`RpcSession`](crate::session::RpcSession).
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    /// The child closed its streams or exited before replying.
    #[error("MCP server is unavailable")]
    PeerUnavailable,
    #[error("MCP server did not answer `{method}` within {}s", .after.as_secs())]
    PeerTimeout { method: String, after: Duration },
    #[error("protocol error: {0}")]
    Protocol(String),
    /// The `initialize` exchange did not produce a result. Carries the raw
    /// peer response for diagnostics.
    #[error("initialize handshake failed: {response}")]
    Handshake { response: String },
}

impl From<FramerError> for SessionError {
    fn from(err: FramerError) -> Self {
        match err {
            FramerError::Io(_) => Self::PeerUnavailable,
            FramerError::Protocol(reason) | FramerError::MalformedReply { reason, .. } => {
                Self::Protocol(reason)
            }
        }
    }
}

/// Failures surfaced by the HTTP bridge.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// Rejected at the HTTP boundary; never reaches the child.
    #[error("{0}")]
    Validation(String),
    /// The child answered with a JSON-RPC error object.
    #[error("MCP server returned error {}: {}", .0.code, .0.message)]
    Rpc(RpcError),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error("bridge startup failed: {0}")]
    Startup(#[source] SessionError),
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
}

impl BridgeError {
    /// HTTP status reported to the caller for this failure.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_) | Self::Rpc(_) => StatusCode::BAD_REQUEST,
            Self::Session(SessionError::PeerTimeout { .. }) => StatusCode::GATEWAY_TIMEOUT,
            Self::Session(_) => StatusCode::BAD_GATEWAY,
            Self::Startup(_) | Self::Bind { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// JSON body reported to the caller for this failure.
    ///
    /// RPC errors are mirrored as an object; everything else is a message string.
    pub fn body(&self) -> Value {
        match self {
            Self::Rpc(err) => json!({ "error": err }),
            Self::Session(SessionError::PeerUnavailable) => {
                json!({ "error": "No response from MCP server" })
            }
            other => json!({ "error": other.to_string() }),
        }
    }
}

/// Invalid bridge configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{name} must be {expected}, got `{value}`")]
    InvalidValue {
        name: &'static str,
        expected: &'static str,
        value: String,
    },
    #[error("no MCP server command given")]
    MissingCommand,
}

/// Failures managing a background bridge from the command line.
#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    #[error("{}: {source}", .path.display())]
    Io {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid PID file {}: `{}`", .path.display(), .content.trim())]
    BadPidFile {
        path: std::path::PathBuf,
        content: String,
    },
    #[error("bridge is already running (PID {0})")]
    AlreadyRunning(u32),
    #[error("bridge exited during startup ({status}); see {}", .log.display())]
    ExitedEarly {
        status: String,
        log: std::path::PathBuf,
    },
    #[error("bridge did not answer within {}s; see {}", .waited.as_secs(), .log.display())]
    NotReady {
        waited: Duration,
        log: std::path::PathBuf,
    },
    #[error("process {0} is still running; retry with --force")]
    DidNotStop(u32),
    #[error("cannot signal process {pid}: {reason}")]
    Signal { pid: u32, reason: String },
    #[error("request to bridge failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("bridge answered {status}: {body}")]
    Remote { status: u16, body: Value },
}
