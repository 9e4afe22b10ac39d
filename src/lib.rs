//! HTTP bridge for stdio MCP servers.
//!
//! Spawns a tool server that speaks newline-delimited JSON-RPC 2.0 on its
//! stdio, performs the MCP `initialize` handshake, and exposes every RPC
//! method as `POST /{method}` so plain HTTP clients can call it.

pub mod config;
pub mod error;
pub mod framer;
pub mod handlers;
pub mod protocol;
pub mod server;
pub mod session;
pub mod supervisor;

pub use config::BridgeConfig;
pub use error::{BridgeError, ConfigError, FramerError, SessionError, SupervisorError};
pub use server::{BridgeServer, BridgeState};
pub use session::{RpcSession, SessionOptions, SessionStatus};
