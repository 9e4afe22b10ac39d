//! In-process MCP peer on a duplex pipe.
#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use mcp_http_bridge::{RpcSession, SessionOptions};
use serde_json::{json, Value};
use tokio::io::{duplex, AsyncBufReadExt, AsyncWriteExt, BufReader};

/// Everything the client sent to the peer, in wire order.
#[derive(Clone, Default)]
pub struct PeerLog(Arc<Mutex<Vec<Value>>>);

impl PeerLog {
    pub fn messages(&self) -> Vec<Value> {
        self.0.lock().unwrap().clone()
    }

    pub fn methods(&self) -> Vec<String> {
        self.messages()
            .iter()
            .filter_map(|m| m["method"].as_str().map(str::to_string))
            .collect()
    }

    pub fn count(&self, method: &str) -> usize {
        self.methods().iter().filter(|m| *m == method).count()
    }

    /// Poll until some logged message matches, or panic after two seconds.
    pub async fn wait_for(&self, pred: impl Fn(&Value) -> bool) -> Value {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        loop {
            if let Some(found) = self.messages().into_iter().find(|m| pred(m)) {
                return found;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "peer never saw the expected message; got {:?}",
                self.messages()
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

/// Start a peer driven by `handler` and a session attached to it.
///
/// `handler` sees each message the client sends and returns the raw lines to
/// write back. Returning `None` makes the peer hang up.
pub fn spawn_peer<F>(options: SessionOptions, mut handler: F) -> (RpcSession, PeerLog)
where
    F: FnMut(&Value) -> Option<Vec<String>> + Send + 'static,
{
    let (client_side, peer_side) = duplex(64 * 1024);
    let (client_read, client_write) = tokio::io::split(client_side);
    let (peer_read, mut peer_write) = tokio::io::split(peer_side);

    let log = PeerLog::default();
    let peer_log = log.clone();
    tokio::spawn(async move {
        let mut lines = BufReader::new(peer_read).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let message: Value = serde_json::from_str(&line).expect("client sent invalid JSON");
            peer_log.0.lock().unwrap().push(message.clone());
            let Some(replies) = handler(&message) else {
                return;
            };
            for reply in replies {
                if peer_write.write_all(format!("{reply}\n").as_bytes()).await.is_err() {
                    return;
                }
            }
        }
    });

    (RpcSession::from_streams(client_read, client_write, options), log)
}

pub fn ok(id: &Value, result: Value) -> String {
    json!({"jsonrpc": "2.0", "id": id, "result": result}).to_string()
}

pub fn err(id: &Value, code: i64, message: &str) -> String {
    json!({"jsonrpc": "2.0", "id": id, "error": {"code": code, "message": message}}).to_string()
}

pub fn server_info() -> Value {
    json!({
        "protocolVersion": "2024-11-05",
        "capabilities": {"tools": {}},
        "serverInfo": {"name": "stub", "version": "0.1.0"}
    })
}

/// A small well-behaved MCP server.
///
/// - `initialize`, `tools/list`: canned results
/// - `echo`: returns its params
/// - `nothing`: `result: null`
/// - `slow`: never answers
/// - `hangup`: closes the pipe
/// - anything else: -32601
pub fn mcp_server(message: &Value) -> Option<Vec<String>> {
    let (Some(id), Some(method)) = (message.get("id"), message["method"].as_str()) else {
        return Some(vec![]);
    };
    let replies = match method {
        "initialize" => vec![ok(id, server_info())],
        "tools/list" => vec![ok(
            id,
            json!({"tools": [{
                "name": "echo",
                "description": "Echo the arguments",
                "inputSchema": {"type": "object"}
            }]}),
        )],
        "echo" => vec![ok(id, message.get("params").cloned().unwrap_or(Value::Null))],
        "nothing" => vec![ok(id, Value::Null)],
        "slow" => vec![],
        "hangup" => return None,
        other => vec![err(id, -32601, &format!("Method not found: {other}"))],
    };
    Some(replies)
}

pub fn stub_session() -> (RpcSession, PeerLog) {
    spawn_peer(SessionOptions::default(), mcp_server)
}
