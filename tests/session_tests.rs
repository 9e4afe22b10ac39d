//! RPC session behaviour against an in-process peer.

mod common;

use std::collections::HashMap;
use std::time::Duration;

use common::{err, mcp_server, ok, server_info, spawn_peer, stub_session};
use mcp_http_bridge::protocol::PROTOCOL_VERSION;
use mcp_http_bridge::{SessionError, SessionOptions, SessionStatus};
use serde_json::{json, Value};

#[tokio::test]
async fn handshake_happens_once() {
    let (session, log) = stub_session();
    assert_eq!(session.status(), SessionStatus::Uninitialized);

    let (a, b, c) = tokio::join!(
        session.initialize(),
        session.initialize(),
        session.initialize()
    );
    assert_eq!(a.unwrap(), server_info());
    assert_eq!(b.unwrap(), server_info());
    assert_eq!(c.unwrap(), server_info());
    assert_eq!(session.status(), SessionStatus::Ready);

    session.call("echo", Some(json!({"n": 1}))).await.unwrap();
    session.initialize().await.unwrap();
    session.call("echo", Some(json!({"n": 2}))).await.unwrap();

    assert_eq!(log.count("initialize"), 1);
    assert_eq!(
        log.methods(),
        vec!["initialize", "notifications/initialized", "echo", "echo"]
    );
}

#[tokio::test]
async fn initialize_carries_version_and_client_info() {
    let (session, log) = stub_session();
    session.initialize().await.unwrap();

    let init = &log.messages()[0];
    assert_eq!(init["jsonrpc"], "2.0");
    assert_eq!(init["params"]["protocolVersion"], PROTOCOL_VERSION);
    assert_eq!(init["params"]["clientInfo"]["name"], "mcp-http-bridge");
    assert!(init["params"]["capabilities"].is_object());

    let initialized = &log.messages()[1];
    assert_eq!(initialized["method"], "notifications/initialized");
    assert!(initialized.get("id").is_none());
}

#[tokio::test]
async fn first_call_runs_the_handshake() {
    let (session, log) = stub_session();

    let response = session.call("tools/list", None).await.unwrap();
    assert_eq!(response.result.unwrap()["tools"][0]["name"], "echo");
    assert_eq!(
        log.methods(),
        vec!["initialize", "notifications/initialized", "tools/list"]
    );
}

#[tokio::test]
async fn failed_handshake_is_reported_and_retried() {
    let (session, log) = spawn_peer(SessionOptions::default(), |message| {
        let Some(id) = message.get("id") else {
            return Some(vec![]);
        };
        Some(vec![err(id, -32602, "unsupported protocol version")])
    });

    match session.initialize().await {
        Err(SessionError::Handshake { response }) => {
            assert!(response.contains("unsupported protocol version"), "{response}");
        }
        other => panic!("expected handshake failure, got {other:?}"),
    }
    assert_eq!(session.status(), SessionStatus::Uninitialized);
    assert_eq!(log.count("notifications/initialized"), 0);

    assert!(session.initialize().await.is_err());
    assert_eq!(log.count("initialize"), 2);
}

#[tokio::test]
async fn replies_are_matched_by_id_not_order() {
    let mut held: Vec<(Value, String)> = Vec::new();
    let (session, _log) = spawn_peer(SessionOptions::default(), move |message| {
        let (Some(id), Some(method)) = (message.get("id"), message["method"].as_str()) else {
            return Some(vec![]);
        };
        if method == "initialize" {
            return Some(vec![ok(id, server_info())]);
        }
        held.push((id.clone(), method.to_string()));
        if held.len() < 3 {
            return Some(vec![]);
        }
        Some(
            held.drain(..)
                .rev()
                .map(|(id, method)| ok(&id, json!({ "answered": method })))
                .collect(),
        )
    });
    session.initialize().await.unwrap();

    let (a, b, c) = tokio::join!(
        session.call("alpha", None),
        session.call("beta", None),
        session.call("gamma", None)
    );
    let answers: HashMap<&str, Value> = [("alpha", a), ("beta", b), ("gamma", c)]
        .into_iter()
        .map(|(name, r)| (name, r.unwrap().result.unwrap()))
        .collect();
    for (name, result) in answers {
        assert_eq!(result, json!({ "answered": name }));
    }
}

#[tokio::test]
async fn notifications_and_garbage_do_not_disturb_calls() {
    let (session, _log) = spawn_peer(SessionOptions::default(), |message| {
        let replies = mcp_server(message)?;
        if message["method"] != "echo" {
            return Some(replies);
        }
        let mut lines = vec![
            r#"{"jsonrpc":"2.0","method":"notifications/progress","params":{"progress":1}}"#
                .to_string(),
            "this is not json".to_string(),
            r#"{"jsonrpc":"2.0","id":999,"result":"nobody asked"}"#.to_string(),
        ];
        lines.extend(replies);
        Some(lines)
    });

    let response = session.call("echo", Some(json!({"k": "v"}))).await.unwrap();
    assert_eq!(response.result, Some(json!({"k": "v"})));

    let again = session.call("echo", Some(json!({"k": 2}))).await.unwrap();
    assert_eq!(again.result, Some(json!({"k": 2})));
}

#[tokio::test]
async fn peer_requests_get_method_not_found() {
    let (session, log) = spawn_peer(SessionOptions::default(), |message| {
        let mut replies = mcp_server(message)?;
        if message["method"] == "echo" {
            replies.insert(
                0,
                r#"{"jsonrpc":"2.0","id":"srv-1","method":"roots/list"}"#.to_string(),
            );
        }
        Some(replies)
    });

    session.call("echo", None).await.unwrap();

    let reply = log.wait_for(|m| m["id"] == "srv-1").await;
    assert_eq!(reply["error"]["code"], -32601);
    assert!(reply.get("result").is_none());
}

#[tokio::test]
async fn error_responses_are_returned_verbatim() {
    let (session, _log) = stub_session();

    let response = session.call("no/such/method", None).await.unwrap();
    let error = response.error.unwrap();
    assert_eq!(error.code, -32601);
    assert_eq!(error.message, "Method not found: no/such/method");
    assert!(response.result.is_none());
}

#[tokio::test]
async fn null_result_is_a_result() {
    let (session, _log) = stub_session();

    let response = session.call("nothing", None).await.unwrap();
    assert_eq!(response.result, Some(Value::Null));
    assert!(response.error.is_none());
}

#[tokio::test]
async fn slow_call_times_out_without_poisoning_the_session() {
    let options = SessionOptions {
        call_timeout: Some(Duration::from_millis(100)),
        ..SessionOptions::default()
    };
    let (session, _log) = spawn_peer(options, mcp_server);

    match session.call("slow", None).await {
        Err(SessionError::PeerTimeout { method, after }) => {
            assert_eq!(method, "slow");
            assert_eq!(after, Duration::from_millis(100));
        }
        other => panic!("expected timeout, got {other:?}"),
    }

    let response = session.call("echo", Some(json!({"still": "alive"}))).await.unwrap();
    assert_eq!(response.result, Some(json!({"still": "alive"})));
}

#[tokio::test]
async fn hangup_fails_pending_and_later_calls() {
    let (session, _log) = stub_session();
    session.initialize().await.unwrap();

    let in_flight = session.call("hangup", None).await;
    assert!(matches!(in_flight, Err(SessionError::PeerUnavailable)));

    let later = session.call("echo", None).await;
    assert!(matches!(later, Err(SessionError::PeerUnavailable)));
}

#[tokio::test]
async fn close_is_idempotent_and_final() {
    let (session, _log) = stub_session();
    session.initialize().await.unwrap();
    let mut status = session.subscribe();

    session.close().await;
    session.close().await;

    assert_eq!(*status.borrow_and_update(), SessionStatus::Closed);
    assert!(matches!(
        session.call("echo", None).await,
        Err(SessionError::PeerUnavailable)
    ));
    assert!(matches!(
        session.notify("notifications/cancelled", None).await,
        Err(SessionError::PeerUnavailable)
    ));
}

#[tokio::test]
async fn close_before_handshake_blocks_initialize() {
    let (session, log) = stub_session();
    session.close().await;

    assert!(matches!(
        session.initialize().await,
        Err(SessionError::PeerUnavailable)
    ));
    assert_eq!(log.count("initialize"), 0);
}

/// Peer that answers `ping` with `line` (with `{id}` replaced) and behaves otherwise.
fn broken_ping(line: &'static str) -> impl FnMut(&Value) -> Option<Vec<String>> + Send {
    move |message: &Value| {
        if message["method"] == "ping" {
            let id = message["id"].to_string();
            return Some(vec![line.replace("{id}", &id)]);
        }
        mcp_server(message)
    }
}

#[tokio::test]
async fn reply_with_result_and_error_fails_the_call() {
    let options = SessionOptions {
        call_timeout: None,
        ..SessionOptions::default()
    };
    let (session, _log) = spawn_peer(
        options,
        broken_ping(r#"{"jsonrpc":"2.0","id":{id},"result":1,"error":{"code":-1,"message":"x"}}"#),
    );

    let outcome = tokio::time::timeout(Duration::from_secs(5), session.call("ping", None))
        .await
        .expect("call should fail immediately, not hang");
    match outcome {
        Err(SessionError::Protocol(reason)) => assert!(reason.contains("both"), "{reason}"),
        other => panic!("expected protocol error, got {other:?}"),
    }

    let response = session.call("echo", Some(json!({"ok": true}))).await.unwrap();
    assert_eq!(response.result, Some(json!({"ok": true})));
}

#[tokio::test]
async fn undecodable_reply_fails_only_its_call() {
    let options = SessionOptions {
        call_timeout: None,
        ..SessionOptions::default()
    };
    let (session, _log) = spawn_peer(
        options,
        broken_ping(r#"{"jsonrpc":"2.0","id":{id},"error":{"code":-32000}}"#),
    );
    session.initialize().await.unwrap();

    let (broken, fine) = tokio::time::timeout(Duration::from_secs(5), async {
        tokio::join!(
            session.call("ping", None),
            session.call("echo", Some(json!({"n": 1})))
        )
    })
    .await
    .expect("calls should settle without a timeout");

    assert!(matches!(broken, Err(SessionError::Protocol(_))), "{broken:?}");
    assert_eq!(fine.unwrap().result, Some(json!({"n": 1})));
}

#[tokio::test]
async fn peer_request_is_answered_while_a_large_write_is_blocked() {
    use tokio::io::{duplex, AsyncBufReadExt, AsyncWriteExt, BufReader};

    let (client_side, peer_side) = duplex(1024);
    let (client_read, client_write) = tokio::io::split(client_side);
    let (peer_read, mut peer_write) = tokio::io::split(peer_side);
    let session = mcp_http_bridge::RpcSession::from_streams(
        client_read,
        client_write,
        SessionOptions {
            call_timeout: None,
            ..SessionOptions::default()
        },
    );

    let peer = tokio::spawn(async move {
        let mut lines = BufReader::new(peer_read).lines();
        let init: Value = serde_json::from_str(&lines.next_line().await?.unwrap()).unwrap();
        peer_write
            .write_all(format!("{}\n", ok(&init["id"], server_info())).as_bytes())
            .await?;
        lines.next_line().await?; // notifications/initialized

        // Stop reading stdin until our own output has been drained.
        tokio::time::sleep(Duration::from_millis(50)).await;
        peer_write
            .write_all(b"{\"jsonrpc\":\"2.0\",\"id\":\"srv-1\",\"method\":\"roots/list\"}\n")
            .await?;
        for n in 0..64 {
            let line = format!(
                "{{\"jsonrpc\":\"2.0\",\"method\":\"notifications/progress\",\"params\":{{\"n\":{n}}}}}\n"
            );
            peer_write.write_all(line.as_bytes()).await?;
        }

        let mut big_id = Value::Null;
        let mut saw_reply = false;
        while big_id.is_null() || !saw_reply {
            let Some(line) = lines.next_line().await? else { break };
            let message: Value = serde_json::from_str(&line).unwrap();
            if message["id"] == "srv-1" {
                saw_reply = true;
            } else if message["method"] == "big" {
                big_id = message["id"].clone();
            }
        }
        peer_write
            .write_all(format!("{}\n", ok(&big_id, json!("done"))).as_bytes())
            .await?;
        Ok::<_, std::io::Error>(saw_reply)
    });

    session.initialize().await.unwrap();
    let payload = json!({ "blob": "x".repeat(16 * 1024) });
    let response = tokio::time::timeout(Duration::from_secs(5), session.call("big", Some(payload)))
        .await
        .expect("session and peer deadlocked")
        .unwrap();
    assert_eq!(response.result, Some(json!("done")));
    assert!(peer.await.unwrap().unwrap());
}
