use serde_json::{Map, Value};
use tracing::debug;

use crate::error::BridgeError;
use crate::session::RpcSession;

/// RPC method named by a request path: the path minus its leading `/`.
pub fn method_from_path(path: &str) -> Result<&str, BridgeError> {
    let method = path.strip_prefix('/').unwrap_or(path);
    if method.is_empty() {
        return Err(BridgeError::Validation("Method name is required".into()));
    }
    Ok(method)
}

/// Parse a request body into RPC params.
///
/// Empty (or whitespace-only) bodies mean no params.
pub fn params_from_body(body: &[u8]) -> Result<Option<Map<String, Value>>, BridgeError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }
    match serde_json::from_slice::<Value>(body) {
        Ok(Value::Object(params)) => Ok(Some(params)),
        Ok(_) => Err(BridgeError::Validation(
            "Request body must be a JSON object".into(),
        )),
        Err(_) => Err(BridgeError::Validation("Invalid JSON in request body".into())),
    }
}

/// Validate the request, call the peer, and unwrap its answer.
///
/// Validation happens before anything is sent to the peer.
pub async fn forward(session: &RpcSession, path: &str, body: &[u8]) -> Result<Value, BridgeError> {
    let method = method_from_path(path)?;
    let params = params_from_body(body)?;

    let response = session.call(method, params.map(Value::Object)).await?;
    if let Some(error) = response.error {
        debug!(method, code = error.code, "peer returned an error");
        return Err(BridgeError::Rpc(error));
    }
    Ok(response.result.unwrap_or(Value::Null))
}
