//! HTTP request handling: one inbound request, one RPC call.

pub mod forward;
pub mod reply;

use bytes::Bytes;
use http_body_util::{BodyExt, LengthLimitError, Limited};
use hyper::body::Body;
use hyper::{Method, Request, StatusCode};
use tracing::{debug, warn};

use crate::error::BridgeError;
use crate::framer::MAX_MESSAGE_BYTES;
use crate::session::RpcSession;

pub use reply::HttpResponse;

/// Handle a request straight off the wire.
///
/// The body is only read for `POST`, and at most [`MAX_MESSAGE_BYTES`] of it.
pub async fn handle<B>(req: Request<B>, session: &RpcSession) -> HttpResponse
where
    B: Body,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    let body = if method == Method::POST {
        match Limited::new(req.into_body(), MAX_MESSAGE_BYTES).collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(e) if e.is::<LengthLimitError>() => {
                debug!(path, "request body over {MAX_MESSAGE_BYTES} bytes");
                return reply::error(&BridgeError::Validation(format!(
                    "Request body exceeds {MAX_MESSAGE_BYTES} bytes"
                )));
            }
            Err(e) => {
                warn!("reading request body: {e}");
                return reply::error(&BridgeError::Validation(
                    "Failed to read request body".into(),
                ));
            }
        }
    } else {
        Bytes::new()
    };

    route(session, &method, &path, &body).await
}

/// Map an HTTP method, path and body to a response.
pub async fn route(session: &RpcSession, method: &Method, path: &str, body: &[u8]) -> HttpResponse {
    let response = if *method == Method::OPTIONS {
        reply::preflight()
    } else if *method != Method::POST {
        reply::message(StatusCode::METHOD_NOT_ALLOWED, "Method not allowed")
    } else {
        match forward::forward(session, path, body).await {
            Ok(result) => reply::result(result),
            Err(err) => reply::error(&err),
        }
    };
    debug!(%method, path, status = response.status().as_u16(), "handled");
    response
}
