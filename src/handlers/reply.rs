use bytes::Bytes;
use http_body_util::Full;
use hyper::header::{self, HeaderValue};
use hyper::{Response, StatusCode};
use serde_json::{json, Value};

use crate::error::BridgeError;

pub type HttpResponse = Response<Full<Bytes>>;

/// 200 with `{ "result": ... }`.
pub fn result(result: Value) -> HttpResponse {
    json_response(StatusCode::OK, &json!({ "result": result }))
}

/// Status and body for a failed request.
pub fn error(err: &BridgeError) -> HttpResponse {
    json_response(err.status(), &err.body())
}

/// `{ "error": message }` with the given status.
pub fn message(status: StatusCode, message: &str) -> HttpResponse {
    json_response(status, &json!({ "error": message }))
}

/// Answer to a CORS pre-flight: 200, no body.
pub fn preflight() -> HttpResponse {
    let mut response = Response::new(Full::new(Bytes::new()));
    allow_cross_origin(&mut response);
    response
}

fn json_response(status: StatusCode, body: &Value) -> HttpResponse {
    let mut response = Response::new(Full::new(Bytes::from(body.to_string())));
    *response.status_mut() = status;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    allow_cross_origin(&mut response);
    response
}

fn allow_cross_origin(response: &mut HttpResponse) {
    let headers = response.headers_mut();
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("POST, OPTIONS"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("Content-Type"),
    );
}
