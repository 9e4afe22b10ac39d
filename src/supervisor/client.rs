//! HTTP client for a running bridge.

use std::time::Duration;

use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::Value;

use super::SupervisorError;

const CALL_TIMEOUT: Duration = Duration::from_secs(120);
const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// What the bridge answered for one forwarded call.
#[derive(Debug, Clone)]
pub struct CallOutcome {
    pub status: StatusCode,
    pub body: Value,
}

/// Name and description of a tool advertised by the MCP server.
#[derive(Debug, Clone, Deserialize)]
pub struct ToolSummary {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

pub struct BridgeClient {
    http: reqwest::Client,
    base_url: String,
}

impl BridgeClient {
    pub fn new(host: &str, port: u16) -> Result<Self, SupervisorError> {
        let http = reqwest::Client::builder().timeout(CALL_TIMEOUT).build()?;
        Ok(Self {
            http,
            base_url: format!("http://{}:{port}", reachable_host(host)),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// POST `params` to `/<method>` and return whatever came back.
    ///
    /// Non-JSON bodies come back as a JSON string.
    pub async fn call(&self, method: &str, params: &Value) -> Result<CallOutcome, SupervisorError> {
        self.post(method, params, CALL_TIMEOUT).await
    }

    pub async fn list_tools(&self) -> Result<Vec<ToolSummary>, SupervisorError> {
        let outcome = self.call("tools/list", &Value::Object(Default::default())).await?;
        if !outcome.status.is_success() {
            return Err(SupervisorError::Remote {
                status: outcome.status.as_u16(),
                body: outcome.body,
            });
        }
        let tools = outcome
            .body
            .pointer("/result/tools")
            .cloned()
            .unwrap_or(Value::Array(Vec::new()));
        serde_json::from_value(tools).map_err(|e| SupervisorError::Remote {
            status: outcome.status.as_u16(),
            body: Value::String(format!("unexpected tools/list result: {e}")),
        })
    }

    /// True once the bridge answers `tools/list` without a gateway failure.
    pub async fn is_ready(&self) -> bool {
        let params = Value::Object(Default::default());
        match self.post("tools/list", &params, PROBE_TIMEOUT).await {
            Ok(outcome) => !outcome.status.is_server_error(),
            Err(_) => false,
        }
    }

    async fn post(
        &self,
        method: &str,
        params: &Value,
        timeout: Duration,
    ) -> Result<CallOutcome, SupervisorError> {
        let url = format!("{}/{}", self.base_url, method.trim_start_matches('/'));
        let response = self
            .http
            .post(url)
            .timeout(timeout)
            .json(params)
            .send()
            .await?;
        let status = response.status();
        let text = response.text().await?;
        let body = serde_json::from_str(&text).unwrap_or(Value::String(text));
        Ok(CallOutcome { status, body })
    }
}

/// Wildcard listen addresses are not connectable; use loopback instead.
pub fn reachable_host(host: &str) -> &str {
    match host {
        "0.0.0.0" | "" => "127.0.0.1",
        "::" | "[::]" => "[::1]",
        other => other,
    }
}
