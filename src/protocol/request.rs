use serde::Serialize;

/// MCP protocol revision announced in the `initialize` request.
pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// MCP `initialize` params sent to the peer.
#[derive(Debug, Clone, Serialize)]
pub struct InitializeParams {
    #[serde(rename = "protocolVersion")]
    pub protocol_version: String,
    pub capabilities: ClientCapabilities,
    #[serde(rename = "clientInfo")]
    pub client_info: ClientInfo,
}

impl InitializeParams {
    pub fn new(protocol_version: impl Into<String>, client_info: ClientInfo) -> Self {
        Self {
            protocol_version: protocol_version.into(),
            capabilities: ClientCapabilities::default(),
            client_info,
        }
    }
}

/// Client information sent during `initialize`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClientInfo {
    pub name: String,
    pub version: String,
}

impl Default for ClientInfo {
    fn default() -> Self {
        Self {
            name: env!("CARGO_PKG_NAME").into(),
            version: env!("CARGO_PKG_VERSION").into(),
        }
    }
}

/// Capabilities the bridge declares to the peer.
#[derive(Debug, Clone, Serialize)]
pub struct ClientCapabilities {
    pub roots: ListChanged,
    pub sampling: serde_json::Map<String, serde_json::Value>,
    pub tools: ListChanged,
}

#[derive(Debug, Clone, Serialize)]
pub struct ListChanged {
    #[serde(rename = "listChanged")]
    pub list_changed: bool,
}

impl Default for ClientCapabilities {
    fn default() -> Self {
        Self {
            roots: ListChanged { list_changed: true },
            sampling: serde_json::Map::new(),
            tools: ListChanged { list_changed: true },
        }
    }
}
