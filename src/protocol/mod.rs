pub mod message;
pub mod request;
pub mod response;

pub use message::{MessageKind, RpcId, RpcMessage, JSONRPC_VERSION};
pub use request::{ClientCapabilities, ClientInfo, InitializeParams, PROTOCOL_VERSION};
pub use response::RpcError;
