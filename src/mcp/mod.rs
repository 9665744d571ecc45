//! In-process MCP servers reachable through `mcp_message` control requests.

pub mod bridge;
pub mod server;
pub mod transport;

pub use bridge::McpBridge;
pub use server::{handler_server, HandlerServer, McpServer, MessageHandler};
pub use transport::{ServerTransport, TransportSender};
