//! `sa-mcp-client` — MCP (Model Context Protocol) client for SerialAgent.
//!
//! This crate provides:
//! - JSON-RPC 2.0 protocol types for communicating with MCP servers.
//! - A stdio transport that spawns child processes and communicates over stdin/stdout.
//! - A `ConnectionManager` (C3) per server: lifecycle state machine, health
//!   checker, and exponential-backoff reconnection, all publishing onto a
//!   shared `EventBus`.
//! - An `McpHost` that owns one `ConnectionManager` per configured server
//!   and is what the Tool Registry's MCP provider calls through.
//!
//! # Usage
//!
//! ```rust,ignore
//! use sa_mcp_client::{McpConfig, McpHost};
//! use sa_domain::event::EventBus;
//! use std::sync::Arc;
//!
//! let config: McpConfig = /* from TOML */;
//! let events = Arc::new(EventBus::new());
//! let host = McpHost::from_config(&config, events).await;
//!
//! // List all discovered tools.
//! for (server_id, tool) in host.list_tools() {
//!     println!("mcp:{server_id}:{}", tool.name);
//! }
//!
//! // Call a tool.
//! let result = host.call_tool("filesystem", "read_file", json!({"path": "/tmp/test.txt"})).await?;
//! ```

pub mod config;
pub mod host;
pub mod lifecycle;
pub mod manager;
pub mod protocol;
pub mod provider;
pub mod transport;

// Re-exports for convenience.
pub use config::{McpConfig, McpServerConfig, McpTransportKind};
pub use host::McpHost;
pub use lifecycle::{ConnectionManager, ConnectionState};
pub use manager::McpError;
pub use protocol::McpToolDef;
pub use provider::McpProvider;
