//! Built-in tools for SerialAgent, and the Tool Registry (C2) that fronts
//! them alongside any MCP-adapted providers.
//!
//! The exec/process tool pair follows OpenClaw semantics:
//! - `exec`: run commands foreground or auto-background after yieldMs
//! - `process`: manage background sessions (list/poll/log/write/kill/clear/remove)

pub mod direct_provider;
pub mod exec;
pub mod manager;
pub mod process;
pub mod registry;

pub use direct_provider::DirectProvider;
pub use manager::ProcessManager;
pub use registry::{ApiToolDefinition, Provider, ToolRegistry};
