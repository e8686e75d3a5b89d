//! The SerialAgent runtime (§2.1): the process that wires the LLM client,
//! tool registry, MCP host, session manager, and reasoning scheduler
//! together, and exposes the one entry point a presentation adapter needs —
//! `RuntimeHandle::run_query`.
//!
//! This crate owns no presentation logic. `sa_reasoning::RuntimeCallbacks`
//! is the seam a TUI, CLI, or HTTP handler implements; none of those
//! adapters live here.

pub mod bootstrap;
pub mod config;
pub mod handle;

pub use bootstrap::{build_runtime, null_callbacks, validate_or_bail};
pub use config::load_config;
pub use handle::RuntimeHandle;
