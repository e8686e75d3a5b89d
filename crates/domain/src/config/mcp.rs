//! MCP (Model Context Protocol) configuration types for the domain layer.
//!
//! These are lightweight config structs used to deserialize the `[mcp]`
//! section of the gateway config. The actual MCP client logic lives in
//! the `sa-mcp-client` crate.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Top-level MCP configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct McpConfig {
    /// List of MCP server definitions.
    #[serde(default)]
    pub servers: Vec<McpServerConfig>,

    /// Built-in presets that can be toggled on/off.
    /// When enabled, a preset injects a server entry automatically.
    #[serde(default)]
    pub presets: McpPresets,

    /// Connection lifecycle defaults, applied to every server unless a
    /// server overrides its own `connection` block.
    #[serde(default)]
    pub connection: McpConnectionConfig,
}

/// Tuning for the connection manager's health checker and reconnection
/// backoff strategy. A server's own `connection` block (if set) takes
/// precedence over these process-wide defaults.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct McpConnectionConfig {
    /// Health-check probe interval, in seconds.
    #[serde(default = "d_check_interval")]
    pub check_interval_secs: u64,
    /// Per-probe timeout, in seconds.
    #[serde(default = "d_health_timeout")]
    pub health_timeout_secs: u64,
    /// Backoff base delay, in seconds.
    #[serde(default = "d_base_backoff")]
    pub base_backoff_secs: u64,
    /// Backoff ceiling delay, in seconds.
    #[serde(default = "d_ceiling_backoff")]
    pub ceiling_backoff_secs: u64,
    /// Uniform jitter multiplier range applied to each computed delay.
    #[serde(default = "d_jitter_range")]
    pub jitter_range: (f64, f64),
    /// Maximum reconnection attempts before the connection moves to `Error`.
    #[serde(default = "d_max_attempts")]
    pub max_attempts: u32,
}

impl Default for McpConnectionConfig {
    fn default() -> Self {
        Self {
            check_interval_secs: d_check_interval(),
            health_timeout_secs: d_health_timeout(),
            base_backoff_secs: d_base_backoff(),
            ceiling_backoff_secs: d_ceiling_backoff(),
            jitter_range: d_jitter_range(),
            max_attempts: d_max_attempts(),
        }
    }
}

fn d_check_interval() -> u64 {
    30
}
fn d_health_timeout() -> u64 {
    5
}
fn d_base_backoff() -> u64 {
    1
}
fn d_ceiling_backoff() -> u64 {
    60
}
fn d_jitter_range() -> (f64, f64) {
    (0.8, 1.2)
}
fn d_max_attempts() -> u32 {
    10
}

impl McpConfig {
    /// Return the effective server list: explicit servers + enabled presets.
    pub fn effective_servers(&self) -> Vec<McpServerConfig> {
        let mut servers = self.servers.clone();

        if self.presets.browser.enabled {
            servers.push(McpServerConfig {
                id: "browser".into(),
                command: self.presets.browser.command.clone()
                    .unwrap_or_else(|| "npx".into()),
                args: self.presets.browser.args.clone()
                    .unwrap_or_else(|| vec!["-y".into(), "@anthropic-ai/mcp-server-puppeteer@latest".into()]),
                transport: McpTransportKind::Stdio,
                url: None,
                env: HashMap::new(),
                connection: None,
            });
        }

        if self.presets.filesystem.enabled {
            servers.push(McpServerConfig {
                id: "filesystem".into(),
                command: self.presets.filesystem.command.clone()
                    .unwrap_or_else(|| "npx".into()),
                args: self.presets.filesystem.args.clone()
                    .unwrap_or_else(|| vec!["-y".into(), "@modelcontextprotocol/server-filesystem@latest".into(), ".".into()]),
                transport: McpTransportKind::Stdio,
                url: None,
                env: HashMap::new(),
                connection: None,
            });
        }

        servers
    }
}

impl McpServerConfig {
    /// The effective connection tuning for this server: its own override,
    /// or the process-wide default.
    pub fn effective_connection(&self, defaults: &McpConnectionConfig) -> McpConnectionConfig {
        self.connection.unwrap_or(*defaults)
    }
}

/// Built-in MCP server presets that can be toggled via config or dashboard.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct McpPresets {
    /// Browser automation via Puppeteer MCP server.
    #[serde(default)]
    pub browser: McpPresetConfig,

    /// Filesystem access via MCP filesystem server.
    #[serde(default)]
    pub filesystem: McpPresetConfig,
}

/// Configuration for a single MCP preset.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct McpPresetConfig {
    /// Whether this preset is enabled.
    #[serde(default)]
    pub enabled: bool,

    /// Override the default command for this preset.
    #[serde(default)]
    pub command: Option<String>,

    /// Override the default arguments for this preset.
    #[serde(default)]
    pub args: Option<Vec<String>>,
}

/// Configuration for a single MCP server connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpServerConfig {
    /// Unique identifier for this server (used in tool naming: `mcp:{id}:{tool}`).
    pub id: String,

    /// The command to spawn (e.g. `"npx"`).
    #[serde(default)]
    pub command: String,

    /// Arguments to pass to the command.
    #[serde(default)]
    pub args: Vec<String>,

    /// Transport type (`"stdio"` or `"sse"`).
    #[serde(default)]
    pub transport: McpTransportKind,

    /// Optional URL for SSE transport.
    #[serde(default)]
    pub url: Option<String>,

    /// Optional environment variables to set on the spawned process.
    #[serde(default)]
    pub env: HashMap<String, String>,

    /// Per-server override of the connection tuning defaults.
    #[serde(default)]
    pub connection: Option<McpConnectionConfig>,
}

/// Transport kind for connecting to an MCP server.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum McpTransportKind {
    #[default]
    Stdio,
    Sse,
}
