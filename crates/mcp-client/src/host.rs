//! `McpHost` (C3/C2 seam): the process-wide owner of one `ConnectionManager`
//! per configured server. This is what the Tool Registry's MCP provider
//! calls through, and what `connect`/`disconnect`/`shutdown` fan out over
//! at process start/stop.

use std::collections::HashMap;
use std::sync::Arc;

use sa_domain::config::McpConfig;
use sa_domain::event::EventBus;
use serde_json::Value;

use crate::lifecycle::ConnectionManager;
use crate::manager::McpError;
use crate::protocol::ToolCallResult;

/// Cheaply `Clone`: every manager is already behind an `Arc`, so a clone
/// shares the same connections rather than duplicating them. Lets a process
/// keep a handle for shutdown even after moving one into `McpProvider`.
#[derive(Clone)]
pub struct McpHost {
    managers: HashMap<String, Arc<ConnectionManager>>,
}

impl McpHost {
    pub fn empty() -> Self {
        Self { managers: HashMap::new() }
    }

    /// Builds one `ConnectionManager` per effective server (explicit +
    /// enabled presets) and connects them all concurrently. A server that
    /// fails its first connect attempt enters its own reconnection loop
    /// rather than blocking the others or failing host construction.
    pub async fn from_config(config: &McpConfig, events: Arc<EventBus>) -> Self {
        let servers = config.effective_servers();
        let mut managers = HashMap::new();
        for server_config in servers {
            let id = server_config.id.clone();
            let manager = Arc::new(ConnectionManager::new(server_config, &config.connection, events.clone()));
            managers.insert(id, manager);
        }

        let connects = managers.values().map(|m| {
            let m = m.clone();
            async move { m.connect().await }
        });
        futures_util::future::join_all(connects).await;

        // Health checkers run for the lifetime of the host.
        for manager in managers.values() {
            tokio::spawn(manager.clone().run_health_checker());
        }

        Self { managers }
    }

    pub fn list_tools(&self) -> Vec<(String, crate::protocol::McpToolDef)> {
        self.managers
            .values()
            .filter(|m| m.is_connected())
            .flat_map(|m| {
                let server_id = m.server_id().to_string();
                m.tools().into_iter().map(move |t| (server_id.clone(), t))
            })
            .collect()
    }

    pub async fn call_tool(&self, server_id: &str, name: &str, arguments: Value) -> Result<ToolCallResult, McpError> {
        let manager = self
            .managers
            .get(server_id)
            .ok_or_else(|| McpError::ServerNotFound(server_id.to_string()))?;
        manager.call_tool(name, arguments).await
    }

    pub fn server_count(&self) -> usize {
        self.managers.len()
    }

    pub fn connected_server_count(&self) -> usize {
        self.managers.values().filter(|m| m.is_connected()).count()
    }

    pub async fn shutdown(&self) {
        let shutdowns = self.managers.values().map(|m| m.shutdown());
        futures_util::future::join_all(shutdowns).await;
    }
}
