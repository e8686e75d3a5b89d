//! The Tool Registry (C2): the single place the agent loop asks "what
//! tools exist" and "run this one". Providers are fanned out to
//! concurrently and with error isolation; the name -> provider routing
//! table is rebuilt wholesale on every definitions fetch so reads between
//! rebuilds never observe a half-built map.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::join_all;
use parking_lot::RwLock;
use sa_domain::error::{Error, Result};
use sa_domain::tool::{CacheControl, ToolDefinition};

/// Every tool backend — MCP-adapted or in-process — implements this.
#[async_trait]
pub trait Provider: Send + Sync {
    fn provider_name(&self) -> &str;
    async fn get_tool_definitions(&self) -> Result<Vec<ToolDefinition>>;
    async fn execute_tool(&self, name: &str, arguments: serde_json::Value) -> Result<String>;
}

/// A tool schema as it crosses the wire to the LLM, with an optional
/// cache-control marker the registry attaches to the last entry only.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ApiToolDefinition {
    #[serde(flatten)]
    pub definition: ToolDefinition,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_control: Option<CacheControl>,
}

struct RoutingTable {
    tool_to_provider: HashMap<String, String>,
    dirty: bool,
}

impl Default for RoutingTable {
    fn default() -> Self {
        Self {
            tool_to_provider: HashMap::new(),
            dirty: true,
        }
    }
}

pub struct ToolRegistry {
    providers: RwLock<Vec<Arc<dyn Provider>>>,
    routing: RwLock<RoutingTable>,
    enable_caching: bool,
}

impl ToolRegistry {
    pub fn new(enable_caching: bool) -> Self {
        Self {
            providers: RwLock::new(Vec::new()),
            routing: RwLock::new(RoutingTable::default()),
            enable_caching,
        }
    }

    /// Registers a provider. Fails if another provider already registered
    /// under the same name.
    pub fn register_provider(&self, provider: Arc<dyn Provider>) -> Result<()> {
        let mut providers = self.providers.write();
        if providers.iter().any(|p| p.provider_name() == provider.provider_name()) {
            return Err(Error::Invariant(format!(
                "duplicate provider: {}",
                provider.provider_name()
            )));
        }
        providers.push(provider);
        self.routing.write().dirty = true;
        Ok(())
    }

    /// Fetches tool definitions from every provider in parallel, gathering
    /// with error isolation: a failing provider is logged and skipped, not
    /// propagated. Duplicate tool names across providers keep the first
    /// registrant and log the collision. Rebuilds the routing table as a
    /// side effect. When caching is enabled, the last tool in the
    /// resulting ordered list carries a cache-control marker.
    pub async fn get_tool_definitions_for_api(&self) -> Vec<ApiToolDefinition> {
        let providers: Vec<Arc<dyn Provider>> = self.providers.read().iter().cloned().collect();

        let fetches = providers.iter().map(|p| {
            let p = p.clone();
            async move {
                let name = p.provider_name().to_string();
                match p.get_tool_definitions().await {
                    Ok(defs) => Some((name, defs)),
                    Err(e) => {
                        tracing::warn!(provider = %name, error = %e, "tool provider fetch failed, skipping");
                        None
                    }
                }
            }
        });
        let results = join_all(fetches).await;

        let mut ordered: Vec<ToolDefinition> = Vec::new();
        let mut seen: HashMap<String, String> = HashMap::new();
        let mut routing = HashMap::new();

        for (provider_name, defs) in results.into_iter().flatten() {
            for def in defs {
                if let Some(existing) = seen.get(&def.name) {
                    tracing::warn!(
                        tool = %def.name,
                        first_provider = %existing,
                        duplicate_provider = %provider_name,
                        "duplicate tool name across providers, keeping first registrant"
                    );
                    continue;
                }
                seen.insert(def.name.clone(), provider_name.clone());
                routing.insert(def.name.clone(), provider_name.clone());
                ordered.push(def);
            }
        }

        {
            let mut table = self.routing.write();
            table.tool_to_provider = routing;
            table.dirty = false;
        }

        let last_index = ordered.len().saturating_sub(1);
        ordered
            .into_iter()
            .enumerate()
            .map(|(i, definition)| ApiToolDefinition {
                cache_control: if self.enable_caching && i == last_index {
                    Some(CacheControl::EPHEMERAL)
                } else {
                    None
                },
                definition,
            })
            .collect()
    }

    /// Resolves `name` via the routing table (rebuilding transparently if
    /// marked dirty) and executes it against the owning provider.
    pub async fn execute_tool(&self, name: &str, arguments: serde_json::Value) -> Result<String> {
        let is_dirty = self.routing.read().dirty;
        if is_dirty {
            self.get_tool_definitions_for_api().await;
        }

        let provider_name = {
            let table = self.routing.read();
            table.tool_to_provider.get(name).cloned()
        };
        let provider_name = provider_name.ok_or_else(|| Error::Invariant(format!("unknown tool: {name}")))?;

        let provider = {
            let providers = self.providers.read();
            providers
                .iter()
                .find(|p| p.provider_name() == provider_name)
                .cloned()
        };
        let provider = provider.ok_or_else(|| Error::Invariant(format!("unknown tool: {name}")))?;

        provider.execute_tool(name, arguments).await
    }

    pub async fn get_tool_names(&self) -> Vec<String> {
        self.get_tool_definitions_for_api()
            .await
            .into_iter()
            .map(|d| d.definition.name)
            .collect()
    }

    pub async fn get_tool_count(&self) -> usize {
        self.get_tool_definitions_for_api().await.len()
    }

    /// Forces the next `get_tool_definitions_for_api`/`execute_tool` call
    /// to rebuild the routing table from scratch.
    pub fn refresh_tools(&self) {
        self.routing.write().dirty = true;
    }
}
