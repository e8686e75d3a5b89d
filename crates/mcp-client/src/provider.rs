//! Adapts an `McpHost` into the Tool Registry's `Provider` trait, so MCP
//! tools and the direct provider's tools are fanned out to identically.

use async_trait::async_trait;
use sa_domain::error::{Error, Result};
use sa_domain::tool::ToolDefinition;
use sa_tools::Provider;

use crate::host::McpHost;

/// Tool names are namespaced `mcp:<server_id>:<tool>` so identically-named
/// tools on two servers never collide in the registry's routing table.
pub fn namespaced_tool_name(server_id: &str, tool_name: &str) -> String {
    format!("mcp:{server_id}:{tool_name}")
}

fn split_namespaced(name: &str) -> Option<(&str, &str)> {
    let rest = name.strip_prefix("mcp:")?;
    rest.split_once(':')
}

pub struct McpProvider {
    host: McpHost,
}

impl McpProvider {
    pub fn new(host: McpHost) -> Self {
        Self { host }
    }
}

#[async_trait]
impl Provider for McpProvider {
    fn provider_name(&self) -> &str {
        "mcp"
    }

    async fn get_tool_definitions(&self) -> Result<Vec<ToolDefinition>> {
        Ok(self
            .host
            .list_tools()
            .into_iter()
            .map(|(server_id, tool)| ToolDefinition {
                name: namespaced_tool_name(&server_id, &tool.name),
                description: tool.description,
                parameters: tool.input_schema,
                cache_control: None,
            })
            .collect())
    }

    async fn execute_tool(&self, name: &str, arguments: serde_json::Value) -> Result<String> {
        let (server_id, tool_name) = split_namespaced(name).ok_or_else(|| Error::ToolExecution {
            tool: name.to_string(),
            message: "not an mcp-namespaced tool name".into(),
        })?;

        let result = self.host.call_tool(server_id, tool_name, arguments).await.map_err(|e| Error::Mcp {
            server: server_id.to_string(),
            message: e.to_string(),
        })?;

        let text = result
            .content
            .iter()
            .map(|c| c.text.as_str())
            .collect::<Vec<_>>()
            .join("\n");

        if result.is_error {
            return Err(Error::ToolExecution {
                tool: name.to_string(),
                message: text,
            });
        }

        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn namespaced_round_trip() {
        let name = namespaced_tool_name("filesystem", "read_file");
        assert_eq!(name, "mcp:filesystem:read_file");
        assert_eq!(split_namespaced(&name), Some(("filesystem", "read_file")));
    }

    #[test]
    fn non_namespaced_name_does_not_split() {
        assert_eq!(split_namespaced("exec"), None);
    }
}
