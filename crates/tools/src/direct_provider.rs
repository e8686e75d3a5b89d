//! The built-in direct provider (C2): the in-process callable tool set.
//! Wraps the existing background process manager behind the `Provider`
//! trait so the Tool Registry can fan out to it the same way it would to
//! an MCP-adapted provider.

use async_trait::async_trait;
use sa_domain::error::{Error, Result};
use sa_domain::tool::ToolDefinition;

use crate::exec::{self, ExecRequest};
use crate::manager::ProcessManager;
use crate::process::{self, ProcessRequest};
use crate::registry::Provider;

const EXEC_TOOL: &str = "exec";
const PROCESS_TOOL: &str = "process";

pub struct DirectProvider {
    manager: ProcessManager,
}

impl DirectProvider {
    pub fn new(manager: ProcessManager) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl Provider for DirectProvider {
    fn provider_name(&self) -> &str {
        "direct"
    }

    async fn get_tool_definitions(&self) -> Result<Vec<ToolDefinition>> {
        Ok(vec![
            ToolDefinition {
                name: EXEC_TOOL.into(),
                description: "Run a shell command to completion, or detach it into a background session if it outlasts the yield window.".into(),
                parameters: serde_json::json!({
                    "type": "object",
                    "properties": {
                        "command": {"type": "string"},
                        "background": {"type": "boolean"},
                        "yield_ms": {"type": "integer"},
                        "timeout_sec": {"type": "integer"},
                        "workdir": {"type": "string"},
                        "env": {"type": "object"},
                    },
                    "required": ["command"],
                }),
                cache_control: None,
            },
            ToolDefinition {
                name: PROCESS_TOOL.into(),
                description: "Manage a background process session: list, poll, log, write stdin, kill, clear finished, or remove.".into(),
                parameters: serde_json::json!({
                    "type": "object",
                    "properties": {
                        "action": {"type": "string", "enum": ["list", "poll", "log", "write", "kill", "clear", "remove"]},
                        "session_id": {"type": "string"},
                        "offset": {"type": "integer"},
                        "limit": {"type": "integer"},
                        "tail_lines": {"type": "integer"},
                        "data": {"type": "string"},
                        "eof": {"type": "boolean"},
                    },
                    "required": ["action"],
                }),
                cache_control: None,
            },
        ])
    }

    async fn execute_tool(&self, name: &str, arguments: serde_json::Value) -> Result<String> {
        match name {
            EXEC_TOOL => {
                let req: ExecRequest = serde_json::from_value(arguments).map_err(Error::Json)?;
                let response = exec::exec(&self.manager, req).await;
                serde_json::to_string(&response).map_err(Error::Json)
            }
            PROCESS_TOOL => {
                let req: ProcessRequest = serde_json::from_value(arguments).map_err(Error::Json)?;
                let response = process::handle_process(&self.manager, req).await;
                serde_json::to_string(&response).map_err(Error::Json)
            }
            other => Err(Error::ToolExecution {
                tool: other.to_string(),
                message: "direct provider does not own this tool".into(),
            }),
        }
    }
}
