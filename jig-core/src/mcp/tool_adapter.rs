//! Adapter exposing an MCP-discovered tool through the [`Tool`] trait

use super::session::McpToolDef;
use super::supervisor::ServerHandle;
use crate::cancel::RunContext;
use crate::schema::Schema;
use crate::tool::{mcp_tool_name, Tool, ToolCallInput, ToolError, ToolInfo, ToolOutput};
use async_trait::async_trait;
use std::sync::Arc;

/// Wraps one discovered MCP tool; calls route through the server handle so
/// they get the probe/reconnect discipline.
pub struct McpToolAdapter {
    handle: Arc<ServerHandle>,
    def: McpToolDef,
    /// Registry name: `mcp_<server>_<tool>`
    namespaced: String,
}

impl McpToolAdapter {
    pub fn new(handle: Arc<ServerHandle>, def: McpToolDef) -> Self {
        let namespaced = mcp_tool_name(handle.name(), &def.name);
        Self {
            handle,
            def,
            namespaced,
        }
    }

    /// The server-side (un-namespaced) tool name
    pub fn original_name(&self) -> &str {
        &self.def.name
    }
}

#[async_trait]
impl Tool for McpToolAdapter {
    fn name(&self) -> &str {
        &self.namespaced
    }

    fn info(&self) -> ToolInfo {
        ToolInfo::new(
            self.namespaced.clone(),
            self.def.description.clone(),
            Schema::from_value(&self.def.input_schema),
        )
    }

    async fn run(&self, ctx: &RunContext, call: ToolCallInput) -> Result<ToolOutput, ToolError> {
        let arguments = call.params();
        let result = tokio::select! {
            _ = ctx.canceled() => return Err(ToolError::Custom("canceled".to_string())),
            result = self.handle.call_tool(&self.def.name, arguments) => result,
        };
        match result {
            Ok((content, is_error)) => {
                let mut output = ToolOutput::text_capped(content);
                output.is_error = is_error;
                Ok(output)
            }
            Err(e) => Ok(ToolOutput::error(format!("mcp tool error: {}", e))),
        }
    }
}
