//! Tool system
//!
//! Tools are the analysis steps the model can run against the loaded table.

pub mod plot;
pub mod table;

pub use plot::{ChartCollector, PlotChartTool};
pub use table::{DescribeTableTool, HeadRowsTool, QueryTableTool};

use crate::table::Table;
use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// A tool that can be executed by an agent
#[async_trait]
pub trait Tool: Send + Sync {
    /// Tool identifier
    fn id(&self) -> &str;

    /// Description for the LLM
    fn description(&self) -> &str;

    /// JSON Schema for parameters
    fn parameters(&self) -> Value;

    /// Execute the tool with given arguments
    async fn execute(&self, args: Value) -> Result<ToolResult>;
}

/// Result from tool execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub output: String,
    pub success: bool,
}

impl ToolResult {
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            success: true,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            output: message.into(),
            success: false,
        }
    }
}

/// Registry of available tools
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Register a tool
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.id().to_string(), tool);
    }

    /// Get a tool by ID
    pub fn get(&self, id: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(id).cloned()
    }

    /// List all tool IDs, sorted
    pub fn list(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.tools.keys().map(|s| s.as_str()).collect();
        ids.sort_unstable();
        ids
    }

    /// Get tool definitions for LLM, in a stable order
    pub fn definitions(&self) -> Vec<crate::provider::ToolDefinition> {
        self.list()
            .into_iter()
            .filter_map(|id| self.tools.get(id))
            .map(|t| crate::provider::ToolDefinition {
                name: t.id().to_string(),
                description: t.description().to_string(),
                parameters: t.parameters(),
            })
            .collect()
    }

    /// The analysis tool set over one table. Charts land in `charts`.
    pub fn for_table(table: Arc<Table>, charts: ChartCollector) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(DescribeTableTool::new(Arc::clone(&table))));
        registry.register(Arc::new(HeadRowsTool::new(Arc::clone(&table))));
        registry.register(Arc::new(QueryTableTool::new(Arc::clone(&table))));
        registry.register(Arc::new(PlotChartTool::new(table, charts)));
        registry
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}
