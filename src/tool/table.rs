//! Read-only table inspection tools

use super::{Tool, ToolResult};
use crate::table::query;
use crate::table::{Table, render_frame};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;

/// Column types and summary statistics.
pub struct DescribeTableTool {
    table: Arc<Table>,
}

impl DescribeTableTool {
    pub fn new(table: Arc<Table>) -> Self {
        Self { table }
    }
}

#[async_trait]
impl Tool for DescribeTableTool {
    fn id(&self) -> &str {
        "describe_table"
    }

    fn description(&self) -> &str {
        "Describe the table: row and column counts, each column's type, missing values, \
         min/max/mean for numeric columns and distinct counts for text columns."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {},
            "required": []
        })
    }

    async fn execute(&self, _args: Value) -> Result<ToolResult> {
        Ok(ToolResult::success(self.table.describe()))
    }
}

/// Raw rows from the table.
pub struct HeadRowsTool {
    table: Arc<Table>,
}

impl HeadRowsTool {
    pub fn new(table: Arc<Table>) -> Self {
        Self { table }
    }
}

#[derive(Debug, Deserialize)]
struct HeadParams {
    #[serde(default = "default_head")]
    n: usize,
    #[serde(default)]
    offset: usize,
}

fn default_head() -> usize {
    5
}

#[async_trait]
impl Tool for HeadRowsTool {
    fn id(&self) -> &str {
        "head_rows"
    }

    fn description(&self) -> &str {
        "Return N rows of the table starting at an offset, as comma-separated text with a header."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "n": {
                    "type": "integer",
                    "description": "Number of rows to return (default: 5, max: 50)"
                },
                "offset": {
                    "type": "integer",
                    "description": "Zero-based row to start from (default: 0)"
                }
            },
            "required": []
        })
    }

    async fn execute(&self, args: Value) -> Result<ToolResult> {
        let params: HeadParams =
            serde_json::from_value(args).context("Invalid arguments for head_rows")?;
        let rows = self.table.n_rows();
        if params.offset > 0 && params.offset >= rows {
            return Ok(ToolResult::error(format!(
                "offset {} is past the end of the table ({} rows)",
                params.offset, rows
            )));
        }
        let text = self.table.render_rows(params.offset, params.n.min(50))?;
        Ok(ToolResult::success(text))
    }
}

/// One read-only SQL query.
pub struct QueryTableTool {
    table: Arc<Table>,
}

impl QueryTableTool {
    pub fn new(table: Arc<Table>) -> Self {
        Self { table }
    }
}

#[derive(Debug, Deserialize)]
struct QueryParams {
    sql: String,
    #[serde(default = "default_limit")]
    limit: usize,
}

fn default_limit() -> usize {
    50
}

#[async_trait]
impl Tool for QueryTableTool {
    fn id(&self) -> &str {
        "query_table"
    }

    fn description(&self) -> &str {
        "Run one SQL SELECT over the table, which is named df. Double-quote column names \
         that contain spaces or capitals, e.g. SELECT \"Region\", SUM(\"Sales\") AS total \
         FROM df GROUP BY \"Region\" ORDER BY total DESC. Use this for counting, totals, \
         averages, rankings and lookups."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "sql": {
                    "type": "string",
                    "description": "A single SELECT statement over the table df"
                },
                "limit": {
                    "type": "integer",
                    "description": "Maximum rows returned (default: 50)"
                }
            },
            "required": ["sql"]
        })
    }

    async fn execute(&self, args: Value) -> Result<ToolResult> {
        let params: QueryParams =
            serde_json::from_value(args).context("Invalid arguments for query_table")?;
        let frame = query::run_sql(&self.table, &params.sql)?;
        tracing::debug!(result_rows = frame.height(), "query_table executed");
        Ok(ToolResult::success(render_frame(&frame, params.limit)?))
    }
}
