//! Chart tool and the per-call chart collector

use super::{Tool, ToolResult};
use crate::chart::{self, ChartSpec};
use crate::table::Table;
use anyhow::{Context, Result};
use async_trait::async_trait;
use image::RgbImage;
use parking_lot::Mutex;
use serde_json::{Value, json};
use std::sync::Arc;

/// Charts rendered during one `ask` call, in order.
#[derive(Clone, Default)]
pub struct ChartCollector {
    charts: Arc<Mutex<Vec<RgbImage>>>,
}

impl ChartCollector {
    pub fn push(&self, image: RgbImage) {
        self.charts.lock().push(image);
    }

    pub fn len(&self) -> usize {
        self.charts.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Take the most recent chart and drop the rest.
    pub fn take_last(&self) -> Option<RgbImage> {
        let mut charts = self.charts.lock();
        let last = charts.pop();
        charts.clear();
        last
    }
}

pub struct PlotChartTool {
    table: Arc<Table>,
    charts: ChartCollector,
}

impl PlotChartTool {
    pub fn new(table: Arc<Table>, charts: ChartCollector) -> Self {
        Self { table, charts }
    }
}

#[async_trait]
impl Tool for PlotChartTool {
    fn id(&self) -> &str {
        "plot_chart"
    }

    fn description(&self) -> &str {
        "Draw a chart of the table; the image is shown to the user next to your answer. \
         bar: sums y per distinct x (counts rows when y is omitted). histogram: distribution \
         of numeric column x. line/scatter: numeric y against numeric x (row number when x \
         is omitted). Set sql to plot the result of a SELECT over df instead of the raw table. \
         Only call this when the user asks for a chart or plot."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "kind": {
                    "type": "string",
                    "enum": ["bar", "line", "scatter", "histogram"]
                },
                "x": {"type": "string", "description": "Column for the x axis / categories"},
                "y": {"type": "string", "description": "Numeric column for the y axis"},
                "bins": {"type": "integer", "description": "Histogram bins (default: 10)"},
                "title": {"type": "string"},
                "x_label": {"type": "string", "description": "X axis label (default: x)"},
                "y_label": {"type": "string", "description": "Y axis label (default: y)"},
                "sql": {
                    "type": "string",
                    "description": "Optional SELECT over df whose result is plotted"
                }
            },
            "required": ["kind"]
        })
    }

    async fn execute(&self, args: Value) -> Result<ToolResult> {
        let spec: ChartSpec =
            serde_json::from_value(args).context("Invalid arguments for plot_chart")?;
        let image = chart::render(&self.table, &spec)?;
        self.charts.push(image);
        Ok(ToolResult::success(format!(
            "Chart rendered ({:?}). It will be attached to your answer.",
            spec.kind
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn take_last_keeps_only_newest() {
        let charts = ChartCollector::default();
        charts.push(RgbImage::from_pixel(1, 1, Rgb([1, 1, 1])));
        charts.push(RgbImage::from_pixel(1, 1, Rgb([2, 2, 2])));
        let last = charts.take_last().unwrap();
        assert_eq!(*last.get_pixel(0, 0), Rgb([2, 2, 2]));
        assert!(charts.is_empty());
        assert!(charts.take_last().is_none());
    }

    #[tokio::test]
    async fn plotting_fills_the_collector() {
        let table = Arc::new(Table::from_csv_str("k,v\na,1\nb,2\n").unwrap());
        let charts = ChartCollector::default();
        let tool = PlotChartTool::new(table, charts.clone());
        tool.execute(json!({"kind": "bar", "x": "k", "y": "v"}))
            .await
            .unwrap();
        assert_eq!(charts.len(), 1);
    }

    #[tokio::test]
    async fn plots_from_sql() {
        let table = Arc::new(Table::from_csv_str("k,v\na,1\nb,2\na,3\n").unwrap());
        let charts = ChartCollector::default();
        let tool = PlotChartTool::new(table, charts.clone());
        tool.execute(json!({
            "kind": "bar",
            "x": "k",
            "y": "total",
            "sql": "SELECT k, SUM(v) AS total FROM df GROUP BY k",
            "title": "Totals"
        }))
        .await
        .unwrap();
        assert_eq!(charts.len(), 1);
    }

    #[tokio::test]
    async fn failed_plots_leave_collector_empty() {
        let table = Arc::new(Table::from_csv_str("k,v\na,1\n").unwrap());
        let charts = ChartCollector::default();
        let tool = PlotChartTool::new(table, charts.clone());
        assert!(tool.execute(json!({"kind": "pie"})).await.is_err());
        assert!(charts.is_empty());
    }
}
