//! One-shot question against a local CSV file

use super::AskArgs;
use crate::agent::{AgentSettings, DataframeAgent};
use crate::chart::ChartSink;
use crate::config::Config;
use crate::provider::{GroqBuilder, make_client};
use crate::table::Table;
use anyhow::{Context, Result};
use std::sync::Arc;

pub async fn execute(args: AskArgs, config: &Config) -> Result<()> {
    let bytes = tokio::fs::read(&args.csv)
        .await
        .with_context(|| format!("Failed to read {}", args.csv.display()))?;
    let table = Table::from_csv_bytes(&bytes)?;

    let model = args
        .model
        .as_deref()
        .map(str::trim)
        .filter(|m| !m.is_empty())
        .unwrap_or(config.llm.default_model.as_str());
    let builder = GroqBuilder::from_config(&config.llm);
    let client = make_client(&builder, &args.api_key, model, config.llm.temperature)?;

    let charts = ChartSink::under_static_dir(&config.server.static_dir);
    charts.ensure_dir().await?;

    let agent = DataframeAgent::new(
        client,
        Arc::new(table),
        charts.clone(),
        AgentSettings::from(&config.llm),
    );
    let result = agent.ask(&args.question.join(" ")).await;

    println!("{}", serde_json::to_string_pretty(&result)?);
    if let Some(path) = result
        .image_url
        .as_deref()
        .and_then(|url| charts.path_for_url(url))
    {
        eprintln!("Chart written to {}", path.display());
    }
    if !result.ok {
        anyhow::bail!(result.error.unwrap_or_else(|| "Question failed".to_string()));
    }
    Ok(())
}
