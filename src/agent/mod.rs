//! Dataframe agent
//!
//! Binds one LLM client to one table and answers questions about it by
//! letting the model call analysis tools until it can reply in text. Charts
//! drawn during a call are returned with that call's result and never leak
//! into another call.

pub mod prompt;

use crate::chart::ChartSink;
use crate::config::LlmConfig;
use crate::error::{AppError, ErrorKind};
use crate::provider::{CompletionRequest, ContentPart, LlmClient, Message};
use crate::table::Table;
use crate::tool::{ChartCollector, ToolRegistry};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Loop limits for one `ask` call.
#[derive(Debug, Clone)]
pub struct AgentSettings {
    pub max_steps: usize,
    pub max_tokens: usize,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self::from(&LlmConfig::default())
    }
}

impl From<&LlmConfig> for AgentSettings {
    fn from(config: &LlmConfig) -> Self {
        Self {
            max_steps: config.max_steps.max(1),
            max_tokens: config.max_tokens,
        }
    }
}

/// Structured answer returned to the HTTP layer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AskResult {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub answer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<ErrorKind>,
}

impl AskResult {
    pub fn success(answer: String, image_url: Option<String>) -> Self {
        Self {
            ok: true,
            answer: Some(answer),
            image_url,
            error: None,
            code: None,
        }
    }

    pub fn failure(error: AppError, image_url: Option<String>) -> Self {
        Self {
            ok: false,
            answer: None,
            image_url,
            error: Some(error.to_string()),
            code: Some(error.kind()),
        }
    }
}

pub struct DataframeAgent {
    client: LlmClient,
    table: Arc<Table>,
    charts: ChartSink,
    settings: AgentSettings,
    // Serialises calls on this instance so chart capture stays per call.
    busy: Mutex<()>,
}

impl std::fmt::Debug for DataframeAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataframeAgent")
            .field("client", &self.client)
            .field("rows", &self.table.n_rows())
            .field("columns", &self.table.n_cols())
            .field("settings", &self.settings)
            .finish()
    }
}

impl DataframeAgent {
    pub fn new(
        client: LlmClient,
        table: Arc<Table>,
        charts: ChartSink,
        settings: AgentSettings,
    ) -> Self {
        tracing::info!(
            model = client.model(),
            rows = table.n_rows(),
            columns = table.n_cols(),
            "Dataframe agent ready"
        );
        Self {
            client,
            table,
            charts,
            settings,
            busy: Mutex::new(()),
        }
    }

    /// Answer a question. Never fails; failures come back as `ok: false`.
    pub async fn ask(&self, question: &str) -> AskResult {
        let question = question.trim();
        if question.is_empty() {
            return AskResult::failure(AppError::validation("Empty message."), None);
        }

        let _busy = self.busy.lock().await;
        let charts = ChartCollector::default();
        let outcome = self.run(question, &charts).await;

        // Capture even on failure: a chart may exist from before the error.
        let image_url = self.capture_chart(&charts).await;

        match outcome {
            Ok(answer) => AskResult::success(answer, image_url),
            Err(error) => {
                tracing::warn!(
                    kind = ?error.kind(),
                    error = %error,
                    has_chart = image_url.is_some(),
                    "Question failed"
                );
                AskResult::failure(error, image_url)
            }
        }
    }

    async fn run(&self, question: &str, charts: &ChartCollector) -> Result<String, AppError> {
        let tools = ToolRegistry::for_table(Arc::clone(&self.table), charts.clone());
        let tool_definitions = tools.definitions();
        let provider = self.client.provider();

        let mut messages = vec![
            Message::system(prompt::build_system_prompt(&self.table)),
            Message::user(question),
        ];
        let mut interim_text = String::new();

        for step in 1..=self.settings.max_steps {
            tracing::debug!(step, model = self.client.model(), "Agent step starting");

            let request = CompletionRequest {
                messages: messages.clone(),
                tools: tool_definitions.clone(),
                model: self.client.model().to_string(),
                temperature: Some(self.client.temperature()),
                max_tokens: Some(self.settings.max_tokens),
            };

            let response = provider
                .complete(request)
                .await
                .map_err(|e| AppError::provider(format!("{:#}", e)))?;

            let tool_calls: Vec<(String, String, String)> = response
                .message
                .content
                .iter()
                .filter_map(|part| match part {
                    ContentPart::ToolCall {
                        id,
                        name,
                        arguments,
                    } => Some((id.clone(), name.clone(), arguments.clone())),
                    _ => None,
                })
                .collect();

            let text = response.message.text();
            if tool_calls.is_empty() {
                let answer = if text.trim().is_empty() {
                    interim_text.trim().to_string()
                } else {
                    text.trim().to_string()
                };
                tracing::info!(
                    steps = step,
                    answer_len = answer.len(),
                    total_tokens = response.usage.total_tokens,
                    "Question answered"
                );
                return Ok(answer);
            }
            if !text.trim().is_empty() {
                interim_text.push_str(&text);
                interim_text.push('\n');
            }

            messages.push(response.message);

            for (call_id, tool_name, arguments) in tool_calls {
                let output = self.execute_tool(&tools, &tool_name, &arguments).await;
                messages.push(Message::tool_result(call_id, output));
            }
        }

        Err(AppError::execution(format!(
            "Agent stopped after {} steps without an answer",
            self.settings.max_steps
        )))
    }

    /// Run one tool call. Failures are reported back to the model as text.
    async fn execute_tool(&self, tools: &ToolRegistry, name: &str, arguments: &str) -> String {
        let Some(tool) = tools.get(name) else {
            tracing::warn!(tool = %name, "Model requested unknown tool");
            return format!(
                "Error: unknown tool '{}'. Available tools: {}",
                name,
                tools.list().join(", ")
            );
        };

        let args: Value = if arguments.trim().is_empty() {
            Value::Object(Default::default())
        } else {
            match serde_json::from_str(arguments) {
                Ok(args) => args,
                Err(e) => return format!("Error: arguments are not valid JSON: {}", e),
            }
        };

        let started = std::time::Instant::now();
        match tool.execute(args).await {
            Ok(result) => {
                tracing::debug!(
                    tool = %name,
                    success = result.success,
                    duration_ms = started.elapsed().as_millis() as u64,
                    "Tool executed"
                );
                if result.success {
                    result.output
                } else {
                    format!("Error: {}", result.output)
                }
            }
            Err(e) => {
                tracing::debug!(tool = %name, error = %e, "Tool failed");
                format!("Error: {:#}", e)
            }
        }
    }

    async fn capture_chart(&self, charts: &ChartCollector) -> Option<String> {
        let image = charts.take_last()?;
        match self.charts.save(&image).await {
            Ok(url) => Some(url),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to save chart");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{CompletionResponse, FinishReason, Provider, Role, Usage};
    use async_trait::async_trait;
    use parking_lot::Mutex as SyncMutex;
    use std::collections::VecDeque;

    /// Replays canned responses and records requests.
    #[derive(Default)]
    struct ScriptedProvider {
        replies: SyncMutex<VecDeque<anyhow::Result<Message>>>,
        requests: SyncMutex<Vec<CompletionRequest>>,
    }

    impl ScriptedProvider {
        fn new(replies: Vec<anyhow::Result<Message>>) -> Arc<Self> {
            Arc::new(Self {
                replies: SyncMutex::new(replies.into()),
                requests: SyncMutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl Provider for ScriptedProvider {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn complete(&self, request: CompletionRequest) -> anyhow::Result<CompletionResponse> {
            self.requests.lock().push(request);
            let message = self
                .replies
                .lock()
                .pop_front()
                .unwrap_or_else(|| Ok(text("out of script")))?;
            Ok(CompletionResponse {
                message,
                usage: Usage::default(),
                finish_reason: FinishReason::Stop,
            })
        }
    }

    fn text(t: &str) -> Message {
        Message {
            role: Role::Assistant,
            content: vec![ContentPart::Text { text: t.into() }],
        }
    }

    fn call(id: &str, name: &str, args: &str) -> Message {
        Message {
            role: Role::Assistant,
            content: vec![ContentPart::ToolCall {
                id: id.into(),
                name: name.into(),
                arguments: args.into(),
            }],
        }
    }

    const FRUIT: &str = "fruit,qty\napple,3\npear,5\nplum,2\n";

    fn agent(provider: Arc<dyn Provider>, dir: &std::path::Path) -> DataframeAgent {
        let table = Table::from_csv_str(FRUIT).unwrap();
        DataframeAgent::new(
            LlmClient::new(provider, "llama-3-3-70b-instruct", 0.2),
            Arc::new(table),
            ChartSink::new(dir, "/static/generated"),
            AgentSettings {
                max_steps: 4,
                max_tokens: 256,
            },
        )
    }

    fn tool_outputs(request: &CompletionRequest) -> Vec<String> {
        request
            .messages
            .iter()
            .flat_map(|m| m.content.iter())
            .filter_map(|p| match p {
                ContentPart::ToolResult { content, .. } => Some(content.clone()),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn answers_after_tool_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let provider = ScriptedProvider::new(vec![
            Ok(call("c1", "query_table", r#"{"sql":"SELECT COUNT(*) AS n FROM df"}"#)),
            Ok(text("3")),
        ]);
        let result = agent(provider.clone(), dir.path()).ask("how many rows?").await;

        assert_eq!(result, AskResult::success("3".into(), None));
        let requests = provider.requests.lock();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].model, "llama-3-3-70b-instruct");
        assert_eq!(requests[0].tools.len(), 4);
        assert_eq!(tool_outputs(&requests[1]), vec!["n\n3\n"]);
    }

    #[tokio::test]
    async fn empty_question_never_reaches_provider() {
        let dir = tempfile::tempdir().unwrap();
        let provider = ScriptedProvider::new(vec![]);
        let result = agent(provider.clone(), dir.path()).ask("   ").await;
        assert!(!result.ok);
        assert_eq!(result.code, Some(ErrorKind::Validation));
        assert!(provider.requests.lock().is_empty());
    }

    #[tokio::test]
    async fn chart_is_saved_and_returned() {
        let dir = tempfile::tempdir().unwrap();
        let provider = ScriptedProvider::new(vec![
            Ok(call("c1", "plot_chart", r#"{"kind":"bar","x":"fruit","y":"qty"}"#)),
            Ok(text("Here is the chart.")),
        ]);
        let result = agent(provider, dir.path()).ask("plot qty by fruit").await;
        assert!(result.ok);
        let url = result.image_url.unwrap();
        let name = url.strip_prefix("/static/generated/").unwrap();
        assert!(dir.path().join(name).exists());
    }

    #[tokio::test]
    async fn provider_failure_still_returns_earlier_chart() {
        let dir = tempfile::tempdir().unwrap();
        let provider = ScriptedProvider::new(vec![
            Ok(call("c1", "plot_chart", r#"{"kind":"histogram","x":"qty"}"#)),
            Err(anyhow::anyhow!("rate limited")),
        ]);
        let result = agent(provider, dir.path()).ask("plot then fail").await;
        assert!(!result.ok);
        assert_eq!(result.code, Some(ErrorKind::Provider));
        assert!(result.error.unwrap().contains("rate limited"));
        assert!(result.image_url.is_some());
    }

    #[tokio::test]
    async fn tool_errors_are_fed_back_to_the_model() {
        let dir = tempfile::tempdir().unwrap();
        let provider = ScriptedProvider::new(vec![
            Ok(call("c1", "query_table", r#"{"sql":"SELECT colour FROM df"}"#)),
            Ok(call("c2", "drop_table", "{}")),
            Ok(call("c3", "head_rows", "not json")),
            Ok(text("done")),
        ]);
        let result = agent(provider.clone(), dir.path()).ask("break things").await;
        assert!(result.ok);

        let requests = provider.requests.lock();
        let outputs = tool_outputs(&requests[3]);
        assert!(outputs[0].starts_with("Error: SQL query failed"));
        assert!(outputs[0].contains("colour"));
        assert!(outputs[1].contains("unknown tool 'drop_table'"));
        assert!(outputs[2].contains("not valid JSON"));
    }

    #[tokio::test]
    async fn runaway_loops_are_execution_errors() {
        let dir = tempfile::tempdir().unwrap();
        let provider = ScriptedProvider::new(
            (0..10)
                .map(|i| Ok(call(&format!("c{i}"), "describe_table", "{}")))
                .collect(),
        );
        let result = agent(provider, dir.path()).ask("loop forever").await;
        assert_eq!(result.code, Some(ErrorKind::Execution));
        assert!(result.error.unwrap().contains("4 steps"));
    }

    #[tokio::test]
    async fn charts_do_not_leak_between_calls() {
        let dir = tempfile::tempdir().unwrap();
        let provider = ScriptedProvider::new(vec![
            Ok(call("c1", "plot_chart", r#"{"kind":"line","y":"qty"}"#)),
            Ok(text("chart")),
            Ok(text("no chart this time")),
        ]);
        let agent = agent(provider, dir.path());
        assert!(agent.ask("plot").await.image_url.is_some());
        assert!(agent.ask("just text").await.image_url.is_none());
    }

    /// Plots whatever chart the question names, then answers in text.
    struct PlotPerQuestion {
        charts: Vec<(&'static str, &'static str)>,
    }

    #[async_trait]
    impl Provider for PlotPerQuestion {
        fn name(&self) -> &str {
            "plot-per-question"
        }

        async fn complete(&self, request: CompletionRequest) -> anyhow::Result<CompletionResponse> {
            let question = request.messages[1].text();
            let message = if tool_outputs(&request).is_empty() {
                let (_, args) = self
                    .charts
                    .iter()
                    .find(|(q, _)| *q == question)
                    .ok_or_else(|| anyhow::anyhow!("unexpected question {question}"))?;
                tokio::task::yield_now().await;
                call("c1", "plot_chart", args)
            } else {
                text(&question)
            };
            Ok(CompletionResponse {
                message,
                usage: Usage::default(),
                finish_reason: FinishReason::Stop,
            })
        }
    }

    #[tokio::test]
    async fn concurrent_asks_get_their_own_charts() {
        let dir = tempfile::tempdir().unwrap();
        let charts = vec![
            ("bars please", r#"{"kind":"bar","x":"fruit","y":"qty"}"#),
            ("a histogram", r#"{"kind":"histogram","x":"qty","bins":3}"#),
        ];
        let provider = Arc::new(PlotPerQuestion {
            charts: charts.clone(),
        });
        let agent = Arc::new(agent(provider, dir.path()));

        let (first, second) = tokio::join!(
            {
                let agent = Arc::clone(&agent);
                async move { agent.ask("bars please").await }
            },
            {
                let agent = Arc::clone(&agent);
                async move { agent.ask("a histogram").await }
            }
        );

        let table = Table::from_csv_str(FRUIT).unwrap();
        let sink = ChartSink::new(dir.path(), "/static/generated");
        for (result, (question, args)) in [first, second].into_iter().zip(charts) {
            assert_eq!(result.answer.as_deref(), Some(question));
            let path = sink.path_for_url(&result.image_url.unwrap()).unwrap();
            let saved = image::open(path).unwrap().to_rgb8();
            let spec: crate::chart::ChartSpec = serde_json::from_str(args).unwrap();
            assert_eq!(saved, crate::chart::render(&table, &spec).unwrap(), "{question}");
        }
    }
}
