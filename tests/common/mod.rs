//! Shared fixtures: a scripted provider and an in-process router.

#![allow(dead_code)]

use anyhow::Result;
use async_trait::async_trait;
use axum::Router;
use axum::body::Body;
use axum::http::{Request, Response, header};
use csvchat::config::Config;
use csvchat::provider::{
    CompletionRequest, CompletionResponse, ContentPart, FinishReason, Message, Provider,
    ProviderBuilder, Role, Usage,
};
use csvchat::server::{self, AppState};
use csvchat::session::InMemorySessionStore;
use http_body_util::BodyExt;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tower::ServiceExt;

/// Replays queued assistant messages and records every request.
#[derive(Default)]
pub struct ScriptedProvider {
    replies: Mutex<VecDeque<Message>>,
    pub requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedProvider {
    pub fn push(&self, reply: Message) {
        self.replies.lock().push_back(reply);
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().len()
    }

    /// Tool outputs the model was shown in the latest request.
    pub fn last_tool_outputs(&self) -> Vec<String> {
        let requests = self.requests.lock();
        let Some(last) = requests.last() else {
            return Vec::new();
        };
        last.messages
            .iter()
            .flat_map(|m| m.content.iter())
            .filter_map(|part| match part {
                ContentPart::ToolResult { content, .. } => Some(content.clone()),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse> {
        self.requests.lock().push(request);
        let message = self
            .replies
            .lock()
            .pop_front()
            .ok_or_else(|| anyhow::anyhow!("script exhausted"))?;
        Ok(CompletionResponse {
            message,
            usage: Usage::default(),
            finish_reason: FinishReason::Stop,
        })
    }
}

/// Hands out the shared scripted provider and remembers the keys it saw.
#[derive(Default)]
pub struct ScriptedBuilder {
    pub provider: Arc<ScriptedProvider>,
    pub keys: Mutex<Vec<String>>,
}

impl ProviderBuilder for ScriptedBuilder {
    fn build(&self, api_key: &str) -> Result<Arc<dyn Provider>> {
        self.keys.lock().push(api_key.to_string());
        Ok(self.provider.clone())
    }
}

pub fn text(answer: &str) -> Message {
    Message {
        role: Role::Assistant,
        content: vec![ContentPart::Text {
            text: answer.to_string(),
        }],
    }
}

pub fn tool_call(id: &str, name: &str, arguments: serde_json::Value) -> Message {
    Message {
        role: Role::Assistant,
        content: vec![ContentPart::ToolCall {
            id: id.to_string(),
            name: name.to_string(),
            arguments: arguments.to_string(),
        }],
    }
}

pub struct TestApp {
    pub router: Router,
    pub builder: Arc<ScriptedBuilder>,
    pub static_dir: TempDir,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    pub async fn with_config(tweak: impl FnOnce(&mut Config)) -> Self {
        let static_dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.server.static_dir = static_dir.path().to_path_buf();
        tweak(&mut config);

        let builder = Arc::new(ScriptedBuilder::default());
        let ttl = config.session.ttl_secs.map(Duration::from_secs);
        let state = AppState::new(
            config,
            Arc::new(InMemorySessionStore::with_ttl(ttl)),
            builder.clone(),
        );
        state.charts.ensure_dir().await.unwrap();

        Self {
            router: server::router(state),
            builder,
            static_dir,
        }
    }

    pub fn provider(&self) -> &ScriptedProvider {
        &self.builder.provider
    }

    pub async fn send(&self, request: Request<Body>) -> Response<Body> {
        self.router.clone().oneshot(request).await.unwrap()
    }

    /// Visit the home page and return the `Cookie` header value to reuse.
    pub async fn session(&self) -> String {
        let response = self.send(get("/", None)).await;
        cookie_from(&response).expect("home page sets a session cookie")
    }

    pub async fn setup(&self, cookie: &str, parts: &[Part<'_>]) -> Response<Body> {
        self.send(multipart("/setup", Some(cookie), parts)).await
    }

    pub async fn chat(&self, cookie: Option<&str>, body: &str) -> Response<Body> {
        let mut request = Request::post("/chat").header(header::CONTENT_TYPE, "application/json");
        if let Some(cookie) = cookie {
            request = request.header(header::COOKIE, cookie);
        }
        self.send(request.body(Body::from(body.to_string())).unwrap())
            .await
    }
}

pub fn get(uri: &str, cookie: Option<&str>) -> Request<Body> {
    let mut request = Request::get(uri);
    if let Some(cookie) = cookie {
        request = request.header(header::COOKIE, cookie);
    }
    request.body(Body::empty()).unwrap()
}

/// `sid=<id>` from a response's `Set-Cookie`, if any.
pub fn cookie_from<B>(response: &Response<B>) -> Option<String> {
    response
        .headers()
        .get(header::SET_COOKIE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(';').next())
        .map(str::to_string)
}

pub enum Part<'a> {
    Text(&'a str, &'a str),
    File(&'a str, &'a str, &'a [u8]),
}

const BOUNDARY: &str = "csvchat-test-boundary";

pub fn multipart(uri: &str, cookie: Option<&str>, parts: &[Part<'_>]) -> Request<Body> {
    let mut body = Vec::new();
    for part in parts {
        body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
        match part {
            Part::Text(name, value) => {
                body.extend_from_slice(
                    format!("Content-Disposition: form-data; name=\"{}\"\r\n\r\n", name)
                        .as_bytes(),
                );
                body.extend_from_slice(value.as_bytes());
            }
            Part::File(name, file_name, bytes) => {
                body.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n\
                         Content-Type: text/csv\r\n\r\n",
                        name, file_name
                    )
                    .as_bytes(),
                );
                body.extend_from_slice(bytes);
            }
        }
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());

    let mut request = Request::post(uri).header(
        header::CONTENT_TYPE,
        format!("multipart/form-data; boundary={}", BOUNDARY),
    );
    if let Some(cookie) = cookie {
        request = request.header(header::COOKIE, cookie);
    }
    request.body(Body::from(body)).unwrap()
}

pub async fn json_body(response: Response<Body>) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

pub async fn bytes_body(response: Response<Body>) -> Vec<u8> {
    response
        .into_body()
        .collect()
        .await
        .unwrap()
        .to_bytes()
        .to_vec()
}
