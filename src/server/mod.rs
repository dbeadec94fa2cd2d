//! HTTP Server
//!
//! Home page, CSV setup and chat endpoints for the dataframe agent. Browser
//! identity is a `sid` cookie mapped to a [`SessionStore`] entry.

use crate::agent::{AgentSettings, AskResult, DataframeAgent};
use crate::chart::ChartSink;
use crate::config::Config;
use crate::error::AppError;
use crate::provider::{GroqBuilder, ProviderBuilder, make_client};
use crate::session::{InMemorySessionStore, SessionState, SessionStore};
use crate::table::Table;
use anyhow::Result;
use axum::{
    Router,
    body::Bytes,
    extract::{DefaultBodyLimit, Multipart, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{Html, IntoResponse, Json, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

const INDEX_HTML: &str = include_str!("../../templates/index.html");
const SESSION_COOKIE: &str = "sid";

/// Server state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub sessions: Arc<dyn SessionStore>,
    pub providers: Arc<dyn ProviderBuilder>,
    pub charts: ChartSink,
}

impl AppState {
    pub fn new(
        config: Config,
        sessions: Arc<dyn SessionStore>,
        providers: Arc<dyn ProviderBuilder>,
    ) -> Self {
        let charts = ChartSink::under_static_dir(&config.server.static_dir);
        Self {
            config: Arc::new(config),
            sessions,
            providers,
            charts,
        }
    }
}

/// Build the application router.
pub fn router(state: AppState) -> Router {
    let static_files = ServeDir::new(&state.config.server.static_dir);
    let body_limit = state.config.server.max_upload_bytes;

    Router::new()
        .route("/", get(index))
        .route("/setup", post(setup))
        .route("/chat", post(chat))
        .route("/health", get(health))
        .nest_service("/static", static_files)
        .with_state(state)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
}

/// Start the server and block until it exits.
pub async fn serve(config: Config) -> Result<()> {
    let ttl = config.session.ttl_secs.map(Duration::from_secs);
    let sessions = Arc::new(InMemorySessionStore::with_ttl(ttl));
    let providers = Arc::new(GroqBuilder::from_config(&config.llm));
    let addr = format!("{}:{}", config.server.hostname, config.server.port);

    let state = AppState::new(config, sessions.clone(), providers);
    state.charts.ensure_dir().await?;

    if let Some(ttl) = ttl {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(ttl.max(Duration::from_secs(60)));
            loop {
                ticker.tick().await;
                sessions.purge_expired();
            }
        });
    }

    let app = router(state);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Listening on http://{}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}

/// Health check response
async fn health() -> &'static str {
    "ok"
}

async fn index(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let (_, new_session) = resolve_session(&state, &headers);
    with_session_cookie(Html(INDEX_HTML).into_response(), new_session.as_deref())
}

#[derive(Serialize)]
struct SetupResponse {
    ok: bool,
    message: &'static str,
}

/// Multipart fields accepted by `/setup`.
#[derive(Default)]
struct SetupForm {
    api_key: String,
    model: String,
    csv: Option<Bytes>,
}

async fn read_setup_form(multipart: &mut Multipart) -> Result<SetupForm, (StatusCode, String)> {
    let mut form = SetupForm::default();
    loop {
        let field = multipart
            .next_field()
            .await
            .map_err(|e| (e.status(), e.body_text()))?;
        let Some(field) = field else {
            break;
        };
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "groq_api_key" => {
                form.api_key = field.text().await.map_err(|e| (e.status(), e.body_text()))?;
            }
            "model" => {
                form.model = field.text().await.map_err(|e| (e.status(), e.body_text()))?;
            }
            "csv_file" => {
                let has_name = field.file_name().is_some_and(|f| !f.is_empty());
                let bytes = field.bytes().await.map_err(|e| (e.status(), e.body_text()))?;
                if has_name || !bytes.is_empty() {
                    form.csv = Some(bytes);
                }
            }
            other => tracing::debug!(field = %other, "Ignoring unknown setup field"),
        }
    }
    Ok(form)
}

async fn setup(
    State(state): State<AppState>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Response {
    let (session_id, new_session) = resolve_session(&state, &headers);
    let cookie = new_session.as_deref();

    let form = match read_setup_form(&mut multipart).await {
        Ok(form) => form,
        Err((status, message)) => {
            tracing::warn!(%status, error = %message, "Rejected setup upload");
            let error = AppError::validation(message);
            return with_session_cookie(failure(status, error), cookie);
        }
    };

    let api_key = form.api_key.trim().to_string();
    if api_key.is_empty() {
        let error = AppError::validation("Groq API key is required.");
        return with_session_cookie(failure(StatusCode::BAD_REQUEST, error), cookie);
    }
    let Some(csv) = form.csv else {
        let error = AppError::validation("CSV file is required.");
        return with_session_cookie(failure(StatusCode::BAD_REQUEST, error), cookie);
    };
    let model = match form.model.trim() {
        "" => state.config.llm.default_model.clone(),
        model => model.to_string(),
    };

    match build_agent(&state, &api_key, &model, csv).await {
        Ok(agent) => {
            let agent = Arc::new(agent);
            state
                .sessions
                .update(&session_id, &mut |s: &mut SessionState| {
                    s.agent = Some(Arc::clone(&agent))
                });
            tracing::info!(session_id = %session_id, model = %model, "Session agent ready");
            let body = SetupResponse {
                ok: true,
                message: "Agent is ready.",
            };
            with_session_cookie(Json(body).into_response(), cookie)
        }
        Err(error) => {
            tracing::warn!(
                session_id = %session_id,
                kind = ?error.kind(),
                error = %error,
                "Setup failed"
            );
            with_session_cookie(failure(StatusCode::INTERNAL_SERVER_ERROR, error), cookie)
        }
    }
}

async fn build_agent(
    state: &AppState,
    api_key: &str,
    model: &str,
    csv: Bytes,
) -> Result<DataframeAgent, AppError> {
    let table = tokio::task::spawn_blocking(move || Table::from_csv_bytes(&csv))
        .await
        .map_err(|e| AppError::execution(format!("CSV loader crashed: {}", e)))??;

    let llm = &state.config.llm;
    let client = make_client(state.providers.as_ref(), api_key, model, llm.temperature)?;

    Ok(DataframeAgent::new(
        client,
        Arc::new(table),
        state.charts.clone(),
        AgentSettings::from(llm),
    ))
}

#[derive(Debug, Default, Deserialize)]
struct ChatRequest {
    #[serde(default)]
    message: String,
}

async fn chat(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    let session_id = session_cookie(&headers);
    let agent = session_id
        .as_deref()
        .and_then(|id| state.sessions.get(id).agent);
    let Some(agent) = agent else {
        let error = AppError::validation("Please provide API key and CSV first.");
        return failure(StatusCode::BAD_REQUEST, error);
    };

    // Unparseable bodies count as an empty message.
    let request: ChatRequest = serde_json::from_slice(&body).unwrap_or_default();
    let message = request.message.trim();
    if message.is_empty() {
        return failure(StatusCode::BAD_REQUEST, AppError::validation("Empty message."));
    }

    let result = agent.ask(message).await;
    let status = if result.ok {
        StatusCode::OK
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    };
    (status, Json(result)).into_response()
}

fn failure(status: StatusCode, error: AppError) -> Response {
    (status, Json(AskResult::failure(error, None))).into_response()
}

/// The caller's live session id, or a freshly created one. The second value
/// is set when the response must carry a new cookie.
fn resolve_session(state: &AppState, headers: &HeaderMap) -> (String, Option<String>) {
    if let Some(id) = session_cookie(headers)
        && state.sessions.contains(&id)
    {
        return (id, None);
    }
    let id = state.sessions.create();
    (id.clone(), Some(id))
}

fn session_cookie(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .map(|(_, value)| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn with_session_cookie(mut response: Response, session_id: Option<&str>) -> Response {
    if let Some(id) = session_id {
        let cookie = format!("{}={}; Path=/; HttpOnly; SameSite=Lax", SESSION_COOKIE, id);
        match HeaderValue::from_str(&cookie) {
            Ok(value) => {
                response.headers_mut().append(header::SET_COOKIE, value);
            }
            Err(e) => tracing::warn!(error = %e, "Could not encode session cookie"),
        }
    }
    response
}
