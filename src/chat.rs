//! Chat relay.
//!
//! A small web front end that forwards chat turns to a language-model
//! bridge (an Ollama-compatible `/api/chat` endpoint that itself calls the
//! tool server) and keeps a bounded transcript per browser session and user.
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/` | The configured `index.html` |
//! | `POST` | `/chat` | `{user_id, message}` → `{reply}` |
//! | `POST` | `/chat/stream` | Same request; reply streamed as server-sent events |
//!
//! Browser sessions are identified by a `session_id` cookie (UUID v4) issued
//! on the first request that lacks one. Transcripts are keyed by
//! `<session_id>_<user_id>` and never hold more than `max_history` turns; at
//! most `max_sessions` transcripts are kept, the oldest evicted first.

use std::collections::{HashMap, VecDeque};
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use axum::{
    extract::State,
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{
        sse::{Event, Sse},
        Html, IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::{mpsc, Mutex};
use tokio_stream::wrappers::ReceiverStream;
use tower_http::cors::{Any, CorsLayer};

use crate::config::ChatConfig;

pub const SESSION_COOKIE: &str = "session_id";

/// Reply used when the bridge answers without `message.content`.
pub const EMPTY_REPLY: &str = "AIから応答が返っていません";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

// ============ Transcripts ============

/// Per-(session, user) conversation history, oldest turn first.
///
/// Holds at most `max_sessions` transcripts; starting a new one beyond that
/// evicts the transcript that was started earliest.
pub struct Transcripts {
    max_history: usize,
    max_sessions: usize,
    inner: Mutex<TranscriptMap>,
}

#[derive(Default)]
struct TranscriptMap {
    turns: HashMap<String, Vec<ChatMessage>>,
    created: VecDeque<String>,
}

impl Transcripts {
    pub fn new(max_history: usize, max_sessions: usize) -> Self {
        Self {
            max_history,
            max_sessions,
            inner: Mutex::new(TranscriptMap::default()),
        }
    }

    /// Appends a turn, drops the oldest turns beyond the bound, and returns
    /// the transcript as it now stands.
    pub async fn append(&self, key: &str, message: ChatMessage) -> Vec<ChatMessage> {
        let mut guard = self.inner.lock().await;
        let map = &mut *guard;
        if !map.turns.contains_key(key) {
            while map.created.len() >= self.max_sessions {
                match map.created.pop_front() {
                    Some(oldest) => {
                        map.turns.remove(&oldest);
                    }
                    None => break,
                }
            }
            map.created.push_back(key.to_string());
        }
        let turns = map.turns.entry(key.to_string()).or_default();
        turns.push(message);
        if turns.len() > self.max_history {
            let excess = turns.len() - self.max_history;
            turns.drain(..excess);
        }
        turns.clone()
    }

    pub async fn get(&self, key: &str) -> Vec<ChatMessage> {
        self.inner
            .lock()
            .await
            .turns
            .get(key)
            .cloned()
            .unwrap_or_default()
    }
}

/// Transcript key of one user within one browser session.
pub fn transcript_key(session_id: &str, user_id: &str) -> String {
    format!("{}_{}", session_id, user_id)
}

// ============ Session cookie ============

/// Reads `session_id` from the `Cookie` headers.
pub fn session_from_headers(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, value)| *name == SESSION_COOKIE && !value.is_empty())
        .map(|(_, value)| value.to_string())
}

/// The request's session id, or a fresh one plus the cookie that carries it.
fn resolve_session(headers: &HeaderMap) -> (String, Option<HeaderValue>) {
    match session_from_headers(headers) {
        Some(id) => (id, None),
        None => {
            let id = uuid::Uuid::new_v4().to_string();
            let cookie = format!("{}={}; HttpOnly; SameSite=Lax; Path=/", SESSION_COOKIE, id);
            (id.clone(), HeaderValue::from_str(&cookie).ok())
        }
    }
}

fn with_cookie(mut response: Response, cookie: Option<HeaderValue>) -> Response {
    if let Some(value) = cookie {
        response.headers_mut().append(header::SET_COOKIE, value);
    }
    response
}

// ============ Bridge client ============

#[derive(Debug, Serialize)]
struct BridgeRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
}

/// `message.content` of one bridge response object, if any.
fn message_content(value: &Value) -> Option<&str> {
    value.get("message")?.get("content")?.as_str()
}

// ============ Router ============

#[derive(Clone)]
pub struct ChatState {
    config: Arc<ChatConfig>,
    client: reqwest::Client,
    transcripts: Arc<Transcripts>,
}

impl ChatState {
    pub fn new(config: ChatConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to build bridge HTTP client")?;
        Ok(Self {
            transcripts: Arc::new(Transcripts::new(config.max_history, config.max_sessions)),
            config: Arc::new(config),
            client,
        })
    }

    pub fn transcripts(&self) -> &Transcripts {
        &self.transcripts
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(self.config.timeout_secs)
    }

    async fn ask_bridge(&self, messages: &[ChatMessage]) -> Result<String> {
        let body = BridgeRequest {
            model: &self.config.model,
            messages,
            stream: false,
        };
        let response = self
            .client
            .post(&self.config.bridge_url)
            .timeout(self.timeout())
            .json(&body)
            .send()
            .await?
            .error_for_status()?;
        let value: Value = response.json().await?;
        Ok(message_content(&value).unwrap_or(EMPTY_REPLY).to_string())
    }

    /// Streams reply fragments into `tx` and returns the whole reply.
    async fn stream_bridge(
        &self,
        messages: &[ChatMessage],
        tx: &mpsc::Sender<std::result::Result<Event, Infallible>>,
    ) -> Result<String> {
        let body = BridgeRequest {
            model: &self.config.model,
            messages,
            stream: true,
        };
        let timeout = self.timeout();
        let mut response = tokio::time::timeout(
            timeout,
            self.client.post(&self.config.bridge_url).json(&body).send(),
        )
        .await
        .map_err(|_| anyhow!("bridge did not respond within {}s", timeout.as_secs()))??
        .error_for_status()?;

        let mut full_reply = String::new();
        let mut pending: Vec<u8> = Vec::new();
        loop {
            let chunk = tokio::time::timeout(timeout, response.chunk())
                .await
                .map_err(|_| anyhow!("bridge stalled for {}s", timeout.as_secs()))??;
            let Some(chunk) = chunk else { break };
            pending.extend_from_slice(&chunk);
            while let Some(pos) = pending.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = pending.drain(..=pos).collect();
                forward_line(&line, &mut full_reply, tx).await?;
            }
        }
        forward_line(&pending, &mut full_reply, tx).await?;

        Ok(full_reply)
    }
}

/// Forwards the content fragment of one NDJSON line, if it has one.
async fn forward_line(
    line: &[u8],
    full_reply: &mut String,
    tx: &mpsc::Sender<std::result::Result<Event, Infallible>>,
) -> Result<()> {
    let text = std::str::from_utf8(line)?.trim();
    if text.is_empty() {
        return Ok(());
    }
    let value: Value = serde_json::from_str(text).context("bridge sent a line that is not JSON")?;
    if let Some(content) = message_content(&value).filter(|c| !c.is_empty()) {
        full_reply.push_str(content);
        let event = Event::default().data(serde_json::to_string(content)?);
        // A closed channel means the browser went away; keep reading so the
        // transcript still gets the full reply.
        let _ = tx.send(Ok(event)).await;
    }
    Ok(())
}

/// Builds the relay router.
pub fn chat_router(state: ChatState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(handle_index))
        .route("/chat", post(handle_chat))
        .route("/chat/stream", post(handle_chat_stream))
        .layer(cors)
        .with_state(state)
}

/// Starts the relay on `[chat].bind`.
pub async fn run_chat(config: ChatConfig) -> Result<()> {
    let bind_addr = config.bind.clone();
    tracing::info!(bridge = %config.bridge_url, model = %config.model, "chat relay configured");
    let app = chat_router(ChatState::new(config)?);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!("chat relay listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;
    Ok(())
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub user_id: String,
    pub message: String,
}

async fn handle_chat(
    State(state): State<ChatState>,
    headers: HeaderMap,
    Json(req): Json<ChatRequest>,
) -> Response {
    let (session_id, cookie) = resolve_session(&headers);
    let key = transcript_key(&session_id, &req.user_id);

    let messages = state
        .transcripts
        .append(&key, ChatMessage::user(req.message))
        .await;

    let reply = match state.ask_bridge(&messages).await {
        Ok(reply) => {
            state
                .transcripts
                .append(&key, ChatMessage::assistant(reply.clone()))
                .await;
            reply
        }
        Err(e) => {
            tracing::warn!(error = %e, "bridge call failed");
            format!("エラー: {}", e)
        }
    };

    with_cookie(Json(json!({ "reply": reply })).into_response(), cookie)
}

async fn handle_chat_stream(
    State(state): State<ChatState>,
    headers: HeaderMap,
    Json(req): Json<ChatRequest>,
) -> Response {
    let (session_id, cookie) = resolve_session(&headers);
    let key = transcript_key(&session_id, &req.user_id);

    let messages = state
        .transcripts
        .append(&key, ChatMessage::user(req.message))
        .await;

    let (tx, rx) = mpsc::channel(32);
    tokio::spawn(async move {
        match state.stream_bridge(&messages, &tx).await {
            Ok(full_reply) => {
                state
                    .transcripts
                    .append(&key, ChatMessage::assistant(full_reply))
                    .await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "bridge stream failed");
                let text = serde_json::to_string(&format!("エラー: {}", e)).unwrap_or_default();
                let _ = tx.send(Ok(Event::default().data(text))).await;
            }
        }
        let _ = tx.send(Ok(Event::default().data("[DONE]"))).await;
    });

    with_cookie(Sse::new(ReceiverStream::new(rx)).into_response(), cookie)
}

async fn handle_index(State(state): State<ChatState>) -> Response {
    let Some(path) = state.config.index_html.as_ref() else {
        return (StatusCode::NOT_FOUND, "index.html not configured").into_response();
    };
    match tokio::fs::read_to_string(path).await {
        Ok(html) => Html(html).into_response(),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "cannot read index page");
            (StatusCode::NOT_FOUND, "index.html not found").into_response()
        }
    }
}
