//! TOML configuration parsing.
//!
//! A single file (default `./config/newarp.toml`) carries the cache location,
//! upstream endpoints and credentials, the evaluation periods to aggregate,
//! and the bind addresses of the tool server and the chat relay.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::upstream::Dataset;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub cache: CacheConfig,
    pub upstream: UpstreamConfig,
    pub credentials: CredentialsConfig,
    #[serde(default)]
    pub evaluation: EvaluationConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub chat: ChatConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CacheConfig {
    #[serde(default = "default_cache_dir")]
    pub dir: PathBuf,
    /// Entries older than this are refetched. Unset means presence is freshness.
    #[serde(default)]
    pub max_age_secs: Option<u64>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            dir: default_cache_dir(),
            max_age_secs: None,
        }
    }
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from("./data")
}

#[derive(Debug, Deserialize, Clone)]
pub struct UpstreamConfig {
    pub login_url: String,
    #[serde(default = "default_upstream_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    pub endpoints: EndpointsConfig,
}

fn default_upstream_timeout() -> u64 {
    30
}

fn default_user_agent() -> String {
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct EndpointsConfig {
    pub division: EndpointConfig,
    pub department: EndpointConfig,
    pub group: EndpointConfig,
    pub user: EndpointConfig,
    pub interview_sheet: EndpointConfig,
    pub score_sheet: EndpointConfig,
}

impl EndpointsConfig {
    pub fn for_dataset(&self, dataset: Dataset) -> &EndpointConfig {
        match dataset {
            Dataset::Division => &self.division,
            Dataset::Department => &self.department,
            Dataset::Group => &self.group,
            Dataset::User => &self.user,
            Dataset::InterviewSheet => &self.interview_sheet,
            Dataset::ScoreSheet => &self.score_sheet,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct EndpointConfig {
    pub url: String,
    #[serde(default)]
    pub referer: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CredentialsConfig {
    pub engage_code: String,
    pub user_id: String,
    /// Falls back to the `NEWARP_PASSWORD` environment variable.
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub proc_user_key: String,
}

impl CredentialsConfig {
    pub fn resolved_password(&self) -> Result<String> {
        if let Some(ref p) = self.password {
            return Ok(p.clone());
        }
        std::env::var("NEWARP_PASSWORD").map_err(|_| {
            anyhow::anyhow!("credentials.password not set and NEWARP_PASSWORD not in environment")
        })
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct EvaluationConfig {
    /// Period identifiers in the order their blocks are reported.
    #[serde(default)]
    pub periods: Vec<String>,
    /// Interview-sheet collection the next-period goals are projected from.
    #[serde(default = "default_next_goal_field")]
    pub next_goal_field: String,
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            periods: Vec::new(),
            next_goal_field: default_next_goal_field(),
        }
    }
}

fn default_next_goal_field() -> String {
    "pastDetails".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_server_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_server_bind(),
        }
    }
}

fn default_server_bind() -> String {
    "0.0.0.0:8081".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChatConfig {
    #[serde(default = "default_chat_bind")]
    pub bind: String,
    #[serde(default = "default_bridge_url")]
    pub bridge_url: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_max_history")]
    pub max_history: usize,
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,
    #[serde(default = "default_chat_timeout")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub index_html: Option<PathBuf>,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            bind: default_chat_bind(),
            bridge_url: default_bridge_url(),
            model: default_model(),
            max_history: default_max_history(),
            max_sessions: default_max_sessions(),
            timeout_secs: default_chat_timeout(),
            index_html: None,
        }
    }
}

fn default_chat_bind() -> String {
    "0.0.0.0:8000".to_string()
}
fn default_bridge_url() -> String {
    "http://mcp-bridge:8000/api/chat".to_string()
}
fn default_model() -> String {
    "llama3.1:8b".to_string()
}
fn default_max_history() -> usize {
    10
}
fn default_max_sessions() -> usize {
    1000
}
fn default_chat_timeout() -> u64 {
    120
}

impl ChatConfig {
    /// Applies the `OLLAMA_BRIDGE_URL` / `OLLAMA_MODEL` overrides used by
    /// container deployments.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(url) = std::env::var("OLLAMA_BRIDGE_URL") {
            self.bridge_url = url;
        }
        if let Ok(model) = std::env::var("OLLAMA_MODEL") {
            self.model = model;
        }
        self
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config = parse_config(&content)?;
    Ok(config)
}

/// Parses and validates configuration text.
pub fn parse_config(content: &str) -> Result<Config> {
    let mut config: Config =
        toml::from_str(content).with_context(|| "Failed to parse config file")?;

    if config.upstream.timeout_secs == 0 {
        anyhow::bail!("upstream.timeout_secs must be > 0");
    }

    if config.chat.max_history == 0 {
        anyhow::bail!("chat.max_history must be >= 1");
    }

    if config.chat.max_sessions == 0 {
        anyhow::bail!("chat.max_sessions must be >= 1");
    }

    if config.chat.timeout_secs == 0 {
        anyhow::bail!("chat.timeout_secs must be > 0");
    }

    if config.cache.max_age_secs == Some(0) {
        anyhow::bail!("cache.max_age_secs must be > 0 when set");
    }

    match config.evaluation.next_goal_field.as_str() {
        "pastDetails" | "futureDetails" => {}
        other => anyhow::bail!(
            "Unknown evaluation.next_goal_field: '{}'. Must be pastDetails or futureDetails.",
            other
        ),
    }

    for (i, period) in config.evaluation.periods.iter().enumerate() {
        if period.trim().is_empty() {
            anyhow::bail!("evaluation.periods[{}] must not be empty", i);
        }
    }

    config.chat = config.chat.with_env_overrides();

    Ok(config)
}
