//! NeWarp upstream client.
//!
//! The upstream system is a cookie-session JSON API: a login endpoint that
//! sets a session cookie, and data endpoints that each take a JSON filter
//! payload and answer `{ "data": ... }`.
//!
//! The [`Upstream`] trait is the seam the engine talks to. [`HttpUpstream`]
//! is the production implementation; tests substitute counting fakes.
//!
//! # Sessions
//!
//! [`Upstream::authenticate`] returns an explicit [`Session`] that owns the
//! cookie-carrying HTTP client. Every [`Upstream::fetch`] takes the session
//! as a parameter; nothing is kept in process-wide state. A query that has
//! to refresh several datasets opens one session through [`SessionSlot`] and
//! reuses it for all of them.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::config::{CredentialsConfig, UpstreamConfig};
use crate::error::{HarnessError, Result};

/// Logical datasets served by the upstream system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dataset {
    Division,
    Department,
    Group,
    User,
    InterviewSheet,
    ScoreSheet,
}

impl Dataset {
    /// Stable identity used for cache naming and logging.
    pub fn name(&self) -> &'static str {
        match self {
            Dataset::Division => "division",
            Dataset::Department => "department",
            Dataset::Group => "group",
            Dataset::User => "user",
            Dataset::InterviewSheet => "interview_sheet",
            Dataset::ScoreSheet => "score_sheet",
        }
    }

    /// Whether entries are keyed per (user, period).
    pub fn is_period_scoped(&self) -> bool {
        matches!(self, Dataset::InterviewSheet | Dataset::ScoreSheet)
    }
}

/// Identifies one user's data for one evaluation period.
#[derive(Debug, Clone, Copy)]
pub struct PeriodScope<'a> {
    pub user_key: &'a str,
    pub period: &'a str,
}

impl PeriodScope<'_> {
    /// Cache sub-key for this scope.
    pub fn sub_key(&self) -> String {
        format!("{}_{}", self.user_key, self.period)
    }
}

/// Builds the request body for a dataset.
///
/// Every filter field is sent as an empty string, which the upstream treats
/// as "unfiltered". Period-scoped datasets additionally carry the user key
/// and the goal-management period.
pub fn payload_for(dataset: Dataset, proc_user_key: &str, scope: Option<PeriodScope<'_>>) -> Value {
    match dataset {
        Dataset::Division => json!({
            "divisionName": "",
            "divisionShortName": "",
        }),
        Dataset::Department => json!({
            "departmentKey": "",
            "departmentName": "",
            "departmentShortName": "",
        }),
        Dataset::Group => json!({
            "divisionKey": "",
            "departmentKey": "",
            "groupName": "",
            "groupShortName": "",
        }),
        Dataset::User => json!({
            "procUserKey": proc_user_key,
            "userId": "",
            "userKbnId": "1",
            "isNotRetire": "on",
            "userName": "",
            "departmentKey": "",
            "groupKey": "",
            "positionId": "",
            "authorityId": "",
        }),
        Dataset::InterviewSheet | Dataset::ScoreSheet => {
            let (user_key, period) = scope.map(|s| (s.user_key, s.period)).unwrap_or(("", ""));
            json!({
                "userKey": user_key,
                "goalManagementPeriodId": period,
            })
        }
    }
}

/// An authenticated upstream session.
pub struct Session {
    client: reqwest::Client,
}

impl Session {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    /// The cookie-carrying client all fetches of this session go through.
    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }
}

/// Access to the remote organization system.
#[async_trait]
pub trait Upstream: Send + Sync {
    /// Log in with the stored credentials.
    ///
    /// Fails with [`HarnessError::Auth`] on any non-success status or when the
    /// login endpoint cannot be reached.
    async fn authenticate(&self) -> Result<Session>;

    /// Post `payload` to the dataset's endpoint and return the `data` field
    /// of the response.
    ///
    /// Fails with [`HarnessError::Upstream`] on non-success status, timeout,
    /// or a body that is not JSON or has no `data` field.
    async fn fetch(&self, dataset: Dataset, payload: &Value, session: &Session) -> Result<Value>;
}

/// Lazily opened session scoped to one top-level query.
///
/// The first call to [`session`](SessionSlot::session) logs in; later calls
/// return the same session, so one login covers every fetch of the query.
pub struct SessionSlot<'a> {
    upstream: &'a dyn Upstream,
    session: Option<Session>,
}

impl<'a> SessionSlot<'a> {
    pub fn new(upstream: &'a dyn Upstream) -> Self {
        Self {
            upstream,
            session: None,
        }
    }

    pub async fn session(&mut self) -> Result<&Session> {
        let session = match self.session.take() {
            Some(s) => s,
            None => self.upstream.authenticate().await?,
        };
        Ok(self.session.insert(session))
    }

    pub fn is_open(&self) -> bool {
        self.session.is_some()
    }
}

/// HTTP implementation of [`Upstream`] backed by `reqwest`.
pub struct HttpUpstream {
    config: UpstreamConfig,
    engage_code: String,
    user_id: String,
    password: String,
}

impl HttpUpstream {
    pub fn new(config: UpstreamConfig, credentials: &CredentialsConfig) -> anyhow::Result<Self> {
        let password = credentials.resolved_password()?;
        Ok(Self {
            config,
            engage_code: credentials.engage_code.clone(),
            user_id: credentials.user_id.clone(),
            password,
        })
    }

    fn build_client(&self) -> Result<reqwest::Client> {
        reqwest::Client::builder()
            .cookie_store(true)
            .user_agent(self.config.user_agent.clone())
            .timeout(Duration::from_secs(self.config.timeout_secs))
            .build()
            .map_err(|e| HarnessError::Auth(format!("could not build HTTP client: {}", e)))
    }
}

#[async_trait]
impl Upstream for HttpUpstream {
    async fn authenticate(&self) -> Result<Session> {
        let client = self.build_client()?;

        let body = json!({
            "engageCode": self.engage_code,
            "userId": self.user_id,
            "pass": self.password,
        });

        let response = client
            .post(&self.config.login_url)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| HarnessError::Auth(format!("login endpoint unreachable: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(HarnessError::Auth(format!("login rejected with {}", status)));
        }

        tracing::info!(user_id = %self.user_id, "logged in to upstream");
        Ok(Session::new(client))
    }

    async fn fetch(&self, dataset: Dataset, payload: &Value, session: &Session) -> Result<Value> {
        let endpoint = self.config.endpoints.for_dataset(dataset);

        let mut request = session
            .client()
            .post(&endpoint.url)
            .header("Content-Type", "application/json")
            .json(payload);
        if let Some(ref referer) = endpoint.referer {
            request = request.header("Referer", referer);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                HarnessError::Upstream(format!("{}: request timed out", dataset.name()))
            } else {
                HarnessError::Upstream(format!("{}: {}", dataset.name(), e))
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(HarnessError::Upstream(format!(
                "{} returned {}: {}",
                dataset.name(),
                status,
                body_text
            )));
        }

        let json: Value = response.json().await.map_err(|e| {
            HarnessError::Upstream(format!("{}: response is not JSON: {}", dataset.name(), e))
        })?;

        let data = extract_data(dataset, json)?;
        tracing::info!(dataset = dataset.name(), "fetched dataset from upstream");
        Ok(data)
    }
}

/// Pulls the `data` field out of a response body.
fn extract_data(dataset: Dataset, mut body: Value) -> Result<Value> {
    match body.get_mut("data") {
        Some(data) => Ok(data.take()),
        None => Err(HarnessError::Upstream(format!(
            "{}: response has no data field",
            dataset.name()
        ))),
    }
}
