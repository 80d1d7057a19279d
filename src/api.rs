use std::time::Duration;

use log::{debug, warn};
use serde_json::Value;
use url::Url;

use crate::job_event::{EventPage, Job};
use crate::query_set::QuerySet;

/// Events are always fetched in stream order
pub const DEFAULT_ORDER_BY: &str = "counter";

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// 400 from the controller, usually an invalid search filter
    #[error("controller rejected the request: {0}")]
    Rejected(String),

    #[error("HTTP {code}: {body}")]
    Status { code: u16, body: String },

    #[error("could not decode response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("invalid URL: {0}")]
    Url(#[from] url::ParseError),
}

impl ApiError {
    pub fn is_rejected(&self) -> bool {
        matches!(self, ApiError::Rejected(_))
    }
}

/// A job plus its raw JSON, which backs the output view's resource model
#[derive(Debug, Clone)]
pub struct JobRecord {
    pub job: Job,
    pub model: Value,
}

/// One history page request
#[derive(Debug, Clone, PartialEq)]
pub struct PageQuery {
    pub page: u64,
    pub page_size: usize,
    pub search: QuerySet,
}

impl PageQuery {
    pub fn first(page_size: usize, search: QuerySet) -> Self {
        Self {
            page: 1,
            page_size,
            search,
        }
    }

    pub fn next(&self) -> Self {
        Self {
            page: self.page + 1,
            ..self.clone()
        }
    }

    /// Full filter set sent to the server. The search wins over defaults.
    pub fn to_queryset(&self) -> QuerySet {
        let mut queryset = QuerySet::new();
        if self.search.get("page_size").is_none() {
            queryset.push("page_size", self.page_size.to_string());
        }
        if self.search.get("order_by").is_none() {
            queryset.push("order_by", DEFAULT_ORDER_BY);
        }
        queryset.push("page", self.page.to_string());
        for (key, value) in self.search.pairs() {
            if key != "page" {
                queryset.push(key, value);
            }
        }
        queryset
    }
}

/// Collaborator the output view fetches through
pub trait JobEventsApi: Send + Sync {
    fn fetch_job(&self, job_id: u64) -> Result<JobRecord, ApiError>;

    fn fetch_events(&self, events_url: &str, query: &PageQuery) -> Result<EventPage, ApiError>;

    /// Events with a counter above `counter`, in counter order
    fn fetch_events_since(
        &self,
        events_url: &str,
        counter: u64,
        page_size: usize,
    ) -> Result<EventPage, ApiError>;
}

pub struct ApiClient {
    base: Url,
    token: Option<String>,
    http: reqwest::blocking::Client,
}

impl ApiClient {
    pub fn new(controller_url: &str, token: Option<String>, timeout: Duration) -> Result<Self, ApiError> {
        let http = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("jobtail/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            base: controller_base(controller_url)?,
            token,
            http,
        })
    }

    fn get_json(&self, url: Url) -> Result<Value, ApiError> {
        debug!("GET {url}");
        let mut request = self.http.get(url.clone());
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send()?;
        let status = response.status().as_u16();
        let body = response.text()?;
        check_status(status, body.as_str()).inspect_err(|e| warn!("GET {url} failed: {e}"))?;

        Ok(serde_json::from_str(&body)?)
    }
}

impl JobEventsApi for ApiClient {
    fn fetch_job(&self, job_id: u64) -> Result<JobRecord, ApiError> {
        let url = resolve(&self.base, &format!("/api/v2/jobs/{job_id}/"))?;
        let model = self.get_json(url)?;
        let job = serde_json::from_value(model.clone())?;
        Ok(JobRecord { job, model })
    }

    fn fetch_events(&self, events_url: &str, query: &PageQuery) -> Result<EventPage, ApiError> {
        let url = events_url_with(&self.base, events_url, &query.to_queryset())?;
        Ok(serde_json::from_value(self.get_json(url)?)?)
    }

    fn fetch_events_since(
        &self,
        events_url: &str,
        counter: u64,
        page_size: usize,
    ) -> Result<EventPage, ApiError> {
        let queryset = QuerySet::from_pairs([
            ("order_by".to_string(), DEFAULT_ORDER_BY.to_string()),
            ("counter__gt".to_string(), counter.to_string()),
            ("page_size".to_string(), page_size.to_string()),
        ]);
        let url = events_url_with(&self.base, events_url, &queryset)?;
        Ok(serde_json::from_value(self.get_json(url)?)?)
    }
}

/// Controller URL with a trailing slash, so joins keep any path prefix
pub fn controller_base(controller_url: &str) -> Result<Url, ApiError> {
    let mut base = Url::parse(controller_url)?;
    if !base.path().ends_with('/') {
        let path = format!("{}/", base.path());
        base.set_path(&path);
    }
    Ok(base)
}

/// Resolve an API path under the controller. Paths that already carry the
/// controller's prefix are not prefixed twice.
fn resolve(base: &Url, path: &str) -> Result<Url, ApiError> {
    let relative = path
        .strip_prefix(base.path())
        .or_else(|| path.strip_prefix('/'))
        .unwrap_or(path);
    Ok(base.join(relative)?)
}

/// Resolve a related collection path against the controller and attach filters
pub fn events_url_with(base: &Url, events_url: &str, queryset: &QuerySet) -> Result<Url, ApiError> {
    let mut url = resolve(base, events_url)?;
    url.set_query(None);
    if !queryset.is_empty() {
        url.set_query(Some(&queryset.to_query_string()));
    }
    Ok(url)
}

/// Map a response status to an error, keeping the body for display
pub fn check_status(status: u16, body: &str) -> Result<(), ApiError> {
    match status {
        200..=299 => Ok(()),
        400 => Err(ApiError::Rejected(error_detail(body))),
        code => Err(ApiError::Status {
            code,
            body: error_detail(body),
        }),
    }
}

/// AWX reports errors as `{"detail": "..."}` or as per-field lists
fn error_detail(body: &str) -> String {
    match serde_json::from_str::<Value>(body) {
        Ok(Value::Object(map)) => {
            if let Some(detail) = map.get("detail").and_then(Value::as_str) {
                return detail.to_string();
            }
            map.iter()
                .map(|(field, value)| match value {
                    Value::Array(items) => {
                        let messages: Vec<&str> = items.iter().filter_map(Value::as_str).collect();
                        format!("{field}: {}", messages.join(", "))
                    }
                    other => format!("{field}: {other}"),
                })
                .collect::<Vec<_>>()
                .join("; ")
        }
        _ => body.trim().to_string(),
    }
}
