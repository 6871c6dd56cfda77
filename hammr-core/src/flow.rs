use bytes::Bytes;
use serde::de::DeserializeOwned;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::http::HttpResponse;

/// Read-only view of an HTTP response handed to check predicates.
#[derive(Debug, Clone)]
pub struct ResponseView {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

impl ResponseView {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn body_utf8(&self) -> Option<&str> {
        std::str::from_utf8(&self.body).ok()
    }

    /// Typed decode of the body. Decode failure is a check failure at the
    /// call site, never a transport error.
    pub fn json<T: DeserializeOwned>(&self) -> Option<T> {
        serde_json::from_slice(&self.body).ok()
    }

    pub fn json_value(&self) -> Option<serde_json::Value> {
        self.json()
    }

    pub fn is_2xx(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

impl From<HttpResponse> for ResponseView {
    fn from(res: HttpResponse) -> Self {
        Self {
            status: res.status,
            headers: res.headers,
            body: res.body,
        }
    }
}

type Predicate = dyn Fn(&ResponseView) -> bool + Send + Sync;

/// Named boolean assertion over a response, contributing to the aggregate
/// `checks` pass-rate.
#[derive(Clone)]
pub struct Check {
    pub name: Arc<str>,
    predicate: Arc<Predicate>,
}

impl Check {
    pub fn new(name: &str, predicate: impl Fn(&ResponseView) -> bool + Send + Sync + 'static) -> Self {
        Self {
            name: Arc::from(name),
            predicate: Arc::new(predicate),
        }
    }

    pub fn status_is(name: &str, status: u16) -> Self {
        Self::new(name, move |res| res.status == status)
    }

    pub fn run(&self, res: &ResponseView) -> bool {
        (self.predicate)(res)
    }
}

impl fmt::Debug for Check {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Check").field("name", &self.name).finish()
    }
}

/// One HTTP call inside a group.
#[derive(Debug, Clone)]
pub struct HttpCall {
    pub method: http::Method,

    /// Target URL. A `{id}` placeholder is substituted with a uniformly
    /// random id in `1..=random_id_max` on each iteration.
    pub url: String,
    pub random_id_max: Option<u64>,

    pub headers: Vec<(String, String)>,
    pub timeout: Option<Duration>,

    /// Tags stamped on every sample this call emits (e.g. endpoint, method).
    pub tags: Vec<(String, String)>,

    /// Custom trend receiving this call's duration, alongside the global
    /// latency metric.
    pub latency_trend: Option<String>,

    pub checks: Vec<Check>,
}

impl HttpCall {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: http::Method::GET,
            url: url.into(),
            random_id_max: None,
            headers: Vec::new(),
            timeout: None,
            tags: Vec::new(),
            latency_trend: None,
            checks: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn with_random_id(mut self, max: u64) -> Self {
        self.random_id_max = Some(max);
        self
    }

    #[must_use]
    pub fn with_tag(mut self, key: &str, value: &str) -> Self {
        self.tags.push((key.to_string(), value.to_string()));
        self
    }

    #[must_use]
    pub fn with_latency_trend(mut self, metric: &str) -> Self {
        self.latency_trend = Some(metric.to_string());
        self
    }

    #[must_use]
    pub fn with_check(mut self, check: Check) -> Self {
        self.checks.push(check);
        self
    }
}

/// Named group of calls; the group outcome (all checks passed) feeds the
/// flow's `ok_rate`/`errors` bindings when configured.
#[derive(Debug, Clone)]
pub struct FlowGroup {
    pub name: String,
    pub calls: Vec<HttpCall>,
}

impl FlowGroup {
    pub fn new(name: &str, calls: Vec<HttpCall>) -> Self {
        Self {
            name: name.to_string(),
            calls,
        }
    }
}

/// Ordered sequence of groups a worker executes per iteration.
#[derive(Debug, Clone, Default)]
pub struct Flow {
    pub groups: Vec<FlowGroup>,

    /// Rate metric recording each group's overall outcome.
    pub ok_rate_metric: Option<String>,

    /// Counter incremented once per failed group.
    pub errors_metric: Option<String>,
}

impl Flow {
    pub fn new(groups: Vec<FlowGroup>) -> Self {
        Self {
            groups,
            ok_rate_metric: None,
            errors_metric: None,
        }
    }

    #[must_use]
    pub fn with_group_outcome_metrics(mut self, ok_rate: &str, errors: &str) -> Self {
        self.ok_rate_metric = Some(ok_rate.to_string());
        self.errors_metric = Some(errors.to_string());
        self
    }
}
