//! HTTP implementation of the background side: answers [`Request`]s by
//! calling the coverage service's v2 API.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tracing::{debug, warn};

use crate::config::{ServiceConfig, LIST_CACHE_TTL_SECS};
use crate::error::{CovlayError, Result};
use crate::message::{decode_request, Background, ReportQuery, RepoQuery, Request, Response};

/// Responses remembered until they are older than the TTL.
#[derive(Debug)]
pub struct TtlCache {
    ttl: Duration,
    entries: HashMap<String, (DateTime<Utc>, Response)>,
}

impl TtlCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&mut self, key: &str, now: DateTime<Utc>) -> Option<Response> {
        match self.entries.get(key) {
            Some((stored_at, response)) if now - *stored_at < self.ttl => Some(response.clone()),
            Some(_) => {
                self.entries.remove(key);
                None
            }
            None => None,
        }
    }

    /// Store `response` under `key`, dropping every entry that has expired by `now`.
    pub fn insert(&mut self, key: String, now: DateTime<Utc>, response: Response) {
        let ttl = self.ttl;
        self.entries.retain(|_, (stored_at, _)| now - *stored_at < ttl);
        self.entries.insert(key, (now, response));
    }
}

struct Inner {
    agent: ureq::Agent,
    config: ServiceConfig,
    cache: Mutex<TtlCache>,
}

/// Background service talking to a Codecov-compatible API.
#[derive(Clone)]
pub struct CodecovService {
    inner: Arc<Inner>,
}

impl CodecovService {
    pub fn new(config: ServiceConfig) -> Self {
        Self::with_agent(config, ureq::AgentBuilder::new().user_agent("covlay").build())
    }

    pub fn with_agent(config: ServiceConfig, agent: ureq::Agent) -> Self {
        Self {
            inner: Arc::new(Inner {
                agent,
                config,
                cache: Mutex::new(TtlCache::new(Duration::seconds(LIST_CACHE_TTL_SECS))),
            }),
        }
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.inner.config
    }

    /// Answer a raw message from the messaging channel. Blocks.
    pub fn handle_raw(&self, raw: &str) -> Result<Response> {
        let request = decode_request(raw)?;
        self.inner.handle(request)
    }
}

#[async_trait(?Send)]
impl Background for CodecovService {
    async fn send(&self, request: Request) -> Result<Response> {
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || inner.handle(request))
            .await
            .map_err(|e| CovlayError::Other(format!("background task failed: {e}")))?
    }
}

impl Inner {
    fn handle(&self, request: Request) -> Result<Response> {
        debug!(kind = request.kind(), "handling background request");
        match request {
            Request::FetchCommitReport(query) => self.fetch_report(&query),
            Request::FetchPrComparison(query) => {
                let url = self.repo_url(&query.owner, &query.repo, "compare");
                self.get(&url, &[("pullid", query.pullid.to_string())])
            }
            Request::FetchFlagsList(query) => self.cached_list("flags", &query),
            Request::FetchComponentsList(query) => self.cached_list("components", &query),
        }
    }

    fn repo_url(&self, owner: &str, repo: &str, endpoint: &str) -> String {
        format!(
            "{}/{}/{}/repos/{}/{}",
            self.config.api_url, self.config.service, owner, repo, endpoint
        )
    }

    fn fetch_report(&self, query: &ReportQuery) -> Result<Response> {
        let url = self.repo_url(&query.owner, &query.repo, "report");
        let mut params = vec![("path", query.path.clone())];
        let optional = [
            ("sha", &query.sha),
            ("branch", &query.branch),
            ("flag", &query.flag),
            ("component_id", &query.component_id),
        ];
        for (name, value) in optional {
            if let Some(value) = value {
                params.push((name, value.clone()));
            }
        }
        self.get(&url, &params)
    }

    /// Lists change rarely, so successful answers are reused for an hour.
    fn cached_list(&self, endpoint: &str, query: &RepoQuery) -> Result<Response> {
        let key = format!(
            "{}:{}:{}/{}",
            endpoint, self.config.service, query.owner, query.repo
        );
        let now = Utc::now();
        if let Some(hit) = self.lock_cache().get(&key, now) {
            debug!(key = %key, "list cache hit");
            return Ok(hit);
        }
        let url = self.repo_url(&query.owner, &query.repo, endpoint);
        let response = self.get(&url, &[])?;
        if response.ok {
            self.lock_cache().insert(key, now, response.clone());
        }
        Ok(response)
    }

    fn lock_cache(&self) -> std::sync::MutexGuard<'_, TtlCache> {
        // A panic while holding the lock cannot leave the map inconsistent.
        self.cache.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn get(&self, url: &str, params: &[(&str, String)]) -> Result<Response> {
        let mut request = self
            .agent
            .get(url)
            .set("Accept", "application/json");
        if let Some(token) = &self.config.token {
            request = request.set("Authorization", &format!("bearer {}", token));
        }
        for (name, value) in params {
            request = request.query(name, value);
        }

        match request.call() {
            Ok(resp) => Ok(Response::ok(resp.into_json()?)),
            Err(ureq::Error::Status(code, resp)) => {
                warn!(url = %url, status = code, "coverage service returned an error");
                let data = resp.into_json().unwrap_or(serde_json::Value::Null);
                Ok(Response::failed(data))
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_cache_expires_after_ttl() {
        let mut cache = TtlCache::new(Duration::seconds(LIST_CACHE_TTL_SECS));
        let t0 = Utc::now();
        cache.insert("flags:github:acme/widgets".into(), t0, Response::ok(json!({"results": []})));

        assert!(cache
            .get("flags:github:acme/widgets", t0 + Duration::minutes(59))
            .is_some());
        assert!(cache
            .get("flags:github:acme/widgets", t0 + Duration::minutes(60))
            .is_none());
        // Expired entries are dropped.
        assert!(cache.get("flags:github:acme/widgets", t0).is_none());
    }

    #[test]
    fn test_insert_drops_expired_entries() {
        let mut cache = TtlCache::new(Duration::seconds(LIST_CACHE_TTL_SECS));
        let t0 = Utc::now();
        for repo in ["a", "b", "c"] {
            cache.insert(format!("flags:github:acme/{repo}"), t0, Response::ok(json!([])));
        }
        cache.insert("components:github:acme/a".into(), t0 + Duration::minutes(30), Response::ok(json!([])));
        assert_eq!(cache.len(), 4);

        cache.insert("flags:github:acme/d".into(), t0 + Duration::minutes(61), Response::ok(json!([])));
        assert_eq!(cache.len(), 2);
        assert!(cache
            .get("components:github:acme/a", t0 + Duration::minutes(61))
            .is_some());
    }

    #[test]
    fn test_repo_url() {
        let service = CodecovService::new(ServiceConfig::new(
            "https://codecov.corp/api/v2/",
            "github_enterprise",
            None,
        ));
        assert_eq!(
            service.inner.repo_url("acme", "widgets", "report"),
            "https://codecov.corp/api/v2/github_enterprise/acme/repos/widgets/report"
        );
    }

    #[test]
    fn test_handle_raw_rejects_invalid_message() {
        let service = CodecovService::new(ServiceConfig::default());
        let err = service.handle_raw(r#"{"type": "fetch_flags_list"}"#).unwrap_err();
        assert!(matches!(err, CovlayError::Message(_)));
    }
}
