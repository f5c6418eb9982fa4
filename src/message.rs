//! Messages exchanged with the background service.
//!
//! Requests are a closed set; each carries a typed payload. On the wire a
//! request is `{"type": "...", "payload": {...}}` and every answer is the
//! `{ok, data}` envelope.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{CovlayError, Result};

/// Which report a file query asks for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportQuery {
    pub owner: String,
    pub repo: String,
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub component_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullQuery {
    pub owner: String,
    pub repo: String,
    pub pullid: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RepoQuery {
    pub owner: String,
    pub repo: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum Request {
    FetchCommitReport(ReportQuery),
    FetchPrComparison(PullQuery),
    FetchFlagsList(RepoQuery),
    FetchComponentsList(RepoQuery),
}

impl Request {
    pub fn kind(&self) -> &'static str {
        match self {
            Request::FetchCommitReport(_) => "fetch_commit_report",
            Request::FetchPrComparison(_) => "fetch_pr_comparison",
            Request::FetchFlagsList(_) => "fetch_flags_list",
            Request::FetchComponentsList(_) => "fetch_components_list",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub ok: bool,
    #[serde(default)]
    pub data: serde_json::Value,
}

impl Response {
    pub fn ok(data: serde_json::Value) -> Self {
        Self { ok: true, data }
    }

    pub fn failed(data: serde_json::Value) -> Self {
        Self { ok: false, data }
    }
}

/// The privileged side that performs network requests on behalf of the
/// page.
#[async_trait(?Send)]
pub trait Background {
    async fn send(&self, request: Request) -> Result<Response>;
}

/// Decode a raw message as received over the messaging channel.
pub fn decode_request(raw: &str) -> Result<Request> {
    let value: serde_json::Value = serde_json::from_str(raw)?;
    let kind = value
        .get("type")
        .and_then(|t| t.as_str())
        .ok_or_else(|| CovlayError::Message("missing message type".to_string()))?
        .to_string();
    serde_json::from_value(value)
        .map_err(|e| CovlayError::Message(format!("bad '{kind}' message: {e}")))
}
