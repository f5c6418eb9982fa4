//! Turn page metadata into background requests and decode the answers.
//!
//! Stateless: every call sends fresh messages. Caching of flag and
//! component lists is the background service's business.

use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::debug;

use crate::error::{CovlayError, Result};
use crate::message::{Background, PullQuery, ReportQuery, RepoQuery, Request, Response};
use crate::model::{FileMetadata, FileReportResponse, GitRef, PullMetadata, PullReportResponse, RepoMetadata};

/// Restricts a file report to one flag or one component.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReportFilter {
    Unfiltered,
    Flag(String),
    Component(String),
}

#[derive(Deserialize)]
struct FlagsPage {
    #[serde(default)]
    results: Vec<FlagEntry>,
}

#[derive(Deserialize)]
struct FlagEntry {
    flag_name: String,
}

#[derive(Deserialize)]
struct ComponentEntry {
    component_id: String,
}

fn decode<T: DeserializeOwned>(what: &str, response: Response) -> Result<T> {
    if !response.ok {
        return Err(CovlayError::Service(what.to_string()));
    }
    serde_json::from_value(response.data).map_err(|e| CovlayError::Decode(format!("{what}: {e}")))
}

fn report_query(metadata: &FileMetadata, filter: &ReportFilter) -> ReportQuery {
    let (flag, component_id) = match filter {
        ReportFilter::Unfiltered => (None, None),
        ReportFilter::Flag(flag) => (Some(flag.clone()), None),
        ReportFilter::Component(id) => (None, Some(id.clone())),
    };
    ReportQuery {
        owner: metadata.owner.clone(),
        repo: metadata.repo.clone(),
        path: metadata.path.clone(),
        sha: None,
        branch: None,
        flag,
        component_id,
    }
}

/// Fetch the report of one file. A commit reference is queried by `sha`
/// first; when the service rejects that, the same ref is retried as a
/// branch name.
pub async fn fetch_file_report<B: Background + ?Sized>(
    background: &B,
    metadata: &FileMetadata,
    filter: &ReportFilter,
) -> Result<FileReportResponse> {
    let what = format!("report of {}", metadata.path);
    let query = report_query(metadata, filter);

    let response = match &metadata.reference {
        GitRef::Commit(sha) => {
            let by_sha = background
                .send(Request::FetchCommitReport(ReportQuery {
                    sha: Some(sha.clone()),
                    ..query.clone()
                }))
                .await?;
            if by_sha.ok {
                by_sha
            } else {
                debug!(sha = %sha, "commit query rejected, retrying as branch");
                background
                    .send(Request::FetchCommitReport(ReportQuery {
                        branch: Some(sha.clone()),
                        ..query
                    }))
                    .await?
            }
        }
        GitRef::Branch(branch) => {
            background
                .send(Request::FetchCommitReport(ReportQuery {
                    branch: Some(branch.clone()),
                    ..query
                }))
                .await?
        }
    };

    decode(&what, response)
}

pub async fn fetch_pr_report<B: Background + ?Sized>(
    background: &B,
    pull: &PullMetadata,
) -> Result<PullReportResponse> {
    let response = background
        .send(Request::FetchPrComparison(PullQuery {
            owner: pull.owner.clone(),
            repo: pull.repo.clone(),
            pullid: pull.pull_id,
        }))
        .await?;
    decode(&format!("comparison of pull {}", pull.pull_id), response)
}

fn repo_query(repo: &RepoMetadata) -> RepoQuery {
    RepoQuery {
        owner: repo.owner.clone(),
        repo: repo.repo.clone(),
    }
}

pub async fn fetch_flags<B: Background + ?Sized>(
    background: &B,
    repo: &RepoMetadata,
) -> Result<Vec<String>> {
    let response = background
        .send(Request::FetchFlagsList(repo_query(repo)))
        .await?;
    let page: FlagsPage = decode("flag list", response)?;
    Ok(page.results.into_iter().map(|f| f.flag_name).collect())
}

pub async fn fetch_components<B: Background + ?Sized>(
    background: &B,
    repo: &RepoMetadata,
) -> Result<Vec<String>> {
    let response = background
        .send(Request::FetchComponentsList(repo_query(repo)))
        .await?;
    let entries: Vec<ComponentEntry> = decode("component list", response)?;
    Ok(entries.into_iter().map(|c| c.component_id).collect())
}
