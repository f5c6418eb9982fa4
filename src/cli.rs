//! Command handler functions for the covlay CLI.
//!
//! Each `cmd_*` function returns its output as a `String`, making them easy
//! to test without capturing stdout.

use std::fmt::Write;

use anyhow::{anyhow, Context, Result};
use clap::ValueEnum;
use futures::future::try_join_all;

use crate::detect::{detect_page, parse_file_url, parse_pull_url};
use crate::fetch::{fetch_components, fetch_file_report, fetch_flags, fetch_pr_report};
use crate::message::Background;
use crate::model::{PullCoverageReport, RepoMetadata};
use crate::report::{summarize_file, MarkdownFormatter, PullCoverage, ReportFormatter, TextFormatter};
use crate::selection::Selection;
use crate::storage::Storage;

/// Output style for the `file` and `pr` commands.
#[derive(Clone, Copy, ValueEnum)]
pub enum Style {
    Text,
    Markdown,
}

impl Style {
    fn formatter(self) -> &'static dyn ReportFormatter {
        match self {
            Style::Text => &TextFormatter,
            Style::Markdown => &MarkdownFormatter,
        }
    }
}

fn repo_of(url: &str) -> Result<RepoMetadata> {
    detect_page(url)
        .map(|page| page.repo())
        .ok_or_else(|| anyhow!("'{url}' is neither a file view nor a pull request files view"))
}

/// Coverage of the file shown at `url`. Explicit flags or components take
/// precedence over the stored selection.
pub async fn cmd_file<B, S>(
    background: &B,
    storage: &S,
    url: &str,
    flags: &[String],
    components: &[String],
    style: Style,
) -> Result<String>
where
    B: Background + ?Sized,
    S: Storage + ?Sized,
{
    let meta = parse_file_url(url).ok_or_else(|| anyhow!("'{url}' is not a file view URL"))?;
    let selection = if !flags.is_empty() {
        Selection::flags(flags.iter().cloned())
    } else if !components.is_empty() {
        Selection::components(components.iter().cloned())
    } else {
        Selection::load(storage)
            .await
            .context("Failed to read the stored selection")?
    };

    let filters = selection.filters();
    let responses = try_join_all(
        filters
            .iter()
            .map(|filter| fetch_file_report(background, &meta, filter)),
    )
    .await
    .with_context(|| format!("Failed to fetch coverage of {}", meta.path))?;

    let file = summarize_file(&meta.path, &responses, selection.is_filtered());
    Ok(file.format(style.formatter()))
}

pub async fn cmd_pr<B: Background + ?Sized>(background: &B, url: &str, style: Style) -> Result<String> {
    let pull = parse_pull_url(url)
        .ok_or_else(|| anyhow!("'{url}' is not a pull request files view URL"))?;
    let response = fetch_pr_report(background, &pull)
        .await
        .with_context(|| format!("Failed to fetch the comparison of pull {}", pull.pull_id))?;

    let pull = PullCoverage {
        totals: response.files.as_ref().and(response.totals()),
        report: PullCoverageReport::from_response(&response),
    };
    Ok(pull.format(style.formatter()))
}

pub async fn cmd_flags<B: Background + ?Sized>(background: &B, url: &str) -> Result<String> {
    let repo = repo_of(url)?;
    let flags = fetch_flags(background, &repo)
        .await
        .context("Failed to list flags")?;
    Ok(list_output("flags", &repo, &flags))
}

pub async fn cmd_components<B: Background + ?Sized>(background: &B, url: &str) -> Result<String> {
    let repo = repo_of(url)?;
    let components = fetch_components(background, &repo)
        .await
        .context("Failed to list components")?;
    Ok(list_output("components", &repo, &components))
}

fn list_output(what: &str, repo: &RepoMetadata, names: &[String]) -> String {
    if names.is_empty() {
        return format!("No {what} configured for {}/{}\n", repo.owner, repo.repo);
    }
    let mut out = String::new();
    for name in names {
        writeln!(out, "{name}").unwrap();
    }
    out
}

/// Persist a selection. Selecting one kind clears the other.
pub async fn cmd_select<S: Storage + ?Sized>(
    storage: &S,
    url: &str,
    flags: &[String],
    components: &[String],
    clear: bool,
) -> Result<String> {
    let repo = repo_of(url)?;
    let selection = if clear {
        Selection::None
    } else if !flags.is_empty() {
        Selection::flags(flags.iter().cloned())
    } else if !components.is_empty() {
        Selection::components(components.iter().cloned())
    } else {
        anyhow::bail!("Nothing to select: pass --flag, --component or --clear");
    };
    selection
        .save(storage)
        .await
        .context("Failed to store the selection")?;

    let join = |names: &std::collections::BTreeSet<String>| {
        names.iter().cloned().collect::<Vec<_>>().join(", ")
    };
    let out = match &selection {
        Selection::None => format!("Cleared selection for {}/{}\n", repo.owner, repo.repo),
        Selection::Flags(names) => format!("Selected flags: {}\n", join(names)),
        Selection::Components(names) => format!("Selected components: {}\n", join(names)),
    };
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result as CovlayResult;
    use crate::message::{Request, Response};
    use crate::storage::MemoryStorage;
    use async_trait::async_trait;
    use serde_json::json;

    struct Fixed;

    #[async_trait(?Send)]
    impl Background for Fixed {
        async fn send(&self, request: Request) -> CovlayResult<Response> {
            Ok(match request {
                Request::FetchCommitReport(q) if q.flag.as_deref() == Some("unit") => {
                    Response::ok(json!({"files": [{"line_coverage": [[1, 0], [2, 1]]}]}))
                }
                Request::FetchCommitReport(_) => Response::ok(json!({
                    "files": [{"line_coverage": [[1, 0], [2, 1], [3, 2]], "totals": {"coverage": 66.67}}]
                })),
                Request::FetchFlagsList(_) => Response::ok(json!({"results": [{"flag_name": "unit"}]})),
                Request::FetchComponentsList(_) => Response::ok(json!([])),
                Request::FetchPrComparison(_) => Response::failed(json!({"detail": "Not found."})),
            })
        }
    }

    const FILE_URL: &str = "https://github.com/acme/widgets/blob/main/src/a.js";

    #[tokio::test]
    async fn test_cmd_file_unfiltered() {
        let storage = MemoryStorage::new();
        let out = cmd_file(&Fixed, &storage, FILE_URL, &[], &[], Style::Text).await.unwrap();
        assert!(out.starts_with("src/a.js\nCoverage: 66.67%\n"));
    }

    #[tokio::test]
    async fn test_cmd_file_uses_stored_selection() {
        let storage = MemoryStorage::new();
        cmd_select(&storage, FILE_URL, &["unit".to_string()], &[], false)
            .await
            .unwrap();
        let out = cmd_file(&Fixed, &storage, FILE_URL, &[], &[], Style::Text).await.unwrap();
        assert!(out.contains("Coverage: 50.00%"));
    }

    #[tokio::test]
    async fn test_cmd_file_rejects_other_urls() {
        let storage = MemoryStorage::new();
        let err = cmd_file(&Fixed, &storage, "https://github.com/acme", &[], &[], Style::Text)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("not a file view URL"));
    }

    #[tokio::test]
    async fn test_cmd_lists() {
        assert_eq!(cmd_flags(&Fixed, FILE_URL).await.unwrap(), "unit\n");
        assert_eq!(
            cmd_components(&Fixed, FILE_URL).await.unwrap(),
            "No components configured for acme/widgets\n"
        );
    }

    #[tokio::test]
    async fn test_cmd_pr_failure_has_context() {
        let err = cmd_pr(&Fixed, "https://github.com/acme/widgets/pull/3/files", Style::Text)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("comparison of pull 3"));
    }

    #[tokio::test]
    async fn test_cmd_select() {
        let storage = MemoryStorage::new();
        let out = cmd_select(&storage, FILE_URL, &[], &["api".to_string()], false)
            .await
            .unwrap();
        assert_eq!(out, "Selected components: api\n");
        let out = cmd_select(&storage, FILE_URL, &[], &[], true).await.unwrap();
        assert_eq!(out, "Cleared selection for acme/widgets\n");
        assert_eq!(Selection::load(&storage).await.unwrap(), Selection::None);
        assert!(cmd_select(&storage, FILE_URL, &[], &[], false).await.is_err());
    }
}
