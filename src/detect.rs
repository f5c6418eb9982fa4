/// Detection of what the current page is.
///
/// Strategy:
///   1. Classify the URL (file view or pull request files view) and pull
///      the repository coordinates out of it
///   2. For pull requests, look at the DOM once per pass to tell which
///      generation of the files UI is rendered
use std::sync::LazyLock;

use regex::Regex;

use crate::dom::{Document, NodeId, Selector};
use crate::model::{FileMetadata, GitRef, PullMetadata, RepoMetadata};

static FILE_URL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:https?://[^/]+)?/(?P<owner>[^/]+)/(?P<repo>[^/]+)/blob/(?P<ref>[^/]+)/(?P<path>[^?#]+)")
        .unwrap()
});

static PULL_URL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:https?://[^/]+)?/(?P<owner>[^/]+)/(?P<repo>[^/]+)/pull/(?P<id>\d+)/files")
        .unwrap()
});

static COMMIT_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[0-9a-f]{4,40}$").unwrap());

pub const MODERN_TOOLBAR_SELECTOR: &str = "section[class*=' PullRequestFilesToolbar-module__toolbar']";

static MODERN_TOOLBAR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(MODERN_TOOLBAR_SELECTOR).unwrap());

/// A page the overlay knows how to annotate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Page {
    File(FileMetadata),
    Pull(PullMetadata),
}

impl Page {
    pub fn repo(&self) -> RepoMetadata {
        match self {
            Page::File(meta) => meta.repo(),
            Page::Pull(pull) => RepoMetadata {
                owner: pull.owner.clone(),
                repo: pull.repo.clone(),
            },
        }
    }
}

/// Which generation of the pull request files UI is rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    Legacy,
    Modern,
}

impl Layout {
    pub fn as_str(&self) -> &'static str {
        match self {
            Layout::Legacy => "legacy",
            Layout::Modern => "modern",
        }
    }
}

impl std::fmt::Display for Layout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

pub fn detect_page(url: &str) -> Option<Page> {
    if let Some(pull) = parse_pull_url(url) {
        return Some(Page::Pull(pull));
    }
    parse_file_url(url).map(Page::File)
}

pub fn parse_file_url(url: &str) -> Option<FileMetadata> {
    let caps = FILE_URL_RE.captures(url)?;
    let reference = &caps["ref"];
    let reference = if COMMIT_RE.is_match(reference) {
        GitRef::Commit(reference.to_string())
    } else {
        GitRef::Branch(reference.to_string())
    };
    Some(FileMetadata {
        owner: caps["owner"].to_string(),
        repo: caps["repo"].to_string(),
        path: caps["path"].to_string(),
        reference,
    })
}

pub fn parse_pull_url(url: &str) -> Option<PullMetadata> {
    let caps = PULL_URL_RE.captures(url)?;
    Some(PullMetadata {
        owner: caps["owner"].to_string(),
        repo: caps["repo"].to_string(),
        pull_id: caps["id"].parse().ok()?,
    })
}

/// Toolbar of the modern pull request files UI, if rendered.
pub fn modern_toolbar(doc: &Document) -> Option<NodeId> {
    doc.query_selector(&MODERN_TOOLBAR)
}

pub fn detect_layout(doc: &Document) -> Layout {
    if modern_toolbar(doc).is_some() {
        Layout::Modern
    } else {
        Layout::Legacy
    }
}
