//! In-memory representation of coverage data as the overlay needs it:
//! per-line verdicts for a single file, head-side verdicts for the changed
//! lines of a pull request, and the raw response shapes they are decoded
//! from.

use std::collections::BTreeMap;

use serde::Deserialize;

use crate::error::CovlayError;

/// Compute a coverage rate, returning 0.0 when the total is zero.
#[must_use]
pub fn rate(covered: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        covered as f64 / total as f64
    }
}

/// Tri-state verdict for one line.
///
/// Ordered by precedence: a merge keeps the greatest status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize)]
#[serde(try_from = "u8")]
pub enum CoverageStatus {
    Uncovered,
    Partial,
    Covered,
}

impl CoverageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CoverageStatus::Covered => "covered",
            CoverageStatus::Uncovered => "uncovered",
            CoverageStatus::Partial => "partial",
        }
    }
}

impl TryFrom<u8> for CoverageStatus {
    type Error = CovlayError;

    /// Wire encoding used by the coverage service: 0 hit, 1 miss, 2 partial.
    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            0 => Ok(CoverageStatus::Covered),
            1 => Ok(CoverageStatus::Uncovered),
            2 => Ok(CoverageStatus::Partial),
            other => Err(CovlayError::Decode(format!(
                "unknown coverage status {other}"
            ))),
        }
    }
}

impl std::fmt::Display for CoverageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-line coverage of a single file, keyed by 1-based line number.
///
/// A line missing from the map has no data, which is not the same as
/// [`CoverageStatus::Uncovered`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LineCoverage {
    lines: BTreeMap<u32, CoverageStatus>,
}

impl LineCoverage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, line: u32, status: CoverageStatus) {
        self.lines.insert(line, status);
    }

    #[must_use]
    pub fn get(&self, line: u32) -> Option<CoverageStatus> {
        self.lines.get(&line).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, CoverageStatus)> + '_ {
        self.lines.iter().map(|(line, status)| (*line, *status))
    }

    /// Number of lines with the given status.
    pub fn count(&self, status: CoverageStatus) -> usize {
        self.lines.values().filter(|s| **s == status).count()
    }
}

impl FromIterator<(u32, CoverageStatus)> for LineCoverage {
    fn from_iter<I: IntoIterator<Item = (u32, CoverageStatus)>>(iter: I) -> Self {
        Self {
            lines: iter.into_iter().collect(),
        }
    }
}

// ---------------------------------------------------------------------------
// Raw report responses
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Totals {
    #[serde(default)]
    pub coverage: Option<f64>,
}

/// Body of the file report endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FileReportResponse {
    #[serde(default)]
    pub files: Vec<FileReportEntry>,
    #[serde(default)]
    pub totals: Option<Totals>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FileReportEntry {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub line_coverage: Vec<(u32, CoverageStatus)>,
    #[serde(default)]
    pub totals: Option<Totals>,
}

impl FileReportResponse {
    /// Line coverage of the requested file; empty when the file is not in
    /// the report.
    #[must_use]
    pub fn line_coverage(&self) -> LineCoverage {
        self.files
            .first()
            .map(|file| file.line_coverage.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Coverage percentage as reported by the service, preferring the
    /// per-file totals.
    #[must_use]
    pub fn reported_coverage(&self) -> Option<f64> {
        self.files
            .first()
            .and_then(|file| file.totals.as_ref())
            .and_then(|t| t.coverage)
            .or_else(|| self.totals.as_ref().and_then(|t| t.coverage))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct HeadBase<T> {
    pub head: Option<T>,
    pub base: Option<T>,
}

impl<T> Default for HeadBase<T> {
    fn default() -> Self {
        Self {
            head: None,
            base: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PullLineEntry {
    pub number: HeadBase<u32>,
    #[serde(default)]
    pub added: bool,
    #[serde(default)]
    pub coverage: HeadBase<CoverageStatus>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PullFileEntry {
    pub name: HeadBase<String>,
    #[serde(default)]
    pub has_diff: bool,
    #[serde(default)]
    pub lines: Vec<PullLineEntry>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PullTotalsEntry {
    #[serde(default)]
    pub base: Option<Totals>,
    #[serde(default)]
    pub head: Option<Totals>,
    #[serde(default)]
    pub patch: Option<Totals>,
}

/// Body of the pull request comparison endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PullReportResponse {
    #[serde(default)]
    pub files: Option<Vec<PullFileEntry>>,
    #[serde(default)]
    pub totals: Option<PullTotalsEntry>,
}

/// Headline numbers of a pull request comparison.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PullTotals {
    pub base: f64,
    pub head: f64,
    pub patch: f64,
}

impl PullTotals {
    #[must_use]
    pub fn change(&self) -> f64 {
        self.head - self.base
    }
}

impl PullReportResponse {
    /// All three totals, or `None` when any of them is missing.
    #[must_use]
    pub fn totals(&self) -> Option<PullTotals> {
        let totals = self.totals.as_ref()?;
        let pick = |t: &Option<Totals>| t.as_ref().and_then(|t| t.coverage);
        Some(PullTotals {
            base: pick(&totals.base)?,
            head: pick(&totals.head)?,
            patch: pick(&totals.patch)?,
        })
    }
}

/// Head-side coverage of the added lines of a pull request, keyed by head
/// file path.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PullCoverageReport {
    files: BTreeMap<String, LineCoverage>,
}

impl PullCoverageReport {
    /// Keep only files with a diff and, within them, only added lines that
    /// have a head line number and a head verdict.
    pub fn from_response(response: &PullReportResponse) -> Self {
        let mut files = BTreeMap::new();
        for file in response.files.iter().flatten().filter(|f| f.has_diff) {
            let Some(path) = file.name.head.clone() else {
                continue;
            };
            let lines: LineCoverage = file
                .lines
                .iter()
                .filter(|l| l.added)
                .filter_map(|l| Some((l.number.head?, l.coverage.head?)))
                .collect();
            files.insert(path, lines);
        }
        Self { files }
    }

    #[must_use]
    pub fn status(&self, path: &str, line: u32) -> Option<CoverageStatus> {
        self.files.get(path).and_then(|lines| lines.get(line))
    }

    pub fn files(&self) -> impl Iterator<Item = (&str, &LineCoverage)> {
        self.files.iter().map(|(path, lines)| (path.as_str(), lines))
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Page metadata
// ---------------------------------------------------------------------------

/// Reference a file view is pinned to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GitRef {
    Commit(String),
    Branch(String),
}

impl GitRef {
    pub fn as_str(&self) -> &str {
        match self {
            GitRef::Commit(s) | GitRef::Branch(s) => s,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoMetadata {
    pub owner: String,
    pub repo: String,
}

/// Identifies the file whose coverage is displayed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMetadata {
    pub owner: String,
    pub repo: String,
    pub path: String,
    pub reference: GitRef,
}

impl FileMetadata {
    pub fn repo(&self) -> RepoMetadata {
        RepoMetadata {
            owner: self.owner.clone(),
            repo: self.repo.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullMetadata {
    pub owner: String,
    pub repo: String,
    pub pull_id: u64,
}
