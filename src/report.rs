//! Text shown to the user: the coverage indicator of a file view, the
//! summary of a pull request, and the terminal output of the CLI.

use std::fmt::{self, Write};

use crate::merge::{coverage_percentage, merge};
use crate::model::{CoverageStatus, FileReportResponse, LineCoverage, PullCoverageReport, PullTotals};

pub const PR_LOADING_TEXT: &str = "Loading coverage report...";
pub const PR_NOT_AVAILABLE_TEXT: &str = "Coverage report not available";
pub const HIDE_COVERAGE_TEXT: &str = "Hide Coverage";
pub const SHOW_COVERAGE_TEXT: &str = "Show Coverage";

/// State of the file view indicator.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Indicator {
    Loading,
    Percentage(f64),
    /// The file is not in an otherwise valid report.
    NotAvailable,
    Failed,
}

impl fmt::Display for Indicator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Indicator::Loading => f.write_str("Coverage: ..."),
            Indicator::Percentage(pct) => write!(f, "Coverage: {pct:.2}%"),
            Indicator::NotAvailable => f.write_str("Coverage: N/A"),
            Indicator::Failed => f.write_str("Coverage: ⚠"),
        }
    }
}

/// Signed change with two decimals; gains carry a leading `+`.
#[must_use]
pub fn display_change(change: f64) -> String {
    let fixed = format!("{change:.2}");
    if change <= 0.0 {
        fixed
    } else {
        format!("+{fixed}")
    }
}

/// `Head`, `Patch` and `Change` entries of the pull request summary.
#[must_use]
pub fn pull_summary(totals: &PullTotals) -> [String; 3] {
    [
        format!("Head: {:.2}%", totals.head),
        format!("Patch: {:.2}%", totals.patch),
        format!("Change: {}%", display_change(totals.change())),
    ]
}

/// Merged coverage of one file, ready to be shown.
#[derive(Debug, Clone, PartialEq)]
pub struct FileCoverage {
    pub path: String,
    pub lines: LineCoverage,
    pub indicator: Indicator,
}

impl FileCoverage {
    #[must_use]
    pub fn format(&self, formatter: &dyn ReportFormatter) -> String {
        formatter.format_file(self)
    }
}

/// Merge the fetched reports of one file and pick the indicator.
///
/// An unfiltered pass shows the percentage the service computed for the
/// file; filtered passes show the share of strictly covered lines of the
/// merged report.
pub fn summarize_file(path: &str, responses: &[FileReportResponse], filtered: bool) -> FileCoverage {
    let reports: Vec<LineCoverage> = responses.iter().map(|r| r.line_coverage()).collect();
    let lines = merge(&reports);

    let indicator = if lines.is_empty() {
        Indicator::NotAvailable
    } else {
        let reported = match responses {
            [single] if !filtered => single.reported_coverage(),
            _ => None,
        };
        reported
            .or_else(|| coverage_percentage(&lines))
            .map_or(Indicator::NotAvailable, Indicator::Percentage)
    };

    FileCoverage {
        path: path.to_string(),
        lines,
        indicator,
    }
}

/// Comparison of a pull request, ready to be shown.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PullCoverage {
    pub totals: Option<PullTotals>,
    pub report: PullCoverageReport,
}

impl PullCoverage {
    #[must_use]
    pub fn format(&self, formatter: &dyn ReportFormatter) -> String {
        formatter.format_pull(self)
    }
}

/// Renders coverage for a terminal or for a pull request comment.
pub trait ReportFormatter {
    fn format_file(&self, file: &FileCoverage) -> String;
    fn format_pull(&self, pull: &PullCoverage) -> String;
}

fn lines_with(lines: &LineCoverage, status: CoverageStatus) -> Vec<u32> {
    lines
        .iter()
        .filter(|(_, s)| *s == status)
        .map(|(line, _)| line)
        .collect()
}

fn instrumented(lines: &LineCoverage) -> Vec<u32> {
    lines.iter().map(|(line, _)| line).collect()
}

/// Plain text formatter.
pub struct TextFormatter;

impl ReportFormatter for TextFormatter {
    fn format_file(&self, file: &FileCoverage) -> String {
        let mut out = String::new();
        writeln!(out, "{}", file.path).unwrap();
        writeln!(out, "{}", file.indicator).unwrap();
        if file.lines.is_empty() {
            return out;
        }

        let all = instrumented(&file.lines);
        for status in [CoverageStatus::Uncovered, CoverageStatus::Partial] {
            let matching = lines_with(&file.lines, status);
            if !matching.is_empty() {
                let ranges = format_line_ranges(&matching, &all);
                writeln!(out, "{:<10} {ranges}", format!("{status}:")).unwrap();
            }
        }

        out.push('\n');
        writeln!(out, "{:>6}  STATUS", "LINE").unwrap();
        writeln!(out, "{}", "-".repeat(18)).unwrap();
        for (line, status) in file.lines.iter() {
            writeln!(out, "{line:>6}  {status}").unwrap();
        }
        out
    }

    fn format_pull(&self, pull: &PullCoverage) -> String {
        let mut out = String::new();
        let Some(totals) = &pull.totals else {
            writeln!(out, "{PR_NOT_AVAILABLE_TEXT}").unwrap();
            return out;
        };
        for entry in pull_summary(totals) {
            writeln!(out, "{entry}").unwrap();
        }

        let files: Vec<_> = pull.report.files().filter(|(_, lines)| !lines.is_empty()).collect();
        if files.is_empty() {
            return out;
        }
        out.push('\n');
        for (path, lines) in files {
            let covered = lines.count(CoverageStatus::Covered);
            let total = lines.len();
            let missed = lines_with(lines, CoverageStatus::Uncovered);
            write!(out, "  {path}  {covered}/{total} covered").unwrap();
            if !missed.is_empty() {
                let ranges = format_line_ranges(&missed, &instrumented(lines));
                write!(out, "  uncovered: {ranges}").unwrap();
            }
            out.push('\n');
        }
        out
    }
}

/// Markdown formatter.
pub struct MarkdownFormatter;

impl ReportFormatter for MarkdownFormatter {
    fn format_file(&self, file: &FileCoverage) -> String {
        let mut md = String::new();
        writeln!(md, "### {}\n", file.indicator).unwrap();
        writeln!(md, "`{}`", file.path).unwrap();
        let missed = lines_with(&file.lines, CoverageStatus::Uncovered);
        if !missed.is_empty() {
            let ranges = format_line_ranges(&missed, &instrumented(&file.lines));
            writeln!(md, "\n**Uncovered lines**: {ranges}").unwrap();
        }
        md
    }

    fn format_pull(&self, pull: &PullCoverage) -> String {
        let mut md = String::new();
        let Some(totals) = &pull.totals else {
            writeln!(md, "_{PR_NOT_AVAILABLE_TEXT}_").unwrap();
            return md;
        };
        let [head, patch, change] = pull_summary(totals);
        writeln!(md, "### {head} | {patch} | {change}\n").unwrap();

        let files: Vec<_> = pull
            .report
            .files()
            .filter(|(_, lines)| lines.count(CoverageStatus::Uncovered) > 0)
            .collect();
        if files.is_empty() {
            md.push_str("All changed lines are covered! 🎉\n");
            return md;
        }
        md.push_str("| File | Uncovered lines |\n");
        md.push_str("|:-----|:----------------|\n");
        for (path, lines) in files {
            let missed = lines_with(lines, CoverageStatus::Uncovered);
            let ranges = format_line_ranges(&missed, &instrumented(lines));
            writeln!(md, "| `{path}` | {ranges} |").unwrap();
        }
        md
    }
}

/// Widest run of lines without coverage data that still joins two ranges.
const MAX_BRIDGE_GAP: u32 = 2;

/// Coalesce sorted line numbers into `(start, end)` ranges. A gap is
/// bridged when it is at most [`MAX_BRIDGE_GAP`] lines wide and none of
/// the gap lines has coverage data.
///
/// Both slices must be sorted and deduplicated.
#[must_use]
pub fn coalesce_ranges(lines: &[u32], with_data: &[u32]) -> Vec<(u32, u32)> {
    let Some((&first, rest)) = lines.split_first() else {
        return Vec::new();
    };

    let mut ranges = Vec::new();
    let (mut start, mut end) = (first, first);
    for &line in rest {
        let gap = line - end - 1;
        if gap <= MAX_BRIDGE_GAP && (end + 1..line).all(|l| with_data.binary_search(&l).is_err()) {
            end = line;
        } else {
            ranges.push((start, end));
            start = line;
            end = line;
        }
    }
    ranges.push((start, end));
    ranges
}

/// Compact range notation, e.g. "1, 3-5, 8".
#[must_use]
pub fn format_line_ranges(lines: &[u32], with_data: &[u32]) -> String {
    coalesce_ranges(lines, with_data)
        .iter()
        .map(|&(start, end)| {
            if start == end {
                start.to_string()
            } else {
                format!("{start}-{end}")
            }
        })
        .collect::<Vec<_>>()
        .join(", ")
}
