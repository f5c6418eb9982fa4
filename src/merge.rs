//! Combine per-flag or per-component reports into one verdict per line.
//!
//! A line reads as covered when any selected flag or component exercises
//! it, so the merge is a union under `Covered > Partial > Uncovered`.

use crate::model::{rate, CoverageStatus, LineCoverage};

/// Merge two reports. Lines present in only one side keep that side's
/// status.
#[must_use]
pub fn merge_pair(a: &LineCoverage, b: &LineCoverage) -> LineCoverage {
    let mut merged = a.clone();
    for (line, status) in b.iter() {
        let resolved = match merged.get(line) {
            Some(existing) => existing.max(status),
            None => status,
        };
        merged.insert(line, resolved);
    }
    merged
}

/// Merge any number of reports. No input yields an empty report; a single
/// input is returned unchanged.
#[must_use]
pub fn merge(reports: &[LineCoverage]) -> LineCoverage {
    match reports {
        [] => LineCoverage::new(),
        [only] => only.clone(),
        [first, rest @ ..] => rest
            .iter()
            .fold(first.clone(), |acc, next| merge_pair(&acc, next)),
    }
}

/// Percentage of lines with data that are strictly covered, or `None` when
/// the report has no lines.
#[must_use]
pub fn coverage_percentage(report: &LineCoverage) -> Option<f64> {
    if report.is_empty() {
        return None;
    }
    let covered = report.count(CoverageStatus::Covered) as u64;
    Some(rate(covered, report.len() as u64) * 100.0)
}
