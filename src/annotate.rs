//! Paint coverage verdicts onto rendered lines, and take the paint off
//! again.
//!
//! File views tint the whole line background. Pull request diffs draw a
//! thin bar on the left edge of the code cell, and only for added lines.

use std::rc::Rc;
use std::sync::LazyLock;

use tracing::debug;

use crate::detect::Layout;
use crate::dom::{Document, NodeId, Selector};
use crate::model::{CoverageStatus, LineCoverage, PullCoverageReport};

pub const FILE_LINE_SELECTOR: &str = ".react-code-line-contents";
pub const LEGACY_DIFF_LINE_SELECTOR: &str = "td.blob-code";
pub const MODERN_DIFF_LINE_SELECTOR: &str = "tr.diff-line-row";

pub const GREEN: &str = "rgb(33,181,119)";
pub const RED: &str = "rgb(245,32,32)";
pub const YELLOW: &str = "rgb(244,176,27)";
pub const GREEN_ALPHA: &str = "rgba(33,181,119,0.25)";
pub const RED_ALPHA: &str = "rgba(245,32,32,0.25)";
pub const YELLOW_ALPHA: &str = "rgba(244,176,27,0.25)";

/// Value restoring the host page's own styling.
pub const NO_COLOR: &str = "inherit";

const BORDER_PREFIX: &str = "inset 2px 0";

fn parse(selector: &str) -> Selector {
    Selector::parse(selector).unwrap()
}

static FILE_LINE: LazyLock<Selector> = LazyLock::new(|| parse(FILE_LINE_SELECTOR));
static LEGACY_DIFF_LINE: LazyLock<Selector> = LazyLock::new(|| parse(LEGACY_DIFF_LINE_SELECTOR));
static MODERN_DIFF_LINE: LazyLock<Selector> = LazyLock::new(|| parse(MODERN_DIFF_LINE_SELECTOR));
static LEGACY_RNUM: LazyLock<Selector> = LazyLock::new(|| parse(".js-blob-rnum"));
static LEGACY_FILE: LazyLock<Selector> = LazyLock::new(|| parse(".js-file"));
static MODERN_LINE_NUMBER: LazyLock<Selector> =
    LazyLock::new(|| parse("td[class*=' diff-line-number']"));
static MODERN_FILE: LazyLock<Selector> =
    LazyLock::new(|| parse("div[class^='Diff-module__diffTargetable']"));
static MODERN_FILE_NAME: LazyLock<Selector> =
    LazyLock::new(|| parse("h3[class^='DiffFileHeader-module__file-name']"));

/// Decorates one kind of line element. The session keeps the annotator of
/// the active pass and hands it to the line observer.
pub trait LineAnnotator {
    /// Elements this annotator handles.
    fn selector(&self) -> &Selector;

    fn annotate(&self, doc: &mut Document, line: NodeId);

    /// Undo [`LineAnnotator::annotate`], whatever the report says.
    fn clear_annotation(&self, doc: &mut Document, line: NodeId);
}

pub fn background_color(status: Option<CoverageStatus>) -> &'static str {
    match status {
        Some(CoverageStatus::Covered) => GREEN_ALPHA,
        Some(CoverageStatus::Uncovered) => RED_ALPHA,
        Some(CoverageStatus::Partial) => YELLOW_ALPHA,
        None => NO_COLOR,
    }
}

pub fn border_shadow(status: CoverageStatus) -> String {
    let color = match status {
        CoverageStatus::Covered => GREEN,
        CoverageStatus::Uncovered => RED,
        CoverageStatus::Partial => YELLOW,
    };
    format!("{BORDER_PREFIX} {color}")
}

// ---------------------------------------------------------------------------
// File view
// ---------------------------------------------------------------------------

/// Annotates the lines of a single-file view.
#[derive(Debug, Default)]
pub struct FileAnnotator {
    report: Rc<LineCoverage>,
}

impl FileAnnotator {
    pub fn new(report: Rc<LineCoverage>) -> Self {
        Self { report }
    }

    /// 1-based number of a rendered line; the page stores it 0-based in
    /// `data-key`.
    pub fn line_number(doc: &Document, line: NodeId) -> Option<u32> {
        let key: u32 = doc.attribute(line, "data-key")?.trim().parse().ok()?;
        key.checked_add(1)
    }
}

impl LineAnnotator for FileAnnotator {
    fn selector(&self) -> &Selector {
        &FILE_LINE
    }

    fn annotate(&self, doc: &mut Document, line: NodeId) {
        let number = Self::line_number(doc, line);
        let status = number.and_then(|n| self.report.get(n));
        debug!(line = ?number, status = ?status, "annotating line");
        doc.set_style(line, "background-color", background_color(status));
    }

    fn clear_annotation(&self, doc: &mut Document, line: NodeId) {
        doc.set_style(line, "background-color", NO_COLOR);
    }
}

// ---------------------------------------------------------------------------
// Pull request diff view
// ---------------------------------------------------------------------------

/// Where a diff line element points to in the report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffLine {
    pub path: String,
    pub line: u32,
    /// Cell receiving the coverage bar.
    pub cell: NodeId,
}

/// Annotates added lines of a pull request diff in either layout.
#[derive(Debug)]
pub struct PullAnnotator {
    report: Rc<PullCoverageReport>,
    layout: Layout,
}

/// Drop the invisible direction marks the host puts around file names.
fn strip_invisible(text: &str) -> String {
    text.chars()
        .filter(|c| !matches!(c, '\u{200b}'..='\u{200f}' | '\u{2060}' | '\u{feff}'))
        .collect::<String>()
        .trim()
        .to_string()
}

impl PullAnnotator {
    pub fn new(report: Rc<PullCoverageReport>, layout: Layout) -> Self {
        Self { report, layout }
    }

    pub fn layout(&self) -> Layout {
        self.layout
    }

    /// Map a line element to (file, line, cell). `None` for deleted lines
    /// and for any structure this layout does not recognize.
    pub fn resolve(&self, doc: &Document, line: NodeId) -> Option<DiffLine> {
        match self.layout {
            Layout::Legacy => resolve_legacy(doc, line),
            Layout::Modern => resolve_modern(doc, line),
        }
    }
}

fn resolve_legacy(doc: &Document, cell: NodeId) -> Option<DiffLine> {
    // Left side of a split diff shows the old file.
    if doc.attribute(cell, "data-split-side") == Some("left") {
        return None;
    }
    let row = doc.parent(cell)?;
    let rnum = doc.query_selector_within(row, &LEGACY_RNUM)?;
    // Deleted lines of a unified diff have no new line number.
    let line = doc.attribute(rnum, "data-line-number")?.trim().parse().ok()?;
    let file = doc.closest(cell, &LEGACY_FILE)?;
    let path = doc.attribute(file, "data-tagsearch-path")?.to_string();
    Some(DiffLine { path, line, cell })
}

fn resolve_modern(doc: &Document, row: NodeId) -> Option<DiffLine> {
    let cells = doc.children(row);
    let (second, third) = (*cells.get(1)?, *cells.get(2)?);
    let unified = doc.matches(second, &MODERN_LINE_NUMBER);
    let number_cell = if unified { second } else { third };

    let text = strip_invisible(&doc.text_content(number_cell));
    if text.is_empty() {
        return None;
    }
    let line = text.parse().ok()?;

    let file = doc.closest(row, &MODERN_FILE)?;
    let header = doc.query_selector_within(file, &MODERN_FILE_NAME)?;
    let path = strip_invisible(&doc.text_content(header));
    if path.is_empty() {
        return None;
    }
    let cell = doc.next_sibling(number_cell)?;
    Some(DiffLine { path, line, cell })
}

impl LineAnnotator for PullAnnotator {
    fn selector(&self) -> &Selector {
        match self.layout {
            Layout::Legacy => &LEGACY_DIFF_LINE,
            Layout::Modern => &MODERN_DIFF_LINE,
        }
    }

    fn annotate(&self, doc: &mut Document, line: NodeId) {
        let Some(target) = self.resolve(doc, line) else {
            return;
        };
        let Some(status) = self.report.status(&target.path, target.line) else {
            return;
        };
        debug!(path = %target.path, line = target.line, status = %status, "annotating diff line");
        doc.set_style(target.cell, "box-shadow", &border_shadow(status));
    }

    fn clear_annotation(&self, doc: &mut Document, line: NodeId) {
        match self.layout {
            Layout::Legacy => doc.set_style(line, "box-shadow", NO_COLOR),
            Layout::Modern => {
                for cell in doc.children(line).to_vec() {
                    if doc.style(cell, "box-shadow").is_some() {
                        doc.set_style(cell, "box-shadow", NO_COLOR);
                    }
                }
            }
        }
    }
}
