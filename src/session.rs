//! Drives one annotation pass per page and guarantees it is torn down
//! before the next one starts.
//!
//! A pass is identified by a generation number. Every suspension point is
//! followed by a check that the pass is still the current one; a pass that
//! lost the race (the user navigated or changed the filter meanwhile)
//! returns [`PassOutcome::Stale`] without touching the page.

use std::cell::RefCell;
use std::collections::BTreeSet;
use std::rc::Rc;
use std::sync::LazyLock;

use futures::future::try_join_all;
use tracing::{debug, info, warn};

use crate::annotate::{FileAnnotator, LineAnnotator, PullAnnotator};
use crate::detect::{detect_layout, detect_page, modern_toolbar, Layout, Page};
use crate::dom::{Document, NodeId, Selector};
use crate::error::Result;
use crate::fetch::{fetch_components, fetch_file_report, fetch_flags, fetch_pr_report};
use crate::message::Background;
use crate::model::{FileMetadata, PullCoverageReport, PullMetadata, PullTotals};
use crate::observer::{clear_seen_marks, start_annotating, stop_annotating, LineCallback, Observer};
use crate::report::{
    pull_summary, summarize_file, Indicator, HIDE_COVERAGE_TEXT, PR_LOADING_TEXT,
    PR_NOT_AVAILABLE_TEXT, SHOW_COVERAGE_TEXT,
};
use crate::selection::Selection;
use crate::storage::Storage;

pub const RAW_BUTTON_SELECTOR: &str = "[data-testid=\"raw-button\"]";
pub const COVERAGE_BUTTON_TESTID: &str = "coverage-button";
pub const FLAGS_DROPDOWN_TESTID: &str = "flags-dropdown";
pub const COMPONENTS_DROPDOWN_TESTID: &str = "components-dropdown";
pub const TOGGLE_TESTID: &str = "coverage-toggle";
pub const PR_CONTAINER_ID: &str = "coverage-report-data";
pub const LEGACY_REVIEW_TOOLS_CLASS: &str = "pr-review-tools";
pub const INACTIVE_ATTRIBUTE: &str = "data-inactive";

static RAW_BUTTON: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(RAW_BUTTON_SELECTOR).unwrap());

/// How a pass ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassOutcome {
    /// Nothing to do on this page; nothing was left behind.
    Idle,
    /// Report installed and lines under observation.
    Active,
    /// Affordances are shown but no lines are annotated.
    Degraded(Degraded),
    /// Superseded by a later pass; its results were dropped.
    Stale,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Degraded {
    /// The report does not cover this file or pull request.
    NotAvailable,
    /// The coverage service could not be reached or answered with an error.
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterKind {
    Flags,
    Components,
}

impl FilterKind {
    pub fn testid(&self) -> &'static str {
        match self {
            FilterKind::Flags => FLAGS_DROPDOWN_TESTID,
            FilterKind::Components => COMPONENTS_DROPDOWN_TESTID,
        }
    }

    fn title(&self) -> &'static str {
        match self {
            FilterKind::Flags => "Flags",
            FilterKind::Components => "Components",
        }
    }

    fn tooltip(&self) -> &'static str {
        match self {
            FilterKind::Flags => "Filter coverage by flag",
            FilterKind::Components => "Filter coverage by component",
        }
    }
}

/// An entry of a filter dropdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptionClick<'a> {
    /// "Select All" / "Select None".
    All,
    One(&'a str),
}

/// Selection resulting from a click in a dropdown listing `options`.
pub fn apply_click(
    options: &[String],
    selected: &BTreeSet<String>,
    click: OptionClick<'_>,
) -> BTreeSet<String> {
    match click {
        OptionClick::All => {
            let all: BTreeSet<String> = options.iter().cloned().collect();
            if *selected == all {
                BTreeSet::new()
            } else {
                all
            }
        }
        OptionClick::One(option) => {
            let mut next = selected.clone();
            if !next.remove(option) {
                next.insert(option.to_string());
            }
            next
        }
    }
}

/// Elements whose text changes after creation.
#[derive(Debug, Clone, Copy)]
enum Surface {
    File { indicator: NodeId },
    Pull { container: NodeId, toggle: Option<NodeId> },
}

struct Session {
    id: u64,
    /// Top-level elements this pass inserted into the page.
    elements: Vec<NodeId>,
    surface: Option<Surface>,
    flags: Vec<String>,
    components: Vec<String>,
    selection: Selection,
    annotator: Option<Rc<dyn LineAnnotator>>,
    observer: Option<Observer>,
}

impl Session {
    fn new(id: u64) -> Self {
        Self {
            id,
            elements: Vec::new(),
            surface: None,
            flags: Vec::new(),
            components: Vec::new(),
            selection: Selection::None,
            annotator: None,
            observer: None,
        }
    }
}

#[derive(Default)]
struct State {
    generation: u64,
    url: Option<String>,
    session: Option<Session>,
}

fn observe(doc: &mut Document, annotator: &Rc<dyn LineAnnotator>) -> Observer {
    let target = Rc::clone(annotator);
    let callback: LineCallback = Rc::new(move |doc: &mut Document, line: NodeId| {
        target.annotate(doc, line);
    });
    start_annotating(doc, annotator.selector(), callback)
}

fn replace_children(doc: &mut Document, parent: NodeId, child: NodeId) {
    doc.set_text(parent, "");
    doc.append_child(parent, child);
}

fn build_dropdown(
    doc: &mut Document,
    kind: FilterKind,
    options: &[String],
    selected: &BTreeSet<String>,
) -> NodeId {
    let dropdown = doc.create_element_with(
        "div",
        &[
            ("data-testid", kind.testid()),
            ("aria-label", kind.tooltip()),
            ("class", "codecov-dropdown"),
        ],
    );
    let title = doc.create_element("span");
    doc.set_text(title, kind.title());
    doc.append_child(dropdown, title);

    let list = doc.create_element_with("ul", &[("class", "codecov-list-reset")]);
    doc.append_child(dropdown, list);

    let all_selected = options.iter().cloned().collect::<BTreeSet<_>>() == *selected;
    let select_all = doc.create_element_with(
        "li",
        &[("class", "cursor-pointer codecov-px1"), ("data-option-all", "true")],
    );
    doc.set_text(
        select_all,
        if all_selected { "Select None" } else { "Select All" },
    );
    doc.append_child(list, select_all);

    for option in options {
        let item = doc.create_element_with(
            "li",
            &[("class", "cursor-pointer"), ("data-option", option.as_str())],
        );
        let checkbox = doc.create_element_with(
            "input",
            &[("type", "checkbox"), ("class", "codecov-align-middle")],
        );
        if selected.contains(option) {
            doc.set_attribute(checkbox, "checked", "");
        }
        let label = doc.create_element_with("span", &[("class", "codecov-pl1 codecov-align-middle")]);
        doc.set_text(label, option);
        doc.append_child(item, checkbox);
        doc.append_child(item, label);
        doc.append_child(list, item);
    }
    dropdown
}

/// Owns the overlay of one page: the elements it created, the line
/// observer and the active report.
pub struct Controller<B: Background + ?Sized, S: Storage + ?Sized> {
    doc: Rc<RefCell<Document>>,
    background: Rc<B>,
    storage: Rc<S>,
    state: RefCell<State>,
}

impl<B: Background + ?Sized, S: Storage + ?Sized> Controller<B, S> {
    pub fn new(doc: Rc<RefCell<Document>>, background: Rc<B>, storage: Rc<S>) -> Self {
        Self {
            doc,
            background,
            storage,
            state: RefCell::new(State::default()),
        }
    }

    pub fn document(&self) -> &Rc<RefCell<Document>> {
        &self.doc
    }

    /// Id of the live session, if any.
    pub fn session_id(&self) -> Option<u64> {
        self.state.borrow().session.as_ref().map(|s| s.id)
    }

    pub fn has_active_report(&self) -> bool {
        let state = self.state.borrow();
        state.session.as_ref().is_some_and(|s| s.annotator.is_some())
    }

    pub fn annotations_visible(&self) -> bool {
        let state = self.state.borrow();
        state.session.as_ref().is_some_and(|s| s.observer.is_some())
    }

    /// Selection read by the live session.
    pub fn selection(&self) -> Option<Selection> {
        let state = self.state.borrow();
        state.session.as_ref().map(|s| s.selection.clone())
    }

    /// Run one annotation pass for `url`. Whatever a previous pass left on
    /// the page is torn down first.
    pub async fn start(&self, url: &str) -> PassOutcome {
        self.teardown();
        self.state.borrow_mut().url = Some(url.to_string());

        let Some(page) = detect_page(url) else {
            debug!(url, "url does not match a supported view");
            return PassOutcome::Idle;
        };
        let id = self.begin();
        let result = match &page {
            Page::File(meta) => self.run_file(id, meta).await,
            Page::Pull(pull) => self.run_pull(id, pull).await,
        };

        let current = self.is_current(id);
        match result {
            Ok(PassOutcome::Idle) if current => {
                self.teardown();
                PassOutcome::Idle
            }
            Ok(outcome) => {
                if current {
                    info!(url, outcome = ?outcome, "coverage pass finished");
                }
                outcome
            }
            Err(e) if current => {
                warn!(url, error = %e, "coverage pass failed, removing overlay");
                self.teardown();
                PassOutcome::Idle
            }
            Err(e) => {
                debug!(error = %e, "superseded pass failed");
                self.stale(id)
            }
        }
    }

    /// Remove everything the current pass created and detach the line
    /// observer. Safe to call any number of times.
    pub fn teardown(&self) {
        let session = {
            let mut state = self.state.borrow_mut();
            state.generation += 1;
            state.session.take()
        };
        let Some(session) = session else {
            return;
        };

        let mut doc = self.doc.borrow_mut();
        for element in &session.elements {
            doc.remove(*element);
        }
        if let Some(observer) = session.observer {
            stop_annotating(&mut doc, observer);
        }
        if let Some(annotator) = session.annotator {
            clear_seen_marks(&mut doc, |doc, line| annotator.clear_annotation(doc, line));
        }
        debug!(session = session.id, "session torn down");
    }

    /// Soft navigation: tear down, then run a pass for the new URL.
    pub async fn navigate(&self, url: &str) -> PassOutcome {
        self.teardown();
        self.start(url).await
    }

    /// Persist a flag selection (clearing any component selection) and
    /// re-run the pass for the current page.
    pub async fn select_flags<I>(&self, flags: I) -> Result<PassOutcome>
    where
        I: IntoIterator<Item = String>,
    {
        self.apply_selection(Selection::flags(flags)).await
    }

    pub async fn select_components<I>(&self, components: I) -> Result<PassOutcome>
    where
        I: IntoIterator<Item = String>,
    {
        self.apply_selection(Selection::components(components)).await
    }

    /// Handle a click on an entry of one of the filter dropdowns.
    pub async fn click_option(&self, kind: FilterKind, click: OptionClick<'_>) -> Result<PassOutcome> {
        let next = {
            let state = self.state.borrow();
            let Some(session) = &state.session else {
                return Ok(PassOutcome::Idle);
            };
            let empty = BTreeSet::new();
            let (options, selected) = match kind {
                FilterKind::Flags => (&session.flags, session.selection.selected_flags()),
                FilterKind::Components => {
                    (&session.components, session.selection.selected_components())
                }
            };
            apply_click(options, selected.unwrap_or(&empty), click)
        };
        match kind {
            FilterKind::Flags => self.select_flags(next).await,
            FilterKind::Components => self.select_components(next).await,
        }
    }

    /// Hide or show the annotations of the live session without fetching
    /// again. Returns whether annotations are visible afterwards.
    pub fn toggle_annotations(&self) -> bool {
        let mut state = self.state.borrow_mut();
        let Some(session) = state.session.as_mut() else {
            return false;
        };
        let Some(annotator) = session.annotator.clone() else {
            return false;
        };

        let mut doc = self.doc.borrow_mut();
        let visible = match session.observer.take() {
            Some(observer) => {
                stop_annotating(&mut doc, observer);
                clear_seen_marks(&mut doc, |doc, line| annotator.clear_annotation(doc, line));
                false
            }
            None => {
                session.observer = Some(observe(&mut doc, &annotator));
                true
            }
        };

        match session.surface {
            Some(Surface::File { indicator }) => {
                if visible {
                    doc.remove_attribute(indicator, INACTIVE_ATTRIBUTE);
                    doc.set_style(indicator, "opacity", "1");
                } else {
                    doc.set_attribute(indicator, INACTIVE_ATTRIBUTE, "true");
                    doc.set_style(indicator, "opacity", "0.5");
                }
            }
            Some(Surface::Pull {
                toggle: Some(toggle),
                ..
            }) => {
                if visible {
                    doc.remove_attribute(toggle, INACTIVE_ATTRIBUTE);
                    doc.set_text(toggle, HIDE_COVERAGE_TEXT);
                } else {
                    doc.set_attribute(toggle, INACTIVE_ATTRIBUTE, "true");
                    doc.set_text(toggle, SHOW_COVERAGE_TEXT);
                }
            }
            _ => {}
        }
        drop(state);

        if visible {
            doc.flush();
        }
        debug!(visible, "toggled annotations");
        visible
    }

    // -- Pass internals ---------------------------------------------------

    async fn apply_selection(&self, selection: Selection) -> Result<PassOutcome> {
        selection.save(&*self.storage).await?;
        let url = self.state.borrow().url.clone();
        match url {
            Some(url) => Ok(self.navigate(&url).await),
            None => Ok(PassOutcome::Idle),
        }
    }

    fn begin(&self) -> u64 {
        let mut state = self.state.borrow_mut();
        state.generation += 1;
        let id = state.generation;
        state.session = Some(Session::new(id));
        id
    }

    fn is_current(&self, id: u64) -> bool {
        let state = self.state.borrow();
        state.generation == id && state.session.is_some()
    }

    fn stale(&self, id: u64) -> PassOutcome {
        debug!(session = id, "dropping results of a superseded pass");
        PassOutcome::Stale
    }

    fn with_session<R>(&self, id: u64, f: impl FnOnce(&mut Session) -> R) -> Option<R> {
        let mut state = self.state.borrow_mut();
        state.session.as_mut().filter(|s| s.id == id).map(f)
    }

    fn track(&self, id: u64, element: NodeId, surface: Surface) {
        self.with_session(id, |s| {
            s.elements.push(element);
            s.surface = Some(surface);
        });
    }

    /// Install the report and start observing lines.
    fn activate(&self, id: u64, annotator: Rc<dyn LineAnnotator>) {
        let mut doc = self.doc.borrow_mut();
        {
            let mut state = self.state.borrow_mut();
            let Some(session) = state.session.as_mut().filter(|s| s.id == id) else {
                return;
            };
            session.observer = Some(observe(&mut doc, &annotator));
            session.annotator = Some(annotator);
        }
        doc.flush();
    }

    async fn run_file(&self, id: u64, meta: &FileMetadata) -> Result<PassOutcome> {
        debug!(
            owner = %meta.owner,
            repo = %meta.repo,
            path = %meta.path,
            reference = meta.reference.as_str(),
            "file view detected"
        );
        let Some(indicator) = self.create_indicator() else {
            debug!("raw button not found, nothing to attach the indicator to");
            return Ok(PassOutcome::Idle);
        };
        self.track(id, indicator, Surface::File { indicator });

        let repo = meta.repo();
        let (flags, components, selection) = futures::join!(
            fetch_flags(&*self.background, &repo),
            fetch_components(&*self.background, &repo),
            Selection::load(&*self.storage),
        );
        if !self.is_current(id) {
            return Ok(self.stale(id));
        }
        let flags = flags.unwrap_or_else(|e| {
            warn!(error = %e, "could not list flags");
            Vec::new()
        });
        let components = components.unwrap_or_else(|e| {
            warn!(error = %e, "could not list components");
            Vec::new()
        });
        let selection = selection?;

        let dropdowns = self.create_dropdowns(indicator, &flags, &components, &selection);
        let filters = selection.filters();
        let filtered = selection.is_filtered();
        self.with_session(id, |s| {
            s.elements.extend(dropdowns);
            s.flags = flags;
            s.components = components;
            s.selection = selection;
        });

        let fetched = try_join_all(
            filters
                .iter()
                .map(|filter| fetch_file_report(&*self.background, meta, filter)),
        )
        .await;
        if !self.is_current(id) {
            return Ok(self.stale(id));
        }
        let responses = match fetched {
            Ok(responses) => responses,
            Err(e) => {
                warn!(path = %meta.path, error = %e, "fetching coverage failed");
                self.set_indicator(indicator, Indicator::Failed);
                return Ok(PassOutcome::Degraded(Degraded::Failed));
            }
        };

        let file = summarize_file(&meta.path, &responses, filtered);
        self.set_indicator(indicator, file.indicator);
        if file.lines.is_empty() {
            debug!(path = %meta.path, "file not found in report");
            return Ok(PassOutcome::Degraded(Degraded::NotAvailable));
        }
        self.activate(id, Rc::new(FileAnnotator::new(Rc::new(file.lines))));
        Ok(PassOutcome::Active)
    }

    async fn run_pull(&self, id: u64, pull: &PullMetadata) -> Result<PassOutcome> {
        let Some((container, layout)) = self.create_container() else {
            debug!("pull request toolbar not found, nothing to attach the summary to");
            return Ok(PassOutcome::Idle);
        };
        debug!(pull = pull.pull_id, layout = %layout, "pull request view detected");
        self.track(
            id,
            container,
            Surface::Pull {
                container,
                toggle: None,
            },
        );

        let fetched = fetch_pr_report(&*self.background, pull).await;
        if !self.is_current(id) {
            return Ok(self.stale(id));
        }
        let response = match fetched {
            Ok(response) => response,
            Err(e) => {
                warn!(pull = pull.pull_id, error = %e, "fetching comparison failed");
                self.show_unavailable(container);
                return Ok(PassOutcome::Degraded(Degraded::Failed));
            }
        };
        let totals = match (response.files.is_some(), response.totals()) {
            (true, Some(totals)) => totals,
            _ => {
                debug!(pull = pull.pull_id, "comparison has no files or totals");
                self.show_unavailable(container);
                return Ok(PassOutcome::Degraded(Degraded::NotAvailable));
            }
        };

        let toggle = self.show_summary(container, &totals);
        self.with_session(id, |s| {
            s.surface = Some(Surface::Pull {
                container,
                toggle: Some(toggle),
            });
        });
        let report = PullCoverageReport::from_response(&response);
        self.activate(id, Rc::new(PullAnnotator::new(Rc::new(report), layout)));
        Ok(PassOutcome::Active)
    }

    // -- Page elements ----------------------------------------------------

    fn create_indicator(&self) -> Option<NodeId> {
        let mut doc = self.doc.borrow_mut();
        let raw = doc.query_selector(&RAW_BUTTON)?;
        let group = doc.parent(raw)?;
        let class = doc.attribute(raw, "class").unwrap_or_default().to_string();

        let indicator = doc.create_element_with(
            "a",
            &[
                ("data-testid", COVERAGE_BUTTON_TESTID),
                ("role", "button"),
                ("class", class.as_str()),
            ],
        );
        doc.set_text(indicator, &Indicator::Loading.to_string());
        doc.prepend_child(group, indicator);
        Some(indicator)
    }

    fn set_indicator(&self, indicator: NodeId, state: Indicator) {
        self.doc.borrow_mut().set_text(indicator, &state.to_string());
    }

    fn create_dropdowns(
        &self,
        indicator: NodeId,
        flags: &[String],
        components: &[String],
        selection: &Selection,
    ) -> Vec<NodeId> {
        let mut doc = self.doc.borrow_mut();
        let none = BTreeSet::new();
        let mut created = Vec::new();
        let mut previous = indicator;
        for (kind, options, selected) in [
            (FilterKind::Flags, flags, selection.selected_flags()),
            (FilterKind::Components, components, selection.selected_components()),
        ] {
            if options.is_empty() {
                continue;
            }
            let dropdown = build_dropdown(&mut doc, kind, options, selected.unwrap_or(&none));
            if doc.insert_after(previous, dropdown) {
                created.push(dropdown);
                previous = dropdown;
            } else {
                doc.remove(dropdown);
            }
        }
        created
    }

    /// Insert the pull request summary container, in its loading state.
    fn create_container(&self) -> Option<(NodeId, Layout)> {
        let mut doc = self.doc.borrow_mut();
        let layout = detect_layout(&doc);
        let parent = match layout {
            Layout::Legacy => {
                let tools = doc
                    .elements_with_class(LEGACY_REVIEW_TOOLS_CLASS)
                    .into_iter()
                    .next()?;
                doc.parent(tools)?
            }
            Layout::Modern => modern_toolbar(&doc)?,
        };
        let reference = doc.last_child(parent);

        let container =
            doc.create_element_with("div", &[("id", PR_CONTAINER_ID), ("class", "ml-auto")]);
        let loading = doc.create_element_with("div", &[("class", "ml-auto mr-6")]);
        doc.set_text(loading, PR_LOADING_TEXT);
        doc.append_child(container, loading);
        doc.insert_before(parent, container, reference);
        Some((container, layout))
    }

    fn show_unavailable(&self, container: NodeId) {
        let mut doc = self.doc.borrow_mut();
        let message = doc.create_element_with("div", &[("class", "my-auto mr-6")]);
        doc.set_text(message, PR_NOT_AVAILABLE_TEXT);
        replace_children(&mut doc, container, message);
    }

    /// Render head/patch/change and the toggle button; returns the button.
    fn show_summary(&self, container: NodeId, totals: &PullTotals) -> NodeId {
        let mut doc = self.doc.borrow_mut();
        let row = doc.create_element_with("div", &[("class", "codecov-flex codecov-items-center")]);
        let classes = ["codecov-mr2", "codecov-mx2", "codecov-mx2"];
        for (entry, class) in pull_summary(totals).iter().zip(classes) {
            let cell = doc.create_element_with("div", &[("class", class)]);
            doc.set_text(cell, entry);
            doc.append_child(row, cell);
        }
        let toggle = doc.create_element_with(
            "button",
            &[("class", "btn btn-sm ml-2"), ("data-testid", TOGGLE_TESTID)],
        );
        doc.set_text(toggle, HIDE_COVERAGE_TEXT);
        doc.append_child(row, toggle);
        replace_children(&mut doc, container, row);
        toggle
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn set(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_select_all_then_none() {
        let options = names(&["unit", "integration"]);
        let all = apply_click(&options, &set(&["unit"]), OptionClick::All);
        assert_eq!(all, set(&["unit", "integration"]));
        assert!(apply_click(&options, &all, OptionClick::All).is_empty());
    }

    #[test]
    fn test_toggle_one_option() {
        let options = names(&["unit", "integration"]);
        assert_eq!(
            apply_click(&options, &set(&["unit"]), OptionClick::One("integration")),
            set(&["unit", "integration"])
        );
        assert_eq!(
            apply_click(&options, &set(&["unit"]), OptionClick::One("unit")),
            set(&[])
        );
    }

    #[test]
    fn test_dropdown_markup() {
        let mut doc = Document::new();
        let options = names(&["unit", "integration"]);
        let dropdown = build_dropdown(&mut doc, FilterKind::Flags, &options, &set(&["unit"]));
        doc.append_child(doc.body(), dropdown);

        assert_eq!(doc.attribute(dropdown, "data-testid"), Some(FLAGS_DROPDOWN_TESTID));
        let items = doc.query_selector_all_within(dropdown, &Selector::parse("li").unwrap());
        assert_eq!(items.len(), 3);
        assert_eq!(doc.text_content(items[0]), "Select All");
        let checked = Selector::parse("input[checked]").unwrap();
        assert!(doc.query_selector_within(items[1], &checked).is_some());
        assert!(doc.query_selector_within(items[2], &checked).is_none());
    }
}
