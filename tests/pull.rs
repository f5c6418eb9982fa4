mod common;

use std::cell::RefCell;
use std::rc::Rc;

use common::{by_testid, FakeBackground};
use covlay::dom::{Document, NodeId};
use covlay::message::{Request, Response};
use covlay::report::{HIDE_COVERAGE_TEXT, PR_NOT_AVAILABLE_TEXT, SHOW_COVERAGE_TEXT};
use covlay::session::{Controller, Degraded, PassOutcome, PR_CONTAINER_ID, TOGGLE_TESTID};
use covlay::storage::MemoryStorage;
use serde_json::{json, Value};

const PULL_URL: &str = "https://github.com/acme/widgets/pull/42/files";
const COVERED: &str = "inset 2px 0 rgb(33,181,119)";
const UNCOVERED: &str = "inset 2px 0 rgb(245,32,32)";

fn comparison() -> Value {
    json!({
        "files": [
            {
                "name": {"head": "src/app.py", "base": "src/app.py"},
                "has_diff": true,
                "lines": [
                    {"number": {"head": 10, "base": null}, "added": true, "coverage": {"head": 0, "base": null}},
                    {"number": {"head": 11, "base": null}, "added": true, "coverage": {"head": 1, "base": null}},
                    {"number": {"head": 12, "base": 12}, "added": false, "coverage": {"head": 1, "base": 1}}
                ]
            },
            {
                "name": {"head": "src/untouched.py", "base": "src/untouched.py"},
                "has_diff": false,
                "lines": []
            }
        ],
        "totals": {
            "base": {"coverage": 80.0},
            "head": {"coverage": 82.5},
            "patch": {"coverage": 90.0}
        }
    })
}

fn controller(page: Document, reply: Value) -> Controller<FakeBackground, MemoryStorage> {
    let background = FakeBackground::new(move |request| match request {
        Request::FetchPrComparison(q) if q.pullid == 42 => Response::ok(reply.clone()),
        _ => Response::failed(json!({"detail": "Not found."})),
    });
    Controller::new(
        Rc::new(RefCell::new(page)),
        Rc::new(background),
        Rc::new(MemoryStorage::new()),
    )
}

/// Classic files view: review tools next to a `.js-file` diff table.
/// Returns the code cells of new lines 10, 11 and 12 and a deleted line.
fn legacy_page() -> (Document, Vec<NodeId>) {
    let mut doc = Document::new();
    let body = doc.body();
    let toolbar = doc.create_element_with("div", &[("class", "diffbar")]);
    let tools = doc.create_element_with("div", &[("class", "pr-review-tools")]);
    let last = doc.create_element_with("div", &[("class", "diffbar-item")]);
    doc.append_child(body, toolbar);
    doc.append_child(toolbar, tools);
    doc.append_child(toolbar, last);

    let file = doc.create_element_with(
        "div",
        &[("class", "file js-file"), ("data-tagsearch-path", "src/app.py")],
    );
    doc.append_child(body, file);
    let mut cells = Vec::new();
    for number in [Some("10"), Some("11"), Some("12"), None] {
        let row = doc.create_element("tr");
        let rnum = match number {
            Some(n) => doc.create_element_with(
                "td",
                &[("class", "blob-num js-blob-rnum"), ("data-line-number", n)],
            ),
            None => doc.create_element_with("td", &[("class", "blob-num js-blob-rnum")]),
        };
        let code = doc.create_element_with("td", &[("class", "blob-code blob-code-inner")]);
        doc.append_child(file, row);
        doc.append_child(row, rnum);
        doc.append_child(row, code);
        cells.push(code);
    }
    (doc, cells)
}

/// Current files view. Rows are unified (`[old#, new#, code]`) or the
/// right half of a split diff (`[old#, code, new#, code]`). Returns the
/// new-side code cells.
fn modern_page(split: bool) -> (Document, Vec<NodeId>) {
    let mut doc = Document::new();
    let body = doc.body();
    let toolbar = doc.create_element_with(
        "section",
        &[("class", "prc-Box PullRequestFilesToolbar-module__toolbar--x1")],
    );
    let actions = doc.create_element_with("div", &[("class", "toolbar-actions")]);
    doc.append_child(body, toolbar);
    doc.append_child(toolbar, actions);

    let file = doc.create_element_with("div", &[("class", "Diff-module__diffTargetable--q")]);
    let header = doc.create_element_with("h3", &[("class", "DiffFileHeader-module__file-name--z")]);
    doc.set_text(header, "\u{200e}src/app.py\u{200e}");
    doc.append_child(body, file);
    doc.append_child(file, header);

    let number_class = "new-diff-line-number diff-line-number";
    let mut cells = Vec::new();
    for number in ["10", "11", "12"] {
        let row = doc.create_element_with("tr", &[("class", "diff-line-row")]);
        doc.append_child(file, row);
        let old = doc.create_element_with("td", &[("class", number_class)]);
        doc.append_child(row, old);
        if split {
            let left = doc.create_element_with("td", &[("class", "diff-text-cell")]);
            doc.append_child(row, left);
        }
        let new = doc.create_element_with("td", &[("class", number_class)]);
        doc.set_text(new, number);
        let code = doc.create_element_with("td", &[("class", "diff-text-cell")]);
        doc.append_child(row, new);
        doc.append_child(row, code);
        cells.push(code);
    }
    (doc, cells)
}

fn container_text(controller: &Controller<FakeBackground, MemoryStorage>) -> Option<String> {
    let doc = controller.document().borrow();
    doc.get_element_by_id(PR_CONTAINER_ID)
        .map(|c| doc.text_content(c))
}

fn shadows(controller: &Controller<FakeBackground, MemoryStorage>, cells: &[NodeId]) -> Vec<Option<String>> {
    let doc = controller.document().borrow();
    cells
        .iter()
        .map(|c| doc.style(*c, "box-shadow").map(str::to_string))
        .collect()
}

#[tokio::test]
async fn legacy_pull_request_is_annotated() {
    let (page, cells) = legacy_page();
    let controller = controller(page, comparison());

    assert_eq!(controller.start(PULL_URL).await, PassOutcome::Active);

    let text = container_text(&controller).unwrap();
    assert!(text.contains("Head: 82.50%"));
    assert!(text.contains("Patch: 90.00%"));
    assert!(text.contains("Change: +2.50%"));
    assert!(text.contains(HIDE_COVERAGE_TEXT));

    // Line 12 is context, not added, so it stays unmarked.
    assert_eq!(
        shadows(&controller, &cells),
        [Some(COVERED.to_string()), Some(UNCOVERED.to_string()), None, None]
    );

    // The summary sits just before the toolbar's last child.
    let doc = controller.document().borrow();
    let container = doc.get_element_by_id(PR_CONTAINER_ID).unwrap();
    let toolbar = doc.parent(container).unwrap();
    assert_eq!(doc.children(toolbar).len(), 3);
    assert_eq!(doc.children(toolbar)[1], container);
}

#[tokio::test]
async fn modern_unified_pull_request_is_annotated() {
    let (page, cells) = modern_page(false);
    let controller = controller(page, comparison());

    assert_eq!(controller.start(PULL_URL).await, PassOutcome::Active);
    assert_eq!(
        shadows(&controller, &cells),
        [Some(COVERED.to_string()), Some(UNCOVERED.to_string()), None]
    );
}

#[tokio::test]
async fn modern_split_pull_request_is_annotated() {
    let (page, cells) = modern_page(true);
    let controller = controller(page, comparison());

    assert_eq!(controller.start(PULL_URL).await, PassOutcome::Active);
    assert_eq!(
        shadows(&controller, &cells),
        [Some(COVERED.to_string()), Some(UNCOVERED.to_string()), None]
    );
}

#[tokio::test]
async fn toggle_flips_the_button_label() {
    let (page, cells) = modern_page(false);
    let controller = controller(page, comparison());
    controller.start(PULL_URL).await;

    assert!(!controller.toggle_annotations());
    {
        let doc = controller.document().borrow();
        let toggle = by_testid(&doc, TOGGLE_TESTID)[0];
        assert_eq!(doc.text_content(toggle), SHOW_COVERAGE_TEXT);
        assert_eq!(doc.listener_count(), 0);
    }
    assert_eq!(shadows(&controller, &cells)[0].as_deref(), Some("inherit"));

    assert!(controller.toggle_annotations());
    let doc = controller.document().borrow();
    let toggle = by_testid(&doc, TOGGLE_TESTID)[0];
    assert_eq!(doc.text_content(toggle), HIDE_COVERAGE_TEXT);
    drop(doc);
    assert_eq!(shadows(&controller, &cells)[0].as_deref(), Some(COVERED));
}

#[tokio::test]
async fn missing_totals_is_not_available() {
    let mut reply = comparison();
    reply["totals"]["patch"] = Value::Null;
    let (page, cells) = legacy_page();
    let controller = controller(page, reply);

    assert_eq!(
        controller.start(PULL_URL).await,
        PassOutcome::Degraded(Degraded::NotAvailable)
    );
    assert_eq!(container_text(&controller).as_deref(), Some(PR_NOT_AVAILABLE_TEXT));
    assert!(shadows(&controller, &cells).iter().all(Option::is_none));
    assert_eq!(controller.document().borrow().listener_count(), 0);
}

#[tokio::test]
async fn failed_comparison_is_not_available() {
    let (page, _) = modern_page(false);
    let controller = controller(page, comparison());

    let outcome = controller
        .start("https://github.com/acme/widgets/pull/7/files")
        .await;
    assert_eq!(outcome, PassOutcome::Degraded(Degraded::Failed));
    assert_eq!(container_text(&controller).as_deref(), Some(PR_NOT_AVAILABLE_TEXT));
}

#[tokio::test]
async fn no_toolbar_means_no_pass() {
    let controller = controller(Document::new(), comparison());
    assert_eq!(controller.start(PULL_URL).await, PassOutcome::Idle);
    assert_eq!(container_text(&controller), None);
}

#[tokio::test]
async fn repeated_navigation_reuses_page_nodes() {
    let (page, _) = modern_page(false);
    let controller = controller(page, comparison());
    controller.start(PULL_URL).await;
    let arena = controller.document().borrow().arena_len();

    for _ in 0..50 {
        assert_eq!(controller.navigate(PULL_URL).await, PassOutcome::Active);
    }

    let doc = controller.document().borrow();
    assert_eq!(doc.arena_len(), arena);
    assert_eq!(by_testid(&doc, TOGGLE_TESTID).len(), 1);
}

#[tokio::test]
async fn teardown_removes_the_summary_and_marks() {
    let (page, cells) = legacy_page();
    let controller = controller(page, comparison());
    controller.start(PULL_URL).await;

    controller.teardown();
    assert_eq!(container_text(&controller), None);
    assert_eq!(
        shadows(&controller, &cells)[..2],
        [Some("inherit".to_string()), Some("inherit".to_string())]
    );
    let doc = controller.document().borrow();
    assert_eq!(doc.listener_count(), 0);
    assert!(doc.elements_with_class(covlay::observer::SEEN_CLASS).is_empty());
}
