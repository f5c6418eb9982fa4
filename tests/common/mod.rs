#![allow(dead_code)]

use std::cell::RefCell;
use std::rc::Rc;

use async_trait::async_trait;
use covlay::dom::{Document, NodeId, Selector};
use covlay::error::Result;
use covlay::message::{Background, Request, Response};
use covlay::storage::SqliteStorage;
use tempfile::TempDir;
use tokio::sync::oneshot;

/// Create a fresh settings store in a temporary directory.
/// The caller must hold onto `TempDir` to keep the temp directory alive.
pub fn setup_storage() -> (SqliteStorage, TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let storage = SqliteStorage::open(&dir.path().join("settings.db")).unwrap();
    (storage, dir)
}

pub fn select(pattern: &str) -> Selector {
    Selector::parse(pattern).unwrap()
}

/// A file view: the raw/copy/download button group and `lines` code lines
/// with 0-based `data-key`s.
pub fn file_page(lines: usize) -> Rc<RefCell<Document>> {
    let mut doc = Document::new();
    let body = doc.body();

    let header = doc.create_element_with("div", &[("class", "react-blob-header")]);
    let group = doc.create_element_with("div", &[("class", "ButtonGroup")]);
    let raw = doc.create_element_with(
        "a",
        &[("data-testid", "raw-button"), ("class", "types__StyledButton btn-sm")],
    );
    doc.set_text(raw, "Raw");
    doc.append_child(body, header);
    doc.append_child(header, group);
    doc.append_child(group, raw);

    let code = doc.create_element_with("div", &[("class", "react-code-lines")]);
    doc.append_child(body, code);
    for i in 0..lines {
        let key = i.to_string();
        let line = doc.create_element_with(
            "div",
            &[("class", "react-code-text react-code-line-contents"), ("data-key", key.as_str())],
        );
        doc.append_child(code, line);
    }
    Rc::new(RefCell::new(doc))
}

pub fn file_lines(doc: &Document) -> Vec<NodeId> {
    doc.query_selector_all(&select(".react-code-line-contents"))
}

pub fn by_testid(doc: &Document, testid: &str) -> Vec<NodeId> {
    doc.query_selector_all(&select(&format!("[data-testid=\"{testid}\"]")))
}

pub fn background_of(doc: &Document, line: NodeId) -> Option<String> {
    doc.style(line, "background-color").map(str::to_string)
}

/// Answers requests with a fixed function of the request. Individual
/// requests can be held back until the test releases them.
pub struct FakeBackground {
    reply: Box<dyn Fn(&Request) -> Response>,
    held: RefCell<Vec<(&'static str, oneshot::Receiver<()>)>>,
    sent: RefCell<Vec<Request>>,
}

impl FakeBackground {
    pub fn new(reply: impl Fn(&Request) -> Response + 'static) -> Self {
        Self {
            reply: Box::new(reply),
            held: RefCell::new(Vec::new()),
            sent: RefCell::new(Vec::new()),
        }
    }

    /// Hold the next request of `kind` until the returned sender fires
    /// (or is dropped).
    pub fn hold_next(&self, kind: &'static str) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        self.held.borrow_mut().push((kind, rx));
        tx
    }

    pub fn sent(&self) -> Vec<Request> {
        self.sent.borrow().clone()
    }

    pub fn count(&self, kind: &str) -> usize {
        self.sent.borrow().iter().filter(|r| r.kind() == kind).count()
    }
}

#[async_trait(?Send)]
impl Background for FakeBackground {
    async fn send(&self, request: Request) -> Result<Response> {
        self.sent.borrow_mut().push(request.clone());
        let gate = {
            let mut held = self.held.borrow_mut();
            held.iter()
                .position(|(kind, _)| *kind == request.kind())
                .map(|i| held.remove(i).1)
        };
        if let Some(gate) = gate {
            let _ = gate.await;
        }
        Ok((self.reply)(&request))
    }
}
