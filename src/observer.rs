//! Invoke a callback once for every element matching a selector as it
//! appears on the page.
//!
//! A zero-length animation is attached to matching elements that do not yet
//! carry the seen mark. The first layout of such an element raises
//! `animationstart`; the listener marks the element, which detaches the
//! animation again, and hands it to the callback. No tree walking or
//! polling is involved.

use std::rc::Rc;

use tracing::debug;

use crate::dom::{AnimationEvent, Document, ListenerId, NodeId, Selector, StyleRule};

pub const ANIMATION_NAME: &str = "codecov-gh-observer";
pub const ANIMATION_DEFINITION_ID: &str = "codecov-gh-observer-keyframe";
pub const ANIMATION_ATTACHMENT_ID: &str = "codecov-gh-observer-attachment";
pub const SEEN_CLASS: &str = "codecov-seen-mark";

pub type LineCallback = Rc<dyn Fn(&mut Document, NodeId)>;

/// A live registration. Pass it back to [`stop_annotating`] to undo it.
#[derive(Debug)]
pub struct Observer {
    selector: Selector,
    listener: ListenerId,
}

impl Observer {
    pub fn selector(&self) -> &Selector {
        &self.selector
    }
}

/// Start observing `selector`. Calling this twice without stopping in
/// between installs two listeners; callers own that invariant.
pub fn start_annotating(doc: &mut Document, selector: &Selector, callback: LineCallback) -> Observer {
    doc.insert_style_rule(StyleRule::Keyframes {
        id: ANIMATION_DEFINITION_ID.to_string(),
        name: ANIMATION_NAME.to_string(),
    });
    doc.insert_style_rule(StyleRule::Animation {
        id: ANIMATION_ATTACHMENT_ID.to_string(),
        selector: selector.clone(),
        unless_class: SEEN_CLASS.to_string(),
        animation: ANIMATION_NAME.to_string(),
    });

    let watched = selector.clone();
    let listener = doc.add_animation_listener(Rc::new(
        move |doc: &mut Document, event: &AnimationEvent| {
            let target = event.target;
            if event.animation_name != ANIMATION_NAME {
                return;
            }
            // The event can come from a pseudo-element of a matching
            // element, so the target is checked explicitly.
            if doc.has_class(target, SEEN_CLASS) || !doc.matches(target, &watched) {
                return;
            }
            doc.add_class(target, SEEN_CLASS);
            callback(doc, target);
        },
    ));
    debug!(selector = %selector, "started line observer");

    Observer {
        selector: selector.clone(),
        listener,
    }
}

/// Remove the style rules and the listener installed by `observer`.
pub fn stop_annotating(doc: &mut Document, observer: Observer) {
    doc.remove_style_rule(ANIMATION_DEFINITION_ID);
    doc.remove_style_rule(ANIMATION_ATTACHMENT_ID);
    if !doc.remove_animation_listener(observer.listener) {
        debug!(selector = %observer.selector, "line observer listener was already gone");
    }
}

/// Strip the seen mark from every marked element, calling `reset` on each
/// so its annotation can be undone. A later [`start_annotating`] picks the
/// elements up again.
pub fn clear_seen_marks(doc: &mut Document, reset: impl Fn(&mut Document, NodeId)) {
    for element in doc.elements_with_class(SEEN_CLASS) {
        doc.remove_class(element, SEEN_CLASS);
        reset(doc, element);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    fn page_with_lines(n: usize) -> (Document, Vec<NodeId>) {
        let mut doc = Document::new();
        let mut lines = Vec::new();
        for i in 0..n {
            let key = i.to_string();
            let line = doc.create_element_with(
                "div",
                &[("class", "react-code-line-contents"), ("data-key", key.as_str())],
            );
            doc.append_child(doc.body(), line);
            lines.push(line);
        }
        (doc, lines)
    }

    fn recorder() -> (Rc<RefCell<Vec<NodeId>>>, LineCallback) {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        let callback: LineCallback = Rc::new(move |_doc: &mut Document, el: NodeId| {
            sink.borrow_mut().push(el);
        });
        (seen, callback)
    }

    fn line_selector() -> Selector {
        Selector::parse(".react-code-line-contents").unwrap()
    }

    #[test]
    fn test_callback_once_per_element() {
        let (mut doc, lines) = page_with_lines(3);
        let (seen, callback) = recorder();
        let _observer = start_annotating(&mut doc, &line_selector(), callback);

        doc.flush();
        doc.flush();
        assert_eq!(seen.borrow().as_slice(), lines.as_slice());
        assert!(lines.iter().all(|l| doc.has_class(*l, SEEN_CLASS)));
    }

    #[test]
    fn test_late_insertion_is_observed() {
        let (mut doc, _) = page_with_lines(1);
        let (seen, callback) = recorder();
        let _observer = start_annotating(&mut doc, &line_selector(), callback);
        doc.flush();

        let late = doc.create_element_with("div", &[("class", "react-code-line-contents")]);
        doc.append_child(doc.body(), late);
        doc.flush();
        assert_eq!(seen.borrow().len(), 2);
        assert_eq!(seen.borrow()[1], late);
    }

    #[test]
    fn test_missing_selector_is_silent() {
        let (mut doc, _) = page_with_lines(2);
        let (seen, callback) = recorder();
        let selector = Selector::parse(".not-on-this-page").unwrap();
        let _observer = start_annotating(&mut doc, &selector, callback);
        assert_eq!(doc.flush(), 0);
        assert!(seen.borrow().is_empty());
    }

    #[test]
    fn test_non_matching_target_is_ignored() {
        let (mut doc, _) = page_with_lines(0);
        let (seen, callback) = recorder();
        let _observer = start_annotating(&mut doc, &line_selector(), callback);

        let other = doc.create_element_with("div", &[("class", "gutter")]);
        doc.append_child(doc.body(), other);
        doc.dispatch_animation_start(&AnimationEvent {
            target: other,
            animation_name: ANIMATION_NAME.to_string(),
            pseudo_element: Some("::before".to_string()),
        });
        assert!(seen.borrow().is_empty());
        assert!(!doc.has_class(other, SEEN_CLASS));
    }

    #[test]
    fn test_stop_removes_rules_and_listener() {
        let (mut doc, _) = page_with_lines(1);
        let (seen, callback) = recorder();
        let observer = start_annotating(&mut doc, &line_selector(), callback);
        stop_annotating(&mut doc, observer);

        assert_eq!(doc.listener_count(), 0);
        assert!(!doc.has_style_rule(ANIMATION_DEFINITION_ID));
        assert!(!doc.has_style_rule(ANIMATION_ATTACHMENT_ID));
        assert_eq!(doc.flush(), 0);
        assert!(seen.borrow().is_empty());
    }

    #[test]
    fn test_clear_marks_allows_reobservation() {
        let (mut doc, lines) = page_with_lines(2);
        let (seen, callback) = recorder();
        let observer = start_annotating(&mut doc, &line_selector(), Rc::clone(&callback));
        doc.flush();
        stop_annotating(&mut doc, observer);

        let resets = Rc::new(RefCell::new(0));
        let counter = Rc::clone(&resets);
        clear_seen_marks(&mut doc, move |_doc, _el| *counter.borrow_mut() += 1);
        assert_eq!(*resets.borrow(), 2);
        assert!(doc.elements_with_class(SEEN_CLASS).is_empty());

        let _observer = start_annotating(&mut doc, &line_selector(), callback);
        doc.flush();
        assert_eq!(seen.borrow().len(), 4);
        assert_eq!(&seen.borrow()[2..], lines.as_slice());
    }

    #[test]
    fn test_double_start_installs_two_listeners() {
        let (mut doc, _) = page_with_lines(1);
        let (_, callback) = recorder();
        let first = start_annotating(&mut doc, &line_selector(), Rc::clone(&callback));
        let second = start_annotating(&mut doc, &line_selector(), callback);
        assert_eq!(doc.listener_count(), 2);
        stop_annotating(&mut doc, first);
        stop_annotating(&mut doc, second);
        assert_eq!(doc.listener_count(), 0);
    }
}
