//! In-memory model of the host page the overlay annotates.
//!
//! The document is an arena of elements with attributes, inline styles and
//! text. It keeps a list of style rules that attach named animations to
//! matching elements; [`Document::flush`] plays the part of a layout pass
//! and dispatches `animationstart` to registered listeners whenever an
//! element starts running an animation.
//!
//! Removing an element releases its subtree. Arena slots are reused, and a
//! [`NodeId`] carries the generation of its slot so an id kept past removal
//! never aliases a newer element: reads through it come back empty and
//! writes are ignored.

pub mod selector;

use std::collections::BTreeMap;
use std::rc::Rc;

pub use selector::Selector;

/// Upper bound on layout passes per flush, in case listeners keep
/// restarting animations.
const MAX_LAYOUT_PASSES: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId {
    index: u32,
    generation: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnimationEvent {
    pub target: NodeId,
    pub animation_name: String,
    /// Set when the animation ran on `::before`/`::after` of the target.
    pub pseudo_element: Option<String>,
}

pub type AnimationListener = dyn Fn(&mut Document, &AnimationEvent);

/// A rule of the page's style sheet, identified like a `<style id=..>`.
#[derive(Debug, Clone)]
pub enum StyleRule {
    Keyframes {
        id: String,
        name: String,
    },
    /// `:where(selector):not(.unless_class) { animation: <name> }`
    Animation {
        id: String,
        selector: Selector,
        unless_class: String,
        animation: String,
    },
}

impl StyleRule {
    fn id(&self) -> &str {
        match self {
            StyleRule::Keyframes { id, .. } | StyleRule::Animation { id, .. } => id,
        }
    }
}

#[derive(Debug, Clone)]
struct Node {
    tag: String,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    attrs: BTreeMap<String, String>,
    style: BTreeMap<String, String>,
    text: String,
    animation: Option<String>,
}

impl Node {
    fn new(tag: &str) -> Self {
        Self {
            tag: tag.to_ascii_lowercase(),
            parent: None,
            children: Vec::new(),
            attrs: BTreeMap::new(),
            style: BTreeMap::new(),
            text: String::new(),
            animation: None,
        }
    }
}

#[derive(Debug)]
struct Slot {
    generation: u32,
    node: Option<Node>,
}

pub struct Document {
    slots: Vec<Slot>,
    free: Vec<u32>,
    root: NodeId,
    head: NodeId,
    body: NodeId,
    rules: Vec<StyleRule>,
    listeners: Vec<(ListenerId, Rc<AnimationListener>)>,
    next_listener: u64,
}

/// Borrowed element handle used for selector matching.
#[derive(Clone, Copy)]
pub struct ElementRef<'a> {
    doc: &'a Document,
    id: NodeId,
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl Document {
    /// An empty page: `<html><head></head><body></body></html>`.
    pub fn new() -> Self {
        let root = NodeId {
            index: 0,
            generation: 0,
        };
        let mut doc = Self {
            slots: vec![Slot {
                generation: 0,
                node: Some(Node::new("html")),
            }],
            free: Vec::new(),
            root,
            head: root,
            body: root,
            rules: Vec::new(),
            listeners: Vec::new(),
            next_listener: 0,
        };
        doc.head = doc.create_element("head");
        doc.body = doc.create_element("body");
        doc.append_child(doc.root, doc.head);
        doc.append_child(doc.root, doc.body);
        doc
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn head(&self) -> NodeId {
        self.head
    }

    pub fn body(&self) -> NodeId {
        self.body
    }

    /// Number of arena slots, live or free.
    pub fn arena_len(&self) -> usize {
        self.slots.len()
    }

    /// Number of live elements, attached or not.
    pub fn live_nodes(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    fn node(&self, id: NodeId) -> Option<&Node> {
        self.slots
            .get(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.node.as_ref())
    }

    fn node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.slots
            .get_mut(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.node.as_mut())
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.node(id).is_some()
    }

    /// Stable address of the node's slot, for identity comparisons.
    fn opaque_node(&self, id: NodeId) -> &Slot {
        &self.slots[id.index as usize]
    }

    // -- Tree -------------------------------------------------------------

    /// Create a detached element.
    pub fn create_element(&mut self, tag: &str) -> NodeId {
        match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                slot.node = Some(Node::new(tag));
                NodeId {
                    index,
                    generation: slot.generation,
                }
            }
            None => {
                self.slots.push(Slot {
                    generation: 0,
                    node: Some(Node::new(tag)),
                });
                NodeId {
                    index: (self.slots.len() - 1) as u32,
                    generation: 0,
                }
            }
        }
    }

    /// Create a detached element with attributes.
    pub fn create_element_with(&mut self, tag: &str, attrs: &[(&str, &str)]) -> NodeId {
        let id = self.create_element(tag);
        for (name, value) in attrs {
            self.set_attribute(id, name, value);
        }
        id
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).and_then(|n| n.parent)
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        self.node(id).map_or(&[], |n| n.children.as_slice())
    }

    pub fn last_child(&self, id: NodeId) -> Option<NodeId> {
        self.children(id).last().copied()
    }

    pub fn next_sibling(&self, id: NodeId) -> Option<NodeId> {
        let parent = self.parent(id)?;
        let siblings = self.children(parent);
        let pos = siblings.iter().position(|c| *c == id)?;
        siblings.get(pos + 1).copied()
    }

    pub fn tag(&self, id: NodeId) -> &str {
        self.node(id).map_or("", |n| n.tag.as_str())
    }

    pub fn append_child(&mut self, parent: NodeId, child: NodeId) {
        self.insert_before(parent, child, None);
    }

    pub fn prepend_child(&mut self, parent: NodeId, child: NodeId) {
        let first = self.children(parent).first().copied();
        self.insert_before(parent, child, first);
    }

    /// Insert `child` into `parent` before `reference`, or at the end when
    /// `reference` is `None` or not a child of `parent`.
    pub fn insert_before(&mut self, parent: NodeId, child: NodeId, reference: Option<NodeId>) {
        if child == parent
            || !self.contains(parent)
            || !self.contains(child)
            || self.is_ancestor(child, parent)
        {
            return;
        }
        self.detach(child);
        if let Some(node) = self.node_mut(parent) {
            let pos = reference
                .and_then(|r| node.children.iter().position(|c| *c == r))
                .unwrap_or(node.children.len());
            node.children.insert(pos, child);
        }
        if let Some(node) = self.node_mut(child) {
            node.parent = Some(parent);
        }
    }

    /// Insert `child` right after `reference`. Returns false when
    /// `reference` has no parent.
    pub fn insert_after(&mut self, reference: NodeId, child: NodeId) -> bool {
        let Some(parent) = self.parent(reference) else {
            return false;
        };
        let next = self.next_sibling(reference);
        self.insert_before(parent, child, next);
        true
    }

    /// Remove an element and its subtree from the page and release them.
    pub fn remove(&mut self, id: NodeId) {
        if id == self.root || !self.contains(id) {
            return;
        }
        self.detach(id);
        for node in self.subtree(id) {
            let slot = &mut self.slots[node.index as usize];
            slot.node = None;
            slot.generation = slot.generation.wrapping_add(1);
            self.free.push(node.index);
        }
    }

    fn detach(&mut self, id: NodeId) {
        let Some(parent) = self.node_mut(id).and_then(|n| n.parent.take()) else {
            return;
        };
        if let Some(node) = self.node_mut(parent) {
            node.children.retain(|c| *c != id);
        }
    }

    fn is_ancestor(&self, ancestor: NodeId, of: NodeId) -> bool {
        let mut current = self.parent(of);
        while let Some(id) = current {
            if id == ancestor {
                return true;
            }
            current = self.parent(id);
        }
        false
    }

    pub fn is_connected(&self, id: NodeId) -> bool {
        id == self.root || self.is_ancestor(self.root, id)
    }

    /// `id` and all of its descendants, in document order.
    fn subtree(&self, id: NodeId) -> Vec<NodeId> {
        if !self.contains(id) {
            return Vec::new();
        }
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            out.push(current);
            stack.extend(self.children(current).iter().rev());
        }
        out
    }

    // -- Attributes, classes, text, style ---------------------------------

    pub fn attribute(&self, id: NodeId, name: &str) -> Option<&str> {
        self.node(id)?.attrs.get(name).map(String::as_str)
    }

    pub fn set_attribute(&mut self, id: NodeId, name: &str, value: &str) {
        if let Some(node) = self.node_mut(id) {
            node.attrs.insert(name.to_string(), value.to_string());
        }
    }

    pub fn remove_attribute(&mut self, id: NodeId, name: &str) {
        if let Some(node) = self.node_mut(id) {
            node.attrs.remove(name);
        }
    }

    pub fn has_class(&self, id: NodeId, class: &str) -> bool {
        self.attribute(id, "class")
            .is_some_and(|c| c.split_whitespace().any(|name| name == class))
    }

    pub fn add_class(&mut self, id: NodeId, class: &str) {
        if self.has_class(id, class) {
            return;
        }
        let Some(node) = self.node_mut(id) else {
            return;
        };
        let updated = match node.attrs.get("class") {
            Some(existing) if !existing.trim().is_empty() => format!("{existing} {class}"),
            _ => class.to_string(),
        };
        node.attrs.insert("class".to_string(), updated);
    }

    pub fn remove_class(&mut self, id: NodeId, class: &str) {
        let Some(node) = self.node_mut(id) else {
            return;
        };
        let Some(existing) = node.attrs.get("class") else {
            return;
        };
        let kept = existing
            .split_whitespace()
            .filter(|name| *name != class)
            .collect::<Vec<_>>()
            .join(" ");
        node.attrs.insert("class".to_string(), kept);
    }

    /// Replace the element's own text and drop its children.
    pub fn set_text(&mut self, id: NodeId, text: &str) {
        for child in self.children(id).to_vec() {
            self.remove(child);
        }
        if let Some(node) = self.node_mut(id) {
            node.text = text.to_string();
        }
    }

    /// Text held directly by the element, without its descendants.
    pub fn own_text(&self, id: NodeId) -> &str {
        self.node(id).map_or("", |n| n.text.as_str())
    }

    /// Text of the element followed by the text of its descendants.
    pub fn text_content(&self, id: NodeId) -> String {
        self.subtree(id)
            .into_iter()
            .map(|n| self.own_text(n))
            .collect()
    }

    pub fn set_style(&mut self, id: NodeId, property: &str, value: &str) {
        if let Some(node) = self.node_mut(id) {
            node.style.insert(property.to_string(), value.to_string());
        }
    }

    pub fn style(&self, id: NodeId, property: &str) -> Option<&str> {
        self.node(id)?.style.get(property).map(String::as_str)
    }

    // -- Queries ----------------------------------------------------------

    pub fn element(&self, id: NodeId) -> ElementRef<'_> {
        ElementRef { doc: self, id }
    }

    pub fn matches(&self, id: NodeId, selector: &Selector) -> bool {
        self.contains(id) && selector.matches(&self.element(id))
    }

    pub fn query_selector(&self, selector: &Selector) -> Option<NodeId> {
        self.query_selector_within(self.root, selector)
    }

    pub fn query_selector_all(&self, selector: &Selector) -> Vec<NodeId> {
        self.query_selector_all_within(self.root, selector)
    }

    /// First descendant of `scope` (excluding `scope`) matching `selector`.
    pub fn query_selector_within(&self, scope: NodeId, selector: &Selector) -> Option<NodeId> {
        self.subtree(scope)
            .into_iter()
            .skip(1)
            .find(|id| self.matches(*id, selector))
    }

    pub fn query_selector_all_within(&self, scope: NodeId, selector: &Selector) -> Vec<NodeId> {
        self.subtree(scope)
            .into_iter()
            .skip(1)
            .filter(|id| self.matches(*id, selector))
            .collect()
    }

    /// Nearest inclusive ancestor of `id` matching `selector`.
    pub fn closest(&self, id: NodeId, selector: &Selector) -> Option<NodeId> {
        let mut current = Some(id);
        while let Some(node) = current {
            if self.matches(node, selector) {
                return Some(node);
            }
            current = self.parent(node);
        }
        None
    }

    pub fn get_element_by_id(&self, element_id: &str) -> Option<NodeId> {
        self.subtree(self.root)
            .into_iter()
            .find(|id| self.attribute(*id, "id") == Some(element_id))
    }

    /// Connected elements carrying `class`, in document order.
    pub fn elements_with_class(&self, class: &str) -> Vec<NodeId> {
        self.subtree(self.root)
            .into_iter()
            .filter(|id| self.has_class(*id, class))
            .collect()
    }

    // -- Style sheet and animation events ----------------------------------

    pub fn insert_style_rule(&mut self, rule: StyleRule) {
        self.rules.push(rule);
    }

    /// Remove every rule with the given id. Returns whether any existed.
    pub fn remove_style_rule(&mut self, id: &str) -> bool {
        let before = self.rules.len();
        self.rules.retain(|r| r.id() != id);
        self.rules.len() != before
    }

    pub fn has_style_rule(&self, id: &str) -> bool {
        self.rules.iter().any(|r| r.id() == id)
    }

    pub fn add_animation_listener(&mut self, listener: Rc<AnimationListener>) -> ListenerId {
        self.next_listener += 1;
        let id = ListenerId(self.next_listener);
        self.listeners.push((id, listener));
        id
    }

    /// Remove a listener by identity. Returns whether it was registered.
    pub fn remove_animation_listener(&mut self, id: ListenerId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(lid, _)| *lid != id);
        self.listeners.len() != before
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    /// Deliver one `animationstart` event to every listener registered at
    /// the time of the call.
    pub fn dispatch_animation_start(&mut self, event: &AnimationEvent) {
        let ids: Vec<ListenerId> = self.listeners.iter().map(|(id, _)| *id).collect();
        for id in ids {
            let listener = self
                .listeners
                .iter()
                .find(|(lid, _)| *lid == id)
                .map(|(_, l)| Rc::clone(l));
            if let Some(listener) = listener {
                listener(self, event);
            }
        }
    }

    /// Run layout: start animations on newly matching elements and
    /// dispatch their `animationstart` events. Returns the number of events
    /// dispatched.
    pub fn flush(&mut self) -> usize {
        let mut dispatched = 0;
        for _ in 0..MAX_LAYOUT_PASSES {
            let events = self.apply_animations();
            if events.is_empty() {
                break;
            }
            for event in &events {
                self.dispatch_animation_start(event);
            }
            dispatched += events.len();
        }
        dispatched
    }

    fn apply_animations(&mut self) -> Vec<AnimationEvent> {
        let mut events = Vec::new();
        for id in self.subtree(self.root) {
            let wanted = self.animation_for(id);
            let Some(node) = self.node_mut(id) else {
                continue;
            };
            if node.animation != wanted {
                if let Some(name) = &wanted {
                    events.push(AnimationEvent {
                        target: id,
                        animation_name: name.clone(),
                        pseudo_element: None,
                    });
                }
                node.animation = wanted;
            }
        }
        events
    }

    /// The animation the style sheet assigns to `id`; later rules win, and
    /// an animation only runs when its keyframes are defined.
    fn animation_for(&self, id: NodeId) -> Option<String> {
        self.rules.iter().rev().find_map(|rule| match rule {
            StyleRule::Animation {
                selector,
                unless_class,
                animation,
                ..
            } if !self.has_class(id, unless_class)
                && self.matches(id, selector)
                && self.has_keyframes(animation) =>
            {
                Some(animation.clone())
            }
            _ => None,
        })
    }

    fn has_keyframes(&self, name: &str) -> bool {
        self.rules
            .iter()
            .any(|r| matches!(r, StyleRule::Keyframes { name: n, .. } if n == name))
    }
}
