//! CSS selectors over the page model, parsed and matched by the
//! `selectors` crate.

use std::fmt;

use cssparser::ToCss;
use precomputed_hash::PrecomputedHash;
use selectors::attr::{AttrSelectorOperation, CaseSensitivity, NamespaceConstraint};
use selectors::matching::{self, ElementSelectorFlags, MatchingContext};
use selectors::parser::{self, ParseRelative, SelectorList, SelectorParseErrorKind};
use selectors::{NthIndexCache, OpaqueElement};

use super::ElementRef;
use crate::error::{CovlayError, Result};

/// A parsed, comma-separated selector list.
#[derive(Clone)]
pub struct Selector {
    source: String,
    list: SelectorList<Simple>,
}

impl Selector {
    pub fn parse(source: &str) -> Result<Self> {
        let mut input = cssparser::ParserInput::new(source);
        let mut parser = cssparser::Parser::new(&mut input);
        let list = SelectorList::parse(&SelectorParser, &mut parser, ParseRelative::No)
            .map_err(|e| CovlayError::Selector(format!("{:?} in '{source}'", e.kind)))?;
        Ok(Self {
            source: source.to_string(),
            list,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn matches(&self, element: &ElementRef<'_>) -> bool {
        let mut nth_index_cache = NthIndexCache::default();
        let mut context = MatchingContext::new(
            matching::MatchingMode::Normal,
            None,
            &mut nth_index_cache,
            matching::QuirksMode::NoQuirks,
            matching::NeedsSelectorFlags::No,
            matching::IgnoreNthChildForInvalidation::No,
        );
        self.list
            .0
            .iter()
            .any(|s| matching::matches_selector(s, 0, None, element, &mut context))
    }
}

impl PartialEq for Selector {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

impl Eq for Selector {}

impl fmt::Debug for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Selector").field(&self.source).finish()
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

// ---------------------------------------------------------------------------
// Selector implementation: plain strings, no pseudo-classes or elements
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
struct SelectorParser;

impl<'i> parser::Parser<'i> for SelectorParser {
    type Impl = Simple;
    type Error = SelectorParseErrorKind<'i>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Simple;

impl parser::SelectorImpl for Simple {
    type ExtraMatchingData<'a> = ();
    type AttrValue = CssString;
    type Identifier = CssName;
    type LocalName = CssName;
    type NamespacePrefix = CssName;
    type NamespaceUrl = CssName;
    type BorrowedNamespaceUrl = CssName;
    type BorrowedLocalName = CssName;
    type NonTSPseudoClass = NonTSPseudoClass;
    type PseudoElement = PseudoElement;
}

/// Attribute value in a selector.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct CssString(String);

impl From<&str> for CssString {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl AsRef<str> for CssString {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl ToCss for CssString {
    fn to_css<W: fmt::Write>(&self, dest: &mut W) -> fmt::Result {
        cssparser::serialize_string(&self.0, dest)
    }
}

/// Tag, id, class, attribute name or namespace in a selector.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct CssName(String);

impl From<&str> for CssName {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl AsRef<str> for CssName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl ToCss for CssName {
    fn to_css<W: fmt::Write>(&self, dest: &mut W) -> fmt::Result {
        cssparser::serialize_identifier(&self.0, dest)
    }
}

impl PrecomputedHash for CssName {
    // FNV-1a
    fn precomputed_hash(&self) -> u32 {
        self.0.bytes().fold(0x811c_9dc5, |hash: u32, byte| {
            (hash ^ u32::from(byte)).wrapping_mul(0x0100_0193)
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NonTSPseudoClass {}

impl parser::NonTSPseudoClass for NonTSPseudoClass {
    type Impl = Simple;

    fn is_active_or_hover(&self) -> bool {
        false
    }

    fn is_user_action_state(&self) -> bool {
        false
    }
}

impl ToCss for NonTSPseudoClass {
    fn to_css<W: fmt::Write>(&self, _dest: &mut W) -> fmt::Result {
        match *self {}
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PseudoElement {}

impl parser::PseudoElement for PseudoElement {
    type Impl = Simple;
}

impl ToCss for PseudoElement {
    fn to_css<W: fmt::Write>(&self, _dest: &mut W) -> fmt::Result {
        match *self {}
    }
}

// ---------------------------------------------------------------------------
// Matching against the page model
// ---------------------------------------------------------------------------

impl fmt::Debug for ElementRef<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{}> {:?}", self.doc.tag(self.id), self.id)
    }
}

impl<'a> ElementRef<'a> {
    fn wrap(&self, id: super::NodeId) -> Self {
        ElementRef { doc: self.doc, id }
    }

    fn sibling(&self, offset: isize) -> Option<Self> {
        let parent = self.doc.parent(self.id)?;
        let siblings = self.doc.children(parent);
        let pos = siblings.iter().position(|c| *c == self.id)?;
        let target = pos.checked_add_signed(offset)?;
        siblings.get(target).map(|id| self.wrap(*id))
    }
}

impl selectors::Element for ElementRef<'_> {
    type Impl = Simple;

    fn opaque(&self) -> OpaqueElement {
        OpaqueElement::new(self.doc.opaque_node(self.id))
    }

    fn parent_element(&self) -> Option<Self> {
        self.doc.parent(self.id).map(|id| self.wrap(id))
    }

    fn parent_node_is_shadow_root(&self) -> bool {
        false
    }

    fn containing_shadow_host(&self) -> Option<Self> {
        None
    }

    fn is_pseudo_element(&self) -> bool {
        false
    }

    fn prev_sibling_element(&self) -> Option<Self> {
        self.sibling(-1)
    }

    fn next_sibling_element(&self) -> Option<Self> {
        self.sibling(1)
    }

    fn first_element_child(&self) -> Option<Self> {
        self.doc.children(self.id).first().map(|id| self.wrap(*id))
    }

    fn is_html_element_in_html_document(&self) -> bool {
        true
    }

    fn has_local_name(&self, local_name: &CssName) -> bool {
        self.doc.tag(self.id) == local_name.0
    }

    fn has_namespace(&self, ns: &CssName) -> bool {
        ns.0.is_empty()
    }

    fn is_same_type(&self, other: &Self) -> bool {
        self.doc.tag(self.id) == other.doc.tag(other.id)
    }

    fn attr_matches(
        &self,
        ns: &NamespaceConstraint<&CssName>,
        local_name: &CssName,
        operation: &AttrSelectorOperation<&CssString>,
    ) -> bool {
        if matches!(ns, NamespaceConstraint::Specific(url) if !url.0.is_empty()) {
            return false;
        }
        self.doc
            .attribute(self.id, &local_name.0)
            .is_some_and(|value| operation.eval_str(value))
    }

    fn match_non_ts_pseudo_class(
        &self,
        pc: &NonTSPseudoClass,
        _context: &mut MatchingContext<Self::Impl>,
    ) -> bool {
        match *pc {}
    }

    fn match_pseudo_element(
        &self,
        pe: &PseudoElement,
        _context: &mut MatchingContext<Self::Impl>,
    ) -> bool {
        match *pe {}
    }

    fn apply_selector_flags(&self, _flags: ElementSelectorFlags) {}

    fn is_link(&self) -> bool {
        self.doc.tag(self.id) == "a" && self.doc.attribute(self.id, "href").is_some()
    }

    fn is_html_slot_element(&self) -> bool {
        false
    }

    fn has_id(&self, id: &CssName, case_sensitivity: CaseSensitivity) -> bool {
        self.doc
            .attribute(self.id, "id")
            .is_some_and(|value| case_sensitivity.eq(value.as_bytes(), id.0.as_bytes()))
    }

    fn has_class(&self, name: &CssName, case_sensitivity: CaseSensitivity) -> bool {
        self.doc.attribute(self.id, "class").is_some_and(|classes| {
            classes
                .split_whitespace()
                .any(|class| case_sensitivity.eq(class.as_bytes(), name.0.as_bytes()))
        })
    }

    fn imported_part(&self, _name: &CssName) -> Option<CssName> {
        None
    }

    fn is_part(&self, _name: &CssName) -> bool {
        false
    }

    fn is_empty(&self) -> bool {
        self.doc.children(self.id).is_empty() && self.doc.own_text(self.id).is_empty()
    }

    fn is_root(&self) -> bool {
        self.id == self.doc.root()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::Document;

    fn matches(doc: &Document, id: crate::dom::NodeId, selector: &str) -> bool {
        doc.matches(id, &Selector::parse(selector).unwrap())
    }

    #[test]
    fn test_parse_errors() {
        assert!(Selector::parse("").is_err());
        assert!(Selector::parse("td >").is_err());
        assert!(Selector::parse("[class").is_err());
        assert!(matches!(
            Selector::parse("a!b"),
            Err(CovlayError::Selector(msg)) if msg.contains("a!b")
        ));
    }

    #[test]
    fn test_compound_and_negation() {
        let mut doc = Document::new();
        let el = doc.create_element_with(
            "td",
            &[("id", "L7"), ("class", "blob-code codecov-seen-mark"), ("data-split-side", "right")],
        );
        doc.append_child(doc.body(), el);

        assert!(matches(&doc, el, "td.blob-code"));
        assert!(matches(&doc, el, "TD#L7"));
        assert!(matches(&doc, el, "[data-split-side=right]"));
        assert!(!matches(&doc, el, "td:not(.codecov-seen-mark)"));
        assert!(matches(&doc, el, ".blob-code:not([data-split-side='left'])"));
    }

    #[test]
    fn test_attribute_operators() {
        let mut doc = Document::new();
        let el = doc.create_element_with(
            "section",
            &[("class", "x PullRequestFilesToolbar-module__toolbar--abc")],
        );
        doc.append_child(doc.body(), el);

        assert!(matches(&doc, el, "section[class*=' PullRequestFilesToolbar-module__toolbar']"));
        assert!(matches(&doc, el, "[class^='x ']"));
        assert!(matches(&doc, el, "[class$='abc']"));
        assert!(matches(&doc, el, "[class~=x]"));
        assert!(!matches(&doc, el, "[class^='Pull']"));
        assert!(!matches(&doc, el, "[data-missing]"));
    }

    #[test]
    fn test_combinators() {
        let mut doc = Document::new();
        let file = doc.create_element_with("div", &[("class", "js-file")]);
        let table = doc.create_element("table");
        let row = doc.create_element("tr");
        let cell = doc.create_element_with("td", &[("class", "blob-code")]);
        doc.append_child(doc.body(), file);
        doc.append_child(file, table);
        doc.append_child(table, row);
        doc.append_child(row, cell);

        assert!(matches(&doc, cell, ".js-file td"));
        assert!(matches(&doc, cell, "tr > td.blob-code"));
        assert!(!matches(&doc, cell, ".js-file > td"));
        assert!(matches(&doc, cell, "span, td"));
    }
}
