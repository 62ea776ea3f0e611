//! Owned XML element tree.
//!
//! Stanzas travel inside BOSH `<body/>` wrappers as plain XML. The engine
//! needs a small, owned tree it can match against, clone into outbound
//! bodies, and serialize deterministically:
//!
//! - Names are stored as written (`stream:features` keeps its prefix)
//! - `xmlns` declarations are ordinary attributes, the way handler
//!   namespace filters look them up
//! - Attribute order is preserved so serialized bodies are stable
//!
//! Parsing is delegated to [`quick_xml`]; this module only builds the tree.

use std::{fmt, str::FromStr};

use quick_xml::{
    Reader,
    escape::{escape, partial_escape},
    events::{BytesStart, Event},
};

use crate::errors::{ProtocolError, Result};

/// Deepest element nesting [`Element::parse`] accepts, the root counting as
/// level one. Traversals recurse, so the limit bounds their stack use.
pub const MAX_DEPTH: usize = 256;

/// A child node of an [`Element`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    /// Nested element
    Element(Element),
    /// Character data (already unescaped)
    Text(String),
}

/// An XML element with attributes and ordered child nodes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    name: String,
    attrs: Vec<(String, String)>,
    nodes: Vec<Node>,
}

impl Element {
    /// Create an empty element with the given (possibly prefixed) name
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), attrs: Vec::new(), nodes: Vec::new() }
    }

    /// Builder: set an attribute and return the element
    #[must_use]
    pub fn with_attr(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_attr(key, value);
        self
    }

    /// Builder: append a child element
    #[must_use]
    pub fn with_child(mut self, child: Element) -> Self {
        self.push_child(child);
        self
    }

    /// Builder: append a text node
    #[must_use]
    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.push_text(text);
        self
    }

    /// Qualified tag name as written on the wire
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Tag name without its namespace prefix
    #[must_use]
    pub fn local_name(&self) -> &str {
        match self.name.split_once(':') {
            Some((_, local)) => local,
            None => &self.name,
        }
    }

    /// Case-insensitive tag comparison.
    ///
    /// An unprefixed `name` also matches the local part of a prefixed tag, so
    /// `features` matches both `<features/>` and `<stream:features/>`.
    #[must_use]
    pub fn is_named(&self, name: &str) -> bool {
        if self.name.eq_ignore_ascii_case(name) {
            return true;
        }
        !name.contains(':') && self.local_name().eq_ignore_ascii_case(name)
    }

    /// Look up an attribute value
    #[must_use]
    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attrs.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
    }

    /// Set an attribute, replacing an existing value in place
    pub fn set_attr(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.attrs.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.attrs.push((key, value)),
        }
    }

    /// Remove an attribute, returning its previous value
    pub fn remove_attr(&mut self, key: &str) -> Option<String> {
        let index = self.attrs.iter().position(|(k, _)| k == key)?;
        Some(self.attrs.remove(index).1)
    }

    /// Attributes in document order
    pub fn attrs(&self) -> impl Iterator<Item = (&str, &str)> {
        self.attrs.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// The element's own `xmlns` declaration, if any
    #[must_use]
    pub fn xmlns(&self) -> Option<&str> {
        self.attr("xmlns")
    }

    /// All child nodes, text included
    #[must_use]
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// Immediate element children in document order
    pub fn children(&self) -> impl Iterator<Item = &Element> {
        self.nodes.iter().filter_map(|node| match node {
            Node::Element(element) => Some(element),
            Node::Text(_) => None,
        })
    }

    /// First immediate child with the given name
    #[must_use]
    pub fn child(&self, name: &str) -> Option<&Element> {
        self.children().find(|child| child.is_named(name))
    }

    /// Every descendant (excluding `self`) with the given name, depth-first
    #[must_use]
    pub fn descendants(&self, name: &str) -> Vec<&Element> {
        let mut found = Vec::new();
        self.collect_descendants(name, &mut found);
        found
    }

    fn collect_descendants<'a>(&'a self, name: &str, found: &mut Vec<&'a Element>) {
        for child in self.children() {
            if child.is_named(name) {
                found.push(child);
            }
            child.collect_descendants(name, found);
        }
    }

    /// True if any descendant carries the given name
    #[must_use]
    pub fn has_descendant(&self, name: &str) -> bool {
        self.children().any(|child| child.is_named(name) || child.has_descendant(name))
    }

    /// Concatenated text of the immediate text nodes
    #[must_use]
    pub fn text(&self) -> String {
        self.nodes
            .iter()
            .filter_map(|node| match node {
                Node::Text(text) => Some(text.as_str()),
                Node::Element(_) => None,
            })
            .collect()
    }

    /// Append a child element
    pub fn push_child(&mut self, child: Element) {
        self.nodes.push(Node::Element(child));
    }

    /// Append a text node
    pub fn push_text(&mut self, text: impl Into<String>) {
        self.nodes.push(Node::Text(text.into()));
    }

    /// Parse a complete document with exactly one root element.
    ///
    /// XML declarations, comments and processing instructions are skipped.
    ///
    /// # Errors
    ///
    /// - `Xml` if the reader rejects the input (mismatched tags, bad
    ///   attributes, broken entities)
    /// - `EmptyDocument` / `MultipleRoots` / `Unclosed` for structural
    ///   problems
    /// - `TooDeep` past [`MAX_DEPTH`] levels of nesting
    pub fn parse(input: &str) -> Result<Element> {
        let mut reader = Reader::from_str(input);
        let mut stack: Vec<Element> = Vec::new();
        let mut root: Option<Element> = None;

        loop {
            match reader.read_event()? {
                Event::Start(start) => {
                    check_depth(stack.len())?;
                    stack.push(element_from_start(&start)?);
                },
                Event::Empty(start) => {
                    check_depth(stack.len())?;
                    let element = element_from_start(&start)?;
                    attach(&mut stack, &mut root, element)?;
                },
                Event::End(_) => {
                    let Some(done) = stack.pop() else {
                        return Err(ProtocolError::Xml("unmatched end tag".to_string()));
                    };
                    attach(&mut stack, &mut root, done)?;
                },
                Event::Text(text) => {
                    if let Some(top) = stack.last_mut() {
                        let text = text.unescape()?;
                        if !text.is_empty() {
                            top.push_text(text.into_owned());
                        }
                    }
                },
                Event::CData(data) => {
                    if let Some(top) = stack.last_mut() {
                        top.push_text(std::str::from_utf8(&data)?);
                    }
                },
                Event::Eof => break,
                _ => {},
            }
        }

        if let Some(open) = stack.pop() {
            return Err(ProtocolError::Unclosed(open.name));
        }
        root.ok_or(ProtocolError::EmptyDocument)
    }

    /// Serialize to a compact XML string
    #[must_use]
    pub fn to_xml(&self) -> String {
        let mut out = String::new();
        self.write_into(&mut out);
        out
    }

    fn write_into(&self, out: &mut String) {
        out.push('<');
        out.push_str(&self.name);
        for (key, value) in &self.attrs {
            out.push(' ');
            out.push_str(key);
            out.push_str("=\"");
            out.push_str(&escape(value.as_str()));
            out.push('"');
        }

        if self.nodes.is_empty() {
            out.push_str("/>");
            return;
        }

        out.push('>');
        for node in &self.nodes {
            match node {
                Node::Element(child) => child.write_into(out),
                Node::Text(text) => out.push_str(&partial_escape(text.as_str())),
            }
        }
        out.push_str("</");
        out.push_str(&self.name);
        out.push('>');
    }
}

fn element_from_start(start: &BytesStart<'_>) -> Result<Element> {
    let name = std::str::from_utf8(start.name().as_ref())?.to_owned();
    let mut element = Element::new(name);
    for attr in start.attributes() {
        let attr = attr?;
        let key = std::str::from_utf8(attr.key.as_ref())?.to_owned();
        let value = attr.unescape_value()?.into_owned();
        element.attrs.push((key, value));
    }
    Ok(element)
}

/// Reject an element opened below `open` unclosed ancestors
fn check_depth(open: usize) -> Result<()> {
    if open >= MAX_DEPTH {
        return Err(ProtocolError::TooDeep { limit: MAX_DEPTH });
    }
    Ok(())
}

fn attach(stack: &mut [Element], root: &mut Option<Element>, element: Element) -> Result<()> {
    match stack.last_mut() {
        Some(parent) => parent.push_child(element),
        None if root.is_some() => return Err(ProtocolError::MultipleRoots),
        None => *root = Some(element),
    }
    Ok(())
}

impl fmt::Display for Element {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_xml())
    }
}

impl FromStr for Element {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self> {
        Element::parse(s)
    }
}
