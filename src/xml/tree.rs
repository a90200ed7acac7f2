use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

use crate::core::Result;
use crate::xml::event::{replay_element, EventSink};

/// Child content of an element.
#[derive(Debug, Clone, PartialEq, Hash, Serialize, Deserialize)]
pub enum Content {
    Element(Element),
    Text(String),
}

/// A buffered element with attributes and ordered children.
///
/// Serde encodings of this model are the crate's persisted document form;
/// XML text parsing is deliberately out of scope.
#[derive(Debug, Clone, PartialEq, Hash, Serialize, Deserialize)]
pub struct Element {
    name: String,
    attributes: Vec<(String, String)>,
    children: Vec<Content>,
}

impl Element {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attributes: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn attributes(&self) -> &[(String, String)] {
        &self.attributes
    }

    pub fn children(&self) -> &[Content] {
        &self.children
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(attr_name, _)| attr_name == name)
            .map(|(_, value)| value.as_str())
    }

    /// Last-write-wins attribute assignment.
    pub fn set_attribute(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.attributes.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = value,
            None => self.attributes.push((name, value)),
        }
    }

    pub fn push_child(&mut self, child: Element) {
        self.children.push(Content::Element(child));
    }

    pub fn push_text(&mut self, text: impl Into<String>) {
        self.children.push(Content::Text(text.into()));
    }

    /// Builder-style attribute assignment.
    pub fn attr(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_attribute(name, value);
        self
    }

    /// Builder-style child element.
    pub fn child(mut self, child: Element) -> Self {
        self.push_child(child);
        self
    }

    /// Builder-style text content.
    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.push_text(text);
        self
    }

    /// Child elements together with their positions in `children`.
    pub fn child_elements(&self) -> impl Iterator<Item = (usize, &Element)> {
        self.children
            .iter()
            .enumerate()
            .filter_map(|(index, content)| match content {
                Content::Element(element) => Some((index, element)),
                Content::Text(_) => None,
            })
    }

    /// First child element with the given name.
    pub fn child_element(&self, name: &str) -> Option<&Element> {
        self.child_elements()
            .map(|(_, element)| element)
            .find(|element| element.name() == name)
    }

    /// Direct text content, concatenated.
    pub fn direct_text(&self) -> String {
        let mut out = String::new();
        for child in &self.children {
            if let Content::Text(text) = child {
                out.push_str(text);
            }
        }
        out
    }

    /// XPath-style string value: all descendant text, in document order.
    pub fn string_value(&self) -> String {
        let mut out = String::new();
        self.collect_text(&mut out);
        out
    }

    fn collect_text(&self, out: &mut String) {
        for child in &self.children {
            match child {
                Content::Text(text) => out.push_str(text),
                Content::Element(element) => element.collect_text(out),
            }
        }
    }
}

/// Position of an element within a tree: child indexes from the root.
///
/// Paths stay valid for as long as the tree is not mutated, which lets
/// evaluation state hold positions without borrowing the tree.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NodePath(pub Vec<usize>);

impl NodePath {
    pub fn root() -> Self {
        Self(Vec::new())
    }

    pub fn descend(&self, index: usize) -> Self {
        let mut indexes = self.0.clone();
        indexes.push(index);
        Self(indexes)
    }
}

/// A buffered document: one root element.
#[derive(Debug, Clone, PartialEq, Hash, Serialize, Deserialize)]
pub struct Tree {
    root: Element,
}

impl Tree {
    pub fn new(root: Element) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Element {
        &self.root
    }

    /// Resolve a node path; `None` if the path no longer points at an element.
    pub fn node(&self, path: &NodePath) -> Option<&Element> {
        let mut current = &self.root;
        for index in &path.0 {
            match current.children.get(*index) {
                Some(Content::Element(element)) => current = element,
                _ => return None,
            }
        }
        Some(current)
    }

    /// Replay the whole tree as an event sequence.
    pub fn replay(&self, sink: &mut dyn EventSink) -> Result<()> {
        replay_element(&self.root, sink)
    }

    /// Structural content digest, usable as a validity token.
    pub fn digest(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.root.hash(&mut hasher);
        hasher.finish()
    }
}
