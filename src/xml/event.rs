use crate::core::{PipeError, Result};
use crate::xml::tree::{Content, Element, Tree};

/// One boundary in a streamed structured-content sequence.
///
/// Processor outputs are written as a sequence of these events rather than
/// materialized trees; buffering happens only where a consumer needs random
/// access (caching, path evaluation).
#[derive(Debug, Clone, PartialEq)]
pub enum XmlEvent {
    StartElement {
        name: String,
        attributes: Vec<(String, String)>,
    },
    Text(String),
    EndElement(String),
}

/// Streaming consumer of structured events.
pub trait EventSink {
    fn event(&mut self, event: &XmlEvent) -> Result<()>;
}

impl<S: EventSink + ?Sized> EventSink for &mut S {
    fn event(&mut self, event: &XmlEvent) -> Result<()> {
        (**self).event(event)
    }
}

/// Sink that buffers an event sequence back into a [`Tree`].
pub struct TreeBuilder {
    stack: Vec<Element>,
    root: Option<Element>,
}

impl TreeBuilder {
    pub fn new() -> Self {
        Self {
            stack: Vec::new(),
            root: None,
        }
    }

    /// Consume the builder, returning the buffered tree.
    ///
    /// Fails if the event sequence was incomplete or had no root element.
    pub fn finish(self) -> Result<Tree> {
        if !self.stack.is_empty() {
            return Err(PipeError::Configuration(
                "Event sequence ended with unclosed elements".into(),
            ));
        }
        match self.root {
            Some(root) => Ok(Tree::new(root)),
            None => Err(PipeError::Configuration(
                "Event sequence contained no root element".into(),
            )),
        }
    }
}

impl Default for TreeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSink for TreeBuilder {
    fn event(&mut self, event: &XmlEvent) -> Result<()> {
        match event {
            XmlEvent::StartElement { name, attributes } => {
                if self.root.is_some() && self.stack.is_empty() {
                    return Err(PipeError::Configuration(
                        "Event sequence contained more than one root element".into(),
                    ));
                }
                let mut element = Element::new(name);
                for (attr_name, attr_value) in attributes {
                    element.set_attribute(attr_name, attr_value);
                }
                self.stack.push(element);
            }
            XmlEvent::Text(text) => match self.stack.last_mut() {
                Some(parent) => parent.push_text(text),
                None => {
                    return Err(PipeError::Configuration(
                        "Text event outside of any element".into(),
                    ))
                }
            },
            XmlEvent::EndElement(name) => {
                let element = self.stack.pop().ok_or_else(|| {
                    PipeError::Configuration(format!("Unbalanced end of element '{}'", name))
                })?;
                if element.name() != name {
                    return Err(PipeError::Configuration(format!(
                        "End of element '{}' does not match open element '{}'",
                        name,
                        element.name()
                    )));
                }
                match self.stack.last_mut() {
                    Some(parent) => parent.push_child(element),
                    None => self.root = Some(element),
                }
            }
        }
        Ok(())
    }
}

/// Replay a buffered element as an event sequence.
pub fn replay_element(element: &Element, sink: &mut dyn EventSink) -> Result<()> {
    sink.event(&XmlEvent::StartElement {
        name: element.name().to_string(),
        attributes: element.attributes().to_vec(),
    })?;
    for child in element.children() {
        match child {
            Content::Element(inner) => replay_element(inner, sink)?,
            Content::Text(text) => sink.event(&XmlEvent::Text(text.clone()))?,
        }
    }
    sink.event(&XmlEvent::EndElement(element.name().to_string()))
}
