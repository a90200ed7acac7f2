pub mod event;
pub mod tree;

pub use event::{EventSink, TreeBuilder, XmlEvent};
pub use tree::{Content, Element, NodePath, Tree};
