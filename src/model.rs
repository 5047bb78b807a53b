//! The decoded document tree.
//!
//! A parent owns its attributes and children exclusively, in the order they appeared in the
//! token stream.

use crate::binxml::tokens::BinXmlFragmentHeader;
use crate::binxml::value_variant::BinXmlValue;
use crate::err::DecodeWarning;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    Element,
    Attribute,
    /// A value, either inline or substituted.
    Text,
    CData,
    CharRef,
    EntityRef,
    PiTarget,
    PiData,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub kind: NodeKind,
    /// Set for elements, attributes, entity references and PI targets.
    pub name: Option<String>,
    /// Set for text, CDATA, character references and PI data.
    pub value: Option<BinXmlValue>,
    /// Only elements have attributes.
    pub attributes: Vec<Node>,
    /// Element content, or the value nodes of an attribute.
    pub children: Vec<Node>,
}

impl Node {
    pub fn element(name: impl Into<String>) -> Self {
        Node::named(NodeKind::Element, name)
    }

    pub fn attribute(name: impl Into<String>) -> Self {
        Node::named(NodeKind::Attribute, name)
    }

    pub fn text(value: BinXmlValue) -> Self {
        Node::valued(NodeKind::Text, value)
    }

    pub(crate) fn named(kind: NodeKind, name: impl Into<String>) -> Self {
        Node {
            kind,
            name: Some(name.into()),
            value: None,
            attributes: Vec::new(),
            children: Vec::new(),
        }
    }

    pub(crate) fn valued(kind: NodeKind, value: BinXmlValue) -> Self {
        Node {
            kind,
            name: None,
            value: Some(value),
            attributes: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn is_element(&self) -> bool {
        self.kind == NodeKind::Element
    }

    /// Returns the first attribute called `name`.
    pub fn attribute_node(&self, name: &str) -> Option<&Node> {
        self.attributes.iter().find(|a| a.name() == Some(name))
    }

    /// Returns the text of the first attribute called `name`.
    pub fn attribute_value(&self, name: &str) -> Option<String> {
        self.attribute_node(name).map(Node::text_content)
    }

    /// Iterates over the child elements.
    pub fn child_elements(&self) -> impl Iterator<Item = &Node> {
        self.children.iter().filter(|c| c.is_element())
    }

    /// Returns the first child element called `name`.
    pub fn child(&self, name: &str) -> Option<&Node> {
        self.child_elements().find(|c| c.name() == Some(name))
    }

    /// Concatenates the rendered text of this node's non-element children.
    ///
    /// Null values render as nothing, entity references as `&name;`.
    pub fn text_content(&self) -> String {
        let mut out = String::new();

        for child in &self.children {
            match child.kind {
                NodeKind::Text | NodeKind::CData | NodeKind::PiData => {
                    if let Some(value) = child.value.as_ref().filter(|v| !v.is_null()) {
                        out.push_str(&value.to_string());
                    }
                }
                NodeKind::CharRef => {
                    if let Some(BinXmlValue::UInt16Type(c)) = child.value {
                        out.push_str(&format!("&#{};", c));
                    }
                }
                NodeKind::EntityRef => {
                    if let Some(name) = child.name() {
                        out.push_str(&format!("&{};", name));
                    }
                }
                _ => {}
            }
        }

        out
    }

    /// Counts this node and all nodes below it, attributes included.
    pub fn node_count(&self) -> usize {
        1 + self.attributes.iter().map(Node::node_count).sum::<usize>()
            + self.children.iter().map(Node::node_count).sum::<usize>()
    }
}

/// A decoded binary XML document.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Document {
    /// The first fragment header seen, if any.
    pub fragment_header: Option<BinXmlFragmentHeader>,
    /// Top-level nodes, usually a single element.
    pub roots: Vec<Node>,
    /// Non-fatal conditions, in the order they were recorded.
    pub warnings: Vec<DecodeWarning>,
}

impl Document {
    /// Returns the first top-level element.
    pub fn root_element(&self) -> Option<&Node> {
        self.roots.iter().find(|n| n.is_element())
    }

    pub fn node_count(&self) -> usize {
        self.roots.iter().map(Node::node_count).sum()
    }

    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }
}
