use crate::binxml::tokens::{
    BinXmlAttribute, BinXmlEntityReference, BinXmlFragmentHeader, BinXmlOpenStartElement,
    BinXmlProcessingInstructionTarget,
};
use crate::binxml::value_variant::BinXmlValue;
use crate::binxml::visitor::BinXmlVisitor;
use crate::err::{DecodeWarning, DeserializationError, DeserializationResult as Result};
use crate::model::{Document, Node, NodeKind};

use log::trace;

#[derive(Debug)]
struct PendingElement {
    node: Node,
    /// Set once `CloseStartElement` was seen; no attributes may follow.
    start_closed: bool,
    /// The attribute currently receiving value nodes.
    current_attribute: Option<Node>,
}

impl PendingElement {
    fn flush_attribute(&mut self) {
        if let Some(attribute) = self.current_attribute.take() {
            self.node.attributes.push(attribute);
        }
    }
}

/// Accumulates visitor events into a [`Document`].
#[derive(Debug, Default)]
pub struct DocumentBuilder {
    fragment_header: Option<BinXmlFragmentHeader>,
    stack: Vec<PendingElement>,
    roots: Vec<Node>,
}

impl DocumentBuilder {
    pub fn new() -> Self {
        DocumentBuilder::default()
    }

    /// Returns the finished document. Elements still open are closed implicitly.
    pub fn finish(mut self, warnings: Vec<DecodeWarning>) -> Document {
        while let Some(mut element) = self.stack.pop() {
            element.flush_attribute();
            self.attach(element.node);
        }

        Document {
            fragment_header: self.fragment_header,
            roots: self.roots,
            warnings,
        }
    }

    fn attach(&mut self, node: Node) {
        match self.stack.last_mut() {
            Some(parent) => {
                parent.flush_attribute();
                parent.node.children.push(node);
            }
            None => self.roots.push(node),
        }
    }

    /// Appends a content node to the current attribute, the current element or the roots.
    fn append_content(&mut self, node: Node) {
        match self.stack.last_mut() {
            Some(parent) => match parent.current_attribute.as_mut() {
                Some(attribute) if !parent.start_closed => attribute.children.push(node),
                _ => parent.node.children.push(node),
            },
            None => self.roots.push(node),
        }
    }

    fn close_element(&mut self, offset: u64) -> Result<()> {
        let mut element = self
            .stack
            .pop()
            .ok_or(DeserializationError::UnbalancedElement { offset })?;

        element.flush_attribute();
        trace!("Closing element {:?}", element.node.name);
        self.attach(element.node);

        Ok(())
    }
}

impl BinXmlVisitor for DocumentBuilder {
    fn visit_fragment_header(&mut self, _offset: u64, header: &BinXmlFragmentHeader) -> Result<()> {
        if self.fragment_header.is_none() {
            self.fragment_header = Some(header.clone());
        }
        Ok(())
    }

    fn visit_open_start_element(
        &mut self,
        _offset: u64,
        open_start_element: &BinXmlOpenStartElement,
    ) -> Result<()> {
        if let Some(parent) = self.stack.last_mut() {
            parent.flush_attribute();
        }

        self.stack.push(PendingElement {
            node: Node::element(open_start_element.name.as_str()),
            start_closed: false,
            current_attribute: None,
        });
        Ok(())
    }

    fn visit_close_start_element(&mut self, offset: u64) -> Result<()> {
        let element = self
            .stack
            .last_mut()
            .ok_or(DeserializationError::UnbalancedElement { offset })?;

        element.flush_attribute();
        element.start_closed = true;
        Ok(())
    }

    fn visit_close_empty_element(&mut self, offset: u64) -> Result<()> {
        self.close_element(offset)
    }

    fn visit_end_element(&mut self, offset: u64) -> Result<()> {
        self.close_element(offset)
    }

    fn visit_attribute(&mut self, offset: u64, attribute: &BinXmlAttribute) -> Result<()> {
        match self.stack.last_mut() {
            Some(element) if !element.start_closed => {
                element.flush_attribute();
                element.current_attribute = Some(Node::attribute(attribute.name.as_str()));
                Ok(())
            }
            _ => Err(DeserializationError::AttributeWithoutElement { offset }),
        }
    }

    fn visit_value(&mut self, _offset: u64, value: BinXmlValue) -> Result<()> {
        self.append_content(Node::text(value));
        Ok(())
    }

    fn visit_cdata_section(&mut self, _offset: u64, text: String) -> Result<()> {
        self.append_content(Node::valued(NodeKind::CData, BinXmlValue::StringType(text)));
        Ok(())
    }

    fn visit_character_reference(&mut self, _offset: u64, value: u16) -> Result<()> {
        self.append_content(Node::valued(NodeKind::CharRef, BinXmlValue::UInt16Type(value)));
        Ok(())
    }

    fn visit_entity_reference(
        &mut self,
        _offset: u64,
        entity: &BinXmlEntityReference,
    ) -> Result<()> {
        self.append_content(Node::named(NodeKind::EntityRef, entity.name.as_str()));
        Ok(())
    }

    fn visit_processing_instruction_target(
        &mut self,
        _offset: u64,
        target: &BinXmlProcessingInstructionTarget,
    ) -> Result<()> {
        self.append_content(Node::named(NodeKind::PiTarget, target.name.as_str()));
        Ok(())
    }

    fn visit_processing_instruction_data(&mut self, _offset: u64, data: String) -> Result<()> {
        self.append_content(Node::valued(NodeKind::PiData, BinXmlValue::StringType(data)));
        Ok(())
    }
}
