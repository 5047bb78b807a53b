use crate::err::{SerializationError, SerializationResult};
use crate::model::{Document, Node, NodeKind};

use log::trace;
use quick_xml::Writer;
use quick_xml::escape::escape;
use quick_xml::events::attributes::Attribute;
use quick_xml::events::{BytesCData, BytesDecl, BytesEnd, BytesPI, BytesStart, BytesText, Event};

fn xml_error(e: impl std::fmt::Display) -> SerializationError {
    SerializationError::XmlOutputError {
        message: e.to_string(),
    }
}

/// Renders an attribute's value nodes as already-escaped attribute text.
fn escaped_attribute_value(attribute: &Node) -> String {
    let mut out = String::new();

    for child in &attribute.children {
        match (child.kind, &child.value, child.name()) {
            (NodeKind::CharRef, Some(value), _) => out.push_str(&format!("&#{};", value)),
            (NodeKind::EntityRef, _, Some(name)) => out.push_str(&format!("&{};", name)),
            (_, Some(value), _) if !value.is_null() => out.push_str(&escape(&value.to_string())),
            _ => {}
        }
    }

    out
}

fn start_tag(element: &Node) -> BytesStart<'_> {
    let mut start = BytesStart::new(element.name().unwrap_or_default());

    for attribute in &element.attributes {
        let value = escaped_attribute_value(attribute);
        let name = attribute.name().unwrap_or_default();
        start.push_attribute(Attribute::from((name.as_bytes(), value.as_bytes())));
    }

    start
}

fn write_nodes<W: std::io::Write>(writer: &mut Writer<W>, nodes: &[Node]) -> SerializationResult<()> {
    let mut iter = nodes.iter().peekable();

    while let Some(node) = iter.next() {
        match node.kind {
            NodeKind::Element => write_element(writer, node)?,
            NodeKind::Text => {
                if let Some(value) = node.value.as_ref().filter(|v| !v.is_null()) {
                    writer
                        .write_event(Event::Text(BytesText::new(&value.to_string())))
                        .map_err(xml_error)?;
                }
            }
            NodeKind::CData => {
                if let Some(value) = &node.value {
                    writer
                        .write_event(Event::CData(BytesCData::new(value.to_string())))
                        .map_err(xml_error)?;
                }
            }
            NodeKind::CharRef => {
                if let Some(value) = &node.value {
                    writer
                        .write_event(Event::Text(BytesText::from_escaped(format!("&#{};", value))))
                        .map_err(xml_error)?;
                }
            }
            NodeKind::EntityRef => {
                if let Some(name) = node.name() {
                    writer
                        .write_event(Event::Text(BytesText::from_escaped(format!("&{};", name))))
                        .map_err(xml_error)?;
                }
            }
            NodeKind::PiTarget => {
                let mut content = node.name().unwrap_or_default().to_string();
                if let Some(data) = iter.next_if(|n| n.kind == NodeKind::PiData) {
                    if let Some(value) = &data.value {
                        content.push(' ');
                        content.push_str(&value.to_string());
                    }
                }
                writer
                    .write_event(Event::PI(BytesPI::new(content)))
                    .map_err(xml_error)?;
            }
            // Data without a target, or an attribute outside of an element.
            NodeKind::PiData | NodeKind::Attribute => {
                trace!("Skipping orphan {:?} node", node.kind);
            }
        }
    }

    Ok(())
}

fn write_element<W: std::io::Write>(writer: &mut Writer<W>, element: &Node) -> SerializationResult<()> {
    let start = start_tag(element);

    let has_content = element
        .children
        .iter()
        .any(|c| c.kind != NodeKind::Text || c.value.as_ref().is_some_and(|v| !v.is_null()));

    if !has_content {
        writer.write_event(Event::Empty(start)).map_err(xml_error)?;
        return Ok(());
    }

    writer.write_event(Event::Start(start)).map_err(xml_error)?;
    write_nodes(writer, &element.children)?;
    writer
        .write_event(Event::End(BytesEnd::new(element.name().unwrap_or_default())))
        .map_err(xml_error)?;

    Ok(())
}

/// Renders a document as indented XML with a declaration.
pub fn document_to_xml(document: &Document) -> SerializationResult<String> {
    let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);

    writer
        .write_event(Event::Decl(BytesDecl::new("1.0", Some("utf-8"), None)))
        .map_err(xml_error)?;
    write_nodes(&mut writer, &document.roots)?;

    Ok(String::from_utf8(writer.into_inner())?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binxml::value_variant::BinXmlValue;

    #[test]
    fn test_renders_attributes_text_and_empty_elements() {
        let mut id = Node::attribute("Id");
        id.children
            .push(Node::text(BinXmlValue::StringType("a<b".to_string())));

        let mut event = Node::element("Event");
        event.attributes.push(id);
        event
            .children
            .push(Node::text(BinXmlValue::StringType("x & y".to_string())));
        event.children.push(Node::element("Empty"));

        let document = Document {
            roots: vec![event],
            ..Document::default()
        };

        let xml = document_to_xml(&document).unwrap();

        assert!(xml.starts_with("<?xml version=\"1.0\" encoding=\"utf-8\"?>"));
        assert!(xml.contains("<Event Id=\"a&lt;b\">"), "{}", xml);
        assert!(xml.contains("x &amp; y"), "{}", xml);
        assert!(xml.contains("<Empty/>"), "{}", xml);
        assert!(xml.contains("</Event>"), "{}", xml);
    }

    #[test]
    fn test_null_values_render_as_empty() {
        let mut data = Node::element("Data");
        data.children.push(Node::text(BinXmlValue::NullType));

        let document = Document {
            roots: vec![data],
            ..Document::default()
        };

        let xml = document_to_xml(&document).unwrap();
        assert!(xml.contains("<Data/>"), "{}", xml);
    }
}
