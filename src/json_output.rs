use crate::binxml::value_variant::BinXmlValue;
use crate::model::{Document, Node, NodeKind};

use quick_xml::escape::unescape;
use serde_json::{Map, Value, json};

const ATTRIBUTES_KEY: &str = "#attributes";
const TEXT_KEY: &str = "#text";

/// Inserts `value` under `name`, suffixing `_1`, `_2`... when the key is taken.
fn insert_unique(map: &mut Map<String, Value>, name: &str, value: Value) {
    if !map.contains_key(name) {
        map.insert(name.to_owned(), value);
        return;
    }

    let mut idx = 1_usize;
    loop {
        let key = format!("{}_{}", name, idx);
        if !map.contains_key(&key) {
            map.insert(key, value);
            return;
        }
        idx += 1;
    }
}

/// Resolves an entity reference like `&amp;` to its text, keeping unknown ones verbatim.
fn entity_text(name: &str) -> String {
    let entity_ref = format!("&{};", name);
    match unescape(&entity_ref) {
        Ok(text) => text.into_owned(),
        Err(_) => entity_ref,
    }
}

/// JSON value of a run of content nodes.
///
/// A single value keeps its type (`4624` stays a number), anything else is concatenated text.
fn content_value(nodes: &[&Node]) -> Value {
    match nodes {
        [] => Value::Null,
        [single] if single.kind == NodeKind::Text => match &single.value {
            Some(value) => Value::from(value),
            None => Value::Null,
        },
        _ => {
            let mut text = String::new();
            for node in nodes {
                match (node.kind, &node.value) {
                    (NodeKind::EntityRef, _) => {
                        text.push_str(&entity_text(node.name().unwrap_or_default()))
                    }
                    (NodeKind::CharRef, Some(BinXmlValue::UInt16Type(c))) => {
                        if let Some(c) = char::from_u32(u32::from(*c)) {
                            text.push(c);
                        }
                    }
                    (_, Some(value)) if !value.is_null() => text.push_str(&value.to_string()),
                    _ => {}
                }
            }
            json!(text)
        }
    }
}

fn is_content(node: &Node) -> bool {
    !matches!(
        node.kind,
        NodeKind::Element | NodeKind::Attribute | NodeKind::PiTarget | NodeKind::PiData
    )
}

fn attributes_value(element: &Node) -> Map<String, Value> {
    let mut attributes = Map::new();

    for attribute in &element.attributes {
        let children: Vec<&Node> = attribute.children.iter().collect();
        insert_unique(
            &mut attributes,
            attribute.name().unwrap_or_default(),
            content_value(&children),
        );
    }

    attributes
}

fn element_value(element: &Node) -> Value {
    let content: Vec<&Node> = element.children.iter().filter(|c| is_content(c)).collect();
    let has_element_children = element.child_elements().next().is_some();

    // <Task>12288</Task> -> {"Task": 12288}
    if element.attributes.is_empty() && !has_element_children {
        return content_value(&content);
    }

    let mut object = Map::new();
    if !element.attributes.is_empty() {
        object.insert(
            ATTRIBUTES_KEY.to_owned(),
            Value::Object(attributes_value(element)),
        );
    }

    for child in element.child_elements() {
        insert_child(&mut object, child);
    }

    if !content.is_empty() {
        object.insert(TEXT_KEY.to_owned(), content_value(&content));
    }

    Value::Object(object)
}

/// Inserts a child element. `<Data Name="x">v</Data>` becomes `"x": v`.
fn insert_child(object: &mut Map<String, Value>, child: &Node) {
    let name = child.name().unwrap_or_default();

    if name == "Data" && child.attributes.len() == 1 {
        if let Some(data_name) = child.attribute_value("Name") {
            let content: Vec<&Node> = child.children.iter().filter(|c| is_content(c)).collect();
            insert_unique(object, &data_name, content_value(&content));
            return;
        }
    }

    insert_unique(object, name, element_value(child));
}

/// Renders a document as a JSON object keyed by element names.
///
/// Attributes go under `#attributes`, text next to child elements under `#text`. Top-level
/// content outside of any element is collected under `#text`.
pub fn document_to_json(document: &Document) -> Value {
    let mut object = Map::new();

    for root in document.roots.iter().filter(|n| n.is_element()) {
        insert_child(&mut object, root);
    }

    let content: Vec<&Node> = document.roots.iter().filter(|c| is_content(c)).collect();
    if !content.is_empty() {
        object.insert(TEXT_KEY.to_owned(), content_value(&content));
    }

    Value::Object(object)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn text_element(name: &str, value: BinXmlValue) -> Node {
        let mut node = Node::element(name);
        node.children.push(Node::text(value));
        node
    }

    fn data(name: &str, value: BinXmlValue) -> Node {
        let mut name_attr = Node::attribute("Name");
        name_attr
            .children
            .push(Node::text(BinXmlValue::StringType(name.to_string())));

        let mut node = text_element("Data", value);
        node.attributes.push(name_attr);
        node
    }

    #[test]
    fn test_renders_event_structure() {
        let mut qualifiers = Node::attribute("Qualifiers");
        qualifiers.children.push(Node::text(BinXmlValue::NullType));
        let mut event_id = text_element("EventID", BinXmlValue::UInt16Type(4902));
        event_id.attributes.push(qualifiers);

        let mut system = Node::element("System");
        system.children.push(event_id);
        system
            .children
            .push(text_element("Task", BinXmlValue::UInt16Type(12288)));

        let mut event_data = Node::element("EventData");
        event_data
            .children
            .push(data("SubjectUserName", BinXmlValue::StringType("SYSTEM".to_string())));
        event_data
            .children
            .push(data("SubjectLogonId", BinXmlValue::HexInt64Type(0x3e7)));

        let mut event = Node::element("Event");
        event.children.push(system);
        event.children.push(event_data);

        let document = Document {
            roots: vec![event],
            ..Document::default()
        };

        assert_eq!(
            document_to_json(&document),
            json!({
                "Event": {
                    "System": {
                        "EventID": {
                            "#attributes": { "Qualifiers": null },
                            "#text": 4902
                        },
                        "Task": 12288
                    },
                    "EventData": {
                        "SubjectUserName": "SYSTEM",
                        "SubjectLogonId": "0x3e7"
                    }
                }
            })
        );
    }

    #[test]
    fn test_duplicate_keys_are_suffixed() {
        let mut parent = Node::element("Binary");
        parent
            .children
            .push(text_element("Item", BinXmlValue::UInt8Type(1)));
        parent
            .children
            .push(text_element("Item", BinXmlValue::UInt8Type(2)));
        parent
            .children
            .push(text_element("Item", BinXmlValue::UInt8Type(3)));

        let document = Document {
            roots: vec![parent],
            ..Document::default()
        };

        assert_eq!(
            document_to_json(&document),
            json!({ "Binary": { "Item": 1, "Item_1": 2, "Item_2": 3 } })
        );
    }

    #[test]
    fn test_mixed_content_is_concatenated() {
        let mut node = Node::element("Message");
        node.children
            .push(Node::text(BinXmlValue::StringType("a ".to_string())));
        node.children.push(Node::named(NodeKind::EntityRef, "amp"));
        node.children
            .push(Node::valued(NodeKind::CharRef, BinXmlValue::UInt16Type(0x41)));

        let document = Document {
            roots: vec![node],
            ..Document::default()
        };

        assert_eq!(document_to_json(&document), json!({ "Message": "a &A" }));
    }
}
