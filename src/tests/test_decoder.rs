use super::binxml_writer::BinXmlWriter;
use crate::binxml::tokens::BinXmlToken;
use crate::err::{DecodeWarning, DeserializationError};
use crate::{
    BinXmlDecoder, BinXmlValue, DecodeObserver, NodeKind, ParserSettings, decode,
    ensure_env_logger_initialized,
};
use pretty_assertions::assert_eq;

#[test]
fn test_decodes_attributes_and_children_in_order() {
    ensure_env_logger_initialized();
    let mut w = BinXmlWriter::new(0);
    w.fragment_header()
        .open_element("Event", true)
        .attribute("Id")
        .string_value("1")
        .attribute("Level")
        .u16_value(4)
        .close_start()
        .open_element("System", false)
        .close_start()
        .u16_value(4624)
        .end_element()
        .open_element("Empty", false)
        .close_empty()
        .end_element()
        .eos();

    let doc = decode(&w.into_bytes()).unwrap();
    let event = doc.root_element().unwrap();

    assert_eq!(event.name(), Some("Event"));
    let attribute_names: Vec<_> = event.attributes.iter().filter_map(|a| a.name()).collect();
    assert_eq!(attribute_names, vec!["Id", "Level"]);
    assert_eq!(event.attribute_value("Id").as_deref(), Some("1"));
    assert_eq!(
        event.attributes[1].children[0].value,
        Some(BinXmlValue::UInt16Type(4))
    );

    let children: Vec<_> = event.child_elements().filter_map(|c| c.name()).collect();
    assert_eq!(children, vec!["System", "Empty"]);
    assert_eq!(
        event.child("System").unwrap().children[0].value,
        Some(BinXmlValue::UInt16Type(4624))
    );

    assert_eq!(doc.node_count(), 8);
    assert!(doc.fragment_header.is_some());
    assert!(doc.warnings.is_empty());
}

#[test]
fn test_single_attribute_element_has_three_nodes() {
    let mut w = BinXmlWriter::new(0);
    w.open_element("Event", true)
        .attribute("Id")
        .string_value("1")
        .close_empty()
        .eos();

    let doc = decode(&w.into_bytes()).unwrap();

    assert_eq!(doc.node_count(), 3);
    assert_eq!(doc.roots.len(), 1);
    assert_eq!(
        doc.root_element().unwrap().attribute_value("Id").as_deref(),
        Some("1")
    );
}

#[test]
fn test_decodes_other_content_tokens() {
    let mut w = BinXmlWriter::new(0);
    w.open_element("Message", false)
        .close_start()
        .cdata("<raw>")
        .char_ref(0x41)
        .entity_ref("amp")
        .pi_target("target")
        .pi_data("data")
        .end_element()
        .eos();

    let doc = decode(&w.into_bytes()).unwrap();
    let message = doc.root_element().unwrap();

    let kinds: Vec<_> = message.children.iter().map(|c| c.kind).collect();
    assert_eq!(
        kinds,
        vec![
            NodeKind::CData,
            NodeKind::CharRef,
            NodeKind::EntityRef,
            NodeKind::PiTarget,
            NodeKind::PiData
        ]
    );
    assert_eq!(
        message.children[0].value,
        Some(BinXmlValue::StringType("<raw>".to_string()))
    );
    assert_eq!(message.children[2].name(), Some("amp"));
}

#[test]
fn test_end_element_without_open_element() {
    let mut w = BinXmlWriter::new(0);
    w.fragment_header().end_element().eos();

    match decode(&w.into_bytes()) {
        Err(DeserializationError::UnbalancedElement { offset }) => assert_eq!(offset, 4),
        other => panic!("unexpected result {other:?}"),
    }
}

#[test]
fn test_attribute_without_element() {
    let mut w = BinXmlWriter::new(0);
    w.fragment_header().attribute("Id").string_value("1").eos();

    match decode(&w.into_bytes()) {
        Err(DeserializationError::AttributeWithoutElement { offset }) => assert_eq!(offset, 4),
        other => panic!("unexpected result {other:?}"),
    }
}

#[test]
fn test_premature_end_of_stream() {
    let mut w = BinXmlWriter::new(0);
    w.fragment_header().open_element("Event", false).close_start();
    let eos_offset = w.position();
    w.eos();

    match decode(&w.into_bytes()) {
        Err(DeserializationError::PrematureEndOfStream {
            offset,
            open_elements,
        }) => {
            assert_eq!(offset, eos_offset);
            assert_eq!(open_elements, 1);
        }
        other => panic!("unexpected result {other:?}"),
    }
}

#[test]
fn test_missing_end_of_stream_is_a_warning() {
    let mut w = BinXmlWriter::new(0);
    w.open_element("Event", false).close_empty();
    let end = w.position();

    let doc = decode(&w.into_bytes()).unwrap();

    assert_eq!(
        doc.warnings,
        vec![DecodeWarning::MissingEndOfStream { offset: end }]
    );
    assert_eq!(doc.node_count(), 1);
}

#[test]
fn test_open_elements_at_end_of_payload_are_an_error() {
    let mut w = BinXmlWriter::new(0);
    w.open_element("Event", false).close_start();

    assert!(matches!(
        decode(&w.into_bytes()),
        Err(DeserializationError::PrematureEndOfStream {
            open_elements: 1,
            ..
        })
    ));
}

#[test]
fn test_nesting_depth_is_capped() {
    let mut w = BinXmlWriter::new(0);
    for _ in 0..256 {
        w.open_element("E", false).close_start();
    }
    let too_deep = w.position();
    w.open_element("E", false).close_start();

    match decode(&w.into_bytes()) {
        Err(DeserializationError::NestingTooDeep { offset, limit }) => {
            assert_eq!(offset, too_deep);
            assert_eq!(limit, 256);
        }
        other => panic!("unexpected result {other:?}"),
    }
}

#[test]
fn test_open_elements_up_to_the_limit_are_not_too_deep() {
    let mut w = BinXmlWriter::new(0);
    for _ in 0..256 {
        w.open_element("E", false).close_start();
    }
    let end = w.position();
    w.eos();

    match decode(&w.into_bytes()) {
        Err(DeserializationError::PrematureEndOfStream {
            offset,
            open_elements,
        }) => {
            assert_eq!(offset, end);
            assert_eq!(open_elements, 256);
        }
        other => panic!("unexpected result {other:?}"),
    }
}

#[test]
fn test_nesting_at_the_limit_is_accepted() {
    let settings = ParserSettings::new().max_nesting_depth(3);

    let mut w = BinXmlWriter::new(0);
    for _ in 0..3 {
        w.open_element("E", false).close_start();
    }
    for _ in 0..3 {
        w.end_element();
    }
    w.eos();

    let doc = BinXmlDecoder::new()
        .settings(settings)
        .decode(&w.into_bytes(), &mut crate::NoopObserver)
        .unwrap();
    assert_eq!(doc.node_count(), 3);
}

#[test]
fn test_reserved_token_bits() {
    let mut w = BinXmlWriter::new(0);
    w.open_element("Event", false).close_start();
    let tagged = w.position();
    w.raw(&[0x84]).eos();
    let payload = w.into_bytes();

    match decode(&payload) {
        Err(DeserializationError::UnknownToken { offset, value }) => {
            assert_eq!(offset, tagged);
            assert_eq!(value, 0x84);
        }
        other => panic!("unexpected result {other:?}"),
    }

    let doc = BinXmlDecoder::new()
        .settings(ParserSettings::new().strict_tokens(false))
        .decode(&payload, &mut crate::NoopObserver)
        .unwrap();

    assert_eq!(
        doc.warnings,
        vec![DecodeWarning::ReservedTokenBits {
            offset: tagged,
            value: 0x84
        }]
    );
    assert_eq!(doc.root_element().unwrap().name(), Some("Event"));
}

#[test]
fn test_unknown_token_fails_in_both_modes() {
    let payload = [0x0f, 0x01, 0x01, 0x00, 0x3f];

    for strict in [true, false] {
        let result = BinXmlDecoder::new()
            .settings(ParserSettings::new().strict_tokens(strict))
            .decode(&payload, &mut crate::NoopObserver);

        assert!(matches!(
            result,
            Err(DeserializationError::UnknownToken {
                offset: 4,
                value: 0x3f
            })
        ));
    }
}

#[test]
fn test_inline_value_of_variable_width_type_is_unsupported() {
    // Value token, BinaryType, no size.
    let payload = [0x05, 0x0e, 0x01, 0x02];

    assert!(matches!(
        decode(&payload),
        Err(DeserializationError::UnsupportedValueType { offset: 2, .. })
    ));
}

#[test]
fn test_truncated_payloads_never_panic() {
    let mut w = BinXmlWriter::new(0);
    w.fragment_header()
        .open_element("Event", true)
        .attribute("Id")
        .string_value("12345")
        .close_start()
        .cdata("text")
        .end_element()
        .eos();
    let payload = w.into_bytes();

    for len in 0..payload.len() {
        // Every prefix either decodes (with a warning) or fails with a typed error.
        if let Ok(doc) = decode(&payload[..len]) {
            assert!(
                doc.warnings
                    .iter()
                    .any(|w| matches!(w, DecodeWarning::MissingEndOfStream { .. })),
                "prefix of {} bytes decoded without a warning",
                len
            );
        }
    }

    assert!(decode(&payload).is_ok());
}

#[test]
fn test_base_offset_shifts_error_offsets() {
    let mut w = BinXmlWriter::new(1000);
    w.fragment_header().end_element();

    let result = BinXmlDecoder::new()
        .base_offset(1000)
        .decode(&w.into_bytes(), &mut crate::NoopObserver);

    assert!(matches!(
        result,
        Err(DeserializationError::UnbalancedElement { offset: 1004 })
    ));
}

#[derive(Default)]
struct RecordingObserver {
    offsets: Vec<u64>,
    end_of_streams: usize,
    warnings: usize,
}

impl DecodeObserver for RecordingObserver {
    fn token(&mut self, offset: u64, token: &BinXmlToken<'_>) {
        self.offsets.push(offset);
        if let BinXmlToken::EndOfStream = token {
            self.end_of_streams += 1;
        }
    }

    fn warning(&mut self, _warning: &DecodeWarning) {
        self.warnings += 1;
    }
}

#[test]
fn test_observer_sees_every_token_in_order() {
    let mut w = BinXmlWriter::new(0);
    w.fragment_header().open_element("Event", false);
    let close = w.position();
    w.close_empty().eos();

    let mut observer = RecordingObserver::default();
    BinXmlDecoder::new()
        .decode(&w.into_bytes(), &mut observer)
        .unwrap();

    assert_eq!(observer.offsets, vec![0, 4, close, close + 1]);
    assert_eq!(observer.end_of_streams, 1);
    assert_eq!(observer.warnings, 0);
}
