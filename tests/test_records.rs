
use evtx_binxml::err::{DecodeWarning, DeserializationError};
use evtx_binxml::{
    IterChunkRecords, NoopObserver, ParserSettings, decode_records, document_to_json,
    document_to_xml, frame_record,
};
use fixtures::*;
use pretty_assertions::assert_eq;
use serde_json::json;

#[test]
fn test_decodes_single_event_record() {
    ensure_env_logger_initialized();
    let chunk = single_event_chunk();

    let record = frame_record(&chunk, 0).unwrap();
    assert_eq!(record.event_record_id(), 1);
    assert_eq!(record.timestamp(), 0);
    assert_eq!(record.next_offset(), chunk.len() - 4);
    assert!(record.warnings().is_empty());

    let doc = record
        .decode(&ParserSettings::default(), None, &mut NoopObserver)
        .unwrap();

    assert_eq!(doc.node_count(), 3);
    let event = doc.root_element().unwrap();
    assert_eq!(event.name(), Some("Event"));
    assert_eq!(event.attribute_value("Id").as_deref(), Some("1"));
    assert!(event.child_elements().next().is_none());
    assert!(!doc.has_warnings());
}

#[test]
fn test_declared_size_smaller_than_header() {
    let mut chunk = single_event_chunk();
    chunk[4..8].copy_from_slice(&4_u32.to_le_bytes());

    assert!(matches!(
        frame_record(&chunk, 0),
        Err(DeserializationError::SizeTooSmall { offset: 0, size: 4 })
    ));
}

#[test]
fn test_trailer_mismatch_is_a_warning() {
    let mut chunk = single_event_chunk();
    let size = u32::from_le_bytes([chunk[4], chunk[5], chunk[6], chunk[7]]);
    let trailer = size as usize - 4;
    chunk[trailer..trailer + 4].copy_from_slice(&(size - 1).to_le_bytes());

    let record = frame_record(&chunk, 0).unwrap();
    let doc = record
        .decode(&ParserSettings::default(), None, &mut NoopObserver)
        .unwrap();

    assert_eq!(
        doc.warnings,
        vec![DecodeWarning::SizeMismatch {
            offset: trailer as u64,
            declared: size,
            trailer: size - 1,
        }]
    );
    assert_eq!(doc.node_count(), 3);
}

#[test]
fn test_bad_signature() {
    let mut chunk = single_event_chunk();
    chunk[0] = b'E';

    assert!(matches!(
        frame_record(&chunk, 0),
        Err(DeserializationError::BadSignature { offset: 0, .. })
    ));
    assert_eq!(IterChunkRecords::new(&chunk, 0).count(), 0);
}

#[test]
fn test_corrupted_chunks_never_panic() {
    let chunk = single_event_chunk();

    for len in 0..chunk.len() {
        let truncated = &chunk[..len];
        if let Ok(record) = frame_record(truncated, 0) {
            let _ = record.decode(&ParserSettings::default(), None, &mut NoopObserver);
        }
    }

    // Flip every byte of the payload in turn.
    for idx in 24..chunk.len() - 8 {
        let mut corrupted = chunk.clone();
        corrupted[idx] ^= 0xff;
        for strict in [true, false] {
            let settings = ParserSettings::new().strict_tokens(strict).num_threads(1);
            let results = decode_records(&corrupted, 0, &settings, None);
            assert!(results.len() <= 1);
        }
    }
}

#[test]
fn test_renders_decoded_record() {
    let mut chunk = vec![];
    push_record(&mut chunk, 7, |b| {
        b.fragment_header()
            .open("Event", false)
            .close_start()
            .open("Data", true)
            .attribute("Name")
            .string("User")
            .close_start()
            .string("SYSTEM")
            .end()
            .end()
            .eos();
    });
    chunk.extend_from_slice(&[0; 4]);

    let results = decode_records(&chunk, 0, &ParserSettings::default(), None);
    assert_eq!(results.len(), 1);
    let record = results.into_iter().next().unwrap().unwrap();
    assert_eq!(record.event_record_id, 7);

    let xml = document_to_xml(&record.document).unwrap();
    assert!(xml.contains("<Data Name=\"User\">SYSTEM</Data>"), "{}", xml);

    assert_eq!(
        document_to_json(&record.document),
        json!({ "Event": { "User": "SYSTEM" } })
    );
}
