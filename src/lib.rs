#![deny(unused_must_use)]
#![forbid(unsafe_code)]
// Don't allow dbg! prints in release.
#![cfg_attr(not(debug_assertions), deny(clippy::dbg_macro))]

pub use binxml::deserializer::{BinXmlDecoder, TemplateResolver, TemplateTable, decode};
pub use binxml::value_variant::{BinXmlValue, BinXmlValueType};
pub use binxml::visitor::BinXmlVisitor;
pub use evtx_chunk::{DecodedRecord, IterChunkRecords, decode_records};
pub use evtx_record::{EvtxRecord, EvtxRecordHeader, frame_record};
pub use json_output::document_to_json;
pub use model::{Document, Node, NodeKind};
pub use observer::{DecodeObserver, LogObserver, NoopObserver};
pub use parser_settings::ParserSettings;
pub use tree_builder::DocumentBuilder;
pub use xml_output::document_to_xml;

pub mod binxml;
pub mod err;
pub mod model;
pub mod observer;

mod evtx_chunk;
mod evtx_record;
mod json_output;
mod parser_settings;
mod tree_builder;
mod utils;
mod xml_output;

pub type ChunkOffset = u32;

#[cfg(test)]
mod tests;

// For tests, we only initialize logging once.
#[cfg(test)]
use std::sync::Once;

#[cfg(test)]
static LOGGER_INIT: Once = Once::new();

// Rust runs the tests concurrently, so unless we synchronize logging access
// it will crash when attempting to run `cargo test` with some logging facilities.
#[cfg(test)]
pub fn ensure_env_logger_initialized() {
    use std::io::Write;

    LOGGER_INIT.call_once(|| {
        let mut builder = env_logger::Builder::from_default_env();
        builder
            .format(|buf, record| writeln!(buf, "[{}] - {}", record.level(), record.args()))
            .is_test(true);
        let _ = builder.try_init();
    });
}
