use crate::binxml::deserializer::{BinXmlDecoder, TemplateResolver};
use crate::err::{DecodeWarning, DeserializationError, DeserializationResult};
use crate::model::Document;
use crate::observer::DecodeObserver;
use crate::utils::bytes;
use crate::ParserSettings;

use log::{debug, trace};

pub const EVTX_RECORD_SIGNATURE: [u8; 4] = *b"\x2a\x2a\x00\x00";
pub const EVTX_RECORD_HEADER_SIZE: usize = 24;
/// Trailing copy of the record size.
pub const EVTX_RECORD_TRAILER_SIZE: usize = 4;
pub const EVTX_RECORD_MIN_SIZE: usize = EVTX_RECORD_HEADER_SIZE + EVTX_RECORD_TRAILER_SIZE;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvtxRecordHeader {
    pub data_size: u32,
    pub event_record_id: u64,
    /// Raw FILETIME.
    pub timestamp: u64,
}

/// A framed record: a validated header plus the bounds of its binary XML payload.
#[derive(Debug, Clone, PartialEq)]
pub struct EvtxRecord<'a> {
    chunk: &'a [u8],
    offset: usize,
    header: EvtxRecordHeader,
    trailer_size: u32,
    payload_offset: usize,
    payload_len: usize,
    next_offset: usize,
    warnings: Vec<DecodeWarning>,
}

/// Validates the record at `offset` and delimits its payload.
///
/// A trailing size copy that disagrees with the header is reported as a warning, every other
/// inconsistency is an error. Nothing past the record's declared end is read.
pub fn frame_record(chunk: &[u8], offset: usize) -> DeserializationResult<EvtxRecord<'_>> {
    if offset >= chunk.len() {
        return Err(bytes::out_of_bounds(
            "record",
            0,
            offset,
            EVTX_RECORD_MIN_SIZE,
            chunk.len(),
        ));
    }

    let remaining = chunk.len() - offset;
    if remaining < EVTX_RECORD_MIN_SIZE {
        return Err(DeserializationError::TruncatedRecord {
            offset: offset as u64,
            need: EVTX_RECORD_MIN_SIZE,
            remaining,
        });
    }

    let signature = bytes::read_array_r::<4>(chunk, offset, 0, "record.signature")?;
    if signature != EVTX_RECORD_SIGNATURE {
        return Err(DeserializationError::BadSignature {
            offset: offset as u64,
            found: signature,
        });
    }

    let header = EvtxRecordHeader {
        data_size: bytes::read_u32_le_r(chunk, offset + 4, 0, "record.size")?,
        event_record_id: bytes::read_u64_le_r(chunk, offset + 8, 0, "record.id")?,
        timestamp: bytes::read_u64_le_r(chunk, offset + 16, 0, "record.timestamp")?,
    };
    trace!("Record header at {}: {:?}", offset, header);

    let size = header.data_size as usize;
    if size < EVTX_RECORD_TRAILER_SIZE || size > remaining - EVTX_RECORD_TRAILER_SIZE {
        return Err(DeserializationError::SizeOutOfBounds {
            offset: offset as u64,
            size: header.data_size,
            remaining,
        });
    }

    if size < EVTX_RECORD_MIN_SIZE {
        return Err(DeserializationError::SizeTooSmall {
            offset: offset as u64,
            size: header.data_size,
        });
    }

    let trailer_offset = offset + size - EVTX_RECORD_TRAILER_SIZE;
    let trailer_size = bytes::read_u32_le_r(chunk, trailer_offset, 0, "record.trailer")?;

    let mut warnings = vec![];
    if trailer_size != header.data_size {
        debug!(
            "Record {} at offset {}: trailing size {} does not match declared size {}",
            header.event_record_id, offset, trailer_size, header.data_size
        );
        warnings.push(DecodeWarning::SizeMismatch {
            offset: trailer_offset as u64,
            declared: header.data_size,
            trailer: trailer_size,
        });
    }

    Ok(EvtxRecord {
        chunk,
        offset,
        payload_offset: offset + EVTX_RECORD_HEADER_SIZE,
        payload_len: size - EVTX_RECORD_MIN_SIZE,
        next_offset: offset + size,
        header,
        trailer_size,
        warnings,
    })
}

impl<'a> EvtxRecord<'a> {
    /// Offset of the record signature in the chunk.
    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn header(&self) -> &EvtxRecordHeader {
        &self.header
    }

    /// The trailing size copy, which may disagree with `header().data_size`.
    pub fn trailer_size(&self) -> u32 {
        self.trailer_size
    }

    /// Chunk offset of the binary XML payload.
    pub fn payload_offset(&self) -> usize {
        self.payload_offset
    }

    pub fn payload_len(&self) -> usize {
        self.payload_len
    }

    /// Where the next record would start.
    pub fn next_offset(&self) -> usize {
        self.next_offset
    }

    /// Framing warnings.
    pub fn warnings(&self) -> &[DecodeWarning] {
        &self.warnings
    }

    pub fn event_record_id(&self) -> u64 {
        self.header.event_record_id
    }

    /// Raw FILETIME of the record.
    pub fn timestamp(&self) -> u64 {
        self.header.timestamp
    }

    pub fn payload(&self) -> &'a [u8] {
        &self.chunk[self.payload_offset..self.payload_offset + self.payload_len]
    }

    /// Decodes the payload. Names and template definitions may live anywhere in the chunk.
    ///
    /// Framing warnings come first in the document's warnings.
    pub fn decode(
        &self,
        settings: &ParserSettings,
        templates: Option<&dyn TemplateResolver>,
        observer: &mut impl DecodeObserver,
    ) -> DeserializationResult<Document> {
        for warning in &self.warnings {
            observer.warning(warning);
        }

        let mut decoder = BinXmlDecoder::new()
            .settings(settings.clone())
            .chunk(self.chunk)
            .base_offset(self.payload_offset as u64);
        if let Some(templates) = templates {
            decoder = decoder.templates(templates);
        }

        let mut document = decoder.decode(self.payload(), observer)?;

        let mut warnings = self.warnings.clone();
        warnings.append(&mut document.warnings);
        document.warnings = warnings;

        Ok(document)
    }
}
