use crate::binxml::deserializer::TemplateResolver;
use crate::err::{DeserializationError, EvtxError};
use crate::evtx_record::{EVTX_RECORD_SIGNATURE, EvtxRecord, frame_record};
use crate::model::Document;
use crate::observer::LogObserver;
use crate::ParserSettings;

use log::{debug, warn};

#[cfg(feature = "multithreading")]
use rayon::prelude::*;

/// A record whose payload was decoded successfully.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedRecord {
    pub event_record_id: u64,
    /// Raw FILETIME.
    pub timestamp: u64,
    pub document: Document,
}

/// Frames the records of a chunk buffer one after the other.
///
/// Iteration ends at the first offset that does not carry a record signature, which is how the
/// unused tail of a chunk looks. This includes a tail shorter than a record header. A record
/// whose header is inconsistent is yielded as an error and ends the iteration, since its size
/// cannot be trusted to find the next one.
pub struct IterChunkRecords<'a> {
    chunk: &'a [u8],
    offset_from_chunk_start: usize,
    exhausted: bool,
}

impl<'a> IterChunkRecords<'a> {
    pub fn new(chunk: &'a [u8], start_offset: usize) -> Self {
        IterChunkRecords {
            chunk,
            offset_from_chunk_start: start_offset,
            exhausted: false,
        }
    }

    pub fn exhausted(&self) -> bool {
        self.exhausted
    }

    pub fn offset_from_chunk_start(&self) -> usize {
        self.offset_from_chunk_start
    }
}

impl<'a> Iterator for IterChunkRecords<'a> {
    type Item = Result<EvtxRecord<'a>, DeserializationError>;

    fn next(&mut self) -> Option<<Self as Iterator>::Item> {
        if self.exhausted || self.offset_from_chunk_start >= self.chunk.len() {
            return None;
        }

        // Free space too short to hold a header is not a truncated record.
        let tail = &self.chunk[self.offset_from_chunk_start..];
        let prefix = tail.len().min(EVTX_RECORD_SIGNATURE.len());
        if tail[..prefix] != EVTX_RECORD_SIGNATURE[..prefix] {
            debug!(
                "No record signature at offset {}, stopping",
                self.offset_from_chunk_start
            );
            self.exhausted = true;
            return None;
        }

        match frame_record(self.chunk, self.offset_from_chunk_start) {
            Ok(record) => {
                debug!(
                    "Record id - {} at offset {}",
                    record.event_record_id(),
                    record.offset()
                );
                self.offset_from_chunk_start = record.next_offset();
                Some(Ok(record))
            }
            Err(DeserializationError::BadSignature { offset, .. }) => {
                debug!("No record signature at offset {}, stopping", offset);
                self.exhausted = true;
                None
            }
            Err(e) => {
                self.exhausted = true;
                Some(Err(e))
            }
        }
    }
}

fn decode_record(
    record: Result<EvtxRecord<'_>, DeserializationError>,
    settings: &ParserSettings,
    templates: Option<&dyn TemplateResolver>,
) -> Result<DecodedRecord, EvtxError> {
    let record = record?;
    let event_record_id = record.event_record_id();

    match record.decode(settings, templates, &mut LogObserver) {
        Ok(document) => Ok(DecodedRecord {
            event_record_id,
            timestamp: record.timestamp(),
            document,
        }),
        Err(e) => {
            warn!("Failed to decode record {}: {}", event_record_id, e);
            Err(EvtxError::FailedToParseRecord {
                record_id: event_record_id,
                source: Box::new(EvtxError::from(e)),
            })
        }
    }
}

/// Frames every record of `chunk` starting at `start_offset` and decodes their payloads.
///
/// A record whose payload fails to decode yields an error and scanning continues with the next
/// record. Payloads are decoded in parallel unless `num_threads` is 1.
pub fn decode_records(
    chunk: &[u8],
    start_offset: usize,
    settings: &ParserSettings,
    templates: Option<&dyn TemplateResolver>,
) -> Vec<Result<DecodedRecord, EvtxError>> {
    let records: Vec<_> = IterChunkRecords::new(chunk, start_offset).collect();

    #[cfg(feature = "multithreading")]
    {
        let num_threads = *settings.get_num_threads();

        if num_threads == 0 {
            return decode_parallel(records, settings, templates);
        }

        if num_threads > 1 {
            match rayon::ThreadPoolBuilder::new()
                .num_threads(num_threads)
                .build()
            {
                Ok(pool) => {
                    return pool.install(|| decode_parallel(records, settings, templates));
                }
                Err(e) => warn!("Failed to build a thread pool ({}), decoding sequentially", e),
            }
        }
    }

    records
        .into_iter()
        .map(|record| decode_record(record, settings, templates))
        .collect()
}

#[cfg(feature = "multithreading")]
fn decode_parallel(
    records: Vec<Result<EvtxRecord<'_>, DeserializationError>>,
    settings: &ParserSettings,
    templates: Option<&dyn TemplateResolver>,
) -> Vec<Result<DecodedRecord, EvtxError>> {
    records
        .into_par_iter()
        .map(|record| decode_record(record, settings, templates))
        .collect()
}
