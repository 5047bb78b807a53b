use crate::binxml::value_variant::BinXmlValueType;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, EvtxError>;
pub type DeserializationResult<T> = std::result::Result<T, DeserializationError>;
pub type SerializationResult<T> = std::result::Result<T, SerializationError>;

/// Errors raised while framing a record or decoding its binary XML payload.
///
/// Every variant carries the absolute byte offset (relative to the start of the chunk buffer,
/// or to the start of the payload when decoding a detached payload) where the problem was found.
#[derive(Debug, Error)]
pub enum DeserializationError {
    #[error("offset {offset}: reading {need} bytes of {what} is out of bounds (have {have})")]
    OutOfBounds {
        what: &'static str,
        offset: u64,
        need: usize,
        have: usize,
    },

    #[error("offset {offset}: invalid EVTX record header magic, expected `2a2a0000`, found `{found:02X?}`")]
    BadSignature { offset: u64, found: [u8; 4] },

    #[error("offset {offset}: truncated record, need at least {need} bytes but only {remaining} remain")]
    TruncatedRecord {
        offset: u64,
        need: usize,
        remaining: usize,
    },

    #[error("offset {offset}: record size {size} is smaller than the record header and trailer")]
    SizeTooSmall { offset: u64, size: u32 },

    #[error("offset {offset}: record size {size} is out of bounds ({remaining} bytes remain in chunk)")]
    SizeOutOfBounds {
        offset: u64,
        size: u32,
        remaining: usize,
    },

    #[error("offset {offset}: tried to read an invalid byte `{value:#04x}` as binxml token")]
    UnknownToken { offset: u64, value: u8 },

    #[error("offset {offset}: tried to read an invalid byte `{value:#04x}` as binxml value type")]
    UnknownValueType { offset: u64, value: u8 },

    #[error("offset {offset}: value type `{value_type:?}` has no inline size and cannot appear here")]
    UnsupportedValueType {
        offset: u64,
        value_type: BinXmlValueType,
    },

    #[error("offset {offset}: failed to decode UTF-16 string for {what}")]
    InvalidUtf16 { what: &'static str, offset: u64 },

    #[error("offset {offset}: failed to decode ansi string (encoding {encoding}): {message}")]
    AnsiDecode {
        offset: u64,
        encoding: &'static str,
        message: String,
    },

    #[error("offset {offset}: name at chunk offset {name_offset} is not inline and no chunk is available")]
    UnresolvedName { offset: u64, name_offset: u32 },

    #[error("offset {offset}: attribute token without an open element")]
    AttributeWithoutElement { offset: u64 },

    #[error("offset {offset}: end of element without a matching open element")]
    UnbalancedElement { offset: u64 },

    #[error("offset {offset}: end of stream with {open_elements} element(s) still open")]
    PrematureEndOfStream { offset: u64, open_elements: usize },

    #[error("offset {offset}: nesting depth exceeds the limit of {limit}")]
    NestingTooDeep { offset: u64, limit: usize },

    #[error("offset {offset}: substitution index {index} is out of range ({count} values bound)")]
    SubstitutionOutOfRange {
        offset: u64,
        index: u16,
        count: usize,
    },

    #[error("offset {offset}: template {template_id} (definition at {definition_offset}) could not be resolved")]
    UnknownTemplate {
        offset: u64,
        template_id: u32,
        definition_offset: u32,
    },

    #[error("offset {offset}: template {template_id} references itself")]
    RecursiveTemplate { offset: u64, template_id: u32 },

    #[error("offset {offset}: expanding templates would exceed the limit of {limit} bytes")]
    TemplateExpansionLimit { offset: u64, limit: usize },
}

impl DeserializationError {
    /// Byte offset at which the error occurred.
    pub fn offset(&self) -> u64 {
        match self {
            DeserializationError::OutOfBounds { offset, .. }
            | DeserializationError::BadSignature { offset, .. }
            | DeserializationError::TruncatedRecord { offset, .. }
            | DeserializationError::SizeTooSmall { offset, .. }
            | DeserializationError::SizeOutOfBounds { offset, .. }
            | DeserializationError::UnknownToken { offset, .. }
            | DeserializationError::UnknownValueType { offset, .. }
            | DeserializationError::UnsupportedValueType { offset, .. }
            | DeserializationError::InvalidUtf16 { offset, .. }
            | DeserializationError::AnsiDecode { offset, .. }
            | DeserializationError::UnresolvedName { offset, .. }
            | DeserializationError::AttributeWithoutElement { offset }
            | DeserializationError::UnbalancedElement { offset }
            | DeserializationError::PrematureEndOfStream { offset, .. }
            | DeserializationError::NestingTooDeep { offset, .. }
            | DeserializationError::SubstitutionOutOfRange { offset, .. }
            | DeserializationError::UnknownTemplate { offset, .. }
            | DeserializationError::RecursiveTemplate { offset, .. }
            | DeserializationError::TemplateExpansionLimit { offset, .. } => *offset,
        }
    }
}

/// Non-fatal conditions collected while framing or decoding a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeWarning {
    /// The trailing size copy of a record does not match its declared size.
    SizeMismatch {
        offset: u64,
        declared: u32,
        trailer: u32,
    },
    /// The payload ended without an explicit end-of-stream token.
    MissingEndOfStream { offset: u64 },
    /// A token tag carried reserved or inapplicable flag bits (lenient mode only).
    ReservedTokenBits { offset: u64, value: u8 },
}

impl DecodeWarning {
    pub fn offset(&self) -> u64 {
        match self {
            DecodeWarning::SizeMismatch { offset, .. }
            | DecodeWarning::MissingEndOfStream { offset }
            | DecodeWarning::ReservedTokenBits { offset, .. } => *offset,
        }
    }
}

#[derive(Debug, Error)]
pub enum SerializationError {
    #[error("Writing to XML failed with: {message}")]
    XmlOutputError { message: String },

    #[error("Record data contains invalid UTF-8")]
    RecordContainsInvalidUtf8 {
        #[from]
        source: std::string::FromUtf8Error,
    },
}

#[derive(Debug, Error)]
pub enum EvtxError {
    #[error("Failed to parse record {record_id}")]
    FailedToParseRecord {
        record_id: u64,
        #[source]
        source: Box<EvtxError>,
    },

    #[error(transparent)]
    DeserializationError(#[from] DeserializationError),

    #[error(transparent)]
    SerializationError(#[from] SerializationError),
}

impl EvtxError {
    /// Byte offset of the underlying deserialization error, if any.
    pub fn offset(&self) -> Option<u64> {
        match self {
            EvtxError::FailedToParseRecord { source, .. } => source.offset(),
            EvtxError::DeserializationError(e) => Some(e.offset()),
            EvtxError::SerializationError(_) => None,
        }
    }
}
