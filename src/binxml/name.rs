use crate::ChunkOffset;
use crate::err::{DeserializationError, DeserializationResult as Result};
use crate::utils::ByteCursor;

use log::trace;
use std::fmt;

/// Size of the "name link" header (next string offset + hash) preceding every name entry.
const BINXML_NAME_LINK_SIZE: usize = 6;

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone, Hash)]
pub struct BinXmlName {
    str: String,
}

impl fmt::Display for BinXmlName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.str)
    }
}

impl From<BinXmlName> for String {
    fn from(name: BinXmlName) -> Self {
        name.str
    }
}

impl BinXmlName {
    pub fn from_string(s: impl Into<String>) -> Self {
        BinXmlName { str: s.into() }
    }

    pub fn as_str(&self) -> &str {
        &self.str
    }

    /// Reads a name reference.
    ///
    /// The reference is a chunk offset. When it points right past itself the name entry is
    /// stored inline and the cursor moves past it; otherwise the entry is read from `chunk`
    /// and the cursor only moves past the reference.
    pub(crate) fn from_binxml_stream(
        cursor: &mut ByteCursor<'_>,
        chunk: Option<&[u8]>,
    ) -> Result<Self> {
        let reference_offset = cursor.position();
        let name_offset: ChunkOffset = cursor.u32_named("name_offset")?;

        if u64::from(name_offset) == cursor.position() {
            Self::from_name_entry(cursor)
        } else {
            trace!(
                "Offset {}: name is not inline, reading it from chunk offset {}",
                reference_offset, name_offset
            );
            let chunk = chunk.ok_or(DeserializationError::UnresolvedName {
                offset: reference_offset,
                name_offset,
            })?;
            let mut entry = ByteCursor::with_pos(chunk, name_offset as usize, 0)?;
            Self::from_name_entry(&mut entry)
        }
    }

    /// Reads a name entry: the link header, a length-prefixed UTF-16 string and its NUL.
    fn from_name_entry(cursor: &mut ByteCursor<'_>) -> Result<Self> {
        cursor.advance(BINXML_NAME_LINK_SIZE, "name_link")?;
        let str = cursor.len_prefixed_utf16_string(true, "name")?;

        Ok(BinXmlName { str })
    }
}
