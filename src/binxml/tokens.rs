//! Binary XML token tags and the readers for each token's body.
//!
//! Every reader expects the cursor to be positioned right after the tag byte, and leaves it right
//! after the token. Callers read from a copy of their cursor and commit it only on success.

use crate::ChunkOffset;
use crate::binxml::name::BinXmlName;
use crate::binxml::value_variant::{BinXmlValue, BinXmlValueType};
use crate::err::{DeserializationError, DeserializationResult as Result};
use crate::utils::ByteCursor;

use bitflags::bitflags;
use encoding::EncodingRef;
use log::trace;
use winstructs::guid::Guid;

/// Mask selecting the token kind out of a tag byte.
pub(crate) const TOKEN_KIND_MASK: u8 = 0x3f;

/// Size of a template definition header (next offset + guid + data size).
pub(crate) const TEMPLATE_DEFINITION_HEADER_SIZE: u32 = 24;

bitflags! {
    /// Flag bits of a token tag byte.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct TokenFlags: u8 {
        /// "Has attributes" on element starts, "more data follows" on the others.
        const HAS_MORE_DATA = 0x40;
        /// Never set by a conforming encoder.
        const RESERVED = 0x80;
    }
}

#[derive(Debug, Clone, Copy, PartialOrd, PartialEq, Eq)]
pub enum BinXmlRawToken {
    EndOfStream,
    OpenStartElement(OpenStartElementTokenMeta),
    CloseStartElement,
    CloseEmptyElement,
    EndElement,
    Value,
    Attribute(AttributeTokenMeta),
    CDataSection,
    CharReference,
    EntityReference,
    ProcessingInstructionTarget,
    ProcessingInstructionData,
    TemplateInstance,
    NormalSubstitution,
    OptionalSubstitution,
    FragmentHeader,
}

impl BinXmlRawToken {
    /// Maps a tag byte exactly; any flag bit a token does not define makes the byte invalid.
    pub fn from_u8(byte: u8) -> Option<BinXmlRawToken> {
        match byte {
            0x00 => Some(BinXmlRawToken::EndOfStream),
            // <Event>
            0x01 => Some(BinXmlRawToken::OpenStartElement(OpenStartElementTokenMeta {
                has_attributes: false,
            })),
            0x41 => Some(BinXmlRawToken::OpenStartElement(OpenStartElementTokenMeta {
                has_attributes: true,
            })),
            // Indicates end of start element
            0x02 => Some(BinXmlRawToken::CloseStartElement),
            0x03 => Some(BinXmlRawToken::CloseEmptyElement),
            // </Event>
            0x04 => Some(BinXmlRawToken::EndElement),
            0x05 | 0x45 => Some(BinXmlRawToken::Value),
            0x06 => Some(BinXmlRawToken::Attribute(AttributeTokenMeta {
                more_attributes_expected: false,
            })),
            0x46 => Some(BinXmlRawToken::Attribute(AttributeTokenMeta {
                more_attributes_expected: true,
            })),
            0x07 | 0x47 => Some(BinXmlRawToken::CDataSection),
            0x08 | 0x48 => Some(BinXmlRawToken::CharReference),
            0x09 | 0x49 => Some(BinXmlRawToken::EntityReference),
            0x0a => Some(BinXmlRawToken::ProcessingInstructionTarget),
            0x0b => Some(BinXmlRawToken::ProcessingInstructionData),
            0x0c => Some(BinXmlRawToken::TemplateInstance),
            0x0d => Some(BinXmlRawToken::NormalSubstitution),
            0x0e => Some(BinXmlRawToken::OptionalSubstitution),
            0x0f => Some(BinXmlRawToken::FragmentHeader),
            _ => None,
        }
    }

    /// Maps a tag byte by its low 6 bits, dropping the flag bits a token does not define.
    pub fn from_u8_lenient(byte: u8) -> Option<BinXmlRawToken> {
        let flags = TokenFlags::from_bits_truncate(byte);
        let kind = byte & TOKEN_KIND_MASK;

        match kind {
            0x01 | 0x05 | 0x06 | 0x07 | 0x08 | 0x09 => {
                Self::from_u8(kind | (flags & TokenFlags::HAS_MORE_DATA).bits())
            }
            _ => Self::from_u8(kind),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialOrd, PartialEq, Eq)]
pub struct OpenStartElementTokenMeta {
    pub has_attributes: bool,
}

#[derive(Debug, Clone, Copy, PartialOrd, PartialEq, Eq)]
pub struct AttributeTokenMeta {
    pub more_attributes_expected: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinXmlFragmentHeader {
    pub major_version: u8,
    pub minor_version: u8,
    pub flags: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinXmlOpenStartElement {
    pub dependency_id: u16,
    pub data_size: u32,
    pub name: BinXmlName,
    pub attribute_list_size: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinXmlAttribute {
    pub name: BinXmlName,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinXmlEntityReference {
    pub name: BinXmlName,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinXmlProcessingInstructionTarget {
    pub name: BinXmlName,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TemplateSubstitutionDescriptor {
    pub substitution_index: u16,
    pub value_type: BinXmlValueType,
    /// Optional substitutions tolerate a missing or empty value.
    pub optional: bool,
}

/// A template definition header plus its body.
#[derive(Debug, Clone)]
pub struct BinXmlTemplateDefinition<'a> {
    pub next_template_offset: ChunkOffset,
    pub guid: Guid,
    pub data: &'a [u8],
    /// Absolute offset of `data[0]`.
    pub data_offset: u64,
}

/// One entry of a substitution array.
#[derive(Debug, Clone, PartialEq)]
pub enum TemplateValue<'a> {
    Value(BinXmlValue),
    /// An embedded binary XML fragment, decoded in place when substituted.
    BinXml { data: &'a [u8], offset: u64 },
}

#[derive(Debug, Clone)]
pub struct BinXmlTemplateRef<'a> {
    pub template_id: u32,
    pub definition_offset: ChunkOffset,
    /// Present when the definition is stored inline in the instance.
    pub definition: Option<BinXmlTemplateDefinition<'a>>,
    pub substitution_array: Vec<TemplateValue<'a>>,
}

/// A decoded token, before template and substitution expansion.
#[derive(Debug, Clone)]
pub enum BinXmlToken<'a> {
    EndOfStream,
    OpenStartElement(BinXmlOpenStartElement),
    CloseStartElement,
    CloseEmptyElement,
    EndElement,
    Value(BinXmlValue),
    Attribute(BinXmlAttribute),
    CDataSection(String),
    CharReference(u16),
    EntityReference(BinXmlEntityReference),
    ProcessingInstructionTarget(BinXmlProcessingInstructionTarget),
    ProcessingInstructionData(String),
    TemplateInstance(BinXmlTemplateRef<'a>),
    Substitution(TemplateSubstitutionDescriptor),
    FragmentHeader(BinXmlFragmentHeader),
}

/// What the token readers need besides the cursor.
#[derive(Clone, Copy)]
pub(crate) struct TokenContext<'a> {
    /// The chunk buffer, for names and template definitions that are not inline.
    pub chunk: Option<&'a [u8]>,
    pub ansi_codec: EncodingRef,
}

/// Reads the body of a token whose tag byte was already consumed.
pub(crate) fn read_token<'a>(
    cursor: &mut ByteCursor<'a>,
    raw_token: BinXmlRawToken,
    ctx: TokenContext<'a>,
) -> Result<BinXmlToken<'a>> {
    let token = match raw_token {
        BinXmlRawToken::EndOfStream => BinXmlToken::EndOfStream,
        BinXmlRawToken::OpenStartElement(meta) => BinXmlToken::OpenStartElement(
            read_open_start_element(cursor, ctx.chunk, meta.has_attributes)?,
        ),
        BinXmlRawToken::CloseStartElement => BinXmlToken::CloseStartElement,
        BinXmlRawToken::CloseEmptyElement => BinXmlToken::CloseEmptyElement,
        BinXmlRawToken::EndElement => BinXmlToken::EndElement,
        BinXmlRawToken::Value => BinXmlToken::Value(read_value(cursor, ctx.ansi_codec)?),
        BinXmlRawToken::Attribute(_) => BinXmlToken::Attribute(BinXmlAttribute {
            name: BinXmlName::from_binxml_stream(cursor, ctx.chunk)?,
        }),
        BinXmlRawToken::CDataSection => {
            BinXmlToken::CDataSection(cursor.len_prefixed_utf16_string(false, "cdata")?)
        }
        BinXmlRawToken::CharReference => {
            BinXmlToken::CharReference(cursor.u16_named("char_reference")?)
        }
        BinXmlRawToken::EntityReference => {
            BinXmlToken::EntityReference(BinXmlEntityReference {
                name: BinXmlName::from_binxml_stream(cursor, ctx.chunk)?,
            })
        }
        BinXmlRawToken::ProcessingInstructionTarget => {
            BinXmlToken::ProcessingInstructionTarget(BinXmlProcessingInstructionTarget {
                name: BinXmlName::from_binxml_stream(cursor, ctx.chunk)?,
            })
        }
        BinXmlRawToken::ProcessingInstructionData => BinXmlToken::ProcessingInstructionData(
            cursor.len_prefixed_utf16_string(false, "pi_data")?,
        ),
        BinXmlRawToken::TemplateInstance => {
            BinXmlToken::TemplateInstance(read_template(cursor, ctx.ansi_codec)?)
        }
        BinXmlRawToken::NormalSubstitution => {
            BinXmlToken::Substitution(read_substitution_descriptor(cursor, false)?)
        }
        BinXmlRawToken::OptionalSubstitution => {
            BinXmlToken::Substitution(read_substitution_descriptor(cursor, true)?)
        }
        BinXmlRawToken::FragmentHeader => {
            BinXmlToken::FragmentHeader(read_fragment_header(cursor)?)
        }
    };

    Ok(token)
}

pub(crate) fn read_open_start_element(
    cursor: &mut ByteCursor<'_>,
    chunk: Option<&[u8]>,
    has_attributes: bool,
) -> Result<BinXmlOpenStartElement> {
    let dependency_id = cursor.u16_named("open_start_element.dependency_id")?;
    let data_size = cursor.u32_named("open_start_element.data_size")?;
    let name = BinXmlName::from_binxml_stream(cursor, chunk)?;

    let attribute_list_size = if has_attributes {
        Some(cursor.u32_named("open_start_element.attribute_list_size")?)
    } else {
        None
    };

    Ok(BinXmlOpenStartElement {
        dependency_id,
        data_size,
        name,
        attribute_list_size,
    })
}

fn read_value_type(cursor: &mut ByteCursor<'_>) -> Result<BinXmlValueType> {
    let offset = cursor.position();
    let value_type_token = cursor.u8_named("value_type")?;

    BinXmlValueType::from_u8(value_type_token).ok_or(DeserializationError::UnknownValueType {
        offset,
        value: value_type_token,
    })
}

pub(crate) fn read_value(
    cursor: &mut ByteCursor<'_>,
    ansi_codec: EncodingRef,
) -> Result<BinXmlValue> {
    let value_type = read_value_type(cursor)?;
    BinXmlValue::from_binxml_stream(cursor, value_type, None, ansi_codec)
}

pub(crate) fn read_substitution_descriptor(
    cursor: &mut ByteCursor<'_>,
    optional: bool,
) -> Result<TemplateSubstitutionDescriptor> {
    let substitution_index = cursor.u16_named("substitution_index")?;
    let value_type = read_value_type(cursor)?;

    Ok(TemplateSubstitutionDescriptor {
        substitution_index,
        value_type,
        optional,
    })
}

pub(crate) fn read_fragment_header(cursor: &mut ByteCursor<'_>) -> Result<BinXmlFragmentHeader> {
    let [major_version, minor_version, flags] = cursor.array::<3>("fragment_header")?;

    Ok(BinXmlFragmentHeader {
        major_version,
        minor_version,
        flags,
    })
}

/// Reads a template definition header and its body.
pub(crate) fn read_template_definition<'a>(
    cursor: &mut ByteCursor<'a>,
) -> Result<BinXmlTemplateDefinition<'a>> {
    let next_template_offset = cursor.u32_named("template.next_template_offset")?;
    let guid_offset = cursor.position();
    let guid_bytes = cursor.take_bytes(16, "template.guid")?;
    let guid = Guid::from_buffer(guid_bytes).map_err(|_| DeserializationError::OutOfBounds {
        what: "template.guid",
        offset: guid_offset,
        need: 16,
        have: guid_bytes.len(),
    })?;
    let data_size = cursor.u32_named("template.data_size")?;

    let data_offset = cursor.position();
    let data = cursor.take_bytes(data_size as usize, "template.data")?;

    Ok(BinXmlTemplateDefinition {
        next_template_offset,
        guid,
        data,
        data_offset,
    })
}

pub(crate) fn read_template<'a>(
    cursor: &mut ByteCursor<'a>,
    ansi_codec: EncodingRef,
) -> Result<BinXmlTemplateRef<'a>> {
    trace!("TemplateInstance at {}", cursor.position());

    let _ = cursor.u8_named("template_instance.unknown")?;
    let template_id = cursor.u32_named("template_instance.template_id")?;
    let definition_offset = cursor.u32_named("template_instance.definition_offset")?;

    let definition = if u64::from(definition_offset) == cursor.position() {
        Some(read_template_definition(cursor)?)
    } else {
        None
    };

    let substitution_array = read_template_values(cursor, ansi_codec)?;

    Ok(BinXmlTemplateRef {
        template_id,
        definition_offset,
        definition,
        substitution_array,
    })
}

/// Reads a substitution array: a count, `count` descriptors, then the values back to back.
pub(crate) fn read_template_values<'a>(
    cursor: &mut ByteCursor<'a>,
    ansi_codec: EncodingRef,
) -> Result<Vec<TemplateValue<'a>>> {
    let count_offset = cursor.position();
    let number_of_substitutions = cursor.u32_named("template_instance.substitution_count")?;

    // Bounds-check the descriptor table as a whole before allocating anything for it.
    let table_len = (number_of_substitutions as usize)
        .checked_mul(4)
        .ok_or(DeserializationError::OutOfBounds {
            what: "template_instance.descriptors",
            offset: count_offset,
            need: usize::MAX,
            have: cursor.remaining(),
        })?;
    let table_offset = cursor.position();
    let table = cursor.take_bytes(table_len, "template_instance.descriptors")?;

    let mut descriptors = Vec::with_capacity(number_of_substitutions as usize);
    for (i, descriptor) in table.chunks_exact(4).enumerate() {
        let size = u16::from_le_bytes([descriptor[0], descriptor[1]]);
        let value_type = BinXmlValueType::from_u8(descriptor[2]).ok_or(
            DeserializationError::UnknownValueType {
                offset: table_offset + (i as u64) * 4 + 2,
                value: descriptor[2],
            },
        )?;
        descriptors.push((size, value_type));
    }

    trace!("{:?}", descriptors);

    let mut values = Vec::with_capacity(descriptors.len());
    for (size, value_type) in descriptors {
        let offset = cursor.position();
        let data = cursor.take_bytes(usize::from(size), "template_instance.value")?;

        let value = match value_type {
            BinXmlValueType::BinXmlType => TemplateValue::BinXml { data, offset },
            _ if size == 0 => TemplateValue::Value(BinXmlValue::NullType),
            _ => {
                let mut value_cursor = ByteCursor::new(data, offset);
                TemplateValue::Value(BinXmlValue::from_binxml_stream(
                    &mut value_cursor,
                    value_type,
                    Some(size),
                    ansi_codec,
                )?)
            }
        };

        values.push(value);
    }

    Ok(values)
}
