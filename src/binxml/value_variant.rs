use crate::err::{DeserializationError, DeserializationResult as Result};
use crate::utils::ByteCursor;

use encoding::{DecoderTrap, EncodingRef};
use log::warn;
use serde_json::{Value, json};
use std::fmt;
use std::fmt::Write;
use winstructs::guid::Guid;

/// A decoded binary XML value.
///
/// Values are kept close to their raw representation: timestamps stay raw FILETIME/SYSTEMTIME
/// data, SIDs stay raw bytes. Rendering those is left to consumers.
#[derive(Debug, PartialOrd, PartialEq, Clone)]
pub enum BinXmlValue {
    NullType,
    StringType(String),
    AnsiStringType(String),
    Int8Type(i8),
    UInt8Type(u8),
    Int16Type(i16),
    UInt16Type(u16),
    Int32Type(i32),
    UInt32Type(u32),
    Int64Type(i64),
    UInt64Type(u64),
    Real32Type(f32),
    Real64Type(f64),
    BoolType(bool),
    BinaryType(Vec<u8>),
    GuidType(Guid),
    SizeTType(u64),
    /// Raw FILETIME (100ns intervals since 1601-01-01).
    FileTimeType(u64),
    /// Raw SYSTEMTIME structure.
    SysTimeType([u8; 16]),
    /// Raw SID bytes.
    SidType(Vec<u8>),
    HexInt32Type(u32),
    HexInt64Type(u64),
    EvtHandle,
    EvtXmlType(Vec<u8>),
    StringArrayType(Vec<String>),
    /// Any other array type, kept as the raw bytes of its items.
    ArrayType(BinXmlValueType, Vec<u8>),
}

#[derive(Debug, Copy, PartialOrd, PartialEq, Eq, Clone, Hash)]
pub enum BinXmlValueType {
    NullType,
    StringType,
    AnsiStringType,
    Int8Type,
    UInt8Type,
    Int16Type,
    UInt16Type,
    Int32Type,
    UInt32Type,
    Int64Type,
    UInt64Type,
    Real32Type,
    Real64Type,
    BoolType,
    BinaryType,
    GuidType,
    SizeTType,
    FileTimeType,
    SysTimeType,
    SidType,
    HexInt32Type,
    HexInt64Type,
    EvtHandle,
    BinXmlType,
    EvtXmlType,
    StringArrayType,
    AnsiStringArrayType,
    Int8ArrayType,
    UInt8ArrayType,
    Int16ArrayType,
    UInt16ArrayType,
    Int32ArrayType,
    UInt32ArrayType,
    Int64ArrayType,
    UInt64ArrayType,
    Real32ArrayType,
    Real64ArrayType,
    BoolArrayType,
    BinaryArrayType,
    GuidArrayType,
    SizeTArrayType,
    FileTimeArrayType,
    SysTimeArrayType,
    SidArrayType,
    HexInt32ArrayType,
    HexInt64ArrayType,
    EvtHandleArray,
    BinXmlArrayType,
    EvtXmlArrayType,
}

impl BinXmlValueType {
    pub fn from_u8(byte: u8) -> Option<BinXmlValueType> {
        match byte {
            0x00 => Some(BinXmlValueType::NullType),
            0x01 => Some(BinXmlValueType::StringType),
            0x02 => Some(BinXmlValueType::AnsiStringType),
            0x03 => Some(BinXmlValueType::Int8Type),
            0x04 => Some(BinXmlValueType::UInt8Type),
            0x05 => Some(BinXmlValueType::Int16Type),
            0x06 => Some(BinXmlValueType::UInt16Type),
            0x07 => Some(BinXmlValueType::Int32Type),
            0x08 => Some(BinXmlValueType::UInt32Type),
            0x09 => Some(BinXmlValueType::Int64Type),
            0x0a => Some(BinXmlValueType::UInt64Type),
            0x0b => Some(BinXmlValueType::Real32Type),
            0x0c => Some(BinXmlValueType::Real64Type),
            0x0d => Some(BinXmlValueType::BoolType),
            0x0e => Some(BinXmlValueType::BinaryType),
            0x0f => Some(BinXmlValueType::GuidType),
            0x10 => Some(BinXmlValueType::SizeTType),
            0x11 => Some(BinXmlValueType::FileTimeType),
            0x12 => Some(BinXmlValueType::SysTimeType),
            0x13 => Some(BinXmlValueType::SidType),
            0x14 => Some(BinXmlValueType::HexInt32Type),
            0x15 => Some(BinXmlValueType::HexInt64Type),
            0x20 => Some(BinXmlValueType::EvtHandle),
            0x21 => Some(BinXmlValueType::BinXmlType),
            0x23 => Some(BinXmlValueType::EvtXmlType),
            0x81 => Some(BinXmlValueType::StringArrayType),
            0x82 => Some(BinXmlValueType::AnsiStringArrayType),
            0x83 => Some(BinXmlValueType::Int8ArrayType),
            0x84 => Some(BinXmlValueType::UInt8ArrayType),
            0x85 => Some(BinXmlValueType::Int16ArrayType),
            0x86 => Some(BinXmlValueType::UInt16ArrayType),
            0x87 => Some(BinXmlValueType::Int32ArrayType),
            0x88 => Some(BinXmlValueType::UInt32ArrayType),
            0x89 => Some(BinXmlValueType::Int64ArrayType),
            0x8a => Some(BinXmlValueType::UInt64ArrayType),
            0x8b => Some(BinXmlValueType::Real32ArrayType),
            0x8c => Some(BinXmlValueType::Real64ArrayType),
            0x8d => Some(BinXmlValueType::BoolArrayType),
            0x8e => Some(BinXmlValueType::BinaryArrayType),
            0x8f => Some(BinXmlValueType::GuidArrayType),
            0x90 => Some(BinXmlValueType::SizeTArrayType),
            0x91 => Some(BinXmlValueType::FileTimeArrayType),
            0x92 => Some(BinXmlValueType::SysTimeArrayType),
            0x93 => Some(BinXmlValueType::SidArrayType),
            0x94 => Some(BinXmlValueType::HexInt32ArrayType),
            0x95 => Some(BinXmlValueType::HexInt64ArrayType),
            0xa0 => Some(BinXmlValueType::EvtHandleArray),
            0xa1 => Some(BinXmlValueType::BinXmlArrayType),
            0xa3 => Some(BinXmlValueType::EvtXmlArrayType),
            _ => None,
        }
    }

    pub fn is_array(&self) -> bool {
        matches!(
            self,
            BinXmlValueType::StringArrayType
                | BinXmlValueType::AnsiStringArrayType
                | BinXmlValueType::Int8ArrayType
                | BinXmlValueType::UInt8ArrayType
                | BinXmlValueType::Int16ArrayType
                | BinXmlValueType::UInt16ArrayType
                | BinXmlValueType::Int32ArrayType
                | BinXmlValueType::UInt32ArrayType
                | BinXmlValueType::Int64ArrayType
                | BinXmlValueType::UInt64ArrayType
                | BinXmlValueType::Real32ArrayType
                | BinXmlValueType::Real64ArrayType
                | BinXmlValueType::BoolArrayType
                | BinXmlValueType::BinaryArrayType
                | BinXmlValueType::GuidArrayType
                | BinXmlValueType::SizeTArrayType
                | BinXmlValueType::FileTimeArrayType
                | BinXmlValueType::SysTimeArrayType
                | BinXmlValueType::SidArrayType
                | BinXmlValueType::HexInt32ArrayType
                | BinXmlValueType::HexInt64ArrayType
                | BinXmlValueType::EvtHandleArray
                | BinXmlValueType::BinXmlArrayType
                | BinXmlValueType::EvtXmlArrayType
        )
    }
}

impl BinXmlValue {
    /// Reads a value of type `value_type`.
    ///
    /// `size` is the declared size when the value comes from a substitution array; inline
    /// `Value` tokens pass `None` and only support self-delimiting types.
    pub(crate) fn from_binxml_stream(
        cursor: &mut ByteCursor<'_>,
        value_type: BinXmlValueType,
        size: Option<u16>,
        ansi_codec: EncodingRef,
    ) -> Result<BinXmlValue> {
        let start = cursor.position();
        let unsupported = || DeserializationError::UnsupportedValueType {
            offset: start,
            value_type,
        };

        let value = match (value_type, size) {
            (BinXmlValueType::NullType, Some(sz)) => {
                cursor.advance(usize::from(sz), "null")?;
                BinXmlValue::NullType
            }
            (BinXmlValueType::NullType, None) => BinXmlValue::NullType,

            (BinXmlValueType::StringType, Some(sz)) => {
                let s = cursor.utf16_by_char_count(usize::from(sz / 2), "string")?;
                if sz % 2 != 0 {
                    cursor.advance(1, "string")?;
                }
                BinXmlValue::StringType(s)
            }
            (BinXmlValueType::StringType, None) => {
                BinXmlValue::StringType(cursor.len_prefixed_utf16_string(false, "string")?)
            }

            (BinXmlValueType::AnsiStringType, Some(sz)) => {
                let raw = cursor.take_bytes(usize::from(sz), "ansi_string")?;
                let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
                let decoded = ansi_codec
                    .decode(&raw[..end], DecoderTrap::Strict)
                    .map_err(|m| DeserializationError::AnsiDecode {
                        offset: start,
                        encoding: ansi_codec.name(),
                        message: m.to_string(),
                    })?;
                BinXmlValue::AnsiStringType(decoded)
            }

            (BinXmlValueType::Int8Type, _) => BinXmlValue::Int8Type(cursor.u8_named("i8")? as i8),
            (BinXmlValueType::UInt8Type, _) => BinXmlValue::UInt8Type(cursor.u8_named("u8")?),
            (BinXmlValueType::Int16Type, _) => {
                BinXmlValue::Int16Type(i16::from_le_bytes(cursor.array::<2>("i16")?))
            }
            (BinXmlValueType::UInt16Type, _) => BinXmlValue::UInt16Type(cursor.u16_named("u16")?),
            (BinXmlValueType::Int32Type, _) => {
                BinXmlValue::Int32Type(i32::from_le_bytes(cursor.array::<4>("i32")?))
            }
            (BinXmlValueType::UInt32Type, _) => BinXmlValue::UInt32Type(cursor.u32_named("u32")?),
            (BinXmlValueType::Int64Type, _) => {
                BinXmlValue::Int64Type(i64::from_le_bytes(cursor.array::<8>("i64")?))
            }
            (BinXmlValueType::UInt64Type, _) => BinXmlValue::UInt64Type(cursor.u64_named("u64")?),
            (BinXmlValueType::Real32Type, _) => {
                BinXmlValue::Real32Type(f32::from_le_bytes(cursor.array::<4>("f32")?))
            }
            (BinXmlValueType::Real64Type, _) => {
                BinXmlValue::Real64Type(f64::from_le_bytes(cursor.array::<8>("f64")?))
            }

            (BinXmlValueType::BoolType, _) => {
                let raw = i32::from_le_bytes(cursor.array::<4>("bool")?);
                if raw != 0 && raw != 1 {
                    warn!(
                        "invalid boolean value {} at offset {}; treating as {}",
                        raw,
                        start,
                        raw != 0
                    );
                }
                BinXmlValue::BoolType(raw != 0)
            }

            (BinXmlValueType::GuidType, _) => {
                let bytes = cursor.take_bytes(16, "guid")?;
                let guid = Guid::from_buffer(bytes).map_err(|_| DeserializationError::OutOfBounds {
                    what: "guid",
                    offset: start,
                    need: 16,
                    have: bytes.len(),
                })?;
                BinXmlValue::GuidType(guid)
            }

            (BinXmlValueType::SizeTType, Some(4)) => {
                BinXmlValue::SizeTType(u64::from(cursor.u32_named("sizet32")?))
            }
            (BinXmlValueType::SizeTType, Some(8)) => {
                BinXmlValue::SizeTType(cursor.u64_named("sizet64")?)
            }

            (BinXmlValueType::FileTimeType, _) => {
                BinXmlValue::FileTimeType(cursor.u64_named("filetime")?)
            }
            (BinXmlValueType::SysTimeType, _) => {
                BinXmlValue::SysTimeType(cursor.array::<16>("systime")?)
            }

            (BinXmlValueType::SidType, Some(sz)) => {
                BinXmlValue::SidType(cursor.take_bytes(usize::from(sz), "sid")?.to_vec())
            }
            (BinXmlValueType::SidType, None) => {
                // Revision, sub-authority count, 6 bytes of authority, then the sub-authorities.
                let mut peek = *cursor;
                peek.advance(1, "sid")?;
                let sub_count = usize::from(peek.u8_named("sid")?);
                BinXmlValue::SidType(cursor.take_bytes(8 + sub_count * 4, "sid")?.to_vec())
            }

            (BinXmlValueType::HexInt32Type, _) => {
                BinXmlValue::HexInt32Type(cursor.u32_named("hex32")?)
            }
            (BinXmlValueType::HexInt64Type, _) => {
                BinXmlValue::HexInt64Type(cursor.u64_named("hex64")?)
            }

            (BinXmlValueType::BinaryType, Some(sz)) => {
                BinXmlValue::BinaryType(cursor.take_bytes(usize::from(sz), "binary")?.to_vec())
            }

            (BinXmlValueType::EvtHandle, Some(sz)) => {
                cursor.advance(usize::from(sz), "evt_handle")?;
                BinXmlValue::EvtHandle
            }
            (BinXmlValueType::EvtXmlType, Some(sz)) => {
                BinXmlValue::EvtXmlType(cursor.take_bytes(usize::from(sz), "evt_xml")?.to_vec())
            }

            (BinXmlValueType::StringArrayType, Some(sz)) => {
                let raw = cursor.take_bytes(usize::from(sz), "string_array")?;
                BinXmlValue::StringArrayType(split_utf16_string_array(raw, start)?)
            }
            (t, Some(sz)) if t.is_array() => {
                let raw = cursor.take_bytes(usize::from(sz), "array")?;
                BinXmlValue::ArrayType(t, raw.to_vec())
            }

            _ => return Err(unsupported()),
        };

        Ok(value)
    }

    pub fn value_type(&self) -> BinXmlValueType {
        match self {
            BinXmlValue::NullType => BinXmlValueType::NullType,
            BinXmlValue::StringType(_) => BinXmlValueType::StringType,
            BinXmlValue::AnsiStringType(_) => BinXmlValueType::AnsiStringType,
            BinXmlValue::Int8Type(_) => BinXmlValueType::Int8Type,
            BinXmlValue::UInt8Type(_) => BinXmlValueType::UInt8Type,
            BinXmlValue::Int16Type(_) => BinXmlValueType::Int16Type,
            BinXmlValue::UInt16Type(_) => BinXmlValueType::UInt16Type,
            BinXmlValue::Int32Type(_) => BinXmlValueType::Int32Type,
            BinXmlValue::UInt32Type(_) => BinXmlValueType::UInt32Type,
            BinXmlValue::Int64Type(_) => BinXmlValueType::Int64Type,
            BinXmlValue::UInt64Type(_) => BinXmlValueType::UInt64Type,
            BinXmlValue::Real32Type(_) => BinXmlValueType::Real32Type,
            BinXmlValue::Real64Type(_) => BinXmlValueType::Real64Type,
            BinXmlValue::BoolType(_) => BinXmlValueType::BoolType,
            BinXmlValue::BinaryType(_) => BinXmlValueType::BinaryType,
            BinXmlValue::GuidType(_) => BinXmlValueType::GuidType,
            BinXmlValue::SizeTType(_) => BinXmlValueType::SizeTType,
            BinXmlValue::FileTimeType(_) => BinXmlValueType::FileTimeType,
            BinXmlValue::SysTimeType(_) => BinXmlValueType::SysTimeType,
            BinXmlValue::SidType(_) => BinXmlValueType::SidType,
            BinXmlValue::HexInt32Type(_) => BinXmlValueType::HexInt32Type,
            BinXmlValue::HexInt64Type(_) => BinXmlValueType::HexInt64Type,
            BinXmlValue::EvtHandle => BinXmlValueType::EvtHandle,
            BinXmlValue::EvtXmlType(_) => BinXmlValueType::EvtXmlType,
            BinXmlValue::StringArrayType(_) => BinXmlValueType::StringArrayType,
            BinXmlValue::ArrayType(t, _) => *t,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, BinXmlValue::NullType)
    }
}

/// Splits a buffer of consecutive NUL-terminated UTF-16LE strings.
fn split_utf16_string_array(raw: &[u8], offset: u64) -> Result<Vec<String>> {
    let units: Vec<u16> = raw
        .chunks_exact(2)
        .map(|c| u16::from_le_bytes([c[0], c[1]]))
        .collect();

    let mut items = Vec::new();
    for item in units.split(|&u| u == 0) {
        items.push(String::from_utf16(item).map_err(|_| DeserializationError::InvalidUtf16 {
            what: "string_array",
            offset,
        })?);
    }

    // A well formed array ends with a NUL, which leaves one empty trailing item.
    if units.last() == Some(&0) {
        items.pop();
    }

    Ok(items)
}

fn to_hex_string(bytes: &[u8]) -> String {
    bytes
        .iter()
        .fold(String::with_capacity(bytes.len() * 2), |mut acc, &b| {
            let _ = write!(acc, "{:02X}", b);
            acc
        })
}

impl fmt::Display for BinXmlValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BinXmlValue::NullType | BinXmlValue::EvtHandle => Ok(()),
            BinXmlValue::StringType(s) | BinXmlValue::AnsiStringType(s) => f.write_str(s),
            BinXmlValue::Int8Type(v) => write!(f, "{}", v),
            BinXmlValue::UInt8Type(v) => write!(f, "{}", v),
            BinXmlValue::Int16Type(v) => write!(f, "{}", v),
            BinXmlValue::UInt16Type(v) => write!(f, "{}", v),
            BinXmlValue::Int32Type(v) => write!(f, "{}", v),
            BinXmlValue::UInt32Type(v) => write!(f, "{}", v),
            BinXmlValue::Int64Type(v) => write!(f, "{}", v),
            BinXmlValue::UInt64Type(v) => write!(f, "{}", v),
            BinXmlValue::Real32Type(v) => write!(f, "{}", v),
            BinXmlValue::Real64Type(v) => write!(f, "{}", v),
            BinXmlValue::BoolType(v) => write!(f, "{}", v),
            BinXmlValue::GuidType(guid) => write!(f, "{}", guid),
            BinXmlValue::FileTimeType(v) => write!(f, "{}", v),
            BinXmlValue::SizeTType(v) | BinXmlValue::HexInt64Type(v) => write!(f, "0x{:x}", v),
            BinXmlValue::HexInt32Type(v) => write!(f, "0x{:x}", v),
            BinXmlValue::SysTimeType(bytes) => f.write_str(&to_hex_string(bytes)),
            BinXmlValue::BinaryType(bytes)
            | BinXmlValue::SidType(bytes)
            | BinXmlValue::EvtXmlType(bytes)
            | BinXmlValue::ArrayType(_, bytes) => f.write_str(&to_hex_string(bytes)),
            BinXmlValue::StringArrayType(items) => f.write_str(&items.join(",")),
        }
    }
}

impl From<&BinXmlValue> for Value {
    fn from(value: &BinXmlValue) -> Self {
        match value {
            BinXmlValue::NullType | BinXmlValue::EvtHandle => Value::Null,
            BinXmlValue::StringType(s) | BinXmlValue::AnsiStringType(s) => json!(s),
            BinXmlValue::Int8Type(num) => json!(num),
            BinXmlValue::UInt8Type(num) => json!(num),
            BinXmlValue::Int16Type(num) => json!(num),
            BinXmlValue::UInt16Type(num) => json!(num),
            BinXmlValue::Int32Type(num) => json!(num),
            BinXmlValue::UInt32Type(num) => json!(num),
            BinXmlValue::Int64Type(num) => json!(num),
            BinXmlValue::UInt64Type(num) => json!(num),
            BinXmlValue::Real32Type(num) => json!(num),
            BinXmlValue::Real64Type(num) => json!(num),
            BinXmlValue::BoolType(b) => json!(b),
            BinXmlValue::FileTimeType(raw) => json!(raw),
            BinXmlValue::StringArrayType(items) => json!(items),
            other => json!(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use encoding::all::WINDOWS_1252;
    use pretty_assertions::assert_eq;

    fn read(bytes: &[u8], value_type: BinXmlValueType, size: Option<u16>) -> Result<BinXmlValue> {
        let mut cursor = ByteCursor::new(bytes, 0);
        BinXmlValue::from_binxml_stream(&mut cursor, value_type, size, WINDOWS_1252)
    }

    #[test]
    fn test_reads_sized_string_and_trims_nul() {
        let mut bytes: Vec<u8> = "4624".encode_utf16().flat_map(u16::to_le_bytes).collect();
        bytes.extend_from_slice(&[0, 0]);

        let value = read(&bytes, BinXmlValueType::StringType, Some(10)).unwrap();
        assert_eq!(value, BinXmlValue::StringType("4624".to_string()));
    }

    #[test]
    fn test_reads_fixed_width_numbers() {
        assert_eq!(
            read(&[0xfe, 0xff], BinXmlValueType::Int16Type, Some(2)).unwrap(),
            BinXmlValue::Int16Type(-2)
        );
        assert_eq!(
            read(&[0x10, 0, 0, 0], BinXmlValueType::HexInt32Type, Some(4)).unwrap(),
            BinXmlValue::HexInt32Type(16)
        );
        assert_eq!(
            read(&[0x10, 0, 0, 0], BinXmlValueType::SizeTType, Some(4)).unwrap(),
            BinXmlValue::SizeTType(16)
        );
        assert_eq!(
            read(&[2, 0, 0, 0], BinXmlValueType::BoolType, Some(4)).unwrap(),
            BinXmlValue::BoolType(true)
        );
    }

    #[test]
    fn test_reads_ansi_string() {
        let value = read(b"caf\xe9\x00", BinXmlValueType::AnsiStringType, Some(5)).unwrap();
        assert_eq!(value, BinXmlValue::AnsiStringType("café".to_string()));
    }

    #[test]
    fn test_reads_string_array() {
        let mut bytes = Vec::new();
        for s in ["a", "bc"] {
            bytes.extend(s.encode_utf16().flat_map(u16::to_le_bytes));
            bytes.extend_from_slice(&[0, 0]);
        }
        let value = read(&bytes, BinXmlValueType::StringArrayType, Some(bytes.len() as u16)).unwrap();
        assert_eq!(
            value,
            BinXmlValue::StringArrayType(vec!["a".to_string(), "bc".to_string()])
        );
    }

    #[test]
    fn test_reads_unsized_sid() {
        let bytes = [1, 1, 0, 0, 0, 0, 0, 5, 18, 0, 0, 0, 0xff];
        let value = read(&bytes, BinXmlValueType::SidType, None).unwrap();
        assert_eq!(value, BinXmlValue::SidType(bytes[..12].to_vec()));
    }

    #[test]
    fn test_variable_width_types_need_a_size() {
        assert!(matches!(
            read(&[0; 8], BinXmlValueType::BinaryType, None),
            Err(DeserializationError::UnsupportedValueType { .. })
        ));
    }

    #[test]
    fn test_truncated_values_fail_out_of_bounds() {
        assert!(matches!(
            read(&[0; 3], BinXmlValueType::UInt32Type, Some(4)),
            Err(DeserializationError::OutOfBounds { .. })
        ));
        assert!(matches!(
            read(&[0; 3], BinXmlValueType::BinaryType, Some(40)),
            Err(DeserializationError::OutOfBounds { .. })
        ));
    }

    #[test]
    fn test_type_table() {
        assert_eq!(BinXmlValueType::from_u8(0x21), Some(BinXmlValueType::BinXmlType));
        assert_eq!(BinXmlValueType::from_u8(0x16), None);
        assert!(BinXmlValueType::Int32ArrayType.is_array());
    }
}
