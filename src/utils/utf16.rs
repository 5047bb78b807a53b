#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub(crate) enum Utf16LeDecodeError {
    OddLength,
    InvalidData,
}

/// Decode a UTF-16LE byte slice until the first NUL (0x0000), if present.
pub(crate) fn decode_utf16le_bytes_z(bytes: &[u8]) -> Result<String, Utf16LeDecodeError> {
    if bytes.len() % 2 != 0 {
        return Err(Utf16LeDecodeError::OddLength);
    }

    let units = bytes
        .chunks_exact(2)
        .map(|chunk| u16::from_le_bytes([chunk[0], chunk[1]]))
        .take_while(|&c| c != 0);

    char::decode_utf16(units)
        .collect::<Result<String, _>>()
        .map_err(|_| Utf16LeDecodeError::InvalidData)
}
