//! Variable-length unsigned integer codec
//!
//! The low bits of the first byte select the width:
//!
//! | first byte  | total bytes | payload bits |
//! |-------------|-------------|--------------|
//! | `xxxxxxx0`  | 1           | 7            |
//! | `xxxxxx01`  | 2           | 14           |
//! | `xxxxx011`  | 3           | 21           |
//! | `xxxx0111`  | 4           | 28           |
//! | `xxx01111`  | 5           | 32 (LE u32 follows) |
//! | `xx011111`  | 9           | 64 (LE u64 follows, wide form only) |

use crate::error::{FuncEvalError, FuncEvalResult};

/// Cursor over a debugger-filled byte buffer
#[derive(Debug, Clone)]
pub struct WireReader<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> WireReader<'a> {
    /// Create a reader positioned at the start of `bytes`
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, offset: 0 }
    }

    /// Current read position
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Bytes left after the current position
    pub fn remaining(&self) -> usize {
        self.bytes.len() - self.offset
    }

    /// Whether every byte has been consumed
    pub fn is_at_end(&self) -> bool {
        self.remaining() == 0
    }

    /// Consume and return everything after the current position
    pub fn take_rest(&mut self) -> &'a [u8] {
        let rest = &self.bytes[self.offset..];
        self.offset = self.bytes.len();
        rest
    }

    fn byte_at(&self, index: usize) -> FuncEvalResult<u32> {
        self.bytes
            .get(index)
            .map(|b| *b as u32)
            .ok_or_else(|| FuncEvalError::malformed(index, "unexpected end of buffer"))
    }

    fn fixed<const N: usize>(&self, start: usize) -> FuncEvalResult<[u8; N]> {
        self.bytes
            .get(start..start + N)
            .and_then(|slice| slice.try_into().ok())
            .ok_or_else(|| FuncEvalError::malformed(start, "unexpected end of buffer"))
    }

    /// Decode an unsigned 32-bit varint
    pub fn read_unsigned(&mut self) -> FuncEvalResult<u32> {
        let start = self.offset;
        let first = self.byte_at(start)?;

        let (value, width) = if first & 0x01 == 0 {
            (first >> 1, 1)
        } else if first & 0x02 == 0 {
            let b1 = self.byte_at(start + 1)?;
            ((first >> 2) | (b1 << 6), 2)
        } else if first & 0x04 == 0 {
            let b1 = self.byte_at(start + 1)?;
            let b2 = self.byte_at(start + 2)?;
            ((first >> 3) | (b1 << 5) | (b2 << 13), 3)
        } else if first & 0x08 == 0 {
            let b1 = self.byte_at(start + 1)?;
            let b2 = self.byte_at(start + 2)?;
            let b3 = self.byte_at(start + 3)?;
            ((first >> 4) | (b1 << 4) | (b2 << 12) | (b3 << 20), 4)
        } else if first & 0x10 == 0 {
            (u32::from_le_bytes(self.fixed::<4>(start + 1)?), 5)
        } else {
            return Err(FuncEvalError::malformed(
                start,
                format!("invalid varint prefix 0x{:02x}", first),
            ));
        };

        self.offset = start + width;
        Ok(value)
    }

    /// Decode an unsigned 64-bit ("wide") varint
    pub fn read_unsigned_long(&mut self) -> FuncEvalResult<u64> {
        let start = self.offset;
        let first = self.byte_at(start)?;

        if first & 0x1f != 0x1f {
            return self.read_unsigned().map(u64::from);
        }
        if first & 0x20 != 0 {
            return Err(FuncEvalError::malformed(
                start,
                format!("invalid wide varint prefix 0x{:02x}", first),
            ));
        }

        let value = u64::from_le_bytes(self.fixed::<8>(start + 1)?);
        self.offset = start + 9;
        Ok(value)
    }

    /// Decode a varint that must fit in a single byte value (0..=255)
    pub fn read_byte_value(&mut self) -> FuncEvalResult<u8> {
        let start = self.offset;
        let value = self.read_unsigned()?;
        u8::try_from(value).map_err(|_| {
            FuncEvalError::malformed(start, format!("byte value {} out of range", value))
        })
    }
}

/// Encoder producing the same varint scheme
#[derive(Debug, Clone, Default)]
pub struct WireWriter {
    bytes: Vec<u8>,
}

impl WireWriter {
    /// Create an empty writer
    pub fn new() -> Self {
        Self::default()
    }

    /// Encode an unsigned 32-bit varint using the narrowest width
    pub fn write_unsigned(&mut self, value: u32) {
        if value < 1 << 7 {
            self.bytes.push((value << 1) as u8);
        } else if value < 1 << 14 {
            self.bytes.push(((value << 2) | 0x01) as u8);
            self.bytes.push((value >> 6) as u8);
        } else if value < 1 << 21 {
            self.bytes.push(((value << 3) | 0x03) as u8);
            self.bytes.push((value >> 5) as u8);
            self.bytes.push((value >> 13) as u8);
        } else if value < 1 << 28 {
            self.bytes.push(((value << 4) | 0x07) as u8);
            self.bytes.push((value >> 4) as u8);
            self.bytes.push((value >> 12) as u8);
            self.bytes.push((value >> 20) as u8);
        } else {
            self.bytes.push(0x0f);
            self.bytes.extend_from_slice(&value.to_le_bytes());
        }
    }

    /// Encode an unsigned 64-bit varint
    pub fn write_unsigned_long(&mut self, value: u64) {
        match u32::try_from(value) {
            Ok(narrow) => self.write_unsigned(narrow),
            Err(_) => {
                self.bytes.push(0x1f);
                self.bytes.extend_from_slice(&value.to_le_bytes());
            }
        }
    }

    /// Append raw bytes without encoding
    pub fn write_raw(&mut self, bytes: &[u8]) {
        self.bytes.extend_from_slice(bytes);
    }

    /// Bytes written so far
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Whether nothing has been written
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Finish and return the encoded bytes
    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn encode(value: u32) -> Vec<u8> {
        let mut writer = WireWriter::new();
        writer.write_unsigned(value);
        writer.into_bytes()
    }

    #[rstest]
    #[case(0, 1)]
    #[case(127, 1)]
    #[case(128, 2)]
    #[case(16_383, 2)]
    #[case(16_384, 3)]
    #[case(2_097_151, 3)]
    #[case(2_097_152, 4)]
    #[case(268_435_455, 4)]
    #[case(268_435_456, 5)]
    #[case(u32::MAX, 5)]
    fn test_width_boundaries(#[case] value: u32, #[case] width: usize) {
        let bytes = encode(value);
        assert_eq!(bytes.len(), width);

        let mut reader = WireReader::new(&bytes);
        assert_eq!(reader.read_unsigned().unwrap(), value);
        assert!(reader.is_at_end());
    }

    #[test]
    fn test_known_encodings() {
        assert_eq!(encode(0), vec![0x00]);
        assert_eq!(encode(1), vec![0x02]);
        assert_eq!(encode(200), vec![0x21, 0x03]);
    }

    #[test]
    fn test_wide_value() {
        let mut writer = WireWriter::new();
        writer.write_unsigned_long(0x1122_3344_5566_7788);
        let bytes = writer.into_bytes();
        assert_eq!(bytes.len(), 9);
        assert_eq!(bytes[0], 0x1f);

        let mut reader = WireReader::new(&bytes);
        assert_eq!(reader.read_unsigned_long().unwrap(), 0x1122_3344_5566_7788);
    }

    #[test]
    fn test_wide_reader_accepts_narrow_form() {
        let bytes = encode(300);
        let mut reader = WireReader::new(&bytes);
        assert_eq!(reader.read_unsigned_long().unwrap(), 300);
    }

    #[test]
    fn test_narrow_reader_rejects_wide_prefix() {
        let mut reader = WireReader::new(&[0x1f, 0, 0, 0, 0, 0, 0, 0, 0]);
        assert!(matches!(
            reader.read_unsigned(),
            Err(FuncEvalError::MalformedRequest { offset: 0, .. })
        ));
    }

    #[test]
    fn test_invalid_wide_prefix() {
        let mut reader = WireReader::new(&[0x3f]);
        assert!(reader.read_unsigned_long().is_err());
    }

    #[test]
    fn test_truncated_multi_byte() {
        let bytes = encode(1_000_000);
        let mut reader = WireReader::new(&bytes[..bytes.len() - 1]);
        assert!(matches!(
            reader.read_unsigned(),
            Err(FuncEvalError::MalformedRequest { .. })
        ));
        assert_eq!(reader.offset(), 0);
    }

    #[test]
    fn test_byte_value_range() {
        let bytes = encode(256);
        let mut reader = WireReader::new(&bytes);
        assert!(reader.read_byte_value().is_err());

        let bytes = encode(255);
        let mut reader = WireReader::new(&bytes);
        assert_eq!(reader.read_byte_value().unwrap(), 255);
    }
}
