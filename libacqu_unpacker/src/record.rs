//! Declarative decoding of fixed-size hardware records.
//!
//! A [`Layout`] is an ordered list of named fields. Decoding walks a little-endian byte
//! cursor field by field, so a record is never produced by reinterpreting memory and a
//! short slice is always reported instead of read past.
use byteorder::{ByteOrder, LittleEndian, ReadBytesExt};
use std::io::Cursor;

use super::constants::WORD_SIZE;
use super::error::RecordError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    U16,
    I16,
    U32,
    I32,
    /// Fixed-width, NUL padded character array
    Chars(usize),
    /// Alignment bytes which are skipped
    Pad(usize),
}

impl FieldKind {
    pub const fn width(&self) -> usize {
        match *self {
            Self::U16 | Self::I16 => 2,
            Self::U32 | Self::I32 => 4,
            Self::Chars(n) | Self::Pad(n) => n,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    pub name: &'static str,
    pub kind: FieldKind,
}

impl FieldSpec {
    pub const fn new(name: &'static str, kind: FieldKind) -> Self {
        Self { name, kind }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Layout {
    pub name: &'static str,
    pub fields: &'static [FieldSpec],
}

impl Layout {
    pub const fn new(name: &'static str, fields: &'static [FieldSpec]) -> Self {
        Self { name, fields }
    }

    /// Size of the record in bytes
    pub const fn size(&self) -> usize {
        let mut size = 0;
        let mut idx = 0;
        while idx < self.fields.len() {
            size += self.fields[idx].kind.width();
            idx += 1;
        }
        size
    }

    /// Decode the record from the front of `bytes`. Trailing bytes are ignored.
    pub fn decode(&self, bytes: &[u8]) -> Result<Record, RecordError> {
        let needed = self.size();
        if bytes.len() < needed {
            return Err(self.truncated(bytes.len()));
        }

        let mut cursor = Cursor::new(bytes);
        let mut values = Vec::with_capacity(self.fields.len());
        for field in self.fields {
            let value = match field.kind {
                FieldKind::U16 => cursor.read_u16::<LittleEndian>().map(FieldValue::U16),
                FieldKind::I16 => cursor.read_i16::<LittleEndian>().map(FieldValue::I16),
                FieldKind::U32 => cursor.read_u32::<LittleEndian>().map(FieldValue::U32),
                FieldKind::I32 => cursor.read_i32::<LittleEndian>().map(FieldValue::I32),
                FieldKind::Chars(n) => {
                    let start = cursor.position() as usize;
                    cursor.set_position((start + n) as u64);
                    Ok(FieldValue::Chars(bytes[start..start + n].to_vec()))
                }
                FieldKind::Pad(n) => {
                    cursor.set_position(cursor.position() + n as u64);
                    continue;
                }
            }
            .map_err(|_| self.truncated(bytes.len()))?;
            values.push((field.name, value));
        }

        Ok(Record {
            layout: self.name,
            values,
        })
    }

    fn truncated(&self, available: usize) -> RecordError {
        RecordError::Truncated {
            layout: self.name,
            needed: self.size(),
            available,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    U16(u16),
    I16(i16),
    U32(u32),
    I32(i32),
    Chars(Vec<u8>),
}

/// The decoded fields of one record, looked up by name
#[derive(Debug, Clone)]
pub struct Record {
    layout: &'static str,
    values: Vec<(&'static str, FieldValue)>,
}

impl Record {
    fn get(&self, field: &str) -> Result<&FieldValue, RecordError> {
        self.values
            .iter()
            .find(|(name, _)| *name == field)
            .map(|(_, value)| value)
            .ok_or_else(|| RecordError::NoSuchField {
                layout: self.layout,
                field: field.to_string(),
            })
    }

    fn wrong_kind(&self, field: &str) -> RecordError {
        RecordError::WrongKind {
            layout: self.layout,
            field: field.to_string(),
        }
    }

    pub fn u16(&self, field: &str) -> Result<u16, RecordError> {
        match self.get(field)? {
            FieldValue::U16(v) => Ok(*v),
            _ => Err(self.wrong_kind(field)),
        }
    }

    pub fn i16(&self, field: &str) -> Result<i16, RecordError> {
        match self.get(field)? {
            FieldValue::I16(v) => Ok(*v),
            _ => Err(self.wrong_kind(field)),
        }
    }

    pub fn u32(&self, field: &str) -> Result<u32, RecordError> {
        match self.get(field)? {
            FieldValue::U32(v) => Ok(*v),
            _ => Err(self.wrong_kind(field)),
        }
    }

    pub fn i32(&self, field: &str) -> Result<i32, RecordError> {
        match self.get(field)? {
            FieldValue::I32(v) => Ok(*v),
            _ => Err(self.wrong_kind(field)),
        }
    }

    pub fn chars(&self, field: &str) -> Result<&[u8], RecordError> {
        match self.get(field)? {
            FieldValue::Chars(v) => Ok(v),
            _ => Err(self.wrong_kind(field)),
        }
    }

    /// Character field cut at the first NUL and cleaned up, see [`sanitize`]
    pub fn string(&self, field: &str) -> Result<String, RecordError> {
        Ok(sanitize(self.chars(field)?))
    }

    /// Like [`Record::string`], but None if the field has no NUL terminator
    pub fn terminated_string(&self, field: &str) -> Result<Option<String>, RecordError> {
        let chars = self.chars(field)?;
        if chars.contains(&0) {
            Ok(Some(sanitize(chars)))
        } else {
            Ok(None)
        }
    }
}

/// Cut at the first NUL, trim surrounding whitespace and drop newlines
pub fn sanitize(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|b| *b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end])
        .trim()
        .replace('\n', "")
}

/// Little-endian byte image of a word slice
pub fn words_to_bytes(words: &[u32]) -> Vec<u8> {
    let mut bytes = vec![0u8; words.len() * WORD_SIZE];
    LittleEndian::write_u32_into(words, &mut bytes);
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_LAYOUT: Layout = Layout::new(
        "TestRecord",
        &[
            FieldSpec::new("marker", FieldKind::U32),
            FieldSpec::new("label", FieldKind::Chars(6)),
            FieldSpec::new("count", FieldKind::I16),
            FieldSpec::new("flags", FieldKind::U16),
            FieldSpec::new("pad", FieldKind::Pad(2)),
            FieldSpec::new("offset", FieldKind::I32),
        ],
    );

    fn test_bytes() -> Vec<u8> {
        let mut bytes = vec![0x10, 0x10, 0x10, 0x10];
        bytes.extend_from_slice(b" ab\n\0x");
        bytes.extend_from_slice(&(-3i16).to_le_bytes());
        bytes.extend_from_slice(&0xBEEFu16.to_le_bytes());
        bytes.extend_from_slice(&[0xAA, 0xAA]);
        bytes.extend_from_slice(&(-70000i32).to_le_bytes());
        bytes
    }

    #[test]
    fn test_layout_size() {
        assert_eq!(TEST_LAYOUT.size(), 20);
    }

    #[test]
    fn test_decode_fields() {
        let record = TEST_LAYOUT.decode(&test_bytes()).unwrap();
        assert_eq!(record.u32("marker").unwrap(), 0x10101010);
        assert_eq!(record.string("label").unwrap(), "ab");
        assert_eq!(record.i16("count").unwrap(), -3);
        assert_eq!(record.u16("flags").unwrap(), 0xBEEF);
        assert_eq!(record.i32("offset").unwrap(), -70000);
        // Padding is not addressable
        assert!(matches!(
            record.u16("pad"),
            Err(RecordError::NoSuchField { .. })
        ));
    }

    #[test]
    fn test_truncated() {
        let bytes = test_bytes();
        match TEST_LAYOUT.decode(&bytes[..19]) {
            Err(RecordError::Truncated {
                needed, available, ..
            }) => {
                assert_eq!(needed, 20);
                assert_eq!(available, 19);
            }
            _ => panic!("Short input must be rejected"),
        }
    }

    #[test]
    fn test_wrong_kind() {
        let record = TEST_LAYOUT.decode(&test_bytes()).unwrap();
        assert!(matches!(
            record.i32("marker"),
            Err(RecordError::WrongKind { .. })
        ));
    }

    #[test]
    fn test_terminated_string() {
        let record = TEST_LAYOUT.decode(&test_bytes()).unwrap();
        assert_eq!(record.terminated_string("label").unwrap().unwrap(), "ab");

        let mut bytes = test_bytes();
        bytes[4..10].copy_from_slice(b"abcdef");
        let record = TEST_LAYOUT.decode(&bytes).unwrap();
        assert_eq!(record.terminated_string("label").unwrap(), None);
    }

    #[test]
    fn test_words_to_bytes() {
        assert_eq!(
            words_to_bytes(&[0x04030201, 0xFFFFFFFF]),
            vec![1, 2, 3, 4, 0xFF, 0xFF, 0xFF, 0xFF]
        );
    }
}
