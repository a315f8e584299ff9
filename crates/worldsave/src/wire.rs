use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WireError {
    #[error("{section}: unexpected end of data at offset {offset} (wanted {wanted} bytes)")]
    UnexpectedEnd {
        section: &'static str,
        offset: usize,
        wanted: usize,
    },
    #[error("{section}: invalid UTF-8 string at offset {offset}")]
    InvalidUtf8 { section: &'static str, offset: usize },
    #[error("{section}: string too long for u16 length ({len} bytes)")]
    StringTooLong { section: &'static str, len: usize },
    #[error("{section}: blob too long for u32 length ({len} bytes)")]
    BlobTooLong { section: &'static str, len: usize },
    #[error("{section}: {remaining} unexpected trailing bytes")]
    TrailingBytes {
        section: &'static str,
        remaining: usize,
    },
}

#[derive(Debug)]
pub(crate) struct ByteWriter {
    section: &'static str,
    bytes: Vec<u8>,
}

impl ByteWriter {
    pub fn new(section: &'static str) -> Self {
        Self {
            section,
            bytes: Vec::new(),
        }
    }

    pub fn put_u8(&mut self, value: u8) {
        self.bytes.push(value);
    }

    pub fn put_u16(&mut self, value: u16) {
        self.bytes.extend_from_slice(&value.to_le_bytes());
    }

    pub fn put_i16(&mut self, value: i16) {
        self.bytes.extend_from_slice(&value.to_le_bytes());
    }

    pub fn put_u32(&mut self, value: u32) {
        self.bytes.extend_from_slice(&value.to_le_bytes());
    }

    pub fn put_i32(&mut self, value: i32) {
        self.bytes.extend_from_slice(&value.to_le_bytes());
    }

    pub fn put_raw(&mut self, raw: &[u8]) {
        self.bytes.extend_from_slice(raw);
    }

    pub fn put_str(&mut self, value: &str) -> Result<(), WireError> {
        let raw = value.as_bytes();
        let len = u16::try_from(raw.len()).map_err(|_| WireError::StringTooLong {
            section: self.section,
            len: raw.len(),
        })?;
        self.put_u16(len);
        self.put_raw(raw);
        Ok(())
    }

    pub fn put_blob(&mut self, raw: &[u8]) -> Result<(), WireError> {
        let len = u32::try_from(raw.len()).map_err(|_| WireError::BlobTooLong {
            section: self.section,
            len: raw.len(),
        })?;
        self.put_u32(len);
        self.put_raw(raw);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

#[derive(Debug)]
pub(crate) struct ByteReader<'a> {
    section: &'static str,
    bytes: &'a [u8],
    cursor: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(section: &'static str, bytes: &'a [u8]) -> Self {
        Self {
            section,
            bytes,
            cursor: 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.cursor >= self.bytes.len()
    }

    pub fn read_exact(&mut self, len: usize) -> Result<&'a [u8], WireError> {
        let end = self.cursor.saturating_add(len);
        if end > self.bytes.len() {
            return Err(WireError::UnexpectedEnd {
                section: self.section,
                offset: self.cursor,
                wanted: len,
            });
        }
        let out = &self.bytes[self.cursor..end];
        self.cursor = end;
        Ok(out)
    }

    fn read_array<const N: usize>(&mut self) -> Result<[u8; N], WireError> {
        let offset = self.cursor;
        self.read_exact(N)?
            .try_into()
            .map_err(|_| WireError::UnexpectedEnd {
                section: self.section,
                offset,
                wanted: N,
            })
    }

    pub fn read_u8(&mut self) -> Result<u8, WireError> {
        Ok(self.read_array::<1>()?[0])
    }

    pub fn read_u16(&mut self) -> Result<u16, WireError> {
        Ok(u16::from_le_bytes(self.read_array()?))
    }

    pub fn read_i16(&mut self) -> Result<i16, WireError> {
        Ok(i16::from_le_bytes(self.read_array()?))
    }

    pub fn read_u32(&mut self) -> Result<u32, WireError> {
        Ok(u32::from_le_bytes(self.read_array()?))
    }

    pub fn read_i32(&mut self) -> Result<i32, WireError> {
        Ok(i32::from_le_bytes(self.read_array()?))
    }

    pub fn read_string(&mut self) -> Result<String, WireError> {
        let len = self.read_u16()? as usize;
        let offset = self.cursor;
        let raw = self.read_exact(len)?;
        std::str::from_utf8(raw)
            .map(ToString::to_string)
            .map_err(|_| WireError::InvalidUtf8 {
                section: self.section,
                offset,
            })
    }

    pub fn read_blob(&mut self) -> Result<&'a [u8], WireError> {
        let len = self.read_u32()? as usize;
        self.read_exact(len)
    }

    pub fn expect_end(&self) -> Result<(), WireError> {
        if self.cursor != self.bytes.len() {
            return Err(WireError::TrailingBytes {
                section: self.section,
                remaining: self.bytes.len() - self.cursor,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strings_and_integers_share_one_cursor() {
        let mut writer = ByteWriter::new("test");
        writer.put_i16(-2);
        writer.put_str("ExampleMod").expect("str");
        writer.put_u32(70_000);
        let bytes = writer.into_bytes();

        let mut reader = ByteReader::new("test", &bytes);
        assert_eq!(reader.read_i16().expect("i16"), -2);
        assert_eq!(reader.read_string().expect("string"), "ExampleMod");
        assert_eq!(reader.read_u32().expect("u32"), 70_000);
        reader.expect_end().expect("end");
    }

    #[test]
    fn short_read_reports_offset() {
        let bytes = [1u8];
        let mut reader = ByteReader::new("grid", &bytes);
        let error = reader.read_u16().expect_err("short");
        assert_eq!(
            error,
            WireError::UnexpectedEnd {
                section: "grid",
                offset: 0,
                wanted: 2
            }
        );
    }

    #[test]
    fn trailing_bytes_are_rejected() {
        let bytes = [1u8, 2];
        let mut reader = ByteReader::new("table", &bytes);
        reader.read_u8().expect("u8");
        assert!(matches!(
            reader.expect_end(),
            Err(WireError::TrailingBytes { remaining: 1, .. })
        ));
    }
}
