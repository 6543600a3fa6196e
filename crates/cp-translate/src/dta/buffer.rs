//! Cursor-based binary reader for Stata files.
//!
//! Stata writes numbers in the byte order declared by the file header
//! (`HILO`/`MSF` = big-endian, `LOHI`/`LSF` = little-endian), so every
//! multi-byte read goes through [`ByteOrder`].

use super::{DtaError, Result};

/// Byte order declared in the file header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    /// Most significant byte first.
    Big,
    /// Least significant byte first.
    Little,
}

/// A cursor over a byte slice with a fixed byte order.
pub struct DtaBuffer<'a> {
    data: &'a [u8],
    pos: usize,
    order: ByteOrder,
}

macro_rules! read_num {
    ($name:ident, $ty:ty, $n:expr) => {
        /// Read one value in the buffer's byte order.
        pub fn $name(&mut self) -> Result<$ty> {
            let b = self.read_bytes($n)?;
            let mut arr = [0u8; $n];
            arr.copy_from_slice(b);
            Ok(match self.order {
                ByteOrder::Big => <$ty>::from_be_bytes(arr),
                ByteOrder::Little => <$ty>::from_le_bytes(arr),
            })
        }
    };
}

impl<'a> DtaBuffer<'a> {
    /// Create a reader; the byte order can be changed once the header is parsed.
    pub fn new(data: &'a [u8], order: ByteOrder) -> Self {
        Self { data, pos: 0, order }
    }

    /// Current read position.
    #[inline]
    pub fn pos(&self) -> usize {
        self.pos
    }

    /// Set read position absolutely.
    pub fn set_pos(&mut self, pos: usize) -> Result<()> {
        if pos > self.data.len() {
            return Err(DtaError::Truncated { offset: pos, need: 0, have: 0 });
        }
        self.pos = pos;
        Ok(())
    }

    /// Bytes left after the cursor.
    #[inline]
    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.pos)
    }

    /// Switch byte order.
    pub fn set_order(&mut self, order: ByteOrder) {
        self.order = order;
    }

    /// Byte order currently in effect.
    pub fn order(&self) -> ByteOrder {
        self.order
    }

    /// Skip `n` bytes forward.
    pub fn skip(&mut self, n: usize) -> Result<()> {
        self.ensure(n)?;
        self.pos += n;
        Ok(())
    }

    /// Read a sub-slice of `n` bytes, advancing the cursor.
    pub fn read_bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        self.ensure(n)?;
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    /// Whether the next bytes equal `tag` (cursor unchanged).
    pub fn peek_tag(&self, tag: &str) -> bool {
        self.data.get(self.pos..self.pos + tag.len()).is_some_and(|b| b == tag.as_bytes())
    }

    /// Consume an exact ASCII tag such as `<header>`.
    pub fn expect_tag(&mut self, tag: &str) -> Result<()> {
        let at = self.pos;
        let got = self.read_bytes(tag.len())?;
        if got != tag.as_bytes() {
            return Err(DtaError::Malformed(format!(
                "expected '{}' at offset {}, found '{}'",
                tag,
                at,
                String::from_utf8_lossy(got)
            )));
        }
        Ok(())
    }

    /// Read a fixed-width, NUL-padded text field.
    pub fn read_fixed_str(&mut self, n: usize) -> Result<String> {
        let b = self.read_bytes(n)?;
        Ok(decode_text(b))
    }

    /// Read a single byte.
    pub fn read_u8(&mut self) -> Result<u8> {
        self.ensure(1)?;
        let v = self.data[self.pos];
        self.pos += 1;
        Ok(v)
    }

    /// Read a signed byte.
    pub fn read_i8(&mut self) -> Result<i8> {
        Ok(self.read_u8()? as i8)
    }

    read_num!(read_u16, u16, 2);
    read_num!(read_i16, i16, 2);
    read_num!(read_u32, u32, 4);
    read_num!(read_i32, i32, 4);
    read_num!(read_u64, u64, 8);
    read_num!(read_f32, f32, 4);
    read_num!(read_f64, f64, 8);

    fn ensure(&self, n: usize) -> Result<()> {
        if n > self.remaining() {
            return Err(DtaError::Truncated { offset: self.pos, need: n, have: self.remaining() });
        }
        Ok(())
    }
}

/// Decode a NUL-terminated byte field. Older files are Latin-1, newer UTF-8;
/// invalid UTF-8 falls back to a Latin-1 interpretation byte by byte.
pub fn decode_text(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    let bytes = &bytes[..end];
    match std::str::from_utf8(bytes) {
        Ok(s) => s.to_string(),
        Err(_) => bytes.iter().map(|&b| b as char).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_respect_byte_order() {
        let data = [0x01, 0x02, 0x03, 0x04];
        let mut be = DtaBuffer::new(&data, ByteOrder::Big);
        assert_eq!(be.read_u32().unwrap(), 0x0102_0304);
        let mut le = DtaBuffer::new(&data, ByteOrder::Little);
        assert_eq!(le.read_u16().unwrap(), 0x0201);
        assert_eq!(le.read_u16().unwrap(), 0x0403);
    }

    #[test]
    fn truncated_read_is_error() {
        let data = [0u8; 3];
        let mut r = DtaBuffer::new(&data, ByteOrder::Little);
        assert!(matches!(r.read_f64(), Err(DtaError::Truncated { need: 8, have: 3, .. })));
    }

    #[test]
    fn tags_and_text() {
        let data = b"<K>ab\0\0";
        let mut r = DtaBuffer::new(data, ByteOrder::Little);
        assert!(r.peek_tag("<K>"));
        r.expect_tag("<K>").unwrap();
        assert_eq!(r.read_fixed_str(4).unwrap(), "ab");
        assert_eq!(decode_text(&[0x63, 0xe1, 0x00]), "cá");
    }
}
