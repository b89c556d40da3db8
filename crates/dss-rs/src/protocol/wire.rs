//! Big-endian field readers and writers shared by the record codecs.

use super::DecodeError;

pub(crate) struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    pub(crate) fn with_capacity(len: usize) -> Self {
        Self {
            buf: Vec::with_capacity(len),
        }
    }

    pub(crate) fn u8(&mut self, v: u8) -> &mut Self {
        self.buf.push(v);
        self
    }

    pub(crate) fn u16(&mut self, v: u16) -> &mut Self {
        self.buf.extend_from_slice(&v.to_be_bytes());
        self
    }

    pub(crate) fn u32(&mut self, v: u32) -> &mut Self {
        self.buf.extend_from_slice(&v.to_be_bytes());
        self
    }

    pub(crate) fn u64(&mut self, v: u64) -> &mut Self {
        self.buf.extend_from_slice(&v.to_be_bytes());
        self
    }

    pub(crate) fn zeros(&mut self, len: usize) -> &mut Self {
        self.buf.resize(self.buf.len() + len, 0);
        self
    }

    /// Writes `value` into a `width`-byte field, keeping at least one trailing NUL.
    pub(crate) fn text(&mut self, value: &str, width: usize) -> &mut Self {
        let clipped = clip(value, width.saturating_sub(1));
        self.bytes(clipped.as_bytes(), width)
    }

    /// Writes `data` into a `width`-byte field, NUL-padding or truncating as needed.
    pub(crate) fn bytes(&mut self, data: &[u8], width: usize) -> &mut Self {
        let n = data.len().min(width);
        self.buf.extend_from_slice(&data[..n]);
        self.zeros(width - n)
    }

    pub(crate) fn finish(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.buf)
    }
}

pub(crate) struct Reader<'a> {
    op: &'static str,
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    /// Starts reading a fixed record of `need` bytes; shorter payloads are rejected up front.
    pub(crate) fn fixed(op: &'static str, buf: &'a [u8], need: usize) -> Result<Self, DecodeError> {
        if buf.len() < need {
            return Err(DecodeError::ShortPayload {
                op,
                need,
                got: buf.len(),
            });
        }
        Ok(Self { op, buf, pos: 0 })
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], DecodeError> {
        let end = self.pos.saturating_add(len);
        let Some(slice) = self.buf.get(self.pos..end) else {
            return Err(DecodeError::ShortPayload {
                op: self.op,
                need: end,
                got: self.buf.len(),
            });
        };
        self.pos = end;
        Ok(slice)
    }

    pub(crate) fn u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.take(1)?[0])
    }

    pub(crate) fn u16(&mut self) -> Result<u16, DecodeError> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    pub(crate) fn u32(&mut self) -> Result<u32, DecodeError> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub(crate) fn u64(&mut self) -> Result<u64, DecodeError> {
        let hi = u64::from(self.u32()?);
        let lo = u64::from(self.u32()?);
        Ok((hi << 32) | lo)
    }

    pub(crate) fn skip(&mut self, len: usize) -> Result<(), DecodeError> {
        self.take(len).map(|_| ())
    }

    pub(crate) fn bytes(&mut self, len: usize) -> Result<&'a [u8], DecodeError> {
        self.take(len)
    }

    /// Reads a NUL-padded text field; the value ends at the first NUL.
    pub(crate) fn text(&mut self, width: usize) -> Result<String, DecodeError> {
        let raw = self.take(width)?;
        let end = raw.iter().position(|b| *b == 0).unwrap_or(raw.len());
        Ok(String::from_utf8_lossy(&raw[..end]).into_owned())
    }
}

/// `clip` shortens `s` to at most `max` bytes without splitting a character.
pub(crate) fn clip(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}
