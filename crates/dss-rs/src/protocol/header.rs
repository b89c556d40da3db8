use super::{DecodeError, HEADER_LEN, Opcode, PROTO_VERSION};

/// Header is the common prefix of every datagram.
///
/// The opcode is kept raw so that a request with an unknown opcode can still be answered
/// under its request id.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Header {
    pub version: u8,
    pub opcode: u8,
    pub reserved: u16,
    pub req_id: u32,
}

impl Header {
    #[must_use]
    pub const fn new(opcode: Opcode, req_id: u32) -> Self {
        Self {
            version: PROTO_VERSION,
            opcode: opcode as u8,
            reserved: 0,
            req_id,
        }
    }

    #[must_use]
    pub fn to_bytes(&self) -> [u8; HEADER_LEN] {
        let mut buf = [0u8; HEADER_LEN];
        buf[0] = self.version;
        buf[1] = self.opcode;
        buf[2..4].copy_from_slice(&self.reserved.to_be_bytes());
        buf[4..8].copy_from_slice(&self.req_id.to_be_bytes());
        buf
    }

    /// # Errors
    /// Returns [`DecodeError::ShortHeader`] if `buf` is shorter than [`HEADER_LEN`].
    pub fn from_bytes(buf: &[u8]) -> Result<Self, DecodeError> {
        if buf.len() < HEADER_LEN {
            return Err(DecodeError::ShortHeader(buf.len()));
        }
        Ok(Self {
            version: buf[0],
            opcode: buf[1],
            reserved: u16::from_be_bytes([buf[2], buf[3]]),
            req_id: u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]),
        })
    }

    /// `opcode` validates the version and resolves the raw opcode.
    ///
    /// # Errors
    /// Returns an error for a foreign protocol version or an unassigned opcode.
    pub fn opcode(&self) -> Result<Opcode, DecodeError> {
        if self.version != PROTO_VERSION {
            return Err(DecodeError::Version(self.version));
        }
        Opcode::try_from(self.opcode)
    }
}
