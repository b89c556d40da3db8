//! Wire codec for the coordinator protocol.
//!
//! Every datagram is an 8-byte [`Header`] followed by a fixed-layout payload selected by the
//! opcode. Integers travel in network byte order; text fields are fixed width and NUL-padded.

mod header;
mod plan;
mod reply;
mod request;
mod wire;


use std::fmt;

use thiserror::Error;

pub use header::Header;
pub use plan::{Plan, PlanMember, ReadPlan};
pub use reply::Reply;
pub use request::{CopyRequest, ReadRequest, Request};

/// PROTO_VERSION is the only header version this codec speaks.
pub const PROTO_VERSION: u8 = 1;
/// HEADER_LEN is the byte size of the common header.
pub const HEADER_LEN: usize = 8;
/// NAME_LEN is the field width for user and disk names (including the NUL).
pub const NAME_LEN: usize = 32;
/// DSS_NAME_LEN is the field width for array names (including the NUL).
pub const DSS_NAME_LEN: usize = 16;
/// FILE_NAME_LEN is the field width for file names (including the NUL).
pub const FILE_NAME_LEN: usize = 64;
/// MSG_LEN is the field width of the status text.
pub const MSG_LEN: usize = 256;
/// LIST_DATA_LEN is the capacity of a listing reply.
pub const LIST_DATA_LEN: usize = 4096;
/// MAX_PLAN_DISKS is the number of member slots carried by a plan record.
pub const MAX_PLAN_DISKS: usize = 64;

/// Operation codes, shared by requests and replies.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
#[repr(u8)]
pub enum Opcode {
    RegisterUser = 1,
    RegisterDisk = 2,
    ConfigureDss = 3,
    DeregisterUser = 4,
    DeregisterDisk = 5,
    Ack = 6,
    Err = 7,
    Ls = 8,
    CopyBegin = 9,
    CopyPlan = 10,
    CopyComplete = 11,
    ReadBegin = 12,
    ReadPlan = 13,
    ReadComplete = 14,
    FailBegin = 15,
    FailPlan = 16,
    RecoveryComplete = 17,
    DecomBegin = 18,
    DecomPlan = 19,
    DecomComplete = 20,
}

impl Opcode {
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::RegisterUser => "REGISTER_USER",
            Self::RegisterDisk => "REGISTER_DISK",
            Self::ConfigureDss => "CONFIGURE_DSS",
            Self::DeregisterUser => "DEREGISTER_USER",
            Self::DeregisterDisk => "DEREGISTER_DISK",
            Self::Ack => "ACK",
            Self::Err => "ERR",
            Self::Ls => "LS",
            Self::CopyBegin => "COPY_BEGIN",
            Self::CopyPlan => "COPY_PLAN",
            Self::CopyComplete => "COPY_COMPLETE",
            Self::ReadBegin => "READ_BEGIN",
            Self::ReadPlan => "READ_PLAN",
            Self::ReadComplete => "READ_COMPLETE",
            Self::FailBegin => "FAIL_BEGIN",
            Self::FailPlan => "FAIL_PLAN",
            Self::RecoveryComplete => "RECOVERY_COMPLETE",
            Self::DecomBegin => "DECOM_BEGIN",
            Self::DecomPlan => "DECOM_PLAN",
            Self::DecomComplete => "DECOM_COMPLETE",
        }
    }
}

impl TryFrom<u8> for Opcode {
    type Error = DecodeError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            1 => Self::RegisterUser,
            2 => Self::RegisterDisk,
            3 => Self::ConfigureDss,
            4 => Self::DeregisterUser,
            5 => Self::DeregisterDisk,
            6 => Self::Ack,
            7 => Self::Err,
            8 => Self::Ls,
            9 => Self::CopyBegin,
            10 => Self::CopyPlan,
            11 => Self::CopyComplete,
            12 => Self::ReadBegin,
            13 => Self::ReadPlan,
            14 => Self::ReadComplete,
            15 => Self::FailBegin,
            16 => Self::FailPlan,
            17 => Self::RecoveryComplete,
            18 => Self::DecomBegin,
            19 => Self::DecomPlan,
            20 => Self::DecomComplete,
            other => return Err(DecodeError::UnknownOpcode(other)),
        })
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Status codes carried by ACK/ERR replies.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
#[repr(u8)]
pub enum Status {
    Ok = 0,
    AlreadyRegistered = 1,
    NotRegistered = 2,
    InsufficientDisks = 3,
    BadParams = 4,
    Internal = 5,
    NotOwner = 6,
    NotFound = 7,
    Busy = 8,
}

impl Status {
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::AlreadyRegistered => "ALREADY_REGISTERED",
            Self::NotRegistered => "NOT_REGISTERED",
            Self::InsufficientDisks => "INSUFFICIENT_DISKS",
            Self::BadParams => "BAD_PARAMS",
            Self::Internal => "INTERNAL",
            Self::NotOwner => "NOT_OWNER",
            Self::NotFound => "NOT_FOUND",
            Self::Busy => "BUSY",
        }
    }

    #[must_use]
    pub const fn is_ok(self) -> bool {
        matches!(self, Self::Ok)
    }
}

impl TryFrom<u8> for Status {
    type Error = DecodeError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            0 => Self::Ok,
            1 => Self::AlreadyRegistered,
            2 => Self::NotRegistered,
            3 => Self::InsufficientDisks,
            4 => Self::BadParams,
            5 => Self::Internal,
            6 => Self::NotOwner,
            7 => Self::NotFound,
            8 => Self::Busy,
            other => return Err(DecodeError::UnknownStatus(other)),
        })
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum DecodeError {
    #[error("datagram of {0} bytes is shorter than the header")]
    ShortHeader(usize),
    #[error("unsupported protocol version {0}")]
    Version(u8),
    #[error("unknown opcode {0}")]
    UnknownOpcode(u8),
    #[error("unknown status code {0}")]
    UnknownStatus(u8),
    #[error("short {op}: {got} of {need} payload bytes")]
    ShortPayload {
        op: &'static str,
        need: usize,
        got: usize,
    },
    #[error("plan lists {0} members, more than the record holds")]
    PlanTooLarge(u32),
    #[error("{0} is a reply opcode")]
    NotARequest(Opcode),
    #[error("{0} is a request opcode")]
    NotAReply(Opcode),
}

/// `encode_datagram` prefixes an encoded payload with a header for `opcode`.
#[must_use]
pub fn encode_datagram(opcode: Opcode, req_id: u32, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_LEN + payload.len());
    out.extend_from_slice(&Header::new(opcode, req_id).to_bytes());
    out.extend_from_slice(payload);
    out
}

/// `split_datagram` separates the header from the payload bytes.
///
/// # Errors
/// Returns [`DecodeError::ShortHeader`] if the datagram cannot hold a header.
pub fn split_datagram(datagram: &[u8]) -> Result<(Header, &[u8]), DecodeError> {
    let header = Header::from_bytes(datagram)?;
    Ok((header, &datagram[HEADER_LEN..]))
}

/// `fits_field` reports whether `value` survives a `width`-byte NUL-terminated field intact.
#[must_use]
pub const fn fits_field(value: &str, width: usize) -> bool {
    value.len() < width
}
