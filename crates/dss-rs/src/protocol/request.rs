use super::wire::{Reader, Writer};
use super::{DSS_NAME_LEN, DecodeError, FILE_NAME_LEN, NAME_LEN, Opcode, encode_datagram};

const REGISTER_USER_LEN: usize = NAME_LEN + 2 + 2;
const REGISTER_DISK_LEN: usize = NAME_LEN + 4 + 2 + 2;
const CONFIGURE_LEN: usize = DSS_NAME_LEN + 4 + 4;
const DEREGISTER_LEN: usize = NAME_LEN;
const COPY_LEN: usize = DSS_NAME_LEN + FILE_NAME_LEN + 4 + NAME_LEN;
const READ_LEN: usize = DSS_NAME_LEN + FILE_NAME_LEN + NAME_LEN;
const FAIL_LEN: usize = DSS_NAME_LEN + NAME_LEN;
const DSS_ONLY_LEN: usize = DSS_NAME_LEN;

/// Payload shared by COPY_BEGIN and COPY_COMPLETE. An empty `dss` selects the first array.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CopyRequest {
    pub dss: String,
    pub file: String,
    pub size: u32,
    pub owner: String,
}

/// Payload shared by READ_BEGIN and READ_COMPLETE.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ReadRequest {
    pub dss: String,
    pub file: String,
    pub user: String,
}

/// Request is a decoded client request.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Request {
    RegisterUser {
        name: String,
        m_port: u16,
        c_port: u16,
    },
    RegisterDisk {
        name: String,
        capacity_blocks: u32,
        m_port: u16,
        c_port: u16,
    },
    ConfigureDss {
        dss: String,
        n: u32,
        striping_unit: u32,
    },
    DeregisterUser {
        name: String,
    },
    DeregisterDisk {
        name: String,
    },
    Ls,
    CopyBegin(CopyRequest),
    CopyComplete(CopyRequest),
    ReadBegin(ReadRequest),
    ReadComplete(ReadRequest),
    /// An empty `disk` starts a failure window without marking a specific member.
    FailBegin {
        dss: String,
        disk: String,
    },
    RecoveryComplete {
        dss: String,
    },
    DecomBegin {
        dss: String,
    },
    DecomComplete {
        dss: String,
    },
}

impl Request {
    #[must_use]
    pub const fn opcode(&self) -> Opcode {
        match self {
            Self::RegisterUser { .. } => Opcode::RegisterUser,
            Self::RegisterDisk { .. } => Opcode::RegisterDisk,
            Self::ConfigureDss { .. } => Opcode::ConfigureDss,
            Self::DeregisterUser { .. } => Opcode::DeregisterUser,
            Self::DeregisterDisk { .. } => Opcode::DeregisterDisk,
            Self::Ls => Opcode::Ls,
            Self::CopyBegin(_) => Opcode::CopyBegin,
            Self::CopyComplete(_) => Opcode::CopyComplete,
            Self::ReadBegin(_) => Opcode::ReadBegin,
            Self::ReadComplete(_) => Opcode::ReadComplete,
            Self::FailBegin { .. } => Opcode::FailBegin,
            Self::RecoveryComplete { .. } => Opcode::RecoveryComplete,
            Self::DecomBegin { .. } => Opcode::DecomBegin,
            Self::DecomComplete { .. } => Opcode::DecomComplete,
        }
    }

    #[must_use]
    pub fn encode_payload(&self) -> Vec<u8> {
        let mut w = Writer::with_capacity(COPY_LEN);
        match self {
            Self::RegisterUser {
                name,
                m_port,
                c_port,
            } => {
                w.text(name, NAME_LEN).u16(*m_port).u16(*c_port);
            }
            Self::RegisterDisk {
                name,
                capacity_blocks,
                m_port,
                c_port,
            } => {
                w.text(name, NAME_LEN)
                    .u32(*capacity_blocks)
                    .u16(*m_port)
                    .u16(*c_port);
            }
            Self::ConfigureDss {
                dss,
                n,
                striping_unit,
            } => {
                w.text(dss, DSS_NAME_LEN).u32(*n).u32(*striping_unit);
            }
            Self::DeregisterUser { name } | Self::DeregisterDisk { name } => {
                w.text(name, NAME_LEN);
            }
            Self::Ls => {}
            Self::CopyBegin(c) | Self::CopyComplete(c) => {
                w.text(&c.dss, DSS_NAME_LEN)
                    .text(&c.file, FILE_NAME_LEN)
                    .u32(c.size)
                    .text(&c.owner, NAME_LEN);
            }
            Self::ReadBegin(r) | Self::ReadComplete(r) => {
                w.text(&r.dss, DSS_NAME_LEN)
                    .text(&r.file, FILE_NAME_LEN)
                    .text(&r.user, NAME_LEN);
            }
            Self::FailBegin { dss, disk } => {
                w.text(dss, DSS_NAME_LEN).text(disk, NAME_LEN);
            }
            Self::RecoveryComplete { dss } | Self::DecomBegin { dss } | Self::DecomComplete { dss } => {
                w.text(dss, DSS_NAME_LEN);
            }
        }
        w.finish()
    }

    /// `to_datagram` encodes header and payload ready for the wire.
    #[must_use]
    pub fn to_datagram(&self, req_id: u32) -> Vec<u8> {
        encode_datagram(self.opcode(), req_id, &self.encode_payload())
    }

    /// `decode` parses the fixed record that belongs to `opcode`.
    ///
    /// # Errors
    /// Returns an error for reply opcodes and for payloads shorter than the record.
    pub fn decode(opcode: Opcode, payload: &[u8]) -> Result<Self, DecodeError> {
        let op = opcode.name();
        Ok(match opcode {
            Opcode::RegisterUser => {
                let mut r = Reader::fixed(op, payload, REGISTER_USER_LEN)?;
                Self::RegisterUser {
                    name: r.text(NAME_LEN)?,
                    m_port: r.u16()?,
                    c_port: r.u16()?,
                }
            }
            Opcode::RegisterDisk => {
                let mut r = Reader::fixed(op, payload, REGISTER_DISK_LEN)?;
                Self::RegisterDisk {
                    name: r.text(NAME_LEN)?,
                    capacity_blocks: r.u32()?,
                    m_port: r.u16()?,
                    c_port: r.u16()?,
                }
            }
            Opcode::ConfigureDss => {
                let mut r = Reader::fixed(op, payload, CONFIGURE_LEN)?;
                Self::ConfigureDss {
                    dss: r.text(DSS_NAME_LEN)?,
                    n: r.u32()?,
                    striping_unit: r.u32()?,
                }
            }
            Opcode::DeregisterUser => {
                let mut r = Reader::fixed(op, payload, DEREGISTER_LEN)?;
                Self::DeregisterUser {
                    name: r.text(NAME_LEN)?,
                }
            }
            Opcode::DeregisterDisk => {
                let mut r = Reader::fixed(op, payload, DEREGISTER_LEN)?;
                Self::DeregisterDisk {
                    name: r.text(NAME_LEN)?,
                }
            }
            Opcode::Ls => Self::Ls,
            Opcode::CopyBegin => Self::CopyBegin(read_copy(op, payload)?),
            Opcode::CopyComplete => Self::CopyComplete(read_copy(op, payload)?),
            Opcode::ReadBegin => Self::ReadBegin(read_read(op, payload)?),
            Opcode::ReadComplete => Self::ReadComplete(read_read(op, payload)?),
            Opcode::FailBegin => {
                let mut r = Reader::fixed(op, payload, FAIL_LEN)?;
                Self::FailBegin {
                    dss: r.text(DSS_NAME_LEN)?,
                    disk: r.text(NAME_LEN)?,
                }
            }
            Opcode::RecoveryComplete => Self::RecoveryComplete {
                dss: read_dss(op, payload)?,
            },
            Opcode::DecomBegin => Self::DecomBegin {
                dss: read_dss(op, payload)?,
            },
            Opcode::DecomComplete => Self::DecomComplete {
                dss: read_dss(op, payload)?,
            },
            Opcode::Ack
            | Opcode::Err
            | Opcode::CopyPlan
            | Opcode::ReadPlan
            | Opcode::FailPlan
            | Opcode::DecomPlan => return Err(DecodeError::NotARequest(opcode)),
        })
    }
}

fn read_copy(op: &'static str, payload: &[u8]) -> Result<CopyRequest, DecodeError> {
    let mut r = Reader::fixed(op, payload, COPY_LEN)?;
    Ok(CopyRequest {
        dss: r.text(DSS_NAME_LEN)?,
        file: r.text(FILE_NAME_LEN)?,
        size: r.u32()?,
        owner: r.text(NAME_LEN)?,
    })
}

fn read_read(op: &'static str, payload: &[u8]) -> Result<ReadRequest, DecodeError> {
    let mut r = Reader::fixed(op, payload, READ_LEN)?;
    Ok(ReadRequest {
        dss: r.text(DSS_NAME_LEN)?,
        file: r.text(FILE_NAME_LEN)?,
        user: r.text(NAME_LEN)?,
    })
}

fn read_dss(op: &'static str, payload: &[u8]) -> Result<String, DecodeError> {
    let mut r = Reader::fixed(op, payload, DSS_ONLY_LEN)?;
    r.text(DSS_NAME_LEN)
}
