use super::plan::{PLAN_LEN, READ_PLAN_LEN};
use super::wire::{Reader, Writer, clip};
use super::{DecodeError, LIST_DATA_LEN, MSG_LEN, Opcode, Plan, ReadPlan, Status, encode_datagram};

const STATUS_LEN: usize = 4 + MSG_LEN;
const LISTING_LEN: usize = 4 + LIST_DATA_LEN;

/// Reply is everything the coordinator sends back: a status record or a data-bearing record.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Reply {
    /// Travels as ACK when `status` is OK and as ERR otherwise.
    Status { status: Status, message: String },
    Listing(String),
    CopyPlan(Plan),
    ReadPlan(ReadPlan),
    FailPlan(Plan),
    DecomPlan(Plan),
}

impl Reply {
    pub fn ok(message: impl Into<String>) -> Self {
        Self::Status {
            status: Status::Ok,
            message: message.into(),
        }
    }

    pub fn error(status: Status, message: impl Into<String>) -> Self {
        Self::Status {
            status,
            message: message.into(),
        }
    }

    /// `status` is OK for every data-bearing reply.
    #[must_use]
    pub const fn status(&self) -> Status {
        match self {
            Self::Status { status, .. } => *status,
            _ => Status::Ok,
        }
    }

    #[must_use]
    pub const fn opcode(&self) -> Opcode {
        match self {
            Self::Status { status, .. } => {
                if status.is_ok() {
                    Opcode::Ack
                } else {
                    Opcode::Err
                }
            }
            Self::Listing(_) => Opcode::Ls,
            Self::CopyPlan(_) => Opcode::CopyPlan,
            Self::ReadPlan(_) => Opcode::ReadPlan,
            Self::FailPlan(_) => Opcode::FailPlan,
            Self::DecomPlan(_) => Opcode::DecomPlan,
        }
    }

    #[must_use]
    pub fn encode_payload(&self) -> Vec<u8> {
        match self {
            Self::Status { status, message } => Writer::with_capacity(STATUS_LEN)
                .u8(*status as u8)
                .zeros(3)
                .text(message, MSG_LEN)
                .finish(),
            Self::Listing(text) => {
                let data = clip(text, LIST_DATA_LEN);
                Writer::with_capacity(LISTING_LEN)
                    .u32(data.len() as u32)
                    .bytes(data.as_bytes(), LIST_DATA_LEN)
                    .finish()
            }
            Self::CopyPlan(plan) | Self::FailPlan(plan) | Self::DecomPlan(plan) => {
                let mut w = Writer::with_capacity(PLAN_LEN);
                plan.write(&mut w);
                w.finish()
            }
            Self::ReadPlan(read) => {
                let mut w = Writer::with_capacity(READ_PLAN_LEN);
                read.write(&mut w);
                w.finish()
            }
        }
    }

    #[must_use]
    pub fn to_datagram(&self, req_id: u32) -> Vec<u8> {
        encode_datagram(self.opcode(), req_id, &self.encode_payload())
    }

    /// `decode` parses a reply record; used by clients.
    ///
    /// # Errors
    /// Returns an error for request opcodes, unknown status codes and short payloads.
    pub fn decode(opcode: Opcode, payload: &[u8]) -> Result<Self, DecodeError> {
        let op = opcode.name();
        Ok(match opcode {
            Opcode::Ack | Opcode::Err => {
                let mut r = Reader::fixed(op, payload, STATUS_LEN)?;
                let status = Status::try_from(r.u8()?)?;
                r.skip(3)?;
                Self::Status {
                    status,
                    message: r.text(MSG_LEN)?,
                }
            }
            Opcode::Ls => {
                let mut r = Reader::fixed(op, payload, LISTING_LEN)?;
                let nbytes = r.u32()? as usize;
                let data = r.bytes(LIST_DATA_LEN)?;
                let data = &data[..nbytes.min(LIST_DATA_LEN)];
                Self::Listing(String::from_utf8_lossy(data).into_owned())
            }
            Opcode::CopyPlan => Self::CopyPlan(read_plan(op, payload)?),
            Opcode::FailPlan => Self::FailPlan(read_plan(op, payload)?),
            Opcode::DecomPlan => Self::DecomPlan(read_plan(op, payload)?),
            Opcode::ReadPlan => {
                let mut r = Reader::fixed(op, payload, READ_PLAN_LEN)?;
                Self::ReadPlan(ReadPlan::read(&mut r)?)
            }
            other => return Err(DecodeError::NotAReply(other)),
        })
    }
}

fn read_plan(op: &'static str, payload: &[u8]) -> Result<Plan, DecodeError> {
    let mut r = Reader::fixed(op, payload, PLAN_LEN)?;
    Plan::read(&mut r)
}
