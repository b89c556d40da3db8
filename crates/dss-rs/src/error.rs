//! Rejection reasons produced by the coordinator.

use thiserror::Error;

use crate::protocol::{DecodeError, Status};

/// Why a request was rejected. Every variant maps onto exactly one wire status code and its
/// `Display` text becomes the reply message.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum DssError {
    #[error("{kind} {name} already registered")]
    AlreadyRegistered { kind: &'static str, name: String },
    #[error("{kind} {name} not registered")]
    NotRegistered { kind: &'static str, name: String },
    #[error("not enough free disks: need {needed}, {free} free")]
    InsufficientDisks { needed: usize, free: usize },
    #[error("{0}")]
    BadParams(String),
    #[error("{0}")]
    Internal(String),
    #[error("{user} does not own {file}")]
    NotOwner { user: String, file: String },
    #[error("file {file} not found in DSS {dss}")]
    NotFound { dss: String, file: String },
    #[error("DSS {dss} is in critical section ({reason})")]
    Busy { dss: String, reason: &'static str },
}

pub type Result<T> = std::result::Result<T, DssError>;

impl DssError {
    pub fn bad_params(msg: impl Into<String>) -> Self {
        Self::BadParams(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    #[must_use]
    pub const fn status(&self) -> Status {
        match self {
            Self::AlreadyRegistered { .. } => Status::AlreadyRegistered,
            Self::NotRegistered { .. } => Status::NotRegistered,
            Self::InsufficientDisks { .. } => Status::InsufficientDisks,
            Self::BadParams(_) => Status::BadParams,
            Self::Internal(_) => Status::Internal,
            Self::NotOwner { .. } => Status::NotOwner,
            Self::NotFound { .. } => Status::NotFound,
            Self::Busy { .. } => Status::Busy,
        }
    }
}

impl From<DecodeError> for DssError {
    fn from(err: DecodeError) -> Self {
        Self::BadParams(err.to_string())
    }
}
