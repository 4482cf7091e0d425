use crate::types::{EntityKind, SchemeId};
use std::convert::Infallible;

#[derive(thiserror::Error, Debug)]
pub enum ApprovalError {
    #[error("approver kind `{0}` is not known to the object model")]
    InvalidApproverType(EntityKind),
    #[error("approval scheme {0} does not exist")]
    SchemeNotFound(SchemeId),
    #[error("no approval process registered under `{0}`")]
    UnknownProcess(String),
    #[error("approval process `{0}` is registered twice")]
    DuplicateProcess(String),
    #[error("reply token rejected: {0}")]
    InvalidToken(String),
    #[error("step ledger version {0} is not supported")]
    UnsupportedLedgerVersion(u16),
    #[error("failed to encode record: {0}")]
    Encode(#[from] minicbor::encode::Error<Infallible>),
    #[error("failed to decode record: {0}")]
    Decode(#[from] minicbor::decode::Error),
    #[error("scheme store failure: {0}")]
    Store(#[from] sled::Error),
    #[error(transparent)]
    Collaborator(#[from] anyhow::Error),
}

pub type Result<T, E = ApprovalError> = std::result::Result<T, E>;
