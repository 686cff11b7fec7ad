use thiserror::Error;

use crate::storage::models::HoldState;

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("insufficient balance for account {account}: {available} available, {requested} requested")]
    InsufficientBalance {
        account: String,
        available: u64,
        requested: u64,
    },

    #[error("account not found: {0}")]
    AccountNotFound(String),

    #[error("hold not found: {0}")]
    HoldNotFound(i64),

    #[error("invalid hold state: hold {id} is {state}")]
    InvalidHoldState { id: i64, state: HoldState },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("unauthorized sweep trigger")]
    Unauthorized,

    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, LedgerError>;
