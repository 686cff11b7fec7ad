pub mod config;
pub mod credit;
pub mod error;
pub mod storage;
pub mod sweeper;
pub mod utils;

pub use config::Config;
pub use credit::CreditService;
pub use error::{LedgerError, Result};
pub use sweeper::Sweeper;
