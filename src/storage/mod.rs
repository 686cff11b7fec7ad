pub mod db;
pub mod models;

pub use db::{Database, LedgerStats, ReserveOutcome};
pub use models::{AccountBalance, Hold, HoldState};
