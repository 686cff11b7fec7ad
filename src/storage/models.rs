use serde::{Deserialize, Serialize};
use chrono::{DateTime, Utc};

/// Per-account credit counters. `available + reserved` is the un-spent total;
/// `spent` only ever grows and exists for audit/reporting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountBalance {
    pub account_id: String,
    pub available: u64,
    pub reserved: u64,
    pub spent: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Hold {
    pub id: i64,
    pub account_id: String,
    pub amount: u64,
    pub state: HoldState,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum HoldState {
    Pending,
    Committed,
    Released,
    Expired,
}

impl HoldState {
    pub fn is_terminal(&self) -> bool {
        *self != HoldState::Pending
    }
}

impl std::fmt::Display for HoldState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HoldState::Pending => write!(f, "pending"),
            HoldState::Committed => write!(f, "committed"),
            HoldState::Released => write!(f, "released"),
            HoldState::Expired => write!(f, "expired"),
        }
    }
}

impl std::str::FromStr for HoldState {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(HoldState::Pending),
            "committed" => Ok(HoldState::Committed),
            "released" => Ok(HoldState::Released),
            "expired" => Ok(HoldState::Expired),
            other => Err(format!("unknown hold state: {}", other)),
        }
    }
}

impl Hold {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.state == HoldState::Pending && self.expires_at <= now
    }
}
