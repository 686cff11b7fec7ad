use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{error, info, warn};

use crate::{
    credit::CreditService,
    error::{LedgerError, Result},
};

/// Success payload reported back to the trigger.
#[derive(Debug, Clone, Serialize)]
pub struct SweepReport {
    pub success: bool,
    pub released_count: usize,
    pub timestamp: DateTime<Utc>,
}

/// Failure payload; a failed tick is recoverable by the next one.
#[derive(Debug, Clone, Serialize)]
pub struct SweepFailure {
    pub success: bool,
    pub detail: String,
}

impl SweepFailure {
    pub fn new(detail: impl Into<String>) -> Self {
        Self {
            success: false,
            detail: detail.into(),
        }
    }
}

/// Stateless handler for the external sweep trigger. Each invocation runs one
/// expiry pass; duplicate or missed triggers are harmless since expired holds
/// stay pending until swept.
pub struct Sweeper {
    service: CreditService,
    shared_secret: String,
}

impl Sweeper {
    pub fn new(service: CreditService, shared_secret: String) -> Self {
        Self {
            service,
            shared_secret,
        }
    }

    /// Authenticate the trigger and run one sweep. The provided secret must
    /// match the configured one exactly; a mismatch or absent secret performs
    /// no sweep.
    pub fn trigger(&self, provided: Option<&str>, now: DateTime<Utc>) -> Result<SweepReport> {
        match provided {
            Some(secret) if secret == self.shared_secret => {}
            _ => {
                error!("Unauthorized sweep trigger rejected");
                return Err(LedgerError::Unauthorized);
            }
        }

        let released_count = self.service.release_expired_holds(now)?;
        info!("Released {} expired credit holds", released_count);

        Ok(SweepReport {
            success: true,
            released_count,
            timestamp: now,
        })
    }

    /// Self-triggered periodic loop for operation without an external
    /// scheduler. Errors are logged and the loop keeps going; the next tick
    /// picks up whatever the failed one left behind.
    pub async fn run_scheduled(&self, interval_secs: u64) {
        info!("Starting expiry sweep loop (interval: {}s)", interval_secs);

        loop {
            match self.trigger(Some(&self.shared_secret), Utc::now()) {
                Ok(report) => {
                    if report.released_count > 0 {
                        info!("Sweep tick reclaimed {} holds", report.released_count);
                    }
                }
                Err(e) => {
                    warn!("Sweep tick failed, will retry next interval: {}", e);
                }
            }

            tokio::time::sleep(tokio::time::Duration::from_secs(interval_secs)).await;
        }
    }
}
