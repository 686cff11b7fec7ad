use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::{
    error::{LedgerError, Result},
    storage::{
        models::{AccountBalance, Hold, HoldState},
        Database, LedgerStats, ReserveOutcome,
    },
};

/// Sole writer of the balance and hold tables. Every mutation is a single
/// storage transaction, so the cross-table invariant (available + reserved ==
/// granted - spent, reserved == sum of pending hold amounts) is never
/// observably violated, even mid-operation.
#[derive(Clone)]
pub struct CreditService {
    db: Database,
}

impl CreditService {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Add credit to an account, creating it on first grant.
    pub fn grant_credits(&self, account_id: &str, amount: u64) -> Result<AccountBalance> {
        if amount == 0 {
            return Err(LedgerError::InvalidArgument(
                "grant amount must be positive".to_string(),
            ));
        }

        let balance = self.db.grant_credits(account_id, amount, Utc::now())?;
        info!(
            "Granted {} units to account {} (available: {})",
            amount, account_id, balance.available
        );
        Ok(balance)
    }

    pub fn balance(&self, account_id: &str) -> Result<AccountBalance> {
        self.db
            .get_balance(account_id)?
            .ok_or_else(|| LedgerError::AccountNotFound(account_id.to_string()))
    }

    /// Reserve `amount` against an in-flight operation. On success the funds
    /// move from available to reserved and a pending hold is recorded; on any
    /// failure nothing is mutated.
    pub fn place_hold(
        &self,
        account_id: &str,
        amount: u64,
        expires_at: DateTime<Utc>,
        reason: Option<&str>,
    ) -> Result<i64> {
        let now = Utc::now();
        if amount == 0 {
            return Err(LedgerError::InvalidArgument(
                "hold amount must be positive".to_string(),
            ));
        }
        if expires_at <= now {
            return Err(LedgerError::InvalidArgument(format!(
                "hold expiry {} is not in the future",
                expires_at.to_rfc3339()
            )));
        }

        match self.db.create_hold(account_id, amount, now, expires_at, reason)? {
            ReserveOutcome::Created(hold_id) => {
                info!(
                    "Placed hold {} for {} units on account {} (expires {})",
                    hold_id,
                    amount,
                    account_id,
                    expires_at.to_rfc3339()
                );
                Ok(hold_id)
            }
            ReserveOutcome::Insufficient { available } => Err(LedgerError::InsufficientBalance {
                account: account_id.to_string(),
                available,
                requested: amount,
            }),
            ReserveOutcome::NoAccount => Err(LedgerError::AccountNotFound(account_id.to_string())),
        }
    }

    /// Finalize a hold as a permanent spend. Retrying an already-committed
    /// hold is a no-op success; committing a released or expired hold fails,
    /// since its funds were already returned.
    pub fn commit_hold(&self, hold_id: i64) -> Result<()> {
        if self.db.settle_hold(hold_id, HoldState::Committed, Utc::now())? {
            info!("Committed hold {}", hold_id);
            return Ok(());
        }

        match self.db.get_hold(hold_id)? {
            None => Err(LedgerError::HoldNotFound(hold_id)),
            Some(hold) => match hold.state {
                HoldState::Committed => {
                    debug!("Hold {} already committed, treating as no-op", hold_id);
                    Ok(())
                }
                HoldState::Released | HoldState::Expired => Err(LedgerError::InvalidHoldState {
                    id: hold_id,
                    state: hold.state,
                }),
                HoldState::Pending => Err(LedgerError::StoreUnavailable(format!(
                    "hold {} transition could not be applied",
                    hold_id
                ))),
            },
        }
    }

    /// Return a hold's reserved funds to the available balance. Retrying a
    /// released or swept hold is a no-op success; a committed hold cannot be
    /// released since its funds were already spent.
    pub fn release_hold(&self, hold_id: i64) -> Result<()> {
        if self.db.settle_hold(hold_id, HoldState::Released, Utc::now())? {
            info!("Released hold {}", hold_id);
            return Ok(());
        }

        match self.db.get_hold(hold_id)? {
            None => Err(LedgerError::HoldNotFound(hold_id)),
            Some(hold) => match hold.state {
                HoldState::Released | HoldState::Expired => {
                    debug!("Hold {} already released, treating as no-op", hold_id);
                    Ok(())
                }
                HoldState::Committed => Err(LedgerError::InvalidHoldState {
                    id: hold_id,
                    state: hold.state,
                }),
                HoldState::Pending => Err(LedgerError::StoreUnavailable(format!(
                    "hold {} transition could not be applied",
                    hold_id
                ))),
            },
        }
    }

    /// Reclaim every pending hold whose expiry has passed, tagging the
    /// terminal state as expired so audit can tell a sweep from a caller
    /// release. Returns the number actually reclaimed by this call: a hold
    /// that a concurrent commit or release wins is skipped, not counted.
    /// Per-hold store faults are logged and skipped so one bad row does not
    /// fail the whole pass.
    pub fn release_expired_holds(&self, now: DateTime<Utc>) -> Result<usize> {
        let expired = self.db.expired_pending_holds(now)?;
        if expired.is_empty() {
            return Ok(0);
        }

        let mut released = 0usize;
        for hold_id in expired {
            match self.db.settle_hold(hold_id, HoldState::Expired, now) {
                Ok(true) => {
                    info!("Expired hold {} reclaimed", hold_id);
                    released += 1;
                }
                Ok(false) => {
                    debug!("Hold {} resolved concurrently, skipping", hold_id);
                }
                Err(e) => {
                    warn!("Failed to reclaim expired hold {}: {}", hold_id, e);
                }
            }
        }

        Ok(released)
    }

    pub fn get_hold(&self, hold_id: i64) -> Result<Hold> {
        self.db
            .get_hold(hold_id)?
            .ok_or(LedgerError::HoldNotFound(hold_id))
    }

    pub fn list_holds(
        &self,
        account_id: Option<&str>,
        state: Option<HoldState>,
        limit: Option<usize>,
    ) -> Result<Vec<Hold>> {
        self.db.list_holds(account_id, state, limit)
    }

    pub fn stats(&self) -> Result<LedgerStats> {
        self.db.get_stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn service() -> CreditService {
        CreditService::new(Database::new(":memory:").unwrap())
    }

    fn in_ten_minutes() -> DateTime<Utc> {
        Utc::now() + Duration::minutes(10)
    }

    /// available + reserved must equal granted - spent after every operation.
    fn assert_accounting(svc: &CreditService, account: &str, granted: u64) {
        let b = svc.balance(account).unwrap();
        assert_eq!(b.available + b.reserved, granted - b.spent);

        let pending_sum: u64 = svc
            .list_holds(Some(account), Some(HoldState::Pending), None)
            .unwrap()
            .iter()
            .map(|h| h.amount)
            .sum();
        assert_eq!(b.reserved, pending_sum);
    }

    #[test]
    fn test_place_and_commit_scenario() {
        let svc = service();
        svc.grant_credits("acct", 500).unwrap();

        let hold = svc.place_hold("acct", 200, in_ten_minutes(), Some("job-1")).unwrap();
        let b = svc.balance("acct").unwrap();
        assert_eq!(b.available, 300);
        assert_eq!(b.reserved, 200);
        assert_accounting(&svc, "acct", 500);

        svc.commit_hold(hold).unwrap();
        let b = svc.balance("acct").unwrap();
        assert_eq!(b.available, 300);
        assert_eq!(b.reserved, 0);
        assert_eq!(b.spent, 200);
        assert_accounting(&svc, "acct", 500);
    }

    #[test]
    fn test_release_returns_funds() {
        let svc = service();
        svc.grant_credits("acct", 100).unwrap();

        let hold = svc.place_hold("acct", 60, in_ten_minutes(), None).unwrap();
        svc.release_hold(hold).unwrap();

        let b = svc.balance("acct").unwrap();
        assert_eq!(b.available, 100);
        assert_eq!(b.reserved, 0);
        assert_eq!(b.spent, 0);
        assert_eq!(svc.get_hold(hold).unwrap().state, HoldState::Released);
        assert_accounting(&svc, "acct", 100);
    }

    #[test]
    fn test_zero_amount_rejected() {
        let svc = service();
        svc.grant_credits("acct", 100).unwrap();

        let err = svc.place_hold("acct", 0, in_ten_minutes(), None).unwrap_err();
        assert!(matches!(err, LedgerError::InvalidArgument(_)));

        let b = svc.balance("acct").unwrap();
        assert_eq!(b.available, 100);
        assert_eq!(b.reserved, 0);
    }

    #[test]
    fn test_past_expiry_rejected() {
        let svc = service();
        svc.grant_credits("acct", 100).unwrap();

        let err = svc
            .place_hold("acct", 10, Utc::now() - Duration::minutes(1), None)
            .unwrap_err();
        assert!(matches!(err, LedgerError::InvalidArgument(_)));
        assert_eq!(svc.balance("acct").unwrap().available, 100);
    }

    #[test]
    fn test_insufficient_balance_leaves_state_untouched() {
        let svc = service();
        svc.grant_credits("acct", 50).unwrap();

        let err = svc.place_hold("acct", 80, in_ten_minutes(), None).unwrap_err();
        match err {
            LedgerError::InsufficientBalance {
                available,
                requested,
                ..
            } => {
                assert_eq!(available, 50);
                assert_eq!(requested, 80);
            }
            other => panic!("unexpected error: {}", other),
        }
        assert_accounting(&svc, "acct", 50);
    }

    #[test]
    fn test_unknown_account_rejected() {
        let svc = service();
        let err = svc.place_hold("nobody", 10, in_ten_minutes(), None).unwrap_err();
        assert!(matches!(err, LedgerError::AccountNotFound(_)));
    }

    #[test]
    fn test_unknown_hold_not_found() {
        let svc = service();
        assert!(matches!(svc.commit_hold(42).unwrap_err(), LedgerError::HoldNotFound(42)));
        assert!(matches!(svc.release_hold(42).unwrap_err(), LedgerError::HoldNotFound(42)));
    }

    #[test]
    fn test_commit_is_idempotent() {
        let svc = service();
        svc.grant_credits("acct", 100).unwrap();
        let hold = svc.place_hold("acct", 30, in_ten_minutes(), None).unwrap();

        svc.commit_hold(hold).unwrap();
        let first = svc.balance("acct").unwrap();

        // Retry after an ambiguous network outcome must be a no-op success
        svc.commit_hold(hold).unwrap();
        let second = svc.balance("acct").unwrap();

        assert_eq!(first.available, second.available);
        assert_eq!(first.reserved, second.reserved);
        assert_eq!(first.spent, second.spent);
        assert_eq!(second.spent, 30);
    }

    #[test]
    fn test_release_is_idempotent() {
        let svc = service();
        svc.grant_credits("acct", 100).unwrap();
        let hold = svc.place_hold("acct", 30, in_ten_minutes(), None).unwrap();

        svc.release_hold(hold).unwrap();
        svc.release_hold(hold).unwrap();

        let b = svc.balance("acct").unwrap();
        assert_eq!(b.available, 100);
        assert_eq!(b.reserved, 0);
    }

    #[test]
    fn test_commit_after_release_fails() {
        let svc = service();
        svc.grant_credits("acct", 100).unwrap();
        let hold = svc.place_hold("acct", 30, in_ten_minutes(), None).unwrap();
        svc.release_hold(hold).unwrap();

        let err = svc.commit_hold(hold).unwrap_err();
        assert!(matches!(
            err,
            LedgerError::InvalidHoldState {
                state: HoldState::Released,
                ..
            }
        ));
    }

    #[test]
    fn test_release_after_commit_fails() {
        let svc = service();
        svc.grant_credits("acct", 100).unwrap();
        let hold = svc.place_hold("acct", 30, in_ten_minutes(), None).unwrap();
        svc.commit_hold(hold).unwrap();

        let err = svc.release_hold(hold).unwrap_err();
        assert!(matches!(
            err,
            LedgerError::InvalidHoldState {
                state: HoldState::Committed,
                ..
            }
        ));
    }

    #[test]
    fn test_sweep_reclaims_expired_hold() {
        let svc = service();
        svc.grant_credits("acct", 200).unwrap();

        let hold = svc
            .place_hold("acct", 100, Utc::now() + Duration::minutes(1), None)
            .unwrap();

        // Two minutes later the hold is past expiry
        let later = Utc::now() + Duration::minutes(2);
        let count = svc.release_expired_holds(later).unwrap();
        assert_eq!(count, 1);

        let b = svc.balance("acct").unwrap();
        assert_eq!(b.available, 200);
        assert_eq!(b.reserved, 0);
        assert_eq!(svc.get_hold(hold).unwrap().state, HoldState::Expired);
        assert_accounting(&svc, "acct", 200);
    }

    #[test]
    fn test_sweep_twice_releases_once() {
        let svc = service();
        svc.grant_credits("acct", 200).unwrap();
        svc.place_hold("acct", 50, Utc::now() + Duration::minutes(1), None)
            .unwrap();

        let later = Utc::now() + Duration::minutes(2);
        assert_eq!(svc.release_expired_holds(later).unwrap(), 1);
        assert_eq!(svc.release_expired_holds(later).unwrap(), 0);

        let b = svc.balance("acct").unwrap();
        assert_eq!(b.available, 200);
    }

    #[test]
    fn test_sweep_skips_unexpired_holds() {
        let svc = service();
        svc.grant_credits("acct", 200).unwrap();
        let hold = svc.place_hold("acct", 50, in_ten_minutes(), None).unwrap();

        assert_eq!(svc.release_expired_holds(Utc::now()).unwrap(), 0);
        assert_eq!(svc.get_hold(hold).unwrap().state, HoldState::Pending);
    }

    #[test]
    fn test_late_commit_after_sweep_is_invalid() {
        let svc = service();
        svc.grant_credits("acct", 200).unwrap();
        let hold = svc
            .place_hold("acct", 50, Utc::now() + Duration::minutes(1), None)
            .unwrap();

        let later = Utc::now() + Duration::minutes(2);
        assert_eq!(svc.release_expired_holds(later).unwrap(), 1);

        // The job finished late: its reservation is gone for good
        let err = svc.commit_hold(hold).unwrap_err();
        assert!(matches!(
            err,
            LedgerError::InvalidHoldState {
                state: HoldState::Expired,
                ..
            }
        ));
        assert_eq!(svc.balance("acct").unwrap().available, 200);
    }

    #[test]
    fn test_concurrent_place_hold_race() {
        let svc = service();
        svc.grant_credits("acct", 100).unwrap();

        let expires = in_ten_minutes();
        let handles: Vec<_> = (0..2)
            .map(|_| {
                let svc = svc.clone();
                std::thread::spawn(move || svc.place_hold("acct", 60, expires, None))
            })
            .collect();

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let successes = results.iter().filter(|r| r.is_ok()).count();
        let insufficient = results
            .iter()
            .filter(|r| matches!(r, Err(LedgerError::InsufficientBalance { .. })))
            .count();

        assert_eq!(successes, 1);
        assert_eq!(insufficient, 1);

        let b = svc.balance("acct").unwrap();
        assert_eq!(b.available + b.reserved, 100);
        assert_eq!(b.reserved, 60);
    }

    #[test]
    fn test_commit_and_sweep_mutual_exclusion() {
        let svc = service();
        svc.grant_credits("acct", 100).unwrap();
        let hold = svc
            .place_hold("acct", 40, Utc::now() + Duration::milliseconds(1), None)
            .unwrap();

        let later = Utc::now() + Duration::minutes(1);
        let committer = {
            let svc = svc.clone();
            std::thread::spawn(move || svc.commit_hold(hold))
        };
        let sweeper = {
            let svc = svc.clone();
            std::thread::spawn(move || svc.release_expired_holds(later))
        };

        let commit_result = committer.join().unwrap();
        let swept = sweeper.join().unwrap().unwrap();

        let state = svc.get_hold(hold).unwrap().state;
        let b = svc.balance("acct").unwrap();
        match state {
            HoldState::Committed => {
                assert!(commit_result.is_ok());
                assert_eq!(swept, 0);
                assert_eq!(b.available, 60);
                assert_eq!(b.spent, 40);
            }
            HoldState::Expired => {
                assert!(matches!(
                    commit_result,
                    Err(LedgerError::InvalidHoldState { .. })
                ));
                assert_eq!(swept, 1);
                assert_eq!(b.available, 100);
                assert_eq!(b.spent, 0);
            }
            other => panic!("hold ended in non-terminal state {}", other),
        }
        assert_eq!(b.reserved, 0);
    }

    #[test]
    fn test_grant_accumulates() {
        let svc = service();
        svc.grant_credits("acct", 100).unwrap();
        let b = svc.grant_credits("acct", 50).unwrap();
        assert_eq!(b.available, 150);

        let err = svc.grant_credits("acct", 0).unwrap_err();
        assert!(matches!(err, LedgerError::InvalidArgument(_)));
    }
}
