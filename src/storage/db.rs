use std::sync::{Arc, Mutex, MutexGuard};

use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::{
    error::{LedgerError, Result},
    storage::models::{AccountBalance, Hold, HoldState},
};

/// Outcome of the conditional reserve inside `create_hold`. The
/// check-and-update is evaluated by SQLite, never read-then-write from the
/// caller's process.
#[derive(Debug)]
pub enum ReserveOutcome {
    Created(i64),
    Insufficient { available: u64 },
    NoAccount,
}

#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    pub fn new(path: &str) -> Result<Self> {
        let conn = Connection::open(path)?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.init_schema()?;
        Ok(db)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS account_balances (
                account_id TEXT PRIMARY KEY,
                available INTEGER NOT NULL CHECK (available >= 0),
                reserved INTEGER NOT NULL CHECK (reserved >= 0),
                spent INTEGER NOT NULL CHECK (spent >= 0),
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS credit_holds (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                account_id TEXT NOT NULL,
                amount INTEGER NOT NULL CHECK (amount > 0),
                state TEXT NOT NULL,
                created_at TEXT NOT NULL,
                expires_at TEXT NOT NULL,
                resolved_at TEXT,
                reason TEXT,
                FOREIGN KEY (account_id) REFERENCES account_balances(account_id)
            )",
            [],
        )?;

        // The sweeper scans by state and expiry; keep that off a full-table scan
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_holds_state_expiry
             ON credit_holds(state, expires_at)",
            [],
        )?;

        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| LedgerError::StoreUnavailable(format!("connection lock poisoned: {}", e)))
    }

    /// Add credit to an account, creating the row on first grant.
    pub fn grant_credits(&self, account_id: &str, amount: u64, now: DateTime<Utc>) -> Result<AccountBalance> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        tx.execute(
            "INSERT INTO account_balances (account_id, available, reserved, spent, created_at, updated_at)
             VALUES (?1, ?2, 0, 0, ?3, ?3)
             ON CONFLICT(account_id) DO UPDATE SET
                 available = available + excluded.available,
                 updated_at = excluded.updated_at",
            params![account_id, amount, now.to_rfc3339()],
        )?;

        let balance = tx.query_row(
            "SELECT account_id, available, reserved, spent, created_at, updated_at
             FROM account_balances WHERE account_id = ?1",
            [account_id],
            balance_from_row,
        )?;

        tx.commit()?;
        Ok(balance)
    }

    pub fn get_balance(&self, account_id: &str) -> Result<Option<AccountBalance>> {
        let conn = self.lock()?;
        let balance = conn
            .query_row(
                "SELECT account_id, available, reserved, spent, created_at, updated_at
                 FROM account_balances WHERE account_id = ?1",
                [account_id],
                balance_from_row,
            )
            .optional()?;
        Ok(balance)
    }

    /// Atomically move `amount` from available to reserved and insert a
    /// pending hold. The balance check and the decrement are a single
    /// conditional UPDATE, so two concurrent reserves can never both succeed
    /// past the available balance.
    pub fn create_hold(
        &self,
        account_id: &str,
        amount: u64,
        created_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
        reason: Option<&str>,
    ) -> Result<ReserveOutcome> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let changed = tx.execute(
            "UPDATE account_balances
             SET available = available - ?1, reserved = reserved + ?1, updated_at = ?2
             WHERE account_id = ?3 AND available >= ?1",
            params![amount, created_at.to_rfc3339(), account_id],
        )?;

        if changed == 0 {
            let available: Option<u64> = tx
                .query_row(
                    "SELECT available FROM account_balances WHERE account_id = ?1",
                    [account_id],
                    |row| row.get(0),
                )
                .optional()?;

            return Ok(match available {
                Some(available) => ReserveOutcome::Insufficient { available },
                None => ReserveOutcome::NoAccount,
            });
        }

        tx.execute(
            "INSERT INTO credit_holds (account_id, amount, state, created_at, expires_at, reason)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                account_id,
                amount,
                HoldState::Pending.to_string(),
                created_at.to_rfc3339(),
                expires_at.to_rfc3339(),
                reason,
            ],
        )?;

        let hold_id = tx.last_insert_rowid();
        tx.commit()?;
        Ok(ReserveOutcome::Created(hold_id))
    }

    pub fn get_hold(&self, hold_id: i64) -> Result<Option<Hold>> {
        let conn = self.lock()?;
        let hold = conn
            .query_row(
                "SELECT id, account_id, amount, state, created_at, expires_at, resolved_at, reason
                 FROM credit_holds WHERE id = ?1",
                [hold_id],
                hold_from_row,
            )
            .optional()?;
        Ok(hold)
    }

    /// Move a pending hold to a terminal state and apply the matching balance
    /// mutation in one transaction. Returns true if this call performed the
    /// transition; false if the hold is unknown or already terminal. The
    /// `state = 'pending'` guard on the UPDATE is the serialization point
    /// between concurrent commit/release/sweep attempts.
    pub fn settle_hold(&self, hold_id: i64, target: HoldState, resolved_at: DateTime<Utc>) -> Result<bool> {
        debug_assert!(target.is_terminal());

        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let hold: Option<(String, u64, String)> = tx
            .query_row(
                "SELECT account_id, amount, state FROM credit_holds WHERE id = ?1",
                [hold_id],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;

        let (account_id, amount, state) = match hold {
            Some(h) => h,
            None => return Ok(false),
        };
        if state != HoldState::Pending.to_string() {
            return Ok(false);
        }

        let transitioned = tx.execute(
            "UPDATE credit_holds SET state = ?1, resolved_at = ?2
             WHERE id = ?3 AND state = ?4",
            params![
                target.to_string(),
                resolved_at.to_rfc3339(),
                hold_id,
                HoldState::Pending.to_string(),
            ],
        )?;
        if transitioned != 1 {
            return Ok(false);
        }

        let balance_sql = match target {
            HoldState::Committed => {
                "UPDATE account_balances
                 SET reserved = reserved - ?1, spent = spent + ?1, updated_at = ?2
                 WHERE account_id = ?3 AND reserved >= ?1"
            }
            HoldState::Released | HoldState::Expired => {
                "UPDATE account_balances
                 SET reserved = reserved - ?1, available = available + ?1, updated_at = ?2
                 WHERE account_id = ?3 AND reserved >= ?1"
            }
            HoldState::Pending => unreachable!("settle target must be terminal"),
        };

        let adjusted = tx.execute(balance_sql, params![amount, resolved_at.to_rfc3339(), account_id])?;
        if adjusted != 1 {
            // Reserved counter out of step with the hold ledger; roll back
            // rather than persist a corrupted balance.
            return Err(LedgerError::StoreUnavailable(format!(
                "balance row for account {} could not absorb settlement of hold {}",
                account_id, hold_id
            )));
        }

        tx.commit()?;
        Ok(true)
    }

    /// Ids of holds the sweeper should reclaim: still pending, past expiry.
    pub fn expired_pending_holds(&self, now: DateTime<Utc>) -> Result<Vec<i64>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id FROM credit_holds
             WHERE state = ?1 AND expires_at <= ?2
             ORDER BY expires_at ASC",
        )?;

        let ids = stmt
            .query_map(
                params![HoldState::Pending.to_string(), now.to_rfc3339()],
                |row| row.get(0),
            )?
            .collect::<std::result::Result<Vec<i64>, _>>()?;

        Ok(ids)
    }

    pub fn list_holds(&self, account_id: Option<&str>, state: Option<HoldState>, limit: Option<usize>) -> Result<Vec<Hold>> {
        let mut query = String::from(
            "SELECT id, account_id, amount, state, created_at, expires_at, resolved_at, reason
             FROM credit_holds WHERE 1 = 1",
        );
        let mut args: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(account) = account_id {
            query.push_str(" AND account_id = ?");
            args.push(Box::new(account.to_string()));
        }
        if let Some(state) = state {
            query.push_str(" AND state = ?");
            args.push(Box::new(state.to_string()));
        }
        query.push_str(" ORDER BY created_at DESC");
        if let Some(limit) = limit {
            query.push_str(&format!(" LIMIT {}", limit));
        }

        let conn = self.lock()?;
        let mut stmt = conn.prepare(&query)?;
        let holds = stmt
            .query_map(rusqlite::params_from_iter(args.iter().map(|a| a.as_ref())), hold_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(holds)
    }

    pub fn get_stats(&self) -> Result<LedgerStats> {
        let conn = self.lock()?;

        let (total_accounts, total_available, total_reserved, total_spent): (i64, Option<u64>, Option<u64>, Option<u64>) =
            conn.query_row(
                "SELECT COUNT(*), SUM(available), SUM(reserved), SUM(spent) FROM account_balances",
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
            )?;

        let count_state = |state: HoldState| -> Result<i64> {
            let n = conn.query_row(
                "SELECT COUNT(*) FROM credit_holds WHERE state = ?1",
                [state.to_string()],
                |row| row.get(0),
            )?;
            Ok(n)
        };

        Ok(LedgerStats {
            total_accounts: total_accounts as usize,
            total_available: total_available.unwrap_or(0),
            total_reserved: total_reserved.unwrap_or(0),
            total_spent: total_spent.unwrap_or(0),
            pending_holds: count_state(HoldState::Pending)? as usize,
            committed_holds: count_state(HoldState::Committed)? as usize,
            released_holds: count_state(HoldState::Released)? as usize,
            expired_holds: count_state(HoldState::Expired)? as usize,
        })
    }
}

fn balance_from_row(row: &Row<'_>) -> rusqlite::Result<AccountBalance> {
    Ok(AccountBalance {
        account_id: row.get(0)?,
        available: row.get(1)?,
        reserved: row.get(2)?,
        spent: row.get(3)?,
        created_at: parse_timestamp(row, 4)?,
        updated_at: parse_timestamp(row, 5)?,
    })
}

fn hold_from_row(row: &Row<'_>) -> rusqlite::Result<Hold> {
    let state_str: String = row.get(3)?;
    let state = state_str.parse::<HoldState>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, e.into())
    })?;

    Ok(Hold {
        id: row.get(0)?,
        account_id: row.get(1)?,
        amount: row.get(2)?,
        state,
        created_at: parse_timestamp(row, 4)?,
        expires_at: parse_timestamp(row, 5)?,
        resolved_at: row
            .get::<_, Option<String>>(6)?
            .map(|s| parse_rfc3339(&s, 6))
            .transpose()?,
        reason: row.get(7)?,
    })
}

fn parse_timestamp(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let s: String = row.get(idx)?;
    parse_rfc3339(&s, idx)
}

fn parse_rfc3339(s: &str, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    s.parse::<DateTime<Utc>>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct LedgerStats {
    pub total_accounts: usize,
    pub total_available: u64,
    pub total_reserved: u64,
    pub total_spent: u64,
    pub pending_holds: usize,
    pub committed_holds: usize,
    pub released_holds: usize,
    pub expired_holds: usize,
}
