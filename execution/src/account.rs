use crate::{lock, Error, Result};
use backer_types::{AccountRecord, Points};
use std::sync::Mutex;
use tracing::{debug, info};

/// A player's point balance.
///
/// The balance is only reachable through [Account::increment] and
/// [Account::balance], both of which take the account's own lock, so no
/// observer can see it below zero.
#[derive(Debug)]
pub struct Account {
    id: String,
    balance: Mutex<Points>,
}

impl Account {
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        info!(account = %id, "creating account");
        Self {
            id,
            balance: Mutex::new(Points::ZERO),
        }
    }

    pub(crate) fn from_record(record: AccountRecord) -> Self {
        Self {
            id: record.id,
            balance: Mutex::new(record.balance),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Add `delta` (possibly negative) to the balance.
    ///
    /// Fails without mutating anything if the result would be negative or
    /// would overflow. A zero delta always succeeds.
    pub fn increment(&self, delta: Points) -> Result<()> {
        if delta.is_zero() {
            return Ok(());
        }

        let mut balance = lock(&self.balance);
        let Some(updated) = balance.checked_add(delta) else {
            return Err(Error::BalanceOverflow {
                account: self.id.clone(),
                balance: *balance,
                delta,
            });
        };
        if updated.is_negative() {
            return Err(Error::InsufficientFunds {
                account: self.id.clone(),
                balance: *balance,
                delta,
            });
        }
        debug!(account = %self.id, %delta, balance = %updated, "applied delta");
        *balance = updated;
        Ok(())
    }

    pub fn balance(&self) -> Points {
        *lock(&self.balance)
    }

    pub(crate) fn record(&self) -> AccountRecord {
        AccountRecord {
            id: self.id.clone(),
            balance: self.balance(),
        }
    }
}
