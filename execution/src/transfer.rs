use crate::{Account, Error, Result, RetryQueue};
use backer_types::{Fund, Points};
use std::{collections::HashMap, sync::Arc};
use tracing::{debug, warn};

/// Applies single-account deltas on behalf of the transfer engine.
pub trait Balances {
    fn increment(&self, account: &str, delta: Points) -> Result<()>;
}

impl Balances for HashMap<String, Arc<Account>> {
    fn increment(&self, account: &str, delta: Points) -> Result<()> {
        self.get(account)
            .ok_or_else(|| Error::AccountNotFound(account.to_string()))?
            .increment(delta)
    }
}

/// Split `total` across `participants` in order.
///
/// Every participant but the last gets `round(total / count)`; the last one
/// absorbs the rounding remainder so the shares always sum to `total` exactly.
/// Participants are assumed to be distinct: a repeated id collapses into a
/// single delta, and the result then no longer sums to `total`.
pub fn shares<S: AsRef<str>>(participants: &[S], total: Points) -> Result<Fund> {
    let count = participants.len();
    let share = total
        .split(count)
        .ok_or_else(|| Error::InvalidArgument("no participants".to_string()))?;
    let overflow = || Error::InvalidArgument(format!("can't split {total} {count} ways"));
    let rest = share
        .checked_mul_int(count as i64 - 1)
        .and_then(|taken| total.checked_sub(taken))
        .ok_or_else(overflow)?;

    let fund: Fund = participants
        .iter()
        .enumerate()
        .map(|(i, id)| {
            let delta = if i == count - 1 { rest } else { share };
            (id.as_ref().to_string(), delta)
        })
        .collect();
    Ok(fund)
}

/// Multi-party transfer engine.
///
/// Never holds more than one account lock at a time: deltas are applied one by
/// one, and a failure part-way through is undone by applying the inverse of
/// what already went through. Whatever can't be undone immediately is handed
/// to the [RetryQueue].
pub struct Transfer<'a, B: Balances + ?Sized> {
    balances: &'a B,
    queue: &'a RetryQueue,
}

impl<'a, B: Balances + ?Sized> Transfer<'a, B> {
    pub fn new(balances: &'a B, queue: &'a RetryQueue) -> Self {
        Self { balances, queue }
    }

    /// Split `total` across `participants` (see [shares]) and apply the result.
    ///
    /// A negative `total` debits the participants, a positive one credits them.
    pub fn distribute<S: AsRef<str>>(&self, participants: &[S], total: Points) -> Result<Fund> {
        let plan = shares(participants, total)?;
        self.apply(plan)
    }

    /// Apply every delta of `plan` in order, stopping at the first failure.
    ///
    /// Returns the applied fund on success. On failure the applied prefix is
    /// reverted and the call fails with [Error::TransferFailed]; `queued` tells
    /// whether part of the reversal had to be deferred to the retry queue.
    pub fn apply(&self, plan: Fund) -> Result<Fund> {
        if plan.is_empty() {
            return Err(Error::InvalidArgument("empty fund".to_string()));
        }

        let mut applied = Fund::new();
        for (account, delta) in plan.iter() {
            if let Err(err) = self.balances.increment(account, delta) {
                warn!(account, %delta, ?err, "transfer stopped");
                let queued = !self.revert(applied);
                return Err(Error::TransferFailed { queued });
            }
            applied.insert(account, delta);
        }
        debug!(accounts = applied.len(), "transfer committed");
        Ok(applied)
    }

    /// Undo a fund that was previously applied.
    ///
    /// Returns true if every delta was reversed. Otherwise the reversals that
    /// failed are queued for retry and false is returned.
    pub fn revert(&self, applied: Fund) -> bool {
        let mut residual = applied.inverted();
        residual.retain(|account, delta| match self.balances.increment(account, delta) {
            Ok(()) => {
                debug!(account, %delta, "delta reverted");
                false
            }
            Err(err) => {
                warn!(account, %delta, ?err, "can't revert delta");
                true
            }
        });
        if residual.is_empty() {
            return true;
        }

        warn!(accounts = residual.len(), "queueing residual fund");
        self.queue.enqueue(residual);
        false
    }
}
