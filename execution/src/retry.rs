use crate::{lock, Balances};
use backer_types::Fund;
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Mutex, MutexGuard,
};
use tracing::{debug, info};

/// Outcome of a single [RetryQueue::drain] pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Drained {
    /// Deltas applied during this pass.
    pub settled: usize,
    /// Funds fully settled (and dropped) during this pass.
    pub completed: usize,
    /// Funds still owing at least one delta.
    pub remaining: usize,
}

/// Residual funds that could not be settled when their transfer failed.
///
/// Each queued fund only ever shrinks: a delta is removed the moment it is
/// applied, so no delta is applied twice and an empty fund is dropped.
/// Retries are unbounded.
#[derive(Debug, Default)]
pub struct RetryQueue {
    pending: Mutex<Vec<Fund>>,
    enqueued: AtomicU64,
}

impl RetryQueue {
    /// Queue a residual fund for later settlement.
    pub fn enqueue(&self, fund: Fund) {
        if fund.is_empty() {
            return;
        }
        info!(accounts = fund.len(), "queued residual fund");
        lock(&self.pending).push(fund);
        self.enqueued.fetch_add(1, Ordering::Relaxed);
    }

    /// Funds queued since the queue was created. Never decreases, not even on
    /// reset.
    pub fn enqueued(&self) -> u64 {
        self.enqueued.load(Ordering::Relaxed)
    }

    /// Try to apply every outstanding delta once.
    ///
    /// Holds the queue lock for the whole pass, so concurrent [RetryQueue::enqueue]
    /// calls wait rather than interleave. Callers holding a directory lock must
    /// take it before calling this (see [crate::Store::drain_pending]).
    pub fn drain<B: Balances + ?Sized>(&self, balances: &B) -> Drained {
        let mut pending = lock(&self.pending);
        if pending.is_empty() {
            return Drained::default();
        }

        let mut settled = 0;
        for fund in pending.iter_mut() {
            fund.retain(|account, delta| match balances.increment(account, delta) {
                Ok(()) => {
                    settled += 1;
                    false
                }
                Err(err) => {
                    debug!(account, %delta, ?err, "residual delta still blocked");
                    true
                }
            });
        }
        let before = pending.len();
        pending.retain(|fund| !fund.is_empty());
        let drained = Drained {
            settled,
            completed: before - pending.len(),
            remaining: pending.len(),
        };
        if settled > 0 {
            info!(
                settled = drained.settled,
                completed = drained.completed,
                remaining = drained.remaining,
                "synced residual funds"
            );
        }
        drained
    }

    pub fn len(&self) -> usize {
        lock(&self.pending).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.pending).is_empty()
    }

    /// Copy of the funds still owed.
    pub fn pending(&self) -> Vec<Fund> {
        lock(&self.pending).clone()
    }

    pub(crate) fn guard(&self) -> MutexGuard<'_, Vec<Fund>> {
        lock(&self.pending)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::{fund, funded_store};
    use backer_types::Points;

    #[test]
    fn test_drain_empty_is_noop() {
        let store = funded_store(&[("a", 100)]);
        let queue = RetryQueue::default();
        assert_eq!(queue.drain(&store), Drained::default());
        assert_eq!(queue.drain(&store), Drained::default());
        assert_eq!(store.balance("a").unwrap(), Points::from_int(1));
    }

    #[test]
    fn test_empty_fund_is_not_queued() {
        let queue = RetryQueue::default();
        queue.enqueue(Fund::new());
        assert!(queue.is_empty());
        assert_eq!(queue.enqueued(), 0);
    }

    #[test]
    fn test_enqueued_outlives_drain() {
        let store = funded_store(&[("a", 0)]);
        let queue = RetryQueue::default();
        queue.enqueue(fund(&[("a", 1)]));
        queue.enqueue(fund(&[("a", 2)]));
        queue.drain(&store);
        assert!(queue.is_empty());
        assert_eq!(queue.enqueued(), 2);
    }

    #[test]
    fn test_drain_applies_each_delta_once() {
        let store = funded_store(&[("a", 0), ("b", 100)]);
        let queue = RetryQueue::default();
        queue.enqueue(fund(&[("a", -50), ("b", -50)]));

        // "a" can't pay yet, "b" can
        let drained = queue.drain(&store);
        assert_eq!(
            drained,
            Drained {
                settled: 1,
                completed: 0,
                remaining: 1,
            }
        );
        assert_eq!(queue.pending(), vec![fund(&[("a", -50)])]);
        assert_eq!(store.balance("b").unwrap(), Points::from_cents(50));

        // Nothing changes while "a" stays empty; "b" is never charged again
        assert_eq!(queue.drain(&store).settled, 0);
        assert_eq!(store.balance("b").unwrap(), Points::from_cents(50));

        store.fund("a", Points::from_int(1)).unwrap();
        let drained = queue.drain(&store);
        assert_eq!(
            drained,
            Drained {
                settled: 1,
                completed: 1,
                remaining: 0,
            }
        );
        assert!(queue.is_empty());
        assert_eq!(store.balance("a").unwrap(), Points::from_cents(50));
        assert_eq!(store.balance("b").unwrap(), Points::from_cents(50));

        assert_eq!(queue.drain(&store), Drained::default());
    }

    #[test]
    fn test_unknown_account_stays_queued() {
        let store = funded_store(&[]);
        let queue = RetryQueue::default();
        queue.enqueue(fund(&[("ghost", 10)]));
        assert_eq!(queue.drain(&store).remaining, 1);

        store.fund("ghost", Points::from_cents(1)).unwrap();
        assert_eq!(queue.drain(&store).completed, 1);
        assert_eq!(store.balance("ghost").unwrap(), Points::from_cents(11));
    }

    #[test]
    fn test_concurrent_enqueue_during_drain() {
        let store = funded_store(&[("a", 0)]);
        let queue = RetryQueue::default();

        std::thread::scope(|scope| {
            scope.spawn(|| {
                for _ in 0..100 {
                    queue.enqueue(fund(&[("a", 1)]));
                }
            });
            scope.spawn(|| {
                for _ in 0..50 {
                    queue.drain(&store);
                }
            });
        });
        queue.drain(&store);
        assert!(queue.is_empty());
        assert_eq!(store.balance("a").unwrap(), Points::from_int(1));
    }
}
