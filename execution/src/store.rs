use crate::{read, write, Account, Balances, Drained, Error, Result, RetryQueue, Tournament, Transfer};
use backer_types::{Points, Snapshot};
use std::{
    collections::{BTreeMap, HashMap},
    sync::{Arc, RwLock},
};
use tracing::info;

/// Process-wide directory of accounts, tournaments and residual funds.
///
/// Each collection has its own lock so unrelated traffic never serializes.
/// Operations that need a consistent view of all three (snapshot, restore,
/// reset, retry drain) acquire them in one fixed order: accounts, then
/// tournaments, then the retry queue. Per-account and per-tournament locks are
/// leaves: nothing waits on a collection lock while holding one.
#[derive(Debug, Default)]
pub struct Store {
    accounts: RwLock<HashMap<String, Arc<Account>>>,
    tournaments: RwLock<BTreeMap<u64, Arc<Tournament>>>,
    retry: RetryQueue,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a store from a snapshot.
    pub fn from_snapshot(snapshot: Snapshot) -> Result<Self> {
        let store = Self::new();
        store.restore(snapshot)?;
        Ok(store)
    }

    pub fn account(&self, id: &str) -> Option<Arc<Account>> {
        read(&self.accounts).get(id).cloned()
    }

    pub fn create_or_get_account(&self, id: &str) -> Arc<Account> {
        if let Some(account) = self.account(id) {
            return account;
        }
        write(&self.accounts)
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(Account::new(id)))
            .clone()
    }

    /// Remove an account that no open tournament holds escrow from.
    pub fn remove_account(&self, id: &str) -> Result<Arc<Account>> {
        let mut accounts = write(&self.accounts);
        let tournaments = read(&self.tournaments);
        let referenced = tournaments.values().any(|tournament| {
            tournament.is_open()
                && tournament
                    .escrow()
                    .values()
                    .any(|fund| fund.contains(id))
        });
        if referenced {
            return Err(Error::InvalidArgument(format!(
                "account {id} is held in open escrow"
            )));
        }
        accounts
            .remove(id)
            .ok_or_else(|| Error::AccountNotFound(id.to_string()))
    }

    pub fn accounts(&self) -> usize {
        read(&self.accounts).len()
    }

    pub fn add_tournament(&self, tournament: Tournament) -> Result<Arc<Tournament>> {
        let mut tournaments = write(&self.tournaments);
        if tournaments.contains_key(&tournament.id()) {
            return Err(Error::TournamentExists(tournament.id()));
        }
        let tournament = Arc::new(tournament);
        tournaments.insert(tournament.id(), tournament.clone());
        Ok(tournament)
    }

    pub fn tournament(&self, id: u64) -> Option<Arc<Tournament>> {
        read(&self.tournaments).get(&id).cloned()
    }

    pub fn remove_tournament(&self, id: u64) -> Option<Arc<Tournament>> {
        write(&self.tournaments).remove(&id)
    }

    /// The open tournament announced first (ties broken by id).
    pub fn oldest_open_tournament(&self) -> Option<Arc<Tournament>> {
        read(&self.tournaments)
            .values()
            .filter(|tournament| tournament.is_open())
            .min_by_key(|tournament| (tournament.created_at_ms(), tournament.id()))
            .cloned()
    }

    pub fn retry_queue(&self) -> &RetryQueue {
        &self.retry
    }

    pub fn transfer(&self) -> Transfer<'_, Self> {
        Transfer::new(self, &self.retry)
    }

    /// Run one retry pass over the residual funds.
    pub fn drain_pending(&self) -> Drained {
        let accounts = read(&self.accounts);
        self.retry.drain(&*accounts)
    }

    /// Consistent copy of the whole ledger.
    pub fn snapshot(&self) -> Snapshot {
        let directory = read(&self.accounts);
        let tournaments = read(&self.tournaments);
        let pending = self.retry.guard();

        let mut accounts: Vec<_> = directory.values().map(|account| account.record()).collect();
        accounts.sort_by(|a, b| a.id.cmp(&b.id));
        Snapshot {
            accounts,
            tournaments: tournaments
                .values()
                .map(|tournament| tournament.record())
                .collect(),
            pending: pending.clone(),
        }
    }

    /// Replace the whole ledger with `snapshot`.
    pub fn restore(&self, snapshot: Snapshot) -> Result<()> {
        if let Some(account) = snapshot.accounts.iter().find(|a| a.balance.is_negative()) {
            return Err(Error::InvalidArgument(format!(
                "account {} has negative balance {}",
                account.id, account.balance
            )));
        }
        for tournament in &snapshot.tournaments {
            if let Some(entry) = tournament.escrow.iter().find(|e| e.fund.is_empty()) {
                return Err(Error::InvalidArgument(format!(
                    "player {} holds an empty entry in tournament {}",
                    entry.participant, tournament.id
                )));
            }
        }

        let mut accounts = write(&self.accounts);
        let mut tournaments = write(&self.tournaments);
        let mut pending = self.retry.guard();

        *accounts = snapshot
            .accounts
            .into_iter()
            .map(|record| (record.id.clone(), Arc::new(Account::from_record(record))))
            .collect();
        *tournaments = snapshot
            .tournaments
            .into_iter()
            .map(|record| (record.id, Arc::new(Tournament::from_record(record))))
            .collect();
        *pending = snapshot
            .pending
            .into_iter()
            .filter(|fund| !fund.is_empty())
            .collect();
        info!(
            accounts = accounts.len(),
            tournaments = tournaments.len(),
            pending = pending.len(),
            "restored ledger"
        );
        Ok(())
    }

    /// Drop every account, tournament and residual fund.
    pub fn reset(&self) {
        let mut accounts = write(&self.accounts);
        let mut tournaments = write(&self.tournaments);
        let mut pending = self.retry.guard();
        accounts.clear();
        tournaments.clear();
        pending.clear();
        info!("ledger reset");
    }
}

impl Balances for Store {
    fn increment(&self, account: &str, delta: Points) -> Result<()> {
        self.account(account)
            .ok_or_else(|| Error::AccountNotFound(account.to_string()))?
            .increment(delta)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::{fund, funded_store};
    use std::thread;

    #[test]
    fn test_create_or_get_account() {
        let store = Store::new();
        let first = store.create_or_get_account("p1");
        first.increment(Points::from_int(3)).unwrap();
        let second = store.create_or_get_account("p1");
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(second.balance(), Points::from_int(3));
        assert_eq!(store.accounts(), 1);
        assert!(store.account("p2").is_none());
    }

    #[test]
    fn test_concurrent_account_creation() {
        let store = Store::new();
        thread::scope(|scope| {
            for _ in 0..8 {
                scope.spawn(|| {
                    store
                        .create_or_get_account("p1")
                        .increment(Points::from_int(1))
                        .unwrap();
                });
            }
        });
        assert_eq!(store.accounts(), 1);
        assert_eq!(store.balance("p1").unwrap(), Points::from_int(8));
    }

    #[test]
    fn test_remove_account_guarded_by_open_escrow() {
        let store = funded_store(&[("p1", 1_000), ("p2", 0)]);
        store.announce_at(1, Points::from_int(10), 0).unwrap();
        store.join(1, "p1", &[]).unwrap();

        assert!(matches!(
            store.remove_account("p1"),
            Err(Error::InvalidArgument(_))
        ));
        assert!(store.remove_account("p2").is_ok());
        assert_eq!(
            store.remove_account("p2").unwrap_err(),
            Error::AccountNotFound("p2".to_string())
        );

        store.tournament(1).unwrap().close().unwrap();
        assert!(store.remove_account("p1").is_ok());
    }

    #[test]
    fn test_tournament_directory() {
        let store = Store::new();
        store
            .add_tournament(Tournament::new(1, Points::from_int(10), 300))
            .unwrap();
        store
            .add_tournament(Tournament::new(2, Points::from_int(10), 100))
            .unwrap();
        store
            .add_tournament(Tournament::new(3, Points::from_int(10), 100))
            .unwrap();
        assert_eq!(
            store
                .add_tournament(Tournament::new(1, Points::from_int(5), 0))
                .unwrap_err(),
            Error::TournamentExists(1)
        );

        assert_eq!(store.oldest_open_tournament().unwrap().id(), 2);
        store.tournament(2).unwrap().close().unwrap();
        assert_eq!(store.oldest_open_tournament().unwrap().id(), 3);
        store.remove_tournament(3);
        assert_eq!(store.oldest_open_tournament().unwrap().id(), 1);
        store.tournament(1).unwrap().close().unwrap();
        assert!(store.oldest_open_tournament().is_none());
    }

    #[test]
    fn test_snapshot_restore() {
        let store = funded_store(&[("p1", 1_000), ("b1", 500), ("poor", 0)]);
        store.announce_at(4, Points::from_int(9), 10).unwrap();
        store.join(4, "p1", &["b1".to_string()]).unwrap();
        store.retry_queue().enqueue(fund(&[("poor", -50)]));

        let snapshot = store.snapshot();
        let restored = Store::from_snapshot(snapshot.clone()).unwrap();
        assert_eq!(restored.snapshot(), snapshot);
        assert_eq!(restored.balance("p1").unwrap(), Points::from_cents(550));
        assert_eq!(restored.balance("b1").unwrap(), Points::from_cents(50));
        assert!(restored.tournament(4).unwrap().has_participant("p1"));
        assert_eq!(restored.retry_queue().len(), 1);
    }

    #[test]
    fn test_restore_rejects_negative_balance() {
        let store = funded_store(&[("p1", 100)]);
        let mut snapshot = store.snapshot();
        snapshot.accounts[0].balance = Points::from_cents(-1);
        assert!(matches!(
            Store::from_snapshot(snapshot),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_restore_rejects_empty_entry() {
        let store = funded_store(&[("p1", 100)]);
        store.announce_at(1, Points::from_int(1), 0).unwrap();
        store.join(1, "p1", &[]).unwrap();
        let mut snapshot = store.snapshot();
        snapshot.tournaments[0].escrow[0].fund = backer_types::Fund::new();
        assert!(matches!(
            Store::from_snapshot(snapshot),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_reset() {
        let store = funded_store(&[("p1", 100)]);
        store.announce_at(1, Points::from_int(1), 0).unwrap();
        store.retry_queue().enqueue(fund(&[("p1", 1)]));
        store.reset();
        assert_eq!(store.snapshot(), Snapshot::default());
    }

    #[test]
    fn test_snapshot_concurrent_with_traffic() {
        let store = funded_store(&[("a", 0), ("b", 0)]);
        thread::scope(|scope| {
            scope.spawn(|| {
                for _ in 0..200 {
                    store.fund("a", Points::from_cents(1)).unwrap();
                    store.retry_queue().enqueue(fund(&[("b", 1)]));
                }
            });
            scope.spawn(|| {
                for _ in 0..200 {
                    store.drain_pending();
                }
            });
            scope.spawn(|| {
                for _ in 0..200 {
                    let snapshot = store.snapshot();
                    assert!(snapshot.accounts.iter().all(|a| !a.balance.is_negative()));
                }
            });
        });
        store.drain_pending();
        assert_eq!(store.balance("a").unwrap(), Points::from_int(2));
        assert_eq!(store.balance("b").unwrap(), Points::from_int(2));
    }
}
