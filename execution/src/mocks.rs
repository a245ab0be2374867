use crate::{Balances, Error, Result, Store};
use backer_types::{Fund, Points};

/// Creates a fund from `(account, cents)` pairs, in order
pub fn fund(deltas: &[(&str, i64)]) -> Fund {
    deltas
        .iter()
        .map(|(account, cents)| (account.to_string(), Points::from_cents(*cents)))
        .collect()
}

/// Creates a store holding the given `(account, cents)` balances
///
/// Zero balances are allowed, so accounts can exist without funds.
pub fn funded_store(balances: &[(&str, i64)]) -> Store {
    let store = Store::new();
    for (account, cents) in balances {
        store
            .create_or_get_account(account)
            .increment(Points::from_cents(*cents))
            .expect("funding a fresh account can't fail");
    }
    store
}

/// Balances that refuse chosen `(account, delta)` pairs and otherwise forward
/// to a [Store].
pub struct Scripted<'a> {
    inner: &'a Store,
    rejections: Vec<(String, Points)>,
}

impl<'a> Scripted<'a> {
    pub fn new(inner: &'a Store) -> Self {
        Self {
            inner,
            rejections: Vec::new(),
        }
    }

    /// Refuse every attempt to apply `delta` to `account`
    pub fn reject(mut self, account: &str, delta: Points) -> Self {
        self.rejections.push((account.to_string(), delta));
        self
    }
}

impl Balances for Scripted<'_> {
    fn increment(&self, account: &str, delta: Points) -> Result<()> {
        if self
            .rejections
            .iter()
            .any(|(rejected, refused)| rejected == account && *refused == delta)
        {
            return Err(Error::InsufficientFunds {
                account: account.to_string(),
                balance: self.inner.balance(account).unwrap_or_default(),
                delta,
            });
        }
        self.inner.increment(account, delta)
    }
}
