mod account;
mod error;
mod operations;
mod retry;
mod store;
mod tournament;
mod transfer;

#[cfg(any(test, feature = "mocks"))]
pub mod mocks;

pub use account::Account;
pub use error::{Error, Result};
pub use operations::Settlement;
pub use retry::{Drained, RetryQueue};
pub use store::Store;
pub use tournament::Tournament;
pub use transfer::{shares, Balances, Transfer};

use std::sync::{Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::error;

// Every critical section in this crate commits with a single assignment after
// all checks, so a poisoned guard never exposes a half-applied update.

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| {
        error!("recovering poisoned mutex");
        PoisonError::into_inner(e)
    })
}

pub(crate) fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|e| {
        error!("recovering poisoned read lock");
        PoisonError::into_inner(e)
    })
}

pub(crate) fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|e| {
        error!("recovering poisoned write lock");
        PoisonError::into_inner(e)
    })
}
