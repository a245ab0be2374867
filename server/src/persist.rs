use backer_execution::Store;
use backer_types::Snapshot;
use commonware_codec::{DecodeExt, Encode};
use std::{
    ffi::OsString,
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::{Arc, Mutex, PoisonError},
};
use thiserror::Error;
use tokio::{sync::Notify, task::JoinHandle};
use tracing::{debug, error, info};

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("snapshot I/O on {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("corrupt snapshot {}", path.display())]
    Decode {
        path: PathBuf,
        #[source]
        source: commonware_codec::Error,
    },
    #[error("snapshot rejected by ledger")]
    Restore(#[from] backer_execution::Error),
}

/// Read a snapshot file, `None` if there is none yet.
pub fn load(path: &Path) -> Result<Option<Snapshot>, PersistError> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(PersistError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };
    Snapshot::decode(bytes.as_slice())
        .map(Some)
        .map_err(|source| PersistError::Decode {
            path: path.to_path_buf(),
            source,
        })
}

/// Write a snapshot next to `path` and move it into place.
pub fn save(path: &Path, snapshot: &Snapshot) -> Result<(), PersistError> {
    let mut temporary = OsString::from(path.as_os_str());
    temporary.push(".tmp");
    let temporary = PathBuf::from(temporary);

    let io = |source| PersistError::Io {
        path: path.to_path_buf(),
        source,
    };
    std::fs::write(&temporary, snapshot.encode()).map_err(io)?;
    std::fs::rename(&temporary, path).map_err(io)
}

fn remove(path: &Path) -> Result<(), PersistError> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(source) => Err(PersistError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Best-effort snapshot writer.
///
/// [Persister::trigger] never blocks: triggers arriving while a write is in
/// flight coalesce into a single follow-up write. Writes and resets are
/// serialized so a stale snapshot can't land after a reset removed the file.
#[derive(Clone)]
pub struct Persister {
    store: Arc<Store>,
    path: Option<PathBuf>,
    notify: Arc<Notify>,
    io: Arc<Mutex<()>>,
}

impl Persister {
    pub fn new(store: Arc<Store>, path: Option<PathBuf>) -> Self {
        Self {
            store,
            path,
            notify: Arc::new(Notify::new()),
            io: Arc::new(Mutex::new(())),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Restore the ledger from disk. Returns false if there was nothing to load.
    pub fn restore(&self) -> Result<bool, PersistError> {
        let Some(path) = &self.path else {
            return Ok(false);
        };
        let Some(snapshot) = load(path)? else {
            return Ok(false);
        };
        self.store.restore(snapshot)?;
        info!(path = %path.display(), "restored snapshot");
        Ok(true)
    }

    /// Request a snapshot write.
    pub fn trigger(&self) {
        if self.path.is_some() {
            self.notify.notify_one();
        }
    }

    /// Write a snapshot now.
    pub fn flush(&self) -> Result<(), PersistError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let _io = self.io.lock().unwrap_or_else(PoisonError::into_inner);
        let snapshot = self.store.snapshot();
        save(path, &snapshot)?;
        debug!(
            path = %path.display(),
            accounts = snapshot.accounts.len(),
            tournaments = snapshot.tournaments.len(),
            pending = snapshot.pending.len(),
            "wrote snapshot"
        );
        Ok(())
    }

    /// Clear the ledger and delete its snapshot.
    pub fn reset(&self) -> Result<(), PersistError> {
        let _io = self.io.lock().unwrap_or_else(PoisonError::into_inner);
        self.store.reset();
        match &self.path {
            Some(path) => remove(path),
            None => Ok(()),
        }
    }

    /// Spawn the task serving [Persister::trigger].
    pub fn start(&self) -> JoinHandle<()> {
        let persister = self.clone();
        tokio::spawn(async move {
            loop {
                persister.notify.notified().await;
                let writer = persister.clone();
                match tokio::task::spawn_blocking(move || writer.flush()).await {
                    Ok(Ok(())) => {}
                    Ok(Err(err)) => error!(?err, "failed to write snapshot"),
                    Err(err) => error!(?err, "snapshot task panicked"),
                }
            }
        })
    }
}
