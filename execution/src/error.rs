use backer_types::Points;
use thiserror::Error;

/// Error type for ledger operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("account {account} can't apply {delta} to balance {balance}")]
    InsufficientFunds {
        account: String,
        balance: Points,
        delta: Points,
    },
    #[error("account {account} balance {balance} overflows by {delta}")]
    BalanceOverflow {
        account: String,
        balance: Points,
        delta: Points,
    },
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("account {0} not found")]
    AccountNotFound(String),
    #[error("tournament {0} not found")]
    TournamentNotFound(u64),
    #[error("no open tournament")]
    NoOpenTournament,
    #[error("tournament {0} already exists")]
    TournamentExists(u64),
    #[error("transfer failed (residual queued: {queued})")]
    TransferFailed { queued: bool },
    #[error("tournament {0} already closed")]
    AlreadyClosed(u64),
    #[error("player {participant} already joined tournament {tournament}")]
    DuplicateParticipant { tournament: u64, participant: String },
    #[error("player {participant} not in tournament {tournament}")]
    NotParticipant { tournament: u64, participant: String },
}

/// Result type for ledger operations.
pub type Result<T> = std::result::Result<T, Error>;
