pub mod api;
mod fund;
mod points;
mod snapshot;

pub use fund::{id_encode_size, read_id, write_id, Fund};
pub use points::{ParsePointsError, Points, SCALE};
pub use snapshot::{AccountRecord, EscrowRecord, Snapshot, TournamentRecord, SNAPSHOT_VERSION};

/// Maximum length (in bytes) of an account identifier.
pub const MAX_ID_LENGTH: usize = 256;

/// Maximum number of accounts a single fund may touch.
pub const MAX_FUND_ENTRIES: usize = 1024;

/// Bounds applied when decoding a snapshot.
pub const MAX_SNAPSHOT_ACCOUNTS: usize = 1_000_000;
pub const MAX_SNAPSHOT_TOURNAMENTS: usize = 100_000;
pub const MAX_SNAPSHOT_PENDING: usize = 100_000;
