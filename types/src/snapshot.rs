use bytes::{Buf, BufMut};
use commonware_codec::{EncodeSize, Error, FixedSize, Read, ReadExt, ReadRangeExt, Write};

use crate::{
    id_encode_size, read_id, write_id, Fund, Points, MAX_FUND_ENTRIES, MAX_SNAPSHOT_ACCOUNTS,
    MAX_SNAPSHOT_PENDING, MAX_SNAPSHOT_TOURNAMENTS,
};

/// Layout version written at the start of every snapshot.
pub const SNAPSHOT_VERSION: u8 = 1;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AccountRecord {
    pub id: String,
    pub balance: Points,
}

impl Write for AccountRecord {
    fn write(&self, writer: &mut impl BufMut) {
        write_id(&self.id, writer);
        self.balance.write(writer);
    }
}

impl Read for AccountRecord {
    type Cfg = ();

    fn read_cfg(reader: &mut impl Buf, _: &Self::Cfg) -> Result<Self, Error> {
        Ok(Self {
            id: read_id(reader)?,
            balance: Points::read(reader)?,
        })
    }
}

impl EncodeSize for AccountRecord {
    fn encode_size(&self) -> usize {
        id_encode_size(&self.id) + Points::SIZE
    }
}

/// The fund a participant paid to enter a tournament.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EscrowRecord {
    pub participant: String,
    pub fund: Fund,
}

impl Write for EscrowRecord {
    fn write(&self, writer: &mut impl BufMut) {
        write_id(&self.participant, writer);
        self.fund.write(writer);
    }
}

impl Read for EscrowRecord {
    type Cfg = ();

    fn read_cfg(reader: &mut impl Buf, _: &Self::Cfg) -> Result<Self, Error> {
        Ok(Self {
            participant: read_id(reader)?,
            fund: Fund::read(reader)?,
        })
    }
}

impl EncodeSize for EscrowRecord {
    fn encode_size(&self) -> usize {
        id_encode_size(&self.participant) + self.fund.encode_size()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TournamentRecord {
    pub id: u64,
    pub deposit: Points,
    /// Unix timestamp (milliseconds) when the tournament was announced
    pub created_at_ms: u64,
    pub open: bool,
    pub escrow: Vec<EscrowRecord>,
}

impl Write for TournamentRecord {
    fn write(&self, writer: &mut impl BufMut) {
        self.id.write(writer);
        self.deposit.write(writer);
        self.created_at_ms.write(writer);
        self.open.write(writer);
        self.escrow.write(writer);
    }
}

impl Read for TournamentRecord {
    type Cfg = ();

    fn read_cfg(reader: &mut impl Buf, _: &Self::Cfg) -> Result<Self, Error> {
        Ok(Self {
            id: u64::read(reader)?,
            deposit: Points::read(reader)?,
            created_at_ms: u64::read(reader)?,
            open: bool::read(reader)?,
            escrow: Vec::<EscrowRecord>::read_range(reader, 0..=MAX_FUND_ENTRIES)?,
        })
    }
}

impl EncodeSize for TournamentRecord {
    fn encode_size(&self) -> usize {
        self.id.encode_size()
            + self.deposit.encode_size()
            + self.created_at_ms.encode_size()
            + self.open.encode_size()
            + self.escrow.encode_size()
    }
}

/// Everything needed to rebuild the ledger after a restart.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Snapshot {
    pub accounts: Vec<AccountRecord>,
    pub tournaments: Vec<TournamentRecord>,
    /// Residual funds still owed by the retry queue.
    pub pending: Vec<Fund>,
}

impl Write for Snapshot {
    fn write(&self, writer: &mut impl BufMut) {
        SNAPSHOT_VERSION.write(writer);
        self.accounts.write(writer);
        self.tournaments.write(writer);
        self.pending.write(writer);
    }
}

impl Read for Snapshot {
    type Cfg = ();

    fn read_cfg(reader: &mut impl Buf, _: &Self::Cfg) -> Result<Self, Error> {
        if u8::read(reader)? != SNAPSHOT_VERSION {
            return Err(Error::Invalid("Snapshot", "unsupported version"));
        }
        Ok(Self {
            accounts: Vec::<AccountRecord>::read_range(reader, 0..=MAX_SNAPSHOT_ACCOUNTS)?,
            tournaments: Vec::<TournamentRecord>::read_range(reader, 0..=MAX_SNAPSHOT_TOURNAMENTS)?,
            pending: Vec::<Fund>::read_range(reader, 0..=MAX_SNAPSHOT_PENDING)?,
        })
    }
}

impl EncodeSize for Snapshot {
    fn encode_size(&self) -> usize {
        SNAPSHOT_VERSION.encode_size()
            + self.accounts.encode_size()
            + self.tournaments.encode_size()
            + self.pending.encode_size()
    }
}
