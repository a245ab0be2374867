use bytes::{Buf, BufMut};
use commonware_codec::{EncodeSize, Error, FixedSize, Read, ReadExt, Write};

use crate::{Points, MAX_FUND_ENTRIES, MAX_ID_LENGTH};

/// Write an identifier as length-prefixed UTF-8 bytes.
pub fn write_id(id: &str, writer: &mut impl BufMut) {
    let bytes = id.as_bytes();
    (bytes.len() as u32).write(writer);
    writer.put_slice(bytes);
}

/// Read an identifier written by [write_id].
pub fn read_id(reader: &mut impl Buf) -> Result<String, Error> {
    let len = u32::read(reader)? as usize;
    if len > MAX_ID_LENGTH {
        return Err(Error::Invalid("Id", "too long"));
    }
    if reader.remaining() < len {
        return Err(Error::EndOfBuffer);
    }
    let mut bytes = vec![0u8; len];
    reader.copy_to_slice(&mut bytes);
    String::from_utf8(bytes).map_err(|_| Error::Invalid("Id", "invalid UTF-8"))
}

pub fn id_encode_size(id: &str) -> usize {
    u32::SIZE + id.len()
}

/// Signed per-account deltas making up one multi-party transfer.
///
/// Entries keep the order in which they were applied. Once a transfer has
/// failed, the fund doubles as the list of deltas still owed: an entry is
/// removed as soon as its delta has been (re-)applied, and the fund is settled
/// when it is empty.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Fund {
    deltas: Vec<(String, Points)>,
}

impl Fund {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a delta for an account, replacing (and returning) any previous one.
    pub fn insert(&mut self, account: impl Into<String>, delta: Points) -> Option<Points> {
        let account = account.into();
        match self.deltas.iter_mut().find(|(id, _)| *id == account) {
            Some((_, existing)) => Some(std::mem::replace(existing, delta)),
            None => {
                self.deltas.push((account, delta));
                None
            }
        }
    }

    pub fn get(&self, account: &str) -> Option<Points> {
        self.deltas
            .iter()
            .find(|(id, _)| id == account)
            .map(|(_, delta)| *delta)
    }

    pub fn contains(&self, account: &str) -> bool {
        self.get(account).is_some()
    }

    pub fn remove(&mut self, account: &str) -> Option<Points> {
        let index = self.deltas.iter().position(|(id, _)| id == account)?;
        Some(self.deltas.remove(index).1)
    }

    /// Keep only the entries for which `keep` returns true.
    pub fn retain(&mut self, mut keep: impl FnMut(&str, Points) -> bool) {
        self.deltas.retain(|(id, delta)| keep(id, *delta));
    }

    pub fn len(&self) -> usize {
        self.deltas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.deltas.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Points)> {
        self.deltas.iter().map(|(id, delta)| (id.as_str(), *delta))
    }

    pub fn accounts(&self) -> impl Iterator<Item = &str> {
        self.deltas.iter().map(|(id, _)| id.as_str())
    }

    /// Sum of all deltas, or `None` on overflow.
    pub fn total(&self) -> Option<Points> {
        self.deltas
            .iter()
            .try_fold(Points::ZERO, |sum, (_, delta)| sum.checked_add(*delta))
    }

    /// The fund that undoes this one.
    pub fn inverted(&self) -> Fund {
        self.deltas
            .iter()
            .map(|(id, delta)| (id.clone(), -*delta))
            .collect()
    }
}

impl FromIterator<(String, Points)> for Fund {
    fn from_iter<I: IntoIterator<Item = (String, Points)>>(iter: I) -> Self {
        let mut fund = Fund::new();
        for (account, delta) in iter {
            fund.insert(account, delta);
        }
        fund
    }
}

impl Write for Fund {
    fn write(&self, writer: &mut impl BufMut) {
        (self.deltas.len() as u32).write(writer);
        for (account, delta) in &self.deltas {
            write_id(account, writer);
            delta.write(writer);
        }
    }
}

impl Read for Fund {
    type Cfg = ();

    fn read_cfg(reader: &mut impl Buf, _: &Self::Cfg) -> Result<Self, Error> {
        let count = u32::read(reader)? as usize;
        if count > MAX_FUND_ENTRIES {
            return Err(Error::Invalid("Fund", "too many entries"));
        }
        let mut fund = Fund::new();
        for _ in 0..count {
            let account = read_id(reader)?;
            let delta = Points::read(reader)?;
            if fund.insert(account, delta).is_some() {
                return Err(Error::Invalid("Fund", "duplicate account"));
            }
        }
        Ok(fund)
    }
}

impl EncodeSize for Fund {
    fn encode_size(&self) -> usize {
        u32::SIZE
            + self
                .deltas
                .iter()
                .map(|(account, _)| id_encode_size(account) + Points::SIZE)
                .sum::<usize>()
    }
}
