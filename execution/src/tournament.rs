use crate::{read, write, Error, Result};
use backer_types::{EscrowRecord, Fund, Points, TournamentRecord};
use std::{collections::BTreeMap, sync::RwLock};
use tracing::info;

#[derive(Debug)]
struct State {
    open: bool,
    /// The fund each participant's entry was paid from, by participant id.
    escrow: BTreeMap<String, Fund>,
}

/// A tournament and its escrow pool.
///
/// Starts open and closes exactly once. Joining and closing are serialized on
/// the tournament's own lock, so a close observes every join that completed
/// before it and no join is accepted after it.
#[derive(Debug)]
pub struct Tournament {
    id: u64,
    deposit: Points,
    created_at_ms: u64,
    state: RwLock<State>,
}

impl Tournament {
    pub fn new(id: u64, deposit: Points, created_at_ms: u64) -> Self {
        info!(tournament = id, %deposit, "creating tournament");
        Self {
            id,
            deposit,
            created_at_ms,
            state: RwLock::new(State {
                open: true,
                escrow: BTreeMap::new(),
            }),
        }
    }

    pub(crate) fn from_record(record: TournamentRecord) -> Self {
        let escrow = record
            .escrow
            .into_iter()
            .map(|entry| (entry.participant, entry.fund))
            .collect();
        Self {
            id: record.id,
            deposit: record.deposit,
            created_at_ms: record.created_at_ms,
            state: RwLock::new(State {
                open: record.open,
                escrow,
            }),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn deposit(&self) -> Points {
        self.deposit
    }

    pub fn created_at_ms(&self) -> u64 {
        self.created_at_ms
    }

    /// Escrow `fund` as the entry of `participant`.
    pub fn join(&self, participant: &str, fund: Fund) -> Result<()> {
        let mut state = write(&self.state);
        if !state.open {
            return Err(Error::AlreadyClosed(self.id));
        }
        if fund.is_empty() {
            return Err(Error::InvalidArgument(format!(
                "player {participant} joined tournament {} without fund",
                self.id
            )));
        }
        if state.escrow.contains_key(participant) {
            return Err(Error::DuplicateParticipant {
                tournament: self.id,
                participant: participant.to_string(),
            });
        }

        info!(tournament = self.id, participant, "player joined tournament");
        state.escrow.insert(participant.to_string(), fund);
        Ok(())
    }

    pub fn has_participant(&self, participant: &str) -> bool {
        read(&self.state).escrow.contains_key(participant)
    }

    pub fn is_open(&self) -> bool {
        read(&self.state).open
    }

    pub fn participants(&self) -> usize {
        read(&self.state).escrow.len()
    }

    /// Close the tournament and hand its escrow pool to the caller.
    ///
    /// Only the first call succeeds. The pool stays readable through
    /// [Tournament::escrow] but can no longer change.
    pub fn close(&self) -> Result<BTreeMap<String, Fund>> {
        let mut state = write(&self.state);
        if !state.open {
            return Err(Error::AlreadyClosed(self.id));
        }
        state.open = false;
        info!(
            tournament = self.id,
            participants = state.escrow.len(),
            "closed tournament"
        );
        Ok(state.escrow.clone())
    }

    /// Copy of the escrow pool.
    pub fn escrow(&self) -> BTreeMap<String, Fund> {
        read(&self.state).escrow.clone()
    }

    pub(crate) fn record(&self) -> TournamentRecord {
        let state = read(&self.state);
        TournamentRecord {
            id: self.id,
            deposit: self.deposit,
            created_at_ms: self.created_at_ms,
            open: state.open,
            escrow: state
                .escrow
                .iter()
                .map(|(participant, fund)| EscrowRecord {
                    participant: participant.clone(),
                    fund: fund.clone(),
                })
                .collect(),
        }
    }
}
