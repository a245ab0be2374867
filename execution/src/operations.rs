use crate::{shares, Error, Result, Store, Tournament};
use backer_types::{api::Winner, Fund, Points, MAX_ID_LENGTH};
use std::{
    collections::HashSet,
    sync::Arc,
    time::{SystemTime, UNIX_EPOCH},
};
use tracing::{info, warn};

/// Outcome of [Store::settle].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Settlement {
    pub tournament: u64,
    /// Payouts applied immediately, by winner.
    pub paid: Vec<(String, Fund)>,
    /// Winners whose payout was handed to the retry queue.
    pub deferred: Vec<String>,
}

fn validate_id(id: &str) -> Result<()> {
    if id.is_empty() {
        return Err(Error::InvalidArgument("empty id".to_string()));
    }
    if id.len() > MAX_ID_LENGTH {
        return Err(Error::InvalidArgument(format!(
            "id longer than {MAX_ID_LENGTH} bytes"
        )));
    }
    Ok(())
}

fn validate_amount(name: &str, points: Points) -> Result<()> {
    if !points.is_positive() {
        return Err(Error::InvalidArgument(format!(
            "{name} must be positive, got {points}"
        )));
    }
    Ok(())
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or_default()
}

impl Store {
    /// Credit `points` to `player`, creating the account if needed.
    ///
    /// Returns the balance after the credit.
    pub fn fund(&self, player: &str, points: Points) -> Result<Points> {
        validate_id(player)?;
        validate_amount("points", points)?;
        let account = self.create_or_get_account(player);
        account.increment(points)?;
        Ok(account.balance())
    }

    /// Debit `points` from an existing account.
    pub fn take(&self, player: &str, points: Points) -> Result<Points> {
        validate_amount("points", points)?;
        let account = self
            .account(player)
            .ok_or_else(|| Error::AccountNotFound(player.to_string()))?;
        account.increment(-points)?;
        Ok(account.balance())
    }

    pub fn balance(&self, player: &str) -> Result<Points> {
        self.account(player)
            .map(|account| account.balance())
            .ok_or_else(|| Error::AccountNotFound(player.to_string()))
    }

    /// Open a new tournament stamped with the current time.
    pub fn announce(&self, id: u64, deposit: Points) -> Result<Arc<Tournament>> {
        self.announce_at(id, deposit, now_ms())
    }

    pub fn announce_at(&self, id: u64, deposit: Points, created_at_ms: u64) -> Result<Arc<Tournament>> {
        validate_amount("deposit", deposit)?;
        self.add_tournament(Tournament::new(id, deposit, created_at_ms))
    }

    /// Enter `player` into a tournament, paying the deposit from the backers
    /// and the player in equal shares.
    ///
    /// The player pays last and so absorbs the rounding remainder. Returns the
    /// escrowed entry.
    pub fn join(&self, tournament_id: u64, player: &str, backers: &[String]) -> Result<Fund> {
        let tournament = self
            .tournament(tournament_id)
            .ok_or(Error::TournamentNotFound(tournament_id))?;

        let mut participants: Vec<&str> = backers.iter().map(String::as_str).collect();
        participants.push(player);
        let mut seen = HashSet::new();
        if let Some(duplicate) = participants.iter().find(|id| !seen.insert(**id)) {
            return Err(Error::InvalidArgument(format!(
                "{duplicate} listed twice in entry of {player}"
            )));
        }
        if let Some(missing) = participants.iter().find(|id| self.account(id).is_none()) {
            return Err(Error::AccountNotFound(missing.to_string()));
        }

        // Cheap rejection before touching balances; the join below re-checks.
        if !tournament.is_open() {
            return Err(Error::AlreadyClosed(tournament_id));
        }
        if tournament.has_participant(player) {
            return Err(Error::DuplicateParticipant {
                tournament: tournament_id,
                participant: player.to_string(),
            });
        }

        let transfer = self.transfer();
        let entry = transfer.distribute(&participants, -tournament.deposit())?;
        if let Err(err) = tournament.join(player, entry.clone()) {
            warn!(tournament = tournament_id, player, ?err, "refunding rejected entry");
            transfer.revert(entry);
            return Err(err);
        }
        Ok(entry)
    }

    /// Close a tournament and pay its winners.
    ///
    /// Without an explicit id the oldest open tournament is settled. Each prize
    /// is split across the accounts that paid the winner's entry, in the order
    /// they paid it. A payout that can't be applied is queued in full; one
    /// that can't even be planned is reported as deferred and skipped.
    pub fn settle(&self, tournament_id: Option<u64>, winners: &[Winner]) -> Result<Settlement> {
        let tournament = match tournament_id {
            Some(id) => self.tournament(id).ok_or(Error::TournamentNotFound(id))?,
            None => self
                .oldest_open_tournament()
                .ok_or(Error::NoOpenTournament)?,
        };
        let id = tournament.id();

        let mut seen = HashSet::new();
        for winner in winners {
            if !seen.insert(winner.player_id.as_str()) {
                return Err(Error::InvalidArgument(format!(
                    "winner {} listed twice",
                    winner.player_id
                )));
            }
            validate_amount("prize", winner.prize)?;
            if !tournament.has_participant(&winner.player_id) {
                return Err(Error::NotParticipant {
                    tournament: id,
                    participant: winner.player_id.clone(),
                });
            }
        }

        let pool = tournament.close()?;
        let transfer = self.transfer();
        let mut settlement = Settlement {
            tournament: id,
            ..Default::default()
        };
        for winner in winners {
            let Some(entry) = pool.get(&winner.player_id) else {
                continue;
            };
            let accounts: Vec<&str> = entry.accounts().collect();
            // Past close(): never bail out of the loop.
            let plan = match shares(&accounts, winner.prize) {
                Ok(plan) => plan,
                Err(err) => {
                    warn!(tournament = id, winner = %winner.player_id, ?err, "can't plan payout");
                    settlement.deferred.push(winner.player_id.clone());
                    continue;
                }
            };
            match transfer.apply(plan.clone()) {
                Ok(paid) => settlement.paid.push((winner.player_id.clone(), paid)),
                Err(err) => {
                    warn!(tournament = id, winner = %winner.player_id, ?err, "deferring payout");
                    self.retry_queue().enqueue(plan);
                    settlement.deferred.push(winner.player_id.clone());
                }
            }
        }
        info!(
            tournament = id,
            paid = settlement.paid.len(),
            deferred = settlement.deferred.len(),
            "settled tournament"
        );
        Ok(settlement)
    }
}
