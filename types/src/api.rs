//! JSON bodies exchanged between the server and its clients.

use crate::Points;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Balance {
    pub player_id: String,
    pub balance: Points,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Winner {
    pub player_id: String,
    pub prize: Points,
}

/// Tournament result. Without `tournamentId` the oldest open tournament is resolved.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TournamentResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tournament_id: Option<u64>,
    pub winners: Vec<Winner>,
}
