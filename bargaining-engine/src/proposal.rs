use chrono::{DateTime, Utc};
use derive_more::Display;
use serde::{Deserialize, Serialize};

use contract_term_utils::TermVector;

/// Side of negotiation. Party `A` proposes in odd rounds, `B` in even rounds.
#[derive(Clone, Copy, Debug, Display, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Party {
    A,
    B,
}

impl Party {
    pub fn proposing_in(round: u32) -> Party {
        match round % 2 {
            1 => Party::A,
            _ => Party::B,
        }
    }

    pub fn other(self) -> Party {
        match self {
            Party::A => Party::B,
            Party::B => Party::A,
        }
    }

    pub(crate) fn index(self) -> usize {
        match self {
            Party::A => 0,
            Party::B => 1,
        }
    }
}

/// Terms proposed by one party in single round.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Proposal {
    pub round: u32,
    pub party: Party,
    /// Name of the proposing party taken from its `ConstraintSet`.
    pub proposer: String,
    pub terms: TermVector,
    /// Score of `terms` against counterparty's constraints.
    pub score: f64,
    pub timestamp: DateTime<Utc>,
}
