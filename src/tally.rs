//! Vote weighting and tallying
//!
//! Turns a voter's [`Selection`] into weighted rows, and aggregates an
//! election's rows into per-book totals and a winner.

use crate::store::VoteEntry;
use crate::types::{BookId, Election, ElectionId, Selection, Vote};
use crate::{Error, Result, validation_error};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Aggregate for one ballot entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookTally {
    pub book_id: BookId,

    /// Zero-based position on the ballot
    pub ballot_position: usize,
    pub total_weight: f64,
    pub voters: usize,
}

/// Result of tallying one election
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tally {
    pub election_id: ElectionId,
    pub winner: BookId,

    /// Every ballot entry, by weight descending then ballot position
    pub standings: Vec<BookTally>,
    pub total_voters: usize,

    /// No votes were cast; the ballot's top entry won by default
    pub by_default: bool,
}

impl Tally {
    pub fn standing(&self, book_id: &BookId) -> Option<&BookTally> {
        self.standings.iter().find(|entry| &entry.book_id == book_id)
    }
}

/// Aggregate an election's votes and pick the winner
///
/// Ties on weight go to the book placed higher on the ballot, so an election
/// without any votes is won by the first ballot entry.
pub fn tally(election: &Election, votes: &[Vote]) -> Result<Tally> {
    if election.ballot.is_empty() {
        return Err(Error::EmptyBallot {
            election_id: election.id,
        });
    }

    let mut totals: HashMap<BookId, (f64, usize)> = HashMap::new();
    let mut voters: HashSet<&str> = HashSet::new();
    for vote in votes.iter().filter(|v| v.election_id == election.id) {
        if !election.contains(&vote.book_id) {
            tracing::warn!(
                election_id = %election.id,
                book_id = %vote.book_id,
                "ignoring vote for a book outside the ballot"
            );
            continue;
        }
        let total = totals.entry(vote.book_id).or_default();
        total.0 += vote.weight;
        total.1 += 1;
        voters.insert(vote.voter_id.as_str());
    }

    let mut standings: Vec<BookTally> = election
        .ballot
        .iter()
        .enumerate()
        .map(|(ballot_position, book_id)| {
            let (total_weight, voters) = totals.get(book_id).copied().unwrap_or_default();
            BookTally {
                book_id: *book_id,
                ballot_position,
                total_weight,
                voters,
            }
        })
        .collect();

    standings.sort_by(|a, b| {
        b.total_weight
            .total_cmp(&a.total_weight)
            .then_with(|| a.ballot_position.cmp(&b.ballot_position))
    });

    // Non-empty ballot, so there is always a first standing
    let winner = standings[0].book_id;

    Ok(Tally {
        election_id: election.id,
        winner,
        standings,
        total_voters: voters.len(),
        by_default: voters.is_empty(),
    })
}

/// Expand a selection into weighted rows for a voter whose circle grants
/// `circle_weight`
///
/// - `Single` gives the full weight to one book.
/// - `Ranked` splits the weight with linear decay: rank `k` of `n` receives
///   `(n - k + 1) / (n(n + 1) / 2)` of it.
/// - `Points` keeps the submitted signed points; their squares may not sum
///   past `circle_weight`. Zero-point entries are dropped.
pub fn weigh_selection(selection: &Selection, circle_weight: f64) -> Result<Vec<VoteEntry>> {
    let books = selection.books();
    if books.is_empty() {
        return Err(validation_error!("selection must name at least one book"));
    }
    let mut seen = HashSet::new();
    if let Some(duplicate) = books.iter().find(|book_id| !seen.insert(**book_id)) {
        return Err(validation_error!("book {} selected more than once", duplicate));
    }

    let entries = match selection {
        Selection::Single(book_id) => vec![VoteEntry {
            book_id: *book_id,
            weight: circle_weight,
            rank: Some(1),
        }],
        Selection::Ranked(books) => {
            let n = books.len() as f64;
            let denominator = n * (n + 1.0) / 2.0;
            books
                .iter()
                .enumerate()
                .map(|(index, book_id)| VoteEntry {
                    book_id: *book_id,
                    weight: circle_weight * (n - index as f64) / denominator,
                    rank: Some(index as u32 + 1),
                })
                .collect()
        }
        Selection::Points(points) => {
            if let Some((book_id, _)) = points.iter().find(|(_, p)| !p.is_finite()) {
                return Err(validation_error!("points for book {} are not a number", book_id));
            }
            let spent: f64 = points.iter().map(|(_, p)| p * p).sum();
            if spent > circle_weight {
                return Err(Error::VoteBudgetExceeded {
                    spent,
                    allowed: circle_weight,
                });
            }
            points
                .iter()
                .filter(|(_, p)| *p != 0.0)
                .map(|(book_id, p)| VoteEntry {
                    book_id: *book_id,
                    weight: *p,
                    rank: None,
                })
                .collect()
        }
    };

    Ok(entries)
}
