//! Candidate ranking
//!
//! A pure function from a consistent snapshot of the persisted history to a
//! classification of every book: whether it can go on the next ballot, where
//! it ranks, and why it is excluded otherwise.
//!
//! Ordering of eligible books, highest priority first:
//! 1. score equals the maximum score among eligible books
//! 2. never appeared on a decided ballot before
//! 3. score, descending
//! 4. nomination time, oldest first
//! 5. book id
//!
//! Key 1 is an exact match against the maximum, not a descending sort: only the
//! top-scoring class is lifted, every other book falls back to keys 2-5 no
//! matter how close its score is.

use crate::types::{Book, BookId, Election, ElectionId, Nomination, Vote};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Everything the ranker reads, loaded in one read transaction
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub books: Vec<Book>,
    pub nominations: Vec<Nomination>,
    pub elections: Vec<Election>,
    pub votes: Vec<Vote>,
}

impl Snapshot {
    pub fn open_election(&self) -> Option<&Election> {
        self.elections.iter().find(|e| e.is_open())
    }

    /// Most recently opened election, open or not
    pub fn latest_election(&self) -> Option<&Election> {
        self.elections.iter().max_by_key(|e| e.opened_at)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RankingParams {
    /// Books on this many decided ballots are retired
    pub max_appearances: u32,

    /// Rank books with zero reactions too
    pub is_staging: bool,

    /// Cutoff used before any election has ever been opened
    pub default_ballot_size: usize,
}

/// Why a book is, or is not, a ballot candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reason {
    OnBallot,
    AlreadyWon,
    MaxAppearances,
    NoReactions,
    BelowCutoff,
    NotRanked,

    /// Part of the reported vocabulary; the ranker itself reports
    /// `NotRanked` for books inside the cutoff while nothing is open
    NoOpenElection,
}

impl Reason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OnBallot => "on_ballot",
            Self::AlreadyWon => "already_won",
            Self::MaxAppearances => "max_appearances",
            Self::NoReactions => "no_reactions",
            Self::BelowCutoff => "below_cutoff",
            Self::NotRanked => "not_ranked",
            Self::NoOpenElection => "no_open_election",
        }
    }
}

impl std::fmt::Display for Reason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Diagnostic row for one book
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateStanding {
    pub book_id: BookId,
    pub title: String,
    pub on_ballot: bool,
    pub reason: Reason,
    pub reactions: u32,

    /// Sum of every vote weight ever cast for the book, across all elections
    pub vote_sum: f64,
    pub score: f64,
    pub prior_appearances: u32,

    /// Dense 1-based position among eligible books
    pub candidate_rank: Option<usize>,
    pub nominated_at: DateTime<Utc>,
}

impl CandidateStanding {
    pub fn is_eligible(&self) -> bool {
        self.candidate_rank.is_some()
    }
}

/// Full classification of every book
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Standings {
    /// Ballot size of the latest election, or the configured default
    pub ballot_size: usize,
    pub open_election: Option<ElectionId>,

    /// Ranked books first in rank order, then excluded books by nomination time
    pub entries: Vec<CandidateStanding>,
}

impl Standings {
    pub fn get(&self, book_id: &BookId) -> Option<&CandidateStanding> {
        self.entries.iter().find(|entry| &entry.book_id == book_id)
    }

    /// Eligible books in rank order
    pub fn ranked(&self) -> impl Iterator<Item = &CandidateStanding> {
        self.entries.iter().filter(|entry| entry.is_eligible())
    }

    /// The first `limit` eligible books
    pub fn top(&self, limit: usize) -> Vec<&CandidateStanding> {
        self.ranked().take(limit).collect()
    }
}

/// Classify and rank every book in the snapshot
pub fn rank_candidates(snapshot: &Snapshot, params: &RankingParams) -> Standings {
    let open_election = snapshot.open_election();
    let latest_election = snapshot.latest_election();
    let ballot_size = latest_election
        .map(Election::ballot_size)
        .unwrap_or(params.default_ballot_size);

    let winners: HashSet<BookId> = snapshot.elections.iter().filter_map(|e| e.winner).collect();

    let mut appearances: HashMap<BookId, u32> = HashMap::new();
    for election in snapshot.elections.iter().filter(|e| e.is_decided()) {
        // A ballot never lists a book twice, but count each book once regardless
        let unique: HashSet<&BookId> = election.ballot.iter().collect();
        for book_id in unique {
            *appearances.entry(*book_id).or_default() += 1;
        }
    }

    let mut vote_sums: HashMap<BookId, f64> = HashMap::new();
    for vote in &snapshot.votes {
        *vote_sums.entry(vote.book_id).or_default() += vote.weight;
    }

    let nominations: HashMap<BookId, &Nomination> = snapshot
        .nominations
        .iter()
        .map(|nomination| (nomination.book_id, nomination))
        .collect();

    let (mut eligible, mut excluded): (Vec<_>, Vec<_>) = snapshot
        .books
        .iter()
        .map(|book| {
            let nomination = nominations.get(&book.id);
            let reactions = nomination.map_or(0, |n| n.reactions);
            let vote_sum = vote_sums.get(&book.id).copied().unwrap_or(0.0);
            let prior_appearances = appearances.get(&book.id).copied().unwrap_or(0);
            let on_ballot = open_election.is_some_and(|e| e.contains(&book.id));

            let exclusion = if winners.contains(&book.id) {
                Some(Reason::AlreadyWon)
            } else if prior_appearances >= params.max_appearances {
                Some(Reason::MaxAppearances)
            } else if reactions == 0 && !params.is_staging {
                Some(Reason::NoReactions)
            } else {
                None
            };

            let standing = CandidateStanding {
                book_id: book.id,
                title: book.title.clone(),
                on_ballot,
                reason: if on_ballot {
                    Reason::OnBallot
                } else {
                    exclusion.unwrap_or(Reason::NotRanked)
                },
                reactions,
                vote_sum,
                score: f64::from(reactions) + vote_sum,
                prior_appearances,
                candidate_rank: None,
                nominated_at: nomination.map_or(book.created_at, |n| n.created_at),
            };
            (exclusion.is_none(), standing)
        })
        .partition(|(is_eligible, _)| *is_eligible);

    let max_score = eligible
        .iter()
        .map(|(_, entry)| entry.score)
        .max_by(f64::total_cmp);

    eligible.sort_by(|(_, a), (_, b)| {
        let a_top = Some(a.score) == max_score;
        let b_top = Some(b.score) == max_score;
        b_top
            .cmp(&a_top)
            .then_with(|| (a.prior_appearances > 0).cmp(&(b.prior_appearances > 0)))
            .then_with(|| b.score.total_cmp(&a.score))
            .then_with(|| a.nominated_at.cmp(&b.nominated_at))
            .then_with(|| a.book_id.cmp(&b.book_id))
    });
    excluded.sort_by(|(_, a), (_, b)| {
        a.nominated_at
            .cmp(&b.nominated_at)
            .then_with(|| a.book_id.cmp(&b.book_id))
    });

    let eligible_count = eligible.len();
    for (index, (_, entry)) in eligible.iter_mut().enumerate() {
        let rank = index + 1;
        entry.candidate_rank = Some(rank);
        if entry.on_ballot {
            continue;
        }
        // Within the cutoff but off any open ballot, with or without history
        entry.reason = if rank > ballot_size {
            Reason::BelowCutoff
        } else {
            Reason::NotRanked
        };
    }

    let entries: Vec<CandidateStanding> = eligible
        .into_iter()
        .chain(excluded)
        .map(|(_, entry)| entry)
        .collect();

    tracing::debug!(
        books = entries.len(),
        eligible = eligible_count,
        ballot_size,
        "ranked ballot candidates"
    );

    Standings {
        ballot_size,
        open_election: open_election.map(|e| e.id),
        entries,
    }
}
