//! # Core Types for the Book Club Election Engine
//!
//! Records persisted by the store and passed between the ranker, the tally
//! engine and the election manager.
//!
//! ## Type Categories
//!
//! ### Persisted Records
//! - [`Book`]: a nominated title
//! - [`Nomination`]: the engagement signal attached to a book
//! - [`Election`]: one voting round with its frozen ballot
//! - [`Vote`]: one weighted row of a voter's ballot
//!
//! ### Vote Input
//! - [`Circle`]: the voter's membership tier, which selects the vote weight
//! - [`Selection`]: what the voter submitted
//!
//! ## Usage Examples
//!
//! ```rust
//! use bookclub::types::Election;
//! use chrono::{Duration, Utc};
//! use uuid::Uuid;
//!
//! let opened_at = Utc::now();
//! let first = Uuid::new_v4();
//! let election = Election {
//!     id: Uuid::new_v4(),
//!     opener: "organizer".to_string(),
//!     ballot: vec![first, Uuid::new_v4()],
//!     opened_at,
//!     closes_at: opened_at + Duration::hours(72),
//!     closed_at: None,
//!     closed_by: None,
//!     winner: None,
//! };
//!
//! assert!(election.is_open());
//! assert_eq!(election.ballot_position(&first), Some(0));
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier of a [`Book`]
pub type BookId = Uuid;

/// Identifier of an [`Election`]
pub type ElectionId = Uuid;

/// External identity of a voter or organizer, as asserted by the chat platform
pub type MemberId = String;

/// A nominated book
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Book {
    pub id: BookId,
    pub title: String,
    pub summary: Option<String>,

    /// Nomination time; the final tie-break of the ballot order
    pub created_at: DateTime<Utc>,
}

/// Engagement record created alongside each book
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Nomination {
    pub id: Uuid,
    pub book_id: BookId,
    pub nominator: MemberId,

    /// Externally counted reactions on the nomination post
    pub reactions: u32,
    pub created_at: DateTime<Utc>,
}

/// One voting round
///
/// The ballot is fixed when the election opens. `closed_at` is `None` exactly
/// while the election is open, and `winner` is written once, by the close
/// transition.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Election {
    pub id: ElectionId,
    pub opener: MemberId,

    /// Ordered shortlist; position 0 is the ranker's top pick
    pub ballot: Vec<BookId>,
    pub opened_at: DateTime<Utc>,

    /// Scheduled deadline for the automatic close
    pub closes_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    pub closed_by: Option<MemberId>,
    pub winner: Option<BookId>,
}

impl Election {
    /// Whether the election still accepts votes
    pub fn is_open(&self) -> bool {
        self.closed_at.is_none()
    }

    /// Whether the election closed and resolved a winner
    pub fn is_decided(&self) -> bool {
        self.closed_at.is_some() && self.winner.is_some()
    }

    pub fn ballot_size(&self) -> usize {
        self.ballot.len()
    }

    /// Zero-based position of a book on the ballot
    pub fn ballot_position(&self, book_id: &BookId) -> Option<usize> {
        self.ballot.iter().position(|id| id == book_id)
    }

    pub fn contains(&self, book_id: &BookId) -> bool {
        self.ballot.contains(book_id)
    }

    /// Whether the scheduled deadline has passed at `now`
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.is_open() && self.closes_at <= now
    }
}

/// One weighted row of a voter's ballot
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Vote {
    pub election_id: ElectionId,
    pub voter_id: MemberId,
    pub book_id: BookId,

    /// Signed influence of this row
    pub weight: f64,

    /// 1-based preference when the voter submitted a ranked ballot
    pub rank: Option<u32>,
    pub cast_at: DateTime<Utc>,
}

/// Voting tier of a member
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Circle {
    Inner,
    Outer,
}

/// A voter's submission for the open election
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Selection {
    /// The whole circle weight goes to one book
    Single(BookId),

    /// Circle weight split across books in preference order
    Ranked(Vec<BookId>),

    /// Explicit signed points per book, limited by a quadratic budget
    Points(Vec<(BookId, f64)>),
}

impl Selection {
    /// Books referenced by the selection, in submission order
    pub fn books(&self) -> Vec<BookId> {
        match self {
            Self::Single(book_id) => vec![*book_id],
            Self::Ranked(books) => books.clone(),
            Self::Points(entries) => entries.iter().map(|(book_id, _)| *book_id).collect(),
        }
    }
}

/// Book metadata returned by the external fetcher
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookMetadata {
    pub title: String,
    pub summary: Option<String>,
}
