//! SQLite persistence for books, nominations, elections and votes
//!
//! Every state transition that guards the single-open-election rule runs in a
//! `BEGIN IMMEDIATE` transaction, so the check and the write are serialized
//! against every other connection to the same database file. Reads used for
//! ranking are taken inside one transaction and therefore see a consistent
//! snapshot.

mod migrations;

pub use migrations::{current_version, latest_version};

use crate::ranking::Snapshot;
use crate::types::{Book, BookId, Election, ElectionId, MemberId, Nomination, Vote};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, TransactionBehavior, params};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};
use uuid::Uuid;

const BOOK_SELECT_SQL: &str = "SELECT id, title, summary, created_at FROM books";

const NOMINATION_SELECT_SQL: &str =
    "SELECT id, book_id, nominator, reactions, created_at FROM nominations";

const ELECTION_SELECT_SQL: &str = "SELECT
    id,
    opener,
    ballot,
    opened_at,
    closes_at,
    closed_at,
    closed_by,
    winner
FROM elections";

const VOTE_SELECT_SQL: &str =
    "SELECT election_id, voter_id, book_id, weight, rank_position, cast_at FROM votes";

/// One row of a voter's replacement ballot
#[derive(Debug, Clone, PartialEq)]
pub struct VoteEntry {
    pub book_id: BookId,
    pub weight: f64,
    pub rank: Option<u32>,
}

/// Outcome of the close transition
#[derive(Debug, Clone)]
pub struct CloseTransition {
    /// The election as persisted after the call
    pub election: Election,
    pub votes: Vec<Vote>,

    /// False when the election was already closed and nothing was written
    pub newly_closed: bool,
}

/// Connection owner for the election database
pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    /// Open (or create) a database file and apply pending migrations
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let started_at = Instant::now();
        let path = path.as_ref();
        let conn = if path == Path::new(":memory:") {
            Connection::open_in_memory()?
        } else {
            Connection::open(path)?
        };
        let store = Self::bootstrap(conn)?;
        tracing::info!(
            path = %path.display(),
            duration_ms = started_at.elapsed().as_millis() as u64,
            "opened election store"
        );
        Ok(store)
    }

    /// Open a private in-memory database
    pub fn open_in_memory() -> Result<Self> {
        Self::bootstrap(Connection::open_in_memory()?)
    }

    fn bootstrap(mut conn: Connection) -> Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.busy_timeout(Duration::from_secs(5))?;
        migrations::apply_migrations(&mut conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::internal("store connection lock poisoned"))
    }

    /// Persist a new book with its nomination
    ///
    /// Fails with [`Error::NominationsClosed`] while an election is open.
    pub fn insert_nomination(&self, book: &Book, nomination: &Nomination) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        if query_open_election(&tx)?.is_some() {
            return Err(Error::NominationsClosed);
        }

        tx.execute(
            "INSERT INTO books (id, title, summary, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![
                book.id.to_string(),
                book.title,
                book.summary,
                book.created_at
            ],
        )?;
        tx.execute(
            "INSERT INTO nominations (id, book_id, nominator, reactions, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                nomination.id.to_string(),
                nomination.book_id.to_string(),
                nomination.nominator,
                nomination.reactions,
                nomination.created_at
            ],
        )?;
        tx.commit()?;

        Ok(())
    }

    /// Overwrite the engagement count of a book's nomination
    pub fn set_reactions(&self, book_id: &BookId, reactions: u32) -> Result<()> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE nominations SET reactions = ?1 WHERE book_id = ?2",
            params![reactions, book_id.to_string()],
        )?;
        if changed == 0 {
            return Err(Error::BookNotFound { book_id: *book_id });
        }
        Ok(())
    }

    pub fn book(&self, book_id: &BookId) -> Result<Option<Book>> {
        let conn = self.lock()?;
        let book = conn
            .query_row(
                &format!("{BOOK_SELECT_SQL} WHERE id = ?1"),
                [book_id.to_string()],
                parse_book_row,
            )
            .optional()?;
        Ok(book)
    }

    pub fn nomination(&self, book_id: &BookId) -> Result<Option<Nomination>> {
        let conn = self.lock()?;
        let nomination = conn
            .query_row(
                &format!("{NOMINATION_SELECT_SQL} WHERE book_id = ?1"),
                [book_id.to_string()],
                parse_nomination_row,
            )
            .optional()?;
        Ok(nomination)
    }

    pub fn election(&self, election_id: &ElectionId) -> Result<Option<Election>> {
        let conn = self.lock()?;
        query_election(&conn, election_id)
    }

    pub fn open_election(&self) -> Result<Option<Election>> {
        let conn = self.lock()?;
        query_open_election(&conn)
    }

    /// Every election, oldest first
    pub fn elections(&self) -> Result<Vec<Election>> {
        let conn = self.lock()?;
        query_all(&conn, &format!("{ELECTION_SELECT_SQL} ORDER BY opened_at"), parse_election_row)
    }

    pub fn votes_for(&self, election_id: &ElectionId) -> Result<Vec<Vote>> {
        let conn = self.lock()?;
        query_votes_for(&conn, election_id)
    }

    /// Number of distinct voters in an election
    pub fn voter_count(&self, election_id: &ElectionId) -> Result<usize> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(DISTINCT voter_id) FROM votes WHERE election_id = ?1",
            [election_id.to_string()],
            |row| row.get(0),
        )?;
        Ok(usize::try_from(count).unwrap_or_default())
    }

    /// Open elections whose deadline has passed
    pub fn due_elections(&self, now: DateTime<Utc>) -> Result<Vec<Election>> {
        let conn = self.lock()?;
        let elections = query_all(
            &conn,
            &format!("{ELECTION_SELECT_SQL} WHERE closed_at IS NULL ORDER BY opened_at"),
            parse_election_row,
        )?;
        Ok(elections.into_iter().filter(|e| e.is_due(now)).collect())
    }

    /// Consistent read of the full history
    pub fn snapshot(&self) -> Result<Snapshot> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let snapshot = read_snapshot(&tx)?;
        tx.commit()?;
        Ok(snapshot)
    }

    /// Compare-and-swap against "no election is open"
    ///
    /// `build` sees the snapshot read inside the same write transaction and
    /// returns the election to insert.
    pub fn open_election_with<F>(&self, build: F) -> Result<Election>
    where
        F: FnOnce(&Snapshot) -> Result<Election>,
    {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        if let Some(existing) = query_open_election(&tx)? {
            return Err(Error::ElectionAlreadyOpen {
                election_id: existing.id,
            });
        }

        let snapshot = read_snapshot(&tx)?;
        let election = build(&snapshot)?;
        let ballot = serde_json::to_string(&election.ballot)?;

        tx.execute(
            "INSERT INTO elections (id, opener, ballot, opened_at, closes_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                election.id.to_string(),
                election.opener,
                ballot,
                election.opened_at,
                election.closes_at
            ],
        )?;
        tx.commit()?;

        Ok(election)
    }

    /// Close an election and record its winner in one transaction
    ///
    /// An already-closed election is returned untouched. An error from
    /// `decide` rolls the transaction back and leaves the election open.
    pub fn close_election_with<F>(
        &self,
        election_id: &ElectionId,
        closed_at: DateTime<Utc>,
        closed_by: Option<&MemberId>,
        decide: F,
    ) -> Result<CloseTransition>
    where
        F: FnOnce(&Election, &[Vote]) -> Result<BookId>,
    {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let mut election = query_election(&tx, election_id)?.ok_or(Error::ElectionNotFound {
            election_id: *election_id,
        })?;
        let votes = query_votes_for(&tx, election_id)?;

        if !election.is_open() {
            return Ok(CloseTransition {
                election,
                votes,
                newly_closed: false,
            });
        }

        let winner = decide(&election, &votes)?;
        tx.execute(
            "UPDATE elections
             SET closed_at = ?1, closed_by = ?2, winner = ?3
             WHERE id = ?4 AND closed_at IS NULL",
            params![
                closed_at,
                closed_by,
                winner.to_string(),
                election_id.to_string()
            ],
        )?;
        tx.commit()?;

        election.closed_at = Some(closed_at);
        election.closed_by = closed_by.cloned();
        election.winner = Some(winner);

        Ok(CloseTransition {
            election,
            votes,
            newly_closed: true,
        })
    }

    /// Atomically replace every row a voter holds in an open election
    pub fn replace_votes(
        &self,
        election_id: &ElectionId,
        voter_id: &MemberId,
        entries: &[VoteEntry],
        cast_at: DateTime<Utc>,
    ) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let election = query_election(&tx, election_id)?.ok_or(Error::ElectionNotFound {
            election_id: *election_id,
        })?;
        if !election.is_open() {
            return Err(Error::ElectionClosed {
                election_id: *election_id,
            });
        }
        if let Some(entry) = entries.iter().find(|entry| !election.contains(&entry.book_id)) {
            return Err(Error::BookNotOnBallot {
                election_id: *election_id,
                book_id: entry.book_id,
            });
        }

        tx.execute(
            "DELETE FROM votes WHERE election_id = ?1 AND voter_id = ?2",
            params![election_id.to_string(), voter_id],
        )?;
        {
            let mut insert = tx.prepare(
                "INSERT INTO votes (election_id, voter_id, book_id, weight, rank_position, cast_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            for entry in entries {
                insert.execute(params![
                    election_id.to_string(),
                    voter_id,
                    entry.book_id.to_string(),
                    entry.weight,
                    entry.rank,
                    cast_at
                ])?;
            }
        }
        tx.commit()?;

        Ok(())
    }
}

fn read_snapshot(conn: &Connection) -> Result<Snapshot> {
    Ok(Snapshot {
        books: query_all(conn, BOOK_SELECT_SQL, parse_book_row)?,
        nominations: query_all(conn, NOMINATION_SELECT_SQL, parse_nomination_row)?,
        elections: query_all(conn, ELECTION_SELECT_SQL, parse_election_row)?,
        votes: query_all(conn, VOTE_SELECT_SQL, parse_vote_row)?,
    })
}

fn query_all<T>(
    conn: &Connection,
    sql: &str,
    parse: fn(&Row<'_>) -> rusqlite::Result<T>,
) -> Result<Vec<T>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map([], parse)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

fn query_election(conn: &Connection, election_id: &ElectionId) -> Result<Option<Election>> {
    let election = conn
        .query_row(
            &format!("{ELECTION_SELECT_SQL} WHERE id = ?1"),
            [election_id.to_string()],
            parse_election_row,
        )
        .optional()?;
    Ok(election)
}

fn query_open_election(conn: &Connection) -> Result<Option<Election>> {
    let election = conn
        .query_row(
            &format!("{ELECTION_SELECT_SQL} WHERE closed_at IS NULL LIMIT 1"),
            [],
            parse_election_row,
        )
        .optional()?;
    Ok(election)
}

fn query_votes_for(conn: &Connection, election_id: &ElectionId) -> Result<Vec<Vote>> {
    let mut stmt = conn.prepare(&format!(
        "{VOTE_SELECT_SQL} WHERE election_id = ?1 ORDER BY voter_id, rank_position"
    ))?;
    let rows = stmt.query_map([election_id.to_string()], parse_vote_row)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

fn uuid_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<Uuid> {
    let raw: String = row.get(idx)?;
    Uuid::parse_str(&raw)
        .map_err(|err| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err)))
}

fn optional_uuid_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<Uuid>> {
    match row.get::<_, Option<String>>(idx)? {
        Some(raw) => Uuid::parse_str(&raw).map(Some).map_err(|err| {
            rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
        }),
        None => Ok(None),
    }
}

fn parse_book_row(row: &Row<'_>) -> rusqlite::Result<Book> {
    Ok(Book {
        id: uuid_column(row, 0)?,
        title: row.get(1)?,
        summary: row.get(2)?,
        created_at: row.get(3)?,
    })
}

fn parse_nomination_row(row: &Row<'_>) -> rusqlite::Result<Nomination> {
    Ok(Nomination {
        id: uuid_column(row, 0)?,
        book_id: uuid_column(row, 1)?,
        nominator: row.get(2)?,
        reactions: row.get(3)?,
        created_at: row.get(4)?,
    })
}

fn parse_election_row(row: &Row<'_>) -> rusqlite::Result<Election> {
    let raw_ballot: String = row.get(2)?;
    let ballot: Vec<BookId> = serde_json::from_str(&raw_ballot)
        .map_err(|err| rusqlite::Error::FromSqlConversionFailure(2, Type::Text, Box::new(err)))?;

    Ok(Election {
        id: uuid_column(row, 0)?,
        opener: row.get(1)?,
        ballot,
        opened_at: row.get(3)?,
        closes_at: row.get(4)?,
        closed_at: row.get(5)?,
        closed_by: row.get(6)?,
        winner: optional_uuid_column(row, 7)?,
    })
}

fn parse_vote_row(row: &Row<'_>) -> rusqlite::Result<Vote> {
    Ok(Vote {
        election_id: uuid_column(row, 0)?,
        voter_id: row.get(1)?,
        book_id: uuid_column(row, 2)?,
        weight: row.get(3)?,
        rank: row.get(4)?,
        cast_at: row.get(5)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn nominate(store: &Store, title: &str, reactions: u32) -> BookId {
        let created_at = Utc::now();
        let book = Book {
            id: Uuid::new_v4(),
            title: title.to_string(),
            summary: Some(format!("{title} summary")),
            created_at,
        };
        let nomination = Nomination {
            id: Uuid::new_v4(),
            book_id: book.id,
            nominator: "member".to_string(),
            reactions,
            created_at,
        };
        store.insert_nomination(&book, &nomination).unwrap();
        book.id
    }

    fn open_with(store: &Store, ballot: Vec<BookId>) -> Result<Election> {
        store.open_election_with(|_| {
            let opened_at = Utc::now();
            Ok(Election {
                id: Uuid::new_v4(),
                opener: "organizer".to_string(),
                ballot,
                opened_at,
                closes_at: opened_at + Duration::hours(72),
                closed_at: None,
                closed_by: None,
                winner: None,
            })
        })
    }

    #[test]
    fn test_book_and_nomination_round_trip() {
        let store = Store::open_in_memory().unwrap();
        let book_id = nominate(&store, "Dune", 4);

        let book = store.book(&book_id).unwrap().unwrap();
        assert_eq!(book.title, "Dune");
        assert_eq!(book.summary.as_deref(), Some("Dune summary"));

        store.set_reactions(&book_id, 9).unwrap();
        assert_eq!(store.nomination(&book_id).unwrap().unwrap().reactions, 9);

        let missing = store.set_reactions(&Uuid::new_v4(), 1);
        assert!(matches!(missing, Err(Error::BookNotFound { .. })));
    }

    #[test]
    fn test_open_is_compare_and_swap() {
        let store = Store::open_in_memory().unwrap();
        let a = nominate(&store, "A", 1);

        let first = open_with(&store, vec![a]).unwrap();
        let second = open_with(&store, vec![a]);
        match second {
            Err(Error::ElectionAlreadyOpen { election_id }) => assert_eq!(election_id, first.id),
            other => panic!("expected ElectionAlreadyOpen, got {other:?}"),
        }

        let stored = store.open_election().unwrap().unwrap();
        assert_eq!(stored.ballot, vec![a]);
    }

    #[test]
    fn test_nominations_closed_while_open() {
        let store = Store::open_in_memory().unwrap();
        let a = nominate(&store, "A", 1);
        open_with(&store, vec![a]).unwrap();

        let book = Book {
            id: Uuid::new_v4(),
            title: "Late".to_string(),
            summary: None,
            created_at: Utc::now(),
        };
        let nomination = Nomination {
            id: Uuid::new_v4(),
            book_id: book.id,
            nominator: "member".to_string(),
            reactions: 0,
            created_at: Utc::now(),
        };
        let result = store.insert_nomination(&book, &nomination);
        assert!(matches!(result, Err(Error::NominationsClosed)));
        assert!(store.book(&book.id).unwrap().is_none());
    }

    #[test]
    fn test_replace_votes_rejects_foreign_books_atomically() {
        let store = Store::open_in_memory().unwrap();
        let a = nominate(&store, "A", 1);
        let b = nominate(&store, "B", 1);
        let outsider = nominate(&store, "Outsider", 1);
        let election = open_with(&store, vec![a, b]).unwrap();
        let voter = "reader".to_string();

        let entry = |book_id, weight| VoteEntry {
            book_id,
            weight,
            rank: None,
        };
        store
            .replace_votes(&election.id, &voter, &[entry(a, 10.0)], Utc::now())
            .unwrap();

        let result = store.replace_votes(
            &election.id,
            &voter,
            &[entry(b, 5.0), entry(outsider, 5.0)],
            Utc::now(),
        );
        assert!(matches!(result, Err(Error::BookNotOnBallot { .. })));

        // The earlier ballot survives the rejected replacement
        let votes = store.votes_for(&election.id).unwrap();
        assert_eq!(votes.len(), 1);
        assert_eq!(votes[0].book_id, a);
    }

    #[test]
    fn test_close_is_idempotent() {
        let store = Store::open_in_memory().unwrap();
        let a = nominate(&store, "A", 1);
        let election = open_with(&store, vec![a]).unwrap();
        let closer = "organizer".to_string();

        let first = store
            .close_election_with(&election.id, Utc::now(), Some(&closer), |e, _| Ok(e.ballot[0]))
            .unwrap();
        assert!(first.newly_closed);
        assert_eq!(first.election.winner, Some(a));

        let second = store
            .close_election_with(&election.id, Utc::now(), None, |_, _| {
                Err(Error::internal("decide must not run twice"))
            })
            .unwrap();
        assert!(!second.newly_closed);
        assert_eq!(second.election.winner, Some(a));
        assert_eq!(second.election.closed_by.as_deref(), Some("organizer"));
        assert!(store.open_election().unwrap().is_none());
    }

    #[test]
    fn test_failed_decision_leaves_election_open() {
        let store = Store::open_in_memory().unwrap();
        let a = nominate(&store, "A", 1);
        let election = open_with(&store, vec![a]).unwrap();

        let result = store.close_election_with(&election.id, Utc::now(), None, |e, _| {
            Err(Error::EmptyBallot { election_id: e.id })
        });
        assert!(matches!(result, Err(Error::EmptyBallot { .. })));
        assert!(store.election(&election.id).unwrap().unwrap().is_open());
    }

    #[test]
    fn test_snapshot_reads_everything() {
        let store = Store::open_in_memory().unwrap();
        let a = nominate(&store, "A", 2);
        let b = nominate(&store, "B", 3);
        let election = open_with(&store, vec![b, a]).unwrap();
        store
            .replace_votes(
                &election.id,
                &"reader".to_string(),
                &[VoteEntry {
                    book_id: a,
                    weight: 30.0,
                    rank: Some(1),
                }],
                Utc::now(),
            )
            .unwrap();

        let snapshot = store.snapshot().unwrap();
        assert_eq!(snapshot.books.len(), 2);
        assert_eq!(snapshot.nominations.len(), 2);
        assert_eq!(snapshot.elections[0].ballot, vec![b, a]);
        assert_eq!(snapshot.votes[0].rank, Some(1));
        assert_eq!(store.voter_count(&election.id).unwrap(), 1);
    }
}
