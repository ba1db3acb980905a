//! Election lifecycle: nominations, opening a ballot, voting and closing
//!
//! `none -> open -> closed`. The store serializes the open and close
//! transitions; this layer decides what goes on the ballot, how a vote is
//! weighted and who won, and publishes the outcome.

use crate::config::{ElectionConfig, MAX_ELECTION_HOURS};
use crate::ports::{MetadataFetcher, Notification, NotificationSink, RoleResolver};
use crate::ranking::{CandidateStanding, RankingParams, Standings, rank_candidates};
use crate::store::{Store, VoteEntry};
use crate::tally::{Tally, tally, weigh_selection};
use crate::types::{
    Book, BookId, Circle, Election, ElectionId, MemberId, Nomination, Selection,
};
use crate::{Error, Result, validation_error};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use uuid::Uuid;

/// Per-book line of a closed election's breakdown
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRow {
    pub book_id: BookId,
    pub title: String,
    pub ballot_position: usize,
    pub total_weight: f64,
    pub voters: usize,
}

/// Final outcome of a closed election
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElectionResult {
    pub election_id: ElectionId,
    pub winner: BookId,
    pub winner_title: String,
    pub closed_at: DateTime<Utc>,
    pub closed_by: Option<MemberId>,

    /// Nobody voted and the top ballot entry won
    pub by_default: bool,
    pub total_voters: usize,
    pub standings: Vec<ResultRow>,
}

/// Coordinates the store, the ranker and the tally engine
pub struct ElectionManager {
    store: Arc<Store>,
    config: RwLock<ElectionConfig>,
    roles: Arc<dyn RoleResolver>,
    sink: Arc<dyn NotificationSink>,
}

impl ElectionManager {
    pub fn new(
        store: Arc<Store>,
        config: ElectionConfig,
        roles: Arc<dyn RoleResolver>,
        sink: Arc<dyn NotificationSink>,
    ) -> Self {
        Self {
            store,
            config: RwLock::new(config),
            roles,
            sink,
        }
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    /// Current configuration
    pub fn config(&self) -> Result<ElectionConfig> {
        self.config
            .read()
            .map(|config| config.clone())
            .map_err(|_| Error::internal("election config read error"))
    }

    /// Swap configuration; already-open ballots keep their size
    pub fn update_config(&self, config: ElectionConfig) -> Result<()> {
        config.validate()?;
        *self
            .config
            .write()
            .map_err(|_| Error::internal("election config write error"))? = config;
        Ok(())
    }

    fn ranking_params(config: &ElectionConfig) -> RankingParams {
        RankingParams {
            max_appearances: config.max_appearances,
            is_staging: config.is_staging,
            default_ballot_size: config.ballot_size,
        }
    }

    // ---------------------------------------------------------------------
    // Nominations
    // ---------------------------------------------------------------------

    /// Fetch metadata for `input` and record the book with a fresh nomination
    pub async fn nominate<F: MetadataFetcher>(
        &self,
        fetcher: &F,
        nominator: &MemberId,
        input: &str,
    ) -> Result<Book> {
        let metadata = fetcher.fetch(input).await?;
        let title = metadata.title.trim();
        if title.is_empty() {
            return Err(validation_error!("title"));
        }

        let created_at = Utc::now();
        let book = Book {
            id: Uuid::new_v4(),
            title: title.to_string(),
            summary: metadata.summary.filter(|s| !s.trim().is_empty()),
            created_at,
        };
        let nomination = Nomination {
            id: Uuid::new_v4(),
            book_id: book.id,
            nominator: nominator.clone(),
            reactions: 0,
            created_at,
        };
        self.store.insert_nomination(&book, &nomination)?;

        tracing::info!(book_id = %book.id, title = %book.title, %nominator, "book nominated");
        Ok(book)
    }

    /// Record the latest engagement count for a book's nomination
    pub fn set_reactions(&self, book_id: &BookId, reactions: u32) -> Result<()> {
        self.store.set_reactions(book_id, reactions)?;
        tracing::debug!(%book_id, reactions, "nomination reactions updated");
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Ranking reads
    // ---------------------------------------------------------------------

    /// Classification of every book, computed from a fresh snapshot
    pub fn diagnostics(&self) -> Result<Standings> {
        let params = Self::ranking_params(&self.config()?);
        let snapshot = self.store.snapshot()?;
        Ok(rank_candidates(&snapshot, &params))
    }

    /// What the next ballot would look like, without opening it
    pub fn ballot_preview(&self, limit: Option<usize>) -> Result<Vec<CandidateStanding>> {
        let config = self.config()?;
        let standings = self.diagnostics()?;
        Ok(standings
            .top(limit.unwrap_or(config.ballot_size))
            .into_iter()
            .cloned()
            .collect())
    }

    // ---------------------------------------------------------------------
    // Lifecycle
    // ---------------------------------------------------------------------

    /// Open an election with the top-ranked candidates as its fixed ballot
    pub fn open_election(&self, opener: &MemberId, hours: Option<i64>) -> Result<Election> {
        let config = self.config()?;
        let hours = hours.unwrap_or(config.election_hours);
        if !(1..=MAX_ELECTION_HOURS).contains(&hours) {
            return Err(validation_error!(
                "election duration must be between 1 and {} hours",
                MAX_ELECTION_HOURS
            ));
        }
        let opened_at = Utc::now();
        let closes_at = Duration::try_hours(hours)
            .and_then(|duration| opened_at.checked_add_signed(duration))
            .ok_or_else(|| validation_error!("election deadline out of range"))?;
        let params = Self::ranking_params(&config);

        let mut titles = Vec::new();
        let election = self.store.open_election_with(|snapshot| {
            let standings = rank_candidates(snapshot, &params);
            let top = standings.top(config.ballot_size);
            if top.is_empty() {
                return Err(Error::NoEligibleCandidates);
            }
            titles = top.iter().map(|c| (c.book_id, c.title.clone())).collect();

            Ok(Election {
                id: Uuid::new_v4(),
                opener: opener.clone(),
                ballot: top.iter().map(|c| c.book_id).collect(),
                opened_at,
                closes_at,
                closed_at: None,
                closed_by: None,
                winner: None,
            })
        })?;

        tracing::info!(
            election_id = %election.id,
            ballot_size = election.ballot_size(),
            closes_at = %election.closes_at,
            %opener,
            "election opened"
        );
        self.sink.notify(Notification::ElectionOpened {
            election_id: election.id,
            ballot: titles,
            closes_at: election.closes_at,
        });

        Ok(election)
    }

    /// Replace the voter's ballot in an open election
    ///
    /// The weight comes from the voter's circle as reported by the role
    /// resolver, never from the voter.
    pub fn cast_vote(
        &self,
        election_id: &ElectionId,
        voter: &MemberId,
        selection: &Selection,
    ) -> Result<Vec<VoteEntry>> {
        let election = self.require_election(election_id)?;
        if !election.is_open() {
            tracing::warn!(%election_id, %voter, "vote rejected: election closed");
            return Err(Error::ElectionClosed {
                election_id: *election_id,
            });
        }

        if let Some(book_id) = selection
            .books()
            .into_iter()
            .find(|book_id| !election.contains(book_id))
        {
            tracing::warn!(%election_id, %voter, %book_id, "vote rejected: book not on ballot");
            return Err(Error::BookNotOnBallot {
                election_id: *election_id,
                book_id,
            });
        }

        let circle = self.roles.circle_of(voter).ok_or_else(|| {
            tracing::warn!(%election_id, %voter, "vote rejected: voter in no circle");
            Error::InvalidRoleWeight {
                voter_id: voter.clone(),
            }
        })?;
        let config = self.config()?;
        let circle_weight = match circle {
            Circle::Inner => config.weight_inner,
            Circle::Outer => config.weight_outer,
        };

        let entries = weigh_selection(selection, circle_weight)?;
        self.store
            .replace_votes(election_id, voter, &entries, Utc::now())?;

        tracing::info!(
            %election_id,
            %voter,
            ?circle,
            books = entries.len(),
            "vote recorded"
        );
        Ok(entries)
    }

    /// Close an election and record its winner
    ///
    /// Closing an election that is already closed returns its stored result
    /// and publishes nothing.
    pub fn close_election(
        &self,
        election_id: &ElectionId,
        closed_by: Option<&MemberId>,
    ) -> Result<ElectionResult> {
        let transition =
            self.store
                .close_election_with(election_id, Utc::now(), closed_by, |election, votes| {
                    tally(election, votes).map(|t| t.winner)
                })?;

        let final_tally = tally(&transition.election, &transition.votes)?;
        let result = self.build_result(&transition.election, &final_tally)?;

        if transition.newly_closed {
            tracing::info!(
                %election_id,
                winner = %result.winner,
                by_default = result.by_default,
                voters = result.total_voters,
                "election closed"
            );
            self.sink.notify(Notification::ElectionClosed(result.clone()));
        } else {
            tracing::debug!(%election_id, "close requested for an already closed election");
        }

        Ok(result)
    }

    /// Close whichever election is open
    pub fn close_current(&self, closed_by: Option<&MemberId>) -> Result<ElectionResult> {
        let election = self.store.open_election()?.ok_or(Error::NoOpenElection)?;
        self.close_election(&election.id, closed_by)
    }

    /// Close every open election whose deadline passed before `now`
    pub fn close_expired(&self, now: DateTime<Utc>) -> Result<Vec<ElectionResult>> {
        let due = self.store.due_elections(now)?;
        let mut results = Vec::with_capacity(due.len());
        for election in due {
            results.push(self.close_election(&election.id, None)?);
        }
        Ok(results)
    }

    /// Publish a closing reminder if the election is still open
    pub fn send_closing_reminder(&self, election_id: &ElectionId) -> Result<bool> {
        let election = self.require_election(election_id)?;
        if !election.is_open() {
            return Ok(false);
        }
        self.sink.notify(Notification::ClosingReminder {
            election_id: election.id,
            closes_at: election.closes_at,
        });
        Ok(true)
    }

    // ---------------------------------------------------------------------
    // Election reads
    // ---------------------------------------------------------------------

    pub fn election(&self, election_id: &ElectionId) -> Result<Option<Election>> {
        self.store.election(election_id)
    }

    pub fn current_election(&self) -> Result<Option<Election>> {
        self.store.open_election()
    }

    /// Running tally of an election, open or closed
    pub fn live_tally(&self, election_id: &ElectionId) -> Result<Tally> {
        let election = self.require_election(election_id)?;
        let votes = self.store.votes_for(election_id)?;
        tally(&election, &votes)
    }

    /// Final breakdown, `None` while the election is still open
    pub fn results(&self, election_id: &ElectionId) -> Result<Option<ElectionResult>> {
        let election = self.require_election(election_id)?;
        if election.is_open() {
            return Ok(None);
        }
        let votes = self.store.votes_for(election_id)?;
        let result = self.build_result(&election, &tally(&election, &votes)?)?;
        Ok(Some(result))
    }

    pub fn voter_count(&self, election_id: &ElectionId) -> Result<usize> {
        self.store.voter_count(election_id)
    }

    fn require_election(&self, election_id: &ElectionId) -> Result<Election> {
        self.store
            .election(election_id)?
            .ok_or(Error::ElectionNotFound {
                election_id: *election_id,
            })
    }

    fn build_result(&self, election: &Election, outcome: &Tally) -> Result<ElectionResult> {
        let winner = election
            .winner
            .ok_or_else(|| Error::internal(format!("election {} has no winner", election.id)))?;
        let closed_at = election
            .closed_at
            .ok_or_else(|| Error::internal(format!("election {} is not closed", election.id)))?;

        let mut titles = HashMap::new();
        for book_id in &election.ballot {
            let book = self
                .store
                .book(book_id)?
                .ok_or(Error::BookNotFound { book_id: *book_id })?;
            titles.insert(*book_id, book.title);
        }
        let title_of = |book_id: &BookId| titles.get(book_id).cloned().unwrap_or_default();

        Ok(ElectionResult {
            election_id: election.id,
            winner,
            winner_title: title_of(&winner),
            closed_at,
            closed_by: election.closed_by.clone(),
            by_default: outcome.by_default,
            total_voters: outcome.total_voters,
            standings: outcome
                .standings
                .iter()
                .map(|standing| ResultRow {
                    book_id: standing.book_id,
                    title: title_of(&standing.book_id),
                    ballot_position: standing.ballot_position,
                    total_weight: standing.total_weight,
                    voters: standing.voters,
                })
                .collect(),
        })
    }
}
