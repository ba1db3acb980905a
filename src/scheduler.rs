//! Background close timers
//!
//! Each open election gets one cancellable tokio task that optionally sends a
//! closing reminder and then runs the regular close path at the deadline.
//! Closing is idempotent, so a timer that fires after a manual close does
//! nothing.

use crate::election::ElectionManager;
use crate::types::{Election, ElectionId};
use crate::{Error, Result};
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::oneshot;

/// Armed timer: its generation and the sender that cancels it
type Timer = (u64, oneshot::Sender<()>);
type Timers = Arc<Mutex<HashMap<ElectionId, Timer>>>;

/// Arms and cancels automatic closes. Must be used inside a tokio runtime.
pub struct CloseScheduler {
    manager: Arc<ElectionManager>,
    timers: Timers,
    next_generation: AtomicU64,
}

impl CloseScheduler {
    pub fn new(manager: Arc<ElectionManager>) -> Self {
        Self {
            manager,
            timers: Arc::new(Mutex::new(HashMap::new())),
            next_generation: AtomicU64::new(0),
        }
    }

    /// Arm the timer for an election's own deadline and configured reminder
    pub fn schedule(&self, election: &Election) -> Result<()> {
        let lead = self.manager.config()?.reminder_lead_hours;
        let remind_at = lead
            .and_then(Duration::try_hours)
            .and_then(|lead| election.closes_at.checked_sub_signed(lead));
        self.schedule_at(election.id, election.closes_at, remind_at)
    }

    /// Arm a timer with explicit instants, replacing any timer for the same
    /// election
    pub fn schedule_at(
        &self,
        election_id: ElectionId,
        closes_at: DateTime<Utc>,
        remind_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let (cancel_tx, mut cancel_rx) = oneshot::channel();
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        if let Some((_, previous)) = self
            .lock_timers()?
            .insert(election_id, (generation, cancel_tx))
        {
            let _ = previous.send(());
        }

        let manager = self.manager.clone();
        let timers = self.timers.clone();

        tokio::spawn(async move {
            if let Some(remind_at) = remind_at.filter(|at| *at < closes_at) {
                tokio::select! {
                    _ = tokio::time::sleep(until(remind_at)) => {
                        let manager = manager.clone();
                        match tokio::task::spawn_blocking(move || manager.send_closing_reminder(&election_id)).await {
                            Ok(Ok(_)) => {}
                            Ok(Err(e)) => tracing::error!(%election_id, "closing reminder failed: {}", e),
                            Err(e) => tracing::error!(%election_id, "closing reminder task failed: {}", e),
                        }
                    }
                    _ = &mut cancel_rx => {
                        tracing::debug!(%election_id, "close timer cancelled");
                        return;
                    }
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(until(closes_at)) => {}
                _ = &mut cancel_rx => {
                    tracing::debug!(%election_id, "close timer cancelled");
                    return;
                }
            }

            // Only the timer still registered for the election may close it
            let still_armed = timers
                .lock()
                .map(|mut timers| {
                    let owned = timers
                        .get(&election_id)
                        .is_some_and(|(armed, _)| *armed == generation);
                    if owned {
                        timers.remove(&election_id);
                    }
                    owned
                })
                .unwrap_or(false);
            if !still_armed {
                tracing::debug!(%election_id, generation, "superseded close timer dropped");
                return;
            }

            let closer = manager.clone();
            match tokio::task::spawn_blocking(move || closer.close_election(&election_id, None)).await {
                Ok(Ok(result)) => tracing::info!(
                    %election_id,
                    winner = %result.winner,
                    "scheduled close completed"
                ),
                Ok(Err(e)) => tracing::error!(%election_id, "scheduled close failed: {}", e),
                Err(e) => tracing::error!(%election_id, "scheduled close task failed: {}", e),
            }
        });

        tracing::info!(%election_id, %closes_at, "close timer armed");
        Ok(())
    }

    /// Disarm an election's timer; returns whether one was pending
    pub fn cancel(&self, election_id: &ElectionId) -> Result<bool> {
        match self.lock_timers()?.remove(election_id) {
            Some((_, cancel)) => {
                let _ = cancel.send(());
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Number of armed timers
    pub fn pending(&self) -> Result<usize> {
        Ok(self.lock_timers()?.len())
    }

    /// Startup recovery: close elections whose deadline passed while the
    /// process was down, then arm the timer of the one still open
    pub fn resume(&self) -> Result<Option<ElectionId>> {
        let closed = self.manager.close_expired(Utc::now())?;
        if !closed.is_empty() {
            tracing::info!(count = closed.len(), "closed overdue elections on startup");
        }

        match self.manager.current_election()? {
            Some(election) => {
                self.schedule(&election)?;
                Ok(Some(election.id))
            }
            None => Ok(None),
        }
    }

    fn lock_timers(&self) -> Result<MutexGuard<'_, HashMap<ElectionId, Timer>>> {
        self.timers
            .lock()
            .map_err(|_| Error::internal("close timer table poisoned"))
    }
}

impl Drop for CloseScheduler {
    fn drop(&mut self) {
        if let Ok(mut timers) = self.timers.lock() {
            for (_, (_, cancel)) in timers.drain() {
                let _ = cancel.send(());
            }
        }
    }
}

fn until(at: DateTime<Utc>) -> std::time::Duration {
    (at - Utc::now()).to_std().unwrap_or_default()
}
