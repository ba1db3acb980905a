//! Boundaries to the collaborators the engine does not own: the role
//! resolver, the metadata fetcher and the notification sink.

use crate::election::ElectionResult;
use crate::types::{BookId, BookMetadata, Circle, ElectionId, MemberId};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Mutex, RwLock};

/// Resolves which voting circle a member belongs to
pub trait RoleResolver: Send + Sync {
    /// `None` when the member is in neither circle
    fn circle_of(&self, member: &MemberId) -> Option<Circle>;
}

/// Turns nomination input (typically a store link) into book metadata
pub trait MetadataFetcher: Send + Sync {
    fn fetch(&self, input: &str) -> impl Future<Output = Result<BookMetadata>> + Send;
}

/// Events published by the engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Notification {
    ElectionOpened {
        election_id: ElectionId,
        ballot: Vec<(BookId, String)>,
        closes_at: DateTime<Utc>,
    },
    ElectionClosed(ElectionResult),
    ClosingReminder {
        election_id: ElectionId,
        closes_at: DateTime<Utc>,
    },
}

/// Fire-and-forget receiver of engine events
pub trait NotificationSink: Send + Sync {
    fn notify(&self, notification: Notification);
}

/// Role table held in memory, refreshed by whoever syncs the chat roles
#[derive(Debug, Default)]
pub struct RoleTable {
    members: RwLock<HashMap<MemberId, Circle>>,
}

impl RoleTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn assign(&self, member: impl Into<MemberId>, circle: Circle) -> Result<()> {
        self.members
            .write()
            .map_err(|_| Error::internal("role table write error"))?
            .insert(member.into(), circle);
        Ok(())
    }

    pub fn revoke(&self, member: &MemberId) -> Result<Option<Circle>> {
        Ok(self
            .members
            .write()
            .map_err(|_| Error::internal("role table write error"))?
            .remove(member))
    }
}

impl RoleResolver for RoleTable {
    fn circle_of(&self, member: &MemberId) -> Option<Circle> {
        self.members.read().ok()?.get(member).copied()
    }
}

/// Sink that only writes events to the log
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl NotificationSink for LogSink {
    fn notify(&self, notification: Notification) {
        match &notification {
            Notification::ElectionOpened { election_id, ballot, .. } => {
                tracing::info!(%election_id, ballot_size = ballot.len(), "election opened");
            }
            Notification::ElectionClosed(result) => {
                tracing::info!(
                    election_id = %result.election_id,
                    winner = %result.winner_title,
                    "election closed"
                );
            }
            Notification::ClosingReminder { election_id, closes_at } => {
                tracing::info!(%election_id, %closes_at, "election closing soon");
            }
        }
    }
}

/// Sink that keeps every event, for tests and replay
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<Notification>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<Notification> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }
}

impl NotificationSink for RecordingSink {
    fn notify(&self, notification: Notification) {
        if let Ok(mut events) = self.events.lock() {
            events.push(notification);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_role_table() {
        let roles = RoleTable::new();
        roles.assign("alice", Circle::Inner).unwrap();
        roles.assign("bob", Circle::Outer).unwrap();

        assert_eq!(roles.circle_of(&"alice".to_string()), Some(Circle::Inner));
        assert_eq!(roles.circle_of(&"bob".to_string()), Some(Circle::Outer));
        assert_eq!(roles.circle_of(&"carol".to_string()), None);

        assert_eq!(roles.revoke(&"bob".to_string()).unwrap(), Some(Circle::Outer));
        assert_eq!(roles.circle_of(&"bob".to_string()), None);
    }

    #[test]
    fn test_recording_sink() {
        let sink = RecordingSink::new();
        let reminder = Notification::ClosingReminder {
            election_id: Uuid::new_v4(),
            closes_at: Utc::now(),
        };
        sink.notify(reminder.clone());
        LogSink.notify(reminder.clone());

        assert_eq!(sink.events(), vec![reminder]);
    }

    #[test]
    fn test_notification_serialization() {
        let reminder = Notification::ClosingReminder {
            election_id: Uuid::nil(),
            closes_at: Utc::now(),
        };
        let json = serde_json::to_value(&reminder).unwrap();
        assert_eq!(json["event"], "closing_reminder");
    }
}
