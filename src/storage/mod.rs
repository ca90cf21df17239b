//! Session and escrow persistence
//!
//! Records are keyed by session id. Writes are upserts that refuse to move
//! a status backward, so a late or duplicated update can never undo a
//! newer one.

pub mod memory;
pub mod persistence;

use crate::escrow::record::{EscrowRecord, EscrowStatus};
use crate::escrow::session::{Session, SessionStatus};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io;
use thiserror::Error;
use uuid::Uuid;

pub use memory::MemoryStore;
pub use persistence::{JsonFileStore, StorageConfig, StorageStats};

/// Storage errors
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    IoError(#[from] io::Error),
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
    #[error("Invalid data: {0}")]
    InvalidData(String),
    #[error("Refusing to move {what} {id} from {stored} back to {attempted}")]
    Regression {
        what: &'static str,
        id: Uuid,
        stored: String,
        attempted: String,
    },
}

/// Persistent store for sessions and their escrow records
#[async_trait]
pub trait EscrowStore: Send + Sync {
    async fn get_session(&self, id: &Uuid) -> Result<Option<Session>, StoreError>;

    /// Insert or replace, unless the stored status is further along
    async fn put_session(&self, session: &Session) -> Result<(), StoreError>;

    async fn get_escrow(&self, session_id: &Uuid) -> Result<Option<EscrowRecord>, StoreError>;

    /// Insert or replace, unless the stored status is further along
    async fn upsert_escrow(&self, record: &EscrowRecord) -> Result<(), StoreError>;

    async fn list_sessions(&self) -> Result<Vec<Session>, StoreError>;
}

/// Everything a store holds, in the shape it is serialized
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreSnapshot {
    pub sessions: BTreeMap<Uuid, Session>,
    pub escrows: BTreeMap<Uuid, EscrowRecord>,
}

impl StoreSnapshot {
    pub fn put_session(&mut self, session: &Session) -> Result<(), StoreError> {
        if let Some(stored) = self.sessions.get(&session.id) {
            check_forward("session", session.id, stored.status, session.status)?;
        }
        self.sessions.insert(session.id, session.clone());
        Ok(())
    }

    pub fn upsert_escrow(&mut self, record: &EscrowRecord) -> Result<(), StoreError> {
        if let Some(stored) = self.escrows.get(&record.session_id) {
            check_forward("escrow", record.session_id, stored.status, record.status)?;
        }
        self.escrows.insert(record.session_id, record.clone());
        Ok(())
    }

    pub fn sessions_by_age(&self) -> Vec<Session> {
        let mut sessions: Vec<Session> = self.sessions.values().cloned().collect();
        sessions.sort_by_key(|s| (s.created_at, s.id));
        sessions
    }
}

/// Statuses that can be compared for progress
trait Progress: Ord + Copy + ToString {}
impl Progress for SessionStatus {}
impl Progress for EscrowStatus {}

fn check_forward<S: Progress>(
    what: &'static str,
    id: Uuid,
    stored: S,
    attempted: S,
) -> Result<(), StoreError> {
    if attempted < stored {
        return Err(StoreError::Regression {
            what,
            id,
            stored: stored.to_string(),
            attempted: attempted.to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::datum::EscrowDatum;
    use crate::core::transaction::OutRef;
    use crate::escrow::session::NewSession;

    fn session() -> Session {
        Session::create(NewSession {
            learner_id: "l".into(),
            provider_id: "p".into(),
            skill: "Rust".into(),
            budget_lovelace: 1,
            duration_minutes: None,
        })
    }

    #[test]
    fn test_session_regression_rejected() {
        let mut snapshot = StoreSnapshot::default();
        let mut s = session();
        let stale = s.clone();
        s.on_escrow_locked();
        snapshot.put_session(&s).unwrap();

        let err = snapshot.put_session(&stale).unwrap_err();
        assert!(matches!(err, StoreError::Regression { what: "session", .. }));
        assert_eq!(snapshot.sessions[&s.id].status, SessionStatus::Active);
    }

    #[test]
    fn test_escrow_same_status_rewrites() {
        let mut snapshot = StoreSnapshot::default();
        let id = Uuid::new_v4();
        let datum = EscrowDatum::new([1; 28], [2; 28], 5, &id, [3; 28]);
        let mut record = EscrowRecord::pending(id, "a", "b", datum);
        snapshot.upsert_escrow(&record).unwrap();

        record.price_lovelace = 6;
        snapshot.upsert_escrow(&record).unwrap();
        assert_eq!(snapshot.escrows[&id].price_lovelace, 6);

        let pending = record.clone();
        record.on_tx_observed(OutRef::new([1; 32], 0));
        snapshot.upsert_escrow(&record).unwrap();
        assert!(snapshot.upsert_escrow(&pending).is_err());
    }
}
