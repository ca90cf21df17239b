//! In-memory store

use super::{EscrowStore, StoreError, StoreSnapshot};
use crate::escrow::record::EscrowRecord;
use crate::escrow::session::Session;
use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<StoreSnapshot>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EscrowStore for MemoryStore {
    async fn get_session(&self, id: &Uuid) -> Result<Option<Session>, StoreError> {
        Ok(self.state.read().await.sessions.get(id).cloned())
    }

    async fn put_session(&self, session: &Session) -> Result<(), StoreError> {
        self.state.write().await.put_session(session)
    }

    async fn get_escrow(&self, session_id: &Uuid) -> Result<Option<EscrowRecord>, StoreError> {
        Ok(self.state.read().await.escrows.get(session_id).cloned())
    }

    async fn upsert_escrow(&self, record: &EscrowRecord) -> Result<(), StoreError> {
        self.state.write().await.upsert_escrow(record)
    }

    async fn list_sessions(&self) -> Result<Vec<Session>, StoreError> {
        Ok(self.state.read().await.sessions_by_age())
    }
}
