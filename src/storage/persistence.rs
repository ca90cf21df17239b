//! JSON file persistence
//!
//! The whole store is one JSON document. Every write serializes it to a
//! temporary file and renames it over the previous one, after rotating the
//! previous one into the backup chain.

use super::{EscrowStore, StoreError, StoreSnapshot};
use crate::escrow::record::EscrowRecord;
use crate::escrow::session::Session;
use async_trait::async_trait;
use log::{debug, info};
use std::fs;
use std::io::{BufReader, BufWriter};
use std::path::PathBuf;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Storage configuration
#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
    pub store_file: String,
    pub backup_enabled: bool,
    pub max_backups: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(".skillforge_data"),
            store_file: "escrow_store.json".to_string(),
            backup_enabled: true,
            max_backups: 5,
        }
    }
}

/// File-backed store
pub struct JsonFileStore {
    config: StorageConfig,
    state: RwLock<StoreSnapshot>,
}

impl JsonFileStore {
    /// Open the store, loading the existing document if there is one
    pub fn open(config: StorageConfig) -> Result<Self, StoreError> {
        fs::create_dir_all(&config.data_dir)?;
        let path = config.data_dir.join(&config.store_file);

        let snapshot = if path.exists() {
            let reader = BufReader::new(fs::File::open(&path)?);
            let snapshot: StoreSnapshot = serde_json::from_reader(reader)?;
            info!(
                "Loaded {} sessions and {} escrows from {}",
                snapshot.sessions.len(),
                snapshot.escrows.len(),
                path.display()
            );
            snapshot
        } else {
            StoreSnapshot::default()
        };

        Ok(Self {
            config,
            state: RwLock::new(snapshot),
        })
    }

    fn store_path(&self) -> PathBuf {
        self.config.data_dir.join(&self.config.store_file)
    }

    fn backup_path(&self, index: usize) -> PathBuf {
        self.config
            .data_dir
            .join(format!("{}.backup.{}", self.config.store_file, index))
    }

    fn save(&self, snapshot: &StoreSnapshot) -> Result<(), StoreError> {
        let path = self.store_path();

        if self.config.backup_enabled && self.config.max_backups > 0 && path.exists() {
            self.rotate_backups()?;
            fs::copy(&path, self.backup_path(0))?;
        }

        let temp_path = self.config.data_dir.join(format!("{}.tmp", self.config.store_file));
        {
            let writer = BufWriter::new(fs::File::create(&temp_path)?);
            serde_json::to_writer_pretty(writer, snapshot)?;
        }
        fs::rename(&temp_path, &path)?;
        debug!("Saved store to {}", path.display());
        Ok(())
    }

    fn rotate_backups(&self) -> Result<(), StoreError> {
        let oldest = self.backup_path(self.config.max_backups - 1);
        if oldest.exists() {
            fs::remove_file(&oldest)?;
        }

        for i in (0..self.config.max_backups - 1).rev() {
            let current = self.backup_path(i);
            if current.exists() {
                fs::rename(&current, self.backup_path(i + 1))?;
            }
        }
        Ok(())
    }

    /// Indices of the backups present on disk
    pub fn list_backups(&self) -> Vec<usize> {
        (0..self.config.max_backups)
            .filter(|i| self.backup_path(*i).exists())
            .collect()
    }

    /// Replace the in-memory state with a backup and persist it
    pub async fn restore_backup(&self, backup_index: usize) -> Result<(), StoreError> {
        let backup = self.backup_path(backup_index);
        if !backup.exists() {
            return Err(StoreError::InvalidData(format!(
                "Backup {} not found",
                backup_index
            )));
        }
        let reader = BufReader::new(fs::File::open(&backup)?);
        let snapshot: StoreSnapshot = serde_json::from_reader(reader)?;

        let mut state = self.state.write().await;
        self.save(&snapshot)?;
        *state = snapshot;
        Ok(())
    }

    pub async fn stats(&self) -> Result<StorageStats, StoreError> {
        let path = self.store_path();
        let file_size = if path.exists() {
            fs::metadata(&path)?.len()
        } else {
            0
        };
        let state = self.state.read().await;
        Ok(StorageStats {
            file_size,
            backup_count: self.list_backups().len(),
            sessions: state.sessions.len(),
            escrows: state.escrows.len(),
            data_dir: self.config.data_dir.clone(),
        })
    }
}

/// Storage statistics
#[derive(Debug)]
pub struct StorageStats {
    pub file_size: u64,
    pub backup_count: usize,
    pub sessions: usize,
    pub escrows: usize,
    pub data_dir: PathBuf,
}

#[async_trait]
impl EscrowStore for JsonFileStore {
    async fn get_session(&self, id: &Uuid) -> Result<Option<Session>, StoreError> {
        Ok(self.state.read().await.sessions.get(id).cloned())
    }

    async fn put_session(&self, session: &Session) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        let mut next = state.clone();
        next.put_session(session)?;
        self.save(&next)?;
        *state = next;
        Ok(())
    }

    async fn get_escrow(&self, session_id: &Uuid) -> Result<Option<EscrowRecord>, StoreError> {
        Ok(self.state.read().await.escrows.get(session_id).cloned())
    }

    async fn upsert_escrow(&self, record: &EscrowRecord) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        let mut next = state.clone();
        next.upsert_escrow(record)?;
        self.save(&next)?;
        *state = next;
        Ok(())
    }

    async fn list_sessions(&self) -> Result<Vec<Session>, StoreError> {
        Ok(self.state.read().await.sessions_by_age())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::escrow::session::{NewSession, SessionStatus};

    fn session(skill: &str) -> Session {
        Session::create(NewSession {
            learner_id: "addr_test1learner".into(),
            provider_id: "mentor".into(),
            skill: skill.into(),
            budget_lovelace: 10_000_000,
            duration_minutes: Some(45),
        })
    }

    fn config(dir: &tempfile::TempDir, max_backups: usize) -> StorageConfig {
        StorageConfig {
            data_dir: dir.path().to_path_buf(),
            max_backups,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_save_and_reopen() {
        let temp_dir = tempfile::tempdir().unwrap();
        let mut s = session("Rust");
        {
            let store = JsonFileStore::open(config(&temp_dir, 5)).unwrap();
            store.put_session(&s).await.unwrap();
            s.on_escrow_locked();
            store.put_session(&s).await.unwrap();
        }

        let reopened = JsonFileStore::open(config(&temp_dir, 5)).unwrap();
        let loaded = reopened.get_session(&s.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, SessionStatus::Active);
        assert_eq!(loaded.duration_minutes, 45);
    }

    #[tokio::test]
    async fn test_backup_rotation() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::open(config(&temp_dir, 3)).unwrap();

        for i in 0..5 {
            store.put_session(&session(&format!("skill-{}", i))).await.unwrap();
        }

        assert_eq!(store.list_backups(), vec![0, 1, 2]);
        let stats = store.stats().await.unwrap();
        assert_eq!(stats.sessions, 5);
        assert!(stats.file_size > 0);
    }

    #[tokio::test]
    async fn test_restore_backup() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::open(config(&temp_dir, 3)).unwrap();
        store.put_session(&session("one")).await.unwrap();
        store.put_session(&session("two")).await.unwrap();

        store.restore_backup(0).await.unwrap();
        assert_eq!(store.list_sessions().await.unwrap().len(), 1);
        assert!(store.restore_backup(2).await.is_err());
    }

    #[tokio::test]
    async fn test_rejected_write_not_persisted() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::open(config(&temp_dir, 0)).unwrap();
        let mut s = session("Rust");
        let stale = s.clone();
        s.on_escrow_locked();
        store.put_session(&s).await.unwrap();

        assert!(store.put_session(&stale).await.is_err());
        let reopened = JsonFileStore::open(config(&temp_dir, 0)).unwrap();
        assert_eq!(
            reopened.get_session(&s.id).await.unwrap().unwrap().status,
            SessionStatus::Active
        );
    }
}
