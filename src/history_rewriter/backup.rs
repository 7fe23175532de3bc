//! Backup refs and the operation journal (spec §6.3): the rollback mechanism a
//! transaction relies on from `BackupTaken` onward.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, RepositoryError};
use crate::model::CommitId;
use crate::repository::Repository;

const BACKUP_REF_PREFIX: &str = "refs/patchdance/backup";

/// The ref a transaction's backup is recorded under.
pub fn backup_ref_name(operation_id: &str) -> String {
    format!("{BACKUP_REF_PREFIX}/{operation_id}")
}

/// Record persisted to `.git/patchdance/journal/<operation_id>.json`, per spec §6.3:
/// `{original_head, original_refs, temp_files, timestamp}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalRecord {
    pub operation_id: String,
    pub original_head: CommitId,
    pub original_ref: String,
    pub temp_files: Vec<PathBuf>,
    pub timestamp: DateTime<Utc>,
}

/// Create a backup ref pointing at the current head, before any rewriting begins.
pub fn create_backup(
    repo: &dyn Repository,
    operation_id: &str,
    head: &CommitId,
) -> Result<(), EngineError> {
    repo.create_ref(&backup_ref_name(operation_id), head)?;
    Ok(())
}

/// Restore `branch` to the commit recorded under `operation_id`'s backup ref,
/// compare-and-swap against whatever `branch` currently points at.
pub fn restore_from_backup(
    repo: &dyn Repository,
    branch: &str,
    operation_id: &str,
) -> Result<(), EngineError> {
    let backup_ref = backup_ref_name(operation_id);
    // `commit_info` accepts anything git can resolve a commit from, including a ref
    // name, so the backup ref itself doubles as the lookup key (no separate
    // ref-resolution method is part of the Repository port).
    let backup_head = repo
        .commit_info(&CommitId::new(&backup_ref))
        .map(|c| c.id)
        .map_err(|_| RepositoryError::NotFound(backup_ref.clone()))?;
    let current = repo.head()?;
    repo.update_ref(branch, &current, &backup_head)?;
    Ok(())
}

/// A filesystem-backed `JournalRecord` store, grounded on the teacher's
/// `plan_store.rs` serde-persisted-file pattern.
pub trait JournalStore {
    fn save(&self, record: &JournalRecord) -> Result<(), EngineError>;
    fn load(&self, operation_id: &str) -> Result<Option<JournalRecord>, EngineError>;
    fn delete(&self, operation_id: &str) -> Result<(), EngineError>;
}

pub struct FileJournalStore {
    dir: PathBuf,
}

impl FileJournalStore {
    /// `dir` is typically `<repo>/.git/patchdance/journal`.
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    fn path(&self, operation_id: &str) -> PathBuf {
        self.dir.join(format!("{operation_id}.json"))
    }
}

impl JournalStore for FileJournalStore {
    fn save(&self, record: &JournalRecord) -> Result<(), EngineError> {
        fs::create_dir_all(&self.dir)?;
        let json = serde_json::to_string_pretty(record)
            .map_err(|e| EngineError::InvalidCommitId(format!("journal serialize failed: {e}")))?;
        fs::write(self.path(&record.operation_id), json)?;
        Ok(())
    }

    fn load(&self, operation_id: &str) -> Result<Option<JournalRecord>, EngineError> {
        let path = self.path(operation_id);
        if !path.exists() {
            return Ok(None);
        }
        let text = fs::read_to_string(path)?;
        let record = serde_json::from_str(&text)
            .map_err(|e| EngineError::InvalidCommitId(format!("journal parse failed: {e}")))?;
        Ok(Some(record))
    }

    fn delete(&self, operation_id: &str) -> Result<(), EngineError> {
        let path = self.path(operation_id);
        if path.exists() {
            fs::remove_file(path)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backup_ref_name_is_namespaced() {
        assert_eq!(
            backup_ref_name("op-1"),
            "refs/patchdance/backup/op-1"
        );
    }

    #[test]
    fn file_journal_store_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileJournalStore::new(dir.path());
        let record = JournalRecord {
            operation_id: "op-1".to_string(),
            original_head: CommitId::new("abc123"),
            original_ref: "refs/heads/main".to_string(),
            temp_files: vec![],
            timestamp: Utc::now(),
        };
        store.save(&record).unwrap();
        let loaded = store.load("op-1").unwrap().expect("record present");
        assert_eq!(loaded.original_head, CommitId::new("abc123"));

        store.delete("op-1").unwrap();
        assert!(store.load("op-1").unwrap().is_none());
    }

    #[test]
    fn missing_journal_record_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileJournalStore::new(dir.path());
        assert!(store.load("nonexistent").unwrap().is_none());
    }
}
