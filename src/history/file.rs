//! File-backed History Store
//!
//! One pretty-printed JSON file per record under the history directory,
//! named `{instance_id}.json`. Files are written to a temporary name and
//! renamed into place so a crash never leaves a half-written record.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use log::{debug, info, warn};
use tokio::fs;

use super::store::{HistoryRecord, HistoryStore};
use crate::error::{EngineError, Result};
use crate::instance::InstanceId;
use crate::workflow::DefinitionRef;

const RECORD_EXTENSION: &str = "json";

#[derive(Debug, Clone)]
pub struct FileHistoryStore {
    dir: PathBuf,
}

impl FileHistoryStore {
    /// Opens (creating if needed) a history directory.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).await?;
        info!("History directory: {}", dir.display());
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn record_path(&self, id: &InstanceId) -> PathBuf {
        self.dir.join(format!("{}.{}", id, RECORD_EXTENSION))
    }

    async fn read_record(path: &Path) -> Result<HistoryRecord> {
        let content = fs::read_to_string(path).await?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Loads every readable record. Corrupt files are skipped with a warning.
    async fn load_all(&self) -> Result<Vec<HistoryRecord>> {
        let mut records = Vec::new();
        let mut entries = fs::read_dir(&self.dir).await?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(RECORD_EXTENSION) {
                continue;
            }
            match Self::read_record(&path).await {
                Ok(record) => records.push(record),
                Err(e) => warn!("Skipping unreadable history file {}: {}", path.display(), e),
            }
        }

        Ok(records)
    }
}

#[async_trait]
impl HistoryStore for FileHistoryStore {
    async fn append(&self, record: HistoryRecord) -> Result<()> {
        let id = record.id();
        let path = self.record_path(&id);

        if fs::try_exists(&path).await? {
            return Err(EngineError::validation(format!(
                "History record {} already exists",
                id
            )));
        }

        let json = serde_json::to_string_pretty(&record)?;
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, json).await?;
        fs::rename(&tmp, &path).await?;

        debug!("Archived instance {} to {}", id, path.display());
        Ok(())
    }

    async fn get(&self, id: &InstanceId) -> Result<Option<HistoryRecord>> {
        let path = self.record_path(id);
        if !fs::try_exists(&path).await? {
            return Ok(None);
        }
        Self::read_record(&path).await.map(Some)
    }

    async fn records_for(&self, definition: &DefinitionRef) -> Result<Vec<HistoryRecord>> {
        let mut records = self.load_all().await?;
        records.retain(|r| &r.definition_ref() == definition);
        Ok(records)
    }

    async fn delete(&self, id: &InstanceId) -> Result<()> {
        match fs::remove_file(self.record_path(id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(EngineError::not_found("history record", id))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn clear(&self, definition: &DefinitionRef) -> Result<usize> {
        let mut removed = 0;
        for record in self.records_for(definition).await? {
            fs::remove_file(self.record_path(&record.id())).await?;
            removed += 1;
        }
        info!("Cleared {} history records of {}", removed, definition);
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::store::test_support::record;
    use crate::pagination::Pagination;
    use tempfile::TempDir;
    use uuid::Uuid;

    async fn open_temp() -> (TempDir, FileHistoryStore) {
        let dir = TempDir::new().unwrap();
        let store = FileHistoryStore::open(dir.path().join("history")).await.unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn test_append_writes_one_file() {
        let (_dir, store) = open_temp().await;
        let rec = record("Sample", 10);
        let id = rec.id();

        store.append(rec.clone()).await.unwrap();

        assert!(store.dir().join(format!("{}.json", id)).exists());
        assert_eq!(store.get(&id).await.unwrap(), Some(rec));
    }

    #[tokio::test]
    async fn test_append_twice_rejected() {
        let (_dir, store) = open_temp().await;
        let rec = record("Sample", 10);
        store.append(rec.clone()).await.unwrap();

        let err = store.append(rec).await.unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }

    #[tokio::test]
    async fn test_get_missing_is_none() {
        let (_dir, store) = open_temp().await;
        assert_eq!(store.get(&Uuid::new_v4()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_query_skips_corrupt_files() {
        let (_dir, store) = open_temp().await;
        store.append(record("Sample", 10)).await.unwrap();
        std::fs::write(store.dir().join("broken.json"), "{not json").unwrap();

        let page = store
            .query(&DefinitionRef::new("core", "Sample", "1.0.0"), &Pagination::default())
            .await
            .unwrap();
        assert_eq!(page.items.len(), 1);
    }

    #[tokio::test]
    async fn test_delete_and_clear() {
        let (_dir, store) = open_temp().await;
        let first = record("Sample", 1);
        let first_id = first.id();
        store.append(first).await.unwrap();
        store.append(record("Sample", 2)).await.unwrap();
        store.append(record("Other", 3)).await.unwrap();

        store.delete(&first_id).await.unwrap();
        assert!(matches!(
            store.delete(&first_id).await,
            Err(EngineError::NotFound { .. })
        ));

        let removed = store
            .clear(&DefinitionRef::new("core", "Sample", "1.0.0"))
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert_eq!(
            store
                .records_for(&DefinitionRef::new("core", "Other", "1.0.0"))
                .await
                .unwrap()
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn test_reopen_sees_existing_records() {
        let (dir, store) = open_temp().await;
        let rec = record("Sample", 10);
        let id = rec.id();
        store.append(rec).await.unwrap();

        let reopened = FileHistoryStore::open(dir.path().join("history")).await.unwrap();
        assert!(reopened.get(&id).await.unwrap().is_some());
    }
}
