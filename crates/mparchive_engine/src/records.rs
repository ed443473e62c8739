use std::collections::BTreeMap;
use std::io;
use std::path::PathBuf;

use chrono::Utc;
use mparchive_core::{ArticleId, ArticleRecord, TransitionError};
use mparchive_logging::{archive_debug, archive_info};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::persist::{AtomicFileWriter, PersistError};

#[derive(Debug, thiserror::Error)]
pub enum RecordStoreError {
    #[error("article {0} not found")]
    NotFound(ArticleId),
    #[error("article {0} belongs to another user")]
    Forbidden(ArticleId),
    #[error(transparent)]
    Transition(#[from] TransitionError),
    #[error("record file io error: {0}")]
    Io(#[from] io::Error),
    #[error(transparent)]
    Persist(#[from] PersistError),
    #[error("record file is not valid json: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("record store task failed: {0}")]
    Task(String),
}

/// Persistence for article records, unique by canonical source URL.
#[async_trait::async_trait]
pub trait RecordStore: Send + Sync {
    /// Creates a `crawling` record for `source_url`, or restarts the existing one.
    async fn upsert_crawling(
        &self,
        source_url: &str,
        owner: Option<String>,
    ) -> Result<ArticleRecord, RecordStoreError>;
    async fn get(&self, id: ArticleId) -> Result<ArticleRecord, RecordStoreError>;
    async fn save(&self, record: &ArticleRecord) -> Result<(), RecordStoreError>;
    /// Records of `owner` (or anonymous ones for `None`), newest first.
    async fn list(&self, owner: Option<&str>) -> Result<Vec<ArticleRecord>, RecordStoreError>;
    async fn delete(&self, id: ArticleId, requester: Option<&str>) -> Result<(), RecordStoreError>;
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct RecordTable {
    next_id: ArticleId,
    records: BTreeMap<ArticleId, ArticleRecord>,
}

impl RecordTable {
    fn upsert_crawling(
        &mut self,
        source_url: &str,
        owner: Option<String>,
    ) -> Result<ArticleRecord, RecordStoreError> {
        let now = Utc::now();
        if let Some(existing) = self
            .records
            .values_mut()
            .find(|record| record.source_url == source_url)
        {
            existing.restart_ingest(owner, now)?;
            archive_info!("records: {} re-ingesting {}", existing.id, source_url);
            return Ok(existing.clone());
        }
        self.next_id += 1;
        let record = ArticleRecord::new_crawling(self.next_id, source_url, owner, now);
        archive_info!("records: article {} created for {}", record.id, source_url);
        self.records.insert(record.id, record.clone());
        Ok(record)
    }

    fn get(&self, id: ArticleId) -> Result<ArticleRecord, RecordStoreError> {
        self.records
            .get(&id)
            .cloned()
            .ok_or(RecordStoreError::NotFound(id))
    }

    fn save(&mut self, record: &ArticleRecord) -> Result<(), RecordStoreError> {
        let slot = self
            .records
            .get_mut(&record.id)
            .ok_or(RecordStoreError::NotFound(record.id))?;
        *slot = record.clone();
        archive_debug!("records: article {} saved as {}", record.id, record.status);
        Ok(())
    }

    fn list(&self, owner: Option<&str>) -> Vec<ArticleRecord> {
        let mut records: Vec<ArticleRecord> = self
            .records
            .values()
            .filter(|record| record.owner.as_deref() == owner)
            .cloned()
            .collect();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        records
    }

    fn delete(&mut self, id: ArticleId, requester: Option<&str>) -> Result<(), RecordStoreError> {
        let record = self.records.get(&id).ok_or(RecordStoreError::NotFound(id))?;
        if !record.can_be_deleted_by(requester) {
            return Err(RecordStoreError::Forbidden(id));
        }
        self.records.remove(&id);
        archive_info!("records: article {} deleted", id);
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct MemoryRecordStore {
    table: RwLock<RecordTable>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl RecordStore for MemoryRecordStore {
    async fn upsert_crawling(
        &self,
        source_url: &str,
        owner: Option<String>,
    ) -> Result<ArticleRecord, RecordStoreError> {
        self.table.write().await.upsert_crawling(source_url, owner)
    }

    async fn get(&self, id: ArticleId) -> Result<ArticleRecord, RecordStoreError> {
        self.table.read().await.get(id)
    }

    async fn save(&self, record: &ArticleRecord) -> Result<(), RecordStoreError> {
        self.table.write().await.save(record)
    }

    async fn list(&self, owner: Option<&str>) -> Result<Vec<ArticleRecord>, RecordStoreError> {
        Ok(self.table.read().await.list(owner))
    }

    async fn delete(
        &self,
        id: ArticleId,
        requester: Option<&str>,
    ) -> Result<(), RecordStoreError> {
        self.table.write().await.delete(id, requester)
    }
}

/// Record store backed by one JSON file, rewritten atomically on every change.
#[derive(Debug)]
pub struct FileRecordStore {
    path: PathBuf,
    writer: AtomicFileWriter,
    table: RwLock<RecordTable>,
}

impl FileRecordStore {
    /// Loads `path` if it exists; a missing file starts an empty table.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, RecordStoreError> {
        let path = path.into();
        let table = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(err) if err.kind() == io::ErrorKind::NotFound => RecordTable::default(),
            Err(err) => return Err(err.into()),
        };
        let dir = path
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));
        Ok(Self {
            writer: AtomicFileWriter::new(dir),
            path,
            table: RwLock::new(table),
        })
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    async fn flush(&self, table: &RecordTable) -> Result<(), RecordStoreError> {
        let json = serde_json::to_vec_pretty(table)?;
        let filename = self
            .path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "articles.json".to_string());
        let writer = self.writer.clone();
        tokio::task::spawn_blocking(move || writer.write(&filename, &json))
            .await
            .map_err(|err| RecordStoreError::Task(err.to_string()))??;
        Ok(())
    }

    /// Applies `change` to a copy of the table and swaps it in only once the
    /// file write succeeded, so memory never runs ahead of disk.
    async fn mutate<T>(
        &self,
        change: impl FnOnce(&mut RecordTable) -> Result<T, RecordStoreError>,
    ) -> Result<T, RecordStoreError> {
        let mut table = self.table.write().await;
        let mut next = table.clone();
        let result = change(&mut next)?;
        self.flush(&next).await?;
        *table = next;
        Ok(result)
    }
}

#[async_trait::async_trait]
impl RecordStore for FileRecordStore {
    async fn upsert_crawling(
        &self,
        source_url: &str,
        owner: Option<String>,
    ) -> Result<ArticleRecord, RecordStoreError> {
        self.mutate(|table| table.upsert_crawling(source_url, owner))
            .await
    }

    async fn get(&self, id: ArticleId) -> Result<ArticleRecord, RecordStoreError> {
        self.table.read().await.get(id)
    }

    async fn save(&self, record: &ArticleRecord) -> Result<(), RecordStoreError> {
        self.mutate(|table| table.save(record)).await
    }

    async fn list(&self, owner: Option<&str>) -> Result<Vec<ArticleRecord>, RecordStoreError> {
        Ok(self.table.read().await.list(owner))
    }

    async fn delete(
        &self,
        id: ArticleId,
        requester: Option<&str>,
    ) -> Result<(), RecordStoreError> {
        self.mutate(|table| table.delete(id, requester)).await
    }
}
