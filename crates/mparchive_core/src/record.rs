use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{transition, ArticleStatus, LifecycleEvent, Metadata, TransitionError};

pub type ArticleId = u64;

/// Title shown while the first render is still in flight.
pub const PENDING_TITLE: &str = "Processing...";

/// One archived article, keyed by its canonical source URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArticleRecord {
    pub id: ArticleId,
    pub source_url: String,
    pub title: String,
    pub author: String,
    pub account_name: String,
    pub publish_date: Option<DateTime<Utc>>,
    /// Markdown document with local asset references.
    pub content: Option<String>,
    pub thumbnail: Option<String>,
    pub document_url: Option<String>,
    /// `None` means the article was archived anonymously.
    pub owner: Option<String>,
    pub status: ArticleStatus,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ArticleRecord {
    pub fn new_crawling(
        id: ArticleId,
        source_url: impl Into<String>,
        owner: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            source_url: source_url.into(),
            title: PENDING_TITLE.to_string(),
            author: String::new(),
            account_name: String::new(),
            publish_date: None,
            content: None,
            thumbnail: None,
            document_url: None,
            owner,
            status: ArticleStatus::Crawling,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Restarts ingestion on an existing record. An anonymous re-ingest keeps
    /// the current owner.
    pub fn restart_ingest(
        &mut self,
        owner: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<(), TransitionError> {
        self.apply(LifecycleEvent::IngestStarted, now)?;
        if owner.is_some() {
            self.owner = owner;
        }
        self.last_error = None;
        Ok(())
    }

    pub fn apply_metadata(&mut self, metadata: &Metadata, now: DateTime<Utc>) {
        self.title = metadata.title.clone();
        self.author = metadata.author.clone();
        self.account_name = metadata.account_name.clone();
        self.publish_date = metadata.publish_instant();
        self.thumbnail = Some(metadata.cover_image.clone()).filter(|c| !c.is_empty());
        self.updated_at = now;
    }

    pub fn mark_stored(
        &mut self,
        content: String,
        now: DateTime<Utc>,
    ) -> Result<(), TransitionError> {
        self.apply(LifecycleEvent::IngestSucceeded, now)?;
        self.content = Some(content);
        Ok(())
    }

    pub fn mark_error(
        &mut self,
        message: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<(), TransitionError> {
        self.apply(LifecycleEvent::IngestFailed, now)?;
        self.last_error = Some(message.into());
        Ok(())
    }

    pub fn begin_sync(&mut self, now: DateTime<Utc>) -> Result<(), TransitionError> {
        self.apply(LifecycleEvent::SyncStarted, now)
    }

    pub fn mark_synced(
        &mut self,
        document_url: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<(), TransitionError> {
        self.apply(LifecycleEvent::SyncSucceeded, now)?;
        self.document_url = Some(document_url.into());
        self.last_error = None;
        Ok(())
    }

    /// Publish failed: back to `stored`, content untouched.
    pub fn revert_sync(
        &mut self,
        message: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<(), TransitionError> {
        self.apply(LifecycleEvent::SyncFailed, now)?;
        self.last_error = Some(message.into());
        Ok(())
    }

    /// Anonymous records may be removed by anyone; owned ones only by their owner.
    pub fn can_be_deleted_by(&self, requester: Option<&str>) -> bool {
        match self.owner.as_deref() {
            None => true,
            Some(owner) => requester == Some(owner),
        }
    }

    fn apply(&mut self, event: LifecycleEvent, now: DateTime<Utc>) -> Result<(), TransitionError> {
        self.status = transition(self.status, event)?;
        self.updated_at = now;
        Ok(())
    }
}
