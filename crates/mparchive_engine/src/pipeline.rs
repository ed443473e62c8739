use std::sync::Arc;

use chrono::Utc;
use mparchive_core::{
    canonical_source_url, ArticleId, ArticleRecord, ArticleStatus, SourceUrlError, TransitionError,
};
use mparchive_logging::{archive_error, archive_info, archive_warn};

use crate::convert::Converter;
use crate::extract::{ExtractError, Extractor};
use crate::frontmatter::build_article_document;
use crate::localize::Localizer;
use crate::publish::{PublishError, Publisher};
use crate::records::{RecordStore, RecordStoreError};
use crate::render::{RenderError, Renderer};

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    InvalidUrl(#[from] SourceUrlError),
    #[error("render failed: {0}")]
    Render(#[from] RenderError),
    #[error(transparent)]
    Extract(#[from] ExtractError),
    #[error(transparent)]
    Records(#[from] RecordStoreError),
    #[error(transparent)]
    Transition(#[from] TransitionError),
    #[error("publish failed: {0}")]
    Publish(#[from] PublishError),
    #[error("publishing is not configured")]
    PublisherDisabled,
    #[error("article {id} is {status} and cannot be published")]
    NotPublishable {
        id: ArticleId,
        status: ArticleStatus,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestOutcome {
    pub article_id: ArticleId,
    pub status: ArticleStatus,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncOutcome {
    pub article_id: ArticleId,
    pub document_url: String,
}

/// Ingestion (render, extract, transcode, localize) and explicit publishing,
/// with the record status kept in step.
pub struct Pipeline {
    renderer: Arc<dyn Renderer>,
    extractor: Arc<dyn Extractor>,
    converter: Arc<dyn Converter>,
    localizer: Localizer,
    records: Arc<dyn RecordStore>,
    publisher: Option<Publisher>,
}

impl Pipeline {
    pub fn new(
        renderer: Arc<dyn Renderer>,
        extractor: Arc<dyn Extractor>,
        converter: Arc<dyn Converter>,
        localizer: Localizer,
        records: Arc<dyn RecordStore>,
    ) -> Self {
        Self {
            renderer,
            extractor,
            converter,
            localizer,
            records,
            publisher: None,
        }
    }

    pub fn with_publisher(mut self, publisher: Publisher) -> Self {
        self.publisher = Some(publisher);
        self
    }

    pub fn records(&self) -> &Arc<dyn RecordStore> {
        &self.records
    }

    pub fn publisher(&self) -> Option<&Publisher> {
        self.publisher.as_ref()
    }

    /// Archives `url` locally. Re-ingesting a URL reuses its record.
    /// Never publishes.
    pub async fn process_article(
        &self,
        url: &str,
        owner: Option<&str>,
    ) -> Result<IngestOutcome, PipelineError> {
        let canonical = canonical_source_url(url)?;
        let mut record = self
            .records
            .upsert_crawling(&canonical, owner.map(str::to_string))
            .await?;
        archive_info!("pipeline: article {} crawling {}", record.id, canonical);

        match self.ingest(&mut record).await {
            Ok(()) => {
                archive_info!("pipeline: article {} stored", record.id);
                Ok(IngestOutcome {
                    article_id: record.id,
                    status: record.status,
                })
            }
            Err(err) => {
                archive_error!("pipeline: article {} failed: {}", record.id, err);
                self.record_failure(&mut record, &err).await;
                Err(err)
            }
        }
    }

    async fn ingest(&self, record: &mut ArticleRecord) -> Result<(), PipelineError> {
        let page = self.renderer.render(&record.source_url).await?;
        let metadata = self.extractor.extract_metadata(&page.html);
        let fragment = self.extractor.extract_content(&page.html)?;

        record.apply_metadata(&metadata, Utc::now());
        self.records.save(record).await?;

        let body = self.converter.to_markdown(&fragment);
        let document = build_article_document(&metadata, &record.source_url, &body);
        let localized = self.localizer.localize(&document).await;
        if !localized.failed.is_empty() {
            archive_warn!(
                "pipeline: article {} kept {} remote image(s)",
                record.id,
                localized.failed.len()
            );
        }

        record.mark_stored(localized.markdown, Utc::now())?;
        self.records.save(record).await?;
        Ok(())
    }

    async fn record_failure(&self, record: &mut ArticleRecord, err: &PipelineError) {
        if let Err(transition) = record.mark_error(err.to_string(), Utc::now()) {
            archive_warn!("pipeline: {} not marked failed: {}", record.id, transition);
            return;
        }
        if let Err(save) = self.records.save(record).await {
            archive_error!("pipeline: {} failure not saved: {}", record.id, save);
        }
    }

    /// Publishes a stored article. A failed attempt returns it to `stored`.
    pub async fn sync_article(&self, id: ArticleId) -> Result<SyncOutcome, PipelineError> {
        let publisher = self
            .publisher
            .as_ref()
            .ok_or(PipelineError::PublisherDisabled)?;
        let mut record = self.records.get(id).await?;
        if !matches!(record.status, ArticleStatus::Stored | ArticleStatus::Synced)
            || record.content.is_none()
        {
            return Err(PipelineError::NotPublishable {
                id,
                status: record.status,
            });
        }

        record.begin_sync(Utc::now())?;
        self.records.save(&record).await?;
        archive_info!("pipeline: article {} syncing", id);

        match publisher.publish(&record).await {
            Ok(document_url) => {
                record.mark_synced(document_url.clone(), Utc::now())?;
                self.records.save(&record).await?;
                archive_info!("pipeline: article {} synced to {}", id, document_url);
                Ok(SyncOutcome {
                    article_id: id,
                    document_url,
                })
            }
            Err(err) => {
                archive_warn!("pipeline: article {} sync failed: {}", id, err);
                record.revert_sync(err.to_string(), Utc::now())?;
                self.records.save(&record).await?;
                Err(err.into())
            }
        }
    }

    pub async fn article(&self, id: ArticleId) -> Result<ArticleRecord, PipelineError> {
        Ok(self.records.get(id).await?)
    }

    pub async fn list_articles(
        &self,
        owner: Option<&str>,
    ) -> Result<Vec<ArticleRecord>, PipelineError> {
        Ok(self.records.list(owner).await?)
    }

    pub async fn delete_article(
        &self,
        id: ArticleId,
        requester: Option<&str>,
    ) -> Result<(), PipelineError> {
        Ok(self.records.delete(id, requester).await?)
    }

    /// Stores the delegated token of `owner` from an OAuth code.
    pub async fn authorize_owner(&self, owner: &str, code: &str) -> Result<(), PipelineError> {
        let publisher = self
            .publisher
            .as_ref()
            .ok_or(PipelineError::PublisherDisabled)?;
        Ok(publisher.exchange_user_code(owner, code).await?)
    }
}
