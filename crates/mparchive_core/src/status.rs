use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle status of an archived article.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArticleStatus {
    Crawling,
    Stored,
    Syncing,
    Synced,
    Error,
}

impl ArticleStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ArticleStatus::Crawling => "crawling",
            ArticleStatus::Stored => "stored",
            ArticleStatus::Syncing => "syncing",
            ArticleStatus::Synced => "synced",
            ArticleStatus::Error => "error",
        }
    }
}

impl fmt::Display for ArticleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// Ingestion (re)started for the source URL.
    IngestStarted,
    /// Content extracted and localized.
    IngestSucceeded,
    /// Any render/extract/convert/localize failure.
    IngestFailed,
    /// Explicit publish requested.
    SyncStarted,
    /// Import job finished with a document URL.
    SyncSucceeded,
    /// Publish attempt failed; the local copy stays authoritative.
    SyncFailed,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("illegal transition from {from} on {event:?}")]
pub struct TransitionError {
    pub from: ArticleStatus,
    pub event: LifecycleEvent,
}

/// Pure lifecycle transition:
/// `crawling -> stored -> (syncing -> {synced | stored})`, `crawling -> error`.
///
/// Re-ingestion restarts from any state, including a `syncing` record whose
/// publish attempt never finished.
pub fn transition(
    from: ArticleStatus,
    event: LifecycleEvent,
) -> Result<ArticleStatus, TransitionError> {
    use ArticleStatus::*;
    use LifecycleEvent::*;

    let next = match (from, event) {
        (_, IngestStarted) => Some(Crawling),
        (Crawling, IngestSucceeded) => Some(Stored),
        (Crawling, IngestFailed) => Some(Error),
        (Stored | Synced, SyncStarted) => Some(Syncing),
        (Syncing, SyncSucceeded) => Some(Synced),
        (Syncing, SyncFailed) => Some(Stored),
        _ => None,
    };

    next.ok_or(TransitionError { from, event })
}
