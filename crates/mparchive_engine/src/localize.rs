use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use bytes::Bytes;
use chrono::Utc;
use futures_util::future::join_all;
use mparchive_logging::{archive_debug, archive_info, archive_trace, archive_warn};
use regex::Regex;
use reqwest::header::REFERER;
use sha2::{Digest, Sha256};

use crate::render::DESKTOP_USER_AGENT;
use crate::store::{AssetStore, AssetStoreError};
use crate::transcode::{stored_extension, transcode, TranscodeError};

/// Image references whose target is an absolute remote URL.
static REMOTE_IMAGE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"!\[[^\]]*\]\(\s*(https?://[^\s)]+)\s*\)").expect("valid remote image regex")
});

#[derive(Debug, Clone)]
pub struct LocalizeSettings {
    pub download_timeout: Duration,
    pub user_agent: String,
    /// Sent with every download; the image CDN rejects requests without it.
    pub referer: String,
    pub max_dimension: u32,
    pub quality: f32,
    /// Hex characters of the SHA-256 digest kept in the blob name.
    pub hash_len: usize,
    pub public_prefix: String,
    /// Replaces the URL of an image that failed to download. `None` keeps the remote URL.
    pub failure_placeholder: Option<String>,
}

impl Default for LocalizeSettings {
    fn default() -> Self {
        Self {
            download_timeout: Duration::from_secs(15),
            user_agent: DESKTOP_USER_AGENT.to_string(),
            referer: "https://mp.weixin.qq.com/".to_string(),
            max_dimension: 1920,
            quality: 80.0,
            hash_len: 16,
            public_prefix: "/uploads".to_string(),
            failure_placeholder: None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AssetDownloadError {
    #[error("download of {url} failed: {message}")]
    Network { url: String, message: String },
    #[error("download of {url} timed out")]
    Timeout { url: String },
    #[error("download of {url} returned http {status}")]
    HttpStatus { url: String, status: u16 },
    #[error("download of {url} returned no bytes")]
    Empty { url: String },
    #[error("image {url} could not be transcoded: {source}")]
    Transcode {
        url: String,
        #[source]
        source: TranscodeError,
    },
    #[error("image {url} could not be stored: {source}")]
    Store {
        url: String,
        #[source]
        source: AssetStoreError,
    },
}

/// Result of one localization pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocalizedMarkdown {
    pub markdown: String,
    /// Remote URL to local reference, for every image that was localized.
    pub replaced: HashMap<String, String>,
    /// Blobs newly written to the store.
    pub written: usize,
    /// Blobs that already existed and were reused.
    pub reused: usize,
    pub failed: Vec<String>,
}

/// Downloads remote images referenced by Markdown into the content-addressed
/// asset store and rewrites the references to local paths.
pub struct Localizer {
    client: reqwest::Client,
    settings: LocalizeSettings,
    store: Arc<dyn AssetStore>,
}

impl Localizer {
    pub fn new(
        settings: LocalizeSettings,
        store: Arc<dyn AssetStore>,
    ) -> Result<Self, AssetDownloadError> {
        let client = reqwest::Client::builder()
            .timeout(settings.download_timeout)
            .user_agent(settings.user_agent.clone())
            .build()
            .map_err(|err| AssetDownloadError::Network {
                url: String::new(),
                message: err.to_string(),
            })?;
        Ok(Self {
            client,
            settings,
            store,
        })
    }

    pub fn settings(&self) -> &LocalizeSettings {
        &self.settings
    }

    pub async fn localize(&self, markdown: &str) -> LocalizedMarkdown {
        let urls = remote_image_urls(markdown);
        if urls.is_empty() {
            return LocalizedMarkdown {
                markdown: markdown.to_string(),
                ..LocalizedMarkdown::default()
            };
        }
        archive_info!("localize: {} remote image(s)", urls.len());

        let downloads = join_all(urls.iter().map(|url| self.download(url))).await;

        let mut report = LocalizedMarkdown::default();
        // Same bytes under different URLs resolve to one reference.
        let mut by_hash: HashMap<String, String> = HashMap::new();
        for (url, downloaded) in urls.into_iter().zip(downloads) {
            let outcome = match downloaded {
                Ok(bytes) => self.store_blob(&url, bytes, &mut by_hash, &mut report).await,
                Err(err) => Err(err),
            };
            match outcome {
                Ok(reference) => {
                    report.replaced.insert(url, reference);
                }
                Err(err) => {
                    archive_warn!("localize: {}", err);
                    report.failed.push(url);
                }
            }
        }

        let mut replacements: Vec<(&str, &str)> = report
            .replaced
            .iter()
            .map(|(url, reference)| (url.as_str(), reference.as_str()))
            .collect();
        if let Some(placeholder) = self.settings.failure_placeholder.as_deref() {
            replacements.extend(report.failed.iter().map(|url| (url.as_str(), placeholder)));
        }
        report.markdown = replace_longest_first(markdown, replacements);
        report
    }

    async fn download(&self, url: &str) -> Result<Bytes, AssetDownloadError> {
        let map_err = |err: reqwest::Error| {
            if err.is_timeout() {
                AssetDownloadError::Timeout {
                    url: url.to_string(),
                }
            } else {
                AssetDownloadError::Network {
                    url: url.to_string(),
                    message: err.to_string(),
                }
            }
        };
        archive_trace!("localize: GET {}", url);
        let response = self
            .client
            .get(url)
            .header(REFERER, self.settings.referer.as_str())
            .send()
            .await
            .map_err(map_err)?;
        let status = response.status();
        if !status.is_success() {
            return Err(AssetDownloadError::HttpStatus {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        let bytes = response.bytes().await.map_err(map_err)?;
        if bytes.is_empty() {
            return Err(AssetDownloadError::Empty {
                url: url.to_string(),
            });
        }
        Ok(bytes)
    }

    async fn store_blob(
        &self,
        url: &str,
        bytes: Bytes,
        by_hash: &mut HashMap<String, String>,
        report: &mut LocalizedMarkdown,
    ) -> Result<String, AssetDownloadError> {
        let hash = content_hash(&bytes, self.settings.hash_len);
        if let Some(reference) = by_hash.get(&hash) {
            archive_debug!("localize: {} repeats an earlier image", url);
            return Ok(reference.clone());
        }

        let key = format!(
            "{}/{}.{}",
            Utc::now().format("%Y/%m"),
            hash,
            stored_extension(&bytes)
        );
        let store_err = |source| AssetDownloadError::Store {
            url: url.to_string(),
            source,
        };

        if self.store.exists(&key).await.map_err(store_err)? {
            archive_debug!("localize: reusing {} for {}", key, url);
            report.reused += 1;
        } else {
            let (max_dimension, quality) = (self.settings.max_dimension, self.settings.quality);
            let job = move || transcode(&bytes, max_dimension, quality);
            let encoded = tokio::task::spawn_blocking(job)
                .await
                .map_err(|err| store_err(AssetStoreError::Task(err.to_string())))?
                .map_err(|source| AssetDownloadError::Transcode {
                    url: url.to_string(),
                    source,
                })?;
            self.store
                .write(&key, encoded.bytes)
                .await
                .map_err(store_err)?;
            archive_debug!("localize: stored {} for {}", key, url);
            report.written += 1;
        }

        let prefix = self.settings.public_prefix.trim_end_matches('/');
        let reference = format!("{}/{}", prefix, key);
        by_hash.insert(hash, reference.clone());
        Ok(reference)
    }
}

/// Distinct remote image URLs, sorted for stable logging.
pub fn remote_image_urls(markdown: &str) -> Vec<String> {
    REMOTE_IMAGE
        .captures_iter(markdown)
        .filter_map(|caps| caps.get(1).map(|m| m.as_str().to_string()))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Lowercase hex SHA-256 of `bytes`, truncated to `len` characters.
pub fn content_hash(bytes: &[u8], len: usize) -> String {
    let digest = Sha256::digest(bytes);
    let mut hex = hex::encode(digest);
    hex.truncate(len);
    hex
}

/// Replaces every occurrence of each key; longer keys go first so a URL that
/// prefixes another never clobbers it.
pub(crate) fn replace_longest_first(text: &str, mut replacements: Vec<(&str, &str)>) -> String {
    replacements.sort_by(|a, b| b.0.len().cmp(&a.0.len()).then_with(|| a.0.cmp(b.0)));
    replacements
        .into_iter()
        .fold(text.to_string(), |acc, (from, to)| acc.replace(from, to))
}
