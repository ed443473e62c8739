use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use mparchive_core::ArticleRecord;
use mparchive_logging::{archive_debug, archive_info, archive_warn};
use regex::Regex;

use crate::feishu::{FeishuClient, FeishuCredentials, FeishuError, ImportState, DEFAULT_BASE_URL};
use crate::filename::document_filename;
use crate::frontmatter::strip_frontmatter;
use crate::localize::replace_longest_first;
use crate::store::{key_from_reference, AssetStore, AssetStoreError};
use crate::tokens::{DelegatedTokens, TenantTokenCache, TokenError};

#[derive(Debug, Clone)]
pub struct PublishSettings {
    pub base_url: String,
    pub http_timeout: Duration,
    pub poll_interval: Duration,
    pub max_poll_attempts: u32,
    /// Subtracted from the tenant token lifetime.
    pub token_safety_margin: Duration,
    /// Delegated tokens this close to expiry are refreshed first.
    pub user_refresh_window: Duration,
    pub assets_folder_name: String,
    /// Prefix marking references into the local asset store.
    pub public_prefix: String,
}

impl Default for PublishSettings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            http_timeout: Duration::from_secs(10),
            poll_interval: Duration::from_secs(2),
            max_poll_attempts: 30,
            token_safety_margin: Duration::from_secs(300),
            user_refresh_window: Duration::from_secs(300),
            assets_folder_name: "WeChat_Assets".to_string(),
            public_prefix: "/uploads".to_string(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("invalid publisher settings: {0}")]
    Config(String),
    #[error("article {0} has no local content to publish")]
    NotPublishable(mparchive_core::ArticleId),
    #[error("authentication failed: {0}")]
    Auth(#[from] TokenError),
    #[error("upload of {what} failed: {source}")]
    Upload {
        what: String,
        #[source]
        source: FeishuError,
    },
    #[error("import failed: {0}")]
    Import(String),
    #[error("import did not finish after {attempts} polls")]
    ImportTimeout { attempts: u32 },
    #[error("workspace call failed: {0}")]
    Api(#[from] FeishuError),
    #[error("reading local asset failed: {0}")]
    Store(#[from] AssetStoreError),
    #[error("staging upload file failed: {0}")]
    Staging(#[from] std::io::Error),
}

/// Pushes stored articles into the document workspace.
pub struct Publisher {
    client: FeishuClient,
    tenant: TenantTokenCache,
    delegated: Option<DelegatedTokens>,
    assets: Arc<dyn AssetStore>,
    local_image: Regex,
    settings: PublishSettings,
}

impl Publisher {
    pub fn new(
        credentials: FeishuCredentials,
        settings: PublishSettings,
        assets: Arc<dyn AssetStore>,
    ) -> Result<Self, PublishError> {
        let client = FeishuClient::new(&settings.base_url, settings.http_timeout)?;
        let pattern = format!(
            r"!\[[^\]]*\]\(\s*({}/[^\s)]+)\s*\)",
            regex::escape(settings.public_prefix.trim_end_matches('/'))
        );
        let local_image =
            Regex::new(&pattern).map_err(|err| PublishError::Config(err.to_string()))?;
        Ok(Self {
            client,
            tenant: TenantTokenCache::new(credentials, settings.token_safety_margin),
            delegated: None,
            assets,
            local_image,
            settings,
        })
    }

    /// Enables per-owner delegated tokens.
    pub fn with_delegated_tokens(mut self, delegated: DelegatedTokens) -> Self {
        self.delegated = Some(delegated);
        self
    }

    pub fn settings(&self) -> &PublishSettings {
        &self.settings
    }

    /// OAuth callback half: trades `code` for a token pair and stores it for `owner`.
    pub async fn exchange_user_code(&self, owner: &str, code: &str) -> Result<(), PublishError> {
        let delegated = self.delegated.as_ref().ok_or(TokenError::NotConfigured)?;
        let grant = self
            .client
            .exchange_code(self.tenant.credentials(), code)
            .await
            .map_err(TokenError::from)?;
        delegated.save_grant(owner, &grant).await?;
        archive_info!("publish: stored delegated token for {}", owner);
        Ok(())
    }

    /// Imports the record's content as a native document and returns its URL.
    /// Status bookkeeping is the caller's job.
    pub async fn publish(&self, record: &ArticleRecord) -> Result<String, PublishError> {
        let content = record
            .content
            .as_deref()
            .filter(|content| !content.trim().is_empty())
            .ok_or(PublishError::NotPublishable(record.id))?;

        let token = self.access_token(record.owner.as_deref()).await?;
        let root = self.client.root_folder(&token).await?;
        let assets_folder = self.ensure_assets_folder(&token, &root).await?;

        let body = self.upload_images(&token, &assets_folder, content).await?;
        let body = strip_frontmatter(&body);

        let file_name = document_filename(&record.title);
        let file_token = self.upload_document(&token, &root, &file_name, body).await?;
        let title = file_name.trim_end_matches(".md");
        let ticket = self
            .client
            .create_import_task(&token, &file_token, title, &root)
            .await
            .map_err(|err| PublishError::Import(err.to_string()))?;
        archive_info!("publish: article {} import ticket {}", record.id, ticket);

        self.poll_import(&token, &ticket).await
    }

    /// Delegated token of `owner` when usable, otherwise the service token.
    async fn access_token(&self, owner: Option<&str>) -> Result<String, TokenError> {
        if let (Some(owner), Some(delegated)) = (owner, self.delegated.as_ref()) {
            match delegated
                .access_token(&self.client, self.tenant.credentials(), owner)
                .await
            {
                Ok(token) => return Ok(token),
                Err(err) => {
                    archive_warn!("publish: delegated token for {} unusable: {}", owner, err);
                }
            }
        }
        self.tenant.token(&self.client).await
    }

    async fn ensure_assets_folder(&self, token: &str, root: &str) -> Result<String, PublishError> {
        let name = self.settings.assets_folder_name.as_str();
        let entries = self.client.list_folder(token, root).await?;
        if let Some(existing) = entries
            .into_iter()
            .find(|entry| entry.name == name && entry.kind == "folder")
        {
            archive_debug!("publish: reusing assets folder {}", existing.token);
            return Ok(existing.token);
        }
        let created = self.client.create_folder(token, root, name).await?;
        archive_info!("publish: created assets folder {}", created);
        Ok(created)
    }

    /// Re-uploads every local image and swaps its reference for the workspace file token.
    async fn upload_images(
        &self,
        token: &str,
        folder: &str,
        content: &str,
    ) -> Result<String, PublishError> {
        let references: BTreeSet<&str> = self
            .local_image
            .captures_iter(content)
            .filter_map(|caps| caps.get(1).map(|m| m.as_str()))
            .collect();

        let mut replacements = Vec::with_capacity(references.len());
        for reference in references {
            let Some(key) = key_from_reference(&self.settings.public_prefix, reference) else {
                continue;
            };
            let bytes = match self.assets.read(key).await {
                Ok(bytes) => bytes,
                Err(AssetStoreError::NotFound(_)) => {
                    archive_warn!("publish: local asset {} missing, kept as is", reference);
                    continue;
                }
                Err(err) => return Err(err.into()),
            };
            let name = key.rsplit('/').next().unwrap_or(key);
            let file_token = self
                .client
                .upload_file(token, folder, name, bytes)
                .await
                .map_err(|source| PublishError::Upload {
                    what: reference.to_string(),
                    source,
                })?;
            archive_debug!("publish: {} -> {}", reference, file_token);
            replacements.push((reference, file_token));
        }

        let pairs = replacements
            .iter()
            .map(|(reference, file_token)| (*reference, file_token.as_str()))
            .collect();
        Ok(replace_longest_first(content, pairs))
    }

    /// The Markdown goes through a temp file that is removed on every path.
    async fn upload_document(
        &self,
        token: &str,
        folder: &str,
        file_name: &str,
        body: &str,
    ) -> Result<String, PublishError> {
        let staged = tempfile::Builder::new()
            .prefix("mparchive_sync_")
            .suffix(".md")
            .tempfile()?;
        tokio::fs::write(staged.path(), body).await?;
        let bytes = tokio::fs::read(staged.path()).await?;

        let result = self
            .client
            .upload_file(token, folder, file_name, bytes)
            .await
            .map_err(|source| PublishError::Upload {
                what: file_name.to_string(),
                source,
            });
        drop(staged);
        result
    }

    async fn poll_import(&self, token: &str, ticket: &str) -> Result<String, PublishError> {
        let attempts = self.settings.max_poll_attempts;
        for attempt in 1..=attempts {
            tokio::time::sleep(self.settings.poll_interval).await;
            let job = self
                .client
                .import_result(token, ticket)
                .await
                .map_err(|err| PublishError::Import(err.to_string()))?;
            match job.state() {
                ImportState::Succeeded => {
                    archive_info!("publish: import {} finished: {}", ticket, job.url);
                    return Ok(job.url);
                }
                ImportState::Failed => {
                    return Err(PublishError::Import(format!(
                        "status {}: {}",
                        job.job_status, job.job_error_msg
                    )));
                }
                ImportState::InProgress => {
                    archive_debug!("publish: {} pending ({}/{})", ticket, attempt, attempts);
                }
            }
        }
        Err(PublishError::ImportTimeout { attempts })
    }
}
