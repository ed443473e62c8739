//! Archive engine: rendering, extraction, localization, persistence and publishing.
mod config;
mod convert;
mod decode;
mod extract;
mod feishu;
mod fetch;
mod filename;
mod frontmatter;
mod localize;
mod persist;
mod pipeline;
mod publish;
mod records;
mod render;
mod store;
mod tokens;
mod transcode;

pub use config::{ConfigError, EngineConfig, RendererKind};
pub use convert::{ArticleMarkdownConverter, Converter};
pub use decode::{decode_html, DecodeError, DecodedHtml};
pub use extract::{ExtractError, Extractor, WeChatExtractor, CONTENT_SELECTOR};
pub use feishu::{
    FeishuClient, FeishuCredentials, FeishuError, FolderEntry, ImportJob, ImportState, TenantToken,
    UserTokenGrant, DEFAULT_BASE_URL,
};
pub use fetch::{FetchSettings, HttpRenderer};
pub use filename::{document_filename, MAX_TITLE_CHARS};
pub use frontmatter::{build_article_document, strip_frontmatter};
pub use localize::{
    content_hash, remote_image_urls, AssetDownloadError, LocalizeSettings, LocalizedMarkdown,
    Localizer,
};
pub use persist::{ensure_dir, AtomicFileWriter, PersistError};
pub use pipeline::{IngestOutcome, Pipeline, PipelineError, SyncOutcome};
pub use publish::{PublishError, PublishSettings, Publisher};
pub use records::{FileRecordStore, MemoryRecordStore, RecordStore, RecordStoreError};
pub use render::{
    ChromeRenderer, RenderError, RenderSettings, RenderedPage, Renderer, DESKTOP_USER_AGENT,
};
pub use store::{key_from_reference, AssetStore, AssetStoreError, FsAssetStore, MemoryAssetStore};
pub use tokens::{
    DelegatedTokens, FileUserTokenStore, MemoryUserTokenStore, StoredUserToken, TenantTokenCache,
    TokenCipher, TokenError, UserTokenStore,
};
pub use transcode::{
    is_animated_format, stored_extension, transcode, TranscodeError, TranscodedImage,
};
