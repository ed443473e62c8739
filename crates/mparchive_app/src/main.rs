use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::LevelFilter;
use mparchive_core::ArticleId;
use mparchive_engine::{
    ArticleMarkdownConverter, AssetStore, ChromeRenderer, DelegatedTokens, EngineConfig,
    FileRecordStore, FileUserTokenStore, FsAssetStore, HttpRenderer, Localizer, Pipeline, Publisher,
    Renderer, RendererKind, TokenCipher, WeChatExtractor,
};
use mparchive_logging::{archive_info, LogDestination};

#[derive(Parser)]
#[command(name = "mparchive")]
#[command(about = "Archive WeChat articles locally and publish them to Feishu")]
#[command(version)]
struct Cli {
    /// Also write logs to this file
    #[arg(long, env = "MPARCHIVE_LOG_FILE")]
    log_file: Option<PathBuf>,

    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Render, clean, convert and localize an article
    Ingest {
        url: String,
        /// Owner id recorded on the article
        owner: Option<String>,
    },
    /// Publish a stored article as a Feishu document
    Sync { id: ArticleId },
    /// List archived articles of an owner (anonymous ones when omitted)
    List { owner: Option<String> },
    /// Store the delegated token of an owner from an OAuth authorization code
    Authorize { owner: String, code: String },
    /// Delete an article
    Delete {
        id: ArticleId,
        /// Requesting owner; anonymous articles need none
        requester: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let level = if cli.verbose { LevelFilter::Debug } else { LevelFilter::Info };
    let destination = match cli.log_file.clone() {
        Some(path) => LogDestination::Both(path),
        None => LogDestination::Terminal,
    };
    mparchive_logging::initialize(destination, level);

    let config = EngineConfig::from_env().context("reading configuration")?;
    let pipeline = build_pipeline(&config).await?;

    match cli.command {
        Commands::Ingest { url, owner } => {
            let outcome = pipeline.process_article(&url, owner.as_deref()).await?;
            println!("article {} {}", outcome.article_id, outcome.status);
        }
        Commands::Sync { id } => {
            let outcome = pipeline.sync_article(id).await?;
            println!("article {} synced: {}", id, outcome.document_url);
        }
        Commands::List { owner } => {
            for record in pipeline.list_articles(owner.as_deref()).await? {
                println!(
                    "{}\t{}\t{}\t{}",
                    record.id, record.status, record.title, record.source_url
                );
            }
        }
        Commands::Authorize { owner, code } => {
            pipeline.authorize_owner(&owner, &code).await?;
            println!("stored token for {owner}");
        }
        Commands::Delete { id, requester } => {
            pipeline.delete_article(id, requester.as_deref()).await?;
            println!("article {id} deleted");
        }
    }
    Ok(())
}

async fn build_pipeline(config: &EngineConfig) -> Result<Pipeline> {
    let renderer: Arc<dyn Renderer> = match config.renderer {
        RendererKind::Chrome => Arc::new(ChromeRenderer::new(config.render.clone())),
        RendererKind::Http => Arc::new(HttpRenderer::new(config.fetch.clone())?),
    };
    let assets: Arc<dyn AssetStore> = Arc::new(FsAssetStore::new(config.upload_dir.clone()));
    let records = FileRecordStore::open(config.records_path.clone())
        .await
        .with_context(|| format!("opening {}", config.records_path.display()))?;
    let localizer = Localizer::new(config.localize.clone(), assets.clone())?;

    let mut pipeline = Pipeline::new(
        renderer,
        Arc::new(WeChatExtractor::new(config.noise.clone())),
        Arc::new(ArticleMarkdownConverter::new(config.emoji.clone())),
        localizer,
        Arc::new(records),
    );

    if let Some(credentials) = config.feishu.clone() {
        let mut publisher = Publisher::new(credentials, config.publish.clone(), assets)?;
        if let Some(key) = config.encryption_key.as_deref() {
            let delegated = DelegatedTokens::new(
                Arc::new(FileUserTokenStore::open(config.tokens_path.clone()).await?),
                TokenCipher::from_hex_key(key)?,
                config.publish.user_refresh_window,
            );
            publisher = publisher.with_delegated_tokens(delegated);
        }
        pipeline = pipeline.with_publisher(publisher);
        archive_info!("app: publishing to {}", config.publish.base_url);
    }
    Ok(pipeline)
}
