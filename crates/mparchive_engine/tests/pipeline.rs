use std::io::Cursor;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use image::{ImageFormat, Rgba, RgbaImage};
use mparchive_core::ArticleStatus;
use mparchive_engine::{
    content_hash, key_from_reference, ArticleMarkdownConverter, AssetStore, FsAssetStore,
    LocalizeSettings, Localizer, MemoryAssetStore, MemoryRecordStore, Pipeline, PipelineError,
    RecordStore, RenderError, RenderedPage, Renderer, WeChatExtractor,
};
use pretty_assertions::assert_eq;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Serves canned pages in order, repeating the last one.
struct CannedRenderer {
    pages: Mutex<Vec<String>>,
}

impl CannedRenderer {
    fn new(pages: Vec<String>) -> Self {
        Self {
            pages: Mutex::new(pages),
        }
    }
}

#[async_trait::async_trait]
impl Renderer for CannedRenderer {
    async fn render(&self, url: &str) -> Result<RenderedPage, RenderError> {
        let mut pages = self.pages.lock().unwrap();
        let html = if pages.len() > 1 {
            pages.remove(0)
        } else {
            pages.first().cloned().unwrap_or_default()
        };
        Ok(RenderedPage {
            html,
            final_url: url.to_string(),
        })
    }
}

struct FailingRenderer;

#[async_trait::async_trait]
impl Renderer for FailingRenderer {
    async fn render(&self, url: &str) -> Result<RenderedPage, RenderError> {
        Err(RenderError::Timeout {
            url: url.to_string(),
            timeout: std::time::Duration::from_secs(60),
        })
    }
}

fn page(title: &str, image_url: Option<&str>) -> String {
    let image = image_url
        .map(|url| format!(r#"<p><img data-src="{url}" data-w="640" alt="配图"></p>"#))
        .unwrap_or_default();
    format!(
        r#"<html><head><meta property="og:image" content="https://mmbiz.qpic.cn/cover.jpg"></head><body>
        <h1 id="activity-name">{title}</h1>
        <a id="js_name">测试号</a>
        <script>var ct = "1700000000";</script>
        <div id="js_content">
            <p>正文第一段。</p>
            {image}
            <p>分享</p>
        </div></body></html>"#
    )
}

fn png_fixture() -> Vec<u8> {
    let img = RgbaImage::from_pixel(32, 20, Rgba([40, 90, 160, 255]));
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, ImageFormat::Png).unwrap();
    out.into_inner()
}

fn build_pipeline(
    renderer: Arc<dyn Renderer>,
    assets: Arc<dyn AssetStore>,
    records: Arc<dyn RecordStore>,
) -> Pipeline {
    Pipeline::new(
        renderer,
        Arc::new(WeChatExtractor::default()),
        Arc::new(ArticleMarkdownConverter::default()),
        Localizer::new(LocalizeSettings::default(), assets).unwrap(),
        records,
    )
}

const ARTICLE_URL: &str = "https://mp.weixin.qq.com/s/abc123";

#[tokio::test]
async fn ingest_stores_markdown_with_one_local_image() {
    mparchive_logging::initialize_for_tests();
    let server = MockServer::start().await;
    let png = png_fixture();
    Mock::given(method("GET"))
        .and(path("/img/1.png"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(png.clone(), "image/png"))
        .mount(&server)
        .await;

    let temp = TempDir::new().unwrap();
    let assets = Arc::new(FsAssetStore::new(temp.path()));
    let records = Arc::new(MemoryRecordStore::new());
    let image_url = format!("{}/img/1.png", server.uri());
    let html = page("测试文章", Some(image_url.as_str()));
    let renderer = Arc::new(CannedRenderer::new(vec![html]));
    let pipeline = build_pipeline(renderer, assets.clone(), records.clone());

    let outcome = pipeline
        .process_article(ARTICLE_URL, Some("alice"))
        .await
        .unwrap();
    assert_eq!(outcome.status, ArticleStatus::Stored);

    let record = records.get(outcome.article_id).await.unwrap();
    assert_eq!(record.title, "测试文章");
    assert_eq!(record.account_name, "测试号");
    assert_eq!(record.owner.as_deref(), Some("alice"));
    assert_eq!(
        record.thumbnail.as_deref(),
        Some("https://mmbiz.qpic.cn/cover.jpg")
    );
    assert!(record.publish_date.is_some());

    let content = record.content.unwrap();
    assert!(content.starts_with("---\ntitle: \"测试文章\""));
    assert!(content.contains("正文第一段。"));
    assert!(!content.contains("分享"));
    assert!(!content.contains(&server.uri()));

    let references: Vec<&str> = content
        .match_indices("/uploads/")
        .map(|(start, _)| {
            let rest = &content[start..];
            &rest[..rest.find(')').unwrap()]
        })
        .collect();
    assert_eq!(references.len(), 1);
    let key = key_from_reference("/uploads", references[0]).unwrap();
    assert!(key.contains(&content_hash(&png, 16)));
    assert!(assets.path_for(key).unwrap().is_file());
}

#[tokio::test]
async fn reingest_reuses_the_record_and_overwrites_metadata() {
    let records = Arc::new(MemoryRecordStore::new());
    let renderer = CannedRenderer::new(vec![page("第一版", None), page("第二版", None)]);
    let assets = Arc::new(MemoryAssetStore::new());
    let pipeline = build_pipeline(Arc::new(renderer), assets, records.clone());

    let first = pipeline.process_article(ARTICLE_URL, None).await.unwrap();
    let second = pipeline
        .process_article(&format!("  {ARTICLE_URL}#comments "), None)
        .await
        .unwrap();
    assert_eq!(first.article_id, second.article_id);

    let all = records.list(None).await.unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].title, "第二版");
    assert_eq!(all[0].status, ArticleStatus::Stored);
}

#[tokio::test]
async fn reingest_recovers_an_article_left_syncing() {
    let records = Arc::new(MemoryRecordStore::new());
    let renderer = CannedRenderer::new(vec![page("第一版", None), page("第二版", None)]);
    let assets = Arc::new(MemoryAssetStore::new());
    let pipeline = build_pipeline(Arc::new(renderer), assets, records.clone());

    let first = pipeline.process_article(ARTICLE_URL, None).await.unwrap();
    // A publish attempt that died before reverting leaves the record syncing.
    let mut record = records.get(first.article_id).await.unwrap();
    record.begin_sync(Utc::now()).unwrap();
    records.save(&record).await.unwrap();

    let second = pipeline.process_article(ARTICLE_URL, None).await.unwrap();
    assert_eq!(second.article_id, first.article_id);
    assert_eq!(second.status, ArticleStatus::Stored);
    let record = records.get(first.article_id).await.unwrap();
    assert_eq!(record.title, "第二版");
    assert_eq!(record.status, ArticleStatus::Stored);
}

#[tokio::test]
async fn render_failure_marks_record_as_error() {
    let records = Arc::new(MemoryRecordStore::new());
    let pipeline = build_pipeline(
        Arc::new(FailingRenderer),
        Arc::new(MemoryAssetStore::new()),
        records.clone(),
    );

    let err = pipeline
        .process_article(ARTICLE_URL, None)
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::Render(RenderError::Timeout { .. })));

    let all = records.list(None).await.unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].status, ArticleStatus::Error);
    assert!(all[0].last_error.as_deref().unwrap().contains("timed out"));
}

#[tokio::test]
async fn missing_content_marks_record_as_error() {
    let records = Arc::new(MemoryRecordStore::new());
    let html = r#"<html><body><h1 id="activity-name">x</h1></body></html>"#;
    let renderer = CannedRenderer::new(vec![html.to_string()]);
    let pipeline = build_pipeline(
        Arc::new(renderer),
        Arc::new(MemoryAssetStore::new()),
        records.clone(),
    );

    let err = pipeline
        .process_article(ARTICLE_URL, None)
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::Extract(_)));
    let all = records.list(None).await.unwrap();
    assert_eq!(all[0].status, ArticleStatus::Error);
}

#[tokio::test]
async fn invalid_urls_create_no_record() {
    let records = Arc::new(MemoryRecordStore::new());
    let pipeline = build_pipeline(
        Arc::new(FailingRenderer),
        Arc::new(MemoryAssetStore::new()),
        records.clone(),
    );
    let err = pipeline
        .process_article("ftp://mp.weixin.qq.com/s/x", None)
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::InvalidUrl(_)));
    assert!(records.list(None).await.unwrap().is_empty());
}

#[tokio::test]
async fn sync_without_publisher_is_rejected() {
    let records = Arc::new(MemoryRecordStore::new());
    let pipeline = build_pipeline(
        Arc::new(FailingRenderer),
        Arc::new(MemoryAssetStore::new()),
        records,
    );
    assert!(matches!(
        pipeline.sync_article(1).await,
        Err(PipelineError::PublisherDisabled)
    ));
}
