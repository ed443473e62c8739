use mparchive_core::EmojiRules;
use mparchive_engine::{
    build_article_document, strip_frontmatter, ArticleMarkdownConverter, Converter, ExtractError,
    Extractor, WeChatExtractor,
};
use pretty_assertions::assert_eq;

const ARTICLE: &str = r#"
<html><head>
<meta property="og:title" content="OG Title">
<meta property="og:site_name" content="站点">
<meta property="og:image" content="https://mmbiz.qpic.cn/cover.jpg">
</head><body>
<h1 id="activity-name">
    测试文章
</h1>
<a id="js_name"> 公众号名 </a>
<script>var ct = "1700000000";</script>
<div id="js_content">
  <p>第一段正文。</p>
  <script>alert(1)</script>
  <style>p { color: red }</style>
  <p><img data-src="https://mmbiz.qpic.cn/real.png" src="data:image/gif;base64,R0lGOD"></p>
  <p>分享</p>
  <p>分享这篇文章的原因是PLACEHOLDER</p>
  <div class="qr_code_pc_outer">扫码关注</div>
  <section><span>往期推荐</span></section>
</div>
</body></html>
"#;

fn article() -> String {
    ARTICLE.replace("PLACEHOLDER", &"很".repeat(290))
}

#[test]
fn metadata_prefers_dedicated_elements() {
    let meta = WeChatExtractor::default().extract_metadata(&article());
    assert_eq!(meta.title, "测试文章");
    assert_eq!(meta.author, "公众号名");
    assert_eq!(meta.account_name, "公众号名");
    assert_eq!(meta.publish_date, "2023-11-14T22:13:20.000Z");
    assert_eq!(meta.cover_image, "https://mmbiz.qpic.cn/cover.jpg");
}

#[test]
fn metadata_falls_back_to_meta_tags_and_empty_strings() {
    let html = r#"<html><head>
        <meta property="og:title" content="OG Title">
        <meta property="og:site_name" content="站点">
        </head><body></body></html>"#;
    let meta = WeChatExtractor::default().extract_metadata(html);
    assert_eq!(meta.title, "OG Title");
    assert_eq!(meta.account_name, "站点");
    assert_eq!(meta.author, "");
    assert_eq!(meta.publish_date, "");
    assert_eq!(meta.cover_image, "");
}

#[test]
fn publish_time_variable_wins_over_ct() {
    let html = r#"<script>var ct = "1600000000"; var publish_time = "1700000000";</script>"#;
    let meta = WeChatExtractor::default().extract_metadata(html);
    assert_eq!(meta.publish_date, "2023-11-14T22:13:20.000Z");
}

#[test]
fn content_is_cleaned_of_scripts_boilerplate_and_noise() {
    let content = WeChatExtractor::default()
        .extract_content(&article())
        .unwrap();
    assert!(content.contains("第一段正文。"));
    assert!(!content.contains("alert"));
    assert!(!content.contains("color: red"));
    assert!(!content.contains("扫码关注"));
    assert!(!content.contains("往期推荐"));
    assert!(!content.contains("<p>分享</p>"));
    assert!(content.contains("分享这篇文章的原因是"));
}

#[test]
fn lazy_sources_are_promoted() {
    let content = WeChatExtractor::default()
        .extract_content(&article())
        .unwrap();
    assert!(content.contains(r#"src="https://mmbiz.qpic.cn/real.png""#));
    assert!(!content.contains("data:image/gif"));
}

#[test]
fn missing_container_is_an_error() {
    let err = WeChatExtractor::default()
        .extract_content("<html><body><p>nothing</p></body></html>")
        .unwrap_err();
    assert_eq!(
        err,
        ExtractError::ContentNotFound {
            selector: "#js_content".to_string()
        }
    );
}

#[test]
fn empty_container_is_valid() {
    let content = WeChatExtractor::default()
        .extract_content(r#"<div id="js_content"></div>"#)
        .unwrap();
    assert_eq!(content, "");
}

#[test]
fn layout_wrappers_collapse_and_links_survive_styling() {
    let html = concat!(
        r#"<section><p>Hello <strong>bold</strong> "#,
        r#"<a href="https://example.com" style="color:red">link</a></p></section>"#,
        r#"<section><section><img src="https://mmbiz.qpic.cn/a.png" data-w="800" alt="图">"#,
        "</section></section>"
    );
    let md = ArticleMarkdownConverter::default().to_markdown(html);
    assert_eq!(
        md,
        "Hello **bold** [link](https://example.com)\n\n![图](https://mmbiz.qpic.cn/a.png)"
    );
}

#[test]
fn small_images_are_marked_as_emoji() {
    let converter = ArticleMarkdownConverter::new(EmojiRules::default());
    let sized = r#"<p><img src="https://mmbiz.qpic.cn/a.png" data-w="80"></p>"#;
    let md = converter.to_markdown(sized);
    assert_eq!(md, "![emoji:image](https://mmbiz.qpic.cn/a.png)");

    let sticker = r#"<img src="https://res.wx.qq.com/mmemoticon/1.png" alt="[微笑]">"#;
    let md = converter.to_markdown(sticker);
    assert_eq!(md, "![emoji:微笑](https://res.wx.qq.com/mmemoticon/1.png)");
}

#[test]
fn headings_lists_and_quotes() {
    let html = concat!(
        "<h2>小标题</h2><ul><li>一</li><li><section>二</section></li></ul>",
        "<blockquote><p>引用</p></blockquote>"
    );
    let md = ArticleMarkdownConverter::default().to_markdown(html);
    assert_eq!(md, "## 小标题\n\n- 一\n- 二\n\n> 引用");
}

#[test]
fn anchors_without_href_keep_their_text() {
    let md = ArticleMarkdownConverter::default().to_markdown("<p><a>plain</a> text</p>");
    assert_eq!(md, "plain text");
}

#[test]
fn document_header_round_trips_through_strip() {
    let meta = WeChatExtractor::default().extract_metadata(&article());
    let doc = build_article_document(&meta, "https://mp.weixin.qq.com/s/abc", "body text");
    assert!(doc.starts_with("---\ntitle: \"测试文章\"\n"));
    assert!(doc.contains("date: \"2023-11-14T22:13:20.000Z\"\n"));
    assert_eq!(strip_frontmatter(&doc), "body text");
}
