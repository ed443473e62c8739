use mparchive_engine::{FetchSettings, HttpRenderer, RenderError, Renderer, DESKTOP_USER_AGENT};
use pretty_assertions::assert_eq;
use wiremock::matchers::{header_exists, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn static_renderer_returns_decoded_html() {
    let server = MockServer::start().await;
    let body = r#"<div id="js_content"><p>正文</p></div>"#;
    let response = ResponseTemplate::new(200).set_body_raw(body, "text/html; charset=utf-8");
    Mock::given(method("GET"))
        .and(path("/s/abc"))
        .and(header_exists("user-agent"))
        .respond_with(response)
        .mount(&server)
        .await;

    let renderer = HttpRenderer::new(FetchSettings::default()).unwrap();
    let url = format!("{}/s/abc", server.uri());
    let page = renderer.render(&url).await.unwrap();
    assert_eq!(page.final_url, url);
    assert!(page.html.contains("正文"));

    // The agent string contains commas, so it is compared whole here.
    let requests = server.received_requests().await.unwrap();
    let user_agent = requests[0].headers.get("user-agent").unwrap();
    assert_eq!(user_agent.to_str().unwrap(), DESKTOP_USER_AGENT);
}

#[tokio::test]
async fn legacy_charsets_are_decoded() {
    let server = MockServer::start().await;
    let (bytes, _, _) = encoding_rs::GBK.encode("<p>微信文章</p>");
    let body = bytes.into_owned();
    let response = ResponseTemplate::new(200).set_body_raw(body, "text/html; charset=gbk");
    Mock::given(method("GET"))
        .and(path("/gbk"))
        .respond_with(response)
        .mount(&server)
        .await;

    let renderer = HttpRenderer::new(FetchSettings::default()).unwrap();
    let url = format!("{}/gbk", server.uri());
    let page = renderer.render(&url).await.unwrap();
    assert_eq!(page.html, "<p>微信文章</p>");
}

#[tokio::test]
async fn error_statuses_fail_the_render() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let renderer = HttpRenderer::new(FetchSettings::default()).unwrap();
    let url = format!("{}/missing", server.uri());
    let err = renderer.render(&url).await.unwrap_err();
    assert!(matches!(err, RenderError::HttpStatus(404)));
}

#[tokio::test]
async fn non_html_bodies_are_rejected() {
    let server = MockServer::start().await;
    let png = vec![0x89, b'P', b'N', b'G'];
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(png, "image/png"))
        .mount(&server)
        .await;

    let renderer = HttpRenderer::new(FetchSettings::default()).unwrap();
    let err = renderer.render(&server.uri()).await.unwrap_err();
    assert!(matches!(err, RenderError::UnsupportedContentType(_)));
}

#[tokio::test]
async fn oversized_bodies_are_rejected() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_raw("x".repeat(2048), "text/html"))
        .mount(&server)
        .await;

    let settings = FetchSettings {
        max_bytes: 1024,
        ..FetchSettings::default()
    };
    let renderer = HttpRenderer::new(settings).unwrap();
    let err = renderer.render(&server.uri()).await.unwrap_err();
    assert!(matches!(err, RenderError::TooLarge { max_bytes: 1024, .. }));
}

#[tokio::test]
async fn malformed_urls_are_rejected_before_any_request() {
    let renderer = HttpRenderer::new(FetchSettings::default()).unwrap();
    let err = renderer.render("not a url").await.unwrap_err();
    assert!(matches!(err, RenderError::InvalidUrl(_)));
}
