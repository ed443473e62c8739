use std::io::Cursor;
use std::sync::Arc;

use image::{ImageFormat, Rgba, RgbaImage};
use mparchive_engine::{
    content_hash, key_from_reference, AssetStore, FsAssetStore, LocalizeSettings, Localizer,
    MemoryAssetStore,
};
use pretty_assertions::assert_eq;
use tempfile::TempDir;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn png_fixture(color: [u8; 4]) -> Vec<u8> {
    let img = RgbaImage::from_pixel(24, 16, Rgba(color));
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, ImageFormat::Png).unwrap();
    out.into_inner()
}

async fn serve(server: &MockServer, route: &str, bytes: Vec<u8>, mime: &str) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(ResponseTemplate::new(200).set_body_raw(bytes, mime))
        .mount(server)
        .await;
}

fn localizer(store: Arc<dyn AssetStore>) -> Localizer {
    Localizer::new(LocalizeSettings::default(), store).unwrap()
}

#[tokio::test]
async fn identical_bytes_are_stored_once() {
    let server = MockServer::start().await;
    let png = png_fixture([10, 20, 30, 255]);
    serve(&server, "/a.png", png.clone(), "image/png").await;
    serve(&server, "/b.png", png.clone(), "image/png").await;

    let store = Arc::new(MemoryAssetStore::new());
    let localizer = localizer(store.clone());
    let markdown = format!("![a]({0}/a.png)\n\n![b]({0}/b.png)", server.uri());

    let first = localizer.localize(&markdown).await;
    assert_eq!(first.written, 1);
    assert_eq!(store.write_count(), 1);
    let hash = content_hash(&png, 16);
    let reference = first.replaced[&format!("{}/a.png", server.uri())].clone();
    assert!(reference.starts_with("/uploads/"));
    assert!(reference.ends_with(&format!("/{hash}.webp")));
    assert_eq!(
        first.markdown,
        format!("![a]({reference})\n\n![b]({reference})")
    );

    let second = localizer.localize(&markdown).await;
    assert_eq!(second.written, 0);
    assert_eq!(second.reused, 1);
    assert_eq!(store.write_count(), 1);
    assert_eq!(second.markdown, first.markdown);
}

#[tokio::test]
async fn local_only_markdown_is_untouched() {
    let store = Arc::new(MemoryAssetStore::new());
    let markdown = "# Title\n\n![x](/uploads/2024/01/0123abcd.webp)\n\n[site](https://example.com)";
    let out = localizer(store.clone()).localize(markdown).await;
    assert_eq!(out.markdown, markdown);
    assert_eq!(store.write_count(), 0);
}

#[tokio::test]
async fn repeated_url_is_downloaded_once_and_replaced_everywhere() {
    let server = MockServer::start().await;
    let body = png_fixture([1, 2, 3, 255]);
    Mock::given(method("GET"))
        .and(path("/dup.png"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "image/png"))
        .expect(1)
        .mount(&server)
        .await;

    let url = format!("{}/dup.png", server.uri());
    let markdown = format!("![one]({url})\ntext\n![two]({url})");
    let store = Arc::new(MemoryAssetStore::new());
    let out = localizer(store).localize(&markdown).await;
    assert!(!out.markdown.contains(&url));
    assert_eq!(out.markdown.matches("/uploads/").count(), 2);
}

#[tokio::test]
async fn failed_download_does_not_block_others() {
    let server = MockServer::start().await;
    let png = png_fixture([9, 9, 9, 255]);
    serve(&server, "/ok.png", png, "image/png").await;
    Mock::given(method("GET"))
        .and(path("/gone.png"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let ok = format!("{}/ok.png", server.uri());
    let gone = format!("{}/gone.png", server.uri());
    let markdown = format!("![ok]({ok}) ![gone]({gone})");
    let store = Arc::new(MemoryAssetStore::new());
    let out = localizer(store).localize(&markdown).await;
    assert!(!out.markdown.contains(&ok));
    assert!(out.markdown.contains(&gone));
    assert_eq!(out.failed, vec![gone]);
}

#[tokio::test]
async fn failed_download_can_use_placeholder() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/gone.png"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let settings = LocalizeSettings {
        failure_placeholder: Some("about:blank#image-unavailable".to_string()),
        ..LocalizeSettings::default()
    };
    let localizer = Localizer::new(settings, Arc::new(MemoryAssetStore::new())).unwrap();
    let out = localizer
        .localize(&format!("![x]({}/gone.png)", server.uri()))
        .await;
    assert_eq!(out.markdown, "![x](about:blank#image-unavailable)");
}

#[tokio::test]
async fn downloads_carry_the_source_referer() {
    let server = MockServer::start().await;
    let body = png_fixture([5, 5, 5, 255]);
    Mock::given(method("GET"))
        .and(path("/guarded.png"))
        .and(header("referer", "https://mp.weixin.qq.com/"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "image/png"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&server)
        .await;

    let out = localizer(Arc::new(MemoryAssetStore::new()))
        .localize(&format!("![g]({}/guarded.png)", server.uri()))
        .await;
    assert!(out.failed.is_empty());
    assert_eq!(out.written, 1);
}

#[tokio::test]
async fn animated_gifs_are_stored_verbatim() {
    let server = MockServer::start().await;
    let gif = b"GIF89a\x02\x00\x02\x00\x80\x00\x00fake-frames".to_vec();
    serve(&server, "/anim.gif", gif.clone(), "image/gif").await;

    let store = Arc::new(MemoryAssetStore::new());
    let out = localizer(store.clone())
        .localize(&format!("![a]({}/anim.gif)", server.uri()))
        .await;
    let reference = out.replaced.values().next().unwrap().clone();
    assert!(reference.ends_with(".gif"));
    let key = key_from_reference("/uploads", &reference).unwrap();
    assert_eq!(store.read(key).await.unwrap(), gif);
}

#[tokio::test]
async fn undecodable_payload_keeps_remote_url() {
    let server = MockServer::start().await;
    let page = b"<html>hotlink</html>".to_vec();
    serve(&server, "/blocked.png", page, "text/html").await;

    let url = format!("{}/blocked.png", server.uri());
    let markdown = format!("![b]({url})");
    let store = Arc::new(MemoryAssetStore::new());
    let out = localizer(store.clone()).localize(&markdown).await;
    assert!(out.markdown.contains(&url));
    assert_eq!(store.write_count(), 0);
}

#[tokio::test]
async fn filesystem_store_places_blobs_under_the_root() {
    let server = MockServer::start().await;
    let png = png_fixture([7, 7, 7, 255]);
    serve(&server, "/fs.png", png, "image/png").await;

    let temp = TempDir::new().unwrap();
    let store = Arc::new(FsAssetStore::new(temp.path()));
    let out = localizer(store.clone())
        .localize(&format!("![f]({}/fs.png)", server.uri()))
        .await;
    let reference = out.replaced.values().next().unwrap();
    let key = key_from_reference("/uploads", reference).unwrap();
    let on_disk = store.path_for(key).unwrap();
    assert!(on_disk.is_file());
    assert!(store.exists(key).await.unwrap());

    // A second write of the same key is a no-op.
    store.write(key, b"other".to_vec()).await.unwrap();
    assert_ne!(std::fs::read(&on_disk).unwrap(), b"other".to_vec());
}
