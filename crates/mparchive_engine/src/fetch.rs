use std::time::Duration;

use futures_util::StreamExt;
use mparchive_logging::archive_info;
use reqwest::header::{ACCEPT_LANGUAGE, CONTENT_TYPE};

use crate::decode::decode_html;
use crate::render::{RenderError, RenderedPage, Renderer, DESKTOP_USER_AGENT};

#[derive(Debug, Clone)]
pub struct FetchSettings {
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    pub redirect_limit: usize,
    pub max_bytes: u64,
    pub allowed_content_types: Vec<String>,
    pub user_agent: String,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
            redirect_limit: 5,
            max_bytes: 5 * 1024 * 1024,
            allowed_content_types: vec![
                "text/html".to_string(),
                "application/xhtml+xml".to_string(),
            ],
            user_agent: DESKTOP_USER_AGENT.to_string(),
        }
    }
}

/// Renderer that performs a single GET without executing scripts.
///
/// Article pages ship their lazy image sources in `data-src`, which the
/// extractor promotes, so this is usable wherever no browser is installed.
#[derive(Debug, Clone)]
pub struct HttpRenderer {
    client: reqwest::Client,
    settings: FetchSettings,
}

impl HttpRenderer {
    pub fn new(settings: FetchSettings) -> Result<Self, RenderError> {
        let client = reqwest::Client::builder()
            .connect_timeout(settings.connect_timeout)
            .timeout(settings.request_timeout)
            .redirect(reqwest::redirect::Policy::limited(settings.redirect_limit))
            .user_agent(settings.user_agent.clone())
            .build()
            .map_err(|err| RenderError::Network(err.to_string()))?;
        Ok(Self { client, settings })
    }

    fn is_content_type_allowed(&self, content_type: &str) -> bool {
        let ct = content_type
            .split(';')
            .next()
            .unwrap_or(content_type)
            .trim();
        self.settings
            .allowed_content_types
            .iter()
            .any(|allowed| allowed.eq_ignore_ascii_case(ct))
    }

    fn map_error(&self, url: &str, err: reqwest::Error) -> RenderError {
        if err.is_timeout() {
            return RenderError::Timeout {
                url: url.to_string(),
                timeout: self.settings.request_timeout,
            };
        }
        if err.is_redirect() {
            return RenderError::Navigation {
                url: url.to_string(),
                message: err.to_string(),
            };
        }
        RenderError::Network(err.to_string())
    }

    fn too_large(&self, actual: u64) -> RenderError {
        RenderError::TooLarge {
            max_bytes: self.settings.max_bytes,
            actual: Some(actual),
        }
    }
}

#[async_trait::async_trait]
impl Renderer for HttpRenderer {
    async fn render(&self, url: &str) -> Result<RenderedPage, RenderError> {
        let parsed =
            reqwest::Url::parse(url).map_err(|err| RenderError::InvalidUrl(err.to_string()))?;

        let response = self
            .client
            .get(parsed)
            .header(ACCEPT_LANGUAGE, "zh-CN,zh;q=0.9,en;q=0.8")
            .send()
            .await
            .map_err(|err| self.map_error(url, err))?;

        let status = response.status();
        if !status.is_success() {
            return Err(RenderError::HttpStatus(status.as_u16()));
        }
        if let Some(content_len) = response.content_length() {
            if content_len > self.settings.max_bytes {
                return Err(self.too_large(content_len));
            }
        }

        let final_url = response.url().to_string();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(|value| value.to_string());
        if let Some(ct) = content_type.as_deref() {
            if !self.is_content_type_allowed(ct) {
                return Err(RenderError::UnsupportedContentType(ct.to_string()));
            }
        }

        let mut bytes = Vec::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|err| self.map_error(url, err))?;
            let next_len = bytes.len() as u64 + chunk.len() as u64;
            if next_len > self.settings.max_bytes {
                return Err(self.too_large(next_len));
            }
            bytes.extend_from_slice(&chunk);
        }

        let decoded = decode_html(&bytes, content_type.as_deref())?;
        archive_info!(
            "fetch: {} bytes ({}) from {}",
            bytes.len(),
            decoded.encoding_label,
            final_url
        );
        Ok(RenderedPage {
            html: decoded.html,
            final_url,
        })
    }
}

