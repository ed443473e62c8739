use std::path::PathBuf;
use std::time::{Duration, Instant};

use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::js_protocol::runtime::EvaluateParams;
use chromiumoxide::handler::viewport::Viewport;
use chromiumoxide::Page;
use futures_util::StreamExt;
use mparchive_logging::{archive_debug, archive_info, archive_warn};

use crate::decode::DecodeError;

/// Desktop identity used for both page rendering and asset downloads.
pub const DESKTOP_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

const CONTAINER_POLL: Duration = Duration::from_millis(250);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedPage {
    pub html: String,
    pub final_url: String,
}

#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("invalid url: {0}")]
    InvalidUrl(String),
    #[error("browser launch failed: {0}")]
    Launch(String),
    #[error("navigation to {url} failed: {message}")]
    Navigation { url: String, message: String },
    #[error("navigation to {url} timed out after {timeout:?}")]
    Timeout { url: String, timeout: Duration },
    #[error("http status {0}")]
    HttpStatus(u16),
    #[error("response too large (max {max_bytes}, actual {actual:?})")]
    TooLarge { max_bytes: u64, actual: Option<u64> },
    #[error("unsupported content type {0}")]
    UnsupportedContentType(String),
    #[error("failed to capture page: {0}")]
    Capture(String),
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error("network error: {0}")]
    Network(String),
}

/// Produces the final, script-hydrated HTML of an article page.
#[async_trait::async_trait]
pub trait Renderer: Send + Sync {
    async fn render(&self, url: &str) -> Result<RenderedPage, RenderError>;
}

#[derive(Debug, Clone)]
pub struct RenderSettings {
    pub navigation_timeout: Duration,
    pub container_selector: String,
    /// Absence of the container after this long is only a warning.
    pub container_timeout: Duration,
    pub scroll_step_px: u32,
    pub scroll_interval: Duration,
    /// Upper bound on scrolled distance for endless pages.
    pub max_scroll_px: u32,
    pub settle_delay: Duration,
    pub user_agent: String,
    pub viewport: (u32, u32),
    pub chrome_executable: Option<PathBuf>,
    pub no_sandbox: bool,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            navigation_timeout: Duration::from_secs(60),
            container_selector: "#js_content".to_string(),
            container_timeout: Duration::from_secs(10),
            scroll_step_px: 100,
            scroll_interval: Duration::from_millis(100),
            max_scroll_px: 100_000,
            settle_delay: Duration::from_secs(3),
            user_agent: DESKTOP_USER_AGENT.to_string(),
            viewport: (1280, 800),
            chrome_executable: None,
            no_sandbox: false,
        }
    }
}

/// Headless Chromium renderer. Every call launches its own browser with a
/// throwaway profile and tears it down on every exit path.
#[derive(Debug, Clone, Default)]
pub struct ChromeRenderer {
    settings: RenderSettings,
}

impl ChromeRenderer {
    pub fn new(settings: RenderSettings) -> Self {
        Self { settings }
    }

    fn browser_config(&self, profile_dir: &std::path::Path) -> Result<BrowserConfig, RenderError> {
        let (width, height) = self.settings.viewport;
        let mut builder = BrowserConfig::builder()
            .window_size(width, height)
            .viewport(Viewport {
                width,
                height,
                ..Viewport::default()
            })
            .request_timeout(self.settings.navigation_timeout)
            .user_data_dir(profile_dir)
            .arg(format!("--user-agent={}", self.settings.user_agent));
        if let Some(executable) = &self.settings.chrome_executable {
            builder = builder.chrome_executable(executable);
        }
        if self.settings.no_sandbox {
            builder = builder.no_sandbox();
        }
        builder.build().map_err(RenderError::Launch)
    }

    async fn capture(&self, browser: &Browser, url: &str) -> Result<RenderedPage, RenderError> {
        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|err| RenderError::Capture(err.to_string()))?;

        let timeout = self.settings.navigation_timeout;
        match tokio::time::timeout(timeout, page.goto(url)).await {
            Err(_) => {
                return Err(RenderError::Timeout {
                    url: url.to_string(),
                    timeout,
                });
            }
            Ok(Err(err)) => {
                return Err(RenderError::Navigation {
                    url: url.to_string(),
                    message: err.to_string(),
                });
            }
            Ok(Ok(_)) => {}
        }

        if !self.wait_for_container(&page).await {
            archive_warn!(
                "render: {} not found within {:?} for {}, continuing",
                self.settings.container_selector,
                self.settings.container_timeout,
                url
            );
        }

        if let Err(err) = self.auto_scroll(&page).await {
            archive_warn!("render: scroll failed for {}: {}", url, err);
        }
        tokio::time::sleep(self.settings.settle_delay).await;

        let html = page
            .content()
            .await
            .map_err(|err| RenderError::Capture(err.to_string()))?;
        let final_url = match page.url().await {
            Ok(Some(current)) => current,
            _ => url.to_string(),
        };

        Ok(RenderedPage { html, final_url })
    }

    async fn wait_for_container(&self, page: &Page) -> bool {
        let deadline = Instant::now() + self.settings.container_timeout;
        loop {
            if page
                .find_element(self.settings.container_selector.as_str())
                .await
                .is_ok()
            {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(CONTAINER_POLL).await;
        }
    }

    /// Scrolls to the bottom in fixed steps so lazy images receive their real source.
    async fn auto_scroll(&self, page: &Page) -> Result<(), RenderError> {
        let script = format!(
            r#"(async () => {{
                let total = 0;
                await new Promise((resolve) => {{
                    const timer = setInterval(() => {{
                        const height = document.body.scrollHeight;
                        window.scrollBy(0, {step});
                        total += {step};
                        if (total >= height || total >= {max}) {{
                            clearInterval(timer);
                            resolve();
                        }}
                    }}, {interval});
                }});
                return total;
            }})()"#,
            step = self.settings.scroll_step_px,
            max = self.settings.max_scroll_px,
            interval = self.settings.scroll_interval.as_millis(),
        );
        let params = EvaluateParams::builder()
            .expression(script)
            .await_promise(true)
            .build()
            .map_err(RenderError::Capture)?;
        page.evaluate_expression(params)
            .await
            .map_err(|err| RenderError::Capture(err.to_string()))?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl Renderer for ChromeRenderer {
    async fn render(&self, url: &str) -> Result<RenderedPage, RenderError> {
        let parsed = url::Url::parse(url).map_err(|err| RenderError::InvalidUrl(err.to_string()))?;
        let profile = tempfile::TempDir::new().map_err(|err| RenderError::Launch(err.to_string()))?;
        let config = self.browser_config(profile.path())?;

        archive_info!("render: launching browser for {}", parsed);
        let (mut browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|err| RenderError::Launch(err.to_string()))?;
        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(err) = event {
                    archive_debug!("render: cdp handler event error: {}", err);
                }
            }
        });

        let result = self.capture(&browser, parsed.as_str()).await;

        if let Err(err) = browser.close().await {
            archive_warn!("render: browser close failed: {}", err);
        }
        if let Err(err) = browser.wait().await {
            archive_debug!("render: browser wait failed: {}", err);
        }
        handler_task.abort();

        match &result {
            Ok(page) => archive_info!("render: {} bytes from {}", page.html.len(), page.final_url),
            Err(err) => archive_warn!("render: failed for {}: {}", parsed, err),
        }
        result
    }
}
