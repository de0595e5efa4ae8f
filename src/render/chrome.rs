use std::path::Path;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::emulation::{
    SetTimezoneOverrideParams, SetUserAgentOverrideParams,
};
use chromiumoxide::cdp::browser_protocol::network::EnableParams;
use chromiumoxide::cdp::browser_protocol::page::{
    AddScriptToEvaluateOnNewDocumentParams, NavigateParams,
};
use chromiumoxide::cdp::js_protocol::runtime::EvaluateParams;
use chromiumoxide::handler::viewport::Viewport;
use chromiumoxide::page::ScreenshotParams;
use chromiumoxide::Page;
use futures::StreamExt;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;

use super::observer::NetworkObserver;
use super::{PageRenderer, RenderedPage};
use crate::config::HarvestConfig;
use crate::download::Cookie;
use crate::signals::{ExtractionFault, PageSnapshot, RawExtraction};

const EXTRACT_SCRIPT: &str = include_str!("extract.js");

const STEALTH_SCRIPT: &str = r#"
Object.defineProperty(navigator, 'webdriver', { get: () => undefined });
Object.defineProperty(navigator, 'plugins', { get: () => [1, 2, 3, 4, 5] });
Object.defineProperty(navigator, 'languages', { get: () => ['en-US', 'en'] });
window.chrome = { runtime: {} };
const originalQuery = window.navigator.permissions.query;
window.navigator.permissions.query = (parameters) => (
  parameters.name === 'notifications'
    ? Promise.resolve({ state: Notification.permission })
    : originalQuery(parameters)
);
"#;

const IMAGES_LOADED_PROBE: &str =
    "Array.from(document.querySelectorAll('img')).some(img => img.complete && img.naturalHeight > 0)";
const SCROLL_STEP: &str =
    "(() => { window.scrollBy(0, Math.max(300, Math.floor(window.innerHeight * 0.8))); return true; })()";
const SCROLL_PROBE: &str = r#"(() => {
  const h = document.body ? document.body.scrollHeight : 0;
  return { height: h, atBottom: (window.innerHeight + window.scrollY) >= h - 100 };
})()"#;
const SCROLL_UP: &str = "(() => { window.scrollBy(0, -window.innerHeight); return true; })()";
const SCROLL_TOP: &str = "(() => { window.scrollTo(0, 0); return true; })()";

const LAUNCH_ARGS: &[&str] = &[
    "--no-sandbox",
    "--disable-setuid-sandbox",
    "--disable-blink-features=AutomationControlled",
    "--disable-dev-shm-usage",
    "--disable-web-security",
    "--disable-features=IsolateOrigins,site-per-process",
    "--lang=en-US",
];

/// Chromium driven over the DevTools protocol. One browser for the whole
/// run, one tab per site.
pub struct ChromeRenderer {
    browser: Browser,
    handler: JoinHandle<()>,
    config: HarvestConfig,
}

impl ChromeRenderer {
    pub async fn launch(config: &HarvestConfig) -> Result<Self> {
        let mut builder = BrowserConfig::builder()
            .window_size(1920, 1080)
            .viewport(Viewport {
                width: 1920,
                height: 1080,
                device_scale_factor: Some(1.0),
                ..Default::default()
            })
            .request_timeout(Duration::from_secs(config.navigation_timeout_secs + 30))
            .args(LAUNCH_ARGS.iter().copied());
        if !config.headless {
            builder = builder.with_head();
        }
        if let Some(proxy) = &config.proxy {
            info!("Using proxy: {}", proxy);
            builder = builder.arg(format!("--proxy-server={}", proxy));
        }
        let browser_config = builder.build().map_err(|e| anyhow!("Invalid browser config: {}", e))?;

        info!("Launching browser (headless: {})", config.headless);
        let (browser, mut handler) = Browser::launch(browser_config)
            .await
            .context("Failed to launch Chromium")?;
        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!("Browser handler: {}", e);
                }
            }
        });

        Ok(Self {
            browser,
            handler,
            config: config.clone(),
        })
    }

    pub async fn shutdown(mut self) {
        if let Err(e) = self.browser.close().await {
            warn!("Failed to close browser: {}", e);
        }
        if let Err(e) = self.browser.wait().await {
            debug!("Waiting for browser exit: {}", e);
        }
        self.handler.abort();
    }

    async fn prepare_page(&self, page: &Page) -> Result<()> {
        let ua = SetUserAgentOverrideParams::builder()
            .user_agent(self.config.user_agent.clone())
            .accept_language("en-US,en")
            .build()
            .map_err(|e| anyhow!("{}", e))?;
        page.execute(ua).await.context("Failed to set user agent")?;
        if let Err(e) = page.execute(SetTimezoneOverrideParams::new("America/New_York")).await {
            debug!("Timezone override rejected: {}", e);
        }
        page.execute(AddScriptToEvaluateOnNewDocumentParams::new(STEALTH_SCRIPT))
            .await
            .context("Failed to install init script")?;
        page.execute(EnableParams::default())
            .await
            .context("Failed to enable network events")?;
        Ok(())
    }
}

#[async_trait]
impl PageRenderer for ChromeRenderer {
    type Page = ChromePage;

    async fn open(&self, target: &Url) -> Result<ChromePage> {
        let page = self
            .browser
            .new_page("about:blank")
            .await
            .context("Failed to open a new tab")?;
        if let Err(e) = self.prepare_page(&page).await {
            if let Err(close) = page.close().await {
                debug!("Closing tab after failed setup: {}", close);
            }
            return Err(e);
        }
        let observer = match NetworkObserver::start(&page).await {
            Ok(o) => Some(o),
            Err(e) => {
                warn!("Network capture unavailable for {}: {:#}", target, e);
                None
            }
        };

        navigate(&page, target, &self.config).await;

        info!("Waiting for dynamic content...");
        tokio::time::sleep(Duration::from_millis(self.config.settle_ms)).await;
        wait_for_images(&page, Duration::from_secs(self.config.image_wait_timeout_secs)).await;

        info!("Scrolling to load lazy content...");
        auto_scroll(&page, &self.config).await;
        tokio::time::sleep(Duration::from_millis(self.config.post_scroll_ms)).await;

        Ok(ChromePage {
            page,
            observer,
            target: target.clone(),
            background_scan_min: self.config.background_scan_min,
        })
    }
}

pub struct ChromePage {
    page: Page,
    observer: Option<NetworkObserver>,
    target: Url,
    background_scan_min: u32,
}

#[async_trait]
impl RenderedPage for ChromePage {
    async fn snapshot(&mut self) -> Result<PageSnapshot> {
        let args = serde_json::json!({ "backgroundScanMin": self.background_scan_min });
        let expression = format!("({})({})", EXTRACT_SCRIPT, args);
        let extraction = match evaluate::<RawExtraction>(&self.page, &expression).await {
            Ok(ex) => ex,
            Err(e) => {
                warn!("Extraction pass failed on {}: {:#}", self.target, e);
                RawExtraction {
                    faults: vec![ExtractionFault {
                        category: "page".into(),
                        message: format!("{:#}", e),
                    }],
                    ..Default::default()
                }
            }
        };
        let network = self.observer.take().map(NetworkObserver::finish).unwrap_or_default();
        debug!(
            "Extracted {} img, {} source, {} background, {} meta records, {} linked-data blocks, {} network hits",
            extraction.images.len(),
            extraction.sources.len(),
            extraction.backgrounds.len(),
            extraction.meta.len(),
            extraction.structured_data.len(),
            network.len()
        );
        Ok(PageSnapshot {
            target: self.target.clone(),
            extraction,
            network,
        })
    }

    async fn cookies(&self) -> Result<Vec<Cookie>> {
        let cookies = self.page.get_cookies().await.context("Failed to read cookies")?;
        Ok(cookies
            .into_iter()
            .map(|c| Cookie { name: c.name, value: c.value })
            .collect())
    }

    async fn screenshot(&self, path: &Path) -> Result<()> {
        self.page
            .save_screenshot(ScreenshotParams::builder().full_page(true).build(), path)
            .await
            .with_context(|| format!("Failed to save screenshot {}", path.display()))?;
        Ok(())
    }

    async fn close(self) -> Result<()> {
        self.page.close().await.context("Failed to close tab")?;
        Ok(())
    }
}

/// Full load first; if that fails, settle for the navigation being
/// committed; if that fails too, work with whatever is there.
async fn navigate(page: &Page, target: &Url, config: &HarvestConfig) {
    info!("Navigating to {}", target);
    let full = Duration::from_secs(config.navigation_timeout_secs);
    match tokio::time::timeout(full, page.goto(target.as_str())).await {
        Ok(Ok(_)) => {
            info!("Page loaded");
            return;
        }
        Ok(Err(e)) => warn!("Load failed for {}: {}", target, e),
        Err(_) => warn!("Load did not finish within {}s for {}", full.as_secs(), target),
    }

    let lighter = Duration::from_secs(config.fallback_navigation_timeout_secs);
    match tokio::time::timeout(lighter, page.execute(NavigateParams::new(target.as_str()))).await {
        Ok(Ok(_)) => info!("Navigation committed, continuing without full load"),
        _ => warn!("Navigation had issues for {}, continuing anyway", target),
    }
}

/// Poll until at least one image has decoded, or give up quietly.
async fn wait_for_images(page: &Page, limit: Duration) {
    let poll = async {
        loop {
            match evaluate::<bool>(page, IMAGES_LOADED_PROBE).await {
                Ok(true) => break,
                Ok(false) => {}
                Err(e) => debug!("Image probe failed: {:#}", e),
            }
            tokio::time::sleep(Duration::from_millis(250)).await;
        }
    };
    if tokio::time::timeout(limit, poll).await.is_err() {
        debug!("No loaded images after {}s, continuing", limit.as_secs());
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ScrollProbe {
    height: f64,
    at_bottom: bool,
}

async fn auto_scroll(page: &Page, config: &HarvestConfig) {
    if let Err(e) = scroll_through(page, config).await {
        warn!("Scrolling stopped early: {:#}", e);
    }
}

async fn scroll_through(page: &Page, config: &HarvestConfig) -> Result<()> {
    let pause = Duration::from_millis(config.scroll_pause_ms);
    let mut last_height = evaluate::<ScrollProbe>(page, SCROLL_PROBE).await?.height;

    for _ in 0..config.max_scrolls {
        evaluate::<bool>(page, SCROLL_STEP).await?;
        tokio::time::sleep(pause).await;

        let probe = evaluate::<ScrollProbe>(page, SCROLL_PROBE).await?;
        if probe.at_bottom {
            tokio::time::sleep(pause * 2).await;
            if probe.height == last_height {
                break;
            }
        }
        last_height = probe.height;
    }

    for _ in 0..5 {
        evaluate::<bool>(page, SCROLL_UP).await?;
        tokio::time::sleep(pause).await;
    }
    evaluate::<bool>(page, SCROLL_TOP).await?;
    tokio::time::sleep(Duration::from_millis(500)).await;
    Ok(())
}

async fn evaluate<T: DeserializeOwned>(page: &Page, expression: &str) -> Result<T> {
    let params = EvaluateParams::builder()
        .expression(expression)
        .await_promise(true)
        .return_by_value(true)
        .build()
        .map_err(|e| anyhow!("{}", e))?;
    let result = page.evaluate_expression(params).await?;
    Ok(result.into_value()?)
}
