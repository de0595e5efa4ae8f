use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

pub const CHROME_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Tunable options for a harvest run. Every field has a built-in default;
/// a TOML file may override any subset of them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HarvestConfig {
    /// Upper bound on downloads in flight for one site.
    pub max_concurrent_downloads: usize,
    /// Candidates with a known width below this are dropped.
    pub min_width: u32,
    /// Candidates with a known height below this are dropped.
    pub min_height: u32,
    pub scroll_pause_ms: u64,
    pub max_scrolls: u32,
    pub headless: bool,
    /// Upstream proxy, e.g. `http://127.0.0.1:8080`. Used by both the browser and the downloader.
    pub proxy: Option<String>,
    pub download_timeout_secs: u64,
    /// Elements larger than this (both edges, CSS px) also get their computed
    /// background scanned, not only the inline style.
    pub background_scan_min: u32,
    pub navigation_timeout_secs: u64,
    pub fallback_navigation_timeout_secs: u64,
    /// Pause after navigation for scripts to populate the page.
    pub settle_ms: u64,
    pub image_wait_timeout_secs: u64,
    pub post_scroll_ms: u64,
    pub site_pause_secs: u64,
    /// Save a full-page screenshot when a site yields no candidates.
    pub debug_screenshot: bool,
    pub user_agent: String,
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            max_concurrent_downloads: 6,
            min_width: 1,
            min_height: 1,
            scroll_pause_ms: 500,
            max_scrolls: 80,
            headless: false,
            proxy: None,
            download_timeout_secs: 30,
            background_scan_min: 200,
            navigation_timeout_secs: 60,
            fallback_navigation_timeout_secs: 45,
            settle_ms: 3000,
            image_wait_timeout_secs: 10,
            post_scroll_ms: 2000,
            site_pause_secs: 3,
            debug_screenshot: true,
            user_agent: CHROME_USER_AGENT.to_string(),
        }
    }
}

impl HarvestConfig {
    /// Load from a TOML file if one is given, otherwise use the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let cfg = match path {
            Some(path) => {
                let data = fs::read_to_string(path)
                    .with_context(|| format!("Failed to read config {}", path.display()))?;
                toml::from_str::<HarvestConfig>(&data)
                    .with_context(|| format!("Invalid config {}", path.display()))?
            }
            None => HarvestConfig::default(),
        };
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<()> {
        if self.max_concurrent_downloads == 0 {
            bail!("max_concurrent_downloads must be at least 1");
        }
        if self.download_timeout_secs == 0 {
            bail!("download_timeout_secs must be at least 1");
        }
        Ok(())
    }

    /// `"{min_width}x{min_height}"`, as recorded in summaries.
    pub fn resolution_filter(&self) -> String {
        format!("{}x{}", self.min_width, self.min_height)
    }

    pub fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.download_timeout_secs)
    }

    pub fn site_pause(&self) -> Duration {
        Duration::from_secs(self.site_pause_secs)
    }
}
