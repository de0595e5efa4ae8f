//! The browser side of a harvest: opening a page, letting it settle, and
//! reading back raw observations.

pub mod chrome;
mod observer;

use std::path::Path;

use anyhow::Result;
use async_trait::async_trait;
use url::Url;

use crate::download::Cookie;
use crate::signals::PageSnapshot;

pub use chrome::ChromeRenderer;

/// Opens one page at a time. Implementations navigate, wait for content and
/// scroll before handing the page back.
#[async_trait]
pub trait PageRenderer: Send + Sync {
    type Page: RenderedPage;

    async fn open(&self, target: &Url) -> Result<Self::Page>;
}

/// A loaded page, alive until `close`.
#[async_trait]
pub trait RenderedPage: Send + Sync {
    /// Run the extraction pass and read out the network observer. The observer
    /// is drained once; later calls report no network URLs.
    async fn snapshot(&mut self) -> Result<PageSnapshot>;

    async fn cookies(&self) -> Result<Vec<Cookie>>;

    async fn screenshot(&self, path: &Path) -> Result<()>;

    async fn close(self) -> Result<()>;
}
