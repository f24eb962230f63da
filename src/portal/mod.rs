pub mod matcher;
pub mod navigator;
pub mod parsers;
pub mod selection;
pub mod webdriver;

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

pub use self::navigator::PortalNavigator;
pub use self::webdriver::WebDriverBrowser;

// ── Browser trait ─────────────────────────────────────────────────────────────

/// Opaque handle to an element found on the current page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementHandle(pub String);

#[derive(Debug, Error)]
pub enum BrowserError {
    #[error("timed out after {secs}s waiting for {locator}")]
    Timeout { locator: String, secs: u64 },

    #[error("webdriver: {0}")]
    Protocol(String),

    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

/// Swappable browser automation backend.
#[async_trait]
pub trait Browser: Send + Sync {
    async fn goto(&self, url: &str) -> Result<(), BrowserError>;

    /// Wait until the element at `xpath` is displayed and enabled.
    async fn wait_clickable(
        &self,
        xpath: &str,
        timeout: Duration,
    ) -> Result<ElementHandle, BrowserError>;

    async fn scroll_into_view(&self, element: &ElementHandle) -> Result<(), BrowserError>;

    async fn click(&self, element: &ElementHandle) -> Result<(), BrowserError>;

    /// Inner HTML of the rendered document body.
    async fn body_html(&self) -> Result<String, BrowserError>;
}
