//! Browser automation boundary.
//!
//! The pagination loop only ever talks to a [`Page`]: navigate, query,
//! read text/attributes, click. Waiting is done here by polling live page
//! state against a deadline rather than by waiting on navigation events,
//! since the trends view re-renders in place.

#[cfg(any(test, feature = "test-util"))]
pub mod scripted;
pub mod webdriver;

use std::future::Future;
use std::time::Duration;

use tokio::time::{sleep, Instant};
use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum BrowserError {
    #[error("timed out waiting for {0}")]
    Timeout(String),
    #[error("navigation failed: {0}")]
    Navigation(String),
    #[error("session error: {0}")]
    Session(String),
    #[error("webdriver error: {0}")]
    Driver(String),
}

/// One live browser tab.
pub trait Page: Send + Sync {
    type Element: Send + Sync;

    fn navigate(&self, url: &str) -> impl Future<Output = Result<(), BrowserError>> + Send;

    fn query_all(
        &self,
        selector: &str,
    ) -> impl Future<Output = Result<Vec<Self::Element>, BrowserError>> + Send;

    fn query_within(
        &self,
        element: &Self::Element,
        selector: &str,
    ) -> impl Future<Output = Result<Vec<Self::Element>, BrowserError>> + Send;

    fn text(&self, element: &Self::Element)
        -> impl Future<Output = Result<String, BrowserError>> + Send;

    fn attribute(
        &self,
        element: &Self::Element,
        name: &str,
    ) -> impl Future<Output = Result<Option<String>, BrowserError>> + Send;

    fn click(&self, element: &Self::Element) -> impl Future<Output = Result<(), BrowserError>> + Send;
}

/// Hands out one page per market and tears it down afterwards.
pub trait SessionFactory {
    type Page: Page;

    fn open(&self) -> impl Future<Output = Result<Self::Page, BrowserError>> + Send;

    fn close(&self, page: Self::Page) -> impl Future<Output = ()> + Send;
}

/// Ordered candidate selectors; the first candidate that matches anything wins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Locator {
    candidates: Vec<String>,
}

impl Locator {
    pub fn new<I, S>(candidates: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            candidates: candidates.into_iter().map(Into::into).collect(),
        }
    }

    pub fn css(selector: &str) -> Self {
        Self::new([selector])
    }

    pub fn candidates(&self) -> &[String] {
        &self.candidates
    }

    /// The selector tried first.
    pub fn primary(&self) -> &str {
        self.candidates.first().map(String::as_str).unwrap_or("")
    }

    /// Elements matched by the first candidate that yields any; empty if none do.
    ///
    /// A candidate that errors is skipped. The error only surfaces when no
    /// candidate produced a match and at least one of them failed.
    pub async fn find_all<P: Page>(&self, page: &P) -> Result<Vec<P::Element>, BrowserError> {
        let mut last_err = None;
        for selector in &self.candidates {
            match page.query_all(selector).await {
                Ok(found) if !found.is_empty() => return Ok(found),
                Ok(_) => {}
                Err(e) => {
                    debug!("Selector '{}' failed: {}", selector, e);
                    last_err = Some(e);
                }
            }
        }
        match last_err {
            Some(e) => Err(e),
            None => Ok(Vec::new()),
        }
    }

    /// Same policy as [`Locator::find_all`], scoped under `element`.
    pub async fn find_within<P: Page>(
        &self,
        page: &P,
        element: &P::Element,
    ) -> Result<Vec<P::Element>, BrowserError> {
        let mut last_err = None;
        for selector in &self.candidates {
            match page.query_within(element, selector).await {
                Ok(found) if !found.is_empty() => return Ok(found),
                Ok(_) => {}
                Err(e) => last_err = Some(e),
            }
        }
        match last_err {
            Some(e) => Err(e),
            None => Ok(Vec::new()),
        }
    }

    pub async fn find_first<P: Page>(&self, page: &P) -> Result<Option<P::Element>, BrowserError> {
        Ok(self.find_all(page).await?.into_iter().next())
    }

    pub async fn find_first_within<P: Page>(
        &self,
        page: &P,
        element: &P::Element,
    ) -> Result<Option<P::Element>, BrowserError> {
        Ok(self.find_within(page, element).await?.into_iter().next())
    }
}

/// Navigate and wait for `locator` to match, all within `timeout`.
pub async fn load<P: Page>(
    page: &P,
    url: &str,
    locator: &Locator,
    timeout: Duration,
    poll: Duration,
) -> Result<(), BrowserError> {
    let deadline = Instant::now() + timeout;
    match tokio::time::timeout(timeout, page.navigate(url)).await {
        Ok(result) => result?,
        Err(_) => return Err(BrowserError::Timeout(format!("navigation to {}", url))),
    }
    let remaining = deadline.saturating_duration_since(Instant::now());
    wait_for_selector(page, locator, remaining, poll).await
}

pub async fn wait_for_selector<P: Page>(
    page: &P,
    locator: &Locator,
    timeout: Duration,
    poll: Duration,
) -> Result<(), BrowserError> {
    let what = format!("selector '{}'", locator.primary());
    wait_until(timeout, poll, &what, move || async move {
        matches!(locator.find_all(page).await, Ok(found) if !found.is_empty())
    })
    .await
}

/// Poll `predicate` until it holds or `timeout` elapses. The predicate is
/// always evaluated at least once, even with a zero timeout.
pub async fn wait_until<F, Fut>(
    timeout: Duration,
    poll: Duration,
    what: &str,
    mut predicate: F,
) -> Result<(), BrowserError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = Instant::now() + timeout;
    loop {
        if predicate().await {
            return Ok(());
        }
        let now = Instant::now();
        if now >= deadline {
            return Err(BrowserError::Timeout(what.to_string()));
        }
        sleep(poll.min(deadline - now)).await;
    }
}
