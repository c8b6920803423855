//! Chrome over WebDriver (chromedriver, selenium grid, ...).

use thirtyfour::prelude::*;
use tracing::{debug, warn};

use super::{BrowserError, Page, SessionFactory};

const CHROME_ARGS: &[&str] = &[
    "--no-sandbox",
    "--disable-dev-shm-usage",
    "--disable-gpu",
    "--window-size=1920,1080",
    "--disable-blink-features=AutomationControlled",
];

/// Starts a fresh Chrome session per market.
pub struct WebDriverFactory {
    server_url: String,
    headless: bool,
}

impl WebDriverFactory {
    pub fn new(server_url: &str, headless: bool) -> Self {
        Self {
            server_url: server_url.to_string(),
            headless,
        }
    }
}

impl SessionFactory for WebDriverFactory {
    type Page = WebDriverPage;

    async fn open(&self) -> Result<WebDriverPage, BrowserError> {
        let mut caps = DesiredCapabilities::chrome();
        if self.headless {
            caps.add_arg("--headless=new").map_err(session)?;
        }
        for &arg in CHROME_ARGS {
            caps.add_arg(arg).map_err(session)?;
        }

        let driver = WebDriver::new(&self.server_url, caps)
            .await
            .map_err(|e| BrowserError::Session(format!("{} ({})", e, self.server_url)))?;
        debug!("Opened WebDriver session at {}", self.server_url);
        Ok(WebDriverPage { driver })
    }

    async fn close(&self, page: WebDriverPage) {
        if let Err(e) = page.driver.quit().await {
            warn!("Failed to quit browser: {}", e);
        }
    }
}

pub struct WebDriverPage {
    driver: WebDriver,
}

impl Page for WebDriverPage {
    type Element = WebElement;

    async fn navigate(&self, url: &str) -> Result<(), BrowserError> {
        self.driver
            .goto(url)
            .await
            .map_err(|e| BrowserError::Navigation(format!("{}: {}", url, e)))
    }

    async fn query_all(&self, selector: &str) -> Result<Vec<WebElement>, BrowserError> {
        self.driver.find_all(By::Css(selector)).await.map_err(driver)
    }

    async fn query_within(
        &self,
        element: &WebElement,
        selector: &str,
    ) -> Result<Vec<WebElement>, BrowserError> {
        element.find_all(By::Css(selector)).await.map_err(driver)
    }

    async fn text(&self, element: &WebElement) -> Result<String, BrowserError> {
        element.text().await.map_err(driver)
    }

    async fn attribute(&self, element: &WebElement, name: &str) -> Result<Option<String>, BrowserError> {
        element.attr(name).await.map_err(driver)
    }

    async fn click(&self, element: &WebElement) -> Result<(), BrowserError> {
        element.click().await.map_err(driver)
    }
}

fn driver(e: WebDriverError) -> BrowserError {
    BrowserError::Driver(e.to_string())
}

fn session(e: WebDriverError) -> BrowserError {
    BrowserError::Session(e.to_string())
}
