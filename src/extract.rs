use std::future::Future;

use tracing::{debug, warn};

use crate::browser::{BrowserError, Locator, Page};
use crate::model::TrendRecord;
use crate::normalize;

/// Where each field lives on the trends table. Field locators are scoped under a row.
#[derive(Debug, Clone)]
pub struct RowLocatorSet {
    pub rows: Locator,
    pub title: Locator,
    pub volume: Locator,
    pub time_started: Locator,
    pub status_marker: Locator,
    /// Class on the status marker that means the trend is still active.
    pub active_marker_class: String,
    pub breakdown: Locator,
    pub next_button: Locator,
}

impl Default for RowLocatorSet {
    fn default() -> Self {
        Self {
            rows: Locator::new([
                "table tbody tr[data-row-id]",
                "tr[jsname='oKdM2c']",
                "table[role='grid'] tbody tr",
            ]),
            title: Locator::new(["div.mZ3RIc", "td:nth-child(2) > div:first-child"]),
            volume: Locator::new(["div.lqv0Cb", "div.qNpYPd", "td:nth-child(3)"]),
            time_started: Locator::new(["div.vdw3Ld", "td:nth-child(4) > div:first-child"]),
            status_marker: Locator::new(["div.UQObac", "td:nth-child(4) span.status"]),
            active_marker_class: "QxIiwc".to_string(),
            breakdown: Locator::new(["button.mUIrbf-LgbsSe span.mUIrbf-vQzf8d", "td:nth-child(5) button"]),
            next_button: Locator::new([
                "button[aria-label='Go to next page']",
                "button[jsname='ViaHrd']",
                "button.pagination-next",
            ]),
        }
    }
}

/// State of the pager control on the current page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextControl {
    Absent,
    Disabled,
    Enabled,
}

#[derive(Debug, Default)]
pub struct PageExtraction {
    pub records: Vec<TrendRecord>,
    /// Rows dropped because a required field was missing.
    pub skipped: usize,
}

#[derive(Debug, thiserror::Error)]
enum RowError {
    #[error("missing {0}")]
    Missing(&'static str),
    #[error(transparent)]
    Browser(#[from] BrowserError),
}

/// Turns a loaded results page into records and drives its pager.
///
/// Implementations never fail a whole page: malformed rows are skipped and an
/// unreadable page comes back empty, leaving the empty-page policy to the
/// pagination loop.
pub trait RecordExtractor<P: Page> {
    fn row_locator(&self) -> &Locator;

    fn extract(&self, page: &P) -> impl Future<Output = PageExtraction>;

    /// Normalized text identifying the first row, `None` when no row is shown.
    fn fingerprint(&self, page: &P) -> impl Future<Output = Option<String>>;

    fn next_control(&self, page: &P) -> impl Future<Output = NextControl>;

    fn click_next(&self, page: &P) -> impl Future<Output = Result<(), BrowserError>>;
}

/// Reads rows straight off the DOM using a [`RowLocatorSet`].
#[derive(Debug, Clone, Default)]
pub struct DomRecordExtractor {
    locators: RowLocatorSet,
}

impl DomRecordExtractor {
    pub fn new(locators: RowLocatorSet) -> Self {
        Self { locators }
    }

    pub fn locators(&self) -> &RowLocatorSet {
        &self.locators
    }

    async fn read_row<P: Page>(&self, page: &P, row: &P::Element) -> Result<TrendRecord, RowError> {
        let loc = &self.locators;

        let title = read_field(page, row, &loc.title)
            .await?
            .map(|t| normalize::normalize_title(&t))
            .filter(|t| !t.is_empty())
            .ok_or(RowError::Missing("title"))?;
        let volume = read_field(page, row, &loc.volume)
            .await?
            .ok_or(RowError::Missing("volume"))?;
        let time_started = read_field(page, row, &loc.time_started)
            .await?
            .ok_or(RowError::Missing("time"))?;

        let marker_class = match loc.status_marker.find_first_within(page, row).await? {
            Some(marker) => page.attribute(&marker, "class").await?,
            None => None,
        };

        let mut terms = Vec::new();
        for el in loc.breakdown.find_within(page, row).await? {
            match page.text(&el).await {
                Ok(t) => terms.push(t),
                Err(e) => debug!("Breakdown term unreadable: {}", e),
            }
        }

        Ok(TrendRecord {
            title,
            volume: normalize::parse_volume(&volume),
            time_started: normalize::normalize_time_label(&time_started),
            breakdown: normalize::normalize_breakdown(terms),
            status: normalize::normalize_status(marker_class.as_deref(), &loc.active_marker_class),
            score: None,
        })
    }
}

impl<P: Page> RecordExtractor<P> for DomRecordExtractor {
    fn row_locator(&self) -> &Locator {
        &self.locators.rows
    }

    async fn extract(&self, page: &P) -> PageExtraction {
        let rows = match self.locators.rows.find_all(page).await {
            Ok(rows) => rows,
            Err(e) => {
                warn!("Row container unreadable, treating page as empty: {}", e);
                return PageExtraction::default();
            }
        };

        let mut out = PageExtraction::default();
        for (i, row) in rows.iter().enumerate() {
            match self.read_row(page, row).await {
                Ok(record) => out.records.push(record),
                Err(e) => {
                    debug!("Skipping row {}: {}", i, e);
                    out.skipped += 1;
                }
            }
        }
        out
    }

    async fn fingerprint(&self, page: &P) -> Option<String> {
        let row = self.locators.rows.find_first(page).await.ok()??;
        if let Ok(Some(title)) = read_field(page, &row, &self.locators.title).await {
            let title = normalize::normalize_title(&title);
            if !title.is_empty() {
                return Some(title);
            }
        }
        // Row without a readable title: fall back to the whole row's text.
        let raw = page.text(&row).await.ok()?;
        Some(normalize::normalize_title(&raw))
    }

    async fn next_control(&self, page: &P) -> NextControl {
        let button = match self.locators.next_button.find_first(page).await {
            Ok(Some(button)) => button,
            Ok(None) => return NextControl::Absent,
            Err(e) => {
                debug!("Next control lookup failed: {}", e);
                return NextControl::Absent;
            }
        };
        if is_disabled(page, &button).await {
            NextControl::Disabled
        } else {
            NextControl::Enabled
        }
    }

    async fn click_next(&self, page: &P) -> Result<(), BrowserError> {
        match self.locators.next_button.find_first(page).await? {
            Some(button) => page.click(&button).await,
            None => Err(BrowserError::Driver("next control disappeared before click".into())),
        }
    }
}

/// First match of `locator` under `row`, as trimmed text. Blank text counts as missing.
async fn read_field<P: Page>(
    page: &P,
    row: &P::Element,
    locator: &Locator,
) -> Result<Option<String>, BrowserError> {
    let Some(el) = locator.find_first_within(page, row).await? else {
        return Ok(None);
    };
    let text = page.text(&el).await?;
    let text = text.trim();
    Ok((!text.is_empty()).then(|| text.to_string()))
}

async fn is_disabled<P: Page>(page: &P, button: &P::Element) -> bool {
    if matches!(page.attribute(button, "disabled").await, Ok(Some(ref v)) if v != "false") {
        return true;
    }
    if matches!(page.attribute(button, "aria-disabled").await, Ok(Some(ref v)) if v == "true") {
        return true;
    }
    matches!(
        page.attribute(button, "class").await,
        Ok(Some(ref c)) if c.split_whitespace().any(|c| c.contains("disabled"))
    )
}
