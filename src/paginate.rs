use tracing::{debug, error, info, warn};

use crate::browser::{self, BrowserError, Page};
use crate::config::PaginationPolicy;
use crate::extract::{NextControl, RecordExtractor};
use crate::model::{TerminationReason, TrendRecord};

/// Loop bookkeeping for one market. `current_page` is 1-based and only grows.
#[derive(Debug)]
pub struct PaginationState {
    pub current_page: u32,
    pub records: Vec<TrendRecord>,
    pub last_fingerprint: Option<String>,
    pub consecutive_empty_pages: u32,
}

impl PaginationState {
    fn new() -> Self {
        Self {
            current_page: 1,
            records: Vec::new(),
            last_fingerprint: None,
            consecutive_empty_pages: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Loading,
    Extracting,
    DecidingAdvance,
    Advancing,
    Terminated(TerminationReason),
}

#[derive(Debug)]
pub struct PaginationOutcome {
    pub records: Vec<TrendRecord>,
    pub success: bool,
    pub termination: TerminationReason,
    pub error: Option<String>,
    /// Pages whose content was extracted; 0 when the first load failed.
    pub pages_visited: u32,
}

/// Drives one market's result view page by page until a terminal condition.
pub struct PaginationController<'a, X> {
    policy: &'a PaginationPolicy,
    extractor: &'a X,
}

impl<'a, X> PaginationController<'a, X> {
    pub fn new(policy: &'a PaginationPolicy, extractor: &'a X) -> Self {
        Self { policy, extractor }
    }

    pub async fn run<P>(&self, page: &P, url: &str) -> PaginationOutcome
    where
        P: Page,
        X: RecordExtractor<P>,
    {
        let mut state = PaginationState::new();
        let mut step = Step::Loading;
        let mut success = true;
        let mut error = None;
        let mut pages_visited = 0;

        let termination = loop {
            step = match step {
                Step::Loading => match self.load(page, url).await {
                    Ok(()) => Step::Extracting,
                    Err(e) => {
                        warn!("Initial load failed for {}: {}", url, e);
                        success = false;
                        error = Some(format!("initial load: {}", e));
                        Step::Terminated(match e {
                            BrowserError::Timeout(_) => TerminationReason::TimeoutInitialLoad,
                            _ => TerminationReason::LoadFailed,
                        })
                    }
                },

                Step::Extracting => {
                    let extraction = self.extractor.extract(page).await;
                    pages_visited = state.current_page;
                    debug!(
                        "Page {}: {} records ({} skipped)",
                        state.current_page,
                        extraction.records.len(),
                        extraction.skipped
                    );

                    if extraction.records.is_empty() {
                        if state.current_page == 1 {
                            success = false;
                            error = Some("no records on first page".to_string());
                            Step::Terminated(TerminationReason::EmptyFirstPage)
                        } else {
                            state.consecutive_empty_pages += 1;
                            if state.consecutive_empty_pages > self.policy.empty_page_tolerance {
                                Step::Terminated(TerminationReason::RepeatedEmptyPages)
                            } else {
                                warn!(
                                    "Page {} came back empty, treating as transient",
                                    state.current_page
                                );
                                Step::DecidingAdvance
                            }
                        }
                    } else {
                        state.consecutive_empty_pages = 0;
                        state.last_fingerprint = extraction.records.first().map(|r| r.title.clone());
                        state.records.extend(extraction.records);
                        Step::DecidingAdvance
                    }
                }

                Step::DecidingAdvance => match self.extractor.next_control(page).await {
                    NextControl::Absent => Step::Terminated(TerminationReason::EndOfDataNoControl),
                    NextControl::Disabled => {
                        Step::Terminated(TerminationReason::EndOfDataControlDisabled)
                    }
                    NextControl::Enabled if state.current_page >= self.policy.max_pages => {
                        warn!(
                            "Page cap {} reached with the next control still enabled",
                            self.policy.max_pages
                        );
                        error = Some(format!("stopped at page cap {}", self.policy.max_pages));
                        Step::Terminated(TerminationReason::PageCapReached)
                    }
                    NextControl::Enabled => Step::Advancing,
                },

                Step::Advancing => match self.advance(page, &state).await {
                    Ok(()) => {
                        state.current_page += 1;
                        Step::Extracting
                    }
                    Err(e) => {
                        error!("Pagination failed after page {}: {}", state.current_page, e);
                        error = Some(format!("advance after page {}: {}", state.current_page, e));
                        Step::Terminated(match e {
                            BrowserError::Timeout(_) => TerminationReason::AdvanceTimeout,
                            _ => TerminationReason::AdvanceFailed,
                        })
                    }
                },

                Step::Terminated(reason) => break reason,
            };
        };

        if termination.is_end_of_data() {
            info!(
                "Pagination finished: {} ({} records over {} pages)",
                termination,
                state.records.len(),
                pages_visited
            );
        } else {
            warn!(
                "Pagination stopped early: {} ({} records over {} pages)",
                termination,
                state.records.len(),
                pages_visited
            );
        }

        PaginationOutcome {
            records: state.records,
            success,
            termination,
            error,
            pages_visited,
        }
    }

    async fn load<P>(&self, page: &P, url: &str) -> Result<(), BrowserError>
    where
        P: Page,
        X: RecordExtractor<P>,
    {
        browser::load(
            page,
            url,
            self.extractor.row_locator(),
            self.policy.load_timeout,
            self.policy.poll_interval,
        )
        .await
    }

    /// Click next, then wait for the first row to vanish or change.
    async fn advance<P>(&self, page: &P, state: &PaginationState) -> Result<(), BrowserError>
    where
        P: Page,
        X: RecordExtractor<P>,
    {
        let before = match self.extractor.fingerprint(page).await {
            Some(fp) => Some(fp),
            None => state.last_fingerprint.clone(),
        };
        self.extractor.click_next(page).await?;

        let extractor = self.extractor;
        let before = &before;
        browser::wait_until(
            self.policy.advance_timeout,
            self.policy.poll_interval,
            "page content to change",
            move || async move {
                match extractor.fingerprint(page).await {
                    None => true,
                    Some(now) => before.as_deref() != Some(now.as_str()),
                }
            },
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::browser::scripted::{FixturePage, NextFixture, RowFixture, ScriptedPage};
    use crate::extract::{DomRecordExtractor, RowLocatorSet};

    const URL: &str = "https://trends.test/trending?geo=US";

    fn policy() -> PaginationPolicy {
        PaginationPolicy {
            load_timeout: Duration::from_secs(10),
            advance_timeout: Duration::from_secs(12),
            poll_interval: Duration::from_millis(100),
            max_pages: 20,
            empty_page_tolerance: 1,
        }
    }

    fn rows(page: usize, n: usize) -> Vec<RowFixture> {
        (0..n)
            .map(|i| RowFixture::new(&format!("p{}-r{}", page, i), "10K+100", "2 hours ago"))
            .collect()
    }

    fn fixture(page: usize, n: usize, next: NextFixture) -> FixturePage {
        FixturePage::rows(&RowLocatorSet::default(), &rows(page, n), next)
    }

    async fn run(pages: Vec<FixturePage>, policy: &PaginationPolicy) -> (PaginationOutcome, ScriptedPage) {
        let page = ScriptedPage::new(pages);
        let extractor = DomRecordExtractor::default();
        let outcome = PaginationController::new(policy, &extractor).run(&page, URL).await;
        (outcome, page)
    }

    fn titles(outcome: &PaginationOutcome) -> Vec<&str> {
        outcome.records.iter().map(|r| r.title.as_str()).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn three_pages_until_control_disabled() {
        let (outcome, page) = run(
            vec![
                fixture(1, 3, NextFixture::Enabled),
                fixture(2, 3, NextFixture::Enabled),
                fixture(3, 2, NextFixture::Disabled),
            ],
            &policy(),
        )
        .await;

        assert_eq!(outcome.termination, TerminationReason::EndOfDataControlDisabled);
        assert!(outcome.success);
        assert!(outcome.error.is_none());
        assert_eq!(outcome.pages_visited, 3);
        assert_eq!(
            titles(&outcome),
            vec!["p1-r0", "p1-r1", "p1-r2", "p2-r0", "p2-r1", "p2-r2", "p3-r0", "p3-r1"]
        );
        assert_eq!(page.clicks(), 2);
        assert_eq!(page.visited(), vec![URL.to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn absent_control_stops_after_that_page() {
        let (outcome, _) = run(
            vec![
                fixture(1, 2, NextFixture::Enabled),
                fixture(2, 2, NextFixture::Absent),
                fixture(3, 2, NextFixture::Enabled),
            ],
            &policy(),
        )
        .await;
        assert_eq!(outcome.termination, TerminationReason::EndOfDataNoControl);
        assert_eq!(titles(&outcome), vec!["p1-r0", "p1-r1", "p2-r0", "p2-r1"]);
    }

    #[tokio::test(start_paused = true)]
    async fn page_cap_breaks_endless_pager() {
        let pages: Vec<FixturePage> = (1..=50).map(|i| fixture(i, 1, NextFixture::Enabled)).collect();
        let policy = PaginationPolicy {
            max_pages: 5,
            ..policy()
        };
        let (outcome, page) = run(pages, &policy).await;
        assert_eq!(outcome.termination, TerminationReason::PageCapReached);
        assert!(outcome.success);
        assert!(outcome.error.is_some());
        assert_eq!(outcome.records.len(), 5);
        assert_eq!(outcome.pages_visited, 5);
        assert_eq!(page.clicks(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn single_empty_page_is_tolerated() {
        let (outcome, _) = run(
            vec![
                fixture(1, 2, NextFixture::Enabled),
                fixture(2, 0, NextFixture::Enabled),
                fixture(3, 2, NextFixture::Absent),
            ],
            &policy(),
        )
        .await;
        assert_eq!(outcome.termination, TerminationReason::EndOfDataNoControl);
        assert_eq!(titles(&outcome), vec!["p1-r0", "p1-r1", "p3-r0", "p3-r1"]);
    }

    #[tokio::test(start_paused = true)]
    async fn two_empty_pages_end_the_run() {
        let (outcome, _) = run(
            vec![
                fixture(1, 2, NextFixture::Enabled),
                fixture(2, 2, NextFixture::Enabled),
                fixture(3, 0, NextFixture::Enabled),
                fixture(4, 0, NextFixture::Enabled),
                fixture(5, 2, NextFixture::Enabled),
            ],
            &policy(),
        )
        .await;
        assert_eq!(outcome.termination, TerminationReason::RepeatedEmptyPages);
        assert!(outcome.success);
        assert_eq!(titles(&outcome), vec!["p1-r0", "p1-r1", "p2-r0", "p2-r1"]);
        assert_eq!(outcome.pages_visited, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn empty_page_tolerance_is_tunable() {
        let policy = PaginationPolicy {
            empty_page_tolerance: 0,
            ..policy()
        };
        let (outcome, _) = run(
            vec![
                fixture(1, 2, NextFixture::Enabled),
                fixture(2, 0, NextFixture::Enabled),
                fixture(3, 2, NextFixture::Absent),
            ],
            &policy,
        )
        .await;
        assert_eq!(outcome.termination, TerminationReason::RepeatedEmptyPages);
        assert_eq!(outcome.records.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn empty_first_page_is_a_failure() {
        let loc = RowLocatorSet::default();
        // Rows present for the load wait, but none of them parse.
        let broken = FixturePage::rows(
            &loc,
            &[RowFixture::new("x", "1K", "now").without_volume()],
            NextFixture::Enabled,
        );
        let (outcome, _) = run(vec![broken], &policy()).await;
        assert_eq!(outcome.termination, TerminationReason::EmptyFirstPage);
        assert!(!outcome.success);
        assert!(outcome.records.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn initial_load_timeout() {
        let started = tokio::time::Instant::now();
        let (outcome, _) = run(vec![FixturePage::blank()], &policy()).await;
        assert_eq!(outcome.termination, TerminationReason::TimeoutInitialLoad);
        assert!(!outcome.success);
        assert_eq!(outcome.pages_visited, 0);
        assert!(outcome.error.as_deref().unwrap_or("").contains("initial load"));
        assert!(started.elapsed() >= Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn unreachable_site_fails_load() {
        let page = ScriptedPage::unreachable();
        let extractor = DomRecordExtractor::default();
        let policy = policy();
        let outcome = PaginationController::new(&policy, &extractor).run(&page, URL).await;
        assert_eq!(outcome.termination, TerminationReason::LoadFailed);
        assert!(!outcome.success);
        assert!(outcome.error.as_deref().unwrap_or("").contains("navigation failed"));
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_pager_times_out_but_keeps_data() {
        let (outcome, _) = run(
            vec![
                fixture(1, 2, NextFixture::Enabled),
                fixture(2, 2, NextFixture::Enabled).stalled(),
                fixture(3, 2, NextFixture::Enabled),
            ],
            &policy(),
        )
        .await;
        assert_eq!(outcome.termination, TerminationReason::AdvanceTimeout);
        assert!(outcome.success);
        assert!(outcome.error.is_some());
        assert_eq!(titles(&outcome), vec!["p1-r0", "p1-r1", "p2-r0", "p2-r1"]);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_click_is_not_a_timeout() {
        let (outcome, _) = run(
            vec![
                fixture(1, 2, NextFixture::Enabled).jammed(),
                fixture(2, 2, NextFixture::Disabled),
            ],
            &policy(),
        )
        .await;
        assert_eq!(outcome.termination, TerminationReason::AdvanceFailed);
        assert!(outcome.success);
        assert_eq!(outcome.records.len(), 2);
        assert!(outcome.error.as_deref().unwrap_or("").contains("click intercepted"));
    }

    #[tokio::test(start_paused = true)]
    async fn identical_next_page_is_not_a_change() {
        // Page 2 re-renders with the same first row as page 1.
        let (outcome, _) = run(
            vec![fixture(1, 2, NextFixture::Enabled), fixture(1, 2, NextFixture::Enabled)],
            &policy(),
        )
        .await;
        assert_eq!(outcome.termination, TerminationReason::AdvanceTimeout);
        assert_eq!(outcome.records.len(), 2);
    }
}
