use chrono::Utc;
use tracing::{error, info, warn};

use crate::browser::SessionFactory;
use crate::config::{Market, ScrapeConfig};
use crate::extract::RecordExtractor;
use crate::model::{MarketResult, TerminationReason, TrendRecord};
use crate::paginate::PaginationController;

/// Results of one batch, in the order markets were configured.
#[derive(Debug, Default)]
pub struct BatchReport {
    pub results: Vec<MarketResult>,
}

impl BatchReport {
    pub fn succeeded(&self) -> usize {
        self.results.iter().filter(|r| r.success).count()
    }

    pub fn failed(&self) -> usize {
        self.results.len() - self.succeeded()
    }

    pub fn total_records(&self) -> usize {
        self.results.iter().map(|r| r.records.len()).sum()
    }

    pub fn records(&self) -> impl Iterator<Item = (&Market, &TrendRecord)> {
        self.results
            .iter()
            .flat_map(|r| r.records.iter().map(move |rec| (&r.market, rec)))
    }
}

/// Runs one pagination loop per market, strictly one after another.
pub struct MarketOrchestrator<'a, F, X> {
    config: &'a ScrapeConfig,
    factory: &'a F,
    extractor: &'a X,
}

impl<'a, F, X> MarketOrchestrator<'a, F, X>
where
    F: SessionFactory,
    X: RecordExtractor<F::Page>,
{
    pub fn new(config: &'a ScrapeConfig, factory: &'a F, extractor: &'a X) -> Self {
        Self {
            config,
            factory,
            extractor,
        }
    }

    /// Process every configured market. A failed market never stops the batch.
    pub async fn run_batch<C>(&self, mut on_market: C) -> BatchReport
    where
        C: FnMut(&MarketResult),
    {
        let markets = &self.config.markets;
        let mut report = BatchReport::default();

        for (i, market) in markets.iter().enumerate() {
            let result = self.run_market(market).await;
            on_market(&result);
            report.results.push(result);

            if i + 1 < markets.len() && !self.config.inter_market_delay.is_zero() {
                tokio::time::sleep(self.config.inter_market_delay).await;
            }
        }

        info!(
            "Batch done: {} markets ({} ok, {} failed), {} records",
            report.results.len(),
            report.succeeded(),
            report.failed(),
            report.total_records()
        );
        report
    }

    /// Open a session, paginate, and always close the session again.
    pub async fn run_market(&self, market: &Market) -> MarketResult {
        let url = self.config.market_url(market);
        info!("Scraping {} ({}): {}", market.name, market.code, url);

        let page = match self.factory.open().await {
            Ok(page) => page,
            Err(e) => {
                error!("Could not open browser session for {}: {}", market.code, e);
                return MarketResult {
                    market: market.clone(),
                    scraped_at: Utc::now(),
                    records: Vec::new(),
                    success: false,
                    error: Some(e.to_string()),
                    termination: TerminationReason::SessionError,
                    pages_visited: 0,
                };
            }
        };

        let outcome = PaginationController::new(&self.config.pagination, self.extractor)
            .run(&page, &url)
            .await;
        self.factory.close(page).await;

        if !outcome.success {
            warn!(
                "{} failed: {} ({})",
                market.code,
                outcome.termination,
                outcome.error.as_deref().unwrap_or("no detail")
            );
        }

        MarketResult {
            market: market.clone(),
            scraped_at: Utc::now(),
            records: outcome.records,
            success: outcome.success,
            error: outcome.error,
            termination: outcome.termination,
            pages_visited: outcome.pages_visited,
        }
    }
}
