use std::time::Duration;

use trends_scraper::browser::scripted::{FixturePage, NextFixture, RowFixture, ScriptedFactory, ScriptedPage};
use trends_scraper::config::{Market, OutputFormat, ScrapeConfig};
use trends_scraper::db;
use trends_scraper::extract::{DomRecordExtractor, RowLocatorSet};
use trends_scraper::model::{TerminationReason, TrendStatus};
use trends_scraper::orchestrator::MarketOrchestrator;
use trends_scraper::output;
use trends_scraper::score::{ScoreCache, ScoreEnricher, ScoreError, ScoreItem, ScoreRequestItem, ScoringClient};

struct DownScorer;

impl ScoringClient for DownScorer {
    async fn score_batch(&self, _items: &[ScoreRequestItem]) -> Result<Vec<ScoreItem>, ScoreError> {
        Err(ScoreError::Http("status 500".into()))
    }
}

struct FlatScorer(f64);

impl ScoringClient for FlatScorer {
    async fn score_batch(&self, items: &[ScoreRequestItem]) -> Result<Vec<ScoreItem>, ScoreError> {
        Ok(items.iter().map(|i| ScoreItem { id: i.id, score: self.0 }).collect())
    }
}

fn config() -> ScrapeConfig {
    let mut cfg = ScrapeConfig::default();
    cfg.markets = Market::parse_list("US,GB");
    cfg.inter_market_delay = Duration::from_secs(2);
    cfg.score.inter_batch_delay = Duration::ZERO;
    cfg
}

/// US: two pages then a disabled control. GB: the dashboard never renders.
fn factory() -> ScriptedFactory {
    let loc = RowLocatorSet::default();
    let us = ScriptedPage::new(vec![
        FixturePage::rows(
            &loc,
            &[
                RowFixture::new("  Super   Bowl ", "1M+ arrow_upward 1,000%", "3 hours ago")
                    .active()
                    .breakdown(&["super bowl score", "Super Bowl Score", "query_stats"]),
                RowFixture::new("Eclipse", "50K+", "10 hours ago"),
                RowFixture::new("broken", "", "1 hour ago").without_volume(),
            ],
            NextFixture::Enabled,
        ),
        FixturePage::rows(
            &loc,
            &[RowFixture::new("Election", "200K+", "trending_up 2 hours ago")],
            NextFixture::Disabled,
        ),
    ]);
    ScriptedFactory::new()
        .push(us)
        .push(ScriptedPage::new(vec![FixturePage::blank()]))
}

#[tokio::test(start_paused = true)]
async fn batch_survives_failed_market_and_scoring_outage() {
    let cfg = config();
    let factory = factory();
    let extractor = DomRecordExtractor::default();

    let mut report = MarketOrchestrator::new(&cfg, &factory, &extractor)
        .run_batch(|_| {})
        .await;

    assert_eq!(report.succeeded(), 1);
    assert_eq!(report.failed(), 1);

    let us = &report.results[0];
    assert_eq!(us.termination, TerminationReason::EndOfDataControlDisabled);
    assert_eq!(us.pages_visited, 2);
    let titles: Vec<&str> = us.records.iter().map(|r| r.title.as_str()).collect();
    assert_eq!(titles, vec!["Super Bowl", "Eclipse", "Election"]);

    let first = &us.records[0];
    assert_eq!(first.status, TrendStatus::Active);
    assert_eq!(first.volume.magnitude, 1_000_000);
    assert_eq!(first.breakdown, vec!["super bowl score"]);

    let gb = &report.results[1];
    assert!(!gb.success);
    assert_eq!(gb.termination, TerminationReason::TimeoutInitialLoad);
    assert!(gb.records.is_empty());

    let stats = ScoreEnricher::new(&cfg.score, DownScorer, ScoreCache::in_memory())
        .enrich(&mut report.results)
        .await;
    assert_eq!(stats.unscored, 3);
    assert!(report.results[0].records.iter().all(|r| r.score.is_none()));

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("trends.csv");
    let written = output::write_results(&path, OutputFormat::Csv, &report.results).unwrap();
    assert_eq!(written, 3);

    let back = output::read_records(&path, OutputFormat::Csv).unwrap();
    assert_eq!(back.len(), 3);
    assert!(back.iter().all(|r| r.market == "US" && r.score.is_none()));
    assert_eq!(back[0].to_record(), report.results[0].records[0]);
}

#[tokio::test(start_paused = true)]
async fn scored_batch_lands_in_file_and_database() {
    let cfg = config();
    let factory = factory();
    let extractor = DomRecordExtractor::default();

    let mut report = MarketOrchestrator::new(&cfg, &factory, &extractor)
        .run_batch(|_| {})
        .await;

    let dir = tempfile::tempdir().unwrap();
    let cache_path = dir.path().join("scores.json");
    let stats = ScoreEnricher::new(&cfg.score, FlatScorer(64.0), ScoreCache::load(&cache_path))
        .enrich(&mut report.results)
        .await;
    assert_eq!(stats.scored, 3);
    assert_eq!(ScoreCache::load(&cache_path).len(), 3);

    let out = dir.path().join("trends.jsonl");
    output::write_results(&out, OutputFormat::Jsonl, &report.results).unwrap();
    let back = output::read_records(&out, OutputFormat::Jsonl).unwrap();
    assert!(back.iter().all(|r| r.score == Some(64.0)));

    let conn = db::connect(&dir.path().join("trends.sqlite")).unwrap();
    db::init_schema(&conn).unwrap();
    assert_eq!(db::save_results(&conn, &report.results).unwrap(), 3);
    assert_eq!(db::save_results(&conn, &report.results).unwrap(), 0);

    let s = db::get_stats(&conn).unwrap();
    assert_eq!(s.total, 3);
    assert_eq!(s.scored, 3);
    assert_eq!(s.failed_runs, 2);
}
