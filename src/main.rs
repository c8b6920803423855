use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::Context;
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::warn;

use trends_scraper::browser::webdriver::WebDriverFactory;
use trends_scraper::config::{Market, OutputFormat, ScrapeConfig, TimeWindow};
use trends_scraper::db;
use trends_scraper::extract::DomRecordExtractor;
use trends_scraper::model::MarketResult;
use trends_scraper::orchestrator::MarketOrchestrator;
use trends_scraper::output;
use trends_scraper::score::{OpenAiScoringClient, ScoreCache, ScoreEnricher};

#[derive(Parser)]
#[command(name = "trends_scraper", about = "Trending-search collector over WebDriver")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scrape every market, score the results and write them out
    Run {
        /// Comma-separated country codes (e.g. "US,GB,DE")
        #[arg(short, long, default_value = "US")]
        markets: String,
        /// Time window in hours: 4, 24 or 48
        #[arg(short, long, default_value = "24")]
        window: TimeWindow,
        /// Output file format: jsonl or csv
        #[arg(short, long, default_value = "jsonl")]
        format: OutputFormat,
        /// Output file path
        #[arg(short, long, default_value = "data/trends.jsonl")]
        output: PathBuf,
        /// SQLite database path
        #[arg(long, default_value = db::DEFAULT_DB_PATH)]
        db: PathBuf,
        /// Skip writing to the database
        #[arg(long)]
        no_db: bool,
        /// Skip relevance scoring
        #[arg(long)]
        no_score: bool,
        /// Show the browser window
        #[arg(long)]
        headful: bool,
        /// Max result pages per market
        #[arg(long)]
        max_pages: Option<u32>,
        /// Seconds to wait between markets
        #[arg(long)]
        delay: Option<u64>,
    },
    /// Show per-market statistics from the database
    Stats {
        #[arg(long, default_value = db::DEFAULT_DB_PATH)]
        db: PathBuf,
    },
    /// List built-in markets
    Markets,
}

struct RunArgs {
    format: OutputFormat,
    output: PathBuf,
    db: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Run {
            markets,
            window,
            format,
            output,
            db,
            no_db,
            no_score,
            headful,
            max_pages,
            delay,
        } => {
            let mut config = ScrapeConfig::from_env();
            config.markets = Market::parse_list(&markets);
            config.window = window;
            config.headless = !headful;
            config.score.enabled = !no_score;
            if let Some(n) = max_pages {
                config.pagination.max_pages = n;
            }
            if let Some(secs) = delay {
                config.inter_market_delay = Duration::from_secs(secs);
            }
            config.validate()?;

            let args = RunArgs {
                format,
                output,
                db: (!no_db).then_some(db),
            };
            run(&config, &args).await
        }
        Commands::Stats { db: path } => {
            let conn = db::connect(&path)?;
            db::init_schema(&conn)?;
            let s = db::get_stats(&conn)?;
            println!("Trends:      {}", s.total);
            println!("Scored:      {}", s.scored);
            println!("Runs:        {}", s.runs);
            println!("Failed runs: {}", s.failed_runs);
            if !s.markets.is_empty() {
                println!();
                println!(
                    "{:<6} | {:>6} | {:>6} | {:<4} | {:<34} | {}",
                    "Market", "Trends", "Scored", "Ok", "Last termination", "Last run"
                );
                println!("{}", "-".repeat(96));
                for m in &s.markets {
                    let ok = match m.last_success {
                        Some(true) => "yes",
                        Some(false) => "no",
                        None => "-",
                    };
                    println!(
                        "{:<6} | {:>6} | {:>6} | {:<4} | {:<34} | {}",
                        m.market_code,
                        m.trends,
                        m.scored,
                        ok,
                        m.last_termination.as_deref().unwrap_or("-"),
                        m.last_run.as_deref().unwrap_or("-"),
                    );
                }
            }
            Ok(())
        }
        Commands::Markets => {
            for m in Market::known() {
                println!("{:<4} {:<8} {}", m.code, m.language, m.name);
            }
            Ok(())
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    result
}

async fn run(config: &ScrapeConfig, args: &RunArgs) -> anyhow::Result<()> {
    let factory = WebDriverFactory::new(&config.webdriver_url, config.headless);
    let extractor = DomRecordExtractor::new(config.locators.clone());

    println!(
        "Scraping {} markets (past {}h) via {}...",
        config.markets.len(),
        config.window.hours(),
        config.webdriver_url
    );
    let pb = ProgressBar::new(config.markets.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40} {pos}/{len} {msg}")?
            .progress_chars("=> "),
    );

    let t_scrape = Instant::now();
    let mut report = MarketOrchestrator::new(config, &factory, &extractor)
        .run_batch(|r| {
            pb.set_message(format!("{}: {} records", r.market.code, r.records.len()));
            pb.inc(1);
        })
        .await;
    pb.finish_and_clear();
    println!(
        "Scraped {} markets ({} ok, {} failed), {} records in {}",
        report.results.len(),
        report.succeeded(),
        report.failed(),
        report.total_records(),
        format_duration(t_scrape.elapsed())
    );

    if config.score.enabled && report.total_records() > 0 {
        match config.score.api_key.as_deref() {
            Some(key) => {
                let client = OpenAiScoringClient::new(&config.score, key)?;
                let cache = ScoreCache::load(&config.score.cache_path);
                let stats = ScoreEnricher::new(&config.score, client, cache)
                    .enrich(&mut report.results)
                    .await;
                println!(
                    "Scored {} records ({} cached, {} unscored)",
                    stats.scored + stats.from_cache,
                    stats.from_cache,
                    stats.unscored
                );
            }
            None => warn!("OPENAI_API_KEY not set, skipping scoring"),
        }
    }

    let written = output::write_results(&args.output, args.format, &report.results)
        .with_context(|| format!("Failed to write {}", args.output.display()))?;
    println!("Wrote {} records to {}", written, args.output.display());

    if let Some(path) = &args.db {
        let conn = db::connect(path)?;
        db::init_schema(&conn)?;
        let inserted = db::save_results(&conn, &report.results)?;
        println!("Inserted {} new trends into {}", inserted, path.display());
    }

    print_summary(&report.results);
    Ok(())
}

fn print_summary(results: &[MarketResult]) {
    println!();
    println!(
        "{:<6} | {:<4} | {:>5} | {:>7} | {}",
        "Market", "Ok", "Pages", "Records", "Termination"
    );
    println!("{}", "-".repeat(72));
    for r in results {
        println!(
            "{:<6} | {:<4} | {:>5} | {:>7} | {}",
            r.market.code,
            if r.success { "yes" } else { "no" },
            r.pages_visited,
            r.records.len(),
            r.termination
        );
        if let Some(err) = &r.error {
            println!("       {}", truncate(err, 90));
        }
    }
}

fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max).collect();
        format!("{}...", truncated)
    }
}
