use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::extract::RowLocatorSet;

pub const DEFAULT_BASE_URL: &str = "https://trends.google.com/trending";
pub const DEFAULT_WEBDRIVER_URL: &str = "http://localhost:9515";
pub const DEFAULT_SCORE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_SCORE_MODEL: &str = "gpt-4o-mini";

/// (code, language, name)
const KNOWN_MARKETS: &[(&str, &str, &str)] = &[
    ("US", "en-US", "United States"),
    ("GB", "en-GB", "United Kingdom"),
    ("CA", "en-CA", "Canada"),
    ("AU", "en-AU", "Australia"),
    ("IN", "en-IN", "India"),
    ("DE", "de", "Germany"),
    ("FR", "fr", "France"),
    ("ES", "es", "Spain"),
    ("IT", "it", "Italy"),
    ("BR", "pt-BR", "Brazil"),
    ("MX", "es-419", "Mexico"),
    ("JP", "ja", "Japan"),
    ("KR", "ko", "South Korea"),
    ("TW", "zh-TW", "Taiwan"),
    ("NL", "nl", "Netherlands"),
];

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid config: {0}")]
    Invalid(String),
    #[error("unknown time window '{0}' (expected 4, 24 or 48)")]
    TimeWindow(String),
    #[error("unknown output format '{0}' (expected jsonl or csv)")]
    Format(String),
}

/// One country/language combination scraped independently.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Market {
    pub code: String,
    pub language: String,
    pub name: String,
}

impl Market {
    /// Resolve a country code against the built-in table; unknown codes get `en-US`.
    pub fn from_code(code: &str) -> Self {
        let code = code.trim().to_ascii_uppercase();
        match KNOWN_MARKETS.iter().find(|(c, _, _)| *c == code) {
            Some((c, lang, name)) => Market {
                code: c.to_string(),
                language: lang.to_string(),
                name: name.to_string(),
            },
            None => Market {
                language: "en-US".to_string(),
                name: code.clone(),
                code,
            },
        }
    }

    pub fn known() -> Vec<Market> {
        KNOWN_MARKETS.iter().map(|(c, _, _)| Market::from_code(c)).collect()
    }

    /// Parse a comma-separated list like `US,gb, de`.
    pub fn parse_list(s: &str) -> Vec<Market> {
        s.split(',')
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(Market::from_code)
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimeWindow {
    Past4Hours,
    #[default]
    Past24Hours,
    Past48Hours,
}

impl TimeWindow {
    pub fn hours(&self) -> u32 {
        match self {
            TimeWindow::Past4Hours => 4,
            TimeWindow::Past24Hours => 24,
            TimeWindow::Past48Hours => 48,
        }
    }
}

impl FromStr for TimeWindow {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().trim_end_matches('h') {
            "4" => Ok(TimeWindow::Past4Hours),
            "24" => Ok(TimeWindow::Past24Hours),
            "48" => Ok(TimeWindow::Past48Hours),
            other => Err(ConfigError::TimeWindow(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Jsonl,
    Csv,
}

impl FromStr for OutputFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "jsonl" | "json" => Ok(OutputFormat::Jsonl),
            "csv" => Ok(OutputFormat::Csv),
            other => Err(ConfigError::Format(other.to_string())),
        }
    }
}

/// Timing and circuit-breaker knobs for one market's pagination loop.
#[derive(Debug, Clone)]
pub struct PaginationPolicy {
    pub load_timeout: Duration,
    /// Longer than `load_timeout`'s typical need: in-place re-render can lag the first load.
    pub advance_timeout: Duration,
    pub poll_interval: Duration,
    pub max_pages: u32,
    /// Empty pages (after the first) tolerated in a row before inferring end-of-data.
    pub empty_page_tolerance: u32,
}

impl Default for PaginationPolicy {
    fn default() -> Self {
        Self {
            load_timeout: Duration::from_secs(30),
            advance_timeout: Duration::from_secs(12),
            poll_interval: Duration::from_millis(250),
            max_pages: 20,
            empty_page_tolerance: 1,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ScoreConfig {
    pub enabled: bool,
    pub api_url: String,
    pub api_key: Option<String>,
    pub model: String,
    pub batch_size: usize,
    pub max_attempts: u32,
    pub retry_backoff: Duration,
    pub inter_batch_delay: Duration,
    pub request_timeout: Duration,
    pub cache_path: PathBuf,
}

impl Default for ScoreConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            api_url: DEFAULT_SCORE_URL.to_string(),
            api_key: None,
            model: DEFAULT_SCORE_MODEL.to_string(),
            batch_size: 20,
            max_attempts: 3,
            retry_backoff: Duration::from_secs(2),
            inter_batch_delay: Duration::from_secs(1),
            request_timeout: Duration::from_secs(60),
            cache_path: PathBuf::from("data/score_cache.json"),
        }
    }
}

/// Everything a batch run needs, built once and passed down by construction.
#[derive(Debug, Clone)]
pub struct ScrapeConfig {
    pub base_url: String,
    pub webdriver_url: String,
    pub headless: bool,
    pub markets: Vec<Market>,
    pub window: TimeWindow,
    pub inter_market_delay: Duration,
    pub pagination: PaginationPolicy,
    pub locators: RowLocatorSet,
    pub score: ScoreConfig,
}

impl Default for ScrapeConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            webdriver_url: DEFAULT_WEBDRIVER_URL.to_string(),
            headless: true,
            markets: vec![Market::from_code("US")],
            window: TimeWindow::default(),
            inter_market_delay: Duration::from_secs(5),
            pagination: PaginationPolicy::default(),
            locators: RowLocatorSet::default(),
            score: ScoreConfig::default(),
        }
    }
}

impl ScrapeConfig {
    /// Defaults overlaid with `TRENDS_*` / `OPENAI_API_KEY` environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();
        let secs = |key: &str| lookup(key).and_then(|v| v.trim().parse::<u64>().ok());

        if let Some(v) = lookup("TRENDS_BASE_URL") {
            cfg.base_url = v;
        }
        if let Some(v) = lookup("TRENDS_WEBDRIVER_URL") {
            cfg.webdriver_url = v;
        }
        if let Some(v) = secs("TRENDS_LOAD_TIMEOUT_SECS") {
            cfg.pagination.load_timeout = Duration::from_secs(v);
        }
        if let Some(v) = secs("TRENDS_ADVANCE_TIMEOUT_SECS") {
            cfg.pagination.advance_timeout = Duration::from_secs(v);
        }
        if let Some(v) = lookup("TRENDS_MAX_PAGES").and_then(|v| v.trim().parse().ok()) {
            cfg.pagination.max_pages = v;
        }
        if let Some(v) = lookup("TRENDS_SCORE_URL") {
            cfg.score.api_url = v;
        }
        if let Some(v) = lookup("TRENDS_SCORE_MODEL") {
            cfg.score.model = v;
        }
        cfg.score.api_key = lookup("OPENAI_API_KEY").filter(|k| !k.trim().is_empty());
        cfg
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.markets.is_empty() {
            return Err(ConfigError::Invalid("at least one market is required".into()));
        }
        if self.pagination.max_pages == 0 {
            return Err(ConfigError::Invalid("max_pages must be greater than 0".into()));
        }
        if self.pagination.load_timeout.is_zero() || self.pagination.advance_timeout.is_zero() {
            return Err(ConfigError::Invalid("timeouts must be greater than 0".into()));
        }
        if self.pagination.poll_interval.is_zero() {
            return Err(ConfigError::Invalid("poll_interval must be greater than 0".into()));
        }
        if self.score.batch_size == 0 {
            return Err(ConfigError::Invalid("score batch_size must be greater than 0".into()));
        }
        Ok(())
    }

    /// `{base}?geo=US&hl=en-US&hours=24`
    pub fn market_url(&self, market: &Market) -> String {
        format!(
            "{}?geo={}&hl={}&hours={}",
            self.base_url,
            market.code,
            market.language,
            self.window.hours()
        )
    }
}
