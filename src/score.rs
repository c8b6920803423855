//! Relevance scoring of collected trends.
//!
//! Records are sent in fixed-size batches to a [`ScoringClient`]. Each batch
//! is retried a bounded number of times with linear backoff; a batch that
//! still fails is left unscored rather than failing the run. Scores are kept
//! in a [`ScoreCache`] keyed by `(market, title)` and flushed to disk after
//! every successful batch.

use std::collections::HashMap;
use std::fs;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::ScoreConfig;
use crate::model::MarketResult;

const SYSTEM_PROMPT: &str = "You rate trending search topics for general newsworthiness and \
audience interest. You receive a JSON array of objects {\"id\", \"title\", \"breakdown\"}. \
Reply with ONLY a JSON array of objects {\"id\": <same id>, \"score\": <number 0-100>}, \
one entry for every id you received, in the same order.";

#[derive(Debug, thiserror::Error)]
pub enum ScoreError {
    #[error("HTTP error: {0}")]
    Http(String),
    #[error("malformed scoring response: {0}")]
    Malformed(String),
    #[error("response missing ids: {0:?}")]
    Incomplete(Vec<u64>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreRequestItem {
    pub id: u64,
    pub title: String,
    pub breakdown: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreItem {
    pub id: u64,
    pub score: f64,
}

/// The external scoring boundary: one ordered batch in, one score per id out.
pub trait ScoringClient {
    fn score_batch(
        &self,
        items: &[ScoreRequestItem],
    ) -> impl Future<Output = Result<Vec<ScoreItem>, ScoreError>>;
}

// ── Cache ──

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ScoreKey {
    pub market: String,
    pub title: String,
}

impl ScoreKey {
    pub fn new(market: &str, title: &str) -> Self {
        Self {
            market: market.to_string(),
            title: title.to_string(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct CacheEntry {
    market: String,
    title: String,
    score: f64,
}

/// Persistent `(market, title) -> score` map.
#[derive(Debug, Default)]
pub struct ScoreCache {
    path: Option<PathBuf>,
    scores: HashMap<ScoreKey, f64>,
}

impl ScoreCache {
    /// In-memory only; `persist` is a no-op.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Load from `path`. A missing file is an empty cache; a corrupt one is
    /// logged and replaced on the next persist. A file that exists but cannot
    /// be read is left alone: the cache stays in memory only.
    pub fn load(path: &Path) -> Self {
        let mut cache = Self {
            path: Some(path.to_path_buf()),
            scores: HashMap::new(),
        };
        let raw = match fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return cache,
            Err(e) => {
                warn!(
                    "Cannot read score cache {}: {}; scores will not be persisted",
                    path.display(),
                    e
                );
                cache.path = None;
                return cache;
            }
        };
        match serde_json::from_str::<Vec<CacheEntry>>(&raw) {
            Ok(entries) => {
                cache.merge(
                    entries
                        .into_iter()
                        .map(|e| (ScoreKey { market: e.market, title: e.title }, e.score)),
                );
                info!("Loaded {} cached scores from {}", cache.len(), path.display());
            }
            Err(e) => warn!("Ignoring unreadable score cache {}: {}", path.display(), e),
        }
        cache
    }

    pub fn get(&self, key: &ScoreKey) -> Option<f64> {
        self.scores.get(key).copied()
    }

    pub fn merge<I>(&mut self, scores: I)
    where
        I: IntoIterator<Item = (ScoreKey, f64)>,
    {
        self.scores.extend(scores);
    }

    pub fn len(&self) -> usize {
        self.scores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }

    /// Write the whole cache via a temp file and rename.
    pub fn persist(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create {}", dir.display()))?;
        }
        let mut entries: Vec<CacheEntry> = self
            .scores
            .iter()
            .map(|(k, v)| CacheEntry {
                market: k.market.clone(),
                title: k.title.clone(),
                score: *v,
            })
            .collect();
        entries.sort_by(|a, b| (&a.market, &a.title).cmp(&(&b.market, &b.title)));

        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(&entries)?)
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        fs::rename(&tmp, path).with_context(|| format!("Failed to replace {}", path.display()))?;
        Ok(())
    }
}

// ── Enricher ──

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct EnrichStats {
    pub from_cache: usize,
    pub scored: usize,
    pub unscored: usize,
    pub failed_batches: usize,
}

pub struct ScoreEnricher<'a, C> {
    config: &'a ScoreConfig,
    client: C,
    cache: ScoreCache,
}

impl<'a, C: ScoringClient> ScoreEnricher<'a, C> {
    pub fn new(config: &'a ScoreConfig, client: C, cache: ScoreCache) -> Self {
        Self {
            config,
            client,
            cache,
        }
    }

    pub fn cache(&self) -> &ScoreCache {
        &self.cache
    }

    /// Attach scores to every record it can. Never fails the run; only a
    /// cache write error is reported, and only as a warning.
    pub async fn enrich(&mut self, results: &mut [MarketResult]) -> EnrichStats {
        let mut stats = EnrichStats::default();

        // (market index, record index) of every record still needing a score.
        let mut pending: Vec<(usize, usize)> = Vec::new();
        for (mi, result) in results.iter_mut().enumerate() {
            let code = result.market.code.clone();
            for (ri, record) in result.records.iter_mut().enumerate() {
                let key = ScoreKey::new(&code, &record.title);
                if let Some(score) = self.cache.get(&key) {
                    record.score = Some(score);
                    stats.from_cache += 1;
                } else {
                    pending.push((mi, ri));
                }
            }
        }
        debug!("{} records cached, {} to score", stats.from_cache, pending.len());

        let batches: Vec<&[(usize, usize)]> = pending.chunks(self.config.batch_size).collect();
        let batch_count = batches.len();
        for (bi, batch) in batches.into_iter().enumerate() {
            let items: Vec<ScoreRequestItem> = batch
                .iter()
                .enumerate()
                .map(|(i, &(mi, ri))| {
                    let record = &results[mi].records[ri];
                    ScoreRequestItem {
                        id: i as u64,
                        title: record.title.clone(),
                        breakdown: record.breakdown.join(", "),
                    }
                })
                .collect();

            match self.score_with_retry(&items, bi + 1, batch_count).await {
                Some(scores) => {
                    let mut fresh = Vec::with_capacity(batch.len());
                    for (i, &(mi, ri)) in batch.iter().enumerate() {
                        let Some(score) = scores.get(&(i as u64)).copied() else {
                            continue;
                        };
                        let code = results[mi].market.code.clone();
                        let record = &mut results[mi].records[ri];
                        record.score = Some(score);
                        fresh.push((ScoreKey::new(&code, &record.title), score));
                        stats.scored += 1;
                    }
                    self.cache.merge(fresh);
                    if let Err(e) = self.cache.persist() {
                        warn!("Failed to persist score cache: {:#}", e);
                    }
                }
                None => {
                    stats.failed_batches += 1;
                    stats.unscored += batch.len();
                }
            }

            if bi + 1 < batch_count && !self.config.inter_batch_delay.is_zero() {
                tokio::time::sleep(self.config.inter_batch_delay).await;
            }
        }

        info!(
            "Scoring: {} from cache, {} scored, {} unscored ({} failed batches)",
            stats.from_cache, stats.scored, stats.unscored, stats.failed_batches
        );
        stats
    }

    async fn score_with_retry(
        &self,
        items: &[ScoreRequestItem],
        batch_no: usize,
        batch_count: usize,
    ) -> Option<HashMap<u64, f64>> {
        let attempts = self.config.max_attempts.max(1);
        for attempt in 1..=attempts {
            match self.client.score_batch(items).await.and_then(|s| validate(items, s)) {
                Ok(scores) => return Some(scores),
                Err(e) => warn!(
                    "Scoring batch {}/{} failed (attempt {}/{}): {}",
                    batch_no, batch_count, attempt, attempts, e
                ),
            }
            if attempt < attempts {
                tokio::time::sleep(backoff(self.config.retry_backoff, attempt)).await;
            }
        }
        warn!("Giving up on scoring batch {}/{}, leaving it unscored", batch_no, batch_count);
        None
    }
}

/// Every submitted id must come back; scores are clamped to 0..=100.
fn validate(items: &[ScoreRequestItem], scores: Vec<ScoreItem>) -> Result<HashMap<u64, f64>, ScoreError> {
    let map: HashMap<u64, f64> = scores
        .into_iter()
        .filter(|s| s.score.is_finite())
        .map(|s| (s.id, s.score.clamp(0.0, 100.0)))
        .collect();
    let missing: Vec<u64> = items
        .iter()
        .map(|i| i.id)
        .filter(|id| !map.contains_key(id))
        .collect();
    if missing.is_empty() {
        Ok(map)
    } else {
        Err(ScoreError::Incomplete(missing))
    }
}

// ── OpenAI-compatible client ──

pub struct OpenAiScoringClient {
    http: reqwest::Client,
    api_url: String,
    api_key: String,
    model: String,
}

impl OpenAiScoringClient {
    pub fn new(config: &ScoreConfig, api_key: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            http,
            api_url: config.api_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: config.model.clone(),
        })
    }

    fn body(&self, items: &[ScoreRequestItem]) -> Result<serde_json::Value, ScoreError> {
        let payload =
            serde_json::to_string(items).map_err(|e| ScoreError::Malformed(e.to_string()))?;
        Ok(serde_json::json!({
            "model": self.model,
            "temperature": 0,
            "messages": [
                { "role": "system", "content": SYSTEM_PROMPT },
                { "role": "user", "content": payload },
            ],
        }))
    }
}

impl ScoringClient for OpenAiScoringClient {
    async fn score_batch(&self, items: &[ScoreRequestItem]) -> Result<Vec<ScoreItem>, ScoreError> {
        let response = self
            .http
            .post(format!("{}/chat/completions", self.api_url))
            .bearer_auth(&self.api_key)
            .json(&self.body(items)?)
            .send()
            .await
            .map_err(|e| ScoreError::Http(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ScoreError::Http(format!("status {}", status)));
        }

        let value: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ScoreError::Malformed(e.to_string()))?;
        let content = value
            .pointer("/choices/0/message/content")
            .and_then(|c| c.as_str())
            .ok_or_else(|| ScoreError::Malformed("no message content".into()))?;
        parse_scores(content)
    }
}

/// Parse the model's reply, tolerating a fenced code block around the JSON.
pub fn parse_scores(content: &str) -> Result<Vec<ScoreItem>, ScoreError> {
    let trimmed = content.trim();
    let body = match (trimmed.find('['), trimmed.rfind(']')) {
        (Some(start), Some(end)) if start < end => &trimmed[start..=end],
        _ => return Err(ScoreError::Malformed("no JSON array in reply".into())),
    };
    serde_json::from_str(body).map_err(|e| ScoreError::Malformed(e.to_string()))
}

/// Linear backoff delay before retry `attempt` (1-based).
pub fn backoff(base: Duration, attempt: u32) -> Duration {
    base * attempt
}
