use std::path::Path;

use anyhow::{Context, Result};
use rusqlite::Connection;

use crate::model::MarketResult;

pub const DEFAULT_DB_PATH: &str = "data/trends.sqlite";

pub fn connect(path: &Path) -> Result<Connection> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;
    }
    let conn = Connection::open(path)
        .with_context(|| format!("Failed to open database {}", path.display()))?;
    conn.execute_batch("PRAGMA journal_mode=WAL;")?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS trends (
            id            INTEGER PRIMARY KEY,
            market_code   TEXT NOT NULL,
            title         TEXT NOT NULL,
            volume        TEXT NOT NULL,
            magnitude     INTEGER NOT NULL,
            trend_delta   INTEGER NOT NULL,
            time_started  TEXT NOT NULL,
            breakdown     TEXT NOT NULL,
            status        TEXT NOT NULL,
            score         REAL,
            scraped_at    TEXT NOT NULL,
            UNIQUE(market_code, title)
        );
        CREATE INDEX IF NOT EXISTS idx_trends_market ON trends(market_code);

        CREATE TABLE IF NOT EXISTS market_runs (
            id            INTEGER PRIMARY KEY,
            market_code   TEXT NOT NULL,
            scraped_at    TEXT NOT NULL,
            success       BOOLEAN NOT NULL,
            termination   TEXT NOT NULL,
            pages_visited INTEGER NOT NULL,
            records       INTEGER NOT NULL,
            error         TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_runs_market ON market_runs(market_code);
        ",
    )?;
    Ok(())
}

// ── Writes ──

/// Store every record and one run row per market. Returns the number of
/// trend rows actually inserted; rows already present are left untouched.
pub fn save_results(conn: &Connection, results: &[MarketResult]) -> Result<usize> {
    let tx = conn.unchecked_transaction()?;
    let mut count = 0;
    {
        let mut t_stmt = tx.prepare(
            "INSERT OR IGNORE INTO trends
                (market_code, title, volume, magnitude, trend_delta, time_started,
                 breakdown, status, score, scraped_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        )?;
        let mut r_stmt = tx.prepare(
            "INSERT INTO market_runs
                (market_code, scraped_at, success, termination, pages_visited, records, error)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        )?;

        for result in results {
            let scraped_at = result.scraped_at.to_rfc3339();
            for r in &result.records {
                let breakdown = serde_json::to_string(&r.breakdown)?;
                count += t_stmt.execute(rusqlite::params![
                    result.market.code,
                    r.title,
                    r.volume.raw,
                    r.volume.magnitude as i64,
                    r.volume.trend_delta,
                    r.time_started,
                    breakdown,
                    r.status.as_str(),
                    r.score,
                    scraped_at,
                ])?;
            }
            r_stmt.execute(rusqlite::params![
                result.market.code,
                scraped_at,
                result.success,
                result.termination.as_str(),
                result.pages_visited,
                result.records.len() as i64,
                result.error,
            ])?;
        }
    }
    tx.commit()?;
    Ok(count)
}

// ── Stats ──

pub struct MarketStats {
    pub market_code: String,
    pub trends: usize,
    pub scored: usize,
    pub last_run: Option<String>,
    pub last_termination: Option<String>,
    pub last_success: Option<bool>,
}

pub struct Stats {
    pub total: usize,
    pub scored: usize,
    pub runs: usize,
    pub failed_runs: usize,
    pub markets: Vec<MarketStats>,
}

pub fn get_stats(conn: &Connection) -> Result<Stats> {
    let total: usize = conn.query_row("SELECT COUNT(*) FROM trends", [], |r| r.get(0))?;
    let scored: usize =
        conn.query_row("SELECT COUNT(*) FROM trends WHERE score IS NOT NULL", [], |r| r.get(0))?;
    let runs: usize = conn.query_row("SELECT COUNT(*) FROM market_runs", [], |r| r.get(0))?;
    let failed_runs: usize =
        conn.query_row("SELECT COUNT(*) FROM market_runs WHERE success = 0", [], |r| r.get(0))?;

    let mut stmt = conn.prepare(
        "SELECT m.market_code,
                (SELECT COUNT(*) FROM trends t WHERE t.market_code = m.market_code),
                (SELECT COUNT(*) FROM trends t
                  WHERE t.market_code = m.market_code AND t.score IS NOT NULL),
                (SELECT scraped_at FROM market_runs r
                  WHERE r.market_code = m.market_code ORDER BY r.id DESC LIMIT 1),
                (SELECT termination FROM market_runs r
                  WHERE r.market_code = m.market_code ORDER BY r.id DESC LIMIT 1),
                (SELECT success FROM market_runs r
                  WHERE r.market_code = m.market_code ORDER BY r.id DESC LIMIT 1)
         FROM (SELECT market_code FROM trends
               UNION SELECT market_code FROM market_runs) m
         ORDER BY m.market_code",
    )?;
    let markets = stmt
        .query_map([], |row| {
            Ok(MarketStats {
                market_code: row.get(0)?,
                trends: row.get(1)?,
                scored: row.get(2)?,
                last_run: row.get(3)?,
                last_termination: row.get(4)?,
                last_success: row.get(5)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Stats {
        total,
        scored,
        runs,
        failed_runs,
        markets,
    })
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::config::Market;
    use crate::model::{TerminationReason, TrendRecord, TrendStatus, Volume};

    fn memory() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        conn
    }

    fn record(title: &str, score: Option<f64>) -> TrendRecord {
        TrendRecord {
            title: title.to_string(),
            volume: Volume {
                raw: "20K+".into(),
                magnitude: 20_000,
                trend_delta: 300,
            },
            time_started: "2 hours ago".into(),
            breakdown: vec!["one".into(), "two".into()],
            status: TrendStatus::Active,
            score,
        }
    }

    fn result(code: &str, records: Vec<TrendRecord>, success: bool) -> MarketResult {
        MarketResult {
            market: Market::from_code(code),
            scraped_at: Utc::now(),
            records,
            success,
            error: (!success).then(|| "timed out".to_string()),
            termination: if success {
                TerminationReason::EndOfDataControlDisabled
            } else {
                TerminationReason::TimeoutInitialLoad
            },
            pages_visited: 1,
        }
    }

    #[test]
    fn insert_is_idempotent_per_market_and_title() {
        let conn = memory();
        let batch = vec![
            result("US", vec![record("a", Some(50.0)), record("b", None)], true),
            result("GB", vec![record("a", None)], true),
        ];
        assert_eq!(save_results(&conn, &batch).unwrap(), 3);
        assert_eq!(save_results(&conn, &batch).unwrap(), 0);

        let stats = get_stats(&conn).unwrap();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.scored, 1);
        assert_eq!(stats.runs, 4);
    }

    #[test]
    fn stats_report_last_run_per_market() {
        let conn = memory();
        save_results(&conn, &[result("US", vec![record("a", None)], true)]).unwrap();
        save_results(&conn, &[result("US", Vec::new(), false), result("DE", Vec::new(), false)])
            .unwrap();

        let stats = get_stats(&conn).unwrap();
        assert_eq!(stats.failed_runs, 2);
        let codes: Vec<&str> = stats.markets.iter().map(|m| m.market_code.as_str()).collect();
        assert_eq!(codes, vec!["DE", "US"]);

        let us = &stats.markets[1];
        assert_eq!(us.trends, 1);
        assert_eq!(us.last_success, Some(false));
        assert_eq!(us.last_termination.as_deref(), Some("timeout-initial-load"));
    }

    #[test]
    fn breakdown_is_stored_as_json() {
        let conn = memory();
        save_results(&conn, &[result("US", vec![record("a", None)], true)]).unwrap();
        let raw: String = conn
            .query_row("SELECT breakdown FROM trends WHERE title = 'a'", [], |r| r.get(0))
            .unwrap();
        assert_eq!(raw, r#"["one","two"]"#);
    }
}
