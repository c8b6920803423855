//! File sink: one row per record, JSONL or CSV.

use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::OutputFormat;
use crate::model::{MarketResult, TrendRecord, TrendStatus, Volume};

/// A record as written to a file, flattened and tagged with its market.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputRow {
    pub market: String,
    pub scraped_at: DateTime<Utc>,
    pub title: String,
    pub volume: String,
    pub magnitude: u64,
    pub trend_delta: i64,
    pub time_started: String,
    pub breakdown: Vec<String>,
    pub status: TrendStatus,
    pub score: Option<f64>,
}

#[derive(Debug, Serialize, Deserialize)]
struct CsvRow {
    market: String,
    scraped_at: DateTime<Utc>,
    title: String,
    volume: String,
    magnitude: u64,
    trend_delta: i64,
    time_started: String,
    breakdown: String,
    status: TrendStatus,
    score: Option<f64>,
}

impl OutputRow {
    fn new(result: &MarketResult, record: &TrendRecord) -> Self {
        Self {
            market: result.market.code.clone(),
            scraped_at: result.scraped_at,
            title: record.title.clone(),
            volume: record.volume.raw.clone(),
            magnitude: record.volume.magnitude,
            trend_delta: record.volume.trend_delta,
            time_started: record.time_started.clone(),
            breakdown: record.breakdown.clone(),
            status: record.status,
            score: record.score,
        }
    }

    pub fn to_record(&self) -> TrendRecord {
        TrendRecord {
            title: self.title.clone(),
            volume: Volume {
                raw: self.volume.clone(),
                magnitude: self.magnitude,
                trend_delta: self.trend_delta,
            },
            time_started: self.time_started.clone(),
            breakdown: self.breakdown.clone(),
            status: self.status,
            score: self.score,
        }
    }
}

impl TryFrom<OutputRow> for CsvRow {
    type Error = serde_json::Error;

    fn try_from(r: OutputRow) -> Result<Self, Self::Error> {
        Ok(Self {
            market: r.market,
            scraped_at: r.scraped_at,
            title: r.title,
            volume: r.volume,
            magnitude: r.magnitude,
            trend_delta: r.trend_delta,
            time_started: r.time_started,
            breakdown: serde_json::to_string(&r.breakdown)?,
            status: r.status,
            score: r.score,
        })
    }
}

impl TryFrom<CsvRow> for OutputRow {
    type Error = serde_json::Error;

    fn try_from(r: CsvRow) -> Result<Self, Self::Error> {
        let breakdown = if r.breakdown.trim().is_empty() {
            Vec::new()
        } else {
            serde_json::from_str(&r.breakdown)?
        };
        Ok(Self {
            market: r.market,
            scraped_at: r.scraped_at,
            title: r.title,
            volume: r.volume,
            magnitude: r.magnitude,
            trend_delta: r.trend_delta,
            time_started: r.time_started,
            breakdown,
            status: r.status,
            score: r.score,
        })
    }
}

/// Write every record of every market to `path`, replacing any existing file.
/// Returns the number of rows written.
pub fn write_results(path: &Path, format: OutputFormat, results: &[MarketResult]) -> Result<usize> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;
    }
    let file = File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
    let rows = results
        .iter()
        .flat_map(|r| r.records.iter().map(move |rec| OutputRow::new(r, rec)));

    let mut count = 0;
    match format {
        OutputFormat::Jsonl => {
            let mut out = BufWriter::new(file);
            for row in rows {
                serde_json::to_writer(&mut out, &row)?;
                out.write_all(b"\n")?;
                count += 1;
            }
            out.flush()?;
        }
        OutputFormat::Csv => {
            let mut out = csv::Writer::from_writer(file);
            for row in rows {
                out.serialize(CsvRow::try_from(row)?)?;
                count += 1;
            }
            out.flush()?;
        }
    }
    Ok(count)
}

pub fn read_records(path: &Path, format: OutputFormat) -> Result<Vec<OutputRow>> {
    let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    match format {
        OutputFormat::Jsonl => {
            let mut rows = Vec::new();
            for (i, line) in BufReader::new(file).lines().enumerate() {
                let line = line?;
                if line.trim().is_empty() {
                    continue;
                }
                let row = serde_json::from_str(&line)
                    .with_context(|| format!("{}:{}: bad record", path.display(), i + 1))?;
                rows.push(row);
            }
            Ok(rows)
        }
        OutputFormat::Csv => {
            let mut rows = Vec::new();
            for (i, row) in csv::Reader::from_reader(file).deserialize::<CsvRow>().enumerate() {
                let row = OutputRow::try_from(row?)
                    .with_context(|| format!("{}: row {}: bad breakdown", path.display(), i + 1))?;
                rows.push(row);
            }
            Ok(rows)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Market;
    use crate::model::TerminationReason;

    fn sample() -> Vec<MarketResult> {
        let record = |title: &str, breakdown: &[&str], score| TrendRecord {
            title: title.to_string(),
            volume: Volume {
                raw: "200K+1,000".into(),
                magnitude: 200_000,
                trend_delta: 1000,
            },
            time_started: "5 hours ago".into(),
            breakdown: breakdown.iter().map(|t| t.to_string()).collect(),
            status: TrendStatus::Lasted,
            score,
        };
        vec![
            MarketResult {
                market: Market::from_code("US"),
                scraped_at: Utc::now(),
                records: vec![
                    record("world cup, final", &["world cup", "final score"], Some(88.0)),
                    record("solo", &[], None),
                ],
                success: true,
                error: None,
                termination: TerminationReason::EndOfDataControlDisabled,
                pages_visited: 1,
            },
            MarketResult {
                market: Market::from_code("GB"),
                scraped_at: Utc::now(),
                records: Vec::new(),
                success: false,
                error: Some("timed out".into()),
                termination: TerminationReason::TimeoutInitialLoad,
                pages_visited: 0,
            },
        ]
    }

    #[test]
    fn jsonl_one_object_per_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out").join("trends.jsonl");
        let results = sample();
        assert_eq!(write_results(&path, OutputFormat::Jsonl, &results).unwrap(), 2);

        let raw = fs::read_to_string(&path).unwrap();
        assert_eq!(raw.lines().count(), 2);
        let first: serde_json::Value = serde_json::from_str(raw.lines().next().unwrap()).unwrap();
        assert_eq!(first["market"], "US");
        assert_eq!(first["breakdown"][1], "final score");
        assert_eq!(first["status"], "Lasted");

        let back = read_records(&path, OutputFormat::Jsonl).unwrap();
        assert_eq!(back[0].to_record(), results[0].records[0]);
        assert_eq!(back[1].score, None);
    }

    #[test]
    fn csv_keeps_breakdown_terms_intact() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trends.csv");
        let results = sample();
        write_results(&path, OutputFormat::Csv, &results).unwrap();

        let raw = fs::read_to_string(&path).unwrap();
        let mut lines = raw.lines();
        assert_eq!(
            lines.next().unwrap(),
            "market,scraped_at,title,volume,magnitude,trend_delta,time_started,breakdown,status,score"
        );
        assert!(raw.contains(r#""[""world cup"",""final score""]""#));

        let back = read_records(&path, OutputFormat::Csv).unwrap();
        assert_eq!(back.len(), 2);
        assert_eq!(back[0].title, "world cup, final");
        assert_eq!(back[0].breakdown, vec!["world cup", "final score"]);
        assert_eq!(back[0].score, Some(88.0));
        assert!(back[1].breakdown.is_empty());
        assert_eq!(back[1].score, None);
    }

    #[test]
    fn csv_term_with_pipe_survives() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipes.csv");
        let mut results = sample();
        results[0].records[0].breakdown = vec!["AC|DC tour".into(), "x".into()];
        write_results(&path, OutputFormat::Csv, &results).unwrap();

        let back = read_records(&path, OutputFormat::Csv).unwrap();
        assert_eq!(back[0].breakdown, vec!["AC|DC tour", "x"]);
        assert_eq!(back[0].to_record(), results[0].records[0]);
    }

    #[test]
    fn no_records_writes_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.jsonl");
        let results: Vec<MarketResult> = Vec::new();
        assert_eq!(write_results(&path, OutputFormat::Jsonl, &results).unwrap(), 0);
        assert!(read_records(&path, OutputFormat::Jsonl).unwrap().is_empty());
    }
}
