use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::Market;

/// Parsed search volume: the filtered raw text plus its decoded parts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Volume {
    pub raw: String,
    pub magnitude: u64,
    pub trend_delta: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TrendStatus {
    Active,
    #[default]
    Lasted,
}

impl TrendStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrendStatus::Active => "Active",
            TrendStatus::Lasted => "Lasted",
        }
    }
}

/// One trending item observed on one page of one market's result set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendRecord {
    pub title: String,
    pub volume: Volume,
    pub time_started: String,
    pub breakdown: Vec<String>,
    pub status: TrendStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
}

/// Why a market's pagination loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationReason {
    TimeoutInitialLoad,
    /// Navigation itself failed (unreachable host, driver error).
    LoadFailed,
    EmptyFirstPage,
    EndOfDataNoControl,
    EndOfDataControlDisabled,
    RepeatedEmptyPages,
    PageCapReached,
    AdvanceTimeout,
    /// The next control could not be clicked.
    AdvanceFailed,
    SessionError,
}

impl TerminationReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            TerminationReason::TimeoutInitialLoad => "timeout-initial-load",
            TerminationReason::LoadFailed => "load-failed",
            TerminationReason::EmptyFirstPage => "empty-first-page",
            TerminationReason::EndOfDataNoControl => "end-of-data-no-control",
            TerminationReason::EndOfDataControlDisabled => "end-of-data-control-disabled",
            TerminationReason::RepeatedEmptyPages => "end-of-data-repeated-empty-pages",
            TerminationReason::PageCapReached => "page-cap-reached",
            TerminationReason::AdvanceTimeout => "advance-timeout",
            TerminationReason::AdvanceFailed => "advance-failed",
            TerminationReason::SessionError => "session-error",
        }
    }

    /// Genuine absence of further pages, as opposed to a timeout or error.
    pub fn is_end_of_data(&self) -> bool {
        matches!(
            self,
            TerminationReason::EndOfDataNoControl
                | TerminationReason::EndOfDataControlDisabled
                | TerminationReason::RepeatedEmptyPages
        )
    }
}

impl fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one market's full pagination run.
#[derive(Debug, Clone)]
pub struct MarketResult {
    pub market: Market,
    pub scraped_at: DateTime<Utc>,
    pub records: Vec<TrendRecord>,
    pub success: bool,
    pub error: Option<String>,
    pub termination: TerminationReason,
    pub pages_visited: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_defaults_to_lasted() {
        assert_eq!(TrendStatus::default(), TrendStatus::Lasted);
        assert_eq!(TrendStatus::Active.as_str(), "Active");
    }

    #[test]
    fn termination_labels() {
        assert_eq!(
            TerminationReason::RepeatedEmptyPages.to_string(),
            "end-of-data-repeated-empty-pages"
        );
        assert!(TerminationReason::EndOfDataControlDisabled.is_end_of_data());
        assert!(!TerminationReason::AdvanceTimeout.is_end_of_data());
        assert!(!TerminationReason::PageCapReached.is_end_of_data());
        assert_eq!(TerminationReason::LoadFailed.as_str(), "load-failed");
        assert_eq!(TerminationReason::AdvanceFailed.as_str(), "advance-failed");
        assert!(!TerminationReason::AdvanceFailed.is_end_of_data());
    }
}
