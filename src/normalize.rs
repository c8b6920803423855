use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;

use crate::model::{TrendStatus, Volume};

static WS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());
static VOLUME_ALPHABET_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^0-9KM+.]").unwrap());
static LOWER_SUFFIX_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(\d\s*)([km])\b").unwrap());
static MAGNITUDE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(\d+(?:\.\d+)?)\s*([KM])?\s*(\+)?").unwrap());
static DELTA_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(arrow_upward|arrow_downward|trending_up|trending_down|\bup\b|\bdown\b)?\s*([+-])?\s*(\d+)")
        .unwrap()
});
static MORE_COUNTER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\+\s*\d+\s*more").unwrap());
static TIME_ARTIFACT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)trending_up|trending_down|arrow_upward|arrow_downward|check_circle|timelapse|schedule|\bactive\b|\blasted\b",
    )
    .unwrap()
});
static BREAKDOWN_ARTIFACT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)query_stats|more_vert|search\s+term|see\s+more|explore").unwrap()
});

/// UI chrome that never belongs in a cleaned breakdown term (matched case-insensitively).
pub const BREAKDOWN_ARTIFACTS: &[&str] =
    &["query_stats", "more_vert", "search term", "see more", "explore"];

const DOWN_MARKERS: &[&str] = &["arrow_downward", "trending_down", "down"];

pub fn normalize_title(text: &str) -> String {
    collapse_ws(text)
}

/// Keep only the volume alphabet: digits, `K`, `M`, `+` and `.`.
/// A lowercase `k`/`m` right after a number counts as its suffix.
pub fn normalize_volume(text: &str) -> String {
    let suffixed = LOWER_SUFFIX_RE.replace_all(text, |caps: &regex::Captures| {
        format!("{}{}", &caps[1], caps[2].to_ascii_uppercase())
    });
    VOLUME_ALPHABET_RE.replace_all(&suffixed, "").into_owned()
}

/// Decompose a volume label like `500K+arrow_downward50` into magnitude and delta.
pub fn parse_volume(text: &str) -> Volume {
    let cleaned = text.replace(',', "").replace(['%', '·'], " ");
    let mut magnitude = 0u64;
    let mut trend_delta = 0i64;
    let mut rest = cleaned.as_str();

    if let Some(caps) = MAGNITUDE_RE.captures(&cleaned) {
        let base: f64 = caps[1].parse().unwrap_or(0.0);
        let multiplier = match caps.get(2).map(|m| m.as_str().to_ascii_uppercase()) {
            Some(ref s) if s == "K" => 1_000.0,
            Some(ref s) if s == "M" => 1_000_000.0,
            _ => 1.0,
        };
        magnitude = (base * multiplier).trunc() as u64;
        rest = &cleaned[caps.get(0).map_or(0, |m| m.end())..];
    }

    if let Some(caps) = DELTA_RE.captures(rest) {
        let value: i64 = caps[3].parse().unwrap_or(0);
        let down_marker = caps
            .get(1)
            .map(|m| DOWN_MARKERS.contains(&m.as_str().to_ascii_lowercase().as_str()))
            .unwrap_or(false);
        let minus = caps.get(2).is_some_and(|m| m.as_str() == "-");
        trend_delta = if down_marker || minus { -value } else { value };
    }

    Volume {
        raw: normalize_volume(text),
        magnitude,
        trend_delta,
    }
}

pub fn normalize_time_label(text: &str) -> String {
    collapse_ws(&remove_until_stable(&TIME_ARTIFACT_RE, text))
}

pub fn normalize_breakdown_term(text: &str) -> String {
    let mut current = text.to_string();
    // Removing one artifact can splice together another; repeat until nothing matches.
    loop {
        let next = MORE_COUNTER_RE.replace_all(&current, " ");
        let next = BREAKDOWN_ARTIFACT_RE.replace_all(&next, " ").into_owned();
        if next == current {
            break;
        }
        current = next;
    }
    collapse_ws(&current)
}

/// Clean every term, drop empties, and dedupe keeping first-seen order.
pub fn normalize_breakdown<I, S>(terms: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut seen = HashSet::new();
    terms
        .into_iter()
        .map(|t| normalize_breakdown_term(t.as_ref()))
        .filter(|t| !t.is_empty())
        .filter(|t| seen.insert(t.to_lowercase()))
        .collect()
}

/// Read the status marker's class list; anything but an explicit active marker is `Lasted`.
pub fn normalize_status(marker_class: Option<&str>, active_class: &str) -> TrendStatus {
    match marker_class {
        Some(class) if class.split_whitespace().any(|c| c == active_class) => TrendStatus::Active,
        _ => TrendStatus::Lasted,
    }
}

fn remove_until_stable(re: &Regex, text: &str) -> String {
    let mut current = text.to_string();
    loop {
        let next = re.replace_all(&current, " ").into_owned();
        if next == current {
            return current;
        }
        current = next;
    }
}

fn collapse_ws(text: &str) -> String {
    WS_RE.replace_all(text.trim(), " ").into_owned()
}
