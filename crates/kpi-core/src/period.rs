//! Month label normalization.
//!
//! Upstream rows label their period loosely: `"Jan"`, `"Dec 2025"`, `"2025-12"`,
//! `"12/2025"`, `"2025-12-01"`. [`parse_month_label`] maps any of these onto a
//! [`NormalizedPeriod`]. Parsing never fails; undetectable parts stay `None`.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

/// Canonical three-letter month keys, indexed by 0-based month.
pub const MONTH_KEYS: [&str; 12] = [
    "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
];

/// Years outside `[MIN_YEAR, MAX_YEAR)` are never assigned.
pub const MIN_YEAR: i32 = 2000;
/// Exclusive upper bound for plausible years.
pub const MAX_YEAR: i32 = 2100;

static ISO_MONTH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d{4})-(\d{1,2})(?:-(\d{1,2}))?(?:$|[T\s])").expect("valid ISO month pattern")
});

static SLASH_MONTH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d{1,2})/(\d{4})$").expect("valid slash month pattern"));

static LEADING_WORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([A-Za-z]+)").expect("valid leading word pattern"));

static YEAR_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:^|\D)(20\d{2})(?:\D|$)").expect("valid year pattern"));

/// A period label reduced to month and year.
///
/// If `month_index` is set, `month_key` is the canonical key for it. If `year`
/// is set, it lies in `[2000, 2100)`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedPeriod {
    /// 0-based month, `None` when undetectable.
    pub month_index: Option<u32>,
    /// Canonical month key, or a best-effort fallback taken from the label.
    pub month_key: String,
    /// Four-digit year, `None` when absent.
    pub year: Option<i32>,
}

impl NormalizedPeriod {
    /// Period for a known month and optional year.
    ///
    /// Out-of-range inputs are dropped rather than stored.
    #[must_use]
    pub fn new(month_index: u32, year: Option<i32>) -> Self {
        let month_key = MONTH_KEYS
            .get(month_index as usize)
            .map(|k| (*k).to_string())
            .unwrap_or_default();
        Self {
            month_index: (month_index < 12).then_some(month_index),
            month_key,
            year: year.filter(|y| is_plausible_year(*y)),
        }
    }

    /// Resolves the month, falling back to a lookup of `month_key`.
    #[must_use]
    pub fn resolved_month_index(&self) -> Option<u32> {
        self.month_index.or_else(|| month_index_for_key(&self.month_key))
    }

    /// 1-based quarter (1..=4) when the month is known.
    #[must_use]
    pub fn quarter(&self) -> Option<u32> {
        self.resolved_month_index().map(|m| m / 3 + 1)
    }
}

/// Parses an arbitrary period label.
///
/// Rules, first match wins for the month:
///
/// 1. `yyyy-mm` or `yyyy-mm-dd` (optionally followed by a time)
/// 2. `mm/yyyy`
/// 3. a leading word whose first three letters name a month, case-insensitively
/// 4. otherwise `month_key` is the first three characters of the trimmed label
///
/// Independently, any `20xx` token in the label supplies the year when rules 1
/// and 2 did not.
#[must_use]
pub fn parse_month_label(label: &str) -> NormalizedPeriod {
    let label = label.trim();
    if label.is_empty() {
        return NormalizedPeriod::default();
    }

    if let Some(period) = parse_numeric(label) {
        return period;
    }

    let month_index = LEADING_WORD
        .captures(label)
        .and_then(|caps| caps.get(1))
        .and_then(|word| month_index_for_key(word.as_str()));

    let month_key = match month_index {
        Some(index) => MONTH_KEYS[index as usize].to_string(),
        None => label.chars().take(3).collect(),
    };

    NormalizedPeriod {
        month_index,
        month_key,
        year: scan_year(label),
    }
}

/// Looks up a 0-based month from the first three letters of a name, case-insensitively.
#[must_use]
pub fn month_index_for_key(key: &str) -> Option<u32> {
    let prefix: String = key.chars().take(3).collect::<String>().to_ascii_lowercase();
    if prefix.len() < 3 {
        return None;
    }
    MONTH_KEYS
        .iter()
        .position(|k| k.eq_ignore_ascii_case(&prefix))
        .map(|i| i as u32)
}

/// Returns true for years in `[MIN_YEAR, MAX_YEAR)`.
#[must_use]
pub const fn is_plausible_year(year: i32) -> bool {
    year >= MIN_YEAR && year < MAX_YEAR
}

/// Rules 1 and 2. Both require a valid month and a plausible year.
fn parse_numeric(label: &str) -> Option<NormalizedPeriod> {
    let (year, month) = if let Some(caps) = ISO_MONTH.captures(label) {
        (caps.get(1)?.as_str(), caps.get(2)?.as_str())
    } else if let Some(caps) = SLASH_MONTH.captures(label) {
        (caps.get(2)?.as_str(), caps.get(1)?.as_str())
    } else {
        return None;
    };

    let year: i32 = year.parse().ok()?;
    let month: u32 = month.parse().ok()?;
    if !(1..=12).contains(&month) || !is_plausible_year(year) {
        return None;
    }
    Some(NormalizedPeriod::new(month - 1, Some(year)))
}

fn scan_year(label: &str) -> Option<i32> {
    YEAR_TOKEN
        .captures_iter(label)
        .filter_map(|caps| caps.get(1)?.as_str().parse::<i32>().ok())
        .find(|year| is_plausible_year(*year))
}
