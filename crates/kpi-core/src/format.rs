//! Display formatting for KPI values.

use serde::{Deserialize, Serialize};

/// How a KPI value is rendered.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueFormat {
    /// `$1,234` or `$104.17`.
    Currency,
    /// `1,234` or `12.5`.
    #[default]
    Number,
    /// `12.5%`.
    Percent,
}

impl ValueFormat {
    /// Formats a value. Non-finite input renders as zero.
    #[must_use]
    pub fn format(&self, value: f64) -> String {
        let value = if value.is_finite() { value } else { 0.0 };
        match self {
            Self::Currency => {
                let sign = if value <= -0.005 { "-" } else { "" };
                format!("{sign}${}", group_thousands(value.abs(), 2))
            }
            Self::Number => group_thousands(value, 1),
            Self::Percent => format!("{value:.1}%"),
        }
    }
}

/// Rounds to at most `decimals` places, drops a zero fraction, and inserts
/// thousands separators into the integer part.
fn group_thousands(value: f64, decimals: usize) -> String {
    let fixed = format!("{value:.decimals$}");
    let (int_part, frac_part) = fixed.split_once('.').unwrap_or((fixed.as_str(), ""));
    let (sign, digits) = match int_part.strip_prefix('-') {
        Some(rest) => ("-", rest),
        None => ("", int_part),
    };

    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }

    let whole = frac_part.trim_matches('0').is_empty();
    // "-0" after rounding a tiny negative value.
    let sign = if whole && digits.chars().all(|c| c == '0') {
        ""
    } else {
        sign
    };

    if whole {
        format!("{sign}{grouped}")
    } else {
        format!("{sign}{grouped}.{frac_part}")
    }
}
