//! Time granularity definitions.
//!
//! This module defines [`Granularity`], the bucket size used when aggregating
//! monthly records into a time series.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::KpiError;

/// Granularity of an aggregated time series.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    /// One bucket per monthly record.
    #[default]
    Monthly,
    /// Four fixed calendar quarters.
    Quarterly,
    /// A single bucket for the whole year.
    Yearly,
}

impl Granularity {
    /// Returns the lowercase name used on the wire.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Monthly => "monthly",
            Self::Quarterly => "quarterly",
            Self::Yearly => "yearly",
        }
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Granularity {
    type Err = KpiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "monthly" | "month" => Ok(Self::Monthly),
            "quarterly" | "quarter" => Ok(Self::Quarterly),
            "yearly" | "year" | "annual" => Ok(Self::Yearly),
            other => Err(KpiError::InvalidParameter(format!(
                "Unknown granularity: {other}. Supported: monthly, quarterly, yearly"
            ))),
        }
    }
}
