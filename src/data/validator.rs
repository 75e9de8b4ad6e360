//! OHLCV sanity checks

use super::KlineRecord;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A problem found in a kline series
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum KlineIssue {
    /// Open time not strictly after the previous record
    NonMonotonicTimestamp { index: usize, previous: i64, current: i64 },
    HighBelowLow { index: usize, open_time: i64, high: Decimal, low: Decimal },
    NegativeVolume { index: usize, open_time: i64, volume: Decimal },
    /// Open or close outside the high/low band
    PriceOutsideRange { index: usize, open_time: i64 },
}

impl fmt::Display for KlineIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KlineIssue::NonMonotonicTimestamp { index, previous, current } => {
                write!(f, "row {}: timestamp {} not after {}", index, current, previous)
            }
            KlineIssue::HighBelowLow { index, high, low, .. } => {
                write!(f, "row {}: high {} below low {}", index, high, low)
            }
            KlineIssue::NegativeVolume { index, volume, .. } => {
                write!(f, "row {}: negative volume {}", index, volume)
            }
            KlineIssue::PriceOutsideRange { index, .. } => {
                write!(f, "row {}: open/close outside high/low", index)
            }
        }
    }
}

/// Validation outcome for a series
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub total_records: usize,
    pub issues: Vec<KlineIssue>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.issues.is_empty()
    }

    /// Records with at least one issue
    pub fn invalid_records(&self) -> usize {
        let mut indices: Vec<usize> = self
            .issues
            .iter()
            .map(|issue| match issue {
                KlineIssue::NonMonotonicTimestamp { index, .. }
                | KlineIssue::HighBelowLow { index, .. }
                | KlineIssue::NegativeVolume { index, .. }
                | KlineIssue::PriceOutsideRange { index, .. } => *index,
            })
            .collect();
        indices.sort_unstable();
        indices.dedup();
        indices.len()
    }
}

/// Check a series in the order given
pub fn validate_klines(records: &[KlineRecord]) -> ValidationReport {
    let mut issues = Vec::new();
    for (index, record) in records.iter().enumerate() {
        if index > 0 {
            let previous = records[index - 1].open_time;
            if record.open_time <= previous {
                issues.push(KlineIssue::NonMonotonicTimestamp {
                    index,
                    previous,
                    current: record.open_time,
                });
            }
        }
        if record.high < record.low {
            issues.push(KlineIssue::HighBelowLow {
                index,
                open_time: record.open_time,
                high: record.high,
                low: record.low,
            });
        } else {
            let band = record.low..=record.high;
            if !band.contains(&record.open) || !band.contains(&record.close) {
                issues.push(KlineIssue::PriceOutsideRange {
                    index,
                    open_time: record.open_time,
                });
            }
        }
        if record.volume < Decimal::ZERO {
            issues.push(KlineIssue::NegativeVolume {
                index,
                open_time: record.open_time,
                volume: record.volume,
            });
        }
    }
    ValidationReport {
        total_records: records.len(),
        issues,
    }
}
