//! History ledger summaries and export.
//!
//! The ledger maps calendar dates to per-mode day tallies. This module
//! folds it into the ranges the stats view renders - today, the last
//! seven days, each day of the current month, each month of the current
//! year - and exports it to CSV.

use crate::{HistoryLedger, Result};
use chrono::{Datelike, Duration, NaiveDate};
use std::path::Path;

/// Reporting window for a summary.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StatsRange {
    Day,
    Week,
    Month,
    Year,
}

/// One labeled column of a summary (a day, or a month in `Year` range).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RangeBucket {
    pub label: String,
    pub voice: u64,
    pub silent: u64,
}

/// A summarized window of history.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RangeSummary {
    pub buckets: Vec<RangeBucket>,
    pub voice: u64,
    pub silent: u64,
}

impl RangeSummary {
    pub fn total(&self) -> u64 {
        self.voice + self.silent
    }
}

/// Summarize the ledger over a range anchored at `today`.
pub fn summarize(ledger: &HistoryLedger, range: StatsRange, today: NaiveDate) -> RangeSummary {
    let mut buckets = Vec::new();

    match range {
        StatsRange::Day => {
            let tally = ledger.get(&today).copied().unwrap_or_default();
            buckets.push(RangeBucket {
                label: today.format("%Y-%m-%d").to_string(),
                voice: tally.voice,
                silent: tally.silent,
            });
        }
        StatsRange::Week => {
            for offset in (0..7).rev() {
                let date = today - Duration::days(offset);
                let tally = ledger.get(&date).copied().unwrap_or_default();
                buckets.push(RangeBucket {
                    label: format!("{}-{}", date.month(), date.day()),
                    voice: tally.voice,
                    silent: tally.silent,
                });
            }
        }
        StatsRange::Month => {
            for day in 1..=days_in_month(today.year(), today.month()) {
                // Every day of the month is a valid date by construction
                let date = NaiveDate::from_ymd_opt(today.year(), today.month(), day)
                    .expect("valid day of month");
                let tally = ledger.get(&date).copied().unwrap_or_default();
                buckets.push(RangeBucket {
                    label: day.to_string(),
                    voice: tally.voice,
                    silent: tally.silent,
                });
            }
        }
        StatsRange::Year => {
            let mut months = vec![(0u64, 0u64); 12];
            for (date, tally) in ledger {
                if date.year() == today.year() {
                    let slot = &mut months[date.month0() as usize];
                    slot.0 += tally.voice;
                    slot.1 += tally.silent;
                }
            }
            for (index, (voice, silent)) in months.into_iter().enumerate() {
                buckets.push(RangeBucket {
                    label: format!("{:02}", index + 1),
                    voice,
                    silent,
                });
            }
        }
    }

    let voice = buckets.iter().map(|b| b.voice).sum();
    let silent = buckets.iter().map(|b| b.silent).sum();
    RangeSummary {
        buckets,
        voice,
        silent,
    }
}

fn days_in_month(year: i32, month: u32) -> u32 {
    let (next_year, next_month) = if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    };
    NaiveDate::from_ymd_opt(next_year, next_month, 1)
        .expect("valid first of month")
        .pred_opt()
        .expect("month has a last day")
        .day()
}

/// A row in the CSV export
#[derive(Debug, serde::Serialize)]
struct CsvRow<'a> {
    date: &'a str,
    voice: u64,
    silent: u64,
}

/// Export the full ledger to CSV, one row per day, oldest first.
///
/// Returns the number of rows written.
pub fn export_csv(ledger: &HistoryLedger, path: &Path) -> Result<usize> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let mut writer = csv::Writer::from_path(path)?;
    let mut rows = 0;
    for (date, tally) in ledger {
        let date = date.format("%Y-%m-%d").to_string();
        writer.serialize(CsvRow {
            date: &date,
            voice: tally.voice,
            silent: tally.silent,
        })?;
        rows += 1;
    }
    writer.flush()?;

    tracing::info!("Exported {} history rows to {:?}", rows, path);
    Ok(rows)
}
