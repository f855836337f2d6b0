pub mod scheduler;
pub mod sqlite;

use crate::errors::StorageError;
use crate::heart_rate::Reading;

/// Stored in place of an RR interval when the reading carried none
pub const NO_RR_INTERVAL: i64 = -1;

/// One row of the `hrm` table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HrmRow {
    pub timestamp: i64,
    pub heart_rate: i64,
    pub rr_interval: i64,
}

/// One row of the `commit_metadata` table, written alongside every commit
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CommitMetadata {
    pub timestamp: i64,
    /// Seconds
    pub commit_duration: f64,
    pub commit_every: u32,
}

/// Expands a reading into its table rows: one per RR interval,
/// or a single placeholder row if there were none.
pub fn hrm_rows(reading: &Reading) -> Vec<HrmRow> {
    let row = |rr_interval| HrmRow {
        timestamp: reading.timestamp,
        heart_rate: i64::from(reading.heart_rate),
        rr_interval,
    };
    if reading.rr_intervals.is_empty() {
        vec![row(NO_RR_INTERVAL)]
    } else {
        reading
            .rr_intervals
            .iter()
            .map(|rr| row(i64::from(*rr)))
            .collect()
    }
}

/// Durable destination for readings.
///
/// Inserts land in a pending write buffer right away, only `commit` makes them durable.
pub trait StorageSink {
    fn insert_reading(&mut self, reading: &Reading) -> Result<(), StorageError>;
    fn insert_commit_metadata(&mut self, metadata: &CommitMetadata) -> Result<(), StorageError>;
    fn commit(&mut self) -> Result<(), StorageError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reading_without_rr_is_one_row() {
        let reading = Reading {
            heart_rate: 70,
            timestamp: 1_700_000_000,
            ..Default::default()
        };
        assert_eq!(
            hrm_rows(&reading),
            vec![HrmRow {
                timestamp: 1_700_000_000,
                heart_rate: 70,
                rr_interval: NO_RR_INTERVAL
            }]
        );
    }

    #[test]
    fn one_row_per_rr_interval() {
        let reading = Reading {
            heart_rate: 65,
            rr_intervals: vec![900, 950, 1000],
            timestamp: 42,
            ..Default::default()
        };
        let rows = hrm_rows(&reading);
        assert_eq!(rows.len(), 3);
        assert!(rows.iter().all(|r| r.timestamp == 42 && r.heart_rate == 65));
        let rr: Vec<i64> = rows.iter().map(|r| r.rr_interval).collect();
        assert_eq!(rr, vec![900, 950, 1000]);
    }
}
