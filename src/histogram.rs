//! The write-time histogram consumer.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use async_trait::async_trait;
use log::Level;
use serde::Serialize;

use crate::consumer::{Decision, SstableConsumer};
use crate::error::{Error, Result};
use crate::fragment::{Cell, ClusteringRow, PartitionStart, RangeTombstoneChange, Row, StaticRow};
use crate::logging::sst_log;

const MICROS_PER_HOUR: i64 = 3_600_000_000;
const MICROS_PER_DAY: i64 = 24 * MICROS_PER_HOUR;
const MICROS_PER_WEEK: i64 = 7 * MICROS_PER_DAY;
/// Civil year: 365.2425 days.
const MICROS_PER_YEAR: i64 = 31_556_952_000_000;
const MICROS_PER_MONTH: i64 = MICROS_PER_YEAR / 12;

/// The unit of time one histogram bucket covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bucket {
    /// One hour.
    Hours,
    /// One day.
    Days,
    /// One week.
    Weeks,
    /// One twelfth of a civil year (the default).
    Months,
    /// One civil year.
    Years,
}

impl Bucket {
    fn width_micros(self) -> i64 {
        match self {
            Bucket::Hours => MICROS_PER_HOUR,
            Bucket::Days => MICROS_PER_DAY,
            Bucket::Weeks => MICROS_PER_WEEK,
            Bucket::Months => MICROS_PER_MONTH,
            Bucket::Years => MICROS_PER_YEAR,
        }
    }
}

impl Default for Bucket {
    fn default() -> Self {
        Bucket::Months
    }
}

impl FromStr for Bucket {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, String> {
        match s {
            "hours" => Ok(Bucket::Hours),
            "days" => Ok(Bucket::Days),
            "weeks" => Ok(Bucket::Weeks),
            "months" => Ok(Bucket::Months),
            "years" => Ok(Bucket::Years),
            _ => Err(format!(
                "invalid value for writetime-histogram option bucket: {s}"
            )),
        }
    }
}

#[derive(Serialize)]
struct HistogramDocument {
    buckets: Vec<i64>,
    counts: Vec<u64>,
}

/// Collects every write timestamp of the stream into time buckets and
/// serialises the result as `histogram.json`.
pub struct WritetimeHistogramConsumer {
    bucket: Bucket,
    output_dir: PathBuf,
    histogram: BTreeMap<i64, u64>,
    partitions: u64,
    rows: u64,
    cells: u64,
    timestamps: u64,
}

impl WritetimeHistogramConsumer {
    /// A collector writing `histogram.json` under `output_dir`.
    pub fn new(bucket: Bucket, output_dir: impl Into<PathBuf>) -> Self {
        WritetimeHistogramConsumer {
            bucket,
            output_dir: output_dir.into(),
            histogram: BTreeMap::new(),
            partitions: 0,
            rows: 0,
            cells: 0,
            timestamps: 0,
        }
    }

    fn collect_timestamp(&mut self, timestamp: i64) {
        let width = self.bucket.width_micros();
        let bucket = timestamp / width * width;
        self.timestamps += 1;
        *self.histogram.entry(bucket).or_insert(0) += 1;
    }

    fn collect_row(&mut self, row: &Row) {
        self.rows += 1;
        for (_, cell) in row.iter() {
            match cell {
                Cell::Atomic(c) => {
                    self.cells += 1;
                    self.collect_timestamp(c.timestamp);
                }
                Cell::Counter(c) => {
                    self.cells += 1;
                    self.collect_timestamp(c.timestamp);
                }
                Cell::Collection(c) => {
                    if let Some(tombstone) = &c.tombstone {
                        self.collect_timestamp(tombstone.timestamp);
                    }
                    for (_, sub) in &c.cells {
                        self.cells += 1;
                        self.collect_timestamp(sub.timestamp);
                    }
                }
            }
        }
    }
}

#[async_trait]
impl SstableConsumer for WritetimeHistogramConsumer {
    async fn on_start_of_stream(&mut self) -> Result<()> {
        Ok(())
    }

    async fn on_new_sstable(&mut self, _sst: Option<&Path>) -> Result<Decision> {
        Ok(Decision::Continue)
    }

    async fn consume_partition_start(&mut self, ps: PartitionStart) -> Result<Decision> {
        self.partitions += 1;
        if let Some(tombstone) = ps.tombstone {
            self.collect_timestamp(tombstone.timestamp);
        }
        Ok(Decision::Continue)
    }

    async fn consume_static_row(&mut self, sr: StaticRow) -> Result<Decision> {
        self.collect_row(&sr.cells);
        Ok(Decision::Continue)
    }

    async fn consume_clustering_row(&mut self, cr: ClusteringRow) -> Result<Decision> {
        if let Some(marker) = &cr.marker {
            self.collect_timestamp(marker.timestamp);
        }
        for tombstone in [cr.tombstone.regular, cr.tombstone.shadowable].into_iter().flatten() {
            self.collect_timestamp(tombstone.timestamp);
        }
        self.collect_row(&cr.cells);
        Ok(Decision::Continue)
    }

    async fn consume_range_tombstone_change(
        &mut self,
        rtc: RangeTombstoneChange,
    ) -> Result<Decision> {
        if let Some(tombstone) = rtc.tombstone {
            self.collect_timestamp(tombstone.timestamp);
        }
        Ok(Decision::Continue)
    }

    async fn consume_partition_end(&mut self) -> Result<Decision> {
        Ok(Decision::Continue)
    }

    async fn on_end_of_sstable(&mut self) -> Result<Decision> {
        Ok(Decision::Continue)
    }

    async fn on_end_of_stream(&mut self) -> Result<()> {
        if self.histogram.is_empty() {
            sst_log!(Level::Info, "histogram empty, no data to write");
            return Ok(());
        }
        sst_log!(
            Level::Info,
            "histogram has {} entries, collected from {} partitions, {} rows, {} cells: {} timestamps total",
            self.histogram.len(),
            self.partitions,
            self.rows,
            self.cells,
            self.timestamps
        );
        let document = HistogramDocument {
            buckets: self.histogram.keys().copied().collect(),
            counts: self.histogram.values().copied().collect(),
        };
        let body = serde_json::to_vec_pretty(&document)
            .map_err(|e| Error::Codec(format!("cannot encode histogram: {e}")))?;
        // Write-then-rename keeps a pre-existing histogram.json intact until
        // the replacement is complete.
        let target = self.output_dir.join("histogram.json");
        let staging = self.output_dir.join(".histogram.json.tmp");
        tokio::fs::write(&staging, body)
            .await
            .map_err(|e| Error::io(&staging, e))?;
        tokio::fs::rename(&staging, &target)
            .await
            .map_err(|e| Error::io(&target, e))?;
        sst_log!(Level::Info, "histogram written to {}", target.display());
        Ok(())
    }
}
