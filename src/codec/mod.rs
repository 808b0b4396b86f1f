//! The sstable codec boundary.
//!
//! The physical on-disk format is not this crate's business: everything the
//! core demands of a codec is captured by the traits here — a crawling
//! fragment reader with native skip, descriptor accessors for the side
//! components, a decompressed data stream, checksum validation, and a
//! cancellable fragment sink. One reference implementation backed by JSON
//! component files ships in [`json_store`].

pub mod json_store;
mod metadata;

use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use futures_core::Stream;

use crate::error::{Error, Result};
use crate::fragment::{CounterCell, CounterShard, Fragment};
use crate::reader::FragmentReader;
use crate::schema::Schema;

pub use json_store::JsonStoreCodec;
pub use metadata::{
    ColumnDesc, CommitlogInterval, CompactionMetadata, CompressionInfo, EnabledFeatures,
    EstimatedHistogram, IndexEntry, LargeDataStatsEntry, LargeDataType, MetadataType,
    ReplayPosition, ScyllaMetadata, SerializationHeader, Statistics, StatsMetadata,
    StreamingHistogram, Summary, SummaryEntry, SummaryHeader, TokenRange, TokenRangeBound,
    ValidationMetadata,
};

/// Sstable format versions, oldest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SstableVersion {
    /// ka
    Ka,
    /// la
    La,
    /// mc
    Mc,
    /// md
    Md,
    /// me
    Me,
}

impl SstableVersion {
    /// The version tag used in component file names.
    pub fn as_str(self) -> &'static str {
        match self {
            SstableVersion::Ka => "ka",
            SstableVersion::La => "la",
            SstableVersion::Mc => "mc",
            SstableVersion::Md => "md",
            SstableVersion::Me => "me",
        }
    }

    /// Whether this version carries a serialization header in Statistics.
    pub fn has_serialization_header(self) -> bool {
        self >= SstableVersion::Mc
    }

    /// The newest supported version; what the write path produces.
    pub fn highest() -> Self {
        SstableVersion::Me
    }
}

impl FromStr for SstableVersion {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, String> {
        match s {
            "ka" => Ok(SstableVersion::Ka),
            "la" => Ok(SstableVersion::La),
            "mc" => Ok(SstableVersion::Mc),
            "md" => Ok(SstableVersion::Md),
            "me" => Ok(SstableVersion::Me),
            _ => Err(format!("unknown sstable format version {s}")),
        }
    }
}

/// The component files making up an sstable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Component {
    /// The data proper.
    Data,
    /// The partition index.
    Index,
    /// The sampled index of the index.
    Summary,
    /// Metadata about the data component.
    Statistics,
    /// Compression parameters and chunk offsets.
    CompressionInfo,
    /// Scylla-specific metadata.
    ScyllaMetadata,
    /// Full-content digest.
    Digest,
}

impl Component {
    fn file_name(self) -> &'static str {
        match self {
            Component::Data => "Data.json",
            Component::Index => "Index.json",
            Component::Summary => "Summary.json",
            Component::Statistics => "Statistics.json",
            Component::CompressionInfo => "CompressionInfo.json",
            Component::ScyllaMetadata => "ScyllaMetadata.json",
            Component::Digest => "Digest.crc32",
        }
    }
}

/// The path of an sstable component file.
pub fn component_path(
    dir: &Path,
    version: SstableVersion,
    generation: i64,
    component: Component,
) -> PathBuf {
    dir.join(format!(
        "{}-{}-big-{}",
        version.as_str(),
        generation,
        component.file_name()
    ))
}

/// Parse `(version, generation)` out of a Data component path.
pub fn parse_data_path(path: &Path) -> Result<(SstableVersion, i64)> {
    let err = || {
        Error::Codec(format!(
            "{} is not an sstable data component (expected <version>-<generation>-big-Data.json)",
            path.display()
        ))
    };
    let name = path.file_name().and_then(|n| n.to_str()).ok_or_else(err)?;
    let mut parts = name.splitn(4, '-');
    let version = parts
        .next()
        .and_then(|v| SstableVersion::from_str(v).ok())
        .ok_or_else(err)?;
    let generation = parts
        .next()
        .and_then(|g| g.parse::<i64>().ok())
        .ok_or_else(err)?;
    if parts.next() != Some("big") || parts.next() != Some("Data.json") {
        return Err(err());
    }
    Ok((version, generation))
}

/// A stream of decompressed data chunks.
pub type DataStream = Pin<Box<dyn Stream<Item = std::io::Result<Vec<u8>>> + Send>>;

/// An opened sstable.
#[async_trait]
pub trait Sstable: Send + Sync {
    /// Path of the data component the sstable was opened from.
    fn path(&self) -> &Path;

    /// Format version.
    fn version(&self) -> SstableVersion;

    /// A crawling reader over the sstable's fragments.
    async fn fragment_reader(&self, schema: Arc<Schema>) -> Result<Box<dyn FragmentReader>>;

    /// The partition index entries.
    async fn read_index(&self) -> Result<Vec<IndexEntry>>;

    /// The summary component, when present.
    fn summary(&self) -> Option<&Summary>;

    /// The statistics component, when present.
    fn statistics(&self) -> Option<&Statistics>;

    /// Compression parameters; `None` for uncompressed sstables.
    fn compression_info(&self) -> Option<&CompressionInfo>;

    /// Scylla-specific metadata, when present.
    fn scylla_metadata(&self) -> Option<&ScyllaMetadata>;

    /// Whether the data component is compressed.
    fn is_compressed(&self) -> bool {
        self.compression_info().is_some()
    }

    /// The data component, decompressed.
    async fn data_stream(&self) -> Result<DataStream>;

    /// Check the data component against its digest and per-chunk checksums.
    async fn validate_checksums(&self) -> Result<bool>;
}

/// A writer handle consuming a fragment stream into a new sstable.
#[async_trait]
pub trait SstableSink: Send {
    /// Append one fragment.
    async fn put(&mut self, fragment: Fragment) -> Result<()>;

    /// Seal the sstable: flush the data component and write the side
    /// components.
    async fn finish(self: Box<Self>) -> Result<()>;

    /// Abandon the write and remove everything materialised so far.
    async fn cancel(self: Box<Self>) -> Result<()>;
}

/// A physical sstable codec.
#[async_trait]
pub trait SstableCodec: Send + Sync {
    /// Open the sstable whose data component lives at `path`.
    async fn open(&self, path: &Path) -> Result<Arc<dyn Sstable>>;

    /// Create a writer for a new sstable with the given generation.
    async fn create_sink(
        &self,
        schema: Arc<Schema>,
        output_dir: &Path,
        generation: i64,
    ) -> Result<Box<dyn SstableSink>>;

    /// The store's counter reconciliation rule.
    fn counter_reconciler(&self) -> Arc<dyn CounterReconciler>;
}

/// Reconciles two counter cells of the same column during a merge. The rule
/// is the host store's, not ours; codecs supply it.
pub trait CounterReconciler: Send + Sync {
    /// Merge `a` and `b` into the surviving cell.
    fn reconcile(&self, a: CounterCell, b: CounterCell) -> CounterCell;
}

/// Shard-wise reconciliation: the union of shards, keeping for every shard
/// id the shard with the higher logical clock.
pub struct LastClockCounterReconciler;

impl CounterReconciler for LastClockCounterReconciler {
    fn reconcile(&self, a: CounterCell, b: CounterCell) -> CounterCell {
        let timestamp = a.timestamp.max(b.timestamp);
        let mut shards: Vec<CounterShard> = Vec::with_capacity(a.shards.len() + b.shards.len());
        let mut a = a.shards.into_iter().peekable();
        let mut b = b.shards.into_iter().peekable();
        loop {
            match (a.peek(), b.peek()) {
                (Some(x), Some(y)) => match x.id.cmp(&y.id) {
                    std::cmp::Ordering::Less => shards.push(a.next().unwrap()),
                    std::cmp::Ordering::Greater => shards.push(b.next().unwrap()),
                    std::cmp::Ordering::Equal => {
                        let x = a.next().unwrap();
                        let y = b.next().unwrap();
                        shards.push(if y.clock > x.clock { y } else { x });
                    }
                },
                (Some(_), None) => shards.push(a.next().unwrap()),
                (None, Some(_)) => shards.push(b.next().unwrap()),
                (None, None) => break,
            }
        }
        CounterCell { timestamp, shards }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn data_path_parses_version_and_generation() {
        let (version, generation) =
            parse_data_path(Path::new("/tmp/me-42-big-Data.json")).unwrap();
        assert_eq!(version, SstableVersion::Me);
        assert_eq!(generation, 42);
        assert!(parse_data_path(Path::new("/tmp/me-42-big-Index.json")).is_err());
        assert!(parse_data_path(Path::new("/tmp/zz-1-big-Data.json")).is_err());
    }

    #[test]
    fn component_paths_share_the_prefix() {
        let dir = Path::new("/out");
        assert_eq!(
            component_path(dir, SstableVersion::Me, 7, Component::Digest),
            Path::new("/out/me-7-big-Digest.crc32")
        );
    }

    #[test]
    fn counter_reconciliation_keeps_the_higher_clock_per_shard() {
        let id1 = Uuid::from_u128(1);
        let id2 = Uuid::from_u128(2);
        let a = CounterCell {
            timestamp: 10,
            shards: vec![CounterShard {
                id: id1,
                value: 5,
                clock: 3,
            }],
        };
        let b = CounterCell {
            timestamp: 20,
            shards: vec![
                CounterShard {
                    id: id1,
                    value: 7,
                    clock: 4,
                },
                CounterShard {
                    id: id2,
                    value: 1,
                    clock: 1,
                },
            ],
        };
        let merged = LastClockCounterReconciler.reconcile(a, b);
        assert_eq!(merged.timestamp, 20);
        assert_eq!(merged.shards.len(), 2);
        assert_eq!(merged.shards[0].value, 7);
    }
}
