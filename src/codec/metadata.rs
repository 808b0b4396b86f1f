//! Logical descriptors of the sstable side components, as the codec exposes
//! them to the dumpers.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Serde adaptor storing byte strings as lowercase hex.
pub(crate) mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    use crate::key::{bytes_to_hex, hex_to_bytes};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&bytes_to_hex(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let hex = String::deserialize(deserializer)?;
        hex_to_bytes(&hex).map_err(serde::de::Error::custom)
    }
}

/// One entry of the partition index: a key and its Data-component position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexEntry {
    /// The partition key, composite form.
    #[serde(with = "hex_bytes")]
    pub raw_key: Vec<u8>,
    /// Byte offset of the partition in the (uncompressed) data component.
    pub position: u64,
}

/// The summary header.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummaryHeader {
    /// Sampling interval the summary was built with.
    pub min_index_interval: u64,
    /// Number of entries.
    pub size: u64,
    /// In-memory footprint of the summary.
    pub memory_size: u64,
    /// Current sampling level.
    pub sampling_level: u64,
    /// Entries the summary would have at full sampling.
    pub size_at_full_sampling: u64,
}

/// One sampled summary entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummaryEntry {
    /// The sampled partition key, composite form.
    #[serde(with = "hex_bytes")]
    pub raw_key: Vec<u8>,
    /// The key's token.
    pub token: i64,
    /// Index-component position of the entry.
    pub position: u64,
}

/// The summary component: a sampled index of the index.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Summary {
    /// Header fields.
    pub header: SummaryHeader,
    /// Entry offsets.
    pub positions: Vec<u64>,
    /// Sampled entries.
    pub entries: Vec<SummaryEntry>,
    /// First partition key in the sstable.
    #[serde(with = "hex_bytes")]
    pub first_key: Vec<u8>,
    /// Last partition key in the sstable.
    #[serde(with = "hex_bytes")]
    pub last_key: Vec<u8>,
}

/// The compression-info component.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompressionInfo {
    /// Compressor class name.
    pub name: String,
    /// Compressor options.
    pub options: BTreeMap<String, String>,
    /// Uncompressed chunk length.
    pub chunk_len: u32,
    /// Total uncompressed data length.
    pub data_len: u64,
    /// Per-chunk offsets into the compressed stream.
    pub offsets: Vec<u64>,
}

/// A commitlog replay position.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplayPosition {
    /// Segment id.
    pub id: u64,
    /// Offset within the segment.
    pub pos: u32,
}

/// A replay-position interval.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitlogInterval {
    /// Interval start.
    pub start: ReplayPosition,
    /// Interval end.
    pub end: ReplayPosition,
}

/// A bucketed histogram with precomputed offsets.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EstimatedHistogram {
    /// Bucket boundaries.
    pub bucket_offsets: Vec<i64>,
    /// Bucket values.
    pub buckets: Vec<i64>,
}

/// A streaming histogram: value bins with counts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StreamingHistogram {
    /// `(bin, count)` pairs in bin order.
    pub bins: Vec<(f64, u64)>,
}

/// Validation metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationMetadata {
    /// Partitioner class name.
    pub partitioner: String,
    /// Bloom filter false-positive chance.
    pub filter_chance: f64,
}

/// Compaction metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompactionMetadata {
    /// Ancestor generations (older format versions only).
    pub ancestors: Vec<u32>,
    /// Cardinality estimator state.
    pub cardinality: Vec<u8>,
}

/// The stats metadata block.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatsMetadata {
    /// Histogram of partition sizes.
    pub estimated_partition_size: EstimatedHistogram,
    /// Histogram of per-partition cell counts.
    pub estimated_cells_count: EstimatedHistogram,
    /// Replay position the sstable was flushed at.
    pub position: ReplayPosition,
    /// Smallest write timestamp.
    pub min_timestamp: i64,
    /// Largest write timestamp.
    pub max_timestamp: i64,
    /// Smallest local deletion time (newer format versions only).
    pub min_local_deletion_time: Option<i64>,
    /// Largest local deletion time.
    pub max_local_deletion_time: i64,
    /// Smallest TTL (newer format versions only).
    pub min_ttl: Option<i64>,
    /// Largest TTL (newer format versions only).
    pub max_ttl: Option<i64>,
    /// Compressed-to-uncompressed ratio; NaN when not compressed.
    pub compression_ratio: f64,
    /// Tombstone drop-time histogram.
    pub estimated_tombstone_drop_time: StreamingHistogram,
    /// Compaction level.
    pub sstable_level: u32,
    /// Repair timestamp.
    pub repaired_at: u64,
    /// Clustering lower bound of the data.
    pub min_column_names: Vec<u32>,
    /// Clustering upper bound of the data.
    pub max_column_names: Vec<u32>,
    /// Whether legacy counter shards are present.
    pub has_legacy_counter_shards: bool,
    /// Total cell count (newer format versions only).
    pub columns_count: Option<i64>,
    /// Total row count (newer format versions only).
    pub rows_count: Option<i64>,
    /// Commitlog lower bound (newer format versions only).
    pub commitlog_lower_bound: Option<ReplayPosition>,
    /// Commitlog intervals (newer format versions only).
    pub commitlog_intervals: Vec<CommitlogInterval>,
    /// Id of the node that wrote the sstable.
    pub originating_host_id: Option<Uuid>,
}

/// One serialized column description.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDesc {
    /// Column name.
    pub name: String,
    /// Column type name.
    pub type_name: String,
}

/// The serialization header (newer format versions only).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerializationHeader {
    /// Base value timestamps are delta-encoded against.
    pub min_timestamp_base: u64,
    /// Base value deletion times are delta-encoded against.
    pub min_local_deletion_time_base: u64,
    /// Base value TTLs are delta-encoded against.
    pub min_ttl_base: u64,
    /// Partition key type name.
    pub pk_type_name: String,
    /// Clustering key component type names.
    pub clustering_key_types_names: Vec<String>,
    /// Static column descriptions.
    pub static_columns: Vec<ColumnDesc>,
    /// Regular column descriptions.
    pub regular_columns: Vec<ColumnDesc>,
}

/// Which metadata block an offsets entry points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetadataType {
    /// Validation metadata.
    Validation,
    /// Compaction metadata.
    Compaction,
    /// Stats metadata.
    Stats,
    /// Serialization header.
    Serialization,
}

impl MetadataType {
    /// The name used in the dump.
    pub fn name(self) -> &'static str {
        match self {
            MetadataType::Validation => "validation",
            MetadataType::Compaction => "compaction",
            MetadataType::Stats => "stats",
            MetadataType::Serialization => "serialization",
        }
    }
}

/// The statistics component.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Statistics {
    /// Block offsets, in on-disk order.
    pub offsets: Vec<(MetadataType, u32)>,
    /// Validation metadata, when present.
    pub validation: Option<ValidationMetadata>,
    /// Compaction metadata, when present.
    pub compaction: Option<CompactionMetadata>,
    /// Stats metadata, when present.
    pub stats: Option<StatsMetadata>,
    /// Serialization header, when present.
    pub serialization_header: Option<SerializationHeader>,
}

/// One bound of a sharding token range.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenRangeBound {
    /// Whether the bound excludes its token.
    pub exclusive: bool,
    /// The token, in its string form.
    pub token: String,
}

/// A sharding token range.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenRange {
    /// Lower bound.
    pub left: TokenRangeBound,
    /// Upper bound.
    pub right: TokenRangeBound,
}

/// Feature flags the sstable was written with.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnabledFeatures {
    /// Raw feature mask.
    pub mask: u64,
}

impl EnabledFeatures {
    const NAMES: [(u64, &'static str); 6] = [
        (1 << 0, "NonCompoundPIEntries"),
        (1 << 1, "NonCompoundRangeTombstones"),
        (1 << 2, "ShadowableTombstones"),
        (1 << 3, "CorrectStaticCompact"),
        (1 << 4, "CorrectEmptyCounters"),
        (1 << 5, "CorrectUDTsInCollections"),
    ];

    /// Names of the enabled features, in mask order.
    pub fn names(self) -> Vec<&'static str> {
        Self::NAMES
            .iter()
            .filter(|(bit, _)| self.mask & bit != 0)
            .map(|(_, name)| *name)
            .collect()
    }
}

/// Which large-data threshold a stats entry describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LargeDataType {
    /// Partition size in bytes.
    PartitionSize,
    /// Row size in bytes.
    RowSize,
    /// Cell size in bytes.
    CellSize,
    /// Rows per partition.
    RowsInPartition,
    /// Elements per collection.
    ElementsInCollection,
}

impl LargeDataType {
    /// The name used in the dump.
    pub fn name(self) -> &'static str {
        match self {
            LargeDataType::PartitionSize => "partition_size",
            LargeDataType::RowSize => "row_size",
            LargeDataType::CellSize => "cell_size",
            LargeDataType::RowsInPartition => "rows_in_partition",
            LargeDataType::ElementsInCollection => "elements_in_collection",
        }
    }
}

/// One large-data stats entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LargeDataStatsEntry {
    /// Largest value observed.
    pub max_value: u64,
    /// Reporting threshold.
    pub threshold: u64,
    /// How many values exceeded the threshold.
    pub above_threshold: u32,
}

/// The scylla-metadata component: a tagged union per entry, each optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScyllaMetadata {
    /// Sharding token ranges.
    pub sharding: Option<Vec<TokenRange>>,
    /// Feature flags.
    pub features: Option<EnabledFeatures>,
    /// Free-form extension attributes.
    pub extension_attributes: Option<BTreeMap<String, String>>,
    /// Compaction run identifier.
    pub run_identifier: Option<Uuid>,
    /// Large-data statistics.
    pub large_data_stats: Option<BTreeMap<LargeDataType, LargeDataStatsEntry>>,
    /// What produced the sstable.
    pub sstable_origin: Option<String>,
    /// Writing server version.
    pub scylla_version: Option<String>,
    /// Writing server build id.
    pub scylla_build_id: Option<String>,
}
