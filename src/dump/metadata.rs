//! Projections of the codec's descriptor trees into the structured dump.
//!
//! Projection rules: integers keep their signedness, byte strings render as
//! lowercase hex, NaN doubles become the string `"NaN"`, deletion times use
//! the date form while write timestamps stay int64, and tagged unions emit
//! exactly one nested object named by the active tag.

use std::io::{self, Write};

use super::json::JsonWriter;
use crate::codec::{
    CompressionInfo, EstimatedHistogram, IndexEntry, ScyllaMetadata, SstableVersion, Statistics,
    StreamingHistogram, Summary,
};
use crate::key::{bytes_to_hex, PartitionKey};
use crate::schema::Schema;

fn write_double<W: Write>(w: &mut JsonWriter<W>, v: f64) -> io::Result<()> {
    if v.is_nan() {
        w.string("NaN")
    } else {
        w.double(v)
    }
}

fn write_key_object<W: Write>(
    w: &mut JsonWriter<W>,
    schema: &Schema,
    raw: &[u8],
    token: Option<i64>,
) -> io::Result<()> {
    w.start_object()?;
    if let Some(token) = token {
        w.key("token")?;
        w.string(&token.to_string())?;
    }
    w.key("raw")?;
    w.string(&bytes_to_hex(raw))?;
    w.key("value")?;
    match PartitionKey::from_bytes(raw) {
        Ok(key) => w.string(&schema.render_partition_key(&key))?,
        Err(_) => w.string(&format!("0x{}", bytes_to_hex(raw)))?,
    }
    w.end_object()
}

/// Project the partition index.
pub fn dump_index<W: Write>(
    w: &mut JsonWriter<W>,
    schema: &Schema,
    entries: &[IndexEntry],
) -> io::Result<()> {
    w.start_array()?;
    for entry in entries {
        w.start_object()?;
        w.key("key")?;
        write_key_object(w, schema, &entry.raw_key, None)?;
        w.key("pos")?;
        w.uint64(entry.position)?;
        w.end_object()?;
    }
    w.end_array()
}

/// Project the compression-info component.
pub fn dump_compression_info<W: Write>(
    w: &mut JsonWriter<W>,
    info: &CompressionInfo,
) -> io::Result<()> {
    w.start_object()?;
    w.key("name")?;
    w.string(&info.name)?;
    w.key("options")?;
    w.start_object()?;
    for (key, value) in &info.options {
        w.key(key)?;
        w.string(value)?;
    }
    w.end_object()?;
    w.key("chunk_len")?;
    w.uint64(info.chunk_len as u64)?;
    w.key("data_len")?;
    w.uint64(info.data_len)?;
    w.key("offsets")?;
    w.start_array()?;
    for offset in &info.offsets {
        w.uint64(*offset)?;
    }
    w.end_array()?;
    w.end_object()
}

/// Project the summary component.
pub fn dump_summary<W: Write>(
    w: &mut JsonWriter<W>,
    schema: &Schema,
    summary: &Summary,
) -> io::Result<()> {
    w.start_object()?;

    w.key("header")?;
    w.start_object()?;
    w.key("min_index_interval")?;
    w.uint64(summary.header.min_index_interval)?;
    w.key("size")?;
    w.uint64(summary.header.size)?;
    w.key("memory_size")?;
    w.uint64(summary.header.memory_size)?;
    w.key("sampling_level")?;
    w.uint64(summary.header.sampling_level)?;
    w.key("size_at_full_sampling")?;
    w.uint64(summary.header.size_at_full_sampling)?;
    w.end_object()?;

    w.key("positions")?;
    w.start_array()?;
    for pos in &summary.positions {
        w.uint64(*pos)?;
    }
    w.end_array()?;

    w.key("entries")?;
    w.start_array()?;
    for entry in &summary.entries {
        w.start_object()?;
        w.key("key")?;
        write_key_object(w, schema, &entry.raw_key, Some(entry.token))?;
        w.key("position")?;
        w.uint64(entry.position)?;
        w.end_object()?;
    }
    w.end_array()?;

    w.key("first_key")?;
    write_key_object(w, schema, &summary.first_key, None)?;
    w.key("last_key")?;
    write_key_object(w, schema, &summary.last_key, None)?;

    w.end_object()
}

fn write_estimated_histogram<W: Write>(
    w: &mut JsonWriter<W>,
    histogram: &EstimatedHistogram,
) -> io::Result<()> {
    w.start_array()?;
    for (i, value) in histogram.buckets.iter().enumerate() {
        w.start_object()?;
        w.key("offset")?;
        let offset_index = if i == 0 { 0 } else { i - 1 };
        w.int64(histogram.bucket_offsets.get(offset_index).copied().unwrap_or(0))?;
        w.key("value")?;
        w.int64(*value)?;
        w.end_object()?;
    }
    w.end_array()
}

fn write_streaming_histogram<W: Write>(
    w: &mut JsonWriter<W>,
    histogram: &StreamingHistogram,
) -> io::Result<()> {
    w.start_object()?;
    for (bin, count) in &histogram.bins {
        w.key(&format!("{bin}"))?;
        w.uint64(*count)?;
    }
    w.end_object()
}

/// Project the statistics component.
pub fn dump_statistics<W: Write>(
    w: &mut JsonWriter<W>,
    version: SstableVersion,
    statistics: &Statistics,
) -> io::Result<()> {
    w.start_object()?;

    w.key("offsets")?;
    w.start_object()?;
    for (ty, offset) in &statistics.offsets {
        w.key(ty.name())?;
        w.uint64(*offset as u64)?;
    }
    w.end_object()?;

    if let Some(validation) = &statistics.validation {
        w.key("validation")?;
        w.start_object()?;
        w.key("partitioner")?;
        w.string(&validation.partitioner)?;
        w.key("filter_chance")?;
        write_double(w, validation.filter_chance)?;
        w.end_object()?;
    }

    if let Some(compaction) = &statistics.compaction {
        w.key("compaction")?;
        w.start_object()?;
        if !version.has_serialization_header() {
            w.key("ancestors")?;
            w.start_array()?;
            for ancestor in &compaction.ancestors {
                w.uint64(*ancestor as u64)?;
            }
            w.end_array()?;
        }
        w.key("cardinality")?;
        w.start_array()?;
        for byte in &compaction.cardinality {
            w.uint64(*byte as u64)?;
        }
        w.end_array()?;
        w.end_object()?;
    }

    if let Some(stats) = &statistics.stats {
        w.key("stats")?;
        w.start_object()?;
        w.key("estimated_partition_size")?;
        write_estimated_histogram(w, &stats.estimated_partition_size)?;
        w.key("estimated_cells_count")?;
        write_estimated_histogram(w, &stats.estimated_cells_count)?;
        w.key("position")?;
        w.start_object()?;
        w.key("id")?;
        w.uint64(stats.position.id)?;
        w.key("pos")?;
        w.uint64(stats.position.pos as u64)?;
        w.end_object()?;
        w.key("min_timestamp")?;
        w.int64(stats.min_timestamp)?;
        w.key("max_timestamp")?;
        w.int64(stats.max_timestamp)?;
        if let Some(v) = stats.min_local_deletion_time {
            w.key("min_local_deletion_time")?;
            w.int64(v)?;
        }
        w.key("max_local_deletion_time")?;
        w.int64(stats.max_local_deletion_time)?;
        if let Some(v) = stats.min_ttl {
            w.key("min_ttl")?;
            w.int64(v)?;
        }
        if let Some(v) = stats.max_ttl {
            w.key("max_ttl")?;
            w.int64(v)?;
        }
        w.key("compression_ratio")?;
        write_double(w, stats.compression_ratio)?;
        w.key("estimated_tombstone_drop_time")?;
        write_streaming_histogram(w, &stats.estimated_tombstone_drop_time)?;
        w.key("sstable_level")?;
        w.uint64(stats.sstable_level as u64)?;
        w.key("repaired_at")?;
        w.uint64(stats.repaired_at)?;
        w.key("min_column_names")?;
        w.start_array()?;
        for v in &stats.min_column_names {
            w.uint64(*v as u64)?;
        }
        w.end_array()?;
        w.key("max_column_names")?;
        w.start_array()?;
        for v in &stats.max_column_names {
            w.uint64(*v as u64)?;
        }
        w.end_array()?;
        w.key("has_legacy_counter_shards")?;
        w.bool(stats.has_legacy_counter_shards)?;
        if let Some(v) = stats.columns_count {
            w.key("columns_count")?;
            w.int64(v)?;
        }
        if let Some(v) = stats.rows_count {
            w.key("rows_count")?;
            w.int64(v)?;
        }
        if let Some(lower_bound) = &stats.commitlog_lower_bound {
            w.key("commitlog_lower_bound")?;
            w.start_object()?;
            w.key("id")?;
            w.uint64(lower_bound.id)?;
            w.key("pos")?;
            w.uint64(lower_bound.pos as u64)?;
            w.end_object()?;
        }
        if !stats.commitlog_intervals.is_empty() {
            w.key("commitlog_intervals")?;
            w.start_array()?;
            for interval in &stats.commitlog_intervals {
                w.start_object()?;
                for (name, pos) in [("start", interval.start), ("end", interval.end)] {
                    w.key(name)?;
                    w.start_object()?;
                    w.key("id")?;
                    w.uint64(pos.id)?;
                    w.key("pos")?;
                    w.uint64(pos.pos as u64)?;
                    w.end_object()?;
                }
                w.end_object()?;
            }
            w.end_array()?;
        }
        if let Some(host_id) = &stats.originating_host_id {
            w.key("originating_host_id")?;
            w.string(&host_id.to_string())?;
        }
        w.end_object()?;
    }

    if version.has_serialization_header() {
        if let Some(header) = &statistics.serialization_header {
            w.key("serialization_header")?;
            w.start_object()?;
            w.key("min_timestamp_base")?;
            w.uint64(header.min_timestamp_base)?;
            w.key("min_local_deletion_time_base")?;
            w.uint64(header.min_local_deletion_time_base)?;
            w.key("min_ttl_base")?;
            w.uint64(header.min_ttl_base)?;
            w.key("pk_type_name")?;
            w.string(&header.pk_type_name)?;
            w.key("clustering_key_types_names")?;
            w.start_array()?;
            for name in &header.clustering_key_types_names {
                w.string(name)?;
            }
            w.end_array()?;
            for (key, columns) in [
                ("static_columns", &header.static_columns),
                ("regular_columns", &header.regular_columns),
            ] {
                w.key(key)?;
                w.start_array()?;
                for column in columns {
                    w.start_object()?;
                    w.key("name")?;
                    w.string(&column.name)?;
                    w.key("type_name")?;
                    w.string(&column.type_name)?;
                    w.end_object()?;
                }
                w.end_array()?;
            }
            w.end_object()?;
        }
    }

    w.end_object()
}

/// Project the scylla-metadata component: one nested object per present
/// union member, named by its tag.
pub fn dump_scylla_metadata<W: Write>(
    w: &mut JsonWriter<W>,
    metadata: &ScyllaMetadata,
) -> io::Result<()> {
    w.start_object()?;
    if let Some(sharding) = &metadata.sharding {
        w.key("sharding")?;
        w.start_array()?;
        for range in sharding {
            w.start_object()?;
            for (name, bound) in [("left", &range.left), ("right", &range.right)] {
                w.key(name)?;
                w.start_object()?;
                w.key("exclusive")?;
                w.bool(bound.exclusive)?;
                w.key("token")?;
                w.string(&bound.token)?;
                w.end_object()?;
            }
            w.end_object()?;
        }
        w.end_array()?;
    }
    if let Some(features) = &metadata.features {
        w.key("features")?;
        w.start_object()?;
        w.key("mask")?;
        w.uint64(features.mask)?;
        w.key("features")?;
        w.start_array()?;
        for name in features.names() {
            w.string(name)?;
        }
        w.end_array()?;
        w.end_object()?;
    }
    if let Some(attributes) = &metadata.extension_attributes {
        w.key("extension_attributes")?;
        w.start_object()?;
        for (key, value) in attributes {
            w.key(key)?;
            w.string(value)?;
        }
        w.end_object()?;
    }
    if let Some(run_identifier) = &metadata.run_identifier {
        w.key("run_identifier")?;
        w.string(&run_identifier.to_string())?;
    }
    if let Some(stats) = &metadata.large_data_stats {
        w.key("large_data_stats")?;
        w.start_object()?;
        for (ty, entry) in stats {
            w.key(ty.name())?;
            w.start_object()?;
            w.key("max_value")?;
            w.uint64(entry.max_value)?;
            w.key("threshold")?;
            w.uint64(entry.threshold)?;
            w.key("above_threshold")?;
            w.uint64(entry.above_threshold as u64)?;
            w.end_object()?;
        }
        w.end_object()?;
    }
    if let Some(origin) = &metadata.sstable_origin {
        w.key("sstable_origin")?;
        w.string(origin)?;
    }
    if let Some(version) = &metadata.scylla_version {
        w.key("scylla_version")?;
        w.string(version)?;
    }
    if let Some(build_id) = &metadata.scylla_build_id {
        w.key("scylla_build_id")?;
        w.string(build_id)?;
    }
    w.end_object()
}
