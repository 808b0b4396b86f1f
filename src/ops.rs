//! The operations the command surface exposes, over opened sstables.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::Level;

use crate::codec::{Sstable, SstableCodec};
use crate::consumer::{Decision, SstableConsumer};
use crate::decompress::decompress_sstables;
use crate::dump::{self, DumpingConsumer, JsonWriter, OutputFormat};
use crate::error::{Error, Result};
use crate::histogram::{Bucket, WritetimeHistogramConsumer};
use crate::logging::sst_log;
use crate::merge::CombinedReader;
use crate::reader::{consume_reader, load_partition_filter, PartitionFilter};
use crate::schema::Schema;
use crate::validate::{ValidatingConsumer, ValidationLevel};
use crate::write::{write_sstable, WriteOptions};

/// Options shared by the fragment-stream read operations.
#[derive(Debug, Clone, Default)]
pub struct ReadOptions {
    /// Merge all inputs into a single ordered stream.
    pub merge: bool,
    /// Drain instead of using the reader's native skip.
    pub no_skips: bool,
    /// Hex partition keys to filter for.
    pub partitions: Vec<String>,
    /// File of whitespace-separated hex partition keys.
    pub partitions_file: Option<PathBuf>,
}

/// Open every named sstable through the codec, in input order.
pub async fn load_sstables(
    codec: &dyn SstableCodec,
    paths: &[PathBuf],
) -> Result<Vec<Arc<dyn Sstable>>> {
    let mut sstables = Vec::with_capacity(paths.len());
    for path in paths {
        sstables.push(codec.open(path).await?);
    }
    Ok(sstables)
}

fn require_sstables(sstables: &[Arc<dyn Sstable>]) -> Result<()> {
    if sstables.is_empty() {
        return Err(Error::Usage(
            "no sstables specified on the command line".into(),
        ));
    }
    Ok(())
}

/// Drive a consumer over the inputs: each sstable in order, or the combined
/// stream with `merge`.
pub async fn run_consumer<C: SstableConsumer + ?Sized>(
    schema: Arc<Schema>,
    codec: &dyn SstableCodec,
    sstables: &[Arc<dyn Sstable>],
    options: &ReadOptions,
    filter: Option<&PartitionFilter>,
    consumer: &mut C,
) -> Result<()> {
    sst_log!(
        Level::Trace,
        "consuming {} sstable(s), merge={}",
        sstables.len(),
        options.merge
    );
    consumer.on_start_of_stream().await?;
    if options.merge {
        let mut readers = Vec::with_capacity(sstables.len());
        for sst in sstables {
            readers.push(sst.fragment_reader(schema.clone()).await?);
        }
        let combined = CombinedReader::new(schema.clone(), codec.counter_reconciler(), readers);
        consume_reader(Box::new(combined), consumer, None, filter, options.no_skips).await?;
    } else {
        for sst in sstables {
            let reader = sst.fragment_reader(schema.clone()).await?;
            let decision =
                consume_reader(reader, consumer, Some(sst.path()), filter, options.no_skips)
                    .await?;
            if decision == Decision::Stop {
                break;
            }
        }
    }
    consumer.on_end_of_stream().await
}

/// `dump-data`: emit the content of the data component.
pub async fn dump_data<W: Write + Send>(
    schema: Arc<Schema>,
    codec: &dyn SstableCodec,
    sstables: &[Arc<dyn Sstable>],
    options: &ReadOptions,
    format: OutputFormat,
    out: W,
) -> Result<()> {
    require_sstables(sstables)?;
    let filter =
        load_partition_filter(&schema, &options.partitions, options.partitions_file.as_deref())
            .await?;
    let mut consumer = DumpingConsumer::new(schema.clone(), format, out);
    run_consumer(schema, codec, sstables, options, filter.as_ref(), &mut consumer).await
}

/// `writetime-histogram`: collect write timestamps into `histogram.json`.
pub async fn writetime_histogram(
    schema: Arc<Schema>,
    codec: &dyn SstableCodec,
    sstables: &[Arc<dyn Sstable>],
    bucket: Bucket,
    output_dir: &Path,
) -> Result<()> {
    require_sstables(sstables)?;
    let mut consumer = WritetimeHistogramConsumer::new(bucket, output_dir);
    run_consumer(
        schema,
        codec,
        sstables,
        &ReadOptions::default(),
        None,
        &mut consumer,
    )
    .await
}

/// `validate`: check stream ordering invariants; returns the error count.
pub async fn validate(
    schema: Arc<Schema>,
    codec: &dyn SstableCodec,
    sstables: &[Arc<dyn Sstable>],
    merge: bool,
) -> Result<u64> {
    require_sstables(sstables)?;
    let mut consumer = ValidatingConsumer::new(schema.clone(), ValidationLevel::ClusteringKey);
    let options = ReadOptions {
        merge,
        ..ReadOptions::default()
    };
    run_consumer(schema, codec, sstables, &options, None, &mut consumer).await?;
    Ok(consumer.total_errors())
}

/// `validate-checksums`: check digests; emits `{path: bool}` per sstable.
pub async fn validate_checksums<W: Write>(
    sstables: &[Arc<dyn Sstable>],
    out: W,
) -> Result<()> {
    require_sstables(sstables)?;
    let mut w = JsonWriter::new(out);
    w.start_stream().map_err(dump::output_error)?;
    for sst in sstables {
        let valid = sst.validate_checksums().await?;
        sst_log!(
            Level::Info,
            "validated the checksums of {}: {}",
            sst.path().display(),
            if valid { "valid" } else { "invalid" }
        );
        w.sstable_key(Some(sst.path())).map_err(dump::output_error)?;
        w.bool(valid).map_err(dump::output_error)?;
    }
    finish_stream(w)
}

fn finish_stream<W: Write>(mut w: JsonWriter<W>) -> Result<()> {
    w.end_stream().map_err(dump::output_error)?;
    writeln!(w.out_mut()).map_err(dump::output_error)?;
    w.out_mut().flush().map_err(dump::output_error)
}

/// `dump-index`: emit the partition index of each input.
pub async fn dump_index<W: Write>(
    schema: Arc<Schema>,
    sstables: &[Arc<dyn Sstable>],
    out: W,
) -> Result<()> {
    require_sstables(sstables)?;
    let mut w = JsonWriter::new(out);
    w.start_stream().map_err(dump::output_error)?;
    for sst in sstables {
        let entries = sst.read_index().await?;
        w.sstable_key(Some(sst.path())).map_err(dump::output_error)?;
        dump::dump_index(&mut w, &schema, &entries).map_err(dump::output_error)?;
    }
    finish_stream(w)
}

/// `dump-compression-info`: emit each input's compression parameters.
pub async fn dump_compression_info<W: Write>(
    sstables: &[Arc<dyn Sstable>],
    out: W,
) -> Result<()> {
    require_sstables(sstables)?;
    let mut w = JsonWriter::new(out);
    w.start_stream().map_err(dump::output_error)?;
    for sst in sstables {
        w.sstable_key(Some(sst.path())).map_err(dump::output_error)?;
        match sst.compression_info() {
            Some(info) => dump::dump_compression_info(&mut w, info).map_err(dump::output_error)?,
            // Uncompressed sstable: nothing to report.
            None => {
                w.start_object().map_err(dump::output_error)?;
                w.end_object().map_err(dump::output_error)?;
            }
        }
    }
    finish_stream(w)
}

/// `dump-summary`: emit each input's summary component.
pub async fn dump_summary<W: Write>(
    schema: Arc<Schema>,
    sstables: &[Arc<dyn Sstable>],
    out: W,
) -> Result<()> {
    require_sstables(sstables)?;
    let mut w = JsonWriter::new(out);
    w.start_stream().map_err(dump::output_error)?;
    for sst in sstables {
        let summary = sst.summary().ok_or_else(|| {
            Error::Codec(format!("{}: missing summary component", sst.path().display()))
        })?;
        w.sstable_key(Some(sst.path())).map_err(dump::output_error)?;
        dump::dump_summary(&mut w, &schema, summary).map_err(dump::output_error)?;
    }
    finish_stream(w)
}

/// `dump-statistics`: emit each input's statistics component.
pub async fn dump_statistics<W: Write>(
    sstables: &[Arc<dyn Sstable>],
    out: W,
) -> Result<()> {
    require_sstables(sstables)?;
    let mut w = JsonWriter::new(out);
    w.start_stream().map_err(dump::output_error)?;
    for sst in sstables {
        let statistics = sst.statistics().ok_or_else(|| {
            Error::Codec(format!(
                "{}: missing statistics component",
                sst.path().display()
            ))
        })?;
        w.sstable_key(Some(sst.path())).map_err(dump::output_error)?;
        dump::dump_statistics(&mut w, sst.version(), statistics).map_err(dump::output_error)?;
    }
    finish_stream(w)
}

/// `dump-scylla-metadata`: emit each input's scylla metadata component.
pub async fn dump_scylla_metadata<W: Write>(
    sstables: &[Arc<dyn Sstable>],
    out: W,
) -> Result<()> {
    require_sstables(sstables)?;
    let mut w = JsonWriter::new(out);
    w.start_stream().map_err(dump::output_error)?;
    for sst in sstables {
        w.sstable_key(Some(sst.path())).map_err(dump::output_error)?;
        match sst.scylla_metadata() {
            Some(metadata) => {
                dump::dump_scylla_metadata(&mut w, metadata).map_err(dump::output_error)?
            }
            None => {
                w.start_object().map_err(dump::output_error)?;
                w.end_object().map_err(dump::output_error)?;
            }
        }
    }
    finish_stream(w)
}

/// `decompress`: write each compressed input's data next to it.
pub async fn decompress(sstables: &[Arc<dyn Sstable>]) -> Result<()> {
    require_sstables(sstables)?;
    decompress_sstables(sstables).await
}

/// `write`: build an sstable from a structured dump.
pub async fn write(
    schema: Arc<Schema>,
    codec: &dyn SstableCodec,
    sstables: &[Arc<dyn Sstable>],
    options: &WriteOptions,
) -> Result<()> {
    if !sstables.is_empty() {
        return Err(Error::Usage(
            "write operation does not operate on input sstables".into(),
        ));
    }
    write_sstable(schema, codec, options).await
}
