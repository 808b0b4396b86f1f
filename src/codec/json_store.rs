//! The reference codec: sstables stored as JSON component files.
//!
//! The data component is the dump format's partition array, read back
//! through the streaming parser; the side components are serde documents
//! next to it; the digest is a crc32 over the data component's bytes. The
//! store is uncompressed, and only carries the write path's cell subset.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::stream;
use log::Level;
use serde::de::DeserializeOwned;
use tokio::io::{AsyncReadExt, BufReader};

use super::{
    component_path, parse_data_path, ColumnDesc, Component, CompressionInfo, CounterReconciler,
    DataStream, IndexEntry, LastClockCounterReconciler, MetadataType, ScyllaMetadata,
    SerializationHeader, Sstable, SstableCodec, SstableSink, SstableVersion, Statistics,
    StatsMetadata, Summary, SummaryEntry, SummaryHeader, ValidationMetadata,
};
use crate::dump::{JsonWriter, PartitionStreamWriter};
use crate::error::{Error, Result};
use crate::fragment::{Cell, Fragment, Row};
use crate::logging::sst_log;
use crate::parse::MutationStreamParser;
use crate::reader::FragmentReader;
use crate::schema::Schema;

/// Name the sink reports as the sstable origin.
const ORIGIN: &str = "sstable-tool";

/// Sampling interval the sink's summary claims.
const MIN_INDEX_INTERVAL: u64 = 128;

async fn load_component<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let raw = match tokio::fs::read(path).await {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(Error::io(path, e)),
    };
    serde_json::from_slice(&raw)
        .map(Some)
        .map_err(|e| Error::Codec(format!("malformed component {}: {e}", path.display())))
}

/// The JSON-file-backed codec.
#[derive(Debug, Default)]
pub struct JsonStoreCodec;

#[async_trait]
impl SstableCodec for JsonStoreCodec {
    async fn open(&self, path: &Path) -> Result<Arc<dyn Sstable>> {
        let metadata = tokio::fs::metadata(path).await.map_err(|e| Error::io(path, e))?;
        if !metadata.is_file() {
            return Err(Error::Codec(format!(
                "file pointed to by provided sstable path {} is not a regular file",
                path.display()
            )));
        }
        let (version, generation) = parse_data_path(path)?;
        let dir = path.parent().unwrap_or(Path::new(".")).to_path_buf();
        let component = |c| component_path(&dir, version, generation, c);
        let summary = load_component(&component(Component::Summary)).await?;
        let statistics = load_component(&component(Component::Statistics)).await?;
        let compression = load_component(&component(Component::CompressionInfo)).await?;
        let scylla_metadata = load_component(&component(Component::ScyllaMetadata)).await?;
        let sstable = JsonSstable {
            path: path.to_path_buf(),
            dir,
            version,
            generation,
            summary,
            statistics,
            compression,
            scylla_metadata,
        };
        Ok(Arc::new(sstable))
    }

    async fn create_sink(
        &self,
        schema: Arc<Schema>,
        output_dir: &Path,
        generation: i64,
    ) -> Result<Box<dyn SstableSink>> {
        let version = SstableVersion::highest();
        let data_path = component_path(output_dir, version, generation, Component::Data);
        let file = std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&data_path)
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::AlreadyExists {
                    Error::Codec(format!(
                        "cannot create output sstable {}, file already exists",
                        data_path.display()
                    ))
                } else {
                    Error::io(&data_path, e)
                }
            })?;
        let mut stream = PartitionStreamWriter::new(
            schema.clone(),
            JsonWriter::new(CountingWriter::new(file)),
        );
        stream
            .begin_sstable()
            .map_err(|e| Error::io(&data_path, e))?;
        Ok(Box::new(JsonSink {
            schema,
            dir: output_dir.to_path_buf(),
            version,
            generation,
            data_path,
            stream,
            index: Vec::new(),
            rows: 0,
            min_timestamp: None,
            max_timestamp: None,
            min_deletion_time: None,
            max_deletion_time: None,
        }))
    }

    fn counter_reconciler(&self) -> Arc<dyn CounterReconciler> {
        Arc::new(LastClockCounterReconciler)
    }
}

struct JsonSstable {
    path: PathBuf,
    dir: PathBuf,
    version: SstableVersion,
    generation: i64,
    summary: Option<Summary>,
    statistics: Option<Statistics>,
    compression: Option<CompressionInfo>,
    scylla_metadata: Option<ScyllaMetadata>,
}

impl JsonSstable {
    fn component(&self, component: Component) -> PathBuf {
        component_path(&self.dir, self.version, self.generation, component)
    }
}

#[async_trait]
impl Sstable for JsonSstable {
    fn path(&self) -> &Path {
        &self.path
    }

    fn version(&self) -> SstableVersion {
        self.version
    }

    async fn fragment_reader(&self, schema: Arc<Schema>) -> Result<Box<dyn FragmentReader>> {
        let file = tokio::fs::File::open(&self.path)
            .await
            .map_err(|e| Error::io(&self.path, e))?;
        let parser = MutationStreamParser::spawn(schema, BufReader::new(file));
        Ok(Box::new(ParserReader {
            parser,
            peeked: None,
        }))
    }

    async fn read_index(&self) -> Result<Vec<IndexEntry>> {
        let path = self.component(Component::Index);
        load_component(&path)
            .await?
            .ok_or_else(|| Error::Codec(format!("missing index component {}", path.display())))
    }

    fn summary(&self) -> Option<&Summary> {
        self.summary.as_ref()
    }

    fn statistics(&self) -> Option<&Statistics> {
        self.statistics.as_ref()
    }

    fn compression_info(&self) -> Option<&CompressionInfo> {
        self.compression.as_ref()
    }

    fn scylla_metadata(&self) -> Option<&ScyllaMetadata> {
        self.scylla_metadata.as_ref()
    }

    async fn data_stream(&self) -> Result<DataStream> {
        let file = tokio::fs::File::open(&self.path)
            .await
            .map_err(|e| Error::io(&self.path, e))?;
        let chunks = stream::unfold(Some(file), |state| async move {
            let mut file = state?;
            let mut buf = vec![0u8; 8 * 1024];
            match file.read(&mut buf).await {
                Ok(0) => None,
                Ok(n) => {
                    buf.truncate(n);
                    Some((Ok(buf), Some(file)))
                }
                Err(e) => Some((Err(e), None)),
            }
        });
        Ok(Box::pin(chunks))
    }

    async fn validate_checksums(&self) -> Result<bool> {
        let digest_path = self.component(Component::Digest);
        let recorded = tokio::fs::read_to_string(&digest_path)
            .await
            .map_err(|e| Error::io(&digest_path, e))?;
        let recorded: u32 = recorded.trim().parse().map_err(|_| {
            Error::Codec(format!("malformed digest component {}", digest_path.display()))
        })?;
        let mut file = tokio::fs::File::open(&self.path)
            .await
            .map_err(|e| Error::io(&self.path, e))?;
        let mut hasher = crc32fast::Hasher::new();
        let mut buf = vec![0u8; 8 * 1024];
        loop {
            let n = file.read(&mut buf).await.map_err(|e| Error::io(&self.path, e))?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }
        Ok(hasher.finalize() == recorded)
    }
}

/// Adapts the streaming parser to the reader interface. The native skip
/// drains parsed fragments to the next partition boundary.
struct ParserReader {
    parser: MutationStreamParser,
    peeked: Option<Fragment>,
}

#[async_trait]
impl FragmentReader for ParserReader {
    async fn next(&mut self) -> Result<Option<Fragment>> {
        if let Some(fragment) = self.peeked.take() {
            return Ok(Some(fragment));
        }
        self.parser.next().await
    }

    async fn skip_to_next_partition(&mut self) -> Result<()> {
        while let Some(fragment) = self.parser.next().await? {
            if matches!(fragment, Fragment::PartitionStart(_)) {
                self.peeked = Some(fragment);
                break;
            }
        }
        Ok(())
    }
}

/// Counts and checksums bytes on the way to the data file.
struct CountingWriter<W> {
    inner: W,
    written: u64,
    hasher: crc32fast::Hasher,
}

impl<W: Write> CountingWriter<W> {
    fn new(inner: W) -> Self {
        CountingWriter {
            inner,
            written: 0,
            hasher: crc32fast::Hasher::new(),
        }
    }

    fn written(&self) -> u64 {
        self.written
    }
}

impl<W: Write> Write for CountingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.written += n as u64;
        self.hasher.update(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}

struct JsonSink {
    schema: Arc<Schema>,
    dir: PathBuf,
    version: SstableVersion,
    generation: i64,
    data_path: PathBuf,
    stream: PartitionStreamWriter<CountingWriter<std::fs::File>>,
    index: Vec<IndexEntry>,
    rows: i64,
    min_timestamp: Option<i64>,
    max_timestamp: Option<i64>,
    min_deletion_time: Option<i64>,
    max_deletion_time: Option<i64>,
}

impl JsonSink {
    fn observe_timestamp(&mut self, timestamp: i64) {
        self.min_timestamp = Some(self.min_timestamp.map_or(timestamp, |v| v.min(timestamp)));
        self.max_timestamp = Some(self.max_timestamp.map_or(timestamp, |v| v.max(timestamp)));
    }

    fn observe_deletion_time(&mut self, deletion_time: i64) {
        self.min_deletion_time =
            Some(self.min_deletion_time.map_or(deletion_time, |v| v.min(deletion_time)));
        self.max_deletion_time =
            Some(self.max_deletion_time.map_or(deletion_time, |v| v.max(deletion_time)));
    }

    fn observe_row(&mut self, cells: &Row) {
        for (_, cell) in cells.iter() {
            match cell {
                Cell::Atomic(c) => {
                    self.observe_timestamp(c.timestamp);
                    if let crate::fragment::CellState::Dead { deletion_time } = c.state {
                        self.observe_deletion_time(deletion_time);
                    }
                }
                Cell::Counter(c) => self.observe_timestamp(c.timestamp),
                Cell::Collection(c) => {
                    if let Some(t) = c.tombstone {
                        self.observe_timestamp(t.timestamp);
                        self.observe_deletion_time(t.deletion_time);
                    }
                    for (_, sub) in &c.cells {
                        self.observe_timestamp(sub.timestamp);
                    }
                }
            }
        }
    }

    fn serialization_header(&self) -> SerializationHeader {
        let describe = |defs: &[crate::schema::ColumnDef]| {
            defs.iter()
                .map(|def| ColumnDesc {
                    name: def.name.clone(),
                    type_name: def.ty.name(),
                })
                .collect::<Vec<_>>()
        };
        let pk_names: Vec<String> = self
            .schema
            .partition_key_columns()
            .iter()
            .map(|def| def.ty.name())
            .collect();
        SerializationHeader {
            min_timestamp_base: self.min_timestamp.unwrap_or(0).max(0) as u64,
            min_local_deletion_time_base: self.min_deletion_time.unwrap_or(0).max(0) as u64,
            min_ttl_base: 0,
            pk_type_name: if pk_names.len() == 1 {
                pk_names[0].clone()
            } else {
                format!("composite<{}>", pk_names.join(","))
            },
            clustering_key_types_names: self
                .schema
                .clustering_key_columns()
                .iter()
                .map(|def| def.ty.name())
                .collect(),
            static_columns: describe(self.schema.static_columns()),
            regular_columns: describe(self.schema.regular_columns()),
        }
    }

    fn statistics(&self) -> Statistics {
        Statistics {
            offsets: vec![
                (MetadataType::Validation, 0),
                (MetadataType::Compaction, 0),
                (MetadataType::Stats, 0),
                (MetadataType::Serialization, 0),
            ],
            validation: Some(ValidationMetadata {
                partitioner: "xxh3".into(),
                filter_chance: 0.01,
            }),
            compaction: Some(Default::default()),
            stats: Some(StatsMetadata {
                min_timestamp: self.min_timestamp.unwrap_or(0),
                max_timestamp: self.max_timestamp.unwrap_or(0),
                min_local_deletion_time: Some(self.min_deletion_time.unwrap_or(0)),
                max_local_deletion_time: self.max_deletion_time.unwrap_or(0),
                min_ttl: Some(0),
                max_ttl: Some(0),
                // Uncompressed; the conventional marker value.
                compression_ratio: -1.0,
                rows_count: Some(self.rows),
                columns_count: Some(self.rows),
                ..StatsMetadata::default()
            }),
            serialization_header: Some(self.serialization_header()),
        }
    }

    fn summary(&self) -> Summary {
        let entries: Vec<SummaryEntry> = self
            .index
            .iter()
            .enumerate()
            .map(|(i, entry)| SummaryEntry {
                raw_key: entry.raw_key.clone(),
                token: crate::key::PartitionKey::from_bytes(&entry.raw_key)
                    .map(|key| self.schema.token_of(&key))
                    .unwrap_or_default(),
                position: i as u64,
            })
            .collect();
        Summary {
            header: SummaryHeader {
                min_index_interval: MIN_INDEX_INTERVAL,
                size: entries.len() as u64,
                memory_size: entries.iter().map(|e| e.raw_key.len() as u64 + 16).sum(),
                sampling_level: MIN_INDEX_INTERVAL,
                size_at_full_sampling: entries.len() as u64,
            },
            positions: (0..entries.len() as u64).collect(),
            first_key: self.index.first().map(|e| e.raw_key.clone()).unwrap_or_default(),
            last_key: self.index.last().map(|e| e.raw_key.clone()).unwrap_or_default(),
            entries,
        }
    }

    fn component(&self, component: Component) -> PathBuf {
        component_path(&self.dir, self.version, self.generation, component)
    }

    async fn remove_outputs(data_path: PathBuf, side: Vec<PathBuf>) -> Result<()> {
        for path in std::iter::once(data_path).chain(side) {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(Error::io(&path, e)),
            }
        }
        Ok(())
    }
}

#[async_trait]
impl SstableSink for JsonSink {
    async fn put(&mut self, fragment: Fragment) -> Result<()> {
        match &fragment {
            Fragment::PartitionStart(ps) => {
                self.index.push(IndexEntry {
                    raw_key: ps.key.key.to_bytes(),
                    position: self.stream.json().out_mut().written(),
                });
                if let Some(tombstone) = ps.tombstone {
                    self.observe_timestamp(tombstone.timestamp);
                    self.observe_deletion_time(tombstone.deletion_time);
                }
            }
            Fragment::StaticRow(sr) => {
                self.rows += 1;
                self.observe_row(&sr.cells);
            }
            Fragment::ClusteringRow(cr) => {
                self.rows += 1;
                if let Some(marker) = &cr.marker {
                    self.observe_timestamp(marker.timestamp);
                }
                for tombstone in [cr.tombstone.regular, cr.tombstone.shadowable].into_iter().flatten() {
                    self.observe_timestamp(tombstone.timestamp);
                    self.observe_deletion_time(tombstone.deletion_time);
                }
                self.observe_row(&cr.cells);
            }
            Fragment::RangeTombstoneChange(rtc) => {
                if let Some(tombstone) = rtc.tombstone {
                    self.observe_timestamp(tombstone.timestamp);
                    self.observe_deletion_time(tombstone.deletion_time);
                }
            }
            Fragment::PartitionEnd => {}
        }
        let result = match &fragment {
            Fragment::PartitionStart(ps) => self.stream.partition_start(ps),
            Fragment::StaticRow(sr) => self.stream.static_row(sr),
            Fragment::ClusteringRow(cr) => self.stream.clustering_row(cr),
            Fragment::RangeTombstoneChange(rtc) => self.stream.range_tombstone_change(rtc),
            Fragment::PartitionEnd => self.stream.partition_end(),
        };
        result.map_err(|e| Error::io(&self.data_path, e))
    }

    async fn finish(mut self: Box<Self>) -> Result<()> {
        self.stream
            .end_sstable()
            .and_then(|_| self.stream.json().out_mut().flush())
            .map_err(|e| Error::io(&self.data_path, e))?;
        let summary = self.summary();
        let statistics = self.statistics();
        let scylla_metadata = ScyllaMetadata {
            sstable_origin: Some(ORIGIN.into()),
            ..ScyllaMetadata::default()
        };
        let this = *self;
        let counting = this.stream.into_json().into_inner();
        let digest = counting.hasher.finalize();
        drop(counting.inner);
        let component =
            |c| component_path(&this.dir, this.version, this.generation, c);
        let side = [
            (Component::Index, serde_json::to_vec(&this.index)),
            (Component::Summary, serde_json::to_vec(&summary)),
            (Component::Statistics, serde_json::to_vec(&statistics)),
            (Component::ScyllaMetadata, serde_json::to_vec(&scylla_metadata)),
        ];
        let mut written = Vec::new();
        for (kind, body) in side {
            let path = component(kind);
            let body = body.map_err(|e| Error::Codec(format!("cannot encode {path:?}: {e}")))?;
            if let Err(e) = tokio::fs::write(&path, body).await {
                let err = Error::io(&path, e);
                let _ = Self::remove_outputs(this.data_path.clone(), written).await;
                return Err(err);
            }
            written.push(path);
        }
        let digest_path = component(Component::Digest);
        if let Err(e) = tokio::fs::write(&digest_path, format!("{digest}\n")).await {
            let err = Error::io(&digest_path, e);
            let _ = Self::remove_outputs(this.data_path.clone(), written).await;
            return Err(err);
        }
        sst_log!(
            Level::Info,
            "wrote sstable {} ({} partition(s))",
            this.data_path.display(),
            this.index.len()
        );
        Ok(())
    }

    async fn cancel(self: Box<Self>) -> Result<()> {
        let data_path = self.data_path.clone();
        // Close the data file before unlinking it.
        drop(self.stream);
        Self::remove_outputs(data_path, Vec::new()).await
    }
}
