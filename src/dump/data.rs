//! The dumping consumer: renders the fragment stream as text lines or as
//! the structured JSON document.

use std::fmt::Write as _;
use std::io::{self, Write};
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;

use super::json::JsonWriter;
use super::output_error;
use crate::consumer::{Decision, SstableConsumer};
use crate::error::Result;
use crate::fragment::{
    AtomicCell, Cell, CellState, ClusteringRow, CollectionCell, CounterCell, PartitionStart,
    Position, RangeTombstoneChange, Row, RowMarker, StaticRow, Tombstone,
};
use crate::key::{bytes_to_hex, ClusteringKey, DecoratedKey};
use crate::schema::{ColumnKind, ColumnType, Schema};
use crate::timefmt::{format_epoch_seconds, format_ttl};

/// The dump-data output sub-mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// One diagnostic line per event; not round-trippable.
    Text,
    /// The structured document of the dump format.
    Json,
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, String> {
        match s {
            "text" => Ok(OutputFormat::Text),
            "json" => Ok(OutputFormat::Json),
            _ => Err(format!("invalid value for dump option output-format: {s}")),
        }
    }
}

fn write_tombstone<W: Write>(w: &mut JsonWriter<W>, tombstone: Option<&Tombstone>) -> io::Result<()> {
    w.start_object()?;
    if let Some(t) = tombstone {
        w.key("timestamp")?;
        w.int64(t.timestamp)?;
        w.key("deletion_time")?;
        w.string(&format_epoch_seconds(t.deletion_time))?;
    }
    w.end_object()
}

fn write_marker<W: Write>(w: &mut JsonWriter<W>, marker: &RowMarker) -> io::Result<()> {
    w.start_object()?;
    w.key("timestamp")?;
    w.int64(marker.timestamp)?;
    if let Some(expiration) = &marker.expiration {
        w.key("ttl")?;
        w.string(&format_ttl(expiration.ttl))?;
        w.key("expiry")?;
        w.string(&format_epoch_seconds(expiration.expiry))?;
    }
    w.end_object()
}

fn write_atomic_cell<W: Write>(
    w: &mut JsonWriter<W>,
    cell: &AtomicCell,
    ty: &ColumnType,
) -> io::Result<()> {
    w.start_object()?;
    w.key("is_live")?;
    w.bool(cell.is_live())?;
    w.key("timestamp")?;
    w.int64(cell.timestamp)?;
    match &cell.state {
        CellState::Live { value, expiration } => {
            if let Some(expiration) = expiration {
                w.key("ttl")?;
                w.string(&format_ttl(expiration.ttl))?;
                w.key("expiry")?;
                w.string(&format_epoch_seconds(expiration.expiry))?;
            }
            w.key("value")?;
            let rendered = ty
                .render(value)
                .map_err(|e| io::Error::other(format!("cannot render cell value: {e}")))?;
            w.string(&rendered)?;
        }
        CellState::Dead { deletion_time } => {
            w.key("deletion_time")?;
            w.string(&format_epoch_seconds(*deletion_time))?;
        }
    }
    w.end_object()
}

fn write_counter_cell<W: Write>(w: &mut JsonWriter<W>, cell: &CounterCell) -> io::Result<()> {
    w.start_object()?;
    w.key("is_live")?;
    w.bool(true)?;
    w.key("timestamp")?;
    w.int64(cell.timestamp)?;
    w.key("shards")?;
    w.start_array()?;
    for shard in &cell.shards {
        w.start_object()?;
        w.key("id")?;
        w.string(&shard.id.to_string())?;
        w.key("value")?;
        w.int64(shard.value)?;
        w.key("clock")?;
        w.int64(shard.clock)?;
        w.end_object()?;
    }
    w.end_array()?;
    w.end_object()
}

fn write_collection_cell<W: Write>(
    w: &mut JsonWriter<W>,
    cell: &CollectionCell,
    ty: &ColumnType,
) -> io::Result<()> {
    w.start_object()?;
    if let Some(tombstone) = &cell.tombstone {
        w.key("tombstone")?;
        write_tombstone(w, Some(tombstone))?;
    }
    w.key("cells")?;
    w.start_object()?;
    let value_ty = ty.element_value_type().cloned().unwrap_or(ColumnType::Blob);
    for (i, (key, sub)) in cell.cells.iter().enumerate() {
        match ty {
            ColumnType::Tuple(elems) => {
                w.key(&i.to_string())?;
                let sub_ty = elems.get(i).cloned().unwrap_or(ColumnType::Blob);
                write_atomic_cell(w, sub, &sub_ty)?;
                continue;
            }
            _ => {
                let rendered = ty
                    .element_key_type()
                    .and_then(|kt| kt.render(key).ok())
                    .unwrap_or_else(|| format!("0x{}", bytes_to_hex(key)));
                w.key(&rendered)?;
            }
        }
        write_atomic_cell(w, sub, &value_ty)?;
    }
    w.end_object()?;
    w.end_object()
}

fn write_cell<W: Write>(
    w: &mut JsonWriter<W>,
    schema: &Schema,
    kind: ColumnKind,
    id: u32,
    cell: &Cell,
) -> io::Result<()> {
    let def = schema
        .column(kind, id)
        .ok_or_else(|| io::Error::other(format!("unknown {kind} column id {id}")))?;
    match cell {
        Cell::Atomic(c) => write_atomic_cell(w, c, &def.ty),
        Cell::Counter(c) => write_counter_cell(w, c),
        Cell::Collection(c) => write_collection_cell(w, c, &def.ty),
    }
}

fn write_row<W: Write>(
    w: &mut JsonWriter<W>,
    schema: &Schema,
    kind: ColumnKind,
    row: &Row,
) -> io::Result<()> {
    w.start_object()?;
    for (id, cell) in row.iter() {
        let def = schema
            .column(kind, id)
            .ok_or_else(|| io::Error::other(format!("unknown {kind} column id {id}")))?;
        w.key(&def.name)?;
        write_cell(w, schema, kind, id, cell)?;
    }
    w.end_object()
}

fn write_partition_key<W: Write>(
    w: &mut JsonWriter<W>,
    schema: &Schema,
    key: &DecoratedKey,
) -> io::Result<()> {
    w.start_object()?;
    w.key("token")?;
    w.string(&key.token.to_string())?;
    w.key("raw")?;
    w.string(&bytes_to_hex(&key.key.to_bytes()))?;
    w.key("value")?;
    w.string(&schema.render_partition_key(&key.key))?;
    w.end_object()
}

fn write_clustering_key<W: Write>(
    w: &mut JsonWriter<W>,
    schema: &Schema,
    key: &ClusteringKey,
) -> io::Result<()> {
    w.start_object()?;
    w.key("raw")?;
    w.string(&bytes_to_hex(&key.to_bytes()))?;
    w.key("value")?;
    w.string(&schema.render_clustering_key(key))?;
    w.end_object()
}

/// Writes one sstable's fragment sequence as the dump format's partition
/// array. Shared between the dumping consumer and the codec's writer.
pub struct PartitionStreamWriter<W: Write> {
    schema: Arc<Schema>,
    writer: JsonWriter<W>,
    clustering_array_open: bool,
}

impl<W: Write> PartitionStreamWriter<W> {
    /// Wrap a JSON writer positioned where the partition array belongs.
    pub fn new(schema: Arc<Schema>, writer: JsonWriter<W>) -> Self {
        PartitionStreamWriter {
            schema,
            writer,
            clustering_array_open: false,
        }
    }

    /// Direct access to the underlying JSON writer (for enclosing structure).
    pub fn json(&mut self) -> &mut JsonWriter<W> {
        &mut self.writer
    }

    /// Unwrap the JSON writer.
    pub fn into_json(self) -> JsonWriter<W> {
        self.writer
    }

    /// Open the partition array.
    pub fn begin_sstable(&mut self) -> io::Result<()> {
        self.writer.start_array()
    }

    /// Close the partition array.
    pub fn end_sstable(&mut self) -> io::Result<()> {
        self.writer.end_array()
    }

    /// Open a partition object.
    pub fn partition_start(&mut self, ps: &PartitionStart) -> io::Result<()> {
        self.clustering_array_open = false;
        self.writer.start_object()?;
        self.writer.key("key")?;
        write_partition_key(&mut self.writer, &self.schema, &ps.key)?;
        if let Some(tombstone) = &ps.tombstone {
            self.writer.key("tombstone")?;
            write_tombstone(&mut self.writer, Some(tombstone))?;
        }
        Ok(())
    }

    /// Emit the static row.
    pub fn static_row(&mut self, sr: &StaticRow) -> io::Result<()> {
        self.writer.key("static_row")?;
        write_row(&mut self.writer, &self.schema, ColumnKind::Static, &sr.cells)
    }

    fn ensure_clustering_array(&mut self) -> io::Result<()> {
        if !self.clustering_array_open {
            self.writer.key("clustering_elements")?;
            self.writer.start_array()?;
            self.clustering_array_open = true;
        }
        Ok(())
    }

    /// Emit a clustering row element.
    pub fn clustering_row(&mut self, cr: &ClusteringRow) -> io::Result<()> {
        self.ensure_clustering_array()?;
        let w = &mut self.writer;
        w.start_object()?;
        w.key("type")?;
        w.string("clustering-row")?;
        w.key("key")?;
        write_clustering_key(w, &self.schema, &cr.key)?;
        if !cr.tombstone.is_none() {
            w.key("tombstone")?;
            write_tombstone(w, cr.tombstone.regular.as_ref())?;
            w.key("shadowable_tombstone")?;
            write_tombstone(w, cr.tombstone.shadowable.as_ref())?;
        }
        if let Some(marker) = &cr.marker {
            w.key("marker")?;
            write_marker(w, marker)?;
        }
        w.key("columns")?;
        write_row(w, &self.schema, ColumnKind::Regular, &cr.cells)?;
        w.end_object()
    }

    /// Emit a range-tombstone-change element.
    pub fn range_tombstone_change(&mut self, rtc: &RangeTombstoneChange) -> io::Result<()> {
        self.ensure_clustering_array()?;
        let w = &mut self.writer;
        w.start_object()?;
        w.key("type")?;
        w.string("range-tombstone-change")?;
        if !rtc.position.key.is_empty() {
            w.key("key")?;
            write_clustering_key(w, &self.schema, &rtc.position.key)?;
        }
        w.key("weight")?;
        w.int64(rtc.position.weight.as_i8() as i64)?;
        w.key("tombstone")?;
        write_tombstone(w, rtc.tombstone.as_ref())?;
        w.end_object()
    }

    /// Close the partition object.
    pub fn partition_end(&mut self) -> io::Result<()> {
        if self.clustering_array_open {
            self.writer.end_array()?;
            self.clustering_array_open = false;
        }
        self.writer.end_object()
    }
}

struct JsonDumper<W: Write> {
    stream: PartitionStreamWriter<W>,
}

impl<W: Write> JsonDumper<W> {
    fn new(schema: Arc<Schema>, out: W) -> Self {
        JsonDumper {
            stream: PartitionStreamWriter::new(schema, JsonWriter::new(out)),
        }
    }
}

struct TextDumper<W: Write> {
    schema: Arc<Schema>,
    out: W,
}

impl<W: Write> TextDumper<W> {
    fn render_tombstone(t: &Tombstone) -> String {
        format!(
            "{{timestamp={}, deletion_time={}}}",
            t.timestamp,
            format_epoch_seconds(t.deletion_time)
        )
    }

    fn render_cell(&self, kind: ColumnKind, id: u32, cell: &Cell) -> String {
        let ty = self.schema.column(kind, id).map(|d| d.ty.clone());
        match cell {
            Cell::Atomic(c) => match &c.state {
                CellState::Live { value, expiration } => {
                    let rendered = ty
                        .as_ref()
                        .and_then(|t| t.render(value).ok())
                        .unwrap_or_else(|| format!("0x{}", bytes_to_hex(value)));
                    let mut s = format!("live ts={} v={}", c.timestamp, rendered);
                    if let Some(e) = expiration {
                        let _ = write!(s, " ttl={} expiry={}", format_ttl(e.ttl), format_epoch_seconds(e.expiry));
                    }
                    s
                }
                CellState::Dead { deletion_time } => format!(
                    "dead ts={} deletion_time={}",
                    c.timestamp,
                    format_epoch_seconds(*deletion_time)
                ),
            },
            Cell::Counter(c) => {
                let shards: Vec<String> = c
                    .shards
                    .iter()
                    .map(|s| format!("{}:{}@{}", s.id, s.value, s.clock))
                    .collect();
                format!("counter ts={} shards=[{}]", c.timestamp, shards.join(", "))
            }
            Cell::Collection(c) => {
                let mut s = String::from("collection ");
                if let Some(t) = &c.tombstone {
                    let _ = write!(s, "tombstone={} ", Self::render_tombstone(t));
                }
                let cells: Vec<String> = c
                    .cells
                    .iter()
                    .map(|(k, v)| {
                        format!(
                            "0x{}: {}",
                            bytes_to_hex(k),
                            match &v.state {
                                CellState::Live { .. } => format!("live ts={}", v.timestamp),
                                CellState::Dead { .. } => format!("dead ts={}", v.timestamp),
                            }
                        )
                    })
                    .collect();
                let _ = write!(s, "{{{}}}", cells.join(", "));
                s
            }
        }
    }

    fn render_row(&self, kind: ColumnKind, row: &Row) -> String {
        let cols: Vec<String> = row
            .iter()
            .map(|(id, cell)| {
                let name = self
                    .schema
                    .column(kind, id)
                    .map(|d| d.name.clone())
                    .unwrap_or_else(|| format!("#{id}"));
                format!("{}={}", name, self.render_cell(kind, id, cell))
            })
            .collect();
        cols.join(", ")
    }

    fn render_position(&self, pos: &Position) -> String {
        format!(
            "{{weight={}, ck{{{}}} ({})}}",
            pos.weight.as_i8(),
            bytes_to_hex(&pos.key.to_bytes()),
            self.schema.render_clustering_key(&pos.key)
        )
    }
}

/// The `dump-data` consumer: emits the stream as text lines or as the
/// structured document, preserving event order.
pub struct DumpingConsumer<W: Write + Send> {
    inner: Dumper<W>,
}

enum Dumper<W: Write + Send> {
    Text(TextDumper<W>),
    Json(JsonDumper<W>),
}

impl<W: Write + Send> DumpingConsumer<W> {
    /// Dump in the chosen format into `out`.
    pub fn new(schema: Arc<Schema>, format: OutputFormat, out: W) -> Self {
        let inner = match format {
            OutputFormat::Text => Dumper::Text(TextDumper { schema, out }),
            OutputFormat::Json => Dumper::Json(JsonDumper::new(schema, out)),
        };
        DumpingConsumer { inner }
    }
}

#[async_trait]
impl<W: Write + Send> SstableConsumer for DumpingConsumer<W> {
    async fn on_start_of_stream(&mut self) -> Result<()> {
        match &mut self.inner {
            Dumper::Text(t) => writeln!(t.out, "{{stream_start}}").map_err(output_error),
            Dumper::Json(j) => j.stream.json().start_stream().map_err(output_error),
        }
    }

    async fn on_new_sstable(&mut self, sst: Option<&Path>) -> Result<Decision> {
        match &mut self.inner {
            Dumper::Text(t) => {
                match sst {
                    Some(path) => writeln!(t.out, "{{sstable_start: filename {}}}", path.display()),
                    None => writeln!(t.out, "{{sstable_start}}"),
                }
                .map_err(output_error)?;
            }
            Dumper::Json(j) => {
                j.stream.json().sstable_key(sst).map_err(output_error)?;
                j.stream.begin_sstable().map_err(output_error)?;
            }
        }
        Ok(Decision::Continue)
    }

    async fn consume_partition_start(&mut self, ps: PartitionStart) -> Result<Decision> {
        match &mut self.inner {
            Dumper::Text(t) => {
                let mut line = format!(
                    "{{partition_start: pk{{{}}} ({}), token: {}",
                    bytes_to_hex(&ps.key.key.to_bytes()),
                    t.schema.render_partition_key(&ps.key.key),
                    ps.key.token
                );
                if let Some(tomb) = &ps.tombstone {
                    let _ = write!(line, ", tombstone: {}", TextDumper::<W>::render_tombstone(tomb));
                }
                writeln!(t.out, "{line}}}").map_err(output_error)?;
            }
            Dumper::Json(j) => j.stream.partition_start(&ps).map_err(output_error)?,
        }
        Ok(Decision::Continue)
    }

    async fn consume_static_row(&mut self, sr: StaticRow) -> Result<Decision> {
        match &mut self.inner {
            Dumper::Text(t) => {
                let cols = t.render_row(ColumnKind::Static, &sr.cells);
                writeln!(t.out, "{{static_row: {cols}}}").map_err(output_error)?;
            }
            Dumper::Json(j) => j.stream.static_row(&sr).map_err(output_error)?,
        }
        Ok(Decision::Continue)
    }

    async fn consume_clustering_row(&mut self, cr: ClusteringRow) -> Result<Decision> {
        match &mut self.inner {
            Dumper::Text(t) => {
                let mut line = format!(
                    "{{clustering_row: ck{{{}}} ({})",
                    bytes_to_hex(&cr.key.to_bytes()),
                    t.schema.render_clustering_key(&cr.key)
                );
                if let Some(tomb) = &cr.tombstone.regular {
                    let _ = write!(line, ", tombstone: {}", TextDumper::<W>::render_tombstone(tomb));
                }
                if let Some(tomb) = &cr.tombstone.shadowable {
                    let _ = write!(
                        line,
                        ", shadowable_tombstone: {}",
                        TextDumper::<W>::render_tombstone(tomb)
                    );
                }
                if let Some(marker) = &cr.marker {
                    let _ = write!(line, ", marker: ts={}", marker.timestamp);
                }
                let cols = t.render_row(ColumnKind::Regular, &cr.cells);
                let _ = write!(line, ", columns: {{{cols}}}");
                writeln!(t.out, "{line}}}").map_err(output_error)?;
            }
            Dumper::Json(j) => j.stream.clustering_row(&cr).map_err(output_error)?,
        }
        Ok(Decision::Continue)
    }

    async fn consume_range_tombstone_change(
        &mut self,
        rtc: RangeTombstoneChange,
    ) -> Result<Decision> {
        match &mut self.inner {
            Dumper::Text(t) => {
                let tomb = rtc
                    .tombstone
                    .as_ref()
                    .map(TextDumper::<W>::render_tombstone)
                    .unwrap_or_else(|| "{}".into());
                let pos = t.render_position(&rtc.position);
                writeln!(t.out, "{{range_tombstone_change: pos={pos}, tombstone: {tomb}}}")
                    .map_err(output_error)?;
            }
            Dumper::Json(j) => j.stream.range_tombstone_change(&rtc).map_err(output_error)?,
        }
        Ok(Decision::Continue)
    }

    async fn consume_partition_end(&mut self) -> Result<Decision> {
        match &mut self.inner {
            Dumper::Text(t) => writeln!(t.out, "{{partition_end}}").map_err(output_error)?,
            Dumper::Json(j) => j.stream.partition_end().map_err(output_error)?,
        }
        Ok(Decision::Continue)
    }

    async fn on_end_of_sstable(&mut self) -> Result<Decision> {
        match &mut self.inner {
            Dumper::Text(t) => writeln!(t.out, "{{sstable_end}}").map_err(output_error)?,
            Dumper::Json(j) => j.stream.end_sstable().map_err(output_error)?,
        }
        Ok(Decision::Continue)
    }

    async fn on_end_of_stream(&mut self) -> Result<()> {
        match &mut self.inner {
            Dumper::Text(t) => {
                writeln!(t.out, "{{stream_end}}").map_err(output_error)?;
                t.out.flush().map_err(output_error)
            }
            Dumper::Json(j) => {
                j.stream.json().end_stream().map_err(output_error)?;
                writeln!(j.stream.json_out()).map_err(output_error)?;
                j.stream.json_out().flush().map_err(output_error)
            }
        }
    }
}

impl<W: Write> PartitionStreamWriter<W> {
    fn json_out(&mut self) -> &mut W {
        self.writer.out_mut()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consumer::deliver;
    use crate::fragment::Fragment;
    use crate::test_support::{ck, pk, row_with_value, test_schema};

    async fn dump_json(fragments: Vec<Fragment>) -> String {
        let schema = Arc::new(test_schema());
        let mut out = Vec::new();
        {
            let mut consumer =
                DumpingConsumer::new(schema.clone(), OutputFormat::Json, &mut out);
            consumer.on_start_of_stream().await.unwrap();
            consumer
                .on_new_sstable(Some(Path::new("/t/me-1-big-Data.json")))
                .await
                .unwrap();
            for f in fragments {
                deliver(&mut consumer, f).await.unwrap();
            }
            consumer.on_end_of_sstable().await.unwrap();
            consumer.on_end_of_stream().await.unwrap();
        }
        String::from_utf8(out).unwrap()
    }

    #[tokio::test]
    async fn empty_sstable_dumps_an_empty_array() {
        let out = dump_json(vec![]).await;
        assert_eq!(
            out,
            "{\"sstables\":{\"/t/me-1-big-Data.json\":[]}}\n"
        );
    }

    #[tokio::test]
    async fn single_live_row_matches_the_documented_schema() {
        let schema = test_schema();
        let key = schema.decorate(pk(&[0xab]));
        let token = key.token;
        let out = dump_json(vec![
            Fragment::PartitionStart(PartitionStart {
                key,
                tombstone: None,
            }),
            row_with_value(ck(&[0xcd]), 42, "hello"),
            Fragment::PartitionEnd,
        ])
        .await;
        let expected = format!(
            concat!(
                "{{\"sstables\":{{\"/t/me-1-big-Data.json\":[",
                "{{\"key\":{{\"token\":\"{token}\",\"raw\":\"0001ab\",\"value\":\"0xab\"}},",
                "\"clustering_elements\":[",
                "{{\"type\":\"clustering-row\",\"key\":{{\"raw\":\"0001cd\",\"value\":\"0xcd\"}},",
                "\"columns\":{{\"v\":{{\"is_live\":true,\"timestamp\":42,\"value\":\"hello\"}}}}}}",
                "]}}]}}}}\n"
            ),
            token = token
        );
        assert_eq!(out, expected);
    }

    #[tokio::test]
    async fn text_mode_emits_one_line_per_event() {
        let schema = Arc::new(test_schema());
        let mut out = Vec::new();
        {
            let mut consumer = DumpingConsumer::new(schema.clone(), OutputFormat::Text, &mut out);
            consumer.on_start_of_stream().await.unwrap();
            consumer.on_new_sstable(None).await.unwrap();
            deliver(
                &mut consumer,
                Fragment::PartitionStart(PartitionStart {
                    key: schema.decorate(pk(b"p")),
                    tombstone: None,
                }),
            )
            .await
            .unwrap();
            deliver(&mut consumer, row_with_value(ck(b"c"), 1, "x"))
                .await
                .unwrap();
            deliver(&mut consumer, Fragment::PartitionEnd).await.unwrap();
            consumer.on_end_of_sstable().await.unwrap();
            consumer.on_end_of_stream().await.unwrap();
        }
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 7);
        assert_eq!(lines[0], "{stream_start}");
        assert_eq!(lines[1], "{sstable_start}");
        assert!(lines[2].starts_with("{partition_start:"));
        assert!(lines[3].starts_with("{clustering_row:"));
        assert_eq!(lines[4], "{partition_end}");
        assert_eq!(lines[5], "{sstable_end}");
        assert_eq!(lines[6], "{stream_end}");
    }
}
