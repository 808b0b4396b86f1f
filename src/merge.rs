//! K-way ordered combiner: merges the fragment streams of several sstables
//! into one stream whose partitions are the ordered union of the inputs.

use std::cmp::Ordering;
use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;

use crate::codec::CounterReconciler;
use crate::error::{Error, Result};
use crate::fragment::{
    merge_tombstones, Cell, ClusteringRow, Fragment, PartitionStart, Position,
    RangeTombstoneChange, Row, RowMarker, RowTombstone, StaticRow, Tombstone,
};
use crate::key::DecoratedKey;
use crate::reader::{FragmentReader, PeekableFragments};
use crate::schema::Schema;

/// Reconcile two cells of the same column.
fn reconcile_cells(a: Cell, b: Cell, counters: &dyn CounterReconciler) -> Cell {
    match (a, b) {
        (Cell::Atomic(x), Cell::Atomic(y)) => Cell::Atomic(x.reconcile(y)),
        (Cell::Counter(x), Cell::Counter(y)) => Cell::Counter(counters.reconcile(x, y)),
        (Cell::Collection(x), Cell::Collection(y)) => Cell::Collection(x.reconcile(y)),
        // Mismatched kinds never come from a sane codec; fall back to the
        // representative timestamp.
        (x, y) => {
            if y.timestamp() > x.timestamp() {
                y
            } else {
                x
            }
        }
    }
}

fn merge_cell_rows(a: Row, b: Row, counters: &dyn CounterReconciler) -> Row {
    let mut out = Row::new();
    let mut a = a.into_iter().peekable();
    let mut b = b.into_iter().peekable();
    loop {
        match (a.peek(), b.peek()) {
            (Some((ia, _)), Some((ib, _))) => match ia.cmp(ib) {
                Ordering::Less => {
                    let (id, cell) = a.next().unwrap();
                    out.insert(id, cell);
                }
                Ordering::Greater => {
                    let (id, cell) = b.next().unwrap();
                    out.insert(id, cell);
                }
                Ordering::Equal => {
                    let (id, ca) = a.next().unwrap();
                    let (_, cb) = b.next().unwrap();
                    out.insert(id, reconcile_cells(ca, cb, counters));
                }
            },
            (Some(_), None) => {
                let (id, cell) = a.next().unwrap();
                out.insert(id, cell);
            }
            (None, Some(_)) => {
                let (id, cell) = b.next().unwrap();
                out.insert(id, cell);
            }
            (None, None) => break,
        }
    }
    out
}

fn merge_clustering_rows(
    a: ClusteringRow,
    b: ClusteringRow,
    counters: &dyn CounterReconciler,
) -> ClusteringRow {
    let marker = match (a.marker, b.marker) {
        (Some(x), Some(y)) => Some(RowMarker::merge(x, y)),
        (x, None) => x,
        (None, y) => y,
    };
    ClusteringRow {
        key: a.key,
        tombstone: RowTombstone::merge(a.tombstone, b.tombstone),
        marker,
        cells: merge_cell_rows(a.cells, b.cells, counters),
    }
}

/// Per-partition merge bookkeeping.
struct MergeState {
    /// Indices of the readers contributing to the current partition.
    participants: Vec<usize>,
    /// Each participant's active range tombstone, parallel to
    /// `participants`.
    active: Vec<Option<Tombstone>>,
    /// The tombstone last emitted on the combined stream.
    emitted: Option<Tombstone>,
}

/// A [`FragmentReader`] over the ordered union of several readers.
///
/// At a partition boundary the reader with the smallest `(token, key)` head
/// is selected; ties merge element-wise, reconciling equal clustering
/// positions with the store's last-write-wins rules and composing range
/// tombstone changes into the union of the inputs' active ranges. Exactly
/// one `partition_start` and one `partition_end` are emitted per logical
/// partition.
pub struct CombinedReader {
    schema: Arc<Schema>,
    counters: Arc<dyn CounterReconciler>,
    readers: Vec<PeekableFragments>,
    queue: VecDeque<Fragment>,
    partition: Option<MergeState>,
    done: bool,
}

impl CombinedReader {
    /// Combine `readers`, all over the same schema.
    pub fn new(
        schema: Arc<Schema>,
        counters: Arc<dyn CounterReconciler>,
        readers: Vec<Box<dyn FragmentReader>>,
    ) -> Self {
        CombinedReader {
            schema,
            counters,
            readers: readers.into_iter().map(PeekableFragments::new).collect(),
            queue: VecDeque::new(),
            partition: None,
            done: false,
        }
    }

    async fn refill(&mut self) -> Result<()> {
        while self.queue.is_empty() && !self.done {
            if self.partition.is_some() {
                self.advance_partition().await?;
            } else {
                self.open_partition().await?;
            }
        }
        Ok(())
    }

    async fn open_partition(&mut self) -> Result<()> {
        let mut best: Option<DecoratedKey> = None;
        let mut participants: Vec<usize> = Vec::new();
        for i in 0..self.readers.len() {
            match self.readers[i].peek().await? {
                Some(Fragment::PartitionStart(ps)) => match &best {
                    None => {
                        best = Some(ps.key.clone());
                        participants = vec![i];
                    }
                    Some(b) => match ps.key.tri_compare(b) {
                        Ordering::Less => {
                            best = Some(ps.key.clone());
                            participants = vec![i];
                        }
                        Ordering::Equal => participants.push(i),
                        Ordering::Greater => {}
                    },
                },
                Some(other) => {
                    return Err(Error::Codec(format!(
                        "combined stream: expected partition start, got {}",
                        other.kind()
                    )))
                }
                None => {}
            }
        }
        let Some(key) = best else {
            self.done = true;
            return Ok(());
        };
        let mut tombstone = None;
        for &i in &participants {
            match self.readers[i].next().await? {
                Some(Fragment::PartitionStart(ps)) => {
                    tombstone = merge_tombstones(tombstone, ps.tombstone);
                }
                _ => unreachable!("participant head changed under us"),
            }
        }
        self.queue
            .push_back(Fragment::PartitionStart(PartitionStart { key, tombstone }));
        let mut static_cells: Option<Row> = None;
        for &i in &participants {
            if matches!(self.readers[i].peek().await?, Some(Fragment::StaticRow(_))) {
                let Some(Fragment::StaticRow(sr)) = self.readers[i].next().await? else {
                    unreachable!("participant head changed under us")
                };
                static_cells = Some(match static_cells {
                    None => sr.cells,
                    Some(prev) => merge_cell_rows(prev, sr.cells, &*self.counters),
                });
            }
        }
        if let Some(cells) = static_cells {
            self.queue.push_back(Fragment::StaticRow(StaticRow { cells }));
        }
        self.partition = Some(MergeState {
            active: vec![None; participants.len()],
            participants,
            emitted: None,
        });
        Ok(())
    }

    async fn advance_partition(&mut self) -> Result<()> {
        let participants = self
            .partition
            .as_ref()
            .expect("advance_partition called between partitions")
            .participants
            .clone();
        // Find the smallest clustering position among the participants'
        // heads.
        let mut min_pos: Option<Position> = None;
        for &i in &participants {
            let pos = match self.readers[i].peek().await? {
                Some(Fragment::ClusteringRow(cr)) => cr.position(),
                Some(Fragment::RangeTombstoneChange(rtc)) => rtc.position.clone(),
                Some(Fragment::PartitionEnd) | None => continue,
                Some(other) => {
                    return Err(Error::Codec(format!(
                        "combined stream: unexpected {} inside partition",
                        other.kind()
                    )))
                }
            };
            min_pos = Some(match min_pos {
                None => pos,
                Some(best) => {
                    if Position::compare(&self.schema, &pos, &best) == Ordering::Less {
                        pos
                    } else {
                        best
                    }
                }
            });
        }
        let Some(min_pos) = min_pos else {
            // Every participant is at its partition end.
            for &i in &participants {
                if matches!(self.readers[i].peek().await?, Some(Fragment::PartitionEnd)) {
                    self.readers[i].next().await?;
                }
            }
            self.queue.push_back(Fragment::PartitionEnd);
            self.partition = None;
            return Ok(());
        };
        // Pull every participant fragment at that position.
        let mut merged_row: Option<ClusteringRow> = None;
        let mut rtc_seen = false;
        for (slot, &i) in participants.iter().enumerate() {
            loop {
                let pos = match self.readers[i].peek().await? {
                    Some(Fragment::ClusteringRow(cr)) => cr.position(),
                    Some(Fragment::RangeTombstoneChange(rtc)) => rtc.position.clone(),
                    _ => break,
                };
                if Position::compare(&self.schema, &pos, &min_pos) != Ordering::Equal {
                    break;
                }
                match self.readers[i].next().await? {
                    Some(Fragment::ClusteringRow(cr)) => {
                        merged_row = Some(match merged_row {
                            None => cr,
                            Some(prev) => merge_clustering_rows(prev, cr, &*self.counters),
                        });
                    }
                    Some(Fragment::RangeTombstoneChange(rtc)) => {
                        let state = self.partition.as_mut().unwrap();
                        state.active[slot] = rtc.tombstone;
                        rtc_seen = true;
                    }
                    _ => unreachable!("participant head changed under us"),
                }
            }
        }
        if let Some(row) = merged_row {
            self.queue.push_back(Fragment::ClusteringRow(row));
        }
        if rtc_seen {
            let state = self.partition.as_mut().unwrap();
            let effective = state
                .active
                .iter()
                .fold(None, |acc, t| merge_tombstones(acc, *t));
            if effective != state.emitted {
                state.emitted = effective;
                self.queue
                    .push_back(Fragment::RangeTombstoneChange(RangeTombstoneChange {
                        position: min_pos,
                        tombstone: effective,
                    }));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl FragmentReader for CombinedReader {
    async fn next(&mut self) -> Result<Option<Fragment>> {
        self.refill().await?;
        Ok(self.queue.pop_front())
    }

    async fn skip_to_next_partition(&mut self) -> Result<()> {
        self.queue.clear();
        if let Some(state) = self.partition.take() {
            for &i in &state.participants {
                self.readers[i].skip_to_next_partition().await?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::LastClockCounterReconciler;
    use crate::fragment::BoundWeight;
    use crate::key::ClusteringKey;
    use crate::test_support::{ck, partition_start, pk, row_with_value, test_schema, MemReader};

    async fn drain(mut rd: CombinedReader) -> Vec<Fragment> {
        let mut out = Vec::new();
        while let Some(f) = rd.next().await.unwrap() {
            out.push(f);
        }
        out
    }

    fn combined(schema: Arc<Schema>, inputs: Vec<Vec<Fragment>>) -> CombinedReader {
        CombinedReader::new(
            schema,
            Arc::new(LastClockCounterReconciler),
            inputs
                .into_iter()
                .map(|f| Box::new(MemReader::new(f)) as Box<dyn FragmentReader>)
                .collect(),
        )
    }

    #[tokio::test]
    async fn disjoint_readers_union_in_token_order() {
        let schema = Arc::new(test_schema());
        let mut keys: Vec<_> = [b"a".as_slice(), b"b", b"c", b"d"]
            .iter()
            .map(|s| schema.decorate(pk(s)))
            .collect();
        keys.sort_by(|a, b| a.tri_compare(b));
        // Interleave the sorted keys across two readers.
        let input = |indices: &[usize]| {
            indices
                .iter()
                .flat_map(|&i| {
                    vec![
                        partition_start(&schema, keys[i].key.clone()),
                        Fragment::PartitionEnd,
                    ]
                })
                .collect::<Vec<_>>()
        };
        let out = drain(combined(
            schema.clone(),
            vec![input(&[0, 3]), input(&[1, 2])],
        ))
        .await;
        let tokens: Vec<i64> = out
            .iter()
            .filter_map(|f| match f {
                Fragment::PartitionStart(ps) => Some(ps.key.token),
                _ => None,
            })
            .collect();
        let expected: Vec<i64> = keys.iter().map(|k| k.token).collect();
        assert_eq!(tokens, expected);
        assert_eq!(out.len(), 8);
    }

    #[tokio::test]
    async fn shared_partition_reconciles_by_timestamp() {
        let schema = Arc::new(test_schema());
        let a = vec![
            partition_start(&schema, pk(b"\x00")),
            row_with_value(ck(b"r"), 10, "old"),
            Fragment::PartitionEnd,
        ];
        let b = vec![
            partition_start(&schema, pk(b"\x00")),
            row_with_value(ck(b"r"), 20, "new"),
            Fragment::PartitionEnd,
        ];
        let out = drain(combined(schema, vec![a, b])).await;
        assert_eq!(out.len(), 3, "one merged partition expected: {out:?}");
        let Fragment::ClusteringRow(row) = &out[1] else {
            panic!("expected clustering row, got {:?}", out[1]);
        };
        let (_, cell) = row.cells.iter().next().unwrap();
        let Cell::Atomic(cell) = cell else { panic!() };
        assert_eq!(cell.timestamp, 20);
        assert_eq!(
            cell.state,
            crate::fragment::CellState::Live {
                value: b"new".to_vec(),
                expiration: None
            }
        );
    }

    #[tokio::test]
    async fn range_tombstones_compose_into_a_union() {
        let schema = Arc::new(test_schema());
        let t1 = Tombstone {
            timestamp: 100,
            deletion_time: 1000,
        };
        let t2 = Tombstone {
            timestamp: 200,
            deletion_time: 1000,
        };
        let rtc = |key: &[u8], weight, tombstone| {
            Fragment::RangeTombstoneChange(RangeTombstoneChange {
                position: Position::bound(ck(key), weight),
                tombstone,
            })
        };
        // Reader A deletes [a, c), reader B deletes [b, d) with a higher
        // timestamp.
        let a = vec![
            partition_start(&schema, pk(b"\x00")),
            rtc(b"a", BoundWeight::BeforeAll, Some(t1)),
            rtc(b"c", BoundWeight::BeforeAll, None),
            Fragment::PartitionEnd,
        ];
        let b = vec![
            partition_start(&schema, pk(b"\x00")),
            rtc(b"b", BoundWeight::BeforeAll, Some(t2)),
            rtc(b"d", BoundWeight::BeforeAll, None),
            Fragment::PartitionEnd,
        ];
        let out = drain(combined(schema, vec![a, b])).await;
        let changes: Vec<(Vec<u8>, Option<Tombstone>)> = out
            .iter()
            .filter_map(|f| match f {
                Fragment::RangeTombstoneChange(rtc) => Some((
                    rtc.position.key.components()[0].clone(),
                    rtc.tombstone,
                )),
                _ => None,
            })
            .collect();
        assert_eq!(
            changes,
            vec![
                (b"a".to_vec(), Some(t1)),
                (b"b".to_vec(), Some(t2)),
                (b"d".to_vec(), None),
            ]
        );
        assert!(matches!(out.last(), Some(Fragment::PartitionEnd)));
    }

    #[tokio::test]
    async fn static_rows_merge_cell_wise() {
        let schema = Arc::new(test_schema());
        let static_row = |ts, value: &str| {
            let mut cells = Row::new();
            cells.insert(
                0,
                Cell::Atomic(crate::fragment::AtomicCell::live(ts, value.as_bytes().to_vec())),
            );
            Fragment::StaticRow(StaticRow { cells })
        };
        let a = vec![
            partition_start(&schema, pk(b"\x00")),
            static_row(1, "stale"),
            Fragment::PartitionEnd,
        ];
        let b = vec![
            partition_start(&schema, pk(b"\x00")),
            static_row(2, "fresh"),
            Fragment::PartitionEnd,
        ];
        let out = drain(combined(schema, vec![a, b])).await;
        let Fragment::StaticRow(sr) = &out[1] else {
            panic!("expected static row, got {:?}", out[1]);
        };
        let (_, Cell::Atomic(cell)) = sr.cells.iter().next().unwrap() else {
            panic!()
        };
        assert_eq!(cell.timestamp, 2);
    }

    #[tokio::test]
    async fn empty_clustering_bounds_merge() {
        let schema = Arc::new(test_schema());
        let t = Tombstone {
            timestamp: 7,
            deletion_time: 70,
        };
        let whole = vec![
            partition_start(&schema, pk(b"\x00")),
            Fragment::RangeTombstoneChange(RangeTombstoneChange {
                position: Position::bound(ClusteringKey::empty(), BoundWeight::BeforeAll),
                tombstone: Some(t),
            }),
            Fragment::RangeTombstoneChange(RangeTombstoneChange {
                position: Position::bound(ClusteringKey::empty(), BoundWeight::AfterAll),
                tombstone: None,
            }),
            Fragment::PartitionEnd,
        ];
        let row_only = vec![
            partition_start(&schema, pk(b"\x00")),
            row_with_value(ck(b"r"), 1, "x"),
            Fragment::PartitionEnd,
        ];
        let out = drain(combined(schema, vec![whole, row_only])).await;
        let kinds: Vec<_> = out.iter().map(|f| f.kind().to_string()).collect();
        assert_eq!(
            kinds,
            vec![
                "partition_start",
                "range_tombstone_change",
                "clustering_row",
                "range_tombstone_change",
                "partition_end"
            ]
        );
    }
}
