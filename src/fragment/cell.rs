//! Cells and rows.

use std::cmp::Ordering;

use uuid::Uuid;

use super::tombstone::{merge_tombstones, Expiration, Tombstone};

/// Liveness state of an atomic cell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CellState {
    /// A live cell carrying a value, possibly expiring.
    Live {
        /// Raw value bytes; the column type renders them.
        value: Vec<u8>,
        /// Present when the cell expires.
        expiration: Option<Expiration>,
    },
    /// A dead cell.
    Dead {
        /// Deletion wall-clock time, seconds since the epoch.
        deletion_time: i64,
    },
}

/// A single-value cell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AtomicCell {
    /// Write timestamp, microseconds since the epoch.
    pub timestamp: i64,
    /// Live or dead payload.
    pub state: CellState,
}

impl AtomicCell {
    /// A live cell without expiry.
    pub fn live(timestamp: i64, value: Vec<u8>) -> Self {
        AtomicCell {
            timestamp,
            state: CellState::Live {
                value,
                expiration: None,
            },
        }
    }

    /// A live, expiring cell.
    pub fn live_expiring(timestamp: i64, value: Vec<u8>, expiration: Expiration) -> Self {
        AtomicCell {
            timestamp,
            state: CellState::Live {
                value,
                expiration: Some(expiration),
            },
        }
    }

    /// A dead cell.
    pub fn dead(timestamp: i64, deletion_time: i64) -> Self {
        AtomicCell {
            timestamp,
            state: CellState::Dead { deletion_time },
        }
    }

    /// Whether the cell is live.
    pub fn is_live(&self) -> bool {
        matches!(self.state, CellState::Live { .. })
    }

    /// Last-write-wins reconciliation: the higher timestamp wins; on a tie a
    /// dead cell beats a live one, then greater value bytes win.
    pub fn reconcile(self, other: AtomicCell) -> AtomicCell {
        match self.timestamp.cmp(&other.timestamp) {
            Ordering::Less => return other,
            Ordering::Greater => return self,
            Ordering::Equal => {}
        }
        match (&self.state, &other.state) {
            (CellState::Dead { deletion_time: a }, CellState::Dead { deletion_time: b }) => {
                if b > a {
                    other
                } else {
                    self
                }
            }
            (CellState::Dead { .. }, CellState::Live { .. }) => self,
            (CellState::Live { .. }, CellState::Dead { .. }) => other,
            (CellState::Live { value: a, .. }, CellState::Live { value: b, .. }) => {
                if b > a {
                    other
                } else {
                    self
                }
            }
        }
    }
}

/// One shard of a distributed counter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CounterShard {
    /// Identifier of the shard's owner.
    pub id: Uuid,
    /// Accumulated value.
    pub value: i64,
    /// Logical clock of the shard.
    pub clock: i64,
}

/// A counter cell: live, with an ordered set of shards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CounterCell {
    /// Write timestamp, microseconds since the epoch.
    pub timestamp: i64,
    /// Shards, ordered by id.
    pub shards: Vec<CounterShard>,
}

/// A multi-cell value: an optional collection tombstone plus sub-cells keyed
/// by their element key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CollectionCell {
    /// Covers every sub-cell older than it.
    pub tombstone: Option<Tombstone>,
    /// Sub-cells in element-key order.
    pub cells: Vec<(Vec<u8>, AtomicCell)>,
}

impl CollectionCell {
    /// Merge two collections: tombstones reconcile by max, sub-cells merge
    /// key-wise with atomic reconciliation.
    pub fn reconcile(self, other: CollectionCell) -> CollectionCell {
        let tombstone = merge_tombstones(self.tombstone, other.tombstone);
        let mut cells: Vec<(Vec<u8>, AtomicCell)> = Vec::with_capacity(self.cells.len());
        let mut a = self.cells.into_iter().peekable();
        let mut b = other.cells.into_iter().peekable();
        loop {
            match (a.peek(), b.peek()) {
                (Some((ka, _)), Some((kb, _))) => match ka.cmp(kb) {
                    Ordering::Less => cells.push(a.next().unwrap()),
                    Ordering::Greater => cells.push(b.next().unwrap()),
                    Ordering::Equal => {
                        let (k, ca) = a.next().unwrap();
                        let (_, cb) = b.next().unwrap();
                        cells.push((k, ca.reconcile(cb)));
                    }
                },
                (Some(_), None) => cells.push(a.next().unwrap()),
                (None, Some(_)) => cells.push(b.next().unwrap()),
                (None, None) => break,
            }
        }
        CollectionCell { tombstone, cells }
    }
}

/// Any cell a row can hold.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Cell {
    /// A single-value cell.
    Atomic(AtomicCell),
    /// A counter cell.
    Counter(CounterCell),
    /// A multi-cell collection or tuple.
    Collection(CollectionCell),
}

impl Cell {
    /// A representative write timestamp, used when reconciling mismatched
    /// cell kinds.
    pub fn timestamp(&self) -> i64 {
        match self {
            Cell::Atomic(c) => c.timestamp,
            Cell::Counter(c) => c.timestamp,
            Cell::Collection(c) => c
                .cells
                .iter()
                .map(|(_, c)| c.timestamp)
                .chain(c.tombstone.map(|t| t.timestamp))
                .max()
                .unwrap_or(i64::MIN),
        }
    }
}

/// A mapping from column id to cell, kept in id order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Row {
    cells: Vec<(u32, Cell)>,
}

impl Row {
    /// An empty row.
    pub fn new() -> Self {
        Row::default()
    }

    /// True when the row holds no cells.
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Number of cells.
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    /// Set the cell of a column, replacing any previous one.
    pub fn insert(&mut self, id: u32, cell: Cell) {
        match self.cells.binary_search_by_key(&id, |(i, _)| *i) {
            Ok(at) => self.cells[at] = (id, cell),
            Err(at) => self.cells.insert(at, (id, cell)),
        }
    }

    /// Cells in column-id order.
    pub fn iter(&self) -> impl Iterator<Item = (u32, &Cell)> {
        self.cells.iter().map(|(id, c)| (*id, c))
    }

    /// Consume the row in column-id order.
    pub fn into_iter(self) -> impl Iterator<Item = (u32, Cell)> {
        self.cells.into_iter()
    }
}
