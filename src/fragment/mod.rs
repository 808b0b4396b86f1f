//! The fragment model: the five typed steps of a partition stream.
//!
//! A well-formed stream is a concatenation of partitions, each
//! `partition_start · static_row? · clustering_element* · partition_end`,
//! with partitions strictly increasing by `(token, key)` and clustering
//! elements non-decreasing in position. Fragments own all their byte
//! buffers so a reader can hand them off without borrowing.

use std::fmt;

mod cell;
mod position;
mod tombstone;

pub use cell::{AtomicCell, Cell, CellState, CollectionCell, CounterCell, CounterShard, Row};
pub use position::{BoundWeight, Position};
pub use tombstone::{merge_tombstones, Expiration, RowMarker, RowTombstone, Tombstone};

use crate::key::{ClusteringKey, DecoratedKey};

/// Opens a partition.
#[derive(Debug, Clone, PartialEq)]
pub struct PartitionStart {
    /// The partition's decorated key.
    pub key: DecoratedKey,
    /// The partition tombstone, if any.
    pub tombstone: Option<Tombstone>,
}

/// The partition's static row.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StaticRow {
    /// Static-column cells.
    pub cells: Row,
}

/// A clustering row.
#[derive(Debug, Clone, PartialEq)]
pub struct ClusteringRow {
    /// The full clustering key.
    pub key: ClusteringKey,
    /// Row deletion state.
    pub tombstone: RowTombstone,
    /// Liveness marker, if present.
    pub marker: Option<RowMarker>,
    /// Regular-column cells.
    pub cells: Row,
}

impl ClusteringRow {
    /// The row's position in the clustering order.
    pub fn position(&self) -> Position {
        Position::for_row(self.key.clone())
    }
}

/// An inflection point between active range-tombstone intervals. An empty
/// tombstone closes the range.
#[derive(Debug, Clone, PartialEq)]
pub struct RangeTombstoneChange {
    /// Where the change takes effect. The weight is never `Equal`.
    pub position: Position,
    /// The tombstone active after this point; `None` closes the range.
    pub tombstone: Option<Tombstone>,
}

/// One atomic step of a partition stream.
#[derive(Debug, Clone, PartialEq)]
pub enum Fragment {
    /// Opens a partition.
    PartitionStart(PartitionStart),
    /// The partition's static row.
    StaticRow(StaticRow),
    /// A clustering row.
    ClusteringRow(ClusteringRow),
    /// A range-tombstone inflection point.
    RangeTombstoneChange(RangeTombstoneChange),
    /// Closes a partition.
    PartitionEnd,
}

impl Fragment {
    /// The fragment's kind tag.
    pub fn kind(&self) -> FragmentKind {
        match self {
            Fragment::PartitionStart(_) => FragmentKind::PartitionStart,
            Fragment::StaticRow(_) => FragmentKind::StaticRow,
            Fragment::ClusteringRow(_) => FragmentKind::ClusteringRow,
            Fragment::RangeTombstoneChange(_) => FragmentKind::RangeTombstoneChange,
            Fragment::PartitionEnd => FragmentKind::PartitionEnd,
        }
    }
}

/// The kind tag of a [`Fragment`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FragmentKind {
    /// Opens a partition.
    PartitionStart,
    /// The partition's static row.
    StaticRow,
    /// A clustering row.
    ClusteringRow,
    /// A range-tombstone inflection point.
    RangeTombstoneChange,
    /// Closes a partition.
    PartitionEnd,
}

impl fmt::Display for FragmentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FragmentKind::PartitionStart => "partition_start",
            FragmentKind::StaticRow => "static_row",
            FragmentKind::ClusteringRow => "clustering_row",
            FragmentKind::RangeTombstoneChange => "range_tombstone_change",
            FragmentKind::PartitionEnd => "partition_end",
        };
        f.write_str(s)
    }
}
