//! The uniform contract every operation implements over the fragment stream.

use std::path::Path;

use async_trait::async_trait;

use crate::error::Result;
use crate::fragment::{
    ClusteringRow, Fragment, PartitionStart, RangeTombstoneChange, StaticRow,
};

/// Continuation signal returned from consumer callbacks.
///
/// The meaning of `Stop` is scoped to the callback it is returned from:
///
/// | returned from | `Stop` means |
/// |---|---|
/// | `on_new_sstable` | skip the sstable, jump to `on_end_of_sstable` |
/// | any mid-partition `consume_*` | skip the rest of the partition; a synthetic `partition_end` is delivered |
/// | `consume_partition_end` | skip the rest of the sstable |
/// | `on_end_of_sstable` | stop the entire run |
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Keep feeding fragments.
    Continue,
    /// Stop the current scope.
    Stop,
}

/// A consumer of fragment streams.
///
/// The driver guarantees that each callback returns before the next fragment
/// is produced; consumers may hold arbitrary state without synchronisation.
#[async_trait]
pub trait SstableConsumer {
    /// Called once, before any sstable.
    async fn on_start_of_stream(&mut self) -> Result<()>;

    /// Called before each sstable's fragments. `sst` is `None` when merging
    /// multiple sstables into one stream.
    async fn on_new_sstable(&mut self, sst: Option<&Path>) -> Result<Decision>;

    /// A partition opens.
    async fn consume_partition_start(&mut self, ps: PartitionStart) -> Result<Decision>;

    /// The partition's static row.
    async fn consume_static_row(&mut self, sr: StaticRow) -> Result<Decision>;

    /// A clustering row.
    async fn consume_clustering_row(&mut self, cr: ClusteringRow) -> Result<Decision>;

    /// A range-tombstone change.
    async fn consume_range_tombstone_change(
        &mut self,
        rtc: RangeTombstoneChange,
    ) -> Result<Decision>;

    /// The partition closes. Also delivered synthetically when a partition is
    /// cut short by a mid-partition `Stop`.
    async fn consume_partition_end(&mut self) -> Result<Decision>;

    /// Called after each sstable's fragments.
    async fn on_end_of_sstable(&mut self) -> Result<Decision>;

    /// Called once, after every sstable.
    async fn on_end_of_stream(&mut self) -> Result<()>;
}

/// Dispatch one fragment to the matching consumer callback.
pub async fn deliver<C: SstableConsumer + ?Sized>(
    consumer: &mut C,
    fragment: Fragment,
) -> Result<Decision> {
    match fragment {
        Fragment::PartitionStart(ps) => consumer.consume_partition_start(ps).await,
        Fragment::StaticRow(sr) => consumer.consume_static_row(sr).await,
        Fragment::ClusteringRow(cr) => consumer.consume_clustering_row(cr).await,
        Fragment::RangeTombstoneChange(rtc) => {
            consumer.consume_range_tombstone_change(rtc).await
        }
        Fragment::PartitionEnd => consumer.consume_partition_end().await,
    }
}
