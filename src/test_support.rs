//! In-memory helpers shared by the unit and integration test-suites.

use async_trait::async_trait;

use crate::error::Result;
use crate::fragment::{
    AtomicCell, Cell, ClusteringRow, Fragment, PartitionStart, Row, RowTombstone,
};
use crate::key::{ClusteringKey, PartitionKey};
use crate::reader::FragmentReader;
use crate::schema::{ColumnType, Schema, SortOrder};

/// A one-pk / one-ck / one-value schema used across the tests.
pub fn test_schema() -> Schema {
    Schema::new(
        "ks",
        "cf",
        vec![("pk".into(), ColumnType::Blob)],
        vec![("ck".into(), ColumnType::Blob, SortOrder::Ascending)],
        vec![("s".into(), ColumnType::Text)],
        vec![("v".into(), ColumnType::Text)],
    )
}

/// A single-component partition key over raw bytes.
pub fn pk(component: &[u8]) -> PartitionKey {
    PartitionKey::from_components(vec![component.to_vec()])
}

/// A single-component clustering key over raw bytes.
pub fn ck(component: &[u8]) -> ClusteringKey {
    ClusteringKey::from_components(vec![component.to_vec()])
}

/// A partition start without a tombstone.
pub fn partition_start(schema: &Schema, key: PartitionKey) -> Fragment {
    Fragment::PartitionStart(PartitionStart {
        key: schema.decorate(key),
        tombstone: None,
    })
}

/// A clustering row with one live `v` cell.
pub fn row_with_value(key: ClusteringKey, timestamp: i64, value: &str) -> Fragment {
    let mut cells = Row::new();
    cells.insert(0, Cell::Atomic(AtomicCell::live(timestamp, value.as_bytes().to_vec())));
    Fragment::ClusteringRow(ClusteringRow {
        key,
        tombstone: RowTombstone::default(),
        marker: None,
        cells,
    })
}

/// A reader over a fixed fragment list, with a working native skip.
pub struct MemReader {
    fragments: std::vec::IntoIter<Fragment>,
}

impl MemReader {
    /// Wrap a fragment list.
    pub fn new(fragments: Vec<Fragment>) -> Self {
        Self {
            fragments: fragments.into_iter(),
        }
    }
}

#[async_trait]
impl FragmentReader for MemReader {
    async fn next(&mut self) -> Result<Option<Fragment>> {
        Ok(self.fragments.next())
    }

    async fn skip_to_next_partition(&mut self) -> Result<()> {
        // Peel fragments until the next partition boundary; the boundary
        // fragment itself has to survive, so work on a peekable clone.
        let mut rest = self.fragments.as_slice().iter();
        let mut dropped = 0;
        for fragment in &mut rest {
            if matches!(fragment, Fragment::PartitionStart(_)) {
                break;
            }
            dropped += 1;
        }
        for _ in 0..dropped {
            self.fragments.next();
        }
        Ok(())
    }
}
