//! Validation scenarios over the reference codec.

mod common;

use sstable_tool::codec::JsonStoreCodec;
use sstable_tool::fragment::{
    BoundWeight, Fragment, Position, RangeTombstoneChange, Tombstone,
};
use sstable_tool::ops;
use sstable_tool::test_support::{ck, partition_start, pk, row_with_value};

use common::{open_all, schema, store_sstable};

const TOMB: Tombstone = Tombstone {
    timestamp: 100,
    deletion_time: 1_577_836_800,
};

#[tokio::test]
async fn closed_range_tombstone_validates_clean() {
    let schema = schema();
    let dir = tempfile::tempdir().unwrap();
    let fragments = vec![
        partition_start(&schema, pk(&[0x01])),
        Fragment::RangeTombstoneChange(RangeTombstoneChange {
            position: Position::bound(ck(b"a"), BoundWeight::BeforeAll),
            tombstone: Some(TOMB),
        }),
        Fragment::RangeTombstoneChange(RangeTombstoneChange {
            position: Position::bound(ck(b"b"), BoundWeight::AfterAll),
            tombstone: None,
        }),
        Fragment::PartitionEnd,
    ];
    let path = store_sstable(schema.clone(), dir.path(), 1, fragments).await;
    let sstables = open_all(&[path]).await;
    let errors = ops::validate(schema, &JsonStoreCodec, &sstables, false)
        .await
        .unwrap();
    assert_eq!(errors, 0);
}

#[tokio::test]
async fn unclosed_range_tombstone_is_exactly_one_error() {
    let schema = schema();
    let dir = tempfile::tempdir().unwrap();
    let fragments = vec![
        partition_start(&schema, pk(&[0x01])),
        Fragment::RangeTombstoneChange(RangeTombstoneChange {
            position: Position::bound(ck(b"a"), BoundWeight::BeforeAll),
            tombstone: Some(TOMB),
        }),
        Fragment::PartitionEnd,
    ];
    let path = store_sstable(schema.clone(), dir.path(), 1, fragments).await;
    let sstables = open_all(&[path]).await;
    let errors = ops::validate(schema, &JsonStoreCodec, &sstables, false)
        .await
        .unwrap();
    assert_eq!(errors, 1);
}

#[tokio::test]
async fn out_of_order_partitions_are_detected() {
    let schema = schema();
    let dir = tempfile::tempdir().unwrap();
    let mut keys: Vec<_> = [b"a".as_slice(), b"b"].iter().map(|s| pk(s)).collect();
    keys.sort_by_key(|k| schema.token_of(k));
    keys.reverse();
    let mut fragments = Vec::new();
    for key in &keys {
        fragments.push(partition_start(&schema, key.clone()));
        fragments.push(Fragment::PartitionEnd);
    }
    let path = store_sstable(schema.clone(), dir.path(), 1, fragments).await;
    let sstables = open_all(&[path]).await;
    let errors = ops::validate(schema, &JsonStoreCodec, &sstables, false)
        .await
        .unwrap();
    assert_eq!(errors, 1);
}

#[tokio::test]
async fn merged_inputs_validate_as_one_stream() {
    let schema = schema();
    let dir = tempfile::tempdir().unwrap();
    let mut keys: Vec<_> = [b"a".as_slice(), b"b"].iter().map(|s| pk(s)).collect();
    keys.sort_by_key(|k| schema.token_of(k));
    let one = store_sstable(
        schema.clone(),
        dir.path(),
        1,
        vec![
            partition_start(&schema, keys[0].clone()),
            row_with_value(ck(b"c"), 1, "x"),
            Fragment::PartitionEnd,
        ],
    )
    .await;
    let two = store_sstable(
        schema.clone(),
        dir.path(),
        2,
        vec![
            partition_start(&schema, keys[1].clone()),
            row_with_value(ck(b"c"), 2, "y"),
            Fragment::PartitionEnd,
        ],
    )
    .await;
    let sstables = open_all(&[one, two]).await;
    let errors = ops::validate(schema, &JsonStoreCodec, &sstables, true)
        .await
        .unwrap();
    assert_eq!(errors, 0);
}
