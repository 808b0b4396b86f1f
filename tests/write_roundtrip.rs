//! The round-trip property: dump-data → write → dump-data is an identity
//! for the supported write subset.

mod common;

use std::sync::Arc;

use sstable_tool::codec::JsonStoreCodec;
use sstable_tool::dump::OutputFormat;
use sstable_tool::fragment::{
    AtomicCell, BoundWeight, Cell, ClusteringRow, Expiration, Fragment, Position,
    RangeTombstoneChange, Row, RowMarker, RowTombstone, StaticRow, Tombstone,
};
use sstable_tool::key::PartitionKey;
use sstable_tool::ops::{self, ReadOptions};
use sstable_tool::schema::Schema;
use sstable_tool::test_support::{ck, partition_start, pk};
use sstable_tool::validate::ValidationLevel;
use sstable_tool::write::WriteOptions;

use common::{extract_sstable_payload, open_all, schema, store_sstable};

async fn dump_payload(schema: Arc<Schema>, path: &std::path::Path) -> String {
    let sstables = open_all(std::slice::from_ref(&path.to_path_buf())).await;
    let mut out = Vec::new();
    ops::dump_data(
        schema,
        &JsonStoreCodec,
        &sstables,
        &ReadOptions::default(),
        OutputFormat::Json,
        &mut out,
    )
    .await
    .unwrap();
    extract_sstable_payload(&String::from_utf8(out).unwrap(), path)
}

fn rich_fragments(schema: &Schema) -> Vec<Fragment> {
    let mut keys: Vec<PartitionKey> = [b"p1".as_slice(), b"p2"].iter().map(|s| pk(s)).collect();
    keys.sort_by_key(|k| schema.token_of(k));

    let tomb = Tombstone {
        timestamp: 100,
        deletion_time: 1_577_836_800,
    };
    let mut static_cells = Row::new();
    static_cells.insert(0, Cell::Atomic(AtomicCell::live(5, b"static".to_vec())));
    let mut expiring_cells = Row::new();
    expiring_cells.insert(
        0,
        Cell::Atomic(AtomicCell::live_expiring(
            43,
            b"soon gone".to_vec(),
            Expiration {
                ttl: 30,
                expiry: 1_609_459_200,
            },
        )),
    );
    let mut dead_cells = Row::new();
    dead_cells.insert(0, Cell::Atomic(AtomicCell::dead(44, 1_600_000_000)));

    vec![
        // First partition: tombstone, static row, rows and a closed range
        // tombstone.
        Fragment::PartitionStart(sstable_tool::fragment::PartitionStart {
            key: schema.decorate(keys[0].clone()),
            tombstone: Some(tomb),
        }),
        Fragment::StaticRow(StaticRow {
            cells: static_cells,
        }),
        Fragment::RangeTombstoneChange(RangeTombstoneChange {
            position: Position::bound(ck(b"a"), BoundWeight::BeforeAll),
            tombstone: Some(tomb),
        }),
        Fragment::ClusteringRow(ClusteringRow {
            key: ck(b"a"),
            tombstone: RowTombstone {
                regular: Some(Tombstone {
                    timestamp: 10,
                    deletion_time: 1_577_836_800,
                }),
                shadowable: Some(Tombstone {
                    timestamp: 11,
                    deletion_time: 1_577_836_800,
                }),
            },
            marker: Some(RowMarker {
                timestamp: 42,
                expiration: Some(Expiration {
                    ttl: 60,
                    expiry: 1_609_459_200,
                }),
            }),
            cells: expiring_cells,
        }),
        Fragment::RangeTombstoneChange(RangeTombstoneChange {
            position: Position::bound(ck(b"b"), BoundWeight::AfterAll),
            tombstone: None,
        }),
        Fragment::PartitionEnd,
        // Second partition: a bare dead cell.
        partition_start(schema, keys[1].clone()),
        Fragment::ClusteringRow(ClusteringRow {
            key: ck(b"z"),
            tombstone: RowTombstone::default(),
            marker: None,
            cells: dead_cells,
        }),
        Fragment::PartitionEnd,
    ]
}

#[tokio::test]
async fn dump_write_dump_is_an_identity() {
    let schema = schema();
    let dir = tempfile::tempdir().unwrap();
    let source = store_sstable(
        schema.clone(),
        dir.path(),
        1,
        rich_fragments(&schema),
    )
    .await;
    let first_dump = dump_payload(schema.clone(), &source).await;

    // Feed the dumped payload back through the write pipeline.
    let input_file = dir.path().join("input.json");
    std::fs::write(&input_file, &first_dump).unwrap();
    let options = WriteOptions {
        input_file,
        output_dir: dir.path().to_path_buf(),
        generation: 2,
        validation_level: ValidationLevel::ClusteringKey,
    };
    ops::write(schema.clone(), &JsonStoreCodec, &[], &options)
        .await
        .unwrap();

    let rebuilt = dir.path().join("me-2-big-Data.json");
    let second_dump = dump_payload(schema.clone(), &rebuilt).await;
    assert_eq!(first_dump, second_dump);
}

#[tokio::test]
async fn write_rejects_an_existing_output() {
    let schema = schema();
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("me-9-big-Data.json"), "[]").unwrap();
    let input_file = dir.path().join("input.json");
    std::fs::write(&input_file, "[]").unwrap();
    let options = WriteOptions {
        input_file,
        output_dir: dir.path().to_path_buf(),
        generation: 9,
        validation_level: ValidationLevel::ClusteringKey,
    };
    let err = ops::write(schema, &JsonStoreCodec, &[], &options)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("already exists"), "{err}");
}

#[tokio::test]
async fn invalid_streams_abort_before_any_output_survives() {
    let schema = schema();
    let dir = tempfile::tempdir().unwrap();
    // Two partitions under the same key: ordering violation at any level
    // above partition_region.
    let key_hex = sstable_tool::key::bytes_to_hex(&pk(b"p").to_bytes());
    let doc = format!(
        r#"[{{"key": {{"raw": "{key_hex}"}}}}, {{"key": {{"raw": "{key_hex}"}}}}]"#
    );
    let input_file = dir.path().join("input.json");
    std::fs::write(&input_file, doc).unwrap();
    let options = WriteOptions {
        input_file,
        output_dir: dir.path().to_path_buf(),
        generation: 4,
        validation_level: ValidationLevel::ClusteringKey,
    };
    let err = ops::write(schema.clone(), &JsonStoreCodec, &[], &options)
        .await
        .unwrap_err();
    assert!(matches!(err, sstable_tool::Error::Semantic(_)), "{err}");
    assert!(!dir.path().join("me-4-big-Data.json").exists());

    // The same stream passes at partition_region strictness.
    let options = WriteOptions {
        generation: 5,
        validation_level: ValidationLevel::PartitionRegion,
        ..options
    };
    ops::write(schema, &JsonStoreCodec, &[], &options)
        .await
        .unwrap();
    assert!(dir.path().join("me-5-big-Data.json").exists());
}

#[tokio::test]
async fn parse_errors_cancel_the_writer() {
    let schema = schema();
    let dir = tempfile::tempdir().unwrap();
    let input_file = dir.path().join("input.json");
    std::fs::write(&input_file, r#"[{"key": {"raw": "zz"}}]"#).unwrap();
    let options = WriteOptions {
        input_file,
        output_dir: dir.path().to_path_buf(),
        generation: 6,
        validation_level: ValidationLevel::ClusteringKey,
    };
    let err = ops::write(schema, &JsonStoreCodec, &[], &options)
        .await
        .unwrap_err();
    assert!(matches!(err, sstable_tool::Error::Structural(_)), "{err}");
    assert!(!dir.path().join("me-6-big-Data.json").exists());
}
