//! End-to-end dump tests over the reference codec.

mod common;

use sstable_tool::fragment::Fragment;
use sstable_tool::dump::OutputFormat;
use sstable_tool::codec::JsonStoreCodec;
use sstable_tool::ops::{self, ReadOptions};
use sstable_tool::test_support::{ck, pk, partition_start, row_with_value};

use common::{extract_sstable_payload, open_all, schema, store_sstable};

#[tokio::test]
async fn empty_sstable_dumps_an_empty_array() {
    let schema = schema();
    let dir = tempfile::tempdir().unwrap();
    let path = store_sstable(schema.clone(), dir.path(), 1, vec![]).await;
    let sstables = open_all(std::slice::from_ref(&path)).await;
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
    let dump = String::from_utf8(out).unwrap();
    assert_eq!(extract_sstable_payload(&dump, &path), "[]");
}

#[tokio::test]
async fn single_live_row_matches_the_documented_shape() {
    let schema = schema();
    let dir = tempfile::tempdir().unwrap();
    let fragments = vec![
        partition_start(&schema, pk(&[0xab])),
        row_with_value(ck(&[0xcd]), 42, "hello"),
        Fragment::PartitionEnd,
    ];
    let path = store_sstable(schema.clone(), dir.path(), 1, fragments).await;
    let sstables = open_all(std::slice::from_ref(&path)).await;
    let mut out = Vec::new();
    ops::dump_data(
        schema.clone(),
        &JsonStoreCodec,
        &sstables,
        &ReadOptions::default(),
        OutputFormat::Json,
        &mut out,
    )
    .await
    .unwrap();
    let dump = String::from_utf8(out).unwrap();
    let token = schema.token_of(&pk(&[0xab]));
    let expected = format!(
        concat!(
            "[{{\"key\":{{\"token\":\"{token}\",\"raw\":\"0001ab\",\"value\":\"0xab\"}},",
            "\"clustering_elements\":[{{\"type\":\"clustering-row\",",
            "\"key\":{{\"raw\":\"0001cd\",\"value\":\"0xcd\"}},",
            "\"columns\":{{\"v\":{{\"is_live\":true,\"timestamp\":42,\"value\":\"hello\"}}}}}}]}}]"
        ),
        token = token
    );
    assert_eq!(extract_sstable_payload(&dump, &path), expected);
}

#[tokio::test]
async fn partition_filter_reduces_the_dump() {
    let schema = schema();
    let dir = tempfile::tempdir().unwrap();
    let mut keys: Vec<_> = [b"a".as_slice(), b"b"].iter().map(|s| pk(s)).collect();
    keys.sort_by_key(|k| schema.token_of(k));
    let mut fragments = Vec::new();
    for key in &keys {
        fragments.push(partition_start(&schema, key.clone()));
        fragments.push(row_with_value(ck(b"c"), 1, "x"));
        fragments.push(Fragment::PartitionEnd);
    }
    let path = store_sstable(schema.clone(), dir.path(), 1, fragments).await;
    let sstables = open_all(std::slice::from_ref(&path)).await;
    let wanted = sstable_tool::key::bytes_to_hex(&keys[1].to_bytes());
    for no_skips in [false, true] {
        let options = ReadOptions {
            partitions: vec![wanted.clone()],
            no_skips,
            ..ReadOptions::default()
        };
        let mut out = Vec::new();
        ops::dump_data(
            schema.clone(),
            &JsonStoreCodec,
            &sstables,
            &options,
            OutputFormat::Json,
            &mut out,
        )
        .await
        .unwrap();
        let dump = String::from_utf8(out).unwrap();
        let payload = extract_sstable_payload(&dump, &path);
        let doc: serde_json::Value = serde_json::from_str(&payload).unwrap();
        let raw_keys: Vec<&str> = doc
            .as_array()
            .unwrap()
            .iter()
            .map(|p| p["key"]["raw"].as_str().unwrap())
            .collect();
        assert_eq!(raw_keys, vec![wanted.as_str()], "no_skips={no_skips}");
    }
}

#[tokio::test]
async fn metadata_dumps_cover_the_component_set() {
    let schema = schema();
    let dir = tempfile::tempdir().unwrap();
    let fragments = vec![
        partition_start(&schema, pk(b"p")),
        row_with_value(ck(b"c"), 7, "x"),
        Fragment::PartitionEnd,
    ];
    let path = store_sstable(schema.clone(), dir.path(), 3, fragments).await;
    let sstables = open_all(std::slice::from_ref(&path)).await;

    let mut out = Vec::new();
    ops::dump_index(schema.clone(), &sstables, &mut out).await.unwrap();
    let index: serde_json::Value =
        serde_json::from_slice(&out).expect("dump-index emits valid json");
    let entries = &index["sstables"][path.display().to_string()];
    assert_eq!(entries.as_array().unwrap().len(), 1);
    assert_eq!(entries[0]["key"]["raw"], "000170");

    let mut out = Vec::new();
    ops::dump_summary(schema.clone(), &sstables, &mut out).await.unwrap();
    let summary: serde_json::Value = serde_json::from_slice(&out).unwrap();
    let summary = &summary["sstables"][path.display().to_string()];
    assert_eq!(summary["header"]["size"], 1);
    assert_eq!(summary["first_key"]["raw"], "000170");

    let mut out = Vec::new();
    ops::dump_statistics(&sstables, &mut out).await.unwrap();
    let statistics: serde_json::Value = serde_json::from_slice(&out).unwrap();
    let statistics = &statistics["sstables"][path.display().to_string()];
    assert_eq!(statistics["stats"]["min_timestamp"], 7);
    assert_eq!(statistics["stats"]["max_timestamp"], 7);
    assert_eq!(
        statistics["serialization_header"]["regular_columns"][0]["name"],
        "v"
    );

    let mut out = Vec::new();
    ops::dump_scylla_metadata(&sstables, &mut out).await.unwrap();
    let metadata: serde_json::Value = serde_json::from_slice(&out).unwrap();
    assert_eq!(
        metadata["sstables"][path.display().to_string()]["sstable_origin"],
        "sstable-tool"
    );

    let mut out = Vec::new();
    ops::dump_compression_info(&sstables, &mut out).await.unwrap();
    let compression: serde_json::Value = serde_json::from_slice(&out).unwrap();
    assert!(compression["sstables"][path.display().to_string()]
        .as_object()
        .unwrap()
        .is_empty());

    let mut out = Vec::new();
    ops::validate_checksums(&sstables, &mut out).await.unwrap();
    let checksums: serde_json::Value = serde_json::from_slice(&out).unwrap();
    assert_eq!(
        checksums["sstables"][path.display().to_string()],
        serde_json::Value::Bool(true)
    );
}
