//! Merged-dump scenarios over the reference codec.

mod common;

use sstable_tool::codec::JsonStoreCodec;
use sstable_tool::dump::OutputFormat;
use sstable_tool::fragment::Fragment;
use sstable_tool::ops::{self, ReadOptions};
use sstable_tool::test_support::{ck, partition_start, pk, row_with_value};

use common::{extract_sstable_payload, open_all, schema, store_sstable};

#[tokio::test]
async fn merge_tiebreak_takes_the_newer_write() {
    let schema = schema();
    let dir = tempfile::tempdir().unwrap();
    let one = store_sstable(
        schema.clone(),
        dir.path(),
        1,
        vec![
            partition_start(&schema, pk(&[0x00])),
            row_with_value(ck(b"r"), 10, "stale"),
            Fragment::PartitionEnd,
        ],
    )
    .await;
    let two = store_sstable(
        schema.clone(),
        dir.path(),
        2,
        vec![
            partition_start(&schema, pk(&[0x00])),
            row_with_value(ck(b"r"), 20, "fresh"),
            Fragment::PartitionEnd,
        ],
    )
    .await;
    let sstables = open_all(&[one, two]).await;
    let options = ReadOptions {
        merge: true,
        ..ReadOptions::default()
    };
    let mut out = Vec::new();
    ops::dump_data(
        schema,
        &JsonStoreCodec,
        &sstables,
        &options,
        OutputFormat::Json,
        &mut out,
    )
    .await
    .unwrap();
    let dump = String::from_utf8(out).unwrap();
    // A merged stream is keyed "anonymous".
    let payload = extract_sstable_payload(&dump, std::path::Path::new("anonymous"));
    let doc: serde_json::Value = serde_json::from_str(&payload).unwrap();
    assert_eq!(doc.as_array().unwrap().len(), 1, "{payload}");
    let cell = &doc[0]["clustering_elements"][0]["columns"]["v"];
    assert_eq!(cell["timestamp"], 20);
    assert_eq!(cell["value"], "fresh");
}

#[tokio::test]
async fn merged_disjoint_inputs_union_in_order() {
    let schema = schema();
    let dir = tempfile::tempdir().unwrap();
    let mut keys: Vec<_> = [b"a".as_slice(), b"b", b"c", b"d"]
        .iter()
        .map(|s| pk(s))
        .collect();
    keys.sort_by_key(|k| schema.token_of(k));
    let sstable = |indices: &[usize]| {
        let mut fragments = Vec::new();
        for &i in indices {
            fragments.push(partition_start(&schema, keys[i].clone()));
            fragments.push(row_with_value(ck(b"r"), 1, "x"));
            fragments.push(Fragment::PartitionEnd);
        }
        fragments
    };
    let one = store_sstable(schema.clone(), dir.path(), 1, sstable(&[0, 2])).await;
    let two = store_sstable(schema.clone(), dir.path(), 2, sstable(&[1, 3])).await;
    let sstables = open_all(&[one, two]).await;
    let options = ReadOptions {
        merge: true,
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
    let payload = extract_sstable_payload(&dump, std::path::Path::new("anonymous"));
    let doc: serde_json::Value = serde_json::from_str(&payload).unwrap();
    let tokens: Vec<String> = doc
        .as_array()
        .unwrap()
        .iter()
        .map(|p| p["key"]["token"].as_str().unwrap().to_string())
        .collect();
    let expected: Vec<String> = keys
        .iter()
        .map(|k| schema.token_of(k).to_string())
        .collect();
    assert_eq!(tokens, expected);
}
