//! Common helpers for the integration tests.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use sstable_tool::codec::{JsonStoreCodec, Sstable, SstableCodec};
use sstable_tool::fragment::Fragment;
use sstable_tool::schema::Schema;
use sstable_tool::test_support;

/// The shared test schema, `Arc`-wrapped for the driver APIs.
pub fn schema() -> Arc<Schema> {
    Arc::new(test_support::test_schema())
}

/// Materialise an sstable in `dir` through the reference codec and return
/// its data-component path.
pub async fn store_sstable(
    schema: Arc<Schema>,
    dir: &Path,
    generation: i64,
    fragments: Vec<Fragment>,
) -> PathBuf {
    let codec = JsonStoreCodec;
    let mut sink = codec
        .create_sink(schema, dir, generation)
        .await
        .expect("create sink");
    for fragment in fragments {
        sink.put(fragment).await.expect("put fragment");
    }
    sink.finish().await.expect("finish sstable");
    dir.join(format!("me-{generation}-big-Data.json"))
}

/// Open sstables through the reference codec.
pub async fn open_all(paths: &[PathBuf]) -> Vec<Arc<dyn Sstable>> {
    let codec = JsonStoreCodec;
    let mut out = Vec::new();
    for path in paths {
        out.push(codec.open(path).await.expect("open sstable"));
    }
    out
}

/// Pull the per-sstable payload out of a whole-tool dump document.
pub fn extract_sstable_payload(dump: &str, path: &Path) -> String {
    let prefix = format!(
        "{{\"sstables\":{{{}:",
        serde_json::to_string(&path.display().to_string()).unwrap()
    );
    let rest = dump
        .strip_prefix(&prefix)
        .unwrap_or_else(|| panic!("dump does not start with {prefix:?}: {dump}"));
    rest.strip_suffix("}}\n")
        .unwrap_or_else(|| panic!("dump does not end with the stream wrapper: {dump}"))
        .to_string()
}
