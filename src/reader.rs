//! The reader driver: feeds a fragment stream into a consumer with
//! pause/skip semantics.

use std::collections::HashSet;
use std::path::Path;

use async_trait::async_trait;
use log::Level;

use crate::consumer::{deliver, Decision, SstableConsumer};
use crate::error::{Error, Result};
use crate::fragment::Fragment;
use crate::key::{hex_to_bytes, PartitionKey};
use crate::logging::sst_log;
use crate::schema::Schema;

/// A lazy producer of fragments for one sstable (or one merged stream).
#[async_trait]
pub trait FragmentReader: Send {
    /// The next fragment, or `None` at end of stream.
    async fn next(&mut self) -> Result<Option<Fragment>>;

    /// Advance to the next partition start, using whatever shortcut the
    /// reader has (typically the index). Callers invoke this mid-partition.
    async fn skip_to_next_partition(&mut self) -> Result<()>;
}

/// A [`FragmentReader`] with single-fragment lookahead.
pub struct PeekableFragments {
    inner: Box<dyn FragmentReader>,
    peeked: Option<Fragment>,
}

impl PeekableFragments {
    /// Wrap a reader.
    pub fn new(inner: Box<dyn FragmentReader>) -> Self {
        Self {
            inner,
            peeked: None,
        }
    }

    /// Consume and return the next fragment.
    pub async fn next(&mut self) -> Result<Option<Fragment>> {
        if let Some(f) = self.peeked.take() {
            return Ok(Some(f));
        }
        self.inner.next().await
    }

    /// Look at the next fragment without consuming it.
    pub async fn peek(&mut self) -> Result<Option<&Fragment>> {
        if self.peeked.is_none() {
            self.peeked = self.inner.next().await?;
        }
        Ok(self.peeked.as_ref())
    }

    /// Advance to the next partition start.
    pub async fn skip_to_next_partition(&mut self) -> Result<()> {
        match self.peeked.take() {
            Some(f @ Fragment::PartitionStart(_)) => {
                // Already at a boundary; keep the fragment.
                self.peeked = Some(f);
                Ok(())
            }
            _ => self.inner.skip_to_next_partition().await,
        }
    }
}

/// The set of partition keys a run is restricted to.
pub struct PartitionFilter {
    raw_keys: HashSet<Vec<u8>>,
}

impl PartitionFilter {
    /// Whether the filter admits a partition key.
    pub fn contains(&self, key: &PartitionKey) -> bool {
        self.raw_keys.contains(&key.to_bytes())
    }

    /// Number of keys filtered for.
    pub fn len(&self) -> usize {
        self.raw_keys.len()
    }

    /// True when no key was requested.
    pub fn is_empty(&self) -> bool {
        self.raw_keys.is_empty()
    }
}

fn parse_filter_key(schema: &Schema, hex: &str) -> Result<Vec<u8>> {
    let raw = hex_to_bytes(hex)
        .map_err(|e| Error::Usage(format!("invalid partition key {hex:?}: {e}")))?;
    let key = PartitionKey::from_bytes(&raw)
        .map_err(|e| Error::Usage(format!("invalid partition key {hex:?}: {e}")))?;
    schema
        .check_partition_key(&key)
        .map_err(|e| Error::Usage(format!("invalid partition key {hex:?}: {e}")))?;
    Ok(raw)
}

/// Build the partition filter from `--partition` values and an optional
/// `--partitions-file` of whitespace-separated hex keys. Returns `None` when
/// neither source names a key.
pub async fn load_partition_filter(
    schema: &Schema,
    partitions: &[String],
    partitions_file: Option<&Path>,
) -> Result<Option<PartitionFilter>> {
    let mut raw_keys = HashSet::new();
    for hex in partitions {
        raw_keys.insert(parse_filter_key(schema, hex)?);
    }
    if let Some(path) = partitions_file {
        let contents = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| Error::io(path, e))?;
        for (n, hex) in contents.split_whitespace().enumerate() {
            raw_keys.insert(parse_filter_key(schema, hex)?);
            // The file may list millions of keys; stay cooperative.
            if n % 1024 == 1023 {
                tokio::task::yield_now().await;
            }
        }
    }
    if raw_keys.is_empty() {
        return Ok(None);
    }
    sst_log!(
        Level::Info,
        "filtering enabled, {} partition(s) to filter for",
        raw_keys.len()
    );
    Ok(Some(PartitionFilter { raw_keys }))
}

/// Drive one reader into a consumer.
///
/// Implements the pause/skip semantics of the consumer contract: a filtered
/// partition is dropped wholesale, a mid-partition `Stop` delivers a
/// synthetic `partition_end` and advances to the next partition, a `Stop`
/// for a `partition_end` abandons the rest of the sstable. With `no_skips`
/// the advance drains fragments instead of using the reader's native skip.
pub async fn consume_reader<C: SstableConsumer + ?Sized>(
    rd: Box<dyn FragmentReader>,
    consumer: &mut C,
    sst: Option<&Path>,
    filter: Option<&PartitionFilter>,
    no_skips: bool,
) -> Result<Decision> {
    if consumer.on_new_sstable(sst).await? == Decision::Stop {
        return consumer.on_end_of_sstable().await;
    }
    let mut rd = PeekableFragments::new(rd);
    'stream: loop {
        let mut skip_partition = false;
        let mut stopped_mid_partition = false;
        loop {
            let Some(fragment) = rd.next().await? else {
                break 'stream;
            };
            sst_log!(Level::Trace, "consume {}", fragment.kind());
            if let Fragment::PartitionStart(ps) = &fragment {
                if let Some(filter) = filter {
                    if !filter.contains(&ps.key.key) {
                        sst_log!(Level::Trace, "filter rejected {}", ps.key);
                        skip_partition = true;
                        break;
                    }
                }
            }
            let at_partition_end = matches!(fragment, Fragment::PartitionEnd);
            if deliver(consumer, fragment).await? == Decision::Stop {
                if at_partition_end {
                    // Stop for a partition end abandons the sstable.
                    break 'stream;
                }
                stopped_mid_partition = true;
                break;
            }
        }
        if stopped_mid_partition {
            if consumer.consume_partition_end().await? == Decision::Stop {
                break 'stream;
            }
            skip_partition = true;
        }
        if skip_partition {
            if no_skips {
                while let Some(fragment) = rd.next().await? {
                    if matches!(fragment, Fragment::PartitionEnd) {
                        break;
                    }
                }
            } else {
                rd.skip_to_next_partition().await?;
            }
        }
    }
    consumer.on_end_of_sstable().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fragment::{ClusteringRow, PartitionStart, RangeTombstoneChange, Row, StaticRow};
    use crate::fragment::RowTombstone;
    use crate::key::ClusteringKey;
    use crate::test_support::{pk, test_schema, MemReader};

    /// Records the callback sequence, optionally stopping at a chosen call.
    struct Recorder {
        calls: Vec<String>,
        stop_at: Option<usize>,
    }

    impl Recorder {
        fn new(stop_at: Option<usize>) -> Self {
            Recorder {
                calls: Vec::new(),
                stop_at,
            }
        }

        fn record(&mut self, call: impl Into<String>) -> Decision {
            self.calls.push(call.into());
            if self.stop_at == Some(self.calls.len()) {
                Decision::Stop
            } else {
                Decision::Continue
            }
        }
    }

    #[async_trait]
    impl SstableConsumer for Recorder {
        async fn on_start_of_stream(&mut self) -> Result<()> {
            self.calls.push("start".into());
            Ok(())
        }
        async fn on_new_sstable(&mut self, _sst: Option<&Path>) -> Result<Decision> {
            Ok(self.record("new_sstable"))
        }
        async fn consume_partition_start(&mut self, ps: PartitionStart) -> Result<Decision> {
            Ok(self.record(format!("ps:{}", ps.key.token)))
        }
        async fn consume_static_row(&mut self, _sr: StaticRow) -> Result<Decision> {
            Ok(self.record("sr"))
        }
        async fn consume_clustering_row(&mut self, _cr: ClusteringRow) -> Result<Decision> {
            Ok(self.record("cr"))
        }
        async fn consume_range_tombstone_change(
            &mut self,
            _rtc: RangeTombstoneChange,
        ) -> Result<Decision> {
            Ok(self.record("rtc"))
        }
        async fn consume_partition_end(&mut self) -> Result<Decision> {
            Ok(self.record("pe"))
        }
        async fn on_end_of_sstable(&mut self) -> Result<Decision> {
            Ok(self.record("end_sstable"))
        }
        async fn on_end_of_stream(&mut self) -> Result<()> {
            self.calls.push("end".into());
            Ok(())
        }
    }

    fn two_partitions() -> Vec<Fragment> {
        let schema = test_schema();
        let mut fragments = Vec::new();
        for token_seed in [b"a".as_slice(), b"b".as_slice()] {
            fragments.push(Fragment::PartitionStart(PartitionStart {
                key: schema.decorate(pk(token_seed)),
                tombstone: None,
            }));
            fragments.push(Fragment::ClusteringRow(ClusteringRow {
                key: ClusteringKey::from_components(vec![b"ck".to_vec()]),
                tombstone: RowTombstone::default(),
                marker: None,
                cells: Row::new(),
            }));
            fragments.push(Fragment::PartitionEnd);
        }
        fragments
    }

    #[tokio::test]
    async fn full_stream_is_delivered_in_order() {
        let mut consumer = Recorder::new(None);
        let rd = Box::new(MemReader::new(two_partitions()));
        consume_reader(rd, &mut consumer, None, None, false)
            .await
            .unwrap();
        let kinds: Vec<&str> = consumer.calls.iter().map(|s| s.split(':').next().unwrap()).collect();
        assert_eq!(
            kinds,
            vec!["new_sstable", "ps", "cr", "pe", "ps", "cr", "pe", "end_sstable"]
        );
    }

    #[tokio::test]
    async fn mid_partition_stop_synthesizes_partition_end() {
        // Stop at the first clustering row (call #3).
        let mut consumer = Recorder::new(Some(3));
        let rd = Box::new(MemReader::new(two_partitions()));
        consume_reader(rd, &mut consumer, None, None, false)
            .await
            .unwrap();
        let kinds: Vec<&str> = consumer.calls.iter().map(|s| s.split(':').next().unwrap()).collect();
        // The first partition is cut short with a synthetic end, the second
        // is consumed in full.
        assert_eq!(
            kinds,
            vec!["new_sstable", "ps", "cr", "pe", "ps", "cr", "pe", "end_sstable"]
        );
    }

    #[tokio::test]
    async fn stop_at_partition_end_abandons_the_sstable() {
        // Call #4 is the first real partition end.
        let mut consumer = Recorder::new(Some(4));
        let rd = Box::new(MemReader::new(two_partitions()));
        consume_reader(rd, &mut consumer, None, None, false)
            .await
            .unwrap();
        let kinds: Vec<&str> = consumer.calls.iter().map(|s| s.split(':').next().unwrap()).collect();
        assert_eq!(kinds, vec!["new_sstable", "ps", "cr", "pe", "end_sstable"]);
    }

    #[tokio::test]
    async fn filtered_partitions_never_reach_the_consumer() {
        let schema = test_schema();
        let keep = pk(b"b");
        let filter = PartitionFilter {
            raw_keys: [keep.to_bytes()].into_iter().collect(),
        };
        let mut consumer = Recorder::new(None);
        let rd = Box::new(MemReader::new(two_partitions()));
        consume_reader(rd, &mut consumer, None, Some(&filter), false)
            .await
            .unwrap();
        let expected_token = schema.decorate(keep).token;
        assert_eq!(
            consumer.calls,
            vec![
                "new_sstable".to_string(),
                format!("ps:{expected_token}"),
                "cr".into(),
                "pe".into(),
                "end_sstable".into()
            ]
        );
    }

    #[tokio::test]
    async fn no_skips_matches_native_skip_for_noop_readers() {
        let keep = pk(b"b");
        let filter = PartitionFilter {
            raw_keys: [keep.to_bytes()].into_iter().collect(),
        };
        let mut native = Recorder::new(None);
        consume_reader(
            Box::new(MemReader::new(two_partitions())),
            &mut native,
            None,
            Some(&filter),
            false,
        )
        .await
        .unwrap();
        let mut drained = Recorder::new(None);
        consume_reader(
            Box::new(MemReader::new(two_partitions())),
            &mut drained,
            None,
            Some(&filter),
            true,
        )
        .await
        .unwrap();
        assert_eq!(native.calls, drained.calls);
    }
}
