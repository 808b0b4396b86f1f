//! Stream validation: ordering invariants at configurable strictness.

use std::cmp::Ordering;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use log::Level;

use crate::consumer::{Decision, SstableConsumer};
use crate::error::Result;
use crate::fragment::{
    BoundWeight, ClusteringRow, Fragment, PartitionStart, Position, RangeTombstoneChange,
    StaticRow,
};
use crate::key::DecoratedKey;
use crate::logging::sst_log;
use crate::schema::Schema;

/// How strictly a stream is checked. Levels are cumulative: each contains
/// all the checks of the levels below it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ValidationLevel {
    /// Fragment kinds follow the partition grammar.
    PartitionRegion,
    /// Partition tokens are non-decreasing.
    Token,
    /// Partitions are strictly increasing by `(token, key)`.
    PartitionKey,
    /// Clustering elements are correctly ordered and ranges are closed.
    ClusteringKey,
}

impl ValidationLevel {
    fn includes(self, level: ValidationLevel) -> bool {
        self >= level
    }
}

impl FromStr for ValidationLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, String> {
        match s {
            "partition_region" => Ok(ValidationLevel::PartitionRegion),
            "token" => Ok(ValidationLevel::Token),
            "partition_key" => Ok(ValidationLevel::PartitionKey),
            "clustering_key" => Ok(ValidationLevel::ClusteringKey),
            _ => Err(format!("invalid validation-level {s}")),
        }
    }
}

impl fmt::Display for ValidationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ValidationLevel::PartitionRegion => "partition_region",
            ValidationLevel::Token => "token",
            ValidationLevel::PartitionKey => "partition_key",
            ValidationLevel::ClusteringKey => "clustering_key",
        };
        f.write_str(s)
    }
}

/// The outcome of checking one fragment.
#[derive(Debug, Default)]
pub struct Verdict {
    /// Diagnostics for every violated invariant.
    pub errors: Vec<String>,
    /// A mismatched partition scope; the stream cannot be followed further.
    pub fatal: bool,
}

impl Verdict {
    fn fatal(msg: impl Into<String>) -> Self {
        Verdict {
            errors: vec![msg.into()],
            fatal: true,
        }
    }
}

/// The stateful ordering checker, shared by the `validate` operation and the
/// write pipeline's gate.
pub struct StreamValidator {
    schema: Arc<Schema>,
    level: ValidationLevel,
    in_partition: bool,
    current: Option<DecoratedKey>,
    prev: Option<DecoratedKey>,
    seen_static: bool,
    seen_clustering: bool,
    last_row_pos: Option<Position>,
    last_pos: Option<Position>,
    open_tombstone: bool,
}

impl StreamValidator {
    /// A fresh validator at the given strictness.
    pub fn new(schema: Arc<Schema>, level: ValidationLevel) -> Self {
        StreamValidator {
            schema,
            level,
            in_partition: false,
            current: None,
            prev: None,
            seen_static: false,
            seen_clustering: false,
            last_row_pos: None,
            last_pos: None,
            open_tombstone: false,
        }
    }

    fn check_partition_start(&mut self, ps: &PartitionStart) -> Verdict {
        if self.in_partition {
            return Verdict::fatal(format!(
                "partition start {} while the previous partition is still open",
                ps.key
            ));
        }
        let mut verdict = Verdict::default();
        if let Some(prev) = &self.prev {
            if self.level.includes(ValidationLevel::PartitionKey) {
                if ps.key.tri_compare(prev) != Ordering::Greater {
                    if ps.key.token < prev.token {
                        verdict
                            .errors
                            .push(format!("partition token out of order: {} after {}", ps.key, prev));
                    } else {
                        verdict
                            .errors
                            .push(format!("partition key out of order: {} after {}", ps.key, prev));
                    }
                }
            } else if self.level.includes(ValidationLevel::Token) && ps.key.token < prev.token {
                verdict
                    .errors
                    .push(format!("partition token out of order: {} after {}", ps.key, prev));
            }
        }
        self.in_partition = true;
        self.current = Some(ps.key.clone());
        self.seen_static = false;
        self.seen_clustering = false;
        self.last_row_pos = None;
        self.last_pos = None;
        self.open_tombstone = false;
        verdict
    }

    fn check_static_row(&mut self, _sr: &StaticRow) -> Verdict {
        if !self.in_partition {
            return Verdict::fatal("static row outside a partition");
        }
        let mut verdict = Verdict::default();
        if self.seen_static {
            verdict.errors.push("second static row in partition".into());
        }
        if self.seen_clustering {
            verdict
                .errors
                .push("static row after clustering elements".into());
        }
        self.seen_static = true;
        verdict
    }

    fn check_clustering_row(&mut self, cr: &ClusteringRow) -> Verdict {
        if !self.in_partition {
            return Verdict::fatal("clustering row outside a partition");
        }
        self.seen_clustering = true;
        let mut verdict = Verdict::default();
        if self.level.includes(ValidationLevel::ClusteringKey) {
            let pos = cr.position();
            if let Some(last) = &self.last_row_pos {
                if Position::compare(&self.schema, &pos, last) != Ordering::Greater {
                    verdict.errors.push(format!(
                        "clustering row out of order in partition {}",
                        self.partition_context()
                    ));
                }
            }
            if let Some(last) = &self.last_pos {
                if Position::compare(&self.schema, &pos, last) == Ordering::Less {
                    verdict.errors.push(format!(
                        "clustering element out of order in partition {}",
                        self.partition_context()
                    ));
                }
            }
            self.last_row_pos = Some(pos.clone());
            self.last_pos = Some(pos);
        }
        verdict
    }

    fn check_range_tombstone_change(&mut self, rtc: &RangeTombstoneChange) -> Verdict {
        if !self.in_partition {
            return Verdict::fatal("range tombstone change outside a partition");
        }
        self.seen_clustering = true;
        let mut verdict = Verdict::default();
        if self.level.includes(ValidationLevel::ClusteringKey) {
            if rtc.position.weight == BoundWeight::Equal {
                verdict.errors.push(format!(
                    "range tombstone change with equal bound weight in partition {}",
                    self.partition_context()
                ));
            }
            if let Some(last) = &self.last_pos {
                if Position::compare(&self.schema, &rtc.position, last) == Ordering::Less {
                    verdict.errors.push(format!(
                        "range tombstone change out of order in partition {}",
                        self.partition_context()
                    ));
                }
            }
            self.last_pos = Some(rtc.position.clone());
            self.open_tombstone = rtc.tombstone.is_some();
        }
        verdict
    }

    fn check_partition_end(&mut self) -> Verdict {
        if !self.in_partition {
            return Verdict::fatal("partition end without a matching partition start");
        }
        let mut verdict = Verdict::default();
        if self.level.includes(ValidationLevel::ClusteringKey) && self.open_tombstone {
            verdict.errors.push(format!(
                "unclosed range tombstone at partition end in partition {}",
                self.partition_context()
            ));
        }
        self.in_partition = false;
        self.open_tombstone = false;
        self.prev = self.current.take();
        verdict
    }

    fn partition_context(&self) -> String {
        self.current
            .as_ref()
            .map(|k| k.to_string())
            .unwrap_or_else(|| "<unknown>".into())
    }

    /// Check one fragment against all active invariants.
    pub fn check(&mut self, fragment: &Fragment) -> Verdict {
        match fragment {
            Fragment::PartitionStart(ps) => self.check_partition_start(ps),
            Fragment::StaticRow(sr) => self.check_static_row(sr),
            Fragment::ClusteringRow(cr) => self.check_clustering_row(cr),
            Fragment::RangeTombstoneChange(rtc) => self.check_range_tombstone_change(rtc),
            Fragment::PartitionEnd => self.check_partition_end(),
        }
    }

    /// End-of-stream checks; resets the validator for the next stream.
    pub fn finish(&mut self) -> Verdict {
        let mut verdict = Verdict::default();
        if self.in_partition {
            verdict
                .errors
                .push("stream ends inside a partition".to_string());
        }
        *self = StreamValidator::new(self.schema.clone(), self.level);
        verdict
    }
}

/// A consumer running the validator over every sstable of a run, counting
/// and logging diagnostics.
pub struct ValidatingConsumer {
    validator: StreamValidator,
    sstable: Option<PathBuf>,
    sstable_errors: u64,
    total_errors: u64,
    abort_sstable: bool,
}

impl ValidatingConsumer {
    /// Validate at the given strictness.
    pub fn new(schema: Arc<Schema>, level: ValidationLevel) -> Self {
        ValidatingConsumer {
            validator: StreamValidator::new(schema, level),
            sstable: None,
            sstable_errors: 0,
            total_errors: 0,
            abort_sstable: false,
        }
    }

    /// Errors found across the whole run.
    pub fn total_errors(&self) -> u64 {
        self.total_errors
    }

    fn stream_name(&self) -> String {
        self.sstable
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "the stream".into())
    }

    fn apply(&mut self, verdict: Verdict) -> Decision {
        for error in &verdict.errors {
            sst_log!(Level::Error, "{}: {}", self.stream_name(), error);
        }
        self.sstable_errors += verdict.errors.len() as u64;
        self.total_errors += verdict.errors.len() as u64;
        if verdict.fatal {
            self.abort_sstable = true;
            Decision::Stop
        } else {
            Decision::Continue
        }
    }
}

#[async_trait]
impl SstableConsumer for ValidatingConsumer {
    async fn on_start_of_stream(&mut self) -> Result<()> {
        Ok(())
    }

    async fn on_new_sstable(&mut self, sst: Option<&Path>) -> Result<Decision> {
        self.sstable = sst.map(Path::to_path_buf);
        self.sstable_errors = 0;
        self.abort_sstable = false;
        sst_log!(Level::Info, "validating {}", self.stream_name());
        Ok(Decision::Continue)
    }

    async fn consume_partition_start(&mut self, ps: PartitionStart) -> Result<Decision> {
        let verdict = self.validator.check(&Fragment::PartitionStart(ps));
        Ok(self.apply(verdict))
    }

    async fn consume_static_row(&mut self, sr: StaticRow) -> Result<Decision> {
        let verdict = self.validator.check(&Fragment::StaticRow(sr));
        Ok(self.apply(verdict))
    }

    async fn consume_clustering_row(&mut self, cr: ClusteringRow) -> Result<Decision> {
        let verdict = self.validator.check(&Fragment::ClusteringRow(cr));
        Ok(self.apply(verdict))
    }

    async fn consume_range_tombstone_change(
        &mut self,
        rtc: RangeTombstoneChange,
    ) -> Result<Decision> {
        let verdict = self.validator.check(&Fragment::RangeTombstoneChange(rtc));
        Ok(self.apply(verdict))
    }

    async fn consume_partition_end(&mut self) -> Result<Decision> {
        if self.abort_sstable {
            // Synthetic delivery after a catastrophic error: abandon the
            // sstable instead of validating a stream we cannot follow.
            return Ok(Decision::Stop);
        }
        let verdict = self.validator.check(&Fragment::PartitionEnd);
        Ok(self.apply(verdict))
    }

    async fn on_end_of_sstable(&mut self) -> Result<Decision> {
        if !self.abort_sstable {
            let verdict = self.validator.finish();
            self.apply(verdict);
        } else {
            self.validator.finish();
        }
        sst_log!(
            Level::Info,
            "validated {}: {}",
            self.stream_name(),
            if self.sstable_errors == 0 {
                "valid".to_string()
            } else {
                format!("invalid ({} error(s))", self.sstable_errors)
            }
        );
        Ok(Decision::Continue)
    }

    async fn on_end_of_stream(&mut self) -> Result<()> {
        sst_log!(
            Level::Info,
            "validation finished with {} error(s)",
            self.total_errors
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fragment::{RowTombstone, Tombstone};
    use crate::key::ClusteringKey;
    use crate::test_support::{ck, pk, test_schema};

    fn validator(level: ValidationLevel) -> StreamValidator {
        StreamValidator::new(Arc::new(test_schema()), level)
    }

    fn start(token_seed: &[u8]) -> Fragment {
        let schema = test_schema();
        Fragment::PartitionStart(PartitionStart {
            key: schema.decorate(pk(token_seed)),
            tombstone: None,
        })
    }

    fn start_with_token(token: i64) -> Fragment {
        Fragment::PartitionStart(PartitionStart {
            key: DecoratedKey {
                token,
                key: pk(b"x"),
            },
            tombstone: None,
        })
    }

    fn row(key_seed: &[u8]) -> Fragment {
        Fragment::ClusteringRow(ClusteringRow {
            key: ck(key_seed),
            tombstone: RowTombstone::default(),
            marker: None,
            cells: crate::fragment::Row::new(),
        })
    }

    fn rtc(key_seed: &[u8], weight: BoundWeight, tombstone: Option<Tombstone>) -> Fragment {
        Fragment::RangeTombstoneChange(RangeTombstoneChange {
            position: Position::bound(ck(key_seed), weight),
            tombstone,
        })
    }

    fn run(validator: &mut StreamValidator, fragments: &[Fragment]) -> (u64, bool) {
        let mut errors = 0;
        let mut fatal = false;
        for f in fragments {
            let v = validator.check(f);
            errors += v.errors.len() as u64;
            fatal |= v.fatal;
            if fatal {
                return (errors, fatal);
            }
        }
        errors += validator.finish().errors.len() as u64;
        (errors, fatal)
    }

    const TOMB: Tombstone = Tombstone {
        timestamp: 100,
        deletion_time: 1577836800,
    };

    #[test]
    fn closed_range_tombstone_is_valid() {
        let mut v = validator(ValidationLevel::ClusteringKey);
        let (errors, fatal) = run(
            &mut v,
            &[
                start(b"p"),
                rtc(b"a", BoundWeight::BeforeAll, Some(TOMB)),
                rtc(b"b", BoundWeight::AfterAll, None),
                Fragment::PartitionEnd,
            ],
        );
        assert_eq!((errors, fatal), (0, false));
    }

    #[test]
    fn unclosed_range_tombstone_is_one_error() {
        let mut v = validator(ValidationLevel::ClusteringKey);
        let (errors, _) = run(
            &mut v,
            &[
                start(b"p"),
                rtc(b"a", BoundWeight::BeforeAll, Some(TOMB)),
                Fragment::PartitionEnd,
            ],
        );
        assert_eq!(errors, 1);
    }

    #[test]
    fn out_of_order_tokens_depend_on_level() {
        let stream = [
            start_with_token(5),
            Fragment::PartitionEnd,
            start_with_token(3),
            Fragment::PartitionEnd,
        ];
        let mut at_token = validator(ValidationLevel::Token);
        assert_eq!(run(&mut at_token, &stream), (1, false));
        let mut at_region = validator(ValidationLevel::PartitionRegion);
        assert_eq!(run(&mut at_region, &stream), (0, false));
    }

    #[test]
    fn duplicate_partition_key_needs_partition_key_level() {
        let stream = [
            start(b"p"),
            Fragment::PartitionEnd,
            start(b"p"),
            Fragment::PartitionEnd,
        ];
        let mut at_pk = validator(ValidationLevel::PartitionKey);
        assert_eq!(run(&mut at_pk, &stream), (1, false));
        let mut at_token = validator(ValidationLevel::Token);
        assert_eq!(run(&mut at_token, &stream), (0, false));
    }

    #[test]
    fn out_of_order_rows_need_clustering_level() {
        let stream = [start(b"p"), row(b"b"), row(b"a"), Fragment::PartitionEnd];
        let mut at_ck = validator(ValidationLevel::ClusteringKey);
        assert_eq!(run(&mut at_ck, &stream), (1, false));
        let mut at_pk = validator(ValidationLevel::PartitionKey);
        assert_eq!(run(&mut at_pk, &stream), (0, false));
    }

    #[test]
    fn equal_weight_change_is_rejected() {
        let mut v = validator(ValidationLevel::ClusteringKey);
        let (errors, _) = run(
            &mut v,
            &[
                start(b"p"),
                rtc(b"a", BoundWeight::Equal, Some(TOMB)),
                rtc(b"b", BoundWeight::AfterAll, None),
                Fragment::PartitionEnd,
            ],
        );
        assert_eq!(errors, 1);
    }

    #[test]
    fn grammar_violations_are_fatal() {
        let mut v = validator(ValidationLevel::PartitionRegion);
        let (_, fatal) = run(&mut v, &[row(b"a")]);
        assert!(fatal);
        let mut v = validator(ValidationLevel::PartitionRegion);
        let (_, fatal) = run(&mut v, &[start(b"p"), start(b"q")]);
        assert!(fatal);
    }

    #[test]
    fn missing_partition_end_is_reported_at_finish() {
        let mut v = validator(ValidationLevel::PartitionRegion);
        let (errors, fatal) = run(&mut v, &[start(b"p"), row(b"a")]);
        assert_eq!((errors, fatal), (1, false));
    }

    #[test]
    fn rtc_may_share_a_row_prefix() {
        let mut v = validator(ValidationLevel::ClusteringKey);
        let (errors, fatal) = run(
            &mut v,
            &[
                start(b"p"),
                rtc(b"a", BoundWeight::BeforeAll, Some(TOMB)),
                row(b"a"),
                rtc(b"a", BoundWeight::AfterAll, None),
                Fragment::PartitionEnd,
            ],
        );
        assert_eq!((errors, fatal), (0, false));
    }
}
