//! The event handler reconstructing a fragment stream from the structured
//! dump format.
//!
//! The handler interprets each lexer event in the context of an explicit
//! state stack (never the host call stack; the grammar bounds its depth).
//! Scalar events fill scratch buffers and pop back to the calling state,
//! firing a retire action that finalises the accumulated data, possibly
//! emitting fragments.

use std::sync::Arc;

use super::lexer::JsonEvent;
use crate::fragment::{
    AtomicCell, BoundWeight, Cell, ClusteringRow, Expiration, Fragment, PartitionStart, Position,
    RangeTombstoneChange, Row, RowMarker, RowTombstone, StaticRow, Tombstone,
};
use crate::key::{hex_to_bytes, ClusteringKey, PartitionKey};
use crate::schema::{ColumnDef, ColumnKind, Schema};
use crate::timefmt::{parse_epoch_seconds, parse_ttl};

/// Upper bound on the state stack depth; set by the grammar, not the input.
const MAX_STACK_DEPTH: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Start,
    BeforePartition,
    InPartition,
    BeforeKey,
    InKey,
    BeforeTombstone,
    InTombstone,
    BeforeStaticColumns,
    BeforeClusteringElements,
    BeforeClusteringElement,
    InClusteringElement,
    InRangeTombstoneChange,
    InClusteringRow,
    BeforeMarker,
    InMarker,
    BeforeClusteringColumns,
    BeforeColumnKey,
    BeforeColumn,
    InColumn,
    BeforeIgnoredValue,
    BeforeInteger,
    BeforeString,
    BeforeBool,
}

impl State {
    fn name(self) -> &'static str {
        match self {
            State::Start => "start",
            State::BeforePartition => "before_partition",
            State::InPartition => "in_partition",
            State::BeforeKey => "before_key",
            State::InKey => "in_key",
            State::BeforeTombstone => "before_tombstone",
            State::InTombstone => "in_tombstone",
            State::BeforeStaticColumns => "before_static_columns",
            State::BeforeClusteringElements => "before_clustering_elements",
            State::BeforeClusteringElement => "before_clustering_element",
            State::InClusteringElement => "in_clustering_element",
            State::InRangeTombstoneChange => "in_range_tombstone_change",
            State::InClusteringRow => "in_clustering_row",
            State::BeforeMarker => "before_marker",
            State::InMarker => "in_marker",
            State::BeforeClusteringColumns => "before_clustering_columns",
            State::BeforeColumnKey => "before_column_key",
            State::BeforeColumn => "before_column",
            State::InColumn => "in_column",
            State::BeforeIgnoredValue => "before_ignored_value",
            State::BeforeInteger => "before_integer",
            State::BeforeString => "before_string",
            State::BeforeBool => "before_bool",
        }
    }
}

/// A structural error raised by the handler; the parser task attaches the
/// input position.
#[derive(Debug)]
pub(crate) struct HandlerError {
    /// What went wrong.
    pub message: String,
    /// Snapshot of the state stack, innermost first.
    pub stack: String,
}

#[derive(Debug, Default)]
struct TombstoneBuilder {
    timestamp: Option<i64>,
    deletion_time: Option<i64>,
}

#[derive(Debug)]
struct ColumnBuilder {
    def: ColumnDef,
    is_live: Option<bool>,
    timestamp: Option<i64>,
    value: Option<Vec<u8>>,
    deletion_time: Option<i64>,
}

/// Outcome of one handler event: fragments to hand downstream, and whether
/// the document is complete.
#[derive(Debug, Default)]
pub(crate) struct Emitted {
    pub fragments: Vec<Fragment>,
    pub end_of_stream: bool,
}

struct Retire {
    pop_states: usize,
    next_state: Option<State>,
}

impl Retire {
    fn one() -> Self {
        Retire {
            pop_states: 1,
            next_state: None,
        }
    }

    fn two() -> Self {
        Retire {
            pop_states: 2,
            next_state: None,
        }
    }
}

/// The state machine proper.
pub(crate) struct Handler {
    schema: Arc<Schema>,
    stack: Vec<State>,
    out: Emitted,
    /// The key most recently seen.
    key: String,
    partition_start_emitted: bool,
    /// The tombstone being parsed is a shadowable one.
    is_shadowable: bool,
    // Scalar scratch.
    boolean: Option<bool>,
    integer: Option<i64>,
    string: Option<String>,
    // Pending structures.
    pkey: Option<PartitionKey>,
    ckey: Option<ClusteringKey>,
    tombstone: Option<TombstoneBuilder>,
    bound_weight: Option<BoundWeight>,
    row_marker: Option<RowMarker>,
    row_tombstone: Option<RowTombstone>,
    row: Option<Row>,
    column: Option<ColumnBuilder>,
    ttl: Option<u64>,
    expiry: Option<i64>,
}

impl Handler {
    pub(crate) fn new(schema: Arc<Schema>) -> Self {
        let mut stack = Vec::with_capacity(MAX_STACK_DEPTH);
        stack.push(State::Start);
        Handler {
            schema,
            stack,
            out: Emitted::default(),
            key: String::new(),
            partition_start_emitted: false,
            is_shadowable: false,
            boolean: None,
            integer: None,
            string: None,
            pkey: None,
            ckey: None,
            tombstone: None,
            bound_weight: None,
            row_marker: None,
            row_tombstone: None,
            row: None,
            column: None,
            ttl: None,
            expiry: None,
        }
    }

    /// Drain fragments produced by the last event.
    pub(crate) fn take_output(&mut self) -> Emitted {
        std::mem::take(&mut self.out)
    }

    /// Snapshot of the state stack, innermost first.
    pub(crate) fn stack_string(&self) -> String {
        let names: Vec<&str> = self.stack.iter().rev().map(|s| s.name()).collect();
        names.join("|")
    }

    fn err(&self, message: impl Into<String>) -> HandlerError {
        HandlerError {
            message: message.into(),
            stack: self.stack_string(),
        }
    }

    fn error<T>(&self, message: impl Into<String>) -> Result<T, HandlerError> {
        Err(self.err(message))
    }

    fn unexpected<T>(&self, event: &JsonEvent) -> Result<T, HandlerError> {
        self.error(format!("unexpected json event {}", event.name()))
    }

    fn unexpected_key<T>(&self, event: &JsonEvent) -> Result<T, HandlerError> {
        self.error(format!("unexpected json event {}({})", event.name(), self.key))
    }

    /// `top(0)` is the innermost state.
    fn top(&self, depth: usize) -> State {
        self.stack[self.stack.len() - 1 - depth]
    }

    fn push(&mut self, state: State) -> Result<(), HandlerError> {
        if self.stack.len() >= MAX_STACK_DEPTH {
            return self.error("state stack overflow");
        }
        self.stack.push(state);
        Ok(())
    }

    fn emit(&mut self, fragment: Fragment) {
        self.out.fragments.push(fragment);
    }

    /// Feed one lexer event through the machine.
    pub(crate) fn on_event(&mut self, event: JsonEvent) -> Result<(), HandlerError> {
        match &event {
            JsonEvent::Null => match self.top(0) {
                State::BeforeIgnoredValue => self.pop(),
                _ => self.unexpected(&event),
            },
            JsonEvent::Bool(b) => match self.top(0) {
                State::BeforeBool => {
                    self.boolean = Some(*b);
                    self.pop()
                }
                _ => self.unexpected(&event),
            },
            JsonEvent::Int(i) => match self.top(0) {
                State::BeforeIgnoredValue => self.pop(),
                State::BeforeInteger => {
                    self.integer = Some(*i);
                    self.pop()
                }
                _ => self.unexpected(&event),
            },
            JsonEvent::Uint(u) => match self.top(0) {
                State::BeforeIgnoredValue => self.pop(),
                State::BeforeInteger => match i64::try_from(*u) {
                    Ok(i) => {
                        self.integer = Some(i);
                        self.pop()
                    }
                    Err(_) => self.error(format!("integer value {u} out of range")),
                },
                _ => self.unexpected(&event),
            },
            JsonEvent::Double(_) => match self.top(0) {
                State::BeforeIgnoredValue => self.pop(),
                _ => self.unexpected(&event),
            },
            JsonEvent::Str(s) => match self.top(0) {
                State::BeforeIgnoredValue => self.pop(),
                State::BeforeString => {
                    self.string = Some(s.clone());
                    self.pop()
                }
                _ => self.unexpected(&event),
            },
            JsonEvent::StartObject => match self.top(0) {
                State::BeforePartition => self.push(State::InPartition),
                State::BeforeKey => self.push(State::InKey),
                State::BeforeTombstone => {
                    self.tombstone = Some(TombstoneBuilder::default());
                    self.push(State::InTombstone)
                }
                State::BeforeStaticColumns => {
                    self.row = Some(Row::new());
                    self.push(State::BeforeColumnKey)
                }
                State::BeforeClusteringElement => {
                    self.row = Some(Row::new());
                    self.push(State::InClusteringElement)
                }
                State::BeforeMarker => self.push(State::InMarker),
                State::BeforeClusteringColumns => self.push(State::BeforeColumnKey),
                State::BeforeColumn => self.push(State::InColumn),
                _ => self.unexpected(&event),
            },
            JsonEvent::Key(k) => {
                self.key = k.clone();
                self.on_key(&event)
            }
            JsonEvent::EndObject => match self.top(0) {
                State::InPartition
                | State::InKey
                | State::InTombstone
                | State::InRangeTombstoneChange
                | State::InClusteringRow
                | State::BeforeColumnKey
                | State::InMarker
                | State::InColumn => self.pop(),
                _ => self.unexpected(&event),
            },
            JsonEvent::StartArray => match self.top(0) {
                State::Start => self.push(State::BeforePartition),
                State::BeforeClusteringElements => self.push(State::BeforeClusteringElement),
                _ => self.unexpected(&event),
            },
            JsonEvent::EndArray => match self.top(0) {
                State::BeforeClusteringElement | State::BeforePartition => self.pop(),
                _ => self.unexpected(&event),
            },
        }
    }

    fn on_key(&mut self, event: &JsonEvent) -> Result<(), HandlerError> {
        match self.top(0) {
            State::InPartition => match self.key.as_str() {
                "key" => self.push(State::BeforeKey),
                "tombstone" => self.push(State::BeforeTombstone),
                "static_row" | "clustering_elements" => {
                    if !self.partition_start_emitted {
                        self.finalize_partition_start(None)?;
                    }
                    if self.key == "static_row" {
                        self.push(State::BeforeStaticColumns)
                    } else {
                        self.push(State::BeforeClusteringElements)
                    }
                }
                _ => self.unexpected_key(event),
            },
            State::InKey => match self.key.as_str() {
                "raw" => self.push(State::BeforeString),
                "value" => self.push(State::BeforeIgnoredValue),
                "token" if self.top(2) == State::InPartition => {
                    self.push(State::BeforeIgnoredValue)
                }
                _ => self.unexpected_key(event),
            },
            State::InTombstone => match self.key.as_str() {
                "timestamp" => self.push(State::BeforeInteger),
                "deletion_time" => self.push(State::BeforeString),
                _ => self.unexpected_key(event),
            },
            State::InMarker => match self.key.as_str() {
                "timestamp" => self.push(State::BeforeInteger),
                "ttl" | "expiry" => self.push(State::BeforeString),
                _ => self.unexpected_key(event),
            },
            State::InClusteringElement => match self.key.as_str() {
                "type" => self.push(State::BeforeString),
                _ => self.unexpected_key(event),
            },
            State::InRangeTombstoneChange => match self.key.as_str() {
                "key" => self.push(State::BeforeKey),
                "weight" => self.push(State::BeforeInteger),
                "tombstone" => self.push(State::BeforeTombstone),
                _ => self.unexpected_key(event),
            },
            State::InClusteringRow => match self.key.as_str() {
                "key" => self.push(State::BeforeKey),
                "marker" => self.push(State::BeforeMarker),
                "tombstone" => self.push(State::BeforeTombstone),
                "shadowable_tombstone" => {
                    self.is_shadowable = true;
                    self.push(State::BeforeTombstone)
                }
                "columns" => self.push(State::BeforeClusteringColumns),
                _ => self.unexpected_key(event),
            },
            State::BeforeColumnKey => {
                let Some(def) = self.schema.column_by_name(&self.key).cloned() else {
                    return self.error(format!("failed to look up column name {}", self.key));
                };
                if self.top(1) == State::BeforeStaticColumns && def.kind != ColumnKind::Static {
                    return self.error(format!(
                        "cannot add column {} of kind {} to static row",
                        self.key, def.kind
                    ));
                }
                if self.top(1) == State::BeforeClusteringColumns && def.kind != ColumnKind::Regular
                {
                    return self.error(format!(
                        "cannot add column {} of kind {} to regular row",
                        self.key, def.kind
                    ));
                }
                if !def.ty.is_atomic() {
                    return self.error(format!(
                        "failed to initialize column {}: non-atomic columns are not supported",
                        self.key
                    ));
                }
                if def.ty.is_counter() {
                    return self.error(format!(
                        "failed to initialize column {}: counter columns are not supported",
                        self.key
                    ));
                }
                self.column = Some(ColumnBuilder {
                    def,
                    is_live: None,
                    timestamp: None,
                    value: None,
                    deletion_time: None,
                });
                self.push(State::BeforeColumn)
            }
            State::InColumn => match self.key.as_str() {
                "is_live" => self.push(State::BeforeBool),
                "timestamp" => self.push(State::BeforeInteger),
                "ttl" | "expiry" | "value" | "deletion_time" => self.push(State::BeforeString),
                _ => self.unexpected_key(event),
            },
            _ => self.unexpected_key(event),
        }
    }

    fn pop(&mut self) -> Result<(), HandlerError> {
        let retire = self.retire()?;
        for _ in 0..retire.pop_states {
            self.stack.pop();
        }
        if let Some(next) = retire.next_state {
            self.push(next)?;
        }
        Ok(())
    }

    fn retire(&mut self) -> Result<Retire, HandlerError> {
        match self.top(0) {
            State::BeforePartition => {
                self.out.end_of_stream = true;
                Ok(Retire::one())
            }
            State::InPartition => {
                if !self.partition_start_emitted {
                    // A partition holding only a key: emit its start with an
                    // empty tombstone before closing it.
                    self.finalize_partition_start(None)?;
                }
                self.partition_start_emitted = false;
                self.emit(Fragment::PartitionEnd);
                Ok(Retire::one())
            }
            State::InKey => Ok(Retire::two()),
            State::InTombstone => {
                let is_shadowable = std::mem::take(&mut self.is_shadowable);
                let tomb = self.take_tombstone()?;
                match self.top(2) {
                    State::InPartition => {
                        self.finalize_partition_start(tomb)?;
                    }
                    State::InRangeTombstoneChange => {
                        self.row_tombstone = Some(RowTombstone {
                            regular: tomb,
                            shadowable: None,
                        });
                    }
                    State::InClusteringRow => {
                        if is_shadowable {
                            let Some(rt) = self.row_tombstone.as_mut() else {
                                return self.error(
                                    "cannot apply shadowable tombstone, row tombstone not initialized yet",
                                );
                            };
                            rt.shadowable = tomb;
                        } else {
                            self.row_tombstone = Some(RowTombstone {
                                regular: tomb,
                                shadowable: None,
                            });
                        }
                    }
                    _ => return self.error("retiring in_tombstone state in invalid context"),
                }
                Ok(Retire::two())
            }
            State::InMarker => {
                self.finalize_row_marker()?;
                Ok(Retire::two())
            }
            State::InColumn => {
                self.finalize_column()?;
                Ok(Retire::two())
            }
            State::BeforeColumnKey => {
                if self.top(1) == State::BeforeStaticColumns {
                    self.finalize_static_row()?;
                }
                Ok(Retire::two())
            }
            State::BeforeClusteringElement => Ok(Retire::two()),
            State::InRangeTombstoneChange => {
                self.finalize_range_tombstone_change()?;
                Ok(Retire::two())
            }
            State::InClusteringRow => {
                self.finalize_clustering_row()?;
                Ok(Retire::two())
            }
            State::BeforeIgnoredValue => Ok(Retire::one()),
            State::BeforeBool => {
                if self.top(1) == State::InColumn {
                    let is_live = self.boolean;
                    self.column.as_mut().expect("in_column without builder").is_live = is_live;
                }
                self.boolean = None;
                Ok(Retire::one())
            }
            State::BeforeInteger => {
                let integer = self.integer.take().expect("before_integer without a value");
                match self.top(1) {
                    State::InTombstone => {
                        self.tombstone
                            .as_mut()
                            .expect("in_tombstone without builder")
                            .timestamp = Some(integer);
                    }
                    State::InRangeTombstoneChange => {
                        self.parse_bound_weight(integer)?;
                    }
                    State::InColumn => {
                        self.column
                            .as_mut()
                            .expect("in_column without builder")
                            .timestamp = Some(integer);
                    }
                    State::InMarker => {
                        self.row_marker = Some(RowMarker {
                            timestamp: integer,
                            expiration: None,
                        });
                    }
                    _ => {}
                }
                Ok(Retire::one())
            }
            State::BeforeString => {
                let string = self.string.take().expect("before_string without a value");
                let mut retire = Retire::one();
                match self.top(1) {
                    State::InKey => match self.top(3) {
                        State::InPartition => self.parse_partition_key(&string)?,
                        State::InClusteringRow | State::InRangeTombstoneChange => {
                            self.parse_clustering_key(&string)?
                        }
                        _ => return self.error("raw key in invalid context"),
                    },
                    State::InTombstone => self.parse_tombstone_deletion_time(&string)?,
                    State::InMarker => {
                        if self.key == "ttl" {
                            self.parse_ttl_value(&string)?;
                        } else {
                            self.parse_expiry_value(&string)?;
                        }
                    }
                    State::InClusteringElement => match string.as_str() {
                        "clustering-row" => retire.next_state = Some(State::InClusteringRow),
                        "range-tombstone-change" => {
                            retire.next_state = Some(State::InRangeTombstoneChange)
                        }
                        other => {
                            return self.error(format!(
                                "invalid clustering element type: {other}, \
                                 expected clustering-row or range-tombstone-change"
                            ))
                        }
                    },
                    State::InColumn => match self.key.as_str() {
                        "ttl" => self.parse_ttl_value(&string)?,
                        "expiry" => self.parse_expiry_value(&string)?,
                        "deletion_time" => {
                            let dt = parse_epoch_seconds(&string)
                                .map_err(|e| self.err(format!("failed to parse deletion_time: {e}")))?;
                            self.column
                                .as_mut()
                                .expect("in_column without builder")
                                .deletion_time = Some(dt);
                        }
                        _ => self.parse_column_value(&string)?,
                    },
                    _ => {}
                }
                Ok(retire)
            }
            state => self.error(format!(
                "attempted to retire unexpected state {}",
                state.name()
            )),
        }
    }

    fn take_tombstone(&mut self) -> Result<Option<Tombstone>, HandlerError> {
        let builder = self.tombstone.take().expect("in_tombstone without builder");
        match (builder.timestamp, builder.deletion_time) {
            (Some(timestamp), Some(deletion_time)) => Ok(Some(Tombstone {
                timestamp,
                deletion_time,
            })),
            (None, None) => Ok(None),
            _ => self.error(
                "incomplete tombstone: timestamp and deletion_time have to be either \
                 both present or both missing",
            ),
        }
    }

    fn parse_partition_key(&mut self, hex: &str) -> Result<(), HandlerError> {
        let raw = hex_to_bytes(hex)
            .map_err(|e| self.err(format!("failed to parse partition key from raw string: {e}")))?;
        let key = PartitionKey::from_bytes(&raw)
            .map_err(|e| self.err(format!("failed to parse partition key from raw string: {e}")))?;
        if let Err(e) = self.schema.check_partition_key(&key) {
            return self.error(format!("failed to parse partition key: {e}"));
        }
        self.pkey = Some(key);
        Ok(())
    }

    fn parse_clustering_key(&mut self, hex: &str) -> Result<(), HandlerError> {
        let raw = hex_to_bytes(hex)
            .map_err(|e| self.err(format!("failed to parse clustering key from raw string: {e}")))?;
        let key = ClusteringKey::from_bytes(&raw)
            .map_err(|e| self.err(format!("failed to parse clustering key from raw string: {e}")))?;
        self.ckey = Some(key);
        Ok(())
    }

    fn parse_bound_weight(&mut self, value: i64) -> Result<(), HandlerError> {
        match i8::try_from(value).ok().and_then(BoundWeight::from_i8) {
            Some(weight) => {
                self.bound_weight = Some(weight);
                Ok(())
            }
            None => self.error(format!(
                "failed to parse bound weight: {value} is not a valid bound weight value"
            )),
        }
    }

    fn parse_tombstone_deletion_time(&mut self, s: &str) -> Result<(), HandlerError> {
        match parse_epoch_seconds(s) {
            Ok(dt) => {
                self.tombstone
                    .as_mut()
                    .expect("in_tombstone without builder")
                    .deletion_time = Some(dt);
                Ok(())
            }
            Err(e) => self.error(format!("failed to parse deletion_time: {e}")),
        }
    }

    fn parse_ttl_value(&mut self, s: &str) -> Result<(), HandlerError> {
        match parse_ttl(s) {
            Ok(ttl) => {
                self.ttl = Some(ttl);
                Ok(())
            }
            Err(e) => self.error(format!("failed to parse ttl value: {e}")),
        }
    }

    fn parse_expiry_value(&mut self, s: &str) -> Result<(), HandlerError> {
        match parse_epoch_seconds(s) {
            Ok(expiry) => {
                self.expiry = Some(expiry);
                Ok(())
            }
            Err(e) => self.error(format!("failed to parse expiry: {e}")),
        }
    }

    fn parse_column_value(&mut self, s: &str) -> Result<(), HandlerError> {
        let column = self.column.as_mut().expect("in_column without builder");
        match column.def.ty.parse_value(s) {
            Ok(value) => {
                column.value = Some(value);
                Ok(())
            }
            Err(e) => self.error(format!("failed to parse cell value: {e}")),
        }
    }

    fn take_joint_expiration(&mut self) -> Result<Option<Expiration>, HandlerError> {
        match (self.ttl.take(), self.expiry.take()) {
            (Some(ttl), Some(expiry)) => Ok(Some(Expiration { ttl, expiry })),
            (None, None) => Ok(None),
            _ => self.error("ttl and expiry must either be both present or both missing"),
        }
    }

    fn finalize_partition_start(&mut self, tombstone: Option<Tombstone>) -> Result<(), HandlerError> {
        let Some(pkey) = self.pkey.take() else {
            return self.error("failed to finalize partition start: no partition key");
        };
        let key = self.schema.decorate(pkey);
        self.partition_start_emitted = true;
        self.emit(Fragment::PartitionStart(PartitionStart { key, tombstone }));
        Ok(())
    }

    fn finalize_static_row(&mut self) -> Result<(), HandlerError> {
        let Some(cells) = self.row.take() else {
            return self.error("failed to finalize static row: row is not initialized yet");
        };
        self.emit(Fragment::StaticRow(StaticRow { cells }));
        Ok(())
    }

    fn finalize_row_marker(&mut self) -> Result<(), HandlerError> {
        if self.row_marker.is_none() {
            return self.error("failed to finalize row marker: it has no timestamp");
        }
        let expiration = self
            .take_joint_expiration()
            .map_err(|e| HandlerError {
                message: format!("failed to finalize row marker: {}", e.message),
                stack: e.stack,
            })?;
        if let Some(marker) = self.row_marker.as_mut() {
            marker.expiration = expiration;
        }
        Ok(())
    }

    fn finalize_column(&mut self) -> Result<(), HandlerError> {
        let Some(row) = self.row.as_mut() else {
            return self.error("failed to finalize cell: row not initialized yet");
        };
        let Some(column) = self.column.take() else {
            return self.error("failed to finalize cell: no column context");
        };
        let (Some(is_live), Some(timestamp)) = (column.is_live, column.timestamp) else {
            return self.error(
                "failed to finalize cell: required fields is_live and/or timestamp missing",
            );
        };
        let expiration = match (self.ttl.take(), self.expiry.take()) {
            (Some(ttl), Some(expiry)) => Some(Expiration { ttl, expiry }),
            (None, None) => None,
            _ => {
                return self.error(
                    "failed to finalize cell: ttl and expiry must either be both present \
                     or both missing",
                )
            }
        };
        let cell = if is_live {
            let Some(value) = column.value else {
                return self.error("failed to finalize cell: live cell doesn't have data");
            };
            match expiration {
                Some(expiration) => AtomicCell::live_expiring(timestamp, value, expiration),
                None => AtomicCell::live(timestamp, value),
            }
        } else {
            let Some(deletion_time) = column.deletion_time else {
                return self.error("failed to finalize cell: dead cell doesn't have deletion time");
            };
            AtomicCell::dead(timestamp, deletion_time)
        };
        row.insert(column.def.id, Cell::Atomic(cell));
        Ok(())
    }

    fn finalize_range_tombstone_change(&mut self) -> Result<(), HandlerError> {
        let Some(weight) = self.bound_weight.take() else {
            return self.error("failed to finalize range tombstone change: missing bound weight");
        };
        if weight == BoundWeight::Equal {
            return self.error(
                "failed to finalize range tombstone change: equal bound weight is not \
                 valid for range tombstone changes",
            );
        }
        let Some(row_tombstone) = self.row_tombstone.take() else {
            return self.error("failed to finalize range tombstone change: missing tombstone");
        };
        let key = self.ckey.take().unwrap_or_default();
        self.emit(Fragment::RangeTombstoneChange(RangeTombstoneChange {
            position: Position::bound(key, weight),
            tombstone: row_tombstone.effective(),
        }));
        Ok(())
    }

    fn finalize_clustering_row(&mut self) -> Result<(), HandlerError> {
        let Some(key) = self.ckey.take() else {
            return self.error("failed to finalize clustering row: missing clustering key");
        };
        let Some(cells) = self.row.take() else {
            return self.error("failed to finalize clustering row: row is not initialized yet");
        };
        let tombstone = self.row_tombstone.take().unwrap_or_default();
        let marker = self.row_marker.take();
        self.emit(Fragment::ClusteringRow(ClusteringRow {
            key,
            tombstone,
            marker,
            cells,
        }));
        Ok(())
    }
}
