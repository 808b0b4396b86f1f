//! Logical schema: column layout, value codecs and the partitioner.
//!
//! The schema is loaded once (from a schema file or the built-in system
//! registry) and shared read-only by every reader, writer and consumer for
//! the duration of the run.

use std::cmp::Ordering;
use std::fmt;
use std::path::Path;

use serde::Deserialize;
use uuid::Uuid;
use xxhash_rust::xxh3::xxh3_64;

use crate::error::{Error, Result};
use crate::key::{ClusteringKey, DecoratedKey, PartitionKey};

/// Which of the four column groups a column belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    /// A partition-key component.
    PartitionKey,
    /// A clustering-key component.
    ClusteringKey,
    /// A static column.
    Static,
    /// A regular column.
    Regular,
}

impl fmt::Display for ColumnKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ColumnKind::PartitionKey => "partition_key",
            ColumnKind::ClusteringKey => "clustering_key",
            ColumnKind::Static => "static",
            ColumnKind::Regular => "regular",
        };
        f.write_str(s)
    }
}

/// Sort direction of a clustering-key component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    /// Ascending (the default).
    #[default]
    #[serde(alias = "asc")]
    Ascending,
    /// Descending.
    #[serde(alias = "desc")]
    Descending,
}

/// The value type of a column.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnType {
    /// UTF-8 text.
    Text,
    /// 32-bit signed integer, big-endian.
    Int,
    /// 64-bit signed integer, big-endian.
    BigInt,
    /// Single byte, `0` or `1`.
    Boolean,
    /// IEEE-754 double, big-endian.
    Double,
    /// Raw bytes, rendered as `0x`-prefixed hex.
    Blob,
    /// Milliseconds since the epoch, big-endian i64.
    Timestamp,
    /// 16-byte UUID.
    Uuid,
    /// Distributed counter. Readable; rejected on the write path.
    Counter,
    /// Multi-cell list, element keys are time-UUIDs.
    List(Box<ColumnType>),
    /// Multi-cell set, elements keyed by their own value.
    Set(Box<ColumnType>),
    /// Multi-cell map.
    Map(Box<ColumnType>, Box<ColumnType>),
    /// Multi-cell tuple, elements keyed by index.
    Tuple(Vec<ColumnType>),
}

impl ColumnType {
    /// Parse a type name such as `int` or `map<int,text>`.
    pub fn parse(s: &str) -> Result<Self, String> {
        let s = s.trim();
        if let Some(inner) = s.strip_prefix("list<").and_then(|r| r.strip_suffix('>')) {
            return Ok(ColumnType::List(Box::new(Self::parse(inner)?)));
        }
        if let Some(inner) = s.strip_prefix("set<").and_then(|r| r.strip_suffix('>')) {
            return Ok(ColumnType::Set(Box::new(Self::parse(inner)?)));
        }
        if let Some(inner) = s.strip_prefix("map<").and_then(|r| r.strip_suffix('>')) {
            let (k, v) = split_type_args(inner).ok_or_else(|| format!("malformed map type: {s}"))?;
            return Ok(ColumnType::Map(
                Box::new(Self::parse(k)?),
                Box::new(Self::parse(v)?),
            ));
        }
        if let Some(inner) = s.strip_prefix("tuple<").and_then(|r| r.strip_suffix('>')) {
            let mut elems = Vec::new();
            let mut rest = inner;
            loop {
                match split_type_args(rest) {
                    Some((head, tail)) => {
                        elems.push(Self::parse(head)?);
                        rest = tail;
                    }
                    None => {
                        elems.push(Self::parse(rest)?);
                        break;
                    }
                }
            }
            return Ok(ColumnType::Tuple(elems));
        }
        match s {
            "text" | "ascii" | "varchar" => Ok(ColumnType::Text),
            "int" => Ok(ColumnType::Int),
            "bigint" => Ok(ColumnType::BigInt),
            "boolean" => Ok(ColumnType::Boolean),
            "double" => Ok(ColumnType::Double),
            "blob" => Ok(ColumnType::Blob),
            "timestamp" => Ok(ColumnType::Timestamp),
            "uuid" | "timeuuid" => Ok(ColumnType::Uuid),
            "counter" => Ok(ColumnType::Counter),
            _ => Err(format!("unknown column type: {s}")),
        }
    }

    /// The canonical name of the type.
    pub fn name(&self) -> String {
        match self {
            ColumnType::Text => "text".into(),
            ColumnType::Int => "int".into(),
            ColumnType::BigInt => "bigint".into(),
            ColumnType::Boolean => "boolean".into(),
            ColumnType::Double => "double".into(),
            ColumnType::Blob => "blob".into(),
            ColumnType::Timestamp => "timestamp".into(),
            ColumnType::Uuid => "uuid".into(),
            ColumnType::Counter => "counter".into(),
            ColumnType::List(e) => format!("list<{}>", e.name()),
            ColumnType::Set(e) => format!("set<{}>", e.name()),
            ColumnType::Map(k, v) => format!("map<{},{}>", k.name(), v.name()),
            ColumnType::Tuple(elems) => {
                let names: Vec<_> = elems.iter().map(|e| e.name()).collect();
                format!("tuple<{}>", names.join(","))
            }
        }
    }

    /// Whether cells of this type are single atomic cells.
    pub fn is_atomic(&self) -> bool {
        !matches!(
            self,
            ColumnType::List(_) | ColumnType::Set(_) | ColumnType::Map(_, _) | ColumnType::Tuple(_)
        )
    }

    /// Whether this is the counter type.
    pub fn is_counter(&self) -> bool {
        matches!(self, ColumnType::Counter)
    }

    /// The type used to render collection element keys, if uniform.
    pub fn element_key_type(&self) -> Option<&ColumnType> {
        match self {
            ColumnType::Map(k, _) => Some(k),
            ColumnType::Set(e) => Some(e),
            ColumnType::List(_) => Some(&ColumnType::Uuid),
            _ => None,
        }
    }

    /// The type of collection element values.
    pub fn element_value_type(&self) -> Option<&ColumnType> {
        match self {
            ColumnType::Map(_, v) => Some(v),
            ColumnType::Set(_) => Some(&ColumnType::Blob),
            ColumnType::List(e) => Some(e),
            _ => None,
        }
    }

    /// Render a raw value into the dump's string form.
    pub fn render(&self, raw: &[u8]) -> Result<String, String> {
        match self {
            ColumnType::Text => String::from_utf8(raw.to_vec())
                .map_err(|_| "value is not valid utf-8".to_string()),
            ColumnType::Int => Ok(i32::from_be_bytes(
                raw.try_into().map_err(|_| "int value is not 4 bytes".to_string())?,
            )
            .to_string()),
            ColumnType::BigInt | ColumnType::Timestamp | ColumnType::Counter => {
                Ok(i64::from_be_bytes(
                    raw.try_into().map_err(|_| "bigint value is not 8 bytes".to_string())?,
                )
                .to_string())
            }
            ColumnType::Boolean => match raw {
                [0] => Ok("false".into()),
                [1] => Ok("true".into()),
                _ => Err("boolean value is not a single 0/1 byte".into()),
            },
            ColumnType::Double => {
                let bits: [u8; 8] =
                    raw.try_into().map_err(|_| "double value is not 8 bytes".to_string())?;
                Ok(format!("{}", f64::from_be_bytes(bits)))
            }
            ColumnType::Blob => Ok(format!("0x{}", crate::key::bytes_to_hex(raw))),
            ColumnType::Uuid => Uuid::from_slice(raw)
                .map(|u| u.to_string())
                .map_err(|_| "uuid value is not 16 bytes".to_string()),
            ColumnType::List(_) | ColumnType::Set(_) | ColumnType::Map(_, _) | ColumnType::Tuple(_) => {
                Err("multi-cell values have no scalar rendering".into())
            }
        }
    }

    /// Parse the dump's string form back into raw bytes.
    pub fn parse_value(&self, s: &str) -> Result<Vec<u8>, String> {
        match self {
            ColumnType::Text => Ok(s.as_bytes().to_vec()),
            ColumnType::Int => s
                .parse::<i32>()
                .map(|v| v.to_be_bytes().to_vec())
                .map_err(|e| format!("bad int value {s:?}: {e}")),
            ColumnType::BigInt | ColumnType::Timestamp | ColumnType::Counter => s
                .parse::<i64>()
                .map(|v| v.to_be_bytes().to_vec())
                .map_err(|e| format!("bad bigint value {s:?}: {e}")),
            ColumnType::Boolean => match s {
                "false" => Ok(vec![0]),
                "true" => Ok(vec![1]),
                _ => Err(format!("bad boolean value {s:?}")),
            },
            ColumnType::Double => s
                .parse::<f64>()
                .map(|v| v.to_be_bytes().to_vec())
                .map_err(|e| format!("bad double value {s:?}: {e}")),
            ColumnType::Blob => {
                let digits = s.strip_prefix("0x").ok_or_else(|| format!("bad blob value {s:?}"))?;
                crate::key::hex_to_bytes(digits).map_err(|e| format!("bad blob value {s:?}: {e}"))
            }
            ColumnType::Uuid => s
                .parse::<Uuid>()
                .map(|u| u.as_bytes().to_vec())
                .map_err(|e| format!("bad uuid value {s:?}: {e}")),
            ColumnType::List(_) | ColumnType::Set(_) | ColumnType::Map(_, _) | ColumnType::Tuple(_) => {
                Err("multi-cell values have no scalar parse".into())
            }
        }
    }

    /// Typed comparison of two raw values.
    pub fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        match self {
            ColumnType::Int => match (
                <[u8; 4]>::try_from(a).map(i32::from_be_bytes),
                <[u8; 4]>::try_from(b).map(i32::from_be_bytes),
            ) {
                (Ok(x), Ok(y)) => x.cmp(&y),
                _ => a.cmp(b),
            },
            ColumnType::BigInt | ColumnType::Timestamp | ColumnType::Counter => match (
                <[u8; 8]>::try_from(a).map(i64::from_be_bytes),
                <[u8; 8]>::try_from(b).map(i64::from_be_bytes),
            ) {
                (Ok(x), Ok(y)) => x.cmp(&y),
                _ => a.cmp(b),
            },
            ColumnType::Double => match (
                <[u8; 8]>::try_from(a).map(f64::from_be_bytes),
                <[u8; 8]>::try_from(b).map(f64::from_be_bytes),
            ) {
                (Ok(x), Ok(y)) => x.partial_cmp(&y).unwrap_or_else(|| a.cmp(b)),
                _ => a.cmp(b),
            },
            _ => a.cmp(b),
        }
    }
}

fn split_type_args(s: &str) -> Option<(&str, &str)> {
    let mut depth = 0usize;
    for (i, c) in s.char_indices() {
        match c {
            '<' => depth += 1,
            '>' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => return Some((&s[..i], &s[i + 1..])),
            _ => {}
        }
    }
    None
}

/// A single column definition.
#[derive(Debug, Clone)]
pub struct ColumnDef {
    /// Column name.
    pub name: String,
    /// Which group the column belongs to.
    pub kind: ColumnKind,
    /// Position within its group.
    pub id: u32,
    /// Value type.
    pub ty: ColumnType,
    /// Sort direction; only meaningful for clustering-key components.
    pub order: SortOrder,
}

/// The logical table schema the tool interprets sstables against.
#[derive(Debug, Clone)]
pub struct Schema {
    keyspace: String,
    table: String,
    partition_key: Vec<ColumnDef>,
    clustering_key: Vec<ColumnDef>,
    static_columns: Vec<ColumnDef>,
    regular_columns: Vec<ColumnDef>,
}

impl Schema {
    /// Assemble a schema from its column groups.
    pub fn new(
        keyspace: impl Into<String>,
        table: impl Into<String>,
        partition_key: Vec<(String, ColumnType)>,
        clustering_key: Vec<(String, ColumnType, SortOrder)>,
        static_columns: Vec<(String, ColumnType)>,
        regular_columns: Vec<(String, ColumnType)>,
    ) -> Self {
        let make = |kind, cols: Vec<(String, ColumnType)>| {
            cols.into_iter()
                .enumerate()
                .map(|(id, (name, ty))| ColumnDef {
                    name,
                    kind,
                    id: id as u32,
                    ty,
                    order: SortOrder::Ascending,
                })
                .collect::<Vec<_>>()
        };
        Self {
            keyspace: keyspace.into(),
            table: table.into(),
            partition_key: make(ColumnKind::PartitionKey, partition_key),
            clustering_key: clustering_key
                .into_iter()
                .enumerate()
                .map(|(id, (name, ty, order))| ColumnDef {
                    name,
                    kind: ColumnKind::ClusteringKey,
                    id: id as u32,
                    ty,
                    order,
                })
                .collect(),
            static_columns: make(ColumnKind::Static, static_columns),
            regular_columns: make(ColumnKind::Regular, regular_columns),
        }
    }

    /// Keyspace name.
    pub fn keyspace(&self) -> &str {
        &self.keyspace
    }

    /// Table name.
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Partition-key component definitions.
    pub fn partition_key_columns(&self) -> &[ColumnDef] {
        &self.partition_key
    }

    /// Clustering-key component definitions.
    pub fn clustering_key_columns(&self) -> &[ColumnDef] {
        &self.clustering_key
    }

    /// Static column definitions.
    pub fn static_columns(&self) -> &[ColumnDef] {
        &self.static_columns
    }

    /// Regular column definitions.
    pub fn regular_columns(&self) -> &[ColumnDef] {
        &self.regular_columns
    }

    /// Look up a static or regular column by id.
    pub fn column(&self, kind: ColumnKind, id: u32) -> Option<&ColumnDef> {
        let group = match kind {
            ColumnKind::Static => &self.static_columns,
            ColumnKind::Regular => &self.regular_columns,
            _ => return None,
        };
        group.get(id as usize)
    }

    /// Look up a static or regular column by name.
    pub fn column_by_name(&self, name: &str) -> Option<&ColumnDef> {
        self.static_columns
            .iter()
            .chain(self.regular_columns.iter())
            .find(|c| c.name == name)
    }

    /// Derive the token of a partition key.
    pub fn token_of(&self, key: &PartitionKey) -> i64 {
        xxh3_64(&key.to_bytes()) as i64
    }

    /// Decorate a partition key with its token.
    pub fn decorate(&self, key: PartitionKey) -> DecoratedKey {
        DecoratedKey {
            token: self.token_of(&key),
            key,
        }
    }

    /// Type-check a partition key against the declared components.
    pub fn check_partition_key(&self, key: &PartitionKey) -> Result<(), String> {
        if key.components().len() != self.partition_key.len() {
            return Err(format!(
                "partition key has {} component(s), schema declares {}",
                key.components().len(),
                self.partition_key.len()
            ));
        }
        Ok(())
    }

    /// Render a partition key's component values for display.
    pub fn render_partition_key(&self, key: &PartitionKey) -> String {
        render_components(key.components(), &self.partition_key)
    }

    /// Render a clustering prefix's component values for display.
    pub fn render_clustering_key(&self, key: &ClusteringKey) -> String {
        render_components(key.components(), &self.clustering_key)
    }

    /// Compare two clustering prefixes component-wise, honouring per-column
    /// sort direction. A strict prefix compares equal to its extensions here;
    /// bound weights break such ties at the position level.
    pub fn compare_clustering_prefix(&self, a: &ClusteringKey, b: &ClusteringKey) -> Ordering {
        for (i, def) in self.clustering_key.iter().enumerate() {
            match (a.components().get(i), b.components().get(i)) {
                (Some(x), Some(y)) => {
                    let ord = def.ty.compare(x, y);
                    let ord = match def.order {
                        SortOrder::Ascending => ord,
                        SortOrder::Descending => ord.reverse(),
                    };
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                (None, None) => return Ordering::Equal,
                (None, Some(_)) | (Some(_), None) => return Ordering::Equal,
            }
        }
        Ordering::Equal
    }
}

fn render_components(components: &[Vec<u8>], defs: &[ColumnDef]) -> String {
    let mut parts = Vec::with_capacity(components.len());
    for (i, c) in components.iter().enumerate() {
        match defs.get(i) {
            Some(def) => match def.ty.render(c) {
                Ok(s) => parts.push(s),
                Err(_) => parts.push(format!("0x{}", crate::key::bytes_to_hex(c))),
            },
            None => parts.push(format!("0x{}", crate::key::bytes_to_hex(c))),
        }
    }
    parts.join(", ")
}

#[derive(Deserialize)]
struct ColumnDoc {
    name: String,
    #[serde(rename = "type")]
    ty: String,
    #[serde(default)]
    order: SortOrder,
}

#[derive(Deserialize)]
struct SchemaDoc {
    keyspace: String,
    table: String,
    partition_key: Vec<ColumnDoc>,
    #[serde(default)]
    clustering_key: Vec<ColumnDoc>,
    #[serde(default)]
    static_columns: Vec<ColumnDoc>,
    #[serde(default)]
    regular_columns: Vec<ColumnDoc>,
}

fn schema_error(source_name: &'static str, path: &str, cause: impl fmt::Display) -> Error {
    Error::Schema {
        source_name,
        path: path.to_string(),
        cause: cause.to_string(),
    }
}

/// Load a schema from a schema description file (a JSON document naming the
/// keyspace, table and the four column groups).
pub async fn load_schema_file(path: &Path) -> Result<Schema> {
    let display = path.display().to_string();
    let raw = tokio::fs::read(path)
        .await
        .map_err(|e| schema_error("schema-file", &display, e))?;
    let doc: SchemaDoc =
        serde_json::from_slice(&raw).map_err(|e| schema_error("schema-file", &display, e))?;
    build_schema(doc).map_err(|e| schema_error("schema-file", &display, e))
}

fn build_schema(doc: SchemaDoc) -> Result<Schema, String> {
    if doc.partition_key.is_empty() {
        return Err("schema declares no partition key".into());
    }
    let scalars = |cols: Vec<ColumnDoc>| -> Result<Vec<(String, ColumnType)>, String> {
        cols.into_iter()
            .map(|c| Ok((c.name, ColumnType::parse(&c.ty)?)))
            .collect()
    };
    let clustering = doc
        .clustering_key
        .into_iter()
        .map(|c| Ok((c.name.clone(), ColumnType::parse(&c.ty)?, c.order)))
        .collect::<Result<Vec<_>, String>>()?;
    Ok(Schema::new(
        doc.keyspace,
        doc.table,
        scalars(doc.partition_key)?,
        clustering,
        scalars(doc.static_columns)?,
        scalars(doc.regular_columns)?,
    ))
}

/// Load one of the built-in system-table schemas, addressed as
/// `keyspace.table`.
pub fn load_system_schema(name: &str) -> Result<Schema> {
    let Some((ks, cf)) = name.split_once('.') else {
        return Err(schema_error(
            "system-schema",
            name,
            "expected `keyspace.table` notation",
        ));
    };
    match (ks, cf) {
        ("system", "local") => Ok(Schema::new(
            "system",
            "local",
            vec![("key".into(), ColumnType::Text)],
            vec![],
            vec![],
            vec![
                ("bootstrapped".into(), ColumnType::Text),
                ("cluster_name".into(), ColumnType::Text),
                ("data_center".into(), ColumnType::Text),
                ("host_id".into(), ColumnType::Uuid),
                ("rack".into(), ColumnType::Text),
                ("release_version".into(), ColumnType::Text),
            ],
        )),
        ("system", "peers") => Ok(Schema::new(
            "system",
            "peers",
            vec![("peer".into(), ColumnType::Text)],
            vec![],
            vec![],
            vec![
                ("data_center".into(), ColumnType::Text),
                ("host_id".into(), ColumnType::Uuid),
                ("rack".into(), ColumnType::Text),
                ("release_version".into(), ColumnType::Text),
                ("schema_version".into(), ColumnType::Uuid),
            ],
        )),
        ("system_schema", "columns") => Ok(Schema::new(
            "system_schema",
            "columns",
            vec![("keyspace_name".into(), ColumnType::Text)],
            vec![
                ("table_name".into(), ColumnType::Text, SortOrder::Ascending),
                ("column_name".into(), ColumnType::Text, SortOrder::Ascending),
            ],
            vec![],
            vec![
                ("clustering_order".into(), ColumnType::Text),
                ("column_name_bytes".into(), ColumnType::Blob),
                ("kind".into(), ColumnType::Text),
                ("position".into(), ColumnType::Int),
                ("type".into(), ColumnType::Text),
            ],
        )),
        _ => Err(schema_error(
            "system-schema",
            name,
            "not a known system table",
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_parse_and_name() {
        let ty = ColumnType::parse("map<int,text>").unwrap();
        assert_eq!(
            ty,
            ColumnType::Map(Box::new(ColumnType::Int), Box::new(ColumnType::Text))
        );
        assert_eq!(ty.name(), "map<int,text>");
        assert!(!ty.is_atomic());
        assert!(ColumnType::parse("frozen<gunk>").is_err());
    }

    #[test]
    fn scalar_render_parse_round_trip() {
        let cases: Vec<(ColumnType, &str)> = vec![
            (ColumnType::Text, "hello"),
            (ColumnType::Int, "-42"),
            (ColumnType::BigInt, "123456789012"),
            (ColumnType::Boolean, "true"),
            (ColumnType::Double, "1.5"),
            (ColumnType::Blob, "0xdeadbeef"),
            (ColumnType::Uuid, "6f9619ff-8b86-d011-b42d-00c04fc964ff"),
        ];
        for (ty, text) in cases {
            let raw = ty.parse_value(text).unwrap();
            assert_eq!(ty.render(&raw).unwrap(), text, "type {}", ty.name());
        }
    }

    #[test]
    fn typed_compare_uses_numeric_order() {
        let ty = ColumnType::Int;
        let neg = ty.parse_value("-1").unwrap();
        let pos = ty.parse_value("1").unwrap();
        assert_eq!(ty.compare(&neg, &pos), Ordering::Less);
        // Raw byte order would say otherwise: sign bit makes -1 larger.
        assert_eq!(neg.cmp(&pos), Ordering::Greater);
    }

    #[test]
    fn token_is_deterministic() {
        let schema = crate::test_support::test_schema();
        let key = PartitionKey::from_components(vec![b"k".to_vec()]);
        assert_eq!(schema.token_of(&key), schema.token_of(&key));
    }

    #[test]
    fn descending_clustering_reverses_order() {
        let schema = Schema::new(
            "ks",
            "cf",
            vec![("pk".into(), ColumnType::Int)],
            vec![("ck".into(), ColumnType::Int, SortOrder::Descending)],
            vec![],
            vec![],
        );
        let one = ClusteringKey::from_components(vec![1i32.to_be_bytes().to_vec()]);
        let two = ClusteringKey::from_components(vec![2i32.to_be_bytes().to_vec()]);
        assert_eq!(schema.compare_clustering_prefix(&two, &one), Ordering::Less);
    }
}
