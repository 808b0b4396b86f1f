//! Positions in the clustering order.

use std::cmp::Ordering;

use crate::key::ClusteringKey;
use crate::schema::Schema;

/// Where a position sits relative to rows sharing its clustering prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i8)]
pub enum BoundWeight {
    /// Before every row whose key extends the prefix.
    BeforeAll = -1,
    /// Exactly at the row with this key.
    Equal = 0,
    /// After every row whose key extends the prefix.
    AfterAll = 1,
}

impl BoundWeight {
    /// The numeric form used by the structured dump.
    pub fn as_i8(self) -> i8 {
        self as i8
    }

    /// Parse the numeric form.
    pub fn from_i8(v: i8) -> Option<Self> {
        match v {
            -1 => Some(BoundWeight::BeforeAll),
            0 => Some(BoundWeight::Equal),
            1 => Some(BoundWeight::AfterAll),
            _ => None,
        }
    }
}

/// A point in a partition's clustering order: a clustering prefix plus a
/// bound weight.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Position {
    /// The clustering prefix; may be empty (the whole partition).
    pub key: ClusteringKey,
    /// Placement relative to rows extending the prefix.
    pub weight: BoundWeight,
}

impl Position {
    /// The position of the row with the given key.
    pub fn for_row(key: ClusteringKey) -> Self {
        Position {
            key,
            weight: BoundWeight::Equal,
        }
    }

    /// A bound before or after all rows extending `key`.
    pub fn bound(key: ClusteringKey, weight: BoundWeight) -> Self {
        Position { key, weight }
    }

    /// Total order over positions within one partition, per the schema's
    /// clustering comparator. A strict prefix with equal weight sorts before
    /// its extensions.
    pub fn compare(schema: &Schema, a: &Position, b: &Position) -> Ordering {
        let prefix = schema.compare_clustering_prefix(&a.key, &b.key);
        if prefix != Ordering::Equal {
            return prefix;
        }
        let la = a.key.components().len();
        let lb = b.key.components().len();
        match la.cmp(&lb) {
            Ordering::Equal => a.weight.as_i8().cmp(&b.weight.as_i8()),
            Ordering::Less => match a.weight {
                BoundWeight::AfterAll => Ordering::Greater,
                _ => Ordering::Less,
            },
            Ordering::Greater => match b.weight {
                BoundWeight::AfterAll => Ordering::Less,
                _ => Ordering::Greater,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ColumnType, Schema, SortOrder};

    fn schema() -> Schema {
        Schema::new(
            "ks",
            "cf",
            vec![("pk".into(), ColumnType::Int)],
            vec![("ck".into(), ColumnType::Int, SortOrder::Ascending)],
            vec![],
            vec![],
        )
    }

    fn ck(v: i32) -> ClusteringKey {
        ClusteringKey::from_components(vec![v.to_be_bytes().to_vec()])
    }

    #[test]
    fn weights_order_around_a_row() {
        let s = schema();
        let row = Position::for_row(ck(5));
        let before = Position::bound(ck(5), BoundWeight::BeforeAll);
        let after = Position::bound(ck(5), BoundWeight::AfterAll);
        assert_eq!(Position::compare(&s, &before, &row), Ordering::Less);
        assert_eq!(Position::compare(&s, &row, &after), Ordering::Less);
        assert_eq!(Position::compare(&s, &before, &after), Ordering::Less);
    }

    #[test]
    fn empty_prefix_bounds_cover_the_partition() {
        let s = schema();
        let open = Position::bound(ClusteringKey::empty(), BoundWeight::BeforeAll);
        let close = Position::bound(ClusteringKey::empty(), BoundWeight::AfterAll);
        let row = Position::for_row(ck(0));
        assert_eq!(Position::compare(&s, &open, &row), Ordering::Less);
        assert_eq!(Position::compare(&s, &row, &close), Ordering::Less);
    }
}
