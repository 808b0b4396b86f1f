//! Tombstones, row markers and expiration bundles.

/// A deletion marker: write timestamp in microseconds plus the wall-clock
/// deletion time in epoch seconds.
///
/// The derived ordering (timestamp first, then deletion time) is also the
/// reconciliation rule: when two tombstones cover the same data the greater
/// one wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Tombstone {
    /// Write timestamp, microseconds since the epoch.
    pub timestamp: i64,
    /// Deletion wall-clock time, seconds since the epoch.
    pub deletion_time: i64,
}

/// Merge two optional tombstones, keeping the greater.
pub fn merge_tombstones(a: Option<Tombstone>, b: Option<Tombstone>) -> Option<Tombstone> {
    match (a, b) {
        (Some(x), Some(y)) => Some(x.max(y)),
        (x, None) => x,
        (None, y) => y,
    }
}

/// A clustering row's deletion state: a regular tombstone plus an optional
/// shadowable one. The shadowable component only applies while no live data
/// with a higher timestamp exists.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RowTombstone {
    /// The unconditional component.
    pub regular: Option<Tombstone>,
    /// The shadowable component.
    pub shadowable: Option<Tombstone>,
}

impl RowTombstone {
    /// True when neither component is set.
    pub fn is_none(&self) -> bool {
        self.regular.is_none() && self.shadowable.is_none()
    }

    /// The effective tombstone, whichever component is greater.
    pub fn effective(&self) -> Option<Tombstone> {
        merge_tombstones(self.regular, self.shadowable)
    }

    /// Reconcile two row tombstones component-wise.
    pub fn merge(a: RowTombstone, b: RowTombstone) -> RowTombstone {
        RowTombstone {
            regular: merge_tombstones(a.regular, b.regular),
            shadowable: merge_tombstones(a.shadowable, b.shadowable),
        }
    }
}

/// TTL plus the wall-clock expiry it resolves to. The two travel together:
/// a cell or marker either has both or neither.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Expiration {
    /// Time-to-live in seconds.
    pub ttl: u64,
    /// Expiry wall-clock time, seconds since the epoch.
    pub expiry: i64,
}

/// A clustering row's liveness marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowMarker {
    /// Write timestamp, microseconds since the epoch.
    pub timestamp: i64,
    /// Present when the marker expires.
    pub expiration: Option<Expiration>,
}

impl RowMarker {
    /// Reconcile two markers: the higher write timestamp wins.
    pub fn merge(a: RowMarker, b: RowMarker) -> RowMarker {
        if b.timestamp > a.timestamp {
            b
        } else {
            a
        }
    }
}
