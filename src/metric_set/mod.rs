//! Fixed-layout metric storage.
//!
//! A [`MetricSet`] is created once with an exact size budget computed from
//! the discovered schema and is never resized. Metrics are registered into it
//! in order, each registration returning a [`MetricHandle`] that later writes
//! go through. Values live in `AtomicU64` slots so remote readers can observe
//! them concurrently without locking; each update is a single atomic store.

use std::ops::{Add, AddAssign};
use std::sync::atomic::{AtomicU64, Ordering};

use thiserror::Error;

/// Fixed per-metric descriptor overhead in the metadata region, in bytes.
pub const METRIC_DESC_SIZE: usize = 24;

const ALIGN: usize = 8;

/// Value type of a registered metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    U64,
}

impl MetricKind {
    /// Width of one value in the data region.
    pub const fn width(self) -> usize {
        match self {
            Self::U64 => 8,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::U64 => "u64",
        }
    }
}

/// Storage footprint split into the two size classes a set is created with.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricSize {
    /// Structural overhead: descriptors and names.
    pub meta: usize,
    /// Per-sample value storage.
    pub data: usize,
}

impl MetricSize {
    fn fits_within(self, capacity: MetricSize) -> bool {
        self.meta <= capacity.meta && self.data <= capacity.data
    }
}

impl Add for MetricSize {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self {
            meta: self.meta.saturating_add(rhs.meta),
            data: self.data.saturating_add(rhs.data),
        }
    }
}

impl AddAssign for MetricSize {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

/// Errors from sizing, creating, or populating a metric set.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    #[error("invalid metric name {name:?}")]
    InvalidName { name: String },

    #[error("invalid metric set name {name:?}")]
    InvalidSetName { name: String },

    #[error("metric set {set:?} has no room for {name:?}")]
    SetFull { set: String, name: String },
}

/// Storage collaborator: sizes metrics and allocates sets.
pub trait MetricStorage: Send {
    /// Size contribution of a single metric.
    fn metric_size(&self, name: &str, kind: MetricKind) -> Result<MetricSize, StorageError>;

    /// Allocate an empty set with exactly `size` capacity.
    fn create_set(&self, name: &str, size: MetricSize) -> Result<MetricSet, StorageError>;
}

/// Process-local heap storage.
#[derive(Debug, Default, Clone, Copy)]
pub struct HeapStorage;

impl MetricStorage for HeapStorage {
    fn metric_size(&self, name: &str, kind: MetricKind) -> Result<MetricSize, StorageError> {
        descriptor_size(name, kind)
    }

    fn create_set(&self, name: &str, size: MetricSize) -> Result<MetricSet, StorageError> {
        if name.is_empty() || name.chars().any(char::is_whitespace) {
            return Err(StorageError::InvalidSetName {
                name: name.to_string(),
            });
        }

        Ok(MetricSet::with_capacity(name, size))
    }
}

/// Footprint of one metric in the fixed layout.
pub fn descriptor_size(name: &str, kind: MetricKind) -> Result<MetricSize, StorageError> {
    if name.is_empty() || name.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(StorageError::InvalidName {
            name: name.to_string(),
        });
    }

    Ok(MetricSize {
        meta: METRIC_DESC_SIZE + align_up(name.len() + 1),
        data: align_up(kind.width()),
    })
}

const fn align_up(n: usize) -> usize {
    (n + ALIGN - 1) & !(ALIGN - 1)
}

/// Write capability for one slot of a [`MetricSet`].
///
/// Handles do not own storage; they are only meaningful for the set that
/// issued them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MetricHandle(u32);

impl MetricHandle {
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// A named, fixed-capacity collection of metrics.
pub struct MetricSet {
    name: String,
    capacity: MetricSize,
    used: MetricSize,
    names: Vec<String>,
    kinds: Vec<MetricKind>,
    values: Vec<AtomicU64>,
}

impl std::fmt::Debug for MetricSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricSet")
            .field("name", &self.name)
            .field("metrics", &self.values.len())
            .field("capacity", &self.capacity)
            .field("used", &self.used)
            .finish()
    }
}

impl MetricSet {
    fn with_capacity(name: &str, capacity: MetricSize) -> Self {
        let slots = capacity.data / ALIGN;

        Self {
            name: name.to_string(),
            capacity,
            used: MetricSize::default(),
            names: Vec::with_capacity(slots),
            kinds: Vec::with_capacity(slots),
            values: Vec::with_capacity(slots),
        }
    }

    /// Register a metric, consuming its footprint from the set's capacity.
    pub fn add_metric(
        &mut self,
        name: &str,
        kind: MetricKind,
    ) -> Result<MetricHandle, StorageError> {
        let size = descriptor_size(name, kind)?;
        let used = self.used + size;

        let index = u32::try_from(self.values.len()).ok();
        let index = match index {
            Some(i) if used.fits_within(self.capacity) => i,
            _ => {
                return Err(StorageError::SetFull {
                    set: self.name.clone(),
                    name: name.to_string(),
                })
            }
        };

        self.used = used;
        self.names.push(name.to_string());
        self.kinds.push(kind);
        self.values.push(AtomicU64::new(0));

        Ok(MetricHandle(index))
    }

    /// Store a value. Handles from another set are ignored.
    #[inline]
    pub fn set_u64(&self, handle: MetricHandle, value: u64) {
        if let Some(slot) = self.values.get(handle.index()) {
            slot.store(value, Ordering::Relaxed);
        }
    }

    pub fn get_u64(&self, handle: MetricHandle) -> Option<u64> {
        self.values
            .get(handle.index())
            .map(|slot| slot.load(Ordering::Relaxed))
    }

    /// Look up a value by metric name (linear scan, reader side only).
    pub fn value_of(&self, name: &str) -> Option<u64> {
        self.names
            .iter()
            .position(|n| n == name)
            .and_then(|i| self.values.get(i))
            .map(|slot| slot.load(Ordering::Relaxed))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn capacity(&self) -> MetricSize {
        self.capacity
    }

    pub fn used(&self) -> MetricSize {
        self.used
    }

    pub fn metric_names(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }

    pub fn kind_of(&self, handle: MetricHandle) -> Option<MetricKind> {
        self.kinds.get(handle.index()).copied()
    }

    /// Current `(name, value)` pairs in registration order.
    ///
    /// Each value is read atomically; the snapshot as a whole is not.
    pub fn snapshot(&self) -> Vec<(&str, u64)> {
        self.names
            .iter()
            .zip(self.values.iter())
            .map(|(n, v)| (n.as_str(), v.load(Ordering::Relaxed)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sized_for(names: &[&str]) -> MetricSize {
        names.iter().fold(MetricSize::default(), |acc, n| {
            acc + descriptor_size(n, MetricKind::U64).unwrap()
        })
    }

    #[test]
    fn test_descriptor_size_alignment() {
        let size = descriptor_size("pid", MetricKind::U64).unwrap();
        assert_eq!(size.meta, METRIC_DESC_SIZE + 8);
        assert_eq!(size.data, 8);

        let size = descriptor_size("nr_free_pages", MetricKind::U64).unwrap();
        assert_eq!(size.meta, METRIC_DESC_SIZE + 16);
        assert_eq!(size.data, 8);
    }

    #[test]
    fn test_descriptor_size_rejects_bad_names() {
        for name in ["", "has space", "tab\tbed", "nl\n"] {
            assert!(
                matches!(
                    descriptor_size(name, MetricKind::U64),
                    Err(StorageError::InvalidName { .. })
                ),
                "{name:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_create_set_rejects_bad_name() {
        let err = HeapStorage.create_set("", MetricSize::default()).unwrap_err();
        assert!(matches!(err, StorageError::InvalidSetName { .. }));
    }

    #[test]
    fn test_add_metric_within_capacity() {
        let names = ["a", "b", "c"];
        let mut set = HeapStorage.create_set("test", sized_for(&names)).unwrap();

        let handles: Vec<_> = names
            .iter()
            .map(|n| set.add_metric(n, MetricKind::U64).unwrap())
            .collect();

        assert_eq!(set.len(), 3);
        assert_eq!(set.used(), set.capacity());
        assert_eq!(handles[2].index(), 2);
        assert_eq!(set.kind_of(handles[0]), Some(MetricKind::U64));
    }

    #[test]
    fn test_add_metric_past_capacity_fails() {
        let mut set = HeapStorage.create_set("test", sized_for(&["a"])).unwrap();
        set.add_metric("a", MetricKind::U64).unwrap();

        let err = set.add_metric("b", MetricKind::U64).unwrap_err();
        assert_eq!(
            err,
            StorageError::SetFull {
                set: "test".to_string(),
                name: "b".to_string(),
            }
        );
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_set_and_read_values() {
        let mut set = HeapStorage
            .create_set("test", sized_for(&["x", "y"]))
            .unwrap();
        let x = set.add_metric("x", MetricKind::U64).unwrap();
        let y = set.add_metric("y", MetricKind::U64).unwrap();

        set.set_u64(x, 7);
        set.set_u64(y, u64::MAX);

        assert_eq!(set.get_u64(x), Some(7));
        assert_eq!(set.value_of("y"), Some(u64::MAX));
        assert_eq!(set.value_of("z"), None);
        assert_eq!(set.snapshot(), vec![("x", 7), ("y", u64::MAX)]);
    }

    #[test]
    fn test_foreign_handle_is_ignored() {
        let mut big = HeapStorage
            .create_set("big", sized_for(&["a", "b"]))
            .unwrap();
        big.add_metric("a", MetricKind::U64).unwrap();
        let b = big.add_metric("b", MetricKind::U64).unwrap();

        let mut small = HeapStorage.create_set("small", sized_for(&["a"])).unwrap();
        small.add_metric("a", MetricKind::U64).unwrap();

        small.set_u64(b, 99);
        assert_eq!(small.get_u64(b), None);
        assert_eq!(small.snapshot(), vec![("a", 0)]);
    }
}
