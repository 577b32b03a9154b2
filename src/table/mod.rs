//! Metric table: ordered write handles into a metric set.
//!
//! The table registers the housekeeping metrics followed by every schema
//! entry, in schema order, and keeps the returned handles. Slot `i` of the
//! table is the destination for the `i`-th data line of a sampling pass.

use std::collections::HashMap;
use std::sync::Arc;

use crate::metric_set::{MetricHandle, MetricKind, MetricSet};
use crate::pid;
use crate::sampler::error::SamplerError;
use crate::schema::{Schema, COMPONENT_ID, GENERATION, HOUSEKEEPING_COUNT, PID, TID};

pub struct MetricTable {
    set: Arc<MetricSet>,
    component_id: MetricHandle,
    generation: MetricHandle,
    pid: MetricHandle,
    tid: MetricHandle,
    slots: Vec<MetricHandle>,
    index: Option<HashMap<String, usize>>,
}

impl std::fmt::Debug for MetricTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricTable")
            .field("set", &self.set.name())
            .field("slots", &self.slots.len())
            .field("indexed", &self.index.is_some())
            .finish()
    }
}

impl MetricTable {
    /// Register housekeeping and schema metrics into `set`.
    ///
    /// Takes ownership of the set so a failed registration releases it in
    /// full. Housekeeping values are initialized: component id as given,
    /// generation zero, pid and tid of the caller.
    pub fn build(
        schema: &Schema,
        mut set: MetricSet,
        component_id: u64,
        with_index: bool,
    ) -> Result<Self, SamplerError> {
        let component_id_handle = register(&mut set, COMPONENT_ID)?;
        let generation = register(&mut set, GENERATION)?;
        let pid_handle = register(&mut set, PID)?;
        let tid_handle = register(&mut set, TID)?;

        let mut slots = Vec::with_capacity(schema.len());
        for metric in schema.iter() {
            let handle = set
                .add_metric(&metric.name, metric.kind)
                .map_err(|source| SamplerError::Allocation { source })?;
            slots.push(handle);
        }

        set.set_u64(component_id_handle, component_id);
        set.set_u64(generation, 0);
        set.set_u64(pid_handle, pid::current_pid());
        set.set_u64(tid_handle, pid::current_tid());

        let index = with_index.then(|| {
            schema
                .names()
                .enumerate()
                .map(|(i, name)| (name.to_string(), i))
                .collect()
        });

        Ok(Self {
            set: Arc::new(set),
            component_id: component_id_handle,
            generation,
            pid: pid_handle,
            tid: tid_handle,
            slots,
            index,
        })
    }

    pub fn set(&self) -> &Arc<MetricSet> {
        &self.set
    }

    /// Total handles, housekeeping included.
    pub fn len(&self) -> usize {
        self.slots.len() + HOUSEKEEPING_COUNT
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of schema-derived slots.
    pub fn schema_len(&self) -> usize {
        self.slots.len()
    }

    /// Slot for `name`, when the table was built with a name index.
    pub fn slot_of(&self, name: &str) -> Option<usize> {
        self.index.as_ref()?.get(name).copied()
    }

    pub fn is_indexed(&self) -> bool {
        self.index.is_some()
    }

    #[inline]
    pub fn write_slot(&self, slot: usize, value: u64) {
        if let Some(&handle) = self.slots.get(slot) {
            self.set.set_u64(handle, value);
        }
    }

    pub fn read_slot(&self, slot: usize) -> Option<u64> {
        self.slots
            .get(slot)
            .and_then(|&handle| self.set.get_u64(handle))
    }

    pub fn write_component_id(&self, value: u64) {
        self.set.set_u64(self.component_id, value);
    }

    pub fn write_generation(&self, value: u64) {
        self.set.set_u64(self.generation, value);
    }

    pub fn write_pid(&self, value: u64) {
        self.set.set_u64(self.pid, value);
    }

    pub fn write_tid(&self, value: u64) {
        self.set.set_u64(self.tid, value);
    }

    pub fn generation(&self) -> u64 {
        self.set.get_u64(self.generation).unwrap_or(0)
    }
}

fn register(set: &mut MetricSet, name: &str) -> Result<MetricHandle, SamplerError> {
    set.add_metric(name, MetricKind::U64)
        .map_err(|source| SamplerError::Allocation { source })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metric_set::{HeapStorage, MetricSize, MetricStorage};
    use crate::schema::{discover, HOUSEKEEPING_METRICS};
    use crate::source::MemorySource;

    fn discovered(text: &str) -> (Schema, MetricSize) {
        let mut src = MemorySource::new(text);
        let d = discover(&mut src, &HeapStorage).unwrap();
        (d.schema, d.size)
    }

    #[test]
    fn test_build_registration_order() {
        let (schema, size) = discovered("nr_free_pages 12345\nnr_alloc_batch 7\n");
        let set = HeapStorage.create_set("test", size).unwrap();
        let table = MetricTable::build(&schema, set, 42, false).unwrap();

        assert_eq!(table.len(), schema.len() + 4);
        let names: Vec<_> = table.set().metric_names().collect();
        let mut expected: Vec<&str> = HOUSEKEEPING_METRICS.to_vec();
        expected.extend(["nr_free_pages", "nr_alloc_batch"]);
        assert_eq!(names, expected);
    }

    #[test]
    fn test_build_initializes_housekeeping() {
        let (schema, size) = discovered("a 1\n");
        let set = HeapStorage.create_set("test", size).unwrap();
        let table = MetricTable::build(&schema, set, 42, false).unwrap();

        let set = table.set();
        assert_eq!(set.value_of(COMPONENT_ID), Some(42));
        assert_eq!(set.value_of(GENERATION), Some(0));
        assert_eq!(set.value_of(PID), Some(pid::current_pid()));
        assert_eq!(set.value_of(TID), Some(pid::current_tid()));
        assert_eq!(table.read_slot(0), Some(0));
    }

    #[test]
    fn test_build_fails_when_set_too_small() {
        let (schema, mut size) = discovered("a 1\nb 2\n");
        size.data -= 8;
        let set = HeapStorage.create_set("test", size).unwrap();

        let err = MetricTable::build(&schema, set, 0, false).unwrap_err();
        assert!(matches!(err, SamplerError::Allocation { .. }));
    }

    #[test]
    fn test_name_index() {
        let (schema, size) = discovered("a 1\nb 2\n");
        let set = HeapStorage.create_set("test", size).unwrap();
        let table = MetricTable::build(&schema, set, 0, true).unwrap();

        assert!(table.is_indexed());
        assert_eq!(table.slot_of("a"), Some(0));
        assert_eq!(table.slot_of("b"), Some(1));
        assert_eq!(table.slot_of("pid"), None);
    }

    #[test]
    fn test_positional_table_has_no_index() {
        let (schema, size) = discovered("a 1\n");
        let set = HeapStorage.create_set("test", size).unwrap();
        let table = MetricTable::build(&schema, set, 0, false).unwrap();
        assert_eq!(table.slot_of("a"), None);
    }

    #[test]
    fn test_write_slots() {
        let (schema, size) = discovered("a 1\nb 2\n");
        let set = HeapStorage.create_set("test", size).unwrap();
        let table = MetricTable::build(&schema, set, 0, false).unwrap();

        table.write_slot(1, 99);
        table.write_slot(5, 1);
        table.write_generation(3);

        assert_eq!(table.read_slot(0), Some(0));
        assert_eq!(table.read_slot(1), Some(99));
        assert_eq!(table.read_slot(5), None);
        assert_eq!(table.generation(), 3);
    }
}
