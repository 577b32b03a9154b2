use std::alloc::System;
use std::fmt::Write as _;
use std::hint::black_box;

use serial_test::serial;
use stats_alloc::{Region, StatsAlloc, INSTRUMENTED_SYSTEM};
use vmsampler::metric_set::HeapStorage;
use vmsampler::sampler::{PluginOptions, Sampler, VmstatSampler};
use vmsampler::source::parse::parse_line;
use vmsampler::source::{FileSource, MemorySource};

#[global_allocator]
static GLOBAL: &StatsAlloc<System> = &INSTRUMENTED_SYSTEM;

fn vmstat_text(metrics: usize) -> String {
    let mut text = String::with_capacity(metrics * 32);
    for i in 0..metrics {
        let _ = writeln!(text, "nr_counter_{i} {}", 1_000_000 + i * 7919);
    }
    text
}

fn measure_alloc_counts<T>(f: impl FnOnce() -> T) -> (T, usize, usize) {
    // Calibrate for ambient allocator activity in the test harness process.
    let idle_region = Region::new(&GLOBAL);
    black_box(());
    let idle = idle_region.change();

    let region = Region::new(&GLOBAL);
    let output = f();
    let used = region.change();

    let allocations = used.allocations.saturating_sub(idle.allocations);
    let deallocations = used.deallocations.saturating_sub(idle.deallocations);
    (output, allocations, deallocations)
}

fn configured(text: &str, check: &str) -> VmstatSampler<MemorySource, HeapStorage> {
    let mut sampler = VmstatSampler::new(MemorySource::new(text), HeapStorage);
    let opts = PluginOptions::parse(&format!("set=alloc-test schema_check={check}"))
        .expect("options");
    sampler.config(&opts).expect("configure");
    sampler
}

#[test]
#[serial]
fn parse_line_allocates_zero() {
    let (_parsed, allocations, deallocations) = measure_alloc_counts(|| {
        for _ in 0..1024 {
            black_box(parse_line(black_box("nr_free_pages 1234567\n")).expect("parse"));
        }
    });

    assert!(
        allocations <= 8,
        "parse allocation budget exceeded: {}",
        allocations
    );
    assert!(
        deallocations <= 8,
        "parse deallocation budget exceeded: {}",
        deallocations
    );
}

#[test]
#[serial]
fn positional_sample_allocation_budget() {
    let text = vmstat_text(180);
    let mut sampler = configured(&text, "positional");
    sampler.sample().expect("warm-up sample");

    let (_out, allocations, deallocations) = measure_alloc_counts(|| {
        for _ in 0..64 {
            sampler.sample().expect("sample");
        }
    });

    assert!(
        allocations <= 8,
        "positional sample allocation budget exceeded: {}",
        allocations
    );
    assert!(
        deallocations <= 8,
        "positional sample deallocation budget exceeded: {}",
        deallocations
    );
}

#[test]
#[serial]
fn validated_sample_allocation_budget() {
    let text = vmstat_text(180);
    let mut sampler = configured(&text, "validated");
    sampler.sample().expect("warm-up sample");

    let (_out, allocations, _deallocations) = measure_alloc_counts(|| {
        for _ in 0..64 {
            sampler.sample().expect("sample");
        }
    });

    assert!(
        allocations <= 8,
        "validated sample allocation budget exceeded: {}",
        allocations
    );
}

#[test]
#[serial]
fn file_sample_reuses_read_buffer() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("vmstat");
    std::fs::write(&path, vmstat_text(180)).expect("write source");

    let mut sampler = VmstatSampler::new(FileSource::new(&path), HeapStorage);
    sampler
        .config(&PluginOptions::parse("set=alloc-test").expect("options"))
        .expect("configure");
    sampler.sample().expect("warm-up sample");

    let (_out, allocations, _deallocations) = measure_alloc_counts(|| {
        for _ in 0..64 {
            sampler.sample().expect("sample");
        }
    });

    // Opening a file may allocate for the path; the buffer must not regrow.
    assert!(
        allocations <= 64 * 2,
        "file sample allocation budget exceeded: {}",
        allocations
    );
}
