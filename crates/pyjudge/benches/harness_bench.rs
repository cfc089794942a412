// crates/pyjudge/benches/harness_bench.rs
//
// Two Criterion benchmark groups:
//   pure_components: input normalizer, output comparator, signature discovery
//   warm_run: full harness run against an already-loaded session

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use pyjudge::{
    discover, normalize_input, outputs_match, HarnessSettings, RuntimeHost, TestCase, TestHarness,
};
use std::time::Duration;

const TWO_SUM: &str = "\
from typing import List

class Solution:
    def twoSum(self, nums: List[int], target: int) -> List[int]:
        seen = {}
        for i, n in enumerate(nums):
            if target - n in seen:
                return [seen[target - n], i]
            seen[n] = i
        return []
";

const TWO_SUM_INPUTS: [(&str, &str); 3] = [
    ("nums = [2,7,11,15], target = 9", "[0,1]"),
    ("nums = [3,2,4], target = 6", "[1,2]"),
    ("nums = [3,3], target = 6", "[0,1]"),
];

// ---------------------------------------------------------------------------
// Group 1: pure_components
// ---------------------------------------------------------------------------

fn pure_components(c: &mut Criterion) {
    let mut group = c.benchmark_group("pure_components");
    group.throughput(Throughput::Elements(1));

    group.bench_function("normalize_input", |b| {
        b.iter(|| normalize_input(black_box("grid = [[1,0],[0,1]], k = 1, label = 'a, b'")))
    });
    group.bench_function("outputs_match", |b| {
        b.iter(|| outputs_match(black_box("[[1, 2], [3, 4]]"), black_box("[[1,2],[3,4]]")))
    });
    group.bench_function("discover", |b| b.iter(|| discover(black_box(TWO_SUM))));
    group.finish();
}

// ---------------------------------------------------------------------------
// Group 2: warm_run
// ---------------------------------------------------------------------------

fn warm_run(c: &mut Criterion) {
    // Session start-up is excluded from the measurement.
    let host = RuntimeHost::new();
    host.mount(|text: &str| eprintln!("{text}"));
    if !host.wait_ready(Duration::from_secs(60)) {
        eprintln!("runtime did not load; skipping warm_run benchmark");
        return;
    }
    let harness = TestHarness::new(host, HarnessSettings::default());
    let cases: Vec<TestCase> = TWO_SUM_INPUTS
        .iter()
        .map(|(input, output)| TestCase::new(*input, *output))
        .collect();
    let sink = |_: &str| {};

    let mut group = c.benchmark_group("warm_run");
    group.sample_size(20);
    group.warm_up_time(Duration::from_secs(1));
    group.measurement_time(Duration::from_secs(10));

    group.bench_function("two_sum_three_cases", |b| {
        b.iter(|| harness.run(black_box(TWO_SUM), &cases, &sink))
    });
    group.finish();
}

criterion_group!(benches_pure_components, pure_components);
criterion_group!(benches_warm_run, warm_run);
criterion_main!(benches_pure_components, benches_warm_run);
