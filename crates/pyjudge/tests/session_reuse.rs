// Timed-out cases are interrupted inside the running session instead of
// leaving a spinning thread behind.
//
// Kept alone in its own binary: it counts the process's threads, so no other
// test may start hosts alongside it.

use std::time::{Duration, Instant};

use pyjudge::{HarnessSettings, RuntimeHost, TestCase, TestHarness, TestStatus};

#[cfg(target_os = "linux")]
fn thread_count() -> usize {
    std::fs::read_dir("/proc/self/task")
        .map(|entries| entries.count())
        .unwrap_or(0)
}

#[cfg(target_os = "linux")]
#[test]
fn test_timed_out_runs_do_not_leak_threads() {
    let host = RuntimeHost::new();
    host.mount(|_: &str| {});
    assert!(host.wait_ready(Duration::from_secs(60)), "{:?}", host.load_error());
    let settings = HarnessSettings {
        case_timeout_ns: 200_000_000,
        ..HarnessSettings::default()
    };
    let harness = TestHarness::new(host, settings);
    let spin = "def spin():\n    while True:\n        pass\n";
    let cases = [TestCase::new("", "")];

    let warm = harness
        .run("def one():\n    return 1\n", &[TestCase::new("", "1")], &|_: &str| {})
        .expect("warm-up run");
    assert_eq!(warm.outcomes[0].status, TestStatus::Passed);
    // The loader thread exits right after handing over the session.
    let settle = Instant::now() + Duration::from_secs(2);
    let mut before = thread_count();
    while Instant::now() < settle {
        std::thread::sleep(Duration::from_millis(50));
        before = before.min(thread_count());
    }

    for round in 0..3 {
        let report = harness
            .run(spin, &cases, &|_: &str| {})
            .expect("run completes");
        assert_eq!(
            report.outcomes[0].error_message.as_deref(),
            Some("TimeoutError: execution exceeded 200 ms"),
            "round {round}"
        );
    }

    assert!(
        thread_count() <= before,
        "threads grew from {before} to {}",
        thread_count()
    );
    let after = harness
        .run("def two():\n    return 2\n", &[TestCase::new("", "2")], &|_: &str| {})
        .expect("run after timeouts");
    assert_eq!(after.outcomes[0].status, TestStatus::Passed);
}
