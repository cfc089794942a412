use clap::Parser;
use pyjudge::{HarnessError, HarnessSettings, RuntimeHost, TestCase, TestHarness};
use std::io::{self, Read};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info};

/// Run a Python submission against LeetCode-style test cases.
#[derive(Parser, Debug)]
#[command(name = "pyjudge-cli", about = "Run a Python submission against test cases")]
struct Args {
    /// Submission source file, or `-` for stdin
    #[arg(long)]
    code: PathBuf,

    /// JSON array of {"input": ..., "output": ...} test cases
    #[arg(long)]
    tests: PathBuf,

    /// Print the structured run report as JSON instead of the transcript
    #[arg(long)]
    json: bool,

    /// Maximum number of test cases to run (default: 3, or PYJUDGE_MAX_TEST_CASES)
    #[arg(long)]
    max_cases: Option<usize>,

    /// Per-test-case timeout in milliseconds (default: 5000, or PYJUDGE_CASE_TIMEOUT_MS)
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Timeout for the submission's top-level code in milliseconds
    /// (default: 5000, or PYJUDGE_DEFINE_TIMEOUT_MS)
    #[arg(long)]
    define_timeout_ms: Option<u64>,

    /// How long to wait for the Python environment to load, in seconds
    #[arg(long, default_value_t = 60)]
    load_timeout_secs: u64,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(io::stderr)
        .with_target(false)
        .init();

    let args = Args::parse();

    let code = read_source(&args.code).unwrap_or_else(|e| {
        eprintln!("Error reading submission: {e}");
        std::process::exit(1);
    });
    let cases: Vec<TestCase> = std::fs::read_to_string(&args.tests)
        .map_err(|e| e.to_string())
        .and_then(|raw| serde_json::from_str(&raw).map_err(|e| e.to_string()))
        .unwrap_or_else(|e| {
            eprintln!("Error reading test cases: {e}");
            std::process::exit(1);
        });

    let mut settings = HarnessSettings::from_env();
    if let Some(n) = args.max_cases {
        settings.max_test_cases = n;
    }
    if let Some(ms) = args.timeout_ms {
        settings.case_timeout_ns = ms.saturating_mul(1_000_000);
    }
    if let Some(ms) = args.define_timeout_ms {
        settings.define_timeout_ns = ms.saturating_mul(1_000_000);
    }

    let host = RuntimeHost::global();
    host.mount(|text: &str| eprintln!("{text}"));
    if !host.wait_ready(Duration::from_secs(args.load_timeout_secs)) {
        let err = HarnessError::RuntimeLoad(
            host.load_error()
                .unwrap_or_else(|| format!("not ready after {}s", args.load_timeout_secs)),
        );
        error!(%err, "Python environment did not become ready");
        eprintln!("{err}");
        std::process::exit(1);
    }
    info!(cases = cases.len(), "running submission");

    let harness = TestHarness::new(host, settings);
    let print_transcript = !args.json;
    let sink = move |text: &str| {
        if print_transcript {
            println!("{text}");
        }
    };

    let report = match harness.run(&code, &cases, &sink) {
        Ok(report) => report,
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(1);
        }
    };

    if args.json {
        match serde_json::to_string_pretty(&report) {
            Ok(json) => println!("{json}"),
            Err(e) => {
                eprintln!("Error serializing report: {e}");
                std::process::exit(1);
            }
        }
    }
}

fn read_source(path: &PathBuf) -> io::Result<String> {
    if path.as_os_str() == "-" {
        let mut buf = String::new();
        io::stdin().read_to_string(&mut buf)?;
        Ok(buf)
    } else {
        std::fs::read_to_string(path)
    }
}
