use std::path::Path;
use std::process::{exit, Command, ExitStatus};

use clap::{Parser, Subcommand, ValueEnum};

// ── CLI definition ─────────────────────────────────────────────────

#[derive(Parser)]
#[command(
    name = "xtask",
    about = "Task runner for the dispatch simulator workspace",
    long_about = "A unified CLI for running headless scenarios, benchmarks,\n\
                  load tests and CI checks in the dispatch simulator workspace."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the default scenario in fast mode
    Run {
        /// Scenario seed
        #[arg(long, default_value_t = 42)]
        seed: u64,
        /// Write the JSON run report here
        #[arg(long)]
        report: Option<String>,
    },
    /// Run the default scenario on real timers
    RunRealtime {
        /// Clock speed (simulated ms per real ms)
        #[arg(long, default_value_t = 600.0)]
        speed: f64,
        /// Call window in simulated minutes
        #[arg(long, default_value_t = 60.0)]
        duration_min: f64,
    },
    /// Run Criterion benchmarks
    Bench,
    /// Compare benchmarks: stash changes, create baseline, restore, compare
    BenchCompare,
    /// Run CI checks (fmt, clippy, tests, scenario smoke run, benchmarks)
    Ci {
        /// Job to run
        #[arg(value_enum, default_value_t = CiJob::Check)]
        job: CiJob,
    },
    /// Run load tests (ignored tests in dispatch_core)
    LoadTest,
}

#[derive(Clone, ValueEnum)]
enum CiJob {
    /// Formatting, clippy, and tests
    Check,
    /// Fast headless scenario as a smoke test
    Scenario,
    /// Run benchmarks
    Bench,
    /// Run check + scenario + bench
    All,
}

// ── helpers ────────────────────────────────────────────────────────

fn step(label: &str) {
    eprintln!("\n=== {label} ===");
}

/// Echo and run `program`, exiting with its code when it fails.
fn run_tool(program: &str, args: &[&str]) {
    eprintln!("+ {program} {}", args.join(" "));
    let status: ExitStatus = match Command::new(program).args(args).status() {
        Ok(status) => status,
        Err(err) => {
            eprintln!("could not start {program}: {err}");
            exit(127);
        }
    };
    if !status.success() {
        exit(status.code().unwrap_or(1));
    }
}

fn run_cargo(args: &[&str]) {
    run_tool("cargo", args);
}

fn run_headless(extra: &[&str]) {
    let mut args = vec!["run", "-p", "dispatch_headless", "--release", "--"];
    args.extend_from_slice(extra);
    run_cargo(&args);
}

fn bench_core(extra: &[&str]) {
    let mut args = vec!["bench", "--package", "dispatch_core", "--bench", "performance"];
    if !extra.is_empty() {
        args.push("--");
        args.extend_from_slice(extra);
    }
    run_cargo(&args);
}

// ── CI jobs ────────────────────────────────────────────────────────

fn ci_check() {
    step("Check formatting");
    run_cargo(&["fmt", "--all", "--", "--check"]);

    step("Clippy");
    run_cargo(&[
        "clippy",
        "--all-targets",
        "--all-features",
        "--",
        "-D",
        "warnings",
    ]);

    step("Test dispatch_core");
    run_cargo(&["test", "-p", "dispatch_core"]);

    step("Test dispatch_headless");
    run_cargo(&["test", "-p", "dispatch_headless"]);
}

fn ci_scenario() {
    step("Run fast scenario (seed 42, 2 simulated hours)");
    run_headless(&["--mode", "fast", "--seed", "42", "--duration-min", "120"]);
}

fn ci_bench() {
    step("Run benchmarks");
    bench_core(&[]);
}

// ── main ───────────────────────────────────────────────────────────

fn main() {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { seed, report } => {
            let seed = seed.to_string();
            let mut args = vec!["--mode", "fast", "--seed", &seed];
            if let Some(report) = report.as_deref() {
                args.extend_from_slice(&["--report", report]);
            }
            run_headless(&args);
        }
        Commands::RunRealtime {
            speed,
            duration_min,
        } => {
            let speed = speed.to_string();
            let duration = duration_min.to_string();
            run_headless(&[
                "--mode",
                "realtime",
                "--speed",
                &speed,
                "--duration-min",
                &duration,
            ]);
        }
        Commands::Bench => bench_core(&[]),
        Commands::BenchCompare => {
            let baseline_dir = Path::new("target/criterion");
            if baseline_dir.exists() {
                step("Removing existing benchmark data");
                std::fs::remove_dir_all(baseline_dir).expect("failed to remove target/criterion");
            }

            step("Stashing current changes");
            run_tool("git", &[
                "stash",
                "push",
                "-m",
                "Temporary stash for benchmark comparison",
            ]);

            step("Running benchmark to create baseline");
            bench_core(&["--save-baseline", "main"]);

            step("Reapplying changes");
            run_tool("git", &["stash", "pop"]);

            step("Running benchmark comparing against baseline");
            bench_core(&["--baseline", "main"]);

            eprintln!("\nDone! Check the output above to see performance comparison.");
        }
        Commands::Ci { job } => {
            match job {
                CiJob::Check => ci_check(),
                CiJob::Scenario => ci_scenario(),
                CiJob::Bench => ci_bench(),
                CiJob::All => {
                    ci_check();
                    ci_scenario();
                    ci_bench();
                }
            }
            eprintln!("\nCI job passed.");
        }
        Commands::LoadTest => {
            run_cargo(&[
                "test",
                "-p",
                "dispatch_core",
                "--test",
                "load_tests",
                "--",
                "--ignored",
            ]);
        }
    }
}
