#![forbid(unsafe_code)]

use std::env;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};
use weave_sim::TraceEventKind;
use weave_sim::campaign::{
    CampaignConfig, CampaignReport, DetailedTrace, format_violation, replay_seed, run_campaign,
};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "weave-sim: deterministic convergence campaigns for the weave CRDT",
    long_about = None
)]
struct Cli {
    /// Emit JSON output instead of human-readable text.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(
        about = "Run a campaign over a range of seeds",
        after_help = "EXAMPLES:\n    # 500 seeds with heavy packet loss\n    weave-sim run --seeds 500 --drop 40"
    )]
    Run {
        /// First seed of the campaign.
        #[arg(long, default_value_t = 0)]
        start: u64,

        /// Number of seeds to run.
        #[arg(long, default_value_t = 100)]
        seeds: u64,

        #[command(flatten)]
        params: SimParams,
    },

    #[command(
        about = "Replay one seed and print its trace",
        after_help = "EXAMPLES:\n    # Re-run the first failure reported by `run`\n    weave-sim replay 17"
    )]
    Replay {
        /// Seed to replay.
        seed: u64,

        /// Print every trace event, not just the summary.
        #[arg(long)]
        trace: bool,

        #[command(flatten)]
        params: SimParams,
    },
}

#[derive(Args, Debug, Clone)]
struct SimParams {
    /// Replicas per simulation.
    #[arg(long, default_value_t = 5)]
    replicas: usize,

    /// Rounds per simulation.
    #[arg(long, default_value_t = 24)]
    rounds: u64,

    /// Peers each new atom is sent to.
    #[arg(long, default_value_t = 2)]
    fanout: usize,

    /// Percent of sends dropped.
    #[arg(long, default_value_t = 10)]
    drop: u8,

    /// Percent of sends duplicated.
    #[arg(long, default_value_t = 5)]
    duplicate: u8,

    /// Percent chance per round of shuffling deliveries.
    #[arg(long, default_value_t = 10)]
    reorder: u8,

    /// Percent chance per round of toggling a partition.
    #[arg(long, default_value_t = 5)]
    partition: u8,

    /// Maximum delivery delay in rounds.
    #[arg(long, default_value_t = 3)]
    max_delay: u8,

    /// Pending-buffer bound per replica (0 = unbounded).
    #[arg(long, default_value_t = 10_000)]
    pending_limit: usize,
}

impl SimParams {
    fn campaign(&self, start: u64, seeds: u64) -> CampaignConfig {
        CampaignConfig {
            seed_range: start..start.saturating_add(seeds),
            replica_count: self.replicas,
            rounds: self.rounds,
            fanout: self.fanout,
            fault_drop_percent: self.drop,
            fault_duplicate_percent: self.duplicate,
            fault_reorder_percent: self.reorder,
            fault_partition_percent: self.partition,
            fault_max_delay: self.max_delay,
            pending_limit: self.pending_limit,
            ..CampaignConfig::default()
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("WEAVE_LOG").unwrap_or_else(|_| {
        EnvFilter::new(if env::var("DEBUG").is_ok() {
            "weave=debug,info"
        } else {
            "weave=info,warn"
        })
    });

    let format = env::var("WEAVE_LOG_FORMAT").unwrap_or_else(|_| "compact".to_string());

    let registry = tracing_subscriber::registry().with(filter);

    match format.as_str() {
        "json" => {
            registry
                .with(fmt::layer().json().with_ansi(false).with_writer(std::io::stderr))
                .init();
        }
        _ => {
            registry
                .with(fmt::layer().compact().with_writer(std::io::stderr))
                .init();
        }
    }
}

fn print_report(report: &CampaignReport, json: bool) -> Result<()> {
    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(report).context("Failed to serialize campaign report")?
        );
        return Ok(());
    }

    println!(
        "seeds run: {}  passed: {}  interesting: {}",
        report.seeds_run, report.seeds_passed, report.interesting_states_reached
    );
    for failure in &report.failures {
        println!("seed {} FAILED", failure.seed);
        for violation in &failure.violations {
            println!("  {violation}");
        }
    }
    if let Some(seed) = report.first_failure {
        println!("replay with: weave-sim replay {seed} --trace");
    }
    Ok(())
}

fn print_trace(detail: &DetailedTrace, full: bool, json: bool) -> Result<()> {
    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(detail).context("Failed to serialize replay")?
        );
        return Ok(());
    }

    let result = &detail.result;
    if full {
        for event in &result.trace {
            match &event.kind {
                TraceEventKind::Emit { replica, atom } => match atom.cause() {
                    Some(cause) => {
                        println!("[{:>3}] r{replica} emit {} <- {cause}", event.round, atom.id());
                    }
                    None => println!("[{:>3}] r{replica} emit {} (root)", event.round, atom.id()),
                },
                other => println!("[{:>3}] {other:?}", event.round),
            }
        }
    }

    println!(
        "trace events: {}  atoms: {}  converged: {}  digest: {}",
        result.trace.len(),
        result.convergence.canonical_len,
        result.convergence.converged,
        result.convergence.canonical_digest
    );
    if detail.oracle.passed {
        println!("oracle: all invariants hold");
    } else {
        println!("oracle: {} violation(s)", detail.oracle.violations.len());
        for violation in &detail.oracle.violations {
            println!("  {}", format_violation(violation));
        }
    }
    Ok(())
}

fn main() -> Result<ExitCode> {
    init_tracing();
    let cli = Cli::parse();

    let passed = match &cli.command {
        Commands::Run {
            start,
            seeds,
            params,
        } => {
            let report = run_campaign(&params.campaign(*start, *seeds))?;
            print_report(&report, cli.json)?;
            report.all_passed()
        }
        Commands::Replay {
            seed,
            trace,
            params,
        } => {
            let detail = replay_seed(*seed, &params.campaign(*seed, 1))?;
            print_trace(&detail, *trace, cli.json)?;
            detail.oracle.passed
        }
    };

    Ok(if passed {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
