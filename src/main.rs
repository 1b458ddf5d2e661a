//! simtrace: ingest a Multi2Sim GPU timing trace into SQLite.

use std::path::PathBuf;
use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{bail, Result};
use clap::Parser;
use log::LevelFilter;

use simtrace::ingest::{ingest_to_sqlite, ErrorPolicy, IngestConfig, IngestOutcome};
use simtrace::sqlite::CycleLayout;
use simtrace::trace::constants::{DEFAULT_FLUSH_THRESHOLD, DEFAULT_QUEUE_DEPTH};

#[derive(Debug, Parser)]
#[command(name = "simtrace")]
#[command(about = "Ingest a Multi2Sim GPU timing trace into a SQLite database")]
#[command(version)]
struct Command {
    /// Trace file to ingest (`.gz` is decompressed on the fly)
    trace: PathBuf,
    /// Output database
    #[arg(short, long, default_value = "trace.db")]
    output: PathBuf,
    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
    /// Closed records buffered per tracker before a batch write
    #[arg(long, default_value_t = DEFAULT_FLUSH_THRESHOLD)]
    flush_threshold: usize,
    /// What to do with events that reference an entity out of order
    #[arg(long, value_enum, default_value = "abort")]
    on_error: ErrorPolicy,
    /// Layout of the per-cycle stage tables
    #[arg(long, value_enum, default_value = "normalized")]
    cycle_layout: CycleLayout,
    /// Write batches on a dedicated writer thread
    #[arg(long)]
    threaded: bool,
    /// Batches queued for the writer thread
    #[arg(long, default_value_t = DEFAULT_QUEUE_DEPTH)]
    queue_depth: usize,
    /// Re-ingest even if the output already holds a complete run
    #[arg(short, long)]
    force: bool,
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    env_logger::Builder::from_env(env_logger::Env::default())
        .filter_level(level)
        .format_timestamp_millis()
        .init();
}

fn run(opts: Command) -> Result<()> {
    if opts.flush_threshold == 0 {
        bail!("--flush-threshold must be at least 1");
    }
    if opts.queue_depth == 0 {
        bail!("--queue-depth must be at least 1");
    }

    let config = IngestConfig {
        flush_threshold: opts.flush_threshold,
        queue_depth: opts.queue_depth,
        threaded: opts.threaded,
        error_policy: opts.on_error,
        cycle_layout: opts.cycle_layout,
        force: opts.force,
    };

    let cancel = Arc::new(AtomicBool::new(false));
    let flag = cancel.clone();
    // Ignore MultipleHandlers error (e.g., in test harnesses).
    let _ = ctrlc::set_handler(move || {
        flag.store(true, Ordering::SeqCst);
    });

    match ingest_to_sqlite(&opts.trace, &opts.output, &config, Some(cancel))? {
        IngestOutcome::AlreadyComplete => {
            eprintln!(
                "{} already holds a complete run (use --force to re-ingest)",
                opts.output.display()
            );
        }
        IngestOutcome::Ingested(summary) => {
            eprintln!("Wrote {}", opts.output.display());
            eprintln!("  status:          {}", summary.status.as_str());
            eprintln!("  lines:           {}", summary.lines);
            eprintln!("  last cycle:      {}", summary.last_cycle);
            eprintln!("  instructions:    {}", summary.instructions);
            eprintln!("  memory accesses: {}", summary.memory_accesses);
            eprintln!("  cycle rows:      {}", summary.cycle_rows);
            if summary.incomplete > 0 {
                eprintln!("  incomplete:      {}", summary.incomplete);
            }
            if summary.skipped_errors > 0 {
                eprintln!("  skipped errors:  {}", summary.skipped_errors);
            }
        }
    }
    Ok(())
}

fn main() {
    let opts = Command::parse();
    init_logging(opts.verbose);

    if let Err(e) = run(opts) {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}
